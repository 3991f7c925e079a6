//! Note templates.
//!
//! Front matter is serialized from plain structs, so event names with
//! colons or quotes still produce valid YAML.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::VaultError;

/// Tags every timeline note carries.
const TIMELINE_TAGS: [&str; 2] = ["event", "history"];

/// Tags every detail note starts with.
const DETAIL_TAGS: [&str; 3] = ["event", "history", "detail"];

/// Placeholder for fields the model left out.
const MISSING: &str = "未知";

/// Placeholder for empty body sections.
const EMPTY_SECTION: &str = "暂无内容";

/// Body sections of a structured detail note, in output order.
pub const DETAIL_SECTIONS: [&str; 5] = ["概述", "起因与背景", "经过与发展", "结果与影响", "历史意义"];

/// A JSON value the model may give as text, a list, or a number.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Field {
    Text(String),
    List(Vec<Value>),
    Other(Value),
}

impl Field {
    /// Flattens the value to display text.
    pub fn text(&self) -> String {
        match self {
            Field::Text(s) => s.trim().to_string(),
            Field::List(items) => items
                .iter()
                .map(value_text)
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join(", "),
            Field::Other(value) => value_text(value),
        }
    }

    /// Splits into items: lists by element, text on ASCII or full-width commas.
    pub fn items(&self) -> Vec<String> {
        let raw: Vec<String> = match self {
            Field::List(items) => items.iter().map(value_text).collect(),
            other => other
                .text()
                .split([',', '，', '、'])
                .map(str::to_string)
                .collect(),
        };
        raw.into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Structured details as requested by the detail prompt.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct DetailRecord {
    pub title: Option<Field>,
    pub happened: Option<Field>,
    #[serde(alias = "person", alias = "人物")]
    pub people: Option<Field>,
    #[serde(alias = "places", alias = "地点")]
    pub location: Option<Field>,
    pub tags: Option<Field>,
    pub overview: Option<Field>,
    pub background: Option<Field>,
    pub course: Option<Field>,
    pub outcome: Option<Field>,
    pub significance: Option<Field>,
    /// Older single-field body.
    #[serde(alias = "detailes")]
    pub details: Option<Field>,
}

impl DetailRecord {
    fn has_known_field(&self) -> bool {
        [
            &self.title,
            &self.happened,
            &self.people,
            &self.location,
            &self.tags,
            &self.overview,
            &self.background,
            &self.course,
            &self.outcome,
            &self.significance,
            &self.details,
        ]
        .iter()
        .any(|f| f.is_some())
    }

    /// Section bodies in [`DETAIL_SECTIONS`] order.
    ///
    /// The legacy `details` field stands in for a missing overview.
    pub fn sections(&self) -> [(&'static str, String); 5] {
        let text = |f: &Option<Field>| f.as_ref().map(Field::text).filter(|s| !s.is_empty());
        let overview = text(&self.overview).or_else(|| text(&self.details));
        let mut bodies = [
            overview,
            text(&self.background),
            text(&self.course),
            text(&self.outcome),
            text(&self.significance),
        ]
        .into_iter();

        DETAIL_SECTIONS.map(|heading| {
            let body = bodies.next().flatten();
            (heading, body.unwrap_or_else(|| EMPTY_SECTION.to_string()))
        })
    }
}

/// Model output for a detail request, after interpretation.
#[derive(Debug, Clone, PartialEq)]
pub enum DetailContent {
    Structured(DetailRecord),
    Raw(String),
}

impl DetailContent {
    /// Looks for a fenced JSON block (or takes the whole text) and parses it.
    ///
    /// Anything that is not a JSON object with at least one known field is
    /// kept as raw text.
    pub fn parse(content: &str) -> Self {
        static FENCE: OnceLock<Regex> = OnceLock::new();
        let fence = FENCE.get_or_init(|| {
            Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").expect("valid regex")
        });

        let candidate = fence
            .captures(content)
            .and_then(|caps| caps.get(1))
            .map_or(content.trim(), |m| m.as_str());

        let record = match serde_json::from_str::<Value>(candidate) {
            Ok(value @ Value::Object(_)) => serde_json::from_value::<DetailRecord>(value),
            Ok(_) => return DetailContent::Raw(content.to_string()),
            Err(e) => Err(e),
        };

        match record {
            Ok(record) if record.has_known_field() => DetailContent::Structured(record),
            Ok(_) => DetailContent::Raw(content.to_string()),
            Err(e) => {
                tracing::debug!("Detail JSON did not parse: {e}");
                DetailContent::Raw(content.to_string())
            }
        }
    }
}

#[derive(Serialize)]
struct TimelineFrontMatter<'a> {
    event: &'a str,
    time_range: &'a str,
    created: &'a str,
    tags: &'a [&'a str],
}

#[derive(Serialize)]
struct DetailFrontMatter<'a> {
    title: &'a str,
    event: &'a str,
    happened: &'a str,
    people: &'a str,
    location: &'a str,
    tags: &'a [String],
}

#[derive(Serialize)]
struct RawFrontMatter<'a> {
    event: &'a str,
    created: &'a str,
    tags: &'a [&'a str],
}

/// Serializes `fields` as a `---` delimited front matter block.
fn front_matter<T: Serialize>(event_name: &str, fields: &T) -> Result<String, VaultError> {
    let yaml = serde_saphyr::to_string(fields).map_err(|e| VaultError::FrontMatter {
        event: event_name.to_string(),
        message: e.to_string(),
    })?;
    let yaml = yaml.strip_prefix("---\n").unwrap_or(&yaml);
    let newline = if yaml.ends_with('\n') { "" } else { "\n" };
    Ok(format!("---\n{yaml}{newline}---\n\n"))
}

/// Renders a timeline note for one collected window.
pub fn timeline_note(
    event_name: &str,
    range_label: &str,
    created: &str,
    content: &str,
) -> Result<String, VaultError> {
    let mut out = front_matter(
        event_name,
        &TimelineFrontMatter {
            event: event_name,
            time_range: range_label,
            created,
            tags: &TIMELINE_TAGS,
        },
    )?;
    out.push_str(&format!("# {event_name} ({range_label})\n\n{content}\n\n"));
    Ok(out)
}

/// Renders a structured detail note.
pub fn detail_note(
    event_name: &str,
    source_link: &str,
    record: &DetailRecord,
) -> Result<String, VaultError> {
    let field = |f: &Option<Field>| {
        f.as_ref()
            .map(Field::text)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| MISSING.to_string())
    };
    let title = record
        .title
        .as_ref()
        .map(Field::text)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| event_name.to_string());
    let happened = field(&record.happened);
    let people = field(&record.people);
    let location = field(&record.location);

    let mut tags: Vec<String> = DETAIL_TAGS.iter().map(|t| t.to_string()).collect();
    for tag in record.tags.as_ref().map(Field::items).unwrap_or_default() {
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    }

    let mut out = front_matter(
        event_name,
        &DetailFrontMatter {
            title: &title,
            event: event_name,
            happened: &happened,
            people: &people,
            location: &location,
            tags: &tags,
        },
    )?;
    out.push_str(&format!(
        "# {title}\n\n\
         > 本文是对事件 [[{source_link}|{event_name}]] 的详细介绍\n\n\
         ## 基本信息\n\n\
         - **发生时间**：{happened}\n\
         - **相关人物**：{people}\n\
         - **发生地点**：{location}\n\n"
    ));

    for (heading, body) in record.sections() {
        out.push_str(&format!("## {heading}\n\n{body}\n\n"));
    }

    out.push_str(&format!(
        "## 相关链接\n\n- [[{source_link}|返回事件列表]]\n\n"
    ));
    Ok(out)
}

/// Renders a detail note around unparsed model text.
pub fn raw_detail_note(
    event_name: &str,
    source_link: &str,
    created: &str,
    content: &str,
) -> Result<String, VaultError> {
    let mut out = front_matter(
        event_name,
        &RawFrontMatter {
            event: event_name,
            created,
            tags: &DETAIL_TAGS,
        },
    )?;
    out.push_str(&format!(
        "# {event_name} 详细信息\n\n\
         > 本文是对事件 [[{source_link}|{event_name}]] 的详细介绍\n\n\
         {content}\n\n\
         ## 相关链接\n\n\
         - [[{source_link}|返回事件列表]]\n\n"
    ));
    Ok(out)
}

/// Front matter fields read back from a rendered note.
#[cfg(test)]
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct ParsedFrontMatter {
    pub title: Option<String>,
    pub event: String,
    pub time_range: Option<String>,
    pub created: Option<String>,
    pub happened: Option<String>,
    pub people: Option<String>,
    pub location: Option<String>,
    pub tags: Vec<String>,
}

/// Parses the `---` block at the top of `note`.
#[cfg(test)]
pub(crate) fn parse_front_matter(note: &str) -> ParsedFrontMatter {
    let rest = note.strip_prefix("---\n").expect("note starts with front matter");
    let end = rest.find("\n---\n").expect("front matter is closed");
    serde_saphyr::from_str(&rest[..=end]).expect("front matter is valid YAML")
}
