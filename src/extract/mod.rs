//! Event extraction from existing notes.
//!
//! Event-list notes come in two styles, each handled by its own grammar:
//!
//! - **Braced** markers written by the collector prompt:
//!   `{甲午战争爆发（1894年）}`
//! - **List items** written by hand: `- 戊戌变法 (1898-1898)`
//!
//! [`EventGrammar::detect`] picks the braced grammar whenever a marker is
//! present and falls back to list items otherwise. Extraction is a pure
//! function of the text; running it twice gives the same result.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use crate::timeline::YearRange;

/// Label used when a braced marker carries no year.
pub const UNKNOWN_YEAR: &str = "未知";

/// Start label used when a list item has no usable range.
pub const OPEN_START: &str = "ancient";

/// End label used when a list item has no usable range.
pub const OPEN_END: &str = "modern";

/// Year information recovered for an event.
///
/// The two grammars default differently when the year is missing. That is
/// deliberate: braced markers report `Unknown`, list items report `Open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTiming {
    /// Braced marker with a `（YYYY年）` suffix.
    Year(i32),
    /// Braced marker without a year suffix.
    Unknown,
    /// List item with a parseable range (a single year gives `start == end`).
    Range { start: i32, end: i32 },
    /// List item whose parenthetical was missing or unparseable.
    Open,
}

impl EventTiming {
    /// Human-readable label for prompts.
    pub fn label(&self) -> String {
        match self {
            EventTiming::Year(year) => year.to_string(),
            EventTiming::Unknown => UNKNOWN_YEAR.to_string(),
            EventTiming::Range { start, end } if start == end => start.to_string(),
            EventTiming::Range { start, end } => format!("{start}-{end}"),
            EventTiming::Open => format!("{OPEN_START}-{OPEN_END}"),
        }
    }

    /// Converts to a collection range. Placeholders become free text and
    /// therefore a single pass-through segment.
    pub fn year_range(&self) -> YearRange {
        match *self {
            EventTiming::Year(year) => YearRange::Numeric {
                start: year,
                end: year,
            },
            EventTiming::Range { start, end } => YearRange::Numeric { start, end },
            EventTiming::Unknown => YearRange::Text(UNKNOWN_YEAR.to_string()),
            EventTiming::Open => YearRange::Text(format!("{OPEN_START}-{OPEN_END}")),
        }
    }
}

/// Where an event was found in its source note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locus {
    /// Exact byte span of the matched marker.
    Span {
        start: usize,
        end: usize,
        matched: String,
    },
    /// Literal line text; write-back targets its first occurrence.
    FirstOccurrence { matched: String },
}

impl Locus {
    /// The literal text that was matched.
    pub fn matched(&self) -> &str {
        match self {
            Locus::Span { matched, .. } | Locus::FirstOccurrence { matched } => matched,
        }
    }

    /// Moves a span forward by `delta` bytes, for text inserted before it.
    /// First-occurrence loci are position-free and stay unchanged.
    pub fn shifted(&self, delta: usize) -> Self {
        match self {
            Locus::Span {
                start,
                end,
                matched,
            } => Locus::Span {
                start: start + delta,
                end: end + delta,
                matched: matched.clone(),
            },
            other => other.clone(),
        }
    }
}

/// An event recovered from a note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedEvent {
    /// Full label as written (braced: the marker contents).
    pub name: String,
    /// Name with any year suffix removed.
    pub canonical_name: String,
    pub timing: EventTiming,
    /// Note the event came from. Empty for in-memory extraction.
    pub source_path: PathBuf,
    pub locus: Locus,
}

/// The two supported note styles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventGrammar {
    Braced,
    ListItem,
}

fn braced_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{([^{}]+)\}").expect("valid regex"))
}

fn year_suffix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"（(\d{4})年）").expect("valid regex"))
}

fn list_item() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // Trailing `[[...]]` annotations are detail links from earlier runs.
        Regex::new(
            r"^[ \t]*[-*+][ \t]+(?P<name>.+?)[ \t]*(?:[(（](?P<range>[^()（）]*)[)）])?(?:[ \t]*\[\[[^\]]*\]\])*[ \t]*$",
        )
        .expect("valid regex")
    })
}

fn year_span() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(\d{1,4})\s*年?\s*(?:-|－|–|—|~|〜|～|到|至)\s*(\d{1,4})\s*年?\s*$")
            .expect("valid regex")
    })
}

fn single_year() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(\d{1,4})\s*年?\s*$").expect("valid regex"))
}

impl EventGrammar {
    /// Chooses the grammar for a note: braced if any marker is present.
    pub fn detect(text: &str) -> Self {
        if braced_marker().is_match(text) {
            EventGrammar::Braced
        } else {
            EventGrammar::ListItem
        }
    }

    /// Extracts events in order of first occurrence.
    pub fn parse(&self, text: &str) -> Vec<ExtractedEvent> {
        match self {
            EventGrammar::Braced => parse_braced(text),
            EventGrammar::ListItem => parse_list_items(text),
        }
    }
}

/// Extracts events from note text using the detected grammar.
pub fn extract(text: &str) -> Vec<ExtractedEvent> {
    EventGrammar::detect(text).parse(text)
}

/// Reads a note and extracts its events, tagging each with the note path.
pub fn extract_from_file(path: &Path) -> std::io::Result<Vec<ExtractedEvent>> {
    let text = std::fs::read_to_string(path)?;
    Ok(extract(&text)
        .into_iter()
        .map(|mut event| {
            event.source_path = path.to_path_buf();
            event
        })
        .collect())
}

fn parse_braced(text: &str) -> Vec<ExtractedEvent> {
    braced_marker()
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let name = caps[1].trim();
            if name.is_empty() {
                return None;
            }

            let (canonical_name, timing) = match year_suffix().captures(name) {
                Some(year) => {
                    let canonical = year_suffix().replace_all(name, "").trim().to_string();
                    match year[1].parse() {
                        Ok(y) => (canonical, EventTiming::Year(y)),
                        Err(_) => (canonical, EventTiming::Unknown),
                    }
                }
                None => (name.to_string(), EventTiming::Unknown),
            };

            Some(ExtractedEvent {
                name: name.to_string(),
                canonical_name,
                timing,
                source_path: PathBuf::new(),
                locus: Locus::Span {
                    start: whole.start(),
                    end: whole.end(),
                    matched: whole.as_str().to_string(),
                },
            })
        })
        .collect()
}

fn parse_list_items(text: &str) -> Vec<ExtractedEvent> {
    text.lines()
        .filter_map(|line| {
            let caps = list_item().captures(line)?;
            let name = caps.name("name")?.as_str().trim();
            if name.is_empty() {
                return None;
            }

            let timing = caps
                .name("range")
                .map(|range| parse_year_span(range.as_str()))
                .unwrap_or(EventTiming::Open);

            Some(ExtractedEvent {
                name: name.to_string(),
                canonical_name: name.to_string(),
                timing,
                source_path: PathBuf::new(),
                locus: Locus::FirstOccurrence {
                    matched: line.trim_end().to_string(),
                },
            })
        })
        .collect()
}

fn parse_year_span(text: &str) -> EventTiming {
    if let Some(caps) = year_span().captures(text) {
        if let (Ok(start), Ok(end)) = (caps[1].parse(), caps[2].parse()) {
            return EventTiming::Range { start, end };
        }
    }
    if let Some(caps) = single_year().captures(text) {
        if let Ok(year) = caps[1].parse() {
            return EventTiming::Range {
                start: year,
                end: year,
            };
        }
    }
    EventTiming::Open
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_braced() {
        assert_eq!(
            EventGrammar::detect("intro\n{甲午战争（1894年）}\n"),
            EventGrammar::Braced
        );
        assert_eq!(
            EventGrammar::detect("- 戊戌变法 (1898-1898)"),
            EventGrammar::ListItem
        );
    }

    #[test]
    fn test_braced_with_year() {
        let text = "# 清末\n\n{甲午战争爆发（1894年）}\n{《马关条约》签订（1895年）}\n";
        let events = extract(text);
        assert_eq!(events.len(), 2);

        assert_eq!(events[0].name, "甲午战争爆发（1894年）");
        assert_eq!(events[0].canonical_name, "甲午战争爆发");
        assert_eq!(events[0].timing, EventTiming::Year(1894));
        assert_eq!(events[1].canonical_name, "《马关条约》签订");
        assert_eq!(events[1].timing, EventTiming::Year(1895));
    }

    #[test]
    fn test_braced_span_points_at_marker() {
        let text = "前言 {辛亥革命（1911年）} 后记";
        let events = extract(text);
        match &events[0].locus {
            Locus::Span {
                start,
                end,
                matched,
            } => {
                assert_eq!(&text[*start..*end], "{辛亥革命（1911年）}");
                assert_eq!(matched, "{辛亥革命（1911年）}");
            }
            other => panic!("Expected Span, got: {other:?}"),
        }
    }

    #[test]
    fn test_braced_without_year_is_unknown() {
        let events = extract("{洋务运动}");
        assert_eq!(events[0].name, "洋务运动");
        assert_eq!(events[0].canonical_name, "洋务运动");
        assert_eq!(events[0].timing, EventTiming::Unknown);
        assert_eq!(events[0].timing.label(), UNKNOWN_YEAR);
    }

    #[test]
    fn test_braced_skips_blank_markers() {
        let events = extract("{   } {五四运动（1919年）}");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].canonical_name, "五四运动");
    }

    #[test]
    fn test_braced_ignores_list_lines_when_markers_exist() {
        let text = "- 不会被提取 (1900-1901)\n{义和团运动（1900年）}";
        let events = extract(text);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].canonical_name, "义和团运动");
    }

    #[test]
    fn test_list_item_ascii_range() {
        let events = extract("- 第一次世界大战 (1914-1918)\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, "第一次世界大战");
        assert_eq!(
            events[0].timing,
            EventTiming::Range {
                start: 1914,
                end: 1918
            }
        );
        assert_eq!(
            events[0].locus,
            Locus::FirstOccurrence {
                matched: "- 第一次世界大战 (1914-1918)".to_string()
            }
        );
    }

    #[test]
    fn test_list_item_separator_variants() {
        let text = "\
- 太平天国运动（1851～1864）
- 抗日战争 (1931到1945)
* 解放战争（1945年至1949年）
- 冷战 (1947〜1991)
+ 大航海时代 (1400—1600)";
        let timings: Vec<_> = extract(text).into_iter().map(|e| e.timing).collect();
        assert_eq!(
            timings,
            vec![
                EventTiming::Range { start: 1851, end: 1864 },
                EventTiming::Range { start: 1931, end: 1945 },
                EventTiming::Range { start: 1945, end: 1949 },
                EventTiming::Range { start: 1947, end: 1991 },
                EventTiming::Range { start: 1400, end: 1600 },
            ]
        );
    }

    #[test]
    fn test_list_item_single_year() {
        let events = extract("- 辛亥革命 (1911)");
        assert_eq!(
            events[0].timing,
            EventTiming::Range {
                start: 1911,
                end: 1911
            }
        );
        assert_eq!(events[0].timing.label(), "1911");
    }

    #[test]
    fn test_list_item_missing_range_is_open() {
        let events = extract("- 丝绸之路\n- 郑和下西洋 (明朝初年)");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].name, "丝绸之路");
        assert_eq!(events[0].timing, EventTiming::Open);
        assert_eq!(events[1].name, "郑和下西洋");
        assert_eq!(events[1].timing, EventTiming::Open);
        assert_eq!(events[1].timing.label(), "ancient-modern");
    }

    #[test]
    fn test_list_item_ignores_trailing_detail_links() {
        let text = "\
- 洋务运动 (1861-1894) [[AIdetails/洋务运动_详情.md|详情]]
- 丝绸之路 [[AIdetails/丝绸之路_详情.md|详情]] [[AIdetails/丝绸之路_详情_1.md|详情]]
";
        let events = extract(text);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].name, "洋务运动");
        assert_eq!(
            events[0].timing,
            EventTiming::Range {
                start: 1861,
                end: 1894
            }
        );
        assert_eq!(events[1].name, "丝绸之路");
        assert_eq!(events[1].timing, EventTiming::Open);
    }

    #[test]
    fn test_shifted_span() {
        let events = extract("{a}{b}");
        let moved = events[1].locus.shifted(10);
        assert_eq!(
            moved,
            Locus::Span {
                start: 13,
                end: 16,
                matched: "{b}".to_string()
            }
        );
        let line = Locus::FirstOccurrence {
            matched: "- x".to_string(),
        };
        assert_eq!(line.shifted(5), line);
    }

    #[test]
    fn test_plain_lines_are_not_events() {
        assert!(extract("# 标题\n\n普通段落\n").is_empty());
    }

    #[test]
    fn test_extraction_is_restartable() {
        let text = "{鸦片战争（1840年）}\n{洋务运动}";
        assert_eq!(extract(text), extract(text));
    }

    #[test]
    fn test_timing_year_range_policy() {
        assert_eq!(
            EventTiming::Year(1894).year_range(),
            YearRange::Numeric {
                start: 1894,
                end: 1894
            }
        );
        assert_eq!(
            EventTiming::Unknown.year_range(),
            YearRange::Text("未知".to_string())
        );
        assert_eq!(
            EventTiming::Open.year_range(),
            YearRange::Text("ancient-modern".to_string())
        );
    }

    #[test]
    fn test_extract_from_file_sets_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("清末.md");
        std::fs::write(&path, "{戊戌变法（1898年）}").unwrap();

        let events = extract_from_file(&path).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].source_path, path);
    }
}
