//! Year ranges and their segmentation.
//!
//! A collection request covers a span of years. Long spans are cut into
//! contiguous sub-ranges so that each model call asks about a manageable
//! window and each window is saved as its own note.

use std::fmt;

use regex::Regex;
use std::sync::OnceLock;

/// A user-supplied year range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum YearRange {
    /// Both bounds parsed as years.
    Numeric { start: i32, end: i32 },
    /// Free text that could not be parsed. Used verbatim for both bounds.
    Text(String),
}

impl YearRange {
    /// Parses `"1900-1999"` style input.
    ///
    /// Anything that does not start with `<digits>-<digits>` is kept as
    /// free text and will be handled as a single segment.
    pub fn parse(input: &str) -> Self {
        static RANGE: OnceLock<Regex> = OnceLock::new();
        let re = RANGE.get_or_init(|| Regex::new(r"^(\d{1,4})-(\d{1,4})").expect("valid regex"));

        let trimmed = input.trim();
        if let Some(caps) = re.captures(trimmed) {
            if let (Ok(start), Ok(end)) = (caps[1].parse(), caps[2].parse()) {
                return YearRange::Numeric { start, end };
            }
        }

        tracing::warn!("Could not parse time range '{trimmed}', treating it as a whole");
        YearRange::Text(trimmed.to_string())
    }

    /// Label used in prompts, file names and front matter.
    pub fn label(&self) -> String {
        match self {
            YearRange::Numeric { start, end } => format!("{start}-{end}"),
            YearRange::Text(text) => format!("{text}-{text}"),
        }
    }
}

/// One contiguous window of years, both bounds inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSegment {
    pub start: i32,
    pub end: i32,
}

impl TimeSegment {
    pub fn new(start: i32, end: i32) -> Self {
        Self { start, end }
    }

    /// Number of years covered.
    pub fn span(&self) -> i64 {
        i64::from(self.end) - i64::from(self.start) + 1
    }
}

impl fmt::Display for TimeSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Splits `[start, end]` into at most `count` contiguous segments.
///
/// Every segment except possibly the last is `ceil(span / count)` years
/// wide; the last one is clipped to `end`. Iteration stops as soon as the
/// cursor passes `end`, so fewer than `count` segments may come back.
/// A `count` of 0 behaves like 1 and `start > end` yields nothing.
pub fn segment(start: i32, end: i32, count: usize) -> Vec<TimeSegment> {
    if start > end {
        return Vec::new();
    }

    let count = count.max(1) as i64;
    let (start, end) = (i64::from(start), i64::from(end));
    let total_span = end - start + 1;
    let per_segment = (total_span + count - 1) / count;

    let mut segments = Vec::new();
    let mut cursor = start;
    while cursor <= end && (segments.len() as i64) < count {
        let segment_end = (cursor + per_segment - 1).min(end);
        // Both bounds stay within the original i32 inputs.
        segments.push(TimeSegment::new(cursor as i32, segment_end as i32));
        cursor = segment_end + 1;
    }
    segments
}

/// The plan for one collection request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentPlan {
    /// Numeric range split into windows.
    Split(Vec<TimeSegment>),
    /// Single year or free text, sent to the model as one request.
    Whole(YearRange),
}

impl SegmentPlan {
    pub fn len(&self) -> usize {
        match self {
            SegmentPlan::Split(segments) => segments.len(),
            SegmentPlan::Whole(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Range labels in processing order.
    pub fn labels(&self) -> Vec<String> {
        match self {
            SegmentPlan::Split(segments) => segments.iter().map(ToString::to_string).collect(),
            SegmentPlan::Whole(range) => vec![range.label()],
        }
    }
}

/// An event name plus the years to collect it over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRequest {
    pub name: String,
    pub years: YearRange,
}

impl EventRequest {
    pub fn new(name: impl Into<String>, years: YearRange) -> Self {
        Self {
            name: name.into(),
            years,
        }
    }

    /// Decides how the request is split.
    ///
    /// Only numeric ranges with distinct bounds are segmented; a single
    /// year or unparsed text passes through as one request.
    pub fn plan(&self, count: usize) -> SegmentPlan {
        match &self.years {
            YearRange::Numeric { start, end } if start != end => {
                SegmentPlan::Split(segment(*start, *end, count))
            }
            other => SegmentPlan::Whole(other.clone()),
        }
    }
}
