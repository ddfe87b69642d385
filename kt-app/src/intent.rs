//! Offline intent parser used when no model backend could be reached.
//!
//! Keyword anchored, case-insensitive, and only ever looks at the latest
//! utterance. Intents are tried in a fixed order: add, complete, delete, note.

use chrono::{DateTime, Days, Duration, FixedOffset, NaiveDateTime, NaiveTime, TimeZone};
use kt_llm::ToolCall;
use once_cell::sync::Lazy;
use regex::Regex;

const DEFAULT_TASK_TITLE: &str = "New Task";
const DEFAULT_LOOKUP_KEY: &str = "task";
const DEFAULT_DUE_HOUR: u32 = 17;
/// Longest local-time gap (a DST spring-forward) skipped when placing a due time.
const MAX_LOCAL_GAP_MINUTES: i64 = 180;

#[derive(Debug, Clone, PartialEq)]
pub enum LocalIntent {
    AddTask {
        title: String,
        due: DateTime<FixedOffset>,
    },
    CompleteTask {
        key: String,
    },
    DeleteTask {
        key: String,
    },
    AddNote {
        text: String,
    },
}

impl LocalIntent {
    pub fn into_tool_call(self) -> ToolCall {
        match self {
            Self::AddTask { title, due } => ToolCall::new("add_task")
                .with_arg("title", title)
                .with_arg("dueDate", due.to_rfc3339()),
            Self::CompleteTask { key } => ToolCall::new("complete_task").with_arg("title", key),
            Self::DeleteTask { key } => ToolCall::new("delete_task").with_arg("title", key),
            Self::AddNote { text } => ToolCall::new("add_note").with_arg("text", text),
        }
    }
}

fn regex(pattern: &str) -> Regex {
    Regex::new(pattern).expect("valid intent regex")
}

static ADD_TRIGGER: Lazy<Regex> = Lazy::new(|| regex(r"(?i)^\s*(?:add|create)\b"));
static TASK_WORD: Lazy<Regex> = Lazy::new(|| regex(r"(?i)\b(?:task|to-do|todo)s?\b"));
static COMPLETE_TRIGGER: Lazy<Regex> =
    Lazy::new(|| regex(r"(?i)\b(?:complete|completed|finish|finished|done)\b"));
static DELETE_TRIGGER: Lazy<Regex> = Lazy::new(|| regex(r"(?i)\b(?:delete|remove)\b"));
static NOTE_TRIGGER: Lazy<Regex> = Lazy::new(|| regex(r"(?i)\b(?:note|remember|write)\b"));

static TIME_OF_DAY: Lazy<Regex> =
    Lazy::new(|| regex(r"(?i)\bat\s+(\d{1,2})(?::(\d{2}))?\s*(am|pm)?\b"));
static TOMORROW: Lazy<Regex> = Lazy::new(|| regex(r"(?i)\btomorrow\b"));

/// Phrases that carry scheduling or list context rather than title text.
static NOISE: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)\bto\s+(?:my|the)\s+(?:(?:task|to-do|todo)\s+)?list\b",
        r"(?i)\b(?:today|tonight|tomorrow)\b",
        r"(?i)\bat\s+\d{1,2}(?::\d{2})?\s*(?:am|pm)?\b",
    ]
    .into_iter()
    .map(regex)
    .collect()
});

static ADD_VERB_PHRASE: Lazy<Regex> = Lazy::new(|| {
    regex(
        r"(?i)^\s*(?:add|create)\s+(?:(?:a|an|new)\s+)*(?:(?:task|to-do|todo)s?\b[:\s]*)?(?:(?:to|called|named)\b\s*)?",
    )
});

static COMPLETE_PHRASES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)\bmark\b",
        r"(?i)\bas\s+(?:done|complete|completed|finished)\b",
        r"(?i)\b(?:complete|completed|finish|finished|done)\b",
    ]
    .into_iter()
    .map(regex)
    .collect()
});

static DELETE_PHRASES: Lazy<Vec<Regex>> =
    Lazy::new(|| vec![regex(r"(?i)\b(?:delete|remove)\b")]);

static LOOKUP_FILLER: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)\b(?:the|my)\b",
        r"(?i)\b(?:task|to-do|todo)s?\b",
        r"(?i)\bfrom\s+(?:my|the)\s+list\b",
    ]
    .into_iter()
    .map(regex)
    .collect()
});

static NOTE_PHRASES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)^\s*(?:add|take|make|write|jot)\s+(?:down\s+)?(?:a\s+)?note\b(?:\s+(?:that|to)\b)?\s*:?",
        r"(?i)^\s*note\b(?:\s+(?:that|to)\b)?\s*:?",
        r"(?i)^\s*remember\b(?:\s+(?:that|to)\b)?\s*:?",
        r"(?i)^\s*write\s+(?:down\s+)?(?:that\s+)?:?",
    ]
    .into_iter()
    .map(regex)
    .collect()
});

/// Parses the newest utterance. `now` anchors the due-date resolver.
pub fn parse_intent<Tz: TimeZone>(utterance: &str, now: DateTime<Tz>) -> Option<LocalIntent> {
    let utterance = utterance.trim();
    if utterance.is_empty() {
        return None;
    }

    if ADD_TRIGGER.is_match(utterance) && TASK_WORD.is_match(utterance) {
        return Some(LocalIntent::AddTask {
            title: normalize_title(utterance),
            due: resolve_due(utterance, now).fixed_offset(),
        });
    }
    if COMPLETE_TRIGGER.is_match(utterance) {
        return Some(LocalIntent::CompleteTask {
            key: lookup_key(utterance, &COMPLETE_PHRASES),
        });
    }
    if DELETE_TRIGGER.is_match(utterance) {
        return Some(LocalIntent::DeleteTask {
            key: lookup_key(utterance, &DELETE_PHRASES),
        });
    }
    if NOTE_TRIGGER.is_match(utterance) {
        let stripped = tidy(&strip_all(utterance, &NOTE_PHRASES));
        let text = if stripped.is_empty() {
            utterance.to_string()
        } else {
            stripped
        };
        return Some(LocalIntent::AddNote { text });
    }
    None
}

/// Utterance to task title: noise phrases out, leading verb phrase out.
pub fn normalize_title(utterance: &str) -> String {
    let without_noise = strip_all(utterance, &NOISE);
    let title = tidy(&ADD_VERB_PHRASE.replace(&without_noise, " "));
    if title.is_empty() {
        DEFAULT_TASK_TITLE.to_string()
    } else {
        title
    }
}

fn lookup_key(utterance: &str, verbs: &[Regex]) -> String {
    let stripped = strip_all(&strip_all(&strip_all(utterance, verbs), &LOOKUP_FILLER), &NOISE);
    let key = tidy(&stripped);
    if key.is_empty() {
        DEFAULT_LOOKUP_KEY.to_string()
    } else {
        key
    }
}

/// Due instant for `utterance`. Day and time of day compose independently:
/// "tomorrow" moves the date, "at H[:MM][am|pm]" sets the time, otherwise 17:00.
pub fn resolve_due<Tz: TimeZone>(utterance: &str, now: DateTime<Tz>) -> DateTime<Tz> {
    let mut date = now.date_naive();
    if TOMORROW.is_match(utterance) {
        date = date.checked_add_days(Days::new(1)).unwrap_or(date);
    }

    let time = parse_time_of_day(utterance)
        .or_else(|| NaiveTime::from_hms_opt(DEFAULT_DUE_HOUR, 0, 0))
        .unwrap_or_default();

    first_valid_local(&now.timezone(), date.and_time(time)).unwrap_or(now)
}

/// `local` itself, or the first instant after a gap when `local` does not
/// exist in `tz`. Ambiguous times resolve to the earlier instant.
fn first_valid_local<Tz: TimeZone>(tz: &Tz, local: NaiveDateTime) -> Option<DateTime<Tz>> {
    (0..=MAX_LOCAL_GAP_MINUTES).find_map(|minutes| {
        let candidate = local.checked_add_signed(Duration::minutes(minutes))?;
        tz.from_local_datetime(&candidate).earliest()
    })
}

fn parse_time_of_day(utterance: &str) -> Option<NaiveTime> {
    let caps = TIME_OF_DAY.captures(utterance)?;
    let mut hour: u32 = caps.get(1)?.as_str().parse().ok()?;
    let minute: u32 = match caps.get(2) {
        Some(m) => m.as_str().parse().ok()?,
        None => 0,
    };
    match caps.get(3).map(|m| m.as_str().to_ascii_lowercase()).as_deref() {
        Some("pm") if hour < 12 => hour += 12,
        Some("am") if hour == 12 => hour = 0,
        _ => {}
    }
    NaiveTime::from_hms_opt(hour, minute, 0)
}

fn strip_all(text: &str, patterns: &[Regex]) -> String {
    patterns
        .iter()
        .fold(text.to_string(), |acc, re| re.replace_all(&acc, " ").into_owned())
}

fn tidy(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace())
        .to_string()
}
