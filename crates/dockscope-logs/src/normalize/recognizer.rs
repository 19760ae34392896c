//! Format recognizers
//!
//! Each recognizer either claims a line and extracts its fields or declines.
//! They are tried in a fixed order and the first claim wins.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use super::{Fields, keyvalue, timestamp};
use dockscope_types::{LineFormat, LogLevel};

pub(crate) const TIMESTAMP_KEYS: &[&str] = &["timestamp", "ts", "time", "@timestamp", "datetime"];
pub(crate) const LEVEL_KEYS: &[&str] = &[
    "level",
    "lvl",
    "severity",
    "log.level",
    "loglevel",
    "log_level",
];
pub(crate) const COMPONENT_KEYS: &[&str] = &[
    "component",
    "logger",
    "logger_name",
    "module",
    "target",
    "caller",
    "source",
];
pub(crate) const MESSAGE_KEYS: &[&str] = &["message", "msg", "log", "text", "body"];

static CANONICAL_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<ts>\d{2}-\d{2}\|\d{2}:\d{2}:\d{2}\.\d{3})(?: (?P<level>TRACE|DEBUG|INFO|WARN|ERROR|FATAL))?(?: \[(?P<component>[^\]]+)\])?(?: (?P<rest>.*))?$",
    )
    .expect("canonical line pattern is valid")
});

// Bare numbers at the start of prose are not timestamps; epochs need brackets
static TIMESTAMP_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^(?:\[(?P<epoch>\d{13}|\d{10}(?:\.\d{1,9})?)\]",
        r"|\[?(?P<ts>",
        r"\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:[.,]\d{1,9})?(?:[Zz]|[+-]\d{2}:?\d{2})?",
        r"|\d{4}/\d{2}/\d{2}[T ]\d{2}:\d{2}:\d{2}(?:[.,]\d{1,9})?",
        r"|\d{8}T\d{6}(?:\.\d{1,9})?Z?",
        r")\]?)(?:\s+(?P<rest>.*))?$"
    ))
    .expect("timestamp prefix pattern is valid")
});

/// One line format the normalizer can recognize
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Recognizer {
    /// Text already in canonical form
    Canonical,
    /// A JSON object with at least one known field
    Json,
    /// logfmt `key=value` pairs with at least one known key
    KeyValue,
    /// A leading timestamp, optionally followed by a level and component
    TimestampPrefixed,
    /// `[LEVEL] msg`, `LEVEL: msg` and `LEVEL:component:msg`
    BracketedLevel,
}

impl Recognizer {
    /// Order used when none is configured
    pub const DEFAULT_ORDER: [Recognizer; 5] = [
        Self::Canonical,
        Self::Json,
        Self::KeyValue,
        Self::TimestampPrefixed,
        Self::BracketedLevel,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Canonical => "canonical",
            Self::Json => "json",
            Self::KeyValue => "keyvalue",
            Self::TimestampPrefixed => "timestamp",
            Self::BracketedLevel => "bracketed",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "canonical" => Some(Self::Canonical),
            "json" => Some(Self::Json),
            "keyvalue" | "logfmt" | "kv" => Some(Self::KeyValue),
            "timestamp" | "timestamped" => Some(Self::TimestampPrefixed),
            "bracketed" | "level" => Some(Self::BracketedLevel),
            _ => None,
        }
    }

    pub fn format(&self) -> LineFormat {
        match self {
            Self::Canonical => LineFormat::Canonical,
            Self::Json => LineFormat::Json,
            Self::KeyValue => LineFormat::KeyValue,
            Self::TimestampPrefixed => LineFormat::TimestampPrefixed,
            Self::BracketedLevel => LineFormat::BracketedLevel,
        }
    }

    /// Extract fields from an escape-free line, or decline it
    pub(crate) fn recognize(&self, text: &str) -> Option<Fields> {
        match self {
            Self::Canonical => recognize_canonical(text),
            Self::Json => recognize_json(text),
            Self::KeyValue => recognize_key_value(text),
            Self::TimestampPrefixed => recognize_timestamp_prefixed(text),
            Self::BracketedLevel => recognize_bracketed_level(text),
        }
    }
}

fn recognize_canonical(text: &str) -> Option<Fields> {
    let caps = CANONICAL_LINE.captures(text)?;
    let capture = |name: &str| caps.name(name).map(|m| m.as_str().to_string());

    Some(Fields {
        timestamp: capture("ts"),
        level: caps.name("level").and_then(|m| LogLevel::from_word(m.as_str())),
        component: capture("component"),
        message: capture("rest"),
        extra: Vec::new(),
        format: LineFormat::Canonical,
    })
}

// ============================================================================
// Structured formats
// ============================================================================

fn recognize_json(text: &str) -> Option<Fields> {
    let trimmed = text.trim();
    if !(trimmed.starts_with('{') && trimmed.ends_with('}')) {
        return None;
    }
    let Ok(Value::Object(map)) = serde_json::from_str::<Value>(trimmed) else {
        return None;
    };

    let mut items: Vec<(String, Value)> = map.into_iter().collect();
    items.sort_by(|a, b| a.0.cmp(&b.0));

    let timestamp = take(&mut items, TIMESTAMP_KEYS, |v| {
        json_scalar(v).and_then(|s| timestamp::canonicalize(&s))
    });
    let level = take(&mut items, LEVEL_KEYS, |v| match v {
        Value::String(s) => LogLevel::parse(s),
        Value::Number(n) => n.as_u64().map(LogLevel::from_numeric),
        _ => None,
    });
    let component = take(&mut items, COMPONENT_KEYS, |v| {
        v.as_str().filter(|s| !s.is_empty()).map(str::to_string)
    });
    let message = take(&mut items, MESSAGE_KEYS, json_scalar);

    let fields = Fields {
        timestamp,
        level,
        component,
        message,
        extra: items
            .into_iter()
            .map(|(k, v)| (k, json_text(&v)))
            .collect(),
        format: LineFormat::Json,
    };
    fields.has_known_field().then_some(fields)
}

fn recognize_key_value(text: &str) -> Option<Fields> {
    let mut items = keyvalue::parse_pairs(text)?;
    if items.len() < 2 {
        return None;
    }

    let timestamp = take(&mut items, TIMESTAMP_KEYS, |v| timestamp::canonicalize(v));
    let level = take(&mut items, LEVEL_KEYS, |v| LogLevel::parse(v));
    let component = take(&mut items, COMPONENT_KEYS, |v| {
        (!v.is_empty()).then(|| v.clone())
    });
    let message = take(&mut items, MESSAGE_KEYS, |v| Some(v.clone()));

    let fields = Fields {
        timestamp,
        level,
        component,
        message,
        extra: items,
        format: LineFormat::KeyValue,
    };
    fields.has_known_field().then_some(fields)
}

/// Remove and convert the first key (in priority order) whose value is usable
fn take<V, T>(
    items: &mut Vec<(String, V)>,
    keys: &[&str],
    mut accept: impl FnMut(&V) -> Option<T>,
) -> Option<T> {
    for key in keys {
        let Some(pos) = items.iter().position(|(k, _)| k.eq_ignore_ascii_case(key)) else {
            continue;
        };
        if let Some(value) = accept(&items[pos].1) {
            items.remove(pos);
            return Some(value);
        }
    }
    None
}

fn json_scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn json_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ============================================================================
// Prefix formats
// ============================================================================

fn recognize_timestamp_prefixed(text: &str) -> Option<Fields> {
    let caps = TIMESTAMP_PREFIX.captures(text)?;
    let ts = caps.name("ts").or_else(|| caps.name("epoch"))?;
    let ts = timestamp::canonicalize(ts.as_str())?;
    let rest = caps.name("rest").map_or("", |m| m.as_str());

    // Orchestrators prefix JSON payloads with their own timestamp
    if let Some(mut fields) = recognize_json(rest) {
        fields.timestamp.get_or_insert(ts);
        return Some(fields);
    }

    let (level, after_level) = match take_level(rest, false) {
        Some((level, after)) => (Some(level), after),
        None => (None, rest),
    };
    let (component, message) = take_component(after_level.trim_start(), level.is_some());

    Some(Fields {
        timestamp: Some(ts),
        level,
        component,
        message: (!message.is_empty()).then(|| message.to_string()),
        extra: Vec::new(),
        format: LineFormat::TimestampPrefixed,
    })
}

fn recognize_bracketed_level(text: &str) -> Option<Fields> {
    let (level, rest) = take_level(text, true)?;
    let rest = rest.trim_start();

    // Python logging: `ERROR:root:message`
    let (component, message) = match python_component(rest) {
        Some((component, message)) => (Some(component), message),
        None => take_component(rest, true),
    };

    Some(Fields {
        timestamp: None,
        level: Some(level),
        component,
        message: Some(message.to_string()),
        extra: Vec::new(),
        format: LineFormat::BracketedLevel,
    })
}

/// Leading `[LEVEL]`, `LEVEL:` or (unless `strict`) a bare `LEVEL` word
fn take_level(text: &str, strict: bool) -> Option<(LogLevel, &str)> {
    if let Some(inner) = text.strip_prefix('[') {
        let end = inner.find(']')?;
        let level = LogLevel::from_word(inner[..end].trim())?;
        let after = &inner[end + 1..];
        return Some((level, after.strip_prefix(':').unwrap_or(after)));
    }

    let end = text
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(text.len());
    let level = LogLevel::from_word(&text[..end])?;
    let after = &text[end..];

    if let Some(stripped) = after.strip_prefix(':') {
        return Some((level, stripped));
    }
    if strict {
        return None;
    }
    (after.is_empty() || after.starts_with(char::is_whitespace)).then_some((level, after))
}

/// `[component]` prefix, or a `module::path:` target when a level preceded it
fn take_component(text: &str, after_level: bool) -> (Option<String>, &str) {
    if let Some(inner) = text.strip_prefix('[') {
        if let Some(end) = inner.find(']') {
            let name = inner[..end].trim();
            if !name.is_empty() {
                let after = &inner[end + 1..];
                let after = after.strip_prefix(':').unwrap_or(after);
                return (Some(name.to_string()), after.trim_start());
            }
        }
    }

    if after_level {
        if let Some((target, message)) = text.split_once(": ") {
            if is_target(target) {
                return (Some(target.to_string()), message.trim_start());
            }
        }
    }

    (None, text)
}

fn python_component(text: &str) -> Option<(String, &str)> {
    let (name, message) = text.split_once(':')?;
    (!name.is_empty() && !message.starts_with(' ') && is_target(name))
        .then(|| (name.to_string(), message))
}

fn is_target(s: &str) -> bool {
    let mut chars = s.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | ':' | '.' | '-' | '/'))
        && !s.ends_with(':')
}
