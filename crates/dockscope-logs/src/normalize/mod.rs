//! Log line normalization
//!
//! A raw line has its terminal escapes stripped and is then offered to an
//! ordered list of recognizers. The first one that claims the line extracts
//! its timestamp, level, component, message and remaining fields, which are
//! rendered into one canonical text:
//!
//! ```text
//! MM-DD|HH:MM:SS.mmm LEVEL [component] message key=value ...
//! ```
//!
//! Lines no recognizer claims pass through with only escapes removed.
//! Rendered text is itself recognized as canonical, so normalizing a
//! normalized line changes nothing.

mod ansi;
mod continuation;
mod keyvalue;
mod recognizer;
pub mod timestamp;

use std::sync::LazyLock;

pub use ansi::strip_ansi;
pub use continuation::ContinuationRule;
pub use recognizer::Recognizer;

use dockscope_types::{LineFormat, LogLevel, NormalizedLine};

/// Fields a recognizer extracted from one line
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Fields {
    pub timestamp: Option<String>,
    pub level: Option<LogLevel>,
    pub component: Option<String>,
    pub message: Option<String>,
    pub extra: Vec<(String, String)>,
    pub format: LineFormat,
}

impl Fields {
    fn has_known_field(&self) -> bool {
        self.timestamp.is_some()
            || self.level.is_some()
            || self.component.is_some()
            || self.message.is_some()
    }

    /// Canonical text for these fields
    fn render(&self) -> String {
        let mut parts: Vec<String> = Vec::with_capacity(4 + self.extra.len());
        let prefixed = self.timestamp.is_some() || self.level.is_some();

        if let Some(ts) = &self.timestamp {
            parts.push(ts.clone());
        }
        if let Some(level) = &self.level {
            parts.push(level.label());
        }
        if let Some(component) = &self.component {
            if prefixed {
                parts.push(format!("[{component}]"));
            }
        }
        if let Some(message) = &self.message {
            parts.push(message.clone());
        }
        if let (Some(component), false) = (&self.component, prefixed) {
            parts.push(format!("component={}", keyvalue::quote(component)));
        }
        for (key, value) in &self.extra {
            parts.push(format!("{key}={}", keyvalue::quote(value)));
        }

        parts.join(" ")
    }

    fn into_line(self) -> NormalizedLine {
        let text = self.render();
        NormalizedLine {
            text,
            timestamp: self.timestamp,
            level: self.level,
            component: self.component,
            message: self.message,
            fields: self.extra,
            format: self.format,
        }
    }
}

/// Ordered set of recognizers
#[derive(Clone, Debug)]
pub struct Normalizer {
    recognizers: Vec<Recognizer>,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self {
            recognizers: Recognizer::DEFAULT_ORDER.to_vec(),
        }
    }
}

impl Normalizer {
    /// Use the given recognizers in order
    ///
    /// The canonical recognizer always runs first so that normalized text
    /// is stable under re-normalization. Duplicates are ignored.
    pub fn new(recognizers: impl IntoIterator<Item = Recognizer>) -> Self {
        let mut ordered = vec![Recognizer::Canonical];
        for r in recognizers {
            if !ordered.contains(&r) {
                ordered.push(r);
            }
        }
        Self {
            recognizers: ordered,
        }
    }

    pub fn recognizers(&self) -> &[Recognizer] {
        &self.recognizers
    }

    /// Normalize one physical line
    ///
    /// Never fails: anything unrecognized becomes a passthrough line.
    pub fn normalize(&self, raw: &str) -> NormalizedLine {
        let stripped = strip_ansi(raw);
        let Some(mut fields) = self.recognize(&stripped) else {
            return NormalizedLine::passthrough(stripped.into_owned());
        };
        let format = fields.format;

        // A message rendered bare can itself start with a timestamp, a level
        // or key=value pairs; settle the fields until the text is stable
        let mut text = fields.render();
        for _ in 0..MAX_SETTLE_PASSES {
            let Some(next) = self.recognize(&text) else {
                break;
            };
            let next_text = next.render();
            if next_text == text {
                break;
            }
            fields = next;
            text = next_text;
        }

        fields.format = format;
        fields.into_line()
    }

    fn recognize(&self, text: &str) -> Option<Fields> {
        self.recognizers.iter().find_map(|r| r.recognize(text))
    }
}

/// Each pass consumes a prefix, so a handful is enough for any real line
const MAX_SETTLE_PASSES: usize = 4;

static DEFAULT_NORMALIZER: LazyLock<Normalizer> = LazyLock::new(Normalizer::default);

/// Normalize with the default recognizer order
pub fn normalize(raw: &str) -> NormalizedLine {
    DEFAULT_NORMALIZER.normalize(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_line() {
        let line = normalize(r#"{"level":"info","ts":"2024-01-02T03:04:05.678Z","msg":"started"}"#);
        assert_eq!(line.timestamp.as_deref(), Some("01-02|03:04:05.678"));
        assert_eq!(line.level, Some(LogLevel::Info));
        assert_eq!(line.level.as_ref().map(LogLevel::as_str), Some("info"));
        assert_eq!(line.message.as_deref(), Some("started"));
        assert_eq!(line.text, "01-02|03:04:05.678 INFO started");
        assert_eq!(line.format, LineFormat::Json);
    }

    #[test]
    fn test_ansi_bare_level_is_passthrough() {
        let line = normalize("\x1b[31mERROR \x1b[0m connection failed");
        assert!(line.is_passthrough());
        assert_eq!(line.text, "ERROR connection failed");
        assert_eq!(line.level, None);
    }

    #[test]
    fn test_render_extras_and_component() {
        let line = normalize(
            r#"{"ts":"2024-01-02T03:04:05Z","level":"warn","logger":"db","msg":"slow","ms":1500,"q":"select 1"}"#,
        );
        assert_eq!(
            line.text,
            r#"01-02|03:04:05.000 WARN [db] slow ms=1500 q="select 1""#
        );
        assert_eq!(line.field("ms"), Some("1500"));
    }

    #[test]
    fn test_component_without_prefix_renders_as_field() {
        let line = normalize("msg=hello module=auth user=bob");
        assert_eq!(line.component.as_deref(), Some("auth"));
        assert_eq!(line.text, "hello component=auth user=bob");
    }

    #[test]
    fn test_nested_json_value_kept_as_json() {
        let line = normalize(r#"{"msg":"req","http":{"status":200}}"#);
        assert_eq!(line.field("http"), Some(r#"{"status":200}"#));
    }

    #[test]
    fn test_passthrough_unchanged() {
        for raw in ["plain message", "", "   indented", "{broken json", "a=1 b=2"] {
            let line = normalize(raw);
            assert!(line.is_passthrough(), "{raw:?}");
            assert_eq!(line.text, raw);
        }
    }

    #[test]
    fn test_idempotent() {
        let samples = [
            r#"{"level":"info","ts":"2024-01-02T03:04:05.678Z","msg":"started"}"#,
            r#"{"level":"notice","msg":"custom level","x":"a b"}"#,
            r#"{"level":"error","component":"a]b","msg":"odd"}"#,
            "time=2024-01-02T03:04:05Z level=debug msg=\"x y\" k=v",
            "msg=hello module=auth",
            "2024-01-02T03:04:05Z INFO [main] ok",
            "2024-01-02T03:04:05Z hello",
            "[ERROR] boom",
            "ERROR:root:Something failed",
            "\x1b[32mplain\x1b[0m text",
            "01-02|03:04:05.678 INFO [x] y",
            r#"{"msg":"[ERROR] disk full"}"#,
            r#"{"msg":"2024-01-02T03:04:05Z boom"}"#,
            r#"{"msg":"level=info","x":"1"}"#,
            "msg=\"[WARN] low disk\" module=fs",
        ];
        for raw in samples {
            let once = normalize(raw);
            let twice = normalize(&once.text);
            assert_eq!(twice.text, once.text, "{raw:?}");
        }
    }

    #[test]
    fn test_prefixed_message_is_settled() {
        let line = normalize(r#"{"msg":"[ERROR] disk full"}"#);
        assert_eq!(line.text, "ERROR disk full");
        assert_eq!(line.level, Some(LogLevel::Error));
        assert_eq!(line.message.as_deref(), Some("disk full"));
        assert_eq!(line.format, LineFormat::Json);

        let line = normalize(r#"{"msg":"2024-01-02T03:04:05Z boom"}"#);
        assert_eq!(line.text, "01-02|03:04:05.000 boom");
        assert_eq!(line.timestamp.as_deref(), Some("01-02|03:04:05.000"));

        let line = normalize(r#"{"msg":"level=info","x":"1"}"#);
        assert_eq!(line.text, "INFO x=1");
        assert_eq!(line.level, Some(LogLevel::Info));
        assert_eq!(line.field("x"), Some("1"));
    }

    #[test]
    fn test_custom_order_keeps_canonical_first() {
        let normalizer = Normalizer::new([Recognizer::Json, Recognizer::Json]);
        assert_eq!(
            normalizer.recognizers(),
            &[Recognizer::Canonical, Recognizer::Json]
        );
        assert!(normalizer.normalize("[WARN] x").is_passthrough());
    }
}
