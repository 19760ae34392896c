use std::sync::LazyLock;

use regex::Regex;

static STACK_TRACE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:\s+\S|Caused by:|\.\.\. \d+ more|\s*at \S+\(.*\)$)")
        .expect("stack trace pattern is valid")
});

/// Decides whether a raw line continues the previous line
#[derive(Clone, Debug, Default)]
pub enum ContinuationRule {
    /// Every line stands alone
    Never,
    /// Lines starting with whitespace continue the previous one
    Indented,
    /// Indented lines plus Java/Python trace markers (`Caused by:`, `... N more`)
    #[default]
    StackTrace,
    /// Lines matching a caller-supplied pattern
    Pattern(Regex),
}

impl ContinuationRule {
    /// `line` is the escape-stripped text of the candidate line
    pub fn is_continuation(&self, line: &str) -> bool {
        match self {
            Self::Never => false,
            Self::Indented => is_indented(line),
            Self::StackTrace => STACK_TRACE.is_match(line),
            Self::Pattern(re) => re.is_match(line),
        }
    }
}

fn is_indented(line: &str) -> bool {
    line.starts_with([' ', '\t']) && !line.trim().is_empty()
}
