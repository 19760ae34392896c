use regex::{Regex, RegexBuilder};

/// How a query applies to the buffer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SearchMode {
    /// Highlight and step through matches; every line stays visible
    #[default]
    Search,
    /// Show only matching lines, using include/exclude terms
    Filter,
}

/// One term of a filter query
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilterTerm {
    pub text: String,
    pub exclude: bool,
}

/// Split a filter query into terms
///
/// Terms are separated by spaces; double quotes group words. A leading
/// `!` or `-` makes a term exclusive, a leading `+` is optional for
/// inclusive ones. Terms that end up empty are dropped.
pub fn parse_terms(query: &str) -> Vec<FilterTerm> {
    let mut raw_terms = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for c in query.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            ' ' if !in_quotes => {
                if !current.is_empty() {
                    raw_terms.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        raw_terms.push(current);
    }

    raw_terms
        .into_iter()
        .filter_map(|term| {
            let (text, exclude) = match term.chars().next() {
                Some('!' | '-') => (&term[1..], true),
                Some('+') => (&term[1..], false),
                _ => (term.as_str(), false),
            };
            (!text.is_empty()).then(|| FilterTerm {
                text: text.to_string(),
                exclude,
            })
        })
        .collect()
}

/// Compiled query for log lines
///
/// Search mode treats the whole query as one literal. Filter mode parses
/// terms: a line is kept when it matches no exclusive term and, if there
/// are inclusive terms, at least one of them.
#[derive(Clone)]
pub struct CompiledFilter {
    /// Original query string
    pattern: String,
    mode: SearchMode,
    include: Vec<Regex>,
    exclude: Vec<Regex>,
    terms: Vec<FilterTerm>,
    case_sensitive: bool,
}

impl CompiledFilter {
    /// Compile `pattern` for `mode`; an empty query yields `None`
    pub fn new(
        pattern: &str,
        mode: SearchMode,
        case_sensitive: bool,
    ) -> Result<Option<Self>, regex::Error> {
        let terms = match mode {
            SearchMode::Search if pattern.is_empty() => return Ok(None),
            SearchMode::Search => vec![FilterTerm {
                text: pattern.to_string(),
                exclude: false,
            }],
            SearchMode::Filter => parse_terms(pattern),
        };
        if terms.is_empty() {
            return Ok(None);
        }

        let mut include = Vec::new();
        let mut exclude = Vec::new();
        for term in &terms {
            let re = literal(&term.text, case_sensitive)?;
            if term.exclude {
                exclude.push(re);
            } else {
                include.push(re);
            }
        }

        Ok(Some(Self {
            pattern: pattern.to_string(),
            mode,
            include,
            exclude,
            terms,
            case_sensitive,
        }))
    }

    /// Match spans when the line passes, `None` when it does not
    ///
    /// Spans are sorted, non-overlapping byte ranges of the inclusive
    /// terms. A line kept only because no exclusive term hit has no spans.
    pub fn evaluate(&self, text: &str) -> Option<Vec<(usize, usize)>> {
        if self.exclude.iter().any(|re| re.is_match(text)) {
            return None;
        }
        if self.include.is_empty() {
            return Some(Vec::new());
        }

        let spans = self.find_matches(text);
        (!spans.is_empty()).then_some(spans)
    }

    pub fn matches(&self, text: &str) -> bool {
        self.evaluate(text).is_some()
    }

    /// Find all inclusive match positions in a string (for highlighting)
    pub fn find_matches(&self, text: &str) -> Vec<(usize, usize)> {
        let mut spans: Vec<(usize, usize)> = self
            .include
            .iter()
            .flat_map(|re| re.find_iter(text).map(|m| (m.start(), m.end())))
            .collect();
        spans.sort_unstable();

        let mut merged: Vec<(usize, usize)> = Vec::with_capacity(spans.len());
        for (start, end) in spans {
            match merged.last_mut() {
                Some(last) if start <= last.1 => last.1 = last.1.max(end),
                _ => merged.push((start, end)),
            }
        }
        merged
    }

    /// Get the original pattern
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn mode(&self) -> SearchMode {
        self.mode
    }

    pub fn terms(&self) -> &[FilterTerm] {
        &self.terms
    }

    pub fn is_case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    /// Short indicator such as `+error,warn... -debug`
    pub fn summary(&self) -> String {
        let list = |exclude: bool| {
            let texts: Vec<&str> = self
                .terms
                .iter()
                .filter(|t| t.exclude == exclude)
                .map(|t| t.text.as_str())
                .collect();
            if texts.is_empty() {
                return None;
            }
            let mut joined = texts[..texts.len().min(2)].join(",");
            if texts.len() > 2 {
                joined.push_str("...");
            }
            Some(joined)
        };

        let mut parts = Vec::new();
        if let Some(inc) = list(false) {
            parts.push(format!("+{inc}"));
        }
        if let Some(exc) = list(true) {
            parts.push(format!("-{exc}"));
        }
        parts.join(" ")
    }
}

impl std::fmt::Debug for CompiledFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledFilter")
            .field("pattern", &self.pattern)
            .field("mode", &self.mode)
            .field("terms", &self.terms)
            .field("case_sensitive", &self.case_sensitive)
            .finish()
    }
}

fn literal(text: &str, case_sensitive: bool) -> Result<Regex, regex::Error> {
    RegexBuilder::new(&regex::escape(text))
        .case_insensitive(!case_sensitive)
        .build()
}
