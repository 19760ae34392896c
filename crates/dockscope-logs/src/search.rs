//! Search and filter over a log buffer
//!
//! The engine keeps the match list for one buffer in index order and brings
//! it up to date incrementally: on [`SearchEngine::sync`] only lines that
//! were appended (or grew by a continuation) since the previous sync are
//! evaluated, and evicted lines are dropped from the front.

use crate::buffer::LogSnapshot;
use crate::filter::{CompiledFilter, SearchMode};
use dockscope_types::{ArcLogLine, LogLine, TextView};

/// One matching line and the byte ranges to highlight in it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchMatch {
    pub index: u64,
    pub spans: Vec<(usize, usize)>,
}

/// Query, options and the current match list
#[derive(Clone, Debug, Default)]
pub struct SearchState {
    query: String,
    case_sensitive: bool,
    mode: SearchMode,
    matches: Vec<SearchMatch>,
    cursor: Option<usize>,
}

impl SearchState {
    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    pub fn mode(&self) -> SearchMode {
        self.mode
    }

    /// Matches in ascending index order
    pub fn matches(&self) -> &[SearchMatch] {
        &self.matches
    }

    pub fn match_count(&self) -> usize {
        self.matches.len()
    }

    /// Position of the current match in [`matches`](Self::matches)
    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn current(&self) -> Option<&SearchMatch> {
        self.cursor.and_then(|i| self.matches.get(i))
    }
}

/// Incremental search over one log buffer
#[derive(Debug, Default)]
pub struct SearchEngine {
    state: SearchState,
    compiled: Option<CompiledFilter>,
    view: TextView,
    /// Stream the match list was built from
    stream_id: u64,
    /// First index not yet evaluated
    synced_to: u64,
    /// Index and continuation count of the newest evaluated line
    tail: Option<(u64, usize)>,
    /// Lines evaluated since creation
    scanned: u64,
}

impl SearchEngine {
    pub fn new(view: TextView) -> Self {
        Self {
            view,
            ..Default::default()
        }
    }

    pub fn state(&self) -> &SearchState {
        &self.state
    }

    pub fn view(&self) -> TextView {
        self.view
    }

    /// Whether a non-empty query is set
    pub fn is_active(&self) -> bool {
        self.compiled.is_some()
    }

    /// Total line evaluations performed, full rescans included
    pub fn scanned(&self) -> u64 {
        self.scanned
    }

    /// Replace the query; an empty query clears the search
    pub fn set_query(
        &mut self,
        snapshot: &LogSnapshot,
        query: &str,
        case_sensitive: bool,
    ) -> Result<(), regex::Error> {
        self.compiled = CompiledFilter::new(query, self.state.mode, case_sensitive)?;
        self.state.query = query.to_string();
        self.state.case_sensitive = case_sensitive;
        self.rescan(snapshot);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.compiled = None;
        self.state.query.clear();
        self.state.matches.clear();
        self.state.cursor = None;
    }

    /// Switch between highlighting and filtering
    ///
    /// The query is recompiled for the new mode's syntax and the buffer is
    /// rescanned from the retained lines; nothing is re-read from the source.
    pub fn set_mode(&mut self, snapshot: &LogSnapshot, mode: SearchMode) -> Result<(), regex::Error> {
        if mode == self.state.mode {
            return Ok(());
        }
        self.state.mode = mode;
        let query = std::mem::take(&mut self.state.query);
        self.set_query(snapshot, &query, self.state.case_sensitive)
    }

    pub fn set_case_sensitive(
        &mut self,
        snapshot: &LogSnapshot,
        case_sensitive: bool,
    ) -> Result<(), regex::Error> {
        if case_sensitive == self.state.case_sensitive {
            return Ok(());
        }
        let query = std::mem::take(&mut self.state.query);
        self.set_query(snapshot, &query, case_sensitive)
    }

    pub fn toggle_case_sensitive(&mut self, snapshot: &LogSnapshot) -> Result<(), regex::Error> {
        self.set_case_sensitive(snapshot, !self.state.case_sensitive)
    }

    /// Match against raw or normalized text
    pub fn set_view(&mut self, snapshot: &LogSnapshot, view: TextView) {
        if view != self.view {
            self.view = view;
            self.rescan(snapshot);
        }
    }

    /// Step to the next match, wrapping after the last one
    pub fn next(&mut self) -> Option<&SearchMatch> {
        let len = self.state.matches.len();
        if len == 0 {
            return None;
        }
        self.state.cursor = Some(self.state.cursor.map_or(0, |c| (c + 1) % len));
        self.state.current()
    }

    /// Step to the previous match, wrapping before the first one
    pub fn prev(&mut self) -> Option<&SearchMatch> {
        let len = self.state.matches.len();
        if len == 0 {
            return None;
        }
        self.state.cursor = Some(self.state.cursor.map_or(len - 1, |c| (c + len - 1) % len));
        self.state.current()
    }

    /// Move the cursor to the first match at or after `index`, wrapping to
    /// the first match when none follows
    pub fn focus_nearest(&mut self, index: u64) -> Option<&SearchMatch> {
        if self.state.matches.is_empty() {
            return None;
        }
        let pos = self.state.matches.partition_point(|m| m.index < index);
        self.state.cursor = Some(if pos < self.state.matches.len() { pos } else { 0 });
        self.state.current()
    }

    /// Highlight spans for one line, if it matches
    pub fn spans(&self, index: u64) -> Option<&[(usize, usize)]> {
        self.find(index).map(|pos| self.state.matches[pos].spans.as_slice())
    }

    /// Indices of the lines a view should show
    pub fn visible_indices(&self, snapshot: &LogSnapshot) -> Vec<u64> {
        if self.filtering() {
            self.state.matches.iter().map(|m| m.index).collect()
        } else {
            snapshot.lines().iter().map(|l| l.index).collect()
        }
    }

    /// Lines a view should show: the matching subset while filtering,
    /// otherwise everything
    pub fn visible_lines(&self, snapshot: &LogSnapshot) -> Vec<ArcLogLine> {
        if self.filtering() {
            self.state
                .matches
                .iter()
                .filter_map(|m| snapshot.get(m.index).cloned())
                .collect()
        } else {
            snapshot.lines().to_vec()
        }
    }

    /// Header indicator for an active filter
    pub fn filter_summary(&self) -> Option<String> {
        self.compiled
            .as_ref()
            .filter(|c| c.mode() == SearchMode::Filter)
            .map(CompiledFilter::summary)
    }

    /// Bring the match list up to date with a newer snapshot
    ///
    /// Returns the number of matches added.
    pub fn sync(&mut self, snapshot: &LogSnapshot) -> usize {
        // A snapshot from a different (reopened) stream starts over
        if snapshot.stream_id() != self.stream_id || snapshot.next_index() < self.synced_to {
            self.rescan(snapshot);
            return self.state.matches.len();
        }

        let Some(compiled) = self.compiled.take() else {
            self.mark_synced(snapshot);
            return 0;
        };

        let evicted = self
            .state
            .matches
            .partition_point(|m| m.index < snapshot.first_index());
        if evicted > 0 {
            self.state.matches.drain(..evicted);
            self.state.cursor = match self.state.cursor {
                Some(c) if c >= evicted => Some(c - evicted),
                Some(_) if !self.state.matches.is_empty() => Some(0),
                _ => None,
            };
        }

        let before = self.state.matches.len();

        if let Some((index, continuations)) = self.tail {
            if let Some(line) = snapshot.get(index) {
                if line.continuations != continuations {
                    self.reevaluate(&compiled, line);
                }
            }
        }

        for line in snapshot.since(self.synced_to) {
            self.scanned += 1;
            if let Some(m) = evaluate(&compiled, line, self.view) {
                self.state.matches.push(m);
            }
        }

        if self.state.cursor.is_none() && !self.state.matches.is_empty() {
            self.state.cursor = Some(0);
        }

        self.compiled = Some(compiled);
        self.mark_synced(snapshot);
        self.state.matches.len().saturating_sub(before)
    }

    /// Evaluate every retained line from scratch
    fn rescan(&mut self, snapshot: &LogSnapshot) {
        let current = self.state.current().map(|m| m.index);
        self.state.matches.clear();
        self.state.cursor = None;

        if let Some(compiled) = &self.compiled {
            self.state.matches = snapshot
                .lines()
                .iter()
                .filter_map(|line| evaluate(compiled, line, self.view))
                .collect();
            self.scanned += snapshot.len() as u64;
        }
        self.mark_synced(snapshot);

        match current {
            Some(index) => {
                self.focus_nearest(index);
            }
            None if !self.state.matches.is_empty() => self.state.cursor = Some(0),
            None => {}
        }
    }

    /// The newest line grew; replace or drop its match
    fn reevaluate(&mut self, compiled: &CompiledFilter, line: &LogLine) {
        self.scanned += 1;
        let existing = self.find(line.index);
        match (existing, evaluate(compiled, line, self.view)) {
            (Some(pos), Some(m)) => self.state.matches[pos] = m,
            (Some(pos), None) => {
                self.state.matches.remove(pos);
                self.state.cursor = match self.state.cursor {
                    _ if self.state.matches.is_empty() => None,
                    Some(c) if c >= self.state.matches.len() => Some(self.state.matches.len() - 1),
                    other => other,
                };
            }
            (None, Some(m)) => self.state.matches.push(m),
            (None, None) => {}
        }
    }

    fn mark_synced(&mut self, snapshot: &LogSnapshot) {
        self.stream_id = snapshot.stream_id();
        self.synced_to = snapshot.next_index();
        self.tail = snapshot.lines().last().map(|l| (l.index, l.continuations));
    }

    fn find(&self, index: u64) -> Option<usize> {
        self.state
            .matches
            .binary_search_by_key(&index, |m| m.index)
            .ok()
    }

    fn filtering(&self) -> bool {
        self.state.mode == SearchMode::Filter && self.compiled.is_some()
    }
}

fn evaluate(compiled: &CompiledFilter, line: &LogLine, view: TextView) -> Option<SearchMatch> {
    compiled.evaluate(line.text(view)).map(|spans| SearchMatch {
        index: line.index,
        spans,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::buffer::{LogBuffer, LogBufferReader};
    use crate::normalize::{ContinuationRule, Normalizer};

    fn buffer(capacity: usize) -> (LogBuffer, LogBufferReader) {
        LogBuffer::new(
            capacity,
            Arc::new(Normalizer::default()),
            ContinuationRule::default(),
        )
    }

    fn push_all(buf: &mut LogBuffer, lines: &[&str]) {
        for line in lines {
            buf.push_live(line, None);
        }
        buf.publish();
    }

    fn indices(engine: &SearchEngine) -> Vec<u64> {
        engine.state().matches().iter().map(|m| m.index).collect()
    }

    #[test]
    fn test_set_query_finds_matches() {
        let (mut buf, reader) = buffer(100);
        push_all(&mut buf, &["start", "Error one", "ok", "error two"]);

        let mut engine = SearchEngine::new(TextView::Normalized);
        engine.set_query(&reader.snapshot(), "error", false).unwrap();
        assert_eq!(indices(&engine), vec![1, 3]);
        assert_eq!(engine.state().cursor(), Some(0));
        assert_eq!(engine.spans(1), Some(&[(0, 5)][..]));
        assert_eq!(engine.spans(0), None);
    }

    #[test]
    fn test_next_prev_wrap() {
        let (mut buf, reader) = buffer(100);
        push_all(&mut buf, &["a x", "b", "c x", "d x"]);
        let mut engine = SearchEngine::new(TextView::Normalized);
        engine.set_query(&reader.snapshot(), "x", true).unwrap();

        assert_eq!(engine.next().map(|m| m.index), Some(2));
        assert_eq!(engine.next().map(|m| m.index), Some(3));
        assert_eq!(engine.next().map(|m| m.index), Some(0));
        assert_eq!(engine.prev().map(|m| m.index), Some(3));
    }

    #[test]
    fn test_no_matches_navigation() {
        let (mut buf, reader) = buffer(100);
        push_all(&mut buf, &["a", "b"]);
        let mut engine = SearchEngine::new(TextView::Normalized);
        engine.set_query(&reader.snapshot(), "zzz", false).unwrap();
        assert!(engine.next().is_none());
        assert!(engine.prev().is_none());
        assert_eq!(engine.state().cursor(), None);
    }

    #[test]
    fn test_empty_query_clears() {
        let (mut buf, reader) = buffer(100);
        push_all(&mut buf, &["x"]);
        let mut engine = SearchEngine::new(TextView::Normalized);
        engine.set_query(&reader.snapshot(), "x", false).unwrap();
        engine.set_query(&reader.snapshot(), "", false).unwrap();
        assert!(!engine.is_active());
        assert_eq!(engine.state().match_count(), 0);
    }

    #[test]
    fn test_sync_only_evaluates_new_lines() {
        let (mut buf, reader) = buffer(100);
        push_all(&mut buf, &["hit", "miss", "hit"]);
        let mut engine = SearchEngine::new(TextView::Normalized);
        engine.set_query(&reader.snapshot(), "hit", false).unwrap();
        assert_eq!(engine.scanned(), 3);

        push_all(&mut buf, &["hit again", "miss"]);
        assert_eq!(engine.sync(&reader.snapshot()), 1);
        assert_eq!(engine.scanned(), 5);
        assert_eq!(indices(&engine), vec![0, 2, 3]);

        // Nothing new, nothing evaluated
        assert_eq!(engine.sync(&reader.snapshot()), 0);
        assert_eq!(engine.scanned(), 5);
    }

    #[test]
    fn test_sync_drops_evicted_matches() {
        let (mut buf, reader) = buffer(3);
        push_all(&mut buf, &["x1", "x2", "y"]);
        let mut engine = SearchEngine::new(TextView::Normalized);
        engine.set_query(&reader.snapshot(), "x", false).unwrap();
        engine.next();
        assert_eq!(engine.state().current().map(|m| m.index), Some(1));

        push_all(&mut buf, &["x4"]);
        engine.sync(&reader.snapshot());
        assert_eq!(indices(&engine), vec![1, 3]);
        assert_eq!(engine.state().current().map(|m| m.index), Some(1));
    }

    #[test]
    fn test_sync_reevaluates_grown_tail() {
        let (mut buf, reader) = buffer(100);
        push_all(&mut buf, &["[ERROR] failed"]);
        let mut engine = SearchEngine::new(TextView::Raw);
        engine.set_query(&reader.snapshot(), "Timeout", true).unwrap();
        assert_eq!(engine.state().match_count(), 0);

        push_all(&mut buf, &["Caused by: Timeout"]);
        assert_eq!(engine.sync(&reader.snapshot()), 1);
        assert_eq!(indices(&engine), vec![0]);
        assert_eq!(engine.spans(0), Some(&[(26, 33)][..]));
    }

    #[test]
    fn test_filter_mode_visible_subset() {
        let (mut buf, reader) = buffer(100);
        push_all(&mut buf, &["error a", "debug error", "warn b", "info"]);
        let snapshot = reader.snapshot();

        let mut engine = SearchEngine::new(TextView::Normalized);
        engine.set_mode(&snapshot, SearchMode::Filter).unwrap();
        engine.set_query(&snapshot, "error warn -debug", false).unwrap();
        assert_eq!(engine.visible_indices(&snapshot), vec![0, 2]);
        assert_eq!(engine.visible_lines(&snapshot)[1].raw, "warn b");
        assert_eq!(engine.filter_summary().as_deref(), Some("+error,warn -debug"));

        // Leaving filter mode restores the full view
        engine.set_mode(&snapshot, SearchMode::Search).unwrap();
        assert_eq!(engine.visible_indices(&snapshot), vec![0, 1, 2, 3]);
        assert_eq!(engine.filter_summary(), None);
    }

    #[test]
    fn test_toggle_case_rescans() {
        let (mut buf, reader) = buffer(100);
        push_all(&mut buf, &["Error", "error"]);
        let snapshot = reader.snapshot();
        let mut engine = SearchEngine::new(TextView::Normalized);
        engine.set_query(&snapshot, "error", false).unwrap();
        assert_eq!(engine.state().match_count(), 2);

        engine.toggle_case_sensitive(&snapshot).unwrap();
        assert!(engine.state().case_sensitive());
        assert_eq!(indices(&engine), vec![1]);
    }

    #[test]
    fn test_raw_and_normalized_views_differ() {
        let (mut buf, reader) = buffer(100);
        push_all(&mut buf, &[r#"{"level":"warn","msg":"slow"}"#]);
        let snapshot = reader.snapshot();

        let mut engine = SearchEngine::new(TextView::Normalized);
        engine.set_query(&snapshot, "\"level\"", false).unwrap();
        assert_eq!(engine.state().match_count(), 0);

        engine.set_view(&snapshot, TextView::Raw);
        assert_eq!(engine.state().match_count(), 1);
    }

    #[test]
    fn test_focus_nearest() {
        let (mut buf, reader) = buffer(100);
        push_all(&mut buf, &["x", "a", "x", "b", "x"]);
        let mut engine = SearchEngine::new(TextView::Normalized);
        engine.set_query(&reader.snapshot(), "x", false).unwrap();
        assert_eq!(engine.focus_nearest(1).map(|m| m.index), Some(2));
        assert_eq!(engine.focus_nearest(5).map(|m| m.index), Some(0));
    }

    #[test]
    fn test_reopened_stream_rescans() {
        let (mut buf, reader) = buffer(100);
        push_all(&mut buf, &["x", "x", "x"]);
        let mut engine = SearchEngine::new(TextView::Normalized);
        engine.set_query(&reader.snapshot(), "x", false).unwrap();

        let (mut fresh, fresh_reader) = buffer(100);
        push_all(&mut fresh, &["x"]);
        engine.sync(&fresh_reader.snapshot());
        assert_eq!(indices(&engine), vec![0]);
    }

    #[test]
    fn test_reopened_stream_with_more_lines_rescans() {
        let (mut buf, reader) = buffer(100);
        push_all(&mut buf, &["x", "x"]);
        let mut engine = SearchEngine::new(TextView::Normalized);
        engine.set_query(&reader.snapshot(), "x", false).unwrap();
        assert_eq!(indices(&engine), vec![0, 1]);

        // The new stream has already passed the old one's length
        let (mut fresh, fresh_reader) = buffer(100);
        push_all(&mut fresh, &["nope", "nope", "x", "x"]);
        engine.sync(&fresh_reader.snapshot());
        assert_eq!(indices(&engine), vec![2, 3]);
        assert_eq!(engine.spans(0), None);
    }

    #[test]
    fn test_filter_mode_sync_appends_in_order() {
        let (mut buf, reader) = buffer(100);
        push_all(&mut buf, &["error a", "info"]);
        let mut engine = SearchEngine::new(TextView::Normalized);
        engine.set_mode(&reader.snapshot(), SearchMode::Filter).unwrap();
        engine.set_query(&reader.snapshot(), "error", false).unwrap();
        assert_eq!(engine.visible_indices(&reader.snapshot()), vec![0]);
        let scanned = engine.scanned();

        push_all(&mut buf, &["error b"]);
        assert_eq!(engine.sync(&reader.snapshot()), 1);
        assert_eq!(engine.visible_indices(&reader.snapshot()), vec![0, 2]);
        assert_eq!(engine.scanned(), scanned + 1);

        push_all(&mut buf, &["debug"]);
        assert_eq!(engine.sync(&reader.snapshot()), 0);
        assert_eq!(engine.visible_indices(&reader.snapshot()), vec![0, 2]);
        assert_eq!(engine.scanned(), scanned + 2);
    }
}
