//! Plain-text rendering for the terminal

use std::fmt::Write;
use std::time::Duration;

use dockscope_logs::{LogLine, LogSnapshot, SearchEngine, StreamStatus, TextView};
use dockscope_telemetry::{CollectionEntry, CollectionResult, ContainerSnapshot};

const HIGHLIGHT_ON: &str = "\x1b[7m";
const HIGHLIGHT_OFF: &str = "\x1b[0m";

/// Format bytes as human-readable size
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes}B")
    } else {
        format!("{value:.1}{}", UNITS[unit])
    }
}

pub fn format_uptime(uptime: Duration) -> String {
    let secs = uptime.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m{}s", secs / 60, secs % 60)
    } else if secs < 86400 {
        format!("{}h{}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d{}h", secs / 86400, (secs % 86400) / 3600)
    }
}

fn percent(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.1}%"))
}

fn rate(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{}/s", format_bytes(v as u64)))
}

fn memory(snapshot: &ContainerSnapshot) -> String {
    match (snapshot.mem_usage, snapshot.mem_limit) {
        (Some(usage), Some(limit)) => format!("{} / {}", format_bytes(usage), format_bytes(limit)),
        (Some(usage), None) => format_bytes(usage),
        _ => "-".to_string(),
    }
}

/// One row per container, sorted by name
pub fn stats_table(result: &CollectionResult) -> String {
    let mut rows: Vec<[String; 11]> = result
        .iter()
        .map(|(id, entry)| {
            let note = match entry {
                CollectionEntry::Fresh { .. } => String::new(),
                CollectionEntry::Stale { cause, .. } => format!("stale: {cause}"),
                CollectionEntry::Failed { error } => format!("failed: {error}"),
            };
            match entry.snapshot() {
                Some(s) => [
                    s.name.clone(),
                    id.short().to_string(),
                    s.image.clone(),
                    s.status.as_str().to_string(),
                    percent(s.cpu_percent),
                    format!("{} {}", percent(s.mem_percent), memory(s)),
                    rate(s.net_rx_rate),
                    rate(s.net_tx_rate),
                    s.uptime.map_or_else(|| "-".to_string(), format_uptime),
                    s.created_at.map_or_else(
                        || "-".to_string(),
                        |at| at.format("%Y-%m-%d %H:%M").to_string(),
                    ),
                    note,
                ],
                None => {
                    let mut row: [String; 11] = Default::default();
                    row[0] = "?".to_string();
                    row[1] = id.short().to_string();
                    for cell in &mut row[2..10] {
                        *cell = "-".to_string();
                    }
                    row[10] = note;
                    row
                }
            }
        })
        .collect();
    rows.sort_by(|a, b| a[0].cmp(&b[0]).then_with(|| a[1].cmp(&b[1])));

    let header = [
        "NAME", "ID", "IMAGE", "STATUS", "CPU", "MEMORY", "NET RX", "NET TX", "UPTIME", "CREATED",
        "",
    ]
    .map(String::from);

    let mut widths = header.clone().map(|h| h.chars().count());
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    for row in std::iter::once(&header).chain(&rows) {
        let mut line = String::new();
        for (cell, width) in row.iter().zip(widths) {
            let _ = write!(line, "{cell:<width$}  ");
        }
        out.push_str(line.trim_end());
        out.push('\n');
    }
    let _ = writeln!(
        out,
        "{} containers ({} fresh, {} stale, {} failed)",
        result.len(),
        result.fresh_count(),
        result.stale_count(),
        result.failed_count()
    );
    out
}

/// Insert highlight escapes around byte spans of `text`
pub fn highlight(text: &str, spans: &[(usize, usize)]) -> String {
    let mut out = String::with_capacity(text.len() + spans.len() * 8);
    let mut pos = 0;
    for &(start, end) in spans {
        let (Some(before), Some(matched)) = (text.get(pos..start), text.get(start..end)) else {
            continue;
        };
        out.push_str(before);
        out.push_str(HIGHLIGHT_ON);
        out.push_str(matched);
        out.push_str(HIGHLIGHT_OFF);
        pos = end;
    }
    out.push_str(text.get(pos..).unwrap_or_default());
    out
}

/// Text of one line as printed, with search hits highlighted when `color`
pub fn render_line(line: &LogLine, engine: &SearchEngine, color: bool) -> String {
    let text = line.text(engine.view());
    match engine.spans(line.index) {
        Some(spans) if color => highlight(text, spans),
        _ => text.to_string(),
    }
}

/// Status line printed to stderr once a stream finishes
pub fn stream_summary(snapshot: &LogSnapshot, engine: &SearchEngine) -> String {
    let status = match snapshot.status() {
        StreamStatus::Streaming => "streaming".to_string(),
        StreamStatus::Complete => "complete".to_string(),
        StreamStatus::Ended => "ended".to_string(),
        StreamStatus::Cancelled => "cancelled".to_string(),
        StreamStatus::Failed(e) => format!("failed: {e}"),
    };
    let mut out = format!("-- {} lines, {status}", snapshot.len());
    if snapshot.dropped() > 0 {
        let _ = write!(out, ", {} dropped", snapshot.dropped());
    }
    if engine.is_active() {
        let _ = write!(out, ", {} matches", engine.state().match_count());
    }
    if let Some(filter) = engine.filter_summary() {
        let _ = write!(out, " [filter: {filter}]");
    }
    if engine.view() == TextView::Raw {
        out.push_str(" [raw]");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use dockscope_telemetry::{CollectionError, ContainerId, ContainerStatus};
    use std::sync::Arc;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512B");
        assert_eq!(format_bytes(1536), "1.5KiB");
        assert_eq!(format_bytes(256 * 1024 * 1024), "256.0MiB");
    }

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(Duration::from_secs(42)), "42s");
        assert_eq!(format_uptime(Duration::from_secs(125)), "2m5s");
        assert_eq!(format_uptime(Duration::from_secs(7260)), "2h1m");
        assert_eq!(format_uptime(Duration::from_secs(90000)), "1d1h");
    }

    #[test]
    fn test_highlight_spans() {
        assert_eq!(
            highlight("error in db", &[(0, 5), (9, 11)]),
            "\x1b[7merror\x1b[0m in \x1b[7mdb\x1b[0m"
        );
        assert_eq!(highlight("plain", &[]), "plain");
        // Out-of-range spans are ignored
        assert_eq!(highlight("abc", &[(1, 10)]), "abc");
    }

    #[test]
    fn test_stats_table_rows() {
        let mut snapshot = ContainerSnapshot::new(ContainerId::from("aaa"), Utc::now());
        snapshot.name = "web".to_string();
        snapshot.status = ContainerStatus::Running;
        snapshot.cpu_percent = Some(12.5);
        snapshot.image = "nginx:1.27".to_string();
        snapshot.created_at = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).single();

        let mut result = CollectionResult::new();
        result.insert(
            ContainerId::from("aaa"),
            CollectionEntry::Stale {
                snapshot: Arc::new(snapshot),
                cause: CollectionError::Timeout,
            },
        );
        result.insert(
            ContainerId::from("bbb"),
            CollectionEntry::Failed {
                error: CollectionError::NotFound,
            },
        );

        let table = stats_table(&result);
        let lines: Vec<&str> = table.lines().collect();
        assert!(lines[0].starts_with("NAME"));
        assert!(lines[0].contains("IMAGE"));
        assert!(lines[0].contains("CREATED"));
        assert!(lines[1].starts_with("?"));
        assert!(lines[1].contains("failed: container not found"));
        assert!(lines[2].starts_with("web"));
        assert!(lines[2].contains("12.5%"));
        assert!(lines[2].contains("nginx:1.27"));
        assert!(lines[2].contains("2024-01-02 03:04"));
        assert!(lines[2].contains("stale: timed out"));
        assert_eq!(lines[3], "2 containers (0 fresh, 1 stale, 1 failed)");
    }
}
