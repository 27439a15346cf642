//! Output formatting and truncation.
//!
//! Agent output grows at the end, so when it does not fit a platform message
//! the tail is kept. The status line always survives; if nothing else fits,
//! it is all that is sent.

use chrono::{DateTime, TimeDelta, Utc};
use std::path::{Path, PathBuf};

/// Prefix of a body whose head was dropped.
pub const TRUNCATION_MARKER: &str = "[...output truncated...]\n";

/// Suffix appended when a single message is cut to the platform limit.
pub const TRUNCATION_SUFFIX: &str = "\n\n[...message truncated]";

const FENCE_OPEN: &str = "```\n";
const FENCE_CLOSE: &str = "\n```\n";

/// Idle-time color tier of a running session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleTier {
    /// Output changed within 5 seconds.
    Fresh,
    /// Within 10 seconds.
    Quiet,
    /// Within 20 seconds.
    Idle,
    /// Longer than 20 seconds.
    Stale,
}

impl IdleTier {
    /// Bucket an idle duration.
    #[must_use]
    pub fn from_idle(idle: TimeDelta) -> Self {
        match idle.num_milliseconds() {
            ..=5_000 => Self::Fresh,
            5_001..=10_000 => Self::Quiet,
            10_001..=20_000 => Self::Idle,
            _ => Self::Stale,
        }
    }

    /// Visual marker.
    #[must_use]
    pub const fn marker(&self) -> &'static str {
        match self {
            Self::Fresh => "🟢",
            Self::Quiet => "🟡",
            Self::Idle => "🟠",
            Self::Stale => "🔴",
        }
    }
}

/// State of the command producing the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStatus {
    /// Still producing output.
    Running {
        /// When the command started.
        started_at: DateTime<Utc>,
        /// When the output last changed.
        last_changed_at: DateTime<Utc>,
        /// Reference time for the idle tier.
        now: DateTime<Utc>,
    },
    /// Finished.
    Completed {
        /// When the command started.
        started_at: DateTime<Utc>,
        /// When it finished.
        finished_at: DateTime<Utc>,
        /// Exit code.
        exit_code: i32,
    },
}

impl OutputStatus {
    /// Running status evaluated now.
    #[must_use]
    pub fn running(started_at: DateTime<Utc>, last_changed_at: DateTime<Utc>) -> Self {
        Self::Running {
            started_at,
            last_changed_at,
            now: Utc::now(),
        }
    }

    /// Whether the command has finished.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    /// Status line for output of `size_bytes` bytes.
    #[must_use]
    pub fn status_line(&self, size_bytes: usize, truncated: bool) -> String {
        let size = human_size(size_bytes);
        let suffix = if truncated { " · truncated" } else { "" };

        match *self {
            Self::Running {
                started_at,
                last_changed_at,
                now,
            } => {
                let tier = IdleTier::from_idle(now - last_changed_at);
                format!(
                    "{} started {} · last change {} · {size}{suffix}",
                    tier.marker(),
                    started_at.format("%H:%M:%S"),
                    last_changed_at.format("%H:%M:%S"),
                )
            }
            Self::Completed {
                started_at,
                finished_at,
                exit_code,
            } => {
                let marker = if exit_code == 0 { "✅" } else { "❌" };
                format!(
                    "{marker} finished in {} · exit {exit_code} · {size}{suffix}",
                    format_duration(finished_at - started_at),
                )
            }
        }
    }
}

/// Output ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormattedOutput {
    /// Message text.
    pub text: String,
    /// Whether the head of the output was dropped.
    pub truncated: bool,
    /// Transcript to offer for download.
    pub download: Option<PathBuf>,
}

/// Fit `raw` output and its status line into `max_len` characters.
#[must_use]
pub fn format_output(
    raw: &str,
    status: &OutputStatus,
    max_len: usize,
    transcript: Option<&Path>,
) -> FormattedOutput {
    let fence_len = FENCE_OPEN.chars().count() + FENCE_CLOSE.chars().count();
    let raw_len = raw.chars().count();

    let status_full = status.status_line(raw.len(), false);
    let needed = fence_len
        .saturating_add(raw_len)
        .saturating_add(status_full.chars().count());
    if needed <= max_len {
        return FormattedOutput {
            text: format!("{FENCE_OPEN}{raw}{FENCE_CLOSE}{status_full}"),
            truncated: false,
            download: None,
        };
    }

    let status_cut = status.status_line(raw.len(), true);
    let overhead = fence_len + TRUNCATION_MARKER.chars().count() + status_cut.chars().count();
    let download = transcript.map(Path::to_path_buf);

    let budget = max_len.saturating_sub(overhead);
    if budget == 0 {
        return FormattedOutput {
            text: status_cut.chars().take(max_len).collect(),
            truncated: true,
            download,
        };
    }

    FormattedOutput {
        text: format!(
            "{FENCE_OPEN}{TRUNCATION_MARKER}{}{FENCE_CLOSE}{status_cut}",
            tail_chars(raw, budget)
        ),
        truncated: true,
        download,
    }
}

/// Cut `text` to `limit` characters, keeping the head and appending
/// [`TRUNCATION_SUFFIX`].
#[must_use]
pub fn truncate_head(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }

    let suffix_len = TRUNCATION_SUFFIX.chars().count();
    if limit <= suffix_len {
        return text.chars().take(limit).collect();
    }

    let mut out: String = text.chars().take(limit - suffix_len).collect();
    out.push_str(TRUNCATION_SUFFIX);
    out
}

/// Last `n` characters of `text`.
fn tail_chars(text: &str, n: usize) -> &str {
    let total = text.chars().count();
    if n >= total {
        return text;
    }
    let start = text
        .char_indices()
        .nth(total - n)
        .map_or(text.len(), |(i, _)| i);
    &text[start..]
}

/// Human-readable byte size.
#[must_use]
pub fn human_size(bytes: usize) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;

    #[allow(clippy::cast_precision_loss)]
    let b = bytes as f64;
    if b < KB {
        format!("{bytes} B")
    } else if b < MB {
        format!("{:.1} KB", b / KB)
    } else {
        format!("{:.1} MB", b / MB)
    }
}

/// Compact duration ("45s", "3m 12s", "1h 02m").
#[must_use]
pub fn format_duration(duration: TimeDelta) -> String {
    let secs = duration.num_seconds().max(0);
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);

    if h > 0 {
        format!("{h}h {m:02}m")
    } else if m > 0 {
        format!("{m}m {s:02}s")
    } else {
        format!("{s}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn running(idle_secs: i64) -> OutputStatus {
        OutputStatus::Running {
            started_at: at(0),
            last_changed_at: at(100),
            now: at(100 + idle_secs),
        }
    }

    #[test]
    fn test_idle_tier_boundaries() {
        assert_eq!(IdleTier::from_idle(TimeDelta::seconds(0)), IdleTier::Fresh);
        assert_eq!(IdleTier::from_idle(TimeDelta::seconds(5)), IdleTier::Fresh);
        assert_eq!(IdleTier::from_idle(TimeDelta::milliseconds(5_001)), IdleTier::Quiet);
        assert_eq!(IdleTier::from_idle(TimeDelta::seconds(10)), IdleTier::Quiet);
        assert_eq!(IdleTier::from_idle(TimeDelta::seconds(11)), IdleTier::Idle);
        assert_eq!(IdleTier::from_idle(TimeDelta::seconds(20)), IdleTier::Idle);
        assert_eq!(IdleTier::from_idle(TimeDelta::seconds(21)), IdleTier::Stale);
    }

    #[test]
    fn test_status_lines() {
        assert!(running(3).status_line(10, false).starts_with("🟢"));
        assert!(running(30).status_line(10, false).starts_with("🔴"));

        let ok = OutputStatus::Completed {
            started_at: at(0),
            finished_at: at(75),
            exit_code: 0,
        };
        assert_eq!(ok.status_line(10, false), "✅ finished in 1m 15s · exit 0 · 10 B");

        let failed = OutputStatus::Completed {
            started_at: at(0),
            finished_at: at(5),
            exit_code: 2,
        };
        assert!(failed.status_line(10, true).starts_with("❌"));
        assert!(failed.status_line(10, true).ends_with("· truncated"));
    }

    #[test]
    fn test_short_output_is_untouched() {
        let out = format_output("hello", &running(0), 4096, None);
        assert!(!out.truncated);
        assert!(out.text.starts_with("```\nhello\n```\n"));
        assert!(out.download.is_none());
    }

    #[test]
    fn test_truncation_keeps_tail() {
        let body: String = (0..5000).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
        let raw = format!("FIRST LINE\n{body}\nlast line");
        let transcript = Path::new("/tmp/transcript.txt");
        let out = format_output(&raw, &running(0), 2000, Some(transcript));

        assert!(out.truncated);
        assert!(out.text.chars().count() <= 2000);
        assert!(out.text.contains(TRUNCATION_MARKER));
        assert!(out.text.contains(&raw[raw.len() - 500..]));
        assert!(out.text.contains("last line"));
        assert!(!out.text.contains("FIRST LINE"));
        assert_eq!(out.download.as_deref(), Some(transcript));
    }

    #[test]
    fn test_truncation_respects_multibyte_limit() {
        let raw = "é".repeat(5000);
        let out = format_output(&raw, &running(0), 4096, None);
        assert!(out.truncated);
        assert!(out.text.chars().count() <= 4096);
    }

    #[test]
    fn test_zero_budget_emits_status_only() {
        let status = running(0);
        let out = format_output(&"x".repeat(100), &status, 20, None);
        assert!(out.truncated);
        assert!(out.text.chars().count() <= 20);
        assert!(!out.text.contains("```"));
        assert!(out.text.starts_with("🟢"));
    }

    #[test]
    fn test_truncate_head() {
        assert_eq!(truncate_head("short", 100), "short");

        let long = "y".repeat(3000);
        let cut = truncate_head(&long, 2000);
        assert_eq!(cut.chars().count(), 2000);
        assert!(cut.starts_with("yyyy"));
        assert!(cut.ends_with(TRUNCATION_SUFFIX));

        assert_eq!(truncate_head(&long, 5), "yyyyy");
    }

    #[test]
    fn test_human_size() {
        assert_eq!(human_size(512), "512 B");
        assert_eq!(human_size(1536), "1.5 KB");
        assert_eq!(human_size(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(TimeDelta::seconds(45)), "45s");
        assert_eq!(format_duration(TimeDelta::seconds(192)), "3m 12s");
        assert_eq!(format_duration(TimeDelta::seconds(3720)), "1h 02m");
        assert_eq!(format_duration(TimeDelta::seconds(-3)), "0s");
    }
}
