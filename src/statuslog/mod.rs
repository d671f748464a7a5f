//! Status-timeline reconstruction from unordered append-only transition logs.
//!
//! Tenants never rewrite a log entry, but entries arrive out of order (clock
//! skew, replays) and their messages are free text. Reconstruction sorts the
//! log, parses what it can, and answers two questions per entity: what is its
//! status as of now, and which of its transitions landed inside a window.

use serde::{Deserialize, Serialize};

use crate::domain::status::{StatusId, StatusTable};
use crate::domain::window::ReportWindow;

/// Delimiter between the from and to halves of a transition message.
pub const TRANSITION_ARROW: char = '→';

/// One raw log line as stored by a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: i64,
    pub message: String,
}

impl LogEntry {
    pub fn new(timestamp: i64, message: &str) -> Self {
        Self {
            timestamp,
            message: message.to_string(),
        }
    }
}

/// How to treat a transition whose `from` side contradicts the state the
/// reconstructor has already computed.
///
/// The platform's logs are trusted at face value, so `Lenient` is the
/// production default. `Enforce` drops contradicting entries into
/// [`StatusTimeline::rejected`] for audits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StrictMode {
    #[default]
    Lenient,
    Enforce,
}

/// One sorted, parsed log entry. `resulting` is the canonical status the
/// entry transitions into, or `None` when the message does not resolve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub timestamp: i64,
    pub message: String,
    pub resulting: Option<StatusId>,
}

/// The full reconstructed timeline for one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusTimeline {
    /// All accepted entries, sorted by timestamp, ties in input order.
    pub entries: Vec<TimelineEntry>,
    /// Resulting status of the last sorted entry, unparsable included: a
    /// noise tail really does leave the current status undetermined.
    pub baseline: Option<StatusId>,
    /// Entries dropped under [`StrictMode::Enforce`].
    pub rejected: Vec<LogEntry>,
}

impl StatusTimeline {
    /// Rebuilds the timeline from an unordered log.
    ///
    /// The sort is stable: entries sharing a timestamp keep their input
    /// order, so the result is exactly as deterministic as the log itself.
    pub fn reconstruct(entries: &[LogEntry], table: &StatusTable, mode: StrictMode) -> Self {
        let mut sorted: Vec<LogEntry> = entries.to_vec();
        sorted.sort_by_key(|entry| entry.timestamp);

        let mut accepted = Vec::with_capacity(sorted.len());
        let mut rejected = Vec::new();
        let mut last_known: Option<StatusId> = None;

        for entry in sorted {
            let (from, resulting) = match parse_transition(&entry.message) {
                Some((from, to)) => (table.resolve_display(from), table.resolve_display(to)),
                None => (None, None),
            };

            if mode == StrictMode::Enforce {
                if let (Some(state), Some(from)) = (&last_known, &from) {
                    if state != from {
                        rejected.push(entry);
                        continue;
                    }
                }
            }

            last_known = resulting.clone();
            accepted.push(TimelineEntry {
                timestamp: entry.timestamp,
                message: entry.message,
                resulting,
            });
        }

        let baseline = accepted
            .last()
            .and_then(|entry| entry.resulting.clone());

        Self {
            entries: accepted,
            baseline,
            rejected,
        }
    }

    /// Trims the timeline to a window and decides whether the entity belongs
    /// in that window's results at all.
    ///
    /// `None` means the entity had no relevant activity: no log at all, or
    /// nothing surviving the window trims while its baseline status is not
    /// in the table's active set. Entities whose last known status is active
    /// are kept even with an empty in-window list, so a long-scheduled event
    /// never vanishes from reports just because its log went quiet.
    pub fn window_activity(
        &self,
        window: &ReportWindow,
        table: &StatusTable,
    ) -> Option<WindowedTimeline> {
        if self.entries.is_empty() {
            return None;
        }

        let baseline_active = self
            .baseline
            .as_ref()
            .map(|id| table.is_active(id))
            .unwrap_or(false);

        let events: Vec<TimelineEntry> = self
            .entries
            .iter()
            .filter(|entry| entry.timestamp <= window.end_ts())
            .filter(|entry| entry.timestamp >= window.start_ts())
            .cloned()
            .collect();

        if events.is_empty() && !baseline_active {
            return None;
        }

        Some(WindowedTimeline {
            baseline: self.baseline.clone(),
            events,
        })
    }
}

/// A timeline trimmed to one reporting window.
///
/// `baseline` is still the entity-wide latest status, computed before any
/// trimming; the window only narrows `events`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowedTimeline {
    pub baseline: Option<StatusId>,
    pub events: Vec<TimelineEntry>,
}

impl WindowedTimeline {
    /// Status-filter test: the baseline matches, or some in-window entry
    /// resolves to the target. Unparsable entries count as activity but can
    /// never satisfy a filter.
    pub fn matches_target(&self, target: &StatusId) -> bool {
        if self.baseline.as_ref() == Some(target) {
            return true;
        }
        self.events
            .iter()
            .any(|entry| entry.resulting.as_ref() == Some(target))
    }
}

/// Splits a message into its from/to halves. `None` when the arrow is
/// absent; such entries are noise with a timestamp.
fn parse_transition(message: &str) -> Option<(&str, &str)> {
    let (from, to) = message.split_once(TRANSITION_ARROW)?;
    Some((from.trim(), to.trim()))
}
