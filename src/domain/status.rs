//! Canonical status identifiers and per-report status-name tables.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Canonical identifier for one status, kebab-case.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusId(String);

impl StatusId {
    pub fn new(id: &str) -> Self {
        Self(id.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StatusId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Maps canonical status ids to the display names found in log messages.
///
/// Resolution is exact-match on the display name; anything else is noise to
/// the reconstructor. The `active` set marks statuses whose holders stay in
/// window queries even with no recent log activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusTable {
    names: BTreeMap<StatusId, String>,
    active: BTreeSet<StatusId>,
}

impl StatusTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, id: &str, display: &str) -> Self {
        self.names.insert(StatusId::new(id), display.to_string());
        self
    }

    pub fn mark_active(mut self, id: &str) -> Self {
        self.active.insert(StatusId::new(id));
        self
    }

    /// Resolves a display name to its canonical id, exact match only.
    pub fn resolve_display(&self, display: &str) -> Option<StatusId> {
        self.names
            .iter()
            .find(|(_, name)| name.as_str() == display)
            .map(|(id, _)| id.clone())
    }

    pub fn display_name(&self, id: &StatusId) -> Option<&str> {
        self.names.get(id).map(String::as_str)
    }

    pub fn is_active(&self, id: &StatusId) -> bool {
        self.active.contains(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &StatusId> {
        self.names.keys()
    }
}

static EVENT_STATUSES: Lazy<StatusTable> = Lazy::new(|| {
    StatusTable::new()
        .with_status("applied", "Applied")
        .with_status("needs-vetting", "Needs Vetting")
        .with_status("approved", "Approved")
        .with_status("scheduled", "Scheduled")
        .with_status("completed", "Completed")
        .with_status("cancelled", "Cancelled")
        .with_status("declined", "Declined")
        .mark_active("approved")
        .mark_active("scheduled")
});

/// The platform's event lifecycle statuses.
pub fn event_statuses() -> &'static StatusTable {
    &EVENT_STATUSES
}
