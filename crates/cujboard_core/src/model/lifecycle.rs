//! Review lifecycle vocabulary.
//!
//! # Responsibility
//! - Define review statuses and the allowed transition table.
//! - Define immutable history entries and per-record review state.
//!
//! # Invariants
//! - History is append-only and chronological; entries are never edited.
//! - `authors` keeps first-mutation order without duplicates.
//! - `approved`/`denied` are reachable only from a transition, never as an
//!   initial status.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Review status carried by CUJs and SLOs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    Draft,
    ReadyForReview,
    Approved,
    Denied,
    /// Administrative side-state: retired from use.
    Inactive,
    /// Administrative side-state: trial definition outside the review flow.
    Experimental,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::ReadyForReview => "ready-for-review",
            Self::Approved => "approved",
            Self::Denied => "denied",
            Self::Inactive => "inactive",
            Self::Experimental => "experimental",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "draft" => Some(Self::Draft),
            "ready-for-review" => Some(Self::ReadyForReview),
            "approved" => Some(Self::Approved),
            "denied" => Some(Self::Denied),
            "inactive" => Some(Self::Inactive),
            "experimental" => Some(Self::Experimental),
            _ => None,
        }
    }

    /// Whether a record may be created directly in this status.
    pub fn is_valid_initial(self) -> bool {
        matches!(self, Self::Draft | Self::Experimental | Self::Inactive)
    }

    /// Whether `self -> target` is an allowed transition.
    ///
    /// Self-transitions are never allowed.
    pub fn can_transition_to(self, target: Status) -> bool {
        use Status::*;
        match self {
            Draft => matches!(target, ReadyForReview | Inactive | Experimental),
            ReadyForReview => matches!(target, Draft | Approved | Denied),
            Approved => matches!(target, ReadyForReview | Inactive | Experimental),
            Denied => matches!(target, Draft | ReadyForReview | Inactive | Experimental),
            Inactive => matches!(target, Draft | Experimental),
            Experimental => matches!(target, Draft | ReadyForReview | Inactive),
        }
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of change recorded by one history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryAction {
    Created,
    Updated,
    StatusChanged,
}

/// Immutable, record-local account of one change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub action: HistoryAction,
    /// Unix epoch milliseconds.
    pub timestamp: i64,
    pub actor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_status: Option<Status>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_status: Option<Status>,
    /// Field names touched by an `updated` entry.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changed_fields: Vec<String>,
    /// Free-form detail; holds the reason for status transitions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl HistoryEntry {
    pub fn created(actor: &str, timestamp: i64, status: Status) -> Self {
        Self {
            action: HistoryAction::Created,
            timestamp,
            actor: actor.to_string(),
            from_status: None,
            to_status: Some(status),
            changed_fields: Vec::new(),
            detail: None,
        }
    }

    pub fn updated(actor: &str, timestamp: i64, changed_fields: Vec<String>) -> Self {
        let detail = format!("changed: {}", changed_fields.join(", "));
        Self {
            action: HistoryAction::Updated,
            timestamp,
            actor: actor.to_string(),
            from_status: None,
            to_status: None,
            changed_fields,
            detail: Some(detail),
        }
    }

    pub fn status_changed(
        actor: &str,
        timestamp: i64,
        from: Status,
        to: Status,
        reason: Option<String>,
    ) -> Self {
        Self {
            action: HistoryAction::StatusChanged,
            timestamp,
            actor: actor.to_string(),
            from_status: Some(from),
            to_status: Some(to),
            changed_fields: Vec::new(),
            detail: reason,
        }
    }
}

/// Review state embedded in reviewable records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewState {
    pub status: Status,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

impl Default for ReviewState {
    fn default() -> Self {
        Self {
            status: Status::Draft,
            authors: Vec::new(),
            history: Vec::new(),
        }
    }
}

impl ReviewState {
    /// Adds `actor` on first mutation. Returns whether it was new.
    pub fn add_author(&mut self, actor: &str) -> bool {
        if self.authors.iter().any(|author| author == actor) {
            return false;
        }
        self.authors.push(actor.to_string());
        true
    }

    /// Appends one entry, clamping its timestamp so history never goes
    /// backwards when the wall clock does.
    pub fn append(&mut self, mut entry: HistoryEntry) {
        if let Some(last) = self.history.last() {
            entry.timestamp = entry.timestamp.max(last.timestamp);
        }
        self.history.push(entry);
    }

    /// Reason attached to the newest transition into `denied`.
    pub fn latest_denial_reason(&self) -> Option<&str> {
        self.history
            .iter()
            .rev()
            .find(|entry| {
                entry.action == HistoryAction::StatusChanged
                    && entry.to_status == Some(Status::Denied)
            })
            .and_then(|entry| entry.detail.as_deref())
    }
}

/// Creation/modification stamps shared by every tracked record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provenance {
    pub created_at: i64,
    pub modified_at: i64,
    pub modified_by: String,
}

impl Provenance {
    pub fn new(actor: &str, timestamp: i64) -> Self {
        Self {
            created_at: timestamp,
            modified_at: timestamp,
            modified_by: actor.to_string(),
        }
    }

    pub fn touch(&mut self, actor: &str, timestamp: i64) {
        self.modified_at = timestamp.max(self.modified_at);
        self.modified_by = actor.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::{HistoryEntry, ReviewState, Status};

    const ALL: [Status; 6] = [
        Status::Draft,
        Status::ReadyForReview,
        Status::Approved,
        Status::Denied,
        Status::Inactive,
        Status::Experimental,
    ];

    #[test]
    fn no_status_transitions_to_itself() {
        for status in ALL {
            assert!(!status.can_transition_to(status), "{status}");
        }
    }

    #[test]
    fn approval_requires_review() {
        for status in ALL {
            let allowed = status.can_transition_to(Status::Approved)
                || status.can_transition_to(Status::Denied);
            assert_eq!(allowed, status == Status::ReadyForReview, "{status}");
        }
    }

    #[test]
    fn only_non_review_states_are_valid_initial() {
        assert!(Status::Draft.is_valid_initial());
        assert!(Status::Experimental.is_valid_initial());
        assert!(!Status::Approved.is_valid_initial());
        assert!(!Status::Denied.is_valid_initial());
        assert!(!Status::ReadyForReview.is_valid_initial());
    }

    #[test]
    fn status_serializes_kebab_case() {
        let json = serde_json::to_string(&Status::ReadyForReview).unwrap();
        assert_eq!(json, "\"ready-for-review\"");
        for status in ALL {
            assert_eq!(Status::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn authors_are_deduplicated_in_first_seen_order() {
        let mut review = ReviewState::default();
        assert!(review.add_author("carol"));
        assert!(review.add_author("alice"));
        assert!(!review.add_author("carol"));
        assert_eq!(review.authors, vec!["carol", "alice"]);
    }

    #[test]
    fn history_timestamps_never_decrease() {
        let mut review = ReviewState::default();
        review.append(HistoryEntry::created("carol", 2_000, Status::Draft));
        review.append(HistoryEntry::updated("carol", 1_000, vec!["name".into()]));
        assert_eq!(review.history[1].timestamp, 2_000);
    }

    #[test]
    fn latest_denial_reason_uses_newest_denial() {
        let mut review = ReviewState::default();
        review.append(HistoryEntry::status_changed(
            "bob",
            1,
            Status::ReadyForReview,
            Status::Denied,
            Some("first".into()),
        ));
        review.append(HistoryEntry::status_changed(
            "bob",
            2,
            Status::ReadyForReview,
            Status::Denied,
            Some("second".into()),
        ));
        assert_eq!(review.latest_denial_reason(), Some("second"));
    }
}
