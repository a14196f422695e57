//! Reference and identifier generation.
//!
//! References are what support staff and the payout provider see: a short
//! type prefix, the UTC creation second and twelve random hex digits, e.g.
//! `EXT20261019101500A1B2C3D4E5F6`. Row identifiers are UUIDv7 so they sort by
//! creation time.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// What a reference identifies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    Transfer,
    Transaction,
    Refund,
    Load,
    Debit,
}

impl ReferenceKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Transfer => "EXT",
            Self::Transaction => "TXN",
            Self::Refund => "RFD",
            Self::Load => "LOD",
            Self::Debit => "DBT",
        }
    }
}

/// Generate a globally unique, human-traceable reference
#[must_use]
pub fn generate_reference(kind: ReferenceKind) -> String {
    reference_at(kind, Utc::now())
}

fn reference_at(kind: ReferenceKind, at: DateTime<Utc>) -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!(
        "{}{}{}",
        kind.prefix(),
        at.format("%Y%m%d%H%M%S"),
        random[..12].to_uppercase()
    )
}

/// New time-ordered row identifier
#[must_use]
pub fn new_id() -> String {
    Uuid::now_v7().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashSet;

    #[test]
    fn test_reference_layout() {
        let at = Utc.with_ymd_and_hms(2026, 10, 19, 10, 15, 0).unwrap();
        let reference = reference_at(ReferenceKind::Transfer, at);
        assert!(reference.starts_with("EXT20261019101500"));
        assert_eq!(reference.len(), 3 + 14 + 12);
        assert!(
            reference[17..]
                .chars()
                .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase())
        );
    }

    #[test]
    fn test_references_are_unique() {
        let refs: HashSet<String> = (0..10_000)
            .map(|_| generate_reference(ReferenceKind::Refund))
            .collect();
        assert_eq!(refs.len(), 10_000);
    }

    #[test]
    fn test_ids_sort_by_creation() {
        let a = new_id();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = new_id();
        assert!(a < b);
    }
}
