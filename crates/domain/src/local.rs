//! Local read-only projections of aggregates owned by other services.

use chrono::{DateTime, Utc};
use common::{ProductId, UserId};
use serde::{Deserialize, Serialize};

use crate::money::Money;

/// Cached copy of a user owned by the user service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalUser {
    pub user_id: UserId,
    pub login: String,
    /// Timestamp of the event the projection was built from, when known.
    pub source_updated_at: Option<DateTime<Utc>>,
}

/// Cached copy of a product owned by the product service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalProduct {
    pub product_id: ProductId,
    pub name: String,
    pub price: Money,
    pub source_updated_at: Option<DateTime<Utc>>,
}

impl LocalUser {
    /// Returns true if this projection may overwrite `existing`.
    pub fn supersedes(&self, existing: &LocalUser) -> bool {
        supersedes(self.source_updated_at, existing.source_updated_at)
    }
}

impl LocalProduct {
    /// Returns true if this projection may overwrite `existing`.
    pub fn supersedes(&self, existing: &LocalProduct) -> bool {
        supersedes(self.source_updated_at, existing.source_updated_at)
    }
}

// An update without a timestamp cannot be ordered and is always applied.
fn supersedes(incoming: Option<DateTime<Utc>>, stored: Option<DateTime<Utc>>) -> bool {
    match (incoming, stored) {
        (Some(incoming), Some(stored)) => incoming >= stored,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn user(at: Option<DateTime<Utc>>) -> LocalUser {
        LocalUser {
            user_id: UserId::new(),
            login: "alice".into(),
            source_updated_at: at,
        }
    }

    #[test]
    fn test_older_update_does_not_supersede() {
        let now = Utc::now();
        let stored = user(Some(now));
        let stale = user(Some(now - Duration::seconds(5)));
        assert!(!stale.supersedes(&stored));
    }

    #[test]
    fn test_newer_or_equal_update_supersedes() {
        let now = Utc::now();
        let stored = user(Some(now));
        assert!(user(Some(now)).supersedes(&stored));
        assert!(user(Some(now + Duration::seconds(1))).supersedes(&stored));
    }

    #[test]
    fn test_untimestamped_update_always_applies() {
        let stored = user(Some(Utc::now()));
        assert!(user(None).supersedes(&stored));
        assert!(user(Some(Utc::now())).supersedes(&user(None)));
    }
}
