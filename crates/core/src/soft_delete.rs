//! Soft deletion by timestamp.

use chrono::{DateTime, Utc};

/// Rows that are marked deleted instead of being removed.
///
/// Products use this for "archived", purchases for "cancelled". The row stays
/// queryable either way.
pub trait SoftDelete {
    fn deleted_at(&self) -> Option<DateTime<Utc>>;

    fn is_deleted(&self) -> bool {
        self.deleted_at().is_some()
    }
}
