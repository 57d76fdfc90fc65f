use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use orchard_auth::{AppRole, ExternalId};
use orchard_core::ProfileId;

/// Application-level user record, one per external identity.
///
/// `app_role` is authoritative for every server-side permission decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: ProfileId,
    pub external_id: ExternalId,
    pub app_role: AppRole,
    pub created_at: DateTime<Utc>,
}

impl Profile {
    /// First-seen identity: starts out as a plain USER.
    pub fn provision(external_id: ExternalId, now: DateTime<Utc>) -> Self {
        Self {
            id: ProfileId::new(),
            external_id,
            app_role: AppRole::User,
            created_at: now,
        }
    }
}
