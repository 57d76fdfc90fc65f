use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use orchard_core::{MembershipId, ProfileId};

/// Lifecycle state of a profile's membership.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MembershipState {
    /// Never had a membership row.
    None,
    /// End date in the future (or not yet set).
    Active,
    /// End date has passed.
    Expired,
}

impl MembershipState {
    pub fn of(membership: Option<&Membership>, now: DateTime<Utc>) -> Self {
        match membership {
            None => MembershipState::None,
            Some(m) if m.is_active_at(now) => MembershipState::Active,
            Some(_) => MembershipState::Expired,
        }
    }
}

impl core::fmt::Display for MembershipState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            MembershipState::None => "NONE",
            MembershipState::Active => "ACTIVE",
            MembershipState::Expired => "EXPIRED",
        })
    }
}

/// Membership term, at most one per profile.
///
/// Updated in place on renewal, cancellation and expiry; never removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub id: MembershipId,
    pub profile_id: ProfileId,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
}

impl Membership {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.end_date.is_none_or(|end| end > now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn membership(end_date: Option<DateTime<Utc>>) -> Membership {
        Membership {
            id: MembershipId::new(),
            profile_id: ProfileId::new(),
            start_date: Utc::now() - Duration::days(10),
            end_date,
        }
    }

    #[test]
    fn state_follows_end_date() {
        let now = Utc::now();
        assert_eq!(MembershipState::of(None, now), MembershipState::None);
        assert_eq!(MembershipState::of(Some(&membership(None)), now), MembershipState::Active);
        assert_eq!(
            MembershipState::of(Some(&membership(Some(now + Duration::seconds(1)))), now),
            MembershipState::Active
        );
        assert_eq!(MembershipState::of(Some(&membership(Some(now))), now), MembershipState::Expired);
    }
}
