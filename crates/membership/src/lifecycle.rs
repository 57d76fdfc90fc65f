//! Membership lifecycle state machine.
//!
//! ```text
//!            grant                     cancel / expire
//!   NONE ───────────▶ ACTIVE ─────────────────────────▶ EXPIRED
//!                       ▲                                  │
//!                       └──────────────── grant ───────────┘
//! ```
//!
//! `app_role` is MEMBER iff the state is ACTIVE. STAFF and ADMIN are left
//! untouched by every transition.
//!
//! `cancel` and `expire` take `backing_until`: the latest term end among the
//! profile's *other* purchases that still back a membership. When one exists
//! the membership stays ACTIVE until that instant instead of ending, so the
//! role never drops while a valid membership purchase remains.

use chrono::{DateTime, Duration, Utc};

use orchard_auth::AppRole;
use orchard_core::{DomainError, MembershipId, ProfileId};

use crate::{Membership, MembershipState, Profile};

/// Result of a lifecycle step: the rows to persist and the role outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub profile_id: ProfileId,
    /// Membership row to upsert; `None` when there is nothing to write.
    pub membership: Option<Membership>,
    pub from: MembershipState,
    pub to: MembershipState,
    pub previous_role: AppRole,
    pub role: AppRole,
}

impl Transition {
    pub fn role_changed(&self) -> bool {
        self.previous_role != self.role
    }

    /// MEMBER lost its membership role.
    pub fn is_downgrade(&self) -> bool {
        self.previous_role == AppRole::Member && self.role == AppRole::User
    }
}

/// Start a new term: `NONE | EXPIRED → ACTIVE`.
///
/// Creates the row if absent; otherwise the end date is overwritten with
/// `now + term`. Terms do not stack. Granting over an ACTIVE term is refused
/// (a profile holds at most one running membership purchase).
pub fn grant(
    profile: &Profile,
    current: Option<&Membership>,
    term: Duration,
    now: DateTime<Utc>,
) -> Result<Transition, DomainError> {
    if term <= Duration::zero() {
        return Err(DomainError::validation("membership term must be positive"));
    }

    let from = MembershipState::of(current, now);
    if from == MembershipState::Active {
        let until = current
            .and_then(|m| m.end_date)
            .map(|d| d.to_rfc3339())
            .unwrap_or_else(|| "further notice".to_string());
        return Err(DomainError::conflict(format!("membership is already active until {until}")));
    }

    let membership = match current {
        Some(m) => Membership {
            start_date: now,
            end_date: Some(now + term),
            ..m.clone()
        },
        None => Membership {
            id: MembershipId::new(),
            profile_id: profile.id,
            start_date: now,
            end_date: Some(now + term),
        },
    };

    Ok(Transition {
        profile_id: profile.id,
        membership: Some(membership),
        from,
        to: MembershipState::Active,
        previous_role: profile.app_role,
        role: profile.app_role.with_membership(true),
    })
}

/// End the current term because its backing purchase was cancelled.
///
/// `ACTIVE → EXPIRED` with `end_date = now`, unless another purchase still
/// backs a membership. Applying it to an already expired membership never
/// moves the end date forward.
pub fn cancel(
    profile: &Profile,
    current: Option<&Membership>,
    backing_until: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Transition {
    settle(profile, current, backing_until, now)
}

/// Periodic expiry for one profile.
///
/// Returns `None` when there is nothing to do, which makes re-running a sweep
/// a no-op: the term is still running, or the role already agrees with a
/// lapsed term that nothing backs.
pub fn expire(
    profile: &Profile,
    current: Option<&Membership>,
    backing_until: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<Transition> {
    if MembershipState::of(current, now) == MembershipState::Active {
        return None;
    }

    let backed = backing_until.is_some_and(|until| until > now);
    if !backed && profile.app_role != AppRole::Member {
        return None;
    }

    Some(settle(profile, current, backing_until, now))
}

fn settle(
    profile: &Profile,
    current: Option<&Membership>,
    backing_until: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Transition {
    let from = MembershipState::of(current, now);

    let (membership, to) = match backing_until.filter(|until| *until > now) {
        Some(until) => {
            let membership = match current {
                Some(m) => Membership {
                    end_date: Some(until),
                    ..m.clone()
                },
                None => Membership {
                    id: MembershipId::new(),
                    profile_id: profile.id,
                    start_date: now,
                    end_date: Some(until),
                },
            };
            (Some(membership), MembershipState::Active)
        }
        None => match current {
            Some(m) => {
                let end = match m.end_date {
                    Some(end) if end <= now => end,
                    _ => now,
                };
                let membership = Membership {
                    end_date: Some(end),
                    ..m.clone()
                };
                (Some(membership), MembershipState::Expired)
            }
            None => (None, MembershipState::None),
        },
    };

    let active = to == MembershipState::Active;
    Transition {
        profile_id: profile.id,
        membership,
        from,
        to,
        previous_role: profile.app_role,
        role: profile.app_role.with_membership(active),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchard_auth::ExternalId;
    use proptest::prelude::*;

    fn profile(role: AppRole) -> Profile {
        Profile {
            app_role: role,
            ..Profile::provision(ExternalId::new("idp|p").unwrap(), Utc::now())
        }
    }

    fn apply(profile: &mut Profile, t: &Transition) -> Option<Membership> {
        profile.app_role = t.role;
        t.membership.clone()
    }

    #[test]
    fn grant_from_none_creates_term() {
        let now = Utc::now();
        let p = profile(AppRole::User);
        let t = grant(&p, None, Duration::days(365), now).unwrap();

        let m = t.membership.clone().unwrap();
        assert_eq!(m.profile_id, p.id);
        assert_eq!(m.end_date, Some(now + Duration::days(365)));
        assert_eq!((t.from, t.to), (MembershipState::None, MembershipState::Active));
        assert_eq!(t.role, AppRole::Member);
        assert!(t.role_changed());
    }

    #[test]
    fn grant_over_expired_overwrites_instead_of_stacking() {
        let now = Utc::now();
        let p = profile(AppRole::User);
        let old = Membership {
            id: MembershipId::new(),
            profile_id: p.id,
            start_date: now - Duration::days(400),
            end_date: Some(now - Duration::days(35)),
        };

        let t = grant(&p, Some(&old), Duration::days(30), now).unwrap();
        let m = t.membership.unwrap();
        assert_eq!(m.id, old.id);
        assert_eq!(m.start_date, now);
        assert_eq!(m.end_date, Some(now + Duration::days(30)));
        assert_eq!(t.from, MembershipState::Expired);
    }

    #[test]
    fn grant_over_active_is_a_conflict() {
        let now = Utc::now();
        let p = profile(AppRole::Member);
        let active = Membership {
            id: MembershipId::new(),
            profile_id: p.id,
            start_date: now,
            end_date: Some(now + Duration::days(1)),
        };
        assert!(matches!(grant(&p, Some(&active), Duration::days(30), now), Err(DomainError::Conflict(_))));
        assert!(matches!(grant(&p, None, Duration::zero(), now), Err(DomainError::Validation(_))));
    }

    #[test]
    fn grant_keeps_administrative_roles() {
        let now = Utc::now();
        for role in [AppRole::Staff, AppRole::Admin] {
            let t = grant(&profile(role), None, Duration::days(30), now).unwrap();
            assert_eq!(t.role, role);
            assert!(!t.role_changed());
        }
    }

    #[test]
    fn grant_then_cancel_round_trips_to_user() {
        let now = Utc::now();
        let mut p = profile(AppRole::User);

        let granted = grant(&p, None, Duration::days(365), now).unwrap();
        let m = apply(&mut p, &granted);
        assert_eq!(p.app_role, AppRole::Member);

        let cancelled = cancel(&p, m.as_ref(), None, now);
        let m = apply(&mut p, &cancelled).unwrap();

        assert_eq!(p.app_role, AppRole::User);
        assert_eq!(m.id, granted.membership.unwrap().id);
        assert!(m.end_date.unwrap() <= now);
        assert_eq!(cancelled.to, MembershipState::Expired);
        assert!(cancelled.is_downgrade());
    }

    #[test]
    fn cancel_with_other_backing_keeps_member() {
        let now = Utc::now();
        let mut p = profile(AppRole::User);
        let g = grant(&p, None, Duration::days(365), now).unwrap();
        let m = apply(&mut p, &g);

        let other_until = now + Duration::days(20);
        let t = cancel(&p, m.as_ref(), Some(other_until), now);

        assert_eq!(t.role, AppRole::Member);
        assert!(!t.role_changed());
        assert_eq!(t.to, MembershipState::Active);
        assert_eq!(t.membership.unwrap().end_date, Some(other_until));
    }

    #[test]
    fn cancel_never_extends_a_lapsed_term() {
        let now = Utc::now();
        let p = profile(AppRole::User);
        let lapsed = Membership {
            id: MembershipId::new(),
            profile_id: p.id,
            start_date: now - Duration::days(60),
            end_date: Some(now - Duration::days(30)),
        };
        let t = cancel(&p, Some(&lapsed), None, now);
        assert_eq!(t.membership.as_ref().unwrap().end_date, lapsed.end_date);
        assert!(!t.role_changed());
    }

    #[test]
    fn expire_is_noop_while_term_runs_and_after_downgrade() {
        let now = Utc::now();
        let mut p = profile(AppRole::User);
        let g = grant(&p, None, Duration::days(30), now).unwrap();
        let m = apply(&mut p, &g);

        assert!(expire(&p, m.as_ref(), None, now + Duration::days(29)).is_none());

        let later = now + Duration::days(31);
        let t = expire(&p, m.as_ref(), None, later).unwrap();
        assert!(t.is_downgrade());
        let m = apply(&mut p, &t);

        assert!(expire(&p, m.as_ref(), None, later).is_none());
    }

    #[test]
    fn expire_repairs_from_other_backing_purchase() {
        let now = Utc::now();
        let mut p = profile(AppRole::User);
        let g = grant(&p, None, Duration::days(30), now).unwrap();
        let m = apply(&mut p, &g);

        let later = now + Duration::days(31);
        let t = expire(&p, m.as_ref(), Some(later + Duration::days(10)), later).unwrap();
        assert_eq!(t.role, AppRole::Member);
        assert_eq!(t.to, MembershipState::Active);
    }

    #[test]
    fn expire_downgrades_member_without_any_row() {
        let now = Utc::now();
        let p = profile(AppRole::Member);
        let t = expire(&p, None, None, now).unwrap();
        assert!(t.is_downgrade());
        assert!(t.membership.is_none());
    }

    proptest! {
        /// After any transition, MEMBER (for non-administrative roles) holds
        /// exactly when the written membership is active.
        #[test]
        fn role_tracks_membership_state(
            start_as_member in any::<bool>(),
            has_row in any::<bool>(),
            row_offset_days in -400i64..400,
            backing_offset_days in proptest::option::of(-10i64..400),
            op in 0u8..3,
        ) {
            let now = Utc::now();
            let p = profile(if start_as_member { AppRole::Member } else { AppRole::User });
            let row = has_row.then(|| Membership {
                id: MembershipId::new(),
                profile_id: p.id,
                start_date: now - Duration::days(500),
                end_date: Some(now + Duration::days(row_offset_days)),
            });
            let backing = backing_offset_days.map(|d| now + Duration::days(d));

            let t = match op {
                0 => grant(&p, row.as_ref(), Duration::days(365), now).ok(),
                1 => Some(cancel(&p, row.as_ref(), backing, now)),
                _ => expire(&p, row.as_ref(), backing, now),
            };

            if let Some(t) = t {
                let written = t.membership.as_ref().or(row.as_ref());
                let active = MembershipState::of(written, now) == MembershipState::Active;
                prop_assert_eq!(t.role == AppRole::Member, active);
                prop_assert_eq!(t.to == MembershipState::Active, active);
            }
        }
    }
}
