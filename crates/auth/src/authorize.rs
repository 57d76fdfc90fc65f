//! Permission decision procedure.
//!
//! - No IO
//! - No panics
//! - No business logic beyond the table (per-resource carve-outs live with the
//!   resource that needs them)

use serde::Serialize;

use orchard_core::{DomainError, ProfileId};

use crate::{AppRole, Permission};

/// Ownership comparison for `:own` permissions.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct OwnerPair {
    /// The caller's profile.
    pub owner_id: ProfileId,
    /// The profile that owns the resource being acted on.
    pub resource_owner_id: ProfileId,
}

impl OwnerPair {
    pub fn new(owner_id: ProfileId, resource_owner_id: ProfileId) -> Self {
        Self {
            owner_id,
            resource_owner_id,
        }
    }

    pub fn matches(&self) -> bool {
        self.owner_id == self.resource_owner_id
    }
}

/// Outcome of a permission check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Decision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

/// Decide whether `role` may exercise `permission`.
///
/// `:own` permissions need both the role grant and a matching ownership pair;
/// everything else needs only the role grant.
pub fn check_permission(permission: Permission, role: AppRole, owner: Option<OwnerPair>) -> Decision {
    if !permission.allowed_roles().contains(&role) {
        return Decision::deny(format!("role {role} lacks permission '{permission}'"));
    }

    if permission.requires_ownership() {
        return match owner {
            Some(pair) if pair.matches() => Decision::allow(),
            Some(_) => Decision::deny(format!(
                "permission '{permission}' only applies to resources you own"
            )),
            None => Decision::deny(format!(
                "permission '{permission}' requires an ownership comparison"
            )),
        };
    }

    Decision::allow()
}

/// String-keyed variant used at the edges (query strings, policy files).
///
/// Unknown names are a programming error on the caller's side: fail closed.
pub fn check_permission_named(name: &str, role: AppRole, owner: Option<OwnerPair>) -> Decision {
    match name.parse::<Permission>() {
        Ok(permission) => check_permission(permission, role, owner),
        Err(e) => {
            tracing::warn!(permission = name, "permission check against unknown permission");
            Decision::deny(e.to_string())
        }
    }
}

/// `check_permission` as a `Result`, for `?` at command boundaries.
pub fn require(permission: Permission, role: AppRole, owner: Option<OwnerPair>) -> Result<(), DomainError> {
    let decision = check_permission(permission, role, owner);
    if decision.allowed {
        Ok(())
    } else {
        Err(DomainError::forbidden(
            decision.reason.unwrap_or_else(|| permission.to_string()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn role_strategy() -> impl Strategy<Value = AppRole> {
        prop::sample::select(AppRole::ALL.to_vec())
    }

    fn permission_strategy() -> impl Strategy<Value = Permission> {
        prop::sample::select(Permission::ALL.to_vec())
    }

    #[test]
    fn table_enumeration() {
        use AppRole::*;
        use Permission::*;

        let expect = |p: Permission, allowed: &[AppRole]| {
            for role in AppRole::ALL {
                let me = ProfileId::new();
                let owner = Some(OwnerPair::new(me, me));
                let d = check_permission(p, role, owner);
                assert_eq!(d.allowed, allowed.contains(&role), "{p} for {role}");
            }
        };

        expect(ProductsCreate, &[Staff, Admin]);
        expect(ProductsDelete, &[Admin]);
        expect(ProductsDeleteOwn, &[Staff, Admin]);
        expect(AccessAdmin, &[Staff, Admin]);
        expect(AccessMember, &[Member, Staff, Admin]);
        expect(MembershipsManage, &[Admin]);
        expect(MembershipsCancelOwn, &[Member, Staff, Admin]);
        expect(PurchasesCancelOwn, &[User, Member, Staff, Admin]);
        expect(PurchasesCancelAny, &[Admin]);
    }

    #[test]
    fn own_permissions_require_matching_owner() {
        let me = ProfileId::new();
        let other = ProfileId::new();

        let d = check_permission(Permission::PurchasesCancelOwn, AppRole::User, Some(OwnerPair::new(me, other)));
        assert!(!d.allowed);
        assert!(d.reason.unwrap().contains("own"));

        let d = check_permission(Permission::PurchasesCancelOwn, AppRole::User, None);
        assert!(!d.allowed);

        let d = check_permission(Permission::PurchasesCancelOwn, AppRole::User, Some(OwnerPair::new(me, me)));
        assert_eq!(d, Decision::allow());
    }

    #[test]
    fn non_own_permissions_ignore_owner_pair() {
        let d = check_permission(
            Permission::PurchasesCancelAny,
            AppRole::Admin,
            Some(OwnerPair::new(ProfileId::new(), ProfileId::new())),
        );
        assert!(d.allowed);
    }

    #[test]
    fn unknown_permission_names_fail_closed() {
        let d = check_permission_named("everything:*", AppRole::Admin, None);
        assert!(!d.allowed);
        assert!(d.reason.unwrap().contains("unknown permission"));

        let d = check_permission_named("access:member", AppRole::Member, None);
        assert!(d.allowed);
    }

    #[test]
    fn require_maps_denial_to_forbidden() {
        let err = require(Permission::ProductsDelete, AppRole::Staff, None).unwrap_err();
        assert!(matches!(err, DomainError::Forbidden(_)));
        assert!(require(Permission::ProductsDelete, AppRole::Admin, None).is_ok());
    }

    proptest! {
        #[test]
        fn decision_is_a_pure_function_of_inputs(
            p in permission_strategy(),
            role in role_strategy(),
            same_owner in any::<bool>(),
            with_pair in any::<bool>(),
        ) {
            let a = ProfileId::new();
            let b = if same_owner { a } else { ProfileId::new() };
            let pair = with_pair.then(|| OwnerPair::new(a, b));

            let first = check_permission(p, role, pair);
            let second = check_permission(p, role, pair);
            prop_assert_eq!(&first, &second);

            if first.allowed {
                prop_assert!(p.allowed_roles().contains(&role));
                prop_assert!(first.reason.is_none());
            } else {
                prop_assert!(first.reason.is_some());
            }
        }
    }
}
