use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::AppRole;

/// Closed set of permissions.
///
/// Wire names use the `resource:action[:own]` format. Permissions ending in
/// `:own` additionally require the caller to own the resource.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    #[serde(rename = "products:create")]
    ProductsCreate,
    #[serde(rename = "products:delete")]
    ProductsDelete,
    #[serde(rename = "products:delete:own")]
    ProductsDeleteOwn,
    #[serde(rename = "access:admin")]
    AccessAdmin,
    #[serde(rename = "access:member")]
    AccessMember,
    #[serde(rename = "memberships:manage")]
    MembershipsManage,
    #[serde(rename = "memberships:cancel:own")]
    MembershipsCancelOwn,
    #[serde(rename = "purchases:cancel:own")]
    PurchasesCancelOwn,
    #[serde(rename = "purchases:cancel:any")]
    PurchasesCancelAny,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown permission '{0}'")]
pub struct UnknownPermission(pub String);

impl Permission {
    pub const ALL: [Permission; 9] = [
        Permission::ProductsCreate,
        Permission::ProductsDelete,
        Permission::ProductsDeleteOwn,
        Permission::AccessAdmin,
        Permission::AccessMember,
        Permission::MembershipsManage,
        Permission::MembershipsCancelOwn,
        Permission::PurchasesCancelOwn,
        Permission::PurchasesCancelAny,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::ProductsCreate => "products:create",
            Permission::ProductsDelete => "products:delete",
            Permission::ProductsDeleteOwn => "products:delete:own",
            Permission::AccessAdmin => "access:admin",
            Permission::AccessMember => "access:member",
            Permission::MembershipsManage => "memberships:manage",
            Permission::MembershipsCancelOwn => "memberships:cancel:own",
            Permission::PurchasesCancelOwn => "purchases:cancel:own",
            Permission::PurchasesCancelAny => "purchases:cancel:any",
        }
    }

    pub fn requires_ownership(&self) -> bool {
        self.as_str().ends_with(":own")
    }

    /// Roles granted this permission.
    ///
    /// Explicit per permission: capabilities are not monotonic in the role
    /// order, so there is no numeric hierarchy here.
    pub fn allowed_roles(&self) -> &'static [AppRole] {
        use AppRole::*;
        match self {
            Permission::ProductsCreate => &[Staff, Admin],
            Permission::ProductsDelete => &[Admin],
            Permission::ProductsDeleteOwn => &[Staff, Admin],
            Permission::AccessAdmin => &[Staff, Admin],
            Permission::AccessMember => &[Member, Staff, Admin],
            Permission::MembershipsManage => &[Admin],
            Permission::MembershipsCancelOwn => &[Member, Staff, Admin],
            Permission::PurchasesCancelOwn => &[User, Member, Staff, Admin],
            Permission::PurchasesCancelAny => &[Admin],
        }
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for Permission {
    type Err = UnknownPermission;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Permission::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| UnknownPermission(s.to_string()))
    }
}
