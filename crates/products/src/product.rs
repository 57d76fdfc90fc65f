use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use orchard_auth::{AppRole, OwnerPair, Permission, check_permission, require};
use orchard_core::{DomainError, Money, ProductId, ProfileId, SoftDelete};

const MAX_NAME_LEN: usize = 200;

/// Catalog item kind.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProductType {
    /// Public inventory.
    Orange,
    /// Member-gated inventory.
    Apple,
    /// Purchasing it grants a membership term.
    Membership,
}

impl ProductType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductType::Orange => "ORANGE",
            ProductType::Apple => "APPLE",
            ProductType::Membership => "MEMBERSHIP",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ORANGE" => Some(ProductType::Orange),
            "APPLE" => Some(ProductType::Apple),
            "MEMBERSHIP" => Some(ProductType::Membership),
            _ => None,
        }
    }
}

impl core::fmt::Display for ProductType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input for catalog creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProduct {
    pub name: String,
    pub product_type: ProductType,
    pub price_cents: i64,
}

/// Catalog product.
///
/// # Invariants
/// - `deleted_at` set means archived: hidden from listings and purchase, kept
///   for the purchases that reference it.
/// - `created_by` never changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub product_type: ProductType,
    pub price: Money,
    pub created_by: ProfileId,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl SoftDelete for Product {
    fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }
}

impl Product {
    /// Validate and authorize a catalog addition.
    ///
    /// STAFF may create ORANGE and APPLE products; MEMBERSHIP products hand out
    /// roles and need `memberships:manage` on top of `products:create`.
    pub fn create(
        input: NewProduct,
        creator: ProfileId,
        creator_role: AppRole,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        require(Permission::ProductsCreate, creator_role, None)?;
        if input.product_type == ProductType::Membership {
            require(Permission::MembershipsManage, creator_role, None)?;
        }

        let name = input.name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(DomainError::validation("name is too long"));
        }
        let price = Money::from_cents(input.price_cents)?;

        Ok(Self {
            id: ProductId::new(),
            name: name.to_string(),
            product_type: input.product_type,
            price,
            created_by: creator,
            created_at: now,
            deleted_at: None,
        })
    }

    pub fn is_archived(&self) -> bool {
        self.is_deleted()
    }

    pub fn is_membership(&self) -> bool {
        self.product_type == ProductType::Membership
    }

    /// Whether a caller with `role` should see this product in listings.
    pub fn visible_to(&self, role: AppRole) -> bool {
        if self.is_archived() {
            return false;
        }
        match self.product_type {
            ProductType::Apple => check_permission(Permission::AccessMember, role, None).allowed,
            ProductType::Orange | ProductType::Membership => true,
        }
    }

    /// Archived products behave as absent; APPLE needs member access.
    pub fn ensure_purchasable(&self, role: AppRole) -> Result<(), DomainError> {
        if self.is_archived() {
            return Err(DomainError::not_found(format!("product {}", self.id)));
        }
        if self.product_type == ProductType::Apple {
            require(Permission::AccessMember, role, None)
                .map_err(|_| DomainError::forbidden("APPLE products are only available to members"))?;
        }
        Ok(())
    }

    /// Archive authorization: table first, then per-type carve-outs.
    ///
    /// - `products:delete` (ADMIN) archives anything.
    /// - `products:delete:own` covers the creator, but STAFF only keeps it for
    ///   ORANGE products: never APPLE, never MEMBERSHIP.
    pub fn authorize_archive(&self, caller: ProfileId, role: AppRole) -> Result<(), DomainError> {
        if check_permission(Permission::ProductsDelete, role, None).allowed {
            return Ok(());
        }

        let own = check_permission(
            Permission::ProductsDeleteOwn,
            role,
            Some(OwnerPair::new(caller, self.created_by)),
        );
        if !own.allowed {
            return Err(DomainError::forbidden(
                own.reason.unwrap_or_else(|| "not allowed to archive this product".to_string()),
            ));
        }

        if role == AppRole::Staff && self.product_type != ProductType::Orange {
            return Err(DomainError::forbidden(format!(
                "staff cannot archive {} products",
                self.product_type
            )));
        }

        Ok(())
    }

    /// Mark archived. Callers check purchases first.
    pub fn archive(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        if self.is_archived() {
            return Err(DomainError::not_found(format!("product {}", self.id)));
        }
        self.deleted_at = Some(now);
        Ok(())
    }
}
