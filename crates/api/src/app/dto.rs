use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use orchard_auth::AppRole;
use orchard_core::{ProductId, ProfileId, PurchaseId};
use orchard_infra::{ArchiveReport, ClaimsWarning, Committed};
use orchard_membership::{Membership, MembershipState};
use orchard_products::{Product, ProductType};
use orchard_purchasing::Purchase;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreateProductRequest {
    pub name: String,
    pub product_type: ProductType,
    pub price_cents: i64,
}

#[derive(Debug, Deserialize)]
pub struct PurchaseRequest {
    #[serde(default = "one")]
    pub quantity: u32,
}

fn one() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
pub struct PermissionCheckQuery {
    pub permission: String,
    pub resource_owner_id: Option<String>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct ProductResponse {
    pub id: ProductId,
    pub name: String,
    pub product_type: ProductType,
    pub price_cents: i64,
    pub created_by: ProfileId,
    pub created_at: DateTime<Utc>,
    pub archived_at: Option<DateTime<Utc>>,
}

impl From<Product> for ProductResponse {
    fn from(p: Product) -> Self {
        Self {
            id: p.id,
            name: p.name,
            product_type: p.product_type,
            price_cents: p.price.cents(),
            created_by: p.created_by,
            created_at: p.created_at,
            archived_at: p.deleted_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PurchaseResponse {
    pub id: PurchaseId,
    pub profile_id: ProfileId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub total_cents: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub term_ends_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl From<Purchase> for PurchaseResponse {
    fn from(p: Purchase) -> Self {
        Self {
            id: p.id,
            profile_id: p.profile_id,
            product_id: p.product_id,
            quantity: p.quantity,
            total_cents: p.total.cents(),
            term_ends_at: p.term_ends_at,
            created_at: p.created_at,
            cancelled_at: p.deleted_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ArchiveResponse {
    pub product: ProductResponse,
    pub cancelled_purchases: usize,
    pub downgraded_profiles: usize,
}

impl From<ArchiveReport> for ArchiveResponse {
    fn from(r: ArchiveReport) -> Self {
        Self {
            product: r.product.into(),
            cancelled_purchases: r.cancelled_purchases,
            downgraded_profiles: r.downgraded_profiles,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CancelledMembershipResponse {
    pub cancelled_purchases: Vec<PurchaseResponse>,
}

/// Body of any response that committed a possible role change.
#[derive(Debug, Serialize)]
pub struct CommittedResponse<T> {
    #[serde(flatten)]
    pub value: T,
    pub claims_warnings: Vec<ClaimsWarning>,
}

impl<T> CommittedResponse<T> {
    pub fn from_committed<U>(committed: Committed<U>) -> Self
    where
        U: Into<T>,
    {
        Self {
            value: committed.value.into(),
            claims_warnings: committed.claims_warnings,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub profile_id: ProfileId,
    pub external_id: String,
    pub app_role: AppRole,
    pub claimed_role: AppRole,
    pub claims_in_sync: bool,
    pub membership_state: MembershipState,
    pub membership: Option<Membership>,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
    pub app_role: AppRole,
    pub expires_at: DateTime<Utc>,
    pub changed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn purchase_request_defaults_to_one() {
        let req: PurchaseRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(req.quantity, 1);
        let req: PurchaseRequest = serde_json::from_str(r#"{"quantity": 3}"#).unwrap();
        assert_eq!(req.quantity, 3);
    }

    #[test]
    fn committed_response_flattens_the_value() {
        #[derive(Serialize)]
        struct Body {
            id: u32,
        }
        let body = serde_json::to_value(CommittedResponse {
            value: Body { id: 7 },
            claims_warnings: vec![],
        })
        .unwrap();
        assert_eq!(body["id"], 7);
        assert!(body["claims_warnings"].as_array().unwrap().is_empty());
    }
}
