use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use orchard_core::{DomainError, Money, ProductId, ProfileId, PurchaseId, SoftDelete};
use orchard_products::Product;

/// Upper bound on a single purchase line.
pub const MAX_QUANTITY: u32 = 99;

/// A profile buying a product at a point in time.
///
/// # Invariants
/// - `total` is `price × quantity` at purchase time and never follows later
///   price changes.
/// - Cancelling sets `deleted_at`; rows are never removed.
/// - `term_ends_at` is set only for MEMBERSHIP products.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Purchase {
    pub id: PurchaseId,
    pub profile_id: ProfileId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub total: Money,
    /// End of the membership term bought with this purchase.
    pub term_ends_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// Cancellation timestamp.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl SoftDelete for Purchase {
    fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }
}

impl Purchase {
    /// Build a purchase snapshotting `product`'s current price.
    ///
    /// Membership purchases are always a single unit and carry the term end.
    pub fn place(
        profile_id: ProfileId,
        product: &Product,
        quantity: u32,
        membership_term: Duration,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        if quantity == 0 || quantity > MAX_QUANTITY {
            return Err(DomainError::validation(format!(
                "quantity must be between 1 and {MAX_QUANTITY}"
            )));
        }
        if product.is_membership() && quantity != 1 {
            return Err(DomainError::validation("memberships are purchased one at a time"));
        }

        let total = product.price.times(quantity)?;
        let term_ends_at = product.is_membership().then(|| now + membership_term);

        Ok(Self {
            id: PurchaseId::new(),
            profile_id,
            product_id: product.id,
            quantity,
            total,
            term_ends_at,
            created_at: now,
            deleted_at: None,
        })
    }

    /// Not cancelled.
    pub fn is_active(&self) -> bool {
        !self.is_deleted()
    }

    /// Soft-cancel. A second cancellation is a conflict.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        if let Some(at) = self.deleted_at {
            return Err(DomainError::conflict(format!(
                "purchase {} was already cancelled at {}",
                self.id,
                at.to_rfc3339()
            )));
        }
        self.deleted_at = Some(now);
        Ok(())
    }

    /// Whether this purchase currently backs a membership term.
    ///
    /// Requires an active purchase of a non-archived MEMBERSHIP product whose
    /// term has not run out. `product` must be the purchased product.
    pub fn backs_membership(&self, product: &Product, now: DateTime<Utc>) -> bool {
        debug_assert_eq!(product.id, self.product_id);
        self.is_active()
            && product.is_membership()
            && !product.is_archived()
            && self.term_ends_at.is_some_and(|end| end > now)
    }
}
