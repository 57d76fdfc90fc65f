use orchard_auth::{AppRole, ExternalId};
use orchard_membership::Profile;

/// Caller context for a request, attached by the auth middleware.
///
/// `claimed_role` is what the token says. It is informational only: every
/// permission decision re-reads the profile role from storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerContext {
    external_id: ExternalId,
    claimed_role: AppRole,
    profile: Option<Profile>,
}

impl CallerContext {
    pub fn new(external_id: ExternalId, claimed_role: AppRole, profile: Option<Profile>) -> Self {
        Self {
            external_id,
            claimed_role,
            profile,
        }
    }

    pub fn external_id(&self) -> &ExternalId {
        &self.external_id
    }

    pub fn claimed_role(&self) -> AppRole {
        self.claimed_role
    }

    /// Profile resolved by the fail-open provisioner, if it succeeded.
    pub fn profile(&self) -> Option<&Profile> {
        self.profile.as_ref()
    }
}
