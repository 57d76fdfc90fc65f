use serde::{Deserialize, Serialize};

use orchard_core::DomainError;

const MAX_EXTERNAL_ID_LEN: usize = 255;

/// Subject identifier issued by the external identity provider.
///
/// Opaque to this system: it only links a token to a profile.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ExternalId(String);

impl ExternalId {
    pub fn new(subject: impl Into<String>) -> Result<Self, DomainError> {
        let subject = subject.into();
        let trimmed = subject.trim();
        if trimmed.is_empty() {
            return Err(DomainError::invalid_id("external id cannot be empty"));
        }
        if trimmed.len() > MAX_EXTERNAL_ID_LEN {
            return Err(DomainError::invalid_id("external id is too long"));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ExternalId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ExternalId> for String {
    fn from(value: ExternalId) -> Self {
        value.0
    }
}

impl core::fmt::Display for ExternalId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
