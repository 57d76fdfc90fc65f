use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use orchard_auth::{AppRole, ExternalId};

use super::{ClaimsError, ClaimsStore};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimRecord {
    pub app_role: Option<String>,
    pub refresh_count: u64,
}

/// In-memory claims store for tests/dev.
///
/// [`InMemoryClaimsStore::set_unavailable`] makes every call fail, standing in
/// for an unreachable identity provider.
#[derive(Debug, Default)]
pub struct InMemoryClaimsStore {
    records: RwLock<HashMap<ExternalId, ClaimRecord>>,
    unavailable: AtomicBool,
}

impl InMemoryClaimsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Seed a raw claim value, bypassing validation.
    pub fn seed(&self, identity: &ExternalId, raw_role: Option<&str>) {
        if let Ok(mut records) = self.records.write() {
            records.entry(identity.clone()).or_default().app_role = raw_role.map(str::to_string);
        }
    }

    pub fn record(&self, identity: &ExternalId) -> Option<ClaimRecord> {
        self.records.read().ok()?.get(identity).cloned()
    }

    fn check_available(&self) -> Result<(), ClaimsError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ClaimsError::Unavailable("identity provider unreachable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ClaimsStore for InMemoryClaimsStore {
    async fn current_role(&self, identity: &ExternalId) -> Result<Option<String>, ClaimsError> {
        self.check_available()?;
        let records = self
            .records
            .read()
            .map_err(|_| ClaimsError::Unavailable("lock poisoned".to_string()))?;
        Ok(records.get(identity).and_then(|r| r.app_role.clone()))
    }

    async fn write_role(&self, identity: &ExternalId, role: AppRole) -> Result<(), ClaimsError> {
        self.check_available()?;
        let mut records = self
            .records
            .write()
            .map_err(|_| ClaimsError::Unavailable("lock poisoned".to_string()))?;
        records.entry(identity.clone()).or_default().app_role = Some(role.as_str().to_string());
        Ok(())
    }

    async fn force_refresh(&self, identity: &ExternalId) -> Result<(), ClaimsError> {
        self.check_available()?;
        let mut records = self
            .records
            .write()
            .map_err(|_| ClaimsError::Unavailable("lock poisoned".to_string()))?;
        records.entry(identity.clone()).or_default().refresh_count += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let store = InMemoryClaimsStore::new();
        let id = ExternalId::new("idp|x").unwrap();
        store.write_role(&id, AppRole::Member).await.unwrap();

        store.set_unavailable(true);
        assert!(store.current_role(&id).await.is_err());
        assert!(store.force_refresh(&id).await.is_err());

        store.set_unavailable(false);
        assert_eq!(store.current_role(&id).await.unwrap().as_deref(), Some("MEMBER"));
    }
}
