//! Infrastructure layer: storage, claims store adapters, and the services that
//! apply the membership rules atomically against them.

pub mod claims;
pub mod scheduler;
pub mod services;
pub mod store;


pub use claims::{ClaimsError, ClaimsStore, InMemoryClaimsStore, PostgresClaimsStore};
pub use scheduler::{SweepRunner, SweepRunnerHandle};
pub use services::{
    ArchiveReport, ClaimsSyncError, ClaimsSynchronizer, ClaimsWarning, Committed, ConsistencyEngine,
    EngineConfig, ExpirySweeper, MembershipStatus, ProfileProvisioner, Reconciled, ServiceError,
    SweepReport,
};
pub use store::{InMemoryStore, PostgresStore, RowLock, Store, StoreError, StoreTx};
