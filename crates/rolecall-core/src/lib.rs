//! rolecall-core - Core library for rolecall
//!
//! Provides usage metering, entitlement resolution, the renewal clock, the
//! transactional record store and the long-poll update bus.

pub mod bucketing;
pub mod config;
pub mod entitlement;
pub mod error;
pub mod ledger;
pub mod models;
pub mod renewal;
pub mod service;
pub mod store;
pub mod update_bus;

pub use config::{LongPollConfig, MeterConfig};
pub use entitlement::{materialize, EntitlementInput, EntitlementResolver};
pub use error::{CoreError, CoreResult};
pub use ledger::{SessionHistory, UsageLedger};
pub use renewal::{BillingPeriod, PeriodBounds};
pub use service::{HealthStatus, MeterService, RenewalInfo, SessionReceipt, UpdateResponse};
pub use store::{JsonFilePersistence, MemoryPersistence, Persistence, TransactionalStore};
pub use update_bus::{UpdateBus, UpdateEvent};
