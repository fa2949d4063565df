//! Persistence adapters for the outbox ledger and the employee store.

pub mod employees;
pub mod ledger;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use employees::MemoryEmployeeStore;
pub use ledger::MemoryOutboxLedger;
#[cfg(feature = "postgres")]
pub use postgres::PostgresOutboxLedger;
