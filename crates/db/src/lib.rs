pub mod connection;
pub mod fixtures;
pub mod migrations;
pub mod repositories;

pub use connection::{connect, connect_with_settings, DbPool};
pub use fixtures::{DemoSeedDataset, SeedResult, SeededQuote, VerificationResult};
pub use repositories::{
    InMemoryProcurementStore, RecordingNotificationDispatcher, RepositoryError,
    SqlNotificationOutbox, SqlProcurementStore, SqlRateTableLoader,
};
