//! Infrastructure layer: storage, application services, configuration.

pub mod config;
pub mod services;
pub mod store;

pub use config::{Config, ConfigError};
pub use services::{ServiceError, ServiceResult, Services};
pub use store::{InMemoryStore, PostgresStore, Store, StoreError};
