//! `PostgreSQL` dialect for the sqlstore datastore
//!
//! Builds TLS client-certificate connection strings, opens `sqlx` pools,
//! detects the server version and classifies constraint violations. The wire
//! protocol, pooling and SQL execution all belong to `sqlx`.

pub mod connection_string;
pub mod constraint;
pub mod dialect;
pub mod dsn;
pub mod error;
pub mod pool_manager;
pub mod version;

pub use connection_string::{assert_certificates, configure_connection};
pub use constraint::{SqlState, is_constraint_violation};
pub use dialect::{Dialect, OpenedConnection, PostgresDialect};
pub use dsn::{ConnectSettings, parse_connection_string};
pub use error::{CertificateKind, ConnectionRole, StoreError, StoreErrorExt, StoreResult};
pub use pool_manager::{ConnectionManager, ConnectionStats, PoolStats};
pub use sqlstore_config::DatabaseConfig;
pub use version::ServerVersion;
