//! Structured error handling for the `PostgreSQL` dialect
//!
//! Three families of failure: configuration (connection string and client
//! certificates), connection (pool open), and query (anything sent to the
//! server once connected).

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::constraint::{self, SqlState};
use sqlstore_config::ConfigError;

/// Result type alias for datastore operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Which of the two configured connections an operation belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRole {
    /// Primary connection for writes and consistent reads
    ReadWrite,
    /// Optional replica connection for reads that tolerate lag
    ReadOnly,
}

impl ConnectionRole {
    pub const fn from_read_only(read_only: bool) -> Self {
        if read_only {
            Self::ReadOnly
        } else {
            Self::ReadWrite
        }
    }
}

impl fmt::Display for ConnectionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadWrite => write!(f, "read-write"),
            Self::ReadOnly => write!(f, "read-only"),
        }
    }
}

/// The three files a TLS client-certificate connection needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateKind {
    ClientCertificate,
    ClientKey,
    RootCa,
}

impl CertificateKind {
    /// Wording used when the path is not configured
    pub const fn missing_label(self) -> &'static str {
        match self {
            Self::ClientCertificate => "client certificate",
            Self::ClientKey => "client key",
            Self::RootCa => "root ca path",
        }
    }
}

impl fmt::Display for CertificateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientCertificate => write!(f, "client certificate"),
            Self::ClientKey => write!(f, "client key"),
            Self::RootCa => write!(f, "root ca"),
        }
    }
}

/// Datastore error with enough context to act on
#[derive(Debug, Error)]
pub enum StoreError {
    /// A certificate path is empty
    #[error("missing postgres {}", .kind.missing_label())]
    MissingCertificate { kind: CertificateKind },

    /// A certificate path is set but the file cannot be read
    #[error("cannot load postgres {kind} from '{}': {source}", .path.display())]
    CertificateUnreadable {
        kind: CertificateKind,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Read-only connection requested without a read-only connection string
    #[error("read-only connection requested but no read-only connection string is configured")]
    MissingReadOnlyConnectionString,

    /// Connection string could not be turned into connect options
    #[error("invalid connection string: {message}")]
    InvalidConnectionString { message: String },

    /// Configuration failed validation
    #[error("invalid database configuration: {0}")]
    Config(#[from] ConfigError),

    /// Opening the pool failed
    #[error("Database connection failed for {role} connection: {message}")]
    ConnectionFailed {
        role: ConnectionRole,
        message: String,
        #[source]
        source: sqlx::Error,
    },

    /// Write rejected by a uniqueness, foreign-key, check or not-null constraint
    #[error(
        "Database constraint violation ({code}) in operation '{operation}': {message} (constraint={constraint:?}, table={table:?})"
    )]
    ConstraintViolation {
        operation: String,
        code: SqlState,
        constraint: Option<String>,
        table: Option<String>,
        message: String,
        #[source]
        source: sqlx::Error,
    },

    /// Any other query failure
    #[error("Query failed for operation '{operation}': {message}")]
    QueryFailed {
        operation: String,
        message: String,
        #[source]
        source: sqlx::Error,
    },

    /// `SHOW server_version` returned something unparsable
    #[error("Unrecognized server version: '{version}'")]
    UnrecognizedVersion { version: String },
}

impl StoreError {
    /// Create a query error from `sqlx::Error`, singling out constraint violations
    pub fn query_failed(operation: impl Into<String>, source: sqlx::Error) -> Self {
        let operation = operation.into();
        let message = source.to_string();

        if let Some(code) = constraint::sql_state(&source)
            && code.is_constraint_violation()
        {
            let (constraint, table) = source
                .as_database_error()
                .map(|db_err| {
                    (
                        db_err.constraint().map(String::from),
                        db_err.table().map(String::from),
                    )
                })
                .unwrap_or_default();

            return Self::ConstraintViolation {
                operation,
                code,
                constraint,
                table,
                message,
                source,
            };
        }

        Self::QueryFailed {
            operation,
            message,
            source,
        }
    }

    /// Create a connection failed error
    pub fn connection_failed(role: ConnectionRole, source: sqlx::Error) -> Self {
        Self::ConnectionFailed {
            role,
            message: source.to_string(),
            source,
        }
    }

    /// True for errors raised before any connection attempt
    pub const fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::MissingCertificate { .. }
                | Self::CertificateUnreadable { .. }
                | Self::MissingReadOnlyConnectionString
                | Self::InvalidConnectionString { .. }
                | Self::Config(_)
        )
    }

    /// True when the server rejected a write on a constraint (SQLSTATE class 23)
    pub fn is_constraint_violation(&self) -> bool {
        constraint::is_constraint_violation(self)
    }
}

/// Extension trait for converting sqlx errors with context
#[allow(clippy::result_large_err)]
pub trait StoreErrorExt<T> {
    /// Convert to `StoreError` tagged with the operation name
    ///
    /// # Errors
    /// Returns `StoreError::ConstraintViolation` or `StoreError::QueryFailed`
    fn map_store_err(self, operation: &str) -> StoreResult<T>;
}

impl<T> StoreErrorExt<T> for std::result::Result<T, sqlx::Error> {
    fn map_store_err(self, operation: &str) -> StoreResult<T> {
        self.map_err(|e| StoreError::query_failed(operation, e))
    }
}
