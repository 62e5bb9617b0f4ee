//! Database dialect seam and the `PostgreSQL` implementation

use std::error::Error as StdError;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use sqlstore_common::redact_connection_string;
use sqlstore_config::DatabaseConfig;

use crate::connection_string::configure_connection;
use crate::constraint;
use crate::dsn::{ConnectSettings, parse_connection_string};
use crate::error::{ConnectionRole, StoreError, StoreErrorExt, StoreResult};
use crate::version::ServerVersion;

/// Query used to detect the server version
pub const SERVER_VERSION_QUERY: &str = "SHOW server_version";

/// An open pool together with what was learned while opening it
#[derive(Debug, Clone)]
pub struct OpenedConnection {
    /// Connection pool, owned by the caller
    pub pool: PgPool,
    /// Raw `server_version` text
    pub version: String,
    /// Whether the server supports common table expressions
    pub supports_cte: bool,
    /// Which configured connection string the pool was opened from
    pub role: ConnectionRole,
}

impl OpenedConnection {
    /// Parsed major/minor server version
    ///
    /// # Errors
    /// Returns `StoreError::UnrecognizedVersion` if the version text is not numeric
    pub fn server_version(&self) -> StoreResult<ServerVersion> {
        self.version.parse()
    }
}

/// Database-specific connection and error handling
#[async_trait]
pub trait Dialect: Send + Sync {
    /// Open the read-write (or read-only) connection and detect the server version
    async fn connect(&self, config: &DatabaseConfig, read_only: bool)
    -> StoreResult<OpenedConnection>;

    /// Whether `err` is a constraint violation in this dialect
    fn is_constraint_violation(&self, err: &(dyn StdError + 'static)) -> bool;
}

/// `PostgreSQL` dialect
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

#[async_trait]
impl Dialect for PostgresDialect {
    /// Open a pool using the configured TLS connection string
    ///
    /// Certificates are checked before any network activity, so a
    /// misconfigured client certificate never results in a connection attempt.
    #[tracing::instrument(skip(self, config), fields(role = %ConnectionRole::from_read_only(read_only)))]
    async fn connect(
        &self,
        config: &DatabaseConfig,
        read_only: bool,
    ) -> StoreResult<OpenedConnection> {
        let role = ConnectionRole::from_read_only(read_only);

        let connection_string = configure_connection(config, read_only)?;
        let settings = parse_connection_string(&connection_string)?;

        tracing::info!(
            connection = %redact_connection_string(&connection_string),
            "Opening PostgreSQL connection"
        );

        let pool = open_pool(config, settings).await.map_err(|e| {
            tracing::warn!(error = %e, "Failed to open PostgreSQL connection");
            StoreError::connection_failed(role, e)
        })?;

        let version = match query_version(&pool).await {
            Ok(version) => version,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to query PostgreSQL server version");
                pool.close().await;
                return Err(e);
            }
        };

        tracing::info!(%version, "Connected to PostgreSQL");

        // Every supported PostgreSQL version has CTEs
        Ok(OpenedConnection {
            pool,
            version,
            supports_cte: true,
            role,
        })
    }

    fn is_constraint_violation(&self, err: &(dyn StdError + 'static)) -> bool {
        constraint::is_constraint_violation(err)
    }
}

/// Pool options from the configured knobs; a `connect_timeout` in the
/// connection string takes precedence over the configured timeout
pub fn pool_options(config: &DatabaseConfig, connect_timeout: Option<Duration>) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(connect_timeout.unwrap_or_else(|| config.timeout()))
        .idle_timeout(config.idle_timeout())
        .max_lifetime(config.max_lifetime())
}

async fn open_pool(config: &DatabaseConfig, settings: ConnectSettings) -> Result<PgPool, sqlx::Error> {
    pool_options(config, settings.connect_timeout)
        .connect_with(settings.options)
        .await
}

/// Run `SHOW server_version`
///
/// # Errors
/// Returns `StoreError::QueryFailed` if the query fails
pub async fn query_version(pool: &PgPool) -> StoreResult<String> {
    sqlx::query_scalar::<_, String>(SERVER_VERSION_QUERY)
        .fetch_one(pool)
        .await
        .map_store_err("show_server_version")
}
