//! Read-write / read-only connection management
//!
//! The read-write connection is always opened. A read-only connection is
//! opened only when a read-only connection string is configured; otherwise
//! reads share the read-write pool.

use sqlx::PgPool;
use sqlstore_config::DatabaseConfig;
use sqlstore_config::validation::Validate;

use crate::dialect::{Dialect, OpenedConnection, PostgresDialect};
use crate::error::StoreResult;

/// Extension trait for saturating cast from usize to u32
trait SaturatingCast {
    fn saturating_cast(self) -> u32;
}

impl SaturatingCast for usize {
    fn saturating_cast(self) -> u32 {
        u32::try_from(self).unwrap_or(u32::MAX)
    }
}

/// Owns the read-write connection and the optional read-only connection
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    write: OpenedConnection,
    read: Option<OpenedConnection>,
}

impl ConnectionManager {
    /// Open connections with the `PostgreSQL` dialect
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - the configuration fails validation
    /// - a certificate is missing or unreadable
    /// - either connection cannot be opened
    /// - the server version cannot be queried
    pub async fn open(config: &DatabaseConfig) -> StoreResult<Self> {
        Self::open_with(&PostgresDialect, config).await
    }

    /// Open connections with the given dialect
    ///
    /// If the read-only connection fails, the already opened read-write pool
    /// is closed before the error is returned.
    ///
    /// # Errors
    /// Same as [`ConnectionManager::open`]
    pub async fn open_with(dialect: &dyn Dialect, config: &DatabaseConfig) -> StoreResult<Self> {
        config.validate()?;

        let write = dialect.connect(config, false).await?;

        let read = if config.read_only_connection_string().is_some() {
            match dialect.connect(config, true).await {
                Ok(read) => Some(read),
                Err(e) => {
                    write.pool.close().await;
                    return Err(e);
                }
            }
        } else {
            tracing::debug!("No read-only connection string configured, reads use the read-write pool");
            None
        };

        Ok(Self { write, read })
    }

    /// Pool for writes and reads that must see the latest data
    pub const fn write_pool(&self) -> &PgPool {
        &self.write.pool
    }

    /// Pool for reads that tolerate replica lag
    pub fn read_pool(&self) -> &PgPool {
        self.read.as_ref().map_or(&self.write.pool, |read| &read.pool)
    }

    /// Whether reads go to a separate read-only connection
    pub const fn has_read_replica(&self) -> bool {
        self.read.is_some()
    }

    /// Server version of the read-write connection
    pub fn version(&self) -> &str {
        &self.write.version
    }

    pub const fn supports_cte(&self) -> bool {
        self.write.supports_cte
    }

    /// The read-write connection
    pub const fn write_connection(&self) -> &OpenedConnection {
        &self.write
    }

    /// The read-only connection, if one was opened
    pub const fn read_connection(&self) -> Option<&OpenedConnection> {
        self.read.as_ref()
    }

    /// Get pool statistics
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            write_pool: ConnectionStats::of(&self.write.pool),
            read_pool: self.read.as_ref().map(|read| ConnectionStats::of(&read.pool)),
        }
    }

    /// Close all pools
    pub async fn close(&self) {
        self.write.pool.close().await;
        if let Some(read) = &self.read {
            read.pool.close().await;
        }
    }
}

/// Statistics for a connection pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Current number of connections
    pub size: u32,
    /// Number of idle connections
    pub idle: u32,
    /// Maximum connections allowed
    pub max: u32,
}

impl ConnectionStats {
    fn of(pool: &PgPool) -> Self {
        Self {
            size: pool.size(),
            idle: pool.num_idle().saturating_cast(),
            max: pool.options().get_max_connections(),
        }
    }
}

/// Combined statistics for both pools
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub write_pool: ConnectionStats,
    /// `None` when reads share the write pool
    pub read_pool: Option<ConnectionStats>,
}

impl PoolStats {
    /// Get total connections across all pools
    pub const fn total_connections(&self) -> u32 {
        match self.read_pool {
            Some(read) => self.write_pool.size.saturating_add(read.size),
            None => self.write_pool.size,
        }
    }

    /// Get total idle connections
    pub const fn total_idle(&self) -> u32 {
        match self.read_pool {
            Some(read) => self.write_pool.idle.saturating_add(read.idle),
            None => self.write_pool.idle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConnectionRole, StoreError};
    use async_trait::async_trait;
    use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
    use std::error::Error as StdError;
    use std::sync::Mutex;

    /// Hands out lazy pools and records which roles were requested
    #[derive(Default)]
    struct RecordingDialect {
        requests: Mutex<Vec<bool>>,
        fail_read_only: bool,
    }

    impl RecordingDialect {
        fn requests(&self) -> Vec<bool> {
            self.requests.lock().map(|r| r.clone()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl Dialect for RecordingDialect {
        async fn connect(
            &self,
            _config: &DatabaseConfig,
            read_only: bool,
        ) -> StoreResult<OpenedConnection> {
            if let Ok(mut requests) = self.requests.lock() {
                requests.push(read_only);
            }
            if read_only && self.fail_read_only {
                return Err(StoreError::MissingReadOnlyConnectionString);
            }
            Ok(OpenedConnection {
                pool: PgPoolOptions::new()
                    .max_connections(if read_only { 7 } else { 3 })
                    .connect_lazy_with(PgConnectOptions::new()),
                version: if read_only { "16.1" } else { "16.2" }.to_string(),
                supports_cte: true,
                role: ConnectionRole::from_read_only(read_only),
            })
        }

        fn is_constraint_violation(&self, _err: &(dyn StdError + 'static)) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn test_reads_share_write_pool_without_read_only_string() {
        let dialect = RecordingDialect::default();
        let manager = ConnectionManager::open_with(&dialect, &DatabaseConfig::default())
            .await
            .expect("open");

        assert_eq!(dialect.requests(), vec![false]);
        assert!(!manager.has_read_replica());
        assert_eq!(manager.read_pool().options().get_max_connections(), 3);
        assert_eq!(manager.version(), "16.2");
        assert!(manager.supports_cte());
        assert!(manager.stats().read_pool.is_none());
    }

    #[tokio::test]
    async fn test_opens_separate_read_only_connection() {
        let dialect = RecordingDialect::default();
        let config = DatabaseConfig {
            ro_connection_string: Some("host=replica".to_string()),
            ..DatabaseConfig::default()
        };

        let manager = ConnectionManager::open_with(&dialect, &config)
            .await
            .expect("open");

        assert_eq!(dialect.requests(), vec![false, true]);
        assert!(manager.has_read_replica());
        assert_eq!(manager.write_pool().options().get_max_connections(), 3);
        assert_eq!(manager.read_pool().options().get_max_connections(), 7);
        assert_eq!(
            manager.read_connection().map(|c| c.role),
            Some(ConnectionRole::ReadOnly)
        );
        assert_eq!(manager.version(), "16.2");
        assert_eq!(manager.stats().read_pool.map(|s| s.max), Some(7));
    }

    #[tokio::test]
    async fn test_read_only_failure_closes_write_pool() {
        let dialect = RecordingDialect {
            fail_read_only: true,
            ..RecordingDialect::default()
        };
        let config = DatabaseConfig {
            ro_connection_string: Some("host=replica".to_string()),
            ..DatabaseConfig::default()
        };

        let result = ConnectionManager::open_with(&dialect, &config).await;
        assert!(result.is_err());
        assert_eq!(dialect.requests(), vec![false, true]);
    }

    #[tokio::test]
    async fn test_invalid_config_never_reaches_dialect() {
        let dialect = RecordingDialect::default();
        let config = DatabaseConfig {
            max_connections: 0,
            ..DatabaseConfig::default()
        };

        let result = ConnectionManager::open_with(&dialect, &config).await;
        assert!(matches!(result, Err(StoreError::Config(_))));
        assert!(dialect.requests().is_empty());
    }

    #[test]
    fn test_pool_stats_totals() {
        let stats = PoolStats {
            write_pool: ConnectionStats {
                size: 5,
                idle: 2,
                max: 10,
            },
            read_pool: Some(ConnectionStats {
                size: 10,
                idle: 5,
                max: 20,
            }),
        };
        assert_eq!(stats.total_connections(), 15);
        assert_eq!(stats.total_idle(), 7);

        let shared = PoolStats {
            read_pool: None,
            ..stats
        };
        assert_eq!(shared.total_connections(), 5);
    }
}
