//! Connection string configuration for TLS client-certificate authentication
//!
//! Every connection is opened with `sslmode=require` and the client
//! certificate, client key and root CA from [`DatabaseConfig`]. The three
//! files must be configured and readable before any connection is attempted.
//!
//! Supported base formats:
//! * keyword/value: `host=db port=5432 dbname=app`
//! * URL: `postgres://user@db:5432/app`

use std::borrow::Cow;
use std::path::Path;

use sqlstore_config::DatabaseConfig;

use crate::error::{CertificateKind, StoreError, StoreResult};

/// Build the connection string for the read-write or read-only connection
///
/// # Errors
///
/// Returns a configuration error if:
/// - `read_only` is set but no read-only connection string is configured
/// - any certificate path is empty
/// - any certificate file cannot be read
pub fn configure_connection(config: &DatabaseConfig, read_only: bool) -> StoreResult<String> {
    let base = base_connection_string(config, read_only)?;
    assert_certificates(config)?;
    Ok(append_tls_parameters(base, config))
}

/// Pick the configured connection string for the requested role
///
/// # Errors
/// Returns `StoreError::MissingReadOnlyConnectionString` for a read-only
/// request without a read-only connection string
pub fn base_connection_string(config: &DatabaseConfig, read_only: bool) -> StoreResult<&str> {
    if read_only {
        config
            .read_only_connection_string()
            .ok_or(StoreError::MissingReadOnlyConnectionString)
    } else {
        Ok(&config.connection_string)
    }
}

/// Check that the client certificate, client key and root CA are configured
/// and readable, in that order, stopping at the first failure
///
/// # Errors
/// Returns `StoreError::MissingCertificate` for an empty path and
/// `StoreError::CertificateUnreadable` for a file that cannot be read
pub fn assert_certificates(config: &DatabaseConfig) -> StoreResult<()> {
    let certificates = certificate_paths(config);

    for (kind, path) in certificates {
        if path.as_os_str().is_empty() {
            return Err(StoreError::MissingCertificate { kind });
        }
    }

    for (kind, path) in certificates {
        std::fs::read(path).map_err(|source| StoreError::CertificateUnreadable {
            kind,
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(%kind, path = %path.display(), "Certificate file is readable");
    }

    Ok(())
}

fn certificate_paths(config: &DatabaseConfig) -> [(CertificateKind, &Path); 3] {
    [
        (
            CertificateKind::ClientCertificate,
            config.client_cert_path.as_path(),
        ),
        (CertificateKind::ClientKey, config.client_key_path.as_path()),
        (CertificateKind::RootCa, config.root_ca_path.as_path()),
    ]
}

/// Whether a connection string is in URL form rather than keyword/value
pub fn is_url(connection_string: &str) -> bool {
    connection_string.starts_with("postgres://") || connection_string.starts_with("postgresql://")
}

/// Append `sslmode=require sslrootcert=... sslcert=... sslkey=...`
fn append_tls_parameters(base: &str, config: &DatabaseConfig) -> String {
    let root_ca = path_value(&config.root_ca_path);
    let cert = path_value(&config.client_cert_path);
    let key = path_value(&config.client_key_path);

    if is_url(base) {
        let separator = match base.chars().last() {
            Some('?' | '&') => "",
            _ if base.contains('?') => "&",
            _ => "?",
        };
        return format!(
            "{base}{separator}sslmode=require&sslrootcert={}&sslcert={}&sslkey={}",
            urlencoding::encode(&root_ca),
            urlencoding::encode(&cert),
            urlencoding::encode(&key),
        );
    }

    format!(
        "{} sslmode=require sslrootcert={} sslcert={} sslkey={}",
        base.trim_end(),
        quote_value(&root_ca),
        quote_value(&cert),
        quote_value(&key),
    )
}

fn path_value(path: &Path) -> Cow<'_, str> {
    path.to_string_lossy()
}

/// Quote a keyword/value parameter value when libpq would otherwise split it
fn quote_value(value: &str) -> Cow<'_, str> {
    let needs_quotes = value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || c == '\'' || c == '\\');

    if needs_quotes {
        let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
        Cow::Owned(format!("'{escaped}'"))
    } else {
        Cow::Borrowed(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlstore_test_utils::CertificateFixture;
    use std::path::PathBuf;

    fn fixture() -> CertificateFixture {
        CertificateFixture::new().expect("create certificate fixture")
    }

    #[test]
    fn test_appends_four_parameters_in_order() {
        let certs = fixture();
        let config = certs.database_config("host=db port=5432 dbname=app");

        let connection_string = configure_connection(&config, false).expect("configure");

        assert_eq!(
            connection_string,
            format!(
                "host=db port=5432 dbname=app sslmode=require sslrootcert={} sslcert={} sslkey={}",
                certs.root_ca.display(),
                certs.client_cert.display(),
                certs.client_key.display(),
            )
        );
    }

    #[test]
    fn test_read_only_uses_read_only_string() {
        let certs = fixture();
        let mut config = certs.database_config("host=primary");
        config.ro_connection_string = Some("host=replica".to_string());

        let connection_string = configure_connection(&config, true).expect("configure");
        assert!(connection_string.starts_with("host=replica sslmode=require "));

        let connection_string = configure_connection(&config, false).expect("configure");
        assert!(connection_string.starts_with("host=primary sslmode=require "));
    }

    #[test]
    fn test_read_only_without_read_only_string_fails() {
        let certs = fixture();
        let config = certs.database_config("host=primary");

        let result = configure_connection(&config, true);
        assert!(matches!(
            result,
            Err(StoreError::MissingReadOnlyConnectionString)
        ));
    }

    #[test]
    fn test_each_empty_path_is_reported() {
        let certs = fixture();

        let mut config = certs.database_config("host=db");
        config.client_cert_path = PathBuf::new();
        assert!(matches!(
            configure_connection(&config, false),
            Err(StoreError::MissingCertificate {
                kind: CertificateKind::ClientCertificate
            })
        ));

        let mut config = certs.database_config("host=db");
        config.client_key_path = PathBuf::new();
        assert!(matches!(
            configure_connection(&config, false),
            Err(StoreError::MissingCertificate {
                kind: CertificateKind::ClientKey
            })
        ));

        let mut config = certs.database_config("host=db");
        config.root_ca_path = PathBuf::new();
        assert!(matches!(
            configure_connection(&config, false),
            Err(StoreError::MissingCertificate {
                kind: CertificateKind::RootCa
            })
        ));
    }

    #[test]
    fn test_empty_paths_are_checked_before_any_read() {
        let certs = fixture();
        let mut config = certs.database_config("host=db");
        config.client_cert_path = PathBuf::from("/nonexistent/client.pem");
        config.root_ca_path = PathBuf::new();

        // The unreadable certificate comes first, but the empty CA path wins
        assert!(matches!(
            assert_certificates(&config),
            Err(StoreError::MissingCertificate {
                kind: CertificateKind::RootCa
            })
        ));
    }

    #[test]
    fn test_unreadable_file_is_reported_with_cause() {
        let certs = fixture();
        let mut config = certs.database_config("host=db");
        config.client_key_path = certs.dir().join("missing-key.pem");

        match configure_connection(&config, false) {
            Err(StoreError::CertificateUnreadable { kind, path, source }) => {
                assert_eq!(kind, CertificateKind::ClientKey);
                assert_eq!(path, certs.dir().join("missing-key.pem"));
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("expected unreadable certificate, got {other:?}"),
        }
    }

    #[test]
    fn test_first_unreadable_file_short_circuits() {
        let certs = fixture();
        let mut config = certs.database_config("host=db");
        config.client_cert_path = certs.dir().join("missing-cert.pem");
        config.root_ca_path = certs.dir().join("missing-ca.pem");

        assert!(matches!(
            assert_certificates(&config),
            Err(StoreError::CertificateUnreadable {
                kind: CertificateKind::ClientCertificate,
                ..
            })
        ));
    }

    #[test]
    fn test_directory_is_not_a_readable_certificate() {
        let certs = fixture();
        let mut config = certs.database_config("host=db");
        config.root_ca_path = certs.dir().to_path_buf();

        assert!(matches!(
            assert_certificates(&config),
            Err(StoreError::CertificateUnreadable {
                kind: CertificateKind::RootCa,
                ..
            })
        ));
    }

    #[test]
    fn test_url_base_gets_query_parameters() {
        let certs = fixture();
        let config = certs.database_config("postgres://app@db:5432/app");

        let connection_string = configure_connection(&config, false).expect("configure");
        let expected_query = format!(
            "?sslmode=require&sslrootcert={}&sslcert={}&sslkey={}",
            urlencoding::encode(&certs.root_ca.to_string_lossy()),
            urlencoding::encode(&certs.client_cert.to_string_lossy()),
            urlencoding::encode(&certs.client_key.to_string_lossy()),
        );
        assert_eq!(
            connection_string,
            format!("postgres://app@db:5432/app{expected_query}")
        );
    }

    #[test]
    fn test_url_with_existing_query_uses_ampersand() {
        let certs = fixture();
        let config = certs.database_config("postgresql://db/app?application_name=server");

        let connection_string = configure_connection(&config, false).expect("configure");
        assert!(connection_string.starts_with("postgresql://db/app?application_name=server&sslmode=require&"));
    }

    #[test]
    fn test_paths_with_spaces_are_quoted() {
        let certs = CertificateFixture::in_subdirectory("tls material").expect("fixture");
        let config = certs.database_config("host=db");

        let connection_string = configure_connection(&config, false).expect("configure");
        assert!(connection_string.contains(&format!(
            "sslrootcert='{}'",
            certs.root_ca.display()
        )));
    }

    #[test]
    fn test_quote_value_escapes() {
        assert_eq!(quote_value("/plain/path.pem"), "/plain/path.pem");
        assert_eq!(quote_value(""), "''");
        assert_eq!(quote_value("a b"), "'a b'");
        assert_eq!(quote_value(r"it's"), r"'it\'s'");
        assert_eq!(quote_value(r"C:\certs"), r"'C:\\certs'");
    }
}
