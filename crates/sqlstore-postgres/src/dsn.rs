//! Connection string parsing into `sqlx` connect options
//!
//! `sqlx` only understands URLs. Keyword/value strings (`host=db sslmode=require`)
//! are tokenized here with libpq's rules: whitespace separates pairs, spaces
//! around `=` are allowed, values may be single-quoted, and `\` escapes the
//! next character. Later keys override earlier ones.

use std::str::FromStr;
use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgSslMode};

use crate::connection_string::is_url;
use crate::error::{StoreError, StoreResult};

/// Connect options plus the settings the pool needs from the string
#[derive(Debug, Clone)]
pub struct ConnectSettings {
    pub options: PgConnectOptions,
    /// `connect_timeout` from a keyword/value string; `None` if absent or 0
    pub connect_timeout: Option<Duration>,
}

/// Parse a keyword/value string or URL into connect options
///
/// `sslmode=require` together with a non-empty `sslrootcert` is upgraded to
/// `verify-ca`, matching libpq, so the root CA is used to verify the server.
///
/// # Errors
/// Returns `StoreError::InvalidConnectionString` for malformed strings,
/// unknown keywords, and invalid port, sslmode, options or timeout values
pub fn parse_connection_string(connection_string: &str) -> StoreResult<ConnectSettings> {
    if is_url(connection_string) {
        let options = PgConnectOptions::from_str(connection_string).map_err(|e| invalid(e.to_string()))?;
        return Ok(ConnectSettings {
            options: verify_with_root_ca(options, url_has_root_ca(connection_string)),
            connect_timeout: None,
        });
    }

    let mut options = PgConnectOptions::new();
    let mut connect_timeout = None;
    let mut has_root_ca = false;

    for (key, value) in tokenize(connection_string)? {
        options = match key.as_str() {
            "host" | "hostaddr" => options.host(&value),
            "port" => options.port(
                value
                    .parse()
                    .map_err(|_| invalid(format!("invalid port \"{value}\"")))?,
            ),
            "dbname" => options.database(&value),
            "user" => options.username(&value),
            "password" => options.password(&value),
            "sslmode" => options.ssl_mode(
                PgSslMode::from_str(&value)
                    .map_err(|_| invalid(format!("invalid sslmode \"{value}\"")))?,
            ),
            "sslrootcert" => {
                has_root_ca = !value.is_empty();
                options.ssl_root_cert(&value)
            }
            "sslcert" => options.ssl_client_cert(&value),
            "sslkey" => options.ssl_client_key(&value),
            "application_name" => options.application_name(&value),
            "options" => options.options(runtime_parameters(&value)?),
            "connect_timeout" => {
                let seconds: u64 = value
                    .parse()
                    .map_err(|_| invalid(format!("invalid connect_timeout \"{value}\"")))?;
                connect_timeout = (seconds > 0).then_some(Duration::from_secs(seconds));
                options
            }
            _ => return Err(invalid(format!("unsupported connection option \"{key}\""))),
        };
    }

    Ok(ConnectSettings {
        options: verify_with_root_ca(options, has_root_ca),
        connect_timeout,
    })
}

fn verify_with_root_ca(options: PgConnectOptions, has_root_ca: bool) -> PgConnectOptions {
    if has_root_ca && matches!(options.get_ssl_mode(), PgSslMode::Require) {
        options.ssl_mode(PgSslMode::VerifyCa)
    } else {
        options
    }
}

fn url_has_root_ca(url: &str) -> bool {
    url.split_once('?').is_some_and(|(_, query)| {
        query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .any(|(key, value)| key == "sslrootcert" && !value.is_empty())
    })
}

fn invalid(message: impl Into<String>) -> StoreError {
    StoreError::InvalidConnectionString {
        message: message.into(),
    }
}

/// Split an `options` value (`-c key=value --key=value`) into runtime parameters
fn runtime_parameters(value: &str) -> StoreResult<Vec<(String, String)>> {
    let mut words = Vec::new();
    let mut word = String::new();
    let mut chars = value.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => word.push(
                chars
                    .next()
                    .ok_or_else(|| invalid("trailing \"\\\" in options"))?,
            ),
            c if c.is_whitespace() => {
                if !word.is_empty() {
                    words.push(std::mem::take(&mut word));
                }
            }
            c => word.push(c),
        }
    }
    if !word.is_empty() {
        words.push(word);
    }

    let mut parameters = Vec::new();
    let mut words = words.into_iter();
    while let Some(word) = words.next() {
        let setting = if word == "-c" {
            words
                .next()
                .ok_or_else(|| invalid("\"-c\" without a setting in options"))?
        } else if let Some(setting) = word.strip_prefix("--").or_else(|| word.strip_prefix("-c")) {
            setting.to_string()
        } else {
            return Err(invalid(format!("unsupported options entry \"{word}\"")));
        };

        match setting.split_once('=') {
            Some((name, value)) if !name.is_empty() => {
                parameters.push((name.to_string(), value.to_string()));
            }
            _ => return Err(invalid(format!("invalid runtime parameter \"{setting}\""))),
        }
    }

    Ok(parameters)
}

/// Split a keyword/value string into `(key, value)` pairs
fn tokenize(input: &str) -> StoreResult<Vec<(String, String)>> {
    let mut pairs = Vec::new();
    let mut chars = input.chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        if chars.peek().is_none() {
            break;
        }

        let mut key = String::new();
        while let Some(c) = chars.next_if(|c| *c != '=' && !c.is_whitespace()) {
            key.push(c);
        }

        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        if chars.next() != Some('=') {
            return Err(invalid(format!("missing \"=\" after \"{key}\"")));
        }
        if key.is_empty() {
            return Err(invalid("empty keyword before \"=\""));
        }
        while chars.next_if(|c| c.is_whitespace()).is_some() {}

        let mut value = String::new();
        if chars.next_if_eq(&'\'').is_some() {
            loop {
                match chars.next() {
                    Some('\'') => break,
                    Some('\\') => match chars.next() {
                        Some(escaped) => value.push(escaped),
                        None => return Err(invalid("unterminated quoted string")),
                    },
                    Some(c) => value.push(c),
                    None => return Err(invalid("unterminated quoted string")),
                }
            }
        } else {
            while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
                if c == '\\' {
                    match chars.next() {
                        Some(escaped) => value.push(escaped),
                        None => return Err(invalid("trailing \"\\\" in value")),
                    }
                } else {
                    value.push(c);
                }
            }
        }

        pairs.push((key, value));
    }

    Ok(pairs)
}
