//! Secret redaction for connection strings
//!
//! Connection strings carry passwords. Anything that ends up in a log line or
//! an error message shown to an operator goes through [`redact_connection_string`]
//! first.

use regex::Regex;
use std::sync::OnceLock;

const MASK: &str = "***";

/// Placeholder used when the redaction patterns are unavailable
const FULLY_REDACTED: &str = "<redacted connection string>";

/// `password=...` in a keyword/value string, quoted or bare
fn keyword_password_regex() -> Option<&'static Regex> {
    static REGEX: OnceLock<Option<Regex>> = OnceLock::new();
    REGEX
        .get_or_init(|| Regex::new(r"(?i)\b(password\s*=\s*)('(?:[^'\\]|\\.)*'|\S+)").ok())
        .as_ref()
}

/// `user:password@` in the authority of a URL
fn url_userinfo_regex() -> Option<&'static Regex> {
    static REGEX: OnceLock<Option<Regex>> = OnceLock::new();
    REGEX
        .get_or_init(|| Regex::new(r"^(postgres(?:ql)?://[^:/@?]*):[^@/?]*@").ok())
        .as_ref()
}

/// `password=` query parameter of a URL
fn url_query_password_regex() -> Option<&'static Regex> {
    static REGEX: OnceLock<Option<Regex>> = OnceLock::new();
    REGEX
        .get_or_init(|| Regex::new(r"(?i)([?&]password=)[^&]*").ok())
        .as_ref()
}

/// Mask every password in a `PostgreSQL` connection string
///
/// Handles both keyword/value strings (`host=db password=secret`) and URLs
/// (`postgres://user:secret@db/app?password=secret`). Everything else is left
/// untouched so the result stays useful for debugging.
pub fn redact_connection_string(connection_string: &str) -> String {
    let is_url = connection_string.starts_with("postgres://")
        || connection_string.starts_with("postgresql://");

    if is_url {
        let (Some(userinfo), Some(query)) = (url_userinfo_regex(), url_query_password_regex())
        else {
            return FULLY_REDACTED.to_string();
        };
        let masked = userinfo.replace(connection_string, format!("${{1}}:{MASK}@"));
        return query
            .replace_all(&masked, format!("${{1}}{MASK}"))
            .into_owned();
    }

    keyword_password_regex().map_or_else(
        || FULLY_REDACTED.to_string(),
        |regex| {
            regex
                .replace_all(connection_string, format!("${{1}}{MASK}"))
                .into_owned()
        },
    )
}
