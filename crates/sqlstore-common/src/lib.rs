//! Common utilities shared across sqlstore crates
//!
//! Environment bootstrap and redaction of secrets before they reach log output.

pub mod init;
pub mod redact;

pub use init::initialize_environment;
pub use redact::redact_connection_string;
