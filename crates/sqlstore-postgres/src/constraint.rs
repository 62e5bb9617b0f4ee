//! Constraint-violation classification by SQLSTATE class

use std::error::Error as StdError;
use std::fmt;

use sqlx::postgres::PgDatabaseError;

use crate::error::StoreError;

/// SQLSTATE class shared by every integrity constraint violation
/// (`23505` unique, `23503` foreign key, `23514` check, `23502` not null, ...)
pub const CONSTRAINT_VIOLATION_CLASS: &str = "23";

/// Five-character SQLSTATE error code reported by the server
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SqlState(String);

impl SqlState {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// The full code, e.g. `23505`
    pub fn code(&self) -> &str {
        &self.0
    }

    /// The first two characters, e.g. `23`
    pub fn class(&self) -> &str {
        self.0.get(..2).unwrap_or(&self.0)
    }

    pub fn is_constraint_violation(&self) -> bool {
        self.class() == CONSTRAINT_VIOLATION_CLASS
    }
}

impl fmt::Display for SqlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// SQLSTATE of a database error, `None` for driver-side failures
pub fn sql_state(err: &sqlx::Error) -> Option<SqlState> {
    err.as_database_error()?
        .code()
        .map(|code| SqlState::new(code.into_owned()))
}

/// Whether `err` (or anything in its source chain) is a constraint violation
///
/// The first database error found in the chain decides: true only if its
/// SQLSTATE class is `23`. Errors without a database error anywhere in the
/// chain are never constraint violations.
pub fn is_constraint_violation(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);

    while let Some(err) = current {
        if let Some(store_err) = err.downcast_ref::<StoreError>()
            && matches!(store_err, StoreError::ConstraintViolation { .. })
        {
            return true;
        }

        if let Some(sqlx_err) = err.downcast_ref::<sqlx::Error>()
            && sqlx_err.as_database_error().is_some()
        {
            return sql_state(sqlx_err).is_some_and(|state| state.is_constraint_violation());
        }

        if let Some(pg_err) = err.downcast_ref::<PgDatabaseError>() {
            return SqlState::new(pg_err.code()).is_constraint_violation();
        }

        current = err.source();
    }

    false
}
