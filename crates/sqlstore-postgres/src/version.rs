//! Server version parsing for feature gating

use std::fmt;
use std::str::FromStr;

use crate::error::StoreError;

/// Major/minor version from `SHOW server_version`
///
/// Accepts both numbering schemes: `9.6.24` (major 9, minor 6) and
/// `16.2 (Debian 16.2-1.pgdg120+2)` (major 16, minor 2). Pre-release suffixes
/// such as `17beta1` parse as minor 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServerVersion {
    pub major: u32,
    pub minor: u32,
}

impl ServerVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    pub fn at_least(&self, major: u32, minor: u32) -> bool {
        *self >= Self::new(major, minor)
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for ServerVersion {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unrecognized = || StoreError::UnrecognizedVersion {
            version: s.to_string(),
        };

        let number = s.split_whitespace().next().ok_or_else(unrecognized)?;
        let mut components = number.split('.');

        let major = components
            .next()
            .and_then(leading_number)
            .ok_or_else(unrecognized)?;
        let minor = components.next().and_then(leading_number).unwrap_or(0);

        Ok(Self { major, minor })
    }
}

fn leading_number(component: &str) -> Option<u32> {
    let end = component
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(component.len());
    component.get(..end)?.parse().ok()
}
