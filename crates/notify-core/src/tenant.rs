//! Tenant (store) identifier.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{DomainError, DomainResult};

/// Identifier of a tenant - the store every client and broadcast is scoped to.
///
/// Upstream services call this the `store_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(i64);

impl TenantId {
    /// Creates a tenant id from its integer value.
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the integer value.
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for TenantId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl FromStr for TenantId {
    type Err = DomainError;

    fn from_str(s: &str) -> DomainResult<Self> {
        s.trim()
            .parse::<i64>()
            .map(Self)
            .map_err(|e| DomainError::parse("tenant_id", e))
    }
}
