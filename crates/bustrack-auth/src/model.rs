//! Auth model types

use serde::{Deserialize, Serialize};

/// Claims carried by driver tokens.
///
/// `sub` is the bus username (or numeric id) the token was issued for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverClaims {
    pub sub: String,
    pub exp: i64,
}

/// Default TTL of the decoded-token cache
pub const DEFAULT_TOKEN_CACHE_TTL_SECONDS: u64 = 300;

/// Default capacity of the decoded-token cache
pub const DEFAULT_TOKEN_CACHE_CAPACITY: u64 = 10_000;
