//! JWT-backed authorization gate
//!
//! Driver tokens are issued elsewhere (driver login). This gate only decodes
//! them with the shared secret and checks that the subject names the target
//! bus.

use std::time::Duration;

use async_trait::async_trait;
use bustrack_common::{Bus, TrackerError};
use jsonwebtoken::{DecodingKey, TokenData, Validation, decode};
use moka::sync::Cache;
use tracing::debug;

use super::gate::AuthGate;
use crate::model::{DEFAULT_TOKEN_CACHE_CAPACITY, DEFAULT_TOKEN_CACHE_TTL_SECONDS, DriverClaims};

pub struct JwtAuthGate {
    decoding_key: DecodingKey,
    validation: Validation,
    /// Decoded claims keyed by raw token, to avoid repeated signature checks
    token_cache: Cache<String, DriverClaims>,
}

impl JwtAuthGate {
    /// Create a gate from a base64 encoded HS256 secret
    pub fn new(secret_key: &str) -> anyhow::Result<Self> {
        Self::with_cache(
            secret_key,
            DEFAULT_TOKEN_CACHE_CAPACITY,
            Duration::from_secs(DEFAULT_TOKEN_CACHE_TTL_SECONDS),
        )
    }

    pub fn with_cache(secret_key: &str, capacity: u64, ttl: Duration) -> anyhow::Result<Self> {
        if secret_key.is_empty() {
            return Err(TrackerError::ConfigError("auth secret key is empty".to_string()).into());
        }

        let decoding_key = DecodingKey::from_base64_secret(secret_key)
            .map_err(|e| TrackerError::ConfigError(format!("invalid auth secret key: {}", e)))?;

        Ok(Self {
            decoding_key,
            validation: Validation::default(),
            token_cache: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build(),
        })
    }

    /// Decode and validate a token without consulting the cache
    pub fn decode_token(
        &self,
        token: &str,
    ) -> jsonwebtoken::errors::Result<TokenData<DriverClaims>> {
        decode::<DriverClaims>(token, &self.decoding_key, &self.validation)
    }

    /// Decode and validate a token, caching the claims until they expire
    pub fn decode_token_cached(&self, token: &str) -> jsonwebtoken::errors::Result<DriverClaims> {
        if let Some(claims) = self.token_cache.get(token) {
            if claims.exp > chrono::Utc::now().timestamp() {
                return Ok(claims);
            }
            self.token_cache.invalidate(token);
        }

        let claims = self.decode_token(token)?.claims;
        self.token_cache.insert(token.to_string(), claims.clone());

        Ok(claims)
    }
}

#[async_trait]
impl AuthGate for JwtAuthGate {
    async fn authorize(&self, credential: &str, bus: &Bus) -> bool {
        if credential.is_empty() {
            debug!(bus_id = bus.id, "Missing driver token");
            return false;
        }

        match self.decode_token_cached(credential) {
            Ok(claims) => claims.sub == bus.username || claims.sub == bus.id.to_string(),
            Err(e) => {
                debug!(bus_id = bus.id, error = %e, "Driver token rejected");
                false
            }
        }
    }
}
