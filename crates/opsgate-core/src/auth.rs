//! Bearer-token verification against the identity provider's JWKS endpoint.
//!
//! The signing-key set is fetched lazily on first use and cached for the
//! lifetime of the process. Concurrent first-use verifications coalesce
//! into a single fetch; a failed fetch leaves the cache empty so the next
//! verification retries.

use std::sync::Arc;

use async_trait::async_trait;
use jsonwebtoken::jwk::{AlgorithmParameters, Jwk, JwkSet};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

/// Verified identity claims attached to a session at connect time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject, the provider's stable user identifier.
    pub sub: String,
    /// Expiry (seconds since epoch); checked during verification.
    pub exp: i64,
    #[serde(default)]
    pub iss: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, alias = "cognito:username")]
    pub username: Option<String>,
}

impl Claims {
    /// Best human-readable identifier for logs.
    pub fn display_name(&self) -> &str {
        self.username
            .as_deref()
            .or(self.email.as_deref())
            .unwrap_or(&self.sub)
    }
}

/// Authentication failure taxonomy. Any of these refuses the connection;
/// no session is created.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("no credential provided")]
    MissingCredentials,

    /// The token could not be parsed at all.
    #[error("malformed token: {0}")]
    Malformed(String),

    /// No signing key matches the token's key id.
    #[error("invalid token signature")]
    InvalidSignature,

    /// Signature or standard-claims verification failed.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The provider's key set could not be fetched.
    #[error("failed to fetch signing keys: {0}")]
    KeyFetch(String),
}

/// Transport for the provider's signing-key set.
#[async_trait]
pub trait KeyFetcher: Send + Sync {
    async fn fetch(&self) -> Result<JwkSet, AuthError>;
}

/// Fetches the JWK set over HTTPS.
pub struct HttpKeyFetcher {
    url: String,
    client: reqwest::Client,
}

impl HttpKeyFetcher {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl KeyFetcher for HttpKeyFetcher {
    async fn fetch(&self) -> Result<JwkSet, AuthError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| AuthError::KeyFetch(e.to_string()))?
            .error_for_status()
            .map_err(|e| AuthError::KeyFetch(e.to_string()))?;
        response
            .json::<JwkSet>()
            .await
            .map_err(|e| AuthError::KeyFetch(e.to_string()))
    }
}

/// Verifies bearer credentials against the cached signing-key set.
///
/// Safe to share across connections; the only interior state is the
/// key-set cache.
pub struct AuthGate {
    fetcher: Arc<dyn KeyFetcher>,
    keys: OnceCell<JwkSet>,
}

impl AuthGate {
    /// Gate backed by the provider's JWKS endpoint.
    pub fn new(jwks_url: impl Into<String>) -> Self {
        Self::with_fetcher(Arc::new(HttpKeyFetcher::new(jwks_url)))
    }

    /// Gate with a custom key-set transport.
    pub fn with_fetcher(fetcher: Arc<dyn KeyFetcher>) -> Self {
        Self {
            fetcher,
            keys: OnceCell::new(),
        }
    }

    async fn keys(&self) -> Result<&JwkSet, AuthError> {
        self.keys
            .get_or_try_init(|| async {
                debug!("fetching identity provider signing keys");
                self.fetcher.fetch().await
            })
            .await
    }

    /// Verify a bearer credential and return its claims.
    pub async fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let header = decode_header(token).map_err(|e| AuthError::Malformed(e.to_string()))?;
        let kid = header.kid.ok_or(AuthError::InvalidSignature)?;

        let keys = self.keys().await?;
        let jwk = keys.find(&kid).ok_or(AuthError::InvalidSignature)?;
        let key = DecodingKey::from_jwk(jwk).map_err(|_| AuthError::InvalidSignature)?;

        let mut validation = Validation::new(algorithm_for(jwk));
        validation.validate_aud = false;

        match decode::<Claims>(token, &key, &validation) {
            Ok(data) => Ok(data.claims),
            Err(e) => {
                warn!(error = %e, "token verification failed");
                Err(AuthError::Unauthorized(e.to_string()))
            }
        }
    }
}

/// The verification algorithm follows the matched key's type, not the
/// attacker-controlled token header.
fn algorithm_for(jwk: &Jwk) -> Algorithm {
    match &jwk.algorithm {
        AlgorithmParameters::RSA(_) => Algorithm::RS256,
        AlgorithmParameters::EllipticCurve(_) => Algorithm::ES256,
        AlgorithmParameters::OctetKeyPair(_) => Algorithm::EdDSA,
        AlgorithmParameters::OctetKey(_) => Algorithm::HS256,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &[u8] = b"opsgate-test-secret";

    fn oct_key_set(kid: &str) -> JwkSet {
        serde_json::from_value(serde_json::json!({
            "keys": [{
                "kty": "oct",
                "kid": kid,
                "k": b64url(SECRET),
            }]
        }))
        .unwrap()
    }

    fn b64url(data: &[u8]) -> String {
        // Minimal base64url (no padding), enough for test key material.
        const ALPHABET: &[u8] =
            b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";
        let mut out = String::new();
        for chunk in data.chunks(3) {
            let b = [
                chunk[0],
                chunk.get(1).copied().unwrap_or(0),
                chunk.get(2).copied().unwrap_or(0),
            ];
            let n = u32::from(b[0]) << 16 | u32::from(b[1]) << 8 | u32::from(b[2]);
            out.push(ALPHABET[(n >> 18) as usize & 63] as char);
            out.push(ALPHABET[(n >> 12) as usize & 63] as char);
            if chunk.len() > 1 {
                out.push(ALPHABET[(n >> 6) as usize & 63] as char);
            }
            if chunk.len() > 2 {
                out.push(ALPHABET[n as usize & 63] as char);
            }
        }
        out
    }

    struct StaticFetcher {
        keys: JwkSet,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl KeyFetcher for StaticFetcher {
        async fn fetch(&self) -> Result<JwkSet, AuthError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            // Small delay widens the window in which concurrent misses race.
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            Ok(self.keys.clone())
        }
    }

    struct FlakyFetcher {
        keys: JwkSet,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl KeyFetcher for FlakyFetcher {
        async fn fetch(&self) -> Result<JwkSet, AuthError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(AuthError::KeyFetch("connection refused".to_string()))
            } else {
                Ok(self.keys.clone())
            }
        }
    }

    fn sign(kid: Option<&str>, exp_offset_secs: i64) -> String {
        let mut header = Header::new(Algorithm::HS256);
        header.kid = kid.map(str::to_string);
        let claims = serde_json::json!({
            "sub": "user-1",
            "exp": chrono::Utc::now().timestamp() + exp_offset_secs,
            "cognito:username": "alice",
        });
        encode(&header, &claims, &EncodingKey::from_secret(SECRET)).unwrap()
    }

    fn gate_with_keys(kid: &str) -> AuthGate {
        AuthGate::with_fetcher(Arc::new(StaticFetcher {
            keys: oct_key_set(kid),
            calls: AtomicUsize::new(0),
        }))
    }

    #[tokio::test]
    async fn valid_token_yields_claims() {
        let gate = gate_with_keys("k1");
        let claims = gate.verify(&sign(Some("k1"), 3600)).await.unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.display_name(), "alice");
    }

    #[tokio::test]
    async fn garbage_token_is_malformed() {
        let gate = gate_with_keys("k1");
        let err = gate.verify("not.a.token").await.unwrap_err();
        assert!(matches!(err, AuthError::Malformed(_)));
    }

    #[tokio::test]
    async fn missing_kid_is_invalid_signature() {
        let gate = gate_with_keys("k1");
        let err = gate.verify(&sign(None, 3600)).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidSignature));
    }

    #[tokio::test]
    async fn unknown_kid_is_invalid_signature() {
        let gate = gate_with_keys("k1");
        let err = gate.verify(&sign(Some("other"), 3600)).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidSignature));
    }

    #[tokio::test]
    async fn expired_token_is_unauthorized() {
        let gate = gate_with_keys("k1");
        // Well past the default validation leeway.
        let err = gate.verify(&sign(Some("k1"), -3600)).await.unwrap_err();
        assert!(matches!(err, AuthError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn concurrent_first_use_coalesces_into_one_fetch() {
        let fetcher = Arc::new(StaticFetcher {
            keys: oct_key_set("k1"),
            calls: AtomicUsize::new(0),
        });
        let gate = Arc::new(AuthGate::with_fetcher(fetcher.clone()));

        let token = sign(Some("k1"), 3600);
        let mut handles = Vec::new();
        for _ in 0..8 {
            let gate = gate.clone();
            let token = token.clone();
            handles.push(tokio::spawn(async move { gate.verify(&token).await }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_fetch_is_not_cached() {
        let fetcher = Arc::new(FlakyFetcher {
            keys: oct_key_set("k1"),
            calls: AtomicUsize::new(0),
        });
        let gate = AuthGate::with_fetcher(fetcher.clone());
        let token = sign(Some("k1"), 3600);

        let err = gate.verify(&token).await.unwrap_err();
        assert!(matches!(err, AuthError::KeyFetch(_)));

        // The next verification retries the fetch and succeeds.
        assert!(gate.verify(&token).await.is_ok());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }
}
