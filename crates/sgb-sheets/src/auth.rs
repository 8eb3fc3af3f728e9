//! Access tokens for the Sheets API.
//!
//! `ServiceAccountAuth` signs an RS256 JWT grant with a Google service-account
//! key, exchanges it at the key's token endpoint, and caches the resulting
//! access token until shortly before it expires.

use std::{
    fmt,
    path::Path,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use sgb_core::{errors::Error, Result};

pub const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Assertion lifetime; Google rejects grants valid for longer than an hour.
const ASSERTION_TTL_SECS: i64 = 3600;

/// Refresh this long before the provider's expiry.
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Supplies the bearer token for each Sheets request.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn access_token(&self) -> Result<String>;
}

/// A pre-issued token, used as-is.
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn access_token(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// The fields of a service-account `credential.json` needed for the JWT grant.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

impl fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ServiceAccountKey {
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| Error::Config(format!("invalid service account key: {e}")))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "failed to read service account key {}: {e}",
                path.display()
            ))
        })?;
        Self::from_json(&raw)
    }
}

#[derive(Serialize)]
struct GrantClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

impl CachedToken {
    fn usable_at(&self, now: Instant) -> bool {
        now + REFRESH_MARGIN < self.expires_at
    }
}

pub struct ServiceAccountAuth {
    key: ServiceAccountKey,
    encoding_key: EncodingKey,
    scope: String,
    http: reqwest::Client,
    cached: Mutex<Option<CachedToken>>,
}

impl fmt::Debug for ServiceAccountAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountAuth")
            .field("key", &self.key)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountAuth {
    pub fn new(key: ServiceAccountKey, timeout: Duration) -> Result<Self> {
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| Error::Config(format!("invalid service account private key: {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::External(format!("token client build error: {e}")))?;

        tracing::info!(client_email = %key.client_email, "service account loaded");

        Ok(Self {
            key,
            encoding_key,
            scope: SHEETS_SCOPE.to_string(),
            http,
            cached: Mutex::new(None),
        })
    }

    pub fn from_file(path: &Path, timeout: Duration) -> Result<Self> {
        Self::new(ServiceAccountKey::from_file(path)?, timeout)
    }

    fn sign_assertion(&self, issued_at: i64) -> Result<String> {
        let claims = GrantClaims {
            iss: &self.key.client_email,
            scope: &self.scope,
            aud: &self.key.token_uri,
            iat: issued_at,
            exp: issued_at + ASSERTION_TTL_SECS,
        };
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
            .map_err(|e| Error::External(format!("failed to sign token grant: {e}")))
    }

    async fn fetch_token(&self) -> Result<CachedToken> {
        let requested_at = Instant::now();
        let assertion = self.sign_assertion(chrono::Utc::now().timestamp())?;

        let resp = self
            .http
            .post(&self.key.token_uri)
            .form(&[
                ("grant_type", JWT_BEARER_GRANT),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await
            .map_err(|e| Error::External(format!("token request error: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::External(format!(
                "token exchange failed: {status} {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        let body: TokenResponse = resp
            .json()
            .await
            .map_err(|e| Error::External(format!("token json error: {e}")))?;
        let ttl = Duration::from_secs(body.expires_in.unwrap_or(ASSERTION_TTL_SECS as u64));

        tracing::debug!(expires_in_secs = ttl.as_secs(), "sheets access token refreshed");
        Ok(CachedToken {
            token: body.access_token,
            expires_at: requested_at + ttl,
        })
    }
}

#[async_trait]
impl TokenSource for ServiceAccountAuth {
    async fn access_token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;
        if let Some(current) = cached.as_ref().filter(|t| t.usable_at(Instant::now())) {
            return Ok(current.token.clone());
        }

        let fresh = self.fetch_token().await?;
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::State, routing::post, Form, Json, Router};
    use jsonwebtoken::{DecodingKey, Validation};
    use serde_json::json;
    use std::{
        collections::HashMap,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
    };

    const TEST_PRIVATE_KEY: &str = include_str!("../testdata/service_account_key.pem");
    const TEST_PUBLIC_KEY: &str = include_str!("../testdata/service_account_pub.pem");
    const CLIENT_EMAIL: &str = "ledger@sgb-test.iam.gserviceaccount.com";

    #[derive(Deserialize)]
    struct SeenClaims {
        iss: String,
        scope: String,
        iat: i64,
        exp: i64,
    }

    struct TokenServer {
        expires_in: u64,
        issued: AtomicUsize,
        grants: std::sync::Mutex<Vec<SeenClaims>>,
        token_uri: std::sync::Mutex<String>,
    }

    async fn issue_token(
        State(server): State<Arc<TokenServer>>,
        Form(form): Form<HashMap<String, String>>,
    ) -> Json<serde_json::Value> {
        assert_eq!(form.get("grant_type").map(String::as_str), Some(JWT_BEARER_GRANT));

        let aud = server.token_uri.lock().unwrap().clone();
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[aud]);
        let key = DecodingKey::from_rsa_pem(TEST_PUBLIC_KEY.as_bytes()).unwrap();
        let claims = jsonwebtoken::decode::<SeenClaims>(&form["assertion"], &key, &validation)
            .unwrap()
            .claims;
        server.grants.lock().unwrap().push(claims);

        let n = server.issued.fetch_add(1, Ordering::SeqCst) + 1;
        Json(json!({
            "access_token": format!("ya29.token-{n}"),
            "expires_in": server.expires_in,
            "token_type": "Bearer"
        }))
    }

    async fn spawn_token_server(expires_in: u64) -> (Arc<TokenServer>, ServiceAccountAuth) {
        let server = Arc::new(TokenServer {
            expires_in,
            issued: AtomicUsize::new(0),
            grants: std::sync::Mutex::new(Vec::new()),
            token_uri: std::sync::Mutex::new(String::new()),
        });
        let app = Router::new()
            .route("/token", post(issue_token))
            .with_state(server.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let token_uri = format!("http://{addr}/token");
        *server.token_uri.lock().unwrap() = token_uri.clone();

        let key = ServiceAccountKey {
            client_email: CLIENT_EMAIL.to_string(),
            private_key: TEST_PRIVATE_KEY.to_string(),
            token_uri,
        };
        let auth = ServiceAccountAuth::new(key, Duration::from_secs(5)).unwrap();
        (server, auth)
    }

    #[test]
    fn cached_token_is_refreshed_ahead_of_expiry() {
        let now = Instant::now();
        let token = CachedToken {
            token: "t".to_string(),
            expires_at: now + Duration::from_secs(3600),
        };
        assert!(token.usable_at(now));
        let deadline = now + Duration::from_secs(3600) - REFRESH_MARGIN;
        assert!(token.usable_at(deadline - Duration::from_secs(1)));
        assert!(!token.usable_at(deadline));
        assert!(!token.usable_at(now + Duration::from_secs(4000)));
    }

    #[test]
    fn key_file_defaults_token_uri() {
        let key = ServiceAccountKey::from_json(
            &json!({
                "type": "service_account",
                "client_email": CLIENT_EMAIL,
                "private_key": TEST_PRIVATE_KEY,
                "project_id": "sgb-test"
            })
            .to_string(),
        )
        .unwrap();
        assert_eq!(key.token_uri, DEFAULT_TOKEN_URI);
        assert!(!format!("{key:?}").contains("PRIVATE KEY"));

        assert!(ServiceAccountKey::from_json("{}").is_err());
    }

    #[test]
    fn rejects_malformed_private_key() {
        let key = ServiceAccountKey {
            client_email: CLIENT_EMAIL.to_string(),
            private_key: "not a key".to_string(),
            token_uri: DEFAULT_TOKEN_URI.to_string(),
        };
        assert!(ServiceAccountAuth::new(key, Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn long_lived_token_is_reused() {
        let (server, auth) = spawn_token_server(3600).await;

        assert_eq!(auth.access_token().await.unwrap(), "ya29.token-1");
        assert_eq!(auth.access_token().await.unwrap(), "ya29.token-1");
        assert_eq!(server.issued.load(Ordering::SeqCst), 1);

        let grants = server.grants.lock().unwrap();
        assert_eq!(grants[0].iss, CLIENT_EMAIL);
        assert_eq!(grants[0].scope, SHEETS_SCOPE);
        assert_eq!(grants[0].exp - grants[0].iat, ASSERTION_TTL_SECS);
    }

    #[tokio::test]
    async fn token_inside_refresh_margin_is_replaced() {
        let (server, auth) = spawn_token_server(30).await;

        assert_eq!(auth.access_token().await.unwrap(), "ya29.token-1");
        assert_eq!(auth.access_token().await.unwrap(), "ya29.token-2");
        assert_eq!(server.issued.load(Ordering::SeqCst), 2);
    }
}
