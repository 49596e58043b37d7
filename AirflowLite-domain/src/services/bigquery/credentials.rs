//! Google OAuth2 access tokens for the BigQuery REST API.
//!
//! Two sources are supported:
//! - a service account key file (JWT bearer grant, RS256 signed)
//! - the GCE / Cloud Run metadata server

use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::services::query::QueryError;

pub const BIGQUERY_SCOPE: &str = "https://www.googleapis.com/auth/bigquery";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const METADATA_BASE: &str = "http://metadata.google.internal/computeMetadata/v1";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Tokens are refreshed this long before they expire
const REFRESH_MARGIN_SECS: i64 = 60;

/// The fields of a service account key file that we need
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    pub project_id: Option<String>,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// Claims of the self-signed assertion exchanged for an access token
#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(REFRESH_MARGIN_SECS) < self.expires_at
    }
}

#[derive(Debug, Clone)]
enum TokenSource {
    ServiceAccount(ServiceAccountKey),
    MetadataServer,
}

/// Access token provider with an in-process cache
#[derive(Debug)]
pub struct GoogleCredentials {
    source: TokenSource,
    http: reqwest::Client,
    metadata_base: String,
    cached: Mutex<Option<CachedToken>>,
}

impl GoogleCredentials {
    /// Use the key at `key_path` when it exists, the metadata server otherwise
    pub fn discover(key_path: &Path, http: reqwest::Client) -> Result<Self, QueryError> {
        if key_path.exists() {
            info!("Using service account key from {}", key_path.display());
            let raw = std::fs::read_to_string(key_path).map_err(|e| {
                QueryError::Auth(format!("Failed to read {}: {}", key_path.display(), e))
            })?;
            let key = parse_service_account_key(&raw)?;
            Ok(Self::with_source(TokenSource::ServiceAccount(key), http))
        } else {
            warn!(
                "Service account key file not found at {}. Attempting default credentials.",
                key_path.display()
            );
            Ok(Self::with_source(TokenSource::MetadataServer, http))
        }
    }

    fn with_source(source: TokenSource, http: reqwest::Client) -> Self {
        Self {
            source,
            http,
            metadata_base: METADATA_BASE.to_string(),
            cached: Mutex::new(None),
        }
    }

    /// Query another metadata server (emulators, tests)
    pub fn with_metadata_base(mut self, base: impl Into<String>) -> Self {
        self.metadata_base = base.into().trim_end_matches('/').to_string();
        self
    }

    /// Project recorded in the key file, if any
    pub fn key_project_id(&self) -> Option<&str> {
        match &self.source {
            TokenSource::ServiceAccount(key) => key.project_id.as_deref(),
            TokenSource::MetadataServer => None,
        }
    }

    /// Project of the instance, as reported by the metadata server
    pub async fn metadata_project_id(&self) -> Result<String, QueryError> {
        let response = self
            .http
            .get(format!("{}/project/project-id", self.metadata_base))
            .header("Metadata-Flavor", "Google")
            .send()
            .await?
            .error_for_status()?;
        Ok(response.text().await?.trim().to_string())
    }

    /// A valid access token, fetched or refreshed when needed
    pub async fn access_token(&self) -> Result<String, QueryError> {
        let mut cached = self.cached.lock().await;
        let now = Utc::now();

        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(now)) {
            return Ok(token.token.clone());
        }

        let fresh = self.fetch_token(now).await?;
        debug!("Obtained access token valid until {}", fresh.expires_at);
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }

    async fn fetch_token(&self, now: DateTime<Utc>) -> Result<CachedToken, QueryError> {
        let request = match &self.source {
            TokenSource::ServiceAccount(key) => {
                let assertion = sign_assertion(key, now)?;
                self.http
                    .post(&key.token_uri)
                    .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            }
            TokenSource::MetadataServer => self
                .http
                .get(format!(
                    "{}/instance/service-accounts/default/token",
                    self.metadata_base
                ))
                .query(&[("scopes", BIGQUERY_SCOPE)])
                .header("Metadata-Flavor", "Google"),
        };

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(QueryError::Auth(format!(
                "Token endpoint returned {}: {}",
                status, body
            )));
        }

        let token: TokenResponse = response.json().await?;
        Ok(CachedToken {
            token: token.access_token,
            expires_at: now + Duration::seconds(token.expires_in),
        })
    }
}

pub fn parse_service_account_key(raw: &str) -> Result<ServiceAccountKey, QueryError> {
    serde_json::from_str(raw)
        .map_err(|e| QueryError::Auth(format!("Invalid service account key: {}", e)))
}

/// Build the RS256 assertion for the JWT bearer grant
fn sign_assertion(key: &ServiceAccountKey, now: DateTime<Utc>) -> Result<String, QueryError> {
    let iat = now.timestamp();
    let claims = AssertionClaims {
        iss: &key.client_email,
        scope: BIGQUERY_SCOPE,
        aud: &key.token_uri,
        iat,
        exp: iat + 3600,
    };

    let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
        .map_err(|e| QueryError::Auth(format!("Invalid private key: {}", e)))?;

    encode(&Header::new(Algorithm::RS256), &claims, &encoding_key)
        .map_err(|e| QueryError::Auth(format!("Failed to sign assertion: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_defaults_token_uri() {
        let key = parse_service_account_key(
            r#"{"client_email": "runner@proj.iam.gserviceaccount.com", "private_key": "pem", "project_id": "proj"}"#,
        )
        .unwrap();
        assert_eq!(key.token_uri, "https://oauth2.googleapis.com/token");
        assert_eq!(key.project_id.as_deref(), Some("proj"));
    }

    #[test]
    fn test_invalid_key_is_auth_error() {
        assert!(matches!(
            parse_service_account_key("{}"),
            Err(QueryError::Auth(_))
        ));
    }

    #[test]
    fn test_bad_pem_is_auth_error() {
        let key = ServiceAccountKey {
            client_email: "runner@proj.iam.gserviceaccount.com".to_string(),
            private_key: "not a pem".to_string(),
            token_uri: DEFAULT_TOKEN_URI.to_string(),
            project_id: None,
        };
        assert!(matches!(sign_assertion(&key, Utc::now()), Err(QueryError::Auth(_))));
    }

    #[test]
    fn test_token_freshness_margin() {
        let now = Utc::now();
        let token = CachedToken {
            token: "t".to_string(),
            expires_at: now + Duration::seconds(30),
        };
        assert!(!token.is_fresh(now));

        let token = CachedToken {
            token: "t".to_string(),
            expires_at: now + Duration::seconds(3600),
        };
        assert!(token.is_fresh(now));
    }

    #[test]
    fn test_missing_key_falls_back_to_metadata_server() {
        let credentials =
            GoogleCredentials::discover(Path::new("/no/such/key.json"), reqwest::Client::new())
                .unwrap();
        assert!(credentials.key_project_id().is_none());
        assert!(matches!(credentials.source, TokenSource::MetadataServer));
    }

    mod metadata_server {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        use axum::{extract::State, http::HeaderMap, routing::get, Json, Router};
        use serde_json::json;

        use super::*;

        async fn serve(token_requests: Arc<AtomicUsize>) -> String {
            let router = Router::new()
                .route(
                    "/computeMetadata/v1/instance/service-accounts/default/token",
                    get(
                        |State(hits): State<Arc<AtomicUsize>>, headers: HeaderMap| async move {
                            assert_eq!(headers["metadata-flavor"], "Google");
                            hits.fetch_add(1, Ordering::SeqCst);
                            Json(json!({ "access_token": "meta-token", "expires_in": 3600 }))
                        },
                    ),
                )
                .route(
                    "/computeMetadata/v1/project/project-id",
                    get(|| async { "warehouse-prod\n" }),
                )
                .with_state(token_requests);

            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
            format!("http://{}/computeMetadata/v1", addr)
        }

        fn credentials(base: &str) -> GoogleCredentials {
            GoogleCredentials::discover(Path::new("/no/such/key.json"), reqwest::Client::new())
                .unwrap()
                .with_metadata_base(base)
        }

        #[tokio::test]
        async fn test_token_is_cached_between_requests() {
            let hits = Arc::new(AtomicUsize::new(0));
            let credentials = credentials(&serve(hits.clone()).await);

            assert_eq!(credentials.access_token().await.unwrap(), "meta-token");
            assert_eq!(credentials.access_token().await.unwrap(), "meta-token");
            assert_eq!(hits.load(Ordering::SeqCst), 1);
        }

        #[tokio::test]
        async fn test_expiring_token_is_refetched() {
            let hits = Arc::new(AtomicUsize::new(0));
            let credentials = credentials(&serve(hits.clone()).await);

            *credentials.cached.lock().await = Some(CachedToken {
                token: "stale".to_string(),
                expires_at: Utc::now() + Duration::seconds(10),
            });

            assert_eq!(credentials.access_token().await.unwrap(), "meta-token");
            assert_eq!(hits.load(Ordering::SeqCst), 1);
        }

        #[tokio::test]
        async fn test_project_id_is_trimmed() {
            let credentials = credentials(&serve(Arc::new(AtomicUsize::new(0))).await);
            assert_eq!(
                credentials.metadata_project_id().await.unwrap(),
                "warehouse-prod"
            );
        }
    }
}
