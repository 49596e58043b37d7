//! Authentication module for AirflowLite
//!
//! Every UI page and API route is protected by HTTP Basic Auth against a
//! single configured user.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::Response,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::auth::logging::{log_auth_event, AuthEvent, AuthEventType};
use crate::config::AuthConfig;

pub mod logging;

pub const AUTH_REALM: &str = "Basic realm=\"Authentication Required\"";
pub const UNAUTHORIZED_BODY: &str = "Unauthorized Access";

/// The single user allowed to use the service.
/// Only a SHA-256 digest of the password is kept in memory.
#[derive(Clone)]
pub struct Credentials {
    username: String,
    password_digest: [u8; 32],
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

fn digest(password: &str) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(password.as_bytes()));
    out
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: &str) -> Self {
        Self {
            username: username.into(),
            password_digest: digest(password),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Check a username/password pair
    pub fn verify(&self, username: &str, password: &str) -> bool {
        let candidate = digest(password);
        // Compare every byte so timing does not depend on the mismatch position
        let same_password = candidate
            .iter()
            .zip(self.password_digest.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0;
        same_password && username == self.username
    }
}

impl From<&AuthConfig> for Credentials {
    fn from(config: &AuthConfig) -> Self {
        Self::new(config.username.clone(), &config.password)
    }
}

/// Decode an `Authorization: Basic ...` header value into user and password
pub fn parse_basic_header(value: &str) -> Option<(String, String)> {
    let encoded = value
        .strip_prefix("Basic ")
        .or_else(|| value.strip_prefix("basic "))?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

/// 401 response asking the browser for credentials
pub fn unauthorized() -> Response {
    let mut response = Response::new(Body::from(UNAUTHORIZED_BODY));
    *response.status_mut() = StatusCode::UNAUTHORIZED;
    response
        .headers_mut()
        .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static(AUTH_REALM));
    response
}

/// Basic Auth middleware for protected routes
pub async fn basic_auth(
    State(credentials): State<Arc<Credentials>>,
    req: Request,
    next: Next,
) -> Response {
    let start_time = std::time::Instant::now();
    let request_path = req.uri().path().to_string();

    let presented = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_basic_header);

    let Some((user, password)) = presented else {
        debug!("Missing or malformed Authorization header");
        log_auth_event(
            AuthEvent::new(AuthEventType::MissingCredentials, None, false)
                .with_details("Missing or malformed Basic Authorization header")
                .with_resource(request_path)
                .with_duration(start_time.elapsed().as_millis() as u64),
        );
        return unauthorized();
    };

    let accepted = credentials.verify(&user, &password);
    log_auth_event(
        AuthEvent::new(AuthEventType::BasicAuth, Some(&user), accepted)
            .with_details(if accepted {
                "Credentials accepted"
            } else {
                "Invalid username or password"
            })
            .with_resource(request_path)
            .with_duration(start_time.elapsed().as_millis() as u64),
    );

    if accepted {
        next.run(req).await
    } else {
        unauthorized()
    }
}

/// Apply CORS and the standard security headers to the router
pub fn configure_security(app: axum::Router) -> axum::Router {
    use axum::http::{HeaderName, Method};
    use tower_http::cors::{Any, CorsLayer};
    use tower_http::set_header::SetResponseHeaderLayer;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
        .max_age(std::time::Duration::from_secs(3600));

    let security_headers = tower::ServiceBuilder::new()
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::CONTENT_SECURITY_POLICY,
            HeaderValue::from_static(
                "default-src 'self'; script-src 'self' 'unsafe-inline'; connect-src 'self'; img-src 'self' data:; style-src 'self' 'unsafe-inline'; frame-ancestors 'none'; form-action 'self'; base-uri 'self'",
            ),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            HeaderName::from_static("referrer-policy"),
            HeaderValue::from_static("strict-origin-when-cross-origin"),
        ));

    app.layer(cors).layer(security_headers)
}
