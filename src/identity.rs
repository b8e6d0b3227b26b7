//! Google API identity selection.
//!
//! For one tool call the first available of these wins:
//!
//! 1. a usable OAuth token persisted for `ctx.user_id`
//! 2. the shared service-account key with domain-wide delegation, exchanged
//!    through an RS256 JWT bearer grant
//!
//! The chosen identity is memoized in a [`CallIdentity`] that lives exactly
//! as long as the call. Nothing is cached across calls.

use crate::executor::{HttpRequest, RequestExecutor};
use crate::resolver::ResolvedConfig;
use crate::store::TokenStore;
use crate::types::{CallContext, Error, Result};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::OnceCell;

pub const GOOGLE_PROVIDER: &str = "google";
pub const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
pub const GMAIL_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/gmail.readonly";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
/// Tokens expiring sooner than this are treated as expired.
const TOKEN_EXPIRY_SKEW_SECS: i64 = 60;

#[derive(Debug, Clone, Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    #[serde(default)]
    private_key_id: Option<String>,
    #[serde(default)]
    token_uri: Option<String>,
}

#[derive(Debug, Serialize)]
struct GrantClaims<'a> {
    iss: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sub: Option<&'a str>,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Where an access token came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IdentitySource {
    UserToken { user_id: String },
    ServiceAccount { client_email: String, subject: Option<String> },
}

#[derive(Clone)]
pub struct GoogleIdentity {
    access_token: String,
    pub source: IdentitySource,
}

impl fmt::Debug for GoogleIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GoogleIdentity")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

impl GoogleIdentity {
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

/// Selects and obtains Google credentials.
#[derive(Clone)]
pub struct IdentityResolver {
    tokens: Arc<dyn TokenStore>,
    executor: RequestExecutor,
}

impl fmt::Debug for IdentityResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityResolver").finish_non_exhaustive()
    }
}

impl IdentityResolver {
    pub fn new(tokens: Arc<dyn TokenStore>, executor: RequestExecutor) -> Self {
        Self { tokens, executor }
    }

    /// `mailbox` overrides the configured delegated user as JWT subject.
    pub async fn resolve(
        &self,
        config: &ResolvedConfig,
        ctx: &CallContext,
        mailbox: Option<&str>,
    ) -> Result<GoogleIdentity> {
        if let Some(user_id) = &ctx.user_id {
            match self.tokens.find_token(user_id.as_str(), GOOGLE_PROVIDER).await? {
                Some(token) if token.is_usable(chrono::Utc::now(), TOKEN_EXPIRY_SKEW_SECS) => {
                    tracing::debug!(user_id = %user_id, "using persisted oauth token");
                    return Ok(GoogleIdentity {
                        access_token: token.access_token,
                        source: IdentitySource::UserToken {
                            user_id: user_id.to_string(),
                        },
                    });
                }
                Some(_) => tracing::debug!(user_id = %user_id, "persisted oauth token expired"),
                None => {}
            }
        }

        let Some(raw_key) = config.get("service_account_json") else {
            return Err(Error::config_missing(GOOGLE_PROVIDER));
        };
        let key: ServiceAccountKey = serde_json::from_str(raw_key)
            .map_err(|_| Error::validation("service_account_json_invalid"))?;
        let subject = mailbox.or_else(|| config.get("delegated_user"));
        self.exchange_service_account(&key, subject).await
    }

    async fn exchange_service_account(
        &self,
        key: &ServiceAccountKey,
        subject: Option<&str>,
    ) -> Result<GoogleIdentity> {
        let token_uri = key.token_uri.as_deref().unwrap_or(GOOGLE_TOKEN_URI);
        let assertion = sign_assertion(key, subject, token_uri, chrono::Utc::now().timestamp())?;

        let response = self
            .executor
            .send_checked(HttpRequest::post(token_uri).form(vec![
                ("grant_type".to_string(), JWT_BEARER_GRANT.to_string()),
                ("assertion".to_string(), assertion),
            ]))
            .await?;
        let status = response.status;
        let token: TokenResponse = serde_json::from_value(response.body)
            .map_err(|_| Error::upstream(status, "token response missing access_token"))?;

        tracing::debug!(client_email = %key.client_email, subject = ?subject, "service account token issued");
        Ok(GoogleIdentity {
            access_token: token.access_token,
            source: IdentitySource::ServiceAccount {
                client_email: key.client_email.clone(),
                subject: subject.map(str::to_string),
            },
        })
    }
}

fn sign_assertion(
    key: &ServiceAccountKey,
    subject: Option<&str>,
    audience: &str,
    now: i64,
) -> Result<String> {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = key.private_key_id.clone();
    let claims = GrantClaims {
        iss: &key.client_email,
        sub: subject,
        scope: GMAIL_READONLY_SCOPE,
        aud: audience,
        iat: now,
        exp: now + ASSERTION_LIFETIME_SECS,
    };
    let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
        .map_err(|_| Error::validation("service_account_json_invalid"))?;
    jsonwebtoken::encode(&header, &claims, &encoding_key)
        .map_err(|e| Error::internal(format!("failed to sign assertion: {}", e)))
}

/// Identity for a single tool call, obtained on first use.
pub struct CallIdentity<'a> {
    resolver: &'a IdentityResolver,
    config: &'a ResolvedConfig,
    ctx: &'a CallContext,
    mailbox: Option<&'a str>,
    cell: OnceCell<GoogleIdentity>,
}

impl fmt::Debug for CallIdentity<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallIdentity")
            .field("resolved", &self.cell.initialized())
            .finish_non_exhaustive()
    }
}

impl<'a> CallIdentity<'a> {
    pub fn new(
        resolver: &'a IdentityResolver,
        config: &'a ResolvedConfig,
        ctx: &'a CallContext,
        mailbox: Option<&'a str>,
    ) -> Self {
        Self {
            resolver,
            config,
            ctx,
            mailbox,
            cell: OnceCell::new(),
        }
    }

    pub async fn get(&self) -> Result<&GoogleIdentity> {
        self.cell
            .get_or_try_init(|| self.resolver.resolve(self.config, self.ctx, self.mailbox))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{AdapterFamily, ConfigResolver, MapEnv};
    use crate::store::{MockSystemStore, MockTokenStore, OAuthToken};
    use crate::types::ExecutorConfig;
    use axum::routing::post;
    use axum::{Form, Json, Router};
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TEST_KEY: &str = include_str!("../tests/fixtures/service_account_key.pem");

    fn executor() -> RequestExecutor {
        RequestExecutor::new(&ExecutorConfig::default()).unwrap()
    }

    async fn google_config(key: Option<Value>) -> ResolvedConfig {
        let mut args = json!({"delegated_user": "ops@example.com"});
        if let Some(key) = key {
            args["service_account_json"] = Value::String(key.to_string());
        }
        ConfigResolver::new(Arc::new(MockSystemStore::new()), Arc::new(MapEnv::new()))
            .resolve(AdapterFamily::Google, &args, &CallContext::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_user_token_preferred() {
        let mut tokens = MockTokenStore::new();
        tokens.expect_find_token().times(1).returning(|user, provider| {
            Ok(Some(OAuthToken {
                user_id: user.to_string(),
                provider: provider.to_string(),
                access_token: "ya29.user".to_string(),
                refresh_token: None,
                expires_at: None,
                scope: None,
            }))
        });
        let resolver = IdentityResolver::new(Arc::new(tokens), executor());
        let config = google_config(None).await;
        let ctx = CallContext::new().with_user("u1");

        let identity = resolver.resolve(&config, &ctx, None).await.unwrap();
        assert_eq!(identity.bearer(), "Bearer ya29.user");
        assert_eq!(identity.source, IdentitySource::UserToken { user_id: "u1".to_string() });
    }

    #[tokio::test]
    async fn test_nothing_available_is_config_missing() {
        let mut tokens = MockTokenStore::new();
        tokens.expect_find_token().returning(|_, _| Ok(None));
        let resolver = IdentityResolver::new(Arc::new(tokens), executor());
        let config = google_config(None).await;
        let ctx = CallContext::new().with_user("u1");

        let err = resolver.resolve(&config, &ctx, None).await.unwrap_err();
        assert!(matches!(err, Error::ConfigMissing(ref a) if a == "google"));
    }

    #[tokio::test]
    async fn test_service_account_grant_memoized_per_call() {
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = hits.clone();
        let app = Router::new().route(
            "/token",
            post(move |Form(form): Form<HashMap<String, String>>| {
                let seen = seen.clone();
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    assert_eq!(form["grant_type"], JWT_BEARER_GRANT);
                    let payload = form["assertion"].split('.').nth(1).unwrap().to_string();
                    let claims: Value =
                        serde_json::from_slice(&URL_SAFE_NO_PAD.decode(payload).unwrap()).unwrap();
                    assert_eq!(claims["sub"], "boss@example.com");
                    assert_eq!(claims["iss"], "robot@example.iam.gserviceaccount.com");
                    Json(json!({"access_token": "ya29.sa", "expires_in": 3600}))
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let key = json!({
            "client_email": "robot@example.iam.gserviceaccount.com",
            "private_key": TEST_KEY,
            "private_key_id": "k1",
            "token_uri": format!("http://{}/token", addr),
        });
        let config = google_config(Some(key)).await;
        let resolver = IdentityResolver::new(Arc::new(MockTokenStore::new()), executor());
        let ctx = CallContext::new();

        let identity = CallIdentity::new(&resolver, &config, &ctx, Some("boss@example.com"));
        let first = identity.get().await.unwrap().bearer();
        let second = identity.get().await.unwrap().bearer();
        assert_eq!(first, "Bearer ya29.sa");
        assert_eq!(first, second);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_malformed_key_rejected() {
        let key = ServiceAccountKey {
            client_email: "a@b".to_string(),
            private_key: "not a pem".to_string(),
            private_key_id: None,
            token_uri: None,
        };
        let err = sign_assertion(&key, None, GOOGLE_TOKEN_URI, 0).unwrap_err();
        assert_eq!(err.to_string(), "service_account_json_invalid");
    }
}
