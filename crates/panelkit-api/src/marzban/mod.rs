// Marzban REST client
//
// Auth: OAuth2 password form at `POST /api/admin/token`, bearer token on
// every request. The token is a JWT; its `exp` claim is used as the session
// expiry when readable, otherwise a fixed TTL applies.

pub mod models;

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, TimeDelta, Utc};
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::http::{
    AuthSession, Authenticator, Credential, RequestBody, SessionClient, SessionState,
    error_message, read_json,
};
use crate::transport::TransportConfig;

pub use models::*;

/// Seconds shaved off a JWT `exp` so a token is refreshed before the panel
/// starts rejecting it.
const EXPIRY_MARGIN_SECS: i64 = 30;

/// Marzban login flow.
pub struct MarzbanAuth {
    username: String,
    password: SecretString,
    fallback_ttl: Duration,
}

impl MarzbanAuth {
    pub fn new(
        username: impl Into<String>,
        password: SecretString,
        fallback_ttl: Duration,
    ) -> Self {
        Self {
            username: username.into(),
            password,
            fallback_ttl,
        }
    }
}

#[async_trait]
impl Authenticator for MarzbanAuth {
    async fn authenticate(
        &self,
        http: &reqwest::Client,
        base_url: &Url,
    ) -> Result<AuthSession, Error> {
        let url = base_url.join("api/admin/token")?;
        debug!(%url, username = %self.username, "requesting admin token");

        let form = [
            ("grant_type", "password"),
            ("username", self.username.as_str()),
            ("password", self.password.expose_secret()),
        ];
        let resp = http.post(url).form(&form).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Authentication {
                message: format!("token request failed (HTTP {status}): {}", error_message(&body, status)),
            });
        }

        let token: TokenResponse = read_json(resp).await?;
        let expires_at = jwt_expiry(&token.access_token);
        let credential = Credential::Bearer(SecretString::from(token.access_token));

        Ok(match expires_at {
            Some(at) => AuthSession::with_expiry(credential, at),
            None => AuthSession::with_ttl(credential, self.fallback_ttl),
        })
    }
}

/// Read the `exp` claim of a JWT without verifying it.
pub fn jwt_expiry(token: &str) -> Option<DateTime<Utc>> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    let exp = claims.get("exp")?.as_i64()?;
    DateTime::from_timestamp(exp, 0)?.checked_sub_signed(TimeDelta::seconds(EXPIRY_MARGIN_SECS))
}

/// Raw client for the Marzban admin API.
pub struct MarzbanClient {
    inner: SessionClient<MarzbanAuth>,
}

impl MarzbanClient {
    pub fn new(
        base_url: &Url,
        auth: MarzbanAuth,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        Ok(Self {
            inner: SessionClient::new(base_url, auth, transport)?,
        })
    }

    pub fn base_url(&self) -> &Url {
        self.inner.base_url()
    }

    pub fn session_state(&self) -> SessionState {
        self.inner.session_state()
    }

    pub async fn session_issued_at(&self) -> Option<DateTime<Utc>> {
        self.inner.session_issued_at().await
    }

    pub async fn disconnect(&self) {
        self.inner.disconnect().await;
    }

    // ── System ───────────────────────────────────────────────────────

    /// `GET /api/system`
    pub async fn get_system(&self) -> Result<SystemStats, Error> {
        self.inner.get("api/system").await
    }

    /// `GET /api/inbounds`
    pub async fn get_inbounds(&self) -> Result<InboundsByProtocol, Error> {
        self.inner.get("api/inbounds").await
    }

    // ── Users ────────────────────────────────────────────────────────

    /// `GET /api/user/{username}`
    pub async fn get_user(&self, username: &str) -> Result<MarzbanUser, Error> {
        self.inner.get(&user_path(username, "")).await
    }

    /// `GET /api/users?offset=&limit=`
    pub async fn list_users(&self, offset: u64, limit: u64) -> Result<UsersResponse, Error> {
        self.inner
            .get_with_params(
                "api/users",
                &[("offset", offset.to_string()), ("limit", limit.to_string())],
            )
            .await
    }

    /// `POST /api/user`
    pub async fn create_user(&self, body: &UserCreate) -> Result<MarzbanUser, Error> {
        let body = serde_json::to_value(body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body: String::new(),
        })?;
        self.inner.post("api/user", RequestBody::Json(body)).await
    }

    /// `PUT /api/user/{username}`
    pub async fn modify_user(
        &self,
        username: &str,
        body: &UserModify,
    ) -> Result<MarzbanUser, Error> {
        let body = serde_json::to_value(body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body: String::new(),
        })?;
        self.inner
            .put(&user_path(username, ""), RequestBody::Json(body))
            .await
    }

    /// `DELETE /api/user/{username}`
    pub async fn delete_user(&self, username: &str) -> Result<(), Error> {
        let _: serde_json::Value = self.inner.delete(&user_path(username, "")).await?;
        Ok(())
    }

    /// `POST /api/user/{username}/reset`
    pub async fn reset_user(&self, username: &str) -> Result<MarzbanUser, Error> {
        self.inner
            .post(&user_path(username, "/reset"), RequestBody::Empty)
            .await
    }

    /// `GET /api/user/{username}/usage`
    pub async fn user_usage(&self, username: &str) -> Result<UserUsageResponse, Error> {
        self.inner.get(&user_path(username, "/usage")).await
    }
}

fn user_path(username: &str, suffix: &str) -> String {
    let encoded = url::form_urlencoded::byte_serialize(username.as_bytes())
        .collect::<String>()
        .replace('+', "%20");
    format!("api/user/{encoded}{suffix}")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn jwt_with(claims: &serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let body = URL_SAFE_NO_PAD.encode(claims.to_string());
        format!("{header}.{body}.signature")
    }

    #[test]
    fn jwt_exp_is_read_with_margin() {
        let token = jwt_with(&serde_json::json!({ "sub": "admin", "exp": 1_900_000_000 }));
        let expiry = jwt_expiry(&token).unwrap();
        assert_eq!(expiry.timestamp(), 1_900_000_000 - EXPIRY_MARGIN_SECS);
    }

    #[test]
    fn opaque_token_has_no_expiry() {
        assert_eq!(jwt_expiry("not-a-jwt"), None);
        assert_eq!(jwt_expiry("a.!!!.c"), None);
    }

    #[test]
    fn user_path_encodes_username() {
        assert_eq!(user_path("alice", "/reset"), "api/user/alice/reset");
        assert_eq!(user_path("a b", ""), "api/user/a%20b");
    }
}
