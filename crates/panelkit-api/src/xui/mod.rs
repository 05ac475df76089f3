// X-UI / 3x-ui REST client
//
// Auth: form login at `POST /login`, session cookie on every request.
// All inbound endpoints live under a configurable prefix
// (`panel/api/inbounds` on 3x-ui, `xui/API/inbounds` on older forks) and
// answer with the `{ success, msg, obj }` envelope.

pub mod models;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::http::{
    AuthSession, Authenticator, Credential, Envelope, RequestBody, SessionClient, SessionState,
    collect_cookies, error_message,
};
use crate::transport::TransportConfig;

pub use models::*;

/// Default inbound API prefix on 3x-ui.
pub const DEFAULT_API_PATH: &str = "panel/api/inbounds";

/// X-UI login flow.
pub struct XuiAuth {
    username: String,
    password: SecretString,
    ttl: Duration,
}

impl XuiAuth {
    pub fn new(username: impl Into<String>, password: SecretString, ttl: Duration) -> Self {
        Self {
            username: username.into(),
            password,
            ttl,
        }
    }
}

#[async_trait]
impl Authenticator for XuiAuth {
    async fn authenticate(
        &self,
        http: &reqwest::Client,
        base_url: &Url,
    ) -> Result<AuthSession, Error> {
        let url = base_url.join("login")?;
        debug!(%url, username = %self.username, "x-ui login");

        let form = [
            ("username", self.username.as_str()),
            ("password", self.password.expose_secret()),
        ];
        let resp = http.post(url).form(&form).send().await?;

        let status = resp.status();
        let cookie = collect_cookies(&resp);
        let body = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(Error::Authentication {
                message: format!("login failed (HTTP {status}): {}", error_message(&body, status)),
            });
        }

        let envelope: Envelope<serde_json::Value> =
            serde_json::from_str(&body).map_err(|_| Error::Authentication {
                message: "login returned a non-JSON body".into(),
            })?;
        if !envelope.success {
            return Err(Error::Authentication {
                message: envelope
                    .msg
                    .unwrap_or_else(|| "invalid username or password".into()),
            });
        }

        let cookie = cookie.ok_or_else(|| Error::Authentication {
            message: "login succeeded but no session cookie was set".into(),
        })?;
        Ok(AuthSession::with_ttl(
            Credential::Cookie(SecretString::from(cookie)),
            self.ttl,
        ))
    }
}

/// Raw client for the X-UI inbound API.
pub struct XuiClient {
    inner: SessionClient<XuiAuth>,
    api_path: String,
}

impl XuiClient {
    pub fn new(
        base_url: &Url,
        auth: XuiAuth,
        api_path: &str,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        Ok(Self {
            inner: SessionClient::new(base_url, auth, transport)?,
            api_path: api_path.trim_matches('/').to_owned(),
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

    fn api(&self, tail: &str) -> String {
        format!("{}/{tail}", self.api_path)
    }

    async fn get_obj<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, Error> {
        let envelope: Envelope<T> = self.inner.get(path).await?;
        envelope.into_result()
    }

    async fn post_obj<T: DeserializeOwned>(
        &self,
        path: &str,
        body: RequestBody,
    ) -> Result<Option<T>, Error> {
        let envelope: Envelope<T> = self.inner.post(path, body).await?;
        envelope.into_result()
    }

    // ── Inbounds ─────────────────────────────────────────────────────

    /// `GET {api}/list`
    pub async fn list_inbounds(&self) -> Result<Vec<Inbound>, Error> {
        Ok(self.get_obj(&self.api("list")).await?.unwrap_or_default())
    }

    /// `GET {api}/get/{id}`
    pub async fn get_inbound(&self, inbound_id: i64) -> Result<Inbound, Error> {
        self.get_obj(&self.api(&format!("get/{inbound_id}")))
            .await?
            .ok_or_else(|| Error::Panel {
                message: format!("inbound {inbound_id} not found"),
            })
    }

    // ── Clients ──────────────────────────────────────────────────────

    /// `POST {api}/addClient`
    pub async fn add_client(&self, inbound_id: i64, client: &InboundClient) -> Result<(), Error> {
        let payload = ClientPayload::new(inbound_id, std::slice::from_ref(client))?;
        let _: Option<serde_json::Value> = self
            .post_obj(&self.api("addClient"), json_body(&payload)?)
            .await?;
        Ok(())
    }

    /// `POST {api}/updateClient/{clientKey}`
    pub async fn update_client(
        &self,
        inbound_id: i64,
        client_key: &str,
        client: &InboundClient,
    ) -> Result<(), Error> {
        let payload = ClientPayload::new(inbound_id, std::slice::from_ref(client))?;
        let path = self.api(&format!("updateClient/{}", encode(client_key)));
        let _: Option<serde_json::Value> = self.post_obj(&path, json_body(&payload)?).await?;
        Ok(())
    }

    /// `POST {api}/{inboundId}/delClient/{clientKey}`
    pub async fn delete_client(&self, inbound_id: i64, client_key: &str) -> Result<(), Error> {
        let path = self.api(&format!("{inbound_id}/delClient/{}", encode(client_key)));
        let _: Option<serde_json::Value> = self.post_obj(&path, RequestBody::Empty).await?;
        Ok(())
    }

    /// `POST {api}/{inboundId}/resetClientTraffic/{email}`
    pub async fn reset_client_traffic(&self, inbound_id: i64, email: &str) -> Result<(), Error> {
        let path = self.api(&format!("{inbound_id}/resetClientTraffic/{}", encode(email)));
        let _: Option<serde_json::Value> = self.post_obj(&path, RequestBody::Empty).await?;
        Ok(())
    }

    /// `GET {api}/getClientTraffics/{email}`. `None` when the panel has no
    /// counters for that email.
    pub async fn client_traffic(&self, email: &str) -> Result<Option<ClientTraffic>, Error> {
        self.get_obj(&self.api(&format!("getClientTraffics/{}", encode(email))))
            .await
    }

    // ── Server ───────────────────────────────────────────────────────

    /// `POST /server/status`
    pub async fn server_status(&self) -> Result<ServerStatus, Error> {
        Ok(self
            .post_obj("server/status", RequestBody::Empty)
            .await?
            .unwrap_or_default())
    }
}

fn json_body<T: serde::Serialize>(value: &T) -> Result<RequestBody, Error> {
    serde_json::to_value(value)
        .map(RequestBody::Json)
        .map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body: String::new(),
        })
}

/// Percent-encode one path segment.
fn encode(segment: &str) -> String {
    url::form_urlencoded::byte_serialize(segment.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> XuiClient {
        let base = Url::parse(&server.uri()).unwrap();
        let auth = XuiAuth::new("admin", SecretString::from("pw".to_owned()), Duration::from_secs(600));
        XuiClient::new(&base, auth, DEFAULT_API_PATH, &TransportConfig::default()).unwrap()
    }

    async fn mount_login(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/login"))
            .and(body_string_contains("username=admin"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("set-cookie", "3x-ui=abc123; Path=/; HttpOnly")
                    .set_body_json(serde_json::json!({ "success": true, "msg": "Login Successfully" })),
            )
            .expect(1)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn list_inbounds_sends_session_cookie() {
        let server = MockServer::start().await;
        mount_login(&server).await;

        Mock::given(method("GET"))
            .and(path("/panel/api/inbounds/list"))
            .and(header("cookie", "3x-ui=abc123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "obj": [{
                    "id": 1, "remark": "main", "port": 443, "protocol": "vless",
                    "settings": "{\"clients\":[{\"id\":\"u1\",\"email\":\"alice\"}]}",
                    "streamSettings": "{\"network\":\"tcp\"}",
                    "clientStats": [{ "email": "alice", "up": 5, "down": 7 }]
                }]
            })))
            .mount(&server)
            .await;

        let xui = client(&server);
        let inbounds = xui.list_inbounds().await.unwrap();
        assert_eq!(inbounds.len(), 1);
        assert_eq!(inbounds[0].parsed_settings().unwrap().clients[0].email, "alice");
        assert_eq!(inbounds[0].stats_for("alice").unwrap().down, 7);
        assert_eq!(xui.session_state(), SessionState::Authenticated);
    }

    #[tokio::test]
    async fn failed_login_is_authentication_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({ "success": false, "msg": "Invalid username or password" }),
            ))
            .mount(&server)
            .await;

        let err = client(&server).list_inbounds().await.unwrap_err();
        assert!(
            matches!(err, Error::Authentication { ref message } if message.contains("Invalid")),
            "got {err:?}"
        );
    }

    #[tokio::test]
    async fn envelope_failure_surfaces_panel_message() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        Mock::given(method("POST"))
            .and(path("/panel/api/inbounds/addClient"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({ "success": false, "msg": "Duplicate email: alice" }),
            ))
            .mount(&server)
            .await;

        let client_entry: InboundClient =
            serde_json::from_str(r#"{"id":"u1","email":"alice"}"#).unwrap();
        let err = client(&server).add_client(1, &client_entry).await.unwrap_err();
        assert_eq!(err.backend_message(), Some("Duplicate email: alice"));
    }

    #[test]
    fn path_segments_are_encoded() {
        assert_eq!(encode("a b@c"), "a%20b%40c");
    }
}
