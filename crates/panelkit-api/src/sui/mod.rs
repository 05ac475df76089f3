// S-UI REST client
//
// Two auth modes:
// - password: form login at `POST /api/login` (`user`, `pass`), session cookie
// - token: static `Token` header against the `/apiv2` tree, no login call
//
// Writes go through a single `POST {api}/save` endpoint taking
// `object`, `action` and a JSON `data` field.

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

const STATUS_SECTIONS: &str = "cpu,mem,net,sys,sbd";

/// S-UI credentials.
pub enum SuiAuth {
    Password {
        username: String,
        password: SecretString,
        ttl: Duration,
    },
    Token(SecretString),
}

impl SuiAuth {
    /// API prefix matching this auth mode.
    pub fn default_api_path(&self) -> &'static str {
        match self {
            Self::Password { .. } => "api",
            Self::Token(_) => "apiv2",
        }
    }
}

#[async_trait]
impl Authenticator for SuiAuth {
    async fn authenticate(
        &self,
        http: &reqwest::Client,
        base_url: &Url,
    ) -> Result<AuthSession, Error> {
        let (username, password, ttl) = match self {
            Self::Token(token) => {
                return Ok(AuthSession::unbounded(Credential::Header {
                    name: "Token",
                    value: token.clone(),
                }));
            }
            Self::Password {
                username,
                password,
                ttl,
            } => (username, password, *ttl),
        };

        let url = base_url.join("api/login")?;
        debug!(%url, username = %username, "s-ui login");

        let form = [
            ("user", username.as_str()),
            ("pass", password.expose_secret()),
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
                message: envelope.msg.unwrap_or_else(|| "invalid login".into()),
            });
        }

        let cookie = cookie.ok_or_else(|| Error::Authentication {
            message: "login succeeded but no session cookie was set".into(),
        })?;
        Ok(AuthSession::with_ttl(
            Credential::Cookie(SecretString::from(cookie)),
            ttl,
        ))
    }
}

/// Raw client for the S-UI API.
pub struct SuiApiClient {
    inner: SessionClient<SuiAuth>,
    api_path: String,
}

impl SuiApiClient {
    /// `api_path` of `None` picks the prefix matching the auth mode.
    pub fn new(
        base_url: &Url,
        auth: SuiAuth,
        api_path: Option<&str>,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let api_path = api_path
            .unwrap_or(auth.default_api_path())
            .trim_matches('/')
            .to_owned();
        Ok(Self {
            inner: SessionClient::new(base_url, auth, transport)?,
            api_path,
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

    async fn get_obj<T: DeserializeOwned + Default>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, Error> {
        let envelope: Envelope<T> = self.inner.get_with_params(path, params).await?;
        Ok(envelope.into_result()?.unwrap_or_default())
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// `GET {api}/clients`
    pub async fn list_clients(&self) -> Result<Vec<SuiClient>, Error> {
        let payload: ClientsPayload = self.get_obj(&self.api("clients"), &[]).await?;
        Ok(payload.clients)
    }

    /// `GET {api}/inbounds`
    pub async fn list_inbounds(&self) -> Result<Vec<SuiInbound>, Error> {
        let payload: InboundsPayload = self.get_obj(&self.api("inbounds"), &[]).await?;
        Ok(payload.inbounds)
    }

    /// `GET {api}/status?r=cpu,mem,net,sys,sbd`
    pub async fn status(&self) -> Result<SuiStatus, Error> {
        self.get_obj(&self.api("status"), &[("r", STATUS_SECTIONS.to_owned())])
            .await
    }

    // ── Writes ───────────────────────────────────────────────────────

    /// `POST {api}/save` with `object=clients`.
    pub async fn save_client(&self, action: SaveAction, client: &SuiClient) -> Result<(), Error> {
        let data = match action {
            SaveAction::Delete => client.id.to_string(),
            SaveAction::New | SaveAction::Edit => {
                serde_json::to_string(client).map_err(|e| Error::Deserialization {
                    message: e.to_string(),
                    body: String::new(),
                })?
            }
        };
        self.save("clients", action, data).await
    }

    async fn save(&self, object: &str, action: SaveAction, data: String) -> Result<(), Error> {
        let form = vec![
            ("object".to_owned(), object.to_owned()),
            ("action".to_owned(), action.as_str().to_owned()),
            ("data".to_owned(), data),
        ];
        let envelope: Envelope<serde_json::Value> = self
            .inner
            .post(&self.api("save"), RequestBody::Form(form))
            .await?;
        envelope.into_result()?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn token_client(server: &MockServer) -> SuiApiClient {
        let base = Url::parse(&server.uri()).unwrap();
        let auth = SuiAuth::Token(SecretString::from("tok".to_owned()));
        SuiApiClient::new(&base, auth, None, &TransportConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn token_mode_uses_header_and_apiv2() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/apiv2/clients"))
            .and(header("Token", "tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "obj": { "clients": [{ "id": 1, "name": "alice", "up": 1, "down": 2 }] }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let clients = token_client(&server).list_clients().await.unwrap();
        assert_eq!(clients[0].name, "alice");
    }

    #[tokio::test]
    async fn password_mode_logs_in_with_user_and_pass() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/login"))
            .and(body_string_contains("user=admin"))
            .and(body_string_contains("pass=pw"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("set-cookie", "s-ui=xyz; Path=/")
                    .set_body_json(serde_json::json!({ "success": true })),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/status"))
            .and(query_param("r", STATUS_SECTIONS))
            .and(header("cookie", "s-ui=xyz"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "obj": { "cpu": 3.0, "sys": { "appVersion": "1.2.0" }, "sbd": { "running": true } }
            })))
            .mount(&server)
            .await;

        let base = Url::parse(&server.uri()).unwrap();
        let auth = SuiAuth::Password {
            username: "admin".into(),
            password: SecretString::from("pw".to_owned()),
            ttl: Duration::from_secs(600),
        };
        let client = SuiApiClient::new(&base, auth, None, &TransportConfig::default()).unwrap();
        let status = client.status().await.unwrap();
        assert_eq!(status.sys.app_version, "1.2.0");
        assert!(status.sbd.running);
    }

    #[tokio::test]
    async fn delete_sends_bare_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/apiv2/save"))
            .and(body_string_contains("object=clients"))
            .and(body_string_contains("action=del"))
            .and(body_string_contains("data=7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "success": true })))
            .expect(1)
            .mount(&server)
            .await;

        let client: SuiClient = serde_json::from_value(serde_json::json!({ "id": 7, "name": "bob" })).unwrap();
        token_client(&server)
            .save_client(SaveAction::Delete, &client)
            .await
            .unwrap();
    }
}
