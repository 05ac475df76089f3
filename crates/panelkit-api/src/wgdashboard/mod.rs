// WGDashboard REST client
//
// Auth: an API key in the `wg-dashboard-apikey` header, or a password login
// at `POST /api/authenticate` that sets a session cookie. Every peer
// operation is scoped to one WireGuard configuration (interface) name.

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
    AuthSession, Authenticator, Credential, RequestBody, SessionClient, SessionState,
    collect_cookies, error_message,
};
use crate::transport::TransportConfig;

pub use models::*;

const API_KEY_HEADER: &str = "wg-dashboard-apikey";

/// WGDashboard credentials.
pub enum WgAuth {
    ApiKey(SecretString),
    Password {
        username: String,
        password: SecretString,
        ttl: Duration,
    },
}

#[async_trait]
impl Authenticator for WgAuth {
    async fn authenticate(
        &self,
        http: &reqwest::Client,
        base_url: &Url,
    ) -> Result<AuthSession, Error> {
        let (username, password, ttl) = match self {
            Self::ApiKey(key) => {
                return Ok(AuthSession::unbounded(Credential::Header {
                    name: API_KEY_HEADER,
                    value: key.clone(),
                }));
            }
            Self::Password {
                username,
                password,
                ttl,
            } => (username, password, *ttl),
        };

        let url = base_url.join("api/authenticate")?;
        debug!(%url, username = %username, "wgdashboard login");

        let body = serde_json::json!({
            "username": username,
            "password": password.expose_secret(),
            "totp": "",
        });
        let resp = http.post(url).json(&body).send().await?;

        let status = resp.status();
        let cookie = collect_cookies(&resp);
        let text = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(Error::Authentication {
                message: format!("login failed (HTTP {status}): {}", error_message(&text, status)),
            });
        }
        let envelope: WgEnvelope<serde_json::Value> =
            serde_json::from_str(&text).map_err(|_| Error::Authentication {
                message: "login returned a non-JSON body".into(),
            })?;
        if !envelope.status {
            return Err(Error::Authentication {
                message: envelope
                    .message
                    .unwrap_or_else(|| "invalid username or password".into()),
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

/// Raw client for the WGDashboard API.
pub struct WgDashboardClient {
    inner: SessionClient<WgAuth>,
}

impl WgDashboardClient {
    pub fn new(base_url: &Url, auth: WgAuth, transport: &TransportConfig) -> Result<Self, Error> {
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

    async fn get_data<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<Option<T>, Error> {
        let envelope: WgEnvelope<T> = self.inner.get_with_params(path, params).await?;
        envelope.into_result()
    }

    async fn post_data<T: DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<Option<T>, Error> {
        let envelope: WgEnvelope<T> = self.inner.post(path, RequestBody::Json(body)).await?;
        envelope.into_result()
    }

    // ── Dashboard ────────────────────────────────────────────────────

    /// `GET /api/getDashboardVersion`
    pub async fn version(&self) -> Result<String, Error> {
        Ok(self
            .get_data("api/getDashboardVersion", &[])
            .await?
            .unwrap_or_default())
    }

    /// `GET /api/systemStatus`
    pub async fn system_status(&self) -> Result<SystemStatus, Error> {
        Ok(self
            .get_data("api/systemStatus", &[])
            .await?
            .unwrap_or_default())
    }

    /// `GET /api/getWireguardConfigurations`
    pub async fn configurations(&self) -> Result<Vec<WgConfiguration>, Error> {
        Ok(self
            .get_data("api/getWireguardConfigurations", &[])
            .await?
            .unwrap_or_default())
    }

    /// `GET /api/getWireguardConfigurationInfo?configurationName=`
    pub async fn configuration_info(
        &self,
        configuration: &str,
    ) -> Result<ConfigurationInfo, Error> {
        Ok(self
            .get_data(
                "api/getWireguardConfigurationInfo",
                &[("configurationName", configuration.to_owned())],
            )
            .await?
            .unwrap_or_default())
    }

    // ── Peers ────────────────────────────────────────────────────────

    /// `POST /api/addPeers/{configuration}`
    pub async fn add_peer(
        &self,
        configuration: &str,
        request: &AddPeerRequest,
    ) -> Result<(), Error> {
        let body = to_json(request)?;
        let _: Option<serde_json::Value> = self
            .post_data(&format!("api/addPeers/{}", encode(configuration)), body)
            .await?;
        Ok(())
    }

    /// `POST /api/updatePeerSettings/{configuration}`
    pub async fn update_peer(
        &self,
        configuration: &str,
        settings: &PeerSettings,
    ) -> Result<(), Error> {
        let body = to_json(settings)?;
        let _: Option<serde_json::Value> = self
            .post_data(
                &format!("api/updatePeerSettings/{}", encode(configuration)),
                body,
            )
            .await?;
        Ok(())
    }

    /// `POST /api/deletePeers/{configuration}`
    pub async fn delete_peers(&self, configuration: &str, ids: &[&str]) -> Result<(), Error> {
        self.peer_batch("deletePeers", configuration, ids).await
    }

    /// `POST /api/restrictPeers/{configuration}`
    pub async fn restrict_peers(&self, configuration: &str, ids: &[&str]) -> Result<(), Error> {
        self.peer_batch("restrictPeers", configuration, ids).await
    }

    /// `POST /api/allowAccessPeers/{configuration}`
    pub async fn allow_peers(&self, configuration: &str, ids: &[&str]) -> Result<(), Error> {
        self.peer_batch("allowAccessPeers", configuration, ids).await
    }

    async fn peer_batch(
        &self,
        action: &str,
        configuration: &str,
        ids: &[&str],
    ) -> Result<(), Error> {
        let body = serde_json::json!({ "peers": ids });
        let _: Option<serde_json::Value> = self
            .post_data(&format!("api/{action}/{}", encode(configuration)), body)
            .await?;
        Ok(())
    }

    /// `GET /api/downloadPeer/{configuration}?id=`
    pub async fn download_peer(&self, configuration: &str, id: &str) -> Result<PeerFile, Error> {
        Ok(self
            .get_data(
                &format!("api/downloadPeer/{}", encode(configuration)),
                &[("id", id.to_owned())],
            )
            .await?
            .unwrap_or_default())
    }

    /// `POST /api/savePeerScheduleJob`
    pub async fn save_job(&self, job: &ScheduleJob) -> Result<(), Error> {
        let body = serde_json::json!({ "Job": job });
        let _: Option<serde_json::Value> = self.post_data("api/savePeerScheduleJob", body).await?;
        Ok(())
    }

    /// `POST /api/deletePeerScheduleJob`
    pub async fn delete_job(&self, job: &ScheduleJob) -> Result<(), Error> {
        let body = serde_json::json!({ "Job": job });
        let _: Option<serde_json::Value> = self.post_data("api/deletePeerScheduleJob", body).await?;
        Ok(())
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, Error> {
    serde_json::to_value(value).map_err(|e| Error::Deserialization {
        message: e.to_string(),
        body: String::new(),
    })
}

fn encode(segment: &str) -> String {
    url::form_urlencoded::byte_serialize(segment.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> WgDashboardClient {
        let base = Url::parse(&server.uri()).unwrap();
        let auth = WgAuth::ApiKey(SecretString::from("key".to_owned()));
        WgDashboardClient::new(&base, auth, &TransportConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn configuration_info_lists_restricted_peers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/getWireguardConfigurationInfo"))
            .and(query_param("configurationName", "wg0"))
            .and(header("wg-dashboard-apikey", "key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": true,
                "data": {
                    "configurationInfo": {},
                    "configurationPeers": [{ "id": "A=", "name": "alice" }],
                    "configurationRestrictedPeers": [{ "id": "B=", "name": "bob" }]
                }
            })))
            .mount(&server)
            .await;

        let peers = client(&server).configuration_info("wg0").await.unwrap().all_peers();
        assert_eq!(peers.len(), 2);
        assert!(!peers[0].1);
        assert!(peers[1].1);
    }

    #[tokio::test]
    async fn restrict_posts_peer_ids() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/restrictPeers/wg0"))
            .and(body_json(serde_json::json!({ "peers": ["A="] })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "status": true })))
            .expect(1)
            .mount(&server)
            .await;

        client(&server).restrict_peers("wg0", &["A="]).await.unwrap();
    }

    #[tokio::test]
    async fn status_false_is_panel_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/deletePeers/wg0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({ "status": false, "message": "Configuration does not exist" }),
            ))
            .mount(&server)
            .await;

        let err = client(&server).delete_peers("wg0", &["X="]).await.unwrap_err();
        assert_eq!(err.backend_message(), Some("Configuration does not exist"));
    }
}
