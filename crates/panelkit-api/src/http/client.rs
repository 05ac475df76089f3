// Session-aware HTTP client shared by all token/cookie panels
//
// Owns one `AuthSession` behind an async mutex. The mutex is held for the
// whole login round-trip, so concurrent callers that find the session
// missing or expired wait for the in-flight login instead of starting
// their own. A rejected credential triggers exactly one re-login and one
// retry of the original request.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info};
use url::Url;

use crate::error::Error;
use crate::http::session::{AuthSession, SessionState};
use crate::http::{RequestBody, read_json};
use crate::transport::TransportConfig;

/// One panel family's login flow.
///
/// Implementations perform the network round-trip (or, for static API keys,
/// none at all) and return a fresh session. They never cache.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, http: &reqwest::Client, base_url: &Url)
    -> Result<AuthSession, Error>;
}

/// Marks the session `Authenticating` for the length of a login. If the
/// login future is dropped before it finishes, the state falls back to
/// `Unauthenticated`.
struct LoginInFlight<'a> {
    state: &'a watch::Sender<SessionState>,
    done: bool,
}

impl<'a> LoginInFlight<'a> {
    fn start(state: &'a watch::Sender<SessionState>) -> Self {
        state.send_replace(SessionState::Authenticating);
        Self { state, done: false }
    }

    fn finish(mut self, outcome: SessionState) {
        self.state.send_replace(outcome);
        self.done = true;
    }
}

impl Drop for LoginInFlight<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.state.send_replace(SessionState::Unauthenticated);
        }
    }
}

/// HTTP client bound to one panel, carrying its own session.
pub struct SessionClient<A> {
    http: reqwest::Client,
    base_url: Url,
    auth: A,
    timeout_secs: u64,
    slot: Mutex<Option<AuthSession>>,
    generation: AtomicU64,
    state: watch::Sender<SessionState>,
}

impl<A: Authenticator> SessionClient<A> {
    /// Create a client from a transport config. Does not authenticate.
    pub fn new(base_url: &Url, auth: A, transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self::with_client(http, base_url, auth, transport.timeout_secs()))
    }

    /// Wrap a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: &Url, auth: A, timeout_secs: u64) -> Self {
        let (state, _) = watch::channel(SessionState::Unauthenticated);
        Self {
            http,
            base_url: normalize_base(base_url),
            auth,
            timeout_secs,
            slot: Mutex::new(None),
            generation: AtomicU64::new(0),
            state,
        }
    }

    /// The panel base URL, always ending in `/`.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn authenticator(&self) -> &A {
        &self.auth
    }

    /// Join a relative path onto the base URL. Leading slashes are ignored
    /// so panels installed under a sub-path keep their prefix.
    pub fn url(&self, path: &str) -> Result<Url, Error> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    /// Current lifecycle state.
    pub fn session_state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Subscribe to lifecycle transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// When the live session was issued, if there is one.
    pub async fn session_issued_at(&self) -> Option<DateTime<Utc>> {
        self.slot.lock().await.as_ref().map(AuthSession::issued_at)
    }

    /// Drop the session; the next request logs in again.
    pub async fn disconnect(&self) {
        *self.slot.lock().await = None;
        self.state.send_replace(SessionState::Unauthenticated);
        debug!(base = %self.base_url, "session dropped");
    }

    // ── Session lifecycle ────────────────────────────────────────────

    /// Return a valid session, logging in first if needed.
    async fn current_session(&self) -> Result<AuthSession, Error> {
        let mut slot = self.slot.lock().await;

        if let Some(session) = slot.as_ref() {
            if session.is_valid_at(Utc::now()) {
                return Ok(session.clone());
            }
            debug!(base = %self.base_url, "session expired");
            self.state.send_replace(SessionState::Expired);
        }

        let login = LoginInFlight::start(&self.state);
        match self.auth.authenticate(&self.http, &self.base_url).await {
            Ok(mut session) => {
                session.generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
                info!(base = %self.base_url, expires_at = ?session.expires_at(), "authenticated");
                *slot = Some(session.clone());
                login.finish(SessionState::Authenticated);
                Ok(session)
            }
            Err(e) => {
                *slot = None;
                login.finish(SessionState::Unauthenticated);
                Err(e)
            }
        }
    }

    /// Forget the session with the given generation. A newer session
    /// installed by a concurrent caller is left alone.
    async fn invalidate(&self, generation: u64) {
        let mut slot = self.slot.lock().await;
        if slot.as_ref().is_some_and(|s| s.generation == generation) {
            *slot = None;
            self.state.send_replace(SessionState::Unauthenticated);
        }
    }

    // ── Request execution ────────────────────────────────────────────

    /// Send a request with the session credential attached.
    ///
    /// On 401/403 (or a redirect to the login page) the session is dropped,
    /// re-established once, and the request is retried once. A second
    /// rejection is `Error::Unauthorized`.
    pub async fn execute(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: &RequestBody,
    ) -> Result<reqwest::Response, Error> {
        let url = self.url(path)?;

        let session = self.current_session().await?;
        let resp = self.send(&method, &url, query, body, &session).await?;
        if !is_rejection(resp.status()) {
            return Ok(resp);
        }

        debug!(%url, status = %resp.status(), "credential rejected, re-authenticating");
        self.invalidate(session.generation).await;

        let session = self.current_session().await?;
        let resp = self.send(&method, &url, query, body, &session).await?;
        let status = resp.status();
        if is_rejection(status) {
            self.invalidate(session.generation).await;
            return Err(Error::Unauthorized {
                status: status.as_u16(),
            });
        }
        Ok(resp)
    }

    async fn send(
        &self,
        method: &Method,
        url: &Url,
        query: &[(&str, String)],
        body: &RequestBody,
        session: &AuthSession,
    ) -> Result<reqwest::Response, Error> {
        debug!("{method} {url}");

        let mut builder = self.http.request(method.clone(), url.clone());
        if !query.is_empty() {
            builder = builder.query(query);
        }
        builder = body.apply(builder);
        builder = session.credential().apply(builder);

        builder.send().await.map_err(|e| self.map_send_error(e))
    }

    fn map_send_error(&self, err: reqwest::Error) -> Error {
        if err.is_timeout() {
            Error::Timeout {
                timeout_secs: self.timeout_secs,
            }
        } else {
            Error::Transport(err)
        }
    }

    // ── Convenience verbs ────────────────────────────────────────────

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, Error> {
        let resp = self.execute(Method::GET, path, &[], &RequestBody::Empty).await?;
        read_json(resp).await
    }

    pub async fn get_with_params<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, Error> {
        let resp = self
            .execute(Method::GET, path, params, &RequestBody::Empty)
            .await?;
        read_json(resp).await
    }

    pub async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: RequestBody,
    ) -> Result<T, Error> {
        let resp = self.execute(Method::POST, path, &[], &body).await?;
        read_json(resp).await
    }

    pub async fn put<T: DeserializeOwned>(
        &self,
        path: &str,
        body: RequestBody,
    ) -> Result<T, Error> {
        let resp = self.execute(Method::PUT, path, &[], &body).await?;
        read_json(resp).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, Error> {
        let resp = self
            .execute(Method::DELETE, path, &[], &RequestBody::Empty)
            .await?;
        read_json(resp).await
    }
}

/// Ensure the base URL ends with `/` so relative joins append rather than replace.
fn normalize_base(url: &Url) -> Url {
    let mut url = url.clone();
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

/// Panels answer a dead session with 401/403, or by redirecting to login.
fn is_rejection(status: StatusCode) -> bool {
    status == StatusCode::UNAUTHORIZED
        || status == StatusCode::FORBIDDEN
        || status.is_redirection()
}
