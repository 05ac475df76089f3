// Authenticated session state for HTTP panels
//
// An `AuthSession` is the uniform output of every panel login flow: an
// opaque credential plus an expiry estimate. How the credential is attached
// to a request is the only thing that differs between panels.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use reqwest::RequestBuilder;
use secrecy::{ExposeSecret, SecretString};

/// Opaque credential produced by a login flow.
#[derive(Debug, Clone)]
pub enum Credential {
    /// `Authorization: Bearer <token>` (Marzban).
    Bearer(SecretString),
    /// Raw `Cookie` header value captured from `Set-Cookie` (X-UI, S-UI,
    /// WGDashboard password login).
    Cookie(SecretString),
    /// Static API key sent in a panel-specific header (S-UI `Token`,
    /// WGDashboard `wg-dashboard-apikey`).
    Header {
        name: &'static str,
        value: SecretString,
    },
}

impl Credential {
    /// Attach this credential to an outgoing request.
    pub(crate) fn apply(&self, builder: RequestBuilder) -> RequestBuilder {
        match self {
            Self::Bearer(token) => builder.bearer_auth(token.expose_secret()),
            Self::Cookie(cookie) => builder.header(reqwest::header::COOKIE, cookie.expose_secret()),
            Self::Header { name, value } => builder.header(*name, value.expose_secret()),
        }
    }
}

/// A credential together with its issue time and expiry estimate.
///
/// `expires_at == None` means the credential never expires on its own
/// (static API keys); it is still dropped when the panel rejects it.
#[derive(Debug, Clone)]
pub struct AuthSession {
    credential: Credential,
    issued_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    /// Set by the owning `SessionClient`; lets a stale rejection avoid
    /// discarding a session another caller already refreshed.
    pub(crate) generation: u64,
}

impl AuthSession {
    /// A session whose expiry is a fixed TTL from now.
    pub fn with_ttl(credential: Credential, ttl: Duration) -> Self {
        let issued_at = Utc::now();
        let ttl = TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX);
        Self {
            credential,
            issued_at,
            expires_at: issued_at.checked_add_signed(ttl),
            generation: 0,
        }
    }

    /// A session with a backend-declared absolute expiry.
    pub fn with_expiry(credential: Credential, expires_at: DateTime<Utc>) -> Self {
        Self {
            credential,
            issued_at: Utc::now(),
            expires_at: Some(expires_at),
            generation: 0,
        }
    }

    /// A session that only ends when the panel rejects it.
    pub fn unbounded(credential: Credential) -> Self {
        Self {
            credential,
            issued_at: Utc::now(),
            expires_at: None,
            generation: 0,
        }
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// `true` while `now < expires_at`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|expires| now < expires)
    }
}

/// Observable session lifecycle of one panel client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticating,
    Authenticated,
    Expired,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token() -> Credential {
        Credential::Bearer(SecretString::from("t".to_owned()))
    }

    #[test]
    fn ttl_session_expires() {
        let session = AuthSession::with_ttl(token(), Duration::from_secs(600));
        assert!(session.is_valid_at(Utc::now()));
        assert!(!session.is_valid_at(Utc::now() + TimeDelta::minutes(11)));
    }

    #[test]
    fn declared_expiry_in_the_past_is_invalid() {
        let session = AuthSession::with_expiry(token(), Utc::now() - TimeDelta::seconds(1));
        assert!(!session.is_valid_at(Utc::now()));
    }

    #[test]
    fn unbounded_session_never_expires() {
        let session = AuthSession::unbounded(token());
        assert!(session.is_valid_at(Utc::now() + TimeDelta::days(3650)));
        assert_eq!(session.expires_at(), None);
    }
}
