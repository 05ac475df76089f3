// Shared HTTP plumbing for token/cookie panels
//
// Request bodies, response decoding, and the `{ success, msg, obj }`
// envelope used by X-UI and S-UI. Panel-specific clients build on
// `SessionClient` and never touch reqwest directly.

pub mod client;
pub mod session;

use reqwest::RequestBuilder;
use reqwest::header::SET_COOKIE;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::error::Error;

pub use client::{Authenticator, SessionClient};
pub use session::{AuthSession, Credential, SessionState};

/// Body of an outgoing request. Kept as data (not a builder) so a
/// rejected request can be rebuilt for its single retry.
#[derive(Debug, Clone)]
pub enum RequestBody {
    Empty,
    Json(serde_json::Value),
    Form(Vec<(String, String)>),
}

impl RequestBody {
    pub(crate) fn apply(&self, builder: RequestBuilder) -> RequestBuilder {
        match self {
            Self::Empty => builder,
            Self::Json(value) => builder.json(value),
            Self::Form(fields) => builder.form(fields),
        }
    }
}

/// Standard X-UI / S-UI response envelope.
///
/// ```json
/// { "success": true, "msg": "", "obj": ... }
/// ```
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub msg: Option<String>,
    pub obj: Option<T>,
}

impl<T> Envelope<T> {
    /// `obj` on success, `Error::Panel` carrying `msg` otherwise.
    pub fn into_result(self) -> Result<Option<T>, Error> {
        if self.success {
            Ok(self.obj)
        } else {
            Err(Error::Panel {
                message: self.msg.unwrap_or_else(|| "request failed".into()),
            })
        }
    }
}

/// Decode a JSON body, turning non-2xx responses into `Error::Http`.
pub(crate) async fn read_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, Error> {
    let status = resp.status();
    let body = resp.text().await?;

    if !status.is_success() {
        return Err(Error::Http {
            status: status.as_u16(),
            message: error_message(&body, status),
        });
    }

    // Some endpoints answer success with an empty body.
    let body_ref = if body.trim().is_empty() { "null" } else { &body };
    serde_json::from_str(body_ref).map_err(|e| Error::Deserialization {
        message: format!("{e} (body preview: {:?})", preview(&body)),
        body: body.clone(),
    })
}

/// Pull a human message out of an error body: `message`, `msg`, or
/// FastAPI's `detail` (string or validation array).
pub(crate) fn error_message(body: &str, status: reqwest::StatusCode) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["message", "msg", "detail", "error"] {
            match value.get(key) {
                Some(serde_json::Value::String(s)) if !s.is_empty() => return s.clone(),
                Some(serde_json::Value::Null) | None => {}
                Some(other) => return other.to_string(),
            }
        }
    }
    if body.trim().is_empty() {
        status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_owned()
    } else {
        preview(body)
    }
}

/// Collapse every `Set-Cookie` header into a single `Cookie` header value.
pub(crate) fn collect_cookies(resp: &reqwest::Response) -> Option<String> {
    let pairs: Vec<&str> = resp
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .map(str::trim)
        .filter(|pair| pair.contains('='))
        .collect();

    if pairs.is_empty() {
        None
    } else {
        Some(pairs.join("; "))
    }
}

fn preview(body: &str) -> String {
    body.chars().take(200).collect()
}
