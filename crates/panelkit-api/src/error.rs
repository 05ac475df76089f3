use thiserror::Error;

/// Top-level error type for the `panelkit-api` crate.
///
/// Covers every failure mode across the wire clients: authentication,
/// HTTP transport, panel JSON envelopes, and the RouterOS socket protocol.
/// `panelkit-core` maps these into the provisioning error taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// Login failed (wrong credentials, bad challenge response, etc.)
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// The panel rejected the current credential (HTTP 401/403 or a
    /// redirect to the login page).
    #[error("Unauthorized (HTTP {status})")]
    Unauthorized { status: u16 },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Socket-level I/O error on the RouterOS connection.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Connect or read timed out.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// TLS setup or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── Panel responses ─────────────────────────────────────────────
    /// Non-2xx HTTP response. `message` is taken from the JSON body's
    /// `message`/`msg`/`detail` field when present.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Well-formed `{ success: false, msg }` envelope (X-UI, S-UI, WGDashboard).
    #[error("Panel error: {message}")]
    Panel { message: String },

    // ── RouterOS ────────────────────────────────────────────────────
    /// `!trap` reply from the router.
    #[error("RouterOS trap: {message}")]
    RouterTrap {
        message: String,
        category: Option<u32>,
    },

    /// `!fatal` reply; the router is closing the connection.
    #[error("RouterOS fatal: {0}")]
    RouterFatal(String),

    /// Malformed bytes on the wire (reserved length prefix, unexpected reply word).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Peer closed the socket mid-sentence.
    #[error("Connection closed by peer")]
    ConnectionClosed,

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if the credential was rejected and re-authenticating
    /// might resolve it.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }

    /// Returns `true` if the backend could not be reached at all.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Timeout { .. } | Self::Io(_) | Self::ConnectionClosed | Self::RouterFatal(_) => {
                true
            }
            _ => false,
        }
    }

    /// Returns `true` if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Transport(e) => e.status() == Some(reqwest::StatusCode::NOT_FOUND),
            Self::Http { status: 404, .. } => true,
            _ => false,
        }
    }

    /// Returns `true` if the backend reported a conflict (HTTP 409).
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Http { status: 409, .. })
    }

    /// The backend's own message, if this error carries one verbatim.
    pub fn backend_message(&self) -> Option<&str> {
        match self {
            Self::Http { message, .. }
            | Self::Panel { message }
            | Self::RouterTrap { message, .. } => Some(message),
            _ => None,
        }
    }
}
