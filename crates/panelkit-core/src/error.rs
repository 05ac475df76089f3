// ── Core error types ──
//
// The provisioning taxonomy callers branch on. Transport details never leak
// past this layer: the `From<panelkit_api::Error>` impl folds wire failures
// into "unreachable", "unauthorized" or "backend said no".

use thiserror::Error;

use crate::model::{Capability, PanelType};

/// Unified error type for provisioning operations.
#[derive(Debug, Error)]
pub enum PanelError {
    // ── Setup ────────────────────────────────────────────────────────
    /// Panel config is missing fields its type requires. Never retried.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    // ── Connectivity ─────────────────────────────────────────────────
    /// Credentials rejected, or the challenge-response failed.
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// Network failure, timeout, or refused connection. The caller may retry.
    #[error("Backend unavailable: {message}")]
    BackendUnavailable { message: String },

    // ── User errors ──────────────────────────────────────────────────
    #[error("User not found: {username}")]
    UserNotFound { username: String },

    #[error("User already exists: {username}")]
    DuplicateUser { username: String },

    // ── Operation errors ─────────────────────────────────────────────
    #[error("Operation {operation} is not supported by {panel_type} panels")]
    UnsupportedOperation {
        operation: Capability,
        panel_type: PanelType,
    },

    /// Well-formed rejection from the backend, message kept verbatim.
    #[error("Backend error: {message}")]
    Backend {
        message: String,
        /// HTTP status code, if the backend speaks HTTP.
        status: Option<u16>,
    },

    /// The caller's cancellation token fired.
    #[error("Operation cancelled")]
    Cancelled,
}

impl PanelError {
    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub(crate) fn user_not_found(username: &str) -> Self {
        Self::UserNotFound {
            username: username.to_owned(),
        }
    }

    pub(crate) fn duplicate(username: &str) -> Self {
        Self::DuplicateUser {
            username: username.to_owned(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::UserNotFound { .. })
    }

    /// `true` for failures a later retry could plausibly fix.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::BackendUnavailable { .. })
    }
}

// ── Conversion from wire-level errors ────────────────────────────────

impl From<panelkit_api::Error> for PanelError {
    fn from(err: panelkit_api::Error) -> Self {
        use panelkit_api::Error as Api;

        match err {
            Api::Authentication { message } => Self::Authentication { message },
            Api::Unauthorized { status } => Self::Authentication {
                message: format!("credential rejected (HTTP {status})"),
            },
            Api::Transport(ref e) if e.is_timeout() || e.is_connect() || e.is_request() => {
                Self::BackendUnavailable {
                    message: err.to_string(),
                }
            }
            Api::Transport(e) => Self::Backend {
                message: e.to_string(),
                status: e.status().map(|s| s.as_u16()),
            },
            Api::Io(_) | Api::Timeout { .. } | Api::ConnectionClosed | Api::RouterFatal(_) => {
                Self::BackendUnavailable {
                    message: err.to_string(),
                }
            }
            Api::InvalidUrl(e) => Self::Configuration {
                message: format!("invalid panel URL: {e}"),
            },
            Api::Tls(message) => Self::Configuration { message },
            Api::Http {
                status: 401 | 403,
                message,
            } => Self::Authentication { message },
            Api::Http {
                status: status @ (502..=504),
                message,
            } => Self::BackendUnavailable {
                message: format!("HTTP {status}: {message}"),
            },
            Api::Http { status, message } => Self::Backend {
                message,
                status: Some(status),
            },
            Api::Panel { message } | Api::RouterTrap { message, .. } => Self::Backend {
                message,
                status: None,
            },
            Api::Protocol(message) => Self::Backend {
                message: format!("protocol error: {message}"),
                status: None,
            },
            Api::Deserialization { message, body: _ } => Self::Backend {
                message: format!("unexpected response: {message}"),
                status: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use panelkit_api::Error as Api;

    #[test]
    fn timeouts_are_backend_unavailable() {
        let err: PanelError = Api::Timeout { timeout_secs: 5 }.into();
        assert!(err.is_transient());
        let err: PanelError = Api::ConnectionClosed.into();
        assert!(matches!(err, PanelError::BackendUnavailable { .. }));
    }

    #[test]
    fn rejections_are_authentication() {
        let err: PanelError = Api::Http {
            status: 403,
            message: "Forbidden".into(),
        }
        .into();
        assert!(matches!(err, PanelError::Authentication { .. }));

        let err: PanelError = Api::Unauthorized { status: 401 }.into();
        assert!(matches!(err, PanelError::Authentication { ref message } if message.contains("401")));
        assert!(!err.is_transient());
    }

    #[test]
    fn traps_keep_message_verbatim() {
        let err: PanelError = Api::RouterTrap {
            message: "failure: already have user with this name".into(),
            category: None,
        }
        .into();
        match err {
            PanelError::Backend { message, status } => {
                assert_eq!(message, "failure: already have user with this name");
                assert_eq!(status, None);
            }
            other => panic!("expected backend error, got {other:?}"),
        }
    }

    #[test]
    fn unsupported_names_operation_and_panel() {
        let err = PanelError::UnsupportedOperation {
            operation: Capability::ResetUserData,
            panel_type: PanelType::WireGuard,
        };
        assert_eq!(
            err.to_string(),
            "Operation resetUserData is not supported by wireguard panels"
        );
    }
}
