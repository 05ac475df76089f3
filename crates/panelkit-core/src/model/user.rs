// ── Provisioned user model ──
//
// A projection of remote state. Adapters build these per call and never
// cache them.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Account expiry. Backends encode "never" as `0`, `null` or a missing key.
///
/// Serialized as unix seconds; a negative value is a first-use duration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum Expiry {
    #[default]
    Never,
    At(DateTime<Utc>),
    /// Runs for this long from the first connection. Only X-UI panels can
    /// store it.
    AfterFirstUse(Duration),
}

impl Expiry {
    /// `<= 0` means never.
    pub fn from_unix_secs(secs: i64) -> Self {
        if secs <= 0 {
            return Self::Never;
        }
        DateTime::from_timestamp(secs, 0).map_or(Self::Never, Self::At)
    }

    pub fn from_unix_millis(millis: i64) -> Self {
        if millis <= 0 {
            return Self::Never;
        }
        DateTime::from_timestamp_millis(millis).map_or(Self::Never, Self::At)
    }

    /// The fixed deadline, if there is one.
    pub fn unix_secs(self) -> Option<i64> {
        match self {
            Self::At(at) => Some(at.timestamp()),
            Self::Never | Self::AfterFirstUse(_) => None,
        }
    }

    pub fn unix_millis(self) -> Option<i64> {
        match self {
            Self::At(at) => Some(at.timestamp_millis()),
            Self::Never | Self::AfterFirstUse(_) => None,
        }
    }

    pub fn is_after_first_use(self) -> bool {
        matches!(self, Self::AfterFirstUse(_))
    }

    pub fn is_never(self) -> bool {
        matches!(self, Self::Never)
    }

    pub fn has_passed(self, now: DateTime<Utc>) -> bool {
        matches!(self, Self::At(at) if at <= now)
    }
}

impl From<i64> for Expiry {
    fn from(secs: i64) -> Self {
        if secs < 0 {
            return Self::AfterFirstUse(Duration::from_secs(secs.unsigned_abs()));
        }
        Self::from_unix_secs(secs)
    }
}

impl From<Expiry> for i64 {
    fn from(expiry: Expiry) -> Self {
        match expiry {
            Expiry::Never => 0,
            Expiry::At(at) => at.timestamp(),
            Expiry::AfterFirstUse(d) => i64::try_from(d.as_secs()).map_or(i64::MIN, |s| -s),
        }
    }
}

/// How the backend itself identifies the account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum BackendIdentity {
    #[default]
    None,
    /// Proxy client UUID (Marzban, X-UI VLESS/VMess) or Trojan password.
    ClientUuid(String),
    /// Numeric row id (S-UI).
    ClientId(u64),
    /// WireGuard peer public key.
    PeerPublicKey(String),
    /// RouterOS internal `.id` (`*1A`).
    RouterId(String),
}

/// One account as the backend currently reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionedUser {
    pub username: String,
    /// `0` = unlimited.
    pub data_limit_bytes: u64,
    pub expiry: Expiry,
    pub enabled: bool,
    pub used_upload: u64,
    pub used_download: u64,
    pub identity: BackendIdentity,
}

impl ProvisionedUser {
    pub fn used_total(&self) -> u64 {
        self.used_upload.saturating_add(self.used_download)
    }
}

/// Input to `create_user`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSpec {
    pub username: String,
    /// `0` = unlimited.
    #[serde(default)]
    pub data_limit_bytes: u64,
    #[serde(default)]
    pub expiry: Expiry,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Login secret for backends with per-user passwords (RouterOS).
    /// Generated when absent.
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

fn default_enabled() -> bool {
    true
}

impl UserSpec {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            data_limit_bytes: 0,
            expiry: Expiry::Never,
            enabled: true,
            password: None,
            note: None,
        }
    }

    pub fn with_data_limit(mut self, bytes: u64) -> Self {
        self.data_limit_bytes = bytes;
        self
    }

    pub fn with_expiry(mut self, expiry: Expiry) -> Self {
        self.expiry = expiry;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Partial update. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserPatch {
    #[serde(default)]
    pub data_limit_bytes: Option<u64>,
    #[serde(default)]
    pub expiry: Option<Expiry>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub note: Option<String>,
}

impl UserPatch {
    pub fn is_empty(&self) -> bool {
        self.data_limit_bytes.is_none()
            && self.expiry.is_none()
            && self.enabled.is_none()
            && self.note.is_none()
    }
}

/// Result of `create_user`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedUser {
    pub user: ProvisionedUser,
    /// Share link, subscription URL or config file, when the backend has one.
    pub access_link: Option<String>,
    /// Generated login secret, for backends where the user needs one.
    pub secret: Option<String>,
}

/// Usage snapshot for one account.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageStats {
    pub username: String,
    pub upload_bytes: u64,
    pub download_bytes: u64,
    pub data_limit_bytes: u64,
    pub expiry: Expiry,
    pub enabled: bool,
}

impl UsageStats {
    pub fn total_bytes(&self) -> u64 {
        self.upload_bytes.saturating_add(self.download_bytes)
    }

    /// Bytes left before the limit, `None` when unlimited.
    pub fn remaining_bytes(&self) -> Option<u64> {
        (self.data_limit_bytes > 0).then(|| self.data_limit_bytes.saturating_sub(self.total_bytes()))
    }
}

impl From<&ProvisionedUser> for UsageStats {
    fn from(user: &ProvisionedUser) -> Self {
        Self {
            username: user.username.clone(),
            upload_bytes: user.used_upload,
            download_bytes: user.used_download,
            data_limit_bytes: user.data_limit_bytes,
            expiry: user.expiry,
            enabled: user.enabled,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn zero_and_negative_mean_never() {
        assert_eq!(Expiry::from_unix_secs(0), Expiry::Never);
        assert_eq!(Expiry::from_unix_millis(-86_400_000), Expiry::Never);
        assert_eq!(Expiry::from_unix_secs(1_900_000_000).unix_millis(), Some(1_900_000_000_000));
    }

    #[test]
    fn expiry_serializes_as_unix_seconds() {
        let spec = UserSpec::new("alice").with_expiry(Expiry::from_unix_secs(1_700_000_000));
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["expiry"], 1_700_000_000);

        let back: UserSpec = serde_json::from_str(r#"{"username":"bob","expiry":0}"#).unwrap();
        assert!(back.expiry.is_never());
        assert!(back.enabled);
    }

    #[test]
    fn first_use_expiry_serializes_as_negative_seconds() {
        let week = Expiry::AfterFirstUse(Duration::from_secs(7 * 86_400));
        let spec = UserSpec::new("carol").with_expiry(week);
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["expiry"], -604_800);

        let back: UserSpec = serde_json::from_value(json).unwrap();
        assert_eq!(back.expiry, week);
        assert!(!week.is_never());
        assert_eq!(week.unix_secs(), None);
        assert!(!week.has_passed(Utc::now()));
    }

    #[test]
    fn remaining_is_none_when_unlimited() {
        let stats = UsageStats {
            upload_bytes: 10,
            download_bytes: 30,
            data_limit_bytes: 100,
            ..UsageStats::default()
        };
        assert_eq!(stats.remaining_bytes(), Some(60));
        assert_eq!(UsageStats::default().remaining_bytes(), None);
    }
}
