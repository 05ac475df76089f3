// panelkit-api: Async wire clients for VPN/proxy panels and MikroTik RouterOS

pub mod error;
pub mod http;
pub mod marzban;
pub mod routeros;
pub mod sui;
pub mod transport;
pub mod wgdashboard;
pub mod xui;

pub use error::Error;
pub use http::{AuthSession, Authenticator, Credential, SessionClient, SessionState};
pub use marzban::{MarzbanAuth, MarzbanClient};
pub use routeros::{LoginMethod, RouterClient, RouterSession};
pub use sui::{SuiApiClient, SuiAuth};
pub use transport::{TlsMode, TransportConfig};
pub use wgdashboard::{WgAuth, WgDashboardClient};
pub use xui::{XuiAuth, XuiClient};
