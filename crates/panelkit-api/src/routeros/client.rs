// RouterOS API client
//
// Opens a TCP connection, authenticates it, and hands back a session
// for a short command sequence. Routers drop idle API connections without
// notice, so sessions are meant to be opened per operation, not pooled.

use std::time::Duration;

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::Error;
use crate::routeros::auth::LoginMethod;
use crate::routeros::connection::{Connection, Response};
use crate::routeros::sentence::Command;
use crate::transport::TransportConfig;

/// Plain-text API port.
pub const DEFAULT_API_PORT: u16 = 8728;

/// Connection parameters for one router.
#[derive(Debug, Clone)]
pub struct RouterClient {
    host: String,
    port: u16,
    username: String,
    password: SecretString,
    login: LoginMethod,
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl RouterClient {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: SecretString,
        login: LoginMethod,
        transport: &TransportConfig,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password,
            login,
            connect_timeout: transport.connect_timeout,
            read_timeout: transport.timeout,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Connect and authenticate.
    pub async fn connect(&self) -> Result<RouterSession, Error> {
        debug!(host = %self.host, port = self.port, "connecting to router");

        let stream = tokio::time::timeout(
            self.connect_timeout,
            TcpStream::connect((self.host.as_str(), self.port)),
        )
        .await
        .map_err(|_| Error::Timeout {
            timeout_secs: self.connect_timeout.as_secs(),
        })??;
        stream.set_nodelay(true)?;

        let mut conn = Connection::new(stream, self.read_timeout);
        conn.login(&self.username, &self.password, self.login).await?;

        Ok(RouterSession {
            conn,
            issued_at: Utc::now(),
        })
    }
}

/// An authenticated connection. Dropping it closes the socket.
pub struct RouterSession {
    conn: Connection<TcpStream>,
    issued_at: DateTime<Utc>,
}

impl RouterSession {
    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    /// Run one command to completion.
    pub async fn run(&mut self, cmd: &Command) -> Result<Response, Error> {
        self.conn.run(cmd).await
    }

    /// Run a command and return only its rows.
    pub async fn rows(
        &mut self,
        cmd: &Command,
    ) -> Result<Vec<crate::routeros::sentence::Attributes>, Error> {
        Ok(self.conn.run(cmd).await?.rows)
    }

    /// Close the socket politely.
    pub async fn close(self) {
        self.conn.close().await;
    }
}
