// RouterOS API login
//
// Two flows exist in the wild:
// - plain (RouterOS >= 6.43): `/login =name= =password=`
// - challenge (older): `/login` answers `=ret=<hex>`, the client replies
//   with `=response=00<md5(0x00 ++ password ++ challenge)>`
//
// Pre-6.43 routers answer a plain login with a challenge, so `Auto` sends
// the plain form and follows up with the challenge step when one comes back.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use crate::error::Error;
use crate::routeros::connection::Connection;
use crate::routeros::sentence::Command;

/// Which login flow to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoginMethod {
    /// Plain login, answering a challenge if the router sends one.
    #[default]
    Auto,
    /// Plain login only; a challenge reply is an error.
    Plain,
    /// Bare `/login` followed by the MD5 challenge response.
    Challenge,
}

/// Compute the challenge response: `"00" + hex(md5(0x00 ++ password ++ unhex(challenge)))`.
pub fn challenge_response(password: &str, challenge_hex: &str) -> Result<String, Error> {
    let challenge = hex::decode(challenge_hex).map_err(|e| Error::Authentication {
        message: format!("malformed login challenge {challenge_hex:?}: {e}"),
    })?;

    let mut input = Vec::with_capacity(1 + password.len() + challenge.len());
    input.push(0_u8);
    input.extend_from_slice(password.as_bytes());
    input.extend_from_slice(&challenge);

    let digest = md5::compute(&input);
    Ok(format!("00{}", hex::encode(digest.0)))
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Authenticate this connection.
    pub async fn login(
        &mut self,
        username: &str,
        password: &SecretString,
        method: LoginMethod,
    ) -> Result<(), Error> {
        let challenge = match method {
            LoginMethod::Auto | LoginMethod::Plain => {
                let cmd = Command::new("/login")
                    .attr("name", username)
                    .attr("password", password.expose_secret());
                let done = self.login_step(&cmd).await?;
                match done.get("ret") {
                    None => {
                        debug!(username, "routeros plain login accepted");
                        return Ok(());
                    }
                    Some(_) if method == LoginMethod::Plain => {
                        return Err(Error::Authentication {
                            message: "router requires challenge login".into(),
                        });
                    }
                    Some(ret) => ret.clone(),
                }
            }
            LoginMethod::Challenge => {
                let done = self.login_step(&Command::new("/login")).await?;
                done.get("ret").cloned().ok_or_else(|| Error::Authentication {
                    message: "router did not send a login challenge".into(),
                })?
            }
        };

        let response = challenge_response(password.expose_secret(), &challenge)?;
        let cmd = Command::new("/login")
            .attr("name", username)
            .attr("response", response);
        let done = self.login_step(&cmd).await?;
        if done.contains_key("ret") {
            return Err(Error::Authentication {
                message: "router repeated the challenge".into(),
            });
        }

        debug!(username, "routeros challenge login accepted");
        Ok(())
    }

    /// One login round-trip. Traps and a missing `!done` are auth failures;
    /// timeouts stay timeouts.
    async fn login_step(
        &mut self,
        cmd: &Command,
    ) -> Result<crate::routeros::sentence::Attributes, Error> {
        match self.run(cmd).await {
            Ok(response) => Ok(response.done),
            Err(Error::RouterTrap { message, .. }) => Err(Error::Authentication { message }),
            Err(Error::ConnectionClosed | Error::Protocol(_) | Error::RouterFatal(_)) => {
                Err(Error::Authentication {
                    message: "router closed the session without completing login".into(),
                })
            }
            Err(other) => Err(other),
        }
    }
}
