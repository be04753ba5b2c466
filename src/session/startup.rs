//! The startup and authentication phase.
//!
//! <https://www.postgresql.org/docs/current/protocol-flow.html#PROTOCOL-FLOW-START-UP>
use std::collections::HashMap;

use crate::{
    Result,
    error::AuthError,
    protocol::{
        BackendMessage, ProtocolError, TransactionStatus,
        backend::{Authentication, BackendKeyData},
        frontend,
    },
    scram::{self, ScramSha256},
    session::config::Config,
    transport::{PgTransport, PgTransportExt},
};

/// Everything the session keeps from a successful startup.
pub(crate) struct Bootstrap {
    pub key_data: Option<BackendKeyData>,
    pub parameters: HashMap<String, String>,
    pub tx_status: TransactionStatus,
}

/// Drive the connection from the startup message to the first
/// `ReadyForQuery`.
///
/// To begin a session, a frontend opens a connection to the server and
/// sends a startup message. The server then sends an appropriate
/// authentication request message, to which the frontend must reply with an
/// appropriate response. For all methods except SASL there is at most one
/// request and one response; SASL needs multiple exchanges.
///
/// After AuthenticationOk, a backend process is being started and the
/// frontend is just an interested bystander: ParameterStatus,
/// BackendKeyData, and finally ReadyForQuery arrive in the normal case,
/// ErrorResponse if the startup attempt fails.
pub(crate) async fn handshake<T: PgTransport>(io: &mut T, config: &Config) -> Result<Bootstrap> {
    let params = config.startup_params();
    let borrowed: Vec<(&str, &str)> = params.iter().map(|(k, v)| (*k, v.as_str())).collect();
    io.send_startup(frontend::Startup { params: &borrowed });
    io.flush().await?;

    let mut scram: Option<ScramSha256> = None;
    let mut key_data = None;
    let mut parameters = HashMap::new();

    loop {
        match io.recv().await? {
            BackendMessage::Authentication(auth) => {
                authenticate(io, config, auth, &mut scram)?;
                io.flush().await?;
            },
            BackendMessage::BackendKeyData(new_key_data) => key_data = Some(new_key_data),
            BackendMessage::ParameterStatus(param) => {
                parameters.insert(param.name, param.value);
            },
            BackendMessage::NoticeResponse(_notice) => {
                #[cfg(feature = "log")]
                log::warn!("{}", _notice.notice);
            },
            BackendMessage::NegotiateProtocolVersion(_negotiate) => {
                // the server still speaks major version 3; minor downgrades
                // do not affect anything this client sends
                #[cfg(feature = "log")]
                log::warn!(
                    "server negotiated protocol minor version down to {}",
                    _negotiate.minor
                );
            },
            BackendMessage::ErrorResponse(err) => {
                return Err(crate::Error::from(err.error).with_context("startup failed"));
            },
            BackendMessage::ReadyForQuery(ready) => {
                return Ok(Bootstrap { key_data, parameters, tx_status: ready.status });
            },
            other => {
                return Err(ProtocolError::unexpected_phase(other.msgtype(), "startup phase").into());
            },
        }
    }
}

/// Answer one authentication request. The caller flushes.
fn authenticate<T: PgTransport>(
    io: &mut T,
    config: &Config,
    auth: Authentication,
    scram: &mut Option<ScramSha256>,
) -> Result<()> {
    match auth {
        // we gucci
        Authentication::Ok => {},
        Authentication::CleartextPassword => {
            let password = require_password(config, "cleartext")?;
            io.send(frontend::PasswordMessage { password: &password });
        },
        Authentication::Md5Password { salt } => {
            let password = require_password(config, "md5")?;
            let hashed = md5_password(&config.user, &password, salt);
            io.send(frontend::PasswordMessage { password: &hashed });
        },
        Authentication::Sasl { mechanisms } => {
            if !mechanisms.iter().any(|m| m == scram::MECHANISM) {
                return Err(AuthError::UnsupportedMechanism(mechanisms.join(", ")).into());
            }
            let password = require_password(config, "SASL")?;
            let exchange = ScramSha256::new(&config.user, &password);
            let client_first = exchange.client_first();
            io.send(frontend::SaslInitialResponse {
                mechanism: scram::MECHANISM,
                data: client_first.as_bytes(),
            });
            *scram = Some(exchange);
        },
        Authentication::SaslContinue { data } => {
            let exchange = scram
                .as_mut()
                .ok_or(AuthError::Sasl("SASL continuation without an exchange"))?;
            let client_final = exchange.server_first(&data)?;
            io.send(frontend::SaslResponse { data: client_final.as_bytes() });
        },
        Authentication::SaslFinal { data } => {
            let exchange = scram
                .as_mut()
                .ok_or(AuthError::Sasl("SASL final without an exchange"))?;
            exchange.server_final(&data)?;
        },
        Authentication::KerberosV5 => return Err(AuthError::Unsupported("KerberosV5".into()).into()),
        Authentication::Gss => return Err(AuthError::Unsupported("GSSAPI".into()).into()),
        Authentication::Sspi => return Err(AuthError::Unsupported("SSPI".into()).into()),
    }
    Ok(())
}

fn require_password(config: &Config, method: &'static str) -> Result<String> {
    match config.password.resolve()? {
        Some(password) => Ok(password),
        None => Err(AuthError::PasswordRequired(method).into()),
    }
}

/// `"md5" + md5(md5(password + user) + salt)`, hex encoded at each step.
fn md5_password(user: &str, password: &str, salt: [u8; 4]) -> String {
    let inner = md5::compute(format!("{password}{user}"));
    let mut outer_input = format!("{inner:x}").into_bytes();
    outer_input.extend_from_slice(&salt);
    format!("md5{:x}", md5::compute(outer_input))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn md5_password_shape() {
        // psql: concat('md5', md5(concat(md5('secretbob'), '\x01\x02\x03\x04')))
        let hashed = md5_password("bob", "secret", [1, 2, 3, 4]);
        assert!(hashed.starts_with("md5"));
        assert_eq!(hashed.len(), 3 + 32);

        let inner = format!("{:x}", md5::compute("secretbob"));
        let mut outer = inner.into_bytes();
        outer.extend_from_slice(&[1, 2, 3, 4]);
        assert_eq!(hashed, format!("md5{:x}", md5::compute(outer)));
    }
}
