//! SCRAM-SHA-256 client exchange (RFC 5802 / RFC 7677).
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac_array;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::AuthError;

/// The only SASL mechanism this client speaks.
///
/// `SCRAM-SHA-256-PLUS` needs channel binding, which is not implemented;
/// the exchange advertises `n,,` (no channel binding) in the gs2 header.
pub const MECHANISM: &str = "SCRAM-SHA-256";

const NONCE_LEN: usize = 18;

/// One in-flight SCRAM exchange.
///
/// The three legs map onto the SASL backend messages:
/// [`client_first`][ScramSha256::client_first] answers the mechanism list,
/// [`server_first`][ScramSha256::server_first] answers `SASLContinue`, and
/// [`server_final`][ScramSha256::server_final] checks the `SASLFinal`
/// signature.
pub struct ScramSha256 {
    password: String,
    nonce: String,
    client_first_bare: String,
    state: State,
}

enum State {
    ClientFirst,
    AwaitingFinal {
        salted_password: [u8; 32],
        auth_message: String,
    },
    Done,
}

impl ScramSha256 {
    pub fn new(user: &str, password: &str) -> Self {
        let mut raw = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut raw);
        Self::with_nonce(user, password, BASE64.encode(raw))
    }

    /// Exchange with a fixed client nonce, so known test vectors apply.
    pub(crate) fn with_nonce(user: &str, password: &str, nonce: String) -> Self {
        // RFC 5802: '=' and ',' in the authentication identity are escaped.
        // Postgres ignores the SASL username in favor of the startup user,
        // but sending it keeps the message well formed either way.
        let escaped = user.replace('=', "=3D").replace(',', "=2C");
        let client_first_bare = format!("n={escaped},r={nonce}");
        Self {
            password: password.to_string(),
            nonce,
            client_first_bare,
            state: State::ClientFirst,
        }
    }

    /// The initial client response, gs2 header included.
    pub fn client_first(&self) -> String {
        format!("n,,{}", self.client_first_bare)
    }

    /// Consume the server-first message (`r=`, `s=`, `i=`) and produce the
    /// client-final message carrying the proof.
    pub fn server_first(&mut self, data: &[u8]) -> Result<String, AuthError> {
        if !matches!(self.state, State::ClientFirst) {
            return Err(AuthError::Sasl("server-first out of order"));
        }

        let message = std::str::from_utf8(data)
            .map_err(|_| AuthError::Sasl("server-first is not utf8"))?;

        let mut server_nonce = None;
        let mut salt = None;
        let mut iterations = None;
        for attr in message.split(',') {
            if let Some(value) = attr.strip_prefix("r=") {
                server_nonce = Some(value.to_string());
            } else if let Some(value) = attr.strip_prefix("s=") {
                salt = Some(
                    BASE64
                        .decode(value)
                        .map_err(|_| AuthError::Sasl("salt is not valid base64"))?,
                );
            } else if let Some(value) = attr.strip_prefix("i=") {
                iterations = Some(
                    value
                        .parse::<u32>()
                        .map_err(|_| AuthError::Sasl("iteration count is not a number"))?,
                );
            }
        }

        let server_nonce = server_nonce.ok_or(AuthError::Sasl("missing server nonce"))?;
        let salt = salt.ok_or(AuthError::Sasl("missing salt"))?;
        let iterations = iterations.ok_or(AuthError::Sasl("missing iteration count"))?;
        if iterations == 0 {
            return Err(AuthError::Sasl("zero iteration count"));
        }
        // the combined nonce must extend ours, or someone is replaying
        if !server_nonce.starts_with(&self.nonce) {
            return Err(AuthError::Sasl("server nonce does not extend client nonce"));
        }

        let salted_password =
            pbkdf2_hmac_array::<Sha256, 32>(self.password.as_bytes(), &salt, iterations);

        let client_key = hmac(&salted_password, b"Client Key");
        let stored_key: [u8; 32] = Sha256::digest(client_key).into();

        // "biws" is base64("n,,"), the gs2 header echoed in channel binding
        let without_proof = format!("c=biws,r={server_nonce}");
        let auth_message =
            format!("{},{},{}", self.client_first_bare, message, without_proof);

        let client_signature = hmac(&stored_key, auth_message.as_bytes());
        let mut proof = client_key;
        for (p, s) in proof.iter_mut().zip(client_signature) {
            *p ^= s;
        }

        self.state = State::AwaitingFinal { salted_password, auth_message };
        Ok(format!("{without_proof},p={}", BASE64.encode(proof)))
    }

    /// Verify the server signature from the final message.
    pub fn server_final(&mut self, data: &[u8]) -> Result<(), AuthError> {
        let State::AwaitingFinal { salted_password, auth_message } = &self.state else {
            return Err(AuthError::Sasl("server-final out of order"));
        };

        let message = std::str::from_utf8(data)
            .map_err(|_| AuthError::Sasl("server-final is not utf8"))?;
        let signature = message
            .split(',')
            .find_map(|attr| attr.strip_prefix("v="))
            .ok_or(AuthError::Sasl("missing server signature"))?;
        let signature = BASE64
            .decode(signature)
            .map_err(|_| AuthError::Sasl("server signature is not valid base64"))?;

        let server_key = hmac(salted_password, b"Server Key");
        let expected = hmac(&server_key, auth_message.as_bytes());

        if signature != expected {
            return Err(AuthError::ServerSignature);
        }

        self.state = State::Done;
        Ok(())
    }
}

fn hmac(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(key).expect("hmac-sha256 accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

#[cfg(test)]
mod test {
    use super::*;

    // RFC 7677 §3 example exchange
    const USER: &str = "user";
    const PASSWORD: &str = "pencil";
    const CLIENT_NONCE: &str = "rOprNGfwEbeRWgbNEkqO";
    const SERVER_FIRST: &str =
        "r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096";
    const CLIENT_FINAL: &str = "c=biws,r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,\
        p=dHzbZapWIk4jUhN+Ute9ytag9zjfMHgsqmmiz7AndVQ=";
    const SERVER_FINAL: &str = "v=6rriTRBi23WpRR/wtup+mMhUZUn/dB5nLTJRsjl95G4=";

    fn exchange() -> ScramSha256 {
        ScramSha256::with_nonce(USER, PASSWORD, CLIENT_NONCE.to_string())
    }

    #[test]
    fn rfc7677_client_first() {
        assert_eq!(exchange().client_first(), "n,,n=user,r=rOprNGfwEbeRWgbNEkqO");
    }

    #[test]
    fn rfc7677_client_proof() {
        let mut scram = exchange();
        let client_final = scram.server_first(SERVER_FIRST.as_bytes()).unwrap();
        assert_eq!(client_final, CLIENT_FINAL);
    }

    #[test]
    fn rfc7677_server_signature() {
        let mut scram = exchange();
        scram.server_first(SERVER_FIRST.as_bytes()).unwrap();
        scram.server_final(SERVER_FINAL.as_bytes()).unwrap();
    }

    #[test]
    fn wrong_password_rejects_server_signature() {
        let mut scram = ScramSha256::with_nonce(USER, "not-pencil", CLIENT_NONCE.to_string());
        scram.server_first(SERVER_FIRST.as_bytes()).unwrap();
        let err = scram.server_final(SERVER_FINAL.as_bytes()).unwrap_err();
        assert!(matches!(err, AuthError::ServerSignature));
    }

    #[test]
    fn foreign_server_nonce_is_rejected() {
        let mut scram = exchange();
        let err = scram
            .server_first(b"r=completely-different,s=AAAA,i=4096")
            .unwrap_err();
        assert!(matches!(err, AuthError::Sasl(_)));
    }

    #[test]
    fn username_special_characters_are_escaped() {
        let scram = ScramSha256::with_nonce("a=b,c", "x", "nonce".into());
        assert_eq!(scram.client_first(), "n,,n=a=3Db=2Cc,r=nonce");
    }
}
