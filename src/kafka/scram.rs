//! Client side of SCRAM-SHA-512 (RFC 5802) as carried by SaslAuthenticate.
//!
//! ```text
//! client-first   n,,n=<user>,r=<client nonce>
//! server-first   r=<nonce>,s=<salt>,i=<iterations>
//! client-final   c=biws,r=<nonce>,p=<proof>
//! server-final   v=<server signature> | e=<error>
//! ```

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha512};
use std::fmt;

use crate::connection::ConnectionError;

const KEY_LEN: usize = 64;

type HmacSha512 = Hmac<Sha512>;

pub(super) struct ScramSha512 {
    username: String,
    password: String,
    client_nonce: String,
    auth_message: Option<String>,
    salted_password: Option<[u8; KEY_LEN]>,
}

impl ScramSha512 {
    pub(super) fn new(username: &str, password: &str) -> Self {
        use rand::RngCore;

        let mut nonce = [0u8; 24];
        rand::rngs::OsRng.fill_bytes(&mut nonce);
        Self::with_nonce(username, password, &BASE64.encode(nonce))
    }

    fn with_nonce(username: &str, password: &str, nonce: &str) -> Self {
        Self {
            // '=' and ',' are the only characters the bare message escapes
            username: username.replace('=', "=3D").replace(',', "=2C"),
            password: password.to_string(),
            client_nonce: nonce.to_string(),
            auth_message: None,
            salted_password: None,
        }
    }

    fn client_first_bare(&self) -> String {
        format!("n={},r={}", self.username, self.client_nonce)
    }

    pub(super) fn client_first_message(&self) -> Vec<u8> {
        format!("n,,{}", self.client_first_bare()).into_bytes()
    }

    pub(super) fn client_final_message(&mut self, server_first: &[u8]) -> Result<Vec<u8>, ConnectionError> {
        let server_first = std::str::from_utf8(server_first)
            .map_err(|err| failure(format!("server-first message is not UTF-8: {err}")))?;
        let (nonce, salt, iterations) = parse_server_first(server_first)?;
        if !nonce.starts_with(&self.client_nonce) {
            return Err(failure("server nonce does not extend the client nonce"));
        }

        let mut salted_password = [0u8; KEY_LEN];
        pbkdf2::pbkdf2::<HmacSha512>(self.password.as_bytes(), &salt, iterations, &mut salted_password)
            .map_err(|err| failure(err.to_string()))?;

        let without_proof = format!("c=biws,r={nonce}");
        let auth_message = format!("{},{},{}", self.client_first_bare(), server_first, without_proof);

        let client_key = hmac(&salted_password, b"Client Key")?;
        let stored_key = Sha512::digest(&client_key);
        let signature = hmac(&stored_key, auth_message.as_bytes())?;
        let proof: Vec<u8> = client_key.iter().zip(&signature).map(|(k, s)| k ^ s).collect();

        self.salted_password = Some(salted_password);
        self.auth_message = Some(auth_message);
        Ok(format!("{without_proof},p={}", BASE64.encode(proof)).into_bytes())
    }

    pub(super) fn verify_server_final(&self, server_final: &[u8]) -> Result<(), ConnectionError> {
        let server_final = std::str::from_utf8(server_final)
            .map_err(|err| failure(format!("server-final message is not UTF-8: {err}")))?;
        if let Some(error) = server_final.strip_prefix("e=") {
            return Err(failure(error));
        }
        let received = server_final
            .strip_prefix("v=")
            .ok_or_else(|| failure("server-final message carries no signature"))?;
        let received = BASE64
            .decode(received)
            .map_err(|err| failure(format!("server signature is not base64: {err}")))?;

        let (Some(salted_password), Some(auth_message)) = (&self.salted_password, &self.auth_message) else {
            return Err(failure("server-final message arrived before server-first"));
        };
        let server_key = hmac(salted_password, b"Server Key")?;
        let mut mac = HmacSha512::new_from_slice(&server_key).map_err(|err| failure(err.to_string()))?;
        mac.update(auth_message.as_bytes());
        // constant-time comparison
        mac.verify_slice(&received)
            .map_err(|_| failure("server signature does not match"))
    }
}

impl fmt::Debug for ScramSha512 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScramSha512")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

fn failure(message: impl Into<String>) -> ConnectionError {
    ConnectionError::Auth(format!("SCRAM-SHA-512: {}", message.into()))
}

fn hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>, ConnectionError> {
    let mut mac = HmacSha512::new_from_slice(key).map_err(|err| failure(err.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn parse_server_first(message: &str) -> Result<(String, Vec<u8>, u32), ConnectionError> {
    let mut nonce = None;
    let mut salt = None;
    let mut iterations = None;

    for attribute in message.split(',') {
        if let Some(value) = attribute.strip_prefix("r=") {
            nonce = Some(value.to_string());
        } else if let Some(value) = attribute.strip_prefix("s=") {
            salt = Some(
                BASE64
                    .decode(value)
                    .map_err(|err| failure(format!("salt is not base64: {err}")))?,
            );
        } else if let Some(value) = attribute.strip_prefix("i=") {
            iterations = Some(
                value
                    .parse::<u32>()
                    .map_err(|err| failure(format!("invalid iteration count {value}: {err}")))?,
            );
        }
    }

    match (nonce, salt, iterations) {
        (Some(nonce), Some(salt), Some(iterations)) if iterations > 0 => Ok((nonce, salt, iterations)),
        _ => Err(failure(format!("incomplete server-first message: {message}"))),
    }
}
