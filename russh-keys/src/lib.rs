// Copyright 2016 Pierre-Étienne Meunier
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
//! Parse, decrypt and verify SSH keys.
//!
//! ```
//! let key = russh_keys::parse_public_key_base64(
//!     "AAAAC3NzaC1lZDI1NTE5AAAAIJdD7y3aLq454yWBdwLWbieU1ebz9/cu7/QEXn9OIeZJ",
//! );
//! assert!(key.is_ok());
//! ```

use std::io::Write;

use byteorder::{BigEndian, WriteBytesExt};

pub mod encoding;
pub mod key;
pub mod signature;

mod format;
pub use format::*;

/// Anything that can go wrong while handling a key.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Could not read key")]
    CouldNotReadKey,
    #[error("Invalid key")]
    InvalidKey,
    #[error("Invalid private key format")]
    InvalidPrivateKeyFormat,
    #[error("Unsupported key type {0}")]
    UnsupportedKeyType(String),
    #[error("This key is encrypted")]
    KeyIsEncrypted,
    #[error("This private key is encrypted")]
    EncryptedPrivateKey,
    #[error("A passphrase is required to decrypt this key")]
    PassphraseRequired,
    #[error("Incorrect passphrase")]
    IncorrectPassphrase,
    #[error("Index out of bounds")]
    IndexOutOfBounds,
    #[error("Unknown signature type {0}")]
    UnknownSignatureType(String),
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Cryptographic error")]
    CryptographicError,
    #[error("Signing error")]
    SigningError,
    #[error("Base64 decoding error: {0}")]
    Decode(#[from] data_encoding::DecodeError),
    #[error(transparent)]
    IO(#[from] std::io::Error),
}

/// Parse a public key in the one-line `keytype base64 [comment]` format
/// used by `authorized_keys` and `id_*.pub` files.
///
/// ```
/// russh_keys::parse_public_key_base64(
///     "AAAAC3NzaC1lZDI1NTE5AAAAIJdD7y3aLq454yWBdwLWbieU1ebz9/cu7/QEXn9OIeZJ",
/// ).unwrap();
/// ```
pub fn parse_public_key_base64(key: &str) -> Result<key::PublicKey, Error> {
    let base = data_encoding::BASE64.decode(key.as_bytes())?;
    key::parse_public_key(&base)
}

/// Parse a full `authorized_keys`-style line: an optional leading key
/// type, the base64 blob, and an optional trailing comment.
pub fn parse_public_key_line(line: &str) -> Result<key::PublicKey, Error> {
    let mut split = line.split_whitespace();
    match (split.next(), split.next()) {
        (Some(_keytype), Some(b64)) => parse_public_key_base64(b64),
        (Some(b64), None) => parse_public_key_base64(b64),
        _ => Err(Error::CouldNotReadKey),
    }
}

/// Anything that can be turned into the base64 part of an SSH public key
/// blob (`ssh-ed25519 AAAA...`).
pub trait PublicKeyBase64 {
    fn public_key_bytes(&self) -> Vec<u8>;

    fn public_key_base64(&self) -> String {
        data_encoding::BASE64.encode(&self.public_key_bytes())
    }
}

impl PublicKeyBase64 for key::PublicKey {
    fn public_key_bytes(&self) -> Vec<u8> {
        use encoding::Encoding;
        let mut s = Vec::new();
        match self {
            key::PublicKey::Ed25519(k) => {
                s.extend_ssh_string(key::NAME_ED25519.as_bytes());
                s.extend_ssh_string(&k.to_bytes());
            }
            key::PublicKey::RSA { key, hash } => {
                s.extend_ssh_string(hash.name().as_bytes());
                s.extend_ssh_mpint(&key.e);
                s.extend_ssh_mpint(&key.n);
            }
            key::PublicKey::EC { key } => {
                s.extend_ssh_string(key.curve_name().as_bytes());
                s.extend_ssh_string(key.ident().as_bytes());
                s.extend_ssh_string(&key.sec1_bytes());
            }
        }
        s
    }
}

impl PublicKeyBase64 for key::KeyPair {
    fn public_key_bytes(&self) -> Vec<u8> {
        self.public_key().public_key_bytes()
    }
}

/// Write a public key, base64-encoded and prefixed with its algorithm
/// name, e.g. `ssh-ed25519 AAAA...`.
pub fn write_public_key_base64<W: Write>(mut w: W, key: &key::PublicKey) -> Result<(), Error> {
    writeln!(w, "{} {}", key.name(), key.public_key_base64())?;
    Ok(())
}

pub(crate) fn write_u32_be(v: &mut Vec<u8>, n: u32) {
    v.write_u32::<BigEndian>(n).expect("Vec<u8> write is infallible");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_garbage() {
        assert!(parse_public_key_base64("not base64 at all!!").is_err());
    }

    #[test]
    fn parses_authorized_keys_line() {
        let line = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIJdD7y3aLq454yWBdwLWbieU1ebz9/cu7/QEXn9OIeZJ user@host";
        assert!(parse_public_key_line(line).is_ok());
    }
}
