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
//! Cipher names and the `OpeningKey`/`SealingKey` traits used to drive
//! one negotiated cipher independently in each direction. Every
//! supported cipher here is a stream cipher with a MAC carried
//! separately (RFC 4253 §6), so the "tag" in these traits is always an
//! HMAC digest, never an AEAD tag.
use std::collections::HashMap;
use std::fmt::Debug;
use std::num::Wrapping;

use byteorder::{BigEndian, ByteOrder};
use log::debug;
use once_cell::sync::Lazy;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::mac::MacAlgorithm;
use crate::sshbuffer::SSHBuffer;
use crate::Error;

pub(crate) mod block;
pub(crate) mod clear;

use block::SshBlockCipher;
use clear::Clear;

pub(crate) trait Cipher {
    fn key_len(&self) -> usize;

    fn make_opening_key(
        &self,
        key: &[u8],
        iv: &[u8],
        mac_key: &[u8],
        mac: &dyn MacAlgorithm,
    ) -> Result<Box<dyn OpeningKey + Send>, Error>;

    fn make_sealing_key(
        &self,
        key: &[u8],
        iv: &[u8],
        mac_key: &[u8],
        mac: &dyn MacAlgorithm,
    ) -> Result<Box<dyn SealingKey + Send>, Error>;
}

/// `clear` — the identity cipher used before the first key exchange completes.
pub const CLEAR: Name = Name("clear");
/// `aes128-ctr`
pub const AES_128_CTR: Name = Name("aes128-ctr");
/// `aes256-ctr`
pub const AES_256_CTR: Name = Name("aes256-ctr");

static _CLEAR: Clear = Clear {};
static _AES_128_CTR: SshBlockCipher<ctr::Ctr128BE<aes::Aes128>> = SshBlockCipher::new(16);
static _AES_256_CTR: SshBlockCipher<ctr::Ctr128BE<aes::Aes256>> = SshBlockCipher::new(32);

pub(crate) static CIPHERS: Lazy<HashMap<&'static Name, &(dyn Cipher + Send + Sync)>> = Lazy::new(|| {
    let mut h: HashMap<&'static Name, &(dyn Cipher + Send + Sync)> = HashMap::new();
    h.insert(&CLEAR, &_CLEAR);
    h.insert(&AES_128_CTR, &_AES_128_CTR);
    h.insert(&AES_256_CTR, &_AES_256_CTR);
    h
});

#[derive(Debug, PartialEq, Eq, Copy, Clone, Hash)]
pub struct Name(&'static str);

impl Name {
    pub const fn new(s: &'static str) -> Self {
        Name(s)
    }
}

impl AsRef<str> for Name {
    fn as_ref(&self) -> &str {
        self.0
    }
}

/// A fresh identity `CipherPair`, used before the first key exchange
/// completes (there are no Box-able `const` trait objects, so this is
/// a constructor rather than an associated constant).
pub(crate) fn clear_pair() -> CipherPair {
    CipherPair { local_to_remote: Box::new(Clear), remote_to_local: Box::new(Clear) }
}

pub(crate) struct CipherPair {
    pub local_to_remote: Box<dyn SealingKey + Send>,
    pub remote_to_local: Box<dyn OpeningKey + Send>,
}

impl Debug for CipherPair {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "CipherPair {{ .. }}")
    }
}

pub(crate) trait OpeningKey {
    fn decrypt_packet_length(&self, seqn: u32, encrypted_packet_length: [u8; 4]) -> Result<[u8; 4], Error>;

    fn tag_len(&self) -> usize;

    fn open<'a>(&self, seqn: u32, ciphertext_in_plaintext_out: &'a mut [u8], tag: &[u8]) -> Result<&'a [u8], Error>;
}

pub(crate) trait SealingKey {
    fn padding_length(&self, plaintext: &[u8]) -> usize;

    fn fill_padding(&self, padding_out: &mut [u8]);

    fn tag_len(&self) -> usize;

    fn seal(&self, seqn: u32, plaintext_in_ciphertext_out: &mut [u8], tag_out: &mut [u8]);

    fn write(&self, payload: &[u8], buffer: &mut SSHBuffer) {
        // https://tools.ietf.org/html/rfc4253#section-6
        debug!("writing, seqn = {:?}", buffer.seqn.0);

        let padding_length = self.padding_length(payload);
        let packet_length = PADDING_LENGTH_LEN + payload.len() + padding_length;
        let offset = buffer.buffer.len();

        // https://tools.ietf.org/html/rfc4253#section-6.1
        assert!(packet_length <= u32::MAX as usize);
        buffer.buffer.push_u32_be(packet_length as u32);

        assert!(padding_length <= u8::MAX as usize);
        buffer.buffer.push(padding_length as u8);

        buffer.buffer.extend(payload);
        self.fill_padding(buffer.buffer.resize_mut(padding_length));
        buffer.buffer.resize_mut(self.tag_len());

        let (plaintext, tag) = buffer.buffer[offset..].split_at_mut(PACKET_LENGTH_LEN + packet_length);
        self.seal(buffer.seqn.0, plaintext, tag);

        buffer.bytes += payload.len();
        // Sequence numbers are on 32 bits and wrap. https://tools.ietf.org/html/rfc4253#section-6.4
        buffer.seqn += Wrapping(1);
    }
}

impl CipherPair {
    /// Frame, pad, MAC and encrypt `payload`, appending the result to `buffer`.
    pub(crate) fn write(&self, payload: &[u8], buffer: &mut SSHBuffer) {
        self.local_to_remote.write(payload, buffer)
    }
}

pub(crate) async fn read<'a, R: AsyncRead + Unpin>(
    stream: &'a mut R,
    buffer: &'a mut SSHBuffer,
    cipher: &'a (dyn OpeningKey + Send),
) -> Result<usize, Error> {
    if buffer.len == 0 {
        let mut len = [0; 4];
        stream.read_exact(&mut len).await?;

        let seqn = buffer.seqn.0;
        buffer.buffer.clear();
        buffer.buffer.extend(&len);

        let len = cipher.decrypt_packet_length(seqn, len)?;
        buffer.len = BigEndian::read_u32(&len) as usize + cipher.tag_len();
    }

    buffer.buffer.resize(buffer.len + 4);
    stream.read_exact(&mut buffer.buffer[4..]).await?;

    let seqn = buffer.seqn.0;
    let ciphertext_len = buffer.buffer.len() - cipher.tag_len();
    let (ciphertext, tag) = buffer.buffer.split_at_mut(ciphertext_len);
    let plaintext = cipher.open(seqn, ciphertext, tag)?;

    let padding_length = *plaintext.first().unwrap_or(&0) as usize;
    if padding_length < 4 {
        return Err(Error::InsufficientPadding);
    }
    let plaintext_end = plaintext.len().checked_sub(padding_length).ok_or(Error::ExcessPadding)?;

    buffer.seqn += Wrapping(1);
    buffer.len = 0;
    buffer.buffer.resize(plaintext_end + 4);

    Ok(plaintext_end + 4)
}

pub(crate) const PACKET_LENGTH_LEN: usize = 4;
pub(crate) const MINIMUM_PACKET_LEN: usize = 16;
const PADDING_LENGTH_LEN: usize = 1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_has_both_directions_of_every_cipher() {
        assert!(CIPHERS.contains_key(&CLEAR));
        assert!(CIPHERS.contains_key(&AES_128_CTR));
        assert!(CIPHERS.contains_key(&AES_256_CTR));
    }
}
