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
//! AES-CTR driven through a separately negotiated HMAC, per RFC 4253
//! §6. The stream cipher and the mac are independent: this module only
//! wires them together behind the [`Cipher`] trait.
use std::marker::PhantomData;
use std::sync::Mutex;

use aes::cipher::{KeyIvInit, StreamCipher};
use rand::RngCore;

use super::{Cipher, OpeningKey, SealingKey};
use crate::mac::{Mac, MacAlgorithm};
use crate::Error;

pub(crate) struct SshBlockCipher<C> {
    key_len: usize,
    _marker: PhantomData<C>,
}

impl<C> SshBlockCipher<C> {
    pub(crate) const fn new(key_len: usize) -> Self {
        SshBlockCipher { key_len, _marker: PhantomData }
    }
}

impl<C: KeyIvInit + StreamCipher + Clone + Send + 'static> Cipher for SshBlockCipher<C> {
    fn key_len(&self) -> usize {
        self.key_len
    }

    fn make_opening_key(
        &self,
        key: &[u8],
        iv: &[u8],
        mac_key: &[u8],
        mac: &dyn MacAlgorithm,
    ) -> Result<Box<dyn OpeningKey + Send>, Error> {
        let cipher = C::new_from_slices(key, iv).map_err(|_| Error::InvalidKeySize)?;
        Ok(Box::new(BlockKey { cipher: Mutex::new(cipher), mac: mac.make_mac(mac_key), tag_len: mac.mac_len() }))
    }

    fn make_sealing_key(
        &self,
        key: &[u8],
        iv: &[u8],
        mac_key: &[u8],
        mac: &dyn MacAlgorithm,
    ) -> Result<Box<dyn SealingKey + Send>, Error> {
        let cipher = C::new_from_slices(key, iv).map_err(|_| Error::InvalidKeySize)?;
        Ok(Box::new(BlockKey { cipher: Mutex::new(cipher), mac: mac.make_mac(mac_key), tag_len: mac.mac_len() }))
    }
}

/// Holds the running keystream position behind a `Mutex` so that
/// sealing/opening only ever needs shared (`&self`) access, matching
/// the `CipherPair` being handed out as an `Arc` to both the read and
/// write halves of a connection.
struct BlockKey<C> {
    cipher: Mutex<C>,
    mac: Box<dyn Mac + Send>,
    tag_len: usize,
}

impl<C: StreamCipher + Clone> OpeningKey for BlockKey<C> {
    fn decrypt_packet_length(&self, _seqn: u32, encrypted_packet_length: [u8; 4]) -> Result<[u8; 4], Error> {
        // Peek at the keystream without disturbing the real cipher's
        // position: the length field is re-decrypted for real, at the
        // same counter offset, once the rest of the packet has arrived.
        let mut peek = self.cipher.lock().unwrap().clone();
        let mut len = encrypted_packet_length;
        peek.apply_keystream(&mut len);
        Ok(len)
    }

    fn tag_len(&self) -> usize {
        self.tag_len
    }

    fn open<'a>(&self, seqn: u32, ciphertext_in_plaintext_out: &'a mut [u8], tag: &[u8]) -> Result<&'a [u8], Error> {
        self.cipher.lock().unwrap().apply_keystream(ciphertext_in_plaintext_out);
        if !self.mac.verify(seqn, ciphertext_in_plaintext_out, tag) {
            return Err(Error::InvalidMac);
        }
        ciphertext_in_plaintext_out
            .get(4..)
            .ok_or(Error::InvalidDecryptedPlaintextLength)
    }
}

impl<C: StreamCipher + Clone> SealingKey for BlockKey<C> {
    fn padding_length(&self, plaintext: &[u8]) -> usize {
        const BLOCK_SIZE: usize = 16; // AES block size, in bytes.
        let unpadded = super::PACKET_LENGTH_LEN + 1 + plaintext.len();
        let mut padding = BLOCK_SIZE - (unpadded % BLOCK_SIZE);
        if padding < 4 {
            padding += BLOCK_SIZE;
        }
        padding
    }

    fn fill_padding(&self, padding_out: &mut [u8]) {
        rand::thread_rng().fill_bytes(padding_out);
    }

    fn tag_len(&self) -> usize {
        self.tag_len
    }

    fn seal(&self, seqn: u32, plaintext_in_ciphertext_out: &mut [u8], tag_out: &mut [u8]) {
        self.mac.sign(seqn, plaintext_in_ciphertext_out, tag_out);
        self.cipher.lock().unwrap().apply_keystream(plaintext_in_ciphertext_out);
    }
}
