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
//! The identity cipher, used for the first `SSH_MSG_KEXINIT` exchange
//! before any session keys exist.
use rand::RngCore;

use super::{Cipher, OpeningKey, SealingKey};
use crate::mac::MacAlgorithm;
use crate::Error;

pub(crate) struct Clear;

impl Cipher for Clear {
    fn key_len(&self) -> usize {
        0
    }

    fn make_opening_key(
        &self,
        _key: &[u8],
        _iv: &[u8],
        _mac_key: &[u8],
        _mac: &dyn MacAlgorithm,
    ) -> Result<Box<dyn OpeningKey + Send>, Error> {
        Ok(Box::new(Clear))
    }

    fn make_sealing_key(
        &self,
        _key: &[u8],
        _iv: &[u8],
        _mac_key: &[u8],
        _mac: &dyn MacAlgorithm,
    ) -> Result<Box<dyn SealingKey + Send>, Error> {
        Ok(Box::new(Clear))
    }
}

impl OpeningKey for Clear {
    fn decrypt_packet_length(&self, _seqn: u32, encrypted_packet_length: [u8; 4]) -> Result<[u8; 4], Error> {
        Ok(encrypted_packet_length)
    }

    fn tag_len(&self) -> usize {
        0
    }

    fn open<'a>(&self, _seqn: u32, ciphertext_in_plaintext_out: &'a mut [u8], _tag: &[u8]) -> Result<&'a [u8], Error> {
        ciphertext_in_plaintext_out
            .get(4..)
            .ok_or(Error::InvalidDecryptedPlaintextLength)
    }
}

impl SealingKey for Clear {
    fn padding_length(&self, plaintext: &[u8]) -> usize {
        const BLOCK_SIZE: usize = 8;
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
        0
    }

    fn seal(&self, _seqn: u32, _plaintext_in_ciphertext_out: &mut [u8], _tag_out: &mut [u8]) {}
}
