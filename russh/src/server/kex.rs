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
//! Server side of key exchange. Unlike the client, which sends `e` and
//! waits for the peer's `f`, the server receives `e` and `KEXDH_INIT`
//! already carries everything needed to answer with `f`, the host key
//! and its signature in a single `KEXDH_REPLY` -- there is no
//! server-side equivalent of `KexDhDone` sitting in the session's `Kex`
//! state between messages.
use russh_keys::encoding::Encoding;
use russh_keys::PublicKeyBase64;

use super::Config;
use crate::cipher::CipherPair;
use crate::kex;
use crate::negotiation::{self, Select};
use crate::session::{KexDh, KexDhDone, KexInit, NewKeys};
use crate::sshbuffer::SSHBuffer;
use crate::{msg, Error};

impl KexInit {
    pub(crate) fn server_parse(mut self, config: &Config, cipher: &CipherPair, buf: &[u8], write_buffer: &mut SSHBuffer) -> Result<KexDh, Error> {
        self.exchange.client_kex_init.extend(buf);
        let algo = negotiation::Server::read_kex(buf, &config.preferred)?;
        if !self.sent {
            self.server_write(config, cipher, write_buffer)?;
        }

        let host_key = config
            .keys
            .iter()
            .find(|k| k.name() == algo.key)
            .cloned()
            .ok_or(Error::UnknownKey)?;

        Ok(KexDh { exchange: self.exchange, names: algo, session_id: self.session_id, host_key })
    }

    pub(crate) fn server_write(&mut self, config: &Config, cipher: &CipherPair, write_buffer: &mut SSHBuffer) -> Result<(), Error> {
        self.exchange.server_kex_init.clear();
        negotiation::write_kex(&config.preferred, &mut self.exchange.server_kex_init);
        self.sent = true;
        cipher.write(&self.exchange.server_kex_init, write_buffer);
        Ok(())
    }
}

impl KexDh {
    /// Handle `SSH_MSG_KEXDH_INIT`, answer with `SSH_MSG_KEXDH_REPLY` and
    /// `SSH_MSG_NEWKEYS`, and derive the session keys in one step -- the
    /// server never waits on a second round trip to finish a kex round.
    pub(crate) fn parse(mut self, cipher: &CipherPair, buf: &[u8], write_buffer: &mut SSHBuffer) -> Result<NewKeys, Error> {
        let dh = kex::Algorithm::server_dh(self.names.kex, &mut self.exchange, buf)?;

        let host_pubkey = self.host_key.public_key();
        let mut hash_buffer = russh_cryptovec::CryptoVec::new();
        let hash = dh.compute_exchange_hash(&host_pubkey, &self.exchange, &mut hash_buffer)?;

        let mut reply = russh_cryptovec::CryptoVec::new();
        reply.push(msg::KEXDH_REPLY);
        reply.extend_ssh_string(&host_pubkey.public_key_bytes());
        reply.extend_ssh_string(&self.exchange.server_ephemeral);
        self.host_key.add_signature(&mut reply, &hash[..])?;
        cipher.write(&reply, write_buffer);
        cipher.write(&[msg::NEWKEYS], write_buffer);

        let kexdhdone = KexDhDone { exchange: self.exchange, kex: dh, names: self.names, session_id: self.session_id };
        kexdhdone.compute_keys(hash, true)
    }
}
