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
//! Client side of key exchange: we always send the first `KEXDH_INIT`,
//! since we are the one proposing `e = g^x mod p`.
use super::Config;
use crate::cipher::CipherPair;
use crate::kex;
use crate::negotiation::{self, Select};
use crate::session::{KexDhDone, KexInit};
use crate::sshbuffer::SSHBuffer;
use crate::Error;

impl KexInit {
    pub(crate) fn client_parse(mut self, config: &Config, cipher: &CipherPair, buf: &[u8], write_buffer: &mut SSHBuffer) -> Result<KexDhDone, Error> {
        self.exchange.server_kex_init.extend(buf);
        let algo = negotiation::Client::read_kex(buf, &config.preferred)?;
        if !self.sent {
            self.client_write(config, cipher, write_buffer)?;
        }

        // Reuse `client_kex_init` as scratch space for the `KEXDH_INIT`
        // packet, then truncate it back to just the KEXINIT payload.
        let i0 = self.exchange.client_kex_init.len();
        let dh = kex::Algorithm::client_dh(algo.kex, &mut self.exchange.client_ephemeral, &mut self.exchange.client_kex_init)?;
        cipher.write(&self.exchange.client_kex_init[i0..], write_buffer);
        self.exchange.client_kex_init.resize(i0);

        Ok(KexDhDone { exchange: self.exchange, names: algo, kex: dh, session_id: self.session_id })
    }

    pub(crate) fn client_write(&mut self, config: &Config, cipher: &CipherPair, write_buffer: &mut SSHBuffer) -> Result<(), Error> {
        self.exchange.client_kex_init.clear();
        negotiation::write_kex(&config.preferred, &mut self.exchange.client_kex_init);
        self.sent = true;
        cipher.write(&self.exchange.client_kex_init, write_buffer);
        Ok(())
    }
}
