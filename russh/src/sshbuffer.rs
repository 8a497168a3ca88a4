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
use std::num::Wrapping;

use russh_cryptovec::CryptoVec;

/// The growable buffer behind one direction of the wire: the next
/// packet's still-encrypted bytes as they arrive, or the next packet's
/// plaintext as it is assembled for sending.
#[derive(Debug)]
pub struct SSHBuffer {
    pub buffer: CryptoVec,
    /// Length of the next packet, once known; 0 while still waiting on
    /// the length field.
    pub len: usize,
    pub bytes: usize,
    // Sequence numbers are on 32 bits and wrap.
    // https://tools.ietf.org/html/rfc4253#section-6.4
    pub seqn: Wrapping<u32>,
}

impl Default for SSHBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl SSHBuffer {
    pub fn new() -> Self {
        SSHBuffer {
            buffer: CryptoVec::new(),
            len: 0,
            bytes: 0,
            seqn: Wrapping(0),
        }
    }

    pub fn send_ssh_id(&mut self, id: &[u8]) {
        self.buffer.extend(id);
        self.buffer.push(b'\r');
        self.buffer.push(b'\n');
    }
}
