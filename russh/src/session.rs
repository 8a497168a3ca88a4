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
//! The encrypted-session state machine: key exchange progress,
//! negotiated algorithms, the channel table, and the outbound packet
//! buffer shared by every channel on one connection.
use std::collections::HashMap;
use std::num::Wrapping;
use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder};
use russh_cryptovec::CryptoVec;
use russh_keys::encoding::Encoding;
use russh_keys::key;

use crate::channel::OpenChannel;
use crate::sshbuffer::SSHBuffer;
use crate::{auth, cipher, kex, msg, negotiation, push_packet};
use crate::{ChannelId, Disconnect, Limits};

#[derive(Debug)]
pub(crate) struct Encrypted {
    pub state: EncryptedState,
    // Always `Some`, except while briefly `mem::take`n during a rekey.
    pub exchange: Option<Exchange>,
    pub kex: kex::Algorithm,
    pub mac: &'static str,
    pub session_id: Vec<u8>,
    pub rekey: Option<Kex>,
    pub channels: HashMap<ChannelId, OpenChannel>,
    pub last_channel_id: Wrapping<u32>,
    pub wants_reply: bool,
    pub write: CryptoVec,
    pub write_cursor: usize,
    pub last_rekey: std::time::Instant,
}

pub(crate) struct CommonSession<Config> {
    pub auth_user: String,
    pub config: Config,
    pub encrypted: Option<Encrypted>,
    pub auth_method: Option<auth::Method>,
    pub write_buffer: SSHBuffer,
    pub kex: Option<Kex>,
    pub cipher: Arc<cipher::CipherPair>,
    pub wants_reply: bool,
    pub disconnected: bool,
    pub buffer: CryptoVec,
}

impl<C> CommonSession<C> {
    pub fn newkeys(&mut self, newkeys: NewKeys) {
        if let Some(ref mut enc) = self.encrypted {
            enc.exchange = Some(newkeys.exchange);
            enc.kex = newkeys.kex;
            enc.mac = newkeys.names.mac;
            self.cipher = Arc::new(newkeys.cipher);
        }
    }

    pub fn encrypted(&mut self, state: EncryptedState, newkeys: NewKeys) {
        self.encrypted = Some(Encrypted {
            exchange: Some(newkeys.exchange),
            kex: newkeys.kex,
            mac: newkeys.names.mac,
            session_id: newkeys.session_id,
            state,
            rekey: None,
            channels: HashMap::new(),
            last_channel_id: Wrapping(0),
            wants_reply: false,
            write: CryptoVec::new(),
            write_cursor: 0,
            last_rekey: std::time::Instant::now(),
        });
        self.cipher = Arc::new(newkeys.cipher);
    }

    /// Queue `SSH_MSG_DISCONNECT`; idempotent.
    pub fn disconnect(&mut self, reason: Disconnect, description: &str, language_tag: &str) {
        let disconnect = |buf: &mut CryptoVec| {
            push_packet!(buf, {
                buf.push(msg::DISCONNECT);
                buf.push_u32_be(reason as u32);
                buf.extend_ssh_string(description.as_bytes());
                buf.extend_ssh_string(language_tag.as_bytes());
            });
        };
        if !self.disconnected {
            self.disconnected = true;
            if let Some(ref mut enc) = self.encrypted {
                disconnect(&mut enc.write)
            } else {
                disconnect(&mut self.write_buffer.buffer)
            }
        }
    }

    pub fn byte(&mut self, channel: ChannelId, msg: u8) {
        if let Some(ref mut enc) = self.encrypted {
            enc.byte(channel, msg)
        }
    }
}

impl Encrypted {
    pub fn byte(&mut self, channel: ChannelId, msg: u8) {
        if let Some(channel) = self.channels.get(&channel) {
            push_packet!(self.write, {
                self.write.push(msg);
                self.write.push_u32_be(channel.recipient_channel);
            });
        }
    }

    pub fn eof(&mut self, channel: ChannelId) {
        self.byte(channel, msg::CHANNEL_EOF);
    }

    pub fn close(&mut self, channel: ChannelId) {
        self.byte(channel, msg::CHANNEL_CLOSE);
    }

    pub fn sender_window_size(&self, channel: ChannelId) -> usize {
        self.channels.get(&channel).map(|c| c.sender_window_size as usize).unwrap_or(0)
    }

    /// RFC 4254 §5.2: top off the peer's send window once it drops
    /// below half of `target`.
    pub fn adjust_window_size(&mut self, channel: ChannelId, data: &[u8], target: u32) -> bool {
        if let Some(channel) = self.channels.get_mut(&channel) {
            if data.len() as u32 <= channel.sender_window_size {
                channel.sender_window_size -= data.len() as u32;
            }
            if channel.sender_window_size < target / 2 {
                push_packet!(self.write, {
                    self.write.push(msg::CHANNEL_WINDOW_ADJUST);
                    self.write.push_u32_be(channel.recipient_channel);
                    self.write.push_u32_be(target - channel.sender_window_size);
                });
                channel.sender_window_size = target;
                return true;
            }
        }
        false
    }

    pub fn flush_pending(&mut self, channel: ChannelId) -> usize {
        let mut pending_size = 0;
        if let Some(channel) = self.channels.get_mut(&channel) {
            while let Some((buf, ext, from)) = channel.pending_data.pop_front() {
                let size = OpenChannel::data_noqueue(&mut self.write, channel, &buf, ext, from);
                pending_size += size;
                if from + size < buf.len() {
                    channel.pending_data.push_front((buf, ext, from + size));
                    break;
                }
            }
        }
        pending_size
    }

    pub fn flush_all_pending(&mut self) {
        for channel in self.channels.values_mut() {
            while let Some((buf, ext, from)) = channel.pending_data.pop_front() {
                let size = OpenChannel::data_noqueue(&mut self.write, channel, &buf, ext, from);
                if from + size < buf.len() {
                    channel.pending_data.push_front((buf, ext, from + size));
                    break;
                }
            }
        }
    }

    pub fn has_pending_data(&self, channel: ChannelId) -> bool {
        self.channels.get(&channel).map(|c| !c.pending_data.is_empty()).unwrap_or(false)
    }

    pub fn data(&mut self, channel: ChannelId, buf0: CryptoVec) {
        if let Some(channel) = self.channels.get_mut(&channel) {
            assert!(channel.confirmed);
            if !channel.pending_data.is_empty() || self.rekey.is_some() {
                channel.pending_data.push_back((buf0, None, 0));
                return;
            }
            let buf_len = OpenChannel::data_noqueue(&mut self.write, channel, &buf0, None, 0);
            if buf_len < buf0.len() {
                channel.pending_data.push_back((buf0, None, buf_len))
            }
        }
    }

    pub fn extended_data(&mut self, channel: ChannelId, ext: u32, buf0: CryptoVec) {
        if let Some(channel) = self.channels.get_mut(&channel) {
            assert!(channel.confirmed);
            if !channel.pending_data.is_empty() || self.rekey.is_some() {
                channel.pending_data.push_back((buf0, Some(ext), 0));
                return;
            }
            let buf_len = OpenChannel::data_noqueue(&mut self.write, channel, &buf0, Some(ext), 0);
            if buf_len < buf0.len() {
                channel.pending_data.push_back((buf0, Some(ext), buf_len))
            }
        }
    }

    /// Encrypt and send whatever is queued in `self.write`; returns
    /// whether a rekey threshold (RFC 4253 §9) has now been crossed.
    pub fn flush(&mut self, limits: &Limits, cipher: &cipher::CipherPair, write_buffer: &mut SSHBuffer) -> bool {
        while self.write_cursor < self.write.len() {
            let len = BigEndian::read_u32(&self.write[self.write_cursor..]) as usize;
            let packet = &self.write[(self.write_cursor + 4)..(self.write_cursor + 4 + len)];
            cipher.write(packet, write_buffer);
            self.write_cursor += 4 + len;
        }
        if self.write_cursor >= self.write.len() {
            self.write_cursor = 0;
            self.write.clear();
        }
        let dur = std::time::Instant::now().duration_since(self.last_rekey);
        write_buffer.bytes >= limits.rekey_write_limit || dur >= limits.rekey_time_limit
    }

    pub fn new_channel(&mut self, window_size: u32, maxpacket: u32) -> ChannelId {
        loop {
            self.last_channel_id += Wrapping(1);
            let id = ChannelId(self.last_channel_id.0);
            if let std::collections::hash_map::Entry::Vacant(v) = self.channels.entry(id) {
                v.insert(OpenChannel::new(id, window_size, maxpacket));
                return id;
            }
        }
    }
}

#[derive(Debug)]
pub(crate) enum EncryptedState {
    WaitingServiceRequest { sent: bool, accepted: bool },
    WaitingAuthRequest(auth::AuthRequest),
    Authenticated,
}

/// Transient per-key-exchange state (RFC 4253 §8): identification
/// strings and KEXINIT payloads feed the exchange hash; the ephemeral
/// public values are filled in once the DH messages are exchanged.
#[derive(Debug, Default)]
pub(crate) struct Exchange {
    pub client_id: CryptoVec,
    pub server_id: CryptoVec,
    pub client_kex_init: CryptoVec,
    pub server_kex_init: CryptoVec,
    pub client_ephemeral: CryptoVec,
    pub server_ephemeral: CryptoVec,
}

impl Exchange {
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Debug)]
pub(crate) enum Kex {
    KexInit(KexInit),
    KexDh(KexDh),
    KexDhDone(KexDhDone),
    NewKeys(NewKeys),
}

#[derive(Debug)]
pub(crate) struct KexInit {
    pub algo: Option<negotiation::Names>,
    pub exchange: Exchange,
    pub session_id: Option<Vec<u8>>,
    pub sent: bool,
}

impl KexInit {
    pub fn received_rekey(ex: Exchange, session_id: &[u8]) -> Self {
        let mut kexinit = KexInit { exchange: ex, algo: None, sent: false, session_id: Some(session_id.to_vec()) };
        kexinit.exchange.client_kex_init.clear();
        kexinit.exchange.server_kex_init.clear();
        kexinit.exchange.client_ephemeral.clear();
        kexinit.exchange.server_ephemeral.clear();
        kexinit
    }

    pub fn initiate_rekey(ex: Exchange, session_id: &[u8]) -> Self {
        let mut kexinit = KexInit { exchange: ex, algo: None, sent: true, session_id: Some(session_id.to_vec()) };
        kexinit.exchange.client_kex_init.clear();
        kexinit.exchange.server_kex_init.clear();
        kexinit.exchange.client_ephemeral.clear();
        kexinit.exchange.server_ephemeral.clear();
        kexinit
    }
}

#[derive(Debug)]
pub(crate) struct KexDh {
    pub exchange: Exchange,
    pub names: negotiation::Names,
    pub session_id: Option<Vec<u8>>,
    /// The server's chosen host key, resolved by name against
    /// `negotiation::Names::key` as soon as the algorithms are known.
    /// Carried by value rather than as an index into `Config::keys` so
    /// this state doesn't outlive a config reference it doesn't own.
    pub host_key: Arc<key::KeyPair>,
}

#[derive(Debug)]
pub(crate) struct KexDhDone {
    pub exchange: Exchange,
    pub kex: kex::Algorithm,
    pub session_id: Option<Vec<u8>>,
    pub names: negotiation::Names,
}

impl KexDhDone {
    pub fn compute_keys(self, hash: Vec<u8>, is_server: bool) -> Result<NewKeys, crate::Error> {
        let session_id = self.session_id.unwrap_or_else(|| hash.clone());
        let cipher = self.kex.compute_keys(&session_id, &hash, self.names.cipher, self.names.mac, is_server)?;
        Ok(NewKeys {
            exchange: self.exchange,
            names: self.names,
            kex: self.kex,
            cipher,
            session_id,
            received: false,
            sent: false,
        })
    }
}

#[derive(Debug)]
pub(crate) struct NewKeys {
    pub exchange: Exchange,
    pub names: negotiation::Names,
    pub kex: kex::Algorithm,
    pub cipher: cipher::CipherPair,
    pub session_id: Vec<u8>,
    pub received: bool,
    pub sent: bool,
}
