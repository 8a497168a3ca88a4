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
//! Dispatch of packets once the transport cipher is live: finishing
//! key exchange (including rekeys), RFC 4252 user authentication, and
//! RFC 4254 connection-layer (channel) traffic.
use russh_cryptovec::CryptoVec;
use russh_keys::encoding::{Encoding, Reader};
use russh_keys::key;

use crate::auth::{self, MethodSet};
use crate::channel::ChannelMsg;
use crate::session::{EncryptedState, Exchange, Kex, KexDhDone, KexInit, NewKeys};
use crate::{msg, push_packet, ChannelId, ChannelOpenFailure, Error, Sig};

use super::{ForwardedTcpIp, GlobalReply, Session};

/// Outcome of feeding one packet to a key-exchange state machine in
/// progress, used for both the initial handshake and later rekeys.
enum KexAdvance {
    Continue(Kex),
    Done(NewKeys),
}

impl Session {
    pub(crate) async fn client_read_encrypted(&mut self, buf: &[u8]) -> Result<(), Error> {
        if let Some(kex) = self.common.kex.take() {
            if let Kex::NewKeys(newkeys) = kex {
                if buf[0] != msg::NEWKEYS {
                    return Err(Error::Inconsistent);
                }
                self.common.encrypted(EncryptedState::WaitingServiceRequest { sent: false, accepted: false }, newkeys);
                self.write_service_request_if_needed();
                return Ok(());
            }
            self.common.kex = Some(match self.step_kex(kex, buf)? {
                KexAdvance::Continue(next) => next,
                KexAdvance::Done(newkeys) => Kex::NewKeys(newkeys),
            });
            return Ok(());
        }

        if buf[0] == msg::KEXINIT {
            if let Some(enc) = self.common.encrypted.as_mut() {
                if enc.rekey.is_none() {
                    let exchange = enc.exchange.take().unwrap_or_default();
                    enc.rekey = Some(Kex::KexInit(KexInit::received_rekey(exchange, &enc.session_id)));
                }
            }
        }

        let rekey = self.common.encrypted.as_mut().and_then(|enc| enc.rekey.take());
        if let Some(rekey) = rekey {
            if let Kex::NewKeys(newkeys) = rekey {
                if buf[0] != msg::NEWKEYS {
                    return Err(Error::Inconsistent);
                }
                self.common.newkeys(newkeys);
                if let Some(enc) = self.common.encrypted.as_mut() {
                    enc.last_rekey = std::time::Instant::now();
                }
                return Ok(());
            }
            let next = match self.step_kex(rekey, buf)? {
                KexAdvance::Continue(next) => next,
                KexAdvance::Done(newkeys) => Kex::NewKeys(newkeys),
            };
            if let Some(enc) = self.common.encrypted.as_mut() {
                enc.rekey = Some(next);
            }
            return Ok(());
        }

        self.process_packet(buf)
    }

    /// Advance a key-exchange state machine by one incoming packet;
    /// used identically whether this is the first handshake or a
    /// later rekey (RFC 4253 §9).
    fn step_kex(&mut self, kex: Kex, buf: &[u8]) -> Result<KexAdvance, Error> {
        match kex {
            Kex::KexInit(kexinit) => {
                if buf[0] != msg::KEXINIT {
                    return Err(Error::Inconsistent);
                }
                let kexdhdone = kexinit.client_parse(&self.common.config, &self.common.cipher, buf, &mut self.common.write_buffer)?;
                Ok(KexAdvance::Continue(Kex::KexDhDone(kexdhdone)))
            }
            Kex::KexDhDone(mut kexdhdone) => {
                if buf[0] != msg::KEXDH_REPLY {
                    return Err(Error::Inconsistent);
                }
                let mut r = buf.reader(1);
                let host_key_blob = r.read_string()?;
                let host_key = key::parse_public_key(host_key_blob)?;
                let server_ephemeral = r.read_mpint()?;
                let sig_blob = r.read_string()?;

                kexdhdone.exchange.server_ephemeral.clear();
                kexdhdone.exchange.server_ephemeral.extend(server_ephemeral);
                kexdhdone.kex.compute_shared_secret(server_ephemeral)?;

                let mut hash_buf = CryptoVec::new();
                let hash = kexdhdone.kex.compute_exchange_hash(&host_key, &kexdhdone.exchange, &mut hash_buf)?;

                let mut sr = sig_blob.reader(0);
                sr.read_string()?; // signature format name; redundant with the key's own.
                let sig = sr.read_string()?;
                if !host_key.verify_detached(&hash, sig) {
                    return Err(Error::WrongServerSig);
                }

                // `SSH_MSG_NEWKEYS` is sent under the keys negotiated by
                // the *previous* exchange; only the next packet uses the
                // new ones (RFC 4253 §7.3).
                self.common.cipher.write(&[msg::NEWKEYS], &mut self.common.write_buffer);

                let newkeys = kexdhdone.compute_keys(hash, false)?;
                Ok(KexAdvance::Done(newkeys))
            }
            other => Ok(KexAdvance::Continue(other)),
        }
    }

    pub(crate) fn write_service_request_if_needed(&mut self) {
        let needs_it = matches!(self.common.encrypted.as_ref().map(|e| &e.state), Some(EncryptedState::WaitingServiceRequest { sent: false, .. }));
        if !needs_it {
            return;
        }
        if let Some(enc) = self.common.encrypted.as_mut() {
            if let EncryptedState::WaitingServiceRequest { sent, .. } = &mut enc.state {
                *sent = true;
            }
            push_packet!(enc.write, {
                enc.write.push(msg::SERVICE_REQUEST);
                enc.write.extend_ssh_string(b"ssh-userauth");
            });
        }
    }

    /// Offer the next method from `auth_queue` the server still
    /// accepts, narrowed by whatever `SSH_MSG_USERAUTH_FAILURE` last
    /// advertised. `publickey` is probed first with `has_sig = false`
    /// (RFC 4252 §7); the private-key operation only happens once the
    /// server answers `SSH_MSG_USERAUTH_PK_OK` for that same key.
    /// Exhausting every queued method resolves the pending reply with
    /// `AllAuthenticationOptionsFailed`.
    pub(crate) fn write_auth_request(&mut self) -> Result<(), Error> {
        let remaining = match self.common.encrypted.as_ref().map(|e| &e.state) {
            Some(EncryptedState::WaitingAuthRequest(req)) => req.methods,
            _ => MethodSet::all(),
        };
        let (idx, method) = match self.auth_queue.next_for(&self.auth_tried, remaining) {
            Some((i, m)) => (i, m.clone()),
            None => {
                if let Some(reply) = self.auth_reply.take() {
                    let _ = reply.send(Err(Error::AllAuthenticationOptionsFailed));
                }
                return Ok(());
            }
        };
        self.current_auth = Some((idx, method.clone()));
        let probe = matches!(method, auth::Method::PublicKey { .. });
        self.send_auth_method(&method, !probe)
    }

    fn send_auth_method(&mut self, method: &auth::Method, with_signature: bool) -> Result<(), Error> {
        use russh_keys::PublicKeyBase64;

        let user = self.common.auth_user.clone();
        if let Some(enc) = self.common.encrypted.as_mut() {
            let session_id = enc.session_id.clone();
            if let (auth::Method::PublicKey { key }, EncryptedState::WaitingAuthRequest(ref mut req)) = (method, &mut enc.state) {
                req.current = Some(auth::CurrentRequest::PublicKey {
                    key: CryptoVec::from(&key.public_key_bytes()[..]),
                    algo: CryptoVec::from(key.name().as_bytes()),
                    sent_pk_ok: false,
                });
            }
            push_packet!(enc.write, {
                auth::write_userauth_request(&mut enc.write, &session_id, &user, "ssh-connection", method, with_signature)?;
            });
        }
        Ok(())
    }

    fn process_packet(&mut self, buf: &[u8]) -> Result<(), Error> {
        let state_is_authenticated = matches!(self.common.encrypted.as_ref().map(|e| &e.state), Some(EncryptedState::Authenticated));
        if state_is_authenticated {
            return self.client_read_authenticated(buf);
        }

        match buf[0] {
            msg::SERVICE_ACCEPT => {
                if let Some(enc) = self.common.encrypted.as_mut() {
                    enc.state = EncryptedState::WaitingAuthRequest(auth::AuthRequest {
                        methods: MethodSet::all(),
                        partial_success: false,
                        current: None,
                        rejection_count: 0,
                    });
                }
                self.write_auth_request()?;
            }
            msg::USERAUTH_BANNER => {}
            msg::USERAUTH_PK_OK => {
                // The server accepts the probed key; re-send the same
                // request with a real signature attached.
                if let Some((_, method @ auth::Method::PublicKey { .. })) = self.current_auth.clone() {
                    if let Some(enc) = self.common.encrypted.as_mut() {
                        if let EncryptedState::WaitingAuthRequest(ref mut req) = enc.state {
                            if let Some(auth::CurrentRequest::PublicKey { ref mut sent_pk_ok, .. }) = req.current {
                                *sent_pk_ok = true;
                            }
                        }
                    }
                    self.send_auth_method(&method, true)?;
                }
            }
            msg::USERAUTH_SUCCESS => {
                if let Some(enc) = self.common.encrypted.as_mut() {
                    enc.state = EncryptedState::Authenticated;
                }
                self.current_auth = None;
                if let Some(reply) = self.auth_reply.take() {
                    let _ = reply.send(Ok(true));
                }
            }
            msg::USERAUTH_FAILURE => {
                let mut r = buf.reader(1);
                let remaining = MethodSet::from_name_list(r.read_string()?);
                let partial_success = r.read_byte()? != 0;
                if let Some(enc) = self.common.encrypted.as_mut() {
                    if let EncryptedState::WaitingAuthRequest(ref mut req) = enc.state {
                        req.methods = remaining;
                        req.partial_success = partial_success;
                        req.rejection_count += 1;
                        req.current = None;
                    }
                }
                if let Some((idx, _)) = self.current_auth.take() {
                    self.auth_tried.push(idx);
                }
                self.write_auth_request()?;
            }
            _ => {}
        }
        Ok(())
    }

    fn client_read_authenticated(&mut self, buf: &[u8]) -> Result<(), Error> {
        match buf[0] {
            msg::CHANNEL_OPEN_CONFIRMATION => self.channel_open_confirmation(buf)?,
            msg::CHANNEL_OPEN_FAILURE => self.channel_open_failure(buf)?,
            msg::CHANNEL_OPEN => self.inbound_channel_open(buf)?,
            msg::CHANNEL_DATA => {
                let mut r = buf.reader(1);
                let id = ChannelId(r.read_u32()?);
                let data = r.read_string()?;
                let target = self.common.config.window_size;
                if let Some(enc) = self.common.encrypted.as_mut() {
                    enc.adjust_window_size(id, data, target);
                }
                self.send_to_handle(id, ChannelMsg::Data { data: CryptoVec::from(data) });
            }
            msg::CHANNEL_EXTENDED_DATA => {
                let mut r = buf.reader(1);
                let id = ChannelId(r.read_u32()?);
                let ext = r.read_u32()?;
                let data = r.read_string()?;
                let target = self.common.config.window_size;
                if let Some(enc) = self.common.encrypted.as_mut() {
                    enc.adjust_window_size(id, data, target);
                }
                self.send_to_handle(id, ChannelMsg::ExtendedData { data: CryptoVec::from(data), ext });
            }
            msg::CHANNEL_EOF => {
                let mut r = buf.reader(1);
                let id = ChannelId(r.read_u32()?);
                self.send_to_handle(id, ChannelMsg::Eof);
            }
            msg::CHANNEL_CLOSE => {
                let mut r = buf.reader(1);
                let id = ChannelId(r.read_u32()?);
                self.send_to_handle(id, ChannelMsg::Close);
                if let Some(enc) = self.common.encrypted.as_mut() {
                    enc.channels.remove(&id);
                }
            }
            msg::CHANNEL_WINDOW_ADJUST => {
                let mut r = buf.reader(1);
                let id = ChannelId(r.read_u32()?);
                let extra = r.read_u32()?;
                if let Some(enc) = self.common.encrypted.as_mut() {
                    if let Some(channel) = enc.channels.get_mut(&id) {
                        channel.recipient_window_size += extra;
                    }
                    enc.flush_pending(id);
                }
                self.send_to_handle(id, ChannelMsg::WindowAdjusted { new_size: extra });
            }
            msg::CHANNEL_REQUEST => self.channel_request(buf)?,
            msg::CHANNEL_SUCCESS => {
                let mut r = buf.reader(1);
                let id = ChannelId(r.read_u32()?);
                self.resolve_wants_reply(id, true);
            }
            msg::CHANNEL_FAILURE => {
                let mut r = buf.reader(1);
                let id = ChannelId(r.read_u32()?);
                self.resolve_wants_reply(id, false);
            }
            msg::REQUEST_SUCCESS => {
                let mut r = buf.reader(1);
                match self.pending_global.pop_front() {
                    Some(GlobalReply::TcpIpForward { address, reply }) => {
                        let port = r.read_u32().unwrap_or(0);
                        self.forwarding_ports.insert((address, port), ());
                        let _ = reply.send(Ok(port));
                    }
                    Some(GlobalReply::CancelTcpIpForward { reply }) => {
                        let _ = reply.send(Ok(()));
                    }
                    None => {}
                }
            }
            msg::REQUEST_FAILURE => match self.pending_global.pop_front() {
                Some(GlobalReply::TcpIpForward { reply, .. }) => {
                    let _ = reply.send(Err(Error::ChannelFailure));
                }
                Some(GlobalReply::CancelTcpIpForward { reply }) => {
                    let _ = reply.send(Err(Error::ChannelFailure));
                }
                None => {}
            },
            msg::GLOBAL_REQUEST => {
                // No global requests the client answers unprompted;
                // politely refuse any that want a reply.
                let mut r = buf.reader(1);
                let _name = r.read_string();
                let want_reply = buf.get(buf.len().saturating_sub(1)).copied().unwrap_or(0) != 0;
                if want_reply {
                    if let Some(enc) = self.common.encrypted.as_mut() {
                        push_packet!(enc.write, {
                            enc.write.push(msg::REQUEST_FAILURE);
                        });
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn channel_open_confirmation(&mut self, buf: &[u8]) -> Result<(), Error> {
        let mut r = buf.reader(1);
        let id = ChannelId(r.read_u32()?);
        let remote_id = r.read_u32()?;
        let remote_window = r.read_u32()?;
        let remote_maxpacket = r.read_u32()?;
        if let Some(enc) = self.common.encrypted.as_mut() {
            if let Some(channel) = enc.channels.get_mut(&id) {
                channel.confirmed = true;
                channel.recipient_channel = remote_id;
                channel.recipient_window_size = remote_window;
                channel.recipient_maximum_packet_size = remote_maxpacket;
            }
        }
        if let Some(pending) = self.pending_opens.remove(&id) {
            if let Some(handle) = pending.handle {
                let _ = pending.reply.send(Ok(handle));
            }
        }
        Ok(())
    }

    fn channel_open_failure(&mut self, buf: &[u8]) -> Result<(), Error> {
        let mut r = buf.reader(1);
        let id = ChannelId(r.read_u32()?);
        let reason = ChannelOpenFailure::from_u32(r.read_u32()?).unwrap_or(ChannelOpenFailure::ConnectFailed);
        let description = String::from_utf8_lossy(r.read_string()?).into_owned();
        if let Some(enc) = self.common.encrypted.as_mut() {
            enc.channels.remove(&id);
        }
        if let Some(pending) = self.pending_opens.remove(&id) {
            let _ = pending.reply.send(Err(Error::ChannelRejected { reason, description }));
        }
        Ok(())
    }

    /// Only `forwarded-tcpip` is accepted; every other server-initiated
    /// channel type is refused (RFC 4254 §5.1's
    /// `SSH_OPEN_ADMINISTRATIVELY_PROHIBITED`) since a client has no
    /// business accepting X11 or agent-forwarding channels here.
    fn inbound_channel_open(&mut self, buf: &[u8]) -> Result<(), Error> {
        let mut r = buf.reader(1);
        let channel_type = r.read_string()?;
        let sender_channel = r.read_u32()?;
        let initial_window = r.read_u32()?;
        let maximum_packet_size = r.read_u32()?;

        if channel_type != b"forwarded-tcpip" {
            if let Some(enc) = self.common.encrypted.as_mut() {
                push_packet!(enc.write, {
                    enc.write.push(msg::CHANNEL_OPEN_FAILURE);
                    enc.write.push_u32_be(sender_channel);
                    enc.write.push_u32_be(ChannelOpenFailure::AdministrativelyProhibited as u32);
                    enc.write.extend_ssh_string(b"unsupported channel type");
                    enc.write.extend_ssh_string(b"");
                });
            }
            return Ok(());
        }

        let _connected_address = r.read_string()?;
        let _connected_port = r.read_u32()?;
        let originator_address = String::from_utf8_lossy(r.read_string()?).into_owned();
        let originator_port = r.read_u32()?;

        let window_size = self.common.config.window_size;
        let maxpacket = self.common.config.maximum_packet_size;
        let enc = match self.common.encrypted.as_mut() {
            Some(enc) => enc,
            None => return Ok(()),
        };
        let id = enc.new_channel(window_size, maxpacket);
        if let Some(channel) = enc.channels.get_mut(&id) {
            channel.confirmed = true;
            channel.recipient_channel = sender_channel;
            channel.recipient_window_size = initial_window;
            channel.recipient_maximum_packet_size = maximum_packet_size;
        }
        push_packet!(enc.write, {
            enc.write.push(msg::CHANNEL_OPEN_CONFIRMATION);
            enc.write.push_u32_be(sender_channel);
            enc.write.push_u32_be(id.0);
            enc.write.push_u32_be(window_size);
            enc.write.push_u32_be(maxpacket);
        });

        let (_to_session, handle, from_handle, to_handle) = crate::channel::pair::<crate::channel::Msg>(id);
        if let Some(channel) = enc.channels.get_mut(&id) {
            channel.to_handle = Some(to_handle);
        }
        self.channel_commands.push(tokio_stream::wrappers::UnboundedReceiverStream::new(from_handle));
        let _ = self.forwarded_tx.send(ForwardedTcpIp { channel: handle, originator_address, originator_port });
        Ok(())
    }

    fn channel_request(&mut self, buf: &[u8]) -> Result<(), Error> {
        let mut r = buf.reader(1);
        let id = ChannelId(r.read_u32()?);
        let request_type = r.read_string()?;
        let want_reply = r.read_byte()? != 0;

        match request_type {
            b"exit-status" => {
                let exit_status = r.read_u32()?;
                self.send_to_handle(id, ChannelMsg::ExitStatus { exit_status });
            }
            b"exit-signal" => {
                let signal_name = Sig::from_name(r.read_string()?)?;
                let core_dumped = r.read_byte()? != 0;
                let error_message = String::from_utf8_lossy(r.read_string()?).into_owned();
                let lang_tag = String::from_utf8_lossy(r.read_string()?).into_owned();
                self.send_to_handle(id, ChannelMsg::ExitSignal { signal_name, core_dumped, error_message, lang_tag });
            }
            b"xon-xoff" => {
                let client_can_do = r.read_byte()? != 0;
                self.send_to_handle(id, ChannelMsg::XonXoff { client_can_do });
            }
            _ => {}
        }

        if want_reply {
            if let Some(enc) = self.common.encrypted.as_mut() {
                if let Some(channel) = enc.channels.get(&id) {
                    push_packet!(enc.write, {
                        enc.write.push(msg::CHANNEL_SUCCESS);
                        enc.write.push_u32_be(channel.recipient_channel);
                    });
                }
            }
        }
        Ok(())
    }

    fn resolve_wants_reply(&mut self, id: ChannelId, success: bool) {
        if let Some(enc) = self.common.encrypted.as_mut() {
            if let Some(channel) = enc.channels.get_mut(&id) {
                if let Some(reply) = channel.wants_reply.pop_front() {
                    let _ = reply.send(success);
                    return;
                }
            }
        }
        self.send_to_handle(id, if success { ChannelMsg::Success } else { ChannelMsg::Failure });
    }

    fn send_to_handle(&mut self, id: ChannelId, msg: ChannelMsg) {
        if let Some(enc) = self.common.encrypted.as_ref() {
            if let Some(channel) = enc.channels.get(&id) {
                if let Some(to_handle) = channel.to_handle.as_ref() {
                    let _ = to_handle.send(msg);
                }
            }
        }
    }
}
