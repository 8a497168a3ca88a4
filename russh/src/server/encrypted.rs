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
//! RFC 4254 connection-layer (channel) traffic -- the server-side
//! mirror of `client::encrypted`.
use russh_cryptovec::CryptoVec;
use russh_keys::encoding::{Encoding, Reader};
use russh_keys::key;

use super::{Auth, Handler, Session};
use crate::auth;
use crate::session::{EncryptedState, Kex, KexInit};
use crate::{msg, push_packet, ChannelId, ChannelOpenFailure, Error, Sig};

impl Session {
    pub(crate) async fn server_read_encrypted<H: Handler + Send>(&mut self, handler: &mut H, buf: &[u8]) -> Result<(), H::Error> {
        if let Some(kex) = self.common.kex.take() {
            if let Kex::NewKeys(newkeys) = kex {
                if buf[0] != msg::NEWKEYS {
                    return Err(Error::Inconsistent.into());
                }
                self.common.encrypted(EncryptedState::WaitingServiceRequest { sent: false, accepted: false }, newkeys);
                return Ok(());
            }
            self.common.kex = Some(self.step_kex(kex, buf).map_err(H::Error::from)?);
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
                    return Err(Error::Inconsistent.into());
                }
                self.common.newkeys(newkeys);
                if let Some(enc) = self.common.encrypted.as_mut() {
                    enc.last_rekey = std::time::Instant::now();
                }
                return Ok(());
            }
            let next = self.step_kex(rekey, buf).map_err(H::Error::from)?;
            if let Some(enc) = self.common.encrypted.as_mut() {
                enc.rekey = Some(next);
            }
            return Ok(());
        }

        self.process_packet(handler, buf).await
    }

    /// Advance a key-exchange state machine by one incoming packet.
    /// Simpler than the client's, since `KexDh::parse` here answers
    /// `KEXDH_INIT` with `KEXDH_REPLY` and `NEWKEYS` in one step --
    /// there is no intermediate state to carry between messages.
    fn step_kex(&mut self, kex: Kex, buf: &[u8]) -> Result<Kex, Error> {
        match kex {
            Kex::KexInit(kexinit) => {
                if buf[0] != msg::KEXINIT {
                    return Err(Error::Inconsistent);
                }
                let kexdh = kexinit.server_parse(&self.common.config, &self.common.cipher, buf, &mut self.common.write_buffer)?;
                Ok(Kex::KexDh(kexdh))
            }
            Kex::KexDh(kexdh) => {
                if buf[0] != msg::KEXDH_INIT {
                    return Err(Error::Inconsistent);
                }
                let newkeys = kexdh.parse(&self.common.cipher, buf, &mut self.common.write_buffer)?;
                Ok(Kex::NewKeys(newkeys))
            }
            other => Ok(other),
        }
    }

    async fn process_packet<H: Handler + Send>(&mut self, handler: &mut H, buf: &[u8]) -> Result<(), H::Error> {
        let state_is_authenticated = matches!(self.common.encrypted.as_ref().map(|e| &e.state), Some(EncryptedState::Authenticated));
        if state_is_authenticated {
            return self.server_read_authenticated(handler, buf).await;
        }

        match buf[0] {
            msg::SERVICE_REQUEST => {
                let mut r = buf.reader(1);
                let service = r.read_string().map_err(Error::from)?;
                if service == b"ssh-userauth" {
                    if let Some(enc) = self.common.encrypted.as_mut() {
                        push_packet!(enc.write, {
                            enc.write.push(msg::SERVICE_ACCEPT);
                            enc.write.extend_ssh_string(b"ssh-userauth");
                        });
                        enc.state = EncryptedState::WaitingAuthRequest(auth::AuthRequest {
                            methods: self.common.config.methods,
                            partial_success: false,
                            current: None,
                            rejection_count: 0,
                        });
                    }
                }
            }
            msg::USERAUTH_REQUEST => self.userauth_request(handler, buf).await?,
            _ => {}
        }
        Ok(())
    }

    /// RFC 4252 §5/§7: dispatch one `SSH_MSG_USERAUTH_REQUEST` to the
    /// `none`/`password`/`publickey` handler callback, then answer with
    /// `SSH_MSG_USERAUTH_SUCCESS` or `SSH_MSG_USERAUTH_FAILURE`.
    /// Rejections are throttled by `auth_rejection_time` and capped by
    /// `max_auth_attempts`, both config knobs meant to blunt brute force.
    async fn userauth_request<H: Handler + Send>(&mut self, handler: &mut H, buf: &[u8]) -> Result<(), H::Error> {
        let mut r = buf.reader(1);
        let user = String::from_utf8_lossy(r.read_string().map_err(Error::from)?).into_owned();
        let _service = r.read_string().map_err(Error::from)?;
        let method = r.read_string().map_err(Error::from)?;

        let auth = match method {
            b"none" => handler.auth_none(&user).await?,
            b"password" => {
                let _change_password = r.read_byte().map_err(Error::from)? != 0;
                let password = String::from_utf8_lossy(r.read_string().map_err(Error::from)?).into_owned();
                handler.auth_password(&user, &password).await?
            }
            b"publickey" => match self.auth_publickey(handler, &user, buf, &mut r).await? {
                Some(auth) => auth,
                // A bare key probe that the handler accepted: `PK_OK` was
                // already written, and there is no final decision to act
                // on yet -- the client still has to come back signed.
                None => return Ok(()),
            },
            _ => Auth::UnsupportedMethod,
        };

        match auth {
            Auth::Accept => {
                self.common.auth_user.clear();
                self.common.auth_user.push_str(&user);
                if let Some(enc) = self.common.encrypted.as_mut() {
                    enc.state = EncryptedState::Authenticated;
                    push_packet!(enc.write, {
                        enc.write.push(msg::USERAUTH_SUCCESS);
                    });
                }
            }
            Auth::Reject | Auth::UnsupportedMethod => {
                if matches!(auth, Auth::Reject) {
                    self.auth_attempts += 1;
                    tokio::time::sleep(self.common.config.auth_rejection_time).await;
                }
                let methods = self.common.config.methods;
                if let Some(enc) = self.common.encrypted.as_mut() {
                    if let EncryptedState::WaitingAuthRequest(ref mut req) = enc.state {
                        req.rejection_count += 1;
                    }
                    push_packet!(enc.write, {
                        enc.write.push(msg::USERAUTH_FAILURE);
                        enc.write.extend_list(methods.into_iter());
                        enc.write.push(0);
                    });
                }
                if self.auth_attempts >= self.common.config.max_auth_attempts {
                    self.common.disconnect(crate::Disconnect::NoMoreAuthMethodsAvailable, "too many authentication failures", "en");
                }
            }
        }
        Ok(())
    }

    /// `publickey` authentication, both the key-only probe (`has_sig ==
    /// false`, answered with `SSH_MSG_USERAUTH_PK_OK` on acceptance) and
    /// the signed request that follows it. The signed content is
    /// `session_id (as string) ++ everything in this request up to but
    /// excluding the signature field` (RFC 4252 §7).
    async fn auth_publickey<H: Handler + Send>(
        &mut self,
        handler: &mut H,
        user: &str,
        buf: &[u8],
        r: &mut russh_keys::encoding::Position<'_>,
    ) -> Result<Option<Auth>, H::Error> {
        let has_sig = r.read_byte().map_err(Error::from)? != 0;
        let algo = r.read_string().map_err(Error::from)?.to_vec();
        let key_blob = r.read_string().map_err(Error::from)?;
        let public_key = key::parse_public_key(key_blob).map_err(Error::from)?;

        if !has_sig {
            return match handler.auth_publickey(user, &public_key).await? {
                Auth::Accept => {
                    if let Some(enc) = self.common.encrypted.as_mut() {
                        push_packet!(enc.write, {
                            enc.write.push(msg::USERAUTH_PK_OK);
                            enc.write.extend_ssh_string(&algo);
                            enc.write.extend_ssh_string(key_blob);
                        });
                    }
                    Ok(None)
                }
                other => Ok(Some(other)),
            };
        }

        let session_id = match self.common.encrypted.as_ref() {
            Some(enc) => enc.session_id.clone(),
            None => return Err(Error::Inconsistent.into()),
        };
        let sig_field_start = r.position;
        let sig_blob = r.read_string().map_err(Error::from)?;
        let mut sr = sig_blob.reader(0);
        sr.read_string().map_err(Error::from)?; // signature format name; redundant with the key's own.
        let sig = sr.read_string().map_err(Error::from)?;

        let mut to_sign = CryptoVec::new();
        to_sign.extend_ssh_string(&session_id);
        to_sign.extend(&buf[0..sig_field_start]);

        if !public_key.verify_detached(&to_sign, sig) {
            return Ok(Some(Auth::Reject));
        }
        Ok(Some(handler.auth_publickey(user, &public_key).await?))
    }

    async fn server_read_authenticated<H: Handler + Send>(&mut self, handler: &mut H, buf: &[u8]) -> Result<(), H::Error> {
        match buf[0] {
            msg::CHANNEL_OPEN => self.channel_open(handler, buf).await?,
            msg::CHANNEL_DATA => {
                let mut r = buf.reader(1);
                let id = ChannelId(r.read_u32().map_err(Error::from)?);
                let data = r.read_string().map_err(Error::from)?.to_vec();
                let target = self.common.config.window_size;
                if let Some(enc) = self.common.encrypted.as_mut() {
                    enc.adjust_window_size(id, &data, target);
                }
                handler.data(id, &data, self).await?;
            }
            msg::CHANNEL_EXTENDED_DATA => {
                let mut r = buf.reader(1);
                let id = ChannelId(r.read_u32().map_err(Error::from)?);
                let ext = r.read_u32().map_err(Error::from)?;
                let data = r.read_string().map_err(Error::from)?.to_vec();
                let target = self.common.config.window_size;
                if let Some(enc) = self.common.encrypted.as_mut() {
                    enc.adjust_window_size(id, &data, target);
                }
                handler.extended_data(id, ext, &data, self).await?;
            }
            msg::CHANNEL_EOF => {
                let mut r = buf.reader(1);
                let id = ChannelId(r.read_u32().map_err(Error::from)?);
                handler.channel_eof(id, self).await?;
            }
            msg::CHANNEL_CLOSE => {
                let mut r = buf.reader(1);
                let id = ChannelId(r.read_u32().map_err(Error::from)?);
                handler.channel_close(id, self).await?;
                if let Some(enc) = self.common.encrypted.as_mut() {
                    enc.channels.remove(&id);
                }
            }
            msg::CHANNEL_WINDOW_ADJUST => {
                let mut r = buf.reader(1);
                let id = ChannelId(r.read_u32().map_err(Error::from)?);
                let extra = r.read_u32().map_err(Error::from)?;
                if let Some(enc) = self.common.encrypted.as_mut() {
                    if let Some(channel) = enc.channels.get_mut(&id) {
                        channel.recipient_window_size += extra;
                    }
                }
                handler.window_adjusted(id, extra, self).await?;
            }
            msg::CHANNEL_REQUEST => self.channel_request(handler, buf).await?,
            msg::CHANNEL_SUCCESS => {
                let mut r = buf.reader(1);
                let id = ChannelId(r.read_u32().map_err(Error::from)?);
                self.resolve_wants_reply(id, true);
            }
            msg::CHANNEL_FAILURE => {
                let mut r = buf.reader(1);
                let id = ChannelId(r.read_u32().map_err(Error::from)?);
                self.resolve_wants_reply(id, false);
            }
            msg::GLOBAL_REQUEST => self.global_request(handler, buf).await?,
            msg::REQUEST_SUCCESS | msg::REQUEST_FAILURE => {}
            _ => {}
        }
        Ok(())
    }

    async fn channel_open<H: Handler + Send>(&mut self, handler: &mut H, buf: &[u8]) -> Result<(), H::Error> {
        let mut r = buf.reader(1);
        let channel_type = r.read_string().map_err(Error::from)?.to_vec();
        let sender_channel = r.read_u32().map_err(Error::from)?;
        let initial_window_size = r.read_u32().map_err(Error::from)?;
        let max_packet_size = r.read_u32().map_err(Error::from)?;

        let (host_to_connect, port_to_connect, originator_address, originator_port) = if channel_type == b"direct-tcpip" {
            let host = String::from_utf8_lossy(r.read_string().map_err(Error::from)?).into_owned();
            let port = r.read_u32().map_err(Error::from)?;
            let orig_addr = String::from_utf8_lossy(r.read_string().map_err(Error::from)?).into_owned();
            let orig_port = r.read_u32().map_err(Error::from)?;
            (host, port, orig_addr, orig_port)
        } else {
            (String::new(), 0, String::new(), 0)
        };

        if channel_type != b"session" && channel_type != b"direct-tcpip" {
            if let Some(enc) = self.common.encrypted.as_mut() {
                push_packet!(enc.write, {
                    enc.write.push(msg::CHANNEL_OPEN_FAILURE);
                    enc.write.push_u32_be(sender_channel);
                    enc.write.push_u32_be(ChannelOpenFailure::UnknownChannelType as u32);
                    enc.write.extend_ssh_string(b"unsupported channel type");
                    enc.write.extend_ssh_string(b"");
                });
            }
            return Ok(());
        }

        let window_size = self.common.config.window_size;
        let maxpacket = self.common.config.maximum_packet_size;
        let id = match self.common.encrypted.as_mut() {
            Some(enc) => {
                let id = enc.new_channel(window_size, maxpacket);
                if let Some(c) = enc.channels.get_mut(&id) {
                    c.confirmed = true;
                    c.recipient_channel = sender_channel;
                    c.recipient_window_size = initial_window_size;
                    c.recipient_maximum_packet_size = max_packet_size;
                }
                id
            }
            None => return Ok(()),
        };

        let (_to_session, channel_handle, from_handle, to_handle) = crate::channel::pair::<crate::channel::Msg>(id);
        if let Some(enc) = self.common.encrypted.as_mut() {
            if let Some(c) = enc.channels.get_mut(&id) {
                c.to_handle = Some(to_handle);
            }
        }
        self.register_channel(from_handle);

        let accept = if channel_type == b"session" {
            handler.channel_open_session(channel_handle, self).await?
        } else {
            handler
                .channel_open_direct_tcpip(channel_handle, &host_to_connect, port_to_connect, &originator_address, originator_port, self)
                .await?
        };

        if accept {
            if let Some(enc) = self.common.encrypted.as_mut() {
                push_packet!(enc.write, {
                    enc.write.push(msg::CHANNEL_OPEN_CONFIRMATION);
                    enc.write.push_u32_be(sender_channel);
                    enc.write.push_u32_be(id.0);
                    enc.write.push_u32_be(window_size);
                    enc.write.push_u32_be(maxpacket);
                });
            }
        } else {
            self.channel_open_failure(id, ChannelOpenFailure::AdministrativelyProhibited, "channel refused", "en");
        }
        Ok(())
    }

    /// RFC 4254 §4: a `channel-request` is only ever acked by the
    /// `Handler` itself, through `Session::channel_success`/
    /// `channel_failure` -- there is no implicit success-on-`Ok(())`.
    async fn channel_request<H: Handler + Send>(&mut self, handler: &mut H, buf: &[u8]) -> Result<(), H::Error> {
        let mut r = buf.reader(1);
        let id = ChannelId(r.read_u32().map_err(Error::from)?);
        let request_type = r.read_string().map_err(Error::from)?.to_vec();
        let _want_reply = r.read_byte().map_err(Error::from)? != 0;

        match &request_type[..] {
            b"pty-req" => {
                let term = String::from_utf8_lossy(r.read_string().map_err(Error::from)?).into_owned();
                let col_width = r.read_u32().map_err(Error::from)?;
                let row_height = r.read_u32().map_err(Error::from)?;
                let pix_width = r.read_u32().map_err(Error::from)?;
                let pix_height = r.read_u32().map_err(Error::from)?;
                let modes_raw = r.read_string().map_err(Error::from)?;
                let modes = parse_pty_modes(modes_raw);
                handler.pty_request(id, &term, col_width, row_height, pix_width, pix_height, &modes, self).await?;
            }
            b"env" => {
                let name = String::from_utf8_lossy(r.read_string().map_err(Error::from)?).into_owned();
                let value = String::from_utf8_lossy(r.read_string().map_err(Error::from)?).into_owned();
                handler.env_request(id, &name, &value, self).await?;
            }
            b"shell" => {
                handler.shell_request(id, self).await?;
            }
            b"exec" => {
                let command = r.read_string().map_err(Error::from)?.to_vec();
                handler.exec_request(id, &command, self).await?;
            }
            b"subsystem" => {
                let name = String::from_utf8_lossy(r.read_string().map_err(Error::from)?).into_owned();
                handler.subsystem_request(id, &name, self).await?;
            }
            b"window-change" => {
                let col_width = r.read_u32().map_err(Error::from)?;
                let row_height = r.read_u32().map_err(Error::from)?;
                let pix_width = r.read_u32().map_err(Error::from)?;
                let pix_height = r.read_u32().map_err(Error::from)?;
                handler.window_change_request(id, col_width, row_height, pix_width, pix_height, self).await?;
            }
            b"signal" => {
                let signal = Sig::from_name(r.read_string().map_err(Error::from)?).map_err(Error::from)?;
                handler.signal(id, signal, self).await?;
            }
            _ => {
                self.channel_failure(id);
            }
        }
        Ok(())
    }

    async fn global_request<H: Handler + Send>(&mut self, handler: &mut H, buf: &[u8]) -> Result<(), H::Error> {
        let mut r = buf.reader(1);
        let name = r.read_string().map_err(Error::from)?.to_vec();
        let want_reply = r.read_byte().map_err(Error::from)? != 0;
        self.common.wants_reply = want_reply;

        match &name[..] {
            b"tcpip-forward" => {
                let address = String::from_utf8_lossy(r.read_string().map_err(Error::from)?).into_owned();
                let mut port = r.read_u32().map_err(Error::from)?;
                if handler.tcpip_forward(&address, &mut port, self).await? {
                    self.request_success_forward_port(port);
                } else {
                    self.request_failure();
                }
            }
            b"cancel-tcpip-forward" => {
                let address = String::from_utf8_lossy(r.read_string().map_err(Error::from)?).into_owned();
                let port = r.read_u32().map_err(Error::from)?;
                if handler.cancel_tcpip_forward(&address, port, self).await? {
                    self.request_success();
                } else {
                    self.request_failure();
                }
            }
            _ => {
                if want_reply {
                    self.request_failure();
                }
            }
        }
        Ok(())
    }
}

/// Decode the opaque `modes` string of a `pty-req` (RFC 4254 §6.2):
/// `(byte opcode, uint32 value)` pairs, terminated by opcode `0`
/// (`TTY_OP_END`).
fn parse_pty_modes(raw: &[u8]) -> Vec<(u8, u32)> {
    let mut modes = Vec::new();
    let mut i = 0;
    while i < raw.len() {
        let opcode = raw[i];
        if opcode == 0 {
            break;
        }
        if i + 5 > raw.len() {
            break;
        }
        let value = u32::from_be_bytes([raw[i + 1], raw[i + 2], raw[i + 3], raw[i + 4]]);
        modes.push((opcode, value));
        i += 5;
    }
    modes
}
