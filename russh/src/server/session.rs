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
//! The running state of one server connection, and [`Handle`], a
//! cloneable way to push data into a channel from outside the
//! request/response cycle (e.g. a task streaming a subprocess's
//! stdout back to the client).
use std::sync::Arc;

use futures::stream::{SelectAll, StreamExt};
use russh_cryptovec::CryptoVec;
use russh_keys::encoding::Encoding;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::{Config, Handler};
use crate::channel::{ChannelMsg, SessionCommand};
use crate::session::{CommonSession, Kex, KexInit};
use crate::ssh_read::SshRead;
use crate::{msg, push_packet, ChannelId, ChannelOpenFailure, Disconnect, Error, Sig};

use super::ChannelReceiver;

/// A cheaply-cloneable way to feed a channel from outside the
/// connection's own task.
#[derive(Clone)]
pub struct Handle {
    pub(crate) sender: UnboundedSender<(ChannelId, ChannelMsg)>,
}

impl Handle {
    pub fn data(&self, id: ChannelId, data: CryptoVec) -> Result<(), Error> {
        self.sender.send((id, ChannelMsg::Data { data })).map_err(|_| Error::ChannelFailure)
    }

    pub fn extended_data(&self, id: ChannelId, ext: u32, data: CryptoVec) -> Result<(), Error> {
        self.sender.send((id, ChannelMsg::ExtendedData { data, ext })).map_err(|_| Error::ChannelFailure)
    }

    pub fn eof(&self, id: ChannelId) -> Result<(), Error> {
        self.sender.send((id, ChannelMsg::Eof)).map_err(|_| Error::ChannelFailure)
    }

    pub fn close(&self, id: ChannelId) -> Result<(), Error> {
        self.sender.send((id, ChannelMsg::Close)).map_err(|_| Error::ChannelFailure)
    }

    pub fn exit_status(&self, id: ChannelId, exit_status: u32) -> Result<(), Error> {
        self.sender.send((id, ChannelMsg::ExitStatus { exit_status })).map_err(|_| Error::ChannelFailure)
    }
}

pub struct Session {
    pub(crate) common: CommonSession<Arc<Config>>,
    pub(crate) sender: Handle,
    pub(crate) receiver: ChannelReceiver,
    pub(crate) channel_commands: SelectAll<UnboundedReceiverStream<SessionCommand>>,
    pub(crate) auth_attempts: usize,
}

impl Session {
    pub fn handle(&self) -> Handle {
        self.sender.clone()
    }

    /// Register the receiving half of a freshly-opened channel's
    /// handle so its `Channel::data`/`exec`/... calls get serviced by
    /// this session's event loop.
    pub(crate) fn register_channel(&mut self, receiver: UnboundedReceiver<SessionCommand>) {
        self.channel_commands.push(UnboundedReceiverStream::new(receiver));
    }

    pub fn is_rekeying(&self) -> bool {
        match self.common.encrypted {
            Some(ref enc) => enc.rekey.is_some(),
            None => true,
        }
    }

    pub(crate) fn flush(&mut self) -> Result<(), Error> {
        if let Some(ref mut enc) = self.common.encrypted {
            if enc.flush(&self.common.config.limits, &self.common.cipher, &mut self.common.write_buffer) && enc.rekey.is_none() {
                if let Some(exchange) = enc.exchange.take() {
                    let mut kexinit = KexInit::initiate_rekey(exchange, &enc.session_id);
                    kexinit.server_write(&self.common.config, &self.common.cipher, &mut self.common.write_buffer)?;
                    enc.rekey = Some(Kex::KexInit(kexinit));
                }
            }
        }
        Ok(())
    }

    pub fn config(&self) -> &Config {
        &self.common.config
    }

    /// Queue `SSH_MSG_DISCONNECT`; idempotent.
    pub fn disconnect(&mut self, reason: Disconnect, description: &str, language_tag: &str) {
        self.common.disconnect(reason, description, language_tag);
    }

    pub fn data(&mut self, channel: ChannelId, data: CryptoVec) {
        if let Some(enc) = self.common.encrypted.as_mut() {
            enc.data(channel, data);
        }
    }

    pub fn extended_data(&mut self, channel: ChannelId, ext: u32, data: CryptoVec) {
        if let Some(enc) = self.common.encrypted.as_mut() {
            enc.extended_data(channel, ext, data);
        }
    }

    pub fn eof(&mut self, channel: ChannelId) {
        self.common.byte(channel, msg::CHANNEL_EOF);
    }

    pub fn close(&mut self, channel: ChannelId) {
        self.common.byte(channel, msg::CHANNEL_CLOSE);
        if let Some(enc) = self.common.encrypted.as_mut() {
            enc.channels.remove(&channel);
        }
    }

    pub fn flush_pending(&mut self, channel: ChannelId) -> usize {
        self.common.encrypted.as_mut().map(|enc| enc.flush_pending(channel)).unwrap_or(0)
    }

    /// Answer an outstanding `GLOBAL_REQUEST` (e.g. `tcpip-forward`)
    /// that asked for a reply, gated on `common.wants_reply` the same
    /// way a `channel-request`'s ack is gated per-channel.
    pub fn request_success(&mut self) {
        if self.common.wants_reply {
            self.common.wants_reply = false;
            if let Some(enc) = self.common.encrypted.as_mut() {
                push_packet!(enc.write, {
                    enc.write.push(msg::REQUEST_SUCCESS);
                });
            }
        }
    }

    /// Like [`Session::request_success`], but for a `tcpip-forward`
    /// whose bound port the client needs back.
    pub fn request_success_forward_port(&mut self, port: u32) {
        if self.common.wants_reply {
            self.common.wants_reply = false;
            if let Some(enc) = self.common.encrypted.as_mut() {
                push_packet!(enc.write, {
                    enc.write.push(msg::REQUEST_SUCCESS);
                    enc.write.push_u32_be(port);
                });
            }
        }
    }

    pub fn request_failure(&mut self) {
        self.common.wants_reply = false;
        if let Some(enc) = self.common.encrypted.as_mut() {
            push_packet!(enc.write, {
                enc.write.push(msg::REQUEST_FAILURE);
            });
        }
    }

    pub fn channel_success(&mut self, channel: ChannelId) {
        if let Some(enc) = self.common.encrypted.as_mut() {
            if let Some(c) = enc.channels.get(&channel) {
                push_packet!(enc.write, {
                    enc.write.push(msg::CHANNEL_SUCCESS);
                    enc.write.push_u32_be(c.recipient_channel);
                });
            }
        }
    }

    pub fn channel_failure(&mut self, channel: ChannelId) {
        if let Some(enc) = self.common.encrypted.as_mut() {
            if let Some(c) = enc.channels.get(&channel) {
                push_packet!(enc.write, {
                    enc.write.push(msg::CHANNEL_FAILURE);
                    enc.write.push_u32_be(c.recipient_channel);
                });
            }
        }
    }

    pub fn channel_open_failure(&mut self, channel: ChannelId, reason: ChannelOpenFailure, description: &str, language: &str) {
        if let Some(enc) = self.common.encrypted.as_mut() {
            if let Some(c) = enc.channels.remove(&channel) {
                push_packet!(enc.write, {
                    enc.write.push(msg::CHANNEL_OPEN_FAILURE);
                    enc.write.push_u32_be(c.recipient_channel);
                    enc.write.push_u32_be(reason as u32);
                    enc.write.extend_ssh_string(description.as_bytes());
                    enc.write.extend_ssh_string(language.as_bytes());
                });
            }
        }
    }

    pub fn exit_status_request(&mut self, channel: ChannelId, exit_status: u32) {
        if let Some(enc) = self.common.encrypted.as_mut() {
            if let Some(c) = enc.channels.get(&channel) {
                push_packet!(enc.write, {
                    enc.write.push(msg::CHANNEL_REQUEST);
                    enc.write.push_u32_be(c.recipient_channel);
                    enc.write.extend_ssh_string(b"exit-status");
                    enc.write.push(0);
                    enc.write.push_u32_be(exit_status);
                });
            }
        }
    }

    pub fn exit_signal_request(&mut self, channel: ChannelId, signal: Sig, core_dumped: bool, error_message: &str, language_tag: &str) {
        if let Some(enc) = self.common.encrypted.as_mut() {
            if let Some(c) = enc.channels.get(&channel) {
                push_packet!(enc.write, {
                    enc.write.push(msg::CHANNEL_REQUEST);
                    enc.write.push_u32_be(c.recipient_channel);
                    enc.write.extend_ssh_string(b"exit-signal");
                    enc.write.push(0);
                    enc.write.extend_ssh_string(signal.name().as_bytes());
                    enc.write.push(core_dumped as u8);
                    enc.write.extend_ssh_string(error_message.as_bytes());
                    enc.write.extend_ssh_string(language_tag.as_bytes());
                });
            }
        }
    }

    pub fn xon_xoff_request(&mut self, channel: ChannelId, client_can_do: bool) {
        if let Some(enc) = self.common.encrypted.as_mut() {
            if let Some(c) = enc.channels.get(&channel) {
                push_packet!(enc.write, {
                    enc.write.push(msg::CHANNEL_REQUEST);
                    enc.write.push_u32_be(c.recipient_channel);
                    enc.write.extend_ssh_string(b"xon-xoff");
                    enc.write.push(0);
                    enc.write.push(client_can_do as u8);
                });
            }
        }
    }

    /// Open a `forwarded-tcpip` channel to the client for a connection
    /// accepted on a port the client asked us to forward (RFC 4254
    /// §7.2); only valid once authenticated.
    pub fn channel_open_forwarded_tcpip(
        &mut self,
        connected_address: &str,
        connected_port: u32,
        originator_address: &str,
        originator_port: u32,
    ) -> Result<ChannelId, Error> {
        use crate::session::EncryptedState;
        let window_size = self.common.config.window_size;
        let maxpacket = self.common.config.maximum_packet_size;
        let enc = self.common.encrypted.as_mut().ok_or(Error::NotAuthenticated)?;
        if !matches!(enc.state, EncryptedState::Authenticated) {
            return Err(Error::Inconsistent);
        }
        let id = enc.new_channel(window_size, maxpacket);
        push_packet!(enc.write, {
            enc.write.push(msg::CHANNEL_OPEN);
            enc.write.extend_ssh_string(b"forwarded-tcpip");
            enc.write.push_u32_be(id.0);
            enc.write.push_u32_be(window_size);
            enc.write.push_u32_be(maxpacket);
            enc.write.extend_ssh_string(connected_address.as_bytes());
            enc.write.push_u32_be(connected_port);
            enc.write.extend_ssh_string(originator_address.as_bytes());
            enc.write.push_u32_be(originator_port);
        });
        Ok(id)
    }

    /// Resolve the oldest outstanding `channel.send_request(..., true)`
    /// on `channel`, if one of our own handler's channel handles is
    /// waiting on a `channel-success`/`channel-failure` the client just
    /// sent back (RFC 4254 §4).
    pub(crate) fn resolve_wants_reply(&mut self, channel: ChannelId, success: bool) {
        if let Some(enc) = self.common.encrypted.as_mut() {
            if let Some(c) = enc.channels.get_mut(&channel) {
                if let Some(reply) = c.wants_reply.pop_front() {
                    let _ = reply.send(success);
                }
            }
        }
    }

    /// Drive this connection until the peer disconnects: read and
    /// dispatch incoming packets, service `Handle` pushes from other
    /// tasks, and honor `connection_timeout`.
    pub(crate) async fn run<H, R>(mut self, stream: SshRead<R>, mut handler: H) -> Result<(), H::Error>
    where
        H: Handler + Send + 'static,
        R: AsyncRead + AsyncWrite + Unpin + Send,
    {
        self.flush().map_err(H::Error::from)?;
        let (stream_read, mut stream_write) = stream.split();
        stream_write.write_all(&self.common.write_buffer.buffer).await.map_err(Error::from)?;
        stream_write.flush().await.map_err(Error::from)?;
        self.common.write_buffer.buffer.clear();

        let reading = super::start_reading(stream_read, crate::sshbuffer::SSHBuffer::new(), self.common.cipher.clone());
        tokio::pin!(reading);

        while !self.common.disconnected {
            let delay = self.common.config.connection_timeout;
            tokio::select! {
                r = &mut reading => {
                    let (n, stream_read, mut buffer) = r.map_err(H::Error::from)?;
                    if n == 0 {
                        break;
                    }
                    if n >= 5 {
                        let payload = buffer.buffer[5..n].to_vec();
                        if !payload.is_empty() {
                            if payload[0] == msg::DISCONNECT {
                                break;
                            }
                            self.server_read_encrypted(&mut handler, &payload).await?;
                        }
                    }
                    buffer.buffer.clear();
                    reading.set(super::start_reading(stream_read, buffer, self.common.cipher.clone()));
                }
                msg = self.receiver.recv() => {
                    match msg {
                        Some((id, msg)) => self.dispatch_handle_msg(id, msg),
                        None => self.common.disconnected = true,
                    }
                }
                cmd = self.channel_commands.next(), if !self.channel_commands.is_empty() && !self.is_rekeying() => {
                    if let Some(cmd) = cmd {
                        self.handle_channel_command(cmd);
                    }
                }
                _ = tokio::time::sleep(delay.unwrap_or_default()), if delay.is_some() => {
                    self.common.disconnect(Disconnect::ByApplication, "timeout", "en");
                }
            }
            self.flush().map_err(H::Error::from)?;
            if !self.common.write_buffer.buffer.is_empty() {
                stream_write.write_all(&self.common.write_buffer.buffer).await.map_err(Error::from)?;
                stream_write.flush().await.map_err(Error::from)?;
                self.common.write_buffer.buffer.clear();
            }
        }
        stream_write.shutdown().await.ok();
        Ok(())
    }

    fn dispatch_handle_msg(&mut self, id: ChannelId, msg: ChannelMsg) {
        match msg {
            ChannelMsg::Data { data } => self.data(id, data),
            ChannelMsg::ExtendedData { data, ext } => self.extended_data(id, ext, data),
            ChannelMsg::Eof => self.eof(id),
            ChannelMsg::Close => self.close(id),
            ChannelMsg::ExitStatus { exit_status } => self.exit_status_request(id, exit_status),
            ChannelMsg::Success => self.channel_success(id),
            ChannelMsg::Failure => self.channel_failure(id),
            _ => {}
        }
    }

    /// Service a command issued by a `Channel` handle handed out from
    /// `channel_open_session`/`channel_open_direct_tcpip` -- a handler
    /// that stashed its handle to stream a subprocess's output drives
    /// the connection through here, not through `Handle`.
    fn handle_channel_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::Data { id, data } => self.data(id, data),
            SessionCommand::ExtendedData { id, ext, data } => self.extended_data(id, ext, data),
            SessionCommand::Eof { id } => self.eof(id),
            SessionCommand::Close { id } => self.close(id),
            SessionCommand::Request { id, request, want_reply, reply } => {
                if let Some(enc) = self.common.encrypted.as_mut() {
                    if let Some(channel) = enc.channels.get_mut(&id) {
                        push_packet!(enc.write, {
                            enc.write.push(msg::CHANNEL_REQUEST);
                            enc.write.push_u32_be(channel.recipient_channel);
                            enc.write.extend(&request);
                        });
                        if want_reply {
                            if let Some(reply) = reply {
                                channel.wants_reply.push_back(reply);
                            }
                        }
                    }
                }
            }
        }
    }
}
