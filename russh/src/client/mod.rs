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
//! Client side of the connection: authenticate, open channels, and
//! forward bytes over them. [`connect`] spawns the session's event
//! loop as a `tokio` task and hands back a [`Handle`] used to drive it
//! from anywhere else in the program. There is no callback trait here;
//! callers poll [`crate::channel::Channel::wait`] the way they would
//! read from a socket.
use std::collections::{HashMap, VecDeque};
use std::net::ToSocketAddrs as StdToSocketAddrs;
use std::sync::Arc;

use futures::stream::{SelectAll, StreamExt};
use russh_cryptovec::CryptoVec;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{channel, Receiver, Sender};
use tokio::sync::oneshot;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::channel::{self, Channel, SessionCommand};
use crate::session::{CommonSession, Exchange, Kex, KexInit};
use crate::ssh_read::SshRead;
use crate::sshbuffer::SSHBuffer;
use crate::{auth, cipher, negotiation, push_packet, ChannelId, Disconnect, Error, Limits};

mod encrypted;
mod kex;

/// Client-side configuration (RFC 4253's negotiable parameters, plus
/// the window/packet sizes RFC 4254 leaves up to the implementation).
#[derive(Debug, Clone)]
pub struct Config {
    pub client_id: String,
    pub limits: Limits,
    pub window_size: u32,
    pub maximum_packet_size: u32,
    pub preferred: negotiation::Preferred,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            client_id: format!("SSH-2.0-{}_{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            limits: Limits::default(),
            window_size: 2097152,
            maximum_packet_size: 32768,
            preferred: negotiation::Preferred::default(),
        }
    }
}

/// A `forwarded-tcpip` channel handed to us by the server in answer to
/// an earlier [`Handle::tcpip_forward`] (RFC 4254 §7.2).
pub struct ForwardedTcpIp {
    pub channel: Channel<channel::Msg>,
    pub originator_address: String,
    pub originator_port: u32,
}

/// Commands sent from a [`Handle`] into the running session.
pub enum Msg {
    Authenticate { user: String, method: auth::Method, reply: oneshot::Sender<Result<bool, Error>> },
    ChannelOpenSession { reply: oneshot::Sender<Result<Channel<channel::Msg>, Error>> },
    ChannelOpenDirectTcpIp {
        host_to_connect: String,
        port_to_connect: u32,
        originator_address: String,
        originator_port: u32,
        reply: oneshot::Sender<Result<Channel<channel::Msg>, Error>>,
    },
    TcpIpForward { address: String, port: u32, reply: oneshot::Sender<Result<u32, Error>> },
    CancelTcpIpForward { address: String, port: u32, reply: oneshot::Sender<Result<(), Error>> },
    Disconnect { reason: Disconnect, description: String, language_tag: String },
}

/// Handle to a running client session. There is one event loop per
/// TCP connection; share a `Handle` behind a `Mutex` if several tasks
/// need to drive the same connection.
pub struct Handle {
    sender: Sender<Msg>,
    forwarded: tokio::sync::mpsc::UnboundedReceiver<ForwardedTcpIp>,
    join: tokio::task::JoinHandle<Result<(), Error>>,
}

impl Handle {
    pub async fn authenticate_password<U: Into<String>, P: Into<String>>(&mut self, user: U, password: P) -> Result<bool, Error> {
        self.authenticate(user, auth::Method::Password { password: password.into() }).await
    }

    pub async fn authenticate_publickey<U: Into<String>>(&mut self, user: U, key: Arc<russh_keys::key::KeyPair>) -> Result<bool, Error> {
        self.authenticate(user, auth::Method::PublicKey { key }).await
    }

    async fn authenticate<U: Into<String>>(&mut self, user: U, method: auth::Method) -> Result<bool, Error> {
        let (reply, rx) = oneshot::channel();
        self.sender.send(Msg::Authenticate { user: user.into(), method, reply }).await.map_err(|_| Error::Disconnected)?;
        rx.await.map_err(|_| Error::Disconnected)?
    }

    pub async fn channel_open_session(&mut self) -> Result<Channel<channel::Msg>, Error> {
        let (reply, rx) = oneshot::channel();
        self.sender.send(Msg::ChannelOpenSession { reply }).await.map_err(|_| Error::Disconnected)?;
        rx.await.map_err(|_| Error::Disconnected)?
    }

    pub async fn channel_open_direct_tcpip<A: Into<String>, B: Into<String>>(
        &mut self,
        host_to_connect: A,
        port_to_connect: u32,
        originator_address: B,
        originator_port: u32,
    ) -> Result<Channel<channel::Msg>, Error> {
        let (reply, rx) = oneshot::channel();
        self.sender
            .send(Msg::ChannelOpenDirectTcpIp {
                host_to_connect: host_to_connect.into(),
                port_to_connect,
                originator_address: originator_address.into(),
                originator_port,
                reply,
            })
            .await
            .map_err(|_| Error::Disconnected)?;
        rx.await.map_err(|_| Error::Disconnected)?
    }

    /// RFC 4254 §7.1: ask the server to listen on `address:port` and
    /// forward incoming connections to us as `forwarded-tcpip`
    /// channels, deliverable through [`Handle::next_forwarded_tcpip`].
    /// Returns the bound port, useful when `port == 0`.
    pub async fn tcpip_forward<A: Into<String>>(&mut self, address: A, port: u32) -> Result<u32, Error> {
        let (reply, rx) = oneshot::channel();
        self.sender.send(Msg::TcpIpForward { address: address.into(), port, reply }).await.map_err(|_| Error::Disconnected)?;
        rx.await.map_err(|_| Error::Disconnected)?
    }

    pub async fn cancel_tcpip_forward<A: Into<String>>(&mut self, address: A, port: u32) -> Result<(), Error> {
        let (reply, rx) = oneshot::channel();
        self.sender.send(Msg::CancelTcpIpForward { address: address.into(), port, reply }).await.map_err(|_| Error::Disconnected)?;
        rx.await.map_err(|_| Error::Disconnected)?
    }

    /// Wait for the next inbound `forwarded-tcpip` channel against a
    /// port we previously forwarded; `None` once the session has ended.
    pub async fn next_forwarded_tcpip(&mut self) -> Option<ForwardedTcpIp> {
        self.forwarded.recv().await
    }

    pub async fn disconnect(&mut self, reason: Disconnect, description: &str, language_tag: &str) -> Result<(), Error> {
        self.sender
            .send(Msg::Disconnect { reason, description: description.into(), language_tag: language_tag.into() })
            .await
            .map_err(|_| Error::Disconnected)
    }

    /// Wait for the session task to exit, propagating its error if any.
    pub async fn join(self) -> Result<(), Error> {
        self.join.await?
    }
}

pub async fn connect<A: StdToSocketAddrs>(config: Arc<Config>, addr: A) -> Result<Handle, Error> {
    let addr = addr.to_socket_addrs()?.next().ok_or(Error::Disconnected)?;
    let socket = TcpStream::connect(addr).await?;
    connect_stream(config, socket).await
}

pub async fn connect_stream<R>(config: Arc<Config>, mut stream: R) -> Result<Handle, Error>
where
    R: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut write_buffer = SSHBuffer::new();
    write_buffer.send_ssh_id(config.client_id.as_bytes());
    stream.write_all(&write_buffer.buffer).await?;

    let mut stream = SshRead::new(stream);
    let sshid = stream.read_ssh_id().await?.to_vec();

    let (sender, receiver) = channel(16);
    let (forwarded_tx, forwarded_rx) = tokio::sync::mpsc::unbounded_channel();

    let mut session = Session {
        common: CommonSession {
            write_buffer,
            kex: None,
            auth_user: String::new(),
            auth_method: None,
            cipher: Arc::new(cipher::clear_pair()),
            encrypted: None,
            config,
            wants_reply: false,
            disconnected: false,
            buffer: CryptoVec::new(),
        },
        receiver,
        channel_commands: SelectAll::new(),
        pending_opens: HashMap::new(),
        pending_global: VecDeque::new(),
        forwarding_ports: HashMap::new(),
        forwarded_tx,
        auth_queue: auth::MethodQueue::new(),
        auth_tried: Vec::new(),
        current_auth: None,
        auth_reply: None,
    };
    session.start_kex(&sshid)?;
    let join = tokio::spawn(session.run(stream));
    Ok(Handle { sender, forwarded: forwarded_rx, join })
}

async fn start_reading<R: AsyncRead + Unpin>(mut stream_read: R, mut buffer: SSHBuffer, cipher: Arc<cipher::CipherPair>) -> Result<(usize, R, SSHBuffer), Error> {
    let n = cipher::read(&mut stream_read, &mut buffer, cipher.remote_to_local.as_ref()).await?;
    Ok((n, stream_read, buffer))
}

/// A server's reply to one of our queued `tcpip-forward`/
/// `cancel-tcpip-forward` global requests (RFC 4254 §4), matched up
/// FIFO since global requests carry no correlation id of their own.
pub(crate) enum GlobalReply {
    TcpIpForward { address: String, reply: oneshot::Sender<Result<u32, Error>> },
    CancelTcpIpForward { reply: oneshot::Sender<Result<(), Error>> },
}

pub(crate) struct PendingOpen {
    pub reply: oneshot::Sender<Result<Channel<channel::Msg>, Error>>,
    pub handle: Option<Channel<channel::Msg>>,
}

pub(crate) struct Session {
    common: CommonSession<Arc<Config>>,
    receiver: Receiver<Msg>,
    channel_commands: SelectAll<UnboundedReceiverStream<SessionCommand>>,
    pending_opens: HashMap<ChannelId, PendingOpen>,
    pending_global: VecDeque<GlobalReply>,
    forwarding_ports: HashMap<(String, u32), ()>,
    forwarded_tx: tokio::sync::mpsc::UnboundedSender<ForwardedTcpIp>,
    auth_queue: auth::MethodQueue,
    auth_tried: Vec<usize>,
    current_auth: Option<(usize, auth::Method)>,
    auth_reply: Option<oneshot::Sender<Result<bool, Error>>>,
}

impl Session {
    fn start_kex(&mut self, server_id: &[u8]) -> Result<(), Error> {
        let mut exchange = Exchange::new();
        exchange.server_id.extend(server_id);
        exchange.client_id.extend(self.common.config.client_id.as_bytes());
        let mut kexinit = KexInit { exchange, algo: None, sent: false, session_id: None };
        kexinit.client_write(&self.common.config, &self.common.cipher, &mut self.common.write_buffer)?;
        self.common.kex = Some(Kex::KexInit(kexinit));
        Ok(())
    }

    fn is_rekeying(&self) -> bool {
        match self.common.encrypted {
            Some(ref enc) => enc.rekey.is_some(),
            None => true,
        }
    }

    fn flush(&mut self) -> Result<(), Error> {
        if let Some(ref mut enc) = self.common.encrypted {
            if enc.flush(&self.common.config.limits, &self.common.cipher, &mut self.common.write_buffer) && enc.rekey.is_none() {
                if let Some(exchange) = enc.exchange.take() {
                    let mut kexinit = KexInit::initiate_rekey(exchange, &enc.session_id);
                    kexinit.client_write(&self.common.config, &self.common.cipher, &mut self.common.write_buffer)?;
                    enc.rekey = Some(Kex::KexInit(kexinit));
                }
            }
        }
        Ok(())
    }

    /// Allocate a channel id, register its handle, and write the
    /// `CHANNEL_OPEN` packet built by `write_open`. The caller's reply
    /// is queued in `pending_opens` until the server confirms or
    /// rejects the open.
    fn open_channel(
        &mut self,
        reply: oneshot::Sender<Result<Channel<channel::Msg>, Error>>,
        write_open: impl FnOnce(&mut CryptoVec, ChannelId, u32, u32),
    ) {
        let window_size = self.common.config.window_size;
        let maxpacket = self.common.config.maximum_packet_size;
        let enc = match self.common.encrypted.as_mut() {
            Some(enc) => enc,
            None => {
                let _ = reply.send(Err(Error::NotAuthenticated));
                return;
            }
        };
        let id = enc.new_channel(window_size, maxpacket);
        write_open(&mut enc.write, id, window_size, maxpacket);
        let (_to_session, handle, from_handle, to_handle) = channel::pair::<channel::Msg>(id);
        if let Some(c) = enc.channels.get_mut(&id) {
            c.to_handle = Some(to_handle);
        }
        self.channel_commands.push(UnboundedReceiverStream::new(from_handle));
        self.pending_opens.insert(id, PendingOpen { reply, handle: Some(handle) });
    }

    async fn run<R: AsyncRead + AsyncWrite + Unpin + Send>(mut self, stream: SshRead<R>) -> Result<(), Error> {
        self.flush()?;
        let (stream_read, mut stream_write) = stream.split();
        stream_write.write_all(&self.common.write_buffer.buffer).await?;
        stream_write.flush().await?;
        self.common.write_buffer.buffer.clear();

        let reading = start_reading(stream_read, SSHBuffer::new(), self.common.cipher.clone());
        tokio::pin!(reading);

        while !self.common.disconnected {
            tokio::select! {
                r = &mut reading => {
                    let (n, stream_read, mut buffer) = r?;
                    if n >= 5 {
                        let payload = buffer.buffer[5..n].to_vec();
                        if !payload.is_empty() {
                            if payload[0] == crate::msg::DISCONNECT {
                                break;
                            }
                            self.client_read_encrypted(&payload).await?;
                        }
                    }
                    buffer.buffer.clear();
                    reading.set(start_reading(stream_read, buffer, self.common.cipher.clone()));
                }
                cmd = self.channel_commands.next(), if !self.channel_commands.is_empty() && !self.is_rekeying() => {
                    if let Some(cmd) = cmd {
                        self.handle_channel_command(cmd);
                    }
                }
                msg = self.receiver.recv(), if !self.is_rekeying() => {
                    match msg {
                        Some(msg) => self.handle_msg(msg),
                        None => self.common.disconnected = true,
                    }
                }
            }
            self.flush()?;
            if !self.common.write_buffer.buffer.is_empty() {
                stream_write.write_all(&self.common.write_buffer.buffer).await?;
                stream_write.flush().await?;
                self.common.write_buffer.buffer.clear();
            }
        }
        stream_write.shutdown().await.ok();
        Ok(())
    }

    fn handle_msg(&mut self, msg: Msg) {
        match msg {
            Msg::Authenticate { user, method, reply } => {
                self.common.auth_user.clear();
                self.common.auth_user.push_str(&user);
                self.auth_queue = auth::MethodQueue::new();
                self.auth_queue.push(method);
                self.auth_tried.clear();
                self.current_auth = None;
                self.auth_reply = Some(reply);
                let already_requesting_auth =
                    matches!(self.common.encrypted.as_ref().map(|e| &e.state), Some(crate::session::EncryptedState::WaitingAuthRequest(_)));
                if already_requesting_auth {
                    if let Err(e) = self.write_auth_request() {
                        if let Some(reply) = self.auth_reply.take() {
                            let _ = reply.send(Err(e));
                        }
                    }
                } else {
                    self.write_service_request_if_needed();
                }
            }
            Msg::ChannelOpenSession { reply } => {
                self.open_channel(reply, |buf, id, window, maxpacket| {
                    use russh_keys::encoding::Encoding;
                    push_packet!(buf, {
                        buf.push(crate::msg::CHANNEL_OPEN);
                        buf.extend_ssh_string(b"session");
                        buf.push_u32_be(id.0);
                        buf.push_u32_be(window);
                        buf.push_u32_be(maxpacket);
                    });
                });
            }
            Msg::ChannelOpenDirectTcpIp { host_to_connect, port_to_connect, originator_address, originator_port, reply } => {
                self.open_channel(reply, |buf, id, window, maxpacket| {
                    use russh_keys::encoding::Encoding;
                    push_packet!(buf, {
                        buf.push(crate::msg::CHANNEL_OPEN);
                        buf.extend_ssh_string(b"direct-tcpip");
                        buf.push_u32_be(id.0);
                        buf.push_u32_be(window);
                        buf.push_u32_be(maxpacket);
                        buf.extend_ssh_string(host_to_connect.as_bytes());
                        buf.push_u32_be(port_to_connect);
                        buf.extend_ssh_string(originator_address.as_bytes());
                        buf.push_u32_be(originator_port);
                    });
                });
            }
            Msg::TcpIpForward { address, port, reply } => match self.common.encrypted.as_mut() {
                Some(enc) => {
                    use russh_keys::encoding::Encoding;
                    push_packet!(enc.write, {
                        enc.write.push(crate::msg::GLOBAL_REQUEST);
                        enc.write.extend_ssh_string(b"tcpip-forward");
                        enc.write.push(1);
                        enc.write.extend_ssh_string(address.as_bytes());
                        enc.write.push_u32_be(port);
                    });
                    self.pending_global.push_back(GlobalReply::TcpIpForward { address, reply });
                }
                None => {
                    let _ = reply.send(Err(Error::NotAuthenticated));
                }
            },
            Msg::CancelTcpIpForward { address, port, reply } => match self.common.encrypted.as_mut() {
                Some(enc) => {
                    use russh_keys::encoding::Encoding;
                    push_packet!(enc.write, {
                        enc.write.push(crate::msg::GLOBAL_REQUEST);
                        enc.write.extend_ssh_string(b"cancel-tcpip-forward");
                        enc.write.push(1);
                        enc.write.extend_ssh_string(address.as_bytes());
                        enc.write.push_u32_be(port);
                    });
                    self.forwarding_ports.remove(&(address, port));
                    self.pending_global.push_back(GlobalReply::CancelTcpIpForward { reply });
                }
                None => {
                    let _ = reply.send(Err(Error::NotAuthenticated));
                }
            },
            Msg::Disconnect { reason, description, language_tag } => {
                self.common.disconnect(reason, &description, &language_tag);
            }
        }
    }

    fn handle_channel_command(&mut self, cmd: SessionCommand) {
        let enc = match self.common.encrypted.as_mut() {
            Some(enc) => enc,
            None => return,
        };
        match cmd {
            SessionCommand::Data { id, data } => enc.data(id, data),
            SessionCommand::ExtendedData { id, ext, data } => enc.extended_data(id, ext, data),
            SessionCommand::Eof { id } => enc.eof(id),
            SessionCommand::Close { id } => enc.close(id),
            SessionCommand::Request { id, request, want_reply, reply } => {
                if let Some(channel) = enc.channels.get_mut(&id) {
                    use russh_keys::encoding::Encoding;
                    push_packet!(enc.write, {
                        enc.write.push(crate::msg::CHANNEL_REQUEST);
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
