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
//! Server side of the connection. [`run`] accepts connections and
//! spawns one [`Session`] task per client, backed by a fresh
//! [`Handler`] built from the [`Server`] factory. Unlike the client,
//! where callers poll channels directly, the server drives every
//! callback through `Handler`'s methods, since there is no single
//! caller waiting on a particular reply.
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::SelectAll;
use log::debug;
use russh_cryptovec::CryptoVec;
use russh_keys::key;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::channel::{self, Channel, ChannelMsg};
use crate::session::{CommonSession, Exchange, Kex, KexInit};
use crate::ssh_read::SshRead;
use crate::sshbuffer::SSHBuffer;
use crate::{auth, cipher, negotiation, ChannelId, Error, Limits, Sig};

mod encrypted;
mod kex;
mod session;

pub use session::{Handle, Session};

/// Server-side configuration: negotiable transport parameters plus
/// everything RFC 4252 needs to answer `userauth-request`s.
#[derive(Clone)]
pub struct Config {
    pub server_id: String,
    /// Authentication methods advertised in `SSH_MSG_USERAUTH_FAILURE`.
    pub methods: auth::MethodSet,
    pub auth_banner: Option<&'static str>,
    /// Minimum time to answer a rejected authentication request in, to
    /// blunt user enumeration via response-time side channels.
    pub auth_rejection_time: Duration,
    pub max_auth_attempts: usize,
    pub keys: Vec<Arc<key::KeyPair>>,
    pub limits: Limits,
    pub window_size: u32,
    pub maximum_packet_size: u32,
    pub preferred: negotiation::Preferred,
    pub connection_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server_id: format!("SSH-2.0-{}_{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            methods: auth::MethodSet::PUBLICKEY | auth::MethodSet::PASSWORD,
            auth_banner: None,
            auth_rejection_time: Duration::from_secs(1),
            max_auth_attempts: 10,
            keys: Vec::new(),
            limits: Limits::default(),
            window_size: 2097152,
            maximum_packet_size: 32768,
            preferred: negotiation::Preferred::default(),
            connection_timeout: None,
        }
    }
}

/// A `Handler`'s answer to one authentication attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Auth {
    Reject,
    Accept,
    /// The method itself isn't one this server offers; counted
    /// differently from an outright credential rejection only in that
    /// it never lengthens the rejection delay.
    UnsupportedMethod,
}

/// Per-connection callbacks. Every method has a reasonable default
/// (reject authentication, refuse anything beyond a plain session
/// channel) so an implementation only overrides what it needs.
#[async_trait]
pub trait Handler: Sized + Send {
    type Error: From<crate::Error> + Send + std::fmt::Debug;

    async fn auth_none(&mut self, _user: &str) -> Result<Auth, Self::Error> {
        Ok(Auth::Reject)
    }

    async fn auth_password(&mut self, _user: &str, _password: &str) -> Result<Auth, Self::Error> {
        Ok(Auth::Reject)
    }

    async fn auth_publickey(&mut self, _user: &str, _public_key: &key::PublicKey) -> Result<Auth, Self::Error> {
        Ok(Auth::Reject)
    }

    /// A client may open several channels before any single one is
    /// used; return `false` to refuse (RFC 4254 §5.1's resource
    /// shortage case).
    async fn channel_open_session(&mut self, _channel: Channel<channel::Msg>, _session: &mut Session) -> Result<bool, Self::Error> {
        Ok(true)
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        _channel: Channel<channel::Msg>,
        _host_to_connect: &str,
        _port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(false)
    }

    async fn channel_close(&mut self, _channel: ChannelId, _session: &mut Session) -> Result<(), Self::Error> {
        Ok(())
    }

    async fn channel_eof(&mut self, channel: ChannelId, session: &mut Session) -> Result<(), Self::Error> {
        session.eof(channel);
        Ok(())
    }

    async fn data(&mut self, _channel: ChannelId, _data: &[u8], _session: &mut Session) -> Result<(), Self::Error> {
        Ok(())
    }

    async fn extended_data(&mut self, _channel: ChannelId, _code: u32, _data: &[u8], _session: &mut Session) -> Result<(), Self::Error> {
        Ok(())
    }

    async fn window_adjusted(&mut self, channel: ChannelId, _new_size: u32, session: &mut Session) -> Result<(), Self::Error> {
        session.flush_pending(channel);
        Ok(())
    }

    async fn pty_request(
        &mut self,
        _channel: ChannelId,
        _term: &str,
        _col_width: u32,
        _row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(u8, u32)],
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        Ok(())
    }

    async fn env_request(&mut self, _channel: ChannelId, _variable_name: &str, _variable_value: &str, _session: &mut Session) -> Result<(), Self::Error> {
        Ok(())
    }

    async fn shell_request(&mut self, _channel: ChannelId, _session: &mut Session) -> Result<(), Self::Error> {
        Ok(())
    }

    async fn exec_request(&mut self, _channel: ChannelId, _data: &[u8], _session: &mut Session) -> Result<(), Self::Error> {
        Ok(())
    }

    async fn subsystem_request(&mut self, _channel: ChannelId, _name: &str, _session: &mut Session) -> Result<(), Self::Error> {
        Ok(())
    }

    async fn window_change_request(
        &mut self,
        _channel: ChannelId,
        _col_width: u32,
        _row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        Ok(())
    }

    async fn signal(&mut self, _channel: ChannelId, _signal: Sig, _session: &mut Session) -> Result<(), Self::Error> {
        Ok(())
    }

    async fn tcpip_forward(&mut self, _address: &str, _port: &mut u32, _session: &mut Session) -> Result<bool, Self::Error> {
        Ok(false)
    }

    async fn cancel_tcpip_forward(&mut self, _address: &str, _port: u32, _session: &mut Session) -> Result<bool, Self::Error> {
        Ok(false)
    }
}

/// Creates one [`Handler`] per accepted connection.
pub trait Server {
    type Handler: Handler + Send + 'static;
    fn new_client(&mut self, peer_addr: Option<SocketAddr>) -> Self::Handler;
}

/// Bind `addr` and spawn [`run_stream`] for every accepted connection,
/// forever.
pub async fn run<S>(config: Arc<Config>, addr: impl ToSocketAddrs, mut server: S) -> Result<(), Error>
where
    S: Server + Send + 'static,
{
    let listener = TcpListener::bind(addr).await?;
    loop {
        let (socket, peer_addr) = listener.accept().await?;
        let config = config.clone();
        let handler = server.new_client(Some(peer_addr));
        tokio::spawn(async move {
            if let Err(e) = run_stream(config, socket, handler).await {
                debug!("connection from {:?} ended: {:?}", peer_addr, e);
            }
        });
    }
}

async fn read_ssh_id<R: AsyncRead + Unpin>(stream: &mut SshRead<R>) -> Result<Vec<u8>, Error> {
    Ok(stream.read_ssh_id().await?.to_vec())
}

/// Run the server side of one connection to completion: exchange
/// identification strings, then hand every packet to [`Session`]'s
/// event loop until the peer disconnects.
pub async fn run_stream<H, R>(config: Arc<Config>, mut stream: R, handler: H) -> Result<(), H::Error>
where
    H: Handler + Send + 'static,
    R: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut write_buffer = SSHBuffer::new();
    write_buffer.send_ssh_id(config.server_id.as_bytes());
    stream.write_all(&write_buffer.buffer).await.map_err(Error::from)?;

    let mut stream = SshRead::new(stream);
    let client_id = read_ssh_id(&mut stream).await?;

    let mut exchange = Exchange::new();
    exchange.client_id.extend(&client_id);
    exchange.server_id.extend(config.server_id.as_bytes());
    let mut kexinit = KexInit { exchange, algo: None, sent: false, session_id: None };

    let cipher = Arc::new(cipher::clear_pair());
    kexinit.server_write(&config, &cipher, &mut write_buffer)?;

    let (sender, receiver) = unbounded_channel();
    let common = CommonSession {
        write_buffer,
        kex: Some(Kex::KexInit(kexinit)),
        auth_user: String::new(),
        auth_method: None,
        cipher,
        encrypted: None,
        config,
        wants_reply: false,
        disconnected: false,
        buffer: CryptoVec::new(),
    };

    let session = Session {
        common,
        sender: Handle { sender: sender.clone() },
        receiver,
        channel_commands: SelectAll::new(),
        auth_attempts: 0,
    };

    session.run(stream, handler).await
}

async fn start_reading<R: AsyncRead + Unpin>(mut stream_read: R, mut buffer: SSHBuffer, cipher: Arc<cipher::CipherPair>) -> Result<(usize, R, SSHBuffer), Error> {
    let n = cipher::read(&mut stream_read, &mut buffer, cipher.remote_to_local.as_ref()).await?;
    Ok((n, stream_read, buffer))
}

#[doc(hidden)]
pub(crate) type ChannelReceiver = UnboundedReceiver<(ChannelId, ChannelMsg)>;
#[doc(hidden)]
pub(crate) type ChannelSender = UnboundedSender<(ChannelId, ChannelMsg)>;
