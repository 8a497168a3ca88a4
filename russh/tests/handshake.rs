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
//! Full client/server scenarios over an in-memory duplex pipe: no real
//! socket, no real network round trip, just the handshake, key
//! exchange, authentication and channel/exec machinery driving each
//! other end to end.
use std::sync::Arc;

use async_trait::async_trait;
use russh::channel::{self, Channel, ChannelMsg};
use russh::server::{self, Auth, Session};
use russh::{client, ChannelId};
use russh_cryptovec::CryptoVec;
use russh_keys::key::KeyPair;

struct EchoServer;

#[async_trait]
impl server::Handler for EchoServer {
    type Error = russh::Error;

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        Ok(if user == "alice" && password == "hunter2" { Auth::Accept } else { Auth::Reject })
    }

    async fn auth_publickey(&mut self, _user: &str, _key: &russh_keys::key::PublicKey) -> Result<Auth, Self::Error> {
        Ok(Auth::Accept)
    }

    async fn channel_open_session(&mut self, _channel: Channel<channel::Msg>, _session: &mut Session) -> Result<bool, Self::Error> {
        Ok(true)
    }

    async fn exec_request(&mut self, channel: ChannelId, data: &[u8], session: &mut Session) -> Result<(), Self::Error> {
        let mut reply = CryptoVec::new();
        reply.extend(b"echo: ");
        reply.extend(data);
        session.data(channel, reply);
        session.exit_status_request(channel, 0);
        session.close(channel);
        Ok(())
    }
}

async fn spawn_server(keys: Vec<Arc<KeyPair>>) -> tokio::io::DuplexStream {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let config = Arc::new(server::Config { keys, ..Default::default() });
    tokio::spawn(async move {
        let _ = server::run_stream(config, server_io, EchoServer).await;
    });
    client_io
}

#[tokio::test]
async fn password_auth_then_exec_round_trips_data() {
    let client_io = spawn_server(vec![Arc::new(KeyPair::generate_ed25519())]).await;

    let config = Arc::new(client::Config::default());
    let mut handle = client::connect_stream(config, client_io).await.expect("client handshake");
    assert!(handle.authenticate_password("alice", "hunter2").await.expect("authenticate"));

    let mut channel = handle.channel_open_session().await.expect("open channel");
    channel.exec(true, "hello").await.expect("exec");

    let mut collected = Vec::new();
    let mut exit_status = None;
    loop {
        match channel.wait().await {
            Some(ChannelMsg::Data { data }) => collected.extend_from_slice(&data),
            Some(ChannelMsg::ExitStatus { exit_status: code }) => exit_status = Some(code),
            Some(ChannelMsg::Close) | None => break,
            Some(_) => continue,
        }
    }

    assert_eq!(collected, b"echo: hello");
    assert_eq!(exit_status, Some(0));
}

#[tokio::test]
async fn wrong_password_is_rejected() {
    let client_io = spawn_server(vec![Arc::new(KeyPair::generate_ed25519())]).await;

    let config = Arc::new(client::Config::default());
    let mut handle = client::connect_stream(config, client_io).await.expect("client handshake");
    assert!(!handle.authenticate_password("alice", "wrong").await.expect("authenticate"));
}

#[tokio::test]
async fn direct_tcpip_channel_opens_and_streams_bytes() {
    struct ForwardingServer;

    #[async_trait]
    impl server::Handler for ForwardingServer {
        type Error = russh::Error;

        async fn auth_password(&mut self, _user: &str, _password: &str) -> Result<Auth, Self::Error> {
            Ok(Auth::Accept)
        }

        async fn channel_open_direct_tcpip(
            &mut self,
            channel: Channel<channel::Msg>,
            _host_to_connect: &str,
            _port_to_connect: u32,
            _originator_address: &str,
            _originator_port: u32,
            _session: &mut Session,
        ) -> Result<bool, Self::Error> {
            let id = channel.id();
            let mut stream = channel.into_stream();
            tokio::spawn(async move {
                use tokio::io::{AsyncReadExt, AsyncWriteExt};
                let mut buf = [0u8; 1024];
                if let Ok(n) = stream.read(&mut buf).await {
                    let _ = stream.write_all(&buf[..n]).await;
                    let _ = stream.shutdown().await;
                }
            });
            let _ = id;
            Ok(true)
        }
    }

    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let config = Arc::new(server::Config { keys: vec![Arc::new(KeyPair::generate_ed25519())], ..Default::default() });
    tokio::spawn(async move {
        let _ = server::run_stream(config, server_io, ForwardingServer).await;
    });

    let client_config = Arc::new(client::Config::default());
    let mut handle = client::connect_stream(client_config, client_io).await.expect("client handshake");
    assert!(handle.authenticate_password("anyone", "ignored").await.expect("authenticate"));

    let mut channel = handle.channel_open_direct_tcpip("upstream.example", 22, "127.0.0.1", 0).await.expect("open direct-tcpip");
    channel.data(b"ping").await.expect("send");

    let mut collected = Vec::new();
    loop {
        match channel.wait().await {
            Some(ChannelMsg::Data { data }) => {
                collected.extend_from_slice(&data);
                if collected.len() >= 4 {
                    break;
                }
            }
            Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => break,
            Some(_) => continue,
        }
    }

    assert_eq!(collected, b"ping");
}
