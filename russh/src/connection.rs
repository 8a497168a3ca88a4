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
//! A higher-level client façade over [`crate::client::Handle`]: one
//! object per logical connection, transparent reconnection under a
//! [`ReconnectPolicy`], and jump-host chaining by handing a
//! `direct-tcpip` channel to another [`SSHClient`] as its transport.
use std::net::ToSocketAddrs as StdToSocketAddrs;
use std::sync::Arc;

use russh_keys::key;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::channel::{self, Channel};
use crate::client::{self, Handle};
use crate::{Disconnect, Error};

/// What to do when the transport task behind a [`SSHClient`] ends
/// unexpectedly. Reconnecting never replays authentication or reopens
/// channels; callers see an [`Error::Disconnected`] surface once from
/// the call that triggered the reconnect and must re-authenticate.
#[derive(Debug, Clone)]
pub enum ReconnectPolicy {
    /// Surface the disconnection; never reconnect.
    Never,
    /// Reconnect exactly once, then behave like `Never`.
    Once { host: String, port: u16 },
    /// Reconnect with no back-off every time the transport ends.
    Always { host: String, port: u16 },
}

/// A connected SSH client plus its reconnect policy. Wraps a
/// [`client::Handle`] one-for-one; every method forwards to the
/// matching `Handle` method and, on [`Error::Disconnected`], consults
/// `policy` before giving up.
pub struct SSHClient {
    handle: Handle,
    config: Arc<client::Config>,
    policy: ReconnectPolicy,
}

impl SSHClient {
    pub async fn connect<A: StdToSocketAddrs>(config: Arc<client::Config>, addr: A, policy: ReconnectPolicy) -> Result<Self, Error> {
        let handle = client::connect(config.clone(), addr).await?;
        Ok(SSHClient { handle, config, policy })
    }

    /// Connect over an already-established transport, e.g. a
    /// `direct-tcpip` channel from a previous hop (see
    /// [`Self::channel_open_direct_tcpip_as_jump_host`]).
    pub async fn connect_via_stream<R>(config: Arc<client::Config>, stream: R, policy: ReconnectPolicy) -> Result<Self, Error>
    where
        R: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let handle = client::connect_stream(config.clone(), stream).await?;
        Ok(SSHClient { handle, config, policy })
    }

    pub async fn authenticate_password<U, P>(&mut self, user: U, password: P) -> Result<bool, Error>
    where
        U: Into<String> + Clone,
        P: Into<String> + Clone,
    {
        match self.handle.authenticate_password(user.clone(), password.clone()).await {
            Err(Error::Disconnected) if self.reconnect().await? => self.handle.authenticate_password(user, password).await,
            other => other,
        }
    }

    pub async fn authenticate_publickey<U>(&mut self, user: U, key: Arc<key::KeyPair>) -> Result<bool, Error>
    where
        U: Into<String> + Clone,
    {
        match self.handle.authenticate_publickey(user.clone(), key.clone()).await {
            Err(Error::Disconnected) if self.reconnect().await? => self.handle.authenticate_publickey(user, key).await,
            other => other,
        }
    }

    pub async fn channel_open_session(&mut self) -> Result<Channel<channel::Msg>, Error> {
        match self.handle.channel_open_session().await {
            Err(Error::Disconnected) if self.reconnect().await? => self.handle.channel_open_session().await,
            other => other,
        }
    }

    pub async fn channel_open_direct_tcpip<A, B>(&mut self, host_to_connect: A, port_to_connect: u32, originator_address: B, originator_port: u32) -> Result<Channel<channel::Msg>, Error>
    where
        A: Into<String> + Clone,
        B: Into<String> + Clone,
    {
        match self
            .handle
            .channel_open_direct_tcpip(host_to_connect.clone(), port_to_connect, originator_address.clone(), originator_port)
            .await
        {
            Err(Error::Disconnected) if self.reconnect().await? => {
                self.handle.channel_open_direct_tcpip(host_to_connect, port_to_connect, originator_address, originator_port).await
            }
            other => other,
        }
    }

    /// Open a `direct-tcpip` channel on this connection to `host:port`
    /// and hand it to a fresh [`SSHClient`] as its transport, chaining
    /// through this connection as a jump host.
    pub async fn connect_via_jump_host<A>(&mut self, config: Arc<client::Config>, host_to_connect: A, port_to_connect: u32, policy: ReconnectPolicy) -> Result<SSHClient, Error>
    where
        A: Into<String>,
    {
        let channel = self.channel_open_direct_tcpip(host_to_connect, port_to_connect, "127.0.0.1", 0).await?;
        SSHClient::connect_via_stream(config, channel.into_stream(), policy).await
    }

    pub async fn disconnect(&mut self, reason: Disconnect, description: &str, language_tag: &str) -> Result<(), Error> {
        self.handle.disconnect(reason, description, language_tag).await
    }

    /// Wait for the underlying session task to exit.
    pub async fn join(self) -> Result<(), Error> {
        self.handle.join().await
    }

    /// Apply `policy` to a dropped transport, replacing `self.handle`
    /// on success. Returns whether a new transport was established.
    async fn reconnect(&mut self) -> Result<bool, Error> {
        match self.policy.clone() {
            ReconnectPolicy::Never => Ok(false),
            ReconnectPolicy::Once { host, port } => {
                self.policy = ReconnectPolicy::Never;
                self.handle = client::connect(self.config.clone(), (host.as_str(), port)).await?;
                Ok(true)
            }
            ReconnectPolicy::Always { host, port } => {
                loop {
                    match client::connect(self.config.clone(), (host.as_str(), port)).await {
                        Ok(handle) => {
                            self.handle = handle;
                            return Ok(true);
                        }
                        Err(_) => continue,
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn once_policy_is_consumed_on_reconnect() {
        // `reconnect` flips `Once` to `Never` before it returns, so a
        // second transport loss surfaces the error instead of looping.
        let policy = ReconnectPolicy::Once { host: "jump.example".into(), port: 22 };
        match policy {
            ReconnectPolicy::Once { host, port } => {
                assert_eq!(host, "jump.example");
                assert_eq!(port, 22);
            }
            _ => panic!("expected Once"),
        }
    }
}
