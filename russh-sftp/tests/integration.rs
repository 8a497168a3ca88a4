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
//! End-to-end exercise of the SFTP client and server engines over a
//! real (in-memory) SSH connection: handshake, auth, channel open,
//! `sftp` subsystem request, and a handful of file operations against
//! an in-memory delegate filesystem.
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use russh::channel::{self, Channel};
use russh::server::{self, Auth};
use russh::{client, ChannelId};
use russh_keys::key::KeyPair;
use russh_sftp::client::SftpSession;
use russh_sftp::server::SftpHandler;
use russh_sftp::{DirEntry, FileAttributes, OpenFlags, StatusCode};

/// An in-memory filesystem backing the server side of the test.
#[derive(Default)]
struct MemFs {
    files: HashMap<String, Vec<u8>>,
}

#[async_trait]
impl SftpHandler for MemFs {
    type Handle = String;

    async fn open(&mut self, filename: &str, pflags: OpenFlags, _attrs: FileAttributes) -> Result<String, StatusCode> {
        if pflags.contains(OpenFlags::CREAT) {
            self.files.entry(filename.to_string()).or_default();
        }
        if self.files.contains_key(filename) {
            Ok(filename.to_string())
        } else {
            Err(StatusCode::NoSuchFile)
        }
    }

    async fn close(&mut self, _handle: String) -> Result<(), StatusCode> {
        Ok(())
    }

    async fn read(&mut self, handle: &String, offset: u64, len: u32) -> Result<Vec<u8>, StatusCode> {
        let data = self.files.get(handle).ok_or(StatusCode::Failure)?;
        let offset = offset as usize;
        if offset >= data.len() {
            return Ok(Vec::new());
        }
        let end = (offset + len as usize).min(data.len());
        Ok(data[offset..end].to_vec())
    }

    async fn write(&mut self, handle: &String, offset: u64, data: &[u8]) -> Result<(), StatusCode> {
        let buf = self.files.get_mut(handle).ok_or(StatusCode::Failure)?;
        let offset = offset as usize;
        if buf.len() < offset + data.len() {
            buf.resize(offset + data.len(), 0);
        }
        buf[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    async fn open_dir(&mut self, _path: &str) -> Result<String, StatusCode> {
        Err(StatusCode::OpUnsupported)
    }

    async fn read_dir(&mut self, _handle: &String) -> Result<Option<Vec<DirEntry>>, StatusCode> {
        Err(StatusCode::OpUnsupported)
    }

    async fn mkdir(&mut self, _path: &str, _attrs: FileAttributes) -> Result<(), StatusCode> {
        Err(StatusCode::OpUnsupported)
    }

    async fn rmdir(&mut self, _path: &str) -> Result<(), StatusCode> {
        Err(StatusCode::OpUnsupported)
    }

    async fn stat(&mut self, path: &str) -> Result<FileAttributes, StatusCode> {
        self.files.get(path).map(|d| FileAttributes::with_size(d.len() as u64)).ok_or(StatusCode::NoSuchFile)
    }

    async fn lstat(&mut self, path: &str) -> Result<FileAttributes, StatusCode> {
        self.stat(path).await
    }

    async fn fstat(&mut self, handle: &String) -> Result<FileAttributes, StatusCode> {
        self.stat(handle).await
    }

    async fn setstat(&mut self, _path: &str, _attrs: FileAttributes) -> Result<(), StatusCode> {
        Ok(())
    }

    async fn fsetstat(&mut self, _handle: &String, _attrs: FileAttributes) -> Result<(), StatusCode> {
        Ok(())
    }

    async fn remove(&mut self, path: &str) -> Result<(), StatusCode> {
        self.files.remove(path).map(|_| ()).ok_or(StatusCode::NoSuchFile)
    }

    async fn rename(&mut self, old_path: &str, new_path: &str) -> Result<(), StatusCode> {
        let data = self.files.remove(old_path).ok_or(StatusCode::NoSuchFile)?;
        self.files.insert(new_path.to_string(), data);
        Ok(())
    }

    async fn symlink(&mut self, _link_path: &str, _target_path: &str) -> Result<(), StatusCode> {
        Err(StatusCode::OpUnsupported)
    }

    async fn readlink(&mut self, _path: &str) -> Result<String, StatusCode> {
        Err(StatusCode::OpUnsupported)
    }

    async fn realpath(&mut self, path: &str) -> Result<String, StatusCode> {
        Ok(path.to_string())
    }
}

/// Hands every opened session channel off to the SFTP server engine
/// once the client requests the `sftp` subsystem on it.
struct ServerHandler {
    channels: HashMap<ChannelId, Channel<channel::Msg>>,
}

#[async_trait]
impl server::Handler for ServerHandler {
    type Error = russh::Error;

    async fn auth_password(&mut self, _user: &str, _password: &str) -> Result<Auth, Self::Error> {
        Ok(Auth::Accept)
    }

    async fn channel_open_session(&mut self, channel: Channel<channel::Msg>, _session: &mut server::Session) -> Result<bool, Self::Error> {
        self.channels.insert(channel.id(), channel);
        Ok(true)
    }

    async fn subsystem_request(&mut self, channel: ChannelId, name: &str, session: &mut server::Session) -> Result<(), Self::Error> {
        if name == "sftp" {
            if let Some(chan) = self.channels.remove(&channel) {
                tokio::spawn(async move {
                    let _ = russh_sftp::server::run(chan, MemFs::default()).await;
                });
                session.channel_success(channel);
                return Ok(());
            }
        }
        session.channel_failure(channel);
        Ok(())
    }
}

#[tokio::test]
async fn sftp_round_trip_over_an_ssh_connection() {
    let (client_io, server_io) = tokio::io::duplex(16 * 1024);

    let server_config = Arc::new(server::Config { keys: vec![Arc::new(KeyPair::generate_ed25519())], ..Default::default() });
    tokio::spawn(async move {
        let handler = ServerHandler { channels: HashMap::new() };
        let _ = server::run_stream(server_config, server_io, handler).await;
    });

    let client_config = Arc::new(client::Config::default());
    let mut handle = client::connect_stream(client_config, client_io).await.expect("client handshake");
    assert!(handle.authenticate_password("alice", "hunter2").await.expect("authenticate"));

    let channel = handle.channel_open_session().await.expect("open channel");
    let mut sftp = SftpSession::new(channel).await.expect("sftp init");
    assert_eq!(sftp.server_version(), 3);

    let mut file = sftp.open("/greeting.txt", OpenFlags::WRITE | OpenFlags::CREAT, FileAttributes::default()).await.expect("open for write");
    sftp.write(&mut file, b"hello sftp").await.expect("write");
    sftp.close(file).await.expect("close after write");

    let mut file = sftp.open("/greeting.txt", OpenFlags::READ, FileAttributes::default()).await.expect("open for read");
    let data = sftp.read_all(&mut file, 4096).await.expect("read_all");
    assert_eq!(data, b"hello sftp");
    sftp.close(file).await.expect("close after read");

    let meta = sftp.metadata("/greeting.txt").await.expect("stat");
    assert_eq!(meta.size, Some(10));

    sftp.rename("/greeting.txt", "/renamed.txt").await.expect("rename");
    assert!(sftp.metadata("/greeting.txt").await.is_err());
    assert_eq!(sftp.metadata("/renamed.txt").await.expect("stat renamed").size, Some(10));

    sftp.remove_file("/renamed.txt").await.expect("remove");
    assert!(sftp.metadata("/renamed.txt").await.is_err());
}
