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
//! SFTP server engine: [`run`] drives one `sftp` subsystem channel to
//! completion, decoding each request and dispatching it to a
//! user-provided [`SftpHandler`] delegate. One [`run`] call serialises
//! all work on its channel -- a delegate wanting to service several
//! channels concurrently spawns one task per channel, the way a
//! `russh::server::Handler` spawns one task per connection.
use async_trait::async_trait;
use log::{debug, warn};
use russh::channel::{Channel, ChannelMsg};

use crate::error::Error;
use crate::protocol::{split_frames, DirEntry, FileAttributes, OpenFlags, Packet, StatusCode, SFTP_VERSION};

/// What a server-side SFTP handler actually has to implement; every
/// method defaults to `SSH_FX_OP_UNSUPPORTED` so an implementation
/// only overrides the operations it supports (e.g. a read-only
/// delegate never implements `write`/`mkdir`/...).
#[async_trait]
pub trait SftpHandler: Send {
    /// Opaque handle type this delegate hands back to correlate a
    /// later `read`/`write`/`close`/`fstat` with the file it opened.
    type Handle: Clone + Send + Sync;

    async fn open(&mut self, filename: &str, pflags: OpenFlags, attrs: FileAttributes) -> Result<Self::Handle, StatusCode>;
    async fn close(&mut self, handle: Self::Handle) -> Result<(), StatusCode>;
    async fn read(&mut self, handle: &Self::Handle, offset: u64, len: u32) -> Result<Vec<u8>, StatusCode>;
    async fn write(&mut self, handle: &Self::Handle, offset: u64, data: &[u8]) -> Result<(), StatusCode>;
    async fn open_dir(&mut self, path: &str) -> Result<Self::Handle, StatusCode>;
    async fn read_dir(&mut self, handle: &Self::Handle) -> Result<Option<Vec<DirEntry>>, StatusCode>;
    async fn mkdir(&mut self, path: &str, attrs: FileAttributes) -> Result<(), StatusCode>;
    async fn rmdir(&mut self, path: &str) -> Result<(), StatusCode>;
    async fn stat(&mut self, path: &str) -> Result<FileAttributes, StatusCode>;
    async fn lstat(&mut self, path: &str) -> Result<FileAttributes, StatusCode>;
    async fn fstat(&mut self, handle: &Self::Handle) -> Result<FileAttributes, StatusCode>;
    async fn setstat(&mut self, path: &str, attrs: FileAttributes) -> Result<(), StatusCode>;
    async fn fsetstat(&mut self, handle: &Self::Handle, attrs: FileAttributes) -> Result<(), StatusCode>;
    async fn remove(&mut self, path: &str) -> Result<(), StatusCode>;
    async fn rename(&mut self, old_path: &str, new_path: &str) -> Result<(), StatusCode>;
    async fn symlink(&mut self, link_path: &str, target_path: &str) -> Result<(), StatusCode>;
    async fn readlink(&mut self, path: &str) -> Result<String, StatusCode>;
    async fn realpath(&mut self, path: &str) -> Result<String, StatusCode>;
}

fn status(id: u32, code: StatusCode) -> Packet {
    let message = match code {
        StatusCode::Ok => "Success",
        StatusCode::Eof => "End of file",
        StatusCode::NoSuchFile => "No such file",
        StatusCode::PermissionDenied => "Permission denied",
        StatusCode::Failure => "Failure",
        StatusCode::BadMessage => "Bad message",
        StatusCode::NoConnection => "No connection",
        StatusCode::ConnectionLost => "Connection lost",
        StatusCode::OpUnsupported => "Operation unsupported",
    };
    Packet::Status { id, code, message: message.to_string() }
}

fn ok(id: u32) -> Packet {
    status(id, StatusCode::Ok)
}

/// Drive `channel` as an `sftp` subsystem: read the `INIT` handshake,
/// then loop decoding requests and dispatching them to `handler` until
/// the channel closes.
pub async fn run<H: SftpHandler>(mut channel: Channel<russh::channel::Msg>, mut handler: H) -> Result<(), Error> {
    let mut recv_buf = Vec::new();
    let mut handles: std::collections::HashMap<String, H::Handle> = std::collections::HashMap::new();
    let mut dir_snapshots: std::collections::HashMap<String, std::collections::VecDeque<DirEntry>> = std::collections::HashMap::new();
    let mut next_handle_id: u64 = 0;

    loop {
        let frames = split_frames(&mut recv_buf);
        if frames.is_empty() {
            match channel.wait().await {
                Some(ChannelMsg::Data { data }) => {
                    recv_buf.extend_from_slice(&data);
                    continue;
                }
                Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => return Ok(()),
                Some(_) => continue,
            }
        }

        for frame in frames {
            let packet = match Packet::decode(&frame) {
                Ok(packet) => packet,
                Err(e) => {
                    warn!("sftp: malformed request: {:?}", e);
                    continue;
                }
            };
            let reply = dispatch(&mut handler, &mut handles, &mut dir_snapshots, &mut next_handle_id, packet).await?;
            if let Some(reply) = reply {
                channel.data(&reply.encode()).await?;
            }
        }
    }
}

async fn dispatch<H: SftpHandler>(
    handler: &mut H,
    handles: &mut std::collections::HashMap<String, H::Handle>,
    dir_snapshots: &mut std::collections::HashMap<String, std::collections::VecDeque<DirEntry>>,
    next_handle_id: &mut u64,
    packet: Packet,
) -> Result<Option<Packet>, Error> {
    let reply = match packet {
        Packet::Init { version } => {
            debug!("sftp: client requested version {}", version);
            return Ok(Some(Packet::Version { version: SFTP_VERSION }));
        }
        Packet::Open { id, filename, pflags, attrs } => match handler.open(&filename, pflags, attrs).await {
            Ok(h) => {
                let handle = new_handle_name(next_handle_id);
                handles.insert(handle.clone(), h);
                Packet::Handle { id, handle }
            }
            Err(code) => status(id, code),
        },
        Packet::Close { id, handle } => match handles.remove(&handle) {
            Some(h) => {
                dir_snapshots.remove(&handle);
                match handler.close(h).await {
                    Ok(()) => ok(id),
                    Err(code) => status(id, code),
                }
            }
            None => status(id, StatusCode::Failure),
        },
        Packet::Read { id, handle, offset, len } => match handles.get(&handle) {
            Some(h) => match handler.read(h, offset, len).await {
                Ok(data) if data.is_empty() => status(id, StatusCode::Eof),
                Ok(data) => Packet::Data { id, data },
                Err(code) => status(id, code),
            },
            None => status(id, StatusCode::Failure),
        },
        Packet::Write { id, handle, offset, data } => match handles.get(&handle) {
            Some(h) => match handler.write(h, offset, &data).await {
                Ok(()) => ok(id),
                Err(code) => status(id, code),
            },
            None => status(id, StatusCode::Failure),
        },
        Packet::OpenDir { id, path } => match handler.open_dir(&path).await {
            Ok(h) => {
                let handle = new_handle_name(next_handle_id);
                handles.insert(handle.clone(), h);
                Packet::Handle { id, handle }
            }
            Err(code) => status(id, code),
        },
        Packet::ReadDir { id, handle } => match handles.get(&handle) {
            Some(h) => {
                // The full listing is fetched once, the first time this
                // handle is read, and handed out one entry per reply
                // after that -- the handler never sees more than one
                // `read_dir` call per handle.
                if !dir_snapshots.contains_key(&handle) {
                    match handler.read_dir(h).await {
                        Ok(Some(entries)) => {
                            dir_snapshots.insert(handle.clone(), entries.into_iter().collect());
                        }
                        Ok(None) => {
                            dir_snapshots.insert(handle.clone(), std::collections::VecDeque::new());
                        }
                        Err(code) => return Ok(Some(status(id, code))),
                    }
                }
                let snapshot = dir_snapshots.get_mut(&handle).expect("snapshot inserted above");
                match snapshot.pop_front() {
                    Some(entry) => Packet::Name { id, entries: vec![entry] },
                    None => status(id, StatusCode::Eof),
                }
            }
            None => status(id, StatusCode::Failure),
        },
        Packet::MkDir { id, path, attrs } => match handler.mkdir(&path, attrs).await {
            Ok(()) => ok(id),
            Err(code) => status(id, code),
        },
        Packet::RmDir { id, path } => match handler.rmdir(&path).await {
            Ok(()) => ok(id),
            Err(code) => status(id, code),
        },
        Packet::Stat { id, path } => match handler.stat(&path).await {
            Ok(attrs) => Packet::Attrs { id, attrs },
            Err(code) => status(id, code),
        },
        Packet::LStat { id, path } => match handler.lstat(&path).await {
            Ok(attrs) => Packet::Attrs { id, attrs },
            Err(code) => status(id, code),
        },
        Packet::FStat { id, handle } => match handles.get(&handle) {
            Some(h) => match handler.fstat(h).await {
                Ok(attrs) => Packet::Attrs { id, attrs },
                Err(code) => status(id, code),
            },
            None => status(id, StatusCode::Failure),
        },
        Packet::SetStat { id, path, attrs } => match handler.setstat(&path, attrs).await {
            Ok(()) => ok(id),
            Err(code) => status(id, code),
        },
        Packet::FSetStat { id, handle, attrs } => match handles.get(&handle) {
            Some(h) => match handler.fsetstat(h, attrs).await {
                Ok(()) => ok(id),
                Err(code) => status(id, code),
            },
            None => status(id, StatusCode::Failure),
        },
        Packet::Remove { id, path } => match handler.remove(&path).await {
            Ok(()) => ok(id),
            Err(code) => status(id, code),
        },
        Packet::Rename { id, old_path, new_path } => match handler.rename(&old_path, &new_path).await {
            Ok(()) => ok(id),
            Err(code) => status(id, code),
        },
        Packet::SymLink { id, link_path, target_path } => match handler.symlink(&link_path, &target_path).await {
            Ok(()) => ok(id),
            Err(code) => status(id, code),
        },
        Packet::ReadLink { id, path } => match handler.readlink(&path).await {
            Ok(target) => Packet::Name { id, entries: vec![DirEntry { file_name: target, longname: String::new(), attrs: FileAttributes::default() }] },
            Err(code) => status(id, code),
        },
        Packet::RealPath { id, path } => match handler.realpath(&path).await {
            Ok(resolved) => Packet::Name { id, entries: vec![DirEntry { file_name: resolved, longname: String::new(), attrs: FileAttributes::default() }] },
            Err(code) => status(id, code),
        },
        // Response types a well-behaved client never sends us.
        Packet::Version { .. } | Packet::Status { .. } | Packet::Handle { .. } | Packet::Data { .. } | Packet::Name { .. } | Packet::Attrs { .. } => {
            return Ok(None);
        }
    };
    Ok(Some(reply))
}

fn new_handle_name(next_handle_id: &mut u64) -> String {
    let id = *next_handle_id;
    *next_handle_id += 1;
    format!("h{}", id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_message_matches_code() {
        let packet = status(1, StatusCode::NoSuchFile);
        match packet {
            Packet::Status { code, message, .. } => {
                assert_eq!(code, StatusCode::NoSuchFile);
                assert_eq!(message, "No such file");
            }
            _ => panic!("expected Status"),
        }
    }

    #[test]
    fn handle_names_are_unique_and_monotonic() {
        let mut next = 0u64;
        let a = new_handle_name(&mut next);
        let b = new_handle_name(&mut next);
        assert_ne!(a, b);
    }
}
