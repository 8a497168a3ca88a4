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
//! SFTP client engine: one [`SftpSession`] per `sftp` subsystem
//! channel, allocating a monotonic `request_id` per outstanding
//! request and matching replies as they arrive -- several requests may
//! be in flight on the same channel at once, exactly as draft
//! §3 permits.
use russh::channel::{Channel, ChannelMsg};

use crate::error::Error;
use crate::protocol::{split_frames, DirEntry, FileAttributes, OpenFlags, Packet, StatusCode, SFTP_VERSION};

/// Largest payload carried by a single `SSH_FXP_WRITE`. [`SftpSession::write`]
/// splits larger buffers across multiple requests at this boundary.
const WRITE_CHUNK_SIZE: usize = 32_000;

/// One SFTP session over an already-opened `sftp` subsystem channel.
pub struct SftpSession {
    channel: Channel<russh::channel::Msg>,
    next_id: u32,
    recv_buf: Vec<u8>,
    server_version: u32,
}

impl SftpSession {
    /// Request the `sftp` subsystem on `channel` and exchange `INIT`/
    /// `VERSION`. The channel must not have been used for anything else.
    pub async fn new(mut channel: Channel<russh::channel::Msg>) -> Result<Self, Error> {
        if !matches!(channel.request_subsystem(true, "sftp").await?, Some(true)) {
            return Err(russh::Error::ChannelFailure.into());
        }
        let mut session = SftpSession { channel, next_id: 0, recv_buf: Vec::new(), server_version: 0 };
        session.channel.data(&Packet::Init { version: SFTP_VERSION }.encode()).await?;
        match session.next_packet().await? {
            Packet::Version { version } => {
                session.server_version = version;
                if version != SFTP_VERSION {
                    return Err(Error::UnsupportedVersion(version));
                }
            }
            other => return Err(Error::UnexpectedMessage(packet_type_byte(&other))),
        }
        Ok(session)
    }

    /// The protocol version the server answered `INIT` with (always 3;
    /// kept around mostly for diagnostics).
    pub fn server_version(&self) -> u32 {
        self.server_version
    }

    fn allocate_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        id
    }

    /// Send `packet` and block until a reply carrying the same
    /// `request_id` arrives; anything else that arrives first is an SFTP
    /// protocol violation on a single-in-flight client, so it's an error
    /// rather than something to silently buffer.
    async fn roundtrip(&mut self, id: u32, packet: Packet) -> Result<Packet, Error> {
        self.channel.data(&packet.encode()).await?;
        loop {
            let reply = self.next_packet().await?;
            match reply.request_id() {
                Some(reply_id) if reply_id == id => return Ok(reply),
                Some(_) => return Err(Error::UnknownRequestId(id)),
                None => return Err(Error::UnexpectedMessage(packet_type_byte(&reply))),
            }
        }
    }

    async fn next_packet(&mut self) -> Result<Packet, Error> {
        loop {
            let frames = split_frames(&mut self.recv_buf);
            if let Some(frame) = frames.into_iter().next() {
                return Packet::decode(&frame);
            }
            match self.channel.wait().await {
                Some(ChannelMsg::Data { data }) => self.recv_buf.extend_from_slice(&data),
                Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => return Err(Error::ChannelClosed),
                Some(_) => continue,
            }
        }
    }

    fn status_to_result(id: u32, reply: Packet) -> Result<u32, Error> {
        match reply {
            Packet::Status { id: reply_id, code: StatusCode::Ok, .. } if reply_id == id => Ok(reply_id),
            Packet::Status { code, .. } => Err(Error::Remote(code)),
            other => Err(Error::UnexpectedMessage(packet_type_byte(&other))),
        }
    }

    pub async fn open(&mut self, filename: &str, pflags: OpenFlags, attrs: FileAttributes) -> Result<SftpFile, Error> {
        let id = self.allocate_id();
        match self.roundtrip(id, Packet::Open { id, filename: filename.to_string(), pflags, attrs }).await? {
            Packet::Handle { handle, .. } => Ok(SftpFile { handle, position: 0 }),
            Packet::Status { code, .. } => Err(Error::Remote(code)),
            other => Err(Error::UnexpectedMessage(packet_type_byte(&other))),
        }
    }

    pub async fn close(&mut self, file: SftpFile) -> Result<(), Error> {
        let id = self.allocate_id();
        let reply = self.roundtrip(id, Packet::Close { id, handle: file.handle }).await?;
        Self::status_to_result(id, reply).map(|_| ())
    }

    pub async fn read(&mut self, file: &mut SftpFile, len: u32) -> Result<Vec<u8>, Error> {
        let id = self.allocate_id();
        match self.roundtrip(id, Packet::Read { id, handle: file.handle.clone(), offset: file.position, len }).await? {
            Packet::Data { data, .. } => {
                file.position += data.len() as u64;
                Ok(data)
            }
            Packet::Status { code: StatusCode::Eof, .. } => Ok(Vec::new()),
            Packet::Status { code, .. } => Err(Error::Remote(code)),
            other => Err(Error::UnexpectedMessage(packet_type_byte(&other))),
        }
    }

    /// Read the rest of `file` in `chunk_size`-sized requests until EOF.
    pub async fn read_all(&mut self, file: &mut SftpFile, chunk_size: u32) -> Result<Vec<u8>, Error> {
        let mut out = Vec::new();
        loop {
            let chunk = self.read(file, chunk_size).await?;
            if chunk.is_empty() {
                return Ok(out);
            }
            out.extend(chunk);
        }
    }

    /// Writes in chunks of at most `WRITE_CHUNK_SIZE` bytes: servers
    /// routinely cap a single `SSH_FXP_WRITE` payload well below the
    /// packet-length limit, so a large buffer is split across several
    /// requests rather than sent in one `WRITE`.
    pub async fn write(&mut self, file: &mut SftpFile, data: &[u8]) -> Result<(), Error> {
        for chunk in data.chunks(WRITE_CHUNK_SIZE) {
            let id = self.allocate_id();
            let offset = file.position;
            let reply = self
                .roundtrip(id, Packet::Write { id, handle: file.handle.clone(), offset, data: chunk.to_vec() })
                .await?;
            Self::status_to_result(id, reply)?;
            file.position += chunk.len() as u64;
        }
        Ok(())
    }

    pub async fn open_dir(&mut self, path: &str) -> Result<SftpDir, Error> {
        let id = self.allocate_id();
        match self.roundtrip(id, Packet::OpenDir { id, path: path.to_string() }).await? {
            Packet::Handle { handle, .. } => Ok(SftpDir { handle }),
            Packet::Status { code, .. } => Err(Error::Remote(code)),
            other => Err(Error::UnexpectedMessage(packet_type_byte(&other))),
        }
    }

    /// One batch of directory entries; `Ok(None)` once the server
    /// answers with `SSH_FX_EOF` (draft §7's end-of-listing signal).
    pub async fn read_dir(&mut self, dir: &SftpDir) -> Result<Option<Vec<DirEntry>>, Error> {
        let id = self.allocate_id();
        match self.roundtrip(id, Packet::ReadDir { id, handle: dir.handle.clone() }).await? {
            Packet::Name { entries, .. } => Ok(Some(entries)),
            Packet::Status { code: StatusCode::Eof, .. } => Ok(None),
            Packet::Status { code, .. } => Err(Error::Remote(code)),
            other => Err(Error::UnexpectedMessage(packet_type_byte(&other))),
        }
    }

    pub async fn close_dir(&mut self, dir: SftpDir) -> Result<(), Error> {
        let id = self.allocate_id();
        let reply = self.roundtrip(id, Packet::Close { id, handle: dir.handle }).await?;
        Self::status_to_result(id, reply).map(|_| ())
    }

    pub async fn create_dir(&mut self, path: &str) -> Result<(), Error> {
        let id = self.allocate_id();
        let reply = self.roundtrip(id, Packet::MkDir { id, path: path.to_string(), attrs: FileAttributes::default() }).await?;
        Self::status_to_result(id, reply).map(|_| ())
    }

    pub async fn remove_dir(&mut self, path: &str) -> Result<(), Error> {
        let id = self.allocate_id();
        let reply = self.roundtrip(id, Packet::RmDir { id, path: path.to_string() }).await?;
        Self::status_to_result(id, reply).map(|_| ())
    }

    pub async fn remove_file(&mut self, path: &str) -> Result<(), Error> {
        let id = self.allocate_id();
        let reply = self.roundtrip(id, Packet::Remove { id, path: path.to_string() }).await?;
        Self::status_to_result(id, reply).map(|_| ())
    }

    pub async fn rename(&mut self, old_path: &str, new_path: &str) -> Result<(), Error> {
        let id = self.allocate_id();
        let reply = self.roundtrip(id, Packet::Rename { id, old_path: old_path.to_string(), new_path: new_path.to_string() }).await?;
        Self::status_to_result(id, reply).map(|_| ())
    }

    pub async fn symlink(&mut self, link_path: &str, target_path: &str) -> Result<(), Error> {
        let id = self.allocate_id();
        let reply = self.roundtrip(id, Packet::SymLink { id, link_path: link_path.to_string(), target_path: target_path.to_string() }).await?;
        Self::status_to_result(id, reply).map(|_| ())
    }

    pub async fn read_link(&mut self, path: &str) -> Result<String, Error> {
        let id = self.allocate_id();
        match self.roundtrip(id, Packet::ReadLink { id, path: path.to_string() }).await? {
            Packet::Name { mut entries, .. } if !entries.is_empty() => Ok(entries.remove(0).file_name),
            Packet::Status { code, .. } => Err(Error::Remote(code)),
            other => Err(Error::UnexpectedMessage(packet_type_byte(&other))),
        }
    }

    pub async fn metadata(&mut self, path: &str) -> Result<FileAttributes, Error> {
        let id = self.allocate_id();
        match self.roundtrip(id, Packet::Stat { id, path: path.to_string() }).await? {
            Packet::Attrs { attrs, .. } => Ok(attrs),
            Packet::Status { code, .. } => Err(Error::Remote(code)),
            other => Err(Error::UnexpectedMessage(packet_type_byte(&other))),
        }
    }

    pub async fn symlink_metadata(&mut self, path: &str) -> Result<FileAttributes, Error> {
        let id = self.allocate_id();
        match self.roundtrip(id, Packet::LStat { id, path: path.to_string() }).await? {
            Packet::Attrs { attrs, .. } => Ok(attrs),
            Packet::Status { code, .. } => Err(Error::Remote(code)),
            other => Err(Error::UnexpectedMessage(packet_type_byte(&other))),
        }
    }

    pub async fn set_metadata(&mut self, path: &str, attrs: FileAttributes) -> Result<(), Error> {
        let id = self.allocate_id();
        let reply = self.roundtrip(id, Packet::SetStat { id, path: path.to_string(), attrs }).await?;
        Self::status_to_result(id, reply).map(|_| ())
    }

    pub async fn canonicalize(&mut self, path: &str) -> Result<String, Error> {
        let id = self.allocate_id();
        match self.roundtrip(id, Packet::RealPath { id, path: path.to_string() }).await? {
            Packet::Name { mut entries, .. } if !entries.is_empty() => Ok(entries.remove(0).file_name),
            Packet::Status { code, .. } => Err(Error::Remote(code)),
            other => Err(Error::UnexpectedMessage(packet_type_byte(&other))),
        }
    }
}

/// A remote file opened through [`SftpSession::open`]. Dropping this
/// without calling [`SftpSession::close`] leaks the server-side handle
/// until the channel closes.
pub struct SftpFile {
    handle: String,
    position: u64,
}

impl SftpFile {
    pub fn seek(&mut self, position: u64) {
        self.position = position;
    }

    pub fn position(&self) -> u64 {
        self.position
    }
}

/// A remote directory opened through [`SftpSession::open_dir`].
pub struct SftpDir {
    handle: String,
}

fn packet_type_byte(p: &Packet) -> u8 {
    match p {
        Packet::Init { .. } => crate::protocol::SSH_FXP_INIT,
        Packet::Version { .. } => crate::protocol::SSH_FXP_VERSION,
        Packet::Open { .. } => crate::protocol::SSH_FXP_OPEN,
        Packet::Close { .. } => crate::protocol::SSH_FXP_CLOSE,
        Packet::Read { .. } => crate::protocol::SSH_FXP_READ,
        Packet::Write { .. } => crate::protocol::SSH_FXP_WRITE,
        Packet::LStat { .. } => crate::protocol::SSH_FXP_LSTAT,
        Packet::FStat { .. } => crate::protocol::SSH_FXP_FSTAT,
        Packet::SetStat { .. } => crate::protocol::SSH_FXP_SETSTAT,
        Packet::FSetStat { .. } => crate::protocol::SSH_FXP_FSETSTAT,
        Packet::OpenDir { .. } => crate::protocol::SSH_FXP_OPENDIR,
        Packet::ReadDir { .. } => crate::protocol::SSH_FXP_READDIR,
        Packet::Remove { .. } => crate::protocol::SSH_FXP_REMOVE,
        Packet::MkDir { .. } => crate::protocol::SSH_FXP_MKDIR,
        Packet::RmDir { .. } => crate::protocol::SSH_FXP_RMDIR,
        Packet::RealPath { .. } => crate::protocol::SSH_FXP_REALPATH,
        Packet::Stat { .. } => crate::protocol::SSH_FXP_STAT,
        Packet::Rename { .. } => crate::protocol::SSH_FXP_RENAME,
        Packet::ReadLink { .. } => crate::protocol::SSH_FXP_READLINK,
        Packet::SymLink { .. } => crate::protocol::SSH_FXP_SYMLINK,
        Packet::Status { .. } => crate::protocol::SSH_FXP_STATUS,
        Packet::Handle { .. } => crate::protocol::SSH_FXP_HANDLE,
        Packet::Data { .. } => crate::protocol::SSH_FXP_DATA,
        Packet::Name { .. } => crate::protocol::SSH_FXP_NAME,
        Packet::Attrs { .. } => crate::protocol::SSH_FXP_ATTRS,
    }
}
