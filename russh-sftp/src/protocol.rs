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
//! Wire format of SFTP version 3 (draft-ietf-secsh-filexfer-02):
//! length-prefixed packets, a fixed set of message types, and the
//! `ATTRS` file-attribute encoding. Unlike the SSH transport packets
//! in `russh`, there is no padding or MAC here -- the channel data
//! stream already carries integrity and confidentiality.
use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use russh_keys::encoding::{Encoding, Reader};

use crate::error::Error;

pub const SSH_FXP_INIT: u8 = 1;
pub const SSH_FXP_VERSION: u8 = 2;
pub const SSH_FXP_OPEN: u8 = 3;
pub const SSH_FXP_CLOSE: u8 = 4;
pub const SSH_FXP_READ: u8 = 5;
pub const SSH_FXP_WRITE: u8 = 6;
pub const SSH_FXP_LSTAT: u8 = 7;
pub const SSH_FXP_FSTAT: u8 = 8;
pub const SSH_FXP_SETSTAT: u8 = 9;
pub const SSH_FXP_FSETSTAT: u8 = 10;
pub const SSH_FXP_OPENDIR: u8 = 11;
pub const SSH_FXP_READDIR: u8 = 12;
pub const SSH_FXP_REMOVE: u8 = 13;
pub const SSH_FXP_MKDIR: u8 = 14;
pub const SSH_FXP_RMDIR: u8 = 15;
pub const SSH_FXP_REALPATH: u8 = 16;
pub const SSH_FXP_STAT: u8 = 17;
pub const SSH_FXP_RENAME: u8 = 18;
pub const SSH_FXP_READLINK: u8 = 19;
pub const SSH_FXP_SYMLINK: u8 = 20;
pub const SSH_FXP_STATUS: u8 = 101;
pub const SSH_FXP_HANDLE: u8 = 102;
pub const SSH_FXP_DATA: u8 = 103;
pub const SSH_FXP_NAME: u8 = 104;
pub const SSH_FXP_ATTRS: u8 = 105;

pub const SFTP_VERSION: u32 = 3;

bitflags::bitflags! {
    /// `pflags` of `SSH_FXP_OPEN` (draft §6.3).
    pub struct OpenFlags: u32 {
        const READ = 0x0000_0001;
        const WRITE = 0x0000_0002;
        const APPEND = 0x0000_0004;
        const CREAT = 0x0000_0008;
        const TRUNC = 0x0000_0010;
        const EXCL = 0x0000_0020;
    }
}

bitflags::bitflags! {
    /// Which fields of [`FileAttributes`] are present on the wire.
    struct AttrFlags: u32 {
        const SIZE = 0x0000_0001;
        const UIDGID = 0x0000_0002;
        const PERMISSIONS = 0x0000_0004;
        const ACMODTIME = 0x0000_0008;
        const EXTENDED = 0x8000_0000;
    }
}

/// Status codes carried in `SSH_FXP_STATUS` (draft §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum StatusCode {
    Ok = 0,
    Eof = 1,
    NoSuchFile = 2,
    PermissionDenied = 3,
    Failure = 4,
    BadMessage = 5,
    NoConnection = 6,
    ConnectionLost = 7,
    OpUnsupported = 8,
}

impl StatusCode {
    fn from_u32(code: u32) -> StatusCode {
        match code {
            0 => StatusCode::Ok,
            1 => StatusCode::Eof,
            2 => StatusCode::NoSuchFile,
            3 => StatusCode::PermissionDenied,
            5 => StatusCode::BadMessage,
            6 => StatusCode::NoConnection,
            7 => StatusCode::ConnectionLost,
            8 => StatusCode::OpUnsupported,
            _ => StatusCode::Failure,
        }
    }
}

/// File/directory attributes (draft §5), with only the fields present
/// on the wire actually populated -- `None` means "the peer didn't
/// send this field", not "zero".
#[derive(Debug, Clone, Default)]
pub struct FileAttributes {
    pub size: Option<u64>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub permissions: Option<u32>,
    pub atime: Option<u32>,
    pub mtime: Option<u32>,
}

impl FileAttributes {
    pub fn with_size(size: u64) -> Self {
        FileAttributes { size: Some(size), ..Default::default() }
    }

    pub fn with_permissions(permissions: u32) -> Self {
        FileAttributes { permissions: Some(permissions), ..Default::default() }
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        let mut flags = AttrFlags::empty();
        if self.size.is_some() {
            flags |= AttrFlags::SIZE;
        }
        if self.uid.is_some() || self.gid.is_some() {
            flags |= AttrFlags::UIDGID;
        }
        if self.permissions.is_some() {
            flags |= AttrFlags::PERMISSIONS;
        }
        if self.atime.is_some() || self.mtime.is_some() {
            flags |= AttrFlags::ACMODTIME;
        }
        push_u32(buf, flags.bits());
        if let Some(size) = self.size {
            push_u64(buf, size);
        }
        if flags.contains(AttrFlags::UIDGID) {
            push_u32(buf, self.uid.unwrap_or(0));
            push_u32(buf, self.gid.unwrap_or(0));
        }
        if let Some(permissions) = self.permissions {
            push_u32(buf, permissions);
        }
        if flags.contains(AttrFlags::ACMODTIME) {
            push_u32(buf, self.atime.unwrap_or(0));
            push_u32(buf, self.mtime.unwrap_or(0));
        }
    }

    fn decode(r: &mut russh_keys::encoding::Position<'_>) -> Result<FileAttributes, Error> {
        let flags = AttrFlags::from_bits_truncate(read_u32(r)?);
        let mut attrs = FileAttributes::default();
        if flags.contains(AttrFlags::SIZE) {
            attrs.size = Some(read_u64(r)?);
        }
        if flags.contains(AttrFlags::UIDGID) {
            attrs.uid = Some(read_u32(r)?);
            attrs.gid = Some(read_u32(r)?);
        }
        if flags.contains(AttrFlags::PERMISSIONS) {
            attrs.permissions = Some(read_u32(r)?);
        }
        if flags.contains(AttrFlags::ACMODTIME) {
            attrs.atime = Some(read_u32(r)?);
            attrs.mtime = Some(read_u32(r)?);
        }
        if flags.contains(AttrFlags::EXTENDED) {
            let count = read_u32(r)?;
            for _ in 0..count {
                r.read_string().map_err(|_| Error::Decode)?;
                r.read_string().map_err(|_| Error::Decode)?;
            }
        }
        Ok(attrs)
    }
}

/// One directory entry, as returned by `SSH_FXP_READDIR` (draft §7).
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub file_name: String,
    pub longname: String,
    pub attrs: FileAttributes,
}

fn push_u32(buf: &mut Vec<u8>, v: u32) {
    buf.write_u32::<BigEndian>(v).expect("Vec<u8> write is infallible");
}

fn push_u64(buf: &mut Vec<u8>, v: u64) {
    buf.write_u64::<BigEndian>(v).expect("Vec<u8> write is infallible");
}

fn read_u32(r: &mut russh_keys::encoding::Position<'_>) -> Result<u32, Error> {
    r.read_u32().map_err(|_| Error::Decode)
}

fn read_u64(r: &mut russh_keys::encoding::Position<'_>) -> Result<u64, Error> {
    let hi = read_u32(r)? as u64;
    let lo = read_u32(r)? as u64;
    Ok((hi << 32) | lo)
}

fn read_str<'a>(r: &mut russh_keys::encoding::Position<'a>) -> Result<&'a [u8], Error> {
    r.read_string().map_err(|_| Error::Decode)
}

fn read_utf8(r: &mut russh_keys::encoding::Position<'_>) -> Result<String, Error> {
    String::from_utf8(read_str(r)?.to_vec()).map_err(|_| Error::Decode)
}

/// A fully-decoded SFTP packet, tagged with its own `request_id` where
/// the message type carries one (every type except `INIT`/`VERSION`).
#[derive(Debug, Clone)]
pub enum Packet {
    Init { version: u32 },
    Version { version: u32 },
    Open { id: u32, filename: String, pflags: OpenFlags, attrs: FileAttributes },
    Close { id: u32, handle: String },
    Read { id: u32, handle: String, offset: u64, len: u32 },
    Write { id: u32, handle: String, offset: u64, data: Vec<u8> },
    LStat { id: u32, path: String },
    FStat { id: u32, handle: String },
    SetStat { id: u32, path: String, attrs: FileAttributes },
    FSetStat { id: u32, handle: String, attrs: FileAttributes },
    OpenDir { id: u32, path: String },
    ReadDir { id: u32, handle: String },
    Remove { id: u32, path: String },
    MkDir { id: u32, path: String, attrs: FileAttributes },
    RmDir { id: u32, path: String },
    RealPath { id: u32, path: String },
    Stat { id: u32, path: String },
    Rename { id: u32, old_path: String, new_path: String },
    ReadLink { id: u32, path: String },
    SymLink { id: u32, link_path: String, target_path: String },
    Status { id: u32, code: StatusCode, message: String },
    Handle { id: u32, handle: String },
    Data { id: u32, data: Vec<u8> },
    Name { id: u32, entries: Vec<DirEntry> },
    Attrs { id: u32, attrs: FileAttributes },
}

impl Packet {
    /// The `request_id` this packet correlates to, if it carries one.
    pub fn request_id(&self) -> Option<u32> {
        match self {
            Packet::Init { .. } | Packet::Version { .. } => None,
            Packet::Open { id, .. }
            | Packet::Close { id, .. }
            | Packet::Read { id, .. }
            | Packet::Write { id, .. }
            | Packet::LStat { id, .. }
            | Packet::FStat { id, .. }
            | Packet::SetStat { id, .. }
            | Packet::FSetStat { id, .. }
            | Packet::OpenDir { id, .. }
            | Packet::ReadDir { id, .. }
            | Packet::Remove { id, .. }
            | Packet::MkDir { id, .. }
            | Packet::RmDir { id, .. }
            | Packet::RealPath { id, .. }
            | Packet::Stat { id, .. }
            | Packet::Rename { id, .. }
            | Packet::ReadLink { id, .. }
            | Packet::SymLink { id, .. }
            | Packet::Status { id, .. }
            | Packet::Handle { id, .. }
            | Packet::Data { id, .. }
            | Packet::Name { id, .. }
            | Packet::Attrs { id, .. } => Some(*id),
        }
    }

    /// Encode into a length-prefixed frame ready to hand to
    /// `Channel::data` -- the 4-byte prefix covers everything after it,
    /// including the one-byte message type.
    pub fn encode(&self) -> Vec<u8> {
        let mut body: Vec<u8> = Vec::new();
        match self {
            Packet::Init { version } => {
                body.push(SSH_FXP_INIT);
                push_u32(&mut body, *version);
            }
            Packet::Version { version } => {
                body.push(SSH_FXP_VERSION);
                push_u32(&mut body, *version);
            }
            Packet::Open { id, filename, pflags, attrs } => {
                body.push(SSH_FXP_OPEN);
                push_u32(&mut body, *id);
                body.extend_ssh_string(filename.as_bytes());
                push_u32(&mut body, pflags.bits());
                attrs.encode(&mut body);
            }
            Packet::Close { id, handle } => {
                body.push(SSH_FXP_CLOSE);
                push_u32(&mut body, *id);
                body.extend_ssh_string(handle.as_bytes());
            }
            Packet::Read { id, handle, offset, len } => {
                body.push(SSH_FXP_READ);
                push_u32(&mut body, *id);
                body.extend_ssh_string(handle.as_bytes());
                push_u64(&mut body, *offset);
                push_u32(&mut body, *len);
            }
            Packet::Write { id, handle, offset, data } => {
                body.push(SSH_FXP_WRITE);
                push_u32(&mut body, *id);
                body.extend_ssh_string(handle.as_bytes());
                push_u64(&mut body, *offset);
                body.extend_ssh_string(data);
            }
            Packet::LStat { id, path } => {
                body.push(SSH_FXP_LSTAT);
                push_u32(&mut body, *id);
                body.extend_ssh_string(path.as_bytes());
            }
            Packet::FStat { id, handle } => {
                body.push(SSH_FXP_FSTAT);
                push_u32(&mut body, *id);
                body.extend_ssh_string(handle.as_bytes());
            }
            Packet::SetStat { id, path, attrs } => {
                body.push(SSH_FXP_SETSTAT);
                push_u32(&mut body, *id);
                body.extend_ssh_string(path.as_bytes());
                attrs.encode(&mut body);
            }
            Packet::FSetStat { id, handle, attrs } => {
                body.push(SSH_FXP_FSETSTAT);
                push_u32(&mut body, *id);
                body.extend_ssh_string(handle.as_bytes());
                attrs.encode(&mut body);
            }
            Packet::OpenDir { id, path } => {
                body.push(SSH_FXP_OPENDIR);
                push_u32(&mut body, *id);
                body.extend_ssh_string(path.as_bytes());
            }
            Packet::ReadDir { id, handle } => {
                body.push(SSH_FXP_READDIR);
                push_u32(&mut body, *id);
                body.extend_ssh_string(handle.as_bytes());
            }
            Packet::Remove { id, path } => {
                body.push(SSH_FXP_REMOVE);
                push_u32(&mut body, *id);
                body.extend_ssh_string(path.as_bytes());
            }
            Packet::MkDir { id, path, attrs } => {
                body.push(SSH_FXP_MKDIR);
                push_u32(&mut body, *id);
                body.extend_ssh_string(path.as_bytes());
                attrs.encode(&mut body);
            }
            Packet::RmDir { id, path } => {
                body.push(SSH_FXP_RMDIR);
                push_u32(&mut body, *id);
                body.extend_ssh_string(path.as_bytes());
            }
            Packet::RealPath { id, path } => {
                body.push(SSH_FXP_REALPATH);
                push_u32(&mut body, *id);
                body.extend_ssh_string(path.as_bytes());
            }
            Packet::Stat { id, path } => {
                body.push(SSH_FXP_STAT);
                push_u32(&mut body, *id);
                body.extend_ssh_string(path.as_bytes());
            }
            Packet::Rename { id, old_path, new_path } => {
                body.push(SSH_FXP_RENAME);
                push_u32(&mut body, *id);
                body.extend_ssh_string(old_path.as_bytes());
                body.extend_ssh_string(new_path.as_bytes());
            }
            Packet::ReadLink { id, path } => {
                body.push(SSH_FXP_READLINK);
                push_u32(&mut body, *id);
                body.extend_ssh_string(path.as_bytes());
            }
            Packet::SymLink { id, link_path, target_path } => {
                body.push(SSH_FXP_SYMLINK);
                push_u32(&mut body, *id);
                // The draft famously swaps these two relative to `symlink(2)`.
                body.extend_ssh_string(link_path.as_bytes());
                body.extend_ssh_string(target_path.as_bytes());
            }
            Packet::Status { id, code, message } => {
                body.push(SSH_FXP_STATUS);
                push_u32(&mut body, *id);
                push_u32(&mut body, *code as u32);
                body.extend_ssh_string(message.as_bytes());
                body.extend_ssh_string(b"en");
            }
            Packet::Handle { id, handle } => {
                body.push(SSH_FXP_HANDLE);
                push_u32(&mut body, *id);
                body.extend_ssh_string(handle.as_bytes());
            }
            Packet::Data { id, data } => {
                body.push(SSH_FXP_DATA);
                push_u32(&mut body, *id);
                body.extend_ssh_string(data);
            }
            Packet::Name { id, entries } => {
                body.push(SSH_FXP_NAME);
                push_u32(&mut body, *id);
                push_u32(&mut body, entries.len() as u32);
                for entry in entries {
                    body.extend_ssh_string(entry.file_name.as_bytes());
                    body.extend_ssh_string(entry.longname.as_bytes());
                    entry.attrs.encode(&mut body);
                }
            }
            Packet::Attrs { id, attrs } => {
                body.push(SSH_FXP_ATTRS);
                push_u32(&mut body, *id);
                attrs.encode(&mut body);
            }
        }
        let mut framed = Vec::with_capacity(body.len() + 4);
        push_u32(&mut framed, body.len() as u32);
        framed.extend(body);
        framed
    }

    /// Decode one packet from a frame already stripped of its 4-byte
    /// length prefix (the caller owns reassembling frames from
    /// `CHANNEL_DATA` payloads, since SFTP packets do not necessarily
    /// arrive in one `channel-data` message each).
    pub fn decode(buf: &[u8]) -> Result<Packet, Error> {
        let mut r = buf.reader(0);
        let msg_type = r.read_byte().map_err(|_| Error::Decode)?;
        if msg_type == SSH_FXP_INIT {
            return Ok(Packet::Init { version: read_u32(&mut r)? });
        }
        if msg_type == SSH_FXP_VERSION {
            return Ok(Packet::Version { version: read_u32(&mut r)? });
        }
        let id = read_u32(&mut r)?;
        Ok(match msg_type {
            SSH_FXP_OPEN => {
                let filename = read_utf8(&mut r)?;
                let pflags = OpenFlags::from_bits_truncate(read_u32(&mut r)?);
                let attrs = FileAttributes::decode(&mut r)?;
                Packet::Open { id, filename, pflags, attrs }
            }
            SSH_FXP_CLOSE => Packet::Close { id, handle: read_utf8(&mut r)? },
            SSH_FXP_READ => {
                let handle = read_utf8(&mut r)?;
                let offset = read_u64(&mut r)?;
                let len = read_u32(&mut r)?;
                Packet::Read { id, handle, offset, len }
            }
            SSH_FXP_WRITE => {
                let handle = read_utf8(&mut r)?;
                let offset = read_u64(&mut r)?;
                let data = read_str(&mut r)?.to_vec();
                Packet::Write { id, handle, offset, data }
            }
            SSH_FXP_LSTAT => Packet::LStat { id, path: read_utf8(&mut r)? },
            SSH_FXP_FSTAT => Packet::FStat { id, handle: read_utf8(&mut r)? },
            SSH_FXP_SETSTAT => {
                let path = read_utf8(&mut r)?;
                let attrs = FileAttributes::decode(&mut r)?;
                Packet::SetStat { id, path, attrs }
            }
            SSH_FXP_FSETSTAT => {
                let handle = read_utf8(&mut r)?;
                let attrs = FileAttributes::decode(&mut r)?;
                Packet::FSetStat { id, handle, attrs }
            }
            SSH_FXP_OPENDIR => Packet::OpenDir { id, path: read_utf8(&mut r)? },
            SSH_FXP_READDIR => Packet::ReadDir { id, handle: read_utf8(&mut r)? },
            SSH_FXP_REMOVE => Packet::Remove { id, path: read_utf8(&mut r)? },
            SSH_FXP_MKDIR => {
                let path = read_utf8(&mut r)?;
                let attrs = FileAttributes::decode(&mut r)?;
                Packet::MkDir { id, path, attrs }
            }
            SSH_FXP_RMDIR => Packet::RmDir { id, path: read_utf8(&mut r)? },
            SSH_FXP_REALPATH => Packet::RealPath { id, path: read_utf8(&mut r)? },
            SSH_FXP_STAT => Packet::Stat { id, path: read_utf8(&mut r)? },
            SSH_FXP_RENAME => {
                let old_path = read_utf8(&mut r)?;
                let new_path = read_utf8(&mut r)?;
                Packet::Rename { id, old_path, new_path }
            }
            SSH_FXP_READLINK => Packet::ReadLink { id, path: read_utf8(&mut r)? },
            SSH_FXP_SYMLINK => {
                let link_path = read_utf8(&mut r)?;
                let target_path = read_utf8(&mut r)?;
                Packet::SymLink { id, link_path, target_path }
            }
            SSH_FXP_STATUS => {
                let code = StatusCode::from_u32(read_u32(&mut r)?);
                let message = read_utf8(&mut r)?;
                Packet::Status { id, code, message }
            }
            SSH_FXP_HANDLE => Packet::Handle { id, handle: read_utf8(&mut r)? },
            SSH_FXP_DATA => Packet::Data { id, data: read_str(&mut r)?.to_vec() },
            SSH_FXP_NAME => {
                let count = read_u32(&mut r)?;
                let mut entries = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let file_name = read_utf8(&mut r)?;
                    let longname = read_utf8(&mut r)?;
                    let attrs = FileAttributes::decode(&mut r)?;
                    entries.push(DirEntry { file_name, longname, attrs });
                }
                Packet::Name { id, entries }
            }
            SSH_FXP_ATTRS => Packet::Attrs { id, attrs: FileAttributes::decode(&mut r)? },
            other => return Err(Error::UnexpectedMessage(other)),
        })
    }
}

/// Pull every complete length-prefixed frame out of `buf` (a running
/// buffer of bytes received over the channel), leaving a trailing
/// partial frame, if any, for the next call to complete. `CHANNEL_DATA`
/// makes no promise of preserving SFTP message boundaries.
pub fn split_frames(buf: &mut Vec<u8>) -> Vec<Vec<u8>> {
    let mut frames = Vec::new();
    loop {
        if buf.len() < 4 {
            break;
        }
        let len = BigEndian::read_u32(&buf[0..4]) as usize;
        if buf.len() < 4 + len {
            break;
        }
        frames.push(buf[4..4 + len].to_vec());
        buf.drain(0..4 + len);
    }
    frames
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_round_trips() {
        let encoded = Packet::Init { version: SFTP_VERSION }.encode();
        // 4-byte length prefix + 1-byte type + 4-byte version.
        assert_eq!(encoded.len(), 9);
        let decoded = Packet::decode(&encoded[4..]).unwrap();
        match decoded {
            Packet::Init { version } => assert_eq!(version, 3),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn open_round_trips_with_attrs() {
        let attrs = FileAttributes::with_permissions(0o644);
        let packet = Packet::Open { id: 7, filename: "/tmp/x".into(), pflags: OpenFlags::READ | OpenFlags::CREAT, attrs };
        let encoded = packet.encode();
        let decoded = Packet::decode(&encoded[4..]).unwrap();
        match decoded {
            Packet::Open { id, filename, pflags, attrs } => {
                assert_eq!(id, 7);
                assert_eq!(filename, "/tmp/x");
                assert!(pflags.contains(OpenFlags::READ));
                assert!(pflags.contains(OpenFlags::CREAT));
                assert_eq!(attrs.permissions, Some(0o644));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn write_preserves_a_64_bit_offset() {
        let packet = Packet::Write { id: 1, handle: "h".into(), offset: 0x1_0000_0002, data: vec![1, 2, 3] };
        let encoded = packet.encode();
        match Packet::decode(&encoded[4..]).unwrap() {
            Packet::Write { offset, data, .. } => {
                assert_eq!(offset, 0x1_0000_0002);
                assert_eq!(data, vec![1, 2, 3]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn status_carries_the_code_and_message() {
        let packet = Packet::Status { id: 3, code: StatusCode::NoSuchFile, message: "not found".into() };
        let encoded = packet.encode();
        match Packet::decode(&encoded[4..]).unwrap() {
            Packet::Status { code, message, .. } => {
                assert_eq!(code, StatusCode::NoSuchFile);
                assert_eq!(message, "not found");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn split_frames_waits_for_a_full_frame() {
        let mut buf = Packet::Handle { id: 1, handle: "h".into() }.encode();
        let half = buf.len() - 2;
        let tail = buf.split_off(half);
        assert!(split_frames(&mut buf).is_empty());
        buf.extend(tail);
        let frames = split_frames(&mut buf);
        assert_eq!(frames.len(), 1);
        assert!(buf.is_empty());
    }

    #[test]
    fn unknown_message_type_is_rejected() {
        let mut body = vec![250u8];
        push_u32(&mut body, 0);
        assert!(matches!(Packet::decode(&body), Err(Error::UnexpectedMessage(250))));
    }
}
