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
//! A thin wrapper that reads the initial `SSH-2.0-...` identification
//! line (RFC 4253 §4.2) out of a stream before handing the same stream
//! back for normal packet I/O.
use std::pin::Pin;
use std::task::{Context, Poll};

use russh_cryptovec::CryptoVec;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};

use crate::Error;

struct ReadSshIdBuffer {
    buf: CryptoVec,
    total: usize,
    bytes_read: usize,
    sshid_len: usize,
}

impl ReadSshIdBuffer {
    fn new() -> Self {
        let mut buf = CryptoVec::new();
        buf.resize(256);
        ReadSshIdBuffer { buf, sshid_len: 0, bytes_read: 0, total: 0 }
    }
}

/// `R`, plus a small buffer used only to read the identification line;
/// after that line is consumed, reads pass straight through to `r`.
pub(crate) struct SshRead<R> {
    id: Option<ReadSshIdBuffer>,
    r: R,
}

impl<R: AsyncRead + AsyncWrite> SshRead<R> {
    pub(crate) fn split(self) -> (SshRead<tokio::io::ReadHalf<R>>, tokio::io::WriteHalf<R>) {
        let (r, w) = tokio::io::split(self.r);
        (SshRead { id: self.id, r }, w)
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for SshRead<R> {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context, buf: &mut ReadBuf) -> Poll<std::io::Result<()>> {
        if let Some(mut id) = self.id.take() {
            if id.total > id.bytes_read {
                let total = id.total.min(id.bytes_read + buf.remaining());
                buf.put_slice(&id.buf[id.bytes_read..total]);
                id.bytes_read += total - id.bytes_read;
                self.id = Some(id);
                return Poll::Ready(Ok(()));
            }
        }
        AsyncRead::poll_read(Pin::new(&mut self.get_mut().r), cx, buf)
    }
}

impl<R: AsyncWrite + Unpin> AsyncWrite for SshRead<R> {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        AsyncWrite::poll_write(Pin::new(&mut self.r), cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context) -> Poll<std::io::Result<()>> {
        AsyncWrite::poll_flush(Pin::new(&mut self.r), cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context) -> Poll<std::io::Result<()>> {
        AsyncWrite::poll_shutdown(Pin::new(&mut self.r), cx)
    }
}

impl<R: AsyncRead + Unpin> SshRead<R> {
    pub(crate) fn new(r: R) -> Self {
        SshRead { id: Some(ReadSshIdBuffer::new()), r }
    }

    /// Read lines until one starts with `SSH-2.0-`, per RFC 4253 §4.2's
    /// allowance for a server banner of discardable lines beforehand.
    pub(crate) async fn read_ssh_id(&mut self) -> Result<&[u8], Error> {
        let ssh_id = self.id.as_mut().expect("read_ssh_id called twice");
        loop {
            let mut i = 0;
            let n = AsyncReadExt::read(&mut self.r, &mut ssh_id.buf[ssh_id.total..]).await?;
            ssh_id.total += n;
            if n == 0 {
                return Err(Error::Disconnected);
            }
            while i + 1 < ssh_id.total {
                if ssh_id.buf[i] == b'\r' && ssh_id.buf[i + 1] == b'\n' {
                    ssh_id.bytes_read = i + 2;
                    break;
                } else if ssh_id.buf[i + 1] == b'\n' {
                    // OpenSSH occasionally omits the \r; tolerate it.
                    ssh_id.bytes_read = i + 2;
                    i += 1;
                    break;
                }
                i += 1;
            }

            if ssh_id.bytes_read > 0 {
                if i >= 8 && &ssh_id.buf[0..8] == b"SSH-2.0-" {
                    ssh_id.sshid_len = i;
                    return Ok(&ssh_id.buf[..ssh_id.sshid_len]);
                }
                ssh_id.total = 0;
                ssh_id.bytes_read = 0;
            }
        }
    }
}
