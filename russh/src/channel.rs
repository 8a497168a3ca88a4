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
//! The connection-layer channel multiplexer (RFC 4254). Each channel
//! has one [`OpenChannel`] bookkeeping record owned by the session task,
//! and one user-facing [`Channel`] handle through which a caller sends
//! requests and receives [`ChannelMsg`]s.
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};

use russh_cryptovec::CryptoVec;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;

use crate::{ChannelId, ChannelOpenFailure, Error, Sig};

/// Per-channel bookkeeping owned by the session task (RFC 4254 §5).
#[derive(Debug)]
pub(crate) struct OpenChannel {
    pub recipient_channel: u32,
    pub sender_channel: ChannelId,
    pub recipient_window_size: u32,
    pub sender_window_size: u32,
    pub recipient_maximum_packet_size: u32,
    pub sender_maximum_packet_size: u32,
    pub confirmed: bool,
    pub wants_reply: VecDeque<oneshot::Sender<bool>>,
    pub pending_data: VecDeque<(CryptoVec, Option<u32>, usize)>,
    pub to_handle: Option<UnboundedSender<ChannelMsg>>,
}

impl OpenChannel {
    pub fn new(id: ChannelId, window_size: u32, maxpacket: u32) -> Self {
        OpenChannel {
            recipient_channel: 0,
            sender_channel: id,
            sender_window_size: window_size,
            recipient_window_size: 0,
            sender_maximum_packet_size: maxpacket,
            recipient_maximum_packet_size: 0,
            confirmed: false,
            wants_reply: VecDeque::new(),
            pending_data: VecDeque::new(),
            to_handle: None,
        }
    }

    /// Push as much of `buf0[from..]` as fits in the peer's window into
    /// `write`, splitting on `recipient_maximum_packet_size`; returns
    /// how much of the buffer was consumed.
    pub(crate) fn data_noqueue(write: &mut CryptoVec, channel: &mut OpenChannel, buf0: &[u8], ext: Option<u32>, from: usize) -> usize {
        let available = buf0.len().saturating_sub(from);
        let window = channel.recipient_window_size as usize;
        let mut buf = &buf0[from..from + available.min(window)];
        let buf_len = buf.len();

        while !buf.is_empty() {
            let off = buf.len().min(channel.recipient_maximum_packet_size as usize);
            crate::push_packet!(write, {
                if let Some(ext) = ext {
                    write.push(crate::msg::CHANNEL_EXTENDED_DATA);
                    write.push_u32_be(channel.recipient_channel);
                    write.push_u32_be(ext);
                } else {
                    write.push(crate::msg::CHANNEL_DATA);
                    write.push_u32_be(channel.recipient_channel);
                }
                write.extend_ssh_string(&buf[..off]);
            });
            channel.recipient_window_size -= off as u32;
            buf = &buf[off..];
        }
        buf_len
    }
}

/// Marker distinguishing the handles returned on the client side
/// (`Channel<client::Msg>`) from the server side (`Channel<server::Msg>`);
/// there is currently no behavioral difference, only provenance.
pub struct Msg;

/// Messages delivered to a channel handle from the session task.
#[derive(Debug)]
pub enum ChannelMsg {
    Data { data: CryptoVec },
    ExtendedData { data: CryptoVec, ext: u32 },
    Eof,
    Close,
    OpenFailure(ChannelOpenFailure),
    XonXoff { client_can_do: bool },
    ExitStatus { exit_status: u32 },
    ExitSignal { signal_name: Sig, core_dumped: bool, error_message: String, lang_tag: String },
    WindowAdjusted { new_size: u32 },
    Success,
    Failure,
}

/// A handle to one open (or opening) channel. Dropping it sends
/// `channel-close` if the channel was still open.
pub struct Channel<K> {
    id: ChannelId,
    to_session: UnboundedSender<SessionCommand>,
    from_session: UnboundedReceiver<ChannelMsg>,
    _marker: PhantomData<K>,
}

/// Commands a channel handle sends to the owning session task.
pub(crate) enum SessionCommand {
    Data { id: ChannelId, data: CryptoVec },
    ExtendedData { id: ChannelId, ext: u32, data: CryptoVec },
    Eof { id: ChannelId },
    Close { id: ChannelId },
    Request { id: ChannelId, request: Vec<u8>, want_reply: bool, reply: Option<oneshot::Sender<bool>> },
}

pub(crate) fn pair<K>(id: ChannelId) -> (UnboundedSender<SessionCommand>, Channel<K>, UnboundedReceiver<SessionCommand>, UnboundedSender<ChannelMsg>) {
    let (to_session, from_handle) = unbounded_channel();
    let (to_handle, from_session) = unbounded_channel();
    let handle = Channel { id, to_session: to_session.clone(), from_session, _marker: PhantomData };
    (to_session, handle, from_handle, to_handle)
}

impl<K> Channel<K> {
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Wait for the next message on this channel; `None` once the
    /// channel has been fully closed and the session task dropped its end.
    pub async fn wait(&mut self) -> Option<ChannelMsg> {
        self.from_session.recv().await
    }

    pub async fn data(&mut self, data: &[u8]) -> Result<(), Error> {
        self.to_session
            .send(SessionCommand::Data { id: self.id, data: CryptoVec::from(data) })
            .map_err(|_| Error::ChannelFailure)
    }

    pub async fn extended_data(&mut self, ext: u32, data: &[u8]) -> Result<(), Error> {
        self.to_session
            .send(SessionCommand::ExtendedData { id: self.id, ext, data: CryptoVec::from(data) })
            .map_err(|_| Error::ChannelFailure)
    }

    pub async fn eof(&mut self) -> Result<(), Error> {
        self.to_session.send(SessionCommand::Eof { id: self.id }).map_err(|_| Error::ChannelFailure)
    }

    pub async fn close(&mut self) -> Result<(), Error> {
        self.to_session.send(SessionCommand::Close { id: self.id }).map_err(|_| Error::ChannelFailure)
    }

    /// Send a `channel-request`; if `want_reply`, await the matching
    /// `channel-success`/`channel-failure` (RFC 4254 §4).
    pub async fn send_request(&mut self, request: &[u8], want_reply: bool) -> Result<Option<bool>, Error> {
        if want_reply {
            let (tx, rx) = oneshot::channel();
            self.to_session
                .send(SessionCommand::Request { id: self.id, request: request.to_vec(), want_reply, reply: Some(tx) })
                .map_err(|_| Error::ChannelFailure)?;
            Ok(Some(rx.await.map_err(|_| Error::ChannelFailure)?))
        } else {
            self.to_session
                .send(SessionCommand::Request { id: self.id, request: request.to_vec(), want_reply, reply: None })
                .map_err(|_| Error::ChannelFailure)?;
            Ok(None)
        }
    }

    pub async fn exec(&mut self, want_reply: bool, command: &str) -> Result<(), Error> {
        let mut buf = CryptoVec::new();
        use russh_keys::encoding::Encoding;
        buf.extend_ssh_string(b"exec");
        buf.push(want_reply as u8);
        buf.extend_ssh_string(command.as_bytes());
        self.send_request(&buf, want_reply).await?;
        Ok(())
    }

    pub async fn request_subsystem(&mut self, want_reply: bool, name: &str) -> Result<Option<bool>, Error> {
        let mut buf = CryptoVec::new();
        use russh_keys::encoding::Encoding;
        buf.extend_ssh_string(b"subsystem");
        buf.push(want_reply as u8);
        buf.extend_ssh_string(name.as_bytes());
        self.send_request(&buf, want_reply).await
    }

    pub async fn request_shell(&mut self, want_reply: bool) -> Result<(), Error> {
        let mut buf = CryptoVec::new();
        use russh_keys::encoding::Encoding;
        buf.extend_ssh_string(b"shell");
        buf.push(want_reply as u8);
        self.send_request(&buf, want_reply).await?;
        Ok(())
    }

    pub async fn set_env(&mut self, want_reply: bool, name: &str, value: &str) -> Result<(), Error> {
        let mut buf = CryptoVec::new();
        use russh_keys::encoding::Encoding;
        buf.extend_ssh_string(b"env");
        buf.push(want_reply as u8);
        buf.extend_ssh_string(name.as_bytes());
        buf.extend_ssh_string(value.as_bytes());
        self.send_request(&buf, want_reply).await?;
        Ok(())
    }

    pub async fn signal(&mut self, sig: Sig) -> Result<(), Error> {
        let mut buf = CryptoVec::new();
        use russh_keys::encoding::Encoding;
        buf.extend_ssh_string(b"signal");
        buf.push(0);
        buf.extend_ssh_string(sig.name().as_bytes());
        self.send_request(&buf, false).await?;
        Ok(())
    }

    fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<Option<ChannelMsg>> {
        self.from_session.poll_recv(cx)
    }

    fn send_data_sync(&mut self, data: &[u8]) -> Result<(), Error> {
        self.to_session
            .send(SessionCommand::Data { id: self.id, data: CryptoVec::from(data) })
            .map_err(|_| Error::ChannelFailure)
    }

    /// View this channel as a plain duplex byte stream, discarding
    /// channel-specific framing (extended data is folded into the same
    /// stream as ordinary data). Used to hand a `direct-tcpip` channel to
    /// another connector as its transport, for jump-host chaining.
    pub fn into_stream(self) -> ChannelStream<K> {
        ChannelStream { channel: self, read_buf: CryptoVec::new(), read_pos: 0, eof: false }
    }
}

/// An open channel adapted to [`tokio::io::AsyncRead`] / [`tokio::io::AsyncWrite`].
pub struct ChannelStream<K> {
    channel: Channel<K>,
    read_buf: CryptoVec,
    read_pos: usize,
    eof: bool,
}

impl<K> AsyncRead for ChannelStream<K> {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        loop {
            if this.read_pos < this.read_buf.len() {
                let n = buf.remaining().min(this.read_buf.len() - this.read_pos);
                buf.put_slice(&this.read_buf[this.read_pos..this.read_pos + n]);
                this.read_pos += n;
                return Poll::Ready(Ok(()));
            }
            if this.eof {
                return Poll::Ready(Ok(()));
            }
            this.read_buf.clear();
            this.read_pos = 0;
            match this.channel.poll_recv(cx) {
                Poll::Ready(Some(ChannelMsg::Data { data })) | Poll::Ready(Some(ChannelMsg::ExtendedData { data, .. })) => {
                    this.read_buf = data;
                }
                Poll::Ready(Some(ChannelMsg::Eof)) | Poll::Ready(Some(ChannelMsg::Close)) | Poll::Ready(None) => {
                    this.eof = true;
                    return Poll::Ready(Ok(()));
                }
                Poll::Ready(Some(_)) => continue,
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl<K> AsyncWrite for ChannelStream<K> {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        let this = self.get_mut();
        match this.channel.send_data_sync(buf) {
            Ok(()) => Poll::Ready(Ok(buf.len())),
            Err(_) => Poll::Ready(Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "channel closed"))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        let _ = this.channel.to_session.send(SessionCommand::Eof { id: this.channel.id });
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_channel_starts_unconfirmed_with_empty_queues() {
        let c = OpenChannel::new(ChannelId(1), 1 << 20, 32768);
        assert!(!c.confirmed);
        assert!(c.pending_data.is_empty());
        assert_eq!(c.sender_window_size, 1 << 20);
    }

    #[test]
    fn data_noqueue_splits_on_max_packet_size() {
        let mut write = CryptoVec::new();
        let mut c = OpenChannel::new(ChannelId(1), 10, 4);
        c.recipient_channel = 7;
        c.recipient_window_size = 10;
        c.recipient_maximum_packet_size = 4;
        let sent = OpenChannel::data_noqueue(&mut write, &mut c, b"hello!", None, 0);
        assert_eq!(sent, 6);
        assert_eq!(c.recipient_window_size, 4);
    }

    #[test]
    fn data_noqueue_truncates_to_window() {
        let mut write = CryptoVec::new();
        let mut c = OpenChannel::new(ChannelId(1), 3, 100);
        c.recipient_channel = 1;
        c.recipient_window_size = 3;
        c.recipient_maximum_packet_size = 100;
        let sent = OpenChannel::data_noqueue(&mut write, &mut c, b"hello!", None, 0);
        assert_eq!(sent, 3);
        assert_eq!(c.recipient_window_size, 0);
    }
}
