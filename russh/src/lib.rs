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
//! Client and server SSH transport, key exchange, and connection-layer
//! multiplexer, built on tokio.
//!
//! # Design principles
//!
//! Key exchange is classical Diffie-Hellman over the fixed MODP groups
//! of RFC 4253 §8, not an elliptic-curve scheme: this crate targets
//! interoperability with implementations that only speak
//! `diffie-hellman-group1-sha1`/`group14-*`. Confidentiality and
//! integrity are likewise kept separate, as RFC 4253 specifies: AES-CTR
//! for the former, an independently-negotiated HMAC for the latter.
//! There is deliberately no AEAD cipher and no compression.
//!
//! # Internal details of the event loop
//!
//! Reads and writes are buffered because encryption works on whole
//! packets, not byte streams: a `Handler` implementation fills buffers
//! in response to incoming packets, and the event loop flushes them to
//! the socket once there is nothing left to read.
#[macro_use]
extern crate log;

pub use russh_cryptovec::CryptoVec;

pub(crate) mod cipher;
pub(crate) mod kex;
pub(crate) mod mac;
pub(crate) mod msg;
pub(crate) mod negotiation;
pub(crate) mod ssh_read;
pub(crate) mod sshbuffer;

pub use negotiation::{Named, Preferred};

pub mod auth;
pub(crate) mod session;

pub mod channel;
pub use channel::{Channel, ChannelMsg, ChannelStream};

/// Client side of this library.
pub mod client;
/// Server side of this library.
pub mod server;

/// Top-level connection façade and reconnect policy.
pub mod connection;

macro_rules! push_packet {
    ( $buffer:expr, $x:expr ) => {{
        use byteorder::{BigEndian, ByteOrder};
        let i0 = $buffer.len();
        $buffer.extend(b"\0\0\0\0");
        let x = $x;
        let i1 = $buffer.len();
        use std::ops::DerefMut;
        let buf = $buffer.deref_mut();
        BigEndian::write_u32(&mut buf[i0..], (i1 - i0 - 4) as u32);
        x
    }};
}
pub(crate) use push_packet;

/// Anything that can go wrong in the transport, key exchange,
/// authentication, or channel layers. See RFC 4251-4254 for the wire
/// conditions each variant corresponds to.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // Packet framing and crypto.
    #[error("Invalid key size")]
    InvalidKeySize,
    #[error("Invalid MAC")]
    InvalidMac,
    #[error("Invalid encrypted packet length")]
    InvalidEncryptedPacketLength,
    #[error("Invalid decrypted plaintext length")]
    InvalidDecryptedPlaintextLength,
    #[error("Insufficient padding")]
    InsufficientPadding,
    #[error("Excess padding")]
    ExcessPadding,

    // Kex and authentication.
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Cryptographic error")]
    CryptographicError,
    #[error("Signing error")]
    SigningError,
    #[error("Weak (zero) shared secret")]
    WeakSharedSecret,
    #[error("Unknown negotiated algorithm")]
    UnknownAlgorithm,
    #[error("No common key exchange algorithm")]
    NoCommonKexAlgo,
    #[error("No common host key algorithm")]
    NoCommonKeyAlgo,
    #[error("No common cipher")]
    NoCommonCipher,
    #[error("No common MAC algorithm")]
    NoCommonMac,
    #[error("Key exchange init failed")]
    KexInit,
    #[error("Key exchange failed")]
    Kex,
    #[error("Unknown server key")]
    UnknownKey,
    #[error("Wrong server signature")]
    WrongServerSig,

    // Channel layer.
    #[error("Channel creation failed")]
    ChannelCreationFailed,
    #[error("Channel creation timed out")]
    ChannelCreationTimeout,
    #[error("Channel rejected: {reason:?} {description}")]
    ChannelRejected { reason: ChannelOpenFailure, description: String },
    #[error("Channel operation failed")]
    ChannelFailure,
    #[error("Channel not open")]
    WrongChannel,
    #[error("Command output too large")]
    CommandOutputTooLarge,

    // Authentication.
    #[error("Not authorized")]
    Unauthorized,
    #[error("All configured authentication methods failed")]
    AllAuthenticationOptionsFailed,
    #[error("Server does not support password authentication")]
    UnsupportedPasswordAuthentication,
    #[error("Server does not support public key authentication")]
    UnsupportedPublicKeyAuthentication,
    #[error("Server does not support hostbased authentication")]
    UnsupportedHostBasedAuthentication,
    #[error("Not yet authenticated")]
    NotAuthenticated,
    #[error("No authentication method")]
    NoAuthMethod,

    // General protocol / connection.
    #[error("Invalid SSH version string")]
    Version,
    #[error("Inconsistent state of the protocol")]
    Inconsistent,
    #[error("Index out of bounds")]
    IndexOutOfBounds,
    #[error("Disconnected")]
    Disconnected,
    #[error("Connection closed by the remote side")]
    ConnectionClosed,
    #[error("Connection closed by the remote side (HUP)")]
    HUP,
    #[error("Connection timeout")]
    ConnectionTimeout,
    #[error("Protocol error")]
    ProtocolError,

    #[error(transparent)]
    Keys(#[from] russh_keys::Error),
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error(transparent)]
    Utf8(#[from] std::str::Utf8Error),
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
    #[error(transparent)]
    Elapsed(#[from] tokio::time::error::Elapsed),
}

/// The number of bytes read/written, and the time elapsed, before a
/// key re-exchange is requested (RFC 4253 §9's recommended limits).
#[derive(Debug, Clone)]
pub struct Limits {
    pub rekey_write_limit: usize,
    pub rekey_read_limit: usize,
    pub rekey_time_limit: std::time::Duration,
}

impl Limits {
    pub fn new(write_limit: usize, read_limit: usize, time_limit: std::time::Duration) -> Limits {
        assert!(write_limit <= 1 << 30 && read_limit <= 1 << 30);
        Limits { rekey_write_limit: write_limit, rekey_read_limit: read_limit, rekey_time_limit: time_limit }
    }
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            rekey_write_limit: 1 << 30, // 1 GiB
            rekey_read_limit: 1 << 30,
            rekey_time_limit: std::time::Duration::from_secs(3600),
        }
    }
}

/// A reason for disconnection, sent in `SSH_MSG_DISCONNECT` (RFC 4253 §11.1).
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy)]
pub enum Disconnect {
    HostNotAllowedToConnect = 1,
    ProtocolError = 2,
    KeyExchangeFailed = 3,
    #[doc(hidden)]
    Reserved = 4,
    MACError = 5,
    CompressionError = 6,
    ServiceNotAvailable = 7,
    ProtocolVersionNotSupported = 8,
    HostKeyNotVerifiable = 9,
    ConnectionLost = 10,
    ByApplication = 11,
    TooManyConnections = 12,
    AuthCancelledByUser = 13,
    NoMoreAuthMethodsAvailable = 14,
    IllegalUserName = 15,
}

/// The type of signal that can be delivered to a remote process (RFC
/// 4254 §6.10).
#[allow(missing_docs)]
#[derive(Debug, Clone)]
pub enum Sig {
    ABRT,
    ALRM,
    FPE,
    HUP,
    ILL,
    INT,
    KILL,
    PIPE,
    QUIT,
    SEGV,
    TERM,
    USR1,
    USR2,
    Custom(String),
}

impl Sig {
    pub fn name(&self) -> &str {
        match *self {
            Sig::ABRT => "ABRT",
            Sig::ALRM => "ALRM",
            Sig::FPE => "FPE",
            Sig::HUP => "HUP",
            Sig::ILL => "ILL",
            Sig::INT => "INT",
            Sig::KILL => "KILL",
            Sig::PIPE => "PIPE",
            Sig::QUIT => "QUIT",
            Sig::SEGV => "SEGV",
            Sig::TERM => "TERM",
            Sig::USR1 => "USR1",
            Sig::USR2 => "USR2",
            Sig::Custom(ref c) => c,
        }
    }

    pub fn from_name(name: &[u8]) -> Result<Sig, Error> {
        match name {
            b"ABRT" => Ok(Sig::ABRT),
            b"ALRM" => Ok(Sig::ALRM),
            b"FPE" => Ok(Sig::FPE),
            b"HUP" => Ok(Sig::HUP),
            b"ILL" => Ok(Sig::ILL),
            b"INT" => Ok(Sig::INT),
            b"KILL" => Ok(Sig::KILL),
            b"PIPE" => Ok(Sig::PIPE),
            b"QUIT" => Ok(Sig::QUIT),
            b"SEGV" => Ok(Sig::SEGV),
            b"TERM" => Ok(Sig::TERM),
            b"USR1" => Ok(Sig::USR1),
            b"USR2" => Ok(Sig::USR2),
            x => Ok(Sig::Custom(std::str::from_utf8(x)?.to_string())),
        }
    }
}

/// Reason a `channel-open` was refused (RFC 4254 §5.1).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum ChannelOpenFailure {
    AdministrativelyProhibited = 1,
    ConnectFailed = 2,
    UnknownChannelType = 3,
    ResourceShortage = 4,
}

impl ChannelOpenFailure {
    pub fn from_u32(x: u32) -> Option<ChannelOpenFailure> {
        match x {
            1 => Some(ChannelOpenFailure::AdministrativelyProhibited),
            2 => Some(ChannelOpenFailure::ConnectFailed),
            3 => Some(ChannelOpenFailure::UnknownChannelType),
            4 => Some(ChannelOpenFailure::ResourceShortage),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// The identifier of a channel, unique among the open channels of one side.
pub struct ChannelId(pub(crate) u32);

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
