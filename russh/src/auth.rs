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
//! User authentication, RFC 4252. A client tries the methods it has
//! been configured with in a fixed order, narrowing to whatever the
//! server still accepts after each `SSH_MSG_USERAUTH_FAILURE`.
use std::sync::Arc;

use russh_cryptovec::CryptoVec;
use russh_keys::key;

bitflags::bitflags! {
    /// Set of methods, represented by bit flags, as advertised in
    /// `SSH_MSG_USERAUTH_FAILURE`'s `name-list`.
    pub struct MethodSet: u32 {
        const NONE = 1;
        const PASSWORD = 2;
        const PUBLICKEY = 4;
        const HOSTBASED = 8;
        const KEYBOARD_INTERACTIVE = 16;
    }
}

macro_rules! iter {
    ( $y:expr, $x:expr ) => {{
        if $y.contains($x) {
            $y.remove($x);
            return Some($x);
        }
    }};
}

impl Iterator for MethodSet {
    type Item = MethodSet;
    fn next(&mut self) -> Option<MethodSet> {
        iter!(self, MethodSet::PUBLICKEY);
        iter!(self, MethodSet::PASSWORD);
        iter!(self, MethodSet::HOSTBASED);
        iter!(self, MethodSet::KEYBOARD_INTERACTIVE);
        iter!(self, MethodSet::NONE);
        None
    }
}

impl russh_keys::encoding::Bytes for MethodSet {
    fn bytes(&self) -> &'static [u8] {
        match *self {
            MethodSet::NONE => b"none",
            MethodSet::PASSWORD => b"password",
            MethodSet::PUBLICKEY => b"publickey",
            MethodSet::HOSTBASED => b"hostbased",
            MethodSet::KEYBOARD_INTERACTIVE => b"keyboard-interactive",
            _ => b"",
        }
    }
}

impl MethodSet {
    pub(crate) fn from_bytes(b: &[u8]) -> Option<MethodSet> {
        match b {
            b"none" => Some(MethodSet::NONE),
            b"password" => Some(MethodSet::PASSWORD),
            b"publickey" => Some(MethodSet::PUBLICKEY),
            b"hostbased" => Some(MethodSet::HOSTBASED),
            b"keyboard-interactive" => Some(MethodSet::KEYBOARD_INTERACTIVE),
            _ => None,
        }
    }

    /// Parse a comma-separated `name-list` as found in
    /// `SSH_MSG_USERAUTH_FAILURE`.
    pub(crate) fn from_name_list(list: &[u8]) -> MethodSet {
        let mut set = MethodSet::empty();
        for name in list.split(|&b| b == b',') {
            if let Some(m) = MethodSet::from_bytes(name) {
                set.insert(m);
            }
        }
        set
    }
}

/// One credential a client offers, in the order `publickey` is tried
/// before `password` before `hostbased`.
#[derive(Debug, Clone)]
pub enum Method {
    Password { password: String },
    PublicKey { key: Arc<key::KeyPair> },
    HostBased { key: Arc<key::KeyPair>, hostname: String, local_username: String },
}

impl Method {
    pub(crate) fn method_set(&self) -> MethodSet {
        match self {
            Method::Password { .. } => MethodSet::PASSWORD,
            Method::PublicKey { .. } => MethodSet::PUBLICKEY,
            Method::HostBased { .. } => MethodSet::HOSTBASED,
        }
    }
}

/// The queue of credentials a client will try, most-preferred first.
/// `publickey` entries always sort ahead of `password`, which sorts
/// ahead of `hostbased`, regardless of insertion order.
#[derive(Debug, Clone, Default)]
pub struct MethodQueue {
    methods: Vec<Method>,
}

impl MethodQueue {
    pub fn new() -> Self {
        MethodQueue { methods: Vec::new() }
    }

    pub fn push(&mut self, method: Method) {
        self.methods.push(method);
        self.methods.sort_by_key(Method::priority);
    }

    /// The next method to offer that the server still accepts, if any.
    pub(crate) fn next_for(&self, tried: &[usize], remaining: MethodSet) -> Option<(usize, &Method)> {
        self.methods
            .iter()
            .enumerate()
            .find(|(i, m)| !tried.contains(i) && remaining.contains(m.method_set()))
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl Method {
    fn priority(&self) -> u8 {
        match self {
            Method::PublicKey { .. } => 0,
            Method::Password { .. } => 1,
            Method::HostBased { .. } => 2,
        }
    }
}

#[doc(hidden)]
#[derive(Debug)]
pub struct AuthRequest {
    pub methods: MethodSet,
    pub partial_success: bool,
    pub current: Option<CurrentRequest>,
    pub rejection_count: usize,
}

#[doc(hidden)]
#[derive(Debug)]
pub enum CurrentRequest {
    PublicKey { key: CryptoVec, algo: CryptoVec, sent_pk_ok: bool },
}

/// Build the `SSH_MSG_USERAUTH_REQUEST` payload for `method` against
/// `user`/`service_name`. For `publickey` with `with_signature = false`
/// this is the probing request of RFC 4252 §7 (`has_sig = false`); the
/// caller re-invokes with `with_signature = true` once the server
/// answers `SSH_MSG_USERAUTH_PK_OK`.
pub(crate) fn write_userauth_request(
    buf: &mut CryptoVec,
    session_id: &[u8],
    user: &str,
    service_name: &str,
    method: &Method,
    with_signature: bool,
) -> Result<(), crate::Error> {
    use russh_keys::encoding::Encoding;
    use russh_keys::PublicKeyBase64;

    buf.push(crate::msg::USERAUTH_REQUEST);
    buf.extend_ssh_string(user.as_bytes());
    buf.extend_ssh_string(service_name.as_bytes());

    match method {
        Method::Password { password } => {
            buf.extend_ssh_string(b"password");
            buf.push(0);
            buf.extend_ssh_string(password.as_bytes());
        }
        Method::PublicKey { key } => {
            buf.extend_ssh_string(b"publickey");
            buf.push(with_signature as u8);
            buf.extend_ssh_string(key.name().as_bytes());
            buf.extend_ssh_string(&key.public_key_bytes());
            if with_signature {
                let mut to_sign = CryptoVec::new();
                to_sign.extend_ssh_string(session_id);
                to_sign.extend(&buf[..]);
                key.add_self_signature(&mut to_sign)?;
                // `add_self_signature` appended the signature after the
                // signed prefix; only the trailing signature is new.
                let sig_start = session_id.len() + 4 + buf.len();
                buf.extend(&to_sign[sig_start..]);
            }
        }
        Method::HostBased { key, hostname, local_username } => {
            buf.extend_ssh_string(b"hostbased");
            buf.extend_ssh_string(key.name().as_bytes());
            buf.extend_ssh_string(&key.public_key_bytes());
            buf.extend_ssh_string(hostname.as_bytes());
            buf.extend_ssh_string(local_username.as_bytes());
            let mut to_sign = CryptoVec::new();
            to_sign.extend_ssh_string(session_id);
            to_sign.extend(&buf[..]);
            key.add_self_signature(&mut to_sign)?;
            let sig_start = session_id.len() + 4 + buf.len();
            buf.extend(&to_sign[sig_start..]);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_set_iterates_publickey_first() {
        let set = MethodSet::PASSWORD | MethodSet::PUBLICKEY | MethodSet::HOSTBASED;
        let order: Vec<_> = set.into_iter().collect();
        assert_eq!(order, vec![MethodSet::PUBLICKEY, MethodSet::PASSWORD, MethodSet::HOSTBASED]);
    }

    #[test]
    fn method_set_from_name_list_parses_comma_separated() {
        let set = MethodSet::from_name_list(b"publickey,password");
        assert!(set.contains(MethodSet::PUBLICKEY));
        assert!(set.contains(MethodSet::PASSWORD));
        assert!(!set.contains(MethodSet::HOSTBASED));
    }

    #[test]
    fn method_queue_orders_publickey_before_password() {
        let mut q = MethodQueue::new();
        q.push(Method::Password { password: "hunter2".into() });
        q.push(Method::PublicKey { key: Arc::new(key::KeyPair::generate_ed25519()) });
        let first = q.next_for(&[], MethodSet::all()).unwrap();
        assert_eq!(first.0, 0);
        assert!(matches!(first.1, Method::PublicKey { .. }));
    }

    #[test]
    fn method_queue_skips_methods_server_rejected() {
        let mut q = MethodQueue::new();
        q.push(Method::PublicKey { key: Arc::new(key::KeyPair::generate_ed25519()) });
        q.push(Method::Password { password: "hunter2".into() });
        let remaining = MethodSet::PASSWORD;
        let next = q.next_for(&[0], remaining).unwrap();
        assert_eq!(next.0, 1);
        assert!(matches!(next.1, Method::Password { .. }));
    }

    #[test]
    fn write_userauth_request_password_matches_rfc4252() {
        let mut buf = CryptoVec::new();
        let method = Method::Password { password: "hunter2".into() };
        write_userauth_request(&mut buf, b"session-id", "alice", "ssh-connection", &method, false).unwrap();
        assert_eq!(buf[0], crate::msg::USERAUTH_REQUEST);
    }
}
