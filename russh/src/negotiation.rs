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
//! Algorithm negotiation per RFC 4253 §7.1: parse a peer's `KEXINIT`,
//! intersect it against our own preference lists, and pick the
//! asymmetric winner (client's first match wins on ties).
use std::str::from_utf8;

use log::debug;
use rand::RngCore;
use russh_cryptovec::CryptoVec;
use russh_keys::encoding::{Encoding, Reader};

use crate::{cipher, kex, msg, Error};

#[derive(Debug)]
pub struct Names {
    pub kex: kex::Name,
    pub key: &'static str,
    pub cipher: cipher::Name,
    pub mac: &'static str,
    pub ignore_guessed: bool,
}

/// Lists of preferred algorithms, offered in `KEXINIT` in order of
/// preference.
#[derive(Debug, Clone)]
pub struct Preferred {
    pub kex: &'static [kex::Name],
    pub key: &'static [&'static str],
    pub cipher: &'static [cipher::Name],
    pub mac: &'static [&'static str],
}

impl Preferred {
    pub const DEFAULT: Preferred = Preferred {
        kex: &[kex::DH_G14_SHA256, kex::DH_G14_SHA512, kex::DH_G14_SHA1, kex::DH_G1_SHA1],
        key: &[
            "ssh-ed25519",
            "rsa-sha2-512",
            "rsa-sha2-256",
            "ssh-rsa",
            "ecdsa-sha2-nistp256",
            "ecdsa-sha2-nistp384",
            "ecdsa-sha2-nistp521",
        ],
        cipher: &[cipher::AES_256_CTR, cipher::AES_128_CTR],
        mac: &["hmac-sha2-512", "hmac-sha2-256", "hmac-sha1"],
    };
}

impl Default for Preferred {
    fn default() -> Preferred {
        Preferred::DEFAULT
    }
}

/// Named algorithms.
pub trait Named {
    fn name(&self) -> &'static str;
}

impl Named for russh_keys::key::PublicKey {
    fn name(&self) -> &'static str {
        russh_keys::key::PublicKey::name(self)
    }
}

impl Named for russh_keys::key::KeyPair {
    fn name(&self) -> &'static str {
        russh_keys::key::KeyPair::name(self)
    }
}

pub trait Select {
    fn select<S: AsRef<str> + Copy>(a: &[S], b: &[u8]) -> Option<(bool, S)>;

    fn read_kex(buffer: &[u8], pref: &Preferred) -> Result<Names, Error> {
        // KEXINIT: msg-type(1) + cookie(16) precede the first name-list.
        let mut r = buffer.reader(17);
        let kex_string = r.read_string()?;
        let (kex_both_first, kex_algorithm) = Self::select(pref.kex, kex_string).ok_or_else(|| {
            debug!("no common kex algorithm: peer offered {:?}", from_utf8(kex_string));
            Error::NoCommonKexAlgo
        })?;

        let key_string = r.read_string()?;
        let (key_both_first, key_algorithm) = Self::select(pref.key, key_string).ok_or_else(|| {
            debug!("no common host key algorithm: peer offered {:?}", from_utf8(key_string));
            Error::NoCommonKeyAlgo
        })?;

        let cipher_string = r.read_string()?;
        let (_, cipher) = Self::select(pref.cipher, cipher_string).ok_or(Error::NoCommonCipher)?;
        r.read_string()?; // cipher server-to-client; we require symmetric choices.

        let mac_string = r.read_string()?;
        let (_, mac) = Self::select(pref.mac, mac_string).ok_or(Error::NoCommonMac)?;
        r.read_string()?; // mac server-to-client.

        r.read_string()?; // compression client-to-server (always "none").
        r.read_string()?; // compression server-to-client.
        r.read_string()?; // languages client-to-server.
        r.read_string()?; // languages server-to-client.

        let follows = r.read_byte()? != 0;
        Ok(Names {
            kex: kex_algorithm,
            key: key_algorithm,
            cipher,
            mac,
            // Ignore the peer's guessed next packet unless both sides'
            // first preference matched.
            ignore_guessed: follows && !(kex_both_first && key_both_first),
        })
    }
}

pub struct Server;
pub struct Client;

impl Select for Server {
    fn select<S: AsRef<str> + Copy>(server_list: &[S], client_list: &[u8]) -> Option<(bool, S)> {
        let mut both_first_choice = true;
        for c in client_list.split(|&x| x == b',') {
            for &s in server_list {
                if c == s.as_ref().as_bytes() {
                    return Some((both_first_choice, s));
                }
                both_first_choice = false;
            }
        }
        None
    }
}

impl Select for Client {
    fn select<S: AsRef<str> + Copy>(client_list: &[S], server_list: &[u8]) -> Option<(bool, S)> {
        let mut both_first_choice = true;
        for &c in client_list {
            for s in server_list.split(|&x| x == b',') {
                if s == c.as_ref().as_bytes() {
                    return Some((both_first_choice, c));
                }
                both_first_choice = false;
            }
        }
        None
    }
}

/// Serialise `SSH_MSG_KEXINIT` for our own preference lists.
pub fn write_kex(prefs: &Preferred, buf: &mut CryptoVec) {
    buf.push(msg::KEXINIT);

    let mut cookie = [0; 16];
    rand::thread_rng().fill_bytes(&mut cookie);
    buf.extend(&cookie);

    buf.extend_list(prefs.kex.iter());
    buf.extend_list(prefs.key.iter());
    buf.extend_list(prefs.cipher.iter()); // client to server
    buf.extend_list(prefs.cipher.iter()); // server to client
    buf.extend_list(prefs.mac.iter()); // client to server
    buf.extend_list(prefs.mac.iter()); // server to client
    buf.extend_list(["none"].iter()); // compression client to server
    buf.extend_list(["none"].iter()); // compression server to client
    buf.write_empty_list(); // languages client to server
    buf.write_empty_list(); // languages server to client

    buf.push(0); // doesn't follow
    buf.extend(&[0, 0, 0, 0]); // reserved
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_preference_wins_on_overlap() {
        let server_offer: &[&str] = &["b", "a"];
        let client_pref: &[&str] = &["a", "b"];
        let joined = server_offer.join(",");
        let (both_first, picked) = Client::select(client_pref, joined.as_bytes()).unwrap();
        assert_eq!(picked, "a");
        assert!(!both_first);
    }

    #[test]
    fn kexinit_roundtrips_through_read_kex() {
        let mut buf = CryptoVec::new();
        write_kex(&Preferred::DEFAULT, &mut buf);
        let names = Server::read_kex(&buf, &Preferred::DEFAULT).unwrap();
        assert_eq!(names.key, "ssh-ed25519");
    }
}
