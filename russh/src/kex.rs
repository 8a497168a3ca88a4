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
//! Diffie-Hellman key exchange over the fixed MODP groups of RFC 4253
//! §8 (`diffie-hellman-group1-sha1`) and RFC 4419's successor, the
//! 2048-bit group of RFC 3526 §3 (`diffie-hellman-group14-*`). There is
//! no elliptic-curve key exchange here: every negotiated algorithm is
//! classical DH, differing only in modulus size and exchange-hash
//! digest.
use std::cell::RefCell;

use byteorder::{BigEndian, ByteOrder};
use num_bigint_dig::BigUint;
use rand::RngCore;
use russh_cryptovec::CryptoVec;
use russh_keys::encoding::Encoding;
use russh_keys::key::PublicKey;

use crate::cipher::{self, CipherPair};
use crate::mac;
use crate::session::Exchange;
use crate::{msg, Error};

#[derive(Debug, PartialEq, Eq, Copy, Clone, Hash)]
pub struct Name(&'static str);

impl Name {
    pub const fn new(s: &'static str) -> Self {
        Name(s)
    }
}

impl AsRef<str> for Name {
    fn as_ref(&self) -> &str {
        self.0
    }
}

pub const DH_G1_SHA1: Name = Name("diffie-hellman-group1-sha1");
pub const DH_G14_SHA1: Name = Name("diffie-hellman-group14-sha1");
pub const DH_G14_SHA256: Name = Name("diffie-hellman-group14-sha256");
pub const DH_G14_SHA512: Name = Name("diffie-hellman-group14-sha512");

#[derive(Debug, Clone, Copy)]
enum Digest {
    Sha1,
    Sha256,
    Sha512,
}

impl Digest {
    fn hash(self, data: &[u8]) -> Vec<u8> {
        match self {
            Digest::Sha1 => {
                use sha1::Digest as _;
                sha1::Sha1::digest(data).to_vec()
            }
            Digest::Sha256 => {
                use sha2::Digest as _;
                sha2::Sha256::digest(data).to_vec()
            }
            Digest::Sha512 => {
                use sha2::Digest as _;
                sha2::Sha512::digest(data).to_vec()
            }
        }
    }
}

struct Group {
    p: BigUint,
    g: BigUint,
}

// RFC 4253 §8.1 / "Oakley Group 2" (1024-bit MODP).
fn group1() -> Group {
    Group {
        p: hex_prime(
            "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E08\
             8A67CC74020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B\
             302B0A6DF25F14374FE1356D6D51C245E485B576625E7EC6F44C42E9\
             A637ED6B0BFF5CB6F406B7EDEE386BFB5A899FA5AE9F24117C4B1FE6\
             49286651ECE45B3DC2007CB8A163BF0598DA48361C55D39A69163FA8\
             FD24CF5F83655D23DCA3AD961C62F356208552BB9ED529077096966D\
             670C354E4ABC9804F1746C08CA18217C32905E462E36CE3BE39E772C\
             180E86039B2783A2EC07A28FB5C55DF06F4C52C9DE2BCBF695581718\
             3995497CEA956AE515D2261898FA051015728E5A8AACAA68FFFFFFFF\
             FFFFFFFF",
        ),
        g: BigUint::from(2u8),
    }
}

// RFC 3526 §3 / "Group 14" (2048-bit MODP).
fn group14() -> Group {
    Group {
        p: hex_prime(
            "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E08\
             8A67CC74020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B\
             302B0A6DF25F14374FE1356D6D51C245E485B576625E7EC6F44C42E9\
             A637ED6B0BFF5CB6F406B7EDEE386BFB5A899FA5AE9F24117C4B1FE6\
             49286651ECE45B3DC2007CB8A163BF0598DA48361C55D39A69163FA8\
             FD24CF5F83655D23DCA3AD961C62F356208552BB9ED529077096966D\
             670C354E4ABC9804F1746C08CA18217C32905E462E36CE3BE39E772C\
             180E86039B2783A2EC07A28FB5C55DF06F4C52C9DE2BCBF695581718\
             3995497CEA956AE515D2261898FA051015728E5A8AACAA68FFFFFFFF\
             FFFFFFFF00000000000000000001",
        ),
        g: BigUint::from(2u8),
    }
}

fn hex_prime(s: &str) -> BigUint {
    BigUint::parse_bytes(s.as_bytes(), 16).expect("hardcoded MODP prime parses")
}

fn digest_for(name: Name) -> Digest {
    match name {
        DH_G1_SHA1 | DH_G14_SHA1 => Digest::Sha1,
        DH_G14_SHA256 => Digest::Sha256,
        DH_G14_SHA512 => Digest::Sha512,
        _ => unreachable!("unregistered kex name"),
    }
}

fn group_for(name: Name) -> Group {
    if name == DH_G1_SHA1 {
        group1()
    } else {
        group14()
    }
}

thread_local! {
    static BUFFER: RefCell<CryptoVec> = RefCell::new(CryptoVec::new());
    static KEY_BUF: RefCell<CryptoVec> = RefCell::new(CryptoVec::new());
}

#[doc(hidden)]
pub struct Algorithm {
    name: Name,
    local_secret: Option<BigUint>,
    shared_secret: Option<BigUint>,
}

impl std::fmt::Debug for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Algorithm {{ name: {:?}, local_secret: [hidden], shared_secret: [hidden] }}", self.name)
    }
}

impl Algorithm {
    /// Server side of `SSH_MSG_KEXDH_INIT`: receive the client's `e`,
    /// draw our own secret, and derive the shared secret `K = e^y mod p`.
    pub fn server_dh(name: Name, exchange: &mut Exchange, payload: &[u8]) -> Result<Algorithm, Error> {
        assert_eq!(payload[0], msg::KEXDH_INIT);
        let group = group_for(name);

        let e_len = BigEndian::read_u32(&payload[1..]) as usize;
        let e = BigUint::from_bytes_be(&payload[5..5 + e_len]);
        validate_public_value(&e, &group.p)?;

        let mut y_bytes = vec![0u8; group.p.bits().div_ceil(8) as usize];
        rand::thread_rng().fill_bytes(&mut y_bytes);
        let y = BigUint::from_bytes_be(&y_bytes);
        let f = group.g.modpow(&y, &group.p);

        exchange.server_ephemeral.clear();
        exchange.server_ephemeral.extend(&f.to_bytes_be());

        let shared = e.modpow(&y, &group.p);
        validate_shared_secret(&shared)?;

        Ok(Algorithm { name, local_secret: None, shared_secret: Some(shared) })
    }

    /// Client side: draw our secret `x`, send `e = g^x mod p`.
    pub fn client_dh(name: Name, client_ephemeral: &mut CryptoVec, buf: &mut CryptoVec) -> Result<Algorithm, Error> {
        let group = group_for(name);

        let mut x_bytes = vec![0u8; group.p.bits().div_ceil(8) as usize];
        rand::thread_rng().fill_bytes(&mut x_bytes);
        let x = BigUint::from_bytes_be(&x_bytes);
        let e = group.g.modpow(&x, &group.p);

        client_ephemeral.clear();
        client_ephemeral.extend(&e.to_bytes_be());

        buf.push(msg::KEXDH_INIT);
        buf.extend_ssh_mpint(&e.to_bytes_be());

        Ok(Algorithm { name, local_secret: Some(x), shared_secret: None })
    }

    /// Client side of `SSH_MSG_KEXDH_REPLY`: given the server's `f`,
    /// finish deriving `K = f^x mod p`.
    pub fn compute_shared_secret(&mut self, remote_pubkey: &[u8]) -> Result<(), Error> {
        let group = group_for(self.name);
        let x = self.local_secret.take().ok_or(Error::KexInit)?;
        let f = BigUint::from_bytes_be(remote_pubkey);
        validate_public_value(&f, &group.p)?;
        let shared = f.modpow(&x, &group.p);
        validate_shared_secret(&shared)?;
        self.shared_secret = Some(shared);
        Ok(())
    }

    pub fn compute_exchange_hash(&self, key: &PublicKey, exchange: &Exchange, buffer: &mut CryptoVec) -> Result<Vec<u8>, Error> {
        use russh_keys::PublicKeyBase64;

        buffer.clear();
        buffer.extend_ssh_string(&exchange.client_id);
        buffer.extend_ssh_string(&exchange.server_id);
        buffer.extend_ssh_string(&exchange.client_kex_init);
        buffer.extend_ssh_string(&exchange.server_kex_init);
        buffer.extend_ssh_string(&key.public_key_bytes());
        buffer.extend_ssh_string(&exchange.client_ephemeral);
        buffer.extend_ssh_string(&exchange.server_ephemeral);

        if let Some(ref shared) = self.shared_secret {
            buffer.extend_ssh_mpint(&shared.to_bytes_be());
        }

        Ok(digest_for(self.name).hash(buffer))
    }

    /// RFC 4253 §7.2's six-letter key derivation: A/B are the initial
    /// IVs, C/D the encryption keys, E/F the integrity keys, each
    /// letter naming `HASH(K || H || letter || session_id)`, extended
    /// by repeated hashing when the cipher needs more bytes than one
    /// digest provides.
    pub fn compute_keys(
        &self,
        session_id: &[u8],
        exchange_hash: &[u8],
        cipher_name: cipher::Name,
        mac_name: &str,
        is_server: bool,
    ) -> Result<CipherPair, Error> {
        let cipher = cipher::CIPHERS.get(&cipher_name).ok_or(Error::UnknownAlgorithm)?;
        let mac_algo = mac::by_name(mac_name).ok_or(Error::UnknownAlgorithm)?;
        let digest = digest_for(self.name);

        let derive = |letter: u8, len: usize| -> Vec<u8> {
            BUFFER.with(|buffer| {
                KEY_BUF.with(|key| {
                    let mut buffer = buffer.borrow_mut();
                    let mut key = key.borrow_mut();
                    buffer.clear();
                    key.clear();

                    if let Some(ref shared) = self.shared_secret {
                        buffer.extend_ssh_mpint(&shared.to_bytes_be());
                    }
                    buffer.extend(exchange_hash);
                    buffer.push(letter);
                    buffer.extend(session_id);
                    key.extend(&digest.hash(&buffer));

                    while key.len() < len {
                        buffer.clear();
                        if let Some(ref shared) = self.shared_secret {
                            buffer.extend_ssh_mpint(&shared.to_bytes_be());
                        }
                        buffer.extend(exchange_hash);
                        buffer.extend(&key);
                        key.extend(&digest.hash(&buffer));
                    }
                    let mut out = key[..len].to_vec();
                    out.truncate(len);
                    out
                })
            })
        };

        let (iv_ltr, iv_rtl, key_ltr, key_rtl, mac_ltr, mac_rtl) = if is_server {
            (b'B', b'A', b'D', b'C', b'F', b'E')
        } else {
            (b'A', b'B', b'C', b'D', b'E', b'F')
        };

        let iv_len = cipher.key_len().max(16); // IV is one cipher block; CTR blocks are 16 bytes (AES).
        let local_iv = derive(iv_ltr, 16.min(iv_len));
        let local_key = derive(key_ltr, cipher.key_len());
        let local_mac_key = derive(mac_ltr, mac_algo.key_len());
        let local_to_remote = cipher.make_sealing_key(&local_key, &local_iv, &local_mac_key, mac_algo)?;

        let remote_iv = derive(iv_rtl, 16.min(iv_len));
        let remote_key = derive(key_rtl, cipher.key_len());
        let remote_mac_key = derive(mac_rtl, mac_algo.key_len());
        let remote_to_local = cipher.make_opening_key(&remote_key, &remote_iv, &remote_mac_key, mac_algo)?;

        Ok(CipherPair { local_to_remote, remote_to_local })
    }
}

/// RFC 4253 §8: peer's public value must lie in `[2, p-2]`; out of
/// range is as much a proof of a broken/hostile peer as a bad
/// signature would be, so it's surfaced the same way.
fn validate_public_value(value: &BigUint, p: &BigUint) -> Result<(), Error> {
    let two = BigUint::from(2u8);
    if *value < two || *value > p - &two {
        return Err(Error::InvalidSignature);
    }
    Ok(())
}

/// Reject an all-zero (or otherwise degenerate) shared secret; it would
/// indicate a small-subgroup attack or a broken peer.
fn validate_shared_secret(shared: &BigUint) -> Result<(), Error> {
    if *shared == BigUint::from(0u8) {
        return Err(Error::WeakSharedSecret);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group14_generator_is_two() {
        assert_eq!(group14().g, BigUint::from(2u8));
    }

    #[test]
    fn rejects_out_of_range_public_value() {
        let group = group14();
        assert!(validate_public_value(&BigUint::from(1u8), &group.p).is_err());
        assert!(validate_public_value(&(&group.p - 1u8), &group.p).is_err());
    }

    #[test]
    fn rejects_zero_shared_secret() {
        assert!(validate_shared_secret(&BigUint::from(0u8)).is_err());
    }

    #[test]
    fn full_dh_exchange_agrees_on_shared_secret() {
        let group = group14();
        let x = BigUint::from(123456789u64);
        let y = BigUint::from(987654321u64);
        let e = group.g.modpow(&x, &group.p);
        let f = group.g.modpow(&y, &group.p);
        let k_client = f.modpow(&x, &group.p);
        let k_server = e.modpow(&y, &group.p);
        assert_eq!(k_client, k_server);
    }
}
