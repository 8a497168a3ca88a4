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
//! MAC algorithm names and the HMAC implementations behind them. A
//! mac is computed over `seqn_be32 ‖ plaintext_packet` (RFC 4253
//! §6.4) and appended to the ciphertext as the packet's tag.
use hmac::{Hmac, Mac as HmacTrait};

use crate::cipher::Name;

/// `hmac-sha1`
pub const HMAC_SHA1: Name = Name::new("hmac-sha1");
/// `hmac-sha2-256`
pub const HMAC_SHA2_256: Name = Name::new("hmac-sha2-256");
/// `hmac-sha2-512`
pub const HMAC_SHA2_512: Name = Name::new("hmac-sha2-512");
/// `none` — only valid before the first key exchange completes.
pub const NONE: Name = Name::new("none");

/// A MAC algorithm, bound to a key, ready to tag or verify packets.
pub trait MacAlgorithm: Send + Sync {
    fn name(&self) -> Name;
    fn key_len(&self) -> usize;
    fn mac_len(&self) -> usize;
    fn make_mac(&self, key: &[u8]) -> Box<dyn Mac + Send>;
}

/// A keyed MAC instance bound to one direction of one session.
pub trait Mac {
    fn sign(&self, seqn: u32, plaintext: &[u8], tag_out: &mut [u8]);
    fn verify(&self, seqn: u32, plaintext: &[u8], tag: &[u8]) -> bool;
}

macro_rules! hmac_algorithm {
    ($algo:ident, $digest:ty, $name:expr, $mac_len:expr) => {
        pub(crate) struct $algo;

        impl MacAlgorithm for $algo {
            fn name(&self) -> Name {
                Name::new($name)
            }
            fn key_len(&self) -> usize {
                $mac_len
            }
            fn mac_len(&self) -> usize {
                $mac_len
            }
            fn make_mac(&self, key: &[u8]) -> Box<dyn Mac + Send> {
                Box::new(HmacMac(Hmac::<$digest>::new_from_slice(key).expect("hmac accepts any key length")))
            }
        }
    };
}

hmac_algorithm!(HmacSha1Algorithm, sha1::Sha1, "hmac-sha1", 20);
hmac_algorithm!(HmacSha256Algorithm, sha2::Sha256, "hmac-sha2-256", 32);
hmac_algorithm!(HmacSha512Algorithm, sha2::Sha512, "hmac-sha2-512", 64);

struct HmacMac<D: digest::Digest + digest::core_api::BlockSizeUser + Clone>(Hmac<D>);

impl<D: digest::Digest + digest::core_api::BlockSizeUser + Clone> Mac for HmacMac<D> {
    fn sign(&self, seqn: u32, plaintext: &[u8], tag_out: &mut [u8]) {
        let mut mac = self.0.clone();
        mac.update(&seqn.to_be_bytes());
        mac.update(plaintext);
        tag_out.copy_from_slice(&mac.finalize().into_bytes());
    }

    fn verify(&self, seqn: u32, plaintext: &[u8], tag: &[u8]) -> bool {
        let mut mac = self.0.clone();
        mac.update(&seqn.to_be_bytes());
        mac.update(plaintext);
        mac.verify_slice(tag).is_ok()
    }
}

/// Resolve a negotiated MAC algorithm name to its implementation.
pub(crate) fn by_name(name: &str) -> Option<&'static dyn MacAlgorithm> {
    match name {
        "hmac-sha1" => Some(&HmacSha1Algorithm),
        "hmac-sha2-256" => Some(&HmacSha256Algorithm),
        "hmac-sha2-512" => Some(&HmacSha512Algorithm),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_tag_is_verifiable() {
        let algo = HmacSha256Algorithm;
        let key = [0u8; 32];
        let mut signer = algo.make_mac(&key);
        let mut tag = vec![0u8; algo.mac_len()];
        signer.sign(7, b"hello", &mut tag);
        let mut verifier = algo.make_mac(&key);
        assert!(verifier.verify(7, b"hello", &tag));
        assert!(!verifier.verify(8, b"hello", &tag));
    }
}
