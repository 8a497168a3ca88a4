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
use crate::encoding::{Encoding, Reader};
use crate::key::SignatureHash;
use crate::Error;
use russh_cryptovec::CryptoVec;

/// A detached signature, self-describing its algorithm.
#[derive(Clone)]
pub enum Signature {
    Ed25519([u8; 64]),
    RSA { hash: SignatureHash, bytes: Vec<u8> },
    EC { curve: &'static str, r: Vec<u8>, s: Vec<u8> },
}

impl Signature {
    fn algo_name(&self) -> &'static str {
        match self {
            Signature::Ed25519(_) => "ssh-ed25519",
            Signature::RSA { hash, .. } => hash.name().0,
            Signature::EC { curve, .. } => match *curve {
                "nistp256" => "ecdsa-sha2-nistp256",
                "nistp384" => "ecdsa-sha2-nistp384",
                _ => "ecdsa-sha2-nistp521",
            },
        }
    }

    /// The raw, algorithm-specific signature bytes, as they appear inside
    /// the `string(algo) ++ string(sig)` wire blob.
    fn blob_bytes(&self) -> Vec<u8> {
        match self {
            Signature::Ed25519(bytes) => bytes.to_vec(),
            Signature::RSA { bytes, .. } => bytes.clone(),
            Signature::EC { r, s, .. } => {
                let mut v = Vec::new();
                v.extend_ssh_mpint(r);
                v.extend_ssh_mpint(s);
                v
            }
        }
    }

    /// Append `string(algo) ++ string(sig)` to a growable SSH buffer.
    pub fn encode_into(&self, buffer: &mut CryptoVec) {
        buffer.extend_ssh_string(self.algo_name().as_bytes());
        buffer.extend_ssh_string(&self.blob_bytes());
    }

    pub fn to_base64(&self) -> String {
        let mut bytes = Vec::new();
        bytes.extend_ssh_string(self.algo_name().as_bytes());
        bytes.extend_ssh_string(&self.blob_bytes());
        let mut framed = Vec::new();
        framed.extend_ssh_string(&bytes);
        data_encoding::BASE64_NOPAD.encode(&framed)
    }

    pub fn from_base64(s: &[u8]) -> Result<Self, Error> {
        let raw = data_encoding::BASE64_NOPAD.decode(s)?;
        let mut r = raw.reader(0);
        let sig = r.read_string()?;
        let mut r = sig.reader(0);
        let typ = r.read_string()?;
        let bytes = r.read_string()?;
        match typ {
            b"ssh-ed25519" => {
                let arr: [u8; 64] = bytes.try_into().map_err(|_| Error::InvalidSignature)?;
                Ok(Signature::Ed25519(arr))
            }
            b"rsa-sha2-256" => Ok(Signature::RSA { hash: SignatureHash::SHA2_256, bytes: bytes.to_vec() }),
            b"rsa-sha2-512" => Ok(Signature::RSA { hash: SignatureHash::SHA2_512, bytes: bytes.to_vec() }),
            b"ssh-rsa" => Ok(Signature::RSA { hash: SignatureHash::SHA1, bytes: bytes.to_vec() }),
            b"ecdsa-sha2-nistp256" | b"ecdsa-sha2-nistp384" | b"ecdsa-sha2-nistp521" => {
                let mut br = bytes.reader(0);
                let r = br.read_mpint()?.to_vec();
                let s = br.read_mpint()?.to_vec();
                let curve = match typ {
                    b"ecdsa-sha2-nistp256" => "nistp256",
                    b"ecdsa-sha2-nistp384" => "nistp384",
                    _ => "nistp521",
                };
                Ok(Signature::EC { curve, r, s })
            }
            other => Err(Error::UnknownSignatureType(
                String::from_utf8_lossy(other).into_owned(),
            )),
        }
    }
}

impl AsRef<[u8]> for Signature {
    fn as_ref(&self) -> &[u8] {
        match self {
            Signature::Ed25519(bytes) => &bytes[..],
            Signature::RSA { bytes, .. } => bytes,
            // Elliptic-curve signatures have no fixed-width raw form; callers
            // that need the wire blob should use `encode_into` instead.
            Signature::EC { r, .. } => r,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KeyPair;

    #[test]
    fn ed25519_base64_roundtrip() {
        let key = KeyPair::generate_ed25519();
        let sig = key.sign_detached(b"payload").unwrap();
        let b64 = sig.to_base64();
        let parsed = Signature::from_base64(b64.as_bytes()).unwrap();
        assert!(matches!(parsed, Signature::Ed25519(_)));
    }
}
