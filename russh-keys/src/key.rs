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
use ecdsa::signature::{Signer as _, Verifier as _};
use rand_core::OsRng;
use sha2::Digest;

use crate::encoding::{Encoding, Reader};
use crate::signature::Signature;
use crate::Error;

/// Name of a public key algorithm, as it appears on the wire.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub struct Name(pub &'static str);

impl AsRef<str> for Name {
    fn as_ref(&self) -> &str {
        self.0
    }
}

pub const ED25519: Name = Name("ssh-ed25519");
pub const RSA_SHA2_512: Name = Name("rsa-sha2-512");
pub const RSA_SHA2_256: Name = Name("rsa-sha2-256");
pub const SSH_RSA: Name = Name("ssh-rsa");
pub const ECDSA_SHA2_NISTP256: Name = Name("ecdsa-sha2-nistp256");
pub const ECDSA_SHA2_NISTP384: Name = Name("ecdsa-sha2-nistp384");
pub const ECDSA_SHA2_NISTP521: Name = Name("ecdsa-sha2-nistp521");

pub(crate) const NAME_ED25519: &str = "ssh-ed25519";

/// The hash used to produce an RSA signature, per
/// draft-rsa-dsa-sha2-256-02.
#[derive(Eq, PartialEq, Clone, Copy, Debug)]
#[allow(non_camel_case_types)]
pub enum SignatureHash {
    SHA2_256,
    SHA2_512,
    SHA1,
}

impl SignatureHash {
    pub fn name(&self) -> Name {
        match *self {
            SignatureHash::SHA2_256 => RSA_SHA2_256,
            SignatureHash::SHA2_512 => RSA_SHA2_512,
            SignatureHash::SHA1 => SSH_RSA,
        }
    }
}

/// A parsed NIST curve public key, holding the curve tag alongside the
/// verifying key so that wire encoding doesn't need a second dispatch.
#[derive(Clone)]
pub enum EcPublicKey {
    P256(p256::ecdsa::VerifyingKey),
    P384(p384::ecdsa::VerifyingKey),
    P521(p521::ecdsa::VerifyingKey),
}

impl PartialEq for EcPublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.sec1_bytes() == other.sec1_bytes() && self.curve_name() == other.curve_name()
    }
}
impl Eq for EcPublicKey {}

impl std::fmt::Debug for EcPublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "EcPublicKey({})", self.ident())
    }
}

impl EcPublicKey {
    pub fn curve_name(&self) -> &'static str {
        match self {
            EcPublicKey::P256(_) => "nistp256",
            EcPublicKey::P384(_) => "nistp384",
            EcPublicKey::P521(_) => "nistp521",
        }
    }

    pub fn ident(&self) -> &'static str {
        match self {
            EcPublicKey::P256(_) => ECDSA_SHA2_NISTP256.0,
            EcPublicKey::P384(_) => ECDSA_SHA2_NISTP384.0,
            EcPublicKey::P521(_) => ECDSA_SHA2_NISTP521.0,
        }
    }

    pub fn sec1_bytes(&self) -> Vec<u8> {
        match self {
            EcPublicKey::P256(k) => k.to_encoded_point(false).as_bytes().to_vec(),
            EcPublicKey::P384(k) => k.to_encoded_point(false).as_bytes().to_vec(),
            EcPublicKey::P521(k) => k.to_encoded_point(false).as_bytes().to_vec(),
        }
    }

    fn verify(&self, buffer: &[u8], r: &[u8], s: &[u8]) -> bool {
        match self {
            EcPublicKey::P256(k) => match ecdsa_signature_from_scalars::<p256::NistP256>(r, s) {
                Some(sig) => k.verify(buffer, &sig).is_ok(),
                None => false,
            },
            EcPublicKey::P384(k) => match ecdsa_signature_from_scalars::<p384::NistP384>(r, s) {
                Some(sig) => k.verify(buffer, &sig).is_ok(),
                None => false,
            },
            EcPublicKey::P521(k) => match ecdsa_signature_from_scalars::<p521::NistP521>(r, s) {
                Some(sig) => k.verify(buffer, &sig).is_ok(),
                None => false,
            },
        }
    }
}

fn ecdsa_signature_from_scalars<C>(
    r: &[u8],
    s: &[u8],
) -> Option<ecdsa::Signature<C>>
where
    C: ecdsa::PrimeCurve + ecdsa::elliptic_curve::CurveArithmetic,
    ecdsa::SignatureSize<C>: ecdsa::elliptic_curve::generic_array::ArrayLength<u8>,
{
    let r = ecdsa::elliptic_curve::generic_array::GenericArray::from_exact_iter(
        left_pad(r, <C::FieldBytesSize as ecdsa::elliptic_curve::generic_array::typenum::Unsigned>::to_usize()),
    )?;
    let s = ecdsa::elliptic_curve::generic_array::GenericArray::from_exact_iter(
        left_pad(s, <C::FieldBytesSize as ecdsa::elliptic_curve::generic_array::typenum::Unsigned>::to_usize()),
    )?;
    ecdsa::Signature::from_scalars(r, s).ok()
}

fn left_pad(bytes: &[u8], width: usize) -> impl Iterator<Item = u8> + '_ {
    let unsigned = if bytes.first() == Some(&0) { &bytes[1..] } else { bytes };
    let pad = width.saturating_sub(unsigned.len());
    std::iter::repeat(0u8).take(pad).chain(unsigned.iter().copied())
}

/// Public-key half of a keypair.
#[derive(PartialEq, Eq, Debug, Clone)]
pub enum PublicKey {
    Ed25519(ed25519_dalek::VerifyingKey),
    RSA { key: RsaPublic, hash: SignatureHash },
    EC { key: EcPublicKey },
}

/// RSA public key, stored in SSH wire order (`e` before `n`).
#[derive(Clone)]
pub struct RsaPublic {
    pub n: Vec<u8>,
    pub e: Vec<u8>,
}

impl PartialEq for RsaPublic {
    fn eq(&self, other: &Self) -> bool {
        self.n == other.n && self.e == other.e
    }
}
impl Eq for RsaPublic {}

impl std::fmt::Debug for RsaPublic {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "RsaPublic {{ (hidden) }}")
    }
}

impl RsaPublic {
    fn to_rsa_public_key(&self) -> Result<rsa::RsaPublicKey, Error> {
        let n = rsa::BigUint::from_bytes_be(&self.n);
        let e = rsa::BigUint::from_bytes_be(&self.e);
        rsa::RsaPublicKey::new(n, e).map_err(|_| Error::CryptographicError)
    }
}

impl PublicKey {
    /// Parse a public key, given its algorithm name and SSH-encoded blob.
    pub fn parse(algo: &[u8], pubkey: &[u8]) -> Result<Self, Error> {
        match algo {
            b"ssh-ed25519" => {
                let mut p = pubkey.reader(0);
                let key_algo = p.read_string()?;
                let key_bytes = p.read_string()?;
                if key_algo != b"ssh-ed25519" || key_bytes.len() != 32 {
                    return Err(Error::CouldNotReadKey);
                }
                let bytes: [u8; 32] = key_bytes.try_into().map_err(|_| Error::CouldNotReadKey)?;
                let key = ed25519_dalek::VerifyingKey::from_bytes(&bytes)
                    .map_err(|_| Error::CouldNotReadKey)?;
                Ok(PublicKey::Ed25519(key))
            }
            b"ssh-rsa" | b"rsa-sha2-256" | b"rsa-sha2-512" => {
                let mut p = pubkey.reader(0);
                let key_algo = p.read_string()?;
                if key_algo != b"ssh-rsa" && key_algo != b"rsa-sha2-256" && key_algo != b"rsa-sha2-512" {
                    return Err(Error::CouldNotReadKey);
                }
                let e = p.read_mpint()?.to_vec();
                let n = p.read_mpint()?.to_vec();
                let hash = if algo == b"rsa-sha2-256" {
                    SignatureHash::SHA2_256
                } else if algo == b"rsa-sha2-512" {
                    SignatureHash::SHA2_512
                } else {
                    SignatureHash::SHA1
                };
                Ok(PublicKey::RSA { key: RsaPublic { n, e }, hash })
            }
            b"ecdsa-sha2-nistp256" | b"ecdsa-sha2-nistp384" | b"ecdsa-sha2-nistp521" => {
                let mut p = pubkey.reader(0);
                let _key_algo = p.read_string()?;
                let _ident = p.read_string()?;
                let point = p.read_string()?;
                let key = match algo {
                    b"ecdsa-sha2-nistp256" => EcPublicKey::P256(
                        p256::ecdsa::VerifyingKey::from_sec1_bytes(point)
                            .map_err(|_| Error::CouldNotReadKey)?,
                    ),
                    b"ecdsa-sha2-nistp384" => EcPublicKey::P384(
                        p384::ecdsa::VerifyingKey::from_sec1_bytes(point)
                            .map_err(|_| Error::CouldNotReadKey)?,
                    ),
                    _ => EcPublicKey::P521(
                        p521::ecdsa::VerifyingKey::from_sec1_bytes(point)
                            .map_err(|_| Error::CouldNotReadKey)?,
                    ),
                };
                Ok(PublicKey::EC { key })
            }
            _ => Err(Error::UnsupportedKeyType(
                String::from_utf8_lossy(algo).into_owned(),
            )),
        }
    }

    /// Algorithm name used to negotiate and sign with this key.
    pub fn name(&self) -> &'static str {
        match self {
            PublicKey::Ed25519(_) => ED25519.0,
            PublicKey::RSA { hash, .. } => hash.name().0,
            PublicKey::EC { key } => key.ident(),
        }
    }

    /// Verify a detached signature over `buffer`.
    pub fn verify_detached(&self, buffer: &[u8], sig: &[u8]) -> bool {
        match self {
            PublicKey::Ed25519(key) => {
                let Ok(bytes): Result<[u8; 64], _> = sig.try_into() else {
                    return false;
                };
                let signature = ed25519_dalek::Signature::from_bytes(&bytes);
                key.verify_strict(buffer, &signature).is_ok()
            }
            PublicKey::RSA { key, hash } => {
                let Ok(pubkey) = key.to_rsa_public_key() else {
                    return false;
                };
                rsa_verify(&pubkey, *hash, buffer, sig)
            }
            PublicKey::EC { key } => {
                let mut r = sig.reader(0);
                let (Ok(rr), Ok(ss)) = (r.read_mpint(), r.read_mpint()) else {
                    return false;
                };
                key.verify(buffer, rr, ss)
            }
        }
    }

    /// SHA-256 fingerprint of the key, base64-encoded without padding,
    /// the same format `ssh-keygen -lf` prints.
    pub fn fingerprint(&self) -> String {
        use crate::PublicKeyBase64;
        let mut hasher = sha2::Sha256::new();
        hasher.update(self.public_key_bytes());
        data_encoding::BASE64_NOPAD.encode(&hasher.finalize())
    }

    /// Switch the signature hash used for an RSA key (no-op otherwise),
    /// used after negotiating `rsa-sha2-256`/`512` during authentication.
    pub fn set_algorithm(&mut self, algorithm: &[u8]) {
        if let PublicKey::RSA { hash, .. } = self {
            *hash = match algorithm {
                b"rsa-sha2-512" => SignatureHash::SHA2_512,
                b"rsa-sha2-256" => SignatureHash::SHA2_256,
                _ => SignatureHash::SHA1,
            };
        }
    }
}

fn rsa_verify(key: &rsa::RsaPublicKey, hash: SignatureHash, buffer: &[u8], sig: &[u8]) -> bool {
    use rsa::pkcs1v15::Pkcs1v15Sign;
    match hash {
        SignatureHash::SHA2_256 => {
            let digest = sha2::Sha256::digest(buffer);
            key.verify(Pkcs1v15Sign::new::<sha2::Sha256>(), &digest, sig).is_ok()
        }
        SignatureHash::SHA2_512 => {
            let digest = sha2::Sha512::digest(buffer);
            key.verify(Pkcs1v15Sign::new::<sha2::Sha512>(), &digest, sig).is_ok()
        }
        SignatureHash::SHA1 => {
            let digest = sha1::Sha1::digest(buffer);
            key.verify(Pkcs1v15Sign::new::<sha1::Sha1>(), &digest, sig).is_ok()
        }
    }
}

/// A NIST curve key pair, tagged by curve.
pub enum EcKeyPair {
    P256(p256::ecdsa::SigningKey),
    P384(p384::ecdsa::SigningKey),
    P521(p521::ecdsa::SigningKey),
}

impl EcKeyPair {
    fn public(&self) -> EcPublicKey {
        match self {
            EcKeyPair::P256(k) => EcPublicKey::P256(*k.verifying_key()),
            EcKeyPair::P384(k) => EcPublicKey::P384(*k.verifying_key()),
            EcKeyPair::P521(k) => EcPublicKey::P521(*k.verifying_key()),
        }
    }

    fn sign(&self, buffer: &[u8]) -> (Vec<u8>, Vec<u8>) {
        match self {
            EcKeyPair::P256(k) => {
                let sig: ecdsa::Signature<p256::NistP256> = k.sign(buffer);
                let (r, s) = sig.split_bytes();
                (r.to_vec(), s.to_vec())
            }
            EcKeyPair::P384(k) => {
                let sig: ecdsa::Signature<p384::NistP384> = k.sign(buffer);
                let (r, s) = sig.split_bytes();
                (r.to_vec(), s.to_vec())
            }
            EcKeyPair::P521(k) => {
                let sig: ecdsa::Signature<p521::NistP521> = k.sign(buffer);
                let (r, s) = sig.split_bytes();
                (r.to_vec(), s.to_vec())
            }
        }
    }
}

/// A key pair capable of signing, i.e. holding the private half.
pub enum KeyPair {
    Ed25519(ed25519_dalek::SigningKey),
    RSA { key: rsa::RsaPrivateKey, hash: SignatureHash },
    EC { key: EcKeyPair },
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            KeyPair::Ed25519(_) => write!(f, "Ed25519 {{ (hidden) }}"),
            KeyPair::RSA { .. } => write!(f, "RSA {{ (hidden) }}"),
            KeyPair::EC { key } => write!(f, "EC {{ curve: {} (hidden) }}", key.public().curve_name()),
        }
    }
}

impl<'b> crate::encoding::Bytes for &'b KeyPair {
    fn bytes(&self) -> &[u8] {
        self.name().as_bytes()
    }
}

impl KeyPair {
    pub fn public_key(&self) -> PublicKey {
        match self {
            KeyPair::Ed25519(key) => PublicKey::Ed25519(key.verifying_key()),
            KeyPair::RSA { key, hash } => PublicKey::RSA {
                key: RsaPublic {
                    n: key.n().to_bytes_be(),
                    e: key.e().to_bytes_be(),
                },
                hash: *hash,
            },
            KeyPair::EC { key } => PublicKey::EC { key: key.public() },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            KeyPair::Ed25519(_) => ED25519.0,
            KeyPair::RSA { hash, .. } => hash.name().0,
            KeyPair::EC { key } => key.public().ident(),
        }
    }

    pub fn generate_ed25519() -> Self {
        KeyPair::Ed25519(ed25519_dalek::SigningKey::generate(&mut OsRng))
    }

    pub fn generate_rsa(bits: usize, hash: SignatureHash) -> Result<Self, Error> {
        let key = rsa::RsaPrivateKey::new(&mut OsRng, bits).map_err(|_| Error::CryptographicError)?;
        Ok(KeyPair::RSA { key, hash })
    }

    /// Sign an arbitrary buffer, returning a self-describing [`Signature`].
    pub fn sign_detached(&self, to_sign: &[u8]) -> Result<Signature, Error> {
        match self {
            KeyPair::Ed25519(key) => {
                let sig = key.sign(to_sign);
                Ok(Signature::Ed25519(sig.to_bytes()))
            }
            KeyPair::RSA { key, hash } => Ok(Signature::RSA {
                hash: *hash,
                bytes: rsa_sign(key, *hash, to_sign)?,
            }),
            KeyPair::EC { key } => {
                let (r, s) = key.sign(to_sign);
                Ok(Signature::EC { curve: key.public().curve_name(), r, s })
            }
        }
    }

    /// Append this key's signature over `to_sign` to `buffer`, SSH-framed
    /// as `string(algo) ++ string(signature)`. Used by the server to sign
    /// the key-exchange hash.
    pub fn add_signature<H: AsRef<[u8]>>(
        &self,
        buffer: &mut russh_cryptovec::CryptoVec,
        to_sign: H,
    ) -> Result<(), Error> {
        let sig = self.sign_detached(to_sign.as_ref())?;
        sig.encode_into(buffer);
        Ok(())
    }

    /// Sign the contents of `buffer` in place and append the signature,
    /// SSH-framed the same way as [`KeyPair::add_signature`]. Used by the
    /// client during publickey authentication.
    pub fn add_self_signature(&self, buffer: &mut russh_cryptovec::CryptoVec) -> Result<(), Error> {
        let sig = self.sign_detached(buffer)?;
        sig.encode_into(buffer);
        Ok(())
    }
}

fn rsa_sign(key: &rsa::RsaPrivateKey, hash: SignatureHash, b: &[u8]) -> Result<Vec<u8>, Error> {
    use rsa::pkcs1v15::Pkcs1v15Sign;
    let result = match hash {
        SignatureHash::SHA2_256 => {
            let digest = sha2::Sha256::digest(b);
            key.sign(Pkcs1v15Sign::new::<sha2::Sha256>(), &digest)
        }
        SignatureHash::SHA2_512 => {
            let digest = sha2::Sha512::digest(b);
            key.sign(Pkcs1v15Sign::new::<sha2::Sha512>(), &digest)
        }
        SignatureHash::SHA1 => {
            let digest = sha1::Sha1::digest(b);
            key.sign(Pkcs1v15Sign::new::<sha1::Sha1>(), &digest)
        }
    };
    result.map_err(|_| Error::SigningError)
}

/// Parse a public key blob (`string(algo) ++ algo-specific fields`)
/// without the caller having to know the algorithm name up front.
pub fn parse_public_key(p: &[u8]) -> Result<PublicKey, Error> {
    let mut pos = p.reader(0);
    let t = pos.read_string()?;
    PublicKey::parse(t, p)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ed25519_sign_and_verify_roundtrip() {
        let key = KeyPair::generate_ed25519();
        let public = key.public_key();
        let sig = key.sign_detached(b"hello, world").unwrap();
        assert!(public.verify_detached(b"hello, world", sig.as_ref()));
        assert!(!public.verify_detached(b"tampered", sig.as_ref()));
    }

    #[test]
    fn ed25519_public_key_name() {
        let key = KeyPair::generate_ed25519();
        assert_eq!(key.name(), "ssh-ed25519");
        assert_eq!(key.public_key().name(), "ssh-ed25519");
    }
}
