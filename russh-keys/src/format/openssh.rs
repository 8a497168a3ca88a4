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
use aes::cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr128BE;
use num_bigint_dig::ModInverse;
use rand::RngCore;

use crate::encoding::{Encoding, Reader};
use crate::key;
use crate::Error;

const MAGIC: &[u8] = b"openssh-key-v1\0";
const KEYTYPE_ED25519: &[u8] = b"ssh-ed25519";
const KEYTYPE_RSA: &[u8] = b"ssh-rsa";
const KEYTYPE_ECDSA_P256: &[u8] = b"ecdsa-sha2-nistp256";
const KEYTYPE_ECDSA_P384: &[u8] = b"ecdsa-sha2-nistp384";
const KEYTYPE_ECDSA_P521: &[u8] = b"ecdsa-sha2-nistp521";

type Aes128Ctr = Ctr128BE<aes::Aes128>;
type Aes256Ctr = Ctr128BE<aes::Aes256>;

/// Decode a secret key in OpenSSH's `openssh-key-v1` container format,
/// deciphering it with `password` if it is encrypted.
pub fn decode_openssh(secret: &[u8], password: Option<&str>) -> Result<key::KeyPair, Error> {
    if secret.len() < MAGIC.len() || &secret[..MAGIC.len()] != MAGIC {
        return Err(Error::InvalidPrivateKeyFormat);
    }
    let mut position = secret.reader(MAGIC.len());

    let ciphername = position.read_string()?;
    let kdfname = position.read_string()?;
    let kdfoptions = position.read_string()?;
    let nkeys = position.read_u32()?;

    for _ in 0..nkeys {
        position.read_string()?;
    }

    let privblob = position.read_string()?;
    let decrypted = decrypt_secret_key(ciphername, kdfname, kdfoptions, password, privblob)?;

    let mut position = decrypted.reader(0);
    let check0 = position.read_u32()?;
    let check1 = position.read_u32()?;
    if check0 != check1 {
        return Err(if password.is_some() {
            Error::IncorrectPassphrase
        } else {
            Error::InvalidPrivateKeyFormat
        });
    }

    let key_type = position.read_string()?;
    let key = if key_type == KEYTYPE_ED25519 {
        let pubkey = position.read_string()?;
        let seckey = position.read_string()?;
        let _comment = position.read_string()?;
        if pubkey != &seckey[32..] {
            return Err(Error::InvalidPrivateKeyFormat);
        }
        let bytes: [u8; 32] = seckey[..32].try_into().map_err(|_| Error::InvalidPrivateKeyFormat)?;
        key::KeyPair::Ed25519(ed25519_dalek::SigningKey::from_bytes(&bytes))
    } else if key_type == KEYTYPE_RSA {
        let n = rsa::BigUint::from_bytes_be(position.read_mpint()?);
        let e = rsa::BigUint::from_bytes_be(position.read_mpint()?);
        let d = rsa::BigUint::from_bytes_be(position.read_mpint()?);
        let _iqmp = position.read_mpint()?;
        let p = rsa::BigUint::from_bytes_be(position.read_mpint()?);
        let q = rsa::BigUint::from_bytes_be(position.read_mpint()?);
        let _comment = position.read_string()?;
        let key = rsa::RsaPrivateKey::from_components(n, e, d, vec![p, q])
            .map_err(|_| Error::InvalidPrivateKeyFormat)?;
        key::KeyPair::RSA { key, hash: key::SignatureHash::SHA2_512 }
    } else if key_type == KEYTYPE_ECDSA_P256 || key_type == KEYTYPE_ECDSA_P384 || key_type == KEYTYPE_ECDSA_P521 {
        let _ident = position.read_string()?;
        let _point = position.read_string()?;
        let scalar = position.read_mpint()?;
        let _comment = position.read_string()?;
        let ec = if key_type == KEYTYPE_ECDSA_P256 {
            key::EcKeyPair::P256(
                p256::ecdsa::SigningKey::from_slice(left_pad(scalar, 32).as_slice())
                    .map_err(|_| Error::InvalidPrivateKeyFormat)?,
            )
        } else if key_type == KEYTYPE_ECDSA_P384 {
            key::EcKeyPair::P384(
                p384::ecdsa::SigningKey::from_slice(left_pad(scalar, 48).as_slice())
                    .map_err(|_| Error::InvalidPrivateKeyFormat)?,
            )
        } else {
            key::EcKeyPair::P521(
                p521::ecdsa::SigningKey::from_slice(left_pad(scalar, 66).as_slice())
                    .map_err(|_| Error::InvalidPrivateKeyFormat)?,
            )
        };
        key::KeyPair::EC { key: ec }
    } else {
        return Err(Error::UnsupportedKeyType(
            String::from_utf8_lossy(key_type).into_owned(),
        ));
    };

    let padding = &decrypted[position.position..];
    for (i, &b) in padding.iter().enumerate() {
        if b as usize != i + 1 {
            return Err(Error::InvalidPrivateKeyFormat);
        }
    }

    Ok(key)
}

/// The key-type tag (e.g. `ssh-ed25519`, `ssh-rsa`) of an
/// `openssh-key-v1` container, read straight from the public blob that
/// precedes the encrypted private section. Unlike [`decode_openssh`]
/// this never touches the cipher/kdf, so it works on a passphrase-
/// protected key without the passphrase.
pub fn key_type(secret: &[u8]) -> Result<String, Error> {
    if secret.len() < MAGIC.len() || &secret[..MAGIC.len()] != MAGIC {
        return Err(Error::InvalidPrivateKeyFormat);
    }
    let mut position = secret.reader(MAGIC.len());

    let _ciphername = position.read_string()?;
    let _kdfname = position.read_string()?;
    let _kdfoptions = position.read_string()?;
    let nkeys = position.read_u32()?;
    if nkeys == 0 {
        return Err(Error::InvalidPrivateKeyFormat);
    }

    let pubkey_blob = position.read_string()?;
    let tag = pubkey_blob.reader(0).read_string()?;
    Ok(String::from_utf8_lossy(tag).into_owned())
}

fn left_pad(bytes: &[u8], width: usize) -> Vec<u8> {
    let unsigned = if bytes.first() == Some(&0) && bytes.len() > 1 { &bytes[1..] } else { bytes };
    let mut out = vec![0u8; width.saturating_sub(unsigned.len())];
    out.extend_from_slice(unsigned);
    out
}

fn decrypt_secret_key(
    ciphername: &[u8],
    kdfname: &[u8],
    kdfoptions: &[u8],
    password: Option<&str>,
    secret_key: &[u8],
) -> Result<Vec<u8>, Error> {
    if kdfname == b"none" && ciphername == b"none" {
        return Ok(secret_key.to_vec());
    }
    let password = password.ok_or(Error::PassphraseRequired)?;
    let key_len = match ciphername {
        b"aes128-ctr" => 16,
        b"aes256-ctr" => 32,
        _ => return Err(Error::UnsupportedKeyType(String::from_utf8_lossy(ciphername).into_owned())),
    };
    if kdfname != b"bcrypt" {
        return Err(Error::UnsupportedKeyType(String::from_utf8_lossy(kdfname).into_owned()));
    }
    let mut kdfopts = kdfoptions.reader(0);
    let salt = kdfopts.read_string()?;
    let rounds = kdfopts.read_u32()?;

    let mut derived = vec![0u8; key_len + 16];
    bcrypt_pbkdf::bcrypt_pbkdf(password, salt, rounds, &mut derived)
        .map_err(|_| Error::CryptographicError)?;
    let (enc_key, iv) = derived.split_at(key_len);

    let mut buf = secret_key.to_vec();
    match ciphername {
        b"aes128-ctr" => {
            let mut cipher = Aes128Ctr::new(enc_key.into(), iv.into());
            cipher.apply_keystream(&mut buf);
        }
        b"aes256-ctr" => {
            let mut cipher = Aes256Ctr::new(enc_key.into(), iv.into());
            cipher.apply_keystream(&mut buf);
        }
        _ => unreachable!(),
    }
    Ok(buf)
}

/// Encode a key pair into an unencrypted `openssh-key-v1` container
/// (`cipher none`, `kdf none`). Round-trips with [`decode_openssh`].
pub fn encode_openssh(key: &key::KeyPair) -> Result<Vec<u8>, Error> {
    let mut out = Vec::new();
    out.extend_from_slice(MAGIC);
    out.extend_ssh_string(b"none");
    out.extend_ssh_string(b"none");
    out.write_empty_list();
    crate::write_u32_be(&mut out, 1);

    let pubkey = crate::PublicKeyBase64::public_key_bytes(&key.public_key());
    out.extend_ssh_string(&pubkey);

    let mut priv_section = Vec::new();
    let mut check = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut check);
    priv_section.extend_from_slice(&check);
    priv_section.extend_from_slice(&check);

    match key {
        key::KeyPair::Ed25519(signing) => {
            priv_section.extend_ssh_string(KEYTYPE_ED25519);
            priv_section.extend_ssh_string(&signing.verifying_key().to_bytes());
            let mut combined = signing.to_bytes().to_vec();
            combined.extend_from_slice(&signing.verifying_key().to_bytes());
            priv_section.extend_ssh_string(&combined);
            priv_section.extend_ssh_string(b"");
        }
        key::KeyPair::RSA { key: rsa_key, .. } => {
            priv_section.extend_ssh_string(KEYTYPE_RSA);
            priv_section.extend_ssh_mpint(&rsa_key.n().to_bytes_be());
            priv_section.extend_ssh_mpint(&rsa_key.e().to_bytes_be());
            priv_section.extend_ssh_mpint(&rsa_key.d().to_bytes_be());
            let primes = rsa_key.primes();
            let (p, q) = (&primes[0], &primes[1]);
            let iqmp = q
                .clone()
                .mod_inverse(p.clone())
                .map(|i| i.to_biguint().unwrap_or_default())
                .unwrap_or_default();
            priv_section.extend_ssh_mpint(&iqmp.to_bytes_be());
            priv_section.extend_ssh_mpint(&p.to_bytes_be());
            priv_section.extend_ssh_mpint(&q.to_bytes_be());
            priv_section.extend_ssh_string(b"");
        }
        key::KeyPair::EC { key: ec } => {
            let public = ec_public(ec);
            priv_section.extend_ssh_string(public.ident().as_bytes());
            priv_section.extend_ssh_string(public.ident().as_bytes());
            priv_section.extend_ssh_string(&public.sec1_bytes());
            priv_section.extend_ssh_mpint(&ec_scalar(ec));
            priv_section.extend_ssh_string(b"");
        }
    }

    let mut pad = 1u8;
    while priv_section.len() % 8 != 0 {
        priv_section.push(pad);
        pad += 1;
    }

    out.extend_ssh_string(&priv_section);
    Ok(out)
}

fn ec_public(key: &key::EcKeyPair) -> key::EcPublicKey {
    match key {
        key::EcKeyPair::P256(k) => key::EcPublicKey::P256(*k.verifying_key()),
        key::EcKeyPair::P384(k) => key::EcPublicKey::P384(*k.verifying_key()),
        key::EcKeyPair::P521(k) => key::EcPublicKey::P521(*k.verifying_key()),
    }
}

fn ec_scalar(key: &key::EcKeyPair) -> Vec<u8> {
    match key {
        key::EcKeyPair::P256(k) => k.to_bytes().to_vec(),
        key::EcKeyPair::P384(k) => k.to_bytes().to_vec(),
        key::EcKeyPair::P521(k) => k.to_bytes().to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ed25519_roundtrip_unencrypted() {
        let key = key::KeyPair::generate_ed25519();
        let encoded = encode_openssh(&key).unwrap();
        let decoded = decode_openssh(&encoded, None).unwrap();
        assert_eq!(key.public_key(), decoded.public_key());
    }

    #[test]
    fn rejects_bad_magic() {
        assert!(matches!(
            decode_openssh(b"not-an-openssh-key-blob", None),
            Err(Error::InvalidPrivateKeyFormat)
        ));
    }

    #[test]
    fn key_type_reads_tag_without_decrypting() {
        let key = key::KeyPair::generate_ed25519();
        let encoded = encode_openssh(&key).unwrap();
        assert_eq!(key_type(&encoded).unwrap(), "ssh-ed25519");
    }
}
