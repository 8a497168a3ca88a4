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
//! Binary codec primitives shared by the whole workspace: the `string`,
//! `mpint` and `uint32` wire types of RFC 4251 §5.

use crate::Error;
use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use russh_cryptovec::CryptoVec;

#[doc(hidden)]
pub trait Bytes {
    fn bytes(&self) -> &[u8];
}

impl<A: AsRef<str>> Bytes for A {
    fn bytes(&self) -> &[u8] {
        self.as_ref().as_bytes()
    }
}

/// Encode in the SSH binary format.
pub trait Encoding {
    /// Push an SSH-encoded string to `self`.
    fn extend_ssh_string(&mut self, s: &[u8]);
    /// Push an SSH-encoded blank string of length `s` to `self`, returning
    /// a mutable view over the reserved bytes.
    fn extend_ssh_string_blank(&mut self, s: usize) -> &mut [u8];
    /// Push an SSH-encoded multiple-precision integer.
    fn extend_ssh_mpint(&mut self, s: &[u8]);
    /// Push an SSH-encoded name-list.
    fn extend_list<A: Bytes, I: Iterator<Item = A>>(&mut self, list: I);
    /// Push an SSH-encoded empty name-list.
    fn write_empty_list(&mut self);
}

/// Encoded length, in bytes, of `s` as an SSH mpint (including its
/// four-byte length prefix).
pub fn mpint_len(s: &[u8]) -> usize {
    let mut i = 0;
    while i < s.len() && s[i] == 0 {
        i += 1
    }
    if i == s.len() {
        return 4;
    }
    (if s[i] & 0x80 != 0 { 5 } else { 4 }) + s.len() - i
}

macro_rules! impl_encoding {
    ($t:ty, $push_u32:ident, $resize:ident) => {
        impl Encoding for $t {
            fn extend_ssh_string(&mut self, s: &[u8]) {
                self.$push_u32(s.len() as u32);
                self.extend(s);
            }

            fn extend_ssh_string_blank(&mut self, len: usize) -> &mut [u8] {
                self.$push_u32(len as u32);
                let current = self.len();
                self.$resize(current + len);
                &mut self[current..]
            }

            fn extend_ssh_mpint(&mut self, s: &[u8]) {
                let mut i = 0;
                while i < s.len() && s[i] == 0 {
                    i += 1
                }
                if i == s.len() {
                    self.$push_u32(0);
                    return;
                }
                if s[i] & 0x80 != 0 {
                    self.$push_u32((s.len() - i + 1) as u32);
                    self.extend(&[0]);
                } else {
                    self.$push_u32((s.len() - i) as u32);
                }
                self.extend(&s[i..]);
            }

            fn extend_list<A: Bytes, I: Iterator<Item = A>>(&mut self, list: I) {
                let len0 = self.len();
                self.extend(&[0, 0, 0, 0]);
                let mut first = true;
                for i in list {
                    if !first {
                        self.extend(&[b',']);
                    } else {
                        first = false;
                    }
                    self.extend(i.bytes());
                }
                let len = (self.len() - len0 - 4) as u32;
                BigEndian::write_u32(&mut self[len0..], len);
            }

            fn write_empty_list(&mut self) {
                self.extend(&[0, 0, 0, 0]);
            }
        }
    };
}

fn vec_push_u32_be(v: &mut Vec<u8>, n: u32) {
    v.write_u32::<BigEndian>(n).expect("Vec<u8> write is infallible");
}

impl_encoding!(CryptoVec, push_u32_be, resize);

impl Encoding for Vec<u8> {
    fn extend_ssh_string(&mut self, s: &[u8]) {
        vec_push_u32_be(self, s.len() as u32);
        self.extend(s);
    }
    fn extend_ssh_string_blank(&mut self, len: usize) -> &mut [u8] {
        vec_push_u32_be(self, len as u32);
        let current = self.len();
        self.resize(current + len, 0u8);
        &mut self[current..]
    }
    fn extend_ssh_mpint(&mut self, s: &[u8]) {
        let mut i = 0;
        while i < s.len() && s[i] == 0 {
            i += 1
        }
        if i == s.len() {
            vec_push_u32_be(self, 0);
            return;
        }
        if s[i] & 0x80 != 0 {
            vec_push_u32_be(self, (s.len() - i + 1) as u32);
            self.push(0);
        } else {
            vec_push_u32_be(self, (s.len() - i) as u32);
        }
        self.extend(&s[i..]);
    }
    fn extend_list<A: Bytes, I: Iterator<Item = A>>(&mut self, list: I) {
        let len0 = self.len();
        self.extend(&[0, 0, 0, 0]);
        let mut first = true;
        for i in list {
            if !first {
                self.push(b',');
            } else {
                first = false;
            }
            self.extend(i.bytes());
        }
        let len = (self.len() - len0 - 4) as u32;
        BigEndian::write_u32(&mut self[len0..], len);
    }
    fn write_empty_list(&mut self) {
        self.extend(&[0, 0, 0, 0]);
    }
}

/// A cursor-like trait to read SSH-encoded values.
pub trait Reader {
    fn reader(&self, starting_at: usize) -> Position<'_>;
}

impl Reader for CryptoVec {
    fn reader(&self, starting_at: usize) -> Position<'_> {
        Position {
            s: self,
            position: starting_at,
        }
    }
}

impl Reader for [u8] {
    fn reader(&self, starting_at: usize) -> Position<'_> {
        Position {
            s: self,
            position: starting_at,
        }
    }
}

/// A cursor over an SSH-encoded byte slice.
#[derive(Debug)]
pub struct Position<'a> {
    s: &'a [u8],
    #[doc(hidden)]
    pub position: usize,
}

impl<'a> Position<'a> {
    /// Read one `string` (length-prefixed byte slice).
    pub fn read_string(&mut self) -> Result<&'a [u8], Error> {
        let len = self.read_u32()? as usize;
        if self.position + len <= self.s.len() {
            let result = &self.s[self.position..(self.position + len)];
            self.position += len;
            Ok(result)
        } else {
            Err(Error::IndexOutOfBounds)
        }
    }

    /// Read a big-endian `uint32`.
    pub fn read_u32(&mut self) -> Result<u32, Error> {
        if self.position + 4 <= self.s.len() {
            let u = BigEndian::read_u32(&self.s[self.position..]);
            self.position += 4;
            Ok(u)
        } else {
            Err(Error::IndexOutOfBounds)
        }
    }

    /// Read one byte.
    pub fn read_byte(&mut self) -> Result<u8, Error> {
        if self.position + 1 <= self.s.len() {
            let u = self.s[self.position];
            self.position += 1;
            Ok(u)
        } else {
            Err(Error::IndexOutOfBounds)
        }
    }

    /// Read an `mpint`, as the raw (possibly sign-padded) big-endian bytes.
    pub fn read_mpint(&mut self) -> Result<&'a [u8], Error> {
        self.read_string()
    }

    /// Number of bytes remaining to read.
    pub fn remaining(&self) -> usize {
        self.s.len().saturating_sub(self.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mpint_roundtrip_positive_high_bit() {
        let mut buf = Vec::new();
        buf.extend_ssh_mpint(&[0x80, 0x01]);
        // high bit set -> needs a leading zero byte
        assert_eq!(&buf, &[0, 0, 0, 3, 0, 0x80, 0x01]);
        let mut r = buf.reader(0);
        assert_eq!(r.read_mpint().unwrap(), &[0, 0x80, 0x01]);
    }

    #[test]
    fn mpint_strips_leading_zeros() {
        let mut buf = Vec::new();
        buf.extend_ssh_mpint(&[0, 0, 0x7f]);
        assert_eq!(&buf, &[0, 0, 0, 1, 0x7f]);
    }

    #[test]
    fn mpint_zero_is_empty() {
        let mut buf = Vec::new();
        buf.extend_ssh_mpint(&[0, 0, 0]);
        assert_eq!(&buf, &[0, 0, 0, 0]);
    }

    #[test]
    fn string_roundtrip() {
        let mut buf = Vec::new();
        buf.extend_ssh_string(b"hello");
        let mut r = buf.reader(0);
        assert_eq!(r.read_string().unwrap(), b"hello");
    }

    #[test]
    fn list_roundtrip() {
        let mut buf = Vec::new();
        buf.extend_list(["a", "b", "c"].iter());
        let mut r = buf.reader(0);
        assert_eq!(r.read_string().unwrap(), b"a,b,c");
    }

    #[test]
    fn truncated_buffer_errors() {
        let buf = vec![0, 0, 0, 5, b'h', b'i'];
        let mut r = buf.reader(0);
        assert!(matches!(r.read_string(), Err(Error::IndexOutOfBounds)));
    }
}
