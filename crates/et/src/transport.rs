// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Byte-stream abstraction under the socket protocol.
//!
//! Both the server and the remote client speak through [`Transport`], so the
//! codec runs unchanged over a `TcpStream` or an in-memory buffer in tests.

use crate::error::{Error, Result};
use crate::wire::{join_u64, Words};
use std::io::{self, IoSlice, Read, Write};

/// Blocking, exact-length send and receive.
pub trait Transport: Send {
    /// Write every buffer in order, as one gathered write where possible.
    fn send_vectored(&mut self, bufs: &[IoSlice<'_>]) -> Result<()>;

    /// Fill `buf` completely.
    fn receive(&mut self, buf: &mut [u8]) -> Result<()>;

    fn send(&mut self, buf: &[u8]) -> Result<()> {
        self.send_vectored(&[IoSlice::new(buf)])
    }

    fn receive_vec(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.receive(&mut buf)?;
        Ok(buf)
    }

    fn receive_u32(&mut self) -> Result<u32> {
        let mut word = [0u8; 4];
        self.receive(&mut word)?;
        Ok(u32::from_be_bytes(word))
    }

    fn receive_i32(&mut self) -> Result<i32> {
        Ok(self.receive_u32()? as i32)
    }

    fn receive_u64(&mut self) -> Result<u64> {
        let hi = self.receive_u32()?;
        let lo = self.receive_u32()?;
        Ok(join_u64(hi, lo))
    }

    /// Receive `n` words and decode them with `f`.
    fn receive_words<T>(&mut self, n: usize, f: impl FnOnce(&mut Words<'_>) -> Result<T>) -> Result<T>
    where
        Self: Sized,
    {
        let buf = self.receive_vec(n * 4)?;
        f(&mut Words::new(&buf))
    }
}

impl<T: Read + Write + Send> Transport for T {
    fn send_vectored(&mut self, bufs: &[IoSlice<'_>]) -> Result<()> {
        let total: usize = bufs.iter().map(|b| b.len()).sum();
        let mut sent = 0;
        while sent < total {
            let mut skip = sent;
            let slices: Vec<IoSlice<'_>> = bufs
                .iter()
                .filter_map(|b| {
                    let b: &[u8] = b;
                    if skip >= b.len() {
                        skip -= b.len();
                        None
                    } else {
                        let slice = IoSlice::new(&b[skip..]);
                        skip = 0;
                        Some(slice)
                    }
                })
                .collect();
            match self.write_vectored(&slices) {
                Ok(0) => return Err(Error::Write(io::ErrorKind::WriteZero.into())),
                Ok(n) => sent += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(Error::Write(e)),
            }
        }
        self.flush().map_err(Error::Write)
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<()> {
        self.read_exact(buf).map_err(Error::Read)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Accepts at most `chunk` bytes per write.
    struct Trickle {
        out: Vec<u8>,
        chunk: usize,
    }

    impl Read for Trickle {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Ok(0)
        }
    }

    impl Write for Trickle {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = buf.len().min(self.chunk);
            self.out.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_send_vectored_survives_short_writes() {
        let mut t = Trickle {
            out: Vec::new(),
            chunk: 3,
        };
        let parts: [&[u8]; 4] = [b"abcd", b"", b"efg", b"h"];
        let bufs: Vec<IoSlice<'_>> = parts.iter().map(|p| IoSlice::new(p)).collect();
        t.send_vectored(&bufs).unwrap();
        assert_eq!(t.out, b"abcdefgh");
    }

    #[test]
    fn test_receive_words() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&7u32.to_be_bytes());
        bytes.extend_from_slice(&1u32.to_be_bytes());
        bytes.extend_from_slice(&2u32.to_be_bytes());
        bytes.extend_from_slice(&(-5i32).to_be_bytes());
        let mut t = Cursor::new(bytes);
        assert_eq!(t.receive_u32().unwrap(), 7);
        assert_eq!(t.receive_u64().unwrap(), (1u64 << 32) | 2);
        assert_eq!(t.receive_words(1, |w| w.i32()).unwrap(), -5);
    }

    #[test]
    fn test_short_read_is_read_error() {
        let mut t = Cursor::new(vec![0u8; 3]);
        assert!(matches!(t.receive_u32(), Err(Error::Read(_))));
    }
}
