//! Streaming SHA-512 hashing with a progress callback.
//!
//! `Read`/`Write` adapters accumulate a digest as bytes pass through them,
//! encoded with `data_encoding` rather than a hand-rolled hex encoder,
//! producing lowercase hex SHA-512 strings for this crate's on-disk
//! formats.

use std::io::{self, Read, Write};

use data_encoding::HEXLOWER;
use sha2::{Digest, Sha512};

/// Fixed chunk size used everywhere a file is read for hashing or copying.
pub const CHUNK_SIZE: usize = 16 * 1024;

/// Reads to EOF from `reader`, feeding bytes through a SHA-512 accumulator
/// in [`CHUNK_SIZE`] chunks, invoking `progress` with the cumulative byte
/// count after each chunk. Returns the lowercase hex digest.
pub fn hash_reader<R: Read>(mut reader: R, mut progress: impl FnMut(u64)) -> io::Result<String> {
    let mut hasher = Sha512::new();
    let mut buf = [0u8; CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
        progress(total);
    }
    Ok(HEXLOWER.encode(&hasher.finalize()))
}

/// Hashes a complete in-memory buffer; used for the offsite index hash
/// (`index.json.hash`, which hashes the whole serialized index file).
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha512::new();
    hasher.update(bytes);
    HEXLOWER.encode(&hasher.finalize())
}

/// A `Read` adapter that accumulates a SHA-512 digest of everything read
/// through it, for callers that want to hash while copying rather than
/// hash-then-copy.
pub struct HashingReader<R> {
    inner: R,
    hasher: Sha512,
    count: u64,
}

impl<R: Read> HashingReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha512::new(),
            count: 0,
        }
    }

    pub fn bytes_read(&self) -> u64 {
        self.count
    }

    pub fn finish(self) -> String {
        HEXLOWER.encode(&self.hasher.finalize())
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        self.count += n as u64;
        Ok(n)
    }
}

/// A `Write` adapter that accumulates a SHA-512 digest of everything
/// written through it.
pub struct HashingWriter<W> {
    inner: W,
    hasher: Sha512,
    count: u64,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha512::new(),
            count: 0,
        }
    }

    pub fn bytes_written(&self) -> u64 {
        self.count
    }

    pub fn finish(self) -> String {
        HEXLOWER.encode(&self.hasher.finalize())
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_input() {
        let mut calls = 0;
        let digest = hash_reader(&b""[..], |_| calls += 1).unwrap();
        assert_eq!(
            digest,
            "cf83e1357eefb8bdf1542850d66d8007d620e4050b5715dc83f4a921d36ce9ce47d0d13c5d85f2b0ff8318d2877eec2f63b931bd47417a81a538327af927da3"
        );
        assert_eq!(calls, 0);
    }

    #[test]
    fn known_digest() {
        let digest = hash_reader(&b"abc"[..], |_| {}).unwrap();
        assert_eq!(
            digest,
            "ddaf35a193617abacc417349ae20413112e6fa4e89a97ea20a9eeee64b55d39a2192992a274fc1a836ba3c23a3feebbd454d4423643ce80e2a9ac94fa54ca49"
        );
    }

    #[test]
    fn reader_and_direct_agree() {
        let data = b"the quick brown fox jumps over the lazy dog".repeat(100);
        let direct = hash_reader(&data[..], |_| {}).unwrap();

        let mut hr = HashingReader::new(&data[..]);
        let mut sink = Vec::new();
        io::copy(&mut hr, &mut sink).unwrap();
        assert_eq!(sink, data);
        assert_eq!(hr.finish(), direct);
    }

    #[test]
    fn progress_reaches_total_len() {
        let data = vec![7u8; CHUNK_SIZE * 3 + 17];
        let mut last = 0u64;
        hash_reader(&data[..], |n| last = n).unwrap();
        assert_eq!(last, data.len() as u64);
    }
}
