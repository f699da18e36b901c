/*
 * Copyright 2019-2021 Wren Powell
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! The streaming write pipeline for volume streams.
//!
//! A stream write composes `{raw sink → optional gzip encoder → SHA-1
//! hasher}` once per stream. The hasher sits on top of the stack so it
//! always sees the pre-compression bytes, and the raw sink is wrapped in a
//! [`CountingWriter`] when the caller needs to know how many bytes reached
//! the underlying storage.

use std::io::{self, Read, Write};

use flate2::write::GzEncoder;
use flate2::Compression as GzLevel;
use sha1::{Digest, Sha1};

use super::compress::Compressor;

/// A writer which computes the SHA-1 of the bytes written through it.
pub(crate) struct HashWriter<W: Write> {
    inner: W,
    digest: Sha1,
}

impl<W: Write> HashWriter<W> {
    pub(crate) fn new(inner: W) -> Self {
        HashWriter {
            inner,
            digest: Sha1::new(),
        }
    }

    /// Consume the writer, returning the inner sink and the hex digest.
    pub(crate) fn finish(self) -> (W, String) {
        (self.inner, hex::encode(self.digest.finalize()))
    }
}

impl<W: Write> Write for HashWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.digest.update(&buf[..written]);
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// A writer which counts the bytes written through it.
pub(crate) struct CountingWriter<W: Write> {
    inner: W,
    count: u64,
}

impl<W: Write> CountingWriter<W> {
    pub(crate) fn new(inner: W) -> Self {
        CountingWriter { inner, count: 0 }
    }

    /// The number of bytes accepted by the inner sink so far.
    pub(crate) fn count(&self) -> u64 {
        self.count
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.count += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Copy `input` into `sink` through the stream pipeline.
///
/// Returns the sink and the SHA-1 hex digest of the uncompressed bytes. The
/// gzip encoder, if any, is fully finished before this returns, so every
/// compressed byte has reached `sink`.
pub(crate) fn copy_stream<W: Write>(
    input: &mut impl Read,
    sink: W,
    compressor: Option<Compressor>,
) -> crate::Result<(W, String)> {
    match compressor {
        Some(Compressor::Gzip) => {
            let mut writer = HashWriter::new(GzEncoder::new(sink, GzLevel::default()));
            io::copy(input, &mut writer)?;
            let (encoder, digest) = writer.finish();
            let mut sink = encoder.finish()?;
            sink.flush()?;
            Ok((sink, digest))
        }
        None => {
            let mut writer = HashWriter::new(sink);
            io::copy(input, &mut writer)?;
            let (mut sink, digest) = writer.finish();
            sink.flush()?;
            Ok((sink, digest))
        }
    }
}
