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

use std::fs::{remove_file, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::compress::Compressor;
use super::pipeline::{copy_stream, CountingWriter};
use super::Stream;

/// A volume which concatenates every stream into a single file.
///
/// The volume is one `<volume-id>.cat` file under the repository. The file
/// is opened append-only on the first write and shared by every stream
/// writer; each per-stream writer tracks the byte region it occupies.
/// Stream regions never overlap, and offsets are strictly increasing in
/// stream creation order. The shared handle is closed when the volume is
/// stored.
#[derive(Debug)]
pub struct CatVolume {
    /// The volume identifier, including the `.cat` suffix.
    id: String,

    /// The absolute path of the cat file.
    path: PathBuf,

    /// Whether this volume was created during this session.
    new: bool,

    /// Whether this volume has on-disk changes from this session.
    modified: bool,

    /// Whether filesystem mutation is suppressed.
    dry_run: bool,

    /// The shared append handle, opened on first write.
    file: Option<File>,

    /// The offset at which the next stream will start.
    tail: u64,
}

impl CatVolume {
    /// Create a new cat volume under `repository` from an id `token`.
    ///
    /// The cat file itself is not created until the first stream is written.
    pub fn create(repository: &Path, token: String, dry_run: bool) -> Self {
        let id = format!("{}.cat", token);
        let path = repository.join(&id);
        CatVolume {
            id,
            path,
            new: true,
            modified: false,
            dry_run,
            file: None,
            tail: 0,
        }
    }

    /// Open the existing read-only cat volume named `id` under `repository`.
    pub fn load(repository: &Path, id: &str) -> Self {
        CatVolume {
            id: id.to_owned(),
            path: repository.join(id),
            new: false,
            modified: false,
            dry_run: false,
            file: None,
            tail: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_new(&self) -> bool {
        self.new
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Write one stream into this volume from `input`.
    ///
    /// The per-stream writer is a counting view over the shared append
    /// handle: closing it flushes the gzip trailer but leaves the shared
    /// file open for the next stream.
    ///
    /// # Errors
    /// - `Error::ReadOnly`: This volume was loaded from a previous snapshot.
    /// - `Error::Io`: An I/O error occurred.
    pub fn write_stream(
        &mut self,
        input: &mut impl Read,
        compressor: Option<Compressor>,
    ) -> crate::Result<Stream> {
        if !self.new {
            return Err(crate::Error::ReadOnly);
        }

        if !self.dry_run && self.file.is_none() {
            let file = OpenOptions::new()
                .append(true)
                .create(true)
                .open(&self.path)?;
            self.tail = file.metadata()?.len();
            self.file = Some(file);
            self.modified = true;
        }

        let offset = self.tail;
        let raw: Box<dyn Write + '_> = match &mut self.file {
            Some(file) => Box::new(file),
            None => Box::new(io::sink()),
        };

        let (sink, sha1) = copy_stream(input, CountingWriter::new(raw), compressor)?;
        let size = sink.count();
        drop(sink);

        self.tail += size;

        Ok(Stream {
            name: None,
            volume: self.id.clone(),
            offset: Some(offset),
            size: Some(size),
            sha1,
            compressor,
        })
    }

    /// Return a reader over the uncompressed bytes of `stream`.
    ///
    /// The reader seeks to the recorded offset and reads exactly the
    /// recorded size, decompressing if the stream was compressed.
    pub fn reader(&self, stream: &Stream) -> crate::Result<Box<dyn Read>> {
        let offset = stream.offset.ok_or(crate::Error::Corrupt)?;
        let size = stream.size.ok_or(crate::Error::Corrupt)?;

        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;
        let region = file.take(size);

        Ok(match stream.compressor {
            Some(compressor) => compressor.decompress(region),
            None => Box::new(region),
        })
    }

    /// Persist this volume, closing the shared append handle.
    pub fn store(&mut self) -> crate::Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
        }
        Ok(())
    }

    /// Delete the cat file iff this volume was modified.
    pub fn rollback(&mut self) -> crate::Result<()> {
        self.file.take();

        if !self.modified || self.dry_run {
            return Ok(());
        }

        match remove_file(&self.path) {
            Err(error) if error.kind() != io::ErrorKind::NotFound => Err(error.into()),
            _ => {
                self.modified = false;
                Ok(())
            }
        }
    }
}
