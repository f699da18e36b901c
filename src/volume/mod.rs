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

//! Volumes hold the byte contents of backed-up files.
//!
//! A volume is one output container of file bytes in a snapshot. A [`CopyVolume`]
//! is a directory under the repository holding one stream file per backed-up
//! file. A [`CatVolume`] is a single `.cat` file holding every stream
//! concatenated, each stream addressed by its byte offset and size.
//!
//! Every stream is written through the same pipeline: the raw sink, an
//! optional gzip encoder, and a SHA-1 hasher over the pre-compression bytes.

use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::registry::Keyed;

pub use self::cat::CatVolume;
pub use self::compress::Compressor;
pub use self::copy::CopyVolume;

pub(crate) use self::compress::{compressed_size, is_compressible};
pub(crate) use self::pipeline::HashWriter;

mod cat;
mod compress;
mod copy;
mod pipeline;

/// The kind of a volume.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum VolumeKind {
    /// A directory of per-file stream files.
    Copy,

    /// A single file of concatenated streams.
    Cat,
}

/// A named slice of volume storage carrying one file's bytes.
///
/// This type doubles as the manifest stream record: absent fields are
/// omitted from the serialized form. A copy stream carries a `name` (its
/// path within the volume directory, without the compressor extension); a
/// cat stream carries the `offset` and `size` of its exclusive byte region
/// within the cat file.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct Stream {
    /// The stream's path within a copy volume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// The identifier of the volume holding this stream.
    pub volume: String,

    /// The byte offset of this stream within a cat volume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,

    /// The byte size of this stream within a cat volume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,

    /// The SHA-1 hex digest of the uncompressed source bytes.
    pub sha1: String,

    /// The compressor the stream was written with, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compressor: Option<Compressor>,
}

/// One output container of file bytes in a snapshot.
#[derive(Debug)]
pub enum Volume {
    /// A directory of per-file stream files.
    Copy(CopyVolume),

    /// A single file of concatenated streams.
    Cat(CatVolume),
}

impl Volume {
    /// Open the volume with the given `id` from a previous snapshot.
    ///
    /// Loaded volumes are read-only: they can serve stream readers but
    /// reject writes, and `store`/`rollback` are no-ops on them.
    pub fn load(repository: &Path, id: &str) -> Self {
        if id.ends_with(".cat") {
            Volume::Cat(CatVolume::load(repository, id))
        } else {
            Volume::Copy(CopyVolume::load(repository, id))
        }
    }

    /// The identifier of this volume.
    ///
    /// Cat volume identifiers carry the literal `.cat` suffix.
    pub fn id(&self) -> &str {
        match self {
            Volume::Copy(volume) => volume.id(),
            Volume::Cat(volume) => volume.id(),
        }
    }

    /// The kind of this volume.
    pub fn kind(&self) -> VolumeKind {
        match self {
            Volume::Copy(_) => VolumeKind::Copy,
            Volume::Cat(_) => VolumeKind::Cat,
        }
    }

    /// Whether this volume was created during this session.
    pub fn is_new(&self) -> bool {
        match self {
            Volume::Copy(volume) => volume.is_new(),
            Volume::Cat(volume) => volume.is_new(),
        }
    }

    /// Whether this volume has on-disk changes from this session.
    pub fn is_modified(&self) -> bool {
        match self {
            Volume::Copy(volume) => volume.is_modified(),
            Volume::Cat(volume) => volume.is_modified(),
        }
    }

    /// Write one stream into this volume from `input`.
    ///
    /// The `source_id` and `path` name the stream inside a copy volume and
    /// are ignored by a cat volume, which addresses its streams by byte
    /// offset.
    ///
    /// # Errors
    /// - `Error::ReadOnly`: This volume was loaded from a previous snapshot.
    /// - `Error::AlreadyExists`: The target stream file already exists.
    /// - `Error::Io`: An I/O error occurred.
    pub fn write_stream(
        &mut self,
        source_id: &str,
        path: &relative_path::RelativePath,
        input: &mut impl Read,
        compressor: Option<Compressor>,
    ) -> crate::Result<Stream> {
        match self {
            Volume::Copy(volume) => volume.write_stream(source_id, path, input, compressor),
            Volume::Cat(volume) => volume.write_stream(input, compressor),
        }
    }

    /// Return a reader over the uncompressed bytes of `stream`.
    ///
    /// # Errors
    /// - `Error::Corrupt`: The stream record is missing required fields.
    /// - `Error::Io`: An I/O error occurred.
    pub fn reader(&self, stream: &Stream) -> crate::Result<Box<dyn Read>> {
        match self {
            Volume::Copy(volume) => volume.reader(stream),
            Volume::Cat(volume) => volume.reader(stream),
        }
    }

    /// Persist this volume.
    ///
    /// This is a no-op when the volume is not modified. For a cat volume it
    /// closes the shared append handle.
    pub fn store(&mut self) -> crate::Result<()> {
        match self {
            Volume::Copy(volume) => volume.store(),
            Volume::Cat(volume) => volume.store(),
        }
    }

    /// Delete this volume's on-disk artifact iff it was modified.
    ///
    /// Unmodified volumes are left untouched. This is safe to call after
    /// partial writes.
    pub fn rollback(&mut self) -> crate::Result<()> {
        match self {
            Volume::Copy(volume) => volume.rollback(),
            Volume::Cat(volume) => volume.rollback(),
        }
    }
}

impl Keyed for Volume {
    fn key(&self) -> &str {
        self.id()
    }
}
