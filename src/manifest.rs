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

//! Snapshot manifests.
//!
//! A manifest is one snapshot's metadata: a gzip-compressed JSON object
//! recording the format version, a per-snapshot session UUID, the snapshot
//! time, and the full file table of every source, including the stream
//! references needed to locate each file's bytes. Manifests are immutable
//! after writing; an incremental snapshot re-serializes unchanged entries
//! with their existing stream references, so every manifest is
//! self-sufficient.

use std::collections::BTreeMap;
use std::fs::{remove_file, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression as GzLevel;
use relative_path::RelativePathBuf;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::id;
use crate::registry::{Keyed, Registry};
use crate::source::{FileEntry, Source};
use crate::volume::{Stream, Volume};

/// The manifest format version this library reads and writes.
const FORMAT_VERSION: u32 = 0;

/// The suffix of manifest files under the repository.
const MANIFEST_SUFFIX: &str = ".json.gz";

/// The serialized form of one file in a source.
///
/// Zero-byte files carry no size, digest, or stream.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    /// The modification time, truncated to whole seconds.
    pub mtime: DateTime<Utc>,

    /// The POSIX file mode.
    pub mode: u32,

    /// The owning user id.
    pub uid: u32,

    /// The owning group id.
    pub gid: u32,

    /// The file size in bytes, omitted when zero.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub size: u64,

    /// The SHA-1 hex digest of the file contents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha1: Option<String>,

    /// The stream holding the file's bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<Stream>,
}

fn is_zero(size: &u64) -> bool {
    *size == 0
}

/// The serialized form of one source.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct SourceRecord {
    /// The absolute root directory of the source.
    pub root: String,

    /// The file records, keyed by relative path.
    pub files: BTreeMap<String, FileRecord>,
}

/// The serialized form of a manifest.
///
/// Unknown top-level keys are ignored when reading.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
struct ManifestData {
    /// The manifest format version.
    version: u32,

    /// The session UUID assigned when the snapshot was created.
    session: Uuid,

    /// The wall-clock time of the snapshot.
    mtime: DateTime<Utc>,

    /// The source records, keyed by source id.
    sources: BTreeMap<String, SourceRecord>,
}

/// One snapshot's metadata.
#[derive(Debug)]
pub struct Manifest {
    /// The snapshot identifier, a base-36 centisecond token.
    id: String,

    data: ManifestData,

    /// Whether this manifest was created during this session.
    new: bool,

    /// Whether this manifest's file exists on disk from this session.
    modified: bool,
}

impl Manifest {
    /// Create a new manifest from the current state of `sources`.
    ///
    /// The manifest is assigned a fresh session UUID and a time-derived
    /// identifier. Unchanged file entries are serialized with their
    /// existing stream references.
    pub fn create(sources: &Registry<Source>, now: DateTime<Utc>) -> Self {
        let records = sources
            .iter()
            .map(|source| {
                let files = source
                    .files()
                    .iter()
                    .map(|file| (file.path().as_str().to_owned(), file_record(file)))
                    .collect();
                let record = SourceRecord {
                    root: source.root().to_string_lossy().into_owned(),
                    files,
                };
                (source.id().to_owned(), record)
            })
            .collect();

        Manifest {
            id: id::time_token(now),
            data: ManifestData {
                version: FORMAT_VERSION,
                session: Uuid::new_v4(),
                mtime: now,
                sources: records,
            },
            new: true,
            modified: false,
        }
    }

    /// Read and parse the manifest with the given `id` under `repository`.
    ///
    /// Loading only parses the snapshot tree; it does not touch any
    /// registry. Use [`Manifest::upload`] to apply the tree to a session.
    ///
    /// # Errors
    /// - `Error::NotFound`: No manifest with this id exists.
    /// - `Error::UnsupportedVersion`: The format version is not supported.
    /// - `Error::Corrupt`: The session UUID is missing or nil.
    /// - `Error::Deserialize`: The JSON or gzip container is malformed.
    pub fn load(repository: &Path, id: &str) -> crate::Result<Self> {
        let file = match File::open(manifest_path(repository, id)) {
            Ok(file) => file,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                return Err(crate::Error::NotFound);
            }
            Err(error) => return Err(error.into()),
        };

        let data: ManifestData = serde_json::from_reader(GzDecoder::new(file))
            .map_err(|_| crate::Error::Deserialize)?;

        if data.version != FORMAT_VERSION {
            return Err(crate::Error::UnsupportedVersion);
        }
        if data.session.is_nil() {
            return Err(crate::Error::Corrupt);
        }

        Ok(Manifest {
            id: id.to_owned(),
            data,
            new: false,
            modified: false,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The session UUID assigned when this snapshot was created.
    pub fn session(&self) -> Uuid {
        self.data.session
    }

    /// The wall-clock time of this snapshot.
    pub fn mtime(&self) -> DateTime<Utc> {
        self.data.mtime
    }

    /// The source records of this snapshot, keyed by source id.
    pub fn sources(&self) -> &BTreeMap<String, SourceRecord> {
        &self.data.sources
    }

    /// Whether this manifest was created during this session.
    pub fn is_new(&self) -> bool {
        self.new
    }

    /// Whether this manifest's file exists on disk from this session.
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Apply this manifest's tree to the session registries.
    ///
    /// Sources and their file entries (with stream references) are created
    /// through the identity maps, and every referenced volume is opened
    /// read-only.
    pub(crate) fn upload(
        &self,
        sources: &mut Registry<Source>,
        volumes: &mut Registry<Volume>,
        repository: &Path,
    ) {
        for (source_id, record) in &self.data.sources {
            let source = sources.insert_or_get(Source::from_parts(
                source_id.clone(),
                PathBuf::from(&record.root),
            ));

            for (path, file) in &record.files {
                let entry = FileEntry::from_parts(
                    RelativePathBuf::from(path.clone()),
                    file.mtime,
                    file.size,
                    file.mode,
                    file.uid,
                    file.gid,
                    file.sha1.clone(),
                    file.stream.clone(),
                );
                source.files_mut().insert_or_get(entry);
            }
        }

        for record in self.data.sources.values() {
            for file in record.files.values() {
                if let Some(stream) = &file.stream {
                    volumes.insert_or_get(Volume::load(repository, &stream.volume));
                }
            }
        }
    }

    /// Write this manifest to `<id>.json.gz` under `repository`.
    ///
    /// The write refuses to overwrite an existing file, and is a no-op
    /// under dry-run.
    ///
    /// # Errors
    /// - `Error::ReadOnly`: This manifest was loaded, not created.
    /// - `Error::AlreadyExists`: A manifest with this id already exists.
    /// - `Error::Serialize`: The snapshot tree could not be serialized.
    /// - `Error::Io`: An I/O error occurred.
    pub fn store(&mut self, repository: &Path, dry_run: bool) -> crate::Result<()> {
        if !self.new {
            return Err(crate::Error::ReadOnly);
        }
        if dry_run {
            return Ok(());
        }

        let file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(manifest_path(repository, &self.id))
        {
            Ok(file) => file,
            Err(error) if error.kind() == io::ErrorKind::AlreadyExists => {
                return Err(crate::Error::AlreadyExists);
            }
            Err(error) => return Err(error.into()),
        };
        self.modified = true;

        let mut encoder = GzEncoder::new(file, GzLevel::default());
        serde_json::to_writer_pretty(&mut encoder, &self.data)
            .map_err(|_| crate::Error::Serialize)?;
        let mut file = encoder.finish()?;
        file.flush()?;

        Ok(())
    }

    /// Delete the on-disk manifest iff it was written this session.
    pub fn rollback(&mut self, repository: &Path, dry_run: bool) -> crate::Result<()> {
        if !self.modified || dry_run {
            return Ok(());
        }

        match remove_file(manifest_path(repository, &self.id)) {
            Err(error) if error.kind() != io::ErrorKind::NotFound => Err(error.into()),
            _ => {
                self.modified = false;
                Ok(())
            }
        }
    }
}

impl Keyed for Manifest {
    fn key(&self) -> &str {
        &self.id
    }
}

/// The path of the manifest file with the given `id`.
fn manifest_path(repository: &Path, id: &str) -> PathBuf {
    repository.join(format!("{}{}", id, MANIFEST_SUFFIX))
}

/// Serialize one file entry to its manifest record.
fn file_record(file: &FileEntry) -> FileRecord {
    FileRecord {
        mtime: file.mtime(),
        mode: file.mode(),
        uid: file.uid(),
        gid: file.gid(),
        size: file.size(),
        sha1: file.sha1().map(str::to_owned),
        stream: file.stream().cloned(),
    }
}

/// List the ids of every manifest under `repository`, sorted ascending.
pub(crate) fn list_ids(repository: &Path) -> crate::Result<Vec<String>> {
    let mut ids = Vec::new();
    for entry in repository.read_dir()? {
        let name = entry?.file_name();
        if let Some(name) = name.to_str() {
            if let Some(id) = name.strip_suffix(MANIFEST_SUFFIX) {
                ids.push(id.to_owned());
            }
        }
    }
    ids.sort();
    Ok(ids)
}

/// The lexicographically greatest manifest id under `repository`, if any.
pub(crate) fn latest_id(repository: &Path) -> crate::Result<Option<String>> {
    Ok(list_ids(repository)?.pop())
}
