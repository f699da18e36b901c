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

use std::collections::HashSet;
use std::fs::{create_dir_all, remove_dir_all, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use relative_path::RelativePath;

use crate::id;

use super::compress::Compressor;
use super::pipeline::copy_stream;
use super::Stream;

/// A volume which stores each stream as its own file.
///
/// The volume is a directory under the repository named by the volume id.
/// Stream files are placed at `<source-id>/<file-relative-path>`, with a
/// `.gz` extension when compressed. With name obfuscation enabled, streams
/// are instead placed at `xx/yyyy…` from a random base-36 token, re-drawn
/// until unique within the volume.
#[derive(Debug)]
pub struct CopyVolume {
    /// The volume identifier.
    id: String,

    /// The absolute path of the volume directory.
    path: PathBuf,

    /// Whether this volume was created during this session.
    new: bool,

    /// Whether this volume has on-disk changes from this session.
    modified: bool,

    /// Whether stream names are obfuscated.
    obfuscate: bool,

    /// Whether filesystem mutation is suppressed.
    dry_run: bool,

    /// Stream names already assigned within this volume.
    names: HashSet<String>,
}

impl CopyVolume {
    /// Create a new copy volume named `id` under `repository`.
    ///
    /// Nothing is written to disk until the first stream is written.
    pub fn create(repository: &Path, id: String, obfuscate: bool, dry_run: bool) -> Self {
        let path = repository.join(&id);
        CopyVolume {
            id,
            path,
            new: true,
            modified: false,
            obfuscate,
            dry_run,
            names: HashSet::new(),
        }
    }

    /// Open the existing read-only copy volume named `id` under `repository`.
    pub fn load(repository: &Path, id: &str) -> Self {
        CopyVolume {
            id: id.to_owned(),
            path: repository.join(id),
            new: false,
            modified: false,
            obfuscate: false,
            dry_run: false,
            names: HashSet::new(),
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

    /// Assign a name for the next stream of the file at `path` in `source_id`.
    fn stream_name(&mut self, source_id: &str, path: &RelativePath) -> String {
        let name = if self.obfuscate {
            loop {
                // Zero-pad so the token always splits into `xx/yyyy…`.
                let token = format!("{:0>7}", id::random_token());
                let name = format!("{}/{}", &token[..2], &token[2..]);
                if !self.names.contains(&name) {
                    break name;
                }
            }
        } else {
            format!("{}/{}", source_id, path)
        };
        self.names.insert(name.clone());
        name
    }

    /// Write one stream into this volume from `input`.
    ///
    /// The stream file must not already exist.
    ///
    /// # Errors
    /// - `Error::ReadOnly`: This volume was loaded from a previous snapshot.
    /// - `Error::AlreadyExists`: The target stream file already exists.
    /// - `Error::Io`: An I/O error occurred.
    pub fn write_stream(
        &mut self,
        source_id: &str,
        path: &RelativePath,
        input: &mut impl Read,
        compressor: Option<Compressor>,
    ) -> crate::Result<Stream> {
        if !self.new {
            return Err(crate::Error::ReadOnly);
        }

        let name = self.stream_name(source_id, path);
        let target = self.path.join(stream_file(&name, compressor));

        let sink: Box<dyn Write> = if self.dry_run {
            Box::new(io::sink())
        } else {
            if target.exists() {
                return Err(crate::Error::AlreadyExists);
            }
            create_dir_all(target.parent().unwrap())?;
            self.modified = true;
            Box::new(
                OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(&target)?,
            )
        };

        let (_, sha1) = copy_stream(input, sink, compressor)?;

        Ok(Stream {
            name: Some(name),
            volume: self.id.clone(),
            offset: None,
            size: None,
            sha1,
            compressor,
        })
    }

    /// Return a reader over the uncompressed bytes of `stream`.
    pub fn reader(&self, stream: &Stream) -> crate::Result<Box<dyn Read>> {
        let name = stream.name.as_ref().ok_or(crate::Error::Corrupt)?;
        let file = File::open(self.path.join(stream_file(name, stream.compressor)))?;

        Ok(match stream.compressor {
            Some(compressor) => compressor.decompress(file),
            None => Box::new(file),
        })
    }

    /// Persist this volume.
    ///
    /// Stream files are written as streams complete, so there is nothing
    /// left to do here.
    pub fn store(&mut self) -> crate::Result<()> {
        Ok(())
    }

    /// Delete the volume directory iff this volume was modified.
    pub fn rollback(&mut self) -> crate::Result<()> {
        if !self.modified || self.dry_run {
            return Ok(());
        }

        match remove_dir_all(&self.path) {
            Err(error) if error.kind() != io::ErrorKind::NotFound => Err(error.into()),
            _ => {
                self.modified = false;
                Ok(())
            }
        }
    }
}

/// The file name of a stream within the volume directory.
fn stream_file(name: &str, compressor: Option<Compressor>) -> String {
    match compressor {
        Some(Compressor::Gzip) => format!("{}.gz", name),
        None => name.to_owned(),
    }
}
