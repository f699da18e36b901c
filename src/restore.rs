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

//! The restore orchestrator.
//!
//! A restore reconstructs the latest snapshot into an empty destination
//! directory. Every non-empty file is read back through its stream and
//! verified against its recorded SHA-1; a mismatch deletes the partial file
//! and fails the whole restore.

use std::fs::{create_dir_all, remove_file, OpenOptions};
use std::io;
use std::path::Path;

use log::{debug, info, warn};

use crate::manifest::Manifest;
use crate::project::Project;
use crate::volume::HashWriter;

impl Project {
    /// Restore the latest snapshot into `destination`.
    ///
    /// The destination must be an empty directory or absent (it is created).
    /// Each source is restored under `destination/<source-id>/`. Returns
    /// the id of the restored manifest.
    ///
    /// # Errors
    /// - `Error::NotFound`: The repository holds no manifest.
    /// - `Error::NotEmpty`: The destination directory is not empty.
    /// - `Error::NotDirectory`: The destination is not a directory.
    /// - `Error::Integrity`: A restored file failed checksum verification.
    /// - `Error::Corrupt`: The manifest references a missing stream.
    /// - `Error::Io`: An I/O error occurred.
    pub fn restore(&mut self, destination: &Path) -> crate::Result<String> {
        let dry_run = self.config.dry_run;

        if destination.exists() {
            if !destination.is_dir() {
                return Err(crate::Error::NotDirectory);
            }
            if destination.read_dir()?.next().is_some() {
                return Err(crate::Error::NotEmpty);
            }
        } else if !dry_run {
            create_dir_all(destination)?;
        }

        let manifest_id = self.latest_manifest_id()?.ok_or(crate::Error::NotFound)?;
        info!("restoring manifest {}", manifest_id);
        let manifest = Manifest::load(&self.path, &manifest_id)?;
        manifest.upload(&mut self.sources, &mut self.volumes, &self.path);
        self.manifests.insert_or_get(manifest);

        for source in self.sources.iter() {
            let source_dir = destination.join(source.id());
            if dry_run {
                for file in source.files().iter() {
                    debug!("would restore `{}`", file.path());
                }
                continue;
            }
            create_dir_all(&source_dir)?;

            for file in source.files().iter() {
                let target = file.path().to_path(&source_dir);
                if let Some(parent) = target.parent() {
                    create_dir_all(parent)?;
                }

                if file.size() == 0 {
                    OpenOptions::new()
                        .write(true)
                        .create_new(true)
                        .open(&target)?;
                } else {
                    let stream = file.stream().ok_or(crate::Error::Corrupt)?;
                    let volume = self
                        .volumes
                        .get(&stream.volume)
                        .ok_or(crate::Error::Corrupt)?;
                    let mut reader = volume.reader(stream)?;

                    let output = OpenOptions::new()
                        .write(true)
                        .create_new(true)
                        .open(&target)?;
                    let mut writer = HashWriter::new(output);
                    io::copy(&mut reader, &mut writer)?;
                    let (output, sha1) = writer.finish();
                    drop(output);

                    if sha1 != stream.sha1 {
                        if let Err(remove_error) = remove_file(&target) {
                            warn!(
                                "failed to remove corrupt file `{}`: {}",
                                target.display(),
                                remove_error
                            );
                        }
                        return Err(crate::Error::Integrity {
                            path: file.path().as_str().to_owned(),
                        });
                    }
                }

                file.apply_metadata(&target)?;
            }
        }

        Ok(manifest_id)
    }
}
