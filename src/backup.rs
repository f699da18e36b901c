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

//! The backup orchestrator.
//!
//! A backup loads the latest manifest, rescans every source root against
//! the reconstructed file tables, plans which changed files go to the cat
//! volume and which to the copy volume, streams their bytes, and writes a
//! new manifest. Any failure after volumes were created rolls back every
//! artifact written this session and surfaces the original error.

use std::fs::File;
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use log::{debug, error, info};
use relative_path::RelativePathBuf;

use crate::id;
use crate::manifest::Manifest;
use crate::project::{CompressionPolicy, Project, VolumePolicy};
use crate::source::Source;
use crate::volume::{compressed_size, is_compressible, CatVolume, Compressor, CopyVolume, Volume};

/// The maximum cumulative expected compressed size of the cat bucket.
const CAT_TOTAL_MAX: u64 = 1 << 30;

/// The maximum expected compressed size of a single cat-bucket file.
const CAT_FILE_MAX: u64 = 1 << 20;

/// One file which needs its bytes backed up.
#[derive(Debug, Clone)]
struct Candidate {
    /// The id of the source holding the file.
    source: String,

    /// The file path relative to the source root.
    path: RelativePathBuf,

    /// The file size in bytes.
    size: u64,

    /// The expected compressed size in bytes.
    weight: u64,
}

/// The assignment of candidates to volumes.
#[derive(Debug, Default)]
struct Plan {
    cat: Vec<Candidate>,
    copy: Vec<Candidate>,
}

/// Split `candidates` into cat and copy buckets.
///
/// Under the automatic policy, candidates are sorted ascending by expected
/// compressed size and accumulated into the cat bucket while the cumulative
/// total stays under 1 GiB and each file stays under 1 MiB; the first file
/// to fail either bound, and every file after it, goes to the copy bucket.
/// A cat bucket holding a single file is folded into the copy bucket so no
/// one-stream cat volume is ever created.
fn plan(mut candidates: Vec<Candidate>, policy: VolumePolicy) -> Plan {
    let mut plan = Plan::default();

    match policy {
        VolumePolicy::Copy => plan.copy = candidates,
        VolumePolicy::Cat => plan.cat = candidates,
        VolumePolicy::Auto => {
            candidates.sort_by_key(|candidate| candidate.weight);

            let mut total = 0u64;
            let mut rest = candidates.into_iter();
            for candidate in rest.by_ref() {
                if total + candidate.weight < CAT_TOTAL_MAX && candidate.weight < CAT_FILE_MAX {
                    total += candidate.weight;
                    plan.cat.push(candidate);
                } else {
                    plan.copy.push(candidate);
                    break;
                }
            }
            plan.copy.extend(rest);

            if plan.cat.len() == 1 {
                plan.copy.insert(0, plan.cat.remove(0));
            }
        }
    }

    plan
}

/// The artifacts created by an in-flight backup, for rollback.
#[derive(Debug, Default)]
struct BackupTxn {
    manifest: Option<String>,
    cat: Option<String>,
    copy: Option<String>,
}

impl Project {
    /// Back up the given source `roots` and return the new manifest id.
    ///
    /// Unless `full` is set, the snapshot is incremental over the latest
    /// manifest in the repository: unchanged files keep their existing
    /// stream references and their bytes are not re-read. On any error
    /// after volumes were created, every artifact written this session is
    /// rolled back (rollback failures are logged and suppressed) and the
    /// original error is returned.
    ///
    /// # Errors
    /// - `Error::NotFound`: A source root does not exist.
    /// - `Error::NotDirectory`: A source root is not a directory.
    /// - `Error::UnsupportedVersion`, `Error::Corrupt`,
    ///   `Error::Deserialize`: The base manifest could not be loaded.
    /// - `Error::AlreadyExists`: An output file unexpectedly pre-exists.
    /// - `Error::Io`: An I/O error occurred.
    pub fn backup(&mut self, roots: &[PathBuf], full: bool) -> crate::Result<String> {
        let mut txn = BackupTxn::default();
        match self.backup_inner(roots, full, &mut txn) {
            Ok(id) => Ok(id),
            Err(backup_error) => {
                self.rollback_backup(&txn);
                Err(backup_error)
            }
        }
    }

    fn backup_inner(
        &mut self,
        roots: &[PathBuf],
        full: bool,
        txn: &mut BackupTxn,
    ) -> crate::Result<String> {
        if !full {
            if let Some(base_id) = self.latest_manifest_id()? {
                debug!("loading base manifest {}", base_id);
                let base = Manifest::load(&self.path, &base_id)?;
                base.upload(&mut self.sources, &mut self.volumes, &self.path);
                self.manifests.insert_or_get(base);
            }
        }

        for root in roots {
            let source = self.sources.insert_or_get(Source::new(root.clone()));
            debug!("scanning source {} at `{}`", source.id(), root.display());
            source.update()?;
        }

        let mut candidates = Vec::new();
        for source in self.sources.iter() {
            for file in source.files().iter() {
                if file.needs_backup() {
                    candidates.push(Candidate {
                        source: source.id().to_owned(),
                        path: file.path().to_owned(),
                        size: file.size(),
                        weight: compressed_size(file.path(), file.size()),
                    });
                }
            }
        }
        info!("{} files to back up", candidates.len());

        let plan = plan(candidates, self.config.volume_policy);
        debug!(
            "planned {} cat streams and {} copy streams",
            plan.cat.len(),
            plan.copy.len()
        );

        let dry_run = self.config.dry_run;
        if !plan.cat.is_empty() {
            let token = self.fresh_token();
            let volume = Volume::Cat(CatVolume::create(&self.path, token, dry_run));
            txn.cat = Some(volume.id().to_owned());
            self.volumes.insert_or_get(volume);
        }
        if !plan.copy.is_empty() {
            let token = self.fresh_token();
            let obfuscate = self.config.obfuscate;
            let volume = Volume::Copy(CopyVolume::create(&self.path, token, obfuscate, dry_run));
            txn.copy = Some(volume.id().to_owned());
            self.volumes.insert_or_get(volume);
        }

        for (bucket, volume_id) in [(&plan.cat, &txn.cat), (&plan.copy, &txn.copy)] {
            let volume_id = match volume_id {
                Some(volume_id) => volume_id.clone(),
                None => continue,
            };
            for candidate in bucket {
                self.write_candidate(candidate, &volume_id)?;
            }
        }

        for volume_id in [&txn.cat, &txn.copy].into_iter().flatten() {
            if let Some(volume) = self.volumes.get_mut(volume_id) {
                volume.store()?;
            }
        }

        let manifest = Manifest::create(&self.sources, self.fresh_instant());
        txn.manifest = Some(manifest.id().to_owned());
        let manifest = self.manifests.insert_or_get(manifest);
        manifest.store(&self.path, dry_run)?;
        info!("stored manifest {}", manifest.id());

        Ok(manifest.id().to_owned())
    }

    /// Stream one candidate file into the volume with the given id.
    fn write_candidate(&mut self, candidate: &Candidate, volume_id: &str) -> crate::Result<()> {
        let source = self
            .sources
            .get(&candidate.source)
            .ok_or(crate::Error::NotFound)?;
        let absolute = source.absolute_path(&candidate.path);

        let compressor = match self.config.compression_policy {
            CompressionPolicy::Auto => is_compressible(&candidate.path, candidate.size)
                .then_some(Compressor::Gzip),
            CompressionPolicy::Enforce => Some(Compressor::Gzip),
            CompressionPolicy::Disable => None,
        };

        let mut reader = File::open(&absolute)?;
        let volume = self
            .volumes
            .get_mut(volume_id)
            .ok_or(crate::Error::NotFound)?;
        let stream = volume.write_stream(&candidate.source, &candidate.path, &mut reader, compressor)?;
        drop(reader);

        let source = self
            .sources
            .get_mut(&candidate.source)
            .ok_or(crate::Error::NotFound)?;
        let file = source
            .files_mut()
            .get_mut(candidate.path.as_str())
            .ok_or(crate::Error::NotFound)?;
        file.attach_stream(stream)
    }

    /// Roll back the artifacts created by a failed backup.
    ///
    /// The manifest goes first, then the cat volume, then the copy volume.
    /// Individual rollback failures are logged and suppressed so the
    /// original backup error is what surfaces to the caller.
    fn rollback_backup(&mut self, txn: &BackupTxn) {
        let dry_run = self.config.dry_run;

        if let Some(manifest_id) = &txn.manifest {
            if let Some(manifest) = self.manifests.get_mut(manifest_id) {
                if let Err(rollback_error) = manifest.rollback(&self.path, dry_run) {
                    error!(
                        "failed to roll back manifest {}: {}",
                        manifest_id, rollback_error
                    );
                }
            }
        }

        for volume_id in [&txn.cat, &txn.copy].into_iter().flatten() {
            if let Some(volume) = self.volumes.get_mut(volume_id) {
                if let Err(rollback_error) = volume.rollback() {
                    error!("failed to roll back volume {}: {}", volume_id, rollback_error);
                }
            }
        }
    }

    /// Return an instant whose token is unused by any artifact in the
    /// repository.
    ///
    /// Centisecond resolution can collide when snapshots are taken in quick
    /// succession; colliding instants are advanced by one tick.
    fn fresh_instant(&self) -> DateTime<Utc> {
        let mut instant = Utc::now();
        loop {
            let token = id::time_token(instant);
            let taken = self.manifests.contains(&token)
                || self.path.join(&token).exists()
                || self.path.join(format!("{}.cat", token)).exists()
                || self.path.join(format!("{}.json.gz", token)).exists();
            if !taken {
                return instant;
            }
            instant += Duration::milliseconds(10);
        }
    }

    /// Return a time-derived token unused by any artifact in the repository.
    fn fresh_token(&self) -> String {
        id::time_token(self.fresh_instant())
    }
}
