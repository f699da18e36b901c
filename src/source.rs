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

//! Source directories and their file tables.
//!
//! A [`Source`] binds a root directory to the set of regular files known
//! from the latest snapshot. [`Source::update`] rescans the root and diffs
//! the result against the known table: unchanged files keep their SHA-1 and
//! stream reference so their bytes are never re-read, while new, touched,
//! and deleted files mark the source as modified.

use std::fs::Metadata;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::warn;
use relative_path::{RelativePath, RelativePathBuf};
use walkdir::WalkDir;

use crate::id;
use crate::registry::{Keyed, Registry};
use crate::volume::Stream;

/// A regular file inside a source.
///
/// Two entries with equal relative paths are the same entity across
/// snapshots. The modification time is truncated to whole seconds to
/// tolerate filesystems with coarse timestamps.
#[derive(Debug, Clone)]
pub struct FileEntry {
    /// The file path relative to the source root.
    path: RelativePathBuf,

    /// The modification time, truncated to whole seconds.
    mtime: DateTime<Utc>,

    /// The file size in bytes.
    size: u64,

    /// The POSIX file mode.
    mode: u32,

    /// The owning user id.
    uid: u32,

    /// The owning group id.
    gid: u32,

    /// The SHA-1 hex digest of the file contents, set when a stream is
    /// attached. Zero-byte files never carry a digest.
    sha1: Option<String>,

    /// The stream holding this file's bytes, if it has been backed up.
    stream: Option<Stream>,

    /// Whether this file was seen by the current scan.
    live: bool,
}

impl FileEntry {
    /// Create an entry for a freshly scanned file.
    fn new(path: RelativePathBuf, metadata: &Metadata) -> Self {
        let (mtime, mode, uid, gid) = stat(metadata);
        FileEntry {
            path,
            mtime: DateTime::from_timestamp(mtime, 0).unwrap_or_default(),
            size: metadata.len(),
            mode,
            uid,
            gid,
            sha1: None,
            stream: None,
            live: false,
        }
    }

    /// Reconstruct an entry from a loaded manifest record.
    pub(crate) fn from_parts(
        path: RelativePathBuf,
        mtime: DateTime<Utc>,
        size: u64,
        mode: u32,
        uid: u32,
        gid: u32,
        sha1: Option<String>,
        stream: Option<Stream>,
    ) -> Self {
        FileEntry {
            path,
            mtime,
            size,
            mode,
            uid,
            gid,
            sha1,
            stream,
            live: false,
        }
    }

    pub fn path(&self) -> &RelativePath {
        &self.path
    }

    pub fn mtime(&self) -> DateTime<Utc> {
        self.mtime
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn mode(&self) -> u32 {
        self.mode
    }

    pub fn uid(&self) -> u32 {
        self.uid
    }

    pub fn gid(&self) -> u32 {
        self.gid
    }

    pub fn sha1(&self) -> Option<&str> {
        self.sha1.as_deref()
    }

    pub fn stream(&self) -> Option<&Stream> {
        self.stream.as_ref()
    }

    /// Whether this file still needs its bytes backed up.
    pub fn needs_backup(&self) -> bool {
        self.size > 0 && self.stream.is_none()
    }

    /// Attach the stream holding this file's bytes.
    ///
    /// # Errors
    /// - `Error::StreamAttached`: A stream is already attached.
    pub(crate) fn attach_stream(&mut self, stream: Stream) -> crate::Result<()> {
        if self.stream.is_some() {
            return Err(crate::Error::StreamAttached);
        }
        self.sha1 = Some(stream.sha1.clone());
        self.stream = Some(stream);
        Ok(())
    }

    /// Apply this entry's mode, ownership, and mtime to the file at `path`.
    ///
    /// `EPERM` from changing ownership is ignored so a restore by an
    /// unprivileged user can still succeed.
    #[cfg(unix)]
    pub(crate) fn apply_metadata(&self, path: &Path) -> std::io::Result<()> {
        use std::fs::set_permissions;
        use std::os::unix::fs::PermissionsExt;

        use filetime::{set_file_mtime, FileTime};
        use nix::unistd::{chown, Gid, Uid};

        set_permissions(path, PermissionsExt::from_mode(self.mode))?;
        match chown(path, Some(Uid::from_raw(self.uid)), Some(Gid::from_raw(self.gid))) {
            Err(nix::errno::Errno::EPERM) => (),
            Err(error) => {
                return Err(std::io::Error::new(std::io::ErrorKind::Other, error));
            }
            Ok(()) => (),
        }
        set_file_mtime(path, FileTime::from_unix_time(self.mtime.timestamp(), 0))?;

        Ok(())
    }

    #[cfg(not(unix))]
    pub(crate) fn apply_metadata(&self, _path: &Path) -> std::io::Result<()> {
        Ok(())
    }
}

impl Keyed for FileEntry {
    fn key(&self) -> &str {
        self.path.as_str()
    }
}

/// A source root directory and its table of known files.
#[derive(Debug)]
pub struct Source {
    /// The stable identifier derived from the root path.
    id: String,

    /// The absolute root directory.
    root: PathBuf,

    /// The known files, keyed by relative path.
    files: Registry<FileEntry>,

    /// Whether this source changed since the base snapshot.
    modified: bool,
}

impl Source {
    /// Create a source for the directory at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Source {
            id: id::source_id(&root),
            root,
            files: Registry::new(),
            modified: false,
        }
    }

    /// Reconstruct a source from a loaded manifest record.
    pub(crate) fn from_parts(id: String, root: PathBuf) -> Self {
        Source {
            id,
            root,
            files: Registry::new(),
            modified: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn files(&self) -> &Registry<FileEntry> {
        &self.files
    }

    pub(crate) fn files_mut(&mut self) -> &mut Registry<FileEntry> {
        &mut self.files
    }

    /// Whether this source changed since the base snapshot.
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// The absolute path of the file at `path` within this source.
    pub fn absolute_path(&self, path: &RelativePath) -> PathBuf {
        path.to_path(&self.root)
    }

    /// Rescan the root directory and update the file table.
    ///
    /// Every file found on disk is marked live; files remembered from the
    /// previous snapshot but no longer present are dropped. A file whose
    /// on-disk mtime is strictly newer than the stored one is replaced with
    /// a fresh entry (losing its stream reference, so it will be backed up
    /// again); a file whose metadata changed without touching the mtime
    /// borrows the new mode/uid/gid. Unchanged files keep their SHA-1 and
    /// stream reference.
    ///
    /// # Errors
    /// - `Error::NotFound`: The root directory does not exist.
    /// - `Error::NotDirectory`: The root path is not a directory.
    pub fn update(&mut self) -> crate::Result<()> {
        if !self.root.exists() {
            return Err(crate::Error::NotFound);
        }
        if !self.root.is_dir() {
            return Err(crate::Error::NotDirectory);
        }

        for file in self.files.iter_mut() {
            file.live = false;
        }

        let root = self.root.clone();
        let mut modified = self.modified;
        let files = &mut self.files;

        scan(&root, |path, metadata| {
            match files.get_mut(path.as_str()) {
                None => {
                    let mut entry = FileEntry::new(path, metadata);
                    entry.live = true;
                    files.insert_or_get(entry);
                    modified = true;
                }
                Some(existing) => {
                    let (mtime, mode, uid, gid) = stat(metadata);
                    if mtime > existing.mtime.timestamp() {
                        let mut entry = FileEntry::new(path, metadata);
                        entry.live = true;
                        files.force_replace(entry);
                        modified = true;
                    } else {
                        if (existing.mode, existing.uid, existing.gid) != (mode, uid, gid) {
                            existing.mode = mode;
                            existing.uid = uid;
                            existing.gid = gid;
                            modified = true;
                        }
                        existing.live = true;
                    }
                }
            }
        });

        let removed = self.files.retain(|file| file.live);
        if removed > 0 {
            modified = true;
        }
        self.modified = modified;

        Ok(())
    }
}

impl Keyed for Source {
    fn key(&self) -> &str {
        &self.id
    }
}

/// Visit every regular file reachable from `root`.
///
/// Directories are descended in OS directory order. Symbolic links are
/// followed only when they resolve to regular files within the root.
/// Unreadable files and directories are logged and skipped; they do not
/// abort the scan.
fn scan(root: &Path, mut visit: impl FnMut(RelativePathBuf, &Metadata)) {
    for result in WalkDir::new(root) {
        let entry = match result {
            Ok(entry) => entry,
            Err(error) => {
                warn!("skipping unreadable path: {}", error);
                continue;
            }
        };

        let metadata = if entry.file_type().is_symlink() {
            // Follow the link, but only record targets that are regular
            // files inside the root.
            match entry.path().metadata() {
                Ok(metadata) if metadata.is_file() => {
                    match entry.path().canonicalize() {
                        Ok(target) if target_within(&target, root) => metadata,
                        Ok(_) => continue,
                        Err(error) => {
                            warn!("skipping unresolvable link `{}`: {}", entry.path().display(), error);
                            continue;
                        }
                    }
                }
                Ok(_) => continue,
                Err(error) => {
                    warn!("skipping broken link `{}`: {}", entry.path().display(), error);
                    continue;
                }
            }
        } else if entry.file_type().is_file() {
            match entry.metadata() {
                Ok(metadata) => metadata,
                Err(error) => {
                    warn!("skipping unreadable file `{}`: {}", entry.path().display(), error);
                    continue;
                }
            }
        } else {
            continue;
        };

        let relative = entry.path().strip_prefix(root).unwrap();
        let relative = match RelativePathBuf::from_path(relative) {
            Ok(relative) => relative,
            Err(_) => {
                warn!("skipping non-UTF-8 path `{}`", entry.path().display());
                continue;
            }
        };

        visit(relative, &metadata);
    }
}

/// Whether a resolved link target lies within the source root.
fn target_within(target: &Path, root: &Path) -> bool {
    match root.canonicalize() {
        Ok(root) => target.starts_with(root),
        Err(_) => false,
    }
}

#[cfg(unix)]
fn stat(metadata: &Metadata) -> (i64, u32, u32, u32) {
    use std::os::unix::fs::MetadataExt;

    (metadata.mtime(), metadata.mode(), metadata.uid(), metadata.gid())
}

#[cfg(not(unix))]
fn stat(metadata: &Metadata) -> (i64, u32, u32, u32) {
    use std::time::UNIX_EPOCH;

    let mtime = metadata
        .modified()
        .ok()
        .and_then(|modified| modified.duration_since(UNIX_EPOCH).ok())
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or(0);
    (mtime, 0, 0, 0)
}
