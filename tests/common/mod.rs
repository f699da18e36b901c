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

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs::{create_dir_all, File};
use std::io::Read;
use std::path::Path;

use flate2::read::GzDecoder;
use serde_json::Value;
use sha1::{Digest, Sha1};
use walkdir::WalkDir;

/// The SHA-1 hex digest of the string `hello`.
pub const HELLO_SHA1: &str = "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d";

/// Write `contents` to `path` under `root`, creating parent directories.
pub fn write_file(root: &Path, path: &str, contents: &[u8]) -> anyhow::Result<()> {
    let target = root.join(path);
    if let Some(parent) = target.parent() {
        create_dir_all(parent)?;
    }
    std::fs::write(target, contents)?;
    Ok(())
}

/// Set the mtime of `path` under `root` to the given epoch second.
pub fn set_mtime(root: &Path, path: &str, epoch: i64) -> anyhow::Result<()> {
    filetime::set_file_mtime(root.join(path), filetime::FileTime::from_unix_time(epoch, 0))?;
    Ok(())
}

/// The SHA-1 hex digest of `bytes`.
pub fn sha1_hex(bytes: &[u8]) -> String {
    hex::encode(Sha1::digest(bytes))
}

/// Read and parse the manifest with the given `id` under `repository`.
pub fn read_manifest(repository: &Path, id: &str) -> anyhow::Result<Value> {
    let file = File::open(repository.join(format!("{}.json.gz", id)))?;
    let mut json = String::new();
    GzDecoder::new(file).read_to_string(&mut json)?;
    Ok(serde_json::from_str(&json)?)
}

/// The ids of every manifest under `repository`, sorted ascending.
pub fn manifest_ids(repository: &Path) -> anyhow::Result<Vec<String>> {
    let mut ids = Vec::new();
    for entry in repository.read_dir()? {
        let name = entry?.file_name();
        if let Some(name) = name.to_str() {
            if let Some(id) = name.strip_suffix(".json.gz") {
                ids.push(id.to_owned());
            }
        }
    }
    ids.sort();
    Ok(ids)
}

/// The names of the cat volume files under `repository`, sorted.
pub fn cat_volumes(repository: &Path) -> anyhow::Result<Vec<String>> {
    top_level(repository, |name, file_type| {
        name.ends_with(".cat") && file_type.is_file()
    })
}

/// The names of the copy volume directories under `repository`, sorted.
pub fn copy_volumes(repository: &Path) -> anyhow::Result<Vec<String>> {
    top_level(repository, |_, file_type| file_type.is_dir())
}

fn top_level(
    repository: &Path,
    keep: impl Fn(&str, &std::fs::FileType) -> bool,
) -> anyhow::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in repository.read_dir()? {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            if keep(name, &entry.file_type()?) {
                names.push(name.to_owned());
            }
        }
    }
    names.sort();
    Ok(names)
}

/// Every file under `root` with its contents, keyed by relative path.
///
/// This is used to compare directory trees byte for byte.
pub fn tree_contents(root: &Path) -> anyhow::Result<BTreeMap<String, Vec<u8>>> {
    let mut tree = BTreeMap::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)?
            .to_string_lossy()
            .into_owned();
        tree.insert(relative, std::fs::read(entry.path())?);
    }
    Ok(tree)
}

/// The file record for `path` in a parsed manifest.
pub fn file_record<'a>(manifest: &'a Value, source_id: &str, path: &str) -> &'a Value {
    &manifest["sources"][source_id]["files"][path]
}
