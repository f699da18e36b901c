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

use std::fs::remove_file;
use std::path::Path;

use matches::assert_matches;
use tempfile::tempdir;

use rockup::{Project, ProjectConfig, VolumePolicy};

use common::{
    cat_volumes, copy_volumes, file_record, manifest_ids, read_manifest, sha1_hex, tree_contents,
    write_file, HELLO_SHA1,
};

mod common;

const T0: i64 = 1_600_000_000;

/// Back up `source` into `repository` with the given config.
fn backup(repository: &Path, source: &Path, full: bool, config: ProjectConfig) -> rockup::Result<String> {
    let mut project = Project::open(repository, config)?;
    project.backup(&[source.to_path_buf()], full)
}

/// Create the standard fixture: two small text files and one large binary.
fn standard_source(source: &Path) -> anyhow::Result<()> {
    write_file(source, "a.txt", b"hello")?;
    write_file(source, "c.txt", b"a slightly longer text file")?;
    write_file(source, "b.bin", &vec![0u8; 2 * 1024 * 1024])?;
    common::set_mtime(source, "a.txt", T0)?;
    common::set_mtime(source, "c.txt", T0)?;
    common::set_mtime(source, "b.bin", T0)?;
    Ok(())
}

#[test]
fn first_backup_splits_small_and_large_files() -> anyhow::Result<()> {
    let repository = tempdir()?;
    let source = tempdir()?;
    standard_source(source.path())?;

    let manifest_id = backup(
        repository.path(),
        source.path(),
        true,
        ProjectConfig::default(),
    )?;

    assert_eq!(manifest_ids(repository.path())?, vec![manifest_id.clone()]);
    let cats = cat_volumes(repository.path())?;
    let copies = copy_volumes(repository.path())?;
    assert_eq!(cats.len(), 1);
    assert_eq!(copies.len(), 1);

    let manifest = read_manifest(repository.path(), &manifest_id)?;
    assert_eq!(manifest["version"], 0);
    assert!(!manifest["session"].as_str().unwrap().is_empty());

    let sources = manifest["sources"].as_object().unwrap();
    assert_eq!(sources.len(), 1);
    let source_id = sources.keys().next().unwrap().clone();

    // The small text files go to the cat volume, addressed by offset.
    let small = file_record(&manifest, &source_id, "a.txt");
    assert_eq!(small["sha1"].as_str().unwrap(), HELLO_SHA1);
    assert_eq!(small["size"], 5);
    assert_eq!(small["stream"]["volume"].as_str().unwrap(), cats[0]);
    assert!(small["stream"]["offset"].is_u64());
    assert!(small["stream"]["size"].is_u64());
    // Five bytes are not worth a gzip container.
    assert!(small["stream"]["compressor"].is_null());

    // The large binary goes to the copy volume, addressed by name.
    let large = file_record(&manifest, &source_id, "b.bin");
    assert_eq!(large["size"], 2 * 1024 * 1024);
    assert_eq!(
        large["sha1"].as_str().unwrap(),
        sha1_hex(&vec![0u8; 2 * 1024 * 1024])
    );
    assert_eq!(large["stream"]["volume"].as_str().unwrap(), copies[0]);
    assert_eq!(large["stream"]["compressor"].as_str().unwrap(), "gzip");
    let stream_name = large["stream"]["name"].as_str().unwrap();
    assert_eq!(stream_name, format!("{}/b.bin", source_id));
    assert!(repository
        .path()
        .join(&copies[0])
        .join(format!("{}.gz", stream_name))
        .exists());

    Ok(())
}

#[test]
fn rerun_without_changes_writes_manifest_only() -> anyhow::Result<()> {
    let repository = tempdir()?;
    let source = tempdir()?;
    standard_source(source.path())?;

    let first = backup(
        repository.path(),
        source.path(),
        true,
        ProjectConfig::default(),
    )?;
    let volumes_before = (
        cat_volumes(repository.path())?,
        copy_volumes(repository.path())?,
    );

    let second = backup(
        repository.path(),
        source.path(),
        false,
        ProjectConfig::default(),
    )?;

    assert_ne!(first, second);
    assert_eq!(manifest_ids(repository.path())?.len(), 2);

    // No new volume files appear on disk.
    let volumes_after = (
        cat_volumes(repository.path())?,
        copy_volumes(repository.path())?,
    );
    assert_eq!(volumes_before, volumes_after);

    // The file tables are identical; only the session and time differ.
    let first_manifest = read_manifest(repository.path(), &first)?;
    let second_manifest = read_manifest(repository.path(), &second)?;
    assert_eq!(first_manifest["sources"], second_manifest["sources"]);
    assert_ne!(first_manifest["session"], second_manifest["session"]);

    Ok(())
}

#[test]
fn deleted_file_is_dropped_but_old_volume_remains() -> anyhow::Result<()> {
    let repository = tempdir()?;
    let source = tempdir()?;
    standard_source(source.path())?;

    let first = backup(
        repository.path(),
        source.path(),
        true,
        ProjectConfig::default(),
    )?;
    let first_manifest = read_manifest(repository.path(), &first)?;
    let source_id = first_manifest["sources"]
        .as_object()
        .unwrap()
        .keys()
        .next()
        .unwrap()
        .clone();
    let old_volume = first_manifest["sources"][&source_id]["files"]["b.bin"]["stream"]["volume"]
        .as_str()
        .unwrap()
        .to_owned();

    remove_file(source.path().join("a.txt"))?;
    let second = backup(
        repository.path(),
        source.path(),
        false,
        ProjectConfig::default(),
    )?;

    let second_manifest = read_manifest(repository.path(), &second)?;
    let files = second_manifest["sources"][&source_id]["files"]
        .as_object()
        .unwrap();
    assert!(!files.contains_key("a.txt"));

    // The survivor still references the first snapshot's volume, which is
    // not deleted.
    assert_eq!(
        files["b.bin"]["stream"]["volume"].as_str().unwrap(),
        old_volume
    );
    assert!(repository.path().join(&old_volume).exists());

    Ok(())
}

#[test]
fn modified_file_gets_a_new_stream() -> anyhow::Result<()> {
    let repository = tempdir()?;
    let source = tempdir()?;
    standard_source(source.path())?;

    let first = backup(
        repository.path(),
        source.path(),
        true,
        ProjectConfig::default(),
    )?;
    let first_manifest = read_manifest(repository.path(), &first)?;
    let source_id = first_manifest["sources"]
        .as_object()
        .unwrap()
        .keys()
        .next()
        .unwrap()
        .clone();
    let old_volume = first_manifest["sources"][&source_id]["files"]["a.txt"]["stream"]["volume"]
        .as_str()
        .unwrap()
        .to_owned();

    write_file(source.path(), "a.txt", b"HELLO")?;
    common::set_mtime(source.path(), "a.txt", T0 + 10)?;
    let second = backup(
        repository.path(),
        source.path(),
        false,
        ProjectConfig::default(),
    )?;

    let second_manifest = read_manifest(repository.path(), &second)?;
    let record = file_record(&second_manifest, &source_id, "a.txt");
    assert_eq!(record["sha1"].as_str().unwrap(), sha1_hex(b"HELLO"));
    let new_volume = record["stream"]["volume"].as_str().unwrap();
    assert_ne!(new_volume, old_volume);

    // The previous volume persists; older manifests can still restore.
    assert!(repository.path().join(&old_volume).exists());

    Ok(())
}

#[test]
fn single_small_file_is_promoted_to_copy() -> anyhow::Result<()> {
    let repository = tempdir()?;
    let source = tempdir()?;
    write_file(source.path(), "only.txt", b"just one small file")?;

    let manifest_id = backup(
        repository.path(),
        source.path(),
        true,
        ProjectConfig::default(),
    )?;

    // No one-stream cat volume is ever created.
    assert!(cat_volumes(repository.path())?.is_empty());
    assert_eq!(copy_volumes(repository.path())?.len(), 1);

    let manifest = read_manifest(repository.path(), &manifest_id)?;
    let source_id = manifest["sources"]
        .as_object()
        .unwrap()
        .keys()
        .next()
        .unwrap()
        .clone();
    let record = file_record(&manifest, &source_id, "only.txt");
    assert!(record["stream"]["name"].is_string());
    assert!(record["stream"]["offset"].is_null());

    Ok(())
}

#[test]
fn zero_byte_file_has_no_stream() -> anyhow::Result<()> {
    let repository = tempdir()?;
    let source = tempdir()?;
    write_file(source.path(), "empty", b"")?;
    write_file(source.path(), "full.txt", b"some content")?;
    write_file(source.path(), "other.txt", b"other content")?;

    let manifest_id = backup(
        repository.path(),
        source.path(),
        true,
        ProjectConfig::default(),
    )?;

    let manifest = read_manifest(repository.path(), &manifest_id)?;
    let source_id = manifest["sources"]
        .as_object()
        .unwrap()
        .keys()
        .next()
        .unwrap()
        .clone();
    let record = file_record(&manifest, &source_id, "empty");
    assert!(record["size"].is_null());
    assert!(record["sha1"].is_null());
    assert!(record["stream"].is_null());
    assert!(record["mtime"].is_string());

    Ok(())
}

#[test]
fn forced_cat_policy_uses_one_cat_volume() -> anyhow::Result<()> {
    let repository = tempdir()?;
    let source = tempdir()?;
    standard_source(source.path())?;

    let config = ProjectConfig {
        volume_policy: VolumePolicy::Cat,
        ..ProjectConfig::default()
    };
    let manifest_id = backup(repository.path(), source.path(), true, config)?;

    assert_eq!(cat_volumes(repository.path())?.len(), 1);
    assert!(copy_volumes(repository.path())?.is_empty());

    let manifest = read_manifest(repository.path(), &manifest_id)?;
    let source_id = manifest["sources"]
        .as_object()
        .unwrap()
        .keys()
        .next()
        .unwrap()
        .clone();
    for path in ["a.txt", "b.bin", "c.txt"] {
        let record = file_record(&manifest, &source_id, path);
        assert!(record["stream"]["offset"].is_u64(), "{} not in cat", path);
    }

    Ok(())
}

#[test]
fn cat_offsets_are_disjoint_and_increasing() -> anyhow::Result<()> {
    let repository = tempdir()?;
    let source = tempdir()?;
    for index in 0..8 {
        write_file(
            source.path(),
            &format!("file{}.txt", index),
            format!("contents of file number {}", index).as_bytes(),
        )?;
    }

    let config = ProjectConfig {
        volume_policy: VolumePolicy::Cat,
        ..ProjectConfig::default()
    };
    let manifest_id = backup(repository.path(), source.path(), true, config)?;

    let manifest = read_manifest(repository.path(), &manifest_id)?;
    let source_id = manifest["sources"]
        .as_object()
        .unwrap()
        .keys()
        .next()
        .unwrap()
        .clone();

    let mut regions = Vec::new();
    for (_, record) in manifest["sources"][&source_id]["files"].as_object().unwrap() {
        let offset = record["stream"]["offset"].as_u64().unwrap();
        let size = record["stream"]["size"].as_u64().unwrap();
        regions.push((offset, size));
    }
    regions.sort();

    for pair in regions.windows(2) {
        let (offset, size) = pair[0];
        let (next_offset, _) = pair[1];
        assert!(offset + size <= next_offset, "overlapping cat regions");
    }

    Ok(())
}

#[test]
fn missing_source_root_fails_without_artifacts() -> anyhow::Result<()> {
    let repository = tempdir()?;
    let missing = repository.path().join("no-such-source");

    let mut project = Project::open(repository.path(), ProjectConfig::default())?;
    let result = project.backup(&[missing], true);

    assert_matches!(result, Err(rockup::Error::NotFound));
    assert!(manifest_ids(repository.path())?.is_empty());
    assert!(cat_volumes(repository.path())?.is_empty());
    assert!(copy_volumes(repository.path())?.is_empty());

    Ok(())
}

#[test]
fn mid_backup_failure_rolls_back_new_volumes() -> anyhow::Result<()> {
    let repository = tempdir()?;
    let source = tempdir()?;
    standard_source(source.path())?;

    backup(
        repository.path(),
        source.path(),
        true,
        ProjectConfig::default(),
    )?;
    let repository_before = tree_contents(repository.path())?;

    // Two new small files fill a fresh cat volume before the copy bucket
    // is streamed. The large file's stream path grows past NAME_MAX once
    // the `.gz` extension is added, so its copy write fails after the cat
    // volume is already populated.
    let long_name = format!("{}.txt", "x".repeat(250));
    write_file(source.path(), "new-one.txt", b"first new small file")?;
    write_file(source.path(), "new-two.txt", b"second new small file")?;
    write_file(source.path(), &long_name, &vec![0u8; 2 * 1024 * 1024])?;

    let result = backup(
        repository.path(),
        source.path(),
        false,
        ProjectConfig::default(),
    );
    assert_matches!(result, Err(rockup::Error::Io(_)));

    // The new cat volume, copy volume, and manifest are all rolled back;
    // the repository is byte-for-byte what the first backup left.
    assert_eq!(tree_contents(repository.path())?, repository_before);

    Ok(())
}

#[test]
fn missing_repository_fails() {
    let result = Project::open("/no/such/repository", ProjectConfig::default());
    assert_matches!(result, Err(rockup::Error::NotFound));
}

#[test]
fn dry_run_leaves_repository_untouched() -> anyhow::Result<()> {
    let repository = tempdir()?;
    let source = tempdir()?;
    standard_source(source.path())?;

    let config = ProjectConfig {
        dry_run: true,
        ..ProjectConfig::default()
    };
    let manifest_id = backup(repository.path(), source.path(), true, config)?;

    // A snapshot id is reported, but nothing is written.
    assert!(!manifest_id.is_empty());
    assert!(manifest_ids(repository.path())?.is_empty());
    assert!(cat_volumes(repository.path())?.is_empty());
    assert!(copy_volumes(repository.path())?.is_empty());

    Ok(())
}

#[test]
fn obfuscated_streams_hide_file_names() -> anyhow::Result<()> {
    let repository = tempdir()?;
    let source = tempdir()?;
    write_file(source.path(), "secret-name.txt", b"some secret contents here")?;

    let config = ProjectConfig {
        volume_policy: VolumePolicy::Copy,
        obfuscate: true,
        ..ProjectConfig::default()
    };
    let manifest_id = backup(repository.path(), source.path(), true, config)?;

    let manifest = read_manifest(repository.path(), &manifest_id)?;
    let source_id = manifest["sources"]
        .as_object()
        .unwrap()
        .keys()
        .next()
        .unwrap()
        .clone();
    let record = file_record(&manifest, &source_id, "secret-name.txt");
    let name = record["stream"]["name"].as_str().unwrap();

    assert!(!name.contains("secret-name"));
    let (prefix, rest) = name.split_once('/').unwrap();
    assert_eq!(prefix.len(), 2);
    assert!(!rest.is_empty());

    Ok(())
}
