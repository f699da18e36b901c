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

use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::manifest::{self, Manifest};
use crate::registry::Registry;
use crate::source::Source;
use crate::volume::Volume;

/// The policy for choosing which volume kind receives backed-up files.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Default)]
pub enum VolumePolicy {
    /// Split files between a cat volume and a copy volume by size.
    #[default]
    Auto,

    /// Put every file in a copy volume.
    Copy,

    /// Put every file in a cat volume.
    Cat,
}

impl FromStr for VolumePolicy {
    type Err = crate::Error;

    fn from_str(value: &str) -> crate::Result<Self> {
        match value {
            "auto" => Ok(VolumePolicy::Auto),
            "copy" => Ok(VolumePolicy::Copy),
            "cat" => Ok(VolumePolicy::Cat),
            _ => Err(crate::Error::InvalidPolicy(value.to_owned())),
        }
    }
}

/// The policy for compressing streams.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Default)]
pub enum CompressionPolicy {
    /// Compress a stream when the heuristic expects compression to pay off.
    #[default]
    Auto,

    /// Compress every stream.
    Enforce,

    /// Never compress.
    Disable,
}

impl FromStr for CompressionPolicy {
    type Err = crate::Error;

    fn from_str(value: &str) -> crate::Result<Self> {
        match value {
            "auto" => Ok(CompressionPolicy::Auto),
            "enforce" => Ok(CompressionPolicy::Enforce),
            "disable" => Ok(CompressionPolicy::Disable),
            _ => Err(crate::Error::InvalidPolicy(value.to_owned())),
        }
    }
}

/// The configuration for a backup session.
///
/// This type implements `Default` to provide a reasonable default
/// configuration: automatic volume and compression policies, plain stream
/// names, and a real (non-dry) run.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub struct ProjectConfig {
    /// The volume-type policy.
    pub volume_policy: VolumePolicy,

    /// The compression policy.
    pub compression_policy: CompressionPolicy,

    /// Whether copy-volume stream names are obfuscated.
    pub obfuscate: bool,

    /// Whether every filesystem mutation is suppressed.
    ///
    /// Under dry-run every `store`/`rollback` is a no-op and volume writers
    /// discard their bytes, while planning and checksums still run.
    pub dry_run: bool,
}

/// A backup session against one repository directory.
///
/// A `Project` owns the identity registries for sources, volumes, and
/// manifests. Entities reference each other by string id and resolve
/// through these registries.
#[derive(Debug)]
pub struct Project {
    /// The repository directory.
    pub(crate) path: PathBuf,

    pub(crate) config: ProjectConfig,

    pub(crate) sources: Registry<Source>,
    pub(crate) volumes: Registry<Volume>,
    pub(crate) manifests: Registry<Manifest>,
}

impl Project {
    /// Open a session against the repository directory at `path`.
    ///
    /// # Errors
    /// - `Error::NotFound`: The repository directory does not exist.
    /// - `Error::NotDirectory`: The path is not a directory.
    pub fn open(path: impl Into<PathBuf>, config: ProjectConfig) -> crate::Result<Self> {
        let path = path.into();
        if !path.exists() {
            return Err(crate::Error::NotFound);
        }
        if !path.is_dir() {
            return Err(crate::Error::NotDirectory);
        }

        Ok(Project {
            path,
            config,
            sources: Registry::new(),
            volumes: Registry::new(),
            manifests: Registry::new(),
        })
    }

    /// The repository directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The session configuration.
    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    /// The sources known to this session.
    pub fn sources(&self) -> &Registry<Source> {
        &self.sources
    }

    /// The volumes known to this session.
    pub fn volumes(&self) -> &Registry<Volume> {
        &self.volumes
    }

    /// The manifests known to this session.
    pub fn manifests(&self) -> &Registry<Manifest> {
        &self.manifests
    }

    /// The lexicographically greatest manifest id in the repository.
    pub fn latest_manifest_id(&self) -> crate::Result<Option<String>> {
        manifest::latest_id(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policies_parse_from_strings() {
        assert_eq!("auto".parse::<VolumePolicy>().unwrap(), VolumePolicy::Auto);
        assert_eq!("cat".parse::<VolumePolicy>().unwrap(), VolumePolicy::Cat);
        assert_eq!(
            "enforce".parse::<CompressionPolicy>().unwrap(),
            CompressionPolicy::Enforce
        );
        assert!(matches!(
            "gzip".parse::<CompressionPolicy>(),
            Err(crate::Error::InvalidPolicy(_))
        ));
    }
}
