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

//! `rockup` is an incremental file backup engine.
//!
//! Given one or more source directories and a repository directory, a
//! backup produces a self-describing snapshot: a [`Manifest`] plus one or
//! more volumes holding the byte contents of files that changed since the
//! previous snapshot. A restore reconstructs the latest snapshot into an
//! empty directory, verifying every file against its recorded SHA-1.
//!
//! A session is driven through a [`Project`], which binds a repository
//! directory to the identity registries of sources, volumes, and manifests:
//! - [`Project::backup`] scans the source roots, diffs them against the
//!   latest snapshot, streams changed files into at most one cat volume and
//!   one copy volume, and writes a new manifest. On failure, everything
//!   written this session is rolled back.
//! - [`Project::restore`] rebuilds the latest snapshot under a destination
//!   directory.
//!
//! # Examples
//! ```no_run
//! use rockup::{Project, ProjectConfig};
//!
//! fn main() -> rockup::Result<()> {
//!     let mut project = Project::open("/backups/laptop", ProjectConfig::default())?;
//!     let manifest_id = project.backup(&["/home/user/documents".into()], false)?;
//!     println!("created snapshot {}", manifest_id);
//!     Ok(())
//! }
//! ```
//!
//! # Repository layout
//!
//! Under a repository directory `R`:
//! - `R/<manifest-id>.json.gz` is one gzip-compressed JSON manifest per
//!   snapshot, named by a base-36 centisecond token.
//! - `R/<volume-id>/` is a copy volume: one stream file per backed-up file
//!   at `<source-id>/<relative-path>[.gz]`.
//! - `R/<volume-id>.cat` is a cat volume: every stream concatenated into a
//!   single file, addressed by byte offset and size.
//!
//! [`Manifest`]: crate::manifest::Manifest

#![forbid(unsafe_code)]

pub use error::{Error, Result};
pub use project::{CompressionPolicy, Project, ProjectConfig, VolumePolicy};

mod backup;
mod error;
mod id;
pub mod manifest;
pub mod project;
pub mod registry;
mod restore;
pub mod source;
pub mod volume;
