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

use std::io;
use std::result;

use thiserror::Error as DeriveError;

/// The error type for operations with a backup repository.
#[derive(Debug, DeriveError)]
#[non_exhaustive]
pub enum Error {
    /// A resource already exists.
    #[error("A resource already exists.")]
    AlreadyExists,

    /// A resource was not found.
    #[error("A resource was not found.")]
    NotFound,

    /// The directory is not empty.
    #[error("The directory is not empty.")]
    NotEmpty,

    /// The path is not a directory.
    #[error("The path is not a directory.")]
    NotDirectory,

    /// The given string is not a valid policy value.
    #[error("`{0}` is not a valid policy value.")]
    InvalidPolicy(String),

    /// This manifest format is not supported by this version of the library.
    #[error("This manifest format is not supported by this version of the library.")]
    UnsupportedVersion,

    /// The manifest is corrupt.
    #[error("The manifest is corrupt.")]
    Corrupt,

    /// A value could not be serialized.
    #[error("A value could not be serialized.")]
    Serialize,

    /// A value could not be deserialized.
    #[error("A value could not be deserialized.")]
    Deserialize,

    /// A restored file did not match its recorded checksum.
    #[error("The restored file `{path}` does not match its recorded checksum.")]
    Integrity {
        /// The relative path of the file which failed verification.
        path: String,
    },

    /// A stream is already attached to this file.
    #[error("A stream is already attached to this file.")]
    StreamAttached,

    /// The volume or manifest was loaded from a previous snapshot and cannot be modified.
    #[error("The resource was loaded from a previous snapshot and cannot be modified.")]
    ReadOnly,

    /// An I/O error occurred.
    #[error("{0}")]
    Io(#[from] io::Error),
}

/// The result type for operations with a backup repository.
pub type Result<T> = result::Result<T, Error>;
