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
use std::io::Read;

use flate2::read::GzDecoder;
use once_cell::sync::Lazy;
use regex::Regex;
use relative_path::RelativePath;
use serde::{Deserialize, Serialize};

/// The fixed per-member overhead of the gzip container in bytes.
///
/// A gzip member costs a 10-byte header and an 8-byte trailer even for
/// incompressible input. The stored file name adds its length plus a NUL.
const GZIP_OVERHEAD: u64 = 18;

/// File extensions whose contents are already packed and do not benefit from
/// another round of compression.
static PACKED_EXTENSIONS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        // Audio
        "aac", "flac", "m4a", "mp3", "oga", "ogg", "opus", "wma",
        // Video
        "avi", "flv", "m4v", "mkv", "mov", "mp4", "mpeg", "mpg", "webm", "wmv",
        // Images
        "gif", "heic", "jpeg", "jpg", "png", "webp",
        // Archives
        "7z", "apk", "bz2", "gz", "jar", "rar", "tbz2", "tgz", "txz", "xz", "zip", "zst",
        // Office and publishing formats (zip containers)
        "docx", "epub", "odp", "ods", "odt", "pdf", "pptx", "xlsx",
    ]
    .iter()
    .copied()
    .collect()
});

/// Path patterns whose contents are already packed.
static PACKED_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        // Loose git objects are zlib-deflated.
        Regex::new(r"(^|/)\.git/objects/[0-9a-f]{2}/[0-9a-f]{38}$").unwrap(),
        // Git pack files and their indexes.
        Regex::new(r"(^|/)\.git/objects/pack/pack-[0-9a-f]{40}\.(pack|idx)$").unwrap(),
    ]
});

/// A stream compression method.
///
/// A stream with no compressor stores its bytes verbatim.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compressor {
    /// Compress the stream with gzip.
    Gzip,
}

impl Compressor {
    /// Wrap the given `reader` to decompress its bytes.
    pub(crate) fn decompress<'a>(&self, reader: impl Read + 'a) -> Box<dyn Read + 'a> {
        match self {
            Compressor::Gzip => Box::new(GzDecoder::new(reader)),
        }
    }
}

/// The expected compression ratio for `path`, in percent.
///
/// Already-packed formats typically grow slightly when re-compressed; other
/// files are assumed to shrink by half.
pub(crate) fn ratio_percent(path: &RelativePath) -> u64 {
    let packed_extension = path
        .extension()
        .map(|extension| PACKED_EXTENSIONS.contains(extension.to_lowercase().as_str()))
        .unwrap_or(false);

    if packed_extension
        || PACKED_PATTERNS
            .iter()
            .any(|pattern| pattern.is_match(path.as_str()))
    {
        105
    } else {
        50
    }
}

/// The expected on-disk size of `path` after compression, in bytes.
pub(crate) fn compressed_size(path: &RelativePath, size: u64) -> u64 {
    size.saturating_mul(ratio_percent(path)) / 100
}

/// Return whether compressing the file at `path` is expected to shrink it.
///
/// Compression pays off iff the expected compressed size plus the gzip
/// container overhead (including the stored file name and its NUL) is
/// smaller than the original.
pub(crate) fn is_compressible(path: &RelativePath, size: u64) -> bool {
    let name_len = path.file_name().map(|name| name.len() as u64).unwrap_or(0);
    compressed_size(path, size) + GZIP_OVERHEAD + name_len + 1 < size
}
