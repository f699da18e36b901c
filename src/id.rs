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

//! Identifier rendering for sources, volumes, and manifests.
//!
//! All identifiers in the repository are short base-36 tokens. Source
//! identifiers are derived from the source root path so that the same root
//! maps to the same identifier in every snapshot. Volume and manifest
//! identifiers are derived from the wall clock at creation time.

use std::path::Path;

use chrono::{DateTime, Utc};

const BASE36_DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Render `value` in base 36 using lowercase digits.
pub fn to_base36(mut value: u64) -> String {
    if value == 0 {
        return String::from("0");
    }

    let mut digits = Vec::new();
    while value > 0 {
        digits.push(BASE36_DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    digits.reverse();

    // Base-36 digits are always valid UTF-8.
    String::from_utf8(digits).unwrap()
}

/// Compute the 32-bit FNV-1a hash of the given bytes.
fn fnv1a(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in bytes {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

/// Return the stable identifier for the source rooted at `root`.
///
/// The identifier is a 32-bit hash of the root path rendered in base 36, so
/// the same root directory reuses the same identifier across snapshots.
pub fn source_id(root: &Path) -> String {
    to_base36(u64::from(fnv1a(root.to_string_lossy().as_bytes())))
}

/// Return a time-derived identifier token for the given instant.
///
/// The token is the base-36 rendering of the number of centiseconds since the
/// epoch, which makes identifiers unique per snapshot and lexicographically
/// ordered by creation time for tokens of equal length.
pub fn time_token(instant: DateTime<Utc>) -> String {
    to_base36((instant.timestamp_millis() / 10) as u64)
}

/// Return a random 32-bit token for obfuscated stream names.
pub fn random_token() -> String {
    to_base36(u64::from(rand::random::<u32>()))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn base36_renders_digits() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
        assert_eq!(to_base36(36 * 36 + 1), "101");
    }

    #[test]
    fn source_id_is_stable() {
        let first = source_id(Path::new("/home/user/data"));
        let second = source_id(Path::new("/home/user/data"));
        assert_eq!(first, second);
        assert_ne!(first, source_id(Path::new("/home/user/other")));
    }

    #[test]
    fn time_token_counts_centiseconds() {
        let epoch = Utc.timestamp_opt(0, 0).unwrap();
        assert_eq!(time_token(epoch), "0");

        // One second is 100 centiseconds, which is "2s" in base 36.
        let second = Utc.timestamp_opt(1, 0).unwrap();
        assert_eq!(time_token(second), "2s");
    }
}
