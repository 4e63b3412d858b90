//! Blob naming.
//!
//! Maps logical cache keys onto backend blob names. Sanitization is lossy:
//! distinct keys can collide after unsafe characters are replaced. The
//! original key is persisted inside each entry record, so reads and stats
//! always report the caller's key even when the blob name was rewritten.

use super::payload::Partition;

/// Single blob holding the whole tag index.
pub const TAG_INDEX_BLOB: &str = "tags/tags.json";

/// Singleton build-identity record, stored outside the partitions so a
/// cache clear does not erase it.
pub const BUILD_META_BLOB: &str = "meta/build.json";

const PLACEHOLDER: char = '-';

/// Replace every character outside `[A-Za-z0-9-]` with a placeholder.
pub fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                c
            } else {
                PLACEHOLDER
            }
        })
        .collect()
}

/// Blob name for a key within a partition.
pub fn entry_blob_name(partition: Partition, key: &str) -> String {
    format!("{}/{}.json", partition.namespace(), sanitize_key(key))
}

/// Listing prefix covering every entry blob in a partition.
pub fn partition_prefix(partition: Partition) -> String {
    format!("{}/", partition.namespace())
}
