//! On-disk path resolution
//!
//! Maps an arbitrary-length index (an object-key hash or a tenant UUID) to a
//! filesystem-safe, bounded-length path under a parent directory. The index
//! bytes are base32-encoded; when the encoded name would exceed the maximum
//! segment length it is split into consecutive chunks nested as
//! subdirectories, so no single path component ever exceeds the filesystem
//! limit regardless of index length.

use crate::error::StoreError;
use data_encoding::BASE32_NOPAD;
use std::fs;
use std::path::{Path, PathBuf};

/// Default maximum path-segment length, matching common filesystem limits.
pub const DEFAULT_MAX_FILENAME_LENGTH: usize = 255;

/// Suffix appended to a final path to derive its sibling temp path.
const TEMP_SUFFIX: &str = ".tmp";

/// A resolved on-disk location for a logical index: the canonical path plus
/// a sibling temp path for atomic-write support. Derived on demand, never
/// persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskLocation {
    /// Final destination of the file.
    pub path: PathBuf,
    /// Temp path in the same directory; writers fill this and rename over
    /// `path` so readers never observe a partial file.
    pub temp: PathBuf,
}

/// Resolve the location for `index` under `parent`.
///
/// `suffix` is appended verbatim to the file name (used for the reserved
/// metadata suffix); the chunking budget is reduced by its length so every
/// produced segment stays within `max_len`. When `create_parents` is set the
/// file's parent directories are created; failure to do so surfaces as an
/// object-load error.
pub fn resolve(
    parent: &Path,
    index: &[u8],
    suffix: &str,
    max_len: usize,
    create_parents: bool,
) -> Result<DiskLocation, StoreError> {
    let encoded = BASE32_NOPAD.encode(index);
    let budget = max_len.saturating_sub(suffix.len()).max(1);

    let mut path = parent.to_path_buf();
    if encoded.len() <= budget {
        path.push(format!("{}{}", encoded, suffix));
    } else {
        // Chunk 1 is a directory, chunk 2 a subdirectory of it, and so on;
        // the final chunk is the file.
        let chunks: Vec<&str> = encoded
            .as_bytes()
            .chunks(budget)
            .map(|c| std::str::from_utf8(c).expect("base32 output is ASCII"))
            .collect();
        let (last, dirs) = chunks.split_last().expect("at least one chunk");
        for dir in dirs {
            path.push(dir);
        }
        path.push(format!("{}{}", last, suffix));
    }

    if create_parents {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|source| StoreError::ObjectLoad {
                key: String::from_utf8_lossy(index).into_owned(),
                source,
            })?;
        }
    }

    let temp = temp_sibling(&path);
    Ok(DiskLocation { path, temp })
}

/// Directory that holds everything belonging to one tenant:
/// `<root>/<base32(uuid)>`. A tenant UUID encodes well under the segment
/// limit so this is always a single component.
pub fn tenant_dir(root: &Path, id: &uuid::Uuid, max_len: usize) -> PathBuf {
    let encoded = BASE32_NOPAD.encode(id.to_string().as_bytes());
    debug_assert!(encoded.len() <= max_len);
    root.join(encoded)
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(TEMP_SUFFIX);
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_resolution_is_deterministic() {
        let parent = Path::new("/tmp/strongbox-test");
        let a = resolve(parent, b"a/b/c", "", 255, false).unwrap();
        let b = resolve(parent, b"a/b/c", "", 255, false).unwrap();
        assert_eq!(a, b);
        assert!(a.path.starts_with(parent));
    }

    #[test]
    fn test_short_index_is_single_segment() {
        let parent = Path::new("/tmp/strongbox-test");
        let loc = resolve(parent, b"hello", "", 255, false).unwrap();
        assert_eq!(loc.path.parent().unwrap(), parent);
        assert_eq!(loc.temp.parent().unwrap(), parent);
        assert_ne!(loc.path, loc.temp);
    }

    #[test]
    fn test_long_index_splits_into_bounded_segments() {
        let parent = Path::new("/tmp/strongbox-test");
        let max_len = 32;
        let index = vec![b'k'; 400];
        let loc = resolve(parent, &index, "", max_len, false).unwrap();

        let relative = loc.path.strip_prefix(parent).unwrap();
        let segments: Vec<_> = relative.components().collect();
        assert!(segments.len() > 1, "long index must nest");
        for seg in &segments {
            assert!(seg.as_os_str().len() <= max_len);
        }

        // Rejoining the segments reproduces the full encoding.
        let rejoined: String = segments
            .iter()
            .map(|s| s.as_os_str().to_str().unwrap())
            .collect();
        assert_eq!(rejoined, BASE32_NOPAD.encode(&index));
    }

    #[test]
    fn test_suffix_counts_against_segment_budget() {
        let parent = Path::new("/tmp/strongbox-test");
        let max_len = 16;
        let suffix = ".meta.gz";
        let index = vec![b'x'; 100];
        let loc = resolve(parent, &index, suffix, max_len, false).unwrap();

        assert!(loc.path.to_str().unwrap().ends_with(suffix));
        for seg in loc.path.strip_prefix(parent).unwrap().components() {
            assert!(seg.as_os_str().len() <= max_len);
        }
    }

    #[test]
    fn test_temp_path_shares_parent() {
        let parent = Path::new("/tmp/strongbox-test");
        let index = vec![b'z'; 300];
        let loc = resolve(parent, &index, "", 64, false).unwrap();
        assert_eq!(loc.path.parent(), loc.temp.parent());
        assert!(loc.temp.to_str().unwrap().ends_with(".tmp"));
    }

    #[test]
    fn test_tenant_dir_is_flat() {
        let id = Uuid::new_v4();
        let dir = tenant_dir(Path::new("/data"), &id, 255);
        assert_eq!(dir.parent().unwrap(), Path::new("/data"));
    }

    #[test]
    fn test_create_parents_materializes_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let index = vec![b'p'; 200];
        let loc = resolve(tmp.path(), &index, "", 32, true).unwrap();
        assert!(loc.path.parent().unwrap().is_dir());
    }
}
