//! Pool file operations (spec §4.E).
//!
//! A pool is a directory whose files are each named with exactly 8
//! lowercase hex digits — a monotone file-id assigned by [`move_file`]. All
//! other names are ignored by every operation here.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{PipelineError, Result};

const ID_WIDTH: usize = 8;

fn parse_file_id(name: &str) -> Option<u32> {
    if name.len() != ID_WIDTH {
        return None;
    }
    if !name.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)) {
        return None;
    }
    u32::from_str_radix(name, 16).ok()
}

fn format_file_id(id: u32) -> String {
    format!("{id:08x}")
}

/// Strict total-order tie-breaker scan. `newer = true` keeps the largest
/// id seen (`a >= b`); `newer = false` keeps the smallest (`a <= b`).
/// Non-matching names never update the best-so-far and never abort the
/// scan.
fn scan(pooldir: &Path, newer: bool) -> Result<Option<(u32, PathBuf)>> {
    let mut best: Option<(u32, PathBuf)> = None;
    for entry in fs::read_dir(pooldir)? {
        let entry = entry?;
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            continue;
        };
        let Some(id) = parse_file_id(&name) else {
            continue;
        };
        let take = match &best {
            None => true,
            Some((b, _)) => {
                if newer {
                    id >= *b
                } else {
                    id <= *b
                }
            }
        };
        if take {
            best = Some((id, entry.path()));
        }
    }
    Ok(best)
}

/// Rename `src_path` into `pooldir` under the next monotone file-id. If the
/// pool is empty the scan seeds the comparator at 0, so the first file
/// lands at id 1.
pub fn move_file(pooldir: &Path, src_path: &Path) -> Result<PathBuf> {
    let max = scan(pooldir, true)?.map(|(id, _)| id).unwrap_or(0);
    let next = max + 1;
    let dest = pooldir.join(format_file_id(next));
    fs::rename(src_path, &dest)?;
    debug!(pool = %pooldir.display(), file_id = next, "pool file committed");
    Ok(dest)
}

/// The pool's oldest (lowest file-id) file. `not-found` if the pool holds
/// no schema-matching file.
pub fn get_oldest(pooldir: &Path) -> Result<PathBuf> {
    match scan(pooldir, false)? {
        Some((_, path)) => Ok(path),
        None => Err(PipelineError::NotFound),
    }
}

/// Unlink every schema-matching file. Stops on the first unlink error,
/// leaving the remainder in place.
pub fn drain(pooldir: &Path) -> Result<usize> {
    let mut removed = 0;
    for entry in fs::read_dir(pooldir)? {
        let entry = entry?;
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            continue;
        };
        if parse_file_id(&name).is_none() {
            continue;
        }
        fs::remove_file(entry.path())?;
        removed += 1;
    }
    if removed > 0 {
        warn!(pool = %pooldir.display(), removed, "pool drained");
    }
    Ok(removed)
}

/// Count of schema-matching files currently in the pool.
pub fn size(pooldir: &Path) -> Result<usize> {
    let mut n = 0;
    for entry in fs::read_dir(pooldir)? {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            if parse_file_id(name).is_some() {
                n += 1;
            }
        }
    }
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir().expect("create tempdir")
    }

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let p = dir.join(name);
        File::create(&p).unwrap();
        p
    }

    #[test]
    fn move_file_starts_at_one_in_an_empty_pool() {
        let dir = tmp_dir();
        let src = touch(dir.path(), "incoming.tmp");
        let dest = move_file(dir.path(), &src).unwrap();
        assert_eq!(dest.file_name().unwrap().to_str().unwrap(), "00000001");
    }

    #[test]
    fn move_file_is_monotone_across_calls() {
        let dir = tmp_dir();
        for _ in 0..3 {
            let src = touch(dir.path(), ".incoming");
            move_file(dir.path(), &src).unwrap();
        }
        assert_eq!(size(dir.path()).unwrap(), 3);
        assert!(dir.path().join("00000003").exists());
    }

    #[test]
    fn get_oldest_picks_the_smallest_id_and_ignores_other_names() {
        let dir = tmp_dir();
        touch(dir.path(), "00000005");
        touch(dir.path(), "00000002");
        touch(dir.path(), "not-a-pool-file");
        touch(dir.path(), "DEADBEEF"); // uppercase hex is not schema-matching

        let oldest = get_oldest(dir.path()).unwrap();
        assert_eq!(oldest.file_name().unwrap().to_str().unwrap(), "00000002");
        assert_eq!(size(dir.path()).unwrap(), 2);
    }

    #[test]
    fn get_oldest_on_empty_pool_is_not_found() {
        let dir = tmp_dir();
        assert!(matches!(get_oldest(dir.path()), Err(PipelineError::NotFound)));
    }

    #[test]
    fn drain_removes_only_schema_matching_files() {
        let dir = tmp_dir();
        touch(dir.path(), "00000001");
        touch(dir.path(), "00000002");
        touch(dir.path(), "keepme.txt");

        let removed = drain(dir.path()).unwrap();
        assert_eq!(removed, 2);
        assert_eq!(size(dir.path()).unwrap(), 0);
        assert!(dir.path().join("keepme.txt").exists());
    }
}
