//! On-disk artifact helpers
//!
//! Artifacts are written to a `.part` sibling and renamed into place, so a
//! crash never leaves a truncated file under the final name. A present,
//! non-empty artifact is what per-year idempotence keys on.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// The temporary sibling used while `path` is being written
pub fn part_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    path.with_file_name(name)
}

/// True when `path` exists and holds at least one byte
pub fn is_present(path: &Path) -> bool {
    fs::metadata(path).map(|m| m.is_file() && m.len() > 0).unwrap_or(false)
}

pub fn file_size(path: &Path) -> io::Result<u64> {
    Ok(fs::metadata(path)?.len())
}

/// Write `path` through a `.part` file and rename on success. The partial
/// file is removed if `write` fails.
pub fn write_atomic<F, E>(path: &Path, write: F) -> Result<(), E>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<(), E>,
    E: From<io::Error>,
{
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = part_path(path);

    let result = (|| {
        let mut writer = BufWriter::new(File::create(&tmp)?);
        write(&mut writer)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok::<(), E>(())
    })();

    match result {
        Ok(()) => {
            fs::rename(&tmp, path)?;
            Ok(())
        },
        Err(e) => {
            let _ = fs::remove_file(&tmp);
            Err(e)
        },
    }
}

/// Write a byte buffer atomically
pub fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    write_atomic(path, |w| w.write_all(bytes))
}
