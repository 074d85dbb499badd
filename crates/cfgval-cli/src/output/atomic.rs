use std::fs::{OpenOptions, create_dir_all};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::{OutputError, OutputResult};

/// Write `value` as pretty JSON next to `path` and rename it into place.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> OutputResult<()> {
    let mut data = serde_json::to_vec_pretty(value)?;
    data.push(b'\n');

    let parent = path.parent().filter(|parent| !parent.as_os_str().is_empty());
    if let Some(parent) = parent {
        create_dir_all(parent)?;
    }

    let tmp_path = temp_path(path)?;
    let mut file = OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(&tmp_path)?;
    file.write_all(&data)?;
    file.sync_all()?;

    std::fs::rename(&tmp_path, path)?;
    if let Some(parent) = parent {
        sync_dir(parent)?;
    }
    Ok(())
}

fn temp_path(path: &Path) -> OutputResult<PathBuf> {
    let file_name = path
        .file_name()
        .ok_or_else(|| OutputError::Invalid(format!("not a file path: {}", path.display())))?;
    Ok(path.with_file_name(format!("{}.tmp", file_name.to_string_lossy())))
}

fn sync_dir(path: &Path) -> io::Result<()> {
    OpenOptions::new().read(true).open(path)?.sync_all()
}
