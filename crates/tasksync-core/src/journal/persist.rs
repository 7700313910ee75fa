use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use super::model::JournalData;

pub const JOURNAL_FILE: &str = "journal.v2.json";
pub const LOCK_FILE: &str = "journal.lock";

pub fn journal_path(state_dir: &Path) -> PathBuf {
    state_dir.join(JOURNAL_FILE)
}

pub fn lock_path(state_dir: &Path) -> PathBuf {
    state_dir.join(LOCK_FILE)
}

/// Exclusive advisory lock held for the lifetime of a `Journal`.
/// Returns `Ok(None)` when another process already holds it.
pub fn try_lock(state_dir: &Path) -> io::Result<Option<File>> {
    fs::create_dir_all(state_dir)?;
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(lock_path(state_dir))?;
    match file.try_lock_exclusive() {
        Ok(()) => Ok(Some(file)),
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(None),
        Err(err) if err.raw_os_error() == fs2::lock_contended_error().raw_os_error() => Ok(None),
        Err(err) => Err(err),
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "journal".to_string());
    path.with_file_name(format!("{name}.tmp"))
}

/// Writes `bytes` to a temp file, syncs, reads it back and byte-compares,
/// then renames over `path`.
pub fn write_verified(path: &Path, bytes: &[u8]) -> io::Result<()> {
    write_verified_with(path, bytes, |_| Ok(()))
}

/// Like [`write_verified`]; `before_rename` runs after the temp file is
/// verified and before it replaces `path`.
pub fn write_verified_with<F>(path: &Path, bytes: &[u8], before_rename: F) -> io::Result<()>
where
    F: FnOnce(&Path) -> io::Result<()>,
{
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = tmp_path(path);
    let result = write_and_verify(&tmp, bytes)
        .and_then(|_| before_rename(&tmp))
        .and_then(|_| fs::rename(&tmp, path));
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn write_and_verify(tmp: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);

    let written = fs::read(tmp)?;
    if written != bytes {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("verification of {} failed", tmp.display()),
        ));
    }
    Ok(())
}

/// Serializes journal data and checks the output before it is allowed near disk.
pub fn serialize_checked(data: &JournalData) -> Result<Vec<u8>, String> {
    let bytes = serde_json::to_vec_pretty(data).map_err(|err| err.to_string())?;
    if bytes.is_empty() {
        return Err("serialized journal is empty".to_string());
    }
    let parsed: JournalData = serde_json::from_slice(&bytes)
        .map_err(|err| format!("serialized journal does not parse: {err}"))?;
    if parsed.tasks.len() != data.tasks.len() || parsed.deleted.len() != data.deleted.len() {
        return Err(format!(
            "serialized journal lost entries: {} tasks / {} tombstones, expected {} / {}",
            parsed.tasks.len(),
            parsed.deleted.len(),
            data.tasks.len(),
            data.deleted.len()
        ));
    }
    Ok(bytes)
}
