//! JSON Lines journal files with file locking.
//!
//! Appends take an exclusive lock so concurrent writers never interleave
//! lines; reads take a shared lock and skip lines that fail to parse.
//! Whole documents (the profile, pump settings) are written atomically via
//! a temp file in the same directory.

use crate::{Error, Result};
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::hash::Hash;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;
use tempfile::NamedTempFile;

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Append `items` as one JSON document per line
pub fn append<T: Serialize>(path: &Path, items: &[T]) -> Result<()> {
    if items.is_empty() {
        return Ok(());
    }
    ensure_parent_dir(path)?;

    let file = OpenOptions::new().create(true).append(true).open(path)?;
    file.lock_exclusive()?;

    let mut writer = std::io::BufWriter::new(&file);
    for item in items {
        serde_json::to_writer(&mut writer, item)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    drop(writer);

    file.unlock()?;
    tracing::debug!(count = items.len(), "Appended to {:?}", path);
    Ok(())
}

/// Append only the `items` whose key is not already in the file, holding
/// the exclusive lock across the read and the write. Returns the items that
/// were written.
pub fn append_new<T, K, F>(path: &Path, items: Vec<T>, key: F) -> Result<Vec<T>>
where
    T: Serialize + DeserializeOwned,
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    if items.is_empty() {
        return Ok(items);
    }
    ensure_parent_dir(path)?;

    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)?;
    file.lock_exclusive()?;

    let mut known = HashSet::new();
    for line in BufReader::new(&file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        if let Ok(existing) = serde_json::from_str::<T>(&line) {
            known.insert(key(&existing));
        }
    }

    let fresh: Vec<T> = items
        .into_iter()
        .filter(|item| known.insert(key(item)))
        .collect();

    let mut writer = std::io::BufWriter::new(&file);
    for item in &fresh {
        serde_json::to_writer(&mut writer, item)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    drop(writer);

    file.unlock()?;
    tracing::debug!(count = fresh.len(), "Appended new items to {:?}", path);
    Ok(fresh)
}

/// Read every parseable line; a missing file reads as empty
pub fn read_all<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(path)?;
    file.lock_shared()?;

    let reader = BufReader::new(&file);
    let mut items = Vec::new();
    for (line_num, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(&line) {
            Ok(item) => items.push(item),
            Err(e) => {
                tracing::warn!("Skipping malformed line {} in {:?}: {}", line_num + 1, path, e);
            }
        }
    }

    file.unlock()?;
    Ok(items)
}

/// Load a JSON document, `None` when the file does not exist
pub fn load_document<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }

    let file = File::open(path)?;
    file.lock_shared()?;
    let mut contents = String::new();
    let read = BufReader::new(&file).read_to_string(&mut contents);
    file.unlock()?;
    read?;

    Ok(Some(serde_json::from_str(&contents)?))
}

/// Replace a JSON document atomically (temp file + rename)
pub fn save_document<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    ensure_parent_dir(path)?;
    let parent = path.parent().ok_or_else(|| {
        Error::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "document path has no parent directory",
        ))
    })?;

    let temp = NamedTempFile::new_in(parent)?;
    temp.as_file().lock_exclusive()?;
    {
        let mut writer = std::io::BufWriter::new(temp.as_file());
        serde_json::to_writer_pretty(&mut writer, value)?;
        writer.flush()?;
    }
    temp.as_file().sync_all()?;
    temp.as_file().unlock()?;

    temp.persist(path).map_err(|e| Error::Io(e.error))?;
    tracing::debug!("Saved {:?}", path);
    Ok(())
}
