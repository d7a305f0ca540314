//! Directory backend: one file per cache entry.
//!
//! Each file starts with a single JSON header line holding the entry
//! metadata, followed by the raw payload. File names are the SHA-256 of the
//! cache key so arbitrary key text is safe on every filesystem.

use std::fs;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use super::traits::{checksum, EntryMeta, StorageBackend, StoredEntry};
use crate::error::StorageError;

const ENTRY_EXT: &str = "entry";
const TMP_EXT: &str = "tmp";

pub struct DirectoryBackend {
  root: PathBuf,
  tmp_counter: AtomicU64,
}

impl DirectoryBackend {
  /// Open the store at `root`, creating it if needed.
  ///
  /// Fails when the directory cannot be created or written, which is what
  /// backend selection uses to fall back to the record store.
  pub fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
    let root = root.into();
    fs::create_dir_all(&root).map_err(|e| StorageError::from_io(e, "", &root))?;

    let marker = root.join(".writable");
    fs::write(&marker, b"ok").map_err(|e| StorageError::from_io(e, "", &marker))?;
    fs::remove_file(&marker).map_err(|e| StorageError::from_io(e, "", &marker))?;

    Ok(Self {
      root,
      tmp_counter: AtomicU64::new(0),
    })
  }

  fn entry_path(&self, key: &str) -> PathBuf {
    self
      .root
      .join(format!("{}.{}", checksum(key.as_bytes()), ENTRY_EXT))
  }

  fn tmp_path(&self, key: &str) -> PathBuf {
    let n = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
    self.root.join(format!(
      "{}.{}.{}.{}",
      checksum(key.as_bytes()),
      std::process::id(),
      n,
      TMP_EXT
    ))
  }

  fn entry_files(&self) -> Result<Vec<PathBuf>, StorageError> {
    let mut files = Vec::new();
    for dir_entry in fs::read_dir(&self.root).map_err(|e| StorageError::from_io(e, "", &self.root))? {
      let path = dir_entry
        .map_err(|e| StorageError::from_io(e, "", &self.root))?
        .path();
      if path.extension().and_then(|e| e.to_str()) == Some(ENTRY_EXT) {
        files.push(path);
      }
    }
    Ok(files)
  }
}

/// Read only the header line of an entry file.
fn read_header(reader: &mut impl BufRead) -> Result<Option<EntryMeta>, std::io::Error> {
  let mut line = String::new();
  if reader.read_line(&mut line)? == 0 {
    return Ok(None);
  }
  Ok(serde_json::from_str(line.trim_end()).ok())
}

fn remove_if_exists(path: &Path) -> Result<(), StorageError> {
  match fs::remove_file(path) {
    Ok(()) => Ok(()),
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
    Err(e) => Err(StorageError::from_io(e, "", path)),
  }
}

impl StorageBackend for DirectoryBackend {
  fn name(&self) -> &'static str {
    "directory"
  }

  fn read(&self, key: &str) -> Result<Option<StoredEntry>, StorageError> {
    let path = self.entry_path(key);
    let file = match fs::File::open(&path) {
      Ok(f) => f,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(StorageError::from_io(e, key, &path)),
    };

    let mut reader = BufReader::new(file);
    let meta = read_header(&mut reader)
      .map_err(|e| StorageError::from_io(e, key, &path))?
      .ok_or_else(|| StorageError::corrupted(key, "unreadable entry header"))?;

    if meta.key != key {
      return Err(StorageError::corrupted(key, "entry header names another key"));
    }

    // The header size is checked by `verify`, not trusted for allocation
    let mut payload = Vec::new();
    reader
      .read_to_end(&mut payload)
      .map_err(|e| StorageError::from_io(e, key, &path))?;

    Ok(Some(StoredEntry { meta, payload }))
  }

  fn write(&self, meta: &EntryMeta, payload: &[u8]) -> Result<(), StorageError> {
    let key = meta.key.as_str();
    let path = self.entry_path(key);
    let tmp = self.tmp_path(key);

    let header = serde_json::to_vec(meta)?;
    let written = (|| -> std::io::Result<()> {
      let mut file = fs::File::create(&tmp)?;
      file.write_all(&header)?;
      file.write_all(b"\n")?;
      file.write_all(payload)?;
      file.sync_all()?;
      Ok(())
    })();

    if let Err(e) = written {
      let _ = fs::remove_file(&tmp);
      return Err(StorageError::from_io(e, key, &tmp));
    }

    // Publish
    fs::rename(&tmp, &path).map_err(|e| {
      let _ = fs::remove_file(&tmp);
      StorageError::from_io(e, key, &path)
    })?;

    debug!(key, bytes = payload.len(), "wrote directory entry");
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<(), StorageError> {
    remove_if_exists(&self.entry_path(key))
  }

  fn clear(&self) -> Result<(), StorageError> {
    for dir_entry in fs::read_dir(&self.root).map_err(|e| StorageError::from_io(e, "", &self.root))? {
      let path = dir_entry
        .map_err(|e| StorageError::from_io(e, "", &self.root))?
        .path();
      let ext = path.extension().and_then(|e| e.to_str());
      if ext == Some(ENTRY_EXT) || ext == Some(TMP_EXT) {
        remove_if_exists(&path)?;
      }
    }
    Ok(())
  }

  fn scan(&self) -> Result<Vec<EntryMeta>, StorageError> {
    let mut metas = Vec::new();
    for path in self.entry_files()? {
      let header = match fs::File::open(&path) {
        Ok(file) => read_header(&mut BufReader::new(file)).ok().flatten(),
        // Removed by a concurrent clear
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
        Err(e) => return Err(StorageError::from_io(e, "", &path)),
      };

      match header {
        Some(meta) if self.entry_path(&meta.key) == path => metas.push(meta),
        _ => {
          warn!(path = %path.display(), "removing cache file with an unreadable header");
          remove_if_exists(&path)?;
        }
      }
    }
    Ok(metas)
  }
}
