//! JSON file session store with cross-process locking.
//!
//! The whole session book is one JSON document. Writers serialize on an
//! exclusive `fs2` lock over a sibling `.lock` file, held for the full
//! load-check-write sequence, and commit by writing a temp file, syncing
//! it and renaming it over the original.

use crate::store::{SessionBook, SessionStore};
use crate::{Error, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Session store backed by a single JSON file
#[derive(Clone, Debug)]
pub struct JsonFileSessionStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl JsonFileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut lock_name = path.as_os_str().to_owned();
        lock_name.push(".lock");
        Self {
            path,
            lock_path: PathBuf::from(lock_name),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_parent_dir(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    fn open_lock_file(&self) -> Result<File> {
        self.ensure_parent_dir()?;
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&self.lock_path)?;
        Ok(file)
    }

    /// Load the book; a missing or empty file is an empty book
    ///
    /// A file that fails to parse is an error: silently replacing clinical
    /// records with an empty book would lose them on the next commit.
    fn load_book(&self) -> Result<SessionBook> {
        if !self.path.exists() {
            tracing::debug!("No session file at {:?}, starting empty", self.path);
            return Ok(SessionBook::default());
        }

        let mut contents = String::new();
        File::open(&self.path)?.read_to_string(&mut contents)?;
        if contents.trim().is_empty() {
            return Ok(SessionBook::default());
        }

        let book: SessionBook = serde_json::from_str(&contents).map_err(|e| {
            tracing::error!("Session file {:?} is corrupted: {}", self.path, e);
            Error::Json(e)
        })?;
        tracing::debug!("Loaded {} sessions from {:?}", book.len(), self.path);
        Ok(book)
    }

    /// Atomically replace the session file
    fn save_book(&self, book: &SessionBook) -> Result<()> {
        self.ensure_parent_dir()?;

        let temp = NamedTempFile::new_in(self.path.parent().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::Other, "session path missing parent")
        })?)?;

        {
            let mut writer = std::io::BufWriter::new(temp.as_file());
            let contents = serde_json::to_string(book)?;
            writer.write_all(contents.as_bytes())?;
            writer.flush()?;
        }

        temp.as_file().sync_all()?;
        temp.persist(&self.path).map_err(|e| Error::Io(e.error))?;

        tracing::debug!("Saved {} sessions to {:?}", book.len(), self.path);
        Ok(())
    }
}

impl SessionStore for JsonFileSessionStore {
    fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&SessionBook) -> Result<T>,
    {
        let lock = self.open_lock_file()?;
        lock.lock_shared()?;
        let loaded = self.load_book();
        lock.unlock()?;
        f(&loaded?)
    }

    fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut SessionBook) -> Result<T>,
    {
        let lock = self.open_lock_file()?;
        lock.lock_exclusive()?;

        let outcome = self.load_book().and_then(|mut book| {
            let value = f(&mut book)?;
            self.save_book(&book)?;
            Ok(value)
        });

        lock.unlock()?;
        outcome
    }
}
