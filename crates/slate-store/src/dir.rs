use std::collections::BTreeSet;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::config::DirStoreConfig;
use crate::store::{validate_channel, validate_prefix, ChannelStore};
use crate::StoreError;

/// Directory-backed channel store: one file per channel.
///
/// Every write goes to a temporary file in the same directory and is then
/// renamed over the channel file, so a reader sees either the old or the new
/// content, never a torn write. Nothing prevents two writers from racing;
/// the later rename wins.
#[derive(Debug, Clone)]
pub struct DirStore {
    root: PathBuf,
    suffix: String,
}

impl DirStore {
    /// Open (creating if needed) the store directory.
    pub fn open(config: DirStoreConfig) -> Result<Self, StoreError> {
        fs::create_dir_all(&config.root).map_err(|source| StoreError::Root {
            path: config.root.display().to_string(),
            source,
        })?;
        tracing::debug!(root = %config.root.display(), "dir store opened");
        Ok(Self {
            root: config.root,
            suffix: format!(".{}", config.extension),
        })
    }

    /// The directory backing this store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, channel: &str) -> PathBuf {
        self.root.join(format!("{channel}{}", self.suffix))
    }
}

impl ChannelStore for DirStore {
    fn read_full(&self, channel: &str) -> Result<Option<Bytes>, StoreError> {
        validate_channel(channel)?;
        match fs::read(self.path_for(channel)) {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(channel, e)),
        }
    }

    fn write_full(&self, channel: &str, data: &[u8]) -> Result<(), StoreError> {
        validate_channel(channel)?;
        let mut tmp =
            tempfile::NamedTempFile::new_in(&self.root).map_err(|e| StoreError::io(channel, e))?;
        tmp.write_all(data).map_err(|e| StoreError::io(channel, e))?;
        tmp.flush().map_err(|e| StoreError::io(channel, e))?;
        tmp.persist(self.path_for(channel))
            .map_err(|e| StoreError::io(channel, e.error))?;
        Ok(())
    }

    fn list_channels(&self, prefix: &str) -> Result<BTreeSet<String>, StoreError> {
        validate_prefix(prefix)?;
        let entries = fs::read_dir(&self.root).map_err(|e| StoreError::io(prefix, e))?;

        let mut channels = BTreeSet::new();
        for entry in entries {
            // Entries can vanish between readdir and stat; skip them.
            let Ok(entry) = entry else { continue };
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            let Some(channel) = name.strip_suffix(self.suffix.as_str()) else {
                continue;
            };
            if channel.starts_with(prefix) && validate_channel(channel).is_ok() {
                channels.insert(channel.to_string());
            }
        }
        Ok(channels)
    }

    fn delete(&self, channel: &str) -> Result<bool, StoreError> {
        validate_channel(channel)?;
        match fs::remove_file(self.path_for(channel)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::io(channel, e)),
        }
    }
}
