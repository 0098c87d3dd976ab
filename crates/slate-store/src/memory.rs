use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::store::{validate_channel, validate_prefix, ChannelStore};
use crate::StoreError;

/// In-memory channel store shared by every clone of the handle.
///
/// Used as the test double for the protocol layer: several nodes in one
/// process share one `MemoryStore` the way processes share a directory.
/// Reads and writes can be made to fail to exercise soft-failure paths.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    channels: BTreeMap<String, Bytes>,
    fail_reads: bool,
    fail_writes: bool,
    writes: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent read (and list) fail.
    pub fn set_fail_reads(&self, fail: bool) {
        self.inner.lock().fail_reads = fail;
    }

    /// Make every subsequent write (and delete) fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.lock().fail_writes = fail;
    }

    /// Number of channels currently stored.
    pub fn channel_count(&self) -> usize {
        self.inner.lock().channels.len()
    }

    /// Number of successful writes since creation.
    pub fn write_count(&self) -> u64 {
        self.inner.lock().writes
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("channels", &self.channel_count())
            .finish()
    }
}

impl ChannelStore for MemoryStore {
    fn read_full(&self, channel: &str) -> Result<Option<Bytes>, StoreError> {
        validate_channel(channel)?;
        let inner = self.inner.lock();
        if inner.fail_reads {
            return Err(StoreError::Injected {
                op: "read",
                channel: channel.to_string(),
            });
        }
        Ok(inner.channels.get(channel).cloned())
    }

    fn write_full(&self, channel: &str, data: &[u8]) -> Result<(), StoreError> {
        validate_channel(channel)?;
        let mut inner = self.inner.lock();
        if inner.fail_writes {
            return Err(StoreError::Injected {
                op: "write",
                channel: channel.to_string(),
            });
        }
        inner
            .channels
            .insert(channel.to_string(), Bytes::copy_from_slice(data));
        inner.writes += 1;
        Ok(())
    }

    fn list_channels(&self, prefix: &str) -> Result<BTreeSet<String>, StoreError> {
        validate_prefix(prefix)?;
        let inner = self.inner.lock();
        if inner.fail_reads {
            return Err(StoreError::Injected {
                op: "list",
                channel: prefix.to_string(),
            });
        }
        Ok(inner
            .channels
            .range(prefix.to_string()..)
            .take_while(|(name, _)| name.starts_with(prefix))
            .map(|(name, _)| name.clone())
            .collect())
    }

    fn delete(&self, channel: &str) -> Result<bool, StoreError> {
        validate_channel(channel)?;
        let mut inner = self.inner.lock();
        if inner.fail_writes {
            return Err(StoreError::Injected {
                op: "delete",
                channel: channel.to_string(),
            });
        }
        Ok(inner.channels.remove(channel).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_missing_is_none() {
        let store = MemoryStore::new();
        assert!(store.read_full("registry").unwrap().is_none());
    }

    #[test]
    fn write_replaces_content() {
        let store = MemoryStore::new();
        store.write_full("heartbeat.1.a", b"one").unwrap();
        store.write_full("heartbeat.1.a", b"two").unwrap();
        assert_eq!(store.read_full("heartbeat.1.a").unwrap().unwrap(), "two");
        assert_eq!(store.write_count(), 2);
    }

    #[test]
    fn append_line_emulation() {
        let store = MemoryStore::new();
        store.append_line("broadcast", "first").unwrap();
        store.append_line("broadcast", "second").unwrap();
        assert_eq!(
            store.read_full("broadcast").unwrap().unwrap(),
            "first\nsecond\n"
        );
    }

    #[test]
    fn append_after_unterminated_content() {
        let store = MemoryStore::new();
        store.write_full("broadcast", b"no newline").unwrap();
        store.append_line("broadcast", "next").unwrap();
        assert_eq!(
            store.read_full("broadcast").unwrap().unwrap(),
            "no newline\nnext\n"
        );
    }

    #[test]
    fn list_by_prefix() {
        let store = MemoryStore::new();
        for name in ["heartbeat.1.a", "heartbeat.2.b", "routes.1", "registry"] {
            store.write_full(name, b"x").unwrap();
        }
        let hb = store.list_channels("heartbeat.").unwrap();
        assert_eq!(hb.len(), 2);
        assert!(hb.contains("heartbeat.2.b"));
        assert_eq!(store.list_channels("").unwrap().len(), 4);
        assert!(store.list_channels("zzz").unwrap().is_empty());
    }

    #[test]
    fn delete_reports_existence() {
        let store = MemoryStore::new();
        store.write_full("ack.1234", b"{}").unwrap();
        assert!(store.delete("ack.1234").unwrap());
        assert!(!store.delete("ack.1234").unwrap());
    }

    #[test]
    fn clones_share_state() {
        let a = MemoryStore::new();
        let b = a.clone();
        a.write_full("registry", b"alice").unwrap();
        assert_eq!(b.channel_count(), 1);
    }

    #[test]
    fn injected_failures() {
        let store = MemoryStore::new();
        store.set_fail_writes(true);
        assert!(matches!(
            store.write_full("registry", b"x"),
            Err(StoreError::Injected { op: "write", .. })
        ));
        store.set_fail_writes(false);
        store.write_full("registry", b"x").unwrap();

        store.set_fail_reads(true);
        assert!(store.read_full("registry").is_err());
        assert!(store.list_channels("").is_err());
    }

    #[test]
    fn invalid_names_rejected() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.write_full("../escape", b"x"),
            Err(StoreError::InvalidChannel(_))
        ));
    }
}
