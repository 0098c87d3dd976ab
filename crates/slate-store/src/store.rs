use std::collections::BTreeSet;

use bytes::Bytes;

use crate::StoreError;

/// Maximum channel name length.
const MAX_CHANNEL_LEN: usize = 200;

/// A weakly-consistent, multi-writer store of named channels.
///
/// In production: [`DirStore`](crate::DirStore) (one file per channel).
/// In tests: [`MemoryStore`](crate::MemoryStore).
///
/// Implementations give no cross-writer atomicity. A write becomes visible
/// to other readers after an unspecified delay; callers that need
/// read-modify-write must retry and tolerate lost updates.
pub trait ChannelStore: Send + Sync {
    /// Read the whole channel. `None` if it does not exist.
    fn read_full(&self, channel: &str) -> Result<Option<Bytes>, StoreError>;

    /// Replace the whole channel content.
    fn write_full(&self, channel: &str, data: &[u8]) -> Result<(), StoreError>;

    /// Names of all channels starting with `prefix` (empty prefix = all).
    fn list_channels(&self, prefix: &str) -> Result<BTreeSet<String>, StoreError>;

    /// Remove a channel. Returns whether it existed.
    fn delete(&self, channel: &str) -> Result<bool, StoreError>;

    /// Append one line to a channel.
    ///
    /// Emulated as read + write: two concurrent appenders can lose one line.
    fn append_line(&self, channel: &str, line: &str) -> Result<(), StoreError> {
        let current = self.read_full(channel)?;
        self.write_full(channel, &with_line_appended(current.as_deref(), line))
    }
}

/// `current` with `line` appended, newline-terminated.
///
/// An unterminated last line in `current` is terminated first.
pub fn with_line_appended(current: Option<&[u8]>, line: &str) -> Vec<u8> {
    let mut data = current.map(<[u8]>::to_vec).unwrap_or_default();
    if !data.is_empty() && !data.ends_with(b"\n") {
        data.push(b'\n');
    }
    data.extend_from_slice(line.as_bytes());
    data.push(b'\n');
    data
}

/// Check that a channel name is safe to use as a flat file name.
///
/// Allowed: ASCII alphanumerics, `.`, `_`, `-`; must not start with `.`.
pub fn validate_channel(channel: &str) -> Result<(), StoreError> {
    let valid = !channel.is_empty()
        && channel.len() <= MAX_CHANNEL_LEN
        && !channel.starts_with('.')
        && channel
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'));
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidChannel(channel.to_string()))
    }
}

/// Prefixes follow channel rules, except that the empty prefix is allowed.
pub(crate) fn validate_prefix(prefix: &str) -> Result<(), StoreError> {
    if prefix.is_empty() {
        return Ok(());
    }
    validate_channel(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_protocol_names() {
        for name in [
            "registry",
            "broadcast",
            "heartbeat.7001.alice",
            "private.alice.bob",
            "ack.1a2b3c4d",
            "routes.7001",
        ] {
            assert!(validate_channel(name).is_ok(), "{name} should be valid");
        }
    }

    #[test]
    fn rejects_path_like_names() {
        for name in ["", ".hidden", "../up", "a/b", "a\\b", "space here", "nul\0"] {
            assert!(validate_channel(name).is_err(), "{name:?} should be invalid");
        }
    }

    #[test]
    fn rejects_overlong_names() {
        let long = "x".repeat(MAX_CHANNEL_LEN + 1);
        assert!(validate_channel(&long).is_err());
    }

    #[test]
    fn appending_terminates_previous_line() {
        assert_eq!(with_line_appended(None, "a"), b"a\n");
        assert_eq!(with_line_appended(Some(b""), "a"), b"a\n");
        assert_eq!(with_line_appended(Some(b"a"), "b"), b"a\nb\n");
        assert_eq!(with_line_appended(Some(b"a\n"), "b"), b"a\nb\n");
    }

    #[test]
    fn empty_prefix_is_allowed() {
        assert!(validate_prefix("").is_ok());
        assert!(validate_prefix("heartbeat.").is_ok());
        assert!(validate_prefix("a/").is_err());
    }
}
