//! Bounded optimistic retry for read-modify-write on shared channels.
//!
//! The store has no locks, so an edit is: read, transform, write, read back
//! and check that our change survived. If another writer clobbered it, try
//! again after a short jittered pause. After the last attempt the update is
//! given up; callers treat that as a soft failure.

use std::time::Duration;

use rand::Rng;
use slate_store::ChannelStore;

use crate::error::SlateProtocolError;

/// Retry discipline for contended channel updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub attempts: u32,
    /// Base pause between attempts. Up to half of it is added as jitter.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, backoff: Duration) -> Self {
        Self { attempts, backoff }
    }

    /// No pause between attempts (for tests).
    pub fn immediate(attempts: u32) -> Self {
        Self::new(attempts, Duration::ZERO)
    }

    fn pause(&self) {
        if self.backoff.is_zero() {
            return;
        }
        let base = self.backoff.as_millis() as u64;
        let jitter = rand::rng().random_range(0..=base / 2);
        std::thread::sleep(Duration::from_millis(base + jitter));
    }
}

/// Read-modify-write `channel` until `verify` accepts the stored content.
///
/// `edit` receives the current content (`None` if the channel is absent)
/// and returns the full replacement. `verify` is run on a fresh read after
/// the write. The error of the final attempt is returned; if the final
/// attempt only lost a race, the result is `ContentionExhausted`.
pub(crate) fn update_channel<E, V>(
    store: &dyn ChannelStore,
    channel: &str,
    policy: RetryPolicy,
    mut edit: E,
    verify: V,
) -> Result<(), SlateProtocolError>
where
    E: FnMut(Option<&[u8]>) -> Vec<u8>,
    V: Fn(&[u8]) -> bool,
{
    let attempts = policy.attempts.max(1);
    let mut last_err = None;

    for attempt in 1..=attempts {
        if attempt > 1 {
            policy.pause();
        }
        last_err = None;

        let current = match store.read_full(channel) {
            Ok(current) => current,
            Err(e) => {
                tracing::debug!(channel, attempt, "read before update failed: {e}");
                last_err = Some(e);
                continue;
            }
        };

        let next = edit(current.as_deref());
        if let Err(e) = store.write_full(channel, &next) {
            tracing::debug!(channel, attempt, "write failed: {e}");
            last_err = Some(e);
            continue;
        }

        match store.read_full(channel) {
            Ok(Some(data)) if verify(&data) => return Ok(()),
            Ok(_) => tracing::debug!(channel, attempt, "update lost to a concurrent writer"),
            Err(e) => {
                tracing::debug!(channel, attempt, "verification read failed: {e}");
                last_err = Some(e);
            }
        }
    }

    match last_err {
        Some(e) => Err(e.into()),
        None => Err(SlateProtocolError::ContentionExhausted {
            channel: channel.to_string(),
            attempts,
        }),
    }
}

/// `verify` for an append: the exact line is present.
pub(crate) fn contains_line(data: &[u8], line: &str) -> bool {
    String::from_utf8_lossy(data).lines().any(|l| l == line)
}
