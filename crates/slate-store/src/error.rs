/// Errors returned by a channel store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("i/o on channel {channel} failed: {source}")]
    Io {
        channel: String,
        #[source]
        source: std::io::Error,
    },

    #[error("store root {path} unavailable: {source}")]
    Root {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid channel name: {0:?}")]
    InvalidChannel(String),

    #[error("injected {op} failure on {channel}")]
    Injected { op: &'static str, channel: String },
}

impl StoreError {
    pub(crate) fn io(channel: &str, source: std::io::Error) -> Self {
        StoreError::Io {
            channel: channel.to_string(),
            source,
        }
    }
}
