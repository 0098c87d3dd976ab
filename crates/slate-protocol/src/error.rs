/// Protocol-level errors for Slate.
///
/// Wraps store errors and adds protocol-specific variants
/// (identity, serialization, write contention, export).
#[derive(Debug, thiserror::Error)]
pub enum SlateProtocolError {
    #[error("store error: {0}")]
    Store(#[from] slate_store::StoreError),

    #[error("invalid node id: {reason}")]
    InvalidNodeId { reason: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("channel {channel} still contended after {attempts} attempts")]
    ContentionExhausted { channel: String, attempts: u32 },

    #[error("export to {path} failed: {source}")]
    Export {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_invalid_node_id() {
        let err = SlateProtocolError::InvalidNodeId {
            reason: "empty id".into(),
        };
        assert_eq!(err.to_string(), "invalid node id: empty id");
    }

    #[test]
    fn test_display_contention() {
        let err = SlateProtocolError::ContentionExhausted {
            channel: "registry".into(),
            attempts: 3,
        };
        assert_eq!(
            err.to_string(),
            "channel registry still contended after 3 attempts"
        );
    }

    #[test]
    fn test_from_store_error() {
        let err: SlateProtocolError =
            slate_store::StoreError::InvalidChannel("a/b".into()).into();
        assert!(matches!(err, SlateProtocolError::Store(_)));
        assert!(err.to_string().starts_with("store error:"));
    }

    #[test]
    fn test_from_serde_error() {
        let bad = serde_json::from_str::<u32>("not json").unwrap_err();
        let err: SlateProtocolError = bad.into();
        assert!(matches!(err, SlateProtocolError::Serialization(_)));
    }
}
