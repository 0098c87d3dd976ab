use std::path::PathBuf;

/// Configuration for a [`DirStore`](crate::DirStore).
///
/// Use the builder pattern:
///
/// ```rust
/// use slate_store::DirStoreConfig;
///
/// let config = DirStoreConfig::new()
///     .root(std::env::temp_dir().join("slate-demo"))
///     .extension("txt");
/// ```
#[derive(Debug, Clone)]
pub struct DirStoreConfig {
    /// Directory holding one file per channel.
    pub(crate) root: PathBuf,
    /// File extension appended to channel names (without the dot).
    pub(crate) extension: String,
}

impl Default for DirStoreConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl DirStoreConfig {
    /// Create a config with defaults.
    ///
    /// The root is taken from the `SLATE_STORE_DIR` environment variable
    /// if set, otherwise `<temp dir>/slate`. All nodes sharing a mesh must
    /// resolve to the same root.
    pub fn new() -> Self {
        let root = std::env::var_os(crate::STORE_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::temp_dir().join("slate"));

        Self {
            root,
            extension: "chan".to_string(),
        }
    }

    /// Set the store directory.
    pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    /// Set the channel file extension (default: `chan`).
    pub fn extension(mut self, ext: &str) -> Self {
        self.extension = ext.trim_start_matches('.').to_string();
        self
    }

    /// The configured root directory.
    pub fn root_path(&self) -> &std::path::Path {
        &self.root
    }
}
