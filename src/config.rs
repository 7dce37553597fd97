use {
    super::{ChunkError, ChunkResult},
    serde::{Deserialize, Serialize},
};

/// Tunables of a chunked list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Element count ceiling of a single chunk.
    pub max_chunk_size: usize,

    /// Number of elements rendered by `Display` before the output is cut.
    pub display_limit: usize,
}

impl Config {
    /// Largest single array the list will allocate by default.
    pub const DEFAULT_MAX_CHUNK_SIZE: usize = i32::MAX as usize;

    pub const DEFAULT_DISPLAY_LIMIT: usize = 10;
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_chunk_size: Self::DEFAULT_MAX_CHUNK_SIZE,
            display_limit: Self::DEFAULT_DISPLAY_LIMIT,
        }
    }
}

/// Config builder.
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder(Config);

impl ConfigBuilder {
    /// Create new builder, starting from defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Caps the number of elements per chunk.
    pub fn with_max_chunk_size(mut self, max_chunk_size: usize) -> Self {
        self.0.max_chunk_size = max_chunk_size;
        self
    }

    /// Caps the number of elements rendered by `Display`.
    pub fn with_display_limit(mut self, display_limit: usize) -> Self {
        self.0.display_limit = display_limit;
        self
    }

    /// Build the config.
    pub fn build(self) -> ChunkResult<Config> {
        if self.0.max_chunk_size == 0 {
            return Err(ChunkError::InvalidArgument(
                "maximum chunk size must be positive".into(),
            ));
        }
        Ok(self.0)
    }
}
