//! Options controlling chunk size and compression of stream scopes.

use std::num::NonZeroUsize;

use serde::Deserialize;

/// Default upper bound on a single chunk's payload.
pub const DEFAULT_MAX_STREAM_CONTENT_LENGTH: NonZeroUsize = match NonZeroUsize::new(65_535) {
    Some(value) => value,
    None => NonZeroUsize::MIN,
};

/// Default limit on an inflated stream payload (64 MiB).
pub const DEFAULT_MAX_DECOMPRESSED_LENGTH: usize = 64 * 1024 * 1024;

/// Per-scope transfer settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StreamScopeOptions {
    /// Largest payload carried by one chunk.
    pub max_stream_content_length: NonZeroUsize,
    /// Compression applied to scopes that do not choose their own.
    pub default_compression: Option<CompressionConfig>,
}

impl Default for StreamScopeOptions {
    fn default() -> Self {
        Self {
            max_stream_content_length: DEFAULT_MAX_STREAM_CONTENT_LENGTH,
            default_compression: None,
        }
    }
}

impl StreamScopeOptions {
    /// Override the chunk size limit.
    #[must_use]
    pub const fn with_max_stream_content_length(mut self, max: NonZeroUsize) -> Self {
        self.max_stream_content_length = max;
        self
    }

    /// Compress payloads with `config`.
    #[must_use]
    pub const fn with_compression(mut self, config: CompressionConfig) -> Self {
        self.default_compression = Some(config);
        self
    }

    /// Buffer size used while deflating, defaulting to the chunk limit.
    #[must_use]
    pub fn compression_buffer_size(&self) -> usize {
        self.default_compression
            .and_then(|config| config.compression_buffer_size)
            .map_or(self.max_stream_content_length.get(), NonZeroUsize::get)
    }

    /// Buffer size used while inflating, defaulting to the chunk limit.
    #[must_use]
    pub fn decompression_buffer_size(&self) -> usize {
        self.default_compression
            .and_then(|config| config.decompression_buffer_size)
            .map_or(self.max_stream_content_length.get(), NonZeroUsize::get)
    }
}

/// Raw DEFLATE settings for a scope.
///
/// The two buffer sizes are independent so inbound and outbound memory use
/// can be tuned separately. `None` falls back to the scope's
/// `max_stream_content_length`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// DEFLATE level from 0 (store) to 10 (best).
    pub level: u8,
    /// Output window used while deflating.
    pub compression_buffer_size: Option<NonZeroUsize>,
    /// Output window used while inflating.
    pub decompression_buffer_size: Option<NonZeroUsize>,
    /// Largest payload an inbound stream may inflate to.
    pub max_decompressed_length: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            level: 6,
            compression_buffer_size: None,
            decompression_buffer_size: None,
            max_decompressed_length: DEFAULT_MAX_DECOMPRESSED_LENGTH,
        }
    }
}

impl CompressionConfig {
    /// Set the DEFLATE level. Values above 10 are clamped.
    #[must_use]
    pub fn with_level(mut self, level: u8) -> Self {
        self.level = level.min(10);
        self
    }

    /// Set the deflate output window.
    #[must_use]
    pub const fn with_compression_buffer_size(mut self, size: NonZeroUsize) -> Self {
        self.compression_buffer_size = Some(size);
        self
    }

    /// Set the inflate output window.
    #[must_use]
    pub const fn with_decompression_buffer_size(mut self, size: NonZeroUsize) -> Self {
        self.decompression_buffer_size = Some(size);
        self
    }

    /// Cap the inflated size of inbound payloads.
    #[must_use]
    pub const fn with_max_decompressed_length(mut self, max: usize) -> Self {
        self.max_decompressed_length = max;
        self
    }
}
