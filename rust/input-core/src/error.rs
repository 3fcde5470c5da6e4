// rust/input-core/src/error.rs

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InputError {

    #[error("Storage error at '{path}': {message}")]
    Storage {
        path: PathBuf,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Malformed record: {message}")]
    Decode {
        message: String,
    },

    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Shape contract violated: {message}")]
    Shape {
        message: String,
    },

    #[error("Precondition failed: {message}")]
    Precondition {
        message: String,
    },

    #[error("Source '{name}' error: {message}")]
    Source {
        name: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Shard {shard_id} out of range (total shards: {total_shards})")]
    InvalidShard {
        shard_id: u32,
        total_shards: u32,
    },

    #[error("Image error: {message}")]
    Image {
        message: String,
        #[source]
        source: Option<image::ImageError>,
    },
}

pub type Result<T> = std::result::Result<T, InputError>;

// Convenience constructors
impl InputError {

    pub fn storage(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Storage {
            path: path.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn storage_with_source(
        path: impl Into<PathBuf>,
        message: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Self::Storage {
            path: path.into(),
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    pub fn config_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn shape(message: impl Into<String>) -> Self {
        Self::Shape {
            message: message.into(),
        }
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition {
            message: message.into(),
        }
    }

    pub fn source(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Source {
            name: name.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn source_with_cause(
        name: impl Into<String>,
        message: impl Into<String>,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Source {
            name: name.into(),
            message: message.into(),
            source: Some(Box::new(cause)),
        }
    }

    pub fn invalid_shard(shard_id: u32, total_shards: u32) -> Self {
        Self::InvalidShard { shard_id, total_shards }
    }

    pub fn image(message: impl Into<String>) -> Self {
        Self::Image {
            message: message.into(),
            source: None,
        }
    }

    pub fn image_with_source(message: impl Into<String>, source: image::ImageError) -> Self {
        Self::Image {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Returns true for errors caused by the data rather than the setup.
    pub fn is_data_error(&self) -> bool {
        matches!(self, Self::Decode { .. } | Self::Image { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = InputError::decode("expected 34 fields, found 33");
        assert_eq!(err.to_string(), "Malformed record: expected 34 fields, found 33");

        let err = InputError::invalid_shard(4, 4);
        assert_eq!(
            err.to_string(),
            "Shard 4 out of range (total shards: 4)"
        );

        let err = InputError::source("bigtable", "connection reset");
        assert!(err.to_string().contains("bigtable"));
    }

    #[test]
    fn test_storage_source_is_preserved() {
        use std::error::Error as _;

        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = InputError::storage_with_source("/data/train-00000", "failed to open file", io);
        assert!(err.source().is_some());
        assert!(err.to_string().contains("/data/train-00000"));
    }

    #[test]
    fn test_is_data_error() {
        assert!(InputError::decode("bad").is_data_error());
        assert!(InputError::image("bad").is_data_error());
        assert!(!InputError::config("bad").is_data_error());
        assert!(!InputError::precondition("bad").is_data_error());
    }
}
