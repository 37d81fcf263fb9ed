use thiserror::Error;

use crate::terminology::TerminologyError;

#[derive(Error, Debug)]
pub enum ConformanceError {
    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Invalid resource: {message}")]
    InvalidResource { message: String },

    #[error("Invalid search value: {message}")]
    InvalidSearchValue { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Profile error: {message}")]
    Profile { message: String },

    #[error("Terminology lookup failed: {0}")]
    Terminology(#[from] TerminologyError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[cfg(feature = "http-client")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl ConformanceError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn invalid_resource(message: impl Into<String>) -> Self {
        Self::InvalidResource {
            message: message.into(),
        }
    }

    pub fn invalid_search_value(message: impl Into<String>) -> Self {
        Self::InvalidSearchValue {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn profile(message: impl Into<String>) -> Self {
        Self::Profile {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ConformanceError>;
