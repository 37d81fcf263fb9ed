//! Run configuration

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::error::{ConformanceError, Result};

/// Configuration for one conformance session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConformanceConfig {
    /// Sampling bounds
    #[serde(default)]
    pub limits: Limits,

    /// Server connection settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Reference target types recorded for delayed checks
    #[serde(default = "default_delayed_reference_types")]
    pub delayed_reference_types: Vec<String>,
}

/// Bounds that stand in for timeouts on unbounded result sets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Limits {
    /// Maximum bundle pages followed per search
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,

    /// Maximum distinct references read per resolution check
    #[serde(default = "default_max_resolutions")]
    pub max_resolutions: usize,

    /// Reads in flight at once during reference resolution
    #[serde(default = "default_max_concurrent_reads")]
    pub max_concurrent_reads: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_pages: default_max_pages(),
            max_resolutions: default_max_resolutions(),
            max_concurrent_reads: default_max_concurrent_reads(),
        }
    }
}

/// Server connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// FHIR base URL, e.g. `https://fhir.example.org/r4`
    #[serde(default)]
    pub base_url: Option<String>,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Bearer token sent with every request
    #[serde(default)]
    pub bearer_token: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: default_timeout(),
            bearer_token: None,
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ConformanceConfig {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            http: HttpConfig::default(),
            delayed_reference_types: default_delayed_reference_types(),
        }
    }
}

impl ConformanceConfig {
    /// Load configuration from a JSON file. Missing fields take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.http.base_url = Some(base_url.into());
        self
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.http.bearer_token = Some(token.into());
        self
    }

    /// Parsed base URL, if one is configured.
    pub fn base_url(&self) -> Result<Option<Url>> {
        self.http
            .base_url
            .as_deref()
            .map(Url::parse)
            .transpose()
            .map_err(ConformanceError::from)
    }

    /// Should references to `resource_type` be recorded for delayed checks?
    pub fn is_delayed_type(&self, resource_type: &str) -> bool {
        self.delayed_reference_types
            .iter()
            .any(|t| t == resource_type)
    }

    pub fn validate(&self) -> Result<()> {
        if self.limits.max_pages == 0 {
            return Err(ConformanceError::config("limits.max_pages must be greater than 0"));
        }

        if self.limits.max_resolutions == 0 {
            return Err(ConformanceError::config(
                "limits.max_resolutions must be greater than 0",
            ));
        }

        if self.limits.max_concurrent_reads == 0 {
            return Err(ConformanceError::config(
                "limits.max_concurrent_reads must be greater than 0",
            ));
        }

        if self.http.timeout_secs == 0 {
            return Err(ConformanceError::config("http.timeout_secs must be greater than 0"));
        }

        self.base_url()?;

        Ok(())
    }
}

fn default_max_pages() -> usize {
    20
}

fn default_max_resolutions() -> usize {
    50
}

fn default_max_concurrent_reads() -> usize {
    4
}

fn default_timeout() -> u64 {
    30
}

fn default_delayed_reference_types() -> Vec<String> {
    [
        "Practitioner",
        "PractitionerRole",
        "Organization",
        "Location",
        "Medication",
        "Encounter",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}
