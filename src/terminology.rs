//! Terminology lookups used by binding checks.
//!
//! `TerminologyService` answers two questions: is a code in a ValueSet, and is
//! a code defined by a CodeSystem. Lookup failures (unknown ValueSet, unknown
//! CodeSystem, unreachable server) are `TerminologyError`s; the binding checker
//! turns them into warnings rather than failures.
//!
//! # Example
//!
//! ```ignore
//! use octofhir_conformance::terminology::{CacheConfig, CachedTerminologyService};
//! use std::sync::Arc;
//!
//! let service: Arc<dyn TerminologyService> = Arc::new(MyTerminologyServer::new());
//! let cached = CachedTerminologyService::new(service, CacheConfig::default());
//! ```

use async_trait::async_trait;
use moka::future::Cache;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors raised when a terminology lookup cannot be performed.
#[derive(Debug, Clone, Error)]
pub enum TerminologyError {
    #[error("Value set not found: {url}")]
    ValueSetNotFound { url: String },

    #[error("Code system not found: {url}")]
    CodeSystemNotFound { url: String },

    #[error("Terminology service unavailable: {message}")]
    ServiceUnavailable { message: String },

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl TerminologyError {
    /// True when the lookup failed because the ValueSet or CodeSystem is not
    /// known to the service.
    pub fn is_unknown_terminology(&self) -> bool {
        matches!(
            self,
            TerminologyError::ValueSetNotFound { .. } | TerminologyError::CodeSystemNotFound { .. }
        )
    }
}

pub type TerminologyResult<T> = Result<T, TerminologyError>;

/// Result of a membership check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeValidationResult {
    pub valid: bool,
    pub display: Option<String>,
}

impl CodeValidationResult {
    pub fn valid() -> Self {
        Self {
            valid: true,
            display: None,
        }
    }

    pub fn valid_with_display(display: String) -> Self {
        Self {
            valid: true,
            display: Some(display),
        }
    }

    pub fn invalid() -> Self {
        Self {
            valid: false,
            display: None,
        }
    }
}

/// Trait for terminology services.
///
/// Implementations may talk to a FHIR terminology server or hold value sets in
/// memory. Both lookups are async so network-backed services fit.
#[async_trait]
pub trait TerminologyService: Send + Sync {
    /// Is `code` (optionally qualified by `system`) a member of `value_set_url`?
    async fn validate_code(
        &self,
        value_set_url: &str,
        code: &str,
        system: Option<&str>,
    ) -> TerminologyResult<CodeValidationResult>;

    /// Is `code` defined by the code system `system_url`, ignoring any ValueSet?
    async fn code_system_contains(
        &self,
        system_url: &str,
        code: &str,
    ) -> TerminologyResult<CodeValidationResult>;

    /// Does the service know `value_set_url`? Services that cannot tell say yes
    /// and let `validate_code` report the problem.
    async fn value_set_exists(&self, value_set_url: &str) -> TerminologyResult<bool> {
        let _ = value_set_url;
        Ok(true)
    }
}

/// Configuration for the terminology cache
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub max_size: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            max_size: 10_000,
        }
    }
}

impl CacheConfig {
    pub fn new(ttl: Duration, max_size: u64) -> Self {
        Self { ttl, max_size }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CacheKey {
    ValueSet {
        url: String,
        code: String,
        system: Option<String>,
    },
    CodeSystem {
        url: String,
        code: String,
    },
}

/// A cached wrapper around a TerminologyService.
///
/// Only successful lookups are cached; errors always reach the inner service
/// again so a transient outage does not stick for the whole TTL.
pub struct CachedTerminologyService {
    inner: Arc<dyn TerminologyService>,
    cache: Cache<CacheKey, CodeValidationResult>,
}

impl CachedTerminologyService {
    pub fn new(inner: Arc<dyn TerminologyService>, config: CacheConfig) -> Self {
        let cache = Cache::builder()
            .time_to_live(config.ttl)
            .max_capacity(config.max_size)
            .build();

        Self { inner, cache }
    }

    pub async fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks().await;
        self.cache.entry_count()
    }

    pub fn clear_cache(&self) {
        self.cache.invalidate_all();
    }
}

#[async_trait]
impl TerminologyService for CachedTerminologyService {
    async fn validate_code(
        &self,
        value_set_url: &str,
        code: &str,
        system: Option<&str>,
    ) -> TerminologyResult<CodeValidationResult> {
        let key = CacheKey::ValueSet {
            url: value_set_url.to_string(),
            code: code.to_string(),
            system: system.map(str::to_string),
        };

        if let Some(result) = self.cache.get(&key).await {
            return Ok(result);
        }

        let result = self
            .inner
            .validate_code(value_set_url, code, system)
            .await?;
        self.cache.insert(key, result.clone()).await;
        Ok(result)
    }

    async fn code_system_contains(
        &self,
        system_url: &str,
        code: &str,
    ) -> TerminologyResult<CodeValidationResult> {
        let key = CacheKey::CodeSystem {
            url: system_url.to_string(),
            code: code.to_string(),
        };

        if let Some(result) = self.cache.get(&key).await {
            return Ok(result);
        }

        let result = self.inner.code_system_contains(system_url, code).await?;
        self.cache.insert(key, result.clone()).await;
        Ok(result)
    }

    async fn value_set_exists(&self, value_set_url: &str) -> TerminologyResult<bool> {
        self.inner.value_set_exists(value_set_url).await
    }
}

/// (code, system) -> display
type CodeMap = HashMap<(String, Option<String>), Option<String>>;

/// In-memory value sets and code systems, for tests and offline runs.
#[derive(Debug, Default)]
pub struct InMemoryTerminologyService {
    value_sets: HashMap<String, CodeMap>,
    code_systems: HashMap<String, HashSet<String>>,
}

impl InMemoryTerminologyService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a code to a value set. The code is also registered in `system`'s
    /// code system when a system is given.
    pub fn add_code(
        &mut self,
        value_set_url: &str,
        code: &str,
        system: Option<&str>,
        display: Option<&str>,
    ) {
        self.value_sets
            .entry(value_set_url.to_string())
            .or_default()
            .insert(
                (code.to_string(), system.map(str::to_string)),
                display.map(str::to_string),
            );
        if let Some(system) = system {
            self.add_system_code(system, code);
        }
    }

    pub fn add_codes(&mut self, value_set_url: &str, codes: &[(&str, Option<&str>)]) {
        for (code, system) in codes {
            self.add_code(value_set_url, code, *system, None);
        }
    }

    /// Register a code in a code system without putting it in any value set.
    pub fn add_system_code(&mut self, system_url: &str, code: &str) {
        self.code_systems
            .entry(system_url.to_string())
            .or_default()
            .insert(code.to_string());
    }
}

#[async_trait]
impl TerminologyService for InMemoryTerminologyService {
    async fn validate_code(
        &self,
        value_set_url: &str,
        code: &str,
        system: Option<&str>,
    ) -> TerminologyResult<CodeValidationResult> {
        let Some(vs) = self.value_sets.get(value_set_url) else {
            return Err(TerminologyError::ValueSetNotFound {
                url: value_set_url.to_string(),
            });
        };

        let key = (code.to_string(), system.map(str::to_string));
        let found = vs.get(&key).or_else(|| {
            // A system-less code matches the code in any system, and a code
            // registered without a system matches any supplied system.
            if system.is_none() {
                vs.iter().find(|((c, _), _)| c == code).map(|(_, d)| d)
            } else {
                vs.get(&(code.to_string(), None))
            }
        });

        Ok(match found {
            Some(Some(display)) => CodeValidationResult::valid_with_display(display.clone()),
            Some(None) => CodeValidationResult::valid(),
            None => CodeValidationResult::invalid(),
        })
    }

    async fn code_system_contains(
        &self,
        system_url: &str,
        code: &str,
    ) -> TerminologyResult<CodeValidationResult> {
        let Some(codes) = self.code_systems.get(system_url) else {
            return Err(TerminologyError::CodeSystemNotFound {
                url: system_url.to_string(),
            });
        };
        Ok(if codes.contains(code) {
            CodeValidationResult::valid()
        } else {
            CodeValidationResult::invalid()
        })
    }

    async fn value_set_exists(&self, value_set_url: &str) -> TerminologyResult<bool> {
        Ok(self.value_sets.contains_key(value_set_url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GENDER_VS: &str = "http://hl7.org/fhir/ValueSet/administrative-gender";
    const GENDER_CS: &str = "http://hl7.org/fhir/administrative-gender";

    fn service() -> InMemoryTerminologyService {
        let mut service = InMemoryTerminologyService::new();
        service.add_code(GENDER_VS, "male", Some(GENDER_CS), Some("Male"));
        service.add_code(GENDER_VS, "female", Some(GENDER_CS), Some("Female"));
        service.add_system_code(GENDER_CS, "other");
        service
    }

    #[tokio::test]
    async fn test_in_memory_value_set() {
        let service = service();
        let result = service
            .validate_code(GENDER_VS, "male", Some(GENDER_CS))
            .await
            .unwrap();
        assert!(result.valid);
        assert_eq!(result.display, Some("Male".to_string()));

        assert!(service.validate_code(GENDER_VS, "female", None).await.unwrap().valid);
        assert!(!service.validate_code(GENDER_VS, "other", Some(GENDER_CS)).await.unwrap().valid);
    }

    #[tokio::test]
    async fn test_code_system_membership() {
        let service = service();
        assert!(service.code_system_contains(GENDER_CS, "other").await.unwrap().valid);
        assert!(service.code_system_contains(GENDER_CS, "male").await.unwrap().valid);
        assert!(!service.code_system_contains(GENDER_CS, "unknown").await.unwrap().valid);
    }

    #[tokio::test]
    async fn test_unknown_terminology_is_an_error() {
        let service = service();
        let err = service
            .validate_code("http://example.org/vs/missing", "x", None)
            .await
            .unwrap_err();
        assert!(err.is_unknown_terminology());
        assert!(err.to_string().contains("http://example.org/vs/missing"));

        let err = service
            .code_system_contains("http://example.org/cs/missing", "x")
            .await
            .unwrap_err();
        assert!(matches!(err, TerminologyError::CodeSystemNotFound { .. }));
    }

    #[tokio::test]
    async fn test_cached_service() {
        let cached = CachedTerminologyService::new(
            Arc::new(service()),
            CacheConfig::new(Duration::from_secs(60), 100),
        );

        assert!(cached.validate_code(GENDER_VS, "male", None).await.unwrap().valid);
        assert!(cached.validate_code(GENDER_VS, "male", None).await.unwrap().valid);
        assert!(cached.code_system_contains(GENDER_CS, "other").await.unwrap().valid);
        assert!(cached.validate_code("http://example.org/missing", "x", None).await.is_err());

        assert_eq!(cached.entry_count().await, 2);
    }
}
