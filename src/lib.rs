//! # OctoFHIR Conformance
//!
//! A verification engine that judges whether a FHIR server's search replies
//! are correct: every returned resource must match the requested search
//! parameters, conform to its implementation-guide profile, and honour
//! must-support and terminology-binding obligations.
//!
//! ## Features
//!
//! - **Search matching**: token, date, reference, string and composite
//!   predicates over choice-typed and repeating elements
//! - **Status negotiation**: retries HTTP 400 replies with known status values
//! - **Pagination**: bounded `next`-link traversal with `_include`/`_revinclude` handling
//! - **IG conformance**: must-support coverage, slice discriminators, profile
//!   validation and required/extensible bindings
//! - **References**: a session cache for delayed checks and bounded,
//!   deduplicated reference resolution
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use octofhir_conformance::*;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<()> {
//! let config = ConformanceConfig::default().with_base_url("https://fhir.example.org/r4");
//! let client = Arc::new(HttpFhirClient::from_config(&config.http)?);
//! let session = SessionContext::builder(client)
//!     .with_config(config)
//!     .with_fetched_capabilities()
//!     .await
//!     .build()?;
//!
//! let profile = ProfileSpec::from_file("profiles/observation-lab.json")?;
//! let mut request = SearchRequest::new().with("patient", "85").with("category", "laboratory");
//! let validation = SearchReplyValidator::new(&session, &profile)
//!     .search_and_validate(&mut request)
//!     .await;
//! println!("{}", validation.report().verdict());
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod conformance;
pub mod error;
pub mod model;
pub mod operations;
pub mod path;
pub mod references;
pub mod search;
pub mod session;
pub mod terminology;

pub use client::{CapabilityStatement, FhirClient, FhirReply};
#[cfg(feature = "http-client")]
pub use client::HttpFhirClient;
pub use config::{ConformanceConfig, HttpConfig, Limits};
pub use conformance::{
    ConformanceProfileChecker, MandatoryElementValidator, MissingMustSupport, MustSupportTracker,
    SliceDiscriminator, StructuralFinding, StructuralValidator,
};
pub use error::Result;
pub use error::ConformanceError;
pub use model::*;
pub use operations::{check_access_denied, invoke_docref};
pub use path::{PathResolver, ResolvedNode};
pub use references::{DelayedReference, DelayedReferenceCache, ReferenceResolutionValidator};
pub use search::{
    BundlePaginator, NegotiationState, PROVENANCE_REVINCLUDE, SearchReplyValidator, SearchRequest,
    SearchValidation, StatusRetryNegotiator, StatusValueTable, check_include,
    check_provenance_revinclude,
};
pub use session::{SessionBuilder, SessionContext};
pub use terminology::{
    CacheConfig, CachedTerminologyService, InMemoryTerminologyService, TerminologyError,
    TerminologyService,
};
