//! Implementation-guide conformance: slices, must-support coverage, profiles
//! and terminology bindings.

pub mod must_support;
pub mod profile;
pub mod slicing;

pub use must_support::{MissingMustSupport, MustSupportTracker};
pub use profile::{
    ConformanceProfileChecker, FindingSeverity, MandatoryElementValidator, StructuralFinding,
    StructuralValidator,
};
pub use slicing::SliceDiscriminator;
