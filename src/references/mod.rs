pub mod cache;
pub mod resolution;

pub use cache::{DelayedReference, DelayedReferenceCache};
pub use resolution::ReferenceResolutionValidator;
