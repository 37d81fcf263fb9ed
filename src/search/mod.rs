//! Search issuing, matching and reply validation.

pub mod date;
pub mod includes;
pub mod paginator;
pub mod predicates;
pub mod request;
pub mod status_retry;
pub mod validator;
pub mod values;

pub use date::{DatePrecision, DateRange, SearchPrefix, comparator_value};
pub use includes::{PROVENANCE_REVINCLUDE, check_include, check_provenance_revinclude};
pub use paginator::{BundlePaginator, PaginatedResults, contains_data_absent_reason};
pub use predicates::{MatchResult, matches, parse_token_value};
pub use request::{
    RESULT_CONTROL_PARAMS, SearchRequest, is_result_control, join_multi_value, split_multi_value,
};
pub use status_retry::{
    Negotiation, NegotiationState, StatusParam, StatusRetryNegotiator, StatusValueTable,
};
pub use validator::{SearchReplyValidator, SearchValidation};
pub use values::{comparator_search_values, derive_from_any, derive_search_value};
