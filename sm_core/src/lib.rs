pub mod backoff;
pub mod errors;
pub mod matcher;
pub mod service;

pub use backoff::Backoff;
pub use errors::Error;
pub use matcher::{MatchedUnit, Scope, exact_match, filter_matching, resolve_unit, strip_unit_ext};
pub use service::Service;
