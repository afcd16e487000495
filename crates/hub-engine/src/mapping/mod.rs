//! Field mapping and primary-key matching.

pub mod fields;
pub mod fuzzy;
pub mod keys;

pub use fields::{MappingFailure, map_record, map_source_fields};
pub use keys::{KeyMatcher, MatchOutcome, MatchedRecord, match_records};
