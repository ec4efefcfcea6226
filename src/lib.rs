//! Command-line side of arbor: replay recorded instrumentation traces through
//! the profiling engine and render the profiles it writes.

pub mod error;
pub mod report;
pub mod trace;
