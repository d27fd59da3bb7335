//! Utilities shared across the library

pub mod cache;
pub mod logging;
pub mod naming;

pub use cache::{Cache, TtlCache};
pub use naming::{format_name, get_index_name, truncate_identifier};
