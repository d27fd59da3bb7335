//! Entity type registration and discovery

pub mod registry;

pub use registry::{EntityTypeRegistry, StaticRegistry};
