//! Processing stage: schema validation, versioned persistence, and the
//! cross-source merged view.

pub mod merge;
pub mod schema;
pub mod versioning;

pub use merge::merge_batches;
pub use schema::{FieldType, SchemaRegistry, SourceSchema};
pub use versioning::VersionStore;
