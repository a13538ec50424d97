pub mod directives;
pub mod error;
pub mod generation;
pub mod ingest;
pub mod workspace;

#[cfg(test)]
mod test_support;

pub use directives::{compose, DirectivePayload};
pub use error::{GenerationError, IngestError};
pub use generation::{default_registry, BackendRegistry, GenerationBackend};
pub use workspace::{Slot, Workspace, WorkspaceState};
