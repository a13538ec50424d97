mod dryrun;
mod gemini;
mod response;

use std::collections::BTreeMap;

pub use dryrun::DryrunBackend;
pub use gemini::{GeminiBackend, GeminiConfig};
pub use response::{extract_image_url, Candidate, GenerateContentResponse, InlineImage, ResponsePart};

use crate::directives::DirectivePayload;
use crate::error::GenerationError;

/// A remote (or simulated) image synthesis capability.
///
/// Implementations dispatch exactly one request per call and never retry;
/// the returned string is a displayable `data:` URL.
pub trait GenerationBackend: Send + Sync {
    fn name(&self) -> &str;
    fn generate(&self, payload: &DirectivePayload) -> Result<String, GenerationError>;
}

#[derive(Default)]
pub struct BackendRegistry {
    backends: BTreeMap<String, Box<dyn GenerationBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<B: GenerationBackend + 'static>(&mut self, backend: B) {
        self.backends
            .insert(backend.name().to_string(), Box::new(backend));
    }

    pub fn get(&self, name: &str) -> Option<&dyn GenerationBackend> {
        self.backends.get(name).map(|backend| backend.as_ref())
    }

    /// Removes and returns a backend so it can be moved onto a worker thread.
    pub fn take(&mut self, name: &str) -> Option<Box<dyn GenerationBackend>> {
        self.backends.remove(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.backends.keys().cloned().collect()
    }
}

pub fn default_registry(gemini: GeminiConfig) -> BackendRegistry {
    let mut backends = BackendRegistry::new();
    backends.register(DryrunBackend::new());
    backends.register(GeminiBackend::new(gemini));
    backends
}
