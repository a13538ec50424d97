mod json_file;
mod memory;

pub use json_file::JsonFileStore;
pub use memory::MemoryStore;

pub const REFERENCE_KEY: &str = "platemorph.reference";
pub const TARGET_KEY: &str = "platemorph.target";
pub const ATTRIBUTES_KEY: &str = "platemorph.attributes";

/// Every key a workspace owns; cleared together on reset.
pub const WORKSPACE_KEYS: [&str; 3] = [REFERENCE_KEY, TARGET_KEY, ATTRIBUTES_KEY];

/// String key/value persistence used to carry a workspace across sessions.
///
/// `set` with an unchanged value and `remove` of an absent key must both be
/// harmless, so callers can sync every key after every transition.
pub trait KeyValueStore: Send {
    fn get(&mut self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()>;
    fn remove(&mut self, key: &str) -> anyhow::Result<()>;
}
