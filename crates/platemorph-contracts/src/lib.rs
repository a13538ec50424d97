pub mod assets;
pub mod attributes;
pub mod commands;
pub mod events;
pub mod store;
