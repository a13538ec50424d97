mod catalog;
mod selection;

pub use catalog::{directive_for, list_attributes, AttributeEntry, AttributeKind};
pub use selection::AttributeSelection;
