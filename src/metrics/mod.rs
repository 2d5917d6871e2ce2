pub mod definitions;
pub mod registry;
pub mod types;
