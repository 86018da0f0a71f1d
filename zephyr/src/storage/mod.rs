//! Local storage: metadata layout and settings

pub mod layout;
pub mod settings;
