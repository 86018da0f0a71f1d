//! Domain models

pub mod plan;
pub mod target;
