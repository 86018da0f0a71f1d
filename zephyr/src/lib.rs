//! Zephyr Library
//!
//! Core modules for the zephyr deployment orchestrator.

pub mod app;
pub mod console;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod models;
pub mod prompt;
pub mod ssh;
pub mod storage;
pub mod utils;
