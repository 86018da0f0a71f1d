//! Deployment module

pub mod command;
pub mod executor;
pub mod fsm;
pub mod git;
pub mod lock;
pub mod orchestrator;
pub mod planner;
pub mod runlog;
pub mod snapshot;
