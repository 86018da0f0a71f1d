//! Integration tests, compiled as a single test binary

mod common;
mod test_fsm;
mod test_lock;
mod test_snapshot;
