//! Classroom rewards ledger
//!
//! Students earn XP and classroom currency, spend it in a teacher-run shop
//! and collect black marks. Every balance change is written atomically
//! with the record that explains it, over a pluggable document store.

pub mod auth;
pub mod config;
pub mod model;
pub mod portal;
pub mod services;
pub mod storage;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod utils;
