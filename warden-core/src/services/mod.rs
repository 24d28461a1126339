//! Service layer for business logic
//!
//! Services wrap a repository with policy: thresholds, block windows, clock
//! access and logging.

pub mod brute_force;

pub use brute_force::BruteForceGuard;
