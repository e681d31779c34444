//! A crash-safe mirror and offsite backup engine over a content-addressed
//! snapshot tree.
//!
//! See [`mirror`] and [`offsite`] for the two workflows this crate
//! supports, and [`cli`] for the binary's command surface.

pub mod archiver;
pub mod cli;
pub mod config;
pub mod diff;
pub mod discovery;
pub mod error;
pub mod filter;
pub mod hashing;
pub mod mirror;
pub mod offsite;
pub mod progress;
pub mod rcu;
pub mod sidecar;
pub mod snapshot;
pub mod store;
pub mod tree;
