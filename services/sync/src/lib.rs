//! vmsync service library.
//!
//! This crate primarily ships a `vm-sync` binary, but we expose a library
//! surface to enable integration testing and reuse.

pub mod api;
pub mod cache;
pub mod config;
pub mod db;
pub mod engine;
pub mod notify;
pub mod propagator;
pub mod provider;
pub mod scheduler;
pub mod state;
