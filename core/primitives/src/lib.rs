//! Domain types shared by the gateway relay crates: applications and load
//! balancers, blockchain descriptors, session nodes with their
//! fingerprints, the relay sending seam and the error taxonomy.

pub mod application;
pub mod blockchain;
pub mod errors;
pub mod relay;
pub mod session;
pub mod testonly;
pub mod types;
