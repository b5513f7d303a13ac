//! Signing gateway for the dealer account ledger.
//!
//! [`identity`] loads the X.509 identity and P-256 key the gateway signs
//! with, [`client`] drives contract calls through the ledger protocol, and
//! [`api`] exposes them over HTTP.

pub mod api;
pub mod client;
pub mod config;
pub mod identity;
