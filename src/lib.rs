//! # Swimring
//! Cluster membership and request routing for sharded services in Rust.
//!
//! This is a convenience package which includes all of the sub-projects within
//! swimring, realistically you probably only want some of these projects:
//!
//! ### Features
//! - `swimring_hashring` - A rendezvous hashing ring mapping keys onto servers.
//! - `swimring_node` - SWIM style gossip membership, failure detection and cluster joining.
//! - `swimring_proxy` - Forwards keyed requests to the member owning them.

#[cfg(feature = "swimring-hashring")]
pub use swimring_hashring as hashring;
#[cfg(feature = "swimring-node")]
pub use swimring_node as node;
#[cfg(feature = "swimring-proxy")]
pub use swimring_proxy as proxy;
