//! # Swimring Hash Ring
//!
//! A rendezvous hashing ring, mapping keys onto a set of servers.
//!
//! Each server is given a fixed odd 32-bit hash when it is added. A key is owned by
//! the server with the greatest `key_hash * server_hash` weight (wrapping at 32 bits),
//! ties are broken by the lexicographically smallest server id. The result does not
//! depend on the order servers were added in, and removing a server only moves the keys
//! it owned.
//!
//! ### Basic Example
//! ```rust
//! use swimring_hashring::HashRing;
//!
//! let mut ring = HashRing::default();
//! ring.add_server("127.0.0.1:3000");
//! ring.add_server("127.0.0.1:3001");
//! ring.add_server("127.0.0.1:3002");
//!
//! let owner = ring.lookup("my-key").expect("Ring is not empty.");
//!
//! // Removing a server that is not the owner does not move the key.
//! let other = ring
//!     .servers()
//!     .find(|server| *server != owner)
//!     .map(ToString::to_string)
//!     .unwrap();
//! let owner = owner.to_string();
//! ring.remove_server(&other);
//! assert_eq!(ring.lookup("my-key"), Some(owner.as_str()));
//! ```

mod hash;
mod ring;

pub use hash::{hash, server_hash, weight};
pub use ring::{HashRing, RingEvent};
