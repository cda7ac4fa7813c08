mod addr;
mod network;

pub use addr::{get_unused_addr, make_addr};
pub use network::{LocalNetwork, LocalTransport};
