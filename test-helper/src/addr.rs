use std::sync::atomic::{AtomicU16, Ordering};

static NEXT_PORT: AtomicU16 = AtomicU16::new(20_000);

/// Gets a new loopback address which has not been handed out before.
pub fn get_unused_addr() -> String {
    make_addr("127.0.0.1")
}

/// Gets a new address on the given host which has not been handed out before.
pub fn make_addr(host: &str) -> String {
    let port = NEXT_PORT.fetch_add(1, Ordering::Relaxed);
    format!("{host}:{port}")
}
