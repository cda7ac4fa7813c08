/// The 32-bit hash used for keys, server ids and checksums.
///
/// This must be identical on every node in the cluster, which rules out
/// the randomly seeded hashers from the standard library.
#[inline]
pub fn hash(data: impl AsRef<[u8]>) -> u32 {
    crc32fast::hash(data.as_ref())
}

#[inline]
/// Produces the fixed hash of a server id.
///
/// The hash is forced odd, an even (or zero) multiplier would collapse
/// the low bits of every weight computed with it.
pub fn server_hash(server: &str) -> u32 {
    hash(server) | 1
}

#[inline]
/// The rendezvous weight of a key on a given server.
///
/// This is `(key_hash * server_hash) mod 2^32`.
pub fn weight(key_hash: u32, server_hash: u32) -> u32 {
    key_hash.wrapping_mul(server_hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Multiplies two 32-bit values by splitting them into 16-bit halves.
    fn split_multiply(a: u32, b: u32) -> u32 {
        let a_hi = a >> 16;
        let a_lo = a & 0xffff;
        let b_lo = b & 0xffff;
        let b_hi = b >> 16;

        let low = a_lo * b_lo;
        let cross = (a_hi.wrapping_mul(b_lo)).wrapping_add(a_lo.wrapping_mul(b_hi));
        low.wrapping_add(cross << 16)
    }

    #[test]
    fn test_server_hash_is_odd() {
        for i in 0..1_000 {
            let server = format!("10.0.0.{}:{}", i % 255, 3000 + i);
            assert_eq!(server_hash(&server) % 2, 1);
        }
    }

    #[test]
    fn test_weight_matches_split_multiply() {
        let samples = [
            (0, 1),
            (1, 1),
            (u32::MAX, u32::MAX),
            (0xdead_beef, 0x1234_5679),
            (hash("key-1"), server_hash("127.0.0.1:3000")),
        ];

        for (key, server) in samples {
            assert_eq!(weight(key, server), split_multiply(key, server));
        }
    }

    #[test]
    fn test_hash_is_stable() {
        // crc32 is fixed by the IEEE polynomial, nodes built separately must agree.
        assert_eq!(hash("123456789"), 0xcbf4_3926);
    }
}
