use std::cmp::Ordering;

use crate::hash::{hash, server_hash, weight};

#[derive(Debug, Clone, PartialEq, Eq)]
/// A change which has been applied to the ring.
pub enum RingEvent {
    /// A single server was added to the ring.
    Added { server: String, checksum: u32 },
    /// A single server was removed from the ring.
    Removed { server: String, checksum: u32 },
    /// A batch of servers were added and removed.
    Changed {
        added: Vec<String>,
        removed: Vec<String>,
        checksum: u32,
    },
}

impl RingEvent {
    /// The ring checksum after the change was applied.
    pub fn checksum(&self) -> u32 {
        match self {
            RingEvent::Added { checksum, .. } => *checksum,
            RingEvent::Removed { checksum, .. } => *checksum,
            RingEvent::Changed { checksum, .. } => *checksum,
        }
    }
}

#[derive(Debug, Clone)]
/// A rendezvous hash ring.
///
/// Server names and their hashes are kept in two parallel vectors, the order
/// of the servers has no effect on any lookups.
pub struct HashRing {
    hashes: Vec<u32>,
    servers: Vec<String>,
    checksum: u32,
}

impl Default for HashRing {
    fn default() -> Self {
        Self {
            hashes: Vec::new(),
            servers: Vec::new(),
            checksum: compute_checksum(&[]),
        }
    }
}

impl HashRing {
    /// Creates a new ring populated with the given servers.
    pub fn with_servers(servers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let mut ring = Self::default();
        for server in servers {
            let server = server.into();
            if ring.position(&server).is_none() {
                ring.hashes.push(server_hash(&server));
                ring.servers.push(server);
            }
        }
        ring.checksum = compute_checksum(&ring.servers);
        ring
    }

    #[inline]
    /// The number of servers in the ring.
    pub fn len(&self) -> usize {
        self.servers.len()
    }

    #[inline]
    /// Returns if the ring has no servers.
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    #[inline]
    /// The checksum of the sorted set of servers in the ring.
    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    /// Returns if the server is part of the ring.
    pub fn has_server(&self, server: &str) -> bool {
        self.position(server).is_some()
    }

    /// An iterator over the servers in the ring in no particular order.
    pub fn servers(&self) -> impl Iterator<Item = &str> {
        self.servers.iter().map(|s| s.as_str())
    }

    /// Adds a server to the ring.
    ///
    /// Returns `None` if the server is already present.
    pub fn add_server(&mut self, server: impl Into<String>) -> Option<RingEvent> {
        let server = server.into();
        if self.has_server(&server) {
            return None;
        }

        self.hashes.push(server_hash(&server));
        self.servers.push(server.clone());
        self.checksum = compute_checksum(&self.servers);

        Some(RingEvent::Added {
            server,
            checksum: self.checksum,
        })
    }

    /// Removes a server from the ring.
    ///
    /// Returns `None` if the server is not present.
    pub fn remove_server(&mut self, server: &str) -> Option<RingEvent> {
        let idx = self.position(server)?;

        self.hashes.swap_remove(idx);
        let server = self.servers.swap_remove(idx);
        self.checksum = compute_checksum(&self.servers);

        Some(RingEvent::Removed {
            server,
            checksum: self.checksum,
        })
    }

    /// Adds and removes a batch of servers, recomputing the checksum once.
    ///
    /// Returns `None` if the ring is left unchanged.
    pub fn add_remove_servers(
        &mut self,
        to_add: impl IntoIterator<Item = impl Into<String>>,
        to_remove: impl IntoIterator<Item = impl AsRef<str>>,
    ) -> Option<RingEvent> {
        let mut added = Vec::new();
        let mut removed = Vec::new();

        for server in to_add {
            let server = server.into();
            if self.has_server(&server) {
                continue;
            }

            self.hashes.push(server_hash(&server));
            self.servers.push(server.clone());
            added.push(server);
        }

        for server in to_remove {
            if let Some(idx) = self.position(server.as_ref()) {
                self.hashes.swap_remove(idx);
                removed.push(self.servers.swap_remove(idx));
            }
        }

        if added.is_empty() && removed.is_empty() {
            return None;
        }

        self.checksum = compute_checksum(&self.servers);
        Some(RingEvent::Changed {
            added,
            removed,
            checksum: self.checksum,
        })
    }

    /// Finds the server which owns the given key.
    ///
    /// Returns `None` if the ring is empty.
    pub fn lookup(&self, key: impl AsRef<[u8]>) -> Option<&str> {
        let key_hash = hash(key);

        let mut best: Option<(u32, &str)> = None;
        for (server_hash, server) in self.hashes.iter().zip(self.servers.iter()) {
            let candidate = (weight(key_hash, *server_hash), server.as_str());
            best = match best {
                None => Some(candidate),
                Some(current) if rank(&candidate, &current) == Ordering::Less => {
                    Some(candidate)
                },
                other => other,
            };
        }

        best.map(|(_, server)| server)
    }

    /// Finds the `n` preferred servers for the given key.
    ///
    /// Servers are ordered from the highest weight to the lowest, the first entry
    /// is always the same as [HashRing::lookup].
    pub fn lookup_n(&self, key: impl AsRef<[u8]>, n: usize) -> Vec<&str> {
        let key_hash = hash(key);

        let mut weighted = self
            .hashes
            .iter()
            .zip(self.servers.iter())
            .map(|(server_hash, server)| (weight(key_hash, *server_hash), server.as_str()))
            .collect::<Vec<_>>();
        weighted.sort_unstable_by(rank);

        weighted
            .into_iter()
            .take(n)
            .map(|(_, server)| server)
            .collect()
    }

    fn position(&self, server: &str) -> Option<usize> {
        self.servers.iter().position(|s| s == server)
    }
}

/// Orders candidates by descending weight then ascending server id.
fn rank(a: &(u32, &str), b: &(u32, &str)) -> Ordering {
    b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1))
}

fn compute_checksum(servers: &[String]) -> u32 {
    let mut sorted = servers.iter().map(|s| s.as_str()).collect::<Vec<_>>();
    sorted.sort_unstable();
    hash(sorted.join(";"))
}
