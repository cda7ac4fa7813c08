use rand::seq::SliceRandom;
use rand::Rng;

use crate::membership::Membership;

#[derive(Debug, Default)]
/// Cycles through the pingable members in a random order.
///
/// Every member is visited once per pass, the order is reshuffled at the
/// start of each pass so new members are picked up.
pub(crate) struct MemberIterator {
    order: Vec<String>,
    cursor: usize,
}

impl MemberIterator {
    /// The next member to ping or `None` if there are no pingable members.
    pub(crate) fn next<R: Rng + ?Sized>(
        &mut self,
        membership: &Membership,
        rng: &mut R,
    ) -> Option<String> {
        let mut reshuffled = false;

        loop {
            if self.cursor >= self.order.len() {
                if reshuffled {
                    return None;
                }

                self.order = membership.pingable_addresses();
                self.order.shuffle(rng);
                self.cursor = 0;
                reshuffled = true;

                if self.order.is_empty() {
                    return None;
                }
            }

            let candidate = &self.order[self.cursor];
            self.cursor += 1;

            let pingable = membership
                .find(candidate)
                .map(|m| m.status.is_pingable())
                .unwrap_or(false);
            if pingable && candidate != membership.local_address() {
                return Some(candidate.clone());
            }
        }
    }
}
