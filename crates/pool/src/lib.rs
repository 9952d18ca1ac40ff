//! The timed object pool (spec.md C3): a short-lived cache of objects we've
//! learned about from untrusted peers, plus a much larger set of hashes
//! we've since seen accepted by a trusted validator.
//!
//! The pool exists because we learn about blocks and transactions from
//! untrusted peers before any validator has blessed them: we must forward to
//! validators immediately (`provide_object`) but delay fan-out to clients
//! until trusted acceptance is observed (`inv_good`). `relayed` stops us
//! fanning the same object out twice once it has dropped out of `objects`,
//! whether by eviction or by a prior acceptance.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use relay_net::PeerGroup;
use relay_types::{Hash32, RelayObject, ToNetworkMessage};
use tracing::trace;

/// TTL for a freshly-inserted object (spec.md §4.3: "insertion time + 60s").
pub const OBJECT_TTL: Duration = Duration::from_secs(60);

/// `relayed` capacity for a block pool (spec.md §4.3 / P2).
pub const BLOCK_RELAYED_CAPACITY: usize = 100;

/// `relayed` capacity for a transaction pool (spec.md §4.3 / P2).
pub const TX_RELAYED_CAPACITY: usize = 10_000;

struct State<T> {
    // Insertion order, for FIFO TTL eviction; O(1) removal by hash via `by_hash`.
    order: VecDeque<(Hash32, Instant)>,
    by_hash: HashMap<Hash32, T>,
    // FIFO-evicting set, reimplemented locally rather than reusing
    // `BoundedFifoSet` because `inv_good` needs to know whether an insertion
    // was novel *and* keep it under the same lock as `objects` (spec.md's
    // "invGood is atomic with respect to provideObject... both sections
    // synchronize on the pool").
    relayed_order: VecDeque<Hash32>,
    relayed: HashSet<Hash32>,
    relayed_capacity: usize,
}

impl<T> State<T> {
    fn should_request_inv(&self, hash: &Hash32) -> bool {
        !self.relayed.contains(hash) && !self.by_hash.contains_key(hash)
    }

    fn mark_relayed(&mut self, hash: Hash32) -> bool {
        if !self.relayed.insert(hash) {
            return false;
        }
        self.relayed_order.push_back(hash);
        if self.relayed_order.len() > self.relayed_capacity {
            if let Some(evicted) = self.relayed_order.pop_front() {
                self.relayed.remove(&evicted);
            }
        }
        true
    }

    fn evict_expired(&mut self, now: Instant) {
        while let Some((hash, expiry)) = self.order.front() {
            if *expiry > now {
                break;
            }
            let (hash, _) = self.order.pop_front().expect("checked by front()");
            self.by_hash.remove(&hash);
        }
    }
}

/// Generic over `T ∈ {bitcoin::Block, bitcoin::Transaction}` (spec.md's
/// `ObjectPool<T>`), so the cache, eviction and fan-out logic is written
/// once and instantiated for both object kinds.
pub struct ObjectPool<T: RelayObject> {
    state: Mutex<State<T>>,
    ttl: Duration,
}

impl<T: RelayObject + ToNetworkMessage> ObjectPool<T> {
    pub fn new(ttl: Duration, relayed_capacity: usize) -> Arc<Self> {
        let pool = Arc::new(Self {
            state: Mutex::new(State {
                order: VecDeque::new(),
                by_hash: HashMap::new(),
                relayed_order: VecDeque::new(),
                relayed: HashSet::new(),
                relayed_capacity,
            }),
            ttl,
        });

        let evictor = pool.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            loop {
                ticker.tick().await;
                let now = Instant::now();
                evictor.state.lock().expect("pool mutex poisoned").evict_expired(now);
            }
        });

        pool
    }

    pub fn for_blocks() -> Arc<Self> {
        Self::new(OBJECT_TTL, BLOCK_RELAYED_CAPACITY)
    }

    pub fn for_transactions() -> Arc<Self> {
        Self::new(OBJECT_TTL, TX_RELAYED_CAPACITY)
    }

    /// spec.md §4.3: true iff `h ∉ relayed ∧ h ∉ objects`.
    pub fn should_request_inv(&self, hash: &Hash32) -> bool {
        self.state.lock().expect("pool mutex poisoned").should_request_inv(hash)
    }

    /// spec.md §4.3 / P6: if `hash(o) ∉ relayed`, cache `o` with a fresh
    /// expiry; either way, forward it to the trusted-outbound group — we are
    /// not the bottleneck if our own acceptance logic later errs.
    pub async fn provide_object(&self, object: T, trusted_outbound: &PeerGroup) {
        let hash = object.object_hash();
        let already_relayed = {
            let mut state = self.state.lock().expect("pool mutex poisoned");
            if state.relayed.contains(&hash) {
                true
            } else {
                state.by_hash.insert(hash, object.clone());
                state.order.push_back((hash, Instant::now() + self.ttl));
                false
            }
        };

        if already_relayed {
            trace!(hash = %relay_types::short_hex(&hash), "provide_object: already relayed, forwarding anyway");
        }

        trusted_outbound.relay_object(&object).await;
    }

    pub fn get_object(&self, hash: &Hash32) -> Option<T> {
        self.state.lock().expect("pool mutex poisoned").by_hash.get(hash).cloned()
    }

    /// spec.md §4.3: atomically remove `h` from `objects`, capturing it;
    /// if `h ∉ relayed`, insert into `relayed`. Outside the critical
    /// section, if we captured an object and the hash was newly relayed,
    /// broadcast it to `clients_group`.
    pub async fn inv_good(&self, clients_group: &PeerGroup, hash: Hash32) {
        let (captured, newly_relayed) = {
            let mut state = self.state.lock().expect("pool mutex poisoned");
            let captured = if let Some(pos) = state.order.iter().position(|(h, _)| *h == hash) {
                state.order.remove(pos);
                state.by_hash.remove(&hash)
            } else {
                state.by_hash.remove(&hash)
            };
            let newly_relayed = state.mark_relayed(hash);
            (captured, newly_relayed)
        };

        if let Some(object) = captured {
            if newly_relayed {
                clients_group.relay_object(&object).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::blockdata::constants::genesis_block;
    use bitcoin::hashes::Hash as _;
    use bitcoin::Network;

    use super::*;

    fn test_block() -> bitcoin::Block {
        genesis_block(Network::Bitcoin)
    }

    fn object_hash(block: &bitcoin::Block) -> Hash32 {
        block.block_hash().to_byte_array()
    }

    #[tokio::test]
    async fn should_request_inv_is_true_for_unknown_hash() {
        let pool = ObjectPool::<bitcoin::Block>::new(OBJECT_TTL, BLOCK_RELAYED_CAPACITY);
        assert!(pool.should_request_inv(&[1u8; 32]));
    }

    // R1: provide_object then inv_good results in exactly one relay on the
    // clients group and one on the trusted group, and the hash is promoted
    // to `relayed` so a later provide_object is a no-op on `objects`.
    #[tokio::test]
    async fn provide_then_inv_good_promotes_to_relayed() {
        let pool = ObjectPool::<bitcoin::Block>::new(OBJECT_TTL, BLOCK_RELAYED_CAPACITY);
        let trusted_outbound = PeerGroup::new();
        let clients = PeerGroup::new();
        let block = test_block();
        let hash = object_hash(&block);

        pool.provide_object(block.clone(), &trusted_outbound).await;
        assert!(pool.get_object(&hash).is_some());

        pool.inv_good(&clients, hash).await;
        assert!(pool.get_object(&hash).is_none());
        assert!(!pool.should_request_inv(&hash));
    }

    // P6: provide_object on a hash already in `relayed` is a no-op on
    // `objects` (get_object stays None) even though the call itself
    // succeeds.
    #[tokio::test]
    async fn provide_object_after_relayed_is_a_no_op_on_objects() {
        let pool = ObjectPool::<bitcoin::Block>::new(OBJECT_TTL, BLOCK_RELAYED_CAPACITY);
        let trusted_outbound = PeerGroup::new();
        let clients = PeerGroup::new();
        let block = test_block();
        let hash = object_hash(&block);

        pool.provide_object(block.clone(), &trusted_outbound).await;
        pool.inv_good(&clients, hash).await;

        pool.provide_object(block.clone(), &trusted_outbound).await;
        assert!(pool.get_object(&hash).is_none());
    }
}
