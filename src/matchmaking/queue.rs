//! Matchmaking Queue
//!
//! FIFO waiting list of players. Every join appends and then pairs the two
//! oldest entries for as long as at least two are waiting. Queue mutation and
//! the pairing pass share one critical section; notifying the matched
//! players happens after the lock is released, so a slow channel never stalls
//! other joins or leaves.
//!
//! Notification is best-effort. A pair is final once it leaves the queue:
//! a player who cannot be reached loses the notification and is not
//! re-enqueued.

use std::collections::VecDeque;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::core::identity::{IdentityError, PlayerId};
use crate::network::protocol::match_found_text;
use crate::network::registry::{ConnectionRegistry, DeliveryOutcome};

/// Input rejected before touching the queue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// Identity was missing or blank.
    #[error(transparent)]
    InvalidIdentity(#[from] IdentityError),
}

/// Result of a join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Newly enqueued (and possibly already paired).
    Queued,
    /// Identity was already waiting; nothing changed.
    AlreadyQueued,
}

/// Result of a leave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// Entry removed.
    Removed,
    /// Identity was not waiting.
    NotQueued,
}

/// Two players taken from the queue together, oldest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchPair {
    /// Earlier arrival.
    pub first: PlayerId,
    /// Later arrival.
    pub second: PlayerId,
}

/// Delivery results for one pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchReport {
    /// The pair that was formed.
    pub pair: MatchPair,
    /// Outcome of notifying `pair.first`.
    pub first_delivery: DeliveryOutcome,
    /// Outcome of notifying `pair.second`.
    pub second_delivery: DeliveryOutcome,
}

/// Join result with the pairs formed during that call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinReport {
    /// What happened to the joining identity.
    pub outcome: JoinOutcome,
    /// Pairs formed and notified by this join.
    pub matches: Vec<MatchReport>,
}

/// Process-wide matchmaking queue.
pub struct MatchmakingQueue {
    waiting: Mutex<VecDeque<PlayerId>>,
    registry: Arc<ConnectionRegistry>,
}

impl MatchmakingQueue {
    /// Create an empty queue notifying through `registry`.
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            waiting: Mutex::new(VecDeque::new()),
            registry,
        }
    }

    /// Enqueue `identity` and pair whoever can be paired.
    pub async fn join(&self, identity: &str) -> Result<JoinOutcome, QueueError> {
        Ok(self.join_with_report(identity).await?.outcome)
    }

    /// Like [`join`](Self::join), also returning the pairs this call formed.
    #[instrument(skip(self))]
    pub async fn join_with_report(&self, identity: &str) -> Result<JoinReport, QueueError> {
        let player = PlayerId::parse(identity)?;

        let pairs = {
            let mut waiting = self.waiting.lock().await;
            if waiting.contains(&player) {
                info!("Player [{}] is already in the matchmaking queue", player);
                return Ok(JoinReport {
                    outcome: JoinOutcome::AlreadyQueued,
                    matches: Vec::new(),
                });
            }

            waiting.push_back(player.clone());
            info!("Player [{}] added to the matchmaking queue", player);
            Self::pairing_pass(&mut waiting)
        };

        let mut matches = Vec::with_capacity(pairs.len());
        for pair in pairs {
            matches.push(self.notify(pair).await);
        }

        Ok(JoinReport {
            outcome: JoinOutcome::Queued,
            matches,
        })
    }

    /// Remove `identity` if it is waiting.
    #[instrument(skip(self))]
    pub async fn leave(&self, identity: &str) -> Result<LeaveOutcome, QueueError> {
        let player = PlayerId::parse(identity)?;

        let mut waiting = self.waiting.lock().await;
        match waiting.iter().position(|p| *p == player) {
            Some(index) => {
                waiting.remove(index);
                info!("Player [{}] removed from the matchmaking queue", player);
                Ok(LeaveOutcome::Removed)
            }
            None => {
                info!("Player [{}] is not in the matchmaking queue", player);
                Ok(LeaveOutcome::NotQueued)
            }
        }
    }

    /// Number of waiting players.
    pub async fn len(&self) -> usize {
        self.waiting.lock().await.len()
    }

    /// True if nobody is waiting.
    pub async fn is_empty(&self) -> bool {
        self.waiting.lock().await.is_empty()
    }

    /// Whether `identity` is currently waiting.
    pub async fn contains(&self, identity: &str) -> bool {
        self.waiting.lock().await.iter().any(|p| p.as_str() == identity)
    }

    /// Drain the queue two at a time, oldest first. Caller holds the lock.
    fn pairing_pass(waiting: &mut VecDeque<PlayerId>) -> Vec<MatchPair> {
        let mut pairs = Vec::new();
        while waiting.len() >= 2 {
            let (Some(first), Some(second)) = (waiting.pop_front(), waiting.pop_front()) else {
                break;
            };
            info!("Match created between [{}] and [{}]", first, second);
            pairs.push(MatchPair { first, second });
        }
        pairs
    }

    /// Tell each side of `pair` who their opponent is.
    async fn notify(&self, pair: MatchPair) -> MatchReport {
        let first_delivery = self
            .registry
            .send_to(pair.first.as_str(), &match_found_text(&pair.second))
            .await;
        let second_delivery = self
            .registry
            .send_to(pair.second.as_str(), &match_found_text(&pair.first))
            .await;

        for (player, outcome) in [(&pair.first, &first_delivery), (&pair.second, &second_delivery)] {
            if outcome.is_delivered() {
                debug!("Notified [{}] of match", player);
            } else {
                warn!("Could not notify [{}] of match: {:?}", player, outcome);
            }
        }

        MatchReport {
            pair,
            first_delivery,
            second_delivery,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::registry::test_support::RecordingTransport;
    use proptest::prelude::*;
    use rand::seq::SliceRandom;
    use std::collections::HashSet;

    fn setup() -> (Arc<ConnectionRegistry>, MatchmakingQueue) {
        let registry = Arc::new(ConnectionRegistry::new());
        let queue = MatchmakingQueue::new(registry.clone());
        (registry, queue)
    }

    async fn connect(registry: &ConnectionRegistry, name: &str) -> Arc<RecordingTransport> {
        let transport = RecordingTransport::new();
        registry
            .register(PlayerId::parse(name).unwrap(), transport.clone())
            .await;
        transport
    }

    #[tokio::test]
    async fn test_join_pairs_and_notifies() {
        let (registry, queue) = setup();
        let p1 = connect(&registry, "p1").await;
        let p2 = connect(&registry, "p2").await;

        assert_eq!(queue.join("p1").await, Ok(JoinOutcome::Queued));
        assert_eq!(queue.join("p1").await, Ok(JoinOutcome::AlreadyQueued));
        assert_eq!(queue.len().await, 1);

        let report = queue.join_with_report("p2").await.unwrap();
        assert_eq!(report.outcome, JoinOutcome::Queued);
        assert_eq!(report.matches.len(), 1);
        assert_eq!(report.matches[0].pair.first.as_str(), "p1");
        assert_eq!(report.matches[0].pair.second.as_str(), "p2");

        assert_eq!(p1.sent(), vec!["Match found! Your opponent is p2".to_string()]);
        assert_eq!(p2.sent(), vec!["Match found! Your opponent is p1".to_string()]);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_leave_unknown_identity() {
        let (_, queue) = setup();
        assert_eq!(queue.leave("ghost").await, Ok(LeaveOutcome::NotQueued));
    }

    #[tokio::test]
    async fn test_join_then_leave_empties_queue() {
        let (_, queue) = setup();
        queue.join("solo").await.unwrap();
        assert!(queue.contains("solo").await);

        assert_eq!(queue.leave("solo").await, Ok(LeaveOutcome::Removed));
        assert!(queue.is_empty().await);
        assert_eq!(queue.leave("solo").await, Ok(LeaveOutcome::NotQueued));
    }

    #[tokio::test]
    async fn test_blank_identity_rejected_without_mutation() {
        let (_, queue) = setup();
        queue.join("waiting").await.unwrap();

        for blank in ["", "  ", "\t"] {
            assert!(matches!(queue.join(blank).await, Err(QueueError::InvalidIdentity(_))));
            assert!(matches!(queue.leave(blank).await, Err(QueueError::InvalidIdentity(_))));
        }
        assert_eq!(queue.len().await, 1);
        assert!(queue.contains("waiting").await);
    }

    #[tokio::test]
    async fn test_leave_after_pairing_is_noop() {
        let (registry, queue) = setup();
        let a = connect(&registry, "a").await;
        let _b = connect(&registry, "b").await;

        queue.join("a").await.unwrap();
        queue.join("b").await.unwrap();

        assert_eq!(queue.leave("a").await, Ok(LeaveOutcome::NotQueued));
        assert_eq!(a.sent(), vec!["Match found! Your opponent is b".to_string()]);
    }

    #[tokio::test]
    async fn test_fifo_pairing_order() {
        let (_, queue) = setup();
        let mut pairs = Vec::new();
        for name in ["a", "b", "c", "d", "e"] {
            let report = queue.join_with_report(name).await.unwrap();
            pairs.extend(report.matches.into_iter().map(|m| m.pair));
        }

        let names: Vec<(&str, &str)> = pairs
            .iter()
            .map(|p| (p.first.as_str(), p.second.as_str()))
            .collect();
        assert_eq!(names, vec![("a", "b"), ("c", "d")]);
        assert!(queue.contains("e").await);
    }

    #[tokio::test]
    async fn test_disconnected_player_loses_notification() {
        let (registry, queue) = setup();
        let present = connect(&registry, "present").await;

        queue.join("absent").await.unwrap();
        let report = queue.join_with_report("present").await.unwrap();

        let m = &report.matches[0];
        assert_eq!(m.first_delivery, DeliveryOutcome::NoSuchIdentity);
        assert_eq!(m.second_delivery, DeliveryOutcome::Delivered);
        assert_eq!(present.sent(), vec!["Match found! Your opponent is absent".to_string()]);

        // The pairing stands: nobody is put back.
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_failed_first_delivery_still_notifies_second() {
        let (registry, queue) = setup();
        let first = connect(&registry, "first").await;
        let second = connect(&registry, "second").await;
        first.close();

        queue.join("first").await.unwrap();
        let report = queue.join_with_report("second").await.unwrap();

        assert_eq!(report.matches[0].first_delivery, DeliveryOutcome::ChannelClosed);
        assert_eq!(second.sent().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_joins_pair_everyone_once() {
        let (registry, queue) = setup();
        let queue = Arc::new(queue);

        let mut names: Vec<String> = (0..200).map(|i| format!("player-{i}")).collect();
        names.shuffle(&mut rand::thread_rng());
        for name in &names {
            connect(&registry, name).await;
        }

        let mut handles = Vec::new();
        for name in names.clone() {
            let queue = queue.clone();
            handles.push(tokio::spawn(async move {
                queue.join_with_report(&name).await.unwrap()
            }));
        }

        let mut paired = Vec::new();
        for handle in handles {
            let report = handle.await.unwrap();
            assert_eq!(report.outcome, JoinOutcome::Queued);
            for m in report.matches {
                paired.push(m.pair.first.into_inner());
                paired.push(m.pair.second.into_inner());
            }
        }

        let unique: HashSet<&String> = paired.iter().collect();
        assert_eq!(unique.len(), paired.len(), "an identity was paired twice");
        assert_eq!(paired.len(), names.len());
        assert!(queue.is_empty().await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_duplicate_joins_enqueue_once() {
        let (_, queue) = setup();
        let queue = Arc::new(queue);

        let mut handles = Vec::new();
        for _ in 0..50 {
            let queue = queue.clone();
            handles.push(tokio::spawn(async move { queue.join("same").await.unwrap() }));
        }

        let mut queued = 0;
        for handle in handles {
            if handle.await.unwrap() == JoinOutcome::Queued {
                queued += 1;
            }
        }
        assert_eq!(queued, 1);
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_join_and_leave_settle_each_player_once() {
        let (registry, queue) = setup();
        let queue = Arc::new(queue);

        let names: Vec<String> = (0..120).map(|i| format!("racer-{i}")).collect();
        for name in &names {
            connect(&registry, name).await;
        }

        // One join and one leave per player, spawned in random order.
        let mut ops: Vec<(String, bool)> = names
            .iter()
            .flat_map(|n| [(n.clone(), true), (n.clone(), false)])
            .collect();
        ops.shuffle(&mut rand::thread_rng());

        let mut joins = Vec::new();
        let mut leaves = Vec::new();
        for (name, is_join) in ops {
            let queue = queue.clone();
            if is_join {
                joins.push(tokio::spawn(async move {
                    queue.join_with_report(&name).await.unwrap()
                }));
            } else {
                leaves.push(tokio::spawn(async move {
                    let outcome = queue.leave(&name).await.unwrap();
                    (name, outcome)
                }));
            }
        }

        let mut paired: Vec<String> = Vec::new();
        for handle in joins {
            let report = handle.await.unwrap();
            assert_eq!(report.outcome, JoinOutcome::Queued);
            for m in report.matches {
                paired.push(m.pair.first.into_inner());
                paired.push(m.pair.second.into_inner());
            }
        }
        let mut removed: HashSet<String> = HashSet::new();
        for handle in leaves {
            let (name, outcome) = handle.await.unwrap();
            if outcome == LeaveOutcome::Removed {
                removed.insert(name);
            }
        }

        let paired_set: HashSet<&String> = paired.iter().collect();
        assert_eq!(paired_set.len(), paired.len(), "an identity was paired twice");

        let mut still_queued = 0;
        for name in &names {
            let in_pair = paired_set.contains(name);
            let was_removed = removed.contains(name);
            let waiting = queue.contains(name).await;
            assert!(!(in_pair && was_removed), "{name} was both paired and removed");
            assert_eq!(
                [in_pair, was_removed, waiting].iter().filter(|b| **b).count(),
                1,
                "{name} paired={in_pair} removed={was_removed} waiting={waiting}"
            );
            if waiting {
                still_queued += 1;
            }
        }
        assert!(still_queued <= 1);
        assert_eq!(queue.len().await, still_queued);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Join(u8),
        Leave(u8),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..6).prop_map(Op::Join),
            (0u8..6).prop_map(Op::Leave),
        ]
    }

    proptest! {
        #[test]
        fn prop_queue_never_holds_duplicates(ops in proptest::collection::vec(op_strategy(), 0..60)) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let (_, queue) = setup();

                for op in ops {
                    match op {
                        Op::Join(n) => {
                            let report = queue.join_with_report(&format!("p{n}")).await.unwrap();
                            for m in report.matches {
                                prop_assert_ne!(&m.pair.first, &m.pair.second);
                            }
                        }
                        Op::Leave(n) => {
                            queue.leave(&format!("p{n}")).await.unwrap();
                        }
                    }

                    let waiting = queue.waiting.lock().await;
                    let unique: HashSet<&PlayerId> = waiting.iter().collect();
                    prop_assert_eq!(unique.len(), waiting.len());
                    prop_assert!(waiting.len() < 2);
                }
                Ok(())
            })?;
        }

        #[test]
        fn prop_first_two_distinct_joins_pair_in_order(a in "[a-z]{1,8}", b in "[a-z]{1,8}") {
            prop_assume!(a != b);
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let (_, queue) = setup();
                queue.join(&a).await.unwrap();
                let report = queue.join_with_report(&b).await.unwrap();
                prop_assert_eq!(report.matches.len(), 1);
                prop_assert_eq!(report.matches[0].pair.first.as_str(), a.as_str());
                prop_assert_eq!(report.matches[0].pair.second.as_str(), b.as_str());
                Ok(())
            })?;
        }
    }
}
