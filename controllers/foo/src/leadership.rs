//! Shared leadership state.
//!
//! Holds this process's election identity and the last leader observed by
//! the election loop. The election loop is the only writer; reconcilers,
//! probes and the shutdown path read it.

use futures::{Stream, StreamExt, future};
use std::time::Duration;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

/// Synchronized cell with this replica's identity and the current leader.
///
/// The leader is kept in a `watch` channel: writes are exclusive, readers
/// always see a whole value, and waiters are woken on every change.
#[derive(Debug)]
pub struct LeadershipState {
    identity: String,
    leader: watch::Sender<Option<String>>,
}

impl LeadershipState {
    /// Creates the state for `identity` with no leader observed yet.
    pub fn new(identity: impl Into<String>) -> Self {
        let (leader, _) = watch::channel(None);
        Self {
            identity: identity.into(),
            leader,
        }
    }

    /// This replica's election identity.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Records `leader` as the current leader.
    ///
    /// An empty name means no leader is known. Returns `true` if the value
    /// changed.
    pub fn set_leader(&self, leader: &str) -> bool {
        let leader = Some(leader).filter(|l| !l.is_empty());
        self.leader.send_if_modified(|current| {
            if current.as_deref() == leader {
                return false;
            }
            *current = leader.map(str::to_string);
            true
        })
    }

    /// The last observed leader, if any.
    pub fn leader(&self) -> Option<String> {
        self.leader.borrow().clone()
    }

    /// Whether the last observed leader is this replica.
    pub fn is_leader(&self) -> bool {
        self.leader.borrow().as_deref() == Some(self.identity.as_str())
    }

    /// Yields once each time this replica becomes the leader.
    ///
    /// Repeated observations of the same leader do not yield. If this
    /// replica already leads when the stream is first polled, it yields
    /// straight away.
    pub fn leadership_acquired(&self) -> impl Stream<Item = ()> + Send + Sync + use<> {
        let identity = self.identity.clone();
        let mut was_leader = false;
        WatchStream::new(self.leader.subscribe()).filter_map(move |leader| {
            let is_leader = leader.as_deref() == Some(identity.as_str());
            let acquired = is_leader && !was_leader;
            was_leader = is_leader;
            future::ready(acquired.then_some(()))
        })
    }

    /// Waits until a leader has been observed and returns it.
    ///
    /// Wakes on every `set_leader`; `poll_interval` bounds each sleep.
    pub async fn wait_for_leader(&self, poll_interval: Duration) -> String {
        let mut changes = self.leader.subscribe();
        loop {
            if let Some(leader) = changes.borrow_and_update().clone() {
                return leader;
            }
            // Err means the sender is gone, which cannot happen while &self is alive
            let _ = tokio::time::timeout(poll_interval, changes.changed()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_no_leader_until_first_observation() {
        let state = LeadershipState::new("a");
        assert_eq!(state.identity(), "a");
        assert_eq!(state.leader(), None);
        assert!(!state.is_leader());
    }

    #[test]
    fn test_is_leader_iff_leader_is_self() {
        let state = LeadershipState::new("a");

        for (leader, expected) in [("b", false), ("a", true), ("c", false), ("a", true)] {
            state.set_leader(leader);
            assert_eq!(state.is_leader(), expected, "leader {:?}", leader);
            assert_eq!(state.leader().as_deref(), Some(leader));
        }

        state.set_leader("");
        assert!(!state.is_leader());
        assert_eq!(state.leader(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_leader_keeps_waiters_blocked() {
        let state = Arc::new(LeadershipState::new("a"));
        assert!(!state.set_leader(""));

        let waiter = {
            let state = state.clone();
            tokio::spawn(async move { state.wait_for_leader(Duration::from_millis(100)).await })
        };

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!waiter.is_finished());

        state.set_leader("b");
        assert_eq!(waiter.await.unwrap(), "b");
    }

    async fn quiet(stream: &mut (impl Stream<Item = ()> + Unpin)) -> bool {
        tokio::time::timeout(Duration::from_secs(1), stream.next()).await.is_err()
    }

    #[tokio::test(start_paused = true)]
    async fn test_leadership_acquired_fires_on_each_takeover() {
        let state = LeadershipState::new("a");
        let mut acquired = Box::pin(state.leadership_acquired());

        assert!(quiet(&mut acquired).await, "no leader yet");

        state.set_leader("b");
        assert!(quiet(&mut acquired).await, "another replica leads");

        state.set_leader("a");
        assert_eq!(acquired.next().await, Some(()));

        state.set_leader("a");
        assert!(quiet(&mut acquired).await, "still the same leader");

        state.set_leader("b");
        assert!(quiet(&mut acquired).await, "lost leadership");

        state.set_leader("a");
        assert_eq!(acquired.next().await, Some(()));
    }

    #[test]
    fn test_set_leader_reports_changes() {
        let state = LeadershipState::new("a");
        assert!(state.set_leader("b"));
        assert!(!state.set_leader("b"));
        assert!(state.set_leader("a"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_last_write_wins_under_concurrent_readers() {
        let state = Arc::new(LeadershipState::new("replica-0"));
        let written: Vec<String> = (0..500).map(|i| format!("replica-{}", i)).collect();

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let state = state.clone();
                let written = written.clone();
                tokio::spawn(async move {
                    for _ in 0..2_000 {
                        if let Some(leader) = state.leader() {
                            assert!(written.contains(&leader), "torn read: {}", leader);
                        }
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();

        let writer = {
            let state = state.clone();
            let written = written.clone();
            tokio::spawn(async move {
                for leader in &written {
                    state.set_leader(leader);
                    tokio::task::yield_now().await;
                }
            })
        };

        writer.await.unwrap();
        for reader in readers {
            reader.await.unwrap();
        }

        assert_eq!(state.leader().as_deref(), Some("replica-499"));
        assert!(!state.is_leader());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_leader_wakes_on_set() {
        let state = Arc::new(LeadershipState::new("a"));

        let waiter = {
            let state = state.clone();
            tokio::spawn(async move { state.wait_for_leader(Duration::from_secs(3600)).await })
        };

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!waiter.is_finished());

        state.set_leader("b");
        assert_eq!(waiter.await.unwrap(), "b");
    }

    #[tokio::test]
    async fn test_wait_for_leader_returns_immediately_when_known() {
        let state = LeadershipState::new("a");
        state.set_leader("a");
        assert_eq!(state.wait_for_leader(Duration::from_secs(1)).await, "a");
    }
}
