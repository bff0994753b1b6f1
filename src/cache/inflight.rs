//! In-flight computation registry for request coalescing.
//!
//! The first caller for a cold key becomes the leader and owns a watch
//! channel stored in the map; everyone else subscribes. The entry is removed
//! before the result is published, so a caller arriving afterwards starts a
//! new flight instead of subscribing to a finished one.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::watch;

use crate::error::FetchError;

pub(crate) type FlightOutcome = Result<Value, FetchError>;

type FlightSender = Arc<watch::Sender<Option<FlightOutcome>>>;

#[derive(Debug, Clone, Default)]
pub(crate) struct InflightMap {
    flights: Arc<DashMap<String, FlightSender>>,
}

pub(crate) enum Flight {
    Leader(LeaderGuard),
    Follower(watch::Receiver<Option<FlightOutcome>>),
}

impl InflightMap {
    pub(crate) fn join_or_lead(&self, key: &str) -> Flight {
        match self.flights.entry(key.to_string()) {
            dashmap::Entry::Occupied(entry) => Flight::Follower(entry.get().subscribe()),
            dashmap::Entry::Vacant(entry) => {
                let (tx, _) = watch::channel(None);
                let tx = Arc::new(tx);
                entry.insert(Arc::clone(&tx));
                Flight::Leader(LeaderGuard {
                    flights: Arc::clone(&self.flights),
                    key: key.to_string(),
                    tx,
                })
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.flights.len()
    }
}

/// Wait for the leader's outcome. `None` means the leader was dropped
/// without finishing and the caller should try again.
pub(crate) async fn follow(mut rx: watch::Receiver<Option<FlightOutcome>>) -> Option<FlightOutcome> {
    loop {
        if let Some(outcome) = rx.borrow_and_update().clone() {
            return Some(outcome);
        }
        if rx.changed().await.is_err() {
            return rx.borrow().clone();
        }
    }
}

/// Ownership of one in-flight computation. Dropping it without calling
/// [`LeaderGuard::complete`] releases waiting followers.
pub(crate) struct LeaderGuard {
    flights: Arc<DashMap<String, FlightSender>>,
    key: String,
    tx: FlightSender,
}

impl LeaderGuard {
    fn unregister(&self) {
        self.flights
            .remove_if(&self.key, |_, registered| Arc::ptr_eq(registered, &self.tx));
    }

    pub(crate) fn complete(self, outcome: FlightOutcome) {
        self.unregister();
        self.tx.send_replace(Some(outcome));
    }
}

impl Drop for LeaderGuard {
    fn drop(&mut self) {
        self.unregister();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_followers_receive_leader_outcome() {
        let map = InflightMap::default();
        let Flight::Leader(leader) = map.join_or_lead("k") else {
            panic!("first caller leads");
        };
        let Flight::Follower(rx) = map.join_or_lead("k") else {
            panic!("second caller follows");
        };
        assert_eq!(map.len(), 1);

        let waiter = tokio::spawn(follow(rx));
        leader.complete(Ok(json!(7)));
        assert_eq!(map.len(), 0);
        assert_eq!(waiter.await.unwrap().unwrap().unwrap(), json!(7));
    }

    #[tokio::test]
    async fn test_followers_receive_leader_error() {
        let map = InflightMap::default();
        let Flight::Leader(leader) = map.join_or_lead("k") else {
            panic!("first caller leads");
        };
        let Flight::Follower(rx) = map.join_or_lead("k") else {
            panic!("second caller follows");
        };
        leader.complete(Err(FetchError::Dropped("boom".into())));
        assert!(matches!(follow(rx).await, Some(Err(FetchError::Dropped(_)))));
    }

    #[tokio::test]
    async fn test_dropped_leader_releases_followers() {
        let map = InflightMap::default();
        let leader = map.join_or_lead("k");
        let Flight::Follower(rx) = map.join_or_lead("k") else {
            panic!("second caller follows");
        };
        drop(leader);
        assert_eq!(map.len(), 0);
        assert!(follow(rx).await.is_none());
        assert!(matches!(map.join_or_lead("k"), Flight::Leader(_)));
    }
}
