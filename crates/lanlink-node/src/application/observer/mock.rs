//! Recording observer for tests.
//!
//! Stores every callback in order so tests can assert on exactly what the
//! transport reported, and offers a polling wait for events that arrive from
//! background tasks.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use lanlink_core::PeerAddress;

use super::{ConnectionObserver, TransferOutcome};

/// One recorded observer callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObservedEvent {
    Message {
        address: PeerAddress,
        text: String,
    },
    Status {
        address: PeerAddress,
        online: bool,
    },
    Progress {
        address: PeerAddress,
        file_name: String,
        percent: u8,
    },
    Finished {
        address: PeerAddress,
        file_name: String,
        outcome: TransferOutcome,
    },
}

/// A [`ConnectionObserver`] that records every event it receives.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ObservedEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all events so far, oldest first.
    pub fn events(&self) -> Vec<ObservedEvent> {
        self.lock().clone()
    }

    /// Returns the `(address, text)` pairs of all received messages.
    pub fn messages(&self) -> Vec<(PeerAddress, String)> {
        self.lock()
            .iter()
            .filter_map(|e| match e {
                ObservedEvent::Message { address, text } => Some((address.clone(), text.clone())),
                _ => None,
            })
            .collect()
    }

    /// Returns the status transitions reported for `address`, in order.
    pub fn statuses_for(&self, address: &PeerAddress) -> Vec<bool> {
        self.lock()
            .iter()
            .filter_map(|e| match e {
                ObservedEvent::Status { address: a, online } if a == address => Some(*online),
                _ => None,
            })
            .collect()
    }

    /// Returns the progress percentages reported for `file_name`, in order.
    pub fn progress_for(&self, file_name: &str) -> Vec<u8> {
        self.lock()
            .iter()
            .filter_map(|e| match e {
                ObservedEvent::Progress {
                    file_name: f,
                    percent,
                    ..
                } if f == file_name => Some(*percent),
                _ => None,
            })
            .collect()
    }

    /// Returns every transfer outcome reported for `file_name`.
    pub fn outcomes_for(&self, file_name: &str) -> Vec<TransferOutcome> {
        self.lock()
            .iter()
            .filter_map(|e| match e {
                ObservedEvent::Finished {
                    file_name: f,
                    outcome,
                    ..
                } if f == file_name => Some(outcome.clone()),
                _ => None,
            })
            .collect()
    }

    /// Polls until `predicate` holds for the recorded events or `limit`
    /// elapses.  Returns whether the predicate was satisfied.
    ///
    /// The predicate sees a snapshot, so it may call back into the observer.
    pub async fn wait_until<F>(&self, limit: Duration, mut predicate: F) -> bool
    where
        F: FnMut(&[ObservedEvent]) -> bool,
    {
        let deadline = tokio::time::Instant::now() + limit;
        loop {
            let snapshot = self.events();
            if predicate(&snapshot) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn push(&self, event: ObservedEvent) {
        self.lock().push(event);
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ObservedEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ConnectionObserver for RecordingObserver {
    fn on_message(&self, address: &PeerAddress, text: &str) {
        self.push(ObservedEvent::Message {
            address: address.clone(),
            text: text.to_string(),
        });
    }

    fn on_status_change(&self, address: &PeerAddress, online: bool) {
        self.push(ObservedEvent::Status {
            address: address.clone(),
            online,
        });
    }

    fn on_file_progress(&self, address: &PeerAddress, file_name: &str, percent: u8) {
        self.push(ObservedEvent::Progress {
            address: address.clone(),
            file_name: file_name.to_string(),
            percent,
        });
    }

    fn on_transfer_finished(&self, address: &PeerAddress, file_name: &str, outcome: &TransferOutcome) {
        self.push(ObservedEvent::Finished {
            address: address.clone(),
            file_name: file_name.to_string(),
            outcome: outcome.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_observer_keeps_events_in_order() {
        // Arrange
        let observer = RecordingObserver::new();
        let peer = PeerAddress::from("10.0.0.2");

        // Act
        observer.on_status_change(&peer, true);
        observer.on_message(&peer, "hi");
        observer.on_status_change(&peer, false);

        // Assert
        assert_eq!(observer.events().len(), 3);
        assert_eq!(observer.statuses_for(&peer), vec![true, false]);
        assert_eq!(observer.messages(), vec![(peer, "hi".to_string())]);
    }

    #[test]
    fn test_recording_observer_filters_progress_by_file() {
        let observer = RecordingObserver::new();
        let peer = PeerAddress::from("10.0.0.3");
        observer.on_file_progress(&peer, "a.bin", 40);
        observer.on_file_progress(&peer, "b.bin", 10);
        observer.on_file_progress(&peer, "a.bin", 100);
        assert_eq!(observer.progress_for("a.bin"), vec![40, 100]);
        assert_eq!(observer.progress_for("b.bin"), vec![10]);
    }

    #[test]
    fn test_recording_observer_records_transfer_outcomes() {
        let observer = RecordingObserver::new();
        let peer = PeerAddress::from("10.0.0.4");
        observer.on_transfer_finished(&peer, "c.txt", &TransferOutcome::Sent);
        assert_eq!(observer.outcomes_for("c.txt"), vec![TransferOutcome::Sent]);
        assert!(observer.outcomes_for("other").is_empty());
    }

    #[tokio::test]
    async fn test_wait_until_returns_false_on_timeout() {
        let observer = RecordingObserver::new();
        let satisfied = observer
            .wait_until(Duration::from_millis(50), |events| !events.is_empty())
            .await;
        assert!(!satisfied);
    }

    #[tokio::test]
    async fn test_wait_until_sees_events_from_other_tasks() {
        // Arrange
        let observer = std::sync::Arc::new(RecordingObserver::new());
        let writer = std::sync::Arc::clone(&observer);

        // Act
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.on_message(&PeerAddress::from("10.0.0.5"), "late");
        });

        // Assert
        assert!(
            observer
                .wait_until(Duration::from_secs(2), |events| events.len() == 1)
                .await
        );
    }
}
