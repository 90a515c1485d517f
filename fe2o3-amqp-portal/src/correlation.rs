//! Connection-wide correlation of in-flight requests to their replies.

use std::collections::HashMap;

use fe2o3_amqp_types::{
    messaging::{Body, Message, MessageId},
    primitives::Value,
};
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::{error::Error, operation::LinkClass};

/// A reply routed back to an awaiting caller.
#[derive(Debug)]
pub(crate) enum Reply {
    /// An ordinary reply message. The delivery has been settled by the
    /// reply router.
    Message(Box<Message<Body<Value>>>),

    /// A mutex grant. The grant delivery stays parked unsettled in the
    /// reply router until the caller releases the lock; `dropped` fires
    /// if the server revokes the acquisition first.
    Grant {
        /// The grant reply message.
        message: Box<Message<Body<Value>>>,
        /// Fires when the server drops the acquisition.
        dropped: oneshot::Receiver<()>,
    },
}

/// One outstanding request.
#[derive(Debug)]
pub(crate) struct InFlight {
    pub(crate) class: LinkClass,
    tx: oneshot::Sender<Result<Reply, Error>>,
}

impl InFlight {
    /// Hands the reply to the caller. Returns the reply if the caller is
    /// gone (timed out between lookup and completion).
    pub(crate) fn complete(self, reply: Reply) -> Result<(), Reply> {
        match self.tx.send(Ok(reply)) {
            Ok(()) => Ok(()),
            Err(Ok(reply)) => Err(reply),
            // only Ok values are sent through this channel
            Err(Err(_)) => Ok(()),
        }
    }

    pub(crate) fn fail(self, error: Error) {
        let _ = self.tx.send(Err(error));
    }
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    entries: HashMap<MessageId, InFlight>,
}

/// The single reply-routing oracle of a connection.
///
/// Correlation ids are monotonically increasing and never reused within
/// the connection's lifetime. Exactly one entry exists per outstanding
/// call; removal is idempotent.
#[derive(Debug, Default)]
pub(crate) struct Correlator {
    inner: Mutex<Inner>,
}

impl Correlator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Allocates the next correlation id and registers the completion.
    pub(crate) fn register(
        &self,
        class: LinkClass,
    ) -> (MessageId, oneshot::Receiver<Result<Reply, Error>>) {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.inner.lock();
        let id = MessageId::from(inner.next_id);
        inner.next_id = inner.next_id.wrapping_add(1);
        inner.entries.insert(id.clone(), InFlight { class, tx });
        (id, rx)
    }

    /// Removes an entry without completing it. Idempotent.
    pub(crate) fn cancel(&self, id: &MessageId) {
        self.inner.lock().entries.remove(id);
    }

    /// Removes and returns the entry for a reply, if one is outstanding.
    pub(crate) fn take(&self, id: &MessageId) -> Option<InFlight> {
        self.inner.lock().entries.remove(id)
    }

    /// Fails one outstanding entry, if present.
    pub(crate) fn fail(&self, id: &MessageId, error: Error) {
        if let Some(entry) = self.take(id) {
            entry.fail(error);
        }
    }

    /// Fails every outstanding entry. Used on connection loss.
    pub(crate) fn fail_all(&self, error: impl Fn() -> Error) {
        let entries = std::mem::take(&mut self.inner.lock().entries);
        for (_, entry) in entries {
            entry.fail(error());
        }
    }

    /// Number of outstanding entries.
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_monotonic() {
        let correlator = Correlator::new();
        let (a, _rx_a) = correlator.register(LinkClass::Fetch);
        let (b, _rx_b) = correlator.register(LinkClass::Mutex);
        assert_ne!(a, b);
        assert_eq!(correlator.len(), 2);
    }

    #[test]
    fn cancel_is_idempotent() {
        let correlator = Correlator::new();
        let (id, mut rx) = correlator.register(LinkClass::Fetch);
        correlator.cancel(&id);
        correlator.cancel(&id);
        assert_eq!(correlator.len(), 0);
        // the completion is dropped without a value
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn take_removes_the_entry() {
        let correlator = Correlator::new();
        let (id, _rx) = correlator.register(LinkClass::Fetch);
        assert!(correlator.take(&id).is_some());
        assert!(correlator.take(&id).is_none());
    }

    #[tokio::test]
    async fn completion_reaches_the_caller() {
        let correlator = Correlator::new();
        let (id, rx) = correlator.register(LinkClass::Fetch);
        let entry = correlator.take(&id).unwrap();
        assert_eq!(entry.class, LinkClass::Fetch);
        let message = Message::builder().body(Body::<Value>::Empty).build();
        entry.complete(Reply::Message(Box::new(message))).unwrap();

        match rx.await.unwrap().unwrap() {
            Reply::Message(_) => {}
            Reply::Grant { .. } => panic!("expected a plain reply"),
        }
    }

    #[test]
    fn fail_all_clears_the_table() {
        let correlator = Correlator::new();
        let (_a, mut rx_a) = correlator.register(LinkClass::Fetch);
        let (_b, mut rx_b) = correlator.register(LinkClass::Mutex);
        correlator.fail_all(|| Error::ConnectionLost);
        assert_eq!(correlator.len(), 0);
        assert!(matches!(rx_a.try_recv(), Ok(Err(Error::ConnectionLost))));
        assert!(matches!(rx_b.try_recv(), Ok(Err(Error::ConnectionLost))));
    }
}
