//! Deferred replies to queued MPSSE commands
//!
//! MPSSE replies carry no tag: the only thing correlating reply bytes with
//! the command that produced them is the order in which commands were
//! queued. Each reply-bearing command gets a [`Reply`] slot that the engine
//! fills during the flush that sends it.

use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::error::Result;

/// Check run on a reply's bytes at the moment they arrive
///
/// Runs on the flushing thread while the engine is locked; it must not
/// queue commands on the same engine.
pub type Validator = Box<dyn Fn(&[u8]) -> Result<()> + Send>;

/// Handle to the reply of a queued command
///
/// The handle is cheap to clone; all clones observe the same slot.
#[derive(Clone)]
pub struct Reply {
    expected: usize,
    slot: Arc<OnceLock<Vec<u8>>>,
}

impl Reply {
    pub(crate) fn pending(expected: usize) -> Self {
        Self {
            expected,
            slot: Arc::new(OnceLock::new()),
        }
    }

    /// A reply for a command that produces no bytes
    pub(crate) fn empty() -> Self {
        let reply = Self::pending(0);
        reply.fulfill(Vec::new());
        reply
    }

    /// Number of reply bytes the command produces
    pub fn expected_len(&self) -> usize {
        self.expected
    }

    /// Whether a flush has delivered this reply
    pub fn is_fulfilled(&self) -> bool {
        self.slot.get().is_some()
    }

    /// The reply bytes
    ///
    /// # Panics
    ///
    /// Panics if the command has not been flushed yet; that is a queue
    /// ordering bug in the caller, not a device fault.
    pub fn value(&self) -> &[u8] {
        match self.slot.get() {
            Some(bytes) => bytes,
            None => panic!(
                "reply of {} bytes read before a flush fulfilled it",
                self.expected
            ),
        }
    }

    /// First reply byte
    pub fn byte(&self) -> u8 {
        self.value()[0]
    }

    fn fulfill(&self, bytes: Vec<u8>) {
        assert_eq!(bytes.len(), self.expected, "reply length mismatch");
        if self.slot.set(bytes).is_err() {
            panic!("reply fulfilled twice");
        }
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reply")
            .field("expected", &self.expected)
            .field("value", &self.slot.get())
            .finish()
    }
}

/// Engine-side bookkeeping for a reply that has not arrived yet
pub(crate) struct PendingReply {
    reply: Reply,
    validator: Option<Validator>,
}

impl PendingReply {
    pub(crate) fn new(reply: Reply, validator: Option<Validator>) -> Self {
        Self { reply, validator }
    }

    pub(crate) fn expected_len(&self) -> usize {
        self.reply.expected
    }

    /// Validate and store the bytes
    ///
    /// The bytes are stored even when validation fails so the slot is
    /// never left pending after its share of the stream was consumed.
    pub(crate) fn fulfill(self, bytes: Vec<u8>) -> Result<()> {
        let checked = match &self.validator {
            Some(validate) => validate(&bytes),
            None => Ok(()),
        };
        self.reply.fulfill(bytes);
        checked
    }
}

impl fmt::Debug for PendingReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingReply")
            .field("expected", &self.reply.expected)
            .field("validated", &self.validator.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MpsseError;

    #[test]
    fn test_fulfill_exposes_value() {
        let reply = Reply::pending(2);
        let pending = PendingReply::new(reply.clone(), None);
        assert!(!reply.is_fulfilled());
        pending.fulfill(vec![0xFA, 0xAB]).unwrap();
        assert!(reply.is_fulfilled());
        assert_eq!(reply.value(), &[0xFA, 0xAB]);
    }

    #[test]
    fn test_validator_failure_still_stores_value() {
        let reply = Reply::pending(1);
        let validator: Validator = Box::new(|bytes| {
            if bytes[0] != 0 {
                Err(MpsseError::Nack { byte: 0x42 })
            } else {
                Ok(())
            }
        });
        let pending = PendingReply::new(reply.clone(), Some(validator));
        assert!(pending.fulfill(vec![1]).unwrap_err().is_nack());
        assert_eq!(reply.byte(), 1);
    }

    #[test]
    fn test_empty_reply_is_fulfilled() {
        let reply = Reply::empty();
        assert!(reply.is_fulfilled());
        assert!(reply.value().is_empty());
    }

    #[test]
    #[should_panic(expected = "before a flush")]
    fn test_reading_pending_reply_panics() {
        let reply = Reply::pending(1);
        let _ = reply.value();
    }

    #[test]
    #[should_panic(expected = "fulfilled twice")]
    fn test_double_fulfill_panics() {
        let reply = Reply::pending(1);
        reply.fulfill(vec![0]);
        reply.fulfill(vec![0]);
    }
}
