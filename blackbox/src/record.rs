//! Records handed over by the upstream producer and the outcome codes
//! reported back once a record has been persisted or dropped.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Local};

/// A time-stamped, opaque binary record.
///
/// Immutable once created. Ownership moves from the producer into whichever
/// recorder queue accepts it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    timestamp: DateTime<Local>,
    payload: Vec<u8>,
}

impl Record {
    /// Creates a record stamped with the current local time.
    pub fn new(payload: Vec<u8>) -> Self {
        Self::with_timestamp(Local::now(), payload)
    }

    /// Creates a record with an explicit timestamp.
    pub fn with_timestamp(timestamp: DateTime<Local>, payload: Vec<u8>) -> Self {
        Self { timestamp, payload }
    }

    /// The time the record was captured.
    pub fn timestamp(&self) -> DateTime<Local> {
        self.timestamp
    }

    /// The payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty. Empty records are never persisted.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Result of handling one dequeued record.
///
/// The numeric codes are stable and match what external consumers of the
/// completion callback expect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteOutcome {
    /// The frame file was written.
    Written,
    /// Creating or writing the frame file failed.
    WriteFailed,
    /// The write would exceed the session budget and was skipped.
    CapacityExceeded,
}

impl WriteOutcome {
    /// Numeric outcome code: 0 written, 1 write failure, 2 capacity exceeded.
    pub fn code(self) -> u8 {
        match self {
            Self::Written => 0,
            Self::WriteFailed => 1,
            Self::CapacityExceeded => 2,
        }
    }

    /// Whether the record reached the disk.
    pub fn is_written(self) -> bool {
        self == Self::Written
    }
}

impl fmt::Display for WriteOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Written => f.write_str("written"),
            Self::WriteFailed => f.write_str("write failed"),
            Self::CapacityExceeded => f.write_str("capacity exceeded"),
        }
    }
}

/// Callback invoked by a recorder's consumer thread after every record,
/// with the volume identifier and the outcome.
pub type CompletionFn = Arc<dyn Fn(&str, WriteOutcome) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_codes() {
        assert_eq!(WriteOutcome::Written.code(), 0);
        assert_eq!(WriteOutcome::WriteFailed.code(), 1);
        assert_eq!(WriteOutcome::CapacityExceeded.code(), 2);
        assert!(WriteOutcome::Written.is_written());
        assert!(!WriteOutcome::CapacityExceeded.is_written());
    }

    #[test]
    fn test_record_accessors() {
        let record = Record::new(vec![1, 2, 3]);
        assert_eq!(record.len(), 3);
        assert_eq!(record.payload(), &[1, 2, 3]);
        assert!(!record.is_empty());
        assert!(Record::new(Vec::new()).is_empty());
    }
}
