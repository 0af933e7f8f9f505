//! Per-stream frame ring used by the simulated runtime.
//!
//! Positions are monotonically increasing byte counters:
//! - `write_head`: total bytes ever accepted
//! - `read_tail`: total bytes ever released by the consumer
//!
//! `write_head - read_tail` is the pending span. A record that would push the
//! pending span past `capacity` is dropped and counted instead of overwriting
//! data the consumer has not released yet.

use bytes::{Bytes, BytesMut};
use mmdev_core::{DriverError, DriverErrorKind};
use std::collections::VecDeque;

use super::source::DRIVER_TYPE;

/// Bounded FIFO of encoded frame records.
#[derive(Debug)]
pub struct FrameRing {
    capacity: usize,
    records: VecDeque<Bytes>,
    write_head: u64,
    read_tail: u64,
    dropped: u64,
}

impl FrameRing {
    /// Ring holding at most `capacity` pending bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            records: VecDeque::new(),
            write_head: 0,
            read_tail: 0,
            dropped: 0,
        }
    }

    /// Total bytes ever accepted.
    pub fn write_head(&self) -> u64 {
        self.write_head
    }

    /// Total bytes ever released.
    pub fn read_tail(&self) -> u64 {
        self.read_tail
    }

    /// Records refused because the ring was full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Bytes written but not yet released.
    pub fn pending(&self) -> usize {
        (self.write_head - self.read_tail) as usize
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.write_head == self.read_tail
    }

    /// Append one encoded record. Returns `false` when it was dropped.
    pub fn push(&mut self, record: Bytes) -> bool {
        if self.pending() + record.len() > self.capacity {
            self.dropped += 1;
            return false;
        }
        self.write_head += record.len() as u64;
        self.records.push_back(record);
        true
    }

    /// Contiguous copy of everything between tail and head.
    pub fn span(&self) -> Bytes {
        match self.records.len() {
            0 => Bytes::new(),
            1 => self.records[0].clone(),
            _ => {
                let mut out = BytesMut::with_capacity(self.pending());
                for record in &self.records {
                    out.extend_from_slice(record);
                }
                out.freeze()
            }
        }
    }

    /// Advance the tail by `consumed` bytes. Must end on a record boundary.
    pub fn advance_tail(&mut self, consumed: usize) -> Result<(), DriverError> {
        if consumed > self.pending() {
            return Err(DriverError::new(
                DRIVER_TYPE,
                DriverErrorKind::InvalidParameter,
                format!(
                    "cannot release {} bytes, only {} pending",
                    consumed,
                    self.pending()
                ),
            ));
        }

        let mut boundary = 0;
        let whole = self
            .records
            .iter()
            .take_while(|r| {
                boundary += r.len();
                boundary <= consumed
            })
            .count();
        let released: usize = self.records.iter().take(whole).map(Bytes::len).sum();
        if released != consumed {
            return Err(DriverError::new(
                DRIVER_TYPE,
                DriverErrorKind::InvalidParameter,
                format!("release of {} bytes splits a frame record", consumed),
            ));
        }

        self.records.drain(..whole);
        self.read_tail += consumed as u64;
        Ok(())
    }
}
