//! Payload chunking for fixed-capacity characteristic slots
//!
//! A serialized snapshot rarely fits into a single characteristic value, so it
//! is cut into consecutive pieces of at most `capacity` bytes. Piece *i* is
//! published into slot *i*; a central rebuilds the document by reading the
//! slots in declared order and concatenating the values. There is no header
//! or framing: slot order is the only addressing scheme.

use crate::error::{Result, SyncError};

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// Characteristic value capacity used by the published service
pub const DEFAULT_SLOT_CAPACITY: usize = 240;

/// Number of characteristic slots in the published service
pub const DEFAULT_SLOT_COUNT: usize = 5;

// ----------------------------------------------------------------------------
// Splitting
// ----------------------------------------------------------------------------

/// Split `payload` into ordered pieces of at most `capacity` bytes.
///
/// An empty payload yields no pieces. No piece is ever empty otherwise.
pub fn split(payload: &[u8], capacity: usize) -> Result<Vec<&[u8]>> {
    if capacity == 0 {
        return Err(SyncError::InvalidCapacity);
    }

    Ok(payload.chunks(capacity).collect())
}

/// Number of pieces [`split`] produces for a payload of `len` bytes
pub fn chunk_count(len: usize, capacity: usize) -> usize {
    if capacity == 0 {
        return 0;
    }
    len.div_ceil(capacity)
}

/// Concatenate slot values back into the original payload
pub fn reassemble<V: AsRef<[u8]>>(values: &[V]) -> Vec<u8> {
    let total = values.iter().map(|v| v.as_ref().len()).sum();
    let mut payload = Vec::with_capacity(total);
    for value in values {
        payload.extend_from_slice(value.as_ref());
    }
    payload
}

// ----------------------------------------------------------------------------
// Slot Assignment
// ----------------------------------------------------------------------------

/// Values for every slot of a service, in declared slot order
///
/// Slots beyond the last chunk hold an empty value so that a shorter snapshot
/// never leaves the tail of a previous, longer one behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotAssignment {
    values: Vec<Vec<u8>>,
    used: usize,
}

impl SlotAssignment {
    /// Value assigned to slot `index`
    pub fn value(&self, index: usize) -> Option<&[u8]> {
        self.values.get(index).map(Vec::as_slice)
    }

    /// All slot values, including the empty trailing ones
    pub fn values(&self) -> &[Vec<u8>] {
        &self.values
    }

    /// Number of slots carrying payload data
    pub fn used_slots(&self) -> usize {
        self.used
    }

    /// Total number of slots covered by this assignment
    pub fn slot_count(&self) -> usize {
        self.values.len()
    }

    pub fn into_values(self) -> Vec<Vec<u8>> {
        self.values
    }
}

/// Assign chunk *i* to slot *i* for a service with `slot_count` slots.
///
/// Fails with [`SyncError::CapacityExceeded`] instead of truncating when there
/// are more chunks than slots.
pub fn assign(chunks: &[&[u8]], slot_count: usize) -> Result<SlotAssignment> {
    if chunks.len() > slot_count {
        return Err(SyncError::CapacityExceeded {
            chunks: chunks.len(),
            slots: slot_count,
        });
    }

    let mut values = Vec::with_capacity(slot_count);
    values.extend(chunks.iter().map(|chunk| chunk.to_vec()));
    values.resize(slot_count, Vec::new());

    Ok(SlotAssignment {
        values,
        used: chunks.len(),
    })
}

/// Split `payload` and assign the pieces to `slot_count` slots in one step
pub fn layout(payload: &[u8], capacity: usize, slot_count: usize) -> Result<SlotAssignment> {
    let chunks = split(payload, capacity)?;
    assign(&chunks, slot_count)
}
