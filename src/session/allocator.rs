//! Collision-free 6-digit pairing code allocation.
//!
//! The allocator draws uniform candidates and hands each one to a
//! caller-supplied insert closure; the closure performs the actual
//! uniqueness-checked insert at the storage layer and reports a collision
//! by outcome, never by pre-checking. With N active codes the expected
//! collision rate is N/1,000,000 per attempt, so a small fixed retry
//! budget is enough in practice and the loop is bounded rather than
//! open-ended.

use rand::RngExt;

use crate::error::{CoreError, Result};

/// Number of distinct pairing codes ("000000" through "999999").
const CODE_SPACE: u32 = 1_000_000;

/// Result of one atomic insert attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The candidate code was inserted; allocation succeeded.
    Inserted,
    /// The candidate collided with an existing active code; draw again.
    Collision,
}

/// Draws candidate codes and drives the atomic-insert retry loop.
#[derive(Debug, Clone)]
pub struct PairingCodeAllocator {
    max_retries: u32,
}

impl PairingCodeAllocator {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// Allocate a code unique among currently active sessions.
    ///
    /// `insert` must attempt the atomic uniqueness-checked insert for the
    /// candidate and report `Collision` on a unique-constraint hit. Any
    /// other error aborts the loop immediately. After `max_retries`
    /// collisions the allocator fails with `CoreError::Exhausted`.
    pub fn allocate<F>(&self, mut insert: F) -> Result<String>
    where
        F: FnMut(&str) -> Result<InsertOutcome>,
    {
        for attempt in 0..self.max_retries {
            let code = draw_code();
            match insert(&code)? {
                InsertOutcome::Inserted => return Ok(code),
                InsertOutcome::Collision => {
                    tracing::debug!(attempt, "pairing code collision, redrawing");
                }
            }
        }
        Err(CoreError::Exhausted {
            attempts: self.max_retries,
        })
    }
}

/// Uniform zero-padded candidate in `[0, 1_000_000)`.
fn draw_code() -> String {
    format!("{:06}", rand::rng().random_range(0..CODE_SPACE))
}

/// Whether `text` is a well-formed pairing code (exactly six ASCII digits).
pub fn is_valid_code(text: &str) -> bool {
    text.len() == 6 && text.bytes().all(|b| b.is_ascii_digit())
}
