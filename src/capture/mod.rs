//! Capture Layer
//!
//! The camera session itself lives outside this crate. This module holds the
//! captured photo and the generation token used to discard results of a
//! capture that the user has already replaced.

pub mod frame;

pub use frame::{decode_pixels, CapturedImage};

use std::sync::atomic::{AtomicU64, Ordering};

/// Identifies one capture; compared against [`CaptureGenerations`] before commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureTicket {
    generation: u64,
}

impl CaptureTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Monotonic capture counter shared by every capture of a session
#[derive(Debug, Default)]
pub struct CaptureGenerations {
    current: AtomicU64,
}

impl CaptureGenerations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new capture, invalidating every earlier ticket
    pub fn begin(&self) -> CaptureTicket {
        let generation = self.current.fetch_add(1, Ordering::AcqRel) + 1;
        CaptureTicket { generation }
    }

    /// Whether `ticket` still belongs to the latest capture
    pub fn is_current(&self, ticket: &CaptureTicket) -> bool {
        self.current.load(Ordering::Acquire) == ticket.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_capture_invalidates_previous() {
        let generations = CaptureGenerations::new();
        let first = generations.begin();
        assert!(generations.is_current(&first));

        let second = generations.begin();
        assert!(!generations.is_current(&first));
        assert!(generations.is_current(&second));
        assert!(second.generation() > first.generation());
    }
}
