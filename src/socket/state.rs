//! Monotonic ready-state cell

use super::ReadyState;
use std::sync::atomic::{AtomicU8, Ordering};

/// Ready state that can only move forward
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    /// New cell in `Connecting`
    pub fn new() -> Self {
        Self(AtomicU8::new(ReadyState::Connecting as u8))
    }

    /// Current state
    pub fn get(&self) -> ReadyState {
        ReadyState::from_u8(self.0.load(Ordering::SeqCst))
    }

    /// Move to `to` unless already past it; returns the previous state
    pub fn advance(&self, to: ReadyState) -> ReadyState {
        ReadyState::from_u8(self.0.fetch_max(to as u8, Ordering::SeqCst))
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}
