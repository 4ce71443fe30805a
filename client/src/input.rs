//! Client input sequencing and confirmation tracking

use arcade_shared::{get_timestamp, InputPackage, Payload};
use std::collections::VecDeque;

/// Stamps local intent with sequence numbers and keeps it until the server confirms it
#[derive(Debug)]
pub struct InputHandler {
    next_sequence: u32,
    confirmed: u32,
    unconfirmed: VecDeque<InputPackage>,
}

impl InputHandler {
    pub fn new() -> Self {
        Self {
            next_sequence: 1,
            confirmed: 0,
            unconfirmed: VecDeque::new(),
        }
    }

    /// Wraps `payload` in the next sequenced package and returns a copy for sending
    pub fn package(&mut self, payload: Payload) -> InputPackage {
        let package = InputPackage {
            sequence: self.next_sequence,
            timestamp: get_timestamp(),
            payload,
        };
        self.next_sequence += 1;
        self.unconfirmed.push_back(package.clone());
        package
    }

    /// Drops every package up to and including `sequence`; returns how many were dropped
    pub fn confirm_up_to(&mut self, sequence: u32) -> usize {
        if sequence <= self.confirmed {
            return 0;
        }
        self.confirmed = sequence;

        let before = self.unconfirmed.len();
        while self
            .unconfirmed
            .front()
            .map_or(false, |package| package.sequence <= sequence)
        {
            self.unconfirmed.pop_front();
        }
        before - self.unconfirmed.len()
    }

    /// Packages the server has not processed yet, oldest first
    pub fn unconfirmed(&self) -> impl Iterator<Item = &InputPackage> {
        self.unconfirmed.iter()
    }

    pub fn pending(&self) -> usize {
        self.unconfirmed.len()
    }

    pub fn last_confirmed(&self) -> u32 {
        self.confirmed
    }
}

impl Default for InputHandler {
    fn default() -> Self {
        Self::new()
    }
}
