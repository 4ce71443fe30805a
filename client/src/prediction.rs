//! Client-side prediction and misprediction smoothing

use crate::interpolation::float;
use arcade_shared::{FieldMap, FieldValue, InputPackage};
use log::debug;
use std::collections::BTreeMap;

pub const DEFAULT_SMOOTHING_FRAMES: u32 = 6;

/// Applies one input to a state; must not depend on anything but its arguments
pub type ApplyFn = Box<dyn Fn(&FieldMap, &InputPackage) -> FieldMap + Send + Sync>;

/// Predicts the locally controlled entity ahead of the server
pub struct Predictor {
    apply: ApplyFn,
    smoothing_frames: u32,
    server_state: Option<FieldMap>,
    confirmed_sequence: u32,
    correction: BTreeMap<String, f32>,
    frame: u32,
}

impl Predictor {
    pub fn new<F>(apply: F, smoothing_frames: u32) -> Self
    where
        F: Fn(&FieldMap, &InputPackage) -> FieldMap + Send + Sync + 'static,
    {
        Self {
            apply: Box::new(apply),
            smoothing_frames,
            server_state: None,
            confirmed_sequence: 0,
            correction: BTreeMap::new(),
            frame: 0,
        }
    }

    /// Replays `unconfirmed` onto `server_state` in sequence order
    pub fn predict<'a, I>(&self, server_state: &FieldMap, unconfirmed: I) -> FieldMap
    where
        I: IntoIterator<Item = &'a InputPackage>,
    {
        let mut inputs: Vec<&InputPackage> = unconfirmed
            .into_iter()
            .filter(|input| input.sequence > self.confirmed_sequence)
            .collect();
        inputs.sort_by_key(|input| input.sequence);

        inputs
            .into_iter()
            .fold(server_state.clone(), |state, input| (self.apply)(&state, input))
    }

    /// Records how far the shown state was off from the corrected one
    pub fn set_correction(&mut self, predicted: &FieldMap, truth: &FieldMap) {
        self.correction = predicted
            .iter()
            .filter_map(|(name, value)| {
                let shown = float(value)?;
                let actual = float(truth.get(name)?)?;
                Some((name.clone(), shown - actual))
            })
            .filter(|(_, offset)| *offset != 0.0)
            .collect();
        self.frame = 0;

        if !self.correction.is_empty() {
            debug!("Misprediction on {:?}", self.correction.keys().collect::<Vec<_>>());
        }
    }

    /// `current` plus what is left of the last correction, without advancing
    pub fn displayed(&self, current: &FieldMap) -> FieldMap {
        let remaining = self.remaining();
        let mut shown = current.clone();
        if remaining <= 0.0 {
            return shown;
        }

        for (name, offset) in &self.correction {
            if let Some(value) = shown.get_mut(name) {
                if let Some(actual) = float(value) {
                    *value = FieldValue::Float(actual + offset * remaining);
                }
            }
        }
        shown
    }

    /// Same as [`Predictor::displayed`], then advances the blend one frame
    pub fn get_smoothed(&mut self, current: &FieldMap) -> FieldMap {
        let smoothed = self.displayed(current);
        if self.is_smoothing() {
            self.frame += 1;
        }
        smoothed
    }

    /// Stores the authoritative state; the confirmed sequence never moves back
    pub fn set_server_state(&mut self, state: FieldMap, last_processed: u32) {
        self.server_state = Some(state);
        self.confirmed_sequence = self.confirmed_sequence.max(last_processed);
    }

    pub fn server_state(&self) -> Option<&FieldMap> {
        self.server_state.as_ref()
    }

    pub fn confirmed_sequence(&self) -> u32 {
        self.confirmed_sequence
    }

    pub fn is_smoothing(&self) -> bool {
        self.remaining() > 0.0
    }

    fn remaining(&self) -> f32 {
        if self.correction.is_empty() || self.frame >= self.smoothing_frames {
            0.0
        } else {
            1.0 - self.frame as f32 / self.smoothing_frames as f32
        }
    }
}
