//! Snapshot interpolation for remote entities
//!
//! Remote entities are rendered a fixed buffer behind the newest server
//! snapshot so two real snapshots normally straddle the render time. Float
//! fields are blended, angular floats along the shortest arc, and every
//! other field is taken from the earlier snapshot.

use arcade_shared::{FieldMap, FieldValue};
use std::collections::{BTreeMap, VecDeque};

pub const DEFAULT_BUFFER_MS: u64 = 100;
pub const DEFAULT_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpolationMode {
    /// Straight line between the two bracketing snapshots
    Linear,
    /// Catmull-Rom curve using the neighbouring snapshots as tangents
    Hermite,
}

#[derive(Debug, Clone)]
pub struct InterpolationConfig {
    pub buffer_ms: u64,
    pub capacity: usize,
    pub mode: InterpolationMode,
    /// Field name → wrap period
    pub angular: BTreeMap<String, f32>,
}

impl InterpolationConfig {
    pub fn with_buffer(mut self, buffer_ms: u64) -> Self {
        self.buffer_ms = buffer_ms;
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn with_mode(mut self, mode: InterpolationMode) -> Self {
        self.mode = mode;
        self
    }

    /// Marks `field` as an angle that wraps every `period`
    pub fn angular(mut self, field: &str, period: f32) -> Self {
        self.angular.insert(field.to_string(), period);
        self
    }
}

impl Default for InterpolationConfig {
    fn default() -> Self {
        Self {
            buffer_ms: DEFAULT_BUFFER_MS,
            capacity: DEFAULT_CAPACITY,
            mode: InterpolationMode::Linear,
            angular: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub timestamp: u64,
    pub fields: FieldMap,
}

#[derive(Debug, Clone)]
pub struct Interpolator {
    config: InterpolationConfig,
    snapshots: VecDeque<Snapshot>,
}

impl Interpolator {
    pub fn new(config: InterpolationConfig) -> Self {
        let capacity = config.capacity.max(1);
        Self {
            config,
            snapshots: VecDeque::with_capacity(capacity),
        }
    }

    pub fn config(&self) -> &InterpolationConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn latest(&self) -> Option<&Snapshot> {
        self.snapshots.back()
    }

    /// Appends a snapshot, dropping the oldest past capacity
    pub fn push_snapshot(&mut self, timestamp: u64, fields: FieldMap) {
        while self.snapshots.len() >= self.config.capacity.max(1) {
            self.snapshots.pop_front();
        }
        self.snapshots.push_back(Snapshot { timestamp, fields });
    }

    /// Field values to render at wall-clock time `now` (ms)
    pub fn get_interpolated(&self, now: u64) -> Option<FieldMap> {
        let oldest = self.snapshots.front()?;
        let newest = self.snapshots.back()?;
        let render_time = now.saturating_sub(self.config.buffer_ms);

        if render_time <= oldest.timestamp {
            return Some(oldest.fields.clone());
        }
        if render_time >= newest.timestamp {
            return Some(newest.fields.clone());
        }

        let Some(index) = self.bracket(render_time) else {
            return Some(newest.fields.clone());
        };
        let from = &self.snapshots[index];
        let to = &self.snapshots[index + 1];
        let t = (render_time - from.timestamp) as f32 / (to.timestamp - from.timestamp) as f32;

        let mut result = from.fields.clone();
        for (name, value) in result.iter_mut() {
            let (Some(a), Some(b)) = (float(value), to.fields.get(name).and_then(float)) else {
                continue;
            };

            let period = self.config.angular.get(name).copied();
            let blended = match self.config.mode {
                InterpolationMode::Linear => lerp(a, b, t, period),
                InterpolationMode::Hermite => {
                    let before = index
                        .checked_sub(1)
                        .and_then(|i| self.float_at(i, name))
                        .unwrap_or(a);
                    let after = self.float_at(index + 2, name).unwrap_or(b);
                    hermite(before, a, b, after, t, period)
                }
            };
            *value = FieldValue::Float(blended);
        }

        Some(result)
    }

    /// Index of the snapshot starting the segment that contains `render_time`
    fn bracket(&self, render_time: u64) -> Option<usize> {
        self.snapshots
            .iter()
            .zip(self.snapshots.iter().skip(1))
            .position(|(a, b)| a.timestamp <= render_time && render_time < b.timestamp)
    }

    fn float_at(&self, index: usize, name: &str) -> Option<f32> {
        float(self.snapshots.get(index)?.fields.get(name)?)
    }
}

/// Float fields only; ints are not blended
pub(crate) fn float(value: &FieldValue) -> Option<f32> {
    match value {
        FieldValue::Float(v) => Some(*v),
        _ => None,
    }
}

/// Signed shortest step from `from` to `to` on a circle of `period`
pub fn shortest_arc(from: f32, to: f32, period: f32) -> f32 {
    let delta = (to - from).rem_euclid(period);
    if delta > period / 2.0 {
        delta - period
    } else {
        delta
    }
}

fn lerp(a: f32, b: f32, t: f32, period: Option<f32>) -> f32 {
    match period {
        Some(period) => (a + shortest_arc(a, b, period) * t).rem_euclid(period),
        None => a + (b - a) * t,
    }
}

fn hermite(p0: f32, p1: f32, p2: f32, p3: f32, t: f32, period: Option<f32>) -> f32 {
    match period {
        Some(period) => {
            // Unwrap the neighbours around p1 so the curve never takes the long way
            let q2 = p1 + shortest_arc(p1, p2, period);
            let q0 = p1 + shortest_arc(p1, p0, period);
            let q3 = q2 + shortest_arc(p2, p3, period);
            catmull_rom(q0, p1, q2, q3, t).rem_euclid(period)
        }
        None => catmull_rom(p0, p1, p2, p3, t),
    }
}

fn catmull_rom(p0: f32, p1: f32, p2: f32, p3: f32, t: f32) -> f32 {
    let t2 = t * t;
    let t3 = t2 * t;

    let c0 = -0.5 * t3 + t2 - 0.5 * t;
    let c1 = 1.5 * t3 - 2.5 * t2 + 1.0;
    let c2 = -1.5 * t3 + 2.0 * t2 + 0.5 * t;
    let c3 = 0.5 * t3 - 0.5 * t2;

    p0 * c0 + p1 * c1 + p2 * c2 + p3 * c3
}
