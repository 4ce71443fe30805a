use crate::input::InputHandler;
use crate::interpolation::{InterpolationConfig, Interpolator};
use crate::prediction::Predictor;
use arcade_shared::{EntitySnapshot, FieldMap, InputPackage, Payload};
use log::debug;
use std::collections::{HashMap, HashSet};

/// Everything the client knows about one session
///
/// The locally controlled entity is predicted ahead of the server, every
/// other entity is interpolated behind it.
pub struct ClientWorld {
    pub tick: u64,
    player_id: Option<u32>,
    own_entity: Option<u32>,
    input: InputHandler,
    predictor: Predictor,
    predicted: Option<FieldMap>,
    interpolation: InterpolationConfig,
    remotes: HashMap<u32, Interpolator>,
    bots: HashSet<u32>,
}

impl ClientWorld {
    pub fn new(predictor: Predictor, interpolation: InterpolationConfig) -> Self {
        Self {
            tick: 0,
            player_id: None,
            own_entity: None,
            input: InputHandler::new(),
            predictor,
            predicted: None,
            interpolation,
            remotes: HashMap::new(),
            bots: HashSet::new(),
        }
    }

    /// Called once the server admitted us
    pub fn set_player(&mut self, player_id: u32, entity: Option<u32>) {
        self.player_id = Some(player_id);
        self.own_entity = entity;
        if let Some(entity) = entity {
            self.remotes.remove(&entity);
        }
    }

    pub fn player_id(&self) -> Option<u32> {
        self.player_id
    }

    pub fn own_entity(&self) -> Option<u32> {
        self.own_entity
    }

    /// Packages local intent and predicts it immediately; returns the package to send
    pub fn local_input(&mut self, payload: Payload) -> InputPackage {
        let package = self.input.package(payload);
        self.predicted = self
            .predicted
            .take()
            .map(|state| self.predictor.predict(&state, [&package]));
        package
    }

    pub fn pending_inputs(&self) -> usize {
        self.input.pending()
    }

    /// Folds one authoritative state update into the world
    pub fn apply_state(
        &mut self,
        tick: u64,
        timestamp: u64,
        last_processed_input: &HashMap<u32, u32>,
        entities: Vec<EntitySnapshot>,
    ) {
        if tick < self.tick {
            debug!("Dropping stale state {} (at {})", tick, self.tick);
            return;
        }
        self.tick = tick;

        let last_processed = self
            .player_id
            .and_then(|player| last_processed_input.get(&player).copied())
            .unwrap_or(0);
        self.input.confirm_up_to(last_processed);

        let mut seen = HashSet::new();
        for snapshot in entities {
            seen.insert(snapshot.id);
            if snapshot.is_bot {
                self.bots.insert(snapshot.id);
            } else {
                self.bots.remove(&snapshot.id);
            }

            if Some(snapshot.id) == self.own_entity {
                self.reconcile(snapshot.fields, last_processed);
            } else {
                let config = &self.interpolation;
                self.remotes
                    .entry(snapshot.id)
                    .or_insert_with(|| Interpolator::new(config.clone()))
                    .push_snapshot(timestamp, snapshot.fields);
            }
        }

        self.remotes.retain(|id, _| seen.contains(id));
        self.bots.retain(|id| seen.contains(id));
    }

    fn reconcile(&mut self, server_fields: FieldMap, last_processed: u32) {
        self.predictor.set_server_state(server_fields.clone(), last_processed);
        let corrected = self.predictor.predict(&server_fields, self.input.unconfirmed());

        // Blend from what is on screen, including any correction still in flight
        if let Some(predicted) = &self.predicted {
            let shown = self.predictor.displayed(predicted);
            self.predictor.set_correction(&shown, &corrected);
        }
        self.predicted = Some(corrected);
    }

    /// Smoothed state of our own entity; advances the correction blend by one frame
    pub fn render_own(&mut self) -> Option<FieldMap> {
        let predicted = self.predicted.as_ref()?;
        Some(self.predictor.get_smoothed(predicted))
    }

    /// Interpolated states of every other entity at wall-clock `now` (ms)
    pub fn render_remotes(&self, now: u64) -> Vec<(u32, FieldMap)> {
        let mut states: Vec<(u32, FieldMap)> = self
            .remotes
            .iter()
            .filter_map(|(id, interpolator)| Some((*id, interpolator.get_interpolated(now)?)))
            .collect();
        states.sort_by_key(|(id, _)| *id);
        states
    }

    pub fn remote_count(&self) -> usize {
        self.remotes.len()
    }

    pub fn is_bot(&self, entity: u32) -> bool {
        self.bots.contains(&entity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arcade_shared::FieldValue;
    use assert_approx_eq::assert_approx_eq;

    fn fields(x: f32) -> FieldMap {
        let mut fields = FieldMap::new();
        fields.insert("x".into(), FieldValue::Float(x));
        fields
    }

    fn x(fields: &FieldMap) -> f32 {
        fields.get("x").and_then(FieldValue::as_f32).unwrap()
    }

    fn snapshot(id: u32, x: f32, is_bot: bool) -> EntitySnapshot {
        EntitySnapshot {
            id,
            schema: "Point".into(),
            is_bot,
            fields: fields(x),
        }
    }

    fn world() -> ClientWorld {
        world_smoothed_over(2)
    }

    fn world_smoothed_over(frames: u32) -> ClientWorld {
        let predictor = Predictor::new(
            |state, input| {
                let mut next = state.clone();
                let moved = x(state) + input.payload.float("dx").unwrap_or(0.0);
                next.insert("x".into(), FieldValue::Float(moved));
                next
            },
            frames,
        );
        let mut world = ClientWorld::new(predictor, InterpolationConfig::default());
        world.set_player(1, Some(10));
        world
    }

    fn processed(player: u32, sequence: u32) -> HashMap<u32, u32> {
        HashMap::from([(player, sequence)])
    }

    #[test]
    fn test_splits_own_and_remote_entities() {
        let mut world = world();
        world.apply_state(1, 1000, &HashMap::new(), vec![snapshot(10, 0.0, false), snapshot(11, 5.0, true)]);

        assert_eq!(world.remote_count(), 1);
        assert!(world.is_bot(11));
        assert!(!world.is_bot(10));
        assert_approx_eq!(x(&world.render_own().unwrap()), 0.0);
    }

    #[test]
    fn test_local_input_is_predicted_until_confirmed() {
        let mut world = world();
        world.apply_state(1, 1000, &HashMap::new(), vec![snapshot(10, 0.0, false)]);

        world.local_input(Payload::new().with("dx", 2.0f32));
        world.local_input(Payload::new().with("dx", 2.0f32));
        assert_approx_eq!(x(&world.render_own().unwrap()), 4.0);

        // Server has applied the first input only
        world.apply_state(2, 1050, &processed(1, 1), vec![snapshot(10, 2.0, false)]);
        assert_eq!(world.pending_inputs(), 1);
        assert_approx_eq!(x(&world.render_own().unwrap()), 4.0);
    }

    #[test]
    fn test_misprediction_is_smoothed() {
        let mut world = world();
        world.apply_state(1, 1000, &HashMap::new(), vec![snapshot(10, 0.0, false)]);
        world.local_input(Payload::new().with("dx", 2.0f32));

        // Server moved us somewhere else entirely
        world.apply_state(2, 1050, &processed(1, 1), vec![snapshot(10, 10.0, false)]);
        assert_approx_eq!(x(&world.render_own().unwrap()), 2.0);
        assert_approx_eq!(x(&world.render_own().unwrap()), 6.0);
        assert_approx_eq!(x(&world.render_own().unwrap()), 10.0);
    }

    #[test]
    fn test_back_to_back_corrections_keep_gliding() {
        let mut world = world_smoothed_over(4);
        world.apply_state(1, 1000, &HashMap::new(), vec![snapshot(10, 0.0, false)]);
        world.local_input(Payload::new().with("dx", 2.0f32));

        world.apply_state(2, 1050, &processed(1, 1), vec![snapshot(10, 10.0, false)]);
        let mut shown = vec![x(&world.render_own().unwrap()), x(&world.render_own().unwrap())];

        // Second misprediction while the first is still blending
        world.local_input(Payload::new().with("dx", 2.0f32));
        world.apply_state(3, 1100, &processed(1, 1), vec![snapshot(10, 20.0, false)]);
        for _ in 0..5 {
            shown.push(x(&world.render_own().unwrap()));
        }

        let expected = [2.0, 4.0, 8.0, 11.5, 15.0, 18.5, 22.0];
        for (shown, expected) in shown.iter().zip(expected) {
            assert_approx_eq!(*shown, expected);
        }
        for frame in shown.windows(2) {
            assert!(frame[1] - frame[0] <= 4.0, "jumped from {} to {}", frame[0], frame[1]);
        }
    }

    #[test]
    fn test_departed_entities_are_forgotten() {
        let mut world = world();
        world.apply_state(1, 1000, &HashMap::new(), vec![snapshot(10, 0.0, false), snapshot(11, 5.0, true)]);
        world.apply_state(2, 1050, &HashMap::new(), vec![snapshot(10, 0.0, false)]);

        assert_eq!(world.remote_count(), 0);
        assert!(!world.is_bot(11));
    }

    #[test]
    fn test_remote_entities_interpolate() {
        let mut world = world();
        world.apply_state(1, 1000, &HashMap::new(), vec![snapshot(11, 0.0, false)]);
        world.apply_state(2, 1100, &HashMap::new(), vec![snapshot(11, 100.0, false)]);

        let remotes = world.render_remotes(1150);
        assert_eq!(remotes.len(), 1);
        assert_approx_eq!(x(&remotes[0].1), 50.0);
    }

    #[test]
    fn test_stale_state_is_ignored() {
        let mut world = world();
        world.apply_state(5, 1000, &HashMap::new(), vec![snapshot(11, 1.0, false)]);
        world.apply_state(4, 900, &HashMap::new(), vec![]);

        assert_eq!(world.tick, 5);
        assert_eq!(world.remote_count(), 1);
    }
}
