//! Deterministic single-step driver for game tests
//!
//! [`TestHarness`] wraps a real [`Session`] with no transport and no
//! scheduler. Deferred calls are recorded instead of executed and every
//! input gets the next sequence number automatically, so a test reads as a
//! script: add players, send input, tick, inspect.

use crate::collection::EntityCollection;
use crate::defer::{DeferQueue, TrackedCall};
use crate::definition::GameDefinition;
use crate::entity::{Entity, EntityId, GameEntity, PlayerId};
use crate::platform::LoggingPlatform;
use crate::rooms::SessionKey;
use crate::session::{Session, SessionError, SessionState};
use arcade_shared::{get_timestamp, InputPackage, Payload, PlayerIdentity};
use std::collections::HashMap;
use std::sync::Arc;

/// Fixed step used by [`TestHarness::step`]
pub const DEFAULT_STEP: f32 = 1.0 / 20.0;

pub struct TestHarness<E: GameEntity> {
    session: Session<E>,
    sequences: HashMap<PlayerId, u32>,
    next_numeric_id: u32,
}

impl<E: GameEntity> TestHarness<E> {
    pub fn new(definition: Arc<GameDefinition<E>>) -> Self {
        let key = SessionKey::new(&definition.name, "test");
        let session = Session::new(
            definition,
            key,
            DeferQueue::tracked(),
            Arc::new(LoggingPlatform::default()),
        );

        Self {
            session,
            sequences: HashMap::new(),
            next_numeric_id: 1,
        }
    }

    pub fn session(&self) -> &Session<E> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session<E> {
        &mut self.session
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn spawn(&mut self, state: E) -> Result<EntityId, SessionError> {
        self.session.spawn_entity(state)
    }

    pub fn despawn(&mut self, id: EntityId) -> Result<Option<Entity<E>>, SessionError> {
        self.session.despawn_entity(id)
    }

    /// Admits a human with a generated identity
    pub fn add_player(&mut self, name: &str) -> Result<PlayerId, SessionError> {
        let numeric_id = self.next_numeric_id;
        self.next_numeric_id += 1;

        let identity = PlayerIdentity {
            display_name: name.to_string(),
            username: name.to_lowercase(),
            profile_id: format!("profile-{}", numeric_id),
            numeric_id,
            asset_id: "test-asset".to_string(),
            world_slug: "test-world".to_string(),
            session_id: "test".to_string(),
        };
        self.add_player_with(identity)
    }

    pub fn add_player_with(&mut self, identity: PlayerIdentity) -> Result<PlayerId, SessionError> {
        self.session.add_player(identity)
    }

    pub fn remove_player(&mut self, player: PlayerId) -> Result<(), SessionError> {
        self.sequences.remove(&player);
        self.session.remove_player(player)
    }

    /// Sends `payload` as the player's next sequenced input
    pub fn input(&mut self, player: PlayerId, payload: Payload) -> Result<u32, SessionError> {
        let sequence = self.sequences.entry(player).or_insert(0);
        *sequence += 1;

        let package = InputPackage {
            sequence: *sequence,
            timestamp: get_timestamp(),
            payload,
        };
        let sequence = package.sequence;
        self.session.handle_input(player, package)?;
        Ok(sequence)
    }

    pub fn tick(&mut self, delta: f32) -> Result<(), SessionError> {
        self.session.tick(delta)
    }

    /// Runs `count` ticks of [`DEFAULT_STEP`]
    pub fn step(&mut self, count: usize) -> Result<(), SessionError> {
        for _ in 0..count {
            self.session.tick(DEFAULT_STEP)?;
        }
        Ok(())
    }

    pub fn advance_turn(&mut self, bot: PlayerId) -> Result<(), SessionError> {
        self.session.advance_turn(bot)
    }

    pub fn entities(&self) -> &EntityCollection<E> {
        self.session.entities()
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity<E>> {
        self.session.entities().get(id)
    }

    pub fn entity_of(&self, player: PlayerId) -> Option<&Entity<E>> {
        self.session.room().entity_of(player)
    }

    pub fn human_count(&self) -> usize {
        self.session.human_count()
    }

    pub fn bot_count(&self) -> usize {
        self.session.bot_count()
    }

    /// Every external call the game requested so far, in order
    pub fn deferred_calls(&self) -> Vec<TrackedCall> {
        self.session.defer_queue().recorded()
    }
}
