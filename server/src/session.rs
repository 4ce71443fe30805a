//! Authoritative simulation for one play instance
//!
//! A [`Session`] owns everything one room needs: the entity collection, the
//! player registry, the bot manager and the deferred-call queue. It is driven
//! from a single task, so tick handling, bot thinking and player admission
//! never overlap and game callbacks can mutate state without locks.
//!
//! Game callbacks only ever see the [`Room`], the mutable part of a session
//! that is safe to hand out while the session itself is mid-tick.

use crate::bot::{BotManager, BotSeat};
use crate::collection::EntityCollection;
use crate::defer::{DeferQueue, DeferredCall};
use crate::definition::{GameDefinition, HookResult};
use crate::entity::{Entity, EntityId, GameEntity, PlayerId};
use crate::player::{InputError, InputSource, PlayerRegistry};
use crate::platform::PlatformClient;
use crate::rooms::SessionKey;
use arcade_shared::{get_timestamp, AdmissionError, InputPackage, Packet, PlayerIdentity};
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;

/// Smallest delta handed to game logic
pub const MIN_DELTA: f32 = 1.0 / 1000.0;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session {0} has been disposed")]
    Disposed(String),

    #[error("player {0} is not in this session")]
    UnknownPlayer(PlayerId),

    #[error("player {0} is not a bot")]
    NotABot(PlayerId),

    #[error("entity {0} already exists")]
    DuplicateEntity(EntityId),

    #[error("no entity ids left to hand out")]
    IdsExhausted,

    #[error(transparent)]
    Input(#[from] InputError),

    #[error(transparent)]
    Admission(#[from] AdmissionError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Built, nobody admitted yet
    Created,
    Running,
    /// Every human has left
    Draining,
    Disposed,
}

/// The mutable world a game's callbacks operate on
pub struct Room<E: GameEntity> {
    key: SessionKey,
    tick: u64,
    pub entities: EntityCollection<E>,
    pub players: PlayerRegistry,
    spectators: Vec<PlayerIdentity>,
    defer: DeferQueue,
    platform: Arc<dyn PlatformClient>,
    debug_channels: Vec<String>,
    rng: StdRng,
    game_over: bool,
}

impl<E: GameEntity> Room<E> {
    fn new(
        key: SessionKey,
        definition: &GameDefinition<E>,
        defer: DeferQueue,
        platform: Arc<dyn PlatformClient>,
    ) -> Self {
        let rng = match definition.bots.as_ref().and_then(|bots| bots.seed) {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(1)),
            None => StdRng::from_entropy(),
        };

        Self {
            key,
            tick: 0,
            entities: EntityCollection::new(),
            players: PlayerRegistry::new(definition.max_players),
            spectators: Vec::new(),
            defer,
            platform,
            debug_channels: definition.debug_channels.clone(),
            rng,
            game_over: false,
        }
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn spawn(&mut self, state: E) -> Result<EntityId, SessionError> {
        self.entities.insert(state)
    }

    pub fn spawn_with_id(&mut self, id: EntityId, state: E) -> Result<EntityId, SessionError> {
        self.entities.insert_with_id(id, state)
    }

    /// Spawns an entity and hands it to `player`
    pub fn spawn_for(&mut self, player: PlayerId, state: E) -> Result<EntityId, SessionError> {
        let id = self.spawn(state)?;
        self.attach(player, id);
        Ok(id)
    }

    /// Removes an entity, detaching it from its owner
    pub fn despawn(&mut self, id: EntityId) -> Option<Entity<E>> {
        let entity = self.entities.remove(id)?;
        if let Some(player) = entity.owner.and_then(|owner| self.players.get_mut(owner)) {
            if player.entity == Some(id) {
                player.entity = None;
            }
        }
        Some(entity)
    }

    /// Makes `entity` the one `player` controls; bots' entities get flagged
    pub fn attach(&mut self, player: PlayerId, entity: EntityId) -> bool {
        let Some(owner) = self.players.get_mut(player) else {
            return false;
        };
        let Some(target) = self.entities.get_mut(entity) else {
            return false;
        };

        owner.entity = Some(entity);
        target.owner = Some(player);
        target.is_bot = owner.is_bot;
        true
    }

    pub fn entity_of(&self, player: PlayerId) -> Option<&Entity<E>> {
        let id = self.players.get(player)?.entity?;
        self.entities.get(id)
    }

    pub fn entity_of_mut(&mut self, player: PlayerId) -> Option<&mut Entity<E>> {
        let id = self.players.get(player)?.entity?;
        self.entities.get_mut(id)
    }

    pub fn spectators(&self) -> &[PlayerIdentity] {
        &self.spectators
    }

    /// Hands a slow external effect to the session's defer queue
    pub fn defer(&self, call: DeferredCall) {
        self.defer.defer(call);
    }

    pub fn grant_reward(&self, profile_id: &str, reward: &str, amount: i64) {
        let platform = Arc::clone(&self.platform);
        let (profile, name) = (profile_id.to_string(), reward.to_string());
        let args = vec![profile.clone(), name.clone(), amount.to_string()];
        self.defer(DeferredCall::new("grant_reward", args, move || {
            platform.grant_reward(&profile, &name, amount)
        }));
    }

    pub fn persist_record(&self, key: &str, value: &str) {
        let platform = Arc::clone(&self.platform);
        let (key, value) = (key.to_string(), value.to_string());
        let args = vec![key.clone(), value.clone()];
        self.defer(DeferredCall::new("persist_record", args, move || {
            platform.persist_record(&key, &value)
        }));
    }

    pub fn trigger_effect(&self, world: &str, effect: &str) {
        let platform = Arc::clone(&self.platform);
        let (world, effect) = (world.to_string(), effect.to_string());
        let args = vec![world.clone(), effect.clone()];
        self.defer(DeferredCall::new("trigger_effect", args, move || {
            platform.trigger_effect(&world, &effect)
        }));
    }

    /// Logs under `arcade::<channel>` when the game enabled that channel
    pub fn debug(&self, channel: &str, message: &str) {
        if self.debug_channels.iter().any(|c| c == channel || c == "*") {
            let target = format!("arcade::{}", channel);
            debug!(target: target.as_str(), "[{}] {}", self.key, message);
        }
    }

    /// Ends the game; the game-over callback fires once after the current tick or event
    pub fn end_game(&mut self) {
        self.game_over = true;
    }

    pub fn is_game_over(&self) -> bool {
        self.game_over
    }

    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// Applies every buffered payload, humans and bots alike
    ///
    /// A payload whose handler panics is logged and skipped; the rest still apply.
    fn apply_pending_inputs(&mut self) {
        for player_id in self.players.ids() {
            let Some(player) = self.players.get_mut(player_id) else {
                continue;
            };
            let payloads = player.input.drain();
            let Some(entity) = player.entity.and_then(|id| self.entities.get_mut(id)) else {
                continue;
            };

            for payload in &payloads {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| entity.on_input(payload)));
                if let Err(panic) = outcome {
                    error!(
                        "on_input panicked in {} for player {}: {}",
                        self.key,
                        player_id,
                        panic_message(&panic)
                    );
                }
            }
        }
    }
}

/// One running instance of a game
pub struct Session<E: GameEntity> {
    definition: Arc<GameDefinition<E>>,
    state: SessionState,
    room: Room<E>,
    bots: BotManager<E>,
    game_over_fired: bool,
}

impl<E: GameEntity> Session<E> {
    /// Builds the room, runs the create callback and seats the initial bots
    pub fn new(
        definition: Arc<GameDefinition<E>>,
        key: SessionKey,
        defer: DeferQueue,
        platform: Arc<dyn PlatformClient>,
    ) -> Self {
        let room = Room::new(key, &definition, defer, platform);
        let bots = BotManager::new(definition.bots.clone());
        let mut session = Self {
            definition,
            state: SessionState::Created,
            room,
            bots,
            game_over_fired: false,
        };

        if let Some(hook) = session.definition.hooks().on_create.clone() {
            run_hook(&mut session.room, "on_create", |room| hook(room));
        }
        session.fill_bots();
        info!("Session {} created", session.room.key);
        session
    }

    pub fn key(&self) -> &SessionKey {
        &self.room.key
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn definition(&self) -> &Arc<GameDefinition<E>> {
        &self.definition
    }

    pub fn room(&self) -> &Room<E> {
        &self.room
    }

    pub fn room_mut(&mut self) -> &mut Room<E> {
        &mut self.room
    }

    pub fn entities(&self) -> &EntityCollection<E> {
        &self.room.entities
    }

    pub fn tick_count(&self) -> u64 {
        self.room.tick
    }

    pub fn human_count(&self) -> usize {
        self.room.players.human_count()
    }

    pub fn bot_count(&self) -> usize {
        self.room.players.bot_count()
    }

    pub fn defer_queue(&self) -> &DeferQueue {
        &self.room.defer
    }

    fn ensure_live(&self) -> Result<(), SessionError> {
        if self.state == SessionState::Disposed {
            Err(SessionError::Disposed(self.room.key.to_string()))
        } else {
            Ok(())
        }
    }

    pub fn spawn_entity(&mut self, state: E) -> Result<EntityId, SessionError> {
        self.ensure_live()?;
        self.room.spawn(state)
    }

    pub fn spawn_entity_with_id(&mut self, id: EntityId, state: E) -> Result<EntityId, SessionError> {
        self.ensure_live()?;
        self.room.spawn_with_id(id, state)
    }

    pub fn despawn_entity(&mut self, id: EntityId) -> Result<Option<Entity<E>>, SessionError> {
        self.ensure_live()?;
        Ok(self.room.despawn(id))
    }

    /// Admits a human
    ///
    /// Capacity is checked before anything else happens, so a rejected player
    /// never causes a spawn or a bot despawn.
    pub fn add_player(&mut self, identity: PlayerIdentity) -> Result<PlayerId, SessionError> {
        self.ensure_live()?;
        let key = self.room.key.to_string();
        let player_id = self.room.players.add_human(&key, identity)?;

        if self.bots.despawn_on_join() {
            if let Some(bot) = self.bots.despawn_one() {
                debug!("Bot {} makes room for player {}", bot, player_id);
                self.evict(bot);
            }
        }

        if let Some(hook) = self.definition.hooks().on_player_join.clone() {
            run_hook(&mut self.room, "on_player_join", |room| hook(room, player_id));
        }
        self.state = SessionState::Running;
        self.finish_event();
        Ok(player_id)
    }

    pub fn add_spectator(&mut self, identity: PlayerIdentity) -> Result<(), SessionError> {
        self.ensure_live()?;
        info!("{} is spectating {}", identity.display_name, self.room.key);
        self.room.spectators.push(identity.clone());

        if let Some(hook) = self.definition.hooks().on_spectator_join.clone() {
            run_hook(&mut self.room, "on_spectator_join", |room| hook(room, &identity));
        }
        self.finish_event();
        Ok(())
    }

    /// Removes a player, human or bot, and refills bots for a departed human
    pub fn remove_player(&mut self, player_id: PlayerId) -> Result<(), SessionError> {
        self.ensure_live()?;
        let is_bot = self
            .room
            .players
            .get(player_id)
            .map(|player| player.is_bot)
            .ok_or(SessionError::UnknownPlayer(player_id))?;

        if is_bot {
            self.bots.remove(player_id);
        }
        self.evict(player_id);

        if !is_bot {
            info!("Player {} left {}", player_id, self.room.key);
            self.fill_bots();
            if self.human_count() == 0 && self.state == SessionState::Running {
                info!("Session {} is draining", self.room.key);
                self.state = SessionState::Draining;
            }
        }
        self.finish_event();
        Ok(())
    }

    /// Runs the leave callback, then drops the player and whatever it still owns
    fn evict(&mut self, player_id: PlayerId) {
        if let Some(hook) = self.definition.hooks().on_player_leave.clone() {
            run_hook(&mut self.room, "on_player_leave", |room| hook(room, player_id));
        }

        if let Some(entity) = self.room.players.get(player_id).and_then(|p| p.entity) {
            self.room.despawn(entity);
        }
        self.room.players.remove(player_id);
    }

    fn fill_bots(&mut self) {
        let Session {
            definition,
            room,
            bots,
            ..
        } = self;
        let human_count = room.players.human_count();
        let join_hook = definition.hooks().on_player_join.clone();

        bots.fill_bots(human_count, |seat: &BotSeat<E>| {
            let mut identity = PlayerIdentity::bot(&seat.name, 0, room.key.session());
            identity.profile_id = format!("bot:{}", seat.name);
            let player_id = room.players.add_bot(identity);
            if let Some(player) = room.players.get_mut(player_id) {
                player.identity.numeric_id = player_id;
            }

            if let Some(hook) = &join_hook {
                run_hook(room, "on_player_join", |room| hook(room, player_id));
            }
            Some(player_id)
        });
    }

    /// Buffers a network input; event-driven games apply it right away
    pub fn handle_input(&mut self, player_id: PlayerId, input: InputPackage) -> Result<(), SessionError> {
        self.ensure_live()?;
        if !self.room.players.contains(player_id) {
            return Err(SessionError::UnknownPlayer(player_id));
        }

        if let Err(e) = self.room.players.receive_input(player_id, input) {
            debug!("Dropping input from player {}: {}", player_id, e);
            return Err(e.into());
        }
        if self.definition.is_event_driven() {
            self.room.apply_pending_inputs();
            self.finish_event();
        }
        Ok(())
    }

    /// Gives a bot its turn in a turn-based game
    pub fn advance_turn(&mut self, player_id: PlayerId) -> Result<(), SessionError> {
        self.ensure_live()?;
        let payloads = self
            .bots
            .take_turn(player_id, &self.room.entities, &self.room.players)
            .ok_or(SessionError::NotABot(player_id))?;

        for payload in payloads {
            self.room.players.queue_behavior_input(player_id, payload);
        }
        self.room.apply_pending_inputs();
        self.finish_event();
        Ok(())
    }

    /// Advances the simulation by `delta` seconds
    pub fn tick(&mut self, delta: f32) -> Result<(), SessionError> {
        self.ensure_live()?;
        let delta = if delta.is_finite() && delta > 0.0 {
            delta.max(MIN_DELTA)
        } else {
            warn!("Session {} got delta {}, clamping", self.room.key, delta);
            MIN_DELTA
        };

        self.room.apply_pending_inputs();

        let completed = match self.definition.hooks().on_tick.clone() {
            Some(hook) => run_hook(&mut self.room, "on_tick", |room| hook(room, delta)),
            None => true,
        };

        if completed {
            let intents = self
                .bots
                .think(&self.room.entities, &self.room.players, delta);
            for (player_id, payloads) in intents {
                for payload in payloads {
                    self.room.players.queue_behavior_input(player_id, payload);
                }
            }
            self.room.apply_pending_inputs();
        }

        self.room.tick += 1;
        self.finish_event();
        Ok(())
    }

    fn finish_event(&mut self) {
        if self.room.game_over && !self.game_over_fired {
            self.game_over_fired = true;
            info!("Game over in {}", self.room.key);
            if let Some(hook) = self.definition.hooks().on_game_over.clone() {
                run_hook(&mut self.room, "on_game_over", |room| hook(room));
            }
        }
    }

    /// Current state of every entity, ready for broadcast
    pub fn snapshot(&self) -> Packet {
        Packet::State {
            tick: self.room.tick,
            timestamp: get_timestamp(),
            last_processed_input: self.room.players.last_processed_inputs(),
            entities: self.room.entities.iter().map(Entity::to_snapshot).collect(),
        }
    }

    /// Stops the session for good; every later operation fails
    pub fn dispose(&mut self) {
        if self.state != SessionState::Disposed {
            info!(
                "Session {} disposed after {} ticks",
                self.room.key, self.room.tick
            );
            self.state = SessionState::Disposed;
        }
    }
}

/// Runs a game callback, isolating errors and panics to this one event
fn run_hook<E, F>(room: &mut Room<E>, event: &str, hook: F) -> bool
where
    E: GameEntity,
    F: FnOnce(&mut Room<E>) -> HookResult,
{
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| hook(room)));
    match outcome {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            error!("{} failed in {}: {}", event, room.key, e);
            false
        }
        Err(panic) => {
            error!("{} panicked in {}: {}", event, room.key, panic_message(&panic));
            false
        }
    }
}

fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
