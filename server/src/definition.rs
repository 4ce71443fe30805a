//! Declarative game configuration
//!
//! A [`GameDefinition`] is pure data: name, pacing, capacity, optional bots,
//! debug channels and lifecycle callbacks. Sessions are built from it; it has
//! no behavior of its own beyond validation and key derivation.

use crate::bot::BotConfig;
use crate::defer::RetryPolicy;
use crate::entity::{GameEntity, PlayerId};
use crate::rooms::SessionKey;
use crate::session::Room;
use arcade_shared::PlayerIdentity;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_TICK_RATE: f32 = 20.0;
pub const DEFAULT_MAX_PLAYERS: usize = 10;

/// Outcome of a lifecycle callback; an `Err` aborts only the current tick or event
pub type HookResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

pub type CreateHook<E> = Arc<dyn Fn(&mut Room<E>) -> HookResult + Send + Sync>;
pub type TickHook<E> = Arc<dyn Fn(&mut Room<E>, f32) -> HookResult + Send + Sync>;
pub type PlayerHook<E> = Arc<dyn Fn(&mut Room<E>, PlayerId) -> HookResult + Send + Sync>;
pub type SpectatorHook<E> = Arc<dyn Fn(&mut Room<E>, &PlayerIdentity) -> HookResult + Send + Sync>;
pub type SessionKeyFn = Arc<dyn Fn(&str, &str) -> String + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DefinitionError {
    #[error("game name must not be empty")]
    EmptyName,

    #[error("game name `{0}` must not contain ':'")]
    InvalidName(String),

    #[error("tick rate must be a finite number >= 0, got {0}")]
    InvalidTickRate(f32),

    #[error("max players must be at least 1")]
    NoCapacity,

    #[error("bot fill target {fill_target} exceeds max players {max_players}")]
    BotTargetTooLarge {
        fill_target: usize,
        max_players: usize,
    },

    #[error("bot configuration needs at least one behavior")]
    NoBehaviors,
}

pub struct Hooks<E: GameEntity> {
    pub on_create: Option<CreateHook<E>>,
    pub on_tick: Option<TickHook<E>>,
    pub on_player_join: Option<PlayerHook<E>>,
    pub on_player_leave: Option<PlayerHook<E>>,
    pub on_spectator_join: Option<SpectatorHook<E>>,
    pub on_game_over: Option<CreateHook<E>>,
}

impl<E: GameEntity> Default for Hooks<E> {
    fn default() -> Self {
        Self {
            on_create: None,
            on_tick: None,
            on_player_join: None,
            on_player_leave: None,
            on_spectator_join: None,
            on_game_over: None,
        }
    }
}

pub struct GameDefinition<E: GameEntity> {
    pub name: String,
    /// Ticks per second; 0 means event-driven
    pub tick_rate: f32,
    pub max_players: usize,
    pub bots: Option<BotConfig<E>>,
    pub debug_channels: Vec<String>,
    pub retry: RetryPolicy,
    hooks: Hooks<E>,
    session_key: Option<SessionKeyFn>,
}

impl<E: GameEntity> GameDefinition<E> {
    pub fn builder(name: impl Into<String>) -> GameDefinitionBuilder<E> {
        GameDefinitionBuilder::new(name)
    }

    pub fn hooks(&self) -> &Hooks<E> {
        &self.hooks
    }

    pub fn is_event_driven(&self) -> bool {
        self.tick_rate == 0.0
    }

    /// Period of the fixed-rate scheduler, if any
    pub fn tick_interval(&self) -> Option<Duration> {
        if self.is_event_driven() {
            None
        } else {
            Some(Duration::from_secs_f32(1.0 / self.tick_rate))
        }
    }

    /// Which session a player from `world` / `scene` belongs to
    pub fn session_key(&self, world: &str, scene: &str) -> SessionKey {
        match &self.session_key {
            Some(derive) => SessionKey::new(&self.name, &derive(world, scene)),
            None => SessionKey::new(&self.name, scene),
        }
    }

    pub fn debug_enabled(&self, channel: &str) -> bool {
        self.debug_channels.iter().any(|c| c == channel || c == "*")
    }
}

impl<E: GameEntity> fmt::Debug for GameDefinition<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GameDefinition")
            .field("name", &self.name)
            .field("tick_rate", &self.tick_rate)
            .field("max_players", &self.max_players)
            .field("bots", &self.bots.as_ref().map(|b| b.fill_target))
            .field("debug_channels", &self.debug_channels)
            .finish()
    }
}

pub struct GameDefinitionBuilder<E: GameEntity> {
    name: String,
    tick_rate: f32,
    max_players: usize,
    bots: Option<BotConfig<E>>,
    debug_channels: Vec<String>,
    retry: RetryPolicy,
    hooks: Hooks<E>,
    session_key: Option<SessionKeyFn>,
}

impl<E: GameEntity> GameDefinitionBuilder<E> {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tick_rate: DEFAULT_TICK_RATE,
            max_players: DEFAULT_MAX_PLAYERS,
            bots: None,
            debug_channels: Vec::new(),
            retry: RetryPolicy::default(),
            hooks: Hooks::default(),
            session_key: None,
        }
    }

    pub fn tick_rate(mut self, tick_rate: f32) -> Self {
        self.tick_rate = tick_rate;
        self
    }

    pub fn event_driven(self) -> Self {
        self.tick_rate(0.0)
    }

    pub fn max_players(mut self, max_players: usize) -> Self {
        self.max_players = max_players;
        self
    }

    pub fn bots(mut self, bots: BotConfig<E>) -> Self {
        self.bots = Some(bots);
        self
    }

    pub fn debug_channel(mut self, channel: impl Into<String>) -> Self {
        self.debug_channels.push(channel.into());
        self
    }

    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn session_key<F>(mut self, derive: F) -> Self
    where
        F: Fn(&str, &str) -> String + Send + Sync + 'static,
    {
        self.session_key = Some(Arc::new(derive));
        self
    }

    pub fn on_create<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut Room<E>) -> HookResult + Send + Sync + 'static,
    {
        self.hooks.on_create = Some(Arc::new(hook));
        self
    }

    pub fn on_tick<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut Room<E>, f32) -> HookResult + Send + Sync + 'static,
    {
        self.hooks.on_tick = Some(Arc::new(hook));
        self
    }

    pub fn on_player_join<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut Room<E>, PlayerId) -> HookResult + Send + Sync + 'static,
    {
        self.hooks.on_player_join = Some(Arc::new(hook));
        self
    }

    pub fn on_player_leave<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut Room<E>, PlayerId) -> HookResult + Send + Sync + 'static,
    {
        self.hooks.on_player_leave = Some(Arc::new(hook));
        self
    }

    pub fn on_spectator_join<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut Room<E>, &PlayerIdentity) -> HookResult + Send + Sync + 'static,
    {
        self.hooks.on_spectator_join = Some(Arc::new(hook));
        self
    }

    pub fn on_game_over<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut Room<E>) -> HookResult + Send + Sync + 'static,
    {
        self.hooks.on_game_over = Some(Arc::new(hook));
        self
    }

    pub fn build(self) -> Result<Arc<GameDefinition<E>>, DefinitionError> {
        if self.name.trim().is_empty() {
            return Err(DefinitionError::EmptyName);
        }
        if self.name.contains(':') {
            return Err(DefinitionError::InvalidName(self.name));
        }
        if !self.tick_rate.is_finite() || self.tick_rate < 0.0 {
            return Err(DefinitionError::InvalidTickRate(self.tick_rate));
        }
        if self.max_players == 0 {
            return Err(DefinitionError::NoCapacity);
        }
        if let Some(bots) = &self.bots {
            if bots.fill_target > self.max_players {
                return Err(DefinitionError::BotTargetTooLarge {
                    fill_target: bots.fill_target,
                    max_players: self.max_players,
                });
            }
            if bots.behaviors.is_empty() {
                return Err(DefinitionError::NoBehaviors);
            }
        }

        Ok(Arc::new(GameDefinition {
            name: self.name,
            tick_rate: self.tick_rate,
            max_players: self.max_players,
            bots: self.bots,
            debug_channels: self.debug_channels,
            retry: self.retry,
            hooks: self.hooks,
            session_key: self.session_key,
        }))
    }
}
