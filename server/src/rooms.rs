//! Session addressing and per-session tasks
//!
//! Every live session runs in its own tokio task that owns the [`Session`]
//! exclusively. The rest of the server talks to it through a
//! [`SessionHandle`], a command channel, so ticks, input and admission for
//! one session are serialized while distinct sessions run independently.
//!
//! The [`RoomDirectory`] maps game names to launchers and session keys to
//! handles, creating sessions on first join.

use crate::defer::DeferQueue;
use crate::definition::GameDefinition;
use crate::entity::{EntityId, GameEntity, PlayerId};
use crate::platform::PlatformClient;
use crate::session::{Session, SessionError, SessionState};
use arcade_shared::{AdmissionError, InputPackage, JoinRequest, Packet, PlayerIdentity};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::fmt;
use std::future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, sleep_until, Instant, Interval, MissedTickBehavior};

/// How long a session with no humans left stays around before disposal
pub const DRAIN_GRACE: Duration = Duration::from_secs(5);

/// `"<game>:<session>"`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey(String);

impl SessionKey {
    pub fn new(game: &str, session: &str) -> Self {
        Self(format!("{}:{}", game, session))
    }

    /// Key for a player arriving from `world` / `scene`
    pub fn derive<E: GameEntity>(definition: &GameDefinition<E>, world: &str, scene: &str) -> Self {
        definition.session_key(world, scene)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn game(&self) -> &str {
        self.0.split_once(':').map_or(self.0.as_str(), |(game, _)| game)
    }

    pub fn session(&self) -> &str {
        self.0.split_once(':').map_or("", |(_, session)| session)
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of a successful join
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinAck {
    pub player_id: PlayerId,
    pub entity: Option<EntityId>,
}

#[derive(Debug)]
pub enum SessionCommand {
    Join {
        identity: PlayerIdentity,
        reply: oneshot::Sender<Result<JoinAck, SessionError>>,
    },
    Spectate {
        identity: PlayerIdentity,
    },
    Input {
        player: PlayerId,
        input: InputPackage,
    },
    Leave {
        player: PlayerId,
    },
}

/// Emitted by session tasks for the network layer
#[derive(Debug)]
pub enum SessionEvent {
    State { key: SessionKey, packet: Packet },
    Closed { key: SessionKey },
}

/// Sends commands to one session task
#[derive(Debug, Clone)]
pub struct SessionHandle {
    key: SessionKey,
    commands: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    /// A handle whose commands land in the returned receiver instead of a task
    pub fn detached(key: SessionKey) -> (Self, mpsc::UnboundedReceiver<SessionCommand>) {
        let (commands, receiver) = mpsc::unbounded_channel();
        (Self { key, commands }, receiver)
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// Joins and wraps the outcome with this handle; consumes the handle
    pub async fn admit(self, identity: PlayerIdentity) -> Result<Admission, AdmissionError> {
        let ack = self.join(identity).await?;
        Ok(Admission {
            key: self.key.clone(),
            handle: self,
            player_id: ack.player_id,
            entity: ack.entity,
        })
    }

    pub async fn join(&self, identity: PlayerIdentity) -> Result<JoinAck, AdmissionError> {
        let (reply, response) = oneshot::channel();
        self.send(SessionCommand::Join { identity, reply })?;

        match response.await {
            Ok(Ok(ack)) => Ok(ack),
            Ok(Err(SessionError::Admission(e))) => Err(e),
            Ok(Err(e)) => {
                warn!("Join to {} failed: {}", self.key, e);
                Err(AdmissionError::SessionClosed(self.key.to_string()))
            }
            Err(_) => Err(AdmissionError::SessionClosed(self.key.to_string())),
        }
    }

    pub fn spectate(&self, identity: PlayerIdentity) -> Result<(), AdmissionError> {
        self.send(SessionCommand::Spectate { identity })
    }

    pub fn input(&self, player: PlayerId, input: InputPackage) {
        if self.send(SessionCommand::Input { player, input }).is_err() {
            debug!("Input for closed session {} dropped", self.key);
        }
    }

    pub fn leave(&self, player: PlayerId) {
        if self.send(SessionCommand::Leave { player }).is_err() {
            debug!("Leave for closed session {} dropped", self.key);
        }
    }

    fn send(&self, command: SessionCommand) -> Result<(), AdmissionError> {
        self.commands
            .send(command)
            .map_err(|_| AdmissionError::SessionClosed(self.key.to_string()))
    }
}

/// Type-erased way of starting sessions for one game
pub trait GameLauncher: Send + Sync {
    fn name(&self) -> &str;

    fn session_key(&self, world: &str, scene: &str) -> SessionKey;

    /// Spawns the session task; requires a tokio runtime
    fn launch(&self, key: SessionKey, events: mpsc::UnboundedSender<SessionEvent>) -> SessionHandle;
}

pub struct Launcher<E: GameEntity> {
    definition: Arc<GameDefinition<E>>,
    platform: Arc<dyn PlatformClient>,
    drain_grace: Duration,
}

impl<E: GameEntity> Launcher<E> {
    pub fn new(definition: Arc<GameDefinition<E>>, platform: Arc<dyn PlatformClient>) -> Self {
        Self {
            definition,
            platform,
            drain_grace: DRAIN_GRACE,
        }
    }

    pub fn with_drain_grace(mut self, drain_grace: Duration) -> Self {
        self.drain_grace = drain_grace;
        self
    }
}

impl<E: GameEntity> GameLauncher for Launcher<E> {
    fn name(&self) -> &str {
        &self.definition.name
    }

    fn session_key(&self, world: &str, scene: &str) -> SessionKey {
        SessionKey::derive(self.definition.as_ref(), world, scene)
    }

    fn launch(&self, key: SessionKey, events: mpsc::UnboundedSender<SessionEvent>) -> SessionHandle {
        let defer = DeferQueue::spawn(self.definition.retry.clone(), DeferQueue::log_sink());
        let session = Session::new(
            Arc::clone(&self.definition),
            key.clone(),
            defer,
            Arc::clone(&self.platform),
        );

        let (commands, receiver) = mpsc::unbounded_channel();
        tokio::spawn(run_session(session, receiver, events, self.drain_grace));

        SessionHandle { key, commands }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => future::pending().await,
    }
}

async fn drain_expired(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => future::pending().await,
    }
}

/// Drives one session until it has drained and its grace period ran out
async fn run_session<E: GameEntity>(
    mut session: Session<E>,
    mut commands: mpsc::UnboundedReceiver<SessionCommand>,
    events: mpsc::UnboundedSender<SessionEvent>,
    drain_grace: Duration,
) {
    let key = session.key().clone();
    let mut ticker = session.definition().tick_interval().map(|period| {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker
    });
    let mut last_tick = Instant::now();
    let mut drain_deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else {
                    break;
                };
                let changed = handle_command(&mut session, command);
                if changed && ticker.is_none() {
                    publish(&events, &key, session.snapshot());
                }
            }
            _ = next_tick(&mut ticker) => {
                let now = Instant::now();
                let delta = now.duration_since(last_tick).as_secs_f32();
                last_tick = now;

                if let Err(e) = session.tick(delta) {
                    error!("Tick failed for {}: {}", key, e);
                    break;
                }
                publish(&events, &key, session.snapshot());
            }
            _ = drain_expired(drain_deadline) => {
                info!("Session {} drained", key);
                break;
            }
        }

        // A session nobody ever played in winds down like one everybody left
        drain_deadline = match session.state() {
            SessionState::Created | SessionState::Draining => {
                drain_deadline.or_else(|| Some(Instant::now() + drain_grace))
            }
            _ => None,
        };
    }

    // Handles see the close right away, so new joins start a fresh session
    // instead of waiting out the flush below
    commands.close();
    while let Ok(command) = commands.try_recv() {
        debug!("Dropping {:?} for closing session {}", command, key);
    }

    session.dispose();
    session.defer_queue().flush().await;
    if events.send(SessionEvent::Closed { key }).is_err() {
        debug!("Nobody is listening for session events");
    }
}

/// Applies one command; returns whether entity state may have changed
fn handle_command<E: GameEntity>(session: &mut Session<E>, command: SessionCommand) -> bool {
    match command {
        SessionCommand::Join { identity, reply } => {
            let result = session.add_player(identity).map(|player_id| JoinAck {
                player_id,
                entity: session.room().players.get(player_id).and_then(|p| p.entity),
            });
            let changed = result.is_ok();
            if reply.send(result).is_err() {
                debug!("Join requester for {} went away", session.key());
            }
            changed
        }
        SessionCommand::Spectate { identity } => {
            if let Err(e) = session.add_spectator(identity) {
                warn!("Spectator rejected by {}: {}", session.key(), e);
            }
            false
        }
        SessionCommand::Input { player, input } => match session.handle_input(player, input) {
            Ok(()) => true,
            Err(e) => {
                debug!("Input rejected by {}: {}", session.key(), e);
                false
            }
        },
        SessionCommand::Leave { player } => match session.remove_player(player) {
            Ok(()) => true,
            Err(e) => {
                warn!("Leave failed in {}: {}", session.key(), e);
                false
            }
        },
    }
}

fn publish(events: &mpsc::UnboundedSender<SessionEvent>, key: &SessionKey, packet: Packet) {
    let event = SessionEvent::State {
        key: key.clone(),
        packet,
    };
    if events.send(event).is_err() {
        debug!("Nobody is listening for session events");
    }
}

/// A player admitted into a session
#[derive(Debug, Clone)]
pub struct Admission {
    pub key: SessionKey,
    pub handle: SessionHandle,
    pub player_id: PlayerId,
    pub entity: Option<EntityId>,
}

/// Registered games and their live sessions
pub struct RoomDirectory {
    games: HashMap<String, Arc<dyn GameLauncher>>,
    sessions: HashMap<SessionKey, SessionHandle>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl RoomDirectory {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let directory = Self {
            games: HashMap::new(),
            sessions: HashMap::new(),
            events,
        };
        (directory, receiver)
    }

    pub fn register_game<E: GameEntity>(
        &mut self,
        definition: Arc<GameDefinition<E>>,
        platform: Arc<dyn PlatformClient>,
    ) {
        self.register_launcher(Arc::new(Launcher::new(definition, platform)));
    }

    pub fn register_launcher(&mut self, launcher: Arc<dyn GameLauncher>) {
        info!("Registered game {}", launcher.name());
        self.games.insert(launcher.name().to_string(), launcher);
    }

    pub fn games(&self) -> Vec<&str> {
        self.games.keys().map(String::as_str).collect()
    }

    pub fn session(&self, key: &SessionKey) -> Option<&SessionHandle> {
        self.sessions.get(key)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Finds or starts the session this player belongs to and admits them
    ///
    /// A session that closes while the join is in flight is replaced once.
    pub async fn join(&mut self, game: &str, request: &JoinRequest) -> Result<Admission, AdmissionError> {
        let handle = self.route(game, &request.identity)?;
        match handle.admit(request.identity.clone()).await {
            Err(AdmissionError::SessionClosed(key)) => {
                debug!("Session {} closed during join, retrying", key);
                self.route(game, &request.identity)?
                    .admit(request.identity.clone())
                    .await
            }
            result => result,
        }
    }

    pub fn spectate(&mut self, game: &str, identity: PlayerIdentity) -> Result<SessionKey, AdmissionError> {
        let handle = self.route(game, &identity)?;
        handle.spectate(identity)?;
        Ok(handle.key().clone())
    }

    /// Handle of the live session for this player, launching one if needed
    pub fn route(&mut self, game: &str, identity: &PlayerIdentity) -> Result<SessionHandle, AdmissionError> {
        let launcher = self
            .games
            .get(game)
            .ok_or_else(|| AdmissionError::UnknownGame(game.to_string()))?;
        let key = launcher.session_key(&identity.world_slug, &identity.session_id);

        match self.sessions.get(&key) {
            Some(handle) if !handle.is_closed() => Ok(handle.clone()),
            _ => {
                let handle = launcher.launch(key.clone(), self.events.clone());
                self.sessions.insert(key, handle.clone());
                Ok(handle)
            }
        }
    }

    /// Drops a closed session so the next join starts a fresh one
    ///
    /// A live session already relaunched under the same key is kept.
    pub fn forget(&mut self, key: &SessionKey) {
        if self.sessions.get(key).is_some_and(SessionHandle::is_closed) {
            self.sessions.remove(key);
            debug!("Forgot session {}", key);
        }
    }
}
