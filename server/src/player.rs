//! Player registry and input sources for a session
//!
//! This module tracks everyone who controls an entity in a session, humans
//! and bots alike:
//! - Admission bookkeeping and capacity enforcement (humans only)
//! - Sequenced input buffering for connection-backed players
//! - Payload queues for behavior-driven bots
//! - Last processed sequence numbers reported back to clients
//!
//! Both kinds of controller feed the session through [`InputSource`], so the
//! session never needs to know which one it is draining.

use crate::entity::{EntityId, PlayerId};
use arcade_shared::{AdmissionError, InputPackage, Payload, PlayerIdentity};
use log::{debug, info};
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    #[error("input {sequence} is stale or duplicated (last processed {last_processed})")]
    Duplicate { sequence: u32, last_processed: u32 },

    #[error("player {0} is not connection-backed")]
    NotConnected(PlayerId),
}

/// Something that yields controller payloads ready to be applied
pub trait InputSource: Send {
    /// Takes every pending payload in the order it must be applied
    fn drain(&mut self) -> Vec<Payload>;

    /// Highest sequence number applied so far, 0 if none
    fn last_processed(&self) -> u32 {
        0
    }
}

/// Network-backed input: sequenced packages from one connection
#[derive(Debug)]
pub struct ConnectionInput {
    /// Last time we received any input from this connection
    pub last_seen: Instant,
    /// Highest input sequence number we've processed
    pub last_processed_input: u32,
    /// Buffered inputs waiting to be processed, sorted by sequence
    pub pending_inputs: Vec<InputPackage>,
}

impl ConnectionInput {
    pub fn new() -> Self {
        Self {
            last_seen: Instant::now(),
            last_processed_input: 0,
            pending_inputs: Vec::new(),
        }
    }

    /// Buffers a package in sequence order
    ///
    /// Packages at or below the last processed sequence, or already buffered,
    /// are rejected so a retransmission is never applied twice.
    pub fn receive(&mut self, input: InputPackage) -> Result<(), InputError> {
        self.last_seen = Instant::now();

        let duplicate = input.sequence <= self.last_processed_input
            || self
                .pending_inputs
                .iter()
                .any(|pending| pending.sequence == input.sequence);
        if duplicate {
            return Err(InputError::Duplicate {
                sequence: input.sequence,
                last_processed: self.last_processed_input,
            });
        }

        let index = self
            .pending_inputs
            .partition_point(|pending| pending.sequence < input.sequence);
        self.pending_inputs.insert(index, input);
        Ok(())
    }

    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

impl Default for ConnectionInput {
    fn default() -> Self {
        Self::new()
    }
}

impl InputSource for ConnectionInput {
    fn drain(&mut self) -> Vec<Payload> {
        if let Some(last) = self.pending_inputs.last() {
            self.last_processed_input = self.last_processed_input.max(last.sequence);
        }
        self.pending_inputs
            .drain(..)
            .map(|input| input.payload)
            .collect()
    }

    fn last_processed(&self) -> u32 {
        self.last_processed_input
    }
}

/// Behavior-driven input: payloads a bot sent during its think pass
#[derive(Debug, Default)]
pub struct BehaviorInput {
    queued: Vec<Payload>,
}

impl BehaviorInput {
    pub fn send_input(&mut self, payload: Payload) {
        self.queued.push(payload);
    }
}

impl InputSource for BehaviorInput {
    fn drain(&mut self) -> Vec<Payload> {
        std::mem::take(&mut self.queued)
    }
}

#[derive(Debug)]
pub enum InputChannel {
    Connection(ConnectionInput),
    Behavior(BehaviorInput),
}

impl InputSource for InputChannel {
    fn drain(&mut self) -> Vec<Payload> {
        match self {
            InputChannel::Connection(source) => source.drain(),
            InputChannel::Behavior(source) => source.drain(),
        }
    }

    fn last_processed(&self) -> u32 {
        match self {
            InputChannel::Connection(source) => source.last_processed(),
            InputChannel::Behavior(source) => source.last_processed(),
        }
    }
}

/// One participant of a session
#[derive(Debug)]
pub struct Player {
    pub id: PlayerId,
    pub identity: PlayerIdentity,
    pub entity: Option<EntityId>,
    pub is_bot: bool,
    pub input: InputChannel,
}

impl Player {
    pub fn human(id: PlayerId, identity: PlayerIdentity) -> Self {
        Self {
            id,
            identity,
            entity: None,
            is_bot: false,
            input: InputChannel::Connection(ConnectionInput::new()),
        }
    }

    pub fn bot(id: PlayerId, identity: PlayerIdentity) -> Self {
        Self {
            id,
            identity,
            entity: None,
            is_bot: true,
            input: InputChannel::Behavior(BehaviorInput::default()),
        }
    }
}

/// Everyone currently in one session
///
/// Player ids are session-scoped and never reused. Only humans count toward
/// the capacity limit; bots fill whatever the game's bot target asks for.
#[derive(Debug)]
pub struct PlayerRegistry {
    players: BTreeMap<PlayerId, Player>,
    next_player_id: PlayerId,
    max_players: usize,
}

impl PlayerRegistry {
    pub fn new(max_players: usize) -> Self {
        Self {
            players: BTreeMap::new(),
            next_player_id: 1,
            max_players,
        }
    }

    pub fn max_players(&self) -> usize {
        self.max_players
    }

    pub fn is_full(&self) -> bool {
        self.human_count() >= self.max_players
    }

    /// Registers a human, failing when the session is at capacity
    pub fn add_human(
        &mut self,
        session: &str,
        identity: PlayerIdentity,
    ) -> Result<PlayerId, AdmissionError> {
        if self.is_full() {
            return Err(AdmissionError::SessionFull {
                session: session.to_string(),
                max_players: self.max_players,
            });
        }

        let id = self.allocate_id();
        info!(
            "Player {} ({}) joined {}",
            id, identity.display_name, session
        );
        self.players.insert(id, Player::human(id, identity));
        Ok(id)
    }

    pub fn add_bot(&mut self, identity: PlayerIdentity) -> PlayerId {
        let id = self.allocate_id();
        debug!("Bot {} ({}) registered", id, identity.display_name);
        self.players.insert(id, Player::bot(id, identity));
        id
    }

    fn allocate_id(&mut self) -> PlayerId {
        let id = self.next_player_id;
        self.next_player_id += 1;
        id
    }

    pub fn remove(&mut self, id: PlayerId) -> Option<Player> {
        self.players.remove(&id)
    }

    pub fn get(&self, id: PlayerId) -> Option<&Player> {
        self.players.get(&id)
    }

    pub fn get_mut(&mut self, id: PlayerId) -> Option<&mut Player> {
        self.players.get_mut(&id)
    }

    pub fn contains(&self, id: PlayerId) -> bool {
        self.players.contains_key(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    pub fn ids(&self) -> Vec<PlayerId> {
        self.players.keys().copied().collect()
    }

    pub fn human_count(&self) -> usize {
        self.players.values().filter(|player| !player.is_bot).count()
    }

    pub fn bot_count(&self) -> usize {
        self.players.values().filter(|player| player.is_bot).count()
    }

    /// Buffers a network input package for a connection-backed player
    pub fn receive_input(&mut self, id: PlayerId, input: InputPackage) -> Result<(), InputError> {
        match self.players.get_mut(&id).map(|player| &mut player.input) {
            Some(InputChannel::Connection(source)) => source.receive(input),
            _ => Err(InputError::NotConnected(id)),
        }
    }

    /// Queues a payload from a behavior-driven player
    pub fn queue_behavior_input(&mut self, id: PlayerId, payload: Payload) -> bool {
        match self.players.get_mut(&id).map(|player| &mut player.input) {
            Some(InputChannel::Behavior(source)) => {
                source.send_input(payload);
                true
            }
            _ => false,
        }
    }

    /// Last processed input sequence for every connection-backed player
    pub fn last_processed_inputs(&self) -> HashMap<u32, u32> {
        self.players
            .values()
            .filter(|player| !player.is_bot)
            .map(|player| (player.id, player.input.last_processed()))
            .collect()
    }
}
