//! AI population of empty player slots
//!
//! Bots are ordinary registry players without a connection. Each one is
//! driven by a shared [`Behavior`] that reads the entity collection and
//! emits payloads through [`BotContext::send_input`]; the session applies
//! those payloads through the same path it uses for network input.

use crate::collection::EntityCollection;
use crate::entity::{EntityId, GameEntity, PlayerId};
use crate::player::PlayerRegistry;
use arcade_shared::Payload;
use log::debug;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::fmt;
use std::sync::Arc;

/// What a bot sees of itself while thinking
pub struct BotContext<'a> {
    pub player_id: PlayerId,
    pub entity: Option<EntityId>,
    pub name: &'a str,
    rng: &'a mut StdRng,
    outbox: Vec<Payload>,
}

impl<'a> BotContext<'a> {
    pub fn new(
        player_id: PlayerId,
        entity: Option<EntityId>,
        name: &'a str,
        rng: &'a mut StdRng,
    ) -> Self {
        Self {
            player_id,
            entity,
            name,
            rng,
            outbox: Vec::new(),
        }
    }

    /// Queues a payload for this bot's entity
    pub fn send_input(&mut self, payload: Payload) {
        self.outbox.push(payload);
    }

    pub fn rng(&mut self) -> &mut StdRng {
        self.rng
    }

    /// Payloads queued so far
    pub fn sent(&self) -> &[Payload] {
        &self.outbox
    }

    fn into_inputs(self) -> Vec<Payload> {
        self.outbox
    }
}

/// Decision logic shared by every bot assigned to it
pub trait Behavior<E: GameEntity>: Send + Sync {
    fn name(&self) -> &str;

    /// Thinks per second; `None` follows the session tick, `Some(0.0)` never thinks
    fn think_rate(&self) -> Option<f32> {
        None
    }

    fn think(&self, _bot: &mut BotContext<'_>, _entities: &EntityCollection<E>, _delta: f32) {}

    /// Turn-based hook, invoked explicitly instead of on a schedule
    fn on_turn(&self, _bot: &mut BotContext<'_>, _entities: &EntityCollection<E>) {}
}

pub struct BotConfig<E: GameEntity> {
    pub fill_target: usize,
    pub despawn_on_join: bool,
    pub names: Vec<String>,
    pub behaviors: Vec<Arc<dyn Behavior<E>>>,
    pub seed: Option<u64>,
}

impl<E: GameEntity> BotConfig<E> {
    pub fn new(fill_target: usize) -> Self {
        Self {
            fill_target,
            despawn_on_join: false,
            names: Vec::new(),
            behaviors: Vec::new(),
            seed: None,
        }
    }

    pub fn behavior(mut self, behavior: Arc<dyn Behavior<E>>) -> Self {
        self.behaviors.push(behavior);
        self
    }

    pub fn names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.names = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn despawn_on_join(mut self, enabled: bool) -> Self {
        self.despawn_on_join = enabled;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

impl<E: GameEntity> Clone for BotConfig<E> {
    fn clone(&self) -> Self {
        Self {
            fill_target: self.fill_target,
            despawn_on_join: self.despawn_on_join,
            names: self.names.clone(),
            behaviors: self.behaviors.clone(),
            seed: self.seed,
        }
    }
}

impl<E: GameEntity> fmt::Debug for BotConfig<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let behaviors: Vec<&str> = self.behaviors.iter().map(|b| b.name()).collect();
        f.debug_struct("BotConfig")
            .field("fill_target", &self.fill_target)
            .field("despawn_on_join", &self.despawn_on_join)
            .field("names", &self.names)
            .field("behaviors", &behaviors)
            .field("seed", &self.seed)
            .finish()
    }
}

/// A bot about to be spawned
pub struct BotSeat<E: GameEntity> {
    pub name: String,
    pub behavior: Arc<dyn Behavior<E>>,
}

struct Bot<E: GameEntity> {
    player_id: PlayerId,
    name: String,
    behavior: Arc<dyn Behavior<E>>,
    since_think: f32,
}

/// Keeps a session's bot population at its fill target
pub struct BotManager<E: GameEntity> {
    config: Option<BotConfig<E>>,
    bots: Vec<Bot<E>>,
    spawned: usize,
    rng: StdRng,
}

impl<E: GameEntity> BotManager<E> {
    pub fn new(config: Option<BotConfig<E>>) -> Self {
        let rng = match config.as_ref().and_then(|c| c.seed) {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            config,
            bots: Vec::new(),
            spawned: 0,
            rng,
        }
    }

    pub fn fill_target(&self) -> usize {
        self.config.as_ref().map_or(0, |c| c.fill_target)
    }

    pub fn despawn_on_join(&self) -> bool {
        self.config.as_ref().is_some_and(|c| c.despawn_on_join)
    }

    pub fn len(&self) -> usize {
        self.bots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bots.is_empty()
    }

    pub fn contains(&self, player_id: PlayerId) -> bool {
        self.bots.iter().any(|bot| bot.player_id == player_id)
    }

    pub fn player_ids(&self) -> Vec<PlayerId> {
        self.bots.iter().map(|bot| bot.player_id).collect()
    }

    /// Tops the population up to the fill target
    ///
    /// `spawn` registers the bot as a player and returns its id, or `None` if
    /// the seat could not be filled. Returns the ids of the bots added.
    pub fn fill_bots<F>(&mut self, human_count: usize, mut spawn: F) -> Vec<PlayerId>
    where
        F: FnMut(&BotSeat<E>) -> Option<PlayerId>,
    {
        let needed = self
            .fill_target()
            .saturating_sub(human_count)
            .saturating_sub(self.bots.len());

        let mut added = Vec::with_capacity(needed);
        for _ in 0..needed {
            let Some(seat) = self.next_seat() else {
                break;
            };
            let Some(player_id) = spawn(&seat) else {
                continue;
            };

            debug!(
                "Spawned bot {} ({}) with behavior {}",
                player_id,
                seat.name,
                seat.behavior.name()
            );
            self.bots.push(Bot {
                player_id,
                name: seat.name,
                behavior: seat.behavior,
                since_think: 0.0,
            });
            added.push(player_id);
        }
        added
    }

    fn next_seat(&mut self) -> Option<BotSeat<E>> {
        let config = self.config.as_ref()?;
        let behavior = Arc::clone(config.behaviors.choose(&mut self.rng)?);
        let name = if config.names.is_empty() {
            format!("Bot {}", self.spawned + 1)
        } else {
            config.names[self.spawned % config.names.len()].clone()
        };
        self.spawned += 1;
        Some(BotSeat { name, behavior })
    }

    /// Forgets the most recently added bot and returns its player id
    pub fn despawn_one(&mut self) -> Option<PlayerId> {
        self.bots.pop().map(|bot| bot.player_id)
    }

    pub fn remove(&mut self, player_id: PlayerId) -> bool {
        let before = self.bots.len();
        self.bots.retain(|bot| bot.player_id != player_id);
        self.bots.len() != before
    }

    /// Runs one think pass and returns the payloads each bot produced
    pub fn think(
        &mut self,
        entities: &EntityCollection<E>,
        players: &PlayerRegistry,
        delta: f32,
    ) -> Vec<(PlayerId, Vec<Payload>)> {
        let mut intents = Vec::new();

        for bot in self.bots.iter_mut() {
            let elapsed = match bot.behavior.think_rate() {
                None => delta,
                Some(rate) if rate <= 0.0 || !rate.is_finite() => continue,
                Some(rate) => {
                    bot.since_think += delta;
                    if bot.since_think < 1.0 / rate {
                        continue;
                    }
                    std::mem::take(&mut bot.since_think)
                }
            };

            let entity = players.get(bot.player_id).and_then(|p| p.entity);
            let mut context = BotContext::new(bot.player_id, entity, &bot.name, &mut self.rng);
            bot.behavior.think(&mut context, entities, elapsed);

            let inputs = context.into_inputs();
            if !inputs.is_empty() {
                intents.push((bot.player_id, inputs));
            }
        }
        intents
    }

    /// Invokes one bot's turn hook; `None` if `player_id` is not a bot
    pub fn take_turn(
        &mut self,
        player_id: PlayerId,
        entities: &EntityCollection<E>,
        players: &PlayerRegistry,
    ) -> Option<Vec<Payload>> {
        let bot = self.bots.iter().find(|bot| bot.player_id == player_id)?;
        let entity = players.get(player_id).and_then(|p| p.entity);

        let mut context = BotContext::new(player_id, entity, &bot.name, &mut self.rng);
        bot.behavior.on_turn(&mut context, entities);
        Some(context.into_inputs())
    }
}

impl<E: GameEntity> fmt::Debug for BotManager<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BotManager")
            .field("fill_target", &self.fill_target())
            .field("bots", &self.player_ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::tests::TestEntity;
    use arcade_shared::PlayerIdentity;
    use assert_approx_eq::assert_approx_eq;

    struct Nudge;

    impl Behavior<TestEntity> for Nudge {
        fn name(&self) -> &str {
            "nudge"
        }

        fn think(&self, bot: &mut BotContext<'_>, _: &EntityCollection<TestEntity>, delta: f32) {
            bot.send_input(Payload::new().with("dx", delta));
        }

        fn on_turn(&self, bot: &mut BotContext<'_>, _: &EntityCollection<TestEntity>) {
            bot.send_input(Payload::new().with("turn", true));
        }
    }

    struct Slow;

    impl Behavior<TestEntity> for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        fn think_rate(&self) -> Option<f32> {
            Some(2.0)
        }

        fn think(&self, bot: &mut BotContext<'_>, _: &EntityCollection<TestEntity>, delta: f32) {
            bot.send_input(Payload::new().with("elapsed", delta));
        }
    }

    struct Never;

    impl Behavior<TestEntity> for Never {
        fn name(&self) -> &str {
            "never"
        }

        fn think_rate(&self) -> Option<f32> {
            Some(0.0)
        }

        fn think(&self, bot: &mut BotContext<'_>, _: &EntityCollection<TestEntity>, _: f32) {
            bot.send_input(Payload::new());
        }
    }

    fn manager(config: BotConfig<TestEntity>) -> BotManager<TestEntity> {
        BotManager::new(Some(config.seed(7)))
    }

    fn register(players: &mut PlayerRegistry) -> impl FnMut(&BotSeat<TestEntity>) -> Option<PlayerId> + '_ {
        move |seat| Some(players.add_bot(PlayerIdentity::bot(&seat.name, 0, "scene")))
    }

    #[test]
    fn test_fill_counts_humans_and_existing_bots() {
        let mut players = PlayerRegistry::new(10);
        let mut bots = manager(BotConfig::<TestEntity>::new(4).behavior(Arc::new(Nudge)));

        assert_eq!(bots.fill_bots(1, register(&mut players)).len(), 3);
        assert_eq!(bots.len(), 3);

        // already at target
        assert!(bots.fill_bots(1, register(&mut players)).is_empty());

        // more humans than the target never goes negative
        assert!(bots.fill_bots(6, register(&mut players)).is_empty());
        assert_eq!(players.bot_count(), 3);
    }

    #[test]
    fn test_names_round_robin() {
        let mut players = PlayerRegistry::new(10);
        let mut bots = manager(
            BotConfig::<TestEntity>::new(3)
                .behavior(Arc::new(Nudge))
                .names(["Ann", "Bo"]),
        );
        bots.fill_bots(0, register(&mut players));

        let names: Vec<String> = players
            .iter()
            .map(|p| p.identity.display_name.clone())
            .collect();
        assert_eq!(names, vec!["Ann", "Bo", "Ann"]);
    }

    #[test]
    fn test_behaviors_are_drawn_from_config() {
        let mut bots = manager(
            BotConfig::<TestEntity>::new(8)
                .behavior(Arc::new(Nudge))
                .behavior(Arc::new(Slow)),
        );
        let mut seen = Vec::new();
        bots.fill_bots(0, |seat| {
            seen.push(seat.behavior.name().to_string());
            Some(seen.len() as PlayerId)
        });

        assert_eq!(seen.len(), 8);
        assert!(seen.iter().all(|name| name == "nudge" || name == "slow"));
    }

    #[test]
    fn test_failed_spawn_is_not_counted() {
        let mut bots = manager(BotConfig::<TestEntity>::new(2).behavior(Arc::new(Nudge)));
        assert!(bots.fill_bots(0, |_| None).is_empty());
        assert!(bots.is_empty());
    }

    #[test]
    fn test_despawn_one_takes_latest_bot() {
        let mut players = PlayerRegistry::new(10);
        let mut bots = manager(BotConfig::<TestEntity>::new(2).behavior(Arc::new(Nudge)));
        let added = bots.fill_bots(0, register(&mut players));

        assert_eq!(bots.despawn_one(), Some(added[1]));
        assert_eq!(bots.despawn_one(), Some(added[0]));
        assert_eq!(bots.despawn_one(), None);
    }

    #[test]
    fn test_think_rates() {
        let mut players = PlayerRegistry::new(10);
        let entities = EntityCollection::new();
        let mut bots = manager(BotConfig::<TestEntity>::new(1).behavior(Arc::new(Slow)));
        bots.fill_bots(0, register(&mut players));

        // 2 Hz: first think after half a second of accumulated delta
        assert!(bots.think(&entities, &players, 0.2).is_empty());
        assert!(bots.think(&entities, &players, 0.2).is_empty());
        let intents = bots.think(&entities, &players, 0.2);
        assert_eq!(intents.len(), 1);
        assert_approx_eq!(intents[0].1[0].float("elapsed").unwrap(), 0.6, 1e-5);

        let mut idle = manager(BotConfig::<TestEntity>::new(1).behavior(Arc::new(Never)));
        idle.fill_bots(0, register(&mut players));
        assert!(idle.think(&entities, &players, 10.0).is_empty());
    }

    #[test]
    fn test_take_turn_only_for_bots() {
        let mut players = PlayerRegistry::new(10);
        let entities = EntityCollection::new();
        let mut bots = manager(BotConfig::<TestEntity>::new(1).behavior(Arc::new(Never)));
        let added = bots.fill_bots(0, register(&mut players));

        let inputs = bots.take_turn(added[0], &entities, &players).unwrap();
        assert!(inputs.is_empty());
        assert!(bots.take_turn(999, &entities, &players).is_none());

        let mut nudgers = manager(BotConfig::<TestEntity>::new(1).behavior(Arc::new(Nudge)));
        let added = nudgers.fill_bots(0, register(&mut players));
        let inputs = nudgers.take_turn(added[0], &entities, &players).unwrap();
        assert!(inputs[0].flag("turn"));
    }

    #[test]
    fn test_without_config_nothing_spawns() {
        let mut bots: BotManager<TestEntity> = BotManager::new(None);
        assert!(bots.fill_bots(0, |_| Some(1)).is_empty());
        assert_eq!(bots.fill_target(), 0);
    }
}
