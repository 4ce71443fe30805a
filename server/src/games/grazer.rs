//! Grazer: steer around an arena eating food
//!
//! Every player controls a grazer that moves along its heading. Touching a
//! food pellet adds the pellet's value to the grazer's score and moves the
//! pellet somewhere else. Every 10 points the owner is granted a reward
//! through the defer queue. Empty seats are filled with foraging and
//! wandering bots.

use crate::bot::{Behavior, BotConfig, BotContext};
use crate::collection::EntityCollection;
use crate::definition::{DefinitionError, GameDefinition};
use crate::entity::{EntityId, GameEntity, PlayerId};
use crate::session::Room;
use arcade_shared::{FieldDecl, FieldValue, Payload, Schema, Synced};
use rand::Rng;
use std::f32::consts::{PI, TAU};
use std::sync::Arc;

pub const GAME_NAME: &str = "grazer";

pub const ARENA_WIDTH: f32 = 800.0;
pub const ARENA_HEIGHT: f32 = 600.0;
pub const GRAZER_SPEED: f32 = 120.0;
pub const EAT_RADIUS: f32 = 16.0;
pub const REWARD_EVERY: i64 = 10;

static POSITIONED: Schema = Schema::new("Positioned", &[FieldDecl::float("x"), FieldDecl::float("y")]);
static FOOD: Schema = Schema::new("Food", &[FieldDecl::int("value")]).extends(&POSITIONED);
static GRAZER: Schema = Schema::new(
    "Grazer",
    &[
        FieldDecl::float("heading"),
        FieldDecl::int("score"),
        FieldDecl::string("name"),
    ],
)
.extends(&POSITIONED);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArenaKind {
    Food,
    Grazer,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArenaEntity {
    Food {
        x: f32,
        y: f32,
        value: i64,
    },
    Grazer {
        x: f32,
        y: f32,
        heading: f32,
        score: i64,
        name: String,
        /// Reward tiers already paid out; server-only
        rewarded: i64,
    },
}

impl ArenaEntity {
    pub fn food(x: f32, y: f32, value: i64) -> Self {
        ArenaEntity::Food { x, y, value }
    }

    pub fn grazer(x: f32, y: f32, heading: f32, name: impl Into<String>) -> Self {
        ArenaEntity::Grazer {
            x,
            y,
            heading,
            score: 0,
            name: name.into(),
            rewarded: 0,
        }
    }

    pub fn score(&self) -> Option<i64> {
        match self {
            ArenaEntity::Grazer { score, .. } => Some(*score),
            ArenaEntity::Food { .. } => None,
        }
    }

    pub fn heading(&self) -> Option<f32> {
        match self {
            ArenaEntity::Grazer { heading, .. } => Some(*heading),
            ArenaEntity::Food { .. } => None,
        }
    }

    fn set_position(&mut self, new_x: f32, new_y: f32) {
        match self {
            ArenaEntity::Food { x, y, .. } | ArenaEntity::Grazer { x, y, .. } => {
                *x = new_x;
                *y = new_y;
            }
        }
    }
}

impl Synced for ArenaEntity {
    fn schema(&self) -> &'static Schema {
        match self {
            ArenaEntity::Food { .. } => &FOOD,
            ArenaEntity::Grazer { .. } => &GRAZER,
        }
    }

    fn read_field(&self, field: &str) -> Option<FieldValue> {
        match (self, field) {
            (ArenaEntity::Food { x, .. } | ArenaEntity::Grazer { x, .. }, "x") => Some((*x).into()),
            (ArenaEntity::Food { y, .. } | ArenaEntity::Grazer { y, .. }, "y") => Some((*y).into()),
            (ArenaEntity::Food { value, .. }, "value") => Some((*value).into()),
            (ArenaEntity::Grazer { heading, .. }, "heading") => Some((*heading).into()),
            (ArenaEntity::Grazer { score, .. }, "score") => Some((*score).into()),
            (ArenaEntity::Grazer { name, .. }, "name") => Some(name.clone().into()),
            _ => None,
        }
    }

    fn write_field(&mut self, field: &str, value: FieldValue) -> bool {
        match (self, field, value) {
            (ArenaEntity::Food { x, .. } | ArenaEntity::Grazer { x, .. }, "x", FieldValue::Float(v)) => *x = v,
            (ArenaEntity::Food { y, .. } | ArenaEntity::Grazer { y, .. }, "y", FieldValue::Float(v)) => *y = v,
            (ArenaEntity::Food { value, .. }, "value", FieldValue::Int(v)) => *value = v,
            (ArenaEntity::Grazer { heading, .. }, "heading", FieldValue::Float(v)) => *heading = v,
            (ArenaEntity::Grazer { score, .. }, "score", FieldValue::Int(v)) => *score = v,
            (ArenaEntity::Grazer { name, .. }, "name", FieldValue::Str(v)) => *name = v,
            _ => return false,
        }
        true
    }
}

impl GameEntity for ArenaEntity {
    type Kind = ArenaKind;

    fn kind(&self) -> ArenaKind {
        match self {
            ArenaEntity::Food { .. } => ArenaKind::Food,
            ArenaEntity::Grazer { .. } => ArenaKind::Grazer,
        }
    }

    fn position(&self) -> Option<(f32, f32)> {
        match self {
            ArenaEntity::Food { x, y, .. } | ArenaEntity::Grazer { x, y, .. } => Some((*x, *y)),
        }
    }

    /// `heading` sets an absolute direction in radians, `turn` adds to it
    fn on_input(&mut self, payload: &Payload) {
        if let ArenaEntity::Grazer { heading, .. } = self {
            if let Some(target) = payload.float("heading") {
                *heading = target.rem_euclid(TAU);
            }
            if let Some(turn) = payload.float("turn") {
                *heading = (*heading + turn).rem_euclid(TAU);
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct GrazerSettings {
    pub tick_rate: f32,
    pub max_players: usize,
    pub food_count: usize,
    pub fill_target: usize,
    pub despawn_on_join: bool,
    /// First grazer to reach this score ends the game
    pub score_limit: Option<i64>,
    pub seed: Option<u64>,
    pub debug: bool,
}

impl Default for GrazerSettings {
    fn default() -> Self {
        Self {
            tick_rate: 20.0,
            max_players: 10,
            food_count: 12,
            fill_target: 4,
            despawn_on_join: true,
            score_limit: None,
            seed: None,
            debug: false,
        }
    }
}

pub fn definition(settings: GrazerSettings) -> Result<Arc<GameDefinition<ArenaEntity>>, DefinitionError> {
    let food_count = settings.food_count;
    let score_limit = settings.score_limit;

    let mut bots = BotConfig::<ArenaEntity>::new(settings.fill_target)
        .behavior(Arc::new(Forager))
        .behavior(Arc::new(Wanderer))
        .names(["Clover", "Thistle", "Bramble", "Sorrel", "Yarrow"])
        .despawn_on_join(settings.despawn_on_join);
    if let Some(seed) = settings.seed {
        bots = bots.seed(seed);
    }

    let mut builder = GameDefinition::<ArenaEntity>::builder(GAME_NAME)
        .tick_rate(settings.tick_rate)
        .max_players(settings.max_players)
        .bots(bots)
        .on_create(move |room| {
            for _ in 0..food_count {
                let (x, y) = random_point(room);
                let value = room.rng().gen_range(1..=3);
                room.spawn(ArenaEntity::food(x, y, value))?;
            }
            Ok(())
        })
        .on_player_join(|room, player| {
            let name = room
                .players
                .get(player)
                .map(|p| p.identity.display_name.clone())
                .unwrap_or_default();
            let (x, y) = random_point(room);
            let heading = room.rng().gen_range(0.0..TAU);
            room.spawn_for(player, ArenaEntity::grazer(x, y, heading, name))?;
            Ok(())
        })
        .on_player_leave(|room, player| {
            if let Some(entity) = room.players.get(player).and_then(|p| p.entity) {
                room.despawn(entity);
            }
            Ok(())
        })
        .on_tick(move |room, delta| {
            move_grazers(room, delta);
            graze(room, score_limit);
            Ok(())
        })
        .on_game_over(|room| {
            let leader = room
                .entities
                .of_kind(ArenaKind::Grazer)
                .filter_map(|e| match &e.state {
                    ArenaEntity::Grazer { name, score, .. } => Some((name.clone(), *score)),
                    ArenaEntity::Food { .. } => None,
                })
                .max_by_key(|(_, score)| *score);
            if let Some((name, score)) = leader {
                let key = format!("{}:winner", room.key());
                room.persist_record(&key, &format!("{}={}", name, score));
            }
            Ok(())
        });

    if settings.debug {
        builder = builder.debug_channel(GAME_NAME);
    }
    builder.build()
}

fn random_point(room: &mut Room<ArenaEntity>) -> (f32, f32) {
    let rng = room.rng();
    (
        rng.gen_range(EAT_RADIUS..ARENA_WIDTH - EAT_RADIUS),
        rng.gen_range(EAT_RADIUS..ARENA_HEIGHT - EAT_RADIUS),
    )
}

/// Advances grazers along their heading, bouncing off the arena walls
fn move_grazers(room: &mut Room<ArenaEntity>, delta: f32) {
    for entity in room.entities.of_kind_mut(ArenaKind::Grazer) {
        if let ArenaEntity::Grazer { x, y, heading, .. } = &mut entity.state {
            *x += heading.cos() * GRAZER_SPEED * delta;
            *y += heading.sin() * GRAZER_SPEED * delta;

            if *x < 0.0 || *x > ARENA_WIDTH {
                *x = (*x).clamp(0.0, ARENA_WIDTH);
                *heading = (PI - *heading).rem_euclid(TAU);
            }
            if *y < 0.0 || *y > ARENA_HEIGHT {
                *y = (*y).clamp(0.0, ARENA_HEIGHT);
                *heading = (-*heading).rem_euclid(TAU);
            }
        }
    }
}

/// Lets every grazer eat the food it overlaps
fn graze(room: &mut Room<ArenaEntity>, score_limit: Option<i64>) {
    let grazers: Vec<(EntityId, Option<PlayerId>, (f32, f32))> = room
        .entities
        .of_kind(ArenaKind::Grazer)
        .filter_map(|e| e.state.position().map(|pos| (e.id, e.owner, pos)))
        .collect();

    for (grazer_id, owner, position) in grazers {
        let Some((food_id, value)) = room
            .entities
            .nearest(ArenaKind::Food, position, |_| false)
            .filter(|food| {
                food.distance_squared_to(position)
                    .is_some_and(|d| d <= EAT_RADIUS * EAT_RADIUS)
            })
            .and_then(|food| match food.state {
                ArenaEntity::Food { value, .. } => Some((food.id, value)),
                ArenaEntity::Grazer { .. } => None,
            })
        else {
            continue;
        };

        let (x, y) = relocation_for(room, position);
        if let Some(food) = room.entities.get_mut(food_id) {
            food.state.set_position(x, y);
        }

        let mut payout = 0;
        let mut reached_limit = false;
        if let Some(ArenaEntity::Grazer { score, rewarded, .. }) =
            room.entities.get_mut(grazer_id).map(|e| &mut e.state)
        {
            *score += value;
            let tiers = *score / REWARD_EVERY;
            payout = tiers - *rewarded;
            *rewarded = tiers;
            reached_limit = score_limit.is_some_and(|limit| *score >= limit);
        }

        room.debug(
            GAME_NAME,
            &format!("grazer {} ate food {} worth {}", grazer_id, food_id, value),
        );

        if payout > 0 {
            let profile = owner
                .and_then(|owner| room.players.get(owner))
                .filter(|player| !player.is_bot)
                .map(|player| player.identity.profile_id.clone());
            if let Some(profile) = profile {
                room.grant_reward(&profile, "grazer-tier", payout);
            }
        }
        if reached_limit {
            room.end_game();
        }
    }
}

/// A random spot clear of whoever just ate there
fn relocation_for(room: &mut Room<ArenaEntity>, eater: (f32, f32)) -> (f32, f32) {
    for _ in 0..16 {
        let (x, y) = random_point(room);
        let (dx, dy) = (x - eater.0, y - eater.1);
        if dx * dx + dy * dy > EAT_RADIUS * EAT_RADIUS * 4.0 {
            return (x, y);
        }
    }
    // opposite side of the arena
    (ARENA_WIDTH - eater.0, ARENA_HEIGHT - eater.1)
}

/// Heads straight for the closest pellet
pub struct Forager;

impl Behavior<ArenaEntity> for Forager {
    fn name(&self) -> &str {
        "forager"
    }

    fn think(&self, bot: &mut BotContext<'_>, entities: &EntityCollection<ArenaEntity>, _delta: f32) {
        let Some(position) = bot
            .entity
            .and_then(|id| entities.get(id))
            .and_then(|e| e.state.position())
        else {
            return;
        };
        let Some(target) = entities
            .nearest(ArenaKind::Food, position, |_| false)
            .and_then(|food| food.state.position())
        else {
            return;
        };

        let heading = (target.1 - position.1).atan2(target.0 - position.0);
        bot.send_input(Payload::new().with("heading", heading));
    }
}

/// Drifts around, changing direction twice a second
pub struct Wanderer;

impl Behavior<ArenaEntity> for Wanderer {
    fn name(&self) -> &str {
        "wanderer"
    }

    fn think_rate(&self) -> Option<f32> {
        Some(2.0)
    }

    fn think(&self, bot: &mut BotContext<'_>, _entities: &EntityCollection<ArenaEntity>, _delta: f32) {
        let turn = bot.rng().gen_range(-PI / 4.0..PI / 4.0);
        bot.send_input(Payload::new().with("turn", turn));
    }
}
