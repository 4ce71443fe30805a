use arcade_shared::schema::{apply_fields, project_fields};
use arcade_shared::{EntitySnapshot, FieldMap, Payload, Synced};
use std::fmt;

pub type EntityId = u32;
pub type PlayerId = u32;

/// A game's closed set of entity kinds
///
/// Games implement this on an enum with one variant per kind; `kind()` is the
/// discriminant used for typed queries.
pub trait GameEntity: Synced + Send + 'static {
    type Kind: Copy + Eq + fmt::Debug + Send;

    fn kind(&self) -> Self::Kind;

    /// Reference point for proximity queries
    fn position(&self) -> Option<(f32, f32)> {
        None
    }

    /// Controller intent, from a connection or a bot alike
    fn on_input(&mut self, _payload: &Payload) {}
}

/// An entity living in a session's collection
#[derive(Debug, Clone)]
pub struct Entity<E> {
    pub id: EntityId,
    pub is_bot: bool,
    pub owner: Option<PlayerId>,
    pub state: E,
}

impl<E: GameEntity> Entity<E> {
    pub fn new(id: EntityId, state: E) -> Self {
        Self {
            id,
            is_bot: false,
            owner: None,
            state,
        }
    }

    pub fn kind(&self) -> E::Kind {
        self.state.kind()
    }

    pub fn to_snapshot(&self) -> EntitySnapshot {
        EntitySnapshot {
            id: self.id,
            schema: self.state.schema().name.to_string(),
            is_bot: self.is_bot,
            fields: project_fields(&self.state),
        }
    }

    pub fn apply_snapshot(&mut self, values: &FieldMap) -> usize {
        apply_fields(&mut self.state, values)
    }

    pub fn on_input(&mut self, payload: &Payload) {
        self.state.on_input(payload);
    }

    pub fn distance_squared_to(&self, point: (f32, f32)) -> Option<f32> {
        self.state.position().map(|(x, y)| {
            let dx = x - point.0;
            let dy = y - point.1;
            dx * dx + dy * dy
        })
    }
}
