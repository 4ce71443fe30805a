//! Live entity set owned by one session
//!
//! Entities are kept in insertion order. Iteration, kind filters and
//! proximity queries all walk that order, which makes "first match wins"
//! deterministic across runs.

use crate::entity::{Entity, EntityId, GameEntity, PlayerId};
use crate::session::SessionError;

#[derive(Debug)]
pub struct EntityCollection<E> {
    entities: Vec<Entity<E>>,
    /// `None` once every id up to `EntityId::MAX` has been handed out
    next_id: Option<EntityId>,
}

impl<E: GameEntity> EntityCollection<E> {
    pub fn new() -> Self {
        Self {
            entities: Vec::new(),
            next_id: Some(1),
        }
    }

    /// Adds an entity under a freshly generated id
    pub fn insert(&mut self, state: E) -> Result<EntityId, SessionError> {
        let id = self.next_id.ok_or(SessionError::IdsExhausted)?;
        self.next_id = id.checked_add(1);
        self.entities.push(Entity::new(id, state));
        Ok(id)
    }

    /// Adds an entity under a caller-assigned id
    pub fn insert_with_id(&mut self, id: EntityId, state: E) -> Result<EntityId, SessionError> {
        if self.contains(id) {
            return Err(SessionError::DuplicateEntity(id));
        }

        if self.next_id.is_some_and(|next| id >= next) {
            self.next_id = id.checked_add(1);
        }
        self.entities.push(Entity::new(id, state));
        Ok(id)
    }

    pub fn remove(&mut self, id: EntityId) -> Option<Entity<E>> {
        let index = self.entities.iter().position(|entity| entity.id == id)?;
        Some(self.entities.remove(index))
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.iter().any(|entity| entity.id == id)
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity<E>> {
        self.entities.iter().find(|entity| entity.id == id)
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity<E>> {
        self.entities.iter_mut().find(|entity| entity.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity<E>> {
        self.entities.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Entity<E>> {
        self.entities.iter_mut()
    }

    pub fn of_kind(&self, kind: E::Kind) -> impl Iterator<Item = &Entity<E>> {
        self.entities
            .iter()
            .filter(move |entity| entity.kind() == kind)
    }

    pub fn of_kind_mut(&mut self, kind: E::Kind) -> impl Iterator<Item = &mut Entity<E>> {
        self.entities
            .iter_mut()
            .filter(move |entity| entity.kind() == kind)
    }

    pub fn owned_by(&self, player: PlayerId) -> Option<&Entity<E>> {
        self.entities
            .iter()
            .find(|entity| entity.owner == Some(player))
    }

    pub fn ids(&self) -> Vec<EntityId> {
        self.entities.iter().map(|entity| entity.id).collect()
    }

    /// Closest entity of `kind` to `point` by squared straight-line distance
    ///
    /// Entities rejected by `exclude`, or without a position, are skipped. On an
    /// exact tie the earlier-inserted entity wins.
    pub fn nearest<F>(&self, kind: E::Kind, point: (f32, f32), exclude: F) -> Option<&Entity<E>>
    where
        F: Fn(&Entity<E>) -> bool,
    {
        let mut best: Option<(&Entity<E>, f32)> = None;

        for entity in self.of_kind(kind) {
            if exclude(entity) {
                continue;
            }
            let Some(distance) = entity.distance_squared_to(point) else {
                continue;
            };

            match best {
                Some((_, best_distance)) if distance >= best_distance => {}
                _ => best = Some((entity, distance)),
            }
        }

        best.map(|(entity, _)| entity)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

impl<E: GameEntity> Default for EntityCollection<E> {
    fn default() -> Self {
        Self::new()
    }
}
