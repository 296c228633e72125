//! Generational registry owning every supervised entity.
//!
//! Entities are addressed by an [`EntityId`] made of a slot index and the
//! generation of that slot. Removing an entity bumps the slot generation, so an
//! id captured before removal (for example inside an in-flight transport
//! ticket) no longer resolves once the slot is reused. Completions that arrive
//! after their entity was destroyed are therefore detected instead of being
//! applied to whichever entity now occupies the slot.

use std::fmt;

/// Stable handle to an entity held by a [`Registry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId {
    index: usize,
    generation: u64,
}

impl EntityId {
    /// Slot index inside the owning registry.
    #[must_use]
    pub const fn index(self) -> usize {
        self.index
    }

    /// Generation of the slot when the entity was inserted.
    #[must_use]
    pub const fn generation(self) -> u64 {
        self.generation
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}v{}", self.index, self.generation)
    }
}

#[derive(Debug)]
struct Slot<T> {
    generation: u64,
    value: Option<T>,
}

/// Arena that exclusively owns entities of one kind.
#[derive(Debug)]
pub struct Registry<T> {
    slots: Vec<Slot<T>>,
    free: Vec<usize>,
    len: usize,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }
}

impl<T> Registry<T> {
    /// Builds an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an entity built from its freshly assigned id.
    pub fn insert_with(&mut self, build: impl FnOnce(EntityId) -> T) -> EntityId {
        if let Some(index) = self.free.pop()
            && let Some(slot) = self.slots.get_mut(index)
        {
            let id = EntityId {
                index,
                generation: slot.generation,
            };
            slot.value = Some(build(id));
            self.len += 1;
            return id;
        }
        let id = EntityId {
            index: self.slots.len(),
            generation: 0,
        };
        self.slots.push(Slot {
            generation: 0,
            value: Some(build(id)),
        });
        self.len += 1;
        id
    }

    /// Fallible variant of [`Registry::insert_with`]; nothing is inserted
    /// when the builder fails.
    pub fn try_insert_with<E>(
        &mut self,
        build: impl FnOnce(EntityId) -> Result<T, E>,
    ) -> Result<EntityId, E> {
        let value = build(self.next_id())?;
        Ok(self.insert_with(|_| value))
    }

    fn next_id(&self) -> EntityId {
        match self.free.last() {
            Some(&index) => EntityId {
                index,
                generation: self.slots.get(index).map_or(0, |slot| slot.generation),
            },
            None => EntityId {
                index: self.slots.len(),
                generation: 0,
            },
        }
    }

    /// Resolves an id to its entity, if it is still alive.
    #[must_use]
    pub fn get(&self, id: EntityId) -> Option<&T> {
        self.slots
            .get(id.index)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    /// Mutable variant of [`Registry::get`].
    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut T> {
        self.slots
            .get_mut(id.index)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    /// Returns `true` while the id refers to a live entity.
    #[must_use]
    pub fn contains(&self, id: EntityId) -> bool {
        self.get(id).is_some()
    }

    /// Removes an entity, invalidating every copy of its id.
    pub fn remove(&mut self, id: EntityId) -> Option<T> {
        let slot = self
            .slots
            .get_mut(id.index)
            .filter(|slot| slot.generation == id.generation)?;
        let value = slot.value.take()?;
        slot.generation += 1;
        self.free.push(id.index);
        self.len -= 1;
        Some(value)
    }

    /// Ids of all live entities, in slot order.
    #[must_use]
    pub fn ids(&self) -> Vec<EntityId> {
        self.iter().map(|(id, _)| id).collect()
    }

    /// Iterates over live entities in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value.as_ref().map(|value| {
                (
                    EntityId {
                        index,
                        generation: slot.generation,
                    },
                    value,
                )
            })
        })
    }

    /// Number of live entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` when no entity is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
