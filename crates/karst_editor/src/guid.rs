// SPDX-License-Identifier: MIT OR Apache-2.0
//! Stable entity identity.
//!
//! The guid map is a bijection between live entities and 64-bit guids
//! that survive slot recycling, saves and play-mode round trips. Guids
//! come from a thread-local RNG, or from a monotonic counter when the
//! editor runs with `-pseudorandom_guid` for reproducible tests. The
//! mode is fixed for the lifetime of the map.

use std::collections::HashMap;

use karst_project::{EntityGuid, GameObject};
use rand::Rng;

/// Bijection between entities and stable guids.
pub struct EntityGuidMap {
    guid_to_entity: HashMap<u64, GameObject>,
    entity_to_guid: Vec<EntityGuid>,
    nonrandom_guid: u64,
    is_random: bool,
}

impl EntityGuidMap {
    /// An empty map. With `is_random` false, guids are a monotonic
    /// counter starting at 1.
    pub fn new(is_random: bool) -> EntityGuidMap {
        EntityGuidMap {
            guid_to_entity: HashMap::new(),
            entity_to_guid: Vec::new(),
            nonrandom_guid: 0,
            is_random,
        }
    }

    /// Whether guids are randomly allocated.
    pub fn is_random(&self) -> bool {
        self.is_random
    }

    /// Drop every mapping and reset the counter.
    pub fn clear(&mut self) {
        self.guid_to_entity.clear();
        self.entity_to_guid.clear();
        self.nonrandom_guid = 0;
    }

    /// Allocate a guid for `entity` and insert both directions.
    pub fn create(&mut self, entity: GameObject) -> EntityGuid {
        debug_assert!(entity.is_valid());
        let guid = if self.is_random {
            // Valid guids never collide with EntityGuid::INVALID.
            EntityGuid(rand::thread_rng().gen_range(0..u64::MAX))
        } else {
            self.nonrandom_guid += 1;
            EntityGuid(self.nonrandom_guid)
        };
        self.insert(guid, entity);
        guid
    }

    /// Remove `entity`'s mapping. Its guid is dropped entirely and is
    /// never reused. Idempotent on already-erased entities.
    pub fn erase(&mut self, entity: GameObject) {
        if !entity.is_valid() || entity.index() >= self.entity_to_guid.len() {
            return;
        }
        let guid = self.entity_to_guid[entity.index()];
        if !guid.is_valid() {
            return;
        }
        self.entity_to_guid[entity.index()] = EntityGuid::INVALID;
        self.guid_to_entity.remove(&guid.0);
    }

    /// Insert an existing guid/entity pair, growing the reverse table
    /// as needed. Used when deserialization dictates the guid.
    pub fn insert(&mut self, guid: EntityGuid, entity: GameObject) {
        if !self.is_random && guid.is_valid() {
            // Keep the counter ahead of loaded guids so later
            // allocations cannot collide with them.
            self.nonrandom_guid = self.nonrandom_guid.max(guid.0);
        }
        self.guid_to_entity.insert(guid.0, entity);
        while entity.index() >= self.entity_to_guid.len() {
            self.entity_to_guid.push(EntityGuid::INVALID);
        }
        self.entity_to_guid[entity.index()] = guid;
    }

    /// The entity a guid refers to, `INVALID` when unknown.
    pub fn entity(&self, guid: EntityGuid) -> GameObject {
        self.guid_to_entity
            .get(&guid.0)
            .copied()
            .unwrap_or(GameObject::INVALID)
    }

    /// The guid of an entity, `INVALID` when the entity has none.
    pub fn guid(&self, entity: GameObject) -> EntityGuid {
        if !entity.is_valid() || entity.index() >= self.entity_to_guid.len() {
            return EntityGuid::INVALID;
        }
        self.entity_to_guid[entity.index()]
    }

    /// Whether a guid is mapped.
    pub fn has(&self, guid: EntityGuid) -> bool {
        self.guid_to_entity.contains_key(&guid.0)
    }

    /// Number of mapped entities.
    pub fn len(&self) -> usize {
        self.guid_to_entity.len()
    }

    /// Whether no entity is mapped.
    pub fn is_empty(&self) -> bool {
        self.guid_to_entity.is_empty()
    }
}

impl karst_project::SaveGuidMap for EntityGuidMap {
    fn guid(&self, entity: GameObject) -> EntityGuid {
        EntityGuidMap::guid(self, entity)
    }
}

impl karst_project::LoadGuidMap for EntityGuidMap {
    fn entity(&self, guid: EntityGuid) -> GameObject {
        EntityGuidMap::entity(self, guid)
    }
}
