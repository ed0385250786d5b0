// SPDX-License-Identifier: MIT OR Apache-2.0
//! The entity/component/hierarchy database.
//!
//! Entity slots are stored densely and recycled through a doubly
//! linked free list threaded through the vacant records. Hierarchy
//! nodes and name slots live in separately packed arrays; an entity
//! stores an index into each, or `-1`.

use glam::{Quat, Vec3};

use crate::entity::{ComponentType, GameObject, SceneId, MAX_COMPONENT_TYPES};
use crate::events::DelegateList;
use crate::hash::name_hash;
use crate::scene::{ComponentTypeEntry, Scene};
use crate::serialize::{IndexGuidMap, WorldDeserializer, WorldSerializer};
use crate::stream::{BlobReader, BlobWriter, StreamError};
use crate::transform::Transform;

const RESERVED_ENTITY_COUNT: usize = 5000;

/// Live payload or free-list links of one entity slot.
#[derive(Debug, Clone, Copy, PartialEq)]
enum SlotState {
    /// The slot holds a live entity.
    Live {
        /// Uniform scale.
        scale: f32,
        /// Component presence mask, one bit per [`ComponentType`].
        components: u64,
    },
    /// The slot is vacant and linked into the free list.
    Free {
        /// Previous free slot, `-1` at the head.
        prev: i32,
        /// Next free slot, `-1` at the tail.
        next: i32,
    },
}

#[derive(Debug, Clone, Copy)]
struct EntityRecord {
    position: Vec3,
    rotation: Quat,
    /// Index into the hierarchy array, `-1` when unattached.
    hierarchy: i32,
    /// Index into the name array, `-1` when unnamed.
    name: i32,
    state: SlotState,
}

impl EntityRecord {
    fn is_live(&self) -> bool {
        matches!(self.state, SlotState::Live { .. })
    }

    fn components(&self) -> u64 {
        match self.state {
            SlotState::Live { components, .. } => components,
            SlotState::Free { .. } => 0,
        }
    }

    fn scale(&self) -> f32 {
        match self.state {
            SlotState::Live { scale, .. } => scale,
            SlotState::Free { .. } => {
                debug_assert!(false, "scale of a vacant slot");
                1.0
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct HierarchyNode {
    entity: GameObject,
    parent: GameObject,
    first_child: GameObject,
    next_sibling: GameObject,
    local_transform: Transform,
}

#[derive(Debug, Clone)]
struct NameSlot {
    entity: GameObject,
    name: String,
}

/// Delegates the store fires synchronously while mutating.
///
/// Listeners must not mutate the store re-entrantly.
#[derive(Default)]
pub struct ProjectEvents {
    /// An entity slot went live (create or emplace).
    pub entity_created: DelegateList<GameObject>,
    /// An entity was returned to the free list.
    pub entity_destroyed: DelegateList<GameObject>,
    /// An entity's global transform changed. Fired depth-first in
    /// sibling order during hierarchy propagation.
    pub entity_transformed: DelegateList<GameObject>,
    /// A component bit was set.
    pub component_added: DelegateList<(GameObject, ComponentType)>,
    /// A component bit was cleared.
    pub component_destroyed: DelegateList<(GameObject, ComponentType)>,
}

/// The project store: entities, hierarchy, names and the scene
/// registry.
pub struct Project {
    name: String,
    entities: Vec<EntityRecord>,
    hierarchy: Vec<HierarchyNode>,
    names: Vec<NameSlot>,
    first_free_slot: i32,
    scenes: Vec<Box<dyn Scene>>,
    component_types: [Option<ComponentTypeEntry>; MAX_COMPONENT_TYPES],
    /// Mutation delegates.
    pub events: ProjectEvents,
}

impl Project {
    /// An empty project.
    pub fn new() -> Project {
        Project {
            name: String::new(),
            entities: Vec::with_capacity(RESERVED_ENTITY_COUNT),
            hierarchy: Vec::new(),
            names: Vec::new(),
            first_free_slot: -1,
            scenes: Vec::new(),
            component_types: [const { None }; MAX_COMPONENT_TYPES],
            events: ProjectEvents::default(),
        }
    }

    /// Project name, used as the snapshot directory name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rename the project.
    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_owned();
    }

    // ---- scene registry ----------------------------------------------------

    /// Register a scene; returns its id for component-type binding.
    pub fn add_scene(&mut self, scene: Box<dyn Scene>) -> SceneId {
        self.scenes.push(scene);
        SceneId(self.scenes.len() - 1)
    }

    /// Number of registered scenes.
    pub fn scene_count(&self) -> usize {
        self.scenes.len()
    }

    /// A registered scene.
    pub fn scene(&self, id: SceneId) -> &dyn Scene {
        self.scenes[id.0].as_ref()
    }

    /// A registered scene, mutably.
    pub fn scene_mut(&mut self, id: SceneId) -> &mut dyn Scene {
        self.scenes[id.0].as_mut()
    }

    /// Find a scene by the hash of its name.
    pub fn scene_by_name_hash(&self, hash: u32) -> Option<SceneId> {
        self.scenes
            .iter()
            .position(|scene| name_hash(scene.name()) == hash)
            .map(SceneId)
    }

    /// Bind a component type to the scene owning it. Entries are
    /// immutable once registered.
    pub fn register_component_type(&mut self, component_type: ComponentType, name: &str, scene: SceneId) {
        debug_assert!(component_type.is_valid());
        debug_assert!(self.component_types[component_type.index()].is_none());
        self.component_types[component_type.index()] = Some(ComponentTypeEntry {
            scene,
            name: name.to_owned(),
            name_hash: name_hash(name),
        });
    }

    /// Registration record for a component type.
    pub fn component_type_entry(&self, component_type: ComponentType) -> Option<&ComponentTypeEntry> {
        self.component_types[component_type.index()].as_ref()
    }

    /// Resolve a component type from the hash of its name.
    pub fn component_type_from_hash(&self, hash: u32) -> Option<ComponentType> {
        (1..MAX_COMPONENT_TYPES).find_map(|index| {
            let entry = self.component_types[index].as_ref()?;
            (entry.name_hash == hash).then(|| ComponentType::new(index as u8))
        })
    }

    /// The scene owning a component type.
    pub fn scene_of_type(&self, component_type: ComponentType) -> Option<SceneId> {
        self.component_type_entry(component_type).map(|entry| entry.scene)
    }

    /// Version of the scene owning `component_type`.
    pub fn scene_version_of_type(&self, component_type: ComponentType) -> Option<u32> {
        self.scene_of_type(component_type)
            .map(|id| self.scene(id).version())
    }

    // ---- entity lifecycle --------------------------------------------------

    /// Whether `entity` names a live slot.
    pub fn has_entity(&self, entity: GameObject) -> bool {
        entity.is_valid()
            && entity.index() < self.entities.len()
            && self.entities[entity.index()].is_live()
    }

    /// Allocate an entity, reusing a free slot when one exists.
    pub fn create_entity(&mut self, position: Vec3, rotation: Quat) -> GameObject {
        let entity;
        if self.first_free_slot >= 0 {
            let slot = self.first_free_slot as usize;
            let next = match self.entities[slot].state {
                SlotState::Free { next, .. } => next,
                SlotState::Live { .. } => unreachable!("free list head is live"),
            };
            if next >= 0 {
                if let SlotState::Free { prev, .. } = &mut self.entities[next as usize].state {
                    *prev = -1;
                }
            }
            self.first_free_slot = next;
            entity = GameObject::from_index(slot);
        } else {
            entity = GameObject::from_index(self.entities.len());
            self.entities.push(EntityRecord {
                position: Vec3::ZERO,
                rotation: Quat::IDENTITY,
                hierarchy: -1,
                name: -1,
                state: SlotState::Free { prev: -1, next: -1 },
            });
        }
        let record = &mut self.entities[entity.index()];
        record.position = position;
        record.rotation = rotation;
        record.name = -1;
        record.hierarchy = -1;
        record.state = SlotState::Live {
            scale: 1.0,
            components: 0,
        };
        self.events.entity_created.invoke(&entity);
        entity
    }

    /// Claim the slot at an explicit index, extending the array and
    /// fixing the free list as needed. Used when deserialization or
    /// undo must restore an entity at its original index.
    pub fn emplace_entity(&mut self, entity: GameObject) {
        while self.entities.len() <= entity.index() {
            let index = self.entities.len() as i32;
            self.entities.push(EntityRecord {
                position: Vec3::ZERO,
                rotation: Quat::IDENTITY,
                hierarchy: -1,
                name: -1,
                state: SlotState::Free {
                    prev: -1,
                    next: self.first_free_slot,
                },
            });
            if self.first_free_slot >= 0 {
                if let SlotState::Free { prev, .. } =
                    &mut self.entities[self.first_free_slot as usize].state
                {
                    *prev = index;
                }
            }
            self.first_free_slot = index;
        }

        let (prev, next) = match self.entities[entity.index()].state {
            SlotState::Free { prev, next } => (prev, next),
            SlotState::Live { .. } => {
                debug_assert!(false, "emplacing a live slot {entity}");
                return;
            }
        };
        if self.first_free_slot == entity.index() as i32 {
            self.first_free_slot = next;
        }
        if prev >= 0 {
            if let SlotState::Free { next: n, .. } = &mut self.entities[prev as usize].state {
                *n = next;
            }
        }
        if next >= 0 {
            if let SlotState::Free { prev: p, .. } = &mut self.entities[next as usize].state {
                *p = prev;
            }
        }

        let record = &mut self.entities[entity.index()];
        record.position = Vec3::ZERO;
        record.rotation = Quat::IDENTITY;
        record.name = -1;
        record.hierarchy = -1;
        record.state = SlotState::Live {
            scale: 1.0,
            components: 0,
        };
        self.events.entity_created.invoke(&entity);
    }

    /// Destroy an entity: tear down components, detach from the
    /// hierarchy (children are re-parented to the root), drop the
    /// name, and return the slot to the free list.
    pub fn destroy_entity(&mut self, entity: GameObject) {
        if !entity.is_valid() {
            return;
        }
        debug_assert!(self.entities[entity.index()].is_live());

        loop {
            let child = self.first_child(entity);
            if !child.is_valid() {
                break;
            }
            self.set_parent(GameObject::INVALID, child);
        }
        self.set_parent(GameObject::INVALID, entity);

        let mask = self.entities[entity.index()].components();
        for index in 1..MAX_COMPONENT_TYPES {
            if mask & (1u64 << index) != 0 {
                self.destroy_component(entity, ComponentType::new(index as u8));
            }
        }

        let name_index = self.entities[entity.index()].name;
        if name_index >= 0 {
            let last_owner = self.names.last().expect("name slot exists").entity;
            self.entities[last_owner.index()].name = name_index;
            self.names.swap_remove(name_index as usize);
            self.entities[entity.index()].name = -1;
        }

        let record = &mut self.entities[entity.index()];
        record.hierarchy = -1;
        record.state = SlotState::Free {
            prev: -1,
            next: self.first_free_slot,
        };
        if self.first_free_slot >= 0 {
            if let SlotState::Free { prev, .. } =
                &mut self.entities[self.first_free_slot as usize].state
            {
                *prev = entity.index() as i32;
            }
        }
        self.first_free_slot = entity.index() as i32;
        self.events.entity_destroyed.invoke(&entity);
    }

    /// Create a copy of an entity next to it: same transform, parent
    /// and component payloads.
    pub fn clone_entity(&mut self, entity: GameObject) -> GameObject {
        let transform = self.transform(entity);
        let parent = self.parent(entity);
        let clone = self.create_entity(transform.position, transform.rotation);
        self.set_scale(clone, transform.scale);
        if parent.is_valid() {
            self.set_parent(parent, clone);
        }

        let types: Vec<ComponentType> = self.components(entity).collect();
        for component_type in types {
            let mut blob = BlobWriter::new();
            {
                let mut serializer = WorldSerializer::new(&mut blob, &IndexGuidMap);
                self.serialize_component(&mut serializer, component_type, entity);
            }
            self.create_component(component_type, clone);
            let version = self
                .scene_version_of_type(component_type)
                .expect("component type registered");
            let mut reader = BlobReader::new(blob.as_slice());
            let mut deserializer = WorldDeserializer::new(&mut reader, &IndexGuidMap);
            if let Err(error) =
                self.deserialize_component(&mut deserializer, clone, component_type, version)
            {
                tracing::error!(%entity, %component_type, "clone payload truncated: {error}");
            }
        }
        clone
    }

    /// Copy one component's reflected properties onto another entity,
    /// creating the component there first.
    pub fn clone_component(
        &mut self,
        component_type: ComponentType,
        from: GameObject,
        to: GameObject,
    ) -> bool {
        if !self.has_component(from, component_type) || !self.create_component(component_type, to) {
            return false;
        }
        let mut blob = BlobWriter::new();
        self.save_component_properties(from, component_type, &mut blob);
        let mut reader = BlobReader::new(blob.as_slice());
        if let Err(error) = self.load_component_properties(to, component_type, -1, &mut reader) {
            tracing::error!(%from, %to, "clone payload truncated: {error}");
            return false;
        }
        true
    }

    /// First live entity in slot order.
    pub fn first_entity(&self) -> GameObject {
        self.next_live_from(0)
    }

    /// Next live entity after `entity` in slot order.
    pub fn next_entity(&self, entity: GameObject) -> GameObject {
        self.next_live_from(entity.index() + 1)
    }

    fn next_live_from(&self, start: usize) -> GameObject {
        for index in start..self.entities.len() {
            if self.entities[index].is_live() {
                return GameObject::from_index(index);
            }
        }
        GameObject::INVALID
    }

    /// Number of live entities.
    pub fn entity_count(&self) -> usize {
        self.entities.iter().filter(|record| record.is_live()).count()
    }

    // ---- names -------------------------------------------------------------

    /// Set or replace an entity's name. An empty name on an unnamed
    /// entity is a no-op.
    pub fn set_entity_name(&mut self, entity: GameObject, name: &str) {
        let name_index = self.entities[entity.index()].name;
        if name_index < 0 {
            if name.is_empty() {
                return;
            }
            self.entities[entity.index()].name = self.names.len() as i32;
            self.names.push(NameSlot {
                entity,
                name: name.to_owned(),
            });
        } else {
            self.names[name_index as usize].name = name.to_owned();
        }
    }

    /// The entity's name, empty when unnamed.
    pub fn entity_name(&self, entity: GameObject) -> &str {
        let name_index = self.entities[entity.index()].name;
        if name_index < 0 {
            ""
        } else {
            &self.names[name_index as usize].name
        }
    }

    /// Find an entity by name among `parent`'s children, or among
    /// root-level entities when `parent` is invalid.
    pub fn find_by_name(&self, parent: GameObject, name: &str) -> GameObject {
        if parent.is_valid() {
            let mut child = self.first_child(parent);
            while child.is_valid() {
                if self.entity_name(child) == name {
                    return child;
                }
                child = self.next_sibling(child);
            }
        } else {
            for slot in &self.names {
                if slot.name == name {
                    let record = &self.entities[slot.entity.index()];
                    if record.hierarchy < 0
                        || !self.hierarchy[record.hierarchy as usize].parent.is_valid()
                    {
                        return slot.entity;
                    }
                }
            }
        }
        GameObject::INVALID
    }

    // ---- hierarchy ---------------------------------------------------------

    /// The entity's parent, `INVALID` at the root.
    pub fn parent(&self, entity: GameObject) -> GameObject {
        let index = self.entities[entity.index()].hierarchy;
        if index < 0 {
            GameObject::INVALID
        } else {
            self.hierarchy[index as usize].parent
        }
    }

    /// The entity's first child.
    pub fn first_child(&self, entity: GameObject) -> GameObject {
        let index = self.entities[entity.index()].hierarchy;
        if index < 0 {
            GameObject::INVALID
        } else {
            self.hierarchy[index as usize].first_child
        }
    }

    /// The entity's next sibling in its parent's child chain.
    pub fn next_sibling(&self, entity: GameObject) -> GameObject {
        let index = self.entities[entity.index()].hierarchy;
        if index < 0 {
            GameObject::INVALID
        } else {
            self.hierarchy[index as usize].next_sibling
        }
    }

    /// Whether `descendant` is reachable below `ancestor`.
    pub fn is_descendant(&self, ancestor: GameObject, descendant: GameObject) -> bool {
        if !ancestor.is_valid() {
            return false;
        }
        let mut child = self.first_child(ancestor);
        while child.is_valid() {
            if child == descendant || self.is_descendant(child, descendant) {
                return true;
            }
            child = self.next_sibling(child);
        }
        false
    }

    /// Attach `child` under `new_parent`, or detach it when
    /// `new_parent` is invalid. Rejects cycles with a log line and
    /// `false`. On attach the child's local transform is recomputed
    /// from the parent's global; on detach it is reset to the global.
    pub fn set_parent(&mut self, new_parent: GameObject, child: GameObject) -> bool {
        if self.is_descendant(child, new_parent) {
            tracing::error!(%child, %new_parent, "hierarchy cannot contain a cycle");
            return false;
        }

        let mut child_index = self.entities[child.index()].hierarchy;
        if child_index >= 0 {
            let old_parent = self.hierarchy[child_index as usize].parent;
            if old_parent.is_valid() {
                self.unlink_from_sibling_chain(old_parent, child);
                self.hierarchy[child_index as usize].parent = GameObject::INVALID;
                self.hierarchy[child_index as usize].next_sibling = GameObject::INVALID;
                self.collect_hierarchy_garbage(old_parent);
                child_index = self.entities[child.index()].hierarchy;
            }
        } else if new_parent.is_valid() {
            child_index = self.push_hierarchy_node(child);
        }

        if new_parent.is_valid() {
            let mut parent_index = self.entities[new_parent.index()].hierarchy;
            if parent_index < 0 {
                parent_index = self.push_hierarchy_node(new_parent);
            }

            let local = self.transform(new_parent).inverted() * self.transform(child);
            let previous_first = self.hierarchy[parent_index as usize].first_child;
            let node = &mut self.hierarchy[child_index as usize];
            node.parent = new_parent;
            node.local_transform = local;
            node.next_sibling = previous_first;
            self.hierarchy[parent_index as usize].first_child = child;
        } else if child_index >= 0 {
            self.hierarchy[child_index as usize].local_transform = self.transform(child);
            self.collect_hierarchy_garbage(child);
        }
        true
    }

    fn push_hierarchy_node(&mut self, entity: GameObject) -> i32 {
        let index = self.hierarchy.len() as i32;
        self.entities[entity.index()].hierarchy = index;
        self.hierarchy.push(HierarchyNode {
            entity,
            parent: GameObject::INVALID,
            first_child: GameObject::INVALID,
            next_sibling: GameObject::INVALID,
            local_transform: Transform::IDENTITY,
        });
        index
    }

    fn unlink_from_sibling_chain(&mut self, parent: GameObject, child: GameObject) {
        let parent_index = self.entities[parent.index()].hierarchy as usize;
        if self.hierarchy[parent_index].first_child == child {
            self.hierarchy[parent_index].first_child = self.next_sibling(child);
            return;
        }
        let mut cursor = self.hierarchy[parent_index].first_child;
        while cursor.is_valid() {
            let cursor_index = self.entities[cursor.index()].hierarchy as usize;
            if self.hierarchy[cursor_index].next_sibling == child {
                self.hierarchy[cursor_index].next_sibling = self.next_sibling(child);
                return;
            }
            cursor = self.hierarchy[cursor_index].next_sibling;
        }
    }

    /// Remove the hierarchy node of `entity` if it has neither a
    /// parent nor children, back-filling from the array tail.
    fn collect_hierarchy_garbage(&mut self, entity: GameObject) {
        let index = self.entities[entity.index()].hierarchy;
        debug_assert!(index >= 0);
        let node = &self.hierarchy[index as usize];
        if node.parent.is_valid() || node.first_child.is_valid() {
            return;
        }
        let last_owner = self.hierarchy.last().expect("node exists").entity;
        self.entities[last_owner.index()].hierarchy = index;
        self.entities[entity.index()].hierarchy = -1;
        self.hierarchy.swap_remove(index as usize);
    }

    /// Local transform relative to the parent; equals the global
    /// transform for unattached entities.
    pub fn local_transform(&self, entity: GameObject) -> Transform {
        let index = self.entities[entity.index()].hierarchy;
        if index < 0 {
            self.transform(entity)
        } else {
            self.hierarchy[index as usize].local_transform
        }
    }

    /// Local scale component.
    pub fn local_scale(&self, entity: GameObject) -> f32 {
        let index = self.entities[entity.index()].hierarchy;
        if index < 0 {
            self.scale(entity)
        } else {
            self.hierarchy[index as usize].local_transform.scale
        }
    }

    /// The local transform `global` would have under `parent`.
    pub fn compute_local_transform(&self, parent: GameObject, global: &Transform) -> Transform {
        self.transform(parent).inverted() * *global
    }

    /// Set the local position, preserving the local frame and
    /// recomputing the global transform.
    pub fn set_local_position(&mut self, entity: GameObject, position: Vec3) {
        let index = self.entities[entity.index()].hierarchy;
        if index < 0 {
            self.set_position(entity, position);
            return;
        }
        self.hierarchy[index as usize].local_transform.position = position;
        self.update_global_transform(entity);
    }

    /// Set the local rotation.
    pub fn set_local_rotation(&mut self, entity: GameObject, rotation: Quat) {
        let index = self.entities[entity.index()].hierarchy;
        if index < 0 {
            self.set_rotation(entity, rotation);
            return;
        }
        self.hierarchy[index as usize].local_transform.rotation = rotation;
        self.update_global_transform(entity);
    }

    /// Set the full local transform.
    pub fn set_local_transform(&mut self, entity: GameObject, transform: &Transform) {
        let index = self.entities[entity.index()].hierarchy;
        if index < 0 {
            self.set_transform(entity, transform);
            return;
        }
        self.hierarchy[index as usize].local_transform = *transform;
        self.update_global_transform(entity);
    }

    fn update_global_transform(&mut self, entity: GameObject) {
        let index = self.entities[entity.index()].hierarchy as usize;
        let parent = self.hierarchy[index].parent;
        let new_global = if parent.is_valid() {
            self.transform(parent) * self.hierarchy[index].local_transform
        } else {
            self.hierarchy[index].local_transform
        };
        self.set_transform(entity, &new_global);
    }

    // ---- transforms --------------------------------------------------------

    /// Global position.
    pub fn position(&self, entity: GameObject) -> Vec3 {
        self.entities[entity.index()].position
    }

    /// Global rotation.
    pub fn rotation(&self, entity: GameObject) -> Quat {
        self.entities[entity.index()].rotation
    }

    /// Global uniform scale.
    pub fn scale(&self, entity: GameObject) -> f32 {
        self.entities[entity.index()].scale()
    }

    /// Global transform.
    pub fn transform(&self, entity: GameObject) -> Transform {
        let record = &self.entities[entity.index()];
        Transform {
            position: record.position,
            rotation: record.rotation,
            scale: record.scale(),
        }
    }

    /// Set the global position, updating the subtree.
    pub fn set_position(&mut self, entity: GameObject, position: Vec3) {
        self.entities[entity.index()].position = position;
        self.transform_entity(entity, true);
    }

    /// Set the global rotation, updating the subtree.
    pub fn set_rotation(&mut self, entity: GameObject, rotation: Quat) {
        self.entities[entity.index()].rotation = rotation;
        self.transform_entity(entity, true);
    }

    /// Set the global scale, updating the subtree.
    pub fn set_scale(&mut self, entity: GameObject, scale: f32) {
        self.set_slot_scale(entity.index(), scale);
        self.transform_entity(entity, true);
    }

    /// Set the full global transform, updating the subtree.
    pub fn set_transform(&mut self, entity: GameObject, transform: &Transform) {
        let record = &mut self.entities[entity.index()];
        record.position = transform.position;
        record.rotation = transform.rotation;
        self.set_slot_scale(entity.index(), transform.scale);
        self.transform_entity(entity, true);
    }

    /// Set the global transform without moving children: every
    /// child's local transform is recomputed so its global stays put.
    pub fn set_transform_keep_children(&mut self, entity: GameObject, transform: &Transform) {
        {
            let record = &mut self.entities[entity.index()];
            record.position = transform.position;
            record.rotation = transform.rotation;
        }
        self.set_slot_scale(entity.index(), transform.scale);

        let hierarchy_index = self.entities[entity.index()].hierarchy;
        self.events.entity_transformed.invoke(&entity);
        if hierarchy_index < 0 {
            return;
        }
        let my_transform = self.transform(entity);
        let parent = self.hierarchy[hierarchy_index as usize].parent;
        if parent.is_valid() {
            let local = self.transform(parent).inverted() * my_transform;
            self.hierarchy[hierarchy_index as usize].local_transform = local;
        }

        let mut child = self.hierarchy[hierarchy_index as usize].first_child;
        while child.is_valid() {
            let child_index = self.entities[child.index()].hierarchy as usize;
            self.hierarchy[child_index].local_transform =
                my_transform.inverted() * self.transform(child);
            child = self.hierarchy[child_index].next_sibling;
        }
    }

    /// Propagate a changed global transform to the subtree.
    ///
    /// With `update_local`, the entity's own local transform is
    /// recomputed against its parent first. Children are visited
    /// depth-first in sibling order; each child's global becomes
    /// `parent_global * child_local`.
    fn transform_entity(&mut self, entity: GameObject, update_local: bool) {
        let hierarchy_index = self.entities[entity.index()].hierarchy;
        self.events.entity_transformed.invoke(&entity);
        if hierarchy_index < 0 {
            return;
        }
        let my_transform = self.transform(entity);
        if update_local {
            let parent = self.hierarchy[hierarchy_index as usize].parent;
            if parent.is_valid() {
                let local = self.transform(parent).inverted() * my_transform;
                self.hierarchy[hierarchy_index as usize].local_transform = local;
            }
        }

        let mut child = self.hierarchy[hierarchy_index as usize].first_child;
        while child.is_valid() {
            let child_index = self.entities[child.index()].hierarchy as usize;
            let next = self.hierarchy[child_index].next_sibling;
            let absolute = my_transform * self.hierarchy[child_index].local_transform;
            let record = &mut self.entities[child.index()];
            record.position = absolute.position;
            record.rotation = absolute.rotation;
            self.set_slot_scale(child.index(), absolute.scale);
            self.transform_entity(child, false);
            child = next;
        }
    }

    fn set_slot_scale(&mut self, index: usize, new_scale: f32) {
        match &mut self.entities[index].state {
            SlotState::Live { scale, .. } => *scale = new_scale,
            SlotState::Free { .. } => debug_assert!(false, "scaling a vacant slot"),
        }
    }

    // ---- components --------------------------------------------------------

    /// Whether the entity carries a component of `component_type`.
    pub fn has_component(&self, entity: GameObject, component_type: ComponentType) -> bool {
        self.entities[entity.index()].components() & component_type.mask() != 0
    }

    /// The entity's component mask.
    pub fn component_mask(&self, entity: GameObject) -> u64 {
        self.entities[entity.index()].components()
    }

    /// First component type present on the entity.
    pub fn first_component(&self, entity: GameObject) -> ComponentType {
        self.next_component_from(entity, 1)
    }

    /// Next component type present after `component_type`.
    pub fn next_component(&self, entity: GameObject, component_type: ComponentType) -> ComponentType {
        self.next_component_from(entity, component_type.index() + 1)
    }

    fn next_component_from(&self, entity: GameObject, start: usize) -> ComponentType {
        let mask = self.entities[entity.index()].components();
        for index in start..MAX_COMPONENT_TYPES {
            if mask & (1u64 << index) != 0 {
                return ComponentType::new(index as u8);
            }
        }
        ComponentType::INVALID
    }

    /// Iterate the component types present on the entity.
    pub fn components(&self, entity: GameObject) -> impl Iterator<Item = ComponentType> + '_ {
        let mask = self.entities[entity.index()].components();
        (1..MAX_COMPONENT_TYPES)
            .filter(move |index| mask & (1u64 << index) != 0)
            .map(|index| ComponentType::new(index as u8))
    }

    /// Create a component through the owning scene. On success the
    /// component bit is set and `component_added` fires.
    pub fn create_component(&mut self, component_type: ComponentType, entity: GameObject) -> bool {
        if self.has_component(entity, component_type) {
            return false;
        }
        let Some(scene_id) = self.scene_of_type(component_type) else {
            tracing::error!(%component_type, "component type is not registered");
            return false;
        };
        if !self.scenes[scene_id.0].create_component(component_type, entity) {
            return false;
        }
        match &mut self.entities[entity.index()].state {
            SlotState::Live { components, .. } => *components |= component_type.mask(),
            SlotState::Free { .. } => unreachable!("component on a vacant slot"),
        }
        self.events.component_added.invoke(&(entity, component_type));
        true
    }

    /// Destroy a component through the owning scene, clear its bit
    /// and fire `component_destroyed`.
    pub fn destroy_component(&mut self, entity: GameObject, component_type: ComponentType) -> bool {
        if !self.has_component(entity, component_type) {
            return false;
        }
        let scene_id = self.scene_of_type(component_type).expect("bit implies registration");
        self.scenes[scene_id.0].destroy_component(component_type, entity);
        match &mut self.entities[entity.index()].state {
            SlotState::Live { components, .. } => *components &= !component_type.mask(),
            SlotState::Free { .. } => unreachable!("component on a vacant slot"),
        }
        self.events.component_destroyed.invoke(&(entity, component_type));
        true
    }

    /// Recreate scene-side storage for a component whose mask bit was
    /// restored by a raw table load. Fires no event; the bit is
    /// already set.
    pub fn rebuild_component(&mut self, component_type: ComponentType, entity: GameObject) -> bool {
        debug_assert!(self.has_component(entity, component_type));
        let Some(scene_id) = self.scene_of_type(component_type) else {
            tracing::error!(%component_type, "component type is not registered");
            return false;
        };
        self.scenes[scene_id.0].create_component(component_type, entity)
    }

    /// Serialize one component payload through the owning scene.
    pub fn serialize_component(
        &self,
        serializer: &mut WorldSerializer<'_>,
        component_type: ComponentType,
        entity: GameObject,
    ) {
        let scene_id = self.scene_of_type(component_type).expect("registered type");
        self.scenes[scene_id.0].serialize_component(component_type, entity, serializer);
    }

    /// Deserialize one component payload through the owning scene.
    /// The component must already exist.
    pub fn deserialize_component(
        &mut self,
        deserializer: &mut WorldDeserializer<'_, '_>,
        entity: GameObject,
        component_type: ComponentType,
        scene_version: u32,
    ) -> Result<(), StreamError> {
        let scene_id = self.scene_of_type(component_type).expect("registered type");
        self.scenes[scene_id.0].deserialize_component(
            component_type,
            entity,
            deserializer,
            scene_version,
        )
    }

    // ---- reflected properties ----------------------------------------------

    /// Write one reflected property through the owning scene.
    pub fn set_property_value(
        &mut self,
        entity: GameObject,
        component_type: ComponentType,
        property: u32,
        index: i32,
        value: &[u8],
    ) -> bool {
        let Some(scene_id) = self.scene_of_type(component_type) else {
            return false;
        };
        self.scenes[scene_id.0].set_property(entity, component_type, property, index, value)
    }

    /// Read one reflected property through the owning scene.
    pub fn get_property_value(
        &self,
        entity: GameObject,
        component_type: ComponentType,
        property: u32,
        index: i32,
        out: &mut Vec<u8>,
    ) -> bool {
        let Some(scene_id) = self.scene_of_type(component_type) else {
            return false;
        };
        self.scenes[scene_id.0].get_property(entity, component_type, property, index, out)
    }

    /// Save a component's full property payload for undo.
    pub fn save_component_properties(
        &self,
        entity: GameObject,
        component_type: ComponentType,
        out: &mut BlobWriter,
    ) {
        let scene_id = self.scene_of_type(component_type).expect("registered type");
        self.scenes[scene_id.0].save_properties(entity, component_type, out);
    }

    /// Restore a property payload written by
    /// [`Project::save_component_properties`].
    pub fn load_component_properties(
        &mut self,
        entity: GameObject,
        component_type: ComponentType,
        index: i32,
        input: &mut BlobReader<'_>,
    ) -> Result<(), StreamError> {
        let scene_id = self.scene_of_type(component_type).expect("registered type");
        self.scenes[scene_id.0].load_properties(entity, component_type, index, input)
    }

    /// Append an item to a reflected array property.
    pub fn add_array_item(
        &mut self,
        entity: GameObject,
        component_type: ComponentType,
        property: u32,
        index: i32,
    ) -> i32 {
        let Some(scene_id) = self.scene_of_type(component_type) else {
            return -1;
        };
        self.scenes[scene_id.0].add_array_item(entity, component_type, property, index)
    }

    /// Remove an item from a reflected array property.
    pub fn remove_array_item(
        &mut self,
        entity: GameObject,
        component_type: ComponentType,
        property: u32,
        index: i32,
    ) -> bool {
        let Some(scene_id) = self.scene_of_type(component_type) else {
            return false;
        };
        self.scenes[scene_id.0].remove_array_item(entity, component_type, property, index)
    }

    /// Save one array item's properties for undo.
    pub fn save_array_item(
        &self,
        entity: GameObject,
        component_type: ComponentType,
        property: u32,
        index: i32,
        out: &mut BlobWriter,
    ) -> bool {
        let Some(scene_id) = self.scene_of_type(component_type) else {
            return false;
        };
        self.scenes[scene_id.0].save_array_item(entity, component_type, property, index, out)
    }

    // ---- raw snapshot ------------------------------------------------------

    /// Write the entity, name and hierarchy tables verbatim, free
    /// list included. Used by the play-mode scratch snapshot where
    /// slot indices must survive unchanged.
    pub fn serialize(&self, blob: &mut BlobWriter) {
        blob.write_u32(self.entities.len() as u32);
        for record in &self.entities {
            match record.state {
                SlotState::Live { scale, components } => {
                    blob.write_u8(1);
                    blob.write_vec3(record.position);
                    blob.write_quat(record.rotation);
                    blob.write_f32(scale);
                    blob.write_u64(components);
                    blob.write_i32(record.hierarchy);
                    blob.write_i32(record.name);
                }
                SlotState::Free { prev, next } => {
                    blob.write_u8(0);
                    blob.write_i32(prev);
                    blob.write_i32(next);
                }
            }
        }
        blob.write_i32(self.first_free_slot);

        blob.write_u32(self.names.len() as u32);
        for slot in &self.names {
            blob.write_i32(slot.entity.raw());
            blob.write_str(&slot.name);
        }

        blob.write_u32(self.hierarchy.len() as u32);
        for node in &self.hierarchy {
            blob.write_i32(node.entity.raw());
            blob.write_i32(node.parent.raw());
            blob.write_i32(node.first_child.raw());
            blob.write_i32(node.next_sibling.raw());
            blob.write_transform(&node.local_transform);
        }
    }

    /// Restore the tables written by [`Project::serialize`]. Fires no
    /// events; callers rebuild dependent state themselves.
    pub fn deserialize(&mut self, reader: &mut BlobReader<'_>) -> Result<(), StreamError> {
        let entity_count = reader.read_u32()? as usize;
        self.entities.clear();
        self.entities.reserve(entity_count);
        for _ in 0..entity_count {
            let live = reader.read_u8()? != 0;
            let record = if live {
                let position = reader.read_vec3()?;
                let rotation = reader.read_quat()?;
                let scale = reader.read_f32()?;
                let components = reader.read_u64()?;
                let hierarchy = reader.read_i32()?;
                let name = reader.read_i32()?;
                EntityRecord {
                    position,
                    rotation,
                    hierarchy,
                    name,
                    state: SlotState::Live { scale, components },
                }
            } else {
                let prev = reader.read_i32()?;
                let next = reader.read_i32()?;
                EntityRecord {
                    position: Vec3::ZERO,
                    rotation: Quat::IDENTITY,
                    hierarchy: -1,
                    name: -1,
                    state: SlotState::Free { prev, next },
                }
            };
            self.entities.push(record);
        }
        self.first_free_slot = reader.read_i32()?;

        let name_count = reader.read_u32()? as usize;
        self.names.clear();
        for _ in 0..name_count {
            let entity = GameObject::from_raw(reader.read_i32()?);
            let name = reader.read_string()?;
            self.names.push(NameSlot { entity, name });
        }

        let node_count = reader.read_u32()? as usize;
        self.hierarchy.clear();
        for _ in 0..node_count {
            let entity = GameObject::from_raw(reader.read_i32()?);
            let parent = GameObject::from_raw(reader.read_i32()?);
            let first_child = GameObject::from_raw(reader.read_i32()?);
            let next_sibling = GameObject::from_raw(reader.read_i32()?);
            let local_transform = reader.read_transform()?;
            self.hierarchy.push(HierarchyNode {
                entity,
                parent,
                first_child,
                next_sibling,
                local_transform,
            });
        }
        Ok(())
    }

    /// Walk the free list, returning the chain of vacant slots.
    /// Returns `None` when the chain is corrupt (a cycle or a link to
    /// a live slot).
    pub fn free_list_chain(&self) -> Option<Vec<usize>> {
        let mut chain = Vec::new();
        let mut cursor = self.first_free_slot;
        while cursor >= 0 {
            let index = cursor as usize;
            if index >= self.entities.len() || chain.contains(&index) {
                return None;
            }
            match self.entities[index].state {
                SlotState::Free { next, .. } => {
                    chain.push(index);
                    cursor = next;
                }
                SlotState::Live { .. } => return None,
            }
        }
        Some(chain)
    }
}

impl Default for Project {
    fn default() -> Project {
        Project::new()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::rc::Rc;

    use super::*;

    /// Minimal scene owning one component type with a single float of
    /// data, enough to exercise registry dispatch and masks.
    struct CounterScene {
        name: &'static str,
        data: HashMap<GameObject, f32>,
    }

    impl CounterScene {
        fn new(name: &'static str) -> CounterScene {
            CounterScene {
                name,
                data: HashMap::new(),
            }
        }
    }

    impl Scene for CounterScene {
        fn name(&self) -> &str {
            self.name
        }

        fn version(&self) -> u32 {
            1
        }

        fn create_component(&mut self, _ct: ComponentType, entity: GameObject) -> bool {
            self.data.insert(entity, 0.0);
            true
        }

        fn destroy_component(&mut self, _ct: ComponentType, entity: GameObject) {
            self.data.remove(&entity);
        }

        fn serialize_component(
            &self,
            _ct: ComponentType,
            entity: GameObject,
            serializer: &mut WorldSerializer<'_>,
        ) {
            serializer.write_f32(self.data[&entity]);
        }

        fn deserialize_component(
            &mut self,
            _ct: ComponentType,
            entity: GameObject,
            deserializer: &mut WorldDeserializer<'_, '_>,
            _scene_version: u32,
        ) -> Result<(), StreamError> {
            let value = deserializer.read_f32()?;
            self.data.insert(entity, value);
            Ok(())
        }

        fn serialize(&self, serializer: &mut WorldSerializer<'_>) {
            serializer.write_u32(self.data.len() as u32);
        }

        fn deserialize(
            &mut self,
            _deserializer: &mut WorldDeserializer<'_, '_>,
            _version: u32,
        ) -> Result<(), StreamError> {
            Ok(())
        }
    }

    const TEST_TYPE: ComponentType = ComponentType::new(1);

    fn project_with_scene() -> Project {
        let mut project = Project::new();
        let scene = project.add_scene(Box::new(CounterScene::new("counter")));
        project.register_component_type(TEST_TYPE, "counter_value", scene);
        project
    }

    #[test]
    fn create_reuses_destroyed_slots() {
        let mut project = Project::new();
        let a = project.create_entity(Vec3::ZERO, Quat::IDENTITY);
        let b = project.create_entity(Vec3::ZERO, Quat::IDENTITY);
        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);

        project.destroy_entity(a);
        assert_eq!(project.entity_count(), 1);
        let c = project.create_entity(Vec3::ONE, Quat::IDENTITY);
        assert_eq!(c.index(), 0, "destroyed slot is recycled");
        assert_eq!(project.entity_count(), 2);
    }

    #[test]
    fn free_list_stays_a_chain_under_churn() {
        let mut project = Project::new();
        let mut live = Vec::new();
        for round in 0..64 {
            if round % 3 == 2 {
                let victim: GameObject = live.swap_remove(round % live.len());
                project.destroy_entity(victim);
            } else {
                live.push(project.create_entity(Vec3::ZERO, Quat::IDENTITY));
            }
            let chain = project.free_list_chain().expect("free list intact");
            assert_eq!(
                project.entity_count() + chain.len(),
                project.entities.len(),
                "every slot is either live or on the free list"
            );
        }
    }

    #[test]
    fn emplace_claims_an_exact_slot_and_fixes_links() {
        let mut project = Project::new();
        project.emplace_entity(GameObject::from_index(4));
        assert_eq!(project.entity_count(), 1);
        assert!(project.has_entity(GameObject::from_index(4)));

        // Slots 0..=3 were created as free; claim one in the middle.
        project.emplace_entity(GameObject::from_index(2));
        let chain = project.free_list_chain().expect("free list intact");
        assert_eq!(chain.len(), 3);
        assert!(!chain.contains(&2) && !chain.contains(&4));

        // Remaining free slots are still allocatable.
        for _ in 0..3 {
            project.create_entity(Vec3::ZERO, Quat::IDENTITY);
        }
        assert_eq!(project.entity_count(), 5);
        assert_eq!(project.free_list_chain().expect("intact").len(), 0);
    }

    #[test]
    fn destroy_detaches_children_to_root() {
        let mut project = Project::new();
        let parent = project.create_entity(Vec3::ZERO, Quat::IDENTITY);
        let child = project.create_entity(Vec3::ONE, Quat::IDENTITY);
        assert!(project.set_parent(parent, child));
        assert_eq!(project.parent(child), parent);

        project.destroy_entity(parent);
        assert!(project.has_entity(child));
        assert_eq!(project.parent(child), GameObject::INVALID);
    }

    #[test]
    fn set_parent_rejects_cycles() {
        let mut project = Project::new();
        let a = project.create_entity(Vec3::ZERO, Quat::IDENTITY);
        let b = project.create_entity(Vec3::ZERO, Quat::IDENTITY);
        let c = project.create_entity(Vec3::ZERO, Quat::IDENTITY);
        assert!(project.set_parent(a, b));
        assert!(project.set_parent(b, c));

        assert!(!project.set_parent(c, a), "closing the loop must fail");
        assert_eq!(project.parent(a), GameObject::INVALID);
        assert_eq!(project.parent(b), a);
        assert_eq!(project.parent(c), b);
    }

    #[test]
    fn global_transforms_compose_through_the_hierarchy() {
        let mut project = Project::new();
        let parent = project.create_entity(Vec3::new(10.0, 0.0, 0.0), Quat::IDENTITY);
        let child = project.create_entity(Vec3::new(11.0, 0.0, 0.0), Quat::IDENTITY);
        project.set_parent(parent, child);

        project.set_position(parent, Vec3::new(20.0, 0.0, 0.0));
        let expected = project.transform(parent) * project.local_transform(child);
        assert!((project.position(child) - expected.position).length() < 1e-4);
        assert!((project.position(child) - Vec3::new(21.0, 0.0, 0.0)).length() < 1e-4);
    }

    #[test]
    fn local_setters_preserve_the_local_frame() {
        let mut project = Project::new();
        let parent = project.create_entity(Vec3::ZERO, Quat::from_rotation_y(1.0));
        let child = project.create_entity(Vec3::new(1.0, 0.0, 0.0), Quat::IDENTITY);
        project.set_parent(parent, child);

        project.set_local_position(child, Vec3::new(0.0, 2.0, 0.0));
        let expected = project.transform(parent) * project.local_transform(child);
        assert!((project.position(child) - expected.position).length() < 1e-4);
        assert_eq!(
            project.local_transform(child).position,
            Vec3::new(0.0, 2.0, 0.0)
        );
    }

    #[test]
    fn set_transform_keep_children_leaves_children_in_place() {
        let mut project = Project::new();
        let parent = project.create_entity(Vec3::ZERO, Quat::IDENTITY);
        let child = project.create_entity(Vec3::new(3.0, 0.0, 0.0), Quat::IDENTITY);
        project.set_parent(parent, child);

        let child_before = project.position(child);
        project.set_transform_keep_children(
            parent,
            &Transform::new(Vec3::new(0.0, 5.0, 0.0), Quat::IDENTITY, 1.0),
        );
        assert!((project.position(child) - child_before).length() < 1e-4);
        // The local frame absorbed the move instead.
        let rebuilt = project.transform(parent) * project.local_transform(child);
        assert!((rebuilt.position - child_before).length() < 1e-4);
    }

    #[test]
    fn hierarchy_nodes_are_garbage_collected() {
        let mut project = Project::new();
        let parent = project.create_entity(Vec3::ZERO, Quat::IDENTITY);
        let child = project.create_entity(Vec3::ZERO, Quat::IDENTITY);
        project.set_parent(parent, child);
        assert_eq!(project.hierarchy.len(), 2);

        project.set_parent(GameObject::INVALID, child);
        assert_eq!(project.hierarchy.len(), 0, "orphan leaves carry no node");
        assert_eq!(project.entities[parent.index()].hierarchy, -1);
        assert_eq!(project.entities[child.index()].hierarchy, -1);
    }

    #[test]
    fn names_survive_slot_compaction() {
        let mut project = Project::new();
        let a = project.create_entity(Vec3::ZERO, Quat::IDENTITY);
        let b = project.create_entity(Vec3::ZERO, Quat::IDENTITY);
        project.set_entity_name(a, "alpha");
        project.set_entity_name(b, "beta");

        project.destroy_entity(a);
        assert_eq!(project.entity_name(b), "beta");
        assert_eq!(project.find_by_name(GameObject::INVALID, "beta"), b);
        assert_eq!(
            project.find_by_name(GameObject::INVALID, "alpha"),
            GameObject::INVALID
        );
    }

    #[test]
    fn find_by_name_scopes_to_children() {
        let mut project = Project::new();
        let parent = project.create_entity(Vec3::ZERO, Quat::IDENTITY);
        let child = project.create_entity(Vec3::ZERO, Quat::IDENTITY);
        let stranger = project.create_entity(Vec3::ZERO, Quat::IDENTITY);
        project.set_parent(parent, child);
        project.set_entity_name(child, "wheel");
        project.set_entity_name(stranger, "wheel");

        assert_eq!(project.find_by_name(parent, "wheel"), child);
    }

    #[test]
    fn component_lifecycle_flips_mask_bits_and_fires_events() {
        let mut project = project_with_scene();
        let entity = project.create_entity(Vec3::ZERO, Quat::IDENTITY);

        let added = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&added);
        project
            .events
            .component_added
            .bind(move |(e, ct): &(GameObject, ComponentType)| {
                sink.borrow_mut().push((*e, *ct));
            });

        assert!(project.create_component(TEST_TYPE, entity));
        assert!(project.has_component(entity, TEST_TYPE));
        assert_eq!(project.component_mask(entity), TEST_TYPE.mask());
        assert_eq!(project.first_component(entity), TEST_TYPE);
        assert_eq!(*added.borrow(), vec![(entity, TEST_TYPE)]);

        assert!(!project.create_component(TEST_TYPE, entity), "no duplicates");
        assert!(project.destroy_component(entity, TEST_TYPE));
        assert_eq!(project.component_mask(entity), 0);
    }

    #[test]
    fn destroying_an_entity_destroys_its_components() {
        let mut project = project_with_scene();
        let entity = project.create_entity(Vec3::ZERO, Quat::IDENTITY);
        project.create_component(TEST_TYPE, entity);

        let destroyed = Rc::new(RefCell::new(0));
        let sink = Rc::clone(&destroyed);
        project
            .events
            .component_destroyed
            .bind(move |_: &(GameObject, ComponentType)| *sink.borrow_mut() += 1);

        project.destroy_entity(entity);
        assert_eq!(*destroyed.borrow(), 1);
    }

    #[test]
    fn clone_entity_copies_transform_and_components() {
        let mut project = project_with_scene();
        let entity = project.create_entity(Vec3::new(1.0, 2.0, 3.0), Quat::IDENTITY);
        project.set_scale(entity, 2.0);
        project.create_component(TEST_TYPE, entity);

        let clone = project.clone_entity(entity);
        assert_ne!(clone, entity);
        assert_eq!(project.position(clone), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(project.scale(clone), 2.0);
        assert!(project.has_component(clone, TEST_TYPE));
    }

    #[test]
    fn raw_snapshot_round_trips_every_table() {
        let mut project = Project::new();
        let a = project.create_entity(Vec3::new(1.0, 0.0, 0.0), Quat::IDENTITY);
        let b = project.create_entity(Vec3::new(2.0, 0.0, 0.0), Quat::IDENTITY);
        let c = project.create_entity(Vec3::new(3.0, 0.0, 0.0), Quat::IDENTITY);
        project.set_parent(a, b);
        project.set_entity_name(a, "root");
        project.destroy_entity(c);

        let mut blob = BlobWriter::new();
        project.serialize(&mut blob);

        let mut restored = Project::new();
        let mut reader = BlobReader::new(blob.as_slice());
        restored.deserialize(&mut reader).expect("well-formed blob");

        assert_eq!(restored.entity_count(), 2);
        assert_eq!(restored.parent(b), a);
        assert_eq!(restored.entity_name(a), "root");
        assert_eq!(restored.position(b), Vec3::new(2.0, 0.0, 0.0));
        assert_eq!(
            restored.free_list_chain().expect("intact"),
            project.free_list_chain().expect("intact")
        );

        // The restored free list must still serve allocations.
        let reused = restored.create_entity(Vec3::ZERO, Quat::IDENTITY);
        assert_eq!(reused, c);
    }

    #[test]
    fn transform_events_fire_depth_first() {
        let mut project = Project::new();
        let parent = project.create_entity(Vec3::ZERO, Quat::IDENTITY);
        let child = project.create_entity(Vec3::ONE, Quat::IDENTITY);
        project.set_parent(parent, child);

        let order = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&order);
        project
            .events
            .entity_transformed
            .bind(move |entity: &GameObject| sink.borrow_mut().push(*entity));

        project.set_position(parent, Vec3::new(5.0, 0.0, 0.0));
        assert_eq!(*order.borrow(), vec![parent, child]);
    }
}
