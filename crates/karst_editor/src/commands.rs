// SPDX-License-Identifier: MIT OR Apache-2.0
//! Undoable editor commands.
//!
//! Every mutation of the project goes through a command submitted to
//! the journal. A command carries everything it needs to execute,
//! undo, serialize for the replay log, and test-merge against the
//! previous command of the same type (slider drags coalesce this
//! way).
//!
//! Commands that act on a member of a prefab family expand their
//! target set over the whole instance list at construction time, so
//! execute and undo stay simple loops.

use std::any::Any;

use glam::{Quat, Vec3};
use karst_project::{
    BlobReader, BlobWriter, ComponentType, EntityGuid, GameObject, LoadGuidMap, Project,
    Transform, WorldDeserializer, WorldSerializer,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::editor::Selection;
use crate::error::EditorError;
use crate::fs::AsyncFileSystem;
use crate::guid::EntityGuidMap;
use crate::prefab::PrefabSystem;

/// Everything a command may touch while executing.
pub struct EditContext<'a> {
    /// The project store.
    pub project: &'a mut Project,
    /// Prefab instance bookkeeping.
    pub prefabs: &'a mut PrefabSystem,
    /// Stable identity map.
    pub guids: &'a mut EntityGuidMap,
    /// The editor selection.
    pub selection: &'a mut Selection,
    /// File-system collaborator, for commands that load resources.
    pub fs: &'a dyn AsyncFileSystem,
}

impl EditContext<'_> {
    /// Destroy an entity and keep prefab links and the selection
    /// consistent. Guid bookkeeping stays with the caller, which
    /// records the guid for undo first.
    pub fn destroy_entity(&mut self, entity: GameObject) {
        self.project.destroy_entity(entity);
        self.prefabs.on_entity_destroyed(entity);
        self.selection.remove(entity);
    }
}

/// An undoable unit of work.
pub trait EditorCommand {
    /// Stable identifier used for merging and cross-session replay.
    fn type_id(&self) -> &'static str;

    /// Apply the command. Returning `false` marks it a no-op; the
    /// journal deletes it without recording.
    fn execute(&mut self, ctx: &mut EditContext<'_>) -> bool;

    /// Revert the command, returning the project to the state it had
    /// when `execute` ran.
    fn undo(&mut self, ctx: &mut EditContext<'_>);

    /// Try to fold this (newer) command into `top`, the current top
    /// of the undo stack, which is guaranteed to have the same
    /// [`EditorCommand::type_id`]. On `true` the journal re-executes
    /// `top` and drops `self`.
    fn merge_into(&mut self, top: &mut dyn EditorCommand) -> bool {
        let _ = top;
        false
    }

    /// Payload for the textual command log.
    fn serialize(&self) -> Value;

    /// Restore the payload from a command log entry; missing fields
    /// take their defaults. Old-state capture that execute does not
    /// perform happens here, against the live project.
    fn deserialize(&mut self, payload: &Value, ctx: &mut EditContext<'_>)
        -> Result<(), EditorError>;

    /// Downcast support for [`EditorCommand::merge_into`].
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

fn to_payload<T: Serialize>(command: &T) -> Value {
    serde_json::to_value(command).unwrap_or(Value::Null)
}

// ---- group sentinels -------------------------------------------------------

/// Marks the start of an atomic command group.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct BeginGroupCommand;

impl EditorCommand for BeginGroupCommand {
    fn type_id(&self) -> &'static str {
        "begin_group"
    }

    fn execute(&mut self, _ctx: &mut EditContext<'_>) -> bool {
        true
    }

    fn undo(&mut self, _ctx: &mut EditContext<'_>) {
        debug_assert!(false, "group sentinels are never undone directly");
    }

    fn serialize(&self) -> Value {
        to_payload(self)
    }

    fn deserialize(&mut self, _payload: &Value, _ctx: &mut EditContext<'_>) -> Result<(), EditorError> {
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Marks the end of an atomic command group.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EndGroupCommand {
    /// Hash of the group kind that opened the group.
    pub group_kind: u32,
}

impl EditorCommand for EndGroupCommand {
    fn type_id(&self) -> &'static str {
        "end_group"
    }

    fn execute(&mut self, _ctx: &mut EditContext<'_>) -> bool {
        true
    }

    fn undo(&mut self, _ctx: &mut EditContext<'_>) {
        debug_assert!(false, "group sentinels are never undone directly");
    }

    fn serialize(&self) -> Value {
        to_payload(self)
    }

    fn deserialize(&mut self, payload: &Value, _ctx: &mut EditContext<'_>) -> Result<(), EditorError> {
        *self = serde_json::from_value(payload.clone())?;
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ---- entity lifecycle ------------------------------------------------------

/// Create one entity at a position. Redo re-claims the same slot so
/// later commands in the journal stay valid.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AddEntityCommand {
    position: Vec3,
    #[serde(skip)]
    entity: GameObject,
    #[serde(skip)]
    guid: EntityGuid,
}

impl AddEntityCommand {
    /// Command creating an entity at `position`.
    pub fn new(position: Vec3) -> AddEntityCommand {
        AddEntityCommand {
            position,
            entity: GameObject::INVALID,
            guid: EntityGuid::INVALID,
        }
    }

    /// The created entity; `INVALID` before the first execute.
    pub fn entity(&self) -> GameObject {
        self.entity
    }
}

impl EditorCommand for AddEntityCommand {
    fn type_id(&self) -> &'static str {
        "add_entity"
    }

    fn execute(&mut self, ctx: &mut EditContext<'_>) -> bool {
        if self.entity.is_valid() {
            ctx.project.emplace_entity(self.entity);
            ctx.project.set_position(self.entity, self.position);
            // Redo restores the identity the first execute allocated.
            ctx.guids.insert(self.guid, self.entity);
        } else {
            self.entity = ctx.project.create_entity(self.position, Quat::IDENTITY);
            self.guid = ctx.guids.create(self.entity);
        }
        ctx.selection.set(&[self.entity]);
        true
    }

    fn undo(&mut self, ctx: &mut EditContext<'_>) {
        ctx.guids.erase(self.entity);
        ctx.destroy_entity(self.entity);
    }

    fn serialize(&self) -> Value {
        to_payload(self)
    }

    fn deserialize(&mut self, payload: &Value, _ctx: &mut EditContext<'_>) -> Result<(), EditorError> {
        *self = serde_json::from_value(payload.clone())?;
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Destroy a set of entities plus their children. Execute records a
/// full payload (guid, name, hierarchy edges, component properties,
/// prefab tag) so undo can rebuild the exact slots. Does not
/// propagate across prefab instances.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DestroyEntitiesCommand {
    entities: Vec<GameObject>,
    #[serde(skip)]
    transforms: Vec<Transform>,
    #[serde(skip)]
    old_values: Vec<u8>,
}

impl DestroyEntitiesCommand {
    /// Command destroying `entities` and all their descendants.
    pub fn new(project: &Project, entities: &[GameObject]) -> DestroyEntitiesCommand {
        let mut gathered = Vec::with_capacity(entities.len());
        for &entity in entities {
            gathered.push(entity);
            push_children(project, entity, &mut gathered);
        }
        let mut seen = std::collections::HashSet::new();
        gathered.retain(|entity| seen.insert(*entity));
        DestroyEntitiesCommand {
            entities: gathered,
            transforms: Vec::new(),
            old_values: Vec::new(),
        }
    }
}

fn push_children(project: &Project, entity: GameObject, out: &mut Vec<GameObject>) {
    let mut child = project.first_child(entity);
    while child.is_valid() {
        out.push(child);
        push_children(project, child, out);
        child = project.next_sibling(child);
    }
}

impl EditorCommand for DestroyEntitiesCommand {
    fn type_id(&self) -> &'static str {
        "destroy_entities"
    }

    fn execute(&mut self, ctx: &mut EditContext<'_>) -> bool {
        self.transforms.clear();
        let mut blob = BlobWriter::new();
        for &entity in &self.entities {
            self.transforms.push(ctx.project.transform(entity));

            blob.write_u64(ctx.guids.guid(entity).0);
            blob.write_str(ctx.project.entity_name(entity));
            let parent = ctx.project.parent(entity);
            blob.write_i32(parent.raw());
            if parent.is_valid() {
                blob.write_transform(&ctx.project.local_transform(entity));
            }
            let mut child = ctx.project.first_child(entity);
            while child.is_valid() {
                blob.write_i32(child.raw());
                blob.write_transform(&ctx.project.local_transform(child));
                child = ctx.project.next_sibling(child);
            }
            blob.write_i32(GameObject::INVALID.raw());

            let components: Vec<ComponentType> = ctx.project.components(entity).collect();
            blob.write_u32(components.len() as u32);
            for component_type in components {
                blob.write_u32(component_type.index() as u32);
                ctx.project
                    .save_component_properties(entity, component_type, &mut blob);
            }
            blob.write_u64(ctx.prefabs.get_prefab(entity));
        }
        self.old_values = blob.into_bytes();

        for index in 0..self.entities.len() {
            let entity = self.entities[index];
            ctx.guids.erase(entity);
            ctx.destroy_entity(entity);
        }
        true
    }

    fn undo(&mut self, ctx: &mut EditContext<'_>) {
        if let Err(error) = self.undo_impl(ctx) {
            tracing::error!("destroy_entities undo payload truncated: {error}");
        }
    }

    fn serialize(&self) -> Value {
        to_payload(self)
    }

    fn deserialize(&mut self, payload: &Value, _ctx: &mut EditContext<'_>) -> Result<(), EditorError> {
        *self = serde_json::from_value(payload.clone())?;
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl DestroyEntitiesCommand {
    fn undo_impl(&mut self, ctx: &mut EditContext<'_>) -> Result<(), EditorError> {
        for &entity in &self.entities {
            ctx.project.emplace_entity(entity);
        }
        let mut reader = BlobReader::new(&self.old_values);
        for (index, &entity) in self.entities.iter().enumerate() {
            ctx.project.set_transform(entity, &self.transforms[index]);

            let guid = EntityGuid(reader.read_u64()?);
            ctx.guids.insert(guid, entity);
            let name = reader.read_string()?;
            ctx.project.set_entity_name(entity, &name);

            let parent = GameObject::from_raw(reader.read_i32()?);
            if parent.is_valid() {
                let local = reader.read_transform()?;
                ctx.project.set_parent(parent, entity);
                ctx.project.set_local_transform(entity, &local);
            }
            loop {
                let child = GameObject::from_raw(reader.read_i32()?);
                if !child.is_valid() {
                    break;
                }
                let local = reader.read_transform()?;
                ctx.project.set_parent(entity, child);
                ctx.project.set_local_transform(child, &local);
            }

            let component_count = reader.read_u32()?;
            for _ in 0..component_count {
                let component_type = ComponentType::new(reader.read_u32()? as u8);
                ctx.project.create_component(component_type, entity);
                ctx.project
                    .load_component_properties(entity, component_type, -1, &mut reader)?;
            }

            let prefab = reader.read_u64()?;
            if prefab != 0 {
                ctx.prefabs.set_prefab(entity, prefab);
            }
        }
        Ok(())
    }
}

// ---- components ------------------------------------------------------------

/// Create a component on a set of entities, expanded over prefab
/// instance lists.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AddComponentCommand {
    component_type: ComponentType,
    entities: Vec<GameObject>,
}

impl AddComponentCommand {
    /// Command adding `component_type` to every entity in `entities`
    /// that lacks it, following prefab instance lists.
    pub fn new(
        project: &Project,
        prefabs: &PrefabSystem,
        entities: &[GameObject],
        component_type: ComponentType,
    ) -> AddComponentCommand {
        let mut targets = Vec::with_capacity(entities.len());
        for &entity in entities {
            if project.has_component(entity, component_type) {
                continue;
            }
            let prefab = prefabs.get_prefab(entity);
            if prefab == 0 {
                targets.push(entity);
            } else {
                let mut instance = prefabs.first_instance(prefab);
                while instance.is_valid() {
                    targets.push(instance);
                    instance = prefabs.next_instance(instance);
                }
            }
        }
        AddComponentCommand {
            component_type,
            entities: targets,
        }
    }
}

impl EditorCommand for AddComponentCommand {
    fn type_id(&self) -> &'static str {
        "add_component"
    }

    fn execute(&mut self, ctx: &mut EditContext<'_>) -> bool {
        let mut any_created = false;
        for &entity in &self.entities {
            ctx.project.create_component(self.component_type, entity);
            if ctx.project.has_component(entity, self.component_type) {
                any_created = true;
            }
        }
        any_created
    }

    fn undo(&mut self, ctx: &mut EditContext<'_>) {
        for &entity in &self.entities {
            ctx.project.destroy_component(entity, self.component_type);
        }
    }

    fn serialize(&self) -> Value {
        to_payload(self)
    }

    fn deserialize(&mut self, payload: &Value, _ctx: &mut EditContext<'_>) -> Result<(), EditorError> {
        *self = serde_json::from_value(payload.clone())?;
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Destroy a component on a set of entities, expanded over prefab
/// instance lists; records the full property payload for undo.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DestroyComponentsCommand {
    component_type: ComponentType,
    entities: Vec<GameObject>,
    #[serde(skip)]
    old_values: Vec<Vec<u8>>,
}

impl DestroyComponentsCommand {
    /// Command removing `component_type` from `entities`, following
    /// prefab instance lists.
    pub fn new(
        project: &Project,
        prefabs: &PrefabSystem,
        entities: &[GameObject],
        component_type: ComponentType,
    ) -> DestroyComponentsCommand {
        let mut targets = Vec::with_capacity(entities.len());
        for &entity in entities {
            if !project.has_component(entity, component_type) {
                continue;
            }
            let prefab = prefabs.get_prefab(entity);
            if prefab == 0 {
                targets.push(entity);
            } else {
                let mut instance = prefabs.first_instance(prefab);
                while instance.is_valid() {
                    targets.push(instance);
                    instance = prefabs.next_instance(instance);
                }
            }
        }
        DestroyComponentsCommand {
            component_type,
            entities: targets,
            old_values: Vec::new(),
        }
    }
}

impl EditorCommand for DestroyComponentsCommand {
    fn type_id(&self) -> &'static str {
        "destroy_components"
    }

    fn execute(&mut self, ctx: &mut EditContext<'_>) -> bool {
        if self.entities.is_empty() {
            return false;
        }
        self.old_values.clear();
        for &entity in &self.entities {
            let mut blob = BlobWriter::new();
            ctx.project
                .save_component_properties(entity, self.component_type, &mut blob);
            self.old_values.push(blob.into_bytes());
            ctx.project.destroy_component(entity, self.component_type);
        }
        true
    }

    fn undo(&mut self, ctx: &mut EditContext<'_>) {
        for (entity, payload) in self.entities.iter().zip(&self.old_values) {
            ctx.project.create_component(self.component_type, *entity);
            let mut reader = BlobReader::new(payload);
            if let Err(error) =
                ctx.project
                    .load_component_properties(*entity, self.component_type, -1, &mut reader)
            {
                tracing::error!(%entity, "destroy_components undo payload truncated: {error}");
            }
        }
    }

    fn serialize(&self) -> Value {
        to_payload(self)
    }

    fn deserialize(&mut self, payload: &Value, _ctx: &mut EditContext<'_>) -> Result<(), EditorError> {
        *self = serde_json::from_value(payload.clone())?;
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ---- transforms ------------------------------------------------------------

/// Set world positions and rotations on a set of entities. A move of
/// a prefab child that keeps its local frame relative to a prefab
/// parent is propagated to every instance of the prefab.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MoveEntityCommand {
    entities: Vec<GameObject>,
    new_positions: Vec<Vec3>,
    new_rotations: Vec<Quat>,
    #[serde(skip)]
    old_positions: Vec<Vec3>,
    #[serde(skip)]
    old_rotations: Vec<Quat>,
}

impl MoveEntityCommand {
    /// Command moving `entities` to `positions`/`rotations`,
    /// expanding prefab siblings.
    pub fn new(
        project: &Project,
        prefabs: &PrefabSystem,
        entities: &[GameObject],
        positions: &[Vec3],
        rotations: &[Quat],
    ) -> MoveEntityCommand {
        debug_assert!(entities.len() == positions.len() && entities.len() == rotations.len());
        let mut command = MoveEntityCommand::default();
        for index in 0..entities.len() {
            let entity = entities[index];
            let prefab = prefabs.get_prefab(entity);
            let parent = project.parent(entity);
            if prefab != 0
                && parent.is_valid()
                && prefabs.get_prefab(parent) & 0xffff_ffff == prefab & 0xffff_ffff
            {
                let scale = project.scale(entity);
                let new_local = project.compute_local_transform(
                    parent,
                    &Transform::new(positions[index], rotations[index], scale),
                );
                let mut instance = prefabs.first_instance(prefab);
                while instance.is_valid() {
                    let instance_parent = project.parent(instance);
                    let new_transform = project.transform(instance_parent) * new_local;
                    command.entities.push(instance);
                    command.new_positions.push(new_transform.position);
                    command.new_rotations.push(new_transform.rotation);
                    command.old_positions.push(project.position(instance));
                    command.old_rotations.push(project.rotation(instance));
                    instance = prefabs.next_instance(instance);
                }
            } else {
                command.entities.push(entity);
                command.new_positions.push(positions[index]);
                command.new_rotations.push(rotations[index]);
                command.old_positions.push(project.position(entity));
                command.old_rotations.push(project.rotation(entity));
            }
        }
        command
    }
}

impl EditorCommand for MoveEntityCommand {
    fn type_id(&self) -> &'static str {
        "move_entity"
    }

    fn execute(&mut self, ctx: &mut EditContext<'_>) -> bool {
        for index in 0..self.entities.len() {
            let entity = self.entities[index];
            ctx.project.set_position(entity, self.new_positions[index]);
            ctx.project.set_rotation(entity, self.new_rotations[index]);
        }
        true
    }

    fn undo(&mut self, ctx: &mut EditContext<'_>) {
        for index in 0..self.entities.len() {
            let entity = self.entities[index];
            ctx.project.set_position(entity, self.old_positions[index]);
            ctx.project.set_rotation(entity, self.old_rotations[index]);
        }
    }

    fn merge_into(&mut self, top: &mut dyn EditorCommand) -> bool {
        let Some(top) = top.as_any_mut().downcast_mut::<MoveEntityCommand>() else {
            return false;
        };
        if top.entities != self.entities {
            return false;
        }
        top.new_positions.clone_from(&self.new_positions);
        top.new_rotations.clone_from(&self.new_rotations);
        true
    }

    fn serialize(&self) -> Value {
        to_payload(self)
    }

    fn deserialize(&mut self, payload: &Value, ctx: &mut EditContext<'_>) -> Result<(), EditorError> {
        *self = serde_json::from_value(payload.clone())?;
        self.old_positions = self
            .entities
            .iter()
            .map(|&entity| ctx.project.position(entity))
            .collect();
        self.old_rotations = self
            .entities
            .iter()
            .map(|&entity| ctx.project.rotation(entity))
            .collect();
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Set local positions on a set of entities, with the same prefab
/// expansion as [`MoveEntityCommand`].
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalMoveEntityCommand {
    entities: Vec<GameObject>,
    new_positions: Vec<Vec3>,
    #[serde(skip)]
    old_positions: Vec<Vec3>,
}

impl LocalMoveEntityCommand {
    /// Command setting local positions, expanding prefab siblings.
    pub fn new(
        project: &Project,
        prefabs: &PrefabSystem,
        entities: &[GameObject],
        positions: &[Vec3],
    ) -> LocalMoveEntityCommand {
        debug_assert!(entities.len() == positions.len());
        let mut command = LocalMoveEntityCommand::default();
        for index in 0..entities.len() {
            let entity = entities[index];
            let prefab = prefabs.get_prefab(entity);
            let parent = project.parent(entity);
            if prefab != 0
                && parent.is_valid()
                && prefabs.get_prefab(parent) & 0xffff_ffff == prefab & 0xffff_ffff
            {
                let mut instance = prefabs.first_instance(prefab);
                while instance.is_valid() {
                    command.entities.push(instance);
                    command.new_positions.push(positions[index]);
                    command.old_positions.push(project.local_transform(instance).position);
                    instance = prefabs.next_instance(instance);
                }
            } else {
                command.entities.push(entity);
                command.new_positions.push(positions[index]);
                command.old_positions.push(project.local_transform(entity).position);
            }
        }
        command
    }
}

impl EditorCommand for LocalMoveEntityCommand {
    fn type_id(&self) -> &'static str {
        "local_move_entity"
    }

    fn execute(&mut self, ctx: &mut EditContext<'_>) -> bool {
        for index in 0..self.entities.len() {
            ctx.project
                .set_local_position(self.entities[index], self.new_positions[index]);
        }
        true
    }

    fn undo(&mut self, ctx: &mut EditContext<'_>) {
        for index in 0..self.entities.len() {
            ctx.project
                .set_local_position(self.entities[index], self.old_positions[index]);
        }
    }

    fn merge_into(&mut self, top: &mut dyn EditorCommand) -> bool {
        let Some(top) = top.as_any_mut().downcast_mut::<LocalMoveEntityCommand>() else {
            return false;
        };
        if top.entities != self.entities {
            return false;
        }
        top.new_positions.clone_from(&self.new_positions);
        true
    }

    fn serialize(&self) -> Value {
        to_payload(self)
    }

    fn deserialize(&mut self, payload: &Value, ctx: &mut EditContext<'_>) -> Result<(), EditorError> {
        *self = serde_json::from_value(payload.clone())?;
        self.old_positions = self
            .entities
            .iter()
            .map(|&entity| ctx.project.local_transform(entity).position)
            .collect();
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Set uniform scales on a set of entities. Scale edits do not
/// propagate across prefab instances.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScaleEntityCommand {
    entities: Vec<GameObject>,
    new_scales: Vec<f32>,
    #[serde(skip)]
    old_scales: Vec<f32>,
}

impl ScaleEntityCommand {
    /// Command applying one scale to every entity.
    pub fn new_uniform(
        project: &Project,
        entities: &[GameObject],
        scale: f32,
    ) -> ScaleEntityCommand {
        ScaleEntityCommand {
            entities: entities.to_vec(),
            new_scales: vec![scale; entities.len()],
            old_scales: entities.iter().map(|&entity| project.scale(entity)).collect(),
        }
    }

    /// Command applying a scale per entity.
    pub fn new_each(
        project: &Project,
        entities: &[GameObject],
        scales: &[f32],
    ) -> ScaleEntityCommand {
        debug_assert!(entities.len() == scales.len());
        ScaleEntityCommand {
            entities: entities.to_vec(),
            new_scales: scales.to_vec(),
            old_scales: entities.iter().map(|&entity| project.scale(entity)).collect(),
        }
    }
}

impl EditorCommand for ScaleEntityCommand {
    fn type_id(&self) -> &'static str {
        "scale_entity"
    }

    fn execute(&mut self, ctx: &mut EditContext<'_>) -> bool {
        for index in 0..self.entities.len() {
            ctx.project.set_scale(self.entities[index], self.new_scales[index]);
        }
        true
    }

    fn undo(&mut self, ctx: &mut EditContext<'_>) {
        for index in 0..self.entities.len() {
            ctx.project.set_scale(self.entities[index], self.old_scales[index]);
        }
    }

    fn merge_into(&mut self, top: &mut dyn EditorCommand) -> bool {
        let Some(top) = top.as_any_mut().downcast_mut::<ScaleEntityCommand>() else {
            return false;
        };
        top.entities == self.entities && top.new_scales == self.new_scales
    }

    fn serialize(&self) -> Value {
        to_payload(self)
    }

    fn deserialize(&mut self, payload: &Value, ctx: &mut EditContext<'_>) -> Result<(), EditorError> {
        *self = serde_json::from_value(payload.clone())?;
        self.old_scales = self
            .entities
            .iter()
            .map(|&entity| ctx.project.scale(entity))
            .collect();
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ---- names and hierarchy ---------------------------------------------------

/// Rename one entity. Does not propagate across prefab instances.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SetNameCommand {
    entity: GameObject,
    name: String,
    #[serde(skip)]
    old_name: String,
}

impl SetNameCommand {
    /// Command renaming `entity` to `name`.
    pub fn new(project: &Project, entity: GameObject, name: &str) -> SetNameCommand {
        SetNameCommand {
            entity,
            name: name.to_owned(),
            old_name: project.entity_name(entity).to_owned(),
        }
    }
}

impl EditorCommand for SetNameCommand {
    fn type_id(&self) -> &'static str {
        "set_name"
    }

    fn execute(&mut self, ctx: &mut EditContext<'_>) -> bool {
        ctx.project.set_entity_name(self.entity, &self.name);
        true
    }

    fn undo(&mut self, ctx: &mut EditContext<'_>) {
        ctx.project.set_entity_name(self.entity, &self.old_name);
    }

    fn merge_into(&mut self, top: &mut dyn EditorCommand) -> bool {
        let Some(top) = top.as_any_mut().downcast_mut::<SetNameCommand>() else {
            return false;
        };
        if top.entity != self.entity {
            return false;
        }
        top.name.clone_from(&self.name);
        true
    }

    fn serialize(&self) -> Value {
        to_payload(self)
    }

    fn deserialize(&mut self, payload: &Value, ctx: &mut EditContext<'_>) -> Result<(), EditorError> {
        *self = serde_json::from_value(payload.clone())?;
        self.old_name = ctx.project.entity_name(self.entity).to_owned();
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Reparent one child. Fails (and is not recorded) when the new
/// parent would create a cycle. Does not propagate across prefab
/// instances.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MakeParentCommand {
    parent: GameObject,
    child: GameObject,
    #[serde(skip)]
    old_parent: GameObject,
}

impl MakeParentCommand {
    /// Command attaching `child` under `parent` (`INVALID` detaches).
    pub fn new(parent: GameObject, child: GameObject) -> MakeParentCommand {
        MakeParentCommand {
            parent,
            child,
            old_parent: GameObject::INVALID,
        }
    }
}

impl EditorCommand for MakeParentCommand {
    fn type_id(&self) -> &'static str {
        "make_parent"
    }

    fn execute(&mut self, ctx: &mut EditContext<'_>) -> bool {
        self.old_parent = ctx.project.parent(self.child);
        ctx.project.set_parent(self.parent, self.child)
    }

    fn undo(&mut self, ctx: &mut EditContext<'_>) {
        ctx.project.set_parent(self.old_parent, self.child);
    }

    fn merge_into(&mut self, top: &mut dyn EditorCommand) -> bool {
        let Some(top) = top.as_any_mut().downcast_mut::<MakeParentCommand>() else {
            return false;
        };
        if top.child != self.child {
            return false;
        }
        top.parent = self.parent;
        true
    }

    fn serialize(&self) -> Value {
        to_payload(self)
    }

    fn deserialize(&mut self, payload: &Value, _ctx: &mut EditContext<'_>) -> Result<(), EditorError> {
        *self = serde_json::from_value(payload.clone())?;
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ---- reflected properties --------------------------------------------------

/// Write a reflected property value on a set of entities, expanded
/// over prefab instance lists.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SetPropertyCommand {
    component_type: ComponentType,
    property: u32,
    index: i32,
    entities: Vec<GameObject>,
    new_value: Vec<u8>,
    #[serde(skip)]
    old_values: Vec<Vec<u8>>,
}

impl SetPropertyCommand {
    /// Command writing `value` (bincode encoding) to `property` of
    /// `component_type` on `entities`, following prefab instance
    /// lists. `index` addresses an array slot, `-1` a scalar.
    pub fn new(
        project: &Project,
        prefabs: &PrefabSystem,
        entities: &[GameObject],
        component_type: ComponentType,
        property: u32,
        index: i32,
        value: Vec<u8>,
    ) -> SetPropertyCommand {
        let mut command = SetPropertyCommand {
            component_type,
            property,
            index,
            entities: Vec::new(),
            new_value: value,
            old_values: Vec::new(),
        };
        for &entity in entities {
            if !project.has_component(entity, component_type) {
                continue;
            }
            let prefab = prefabs.get_prefab(entity);
            if prefab == 0 {
                command.capture(project, entity);
            } else {
                let mut instance = prefabs.first_instance(prefab);
                while instance.is_valid() {
                    command.capture(project, instance);
                    instance = prefabs.next_instance(instance);
                }
            }
        }
        command
    }

    fn capture(&mut self, project: &Project, entity: GameObject) {
        let mut old = Vec::new();
        project.get_property_value(entity, self.component_type, self.property, self.index, &mut old);
        self.entities.push(entity);
        self.old_values.push(old);
    }
}

impl EditorCommand for SetPropertyCommand {
    fn type_id(&self) -> &'static str {
        "set_property"
    }

    fn execute(&mut self, ctx: &mut EditContext<'_>) -> bool {
        for &entity in &self.entities {
            ctx.project.set_property_value(
                entity,
                self.component_type,
                self.property,
                self.index,
                &self.new_value,
            );
        }
        true
    }

    fn undo(&mut self, ctx: &mut EditContext<'_>) {
        for (entity, old) in self.entities.iter().zip(&self.old_values) {
            ctx.project
                .set_property_value(*entity, self.component_type, self.property, self.index, old);
        }
    }

    fn merge_into(&mut self, top: &mut dyn EditorCommand) -> bool {
        let Some(top) = top.as_any_mut().downcast_mut::<SetPropertyCommand>() else {
            return false;
        };
        if top.component_type != self.component_type
            || top.property != self.property
            || top.index != self.index
            || top.entities != self.entities
        {
            return false;
        }
        top.new_value.clone_from(&self.new_value);
        true
    }

    fn serialize(&self) -> Value {
        to_payload(self)
    }

    fn deserialize(&mut self, payload: &Value, ctx: &mut EditContext<'_>) -> Result<(), EditorError> {
        *self = serde_json::from_value(payload.clone())?;
        self.old_values = self
            .entities
            .iter()
            .map(|&entity| {
                let mut old = Vec::new();
                ctx.project.get_property_value(
                    entity,
                    self.component_type,
                    self.property,
                    self.index,
                    &mut old,
                );
                old
            })
            .collect();
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Append an item to a reflected array property.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AddArrayPropertyItemCommand {
    entity: GameObject,
    component_type: ComponentType,
    property: u32,
    index: i32,
}

impl AddArrayPropertyItemCommand {
    /// Command appending an item to `property`.
    pub fn new(
        entity: GameObject,
        component_type: ComponentType,
        property: u32,
    ) -> AddArrayPropertyItemCommand {
        AddArrayPropertyItemCommand {
            entity,
            component_type,
            property,
            index: -1,
        }
    }
}

impl EditorCommand for AddArrayPropertyItemCommand {
    fn type_id(&self) -> &'static str {
        "add_array_property_item"
    }

    fn execute(&mut self, ctx: &mut EditContext<'_>) -> bool {
        self.index = ctx
            .project
            .add_array_item(self.entity, self.component_type, self.property, -1);
        self.index >= 0
    }

    fn undo(&mut self, ctx: &mut EditContext<'_>) {
        ctx.project
            .remove_array_item(self.entity, self.component_type, self.property, self.index);
    }

    fn serialize(&self) -> Value {
        to_payload(self)
    }

    fn deserialize(&mut self, payload: &Value, _ctx: &mut EditContext<'_>) -> Result<(), EditorError> {
        *self = serde_json::from_value(payload.clone())?;
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Remove an item from a reflected array property, keeping the full
/// item payload for undo.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoveArrayPropertyItemCommand {
    entity: GameObject,
    component_type: ComponentType,
    property: u32,
    index: i32,
    #[serde(skip)]
    old_values: Vec<u8>,
}

impl RemoveArrayPropertyItemCommand {
    /// Command removing item `index` of `property`.
    pub fn new(
        project: &Project,
        entity: GameObject,
        component_type: ComponentType,
        property: u32,
        index: i32,
    ) -> RemoveArrayPropertyItemCommand {
        let mut blob = BlobWriter::new();
        project.save_array_item(entity, component_type, property, index, &mut blob);
        RemoveArrayPropertyItemCommand {
            entity,
            component_type,
            property,
            index,
            old_values: blob.into_bytes(),
        }
    }
}

impl EditorCommand for RemoveArrayPropertyItemCommand {
    fn type_id(&self) -> &'static str {
        "remove_array_property_item"
    }

    fn execute(&mut self, ctx: &mut EditContext<'_>) -> bool {
        ctx.project
            .remove_array_item(self.entity, self.component_type, self.property, self.index)
    }

    fn undo(&mut self, ctx: &mut EditContext<'_>) {
        ctx.project
            .add_array_item(self.entity, self.component_type, self.property, self.index);
        let mut reader = BlobReader::new(&self.old_values);
        if let Err(error) = ctx.project.load_component_properties(
            self.entity,
            self.component_type,
            self.index,
            &mut reader,
        ) {
            tracing::error!("array item undo payload truncated: {error}");
        }
    }

    fn serialize(&self) -> Value {
        to_payload(self)
    }

    fn deserialize(&mut self, payload: &Value, ctx: &mut EditContext<'_>) -> Result<(), EditorError> {
        *self = serde_json::from_value(payload.clone())?;
        let mut blob = BlobWriter::new();
        ctx.project.save_array_item(
            self.entity,
            self.component_type,
            self.property,
            self.index,
            &mut blob,
        );
        self.old_values = blob.into_bytes();
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ---- paste / duplicate -----------------------------------------------------

/// Guid window bit marking a reference to an entity outside the
/// copied selection. Low 32 bits then carry the raw slot index.
const EXTERNAL_REF_BIT: u64 = 1 << 32;

/// Encode an entity reference for the copy buffer: selection members
/// become their index in the copied set, everything else keeps its
/// slot index tagged with [`EXTERNAL_REF_BIT`].
pub struct CopySaveMap<'a> {
    /// Entities being copied, in buffer order.
    pub entities: &'a [GameObject],
}

impl karst_project::SaveGuidMap for CopySaveMap<'_> {
    fn guid(&self, entity: GameObject) -> EntityGuid {
        if !entity.is_valid() {
            return EntityGuid::INVALID;
        }
        match self.entities.iter().position(|&e| e == entity) {
            Some(index) => EntityGuid(index as u64),
            None => EntityGuid(EXTERNAL_REF_BIT | entity.index() as u64),
        }
    }
}

struct PasteLoadMap<'a> {
    pasted: &'a [GameObject],
}

impl LoadGuidMap for PasteLoadMap<'_> {
    fn entity(&self, guid: EntityGuid) -> GameObject {
        if !guid.is_valid() {
            return GameObject::INVALID;
        }
        if guid.0 > 0xffff_ffff {
            return GameObject::from_raw((guid.0 & 0xffff_ffff) as i32);
        }
        self.pasted
            .get(guid.0 as usize)
            .copied()
            .unwrap_or(GameObject::INVALID)
    }
}

/// Instantiate a copied blob of entities at a point, rewiring
/// intra-selection references and preserving external ones. The
/// in-place mode (used by duplicate) keeps the source transforms.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PasteEntityCommand {
    position: Vec3,
    in_place: bool,
    data: Vec<u8>,
    #[serde(skip)]
    entities: Vec<GameObject>,
}

impl PasteEntityCommand {
    /// Command pasting `data` (a copy buffer) at `position`. With
    /// `in_place`, transforms are kept verbatim.
    pub fn new(position: Vec3, data: Vec<u8>, in_place: bool) -> PasteEntityCommand {
        PasteEntityCommand {
            position,
            in_place,
            data,
            entities: Vec::new(),
        }
    }

    /// The pasted entities, in buffer order.
    pub fn entities(&self) -> &[GameObject] {
        &self.entities
    }

    fn execute_impl(&mut self, ctx: &mut EditContext<'_>) -> Result<bool, EditorError> {
        let data = std::mem::take(&mut self.data);
        let mut reader = BlobReader::new(&data);
        let count = reader.read_u32()? as usize;

        let is_redo = !self.entities.is_empty();
        let mut pasted = Vec::with_capacity(count);
        for index in 0..count {
            if is_redo {
                ctx.project.emplace_entity(self.entities[index]);
                pasted.push(self.entities[index]);
            } else {
                pasted.push(ctx.project.create_entity(Vec3::ZERO, Quat::IDENTITY));
            }
        }

        let mut base: Option<Transform> = None;
        let map = PasteLoadMap { pasted: &pasted };
        let mut deserializer = WorldDeserializer::new(&mut reader, &map);
        let result = (|| -> Result<(), EditorError> {
            for index in 0..count {
                let transform = deserializer.read_transform()?;
                let parent = deserializer.read_entity()?;

                let placed = if self.in_place {
                    transform
                } else if index == 0 {
                    let at_cursor = Transform::new(self.position, transform.rotation, transform.scale);
                    base = Some(at_cursor * transform.inverted());
                    at_cursor
                } else {
                    base.expect("first record sets the base") * transform
                };

                let entity = pasted[index];
                ctx.guids.create(entity);
                ctx.project.set_transform(entity, &placed);
                if parent.is_valid() {
                    ctx.project.set_parent(parent, entity);
                }

                let component_count = deserializer.read_u32()?;
                for _ in 0..component_count {
                    let hash = deserializer.read_u32()?;
                    let Some(component_type) = ctx.project.component_type_from_hash(hash) else {
                        tracing::error!(hash, "copy buffer names an unregistered component type");
                        return Err(EditorError::InvalidOperation(
                            "unregistered component type in copy buffer".into(),
                        ));
                    };
                    let version = ctx
                        .project
                        .scene_version_of_type(component_type)
                        .expect("registered type has a scene");
                    ctx.project.create_component(component_type, entity);
                    ctx.project
                        .deserialize_component(&mut deserializer, entity, component_type, version)?;
                }
            }
            Ok(())
        })();
        self.data = data;

        if let Err(error) = result {
            // Roll the partial paste back so a failed command leaves
            // no trace.
            for &entity in pasted.iter().rev() {
                ctx.guids.erase(entity);
                if ctx.project.has_entity(entity) {
                    ctx.destroy_entity(entity);
                }
            }
            tracing::error!("paste failed: {error}");
            return Ok(false);
        }

        if !is_redo {
            self.entities = pasted;
        }
        Ok(true)
    }
}

impl EditorCommand for PasteEntityCommand {
    fn type_id(&self) -> &'static str {
        "paste_entity"
    }

    fn execute(&mut self, ctx: &mut EditContext<'_>) -> bool {
        match self.execute_impl(ctx) {
            Ok(applied) => applied,
            Err(error) => {
                tracing::error!("paste buffer truncated: {error}");
                false
            }
        }
    }

    fn undo(&mut self, ctx: &mut EditContext<'_>) {
        for &entity in &self.entities {
            ctx.guids.erase(entity);
            ctx.destroy_entity(entity);
        }
    }

    fn serialize(&self) -> Value {
        to_payload(self)
    }

    fn deserialize(&mut self, payload: &Value, _ctx: &mut EditContext<'_>) -> Result<(), EditorError> {
        *self = serde_json::from_value(payload.clone())?;
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Serialize `entities` into a copy buffer readable by
/// [`PasteEntityCommand`].
pub fn write_copy_buffer(project: &Project, entities: &[GameObject]) -> Vec<u8> {
    let mut blob = BlobWriter::new();
    let map = CopySaveMap { entities };
    blob.write_u32(entities.len() as u32);
    for &entity in entities {
        let mut serializer = WorldSerializer::new(&mut blob, &map);
        serializer.write_transform(&project.transform(entity));
        serializer.write_entity(project.parent(entity));

        let components: Vec<ComponentType> = project.components(entity).collect();
        serializer.write_u32(components.len() as u32);
        for component_type in components {
            let hash = project
                .component_type_entry(component_type)
                .expect("present component is registered")
                .name_hash;
            let mut serializer = WorldSerializer::new(&mut blob, &map);
            serializer.write_u32(hash);
            project.serialize_component(&mut serializer, component_type, entity);
        }
    }
    blob.into_bytes()
}
