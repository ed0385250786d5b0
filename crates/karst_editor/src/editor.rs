// SPDX-License-Identifier: MIT OR Apache-2.0
//! The world editor façade.
//!
//! Translates human-scale operations into commands and submits them
//! to the journal. Owns the project, the prefab system, the guid map,
//! the selection, the edit camera and the viewport state, and drives
//! project save/load in both snapshot forms.

use std::path::{Path, PathBuf};

use glam::{Quat, Vec2, Vec3};
use karst_project::events::DelegateList;
use karst_project::{
    name_hash, BlobReader, BlobWriter, ComponentType, EntityGuid, GameObject, Project,
    WorldDeserializer, WorldSerializer,
};

use crate::commands::{
    AddArrayPropertyItemCommand, AddComponentCommand, AddEntityCommand, DestroyComponentsCommand,
    DestroyEntitiesCommand, EditContext, EditorCommand, LocalMoveEntityCommand, MakeParentCommand,
    MoveEntityCommand, PasteEntityCommand, RemoveArrayPropertyItemCommand, ScaleEntityCommand,
    SetNameCommand, SetPropertyCommand, write_copy_buffer,
};
use crate::error::EditorError;
use crate::fs::AsyncFileSystem;
use crate::guid::EntityGuidMap;
use crate::journal::CommandJournal;
use crate::prefab::{
    prefab_path_hash, serialize_prefab, InstantiatePrefabCommand, PrefabSystem,
};
use crate::render::{RayHit, RenderInterface};
use crate::snapshot::{load_snapshot, save_snapshot};

const EDITOR_CAMERA_NAME: &str = "editor_camera";

/// Mouse buttons the viewport tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    /// Selection and tools.
    Left = 0,
    /// Camera pan.
    Middle = 1,
    /// Camera navigation.
    Right = 2,
}

/// Axis addressed by coordinate edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coordinate {
    /// World or local X.
    X,
    /// World or local Y.
    Y,
    /// World or local Z.
    Z,
}

impl Coordinate {
    fn write(self, target: &mut Vec3, value: f32) {
        match self {
            Coordinate::X => target.x = value,
            Coordinate::Y => target.y = value,
            Coordinate::Z => target.z = value,
        }
    }
}

/// Snap behavior for click placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SnapMode {
    /// No snapping.
    #[default]
    None,
    /// Snap to the hit point.
    Free,
    /// Snap to the nearest vertex of the hit mesh.
    Vertex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum MouseMode {
    #[default]
    None,
    Select,
    Navigate,
    Pan,
}

/// The ordered set of selected entities.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    entities: Vec<GameObject>,
}

impl Selection {
    /// An empty selection.
    pub fn new() -> Selection {
        Selection::default()
    }

    /// The selected entities in selection order.
    pub fn entities(&self) -> &[GameObject] {
        &self.entities
    }

    /// The first selected entity.
    pub fn first(&self) -> GameObject {
        self.entities.first().copied().unwrap_or(GameObject::INVALID)
    }

    /// Whether `entity` is selected.
    pub fn contains(&self, entity: GameObject) -> bool {
        self.entities.contains(&entity)
    }

    /// Whether nothing is selected.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Number of selected entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Replace the selection.
    pub fn set(&mut self, entities: &[GameObject]) {
        self.entities.clear();
        for &entity in entities {
            if !self.entities.contains(&entity) {
                self.entities.push(entity);
            }
        }
    }

    /// Toggle each entity in or out of the selection.
    pub fn toggle(&mut self, entities: &[GameObject]) {
        for &entity in entities {
            match self.entities.iter().position(|&e| e == entity) {
                Some(index) => {
                    self.entities.swap_remove(index);
                }
                None => self.entities.push(entity),
            }
        }
    }

    /// Remove one entity if present.
    pub fn remove(&mut self, entity: GameObject) {
        self.entities.retain(|&e| e != entity);
    }

    /// Clear the selection.
    pub fn clear(&mut self) {
        self.entities.clear();
    }
}

#[derive(Debug, Default)]
struct ViewportState {
    mouse_pos: Vec2,
    mouse_rel: Vec2,
    mouse_down: [bool; 3],
    mouse_click: [bool; 3],
    mouse_mode: MouseMode,
    rect_selection_start: Vec2,
    snap_mode: SnapMode,
    orbit: bool,
    orbit_delta: Vec2,
    toggle_selection: bool,
    mouse_sensitivity: Vec2,
}

/// Construction options for [`WorldEditor`].
pub struct WorldEditorOptions {
    /// Root directory holding `projects/`.
    pub base_path: PathBuf,
    /// Allocate guids from a counter instead of randomly, for
    /// reproducible tests (`-pseudorandom_guid`).
    pub pseudorandom_guid: bool,
    /// Component type to put on the editor camera, when the camera
    /// scene is registered.
    pub camera_component: Option<ComponentType>,
}

impl Default for WorldEditorOptions {
    fn default() -> WorldEditorOptions {
        WorldEditorOptions {
            base_path: PathBuf::from("."),
            pseudorandom_guid: false,
            camera_component: None,
        }
    }
}

/// The editor core: command submission over the project store.
pub struct WorldEditor {
    base_path: PathBuf,
    project: Project,
    journal: CommandJournal,
    prefabs: PrefabSystem,
    guids: EntityGuidMap,
    selection: Selection,
    copy_buffer: Vec<u8>,
    camera: GameObject,
    camera_component: Option<ComponentType>,
    render: Box<dyn RenderInterface>,
    fs: Box<dyn AsyncFileSystem>,
    scene_setup: Box<dyn FnMut(&mut Project)>,
    is_game_mode: bool,
    game_mode_snapshot: Vec<u8>,
    selected_before_game_mode: GameObject,
    is_project_changed: bool,
    viewport: ViewportState,

    /// Fired after a fresh project exists (new, load, play-mode
    /// exit).
    pub project_created: DelegateList<()>,
    /// Fired right before the current project is torn down.
    pub project_destroyed: DelegateList<()>,
    /// Fired when the selection set changes.
    pub selection_changed: DelegateList<Vec<GameObject>>,
}

impl WorldEditor {
    /// Build an editor over fresh state. `scene_setup` registers the
    /// scenes on every (re-)created project.
    pub fn new(
        options: WorldEditorOptions,
        scene_setup: impl FnMut(&mut Project) + 'static,
        render: Box<dyn RenderInterface>,
        fs: Box<dyn AsyncFileSystem>,
    ) -> WorldEditor {
        let mut editor = WorldEditor {
            base_path: options.base_path,
            project: Project::new(),
            journal: CommandJournal::new(),
            prefabs: PrefabSystem::new(),
            guids: EntityGuidMap::new(!options.pseudorandom_guid),
            selection: Selection::new(),
            copy_buffer: Vec::new(),
            camera: GameObject::INVALID,
            camera_component: options.camera_component,
            render,
            fs,
            scene_setup: Box::new(scene_setup),
            is_game_mode: false,
            game_mode_snapshot: Vec::new(),
            selected_before_game_mode: GameObject::INVALID,
            is_project_changed: false,
            viewport: ViewportState {
                mouse_sensitivity: Vec2::new(200.0, 200.0),
                ..ViewportState::default()
            },
            project_created: DelegateList::new(),
            project_destroyed: DelegateList::new(),
            selection_changed: DelegateList::new(),
        };
        editor.create_project();
        editor
    }

    // ---- accessors ---------------------------------------------------------

    /// The live project.
    pub fn project(&self) -> &Project {
        &self.project
    }

    /// The prefab system.
    pub fn prefab_system(&self) -> &PrefabSystem {
        &self.prefabs
    }

    /// The edit camera entity.
    pub fn camera(&self) -> GameObject {
        self.camera
    }

    /// Stable guid of an entity.
    pub fn entity_guid(&self, entity: GameObject) -> EntityGuid {
        self.guids.guid(entity)
    }

    /// Entity behind a stable guid.
    pub fn entity_by_guid(&self, guid: EntityGuid) -> GameObject {
        self.guids.entity(guid)
    }

    /// Whether unsaved edits exist.
    pub fn is_project_changed(&self) -> bool {
        self.is_project_changed
    }

    /// Whether play mode is active.
    pub fn is_game_mode(&self) -> bool {
        self.is_game_mode
    }

    /// Commands recorded in the journal, sentinels included.
    pub fn undo_stack_len(&self) -> usize {
        self.journal.len()
    }

    /// The selected entities in selection order.
    pub fn selected_entities(&self) -> &[GameObject] {
        self.selection.entities()
    }

    /// Whether an entity is selected.
    pub fn is_selected(&self, entity: GameObject) -> bool {
        self.selection.contains(entity)
    }

    // ---- command submission ------------------------------------------------

    fn submit(&mut self, command: Box<dyn EditorCommand>) -> Option<&mut dyn EditorCommand> {
        self.is_project_changed = true;
        let mut ctx = EditContext {
            project: &mut self.project,
            prefabs: &mut self.prefabs,
            guids: &mut self.guids,
            selection: &mut self.selection,
            fs: self.fs.as_ref(),
        };
        self.journal.execute(command, &mut ctx)
    }

    /// Open an atomic command group of `kind` (a name hash).
    pub fn begin_command_group(&mut self, kind: u32) {
        self.journal.begin_group(kind);
    }

    /// Close the current command group.
    pub fn end_command_group(&mut self) {
        self.journal.end_group();
    }

    /// Whether an undo step is available (never during play mode).
    pub fn can_undo(&self) -> bool {
        !self.is_game_mode && self.journal.can_undo()
    }

    /// Whether a redo step is available (never during play mode).
    pub fn can_redo(&self) -> bool {
        !self.is_game_mode && self.journal.can_redo()
    }

    /// Undo one command or one whole group.
    pub fn undo(&mut self) {
        if self.is_game_mode {
            return;
        }
        let mut ctx = EditContext {
            project: &mut self.project,
            prefabs: &mut self.prefabs,
            guids: &mut self.guids,
            selection: &mut self.selection,
            fs: self.fs.as_ref(),
        };
        self.journal.undo(&mut ctx);
    }

    /// Redo one command or one whole group.
    pub fn redo(&mut self) {
        if self.is_game_mode {
            return;
        }
        let mut ctx = EditContext {
            project: &mut self.project,
            prefabs: &mut self.prefabs,
            guids: &mut self.guids,
            selection: &mut self.selection,
            fs: self.fs.as_ref(),
        };
        self.journal.redo(&mut ctx);
    }

    // ---- entity operations -------------------------------------------------

    /// Create an entity at an explicit world position.
    pub fn add_entity_at_position(&mut self, position: Vec3) -> GameObject {
        self.submit(Box::new(AddEntityCommand::new(position)))
            .and_then(|command| command.as_any_mut().downcast_mut::<AddEntityCommand>())
            .map_or(GameObject::INVALID, |command| command.entity())
    }

    /// Create an entity under the viewport center.
    pub fn add_entity(&mut self) -> GameObject {
        let size = self
            .render
            .camera_screen_size(&self.project, self.camera);
        self.add_entity_at(size * 0.5)
    }

    /// Create an entity under a viewport position: at the clicked
    /// surface when the pick ray hits, slightly in front of the
    /// camera otherwise.
    pub fn add_entity_at(&mut self, screen: Vec2) -> GameObject {
        let (origin, direction) = self.render.screen_ray(&self.project, self.camera, screen);
        let hit = self
            .render
            .raycast_meshes(&self.project, origin, direction, GameObject::INVALID);
        let position = if hit.is_hit {
            origin + direction * hit.t
        } else {
            self.project.position(self.camera)
                + self.project.rotation(self.camera) * Vec3::new(0.0, 0.0, -2.0)
        };
        self.add_entity_at_position(position)
    }

    /// Destroy entities and their descendants. Refuses to destroy the
    /// editor camera.
    pub fn destroy_entities(&mut self, entities: &[GameObject]) -> Result<(), EditorError> {
        if entities.contains(&self.camera) {
            tracing::warn!("cannot destroy the editor camera");
            return Err(EditorError::InvalidOperation(
                "cannot destroy the editor camera".into(),
            ));
        }
        let command = DestroyEntitiesCommand::new(&self.project, entities);
        self.submit(Box::new(command));
        Ok(())
    }

    /// Add a component to entities, following prefab instance lists.
    /// Returns whether the command was recorded.
    pub fn add_component(&mut self, entities: &[GameObject], component_type: ComponentType) -> bool {
        let command =
            AddComponentCommand::new(&self.project, &self.prefabs, entities, component_type);
        self.submit(Box::new(command)).is_some()
    }

    /// Remove a component from entities, following prefab instance
    /// lists. Refuses to strip the camera component off the editor
    /// camera.
    pub fn destroy_components(
        &mut self,
        entities: &[GameObject],
        component_type: ComponentType,
    ) -> Result<(), EditorError> {
        if entities.contains(&self.camera) && Some(component_type) == self.camera_component {
            tracing::error!("cannot destroy the editing camera's camera component");
            return Err(EditorError::InvalidOperation(
                "cannot destroy the editing camera's camera component".into(),
            ));
        }
        let command =
            DestroyComponentsCommand::new(&self.project, &self.prefabs, entities, component_type);
        self.submit(Box::new(command));
        Ok(())
    }

    // ---- transform operations ----------------------------------------------

    /// Move entities to world positions, keeping their rotations.
    pub fn set_entities_positions(&mut self, entities: &[GameObject], positions: &[Vec3]) {
        if entities.is_empty() {
            return;
        }
        let rotations: Vec<Quat> = entities
            .iter()
            .map(|&entity| self.project.rotation(entity))
            .collect();
        let command =
            MoveEntityCommand::new(&self.project, &self.prefabs, entities, positions, &rotations);
        self.submit(Box::new(command));
    }

    /// Rotate entities, keeping their positions.
    pub fn set_entities_rotations(&mut self, entities: &[GameObject], rotations: &[Quat]) {
        if entities.is_empty() {
            return;
        }
        let positions: Vec<Vec3> = entities
            .iter()
            .map(|&entity| self.project.position(entity))
            .collect();
        let command =
            MoveEntityCommand::new(&self.project, &self.prefabs, entities, &positions, rotations);
        self.submit(Box::new(command));
    }

    /// Move and rotate entities in one command.
    pub fn set_entities_positions_and_rotations(
        &mut self,
        entities: &[GameObject],
        positions: &[Vec3],
        rotations: &[Quat],
    ) {
        if entities.is_empty() {
            return;
        }
        let command =
            MoveEntityCommand::new(&self.project, &self.prefabs, entities, positions, rotations);
        self.submit(Box::new(command));
    }

    /// Set one world-space coordinate on every entity.
    pub fn set_entities_coordinate(
        &mut self,
        entities: &[GameObject],
        value: f32,
        coordinate: Coordinate,
    ) {
        if entities.is_empty() {
            return;
        }
        let rotations: Vec<Quat> = entities
            .iter()
            .map(|&entity| self.project.rotation(entity))
            .collect();
        let positions: Vec<Vec3> = entities
            .iter()
            .map(|&entity| {
                let mut position = self.project.position(entity);
                coordinate.write(&mut position, value);
                position
            })
            .collect();
        let command =
            MoveEntityCommand::new(&self.project, &self.prefabs, entities, &positions, &rotations);
        self.submit(Box::new(command));
    }

    /// Set one local-space coordinate on every entity.
    pub fn set_entities_local_coordinate(
        &mut self,
        entities: &[GameObject],
        value: f32,
        coordinate: Coordinate,
    ) {
        if entities.is_empty() {
            return;
        }
        let positions: Vec<Vec3> = entities
            .iter()
            .map(|&entity| {
                let mut position = self.project.local_transform(entity).position;
                coordinate.write(&mut position, value);
                position
            })
            .collect();
        let command =
            LocalMoveEntityCommand::new(&self.project, &self.prefabs, entities, &positions);
        self.submit(Box::new(command));
    }

    /// Apply one uniform scale to every entity.
    pub fn set_entities_scales_uniform(&mut self, entities: &[GameObject], scale: f32) {
        if entities.is_empty() {
            return;
        }
        let command = ScaleEntityCommand::new_uniform(&self.project, entities, scale);
        self.submit(Box::new(command));
    }

    /// Apply a scale per entity.
    pub fn set_entities_scales(&mut self, entities: &[GameObject], scales: &[f32]) {
        if entities.is_empty() {
            return;
        }
        let command = ScaleEntityCommand::new_each(&self.project, entities, scales);
        self.submit(Box::new(command));
    }

    // ---- names, hierarchy, properties --------------------------------------

    /// Rename an entity.
    pub fn set_entity_name(&mut self, entity: GameObject, name: &str) {
        if !entity.is_valid() {
            return;
        }
        let command = SetNameCommand::new(&self.project, entity, name);
        self.submit(Box::new(command));
    }

    /// Reparent a child (`INVALID` parent detaches). A cycle is
    /// rejected by the store and leaves no journal entry.
    pub fn make_parent(&mut self, parent: GameObject, child: GameObject) {
        let command = MakeParentCommand::new(parent, child);
        self.submit(Box::new(command));
    }

    /// Write a reflected property (bincode-encoded `value`) on
    /// entities, following prefab instance lists.
    pub fn set_property(
        &mut self,
        entities: &[GameObject],
        component_type: ComponentType,
        property: u32,
        index: i32,
        value: Vec<u8>,
    ) {
        let command = SetPropertyCommand::new(
            &self.project,
            &self.prefabs,
            entities,
            component_type,
            property,
            index,
            value,
        );
        self.submit(Box::new(command));
    }

    /// Append an item to a reflected array property.
    pub fn add_array_property_item(
        &mut self,
        entity: GameObject,
        component_type: ComponentType,
        property: u32,
    ) {
        let command = AddArrayPropertyItemCommand::new(entity, component_type, property);
        self.submit(Box::new(command));
    }

    /// Remove an item from a reflected array property.
    pub fn remove_array_property_item(
        &mut self,
        entity: GameObject,
        component_type: ComponentType,
        property: u32,
        index: i32,
    ) {
        let command = RemoveArrayPropertyItemCommand::new(
            &self.project,
            entity,
            component_type,
            property,
            index,
        );
        self.submit(Box::new(command));
    }

    // ---- selection ---------------------------------------------------------

    /// Replace or toggle the selection and fire `selection_changed`.
    pub fn select_entities(&mut self, entities: &[GameObject], toggle: bool) {
        if toggle && self.viewport.toggle_selection {
            self.selection.toggle(entities);
        } else {
            self.selection.set(entities);
        }
        let current = self.selection.entities().to_vec();
        self.selection_changed.invoke(&current);
    }

    /// Make clicks toggle entities in and out of the selection.
    pub fn set_toggle_selection(&mut self, toggle: bool) {
        self.viewport.toggle_selection = toggle;
    }

    // ---- copy / paste ------------------------------------------------------

    /// Serialize the selection (plus descendants) into the copy
    /// buffer.
    pub fn copy_entities(&mut self) {
        if self.selection.is_empty() {
            return;
        }
        let mut entities: Vec<GameObject> = self.selection.entities().to_vec();
        let mut index = 0;
        while index < entities.len() {
            let mut child = self.project.first_child(entities[index]);
            while child.is_valid() {
                if !entities.contains(&child) {
                    entities.push(child);
                }
                child = self.project.next_sibling(child);
            }
            index += 1;
        }
        self.copy_buffer = write_copy_buffer(&self.project, &entities);
    }

    /// Whether a paste is possible.
    pub fn can_paste_entities(&self) -> bool {
        !self.copy_buffer.is_empty()
    }

    /// Paste the copy buffer at the camera's raycast hit. Returns the
    /// pasted entities.
    pub fn paste_entities(&mut self) -> Vec<GameObject> {
        let position = self.camera_raycast_hit();
        self.paste_entities_at(position, false)
    }

    /// Copy and immediately paste the selection in place.
    pub fn duplicate_entities(&mut self) -> Vec<GameObject> {
        self.copy_entities();
        self.paste_entities_at(Vec3::ZERO, true)
    }

    fn paste_entities_at(&mut self, position: Vec3, in_place: bool) -> Vec<GameObject> {
        let command = PasteEntityCommand::new(position, self.copy_buffer.clone(), in_place);
        self.submit(Box::new(command))
            .and_then(|command| command.as_any_mut().downcast_mut::<PasteEntityCommand>())
            .map_or(Vec::new(), |command| command.entities().to_vec())
    }

    // ---- prefabs -----------------------------------------------------------

    /// Instantiate a prefab through an undoable command.
    ///
    /// The returned root may be `INVALID` when the resource was not
    /// ready at execute time; callers must check validity.
    pub fn instantiate_prefab(
        &mut self,
        path: &Path,
        position: Vec3,
        rotation: Quat,
        scale: f32,
    ) -> GameObject {
        let command = InstantiatePrefabCommand::new(path.to_path_buf(), position, rotation, scale);
        self.submit(Box::new(command))
            .and_then(|command| {
                command
                    .as_any_mut()
                    .downcast_mut::<InstantiatePrefabCommand>()
            })
            .map_or(GameObject::INVALID, |command| command.root())
    }

    /// Save the single selected entity's subtree as a prefab file.
    ///
    /// When the source was not itself a prefab instance, it is
    /// destroyed and replaced by an instantiation of the new prefab
    /// inside one command group, so the whole swap is a single undo
    /// step. Nothing is destroyed unless the file write succeeded.
    pub fn save_prefab(&mut self, path: &Path) -> Result<(), EditorError> {
        if self.selection.len() != 1 {
            return Err(EditorError::InvalidOperation(
                "save_prefab needs exactly one selected entity".into(),
            ));
        }
        let mut entity = self.selection.first();
        let prefab = self.prefabs.get_prefab(entity);
        if prefab != 0 {
            entity = self.prefab_root(entity);
        }

        let path_hash = prefab_path_hash(path);
        let blob = serialize_prefab(&self.project, entity, path_hash);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, &blob)?;
        self.prefabs.evict_resource(path_hash);

        if prefab == 0 {
            self.begin_command_group(name_hash("save_prefab"));
            let transform = self.project.transform(entity);
            self.destroy_entities(&[entity])?;
            self.fs.await_idle();
            self.instantiate_prefab(path, transform.position, transform.rotation, transform.scale);
            self.end_command_group();
        }
        Ok(())
    }

    /// Walk up while parents stay inside the same prefab family.
    fn prefab_root(&self, entity: GameObject) -> GameObject {
        let mut root = entity;
        let mut parent = self.project.parent(root);
        while parent.is_valid() && self.prefabs.get_prefab(parent) != 0 {
            root = parent;
            parent = self.project.parent(root);
        }
        root
    }

    // ---- play mode ---------------------------------------------------------

    /// Enter or leave play mode. Entering snapshots the project into
    /// an in-memory scratch blob and snaps the journal cursor;
    /// leaving discards every command issued while playing, restores
    /// the project from the scratch blob, and restores selection and
    /// camera.
    pub fn toggle_game_mode(&mut self) {
        if self.is_game_mode {
            self.stop_game_mode(true);
            return;
        }
        self.selected_before_game_mode = self.selection.first();
        self.game_mode_snapshot = save_snapshot(&self.project, &self.prefabs);
        self.is_game_mode = true;
        self.journal.snap_cursor();
        self.journal.start_counting(2);
        tracing::info!("entered game mode");
    }

    fn stop_game_mode(&mut self, reload: bool) {
        self.journal.discard_counted();
        self.is_game_mode = false;
        self.select_entities(&[], false);

        if reload {
            let name = self.project.name().to_owned();
            self.project_destroyed.invoke(&());
            self.project = Project::new();
            (self.scene_setup)(&mut self.project);
            self.prefabs.clear();
            self.project_created.invoke(&());
            self.project.set_name(&name);
            self.camera = GameObject::INVALID;

            let snapshot = std::mem::take(&mut self.game_mode_snapshot);
            if let Err(error) =
                load_snapshot(&snapshot, &mut self.project, &mut self.prefabs, self.fs.as_ref())
            {
                tracing::error!("game mode scratch restore failed: {error}");
            }
            // Guids survive untouched: the scratch blob restores the
            // exact slot layout they point at.
            self.camera = self.project.find_by_name(GameObject::INVALID, EDITOR_CAMERA_NAME);
        }
        self.game_mode_snapshot = Vec::new();
        if self.selected_before_game_mode.is_valid() {
            let selected = self.selected_before_game_mode;
            self.select_entities(&[selected], false);
        }
        tracing::info!("left game mode");
    }

    // ---- project lifecycle -------------------------------------------------

    fn create_project(&mut self) {
        self.is_project_changed = false;
        self.journal.clear();
        self.project = Project::new();
        (self.scene_setup)(&mut self.project);
        self.prefabs.clear();
        self.guids.clear();
        self.selection.clear();
        self.viewport.orbit = false;
        self.project_created.invoke(&());

        self.camera = self.project.create_entity(
            Vec3::new(0.0, 0.0, -5.0),
            Quat::from_rotation_y(-std::f32::consts::PI),
        );
        self.guids.create(self.camera);
        self.project.set_entity_name(self.camera, EDITOR_CAMERA_NAME);
        if let Some(component_type) = self.camera_component {
            self.project.create_component(component_type, self.camera);
        }
    }

    fn destroy_project(&mut self) {
        if self.is_game_mode {
            self.stop_game_mode(false);
        }
        self.journal.clear();
        self.project_destroyed.invoke(&());
        self.selection.clear();
        self.camera = GameObject::INVALID;
    }

    /// Replace the current project with an empty one.
    pub fn new_project(&mut self) {
        self.destroy_project();
        self.create_project();
        tracing::info!("project created");
    }

    /// Save the project as both a blob file and a directory snapshot
    /// under `projects/<basename>/`. With `set_name`, the project
    /// takes the basename as its name.
    pub fn save_project(&mut self, basename: &str, set_name: bool) -> Result<(), EditorError> {
        tracing::info!(basename, "saving project");
        self.fs.await_idle();

        let projects_dir = self.base_path.join("projects");
        std::fs::create_dir_all(&projects_dir)?;
        let blob = save_snapshot(&self.project, &self.prefabs);
        std::fs::write(projects_dir.join(format!("{basename}.kproject")), blob)?;

        self.serialize_project_dir(basename)?;
        self.is_project_changed = false;
        if set_name {
            self.project.set_name(basename);
        }
        Ok(())
    }

    /// Load the directory snapshot under `projects/<basename>/`. Any
    /// failure logs, falls back to a fresh empty project, and returns
    /// `false`.
    pub fn load_project(&mut self, basename: &str) -> bool {
        if self.is_game_mode {
            self.stop_game_mode(false);
        }
        self.destroy_project();
        self.create_project();
        self.project.set_name(basename);
        tracing::info!(basename, "loading project");

        if self.camera.is_valid() {
            self.guids.erase(self.camera);
            self.project.destroy_entity(self.camera);
        }

        let dir = self.base_path.join("projects").join(basename);
        let result = deserialize_project_dir(
            &dir,
            &mut self.project,
            &mut self.prefabs,
            &mut self.guids,
            self.fs.as_ref(),
        );
        if let Err(error) = result {
            tracing::error!(basename, "project load failed: {error}");
            self.new_project();
            return false;
        }
        self.camera = self.project.find_by_name(GameObject::INVALID, EDITOR_CAMERA_NAME);
        self.is_project_changed = false;
        true
    }

    fn serialize_project_dir(&self, basename: &str) -> Result<(), EditorError> {
        let dir = self.base_path.join("projects").join(basename);
        std::fs::create_dir_all(dir.join("probes"))?;
        std::fs::create_dir_all(dir.join("scenes"))?;
        std::fs::create_dir_all(dir.join("systems"))?;

        for index in 0..self.project.scene_count() {
            let scene = self.project.scene(karst_project::SceneId(index));
            let mut blob = BlobWriter::new();
            let mut serializer = WorldSerializer::new(&mut blob, &self.guids);
            serializer.write_u32(scene.version());
            scene.serialize(&mut serializer);
            std::fs::write(
                dir.join("scenes").join(format!("{}.scn", scene.name())),
                blob.as_slice(),
            )?;
        }

        let mut blob = BlobWriter::new();
        let mut serializer = WorldSerializer::new(&mut blob, &self.guids);
        self.prefabs.serialize_world(&mut serializer, &self.project);
        std::fs::write(dir.join("systems").join("templates.sys"), blob.as_slice())?;

        let mut entity = self.project.first_entity();
        while entity.is_valid() {
            if self.prefabs.get_prefab(entity) != 0 {
                entity = self.project.next_entity(entity);
                continue;
            }
            let mut blob = BlobWriter::new();
            let mut serializer = WorldSerializer::new(&mut blob, &self.guids);
            serializer.write_str(self.project.entity_name(entity));
            serializer.write_rigid_transform(&self.project.transform(entity).rigid());
            serializer.write_f32(self.project.scale(entity));
            serializer.write_entity(self.project.parent(entity));
            for component_type in self.project.components(entity) {
                let entry = self
                    .project
                    .component_type_entry(component_type)
                    .expect("present component is registered");
                let version = self
                    .project
                    .scene_version_of_type(component_type)
                    .expect("registered type has a scene");
                let mut serializer = WorldSerializer::new(&mut blob, &self.guids);
                serializer.write_u32(entry.name_hash);
                serializer.write_u32(version);
                self.project
                    .serialize_component(&mut serializer, component_type, entity);
            }
            let mut serializer = WorldSerializer::new(&mut blob, &self.guids);
            serializer.write_u32(0);

            let guid = self.guids.guid(entity);
            std::fs::write(dir.join(format!("{guid}.ent")), blob.as_slice())?;
            entity = self.project.next_entity(entity);
        }

        self.clear_project_dir(&dir)?;
        Ok(())
    }

    /// Garbage-collect entity files whose guid no longer exists.
    fn clear_project_dir(&self, dir: &Path) -> Result<(), EditorError> {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().map_or(true, |extension| extension != "ent") {
                continue;
            }
            let guid = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| stem.parse::<u64>().ok());
            let stale = match guid {
                Some(value) => !self.guids.has(EntityGuid(value)),
                None => true,
            };
            if stale {
                tracing::info!(path = %path.display(), "removing stale entity file");
                std::fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    // ---- command log replay ------------------------------------------------

    /// Write the journal as a textual command log.
    pub fn save_undo_stack(&self, path: &Path) -> Result<(), EditorError> {
        self.journal.save(path)
    }

    /// Replace the journal with a command log and execute it through
    /// the regular submission path. Returns `false` on any error.
    pub fn execute_undo_stack(&mut self, path: &Path) -> bool {
        let mut ctx = EditContext {
            project: &mut self.project,
            prefabs: &mut self.prefabs,
            guids: &mut self.guids,
            selection: &mut self.selection,
            fs: self.fs.as_ref(),
        };
        let result = self.journal.replay(path, &mut ctx);
        match result {
            Ok(()) => true,
            Err(error) => {
                tracing::error!(path = %path.display(), "undo stack replay failed: {error}");
                false
            }
        }
    }

    /// Regression harness: replay `dir/<name>.json` into a fresh
    /// project and compare the result against the reference directory
    /// snapshot at `dir/<name>/`. Returns whether they match.
    pub fn run_test(&mut self, dir: &Path, name: &str) -> bool {
        self.fs.await_idle();
        self.new_project();
        if !self.execute_undo_stack(&dir.join(format!("{name}.json"))) {
            return false;
        }

        let mut reference = Project::new();
        (self.scene_setup)(&mut reference);
        let mut reference_prefabs = PrefabSystem::new();
        let mut reference_guids = EntityGuidMap::new(false);
        if let Err(error) = deserialize_project_dir(
            &dir.join(name),
            &mut reference,
            &mut reference_prefabs,
            &mut reference_guids,
            self.fs.as_ref(),
        ) {
            tracing::error!(name, "reference project failed to load: {error}");
            return false;
        }

        if reference.entity_count() != self.project.entity_count() {
            tracing::error!(
                expected = reference.entity_count(),
                got = self.project.entity_count(),
                "entity count mismatch"
            );
            return false;
        }

        let mut entity = reference.first_entity();
        while entity.is_valid() {
            let guid = reference_guids.guid(entity);
            let mine = self.guids.entity(guid);
            if !mine.is_valid() {
                tracing::error!(%guid, "entity missing after replay");
                return false;
            }
            if reference.component_mask(entity) != self.project.component_mask(mine) {
                tracing::error!(%guid, "component mask mismatch");
                return false;
            }
            for component_type in reference.components(entity) {
                let mut expected = BlobWriter::new();
                reference.save_component_properties(entity, component_type, &mut expected);
                let mut got = BlobWriter::new();
                self.project
                    .save_component_properties(mine, component_type, &mut got);
                if expected.as_slice() != got.as_slice() {
                    tracing::error!(%guid, %component_type, "property payload mismatch");
                    return false;
                }
            }
            entity = reference.next_entity(entity);
        }
        true
    }

    // ---- viewport ----------------------------------------------------------

    /// Reset per-frame input state.
    pub fn input_frame(&mut self) {
        self.viewport.mouse_rel = Vec2::ZERO;
        self.viewport.mouse_click = [false; 3];
    }

    /// Whether a button is held.
    pub fn is_mouse_down(&self, button: MouseButton) -> bool {
        self.viewport.mouse_down[button as usize]
    }

    /// Whether a button was clicked this frame.
    pub fn is_mouse_click(&self, button: MouseButton) -> bool {
        self.viewport.mouse_click[button as usize]
    }

    /// Current mouse position in viewport pixels.
    pub fn mouse_pos(&self) -> Vec2 {
        self.viewport.mouse_pos
    }

    /// Mouse movement since the last frame.
    pub fn mouse_rel(&self) -> Vec2 {
        self.viewport.mouse_rel
    }

    /// Configure click snapping.
    pub fn set_snap_mode(&mut self, enable: bool, vertex_snap: bool) {
        self.viewport.snap_mode = if !enable {
            SnapMode::None
        } else if vertex_snap {
            SnapMode::Vertex
        } else {
            SnapMode::Free
        };
    }

    /// Whether the camera orbits the selection.
    pub fn is_orbit_camera(&self) -> bool {
        self.viewport.orbit
    }

    /// Toggle camera orbiting.
    pub fn set_orbit_camera(&mut self, enable: bool) {
        self.viewport.orbit_delta = Vec2::ZERO;
        self.viewport.orbit = enable;
    }

    /// Mouse sensitivity for camera navigation.
    pub fn mouse_sensitivity(&self) -> Vec2 {
        self.viewport.mouse_sensitivity
    }

    /// Adjust mouse sensitivity.
    pub fn set_mouse_sensitivity(&mut self, x: f32, y: f32) {
        self.viewport.mouse_sensitivity = Vec2::new(10000.0 / x, 10000.0 / y);
    }

    /// Fly the edit camera.
    pub fn navigate(&mut self, forward: f32, right: f32, up: f32, speed: f32) {
        let mut position = self.project.position(self.camera);
        let rotation = self.project.rotation(self.camera);
        let right = if self.viewport.orbit { 0.0 } else { right };

        position += rotation * Vec3::new(0.0, 0.0, -1.0) * forward * speed;
        position += rotation * Vec3::new(1.0, 0.0, 0.0) * right * speed;
        position += rotation * Vec3::new(0.0, 1.0, 0.0) * up * speed;
        self.project.set_position(self.camera, position);
    }

    /// Mouse press entry point.
    pub fn on_mouse_down(&mut self, x: f32, y: f32, button: MouseButton) {
        self.viewport.mouse_click[button as usize] = true;
        self.viewport.mouse_down[button as usize] = true;
        match button {
            MouseButton::Middle => self.viewport.mouse_mode = MouseMode::Pan,
            MouseButton::Right => self.viewport.mouse_mode = MouseMode::Navigate,
            MouseButton::Left => {
                self.viewport.mouse_mode = MouseMode::Select;
                self.viewport.rect_selection_start = Vec2::new(x, y);
            }
        }
    }

    /// Mouse move entry point.
    pub fn on_mouse_move(&mut self, x: f32, y: f32, rel_x: f32, rel_y: f32) {
        self.viewport.mouse_pos = Vec2::new(x, y);
        self.viewport.mouse_rel = Vec2::new(rel_x, rel_y);

        const MOUSE_MULTIPLIER: f32 = 1.0 / 200.0;
        match self.viewport.mouse_mode {
            MouseMode::Navigate => self.rotate_camera(rel_x, rel_y),
            MouseMode::Pan => self.pan_camera(rel_x * MOUSE_MULTIPLIER, rel_y * MOUSE_MULTIPLIER),
            MouseMode::None | MouseMode::Select => {}
        }
    }

    /// Mouse release entry point: resolves picking or rectangle
    /// selection.
    pub fn on_mouse_up(&mut self, x: f32, y: f32, button: MouseButton) {
        self.viewport.mouse_pos = Vec2::new(x, y);
        if self.viewport.mouse_mode == MouseMode::Select && button == MouseButton::Left {
            if self.viewport.rect_selection_start != self.viewport.mouse_pos {
                self.rect_select();
            } else {
                self.click_select();
            }
        }
        self.viewport.mouse_down[button as usize] = false;
        self.viewport.mouse_mode = MouseMode::None;
    }

    fn rect_select(&mut self) {
        let mut min = self.viewport.rect_selection_start;
        let mut max = self.viewport.mouse_pos;
        if min.x > max.x {
            std::mem::swap(&mut min.x, &mut max.x);
        }
        if min.y > max.y {
            std::mem::swap(&mut min.y, &mut max.y);
        }
        let entities = self
            .render
            .frustum_select(&self.project, self.camera, min, max);
        self.select_entities(&entities, false);
    }

    fn click_select(&mut self) {
        let (origin, direction) =
            self.render
                .screen_ray(&self.project, self.camera, self.viewport.mouse_pos);
        let hit = self.pick_nearest(origin, direction);

        if self.viewport.snap_mode != SnapMode::None && !self.selection.is_empty() && hit.is_hit {
            let snap_position = origin + direction * hit.t;
            let selected: Vec<GameObject> = self.selection.entities().to_vec();
            let positions = vec![snap_position; selected.len()];
            self.set_entities_positions(&selected, &positions);
        } else if hit.is_hit && hit.entity.is_valid() {
            let entity = hit.entity;
            self.select_entities(&[entity], true);
        }
    }

    /// Nearest hit across the three picking sources: editor icons,
    /// renderable meshes, terrain.
    fn pick_nearest(&self, origin: Vec3, direction: Vec3) -> RayHit {
        let mut nearest = self
            .render
            .raycast_icons(&self.project, origin, direction);
        let meshes =
            self.render
                .raycast_meshes(&self.project, origin, direction, GameObject::INVALID);
        if meshes.is_hit && (!nearest.is_hit || meshes.t < nearest.t) {
            nearest = meshes;
        }
        let terrain = self.render.raycast_terrain(&self.project, origin, direction);
        if terrain.is_hit && (!nearest.is_hit || terrain.t < nearest.t) {
            nearest = terrain;
        }
        nearest
    }

    /// The point under the viewport center, or a point slightly in
    /// front of the camera when nothing is hit.
    pub fn camera_raycast_hit(&self) -> Vec3 {
        let screen = self
            .render
            .camera_screen_size(&self.project, self.camera)
            * 0.5;
        let (origin, direction) = self.render.screen_ray(&self.project, self.camera, screen);
        let hit = self
            .render
            .raycast_meshes(&self.project, origin, direction, GameObject::INVALID);
        if hit.is_hit {
            origin + direction * hit.t
        } else {
            self.project.position(self.camera)
                + self.project.rotation(self.camera) * Vec3::new(0.0, 0.0, -2.0)
        }
    }

    fn rotate_camera(&mut self, x: f32, y: f32) {
        let project = &mut self.project;
        let mut position = project.position(self.camera);
        let mut rotation = project.rotation(self.camera);
        let old_rotation = rotation;

        let yaw = -x.signum() * (x / self.viewport.mouse_sensitivity.x).abs().powf(1.2);
        rotation = (Quat::from_rotation_y(yaw) * rotation).normalize();
        let pitch_axis = rotation * Vec3::X;
        let pitch = -y.signum() * (y / self.viewport.mouse_sensitivity.y).abs().powf(1.2);
        rotation = (Quat::from_axis_angle(pitch_axis, pitch) * rotation).normalize();

        if self.viewport.orbit && !self.selection.is_empty() {
            let pivot = project.position(self.selection.first());
            let mut nondelta = position;
            nondelta -= old_rotation * Vec3::new(0.0, -1.0, 0.0) * self.viewport.orbit_delta.y;
            nondelta -= old_rotation * Vec3::new(1.0, 0.0, 0.0) * self.viewport.orbit_delta.x;
            let distance = (pivot - nondelta).length();
            position = pivot + rotation * Vec3::Z * distance;
            position += rotation * Vec3::X * self.viewport.orbit_delta.x;
            position += rotation * Vec3::new(0.0, -1.0, 0.0) * self.viewport.orbit_delta.y;
        }

        project.set_rotation(self.camera, rotation);
        project.set_position(self.camera, position);
    }

    fn pan_camera(&mut self, x: f32, y: f32) {
        if self.viewport.orbit {
            self.viewport.orbit_delta += Vec2::new(x, y);
        }
        let rotation = self.project.rotation(self.camera);
        let mut position = self.project.position(self.camera);
        position += rotation * Vec3::new(x, 0.0, 0.0);
        position += rotation * Vec3::new(0.0, -y, 0.0);
        self.project.set_position(self.camera, position);
    }
}

/// Load a directory snapshot into `project`, rebuilding the guid map
/// and the prefab tables.
fn deserialize_project_dir(
    dir: &Path,
    project: &mut Project,
    prefabs: &mut PrefabSystem,
    guids: &mut EntityGuidMap,
    fs: &dyn AsyncFileSystem,
) -> Result<(), EditorError> {
    guids.clear();

    // Scene-global payloads first.
    let scenes_dir = dir.join("scenes");
    if scenes_dir.is_dir() {
        let mut scene_files: Vec<PathBuf> = std::fs::read_dir(&scenes_dir)?
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| path.extension().is_some_and(|extension| extension == "scn"))
            .collect();
        scene_files.sort();
        for path in scene_files {
            let stem = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .unwrap_or_default()
                .to_owned();
            let Some(scene_id) = project.scene_by_name_hash(name_hash(&stem)) else {
                tracing::error!(scene = stem, "scene file for an unregistered scene");
                return Err(EditorError::UnknownScene(stem));
            };
            let bytes = std::fs::read(&path)?;
            let mut reader = BlobReader::new(&bytes);
            let mut deserializer = WorldDeserializer::new(&mut reader, guids);
            let version = deserializer.read_u32()?;
            project
                .scene_mut(scene_id)
                .deserialize(&mut deserializer, version)?;
        }
    }

    // Entity files: first claim slots so references resolve, then
    // read contents.
    let mut entity_files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| path.extension().is_some_and(|extension| extension == "ent"))
        .collect();
    entity_files.sort();
    for path in &entity_files {
        let guid = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(|stem| stem.parse::<u64>().ok());
        let Some(guid) = guid else {
            tracing::error!(path = %path.display(), "entity file without a guid name");
            return Err(EditorError::CorruptFile);
        };
        let entity = project.create_entity(Vec3::ZERO, Quat::IDENTITY);
        guids.insert(EntityGuid(guid), entity);
    }

    for path in &entity_files {
        let guid = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(|stem| stem.parse::<u64>().ok())
            .expect("validated in the first pass");
        let entity = guids.entity(EntityGuid(guid));
        let bytes = std::fs::read(path)?;
        let mut reader = BlobReader::new(&bytes);
        let mut deserializer = WorldDeserializer::new(&mut reader, guids);

        let name = deserializer.read_string()?;
        let rigid = deserializer.read_rigid_transform()?;
        let scale = deserializer.read_f32()?;
        let parent = deserializer.read_entity()?;
        if parent.is_valid() {
            project.set_parent(parent, entity);
        }
        if !name.is_empty() {
            project.set_entity_name(entity, &name);
        }
        project.set_transform_keep_children(entity, &rigid.with_scale(scale));

        loop {
            let type_hash = deserializer.read_u32()?;
            if type_hash == 0 {
                break;
            }
            let scene_version = deserializer.read_u32()?;
            let Some(component_type) = project.component_type_from_hash(type_hash) else {
                tracing::error!(type_hash, "entity file names an unregistered component type");
                return Err(EditorError::CorruptFile);
            };
            project.create_component(component_type, entity);
            project.deserialize_component(&mut deserializer, entity, component_type, scene_version)?;
        }
    }

    // Prefab placements last; instantiation rebuilds their entities.
    let templates = dir.join("systems").join("templates.sys");
    if templates.is_file() {
        let bytes = std::fs::read(&templates)?;
        let mut reader = BlobReader::new(&bytes);
        let guid_view = &*guids;
        let mut deserializer = WorldDeserializer::new(&mut reader, guid_view);
        prefabs.deserialize_world(&mut deserializer, project, fs)?;
    }
    for index in 0..prefabs.max_entity_index() {
        let entity = GameObject::from_index(index);
        if prefabs.get_prefab(entity) != 0 && project.has_entity(entity) {
            guids.create(entity);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use glam::{Quat, Vec3};
    use karst_project::{EntityGuid, GameObject};

    use super::Coordinate;
    use crate::snapshot::save_snapshot;
    use crate::test_util::{
        half_extents_hash, layers_hash, target_hash, write_two_entity_prefab, EditorFixture,
        BOX_ACTOR, CAMERA,
    };

    #[test]
    fn add_entity_undo_redo_restores_the_same_guid() {
        let mut fixture = EditorFixture::new();
        let entity = fixture.editor.add_entity_at_position(Vec3::new(1.0, 2.0, 3.0));

        assert_eq!(entity.index(), 1, "slot 0 belongs to the editor camera");
        let guid = fixture.editor.entity_guid(entity);
        assert!(guid.is_valid());
        let project = fixture.editor.project();
        assert_eq!(project.position(entity), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(project.rotation(entity), Quat::IDENTITY);
        assert_eq!(project.scale(entity), 1.0);

        fixture.editor.undo();
        assert_eq!(fixture.editor.project().entity_count(), 1, "camera only");
        assert_eq!(fixture.editor.entity_by_guid(guid), GameObject::INVALID);

        fixture.editor.redo();
        let project = fixture.editor.project();
        assert!(project.has_entity(entity));
        assert_eq!(project.position(entity), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(fixture.editor.entity_guid(entity), guid, "identity survives redo");
    }

    #[test]
    fn property_edits_propagate_to_every_prefab_instance() {
        let mut fixture = EditorFixture::new();
        let path = write_two_entity_prefab(fixture.dir.path(), "crate.fab");

        let first = fixture
            .editor
            .instantiate_prefab(&path, Vec3::ZERO, Quat::IDENTITY, 1.0);
        let second = fixture
            .editor
            .instantiate_prefab(&path, Vec3::new(5.0, 0.0, 0.0), Quat::IDENTITY, 1.0);
        assert!(first.is_valid() && second.is_valid());
        let first_child = fixture.editor.project().first_child(first);
        let second_child = fixture.editor.project().first_child(second);

        let value = bincode::serialize(&[2.0f32, 2.0, 2.0]).expect("encodable");
        fixture
            .editor
            .set_property(&[first], BOX_ACTOR, half_extents_hash(), -1, value);

        assert_eq!(fixture.box_half_extents(first), Vec3::splat(2.0));
        assert_eq!(
            fixture.box_half_extents(second),
            Vec3::splat(2.0),
            "edit reached the sibling instance"
        );
        assert_eq!(fixture.box_half_extents(first_child), Vec3::splat(0.5));
        assert_eq!(fixture.box_half_extents(second_child), Vec3::splat(0.5));

        fixture.editor.undo();
        assert_eq!(fixture.box_half_extents(first), Vec3::splat(0.5));
        assert_eq!(fixture.box_half_extents(second), Vec3::splat(0.5));
    }

    #[test]
    fn component_add_propagates_and_undoes_across_instances() {
        let mut fixture = EditorFixture::new();
        let path = write_two_entity_prefab(fixture.dir.path(), "crate.fab");
        let first = fixture
            .editor
            .instantiate_prefab(&path, Vec3::ZERO, Quat::IDENTITY, 1.0);
        let second = fixture
            .editor
            .instantiate_prefab(&path, Vec3::new(3.0, 0.0, 0.0), Quat::IDENTITY, 1.0);

        fixture
            .editor
            .destroy_components(&[first], BOX_ACTOR)
            .expect("not the camera");
        assert!(!fixture.editor.project().has_component(first, BOX_ACTOR));
        assert!(
            !fixture.editor.project().has_component(second, BOX_ACTOR),
            "destroy propagated"
        );

        fixture.editor.undo();
        assert!(fixture.editor.project().has_component(first, BOX_ACTOR));
        assert!(fixture.editor.project().has_component(second, BOX_ACTOR));
    }

    #[test]
    fn moves_of_a_prefab_child_track_every_instance() {
        let mut fixture = EditorFixture::new();
        let path = write_two_entity_prefab(fixture.dir.path(), "crate.fab");
        let first = fixture
            .editor
            .instantiate_prefab(&path, Vec3::ZERO, Quat::IDENTITY, 1.0);
        let second = fixture
            .editor
            .instantiate_prefab(&path, Vec3::new(5.0, 0.0, 0.0), Quat::IDENTITY, 1.0);
        let first_child = fixture.editor.project().first_child(first);
        let second_child = fixture.editor.project().first_child(second);

        // Move the first instance's child; the second instance's
        // child keeps the same local offset to its own root.
        fixture
            .editor
            .set_entities_positions(&[first_child], &[Vec3::new(0.0, 2.0, 0.0)]);

        let project = fixture.editor.project();
        assert!((project.position(first_child) - Vec3::new(0.0, 2.0, 0.0)).length() < 1e-4);
        assert!(
            (project.position(second_child) - Vec3::new(5.0, 2.0, 0.0)).length() < 1e-4,
            "sibling child moved in its own frame"
        );
    }

    #[test]
    fn paste_rewrites_internal_and_keeps_external_references() {
        let mut fixture = EditorFixture::new();
        let camera = fixture.editor.camera();
        let model = fixture.editor.add_entity_at_position(Vec3::new(1.0, 0.0, 0.0));
        let wheel = fixture.editor.add_entity_at_position(Vec3::new(1.0, 1.0, 0.0));
        fixture.editor.make_parent(model, wheel);
        assert!(fixture.editor.add_component(&[model], BOX_ACTOR));
        assert!(fixture.editor.add_component(&[wheel], BOX_ACTOR));

        // The model aims at the camera (external), the wheel at the
        // model (internal to the copied selection).
        let camera_ref = bincode::serialize(&camera.raw()).expect("encodable");
        fixture
            .editor
            .set_property(&[model], BOX_ACTOR, target_hash(), -1, camera_ref);
        let model_ref = bincode::serialize(&model.raw()).expect("encodable");
        fixture
            .editor
            .set_property(&[wheel], BOX_ACTOR, target_hash(), -1, model_ref);

        fixture.editor.select_entities(&[model], false);
        fixture.editor.copy_entities();
        let pasted = fixture.editor.paste_entities();
        assert_eq!(pasted.len(), 2, "child came along");

        let new_model = pasted[0];
        let new_wheel = pasted[1];
        assert_eq!(
            fixture.box_target(new_model),
            camera,
            "external reference preserved"
        );
        assert_eq!(
            fixture.box_target(new_wheel),
            new_model,
            "internal reference rewritten to the copy"
        );
        assert_eq!(fixture.editor.project().parent(new_wheel), new_model);

        fixture.editor.undo();
        assert!(!fixture.editor.project().has_entity(new_model));
        assert!(!fixture.editor.project().has_entity(new_wheel));
    }

    #[test]
    fn duplicate_keeps_source_transforms() {
        let mut fixture = EditorFixture::new();
        let entity = fixture.editor.add_entity_at_position(Vec3::new(4.0, 2.0, 1.0));
        fixture.editor.select_entities(&[entity], false);

        let pasted = fixture.editor.duplicate_entities();
        assert_eq!(pasted.len(), 1);
        assert_eq!(
            fixture.editor.project().position(pasted[0]),
            Vec3::new(4.0, 2.0, 1.0)
        );
    }

    #[test]
    fn play_mode_discards_commands_and_restores_state() {
        let mut fixture = EditorFixture::new();
        let entity = fixture.editor.add_entity_at_position(Vec3::new(1.0, 0.0, 0.0));
        fixture.editor.set_entity_name(entity, "hero");
        assert!(fixture.editor.add_component(&[entity], BOX_ACTOR));
        fixture.editor.select_entities(&[entity], false);

        let journal_before = fixture.editor.undo_stack_len();
        let state_before =
            save_snapshot(fixture.editor.project(), fixture.editor.prefab_system());

        fixture.editor.toggle_game_mode();
        assert!(fixture.editor.is_game_mode());
        assert!(!fixture.editor.can_undo(), "no undo during play");

        // Two in-play commands.
        fixture.editor.add_entity_at_position(Vec3::new(9.0, 9.0, 9.0));
        fixture
            .editor
            .set_entities_positions(&[entity], &[Vec3::new(7.0, 7.0, 7.0)]);

        fixture.editor.toggle_game_mode();
        assert!(!fixture.editor.is_game_mode());

        assert_eq!(fixture.editor.undo_stack_len(), journal_before);
        let state_after =
            save_snapshot(fixture.editor.project(), fixture.editor.prefab_system());
        assert_eq!(state_before, state_after, "scratch restore is exact");
        assert_eq!(fixture.editor.selected_entities(), &[entity]);
        assert_eq!(fixture.editor.project().entity_name(entity), "hero");
    }

    #[test]
    fn project_save_load_round_trips_guids_and_components() {
        let mut fixture = EditorFixture::new();
        let a = fixture.editor.add_entity_at_position(Vec3::new(1.0, 2.0, 3.0));
        let b = fixture.editor.add_entity_at_position(Vec3::new(4.0, 5.0, 6.0));
        fixture.editor.make_parent(a, b);
        fixture.editor.set_entity_name(a, "root");
        assert!(fixture.editor.add_component(&[b], BOX_ACTOR));
        let value = bincode::serialize(&[9.0f32, 9.0, 9.0]).expect("encodable");
        fixture
            .editor
            .set_property(&[b], BOX_ACTOR, half_extents_hash(), -1, value);

        let guid_a = fixture.editor.entity_guid(a);
        let guid_b = fixture.editor.entity_guid(b);
        fixture.editor.save_project("roundtrip", true).expect("saved");

        assert!(fixture.editor.load_project("roundtrip"));
        let loaded_a = fixture.editor.entity_by_guid(guid_a);
        let loaded_b = fixture.editor.entity_by_guid(guid_b);
        assert!(loaded_a.is_valid() && loaded_b.is_valid());

        let project = fixture.editor.project();
        assert_eq!(project.entity_name(loaded_a), "root");
        assert_eq!(project.parent(loaded_b), loaded_a);
        assert!((project.position(loaded_b) - Vec3::new(4.0, 5.0, 6.0)).length() < 1e-4);
        assert!(project.has_component(loaded_b, BOX_ACTOR));
        assert_eq!(fixture.box_half_extents(loaded_b), Vec3::splat(9.0));
        assert!(project.has_component(fixture.editor.camera(), CAMERA));
    }

    #[test]
    fn prefab_instances_survive_project_save_load() {
        let mut fixture = EditorFixture::new();
        let path = write_two_entity_prefab(fixture.dir.path(), "crate.fab");
        let first = fixture
            .editor
            .instantiate_prefab(&path, Vec3::new(2.0, 0.0, 0.0), Quat::IDENTITY, 1.0);
        assert!(first.is_valid());
        let count_before = fixture.editor.project().entity_count();

        fixture.editor.save_project("withprefab", true).expect("saved");
        assert!(fixture.editor.load_project("withprefab"));

        assert_eq!(fixture.editor.project().entity_count(), count_before);
        // A re-instantiated root exists at the saved placement.
        let prefabs = fixture.editor.prefab_system();
        let root = prefabs.first_instance(crate::prefab::prefab_path_hash(&path) as u64);
        assert!(root.is_valid());
        assert!((fixture.editor.project().position(root) - Vec3::new(2.0, 0.0, 0.0)).length() < 1e-4);
        assert!(fixture.editor.project().first_child(root).is_valid());
    }

    #[test]
    fn load_of_a_missing_project_yields_a_fresh_empty_one() {
        let mut fixture = EditorFixture::new();
        fixture.editor.add_entity_at_position(Vec3::ONE);
        assert!(!fixture.editor.load_project("no_such_project"));
        assert_eq!(fixture.editor.project().entity_count(), 1, "camera only");
        assert!(fixture.editor.camera().is_valid());
    }

    #[test]
    fn replay_reproduces_the_saved_project() {
        let mut fixture = EditorFixture::new();
        let entity = fixture.editor.add_entity_at_position(Vec3::new(1.0, 2.0, 3.0));
        fixture.editor.set_entity_name(entity, "replayed");
        assert!(fixture.editor.add_component(&[entity], BOX_ACTOR));
        let value = bincode::serialize(&[3.0f32, 2.0, 1.0]).expect("encodable");
        fixture
            .editor
            .set_property(&[entity], BOX_ACTOR, half_extents_hash(), -1, value);
        fixture
            .editor
            .set_entities_coordinate(&[entity], 8.0, Coordinate::Y);

        let projects_dir = fixture.dir.path().join("projects");
        std::fs::create_dir_all(&projects_dir).expect("dir");
        fixture
            .editor
            .save_undo_stack(&projects_dir.join("case.json"))
            .expect("log saved");
        fixture.editor.save_project("case", true).expect("saved");

        assert!(fixture.editor.run_test(&projects_dir, "case"));
    }

    #[test]
    fn unknown_commands_abort_replay() {
        let mut fixture = EditorFixture::new();
        let projects_dir = fixture.dir.path().join("projects");
        std::fs::create_dir_all(&projects_dir).expect("dir");
        let path = projects_dir.join("bad.json");
        std::fs::write(&path, r#"[{"undo_command_type": "frobnicate"}]"#).expect("written");

        assert!(!fixture.editor.execute_undo_stack(&path));
        assert_eq!(fixture.editor.undo_stack_len(), 0);
    }

    #[test]
    fn array_property_items_round_trip_through_undo() {
        let mut fixture = EditorFixture::new();
        let entity = fixture.editor.add_entity_at_position(Vec3::ZERO);
        assert!(fixture.editor.add_component(&[entity], BOX_ACTOR));

        fixture
            .editor
            .add_array_property_item(entity, BOX_ACTOR, layers_hash());
        let value = bincode::serialize(&4.5f32).expect("encodable");
        fixture
            .editor
            .set_property(&[entity], BOX_ACTOR, layers_hash(), 0, value);
        assert_eq!(fixture.box_layers(entity), vec![4.5]);

        fixture
            .editor
            .remove_array_property_item(entity, BOX_ACTOR, layers_hash(), 0);
        assert!(fixture.box_layers(entity).is_empty());

        fixture.editor.undo();
        assert_eq!(fixture.box_layers(entity), vec![4.5], "item payload restored");

        fixture.editor.undo(); // the set_property
        fixture.editor.undo(); // the add item
        assert!(fixture.box_layers(entity).is_empty());
    }

    #[test]
    fn destroying_the_camera_is_refused() {
        let mut fixture = EditorFixture::new();
        let camera = fixture.editor.camera();
        assert!(fixture.editor.destroy_entities(&[camera]).is_err());
        assert!(fixture.editor.project().has_entity(camera));
        assert!(fixture.editor.destroy_components(&[camera], CAMERA).is_err());
        assert!(fixture.editor.project().has_component(camera, CAMERA));
    }

    #[test]
    fn instantiating_a_missing_prefab_returns_invalid() {
        let mut fixture = EditorFixture::new();
        let depth = fixture.editor.undo_stack_len();
        let root = fixture.editor.instantiate_prefab(
            &fixture.dir.path().join("missing.fab"),
            Vec3::ZERO,
            Quat::IDENTITY,
            1.0,
        );
        assert_eq!(root, GameObject::INVALID);
        assert_eq!(fixture.editor.undo_stack_len(), depth, "no-op is not recorded");
    }

    #[test]
    fn save_prefab_replaces_the_source_with_an_instance() {
        let mut fixture = EditorFixture::new();
        let root = fixture.editor.add_entity_at_position(Vec3::new(1.0, 1.0, 1.0));
        let child = fixture.editor.add_entity_at_position(Vec3::new(1.0, 2.0, 1.0));
        fixture.editor.make_parent(root, child);
        assert!(fixture.editor.add_component(&[root], BOX_ACTOR));
        fixture.editor.select_entities(&[root], false);

        let path = fixture.dir.path().join("saved.fab");
        fixture.editor.save_prefab(&path).expect("prefab saved");
        assert!(path.is_file());

        // The source subtree is now a linked instance at the same
        // spot.
        let tag = crate::prefab::prefab_path_hash(&path) as u64;
        let instance = fixture.editor.prefab_system().first_instance(tag);
        assert!(instance.is_valid());
        assert!((fixture.editor.project().position(instance) - Vec3::new(1.0, 1.0, 1.0)).length() < 1e-4);
        assert!(fixture.editor.project().has_component(instance, BOX_ACTOR));

        // One undo reverts the whole swap.
        fixture.editor.undo();
        assert_eq!(
            fixture
                .editor
                .prefab_system()
                .first_instance(tag),
            GameObject::INVALID
        );
        assert!(fixture.editor.project().has_entity(root));
        assert!(fixture.editor.project().has_component(root, BOX_ACTOR));
    }

    #[test]
    fn selection_drops_destroyed_entities() {
        let mut fixture = EditorFixture::new();
        let a = fixture.editor.add_entity_at_position(Vec3::ZERO);
        let b = fixture.editor.add_entity_at_position(Vec3::ONE);
        fixture.editor.select_entities(&[a, b], false);

        fixture.editor.destroy_entities(&[a]).expect("not the camera");
        assert_eq!(fixture.editor.selected_entities(), &[b]);
    }

    #[test]
    fn clone_component_copies_reflected_properties() {
        let mut project = crate::test_util::new_test_project();
        let a = project.create_entity(Vec3::ZERO, Quat::IDENTITY);
        let b = project.create_entity(Vec3::ONE, Quat::IDENTITY);
        project.create_component(BOX_ACTOR, a);
        let value = bincode::serialize(&[7.0f32, 7.0, 7.0]).expect("encodable");
        project.set_property_value(a, BOX_ACTOR, half_extents_hash(), -1, &value);

        assert!(project.clone_component(BOX_ACTOR, a, b));
        let mut out = Vec::new();
        assert!(project.get_property_value(b, BOX_ACTOR, half_extents_hash(), -1, &mut out));
        assert_eq!(out, value);
    }

    #[test]
    fn guid_map_counter_mode_is_session_stable() {
        let fixture = EditorFixture::new();
        let camera_guid = fixture.editor.entity_guid(fixture.editor.camera());
        assert_eq!(camera_guid, EntityGuid(1), "counter mode starts at one");
    }
}
