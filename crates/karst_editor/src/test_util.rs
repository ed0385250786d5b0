// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared test fixtures: a physics-flavored scene with reflected
//! properties, a camera scene, and an editor wired to both inside a
//! temporary base directory.

use std::collections::{BTreeMap, BTreeSet};

use glam::Vec3;
use karst_project::{
    name_hash, BlobWriter, ComponentType, GameObject, Project, Scene, StreamError,
    WorldDeserializer, WorldSerializer,
};

use crate::editor::{WorldEditor, WorldEditorOptions};
use crate::fs::NullFileSystem;
use crate::render::NullRenderInterface;

/// Component type of the box actor test scene.
pub const BOX_ACTOR: ComponentType = ComponentType::new(1);
/// Component type of the camera test scene.
pub const CAMERA: ComponentType = ComponentType::new(2);

/// Property hash of the box half extents.
pub fn half_extents_hash() -> u32 {
    name_hash("half_extents")
}

/// Property hash of the entity-reference target.
pub fn target_hash() -> u32 {
    name_hash("target")
}

/// Property hash of the collision-layers array property.
pub fn layers_hash() -> u32 {
    name_hash("layers")
}

#[derive(Debug, Clone, PartialEq)]
struct BoxActor {
    half_extents: Vec3,
    target: GameObject,
    layers: Vec<f32>,
}

impl Default for BoxActor {
    fn default() -> BoxActor {
        BoxActor {
            half_extents: Vec3::splat(0.5),
            target: GameObject::INVALID,
            layers: Vec::new(),
        }
    }
}

/// Scene owning `box_rigid_actor` components with reflected scalar,
/// entity-reference and array properties.
#[derive(Debug, Default)]
pub struct BoxActorScene {
    actors: BTreeMap<GameObject, BoxActor>,
}

impl BoxActorScene {
    fn write_property_record(out: &mut BlobWriter, property: u32, bytes: &[u8]) {
        out.write_u32(property);
        out.write_u32(bytes.len() as u32);
        out.write_bytes(bytes);
    }
}

impl Scene for BoxActorScene {
    fn name(&self) -> &str {
        "box_actors"
    }

    fn version(&self) -> u32 {
        1
    }

    fn create_component(&mut self, _component_type: ComponentType, entity: GameObject) -> bool {
        self.actors.insert(entity, BoxActor::default());
        true
    }

    fn destroy_component(&mut self, _component_type: ComponentType, entity: GameObject) {
        self.actors.remove(&entity);
    }

    fn serialize_component(
        &self,
        _component_type: ComponentType,
        entity: GameObject,
        serializer: &mut WorldSerializer<'_>,
    ) {
        let actor = &self.actors[&entity];
        serializer.write_vec3(actor.half_extents);
        serializer.write_entity(actor.target);
        serializer.write_u32(actor.layers.len() as u32);
        for &layer in &actor.layers {
            serializer.write_f32(layer);
        }
    }

    fn deserialize_component(
        &mut self,
        _component_type: ComponentType,
        entity: GameObject,
        deserializer: &mut WorldDeserializer<'_, '_>,
        _scene_version: u32,
    ) -> Result<(), StreamError> {
        let half_extents = deserializer.read_vec3()?;
        let target = deserializer.read_entity()?;
        let layer_count = deserializer.read_u32()? as usize;
        let mut layers = Vec::with_capacity(layer_count);
        for _ in 0..layer_count {
            layers.push(deserializer.read_f32()?);
        }
        self.actors.insert(
            entity,
            BoxActor {
                half_extents,
                target,
                layers,
            },
        );
        Ok(())
    }

    fn serialize(&self, serializer: &mut WorldSerializer<'_>) {
        // No scene-global state; components travel per entity.
        serializer.write_u32(0);
    }

    fn deserialize(
        &mut self,
        deserializer: &mut WorldDeserializer<'_, '_>,
        _version: u32,
    ) -> Result<(), StreamError> {
        deserializer.read_u32()?;
        Ok(())
    }

    fn set_property(
        &mut self,
        entity: GameObject,
        _component_type: ComponentType,
        property: u32,
        index: i32,
        value: &[u8],
    ) -> bool {
        let Some(actor) = self.actors.get_mut(&entity) else {
            return false;
        };
        if property == half_extents_hash() {
            let Ok(extents) = bincode::deserialize::<[f32; 3]>(value) else {
                return false;
            };
            actor.half_extents = Vec3::from_array(extents);
            true
        } else if property == target_hash() {
            let Ok(raw) = bincode::deserialize::<i32>(value) else {
                return false;
            };
            actor.target = GameObject::from_raw(raw);
            true
        } else if property == layers_hash() {
            if index >= 0 {
                let Ok(layer) = bincode::deserialize::<f32>(value) else {
                    return false;
                };
                let Some(slot) = actor.layers.get_mut(index as usize) else {
                    return false;
                };
                *slot = layer;
                true
            } else {
                let Ok(layers) = bincode::deserialize::<Vec<f32>>(value) else {
                    return false;
                };
                actor.layers = layers;
                true
            }
        } else {
            false
        }
    }

    fn get_property(
        &self,
        entity: GameObject,
        _component_type: ComponentType,
        property: u32,
        index: i32,
        out: &mut Vec<u8>,
    ) -> bool {
        let Some(actor) = self.actors.get(&entity) else {
            return false;
        };
        let encoded = if property == half_extents_hash() {
            bincode::serialize(&actor.half_extents.to_array())
        } else if property == target_hash() {
            bincode::serialize(&actor.target.raw())
        } else if property == layers_hash() {
            if index >= 0 {
                match actor.layers.get(index as usize) {
                    Some(layer) => bincode::serialize(layer),
                    None => return false,
                }
            } else {
                bincode::serialize(&actor.layers)
            }
        } else {
            return false;
        };
        match encoded {
            Ok(bytes) => {
                out.extend_from_slice(&bytes);
                true
            }
            Err(_) => false,
        }
    }

    fn save_properties(
        &self,
        entity: GameObject,
        _component_type: ComponentType,
        out: &mut BlobWriter,
    ) {
        let Some(actor) = self.actors.get(&entity) else {
            out.write_u32(0);
            return;
        };
        out.write_u32(3);
        let half_extents = bincode::serialize(&actor.half_extents.to_array()).expect("encodable");
        Self::write_property_record(out, half_extents_hash(), &half_extents);
        let target = bincode::serialize(&actor.target.raw()).expect("encodable");
        Self::write_property_record(out, target_hash(), &target);
        let layers = bincode::serialize(&actor.layers).expect("encodable");
        Self::write_property_record(out, layers_hash(), &layers);
    }

    fn add_array_item(
        &mut self,
        entity: GameObject,
        _component_type: ComponentType,
        property: u32,
        index: i32,
    ) -> i32 {
        if property != layers_hash() {
            return -1;
        }
        let Some(actor) = self.actors.get_mut(&entity) else {
            return -1;
        };
        if index < 0 || index as usize >= actor.layers.len() {
            actor.layers.push(0.0);
            actor.layers.len() as i32 - 1
        } else {
            actor.layers.insert(index as usize, 0.0);
            index
        }
    }

    fn remove_array_item(
        &mut self,
        entity: GameObject,
        _component_type: ComponentType,
        property: u32,
        index: i32,
    ) -> bool {
        if property != layers_hash() || index < 0 {
            return false;
        }
        let Some(actor) = self.actors.get_mut(&entity) else {
            return false;
        };
        if (index as usize) < actor.layers.len() {
            actor.layers.remove(index as usize);
            true
        } else {
            false
        }
    }

    fn save_array_item(
        &self,
        entity: GameObject,
        _component_type: ComponentType,
        property: u32,
        index: i32,
        out: &mut BlobWriter,
    ) -> bool {
        if property != layers_hash() || index < 0 {
            return false;
        }
        let Some(layer) = self
            .actors
            .get(&entity)
            .and_then(|actor| actor.layers.get(index as usize))
        else {
            return false;
        };
        out.write_u32(1);
        let bytes = bincode::serialize(layer).expect("encodable");
        Self::write_property_record(out, property, &bytes);
        true
    }
}

/// Minimal camera scene: membership only.
#[derive(Debug, Default)]
pub struct CameraScene {
    cameras: BTreeSet<GameObject>,
}

impl Scene for CameraScene {
    fn name(&self) -> &str {
        "camera"
    }

    fn version(&self) -> u32 {
        1
    }

    fn create_component(&mut self, _component_type: ComponentType, entity: GameObject) -> bool {
        self.cameras.insert(entity)
    }

    fn destroy_component(&mut self, _component_type: ComponentType, entity: GameObject) {
        self.cameras.remove(&entity);
    }

    fn serialize_component(
        &self,
        _component_type: ComponentType,
        _entity: GameObject,
        serializer: &mut WorldSerializer<'_>,
    ) {
        serializer.write_u8(1);
    }

    fn deserialize_component(
        &mut self,
        _component_type: ComponentType,
        entity: GameObject,
        deserializer: &mut WorldDeserializer<'_, '_>,
        _scene_version: u32,
    ) -> Result<(), StreamError> {
        deserializer.read_u8()?;
        self.cameras.insert(entity);
        Ok(())
    }

    fn serialize(&self, serializer: &mut WorldSerializer<'_>) {
        serializer.write_u32(0);
    }

    fn deserialize(
        &mut self,
        deserializer: &mut WorldDeserializer<'_, '_>,
        _version: u32,
    ) -> Result<(), StreamError> {
        deserializer.read_u32()?;
        Ok(())
    }
}

/// Register the test scenes on a project the way the editor's scene
/// setup does.
pub fn register_test_scenes(project: &mut Project) {
    let boxes = project.add_scene(Box::new(BoxActorScene::default()));
    project.register_component_type(BOX_ACTOR, "box_rigid_actor", boxes);
    let cameras = project.add_scene(Box::new(CameraScene::default()));
    project.register_component_type(CAMERA, "camera", cameras);
}

/// A project with the test scenes registered.
pub fn new_test_project() -> Project {
    let mut project = Project::new();
    register_test_scenes(&mut project);
    project
}

/// An editor over the test scenes, rooted in a temporary directory,
/// with deterministic guids.
pub struct EditorFixture {
    /// The editor under test.
    pub editor: WorldEditor,
    /// Base directory backing project saves; removed on drop.
    pub dir: tempfile::TempDir,
}

impl EditorFixture {
    /// A fresh fixture.
    pub fn new() -> EditorFixture {
        let dir = tempfile::tempdir().expect("temp dir");
        let options = WorldEditorOptions {
            base_path: dir.path().to_path_buf(),
            pseudorandom_guid: true,
            camera_component: Some(CAMERA),
        };
        let editor = WorldEditor::new(
            options,
            register_test_scenes,
            Box::new(NullRenderInterface),
            Box::new(NullFileSystem),
        );
        EditorFixture { editor, dir }
    }

    /// Read a box actor's half extents through the reflection
    /// surface.
    pub fn box_half_extents(&self, entity: GameObject) -> Vec3 {
        let mut out = Vec::new();
        assert!(self.editor.project().get_property_value(
            entity,
            BOX_ACTOR,
            half_extents_hash(),
            -1,
            &mut out,
        ));
        let extents: [f32; 3] = bincode::deserialize(&out).expect("encodable");
        Vec3::from_array(extents)
    }

    /// Read a box actor's target reference.
    pub fn box_target(&self, entity: GameObject) -> GameObject {
        let mut out = Vec::new();
        assert!(self.editor.project().get_property_value(
            entity,
            BOX_ACTOR,
            target_hash(),
            -1,
            &mut out,
        ));
        GameObject::from_raw(bincode::deserialize(&out).expect("encodable"))
    }

    /// Read a box actor's layers array.
    pub fn box_layers(&self, entity: GameObject) -> Vec<f32> {
        let mut out = Vec::new();
        assert!(self.editor.project().get_property_value(
            entity,
            BOX_ACTOR,
            layers_hash(),
            -1,
            &mut out,
        ));
        bincode::deserialize(&out).expect("encodable")
    }
}

/// Write a `.fab` file holding a two-entity prefab (a root box actor
/// with one child) and return its path.
pub fn write_two_entity_prefab(dir: &std::path::Path, file_name: &str) -> std::path::PathBuf {
    let mut scratch = new_test_project();
    let root = scratch.create_entity(Vec3::ZERO, glam::Quat::IDENTITY);
    let child = scratch.create_entity(Vec3::new(0.0, 1.0, 0.0), glam::Quat::IDENTITY);
    scratch.set_parent(root, child);
    scratch.create_component(BOX_ACTOR, root);
    scratch.create_component(BOX_ACTOR, child);

    let path = dir.join(file_name);
    let blob = crate::prefab::serialize_prefab(&scratch, root, crate::prefab::prefab_path_hash(&path));
    std::fs::write(&path, blob).expect("prefab written");
    path
}
