// SPDX-License-Identifier: MIT OR Apache-2.0
//! Scene trait and component-type registry records.
//!
//! A scene is an external subsystem (renderer, physics, scripting)
//! owning the data for one or more component types. The project store
//! only holds the presence bit per entity; everything else goes
//! through this trait.

use crate::entity::{ComponentType, GameObject, SceneId};
use crate::serialize::{WorldDeserializer, WorldSerializer};
use crate::stream::{BlobReader, BlobWriter, StreamError};

/// Interface every registered scene implements.
///
/// Component payloads travel through guid-mapped streams so entity
/// references inside components survive save/load and paste. The
/// reflection surface (`set_property` and friends) backs the editor's
/// property commands; scenes without reflected properties keep the
/// defaults.
pub trait Scene {
    /// Scene plugin name; its hash names the `.scn` file.
    fn name(&self) -> &str;

    /// Scene payload version written next to every serialized payload.
    fn version(&self) -> u32;

    /// Create the component of `component_type` on `entity`.
    ///
    /// Returns `false` when the scene refuses (the store then leaves
    /// the component bit clear and fires no event).
    fn create_component(&mut self, component_type: ComponentType, entity: GameObject) -> bool;

    /// Destroy the component of `component_type` on `entity`.
    fn destroy_component(&mut self, component_type: ComponentType, entity: GameObject);

    /// Write one entity's component payload.
    fn serialize_component(
        &self,
        component_type: ComponentType,
        entity: GameObject,
        serializer: &mut WorldSerializer<'_>,
    );

    /// Read one entity's component payload written by a scene of
    /// version `scene_version`. The component has already been
    /// created.
    fn deserialize_component(
        &mut self,
        component_type: ComponentType,
        entity: GameObject,
        deserializer: &mut WorldDeserializer<'_, '_>,
        scene_version: u32,
    ) -> Result<(), StreamError>;

    /// Write the scene-global payload for a snapshot: terrain data,
    /// lighting settings and the like. Per-entity component data is
    /// collected separately through
    /// [`Scene::serialize_component`].
    fn serialize(&self, serializer: &mut WorldSerializer<'_>);

    /// Read a scene-global payload of `version`.
    fn deserialize(
        &mut self,
        deserializer: &mut WorldDeserializer<'_, '_>,
        version: u32,
    ) -> Result<(), StreamError>;

    /// Set one reflected property; `index` is `-1` for scalar
    /// properties, otherwise the array slot. `value` is the property's
    /// bincode encoding. Returns `false` for unknown properties.
    fn set_property(
        &mut self,
        _entity: GameObject,
        _component_type: ComponentType,
        _property: u32,
        _index: i32,
        _value: &[u8],
    ) -> bool {
        false
    }

    /// Read one reflected property into `out`. Returns `false` for
    /// unknown properties.
    fn get_property(
        &self,
        _entity: GameObject,
        _component_type: ComponentType,
        _property: u32,
        _index: i32,
        _out: &mut Vec<u8>,
    ) -> bool {
        false
    }

    /// Write every reflected property of a component as
    /// `count, {property_hash, size, bytes}*`. Unknown hashes are
    /// skipped on load, which is what keeps old payloads readable.
    fn save_properties(
        &self,
        _entity: GameObject,
        _component_type: ComponentType,
        out: &mut BlobWriter,
    ) {
        out.write_u32(0);
    }

    /// Apply a payload written by [`Scene::save_properties`] at
    /// `index` (`-1` for the component itself). Properties the scene
    /// does not know are skipped.
    fn load_properties(
        &mut self,
        entity: GameObject,
        component_type: ComponentType,
        index: i32,
        input: &mut BlobReader<'_>,
    ) -> Result<(), StreamError> {
        let count = input.read_u32()?;
        for _ in 0..count {
            let property = input.read_u32()?;
            let size = input.read_u32()? as usize;
            let bytes = input.read_bytes(size)?;
            self.set_property(entity, component_type, property, index, bytes);
        }
        Ok(())
    }

    /// Append an item to a reflected array property; `index == -1`
    /// appends at the end. Returns the index of the new item, or `-1`
    /// when the property is not an array.
    fn add_array_item(
        &mut self,
        _entity: GameObject,
        _component_type: ComponentType,
        _property: u32,
        _index: i32,
    ) -> i32 {
        -1
    }

    /// Remove an item from a reflected array property.
    fn remove_array_item(
        &mut self,
        _entity: GameObject,
        _component_type: ComponentType,
        _property: u32,
        _index: i32,
    ) -> bool {
        false
    }

    /// Write the item properties of one array slot in
    /// [`Scene::save_properties`] framing.
    fn save_array_item(
        &self,
        _entity: GameObject,
        _component_type: ComponentType,
        _property: u32,
        _index: i32,
        _out: &mut BlobWriter,
    ) -> bool {
        false
    }
}

/// Registration record binding a component type to its owning scene.
///
/// Immutable after registration.
#[derive(Debug, Clone)]
pub struct ComponentTypeEntry {
    /// Owning scene.
    pub scene: SceneId,
    /// Component type name, e.g. `box_rigid_actor`.
    pub name: String,
    /// CRC-32 of the name, used in every persisted format.
    pub name_hash: u32,
}
