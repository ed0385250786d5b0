// SPDX-License-Identifier: MIT OR Apache-2.0
//! Guid-mapped serialization streams.
//!
//! Entity references are never persisted as slot indices. On the way
//! out a [`SaveGuidMap`] translates handles into stable guids; on the
//! way in a [`LoadGuidMap`] resolves them back. Paste/duplicate and
//! prefab instantiation substitute local maps whose guid space indexes
//! into the set being created, leaving other references untouched.

use crate::entity::{EntityGuid, GameObject};
use crate::stream::{BlobReader, BlobWriter, StreamError};
use crate::transform::{RigidTransform, Transform};

/// Outbound entity-reference translation.
pub trait SaveGuidMap {
    /// The guid to persist for `entity`, [`EntityGuid::INVALID`] when
    /// the entity cannot be referenced.
    fn guid(&self, entity: GameObject) -> EntityGuid;
}

/// Inbound entity-reference translation.
pub trait LoadGuidMap {
    /// The live entity for `guid`, [`GameObject::INVALID`] when the
    /// guid is unknown.
    fn entity(&self, guid: EntityGuid) -> GameObject;
}

/// Identity map used where slot indices are themselves stable, e.g.
/// the play-mode scratch blob and entity cloning.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexGuidMap;

impl SaveGuidMap for IndexGuidMap {
    fn guid(&self, entity: GameObject) -> EntityGuid {
        if entity.is_valid() {
            EntityGuid(entity.index() as u64)
        } else {
            EntityGuid::INVALID
        }
    }
}

impl LoadGuidMap for IndexGuidMap {
    fn entity(&self, guid: EntityGuid) -> GameObject {
        if guid.is_valid() {
            GameObject::from_index(guid.0 as usize)
        } else {
            GameObject::INVALID
        }
    }
}

/// Binary writer that routes entity references through a guid map.
pub struct WorldSerializer<'a> {
    blob: &'a mut BlobWriter,
    map: &'a dyn SaveGuidMap,
}

impl<'a> WorldSerializer<'a> {
    /// Serializer writing into `blob`, translating through `map`.
    pub fn new(blob: &'a mut BlobWriter, map: &'a dyn SaveGuidMap) -> WorldSerializer<'a> {
        WorldSerializer { blob, map }
    }

    /// The guid `entity` persists as.
    pub fn guid(&self, entity: GameObject) -> EntityGuid {
        self.map.guid(entity)
    }

    /// Write an entity reference as its guid.
    pub fn write_entity(&mut self, entity: GameObject) {
        self.blob.write_u64(self.map.guid(entity).0);
    }

    /// Write a `u8`.
    pub fn write_u8(&mut self, value: u8) {
        self.blob.write_u8(value);
    }

    /// Write a bool.
    pub fn write_bool(&mut self, value: bool) {
        self.blob.write_bool(value);
    }

    /// Write a `u32`.
    pub fn write_u32(&mut self, value: u32) {
        self.blob.write_u32(value);
    }

    /// Write an `i32`.
    pub fn write_i32(&mut self, value: i32) {
        self.blob.write_i32(value);
    }

    /// Write a `u64`.
    pub fn write_u64(&mut self, value: u64) {
        self.blob.write_u64(value);
    }

    /// Write an `f32`.
    pub fn write_f32(&mut self, value: f32) {
        self.blob.write_f32(value);
    }

    /// Write a length-prefixed string.
    pub fn write_str(&mut self, value: &str) {
        self.blob.write_str(value);
    }

    /// Write raw bytes.
    pub fn write_bytes(&mut self, value: &[u8]) {
        self.blob.write_bytes(value);
    }

    /// Write a vector.
    pub fn write_vec3(&mut self, value: glam::Vec3) {
        self.blob.write_vec3(value);
    }

    /// Write a quaternion.
    pub fn write_quat(&mut self, value: glam::Quat) {
        self.blob.write_quat(value);
    }

    /// Write a rigid transform.
    pub fn write_rigid_transform(&mut self, value: &RigidTransform) {
        self.blob.write_rigid_transform(value);
    }

    /// Write a full transform.
    pub fn write_transform(&mut self, value: &Transform) {
        self.blob.write_transform(value);
    }
}

/// Binary reader that resolves entity references through a guid map.
pub struct WorldDeserializer<'a, 'b> {
    blob: &'b mut BlobReader<'a>,
    map: &'b dyn LoadGuidMap,
}

impl<'a, 'b> WorldDeserializer<'a, 'b> {
    /// Deserializer reading from `blob`, resolving through `map`.
    pub fn new(blob: &'b mut BlobReader<'a>, map: &'b dyn LoadGuidMap) -> WorldDeserializer<'a, 'b> {
        WorldDeserializer { blob, map }
    }

    /// The live entity for a persisted guid.
    pub fn resolve(&self, guid: EntityGuid) -> GameObject {
        self.map.entity(guid)
    }

    /// Whether the underlying blob is exhausted.
    pub fn is_at_end(&self) -> bool {
        self.blob.is_at_end()
    }

    /// Read an entity reference.
    pub fn read_entity(&mut self) -> Result<GameObject, StreamError> {
        let guid = EntityGuid(self.blob.read_u64()?);
        Ok(self.map.entity(guid))
    }

    /// Read a `u8`.
    pub fn read_u8(&mut self) -> Result<u8, StreamError> {
        self.blob.read_u8()
    }

    /// Read a bool.
    pub fn read_bool(&mut self) -> Result<bool, StreamError> {
        self.blob.read_bool()
    }

    /// Read a `u32`.
    pub fn read_u32(&mut self) -> Result<u32, StreamError> {
        self.blob.read_u32()
    }

    /// Read an `i32`.
    pub fn read_i32(&mut self) -> Result<i32, StreamError> {
        self.blob.read_i32()
    }

    /// Read a `u64`.
    pub fn read_u64(&mut self) -> Result<u64, StreamError> {
        self.blob.read_u64()
    }

    /// Read an `f32`.
    pub fn read_f32(&mut self) -> Result<f32, StreamError> {
        self.blob.read_f32()
    }

    /// Read a length-prefixed string.
    pub fn read_string(&mut self) -> Result<String, StreamError> {
        self.blob.read_string()
    }

    /// Read `count` raw bytes.
    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8], StreamError> {
        self.blob.read_bytes(count)
    }

    /// Read a vector.
    pub fn read_vec3(&mut self) -> Result<glam::Vec3, StreamError> {
        self.blob.read_vec3()
    }

    /// Read a quaternion.
    pub fn read_quat(&mut self) -> Result<glam::Quat, StreamError> {
        self.blob.read_quat()
    }

    /// Read a rigid transform.
    pub fn read_rigid_transform(&mut self) -> Result<RigidTransform, StreamError> {
        self.blob.read_rigid_transform()
    }

    /// Read a full transform.
    pub fn read_transform(&mut self) -> Result<Transform, StreamError> {
        self.blob.read_transform()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct OffsetMap;

    impl SaveGuidMap for OffsetMap {
        fn guid(&self, entity: GameObject) -> EntityGuid {
            if entity.is_valid() {
                EntityGuid(entity.index() as u64 + 100)
            } else {
                EntityGuid::INVALID
            }
        }
    }

    impl LoadGuidMap for OffsetMap {
        fn entity(&self, guid: EntityGuid) -> GameObject {
            if guid.is_valid() {
                GameObject::from_index((guid.0 - 100) as usize)
            } else {
                GameObject::INVALID
            }
        }
    }

    #[test]
    fn entity_references_translate_through_the_map() {
        let mut blob = BlobWriter::new();
        let mut ser = WorldSerializer::new(&mut blob, &OffsetMap);
        ser.write_entity(GameObject::from_index(4));
        ser.write_entity(GameObject::INVALID);

        let mut reader = BlobReader::new(blob.as_slice());
        let mut de = WorldDeserializer::new(&mut reader, &OffsetMap);
        assert_eq!(de.read_entity().unwrap(), GameObject::from_index(4));
        assert_eq!(de.read_entity().unwrap(), GameObject::INVALID);
    }
}
