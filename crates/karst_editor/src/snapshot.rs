// SPDX-License-Identifier: MIT OR Apache-2.0
//! Blob snapshots.
//!
//! One binary stream holding the whole project: raw store tables,
//! every scene payload in registration order (version-prefixed), and
//! the prefab tables last. Used for the play-mode scratch file and
//! the single-file project save. A CRC-32 over everything after the
//! header guards against torn writes.

use karst_project::{
    name_hash, BlobReader, BlobWriter, Project, SceneId, WorldDeserializer, WorldSerializer,
};
use karst_project::serialize::IndexGuidMap;

use crate::error::EditorError;
use crate::fs::AsyncFileSystem;
use crate::prefab::PrefabSystem;

/// First word of every snapshot.
pub const SNAPSHOT_MAGIC: u32 = 0xffff_ffff;

/// Current snapshot layout version.
pub const SNAPSHOT_VERSION: u32 = 0;

const HEADER_SIZE: usize = 16;

/// Hash of the registered scene set, stored in the header so a
/// snapshot can be matched against the build that reads it.
fn engine_hash(project: &Project) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    for index in 0..project.scene_count() {
        let scene = project.scene(SceneId(index));
        hasher.update(scene.name().as_bytes());
        hasher.update(&scene.version().to_le_bytes());
    }
    hasher.finalize()
}

/// Serialize the project and prefab tables into a snapshot blob.
pub fn save_snapshot(project: &Project, prefabs: &PrefabSystem) -> Vec<u8> {
    let mut payload = BlobWriter::new();
    project.serialize(&mut payload);

    payload.write_u32(project.scene_count() as u32);
    for index in 0..project.scene_count() {
        let scene = project.scene(SceneId(index));
        payload.write_u32(name_hash(scene.name()));
        payload.write_u32(scene.version());
        let mut serializer = WorldSerializer::new(&mut payload, &IndexGuidMap);
        scene.serialize(&mut serializer);
    }

    // Per-entity component payloads, in slot and mask order. The
    // reader walks the restored masks, so no framing is needed beyond
    // an entity-count guard.
    payload.write_u32(project.entity_count() as u32);
    let mut entity = project.first_entity();
    while entity.is_valid() {
        for component_type in project.components(entity) {
            let mut serializer = WorldSerializer::new(&mut payload, &IndexGuidMap);
            project.serialize_component(&mut serializer, component_type, entity);
        }
        entity = project.next_entity(entity);
    }

    prefabs.serialize(&mut payload);

    let mut blob = BlobWriter::new();
    blob.write_u32(SNAPSHOT_MAGIC);
    blob.write_u32(SNAPSHOT_VERSION);
    blob.write_u32(crc32fast::hash(payload.as_slice()));
    blob.write_u32(engine_hash(project));
    blob.write_bytes(payload.as_slice());
    blob.into_bytes()
}

/// Restore a snapshot written by [`save_snapshot`] into a project
/// with the same scenes registered.
///
/// A bad magic number or payload hash yields
/// [`EditorError::CorruptFile`]; a newer layout version yields
/// [`EditorError::UnsupportedVersion`]. Nothing is written to the
/// project until the header checks pass.
pub fn load_snapshot(
    bytes: &[u8],
    project: &mut Project,
    prefabs: &mut PrefabSystem,
    fs: &dyn AsyncFileSystem,
) -> Result<(), EditorError> {
    if bytes.len() < HEADER_SIZE {
        tracing::error!("snapshot shorter than its header");
        return Err(EditorError::CorruptFile);
    }
    let mut reader = BlobReader::new(bytes);
    let magic = reader.read_u32()?;
    let version = reader.read_u32()?;
    let payload_hash = reader.read_u32()?;
    let stored_engine_hash = reader.read_u32()?;

    if magic != SNAPSHOT_MAGIC {
        tracing::error!(magic, "snapshot has a bad magic number");
        return Err(EditorError::CorruptFile);
    }
    if version > SNAPSHOT_VERSION {
        tracing::error!(version, "snapshot was written by a newer build");
        return Err(EditorError::UnsupportedVersion(version));
    }
    let payload = &bytes[HEADER_SIZE..];
    if crc32fast::hash(payload) != payload_hash {
        tracing::error!("snapshot payload hash mismatch");
        return Err(EditorError::CorruptFile);
    }
    if stored_engine_hash != engine_hash(project) {
        tracing::warn!("snapshot was written with a different scene set");
    }

    project.deserialize(&mut reader)?;

    let scene_count = reader.read_u32()? as usize;
    for _ in 0..scene_count {
        let hash = reader.read_u32()?;
        let scene_version = reader.read_u32()?;
        let Some(scene_id) = project.scene_by_name_hash(hash) else {
            tracing::error!(hash, "snapshot contains a payload for an unknown scene");
            return Err(EditorError::UnknownScene(format!("{hash:08x}")));
        };
        let mut deserializer = WorldDeserializer::new(&mut reader, &IndexGuidMap);
        project
            .scene_mut(scene_id)
            .deserialize(&mut deserializer, scene_version)?;
    }

    let entity_count = reader.read_u32()? as usize;
    if entity_count != project.entity_count() {
        tracing::error!("snapshot entity payload count disagrees with the tables");
        return Err(EditorError::CorruptFile);
    }
    let mut entity = project.first_entity();
    while entity.is_valid() {
        let components: Vec<_> = project.components(entity).collect();
        for component_type in components {
            let version = project
                .scene_version_of_type(component_type)
                .expect("registered type has a scene");
            project.rebuild_component(component_type, entity);
            let mut deserializer = WorldDeserializer::new(&mut reader, &IndexGuidMap);
            project.deserialize_component(&mut deserializer, entity, component_type, version)?;
        }
        entity = project.next_entity(entity);
    }

    prefabs.deserialize(&mut reader, fs)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;
    use crate::fs::NullFileSystem;
    use crate::test_util::{new_test_project, BOX_ACTOR};

    #[test]
    fn snapshot_round_trips_bit_for_bit() {
        let mut project = new_test_project();
        let prefabs = PrefabSystem::new();
        let a = project.create_entity(Vec3::new(1.0, 2.0, 3.0), glam::Quat::IDENTITY);
        let b = project.create_entity(Vec3::new(4.0, 5.0, 6.0), glam::Quat::IDENTITY);
        project.set_parent(a, b);
        project.set_entity_name(a, "root");
        project.create_component(BOX_ACTOR, a);

        let blob = save_snapshot(&project, &prefabs);

        let mut restored = new_test_project();
        let mut restored_prefabs = PrefabSystem::new();
        load_snapshot(&blob, &mut restored, &mut restored_prefabs, &NullFileSystem)
            .expect("snapshot loads");

        assert_eq!(restored.entity_count(), 2);
        assert_eq!(restored.parent(b), a);
        assert!(restored.has_component(a, BOX_ACTOR));

        // Saving the restored project reproduces the same bytes.
        let again = save_snapshot(&restored, &restored_prefabs);
        assert_eq!(blob, again);
    }

    #[test]
    fn flipped_payload_byte_is_rejected() {
        let project = new_test_project();
        let prefabs = PrefabSystem::new();
        let mut blob = save_snapshot(&project, &prefabs);
        let last = blob.len() - 1;
        blob[last] ^= 1;

        let mut target = new_test_project();
        let mut target_prefabs = PrefabSystem::new();
        let result = load_snapshot(&blob, &mut target, &mut target_prefabs, &NullFileSystem);
        assert!(matches!(result, Err(EditorError::CorruptFile)));
    }

    #[test]
    fn newer_versions_are_rejected() {
        let project = new_test_project();
        let prefabs = PrefabSystem::new();
        let mut blob = save_snapshot(&project, &prefabs);
        blob[4..8].copy_from_slice(&(SNAPSHOT_VERSION + 1).to_le_bytes());
        // The version check runs before the payload hash check.
        let mut target = new_test_project();
        let mut target_prefabs = PrefabSystem::new();
        let result = load_snapshot(&blob, &mut target, &mut target_prefabs, &NullFileSystem);
        assert!(matches!(result, Err(EditorError::UnsupportedVersion(1))));
    }
}
