// SPDX-License-Identifier: MIT OR Apache-2.0
//! Prefab instancing.
//!
//! A prefab is a serialized entity subtree identified by the hash of
//! its resource path. Every serialized entity record carries a tag
//! with that hash in the low 32 bits and the record's sequence number
//! in the high 32 bits; live entities with the same tag are threaded
//! onto an intrusive doubly-linked instance list. Propagating
//! commands walk these lists to hit the matching entity of every
//! placed copy.

use std::any::Any;
use std::path::{Path, PathBuf};

use glam::{Quat, Vec3};
use indexmap::IndexMap;
use karst_project::{
    name_hash, BlobReader, BlobWriter, EntityGuid, GameObject, LoadGuidMap, Project, Transform,
    WorldDeserializer, WorldSerializer,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::commands::{EditContext, EditorCommand};
use crate::error::EditorError;
use crate::fs::AsyncFileSystem;

/// Version ladder of the `.fab` wire format. Readers accept every
/// version up to [`PrefabVersion::Last`]; hierarchy data is present
/// only past [`PrefabVersion::WithHierarchy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PrefabVersion {
    /// Flat entity list.
    First = 0,
    /// Parent references added.
    WithHierarchy = 1,
    /// Current.
    Last = 2,
}

/// A loaded prefab resource: the raw serialized subtree.
#[derive(Debug, Clone)]
pub struct PrefabResource {
    /// Resource path, hashed into instance tags.
    pub path: PathBuf,
    /// Serialized content.
    pub blob: Vec<u8>,
    /// Whether the content finished loading.
    pub ready: bool,
}

/// Hash a prefab path the way instance tags store it.
pub fn prefab_path_hash(path: &Path) -> u32 {
    name_hash(&path.to_string_lossy())
}

#[derive(Debug, Clone, Copy)]
struct PrefabLink {
    prefab: u64,
    prev: GameObject,
    next: GameObject,
}

const NO_LINK: PrefabLink = PrefabLink {
    prefab: 0,
    prev: GameObject::INVALID,
    next: GameObject::INVALID,
};

/// Prefab bookkeeping: per-entity tags, instance lists and the
/// resource cache.
pub struct PrefabSystem {
    links: Vec<PrefabLink>,
    /// Tag to first live instance.
    instances: IndexMap<u64, GameObject>,
    /// Path hash to loaded resource.
    resources: IndexMap<u32, PrefabResource>,
}

impl PrefabSystem {
    /// An empty system.
    pub fn new() -> PrefabSystem {
        PrefabSystem {
            links: Vec::new(),
            instances: IndexMap::new(),
            resources: IndexMap::new(),
        }
    }

    /// Drop every link, instance head and cached resource. Called
    /// when the project is destroyed or re-created.
    pub fn clear(&mut self) {
        self.links.clear();
        self.instances.clear();
        self.resources.clear();
    }

    /// Upper bound of entity indices the link table covers.
    pub fn max_entity_index(&self) -> usize {
        self.links.len()
    }

    fn reserve(&mut self, entity: GameObject) {
        while entity.index() >= self.links.len() {
            self.links.push(NO_LINK);
        }
    }

    /// Tag `entity` as an instance and thread it onto the tag's
    /// instance list.
    pub fn set_prefab(&mut self, entity: GameObject, prefab: u64) {
        self.reserve(entity);
        self.links[entity.index()].prefab = prefab;
        if prefab != 0 {
            self.link(entity, prefab);
        }
    }

    /// The entity's prefab tag, `0` when not an instance.
    pub fn get_prefab(&self, entity: GameObject) -> u64 {
        if !entity.is_valid() || entity.index() >= self.links.len() {
            return 0;
        }
        self.links[entity.index()].prefab
    }

    /// First live instance of a tag.
    pub fn first_instance(&self, prefab: u64) -> GameObject {
        self.instances
            .get(&prefab)
            .copied()
            .unwrap_or(GameObject::INVALID)
    }

    /// Next instance after `entity` on its tag's list.
    pub fn next_instance(&self, entity: GameObject) -> GameObject {
        if entity.index() >= self.links.len() {
            return GameObject::INVALID;
        }
        self.links[entity.index()].next
    }

    fn link(&mut self, entity: GameObject, prefab: u64) {
        debug_assert!(prefab != 0);
        self.links[entity.index()].prev = GameObject::INVALID;
        if let Some(&head) = self.instances.get(&prefab) {
            self.links[head.index()].prev = entity;
            self.links[entity.index()].next = head;
        } else {
            self.links[entity.index()].next = GameObject::INVALID;
        }
        self.instances.insert(prefab, entity);
    }

    fn unlink(&mut self, entity: GameObject) {
        let link = self.links[entity.index()];
        if link.prefab == 0 {
            return;
        }
        if self.instances.get(&link.prefab) == Some(&entity) {
            if link.next.is_valid() {
                self.instances.insert(link.prefab, link.next);
            } else {
                self.instances.shift_remove(&link.prefab);
            }
        }
        if link.prev.is_valid() {
            self.links[link.prev.index()].next = link.next;
        }
        if link.next.is_valid() {
            self.links[link.next.index()].prev = link.prev;
        }
    }

    /// Unlink a destroyed entity and clear its tag.
    pub fn on_entity_destroyed(&mut self, entity: GameObject) {
        if !entity.is_valid() || entity.index() >= self.links.len() {
            return;
        }
        self.unlink(entity);
        self.links[entity.index()] = NO_LINK;
    }

    // ---- resources ---------------------------------------------------------

    /// A cached resource by path hash.
    pub fn resource(&self, hash: u32) -> Option<&PrefabResource> {
        self.resources.get(&hash)
    }

    /// The resource behind an entity's prefab tag.
    pub fn resource_for(&self, entity: GameObject) -> Option<&PrefabResource> {
        let hash = (self.get_prefab(entity) & 0xffff_ffff) as u32;
        self.resources.get(&hash)
    }

    /// Load `path` into the cache if it is not already there,
    /// draining pending file-system work first. Returns the path
    /// hash; the resource may still be not-ready when the read
    /// failed.
    pub fn ensure_resource(&mut self, path: &Path, fs: &dyn AsyncFileSystem) -> u32 {
        let hash = prefab_path_hash(path);
        if !self.resources.contains_key(&hash) {
            fs.await_idle();
            let resource = match std::fs::read(path) {
                Ok(blob) => PrefabResource {
                    path: path.to_path_buf(),
                    blob,
                    ready: true,
                },
                Err(error) => {
                    tracing::warn!(path = %path.display(), "prefab not readable: {error}");
                    PrefabResource {
                        path: path.to_path_buf(),
                        blob: Vec::new(),
                        ready: false,
                    }
                }
            };
            self.resources.insert(hash, resource);
        }
        hash
    }

    /// Drop a cached resource so the next use re-reads it.
    pub fn evict_resource(&mut self, hash: u32) {
        self.resources.shift_remove(&hash);
    }

    // ---- instantiation -----------------------------------------------------

    /// Instantiate a serialized prefab at a transform, creating its
    /// entities, links and hierarchy. Returns the root entity.
    pub fn instantiate_blob(
        &mut self,
        project: &mut Project,
        blob: &[u8],
        position: Vec3,
        rotation: Quat,
        scale: f32,
    ) -> Result<GameObject, EditorError> {
        let mut reader = BlobReader::new(blob);
        let version = reader.read_u32()?;
        if version > PrefabVersion::Last as u32 {
            tracing::error!(version, "prefab has unsupported version");
            return Err(EditorError::UnsupportedVersion(version));
        }
        let count = reader.read_u32()? as usize;
        if count == 0 {
            return Ok(GameObject::INVALID);
        }

        let mut entities = Vec::with_capacity(count);
        for _ in 0..count {
            entities.push(project.create_entity(Vec3::ZERO, Quat::IDENTITY));
        }

        struct LocalMap<'a> {
            entities: &'a [GameObject],
        }
        impl LoadGuidMap for LocalMap<'_> {
            fn entity(&self, guid: EntityGuid) -> GameObject {
                self.entities
                    .get(guid.0 as usize)
                    .copied()
                    .unwrap_or(GameObject::INVALID)
            }
        }

        let mut entity_index = 0;
        while !reader.is_at_end() && entity_index < count {
            let entity = entities[entity_index];

            let prefab = reader.read_u64()?;
            project.set_transform(entity, &Transform::new(position, rotation, scale));
            self.set_prefab(entity, prefab);

            if version > PrefabVersion::WithHierarchy as u32 {
                let parent_guid = EntityGuid(reader.read_u64()?);
                let parent = LocalMap {
                    entities: &entities,
                }
                .entity(parent_guid);
                if parent.is_valid() {
                    let local = reader.read_rigid_transform()?;
                    let local_scale = reader.read_f32()?;
                    project.set_parent(parent, entity);
                    project.set_local_transform(entity, &local.with_scale(local_scale));
                }
            }

            loop {
                let type_hash = reader.read_u32()?;
                if type_hash == 0 {
                    break;
                }
                let scene_version = reader.read_u32()?;
                let Some(component_type) = project.component_type_from_hash(type_hash) else {
                    tracing::error!(type_hash, "prefab names an unregistered component type");
                    return Err(EditorError::CorruptFile);
                };
                project.create_component(component_type, entity);
                let map = LocalMap {
                    entities: &entities,
                };
                let mut deserializer = WorldDeserializer::new(&mut reader, &map);
                project.deserialize_component(
                    &mut deserializer,
                    entity,
                    component_type,
                    scene_version,
                )?;
            }
            entity_index += 1;
        }
        Ok(entities[0])
    }

    // ---- persistence -------------------------------------------------------

    /// Write the link table, instance heads and resource paths into a
    /// blob snapshot.
    pub fn serialize(&self, blob: &mut BlobWriter) {
        blob.write_u32(self.links.len() as u32);
        for link in &self.links {
            blob.write_u64(link.prefab);
            blob.write_i32(link.prev.raw());
            blob.write_i32(link.next.raw());
        }
        blob.write_u32(self.instances.len() as u32);
        for (&prefab, &head) in &self.instances {
            blob.write_u64(prefab);
            blob.write_i32(head.raw());
        }
        blob.write_u32(self.resources.len() as u32);
        for resource in self.resources.values() {
            blob.write_str(&resource.path.to_string_lossy());
        }
    }

    /// Restore the tables written by [`PrefabSystem::serialize`],
    /// re-reading resources from disk.
    pub fn deserialize(
        &mut self,
        reader: &mut BlobReader<'_>,
        fs: &dyn AsyncFileSystem,
    ) -> Result<(), EditorError> {
        self.clear();
        let link_count = reader.read_u32()? as usize;
        for _ in 0..link_count {
            let prefab = reader.read_u64()?;
            let prev = GameObject::from_raw(reader.read_i32()?);
            let next = GameObject::from_raw(reader.read_i32()?);
            self.links.push(PrefabLink { prefab, prev, next });
        }
        let instance_count = reader.read_u32()? as usize;
        for _ in 0..instance_count {
            let prefab = reader.read_u64()?;
            let head = GameObject::from_raw(reader.read_i32()?);
            self.instances.insert(prefab, head);
        }
        let resource_count = reader.read_u32()? as usize;
        for _ in 0..resource_count {
            let path = PathBuf::from(reader.read_string()?);
            self.ensure_resource(&path, fs);
        }
        Ok(())
    }

    /// Write the directory-snapshot form: resource list, then one
    /// placement record per live root instance.
    pub fn serialize_world(&self, serializer: &mut WorldSerializer<'_>, project: &Project) {
        serializer.write_u32(self.links.len() as u32);
        for resource in self.resources.values() {
            serializer.write_str(&resource.path.to_string_lossy());
        }
        serializer.write_str("");

        for (&prefab, &head) in &self.instances {
            // Only root records (sequence number zero) are placements;
            // child records are rebuilt by instantiation.
            if prefab & 0xffff_ffff != prefab {
                continue;
            }
            let mut entity = head;
            while entity.is_valid() {
                serializer.write_u32(prefab as u32);
                serializer.write_vec3(project.position(entity));
                serializer.write_quat(project.rotation(entity));
                serializer.write_f32(project.scale(entity));
                entity = self.next_instance(entity);
            }
        }
        serializer.write_u32(0);
    }

    /// Read the directory-snapshot form, re-instantiating every
    /// placement from its resource.
    pub fn deserialize_world(
        &mut self,
        deserializer: &mut WorldDeserializer<'_, '_>,
        project: &mut Project,
        fs: &dyn AsyncFileSystem,
    ) -> Result<(), EditorError> {
        let max_index = deserializer.read_u32()? as usize;
        if max_index > 0 {
            self.reserve(GameObject::from_index(max_index - 1));
        }

        loop {
            let path = deserializer.read_string()?;
            if path.is_empty() {
                break;
            }
            self.ensure_resource(Path::new(&path), fs);
        }
        fs.await_idle();

        loop {
            let hash = deserializer.read_u32()?;
            if hash == 0 {
                break;
            }
            let position = deserializer.read_vec3()?;
            let rotation = deserializer.read_quat()?;
            let scale = deserializer.read_f32()?;
            let Some(resource) = self.resources.get(&hash) else {
                tracing::error!(hash, "placement references an unknown prefab");
                return Err(EditorError::CorruptFile);
            };
            if !resource.ready {
                tracing::warn!(path = %resource.path.display(), "skipping placement of unready prefab");
                continue;
            }
            let blob = resource.blob.clone();
            self.instantiate_blob(project, &blob, position, rotation, scale)?;
        }
        Ok(())
    }
}

impl Default for PrefabSystem {
    fn default() -> PrefabSystem {
        PrefabSystem::new()
    }
}

// ---- prefab file writing ---------------------------------------------------

fn gather_hierarchy(project: &Project, entity: GameObject, out: &mut Vec<GameObject>) {
    out.push(entity);
    let mut child = project.first_child(entity);
    while child.is_valid() {
        gather_hierarchy(project, child, out);
        child = project.next_sibling(child);
    }
}

struct SubtreeSaveMap<'a> {
    entities: &'a [GameObject],
}

impl karst_project::SaveGuidMap for SubtreeSaveMap<'_> {
    fn guid(&self, entity: GameObject) -> EntityGuid {
        match self.entities.iter().position(|&e| e == entity) {
            Some(index) => EntityGuid(index as u64),
            None => EntityGuid::INVALID,
        }
    }
}

/// Serialize the subtree under `root` as a `.fab` payload whose
/// instance tags carry `path_hash`.
pub fn serialize_prefab(project: &Project, root: GameObject, path_hash: u32) -> Vec<u8> {
    let mut entities = Vec::new();
    gather_hierarchy(project, root, &mut entities);

    let mut blob = BlobWriter::new();
    blob.write_u32(PrefabVersion::Last as u32);
    blob.write_u32(entities.len() as u32);

    for (index, &entity) in entities.iter().enumerate() {
        let map = SubtreeSaveMap {
            entities: &entities,
        };
        let mut serializer = WorldSerializer::new(&mut blob, &map);

        let tag = path_hash as u64 | ((index as u64) << 32);
        serializer.write_u64(tag);

        let parent = if index == 0 {
            GameObject::INVALID
        } else {
            project.parent(entity)
        };
        serializer.write_entity(parent);
        if parent.is_valid() {
            let local = project.local_transform(entity);
            serializer.write_rigid_transform(&local.rigid());
            serializer.write_f32(project.local_scale(entity));
        }

        for component_type in project.components(entity) {
            let entry = project
                .component_type_entry(component_type)
                .expect("present component is registered");
            let version = project
                .scene_version_of_type(component_type)
                .expect("registered type has a scene");
            let mut serializer = WorldSerializer::new(&mut blob, &map);
            serializer.write_u32(entry.name_hash);
            serializer.write_u32(version);
            project.serialize_component(&mut serializer, component_type, entity);
        }
        let mut serializer = WorldSerializer::new(&mut blob, &map);
        serializer.write_u32(0);
    }
    blob.into_bytes()
}

// ---- instantiate command ---------------------------------------------------

/// Load a prefab resource and instantiate it; undoable. The root is
/// `INVALID` when the resource was not ready at execute time.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InstantiatePrefabCommand {
    path: PathBuf,
    position: Vec3,
    rotation: Quat,
    scale: f32,
    #[serde(skip)]
    root: GameObject,
}

impl InstantiatePrefabCommand {
    /// Command instantiating the prefab at `path`.
    pub fn new(path: PathBuf, position: Vec3, rotation: Quat, scale: f32) -> InstantiatePrefabCommand {
        InstantiatePrefabCommand {
            path,
            position,
            rotation,
            scale,
            root: GameObject::INVALID,
        }
    }

    /// The instantiated root; `INVALID` before execute or when the
    /// resource was not ready.
    pub fn root(&self) -> GameObject {
        self.root
    }
}

impl EditorCommand for InstantiatePrefabCommand {
    fn type_id(&self) -> &'static str {
        "instantiate_prefab"
    }

    fn execute(&mut self, ctx: &mut EditContext<'_>) -> bool {
        self.root = GameObject::INVALID;
        let hash = ctx.prefabs.ensure_resource(&self.path, ctx.fs);
        let Some(resource) = ctx.prefabs.resource(hash) else {
            return false;
        };
        if !resource.ready {
            return false;
        }
        let blob = resource.blob.clone();
        match ctx.prefabs.instantiate_blob(
            ctx.project,
            &blob,
            self.position,
            self.rotation,
            self.scale,
        ) {
            Ok(root) => {
                self.root = root;
                if !root.is_valid() {
                    return false;
                }
                let mut subtree = Vec::new();
                gather_hierarchy(ctx.project, root, &mut subtree);
                for entity in subtree {
                    ctx.guids.create(entity);
                }
                true
            }
            Err(error) => {
                tracing::error!(path = %self.path.display(), "prefab instantiation failed: {error}");
                false
            }
        }
    }

    fn undo(&mut self, ctx: &mut EditContext<'_>) {
        if !self.root.is_valid() {
            return;
        }
        let mut subtree = Vec::new();
        gather_hierarchy(ctx.project, self.root, &mut subtree);
        for &entity in subtree.iter().rev() {
            ctx.guids.erase(entity);
            ctx.destroy_entity(entity);
        }
    }

    fn serialize(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    fn deserialize(&mut self, payload: &Value, _ctx: &mut EditContext<'_>) -> Result<(), EditorError> {
        *self = serde_json::from_value(payload.clone())?;
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_lists_are_walkable_and_unlink_cleanly() {
        let mut prefabs = PrefabSystem::new();
        let a = GameObject::from_index(0);
        let b = GameObject::from_index(1);
        let c = GameObject::from_index(2);
        prefabs.set_prefab(a, 77);
        prefabs.set_prefab(b, 77);
        prefabs.set_prefab(c, 77);

        // Newest instance becomes the head.
        let mut seen = Vec::new();
        let mut cursor = prefabs.first_instance(77);
        while cursor.is_valid() {
            seen.push(cursor);
            cursor = prefabs.next_instance(cursor);
        }
        assert_eq!(seen, vec![c, b, a]);

        prefabs.on_entity_destroyed(b);
        let mut seen = Vec::new();
        let mut cursor = prefabs.first_instance(77);
        while cursor.is_valid() {
            seen.push(cursor);
            cursor = prefabs.next_instance(cursor);
        }
        assert_eq!(seen, vec![c, a]);
        assert_eq!(prefabs.get_prefab(b), 0);
    }

    #[test]
    fn destroying_the_last_instance_removes_the_head() {
        let mut prefabs = PrefabSystem::new();
        let a = GameObject::from_index(0);
        prefabs.set_prefab(a, 5);
        prefabs.on_entity_destroyed(a);
        assert_eq!(prefabs.first_instance(5), GameObject::INVALID);
    }

    #[test]
    fn tags_of_one_family_share_the_low_hash() {
        let mut project = Project::new();
        let root = project.create_entity(Vec3::ZERO, Quat::IDENTITY);
        let child = project.create_entity(Vec3::ONE, Quat::IDENTITY);
        project.set_parent(root, child);

        let blob = serialize_prefab(&project, root, 0xabcd);
        let mut target = Project::new();
        let mut prefabs = PrefabSystem::new();
        let spawned = prefabs
            .instantiate_blob(&mut target, &blob, Vec3::ZERO, Quat::IDENTITY, 1.0)
            .expect("well-formed prefab");

        let root_tag = prefabs.get_prefab(spawned);
        let child_tag = prefabs.get_prefab(target.first_child(spawned));
        assert_eq!(root_tag & 0xffff_ffff, 0xabcd);
        assert_eq!(child_tag & 0xffff_ffff, 0xabcd);
        assert_ne!(root_tag, child_tag, "sequence numbers differ");
    }

    #[test]
    fn pre_hierarchy_versions_still_load() {
        // A flat-format prefab: no parent reference, no local
        // transform, one entity without components.
        let mut blob = BlobWriter::new();
        blob.write_u32(PrefabVersion::First as u32);
        blob.write_u32(1);
        blob.write_u64(0x1234);
        blob.write_u32(0);

        let mut project = Project::new();
        let mut prefabs = PrefabSystem::new();
        let root = prefabs
            .instantiate_blob(
                &mut project,
                blob.as_slice(),
                Vec3::new(1.0, 0.0, 0.0),
                Quat::IDENTITY,
                1.0,
            )
            .expect("old versions stay readable");
        assert!(root.is_valid());
        assert_eq!(project.position(root), Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(prefabs.get_prefab(root), 0x1234);
    }

    #[test]
    fn unsupported_versions_are_rejected() {
        let mut blob = BlobWriter::new();
        blob.write_u32(PrefabVersion::Last as u32 + 1);
        blob.write_u32(1);

        let mut project = Project::new();
        let mut prefabs = PrefabSystem::new();
        let result =
            prefabs.instantiate_blob(&mut project, blob.as_slice(), Vec3::ZERO, Quat::IDENTITY, 1.0);
        assert!(matches!(result, Err(EditorError::UnsupportedVersion(_))));
        assert_eq!(project.entity_count(), 0, "no partial state");
    }
}
