// SPDX-License-Identifier: MIT OR Apache-2.0
//! Project store for the Karst world editor.
//!
//! A project is the live entity/component database the editor mutates:
//! dense entity slots with a recycling free list, a packed scene
//! hierarchy, name slots, and a registry that dispatches component
//! lifecycle and serialization to the scenes that own component data.
//!
//! ## Architecture
//!
//! The store never touches scene-owned memory. Scenes register
//! themselves through [`Project::add_scene`] and bind component types
//! with [`Project::register_component_type`]; presence of a component
//! on an entity is a single bit in the entity's 64-bit mask. Mutations
//! fire synchronous [`events`] delegates; listeners must not re-enter
//! the store.

pub mod entity;
pub mod events;
pub mod hash;
pub mod project;
pub mod scene;
pub mod serialize;
pub mod stream;
pub mod transform;

pub use entity::{ComponentType, EntityGuid, GameObject, SceneId, MAX_COMPONENT_TYPES};
pub use hash::name_hash;
pub use project::Project;
pub use scene::Scene;
pub use serialize::{LoadGuidMap, SaveGuidMap, WorldDeserializer, WorldSerializer};
pub use stream::{BlobReader, BlobWriter, StreamError};
pub use transform::{RigidTransform, Transform};
