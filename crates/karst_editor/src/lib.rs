// SPDX-License-Identifier: MIT OR Apache-2.0
//! World editor core for the Karst engine.
//!
//! Every mutation of the project store enters through the
//! [`WorldEditor`] façade, which wraps it in an undoable command and
//! submits it to the [`journal::CommandJournal`]. The journal executes
//! the command against the store (and the [`prefab::PrefabSystem`] for
//! prefab-aware operations), records it, and offers undo/redo,
//! grouping, merging and cross-session replay.
//!
//! Rendering, physics, asset IO and the GUI are collaborators behind
//! the [`render::RenderInterface`] and [`fs::AsyncFileSystem`] traits;
//! the core is single-threaded and every command runs to completion
//! before the next input is processed.

pub mod commands;
pub mod editor;
pub mod error;
pub mod fs;
pub mod guid;
pub mod journal;
pub mod prefab;
pub mod render;
pub mod snapshot;

#[cfg(test)]
pub(crate) mod test_util;

pub use editor::{Selection, WorldEditor, WorldEditorOptions};
pub use error::EditorError;
pub use guid::EntityGuidMap;
pub use prefab::PrefabSystem;
