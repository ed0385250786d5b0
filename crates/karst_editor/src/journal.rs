// SPDX-License-Identifier: MIT OR Apache-2.0
//! The command journal: undo/redo stack, grouping and replay.
//!
//! The journal owns an ordered list of commands and a cursor such
//! that everything at or before the cursor is in the "done" state.
//! Submitting while the cursor is not at the tail discards the tail.
//! `begin_group`/`end_group` sentinels bracket spans that undo and
//! redo walk atomically.

use std::collections::HashMap;
use std::path::Path;

use serde_json::Value;

use crate::commands::{
    AddArrayPropertyItemCommand, AddComponentCommand, AddEntityCommand, BeginGroupCommand,
    DestroyComponentsCommand, DestroyEntitiesCommand, EditContext, EditorCommand, EndGroupCommand,
    LocalMoveEntityCommand, MakeParentCommand, MoveEntityCommand, PasteEntityCommand,
    RemoveArrayPropertyItemCommand, ScaleEntityCommand, SetNameCommand, SetPropertyCommand,
};
use crate::error::EditorError;
use crate::prefab::InstantiatePrefabCommand;

/// Factory for one command type, used by cross-session replay.
pub type CommandCreator = fn() -> Box<dyn EditorCommand>;

fn creator<T: EditorCommand + Default + 'static>() -> Box<dyn EditorCommand> {
    Box::new(T::default())
}

/// Undo/redo journal over heap-allocated commands.
pub struct CommandJournal {
    stack: Vec<Box<dyn EditorCommand>>,
    /// Index of the last executed command, `-1` when none.
    cursor: i32,
    current_group_kind: u32,
    creators: HashMap<&'static str, CommandCreator>,
    counting: bool,
    counted: usize,
}

impl CommandJournal {
    /// A journal with every built-in command type registered for
    /// replay.
    pub fn new() -> CommandJournal {
        let mut journal = CommandJournal {
            stack: Vec::new(),
            cursor: -1,
            current_group_kind: 0,
            creators: HashMap::new(),
            counting: false,
            counted: 0,
        };
        journal.register_creator("begin_group", creator::<BeginGroupCommand>);
        journal.register_creator("end_group", creator::<EndGroupCommand>);
        journal.register_creator("add_entity", creator::<AddEntityCommand>);
        journal.register_creator("destroy_entities", creator::<DestroyEntitiesCommand>);
        journal.register_creator("add_component", creator::<AddComponentCommand>);
        journal.register_creator("destroy_components", creator::<DestroyComponentsCommand>);
        journal.register_creator("move_entity", creator::<MoveEntityCommand>);
        journal.register_creator("local_move_entity", creator::<LocalMoveEntityCommand>);
        journal.register_creator("scale_entity", creator::<ScaleEntityCommand>);
        journal.register_creator("set_name", creator::<SetNameCommand>);
        journal.register_creator("set_property", creator::<SetPropertyCommand>);
        journal.register_creator(
            "add_array_property_item",
            creator::<AddArrayPropertyItemCommand>,
        );
        journal.register_creator(
            "remove_array_property_item",
            creator::<RemoveArrayPropertyItemCommand>,
        );
        journal.register_creator("make_parent", creator::<MakeParentCommand>);
        journal.register_creator("paste_entity", creator::<PasteEntityCommand>);
        journal.register_creator("instantiate_prefab", creator::<InstantiatePrefabCommand>);
        journal
    }

    /// Register a creator for a command type id; replaces any
    /// previous registration.
    pub fn register_creator(&mut self, type_id: &'static str, create: CommandCreator) {
        self.creators.insert(type_id, create);
    }

    /// Number of recorded commands, sentinels included.
    pub fn len(&self) -> usize {
        self.stack.len()
    }

    /// Whether nothing is recorded.
    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// Whether an undo step is available.
    pub fn can_undo(&self) -> bool {
        self.cursor >= 0
    }

    /// Whether a redo step is available.
    pub fn can_redo(&self) -> bool {
        self.cursor + 1 < self.stack.len() as i32
    }

    /// Drop every recorded command.
    pub fn clear(&mut self) {
        self.stack.clear();
        self.cursor = -1;
        self.counting = false;
        self.counted = 0;
    }

    fn discard_tail(&mut self) {
        self.stack.truncate((self.cursor + 1) as usize);
    }

    /// Submit a command: try to merge it into the command at the
    /// cursor, otherwise execute and record it. Returns the recorded
    /// command (the merged-into one after a merge), or `None` when
    /// the command reported a no-op and was dropped.
    pub fn execute(
        &mut self,
        mut command: Box<dyn EditorCommand>,
        ctx: &mut EditContext<'_>,
    ) -> Option<&mut dyn EditorCommand> {
        if self.cursor >= 0 {
            let top = &mut self.stack[self.cursor as usize];
            if top.type_id() == command.type_id() && command.merge_into(top.as_mut()) {
                self.stack[self.cursor as usize].execute(ctx);
                return Some(self.stack[self.cursor as usize].as_mut());
            }
        }

        if !command.execute(ctx) {
            return None;
        }
        self.discard_tail();
        self.stack.push(command);
        self.cursor += 1;
        if self.counting {
            self.counted += 1;
        }
        Some(self.stack[self.cursor as usize].as_mut())
    }

    /// Open a command group of `kind`. Opening right after the end of
    /// a group of the same kind reopens that group instead, so
    /// repeated gizmo drags coalesce into one atomic span.
    pub fn begin_group(&mut self, kind: u32) {
        self.discard_tail();

        if self.cursor >= 0 {
            let top = &mut self.stack[self.cursor as usize];
            if top.type_id() == "end_group" {
                let same_kind = top
                    .as_any_mut()
                    .downcast_mut::<EndGroupCommand>()
                    .is_some_and(|end| end.group_kind == kind);
                if same_kind {
                    self.stack.pop();
                    self.cursor -= 1;
                    if self.counting {
                        self.counted = self.counted.saturating_sub(1);
                    }
                    self.current_group_kind = kind;
                    return;
                }
            }
        }

        self.current_group_kind = kind;
        self.stack.push(Box::new(BeginGroupCommand));
        self.cursor += 1;
        if self.counting {
            self.counted += 1;
        }
    }

    /// Close the current command group. An immediately-empty group is
    /// elided instead of leaving a sentinel pair behind.
    pub fn end_group(&mut self) {
        self.discard_tail();

        if self.cursor >= 0 && self.stack[self.cursor as usize].type_id() == "begin_group" {
            self.stack.pop();
            self.cursor -= 1;
            if self.counting {
                self.counted = self.counted.saturating_sub(1);
            }
            return;
        }

        self.stack.push(Box::new(EndGroupCommand {
            group_kind: self.current_group_kind,
        }));
        self.cursor += 1;
        if self.counting {
            self.counted += 1;
        }
    }

    /// Push an intentionally empty sentinel pair, snapping the cursor
    /// so later commands can never merge across this point. Used when
    /// entering play mode.
    pub fn snap_cursor(&mut self) {
        self.discard_tail();
        self.stack.push(Box::new(BeginGroupCommand));
        self.stack.push(Box::new(EndGroupCommand { group_kind: 0 }));
        self.cursor += 2;
    }

    /// Start counting submitted commands, including the `initial`
    /// ones already pushed. Used while play mode records commands
    /// that will be discarded on exit.
    pub fn start_counting(&mut self, initial: usize) {
        self.counting = true;
        self.counted = initial;
    }

    /// Stop counting and pop every counted command without undoing
    /// it. The project state is expected to be restored from a
    /// snapshot by the caller.
    pub fn discard_counted(&mut self) {
        for _ in 0..self.counted {
            self.stack.pop();
            self.cursor -= 1;
        }
        self.counting = false;
        self.counted = 0;
    }

    /// Undo the command at the cursor; at an `end_group` sentinel the
    /// whole group is undone atomically.
    pub fn undo(&mut self, ctx: &mut EditContext<'_>) {
        if self.cursor < 0 || self.cursor >= self.stack.len() as i32 {
            return;
        }

        if self.stack[self.cursor as usize].type_id() == "end_group" {
            self.cursor -= 1;
            while self.stack[self.cursor as usize].type_id() != "begin_group" {
                self.stack[self.cursor as usize].undo(ctx);
                self.cursor -= 1;
            }
            self.cursor -= 1;
        } else {
            self.stack[self.cursor as usize].undo(ctx);
            self.cursor -= 1;
        }
    }

    /// Redo the command after the cursor; at a `begin_group` sentinel
    /// the whole group is re-applied atomically.
    pub fn redo(&mut self, ctx: &mut EditContext<'_>) {
        if self.cursor + 1 >= self.stack.len() as i32 {
            return;
        }

        self.cursor += 1;
        if self.stack[self.cursor as usize].type_id() == "begin_group" {
            self.cursor += 1;
            while self.stack[self.cursor as usize].type_id() != "end_group" {
                self.stack[self.cursor as usize].execute(ctx);
                self.cursor += 1;
            }
        } else {
            self.stack[self.cursor as usize].execute(ctx);
        }
    }

    /// Write the whole stack as a textual command log. An empty
    /// journal writes nothing.
    pub fn save(&self, path: &Path) -> Result<(), EditorError> {
        if self.stack.is_empty() {
            return Ok(());
        }
        let mut items = Vec::with_capacity(self.stack.len());
        for command in &self.stack {
            let mut payload = match command.serialize() {
                Value::Object(map) => map,
                _ => serde_json::Map::new(),
            };
            payload.insert(
                "undo_command_type".to_owned(),
                Value::String(command.type_id().to_owned()),
            );
            items.push(Value::Object(payload));
        }
        let text = serde_json::to_string_pretty(&Value::Array(items))?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Replace the journal with the command log at `path`, executing
    /// every entry through the regular submission path. Replay stops
    /// with [`EditorError::UnknownCommand`] on an unregistered type.
    pub fn replay(&mut self, path: &Path, ctx: &mut EditContext<'_>) -> Result<(), EditorError> {
        self.clear();
        let text = std::fs::read_to_string(path)?;
        let root: Value = serde_json::from_str(&text)?;
        let Some(items) = root.as_array() else {
            return Err(EditorError::CorruptFile);
        };

        for item in items {
            let type_id = item
                .get("undo_command_type")
                .and_then(Value::as_str)
                .unwrap_or("");
            let Some(create) = self.creators.get(type_id).copied() else {
                tracing::error!(type_id, path = %path.display(), "unknown command in log");
                self.clear();
                return Err(EditorError::UnknownCommand(type_id.to_owned()));
            };
            let mut command = create();
            command.deserialize(item, ctx)?;
            ctx.fs.await_idle();
            // Sentinels replay as plain commands; they execute to
            // `true` and keep their recorded positions.
            self.execute(command, ctx);
        }
        Ok(())
    }
}

impl Default for CommandJournal {
    fn default() -> CommandJournal {
        CommandJournal::new()
    }
}
