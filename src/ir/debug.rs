//! Debug information: the per-function side-table and the module-level
//! hierarchical debug-info tree (spec.md §3 "Debug side-table" and "IR
//! module... debug-info entries").
//!
//! Grounded on `original_source/source/optimizer/debug.c` for the
//! side-table shape and spec.md §6's DWARF section list for the record
//! tags the hierarchical tree needs to carry.

use crate::ir::entities::{Inst, LocalVar};
use std::collections::HashMap;

/// A source location: file/line/column, matching [`crate::error::SourceLocation`]'s
/// shape but attached to IR positions rather than core-internal errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourcePosition {
    pub file: u32,
    pub line: u32,
    pub column: u32,
}

/// Per-function debug side-table: three maps keyed by instruction id
/// (spec.md §3).
#[derive(Debug, Default)]
pub struct DebugSideTable {
    source_location: HashMap<Inst, SourcePosition>,
    locals: HashMap<LocalVar, Vec<Inst>>,
    aliases: HashMap<Inst, Vec<LocalVar>>,
    cursor: Option<SourcePosition>,
}

impl DebugSideTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the position used by the next call to [`Self::on_instruction_created`]
    /// (the "listener hook" cursor in spec.md §3).
    pub fn set_cursor(&mut self, pos: SourcePosition) {
        self.cursor = Some(pos);
    }

    /// Tags a newly created instruction with the current cursor
    /// location, if one is set.
    pub fn on_instruction_created(&mut self, inst: Inst) {
        if let Some(pos) = self.cursor {
            self.source_location.insert(inst, pos);
        }
    }

    pub fn source_location(&self, inst: Inst) -> Option<SourcePosition> {
        self.source_location.get(&inst).copied()
    }

    pub fn bind_local(&mut self, local: LocalVar, alloc: Inst) {
        self.locals.entry(local).or_default().push(alloc);
        self.aliases.entry(alloc).or_default().push(local);
    }

    pub fn allocations_of(&self, local: LocalVar) -> &[Inst] {
        self.locals.get(&local).map_or(&[], |v| v.as_slice())
    }

    pub fn locals_aliasing(&self, inst: Inst) -> &[LocalVar] {
        self.aliases.get(&inst).map_or(&[], |v| v.as_slice())
    }
}

/// The tag of a module-level debug-info record, matching the DWARF DIE
/// kinds spec.md §6 names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DebugTag {
    Subprogram,
    LexicalBlock,
    Label,
    Variable,
}

/// A dense id into a [`DebugInfoTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DebugRecordId(pub u32);

#[derive(Debug, Clone)]
pub struct DebugRecord {
    pub tag: DebugTag,
    pub name: Option<String>,
    pub code_begin_label: Option<String>,
    pub code_end_label: Option<String>,
    pub source: Option<SourcePosition>,
    pub parent: Option<DebugRecordId>,
}

/// The module-level hierarchical debug-info tree: `subprogram` DIEs
/// with nested `lexical_block`/`label`/`variable` children (spec.md §6:
/// "lexical blocks nest; labels emit `label` DIEs... variables emit
/// `variable` DIEs").
#[derive(Debug, Default)]
pub struct DebugInfoTree {
    records: Vec<DebugRecord>,
}

impl DebugInfoTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: DebugRecord) -> DebugRecordId {
        let id = DebugRecordId(self.records.len() as u32);
        self.records.push(record);
        id
    }

    pub fn get(&self, id: DebugRecordId) -> &DebugRecord {
        &self.records[id.0 as usize]
    }

    pub fn children(&self, parent: DebugRecordId) -> impl Iterator<Item = DebugRecordId> + '_ {
        self.records.iter().enumerate().filter_map(move |(i, r)| {
            (r.parent == Some(parent)).then_some(DebugRecordId(i as u32))
        })
    }

    pub fn roots(&self) -> impl Iterator<Item = DebugRecordId> + '_ {
        self.records
            .iter()
            .enumerate()
            .filter_map(|(i, r)| (r.parent.is_none()).then_some(DebugRecordId(i as u32)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cranelift_entity::EntityRef;

    #[test]
    fn cursor_tags_subsequently_created_instructions() {
        let mut table = DebugSideTable::new();
        let inst = Inst::new(0);
        assert_eq!(table.source_location(inst), None);
        table.set_cursor(SourcePosition {
            file: 1,
            line: 10,
            column: 4,
        });
        table.on_instruction_created(inst);
        assert_eq!(
            table.source_location(inst),
            Some(SourcePosition {
                file: 1,
                line: 10,
                column: 4
            })
        );
    }

    #[test]
    fn lexical_blocks_nest_under_subprogram() {
        let mut tree = DebugInfoTree::new();
        let sub = tree.push(DebugRecord {
            tag: DebugTag::Subprogram,
            name: Some("main".into()),
            code_begin_label: Some("L0".into()),
            code_end_label: Some("L1".into()),
            source: None,
            parent: None,
        });
        let block = tree.push(DebugRecord {
            tag: DebugTag::LexicalBlock,
            name: None,
            code_begin_label: None,
            code_end_label: None,
            source: None,
            parent: Some(sub),
        });
        assert_eq!(tree.children(sub).collect::<Vec<_>>(), vec![block]);
        assert_eq!(tree.roots().collect::<Vec<_>>(), vec![sub]);
    }
}
