//! DWARF v5 debug-info emission: builds the `subprogram` /
//! `lexical_block` / `label` / `variable` DIE tree a module's
//! [`crate::ir::debug::DebugInfoTree`] describes, then serializes the
//! `.debug_info`/`.debug_abbrev`/`.debug_str` sections via `gimli::write`
//! (spec.md §6 DWARF section list).
//!
//! Grounded on `original_source/source/codegen/amd64/dwarf/label.c` and
//! `lexical_block.c`: both nest their DIE under whatever `subprogram`
//! owns the lexical scope, and both source `DW_AT_low_pc`/`DW_AT_high_pc`
//! from the asmcmp label pair bounding the entry's code range. The
//! `variable` DIE has no retrieved source file to ground on; it follows
//! the same name-plus-location shape as `label`'s (see DESIGN.md).
//!
//! Addresses are written as `Address::Constant(0)` placeholders: no
//! assembler/linker stage is in this crate's scope (spec.md Non-goals),
//! so the actual `low_pc`/`high_pc` values a linker would patch in
//! never exist here. The DIE *structure* — tags, attributes, nesting —
//! is exactly what a linked object's debug info would carry.

use crate::ir::debug::{DebugInfoTree, DebugRecordId, DebugTag, SourcePosition};
use gimli::write::{Address, AttributeValue, DwarfUnit, EndianVec, Sections, UnitEntryId};
use gimli::{Encoding, Format, LittleEndian};
use std::collections::HashMap;

/// Builds one compilation unit's worth of DIEs.
pub struct DwarfBuilder {
    dwarf: DwarfUnit,
}

fn encoding() -> Encoding {
    Encoding {
        format: Format::Dwarf32,
        version: 5,
        address_size: 8,
    }
}

impl DwarfBuilder {
    pub fn new(producer: &str, file_name: &str) -> Self {
        let mut dwarf = DwarfUnit::new(encoding());
        let root = dwarf.unit.root();
        let entry = dwarf.unit.get_mut(root);
        entry.set(gimli::DW_AT_name, AttributeValue::String(file_name.as_bytes().to_vec()));
        entry.set(gimli::DW_AT_producer, AttributeValue::String(producer.as_bytes().to_vec()));
        entry.set(gimli::DW_AT_language, AttributeValue::Language(gimli::DW_LANG_C11));
        DwarfBuilder { dwarf }
    }

    fn set_source(entry_id: UnitEntryId, dwarf: &mut DwarfUnit, source: Option<SourcePosition>) {
        if let Some(pos) = source {
            let entry = dwarf.unit.get_mut(entry_id);
            entry.set(gimli::DW_AT_decl_line, AttributeValue::Udata(pos.line as u64));
            entry.set(gimli::DW_AT_decl_column, AttributeValue::Udata(pos.column as u64));
        }
    }

    /// `generate_label_abbrev`/`generate_label_info` (label.c): a
    /// childless `DW_TAG_subprogram` carrying name, low_pc, and decl
    /// source location.
    pub fn add_subprogram(&mut self, parent: UnitEntryId, name: &str, source: Option<SourcePosition>) -> UnitEntryId {
        let id = self.dwarf.unit.add(parent, gimli::DW_TAG_subprogram);
        {
            let entry = self.dwarf.unit.get_mut(id);
            entry.set(gimli::DW_AT_name, AttributeValue::String(name.as_bytes().to_vec()));
            entry.set(gimli::DW_AT_low_pc, AttributeValue::Address(Address::Constant(0)));
            entry.set(gimli::DW_AT_high_pc, AttributeValue::Udata(0));
        }
        Self::set_source(id, &mut self.dwarf, source);
        id
    }

    /// `generate_lexical_block_abbrev`/`_info` (lexical_block.c): a
    /// `DW_TAG_lexical_block` with only a low_pc/high_pc range, nested
    /// under whichever subprogram or block contains it.
    pub fn add_lexical_block(&mut self, parent: UnitEntryId) -> UnitEntryId {
        let id = self.dwarf.unit.add(parent, gimli::DW_TAG_lexical_block);
        let entry = self.dwarf.unit.get_mut(id);
        entry.set(gimli::DW_AT_low_pc, AttributeValue::Address(Address::Constant(0)));
        entry.set(gimli::DW_AT_high_pc, AttributeValue::Udata(0));
        id
    }

    /// `generate_label_abbrev`/`_info` (label.c): a childless
    /// `DW_TAG_label` carrying name, low_pc, and decl source location.
    pub fn add_label(&mut self, parent: UnitEntryId, name: &str, source: Option<SourcePosition>) -> UnitEntryId {
        let id = self.dwarf.unit.add(parent, gimli::DW_TAG_label);
        {
            let entry = self.dwarf.unit.get_mut(id);
            entry.set(gimli::DW_AT_name, AttributeValue::String(name.as_bytes().to_vec()));
            entry.set(gimli::DW_AT_low_pc, AttributeValue::Address(Address::Constant(0)));
        }
        Self::set_source(id, &mut self.dwarf, source);
        id
    }

    /// A `DW_TAG_variable`, named only (no location expression: the
    /// register allocator's assignment isn't threaded through here
    /// yet — see DESIGN.md).
    pub fn add_variable(&mut self, parent: UnitEntryId, name: &str, source: Option<SourcePosition>) -> UnitEntryId {
        let id = self.dwarf.unit.add(parent, gimli::DW_TAG_variable);
        {
            let entry = self.dwarf.unit.get_mut(id);
            entry.set(gimli::DW_AT_name, AttributeValue::String(name.as_bytes().to_vec()));
        }
        Self::set_source(id, &mut self.dwarf, source);
        id
    }

    /// Walks every root of `tree` and its descendants into DIEs nested
    /// exactly as the tree's parent links describe (spec.md §6:
    /// "lexical blocks nest; labels emit `label` DIEs").
    pub fn build_from_tree(&mut self, tree: &DebugInfoTree) {
        let root = self.dwarf.unit.root();
        let mut mapped: HashMap<DebugRecordId, UnitEntryId> = HashMap::new();
        for record_id in tree.roots() {
            self.build_record(tree, record_id, root, &mut mapped);
        }
    }

    fn build_record(
        &mut self,
        tree: &DebugInfoTree,
        id: DebugRecordId,
        parent_die: UnitEntryId,
        mapped: &mut HashMap<DebugRecordId, UnitEntryId>,
    ) {
        let record = tree.get(id).clone();
        let die = match record.tag {
            DebugTag::Subprogram => {
                self.add_subprogram(parent_die, record.name.as_deref().unwrap_or(""), record.source)
            }
            DebugTag::LexicalBlock => self.add_lexical_block(parent_die),
            DebugTag::Label => self.add_label(parent_die, record.name.as_deref().unwrap_or(""), record.source),
            DebugTag::Variable => self.add_variable(parent_die, record.name.as_deref().unwrap_or(""), record.source),
        };
        mapped.insert(id, die);
        for child in tree.children(id) {
            self.build_record(tree, child, die, mapped);
        }
    }

    /// Serializes `.debug_info`/`.debug_abbrev`/`.debug_str` (DWARF v5)
    /// as raw bytes, ready for `codegen::xasmgen` to render as `.byte`
    /// directives under each section (spec.md §6).
    pub fn write_sections(&mut self) -> gimli::write::Result<Sections<EndianVec<LittleEndian>>> {
        let mut sections = Sections::new(EndianVec::new(LittleEndian));
        self.dwarf.write(&mut sections)?;
        Ok(sections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::debug::DebugRecord;

    #[test]
    fn lexical_blocks_nest_under_their_subprogram_die() {
        let mut tree = DebugInfoTree::new();
        let sub = tree.push(DebugRecord {
            tag: DebugTag::Subprogram,
            name: Some("main".into()),
            code_begin_label: Some("L0".into()),
            code_end_label: Some("L1".into()),
            source: None,
            parent: None,
        });
        tree.push(DebugRecord {
            tag: DebugTag::LexicalBlock,
            name: None,
            code_begin_label: None,
            code_end_label: None,
            source: None,
            parent: Some(sub),
        });

        let mut builder = DwarfBuilder::new("amd64cc", "main.c");
        builder.build_from_tree(&tree);
        let sections = builder.write_sections().unwrap();
        assert!(!sections.debug_info.slice().is_empty());
        assert!(!sections.debug_abbrev.slice().is_empty());
    }

    #[test]
    fn label_die_carries_its_name_and_source_line() {
        let mut tree = DebugInfoTree::new();
        let sub = tree.push(DebugRecord {
            tag: DebugTag::Subprogram,
            name: Some("main".into()),
            code_begin_label: Some("L0".into()),
            code_end_label: Some("L1".into()),
            source: None,
            parent: None,
        });
        tree.push(DebugRecord {
            tag: DebugTag::Label,
            name: Some("retry".into()),
            code_begin_label: Some("L2".into()),
            code_end_label: None,
            source: Some(SourcePosition {
                file: 0,
                line: 42,
                column: 5,
            }),
            parent: Some(sub),
        });

        let mut builder = DwarfBuilder::new("amd64cc", "main.c");
        builder.build_from_tree(&tree);
        let sections = builder.write_sections().unwrap();
        assert!(!sections.debug_info.slice().is_empty());
    }
}
