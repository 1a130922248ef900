//! The relocation engine (C8).
//!
//! Ported from the original tool's `relocations.c`. Relocations are recorded
//! against a section as they're encountered (at encode time, via
//! [`crate::chunk::PendingReloc`], attached to the chunk they relocate) and
//! only turned into concrete `Elf64_Rela` entries here, once every symbol has
//! its final offset following relaxation (C7).
//!
//! `add_elf_relocations` in the original rewrites a relocation against a
//! locally-defined, non-GOT symbol to instead point at that symbol's
//! *section* symbol, folding the symbol's own offset into the addend — this
//! is what lets the linker merge sections without chasing every local label.
//! Global symbols, and anything already GOT-relative, keep their own symbol
//! table entry.

use crate::chunk::{Chunk, RelocKind};
use crate::section::{SectionId, SectionTable};
use crate::symbol::{Binding, SymbolId, SymbolTable};

/// One finalised `Elf64_Rela` entry, addressed by section; C9 serialises
/// these into each section's `.rela.*` companion.
#[derive(Debug, Clone)]
pub struct ElfRelocation {
    pub offset: u64,
    pub symbol_index: u32,
    pub reloc_type: u32,
    pub addend: i64,
}

impl RelocKind {
    /// The `R_X86_64_*` relocation type this kind lowers to.
    pub fn elf_type(self) -> u32 {
        match self {
            RelocKind::Abs64 => 1,        // R_X86_64_64
            RelocKind::Pc32 => 2,         // R_X86_64_PC32
            RelocKind::Plt32 => 4,        // R_X86_64_PLT32
            RelocKind::Abs32Signed => 11, // R_X86_64_32S
            RelocKind::Abs32 => 10,       // R_X86_64_32
            RelocKind::GotPcRel => 9,     // R_X86_64_GOTPCREL
        }
    }
}

/// Walk every section's chunk stream and resolve each [`PendingReloc`] into a
/// concrete [`ElfRelocation`], grouped by the section it applies to.
///
/// `section_symbols` maps a section to the `SymbolId` of its `STT_SECTION`
/// symbol (created while building `.symtab` in C9) so that local-symbol
/// relocations can be rewritten against it, matching `add_elf_relocations`.
pub fn collect_relocations(
    sections: &SectionTable,
    symtab: &SymbolTable,
    section_symbols: &hashbrown::HashMap<SectionId, SymbolId>,
) -> Vec<(SectionId, Vec<ElfRelocation>)> {
    let mut out = Vec::new();

    for (section_id, section) in sections.iter() {
        let sizes = crate::chunk::resolve_sizes(&section.chunks);
        let mut offset = 0u64;
        let mut entries = Vec::new();

        for (positioned, size) in section.chunks.iter().zip(sizes.iter()) {
            let (_, reloc) = positioned.chunk.active();
            if let Some(reloc) = reloc {
                entries.push(lower(reloc, offset, symtab, section_symbols));
            }
            if !matches!(positioned.chunk, Chunk::SizeExpr { .. }) {
                offset += size;
            }
        }

        if !entries.is_empty() {
            out.push((section_id, entries));
        }
    }

    out
}

fn lower(
    reloc: &crate::chunk::PendingReloc,
    chunk_offset: u64,
    symtab: &SymbolTable,
    section_symbols: &hashbrown::HashMap<SectionId, SymbolId>,
) -> ElfRelocation {
    let symbol = symtab.get(reloc.symbol);
    let rewrite_to_section = symbol.section.is_some()
        && symbol.binding == Binding::Local
        && reloc.kind != RelocKind::GotPcRel;

    let (symbol_index, addend) = if rewrite_to_section {
        let section = symbol.section.unwrap();
        let section_symbol = section_symbols
            .get(&section)
            .expect("every defined section has an STT_SECTION symtab entry");
        let section_symbol_index = symtab
            .get(*section_symbol)
            .symtab_index
            .expect("section symbol must have a symtab index by relocation time");
        (section_symbol_index, symbol.value as i64 + reloc.addend)
    } else {
        let index = symbol
            .symtab_index
            .expect("relocated symbol must have a symtab index by relocation time");
        (index, reloc.addend)
    };

    ElfRelocation {
        offset: chunk_offset + reloc.offset_in_chunk as u64,
        symbol_index,
        reloc_type: reloc.kind.elf_type(),
        addend,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elf_type_matches_standard_x86_64_constants() {
        assert_eq!(RelocKind::Abs64.elf_type(), 1);
        assert_eq!(RelocKind::Pc32.elf_type(), 2);
        assert_eq!(RelocKind::Plt32.elf_type(), 4);
        assert_eq!(RelocKind::GotPcRel.elf_type(), 9);
        assert_eq!(RelocKind::Abs32.elf_type(), 10);
        assert_eq!(RelocKind::Abs32Signed.elf_type(), 11);
    }
}
