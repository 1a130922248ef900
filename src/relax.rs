//! The branch relaxer (C7).
//!
//! Ported from GNU GAS's `relax_segment` by way of the original tool's
//! `branches.c`: branch instructions start out using their long (primary)
//! encoding. Chunks are grouped into fragments, each starting at a branch
//! instruction and running up to (but not including) the next one. Frags are
//! walked repeatedly; each walk may downgrade some branches from their long
//! form to the short form once the now-closer target is within `i8` range,
//! and the bytes saved ("compression") are folded forward into every
//! not-yet-visited symbol's value. Iteration stops at a fixpoint, bounded by
//! `n^2` as a backstop against pathological inputs.

use crate::chunk::{Chunk, PositionedChunk};
use crate::error::{AsError, AsResult};
use crate::symbol::{SymbolId, SymbolTable};

struct Fragment {
    chunk_index: usize,
    offset: u64,
    /// Total size of every chunk between this fragment's branch and the next one.
    fixed_size: u64,
    /// Range into `branch_target_list` of symbols defined between this
    /// fragment's branch and the next one.
    branch_targets: Option<(usize, usize)>,
    target_symbol_is_before: bool,
}

/// Recompute every symbol's `(section, offset)` from a fresh walk over `chunks`.
fn make_symbol_offsets(chunks: &[PositionedChunk], section: crate::section::SectionId, symtab: &mut SymbolTable) {
    let mut offset = 0u64;
    for pc in chunks.iter() {
        for &sym in &pc.symbols {
            symtab.define_at(sym, section, offset);
        }
        if !matches!(pc.chunk, Chunk::SizeExpr { .. }) {
            offset += pc.chunk.size_at(offset);
        }
    }
}

fn make_fragments(
    chunks: &[PositionedChunk],
    symtab: &SymbolTable,
) -> (Vec<Fragment>, Vec<SymbolId>) {
    let mut branch_target_set = std::collections::HashSet::new();
    let mut seen_symbols = std::collections::HashSet::new();
    let mut target_is_before = vec![false; chunks.len()];

    for (i, pc) in chunks.iter().enumerate() {
        for &sym in &pc.symbols {
            seen_symbols.insert(sym);
        }
        if let Chunk::Code { secondary: Some(_), primary_reloc: Some(r), .. } = &pc.chunk {
            target_is_before[i] = seen_symbols.contains(&r.symbol);
            branch_target_set.insert(r.symbol);
        }
    }

    let mut fragments: Vec<Fragment> = Vec::new();
    let mut branch_target_list: Vec<SymbolId> = Vec::new();
    let mut offset = 0u64;

    for (i, pc) in chunks.iter().enumerate() {
        for &sym in &pc.symbols {
            if branch_target_set.contains(&sym) {
                if let Some(last) = fragments.last_mut() {
                    if last.branch_targets.is_none() {
                        last.branch_targets = Some((branch_target_list.len(), branch_target_list.len()));
                    }
                }
                branch_target_list.push(sym);
            }
        }

        if let Chunk::Code { secondary: Some(_), .. } = &pc.chunk {
            if let Some(last) = fragments.last_mut() {
                let branch_size = chunks[last.chunk_index].chunk.size_at(last.offset);
                last.fixed_size = offset - last.offset - branch_size;
            }
            fragments.push(Fragment {
                chunk_index: i,
                offset,
                fixed_size: 0,
                branch_targets: None,
                target_symbol_is_before: target_is_before[i],
            });
        }

        if !matches!(pc.chunk, Chunk::SizeExpr { .. }) {
            offset += pc.chunk.size_at(offset);
        }
    }

    // Patch up open-ended branch-target ranges by propagating the next
    // fragment's start index backwards, mirroring the original's backward pass.
    for i in (0..fragments.len()).rev() {
        if fragments[i].branch_targets.is_none() {
            let next_start = if i + 1 < fragments.len() {
                fragments[i + 1].branch_targets.map(|(s, _)| s).unwrap_or(branch_target_list.len())
            } else {
                branch_target_list.len()
            };
            fragments[i].branch_targets = Some((next_start, next_start));
        }
    }
    // Fill in each fragment's range end as the next fragment's range start.
    let starts: Vec<usize> = fragments.iter().map(|f| f.branch_targets.unwrap().0).collect();
    for i in 0..fragments.len() {
        let end = if i + 1 < fragments.len() { starts[i + 1] } else { branch_target_list.len() };
        fragments[i].branch_targets = Some((starts[i], end));
    }

    (fragments, branch_target_list)
}

/// Run the relaxation fixpoint over one section's chunk list, downgrading
/// branch chunks to their short encoding where now possible and updating
/// every symbol's final offset.
pub fn relax_section(chunks: &mut [PositionedChunk], section: crate::section::SectionId, symtab: &mut SymbolTable) -> AsResult<()> {
    make_symbol_offsets(chunks, section, symtab);

    if chunks.is_empty() {
        return Ok(());
    }

    let (fragments, branch_target_list) = make_fragments(chunks, symtab);
    if fragments.is_empty() {
        return Ok(());
    }

    let max_iterations = chunks.len() * chunks.len();
    let mut iterations = 0;
    let mut changed = true;

    while iterations < max_iterations && changed {
        changed = false;
        let mut offset = fragments[0].offset;
        let mut compression: i64 = 0;

        for frag in fragments.iter() {
            let chunk = &mut chunks[frag.chunk_index].chunk;
            if let Chunk::Code { primary, secondary: Some(secondary), primary_reloc: Some(reloc), using_primary, .. } = chunk {
                if *using_primary && symtab.get(reloc.symbol).section == Some(section) {
                    let mut symbol_offset = symtab.get(reloc.symbol).value as i64;
                    if !frag.target_symbol_is_before {
                        symbol_offset += compression;
                    }
                    // Conservative against the long form's own size (spec §4.7 step 2):
                    // `target - (offset + rel_offset + 1 + 4)`, i.e. `target - (offset + primary.len())`.
                    let relative_offset = symbol_offset - (offset as i64 + primary.len() as i64);
                    if (-128..=127).contains(&relative_offset) {
                        *using_primary = false;
                        changed = true;
                        compression += secondary.len() as i64 - primary.len() as i64;
                    }
                }
            }

            if let Some((start, end)) = frag.branch_targets {
                for &sym in &branch_target_list[start..end] {
                    let s = symtab.get_mut(sym);
                    s.value = (s.value as i64 + compression) as u64;
                }
            }

            let chunk_size = chunks[frag.chunk_index].chunk.current_size();
            offset += frag.fixed_size + chunk_size;
        }

        iterations += 1;
    }

    make_symbol_offsets(chunks, section, symtab);
    patch_branch_displacements(chunks, section, symtab)
}

/// Once relaxation has settled, a branch left on its short encoding needs its
/// real rel8 byte written in directly: ELF x86-64 has no 8-bit PC-relative
/// relocation type, so a short branch can only ever be self-relocated against
/// a target in the same section, never deferred to the linker.
fn patch_branch_displacements(chunks: &mut [PositionedChunk], section: crate::section::SectionId, symtab: &SymbolTable) -> AsResult<()> {
    let mut offset = 0u64;
    for pc in chunks.iter_mut() {
        let size = pc.chunk.size_at(offset);
        if let Chunk::Code { secondary: Some(secondary), secondary_reloc, using_primary: false, .. } = &mut pc.chunk {
            let reloc = secondary_reloc.as_ref().expect("short-form branch chunk always carries a reloc");
            let symbol = symtab.get(reloc.symbol);
            if symbol.section != Some(section) {
                return Err(AsError::plain(format!(
                    "branch to `{}` needs an 8-bit PC-relative relocation, which ELF x86-64 has no type for",
                    symbol.name
                )));
            }
            let target = symbol.value as i64;
            let relative = target - (offset as i64 + reloc.offset_in_chunk as i64 + 1);
            if !(-128..=127).contains(&relative) {
                return Err(AsError::plain(format!(
                    "branch to `{}` no longer fits in a short 8-bit displacement after relaxation",
                    symbol.name
                )));
            }
            secondary[reloc.offset_in_chunk as usize] = relative as i8 as u8;
            *secondary_reloc = None;
        }
        if !matches!(pc.chunk, Chunk::SizeExpr { .. }) {
            offset += size;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::PendingReloc;
    use crate::section::SectionId;

    fn branch_chunk(primary: Vec<u8>, secondary: Vec<u8>, target: SymbolId, primary_offset: u32, secondary_offset: u32) -> Chunk {
        Chunk::Code {
            primary,
            primary_reloc: Some(PendingReloc { symbol: target, offset_in_chunk: primary_offset, kind: crate::chunk::RelocKind::Pc32, addend: -4 }),
            secondary: Some(secondary),
            secondary_reloc: Some(PendingReloc { symbol: target, offset_in_chunk: secondary_offset, kind: crate::chunk::RelocKind::Pc32, addend: -1 }),
            using_primary: true,
        }
    }

    #[test]
    fn in_range_forward_branch_relaxes_to_short_and_self_relocates() {
        let mut symtab = SymbolTable::new();
        let target = symtab.get_or_add("target");
        let section = SectionId(1);

        let mut chunks = vec![
            PositionedChunk::new(branch_chunk(vec![0x0f, 0x85, 0, 0, 0, 0], vec![0x75, 0], target, 2, 1)),
            PositionedChunk { chunk: Chunk::Zero { len: 0 }, symbols: vec![target] },
        ];

        relax_section(&mut chunks, section, &mut symtab).unwrap();

        match &chunks[0].chunk {
            Chunk::Code { using_primary, secondary, secondary_reloc, .. } => {
                assert!(!using_primary);
                assert_eq!(secondary.as_ref().unwrap(), &[0x75, 0x00]);
                assert!(secondary_reloc.is_none());
            }
            other => panic!("expected a Code chunk, got {:?}", other),
        }
        assert_eq!(symtab.get(target).value, 2);
    }

    #[test]
    fn patch_errors_when_short_branch_target_is_in_another_section() {
        let mut symtab = SymbolTable::new();
        let target = symtab.get_or_add("elsewhere");
        symtab.define_at(target, SectionId(2), 0);

        let mut chunks = vec![PositionedChunk::new(Chunk::Code {
            primary: vec![0x0f, 0x85, 0, 0, 0, 0],
            primary_reloc: None,
            secondary: Some(vec![0x75, 0]),
            secondary_reloc: Some(PendingReloc { symbol: target, offset_in_chunk: 1, kind: crate::chunk::RelocKind::Pc32, addend: -1 }),
            using_primary: false,
        })];

        let err = patch_branch_displacements(&mut chunks, SectionId(1), &symtab);
        assert!(err.is_err());
    }
}
