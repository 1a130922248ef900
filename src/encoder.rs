//! The instruction encoder (C5).
//!
//! For a mnemonic and its AT&T-order operands, tries every template
//! registered for that mnemonic, keeps the ones whose operand shapes and
//! sizes match, and emits the smallest resulting encoding — the same
//! brute-force "generate every candidate, keep the shortest" approach the
//! original tool uses instead of a hand-picked selection rule per mnemonic.
//!
//! Branch mnemonics are handled separately by [`encode_branch_form`]: their
//! target is a symbol whose address isn't known yet, so there is no value to
//! match against a template's size — the long and short forms are built
//! directly and handed to the relaxer (C7), which picks between them.

use crate::chunk::{PendingReloc, RelocKind};
use crate::error::{AsError, AsResult, SourceLocation};
use crate::opcode::{self, AddrMode, Template};
use crate::operand::{ImmediateWidth, Operand, RegClass, Register};

pub const REX_BASE: u8 = 0b0100_0000;
pub const REX_W: u8 = 0x08;
pub const REX_R: u8 = 0x04;
pub const REX_X: u8 = 0x02;
pub const REX_B: u8 = 0x01;

/// A fully encoded instruction: bytes plus, if the instruction referenced an
/// undefined or external symbol, the relocation that must patch it in.
#[derive(Debug, Clone)]
pub struct Encoded {
    pub bytes: Vec<u8>,
    pub reloc: Option<PendingReloc>,
}

fn size_mask_of_register(class: RegClass) -> u8 {
    match class {
        RegClass::Byte => opcode::SIZE8,
        RegClass::Word => opcode::SIZE16,
        RegClass::Long => opcode::SIZE32,
        RegClass::Quad => opcode::SIZE64,
        RegClass::Xmm => opcode::SIZE_XMM,
        RegClass::St => opcode::SIZE_ST,
        RegClass::Rip => 0,
    }
}

fn size_mask_of_immediate(width: ImmediateWidth) -> u8 {
    match width {
        ImmediateWidth::Imm8 => opcode::SIZE8,
        ImmediateWidth::Imm16 => opcode::SIZE16,
        ImmediateWidth::Imm32 => opcode::SIZE32,
        ImmediateWidth::Imm64 => opcode::SIZE64,
    }
}

fn width_bytes(mask: u8) -> u8 {
    match mask {
        opcode::SIZE8 => 1,
        opcode::SIZE16 => 2,
        opcode::SIZE32 => 4,
        opcode::SIZE64 => 8,
        _ => 4,
    }
}

/// Narrow the operand size to whichever register/immediate width is
/// actually present, preferring an explicit mnemonic suffix when there is one.
fn operation_size(fixed_size: u8, operands: &[Operand]) -> u8 {
    if fixed_size != 0 {
        return fixed_size;
    }
    for op in operands {
        if let Operand::Register(r) = op {
            if let Some(bits) = r.class.size_bits() {
                return match bits {
                    8 => opcode::SIZE8,
                    16 => opcode::SIZE16,
                    32 => opcode::SIZE32,
                    64 => opcode::SIZE64,
                    _ => opcode::SIZE32,
                };
            }
        }
    }
    opcode::SIZE32
}

fn operand_matches(tmpl_op: &crate::opcode::TemplateOperand, _size: u8, operand: &Operand) -> bool {
    match tmpl_op.mode {
        AddrMode::G | AddrMode::Z => {
            matches!(operand, Operand::Register(r) if tmpl_op.sizes == 0 || size_mask_of_register(r.class) & tmpl_op.sizes != 0)
        }
        AddrMode::E => {
            matches!(operand, Operand::Register(r) if tmpl_op.sizes == 0 || size_mask_of_register(r.class) & tmpl_op.sizes != 0)
                || operand.is_memory()
        }
        AddrMode::M => operand.is_memory(),
        AddrMode::I => match operand {
            Operand::Immediate(imm) => {
                let op_size = size_mask_of_immediate(imm.width);
                let alt = if imm.width == ImmediateWidth::Imm8 { opcode::SIZE16 } else { 0 };
                let size_ok = tmpl_op.sizes & op_size != 0 || (alt != 0 && tmpl_op.sizes & alt != 0);
                size_ok && !(tmpl_op.sign_extended && imm.value > i32::MAX as i64)
            }
            _ => false,
        },
        AddrMode::J | AddrMode::St | AddrMode::W | AddrMode::V => false,
    }
}

/// Intermediate description of how a matched template lays out its ModR/M,
/// SIB, displacement, and trailing immediate/memory field.
struct Layout {
    size: u8,
    rex_w: bool,
    reg: u8,
    rm: u8,
    index: u8,
    has_mod_rm: bool,
    mode: u8,
    has_sib: bool,
    scale: u8,
    sib_index: u8,
    sib_base: u8,
    has_displacement: bool,
    displacement: i64,
    displacement_size: u8,
    imm_value: i64,
    imm_size: u8,
    has_imm: bool,
    reloc: Option<PendingReloc>,
    opcode_low3: u8,
    /// Set when any register operand is one of the REX-only 8-bit names
    /// (`spl`/`bpl`/`sil`/`dil`) — these share an index with the legacy
    /// `ah`/`ch`/`dh`/`bh` encodings, so a REX prefix (even an otherwise
    /// empty one) is the only way to select the REX-only meaning.
    force_rex: bool,
}

impl Layout {
    fn empty() -> Self {
        Layout {
            size: opcode::SIZE32,
            rex_w: false,
            reg: 0,
            rm: 0,
            index: 0,
            has_mod_rm: false,
            mode: 0,
            has_sib: false,
            scale: 0,
            sib_index: 4,
            sib_base: 0,
            has_displacement: false,
            displacement: 0,
            displacement_size: 0,
            imm_value: 0,
            imm_size: 0,
            has_imm: false,
            reloc: None,
            opcode_low3: 0,
            force_rex: false,
        }
    }

    fn needs_rex(&self) -> bool {
        self.rex_w || self.reg >= 8 || self.rm >= 8 || self.index >= 8 || self.force_rex
    }

    fn note_register(&mut self, r: Register) {
        if r.is_alt_8bit {
            self.force_rex = true;
        }
    }

    fn byte_len(&self, template: &Template) -> usize {
        (self.size == opcode::SIZE16) as usize
            + self.needs_rex() as usize
            + template.prefix.is_some() as usize
            + template.has_0f as usize
            + 1 // primary opcode
            + self.has_mod_rm as usize
            + self.has_sib as usize
            + self.displacement_size as usize
            + self.imm_size as usize
    }
}

/// Build the ModR/M `mod`/`rm`/SIB fields for a memory operand, applying the
/// RSP/R12 forced-SIB and RBP/R13 forced-8-bit-zero-displacement rules.
fn encode_memory(layout: &mut Layout, mem: &crate::operand::MemoryRef) {
    let base_index = mem.base.map(|r| r.index).unwrap_or(5);
    let is_rip = mem.base.is_some_and(|r| matches!(r.class, RegClass::Rip));

    if is_rip {
        layout.rm = 5;
        layout.mode = 0b00;
        layout.has_displacement = true;
        layout.displacement = mem.displacement;
        layout.displacement_size = opcode::SIZE32;
        return;
    }

    let low3 = base_index & 7;

    if low3 == 4 {
        // RSP / R12: always needs a SIB byte.
        layout.has_sib = true;
        layout.rm = 4;
        if mem.has_sib() {
            layout.scale = mem.scale;
            layout.sib_index = mem.index.unwrap().index;
            layout.sib_base = base_index;
        } else {
            layout.sib_index = 4;
            layout.sib_base = base_index;
        }
        if mem.has_displacement {
            set_displacement(layout, mem.displacement);
        }
    } else if low3 == 5 {
        // RBP / R13: needs an explicit displacement, even if zero.
        if mem.has_sib() {
            layout.rm = 4;
            layout.has_sib = true;
            layout.scale = mem.scale;
            layout.sib_index = mem.index.unwrap().index;
            layout.sib_base = base_index;
        } else {
            layout.rm = base_index;
        }
        if mem.has_displacement {
            set_displacement(layout, mem.displacement);
        } else {
            layout.has_displacement = true;
            layout.mode = 0b01;
            layout.displacement_size = opcode::SIZE8;
            layout.displacement = 0;
        }
    } else {
        layout.rm = base_index;
        if mem.has_sib() {
            layout.has_sib = true;
            layout.rm = 4;
            layout.scale = mem.scale;
            layout.sib_index = mem.index.unwrap().index;
            layout.sib_base = base_index;
        }
        if mem.has_displacement {
            set_displacement(layout, mem.displacement);
        }
    }
}

fn set_displacement(layout: &mut Layout, value: i64) {
    layout.has_displacement = true;
    layout.displacement = value;
    layout.displacement_size = if (-128..=127).contains(&value) { opcode::SIZE8 } else { opcode::SIZE32 };
    layout.mode = if layout.displacement_size == opcode::SIZE8 { 0b01 } else { 0b10 };
}

/// Attempt to build a [`Layout`] for `template` against `operands` (AT&T
/// order: `operands[0]` is the source, `operands[1]` the destination).
/// Template slots follow the opposite convention (`op1` = destination-ish
/// ModR/M role, `op2` = source-ish role) since that is how each opcode byte
/// fixes which field is `reg` and which is `rm`.
fn try_template(template: &Template, fixed_size: u8, operands: &[Operand]) -> Option<Layout> {
    let size = operation_size(fixed_size, operands);
    let mut layout = Layout::empty();
    layout.size = size;
    layout.rex_w = size == opcode::SIZE64 && !template.implicit_size64;

    match (operands.len(), &template.op1, &template.op2, template.accumulator) {
        (0, None, None, false) => {}

        (1, Some(op1), None, false) => {
            if !operand_matches(op1, size, &operands[0]) {
                return None;
            }
            match &operands[0] {
                Operand::Register(r) => {
                    layout.note_register(*r);
                    if template.opcode_ext.is_some() {
                        layout.rm = r.index;
                        layout.reg = template.opcode_ext.unwrap();
                        layout.has_mod_rm = true;
                        layout.mode = 0b11;
                    } else if matches!(op1.mode, AddrMode::Z) {
                        layout.opcode_low3 = r.index & 7;
                        layout.rex_w = layout.rex_w || r.is_extended();
                        if r.is_extended() {
                            layout.rm = r.index; // contributes to REX.B via needs_rex check below
                        }
                    } else {
                        layout.reg = r.index;
                        layout.has_mod_rm = true;
                        layout.mode = 0b11;
                        layout.rm = r.index;
                    }
                }
                Operand::Memory { mem, .. } => {
                    layout.has_mod_rm = true;
                    if let Some(ext) = template.opcode_ext {
                        layout.reg = ext;
                    }
                    encode_memory(&mut layout, mem);
                    if let Some(sym) = mem.symbol {
                        layout.reloc = Some(PendingReloc {
                            symbol: sym,
                            offset_in_chunk: 0,
                            kind: RelocKind::Pc32,
                            addend: mem.displacement,
                        });
                    }
                }
                Operand::Immediate(_) => return None,
            }
        }

        (2, Some(op1_dest), Some(op2_src), false) => {
            // `op1` binds to the AT&T destination (operands[1]), `op2` to the source (operands[0]).
            if !operand_matches(op2_src, size, &operands[0]) || !operand_matches(op1_dest, size, &operands[1]) {
                return None;
            }
            layout.has_mod_rm = true;

            // Whichever of the pair is `G`/`Z` fills ModR/M.reg; whichever is `E`/`M` fills rm.
            let reg_side: &Operand = if matches!(op1_dest.mode, AddrMode::G) { &operands[1] } else { &operands[0] };
            let rm_side: &Operand = if matches!(op1_dest.mode, AddrMode::E | AddrMode::M) { &operands[1] } else { &operands[0] };

            if let Operand::Register(r) = reg_side {
                layout.reg = r.index;
                layout.note_register(*r);
            }

            match rm_side {
                Operand::Register(r) => {
                    layout.mode = 0b11;
                    layout.rm = r.index;
                    layout.note_register(*r);
                }
                Operand::Memory { mem, .. } => {
                    encode_memory(&mut layout, mem);
                    if let Some(sym) = mem.symbol {
                        layout.reloc = Some(PendingReloc {
                            symbol: sym,
                            offset_in_chunk: 0,
                            kind: RelocKind::Pc32,
                            addend: mem.displacement,
                        });
                    }
                }
                Operand::Immediate(_) => {}
            }

            // mov r, imm (B0+r / B8+r): the destination register's low bits
            // fold into the opcode instead of a ModR/M byte.
            if matches!(op1_dest.mode, AddrMode::Z) {
                layout.has_mod_rm = false;
                if let Operand::Register(r) = &operands[1] {
                    layout.opcode_low3 = r.index & 7;
                    layout.rex_w = layout.rex_w || r.is_extended();
                    layout.rm = r.index;
                    layout.note_register(*r);
                }
            }

            if let Operand::Immediate(imm) = &operands[0] {
                layout.has_imm = true;
                layout.imm_value = imm.value;
                layout.imm_size = if op2_src.uses_op_size {
                    if size == opcode::SIZE64 && !op2_src.can_be_imm64 { opcode::SIZE32 } else { size }
                } else {
                    size_mask_of_immediate(imm.width)
                };
            }
        }

        (2, Some(imm_op), None, true) => {
            // Accumulator form: operands[1] must be the bare accumulator register.
            let dest_ok = matches!(&operands[1], Operand::Register(r) if r.index == 0 && size_mask_of_register(r.class) == size);
            if !dest_ok || !operand_matches(imm_op, size, &operands[0]) {
                return None;
            }
            if let Operand::Immediate(imm) = &operands[0] {
                layout.has_imm = true;
                layout.imm_value = imm.value;
                layout.imm_size = if imm_op.uses_op_size {
                    if size == opcode::SIZE64 { opcode::SIZE32 } else { size }
                } else {
                    size_mask_of_immediate(imm.width)
                };
            }
        }

        _ => return None,
    }

    Some(layout)
}

fn emit(template: &Template, layout: &Layout) -> Encoded {
    let mut bytes = Vec::new();
    if layout.size == opcode::SIZE16 {
        bytes.push(0x66);
    }

    if layout.needs_rex() {
        let rex_b = if layout.has_sib && layout.sib_base != 4 { layout.sib_base } else { layout.rm };
        let byte = REX_BASE
            | (REX_W * layout.rex_w as u8)
            | (REX_B * ((rex_b >> 3) & 1))
            | (REX_R * ((layout.reg >> 3) & 1))
            | (REX_X * ((layout.index >> 3) & 1));
        bytes.push(byte);
    }
    if let Some(p) = template.prefix {
        bytes.push(p);
    }
    if template.has_0f {
        bytes.push(0x0f);
    }
    bytes.push(template.primary_opcode + layout.opcode_low3);
    if layout.has_mod_rm {
        bytes.push((layout.mode << 6) | ((layout.reg & 7) << 3) | (layout.rm & 7));
    }
    if layout.has_sib {
        bytes.push(((layout.scale & 3) << 6) | ((layout.sib_index & 7) << 3) | (layout.sib_base & 7));
    }
    let mut reloc = layout.reloc.clone();
    if layout.has_displacement {
        if let Some(r) = reloc.as_mut() {
            r.offset_in_chunk = bytes.len() as u32;
        }
        push_sized(&mut bytes, layout.displacement, layout.displacement_size);
    }
    if layout.has_imm {
        push_sized(&mut bytes, layout.imm_value, layout.imm_size);
    }

    Encoded { bytes, reloc }
}

fn push_sized(bytes: &mut Vec<u8>, value: i64, size: u8) {
    match size {
        opcode::SIZE8 => bytes.push(value as u8),
        opcode::SIZE16 => bytes.extend_from_slice(&(value as i16).to_le_bytes()),
        opcode::SIZE32 => bytes.extend_from_slice(&(value as i32).to_le_bytes()),
        opcode::SIZE64 => bytes.extend_from_slice(&value.to_le_bytes()),
        _ => bytes.extend_from_slice(&(value as i32).to_le_bytes()),
    }
}

/// Encode a non-branch instruction, trying every template registered for
/// `mnemonic` and keeping whichever produces the fewest bytes.
pub fn encode(mnemonic: &str, operands: &[Operand], location: &SourceLocation) -> AsResult<Encoded> {
    let alias = opcode::catalogue()
        .lookup(mnemonic)
        .ok_or_else(|| AsError::semantic(location.clone(), format!("unknown instruction `{}`", mnemonic)))?;

    let mut best: Option<(Layout, &Template)> = None;
    for template in &alias.templates {
        if template.is_branch {
            continue;
        }
        if let Some(layout) = try_template(template, alias.fixed_size, operands) {
            let size = layout.byte_len(template);
            if best.as_ref().is_none_or(|(l, t)| size < l.byte_len(t)) {
                best = Some((layout, template));
            }
        }
    }

    let (layout, template) = best.ok_or_else(|| {
        AsError::semantic(location.clone(), format!("no encoding found for `{}` with the given operands", mnemonic))
    })?;

    Ok(emit(template, &layout))
}

pub enum BranchForm {
    Short,
    Long,
}

/// Encode a branch's long or short form directly — its target's final
/// address is not known yet, so there is nothing to size-match against; the
/// relaxer (C7) is what chooses between the two results.
pub fn encode_branch_form(mnemonic: &str, form: BranchForm, location: &SourceLocation) -> AsResult<Encoded> {
    let alias = opcode::catalogue()
        .lookup(mnemonic)
        .ok_or_else(|| AsError::semantic(location.clone(), format!("unknown instruction `{}`", mnemonic)))?;

    let template = match form {
        BranchForm::Short => alias.templates.iter().find(|t| t.is_branch && !t.has_0f && t.primary_opcode != 0xe9),
        BranchForm::Long => alias.templates.iter().find(|t| t.is_branch && (t.has_0f || t.primary_opcode == 0xe9 || t.primary_opcode == 0xe8)),
    };
    let template = template.ok_or_else(|| {
        AsError::semantic(location.clone(), format!("`{}` has no {} form", mnemonic, match form { BranchForm::Short => "short", BranchForm::Long => "long" }))
    })?;

    let disp_size = if matches!(form, BranchForm::Short) { opcode::SIZE8 } else { opcode::SIZE32 };
    let mut bytes = Vec::new();
    if template.has_0f {
        bytes.push(0x0f);
    }
    bytes.push(template.primary_opcode);
    let offset_in_chunk = bytes.len() as u32;
    push_sized(&mut bytes, 0, disp_size);

    Ok(Encoded {
        bytes,
        reloc: Some(PendingReloc {
            symbol: crate::symbol::SymbolId(u32::MAX), // filled in by the caller, which knows the target symbol
            offset_in_chunk,
            kind: RelocKind::Pc32,
            addend: if matches!(form, BranchForm::Short) { -1 } else { -4 },
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceLocation;
    use crate::operand::Immediate;

    fn loc() -> SourceLocation {
        SourceLocation::new("t.s", 1)
    }

    fn reg(class: RegClass, index: u8) -> Operand {
        Operand::Register(Register { class, index, is_alt_8bit: false })
    }

    fn imm(width: ImmediateWidth, value: i64) -> Operand {
        Operand::Immediate(Immediate { width, value })
    }

    #[test]
    fn add_al_al_encodes_to_two_bytes() {
        let encoded = encode("add", &[reg(RegClass::Byte, 0), reg(RegClass::Byte, 0)], &loc()).unwrap();
        assert_eq!(encoded.bytes, vec![0x00, 0xc0]);
        assert!(encoded.reloc.is_none());
    }

    #[test]
    fn mov_imm_to_eax_uses_b8_with_imm32() {
        let encoded = encode("mov", &[imm(ImmediateWidth::Imm32, 42), reg(RegClass::Long, 0)], &loc()).unwrap();
        assert_eq!(encoded.bytes, vec![0xb8, 42, 0, 0, 0]);
    }

    #[test]
    fn mov_imm64_to_rax_requires_rex_w_movabs() {
        let encoded = encode("mov", &[imm(ImmediateWidth::Imm64, 0x1122334455), reg(RegClass::Quad, 0)], &loc()).unwrap();
        assert_eq!(encoded.bytes[0], REX_BASE | REX_W);
        assert_eq!(encoded.bytes[1], 0xb8);
        assert_eq!(encoded.bytes.len(), 10);
    }

    #[test]
    fn ret_has_no_operands() {
        let encoded = encode("ret", &[], &loc()).unwrap();
        assert_eq!(encoded.bytes, vec![0xc3]);
    }

    #[test]
    fn jne_short_form_is_two_bytes_with_pc32_reloc_placeholder() {
        let encoded = encode_branch_form("jne", BranchForm::Short, &loc()).unwrap();
        assert_eq!(encoded.bytes, vec![0x75, 0x00]);
        let reloc = encoded.reloc.unwrap();
        assert_eq!(reloc.offset_in_chunk, 1);
        assert_eq!(reloc.addend, -1);
    }

    #[test]
    fn jne_long_form_is_six_bytes() {
        let encoded = encode_branch_form("jne", BranchForm::Long, &loc()).unwrap();
        assert_eq!(encoded.bytes[0], 0x0f);
        assert_eq!(encoded.bytes[1], 0x85);
        assert_eq!(encoded.bytes.len(), 6);
    }

    #[test]
    fn unknown_mnemonic_is_a_semantic_error() {
        assert!(encode("nope", &[], &loc()).is_err());
    }
}
