//! The directive/statement parser (C12).
//!
//! Consumes the token stream one statement at a time: a leading label
//! attaches to the next-emitted chunk; a leading directive dispatches to a
//! handler that mutates the current section/symbol table; otherwise the
//! first identifier is an instruction mnemonic and the remaining tokens
//! parse into 0-2 operands for the encoder (C5).

use std::path::Path;

use crate::chunk::{Chunk, PendingReloc, PositionedChunk, RelocKind};
use crate::dwarf::{self, FileTable};
use crate::encoder::{self, BranchForm};
use crate::error::{AsError, AsResult, SourceLocation};
use crate::expr::{self, Node};
use crate::lexer::{Directive, Lexer, TokenKind};
use crate::operand::{Immediate, ImmediateWidth, MemoryRef, Operand};
use crate::opcode;
use crate::section::{Section, SectionId, SectionTable, SectionType, StandardSections, SHF_ALLOC, SHF_EXECINSTR, SHF_WRITE};
use crate::symbol::{Binding, SymbolId, SymbolTable, SymbolType};

/// Result of a completed parse: everything the CLI driver (C13) needs to
/// hand off to relaxation, relocation, and ELF serialisation.
pub struct ParseOutput {
    pub sections: SectionTable,
    pub symtab: SymbolTable,
    pub debug_line: Option<Vec<u8>>,
}

/// A data chunk whose bytes encode a deferred two-symbol difference
/// (`.quad b - a`): resolved once every symbol has its final offset.
struct PendingDataPatch {
    section: SectionId,
    chunk_index: usize,
    node: Node,
    width: u8,
    /// Local symbol bound at this chunk's position, giving a `.` reference
    /// inside `node` a concrete offset once relaxation has settled.
    mark: SymbolId,
}

/// A `.size name, expr` directive: resolved the same way, writing into the
/// named symbol's `size` field instead of into section bytes.
struct PendingSizeExpr {
    target: SymbolId,
    node: Node,
    mark: SymbolId,
}

pub struct Parser {
    lexer: Lexer,
    symtab: SymbolTable,
    sections: SectionTable,
    standard: StandardSections,
    current: SectionId,
    pending_labels: Vec<SymbolId>,
    files: FileTable,
    pending_data: Vec<PendingDataPatch>,
    pending_sizes: Vec<PendingSizeExpr>,
    mark_counter: u32,
}

impl Parser {
    pub fn new(filename: impl AsRef<Path>, source: Vec<u8>) -> AsResult<Self> {
        let lexer = Lexer::new(filename, source)?;
        let (sections, standard) = SectionTable::with_standard_sections();
        Ok(Parser {
            lexer,
            symtab: SymbolTable::new(),
            current: standard.text,
            sections,
            standard,
            pending_labels: Vec::new(),
            files: FileTable::new(),
            pending_data: Vec::new(),
            pending_sizes: Vec::new(),
            mark_counter: 0,
        })
    }

    /// Run the full parse, leaving every section's chunk stream populated.
    /// Does not relax, relocate, or serialise — that's the driver's job.
    pub fn run(mut self) -> AsResult<ParseOutput> {
        loop {
            match self.lexer.kind().clone() {
                TokenKind::Eof => break,
                TokenKind::Eol => {
                    self.lexer.advance()?;
                }
                TokenKind::Label(name) => {
                    self.handle_label(name);
                    self.lexer.advance()?;
                }
                TokenKind::Directive(d) => {
                    self.handle_directive(d)?;
                    self.end_of_statement()?;
                }
                TokenKind::Identifier(name) => {
                    let loc = self.lexer.location();
                    self.lexer.advance()?;
                    self.parse_instruction(name, loc)?;
                    self.end_of_statement()?;
                }
                other => {
                    return Err(AsError::syntactic(
                        self.lexer.location(),
                        format!("unexpected token {:?} at start of statement", other),
                    ))
                }
            }
        }
        self.finish()
    }

    fn end_of_statement(&mut self) -> AsResult<()> {
        match self.lexer.kind() {
            TokenKind::Eol | TokenKind::Eof => Ok(()),
            other => Err(AsError::syntactic(
                self.lexer.location(),
                format!("expected end of line, found {:?}", other),
            )),
        }
    }

    fn current_section_mut(&mut self) -> &mut Section {
        self.sections.get_mut(self.current)
    }

    /// Create a fresh, unreferenceable local symbol bound to the current
    /// position, used to anchor a deferred expression at a specific point in
    /// the chunk stream (e.g. the `.` in `.size foo, . - foo`).
    fn mark_here(&mut self) -> SymbolId {
        self.mark_counter += 1;
        let name = format!(".Lmark{}", self.mark_counter);
        let id = self.symtab.get_or_add(&name);
        self.pending_labels.push(id);
        id
    }

    fn handle_label(&mut self, name: String) {
        let id = self.symtab.get_or_add(&name);
        let section = self.sections.get(self.current);
        if section.is_nobits {
            let offset = section.size();
            self.symtab.define_at(id, self.current, offset);
        } else {
            self.pending_labels.push(id);
        }
    }

    fn push_chunk(&mut self, chunk: Chunk) -> usize {
        let mut pc = PositionedChunk::new(chunk);
        pc.symbols = std::mem::take(&mut self.pending_labels);
        let section = self.current_section_mut();
        section.chunks.push(pc);
        section.chunks.len() - 1
    }

    // ---- directives ----------------------------------------------------

    fn handle_directive(&mut self, directive: Directive) -> AsResult<()> {
        let loc = self.lexer.location();
        self.lexer.advance()?;
        match directive {
            Directive::Text => self.switch_section(self.standard.text),
            Directive::Data => self.switch_section(self.standard.data),
            Directive::Bss => self.switch_section(self.standard.bss),
            Directive::Rodata => self.switch_to_named(".rodata", SectionType::ProgBits, SHF_ALLOC),
            Directive::Section => self.directive_section(loc),
            Directive::Globl => self.directive_binding(Binding::Global, loc),
            Directive::Local => self.directive_binding(Binding::Local, loc),
            Directive::Type => self.directive_type(loc),
            Directive::Size => self.directive_size(loc),
            Directive::Comm => self.directive_comm(loc),
            Directive::Align => self.directive_align(loc),
            Directive::Zero => self.directive_zero(loc),
            Directive::Byte => self.directive_data_list(1, loc),
            Directive::Word => self.directive_data_list(2, loc),
            Directive::Long => self.directive_data_list(4, loc),
            Directive::Quad => self.directive_data_list(8, loc),
            Directive::Ascii => self.directive_string(false, loc),
            Directive::StringZ => self.directive_string(true, loc),
            Directive::Uleb128 => self.directive_leb128(false, loc),
            Directive::Sleb128 => self.directive_leb128(true, loc),
            Directive::Value => self.directive_data_list(2, loc),
            Directive::File => self.directive_file(loc),
            Directive::Loc => self.directive_loc(loc),
        }
    }

    fn switch_section(&mut self, id: SectionId) -> AsResult<()> {
        self.flush_pending_labels();
        self.current = id;
        Ok(())
    }

    /// Labels with nothing following them by the time the section changes
    /// (or the file ends) still need a chunk to attach to.
    fn flush_pending_labels(&mut self) {
        if !self.pending_labels.is_empty() && !self.sections.get(self.current).is_nobits {
            self.push_chunk(Chunk::Zero { len: 0 });
        }
    }

    fn switch_to_named(&mut self, name: &str, sh_type: SectionType, flags: u64) -> AsResult<()> {
        self.flush_pending_labels();
        let id = match self.sections.lookup(name) {
            Some(id) => id,
            None => self.sections.add(Section::new(name, sh_type, flags, 1)),
        };
        self.current = id;
        Ok(())
    }

    fn directive_section(&mut self, loc: SourceLocation) -> AsResult<()> {
        let name = match self.lexer.kind().clone() {
            TokenKind::Identifier(n) => n,
            TokenKind::StringLiteral(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            other => return Err(AsError::syntactic(loc, format!("expected section name, found {:?}", other))),
        };
        self.lexer.advance()?;
        // Optional `, "flags"` — skip to end of line without modelling every letter.
        while !matches!(self.lexer.kind(), TokenKind::Eol | TokenKind::Eof) {
            self.lexer.advance()?;
        }
        let sh_type = if name == ".bss" { SectionType::NoBits } else { SectionType::ProgBits };
        let mut flags = SHF_ALLOC;
        if name.contains("text") {
            flags |= SHF_EXECINSTR;
        }
        if name.contains("data") || name.contains("bss") {
            flags |= SHF_WRITE;
        }
        self.switch_to_named(&name, sh_type, flags)
    }

    fn directive_binding(&mut self, binding: Binding, loc: SourceLocation) -> AsResult<()> {
        let name = self.expect_identifier(loc)?;
        let id = self.symtab.get_or_add(&name);
        self.symtab.get_mut(id).binding = binding;
        Ok(())
    }

    fn directive_type(&mut self, loc: SourceLocation) -> AsResult<()> {
        let name = self.expect_identifier(loc.clone())?;
        self.lexer.expect(&TokenKind::Comma)?;
        let kind = match self.lexer.kind().clone() {
            TokenKind::Identifier(k) => k,
            other => return Err(AsError::syntactic(loc, format!("expected @function/@object, found {:?}", other))),
        };
        self.lexer.advance()?;
        let sym_type = match kind.trim_start_matches('@') {
            "function" => SymbolType::Function,
            "object" => SymbolType::Object,
            _ => SymbolType::NoType,
        };
        let id = self.symtab.get_or_add(&name);
        self.symtab.get_mut(id).sym_type = sym_type;
        Ok(())
    }

    fn directive_size(&mut self, loc: SourceLocation) -> AsResult<()> {
        let name = self.expect_identifier(loc)?;
        self.lexer.expect(&TokenKind::Comma)?;
        let target = self.symtab.get_or_add(&name);
        let mark = self.mark_here();
        let node = expr::parse_expression(&mut self.lexer, &mut self.symtab)?;
        self.pending_sizes.push(PendingSizeExpr { target, node, mark });
        Ok(())
    }

    fn directive_comm(&mut self, loc: SourceLocation) -> AsResult<()> {
        let name = self.expect_identifier(loc.clone())?;
        self.lexer.expect(&TokenKind::Comma)?;
        let size_node = expr::parse_expression(&mut self.lexer, &mut self.symtab)?;
        let size = expr::evaluate_constant(&size_node, 0, &self.symtab)? as u64;
        let align = if matches!(self.lexer.kind(), TokenKind::Comma) {
            self.lexer.advance()?;
            let align_node = expr::parse_expression(&mut self.lexer, &mut self.symtab)?;
            expr::evaluate_constant(&align_node, 0, &self.symtab)? as u64
        } else {
            1
        };

        let bss = self.standard.bss;
        self.sections.get_mut(bss).align_to(align.max(1));
        let offset = {
            let section = self.sections.get_mut(bss);
            let aligned = align_up(section.size(), align.max(1));
            if aligned > section.size() {
                section.grow_nobits(aligned - section.size());
            }
            let offset = section.size();
            section.grow_nobits(size);
            offset
        };

        let id = self.symtab.get_or_add(&name);
        let sym = self.symtab.get_mut(id);
        sym.binding = Binding::Global;
        sym.sym_type = SymbolType::Object;
        sym.section = Some(bss);
        sym.value = offset;
        sym.size = size;
        let _ = loc;
        Ok(())
    }

    fn directive_align(&mut self, loc: SourceLocation) -> AsResult<()> {
        let node = expr::parse_expression(&mut self.lexer, &mut self.symtab)?;
        let align = expr::evaluate_constant(&node, 0, &self.symtab)?;
        if align <= 0 {
            return Err(AsError::semantic(loc, "alignment must be positive"));
        }
        let align = align as u64;
        self.current_section_mut().align_to(align);
        let fill = if self.current == self.standard.text { 0x90 } else { 0 };
        self.push_chunk(Chunk::Align { align, fill });
        Ok(())
    }

    fn directive_zero(&mut self, loc: SourceLocation) -> AsResult<()> {
        let node = expr::parse_expression(&mut self.lexer, &mut self.symtab)?;
        let len = expr::evaluate_constant(&node, 0, &self.symtab)?;
        if len < 0 {
            return Err(AsError::semantic(loc, "negative length in .zero/.skip"));
        }
        let len = len as u64;
        if self.sections.get(self.current).is_nobits {
            self.current_section_mut().grow_nobits(len);
        } else {
            self.push_chunk(Chunk::Zero { len });
        }
        Ok(())
    }

    fn directive_data_list(&mut self, width: u8, loc: SourceLocation) -> AsResult<()> {
        loop {
            let node = expr::parse_expression(&mut self.lexer, &mut self.symtab)?;
            self.emit_data_value(&node, width, &loc)?;
            if matches!(self.lexer.kind(), TokenKind::Comma) {
                self.lexer.advance()?;
                continue;
            }
            break;
        }
        Ok(())
    }

    fn emit_data_value(&mut self, node: &Node, width: u8, loc: &SourceLocation) -> AsResult<()> {
        match node {
            Node::Leaf(v) if v.symbol.is_none() => {
                let bytes = truncate_le(v.number, width);
                self.push_chunk(Chunk::Data { bytes, reloc: None });
                Ok(())
            }
            Node::Leaf(v) => {
                let kind = match width {
                    4 => RelocKind::Abs32,
                    8 => RelocKind::Abs64,
                    _ => {
                        return Err(AsError::semantic(
                            loc.clone(),
                            "relocations are only supported for 4- or 8-byte data directives",
                        ))
                    }
                };
                let reloc = PendingReloc {
                    symbol: v.symbol.unwrap(),
                    offset_in_chunk: 0,
                    kind,
                    addend: v.number,
                };
                self.push_chunk(Chunk::Data { bytes: vec![0; width as usize], reloc: Some(reloc) });
                Ok(())
            }
            Node::BinOp { .. } => {
                let mark = self.mark_here();
                let index = self.push_chunk(Chunk::Data { bytes: vec![0; width as usize], reloc: None });
                self.pending_data.push(PendingDataPatch {
                    section: self.current,
                    chunk_index: index,
                    node: node.clone(),
                    width,
                    mark,
                });
                Ok(())
            }
        }
    }

    fn directive_string(&mut self, nul_terminate: bool, _loc: SourceLocation) -> AsResult<()> {
        loop {
            match self.lexer.kind().clone() {
                TokenKind::StringLiteral(bytes) => {
                    let mut bytes = bytes;
                    if nul_terminate {
                        bytes.push(0);
                    }
                    self.push_chunk(Chunk::Data { bytes, reloc: None });
                    self.lexer.advance()?;
                }
                other => return Err(AsError::syntactic(self.lexer.location(), format!("expected string literal, found {:?}", other))),
            }
            if matches!(self.lexer.kind(), TokenKind::Comma) {
                self.lexer.advance()?;
                continue;
            }
            break;
        }
        Ok(())
    }

    fn directive_leb128(&mut self, signed: bool, loc: SourceLocation) -> AsResult<()> {
        loop {
            let node = expr::parse_expression(&mut self.lexer, &mut self.symtab)?;
            let value = expr::evaluate_constant(&node, 0, &self.symtab)?;
            let mut bytes = Vec::new();
            if signed {
                dwarf::encode_sleb128(value, &mut bytes);
            } else {
                dwarf::encode_uleb128(value as u64, &mut bytes);
            }
            self.push_chunk(Chunk::Data { bytes, reloc: None });
            if matches!(self.lexer.kind(), TokenKind::Comma) {
                self.lexer.advance()?;
                continue;
            }
            break;
        }
        let _ = loc;
        Ok(())
    }

    fn directive_file(&mut self, loc: SourceLocation) -> AsResult<()> {
        let index_node = expr::parse_expression(&mut self.lexer, &mut self.symtab)?;
        let index = expr::evaluate_constant(&index_node, 0, &self.symtab)? as u32;
        let name = match self.lexer.kind().clone() {
            TokenKind::StringLiteral(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            other => return Err(AsError::syntactic(loc, format!("expected filename string, found {:?}", other))),
        };
        self.lexer.advance()?;
        self.files.add_file(index, &name, &self.lexer.location())
    }

    /// `.loc` is accepted and validated — the file index must already be
    /// known — but does not drive a line-number program (see module docs).
    fn directive_loc(&mut self, loc: SourceLocation) -> AsResult<()> {
        let file_node = expr::parse_expression(&mut self.lexer, &mut self.symtab)?;
        let file = expr::evaluate_constant(&file_node, 0, &self.symtab)? as u32;
        if !self.files.has_file(file) {
            return Err(AsError::semantic(loc, format!(".loc references undeclared file index {}", file)));
        }
        // Remaining tokens (line, column, flags...) are validated lexically
        // by the expression parser but otherwise unused.
        while !matches!(self.lexer.kind(), TokenKind::Eol | TokenKind::Eof) {
            if matches!(self.lexer.kind(), TokenKind::Comma) {
                self.lexer.advance()?;
            }
            let _ = expr::parse_expression(&mut self.lexer, &mut self.symtab)?;
        }
        Ok(())
    }

    fn expect_identifier(&mut self, loc: SourceLocation) -> AsResult<String> {
        match self.lexer.kind().clone() {
            TokenKind::Identifier(n) => {
                self.lexer.advance()?;
                Ok(n)
            }
            other => Err(AsError::syntactic(loc, format!("expected identifier, found {:?}", other))),
        }
    }

    // ---- instructions ----------------------------------------------------

    fn parse_instruction(&mut self, mnemonic: String, loc: SourceLocation) -> AsResult<()> {
        let is_branch = opcode::catalogue()
            .lookup(&mnemonic)
            .is_some_and(|alias| alias.templates.iter().any(|t| t.is_branch));

        if is_branch {
            return self.parse_branch_instruction(&mnemonic, loc);
        }

        let mut operands = Vec::new();
        if !matches!(self.lexer.kind(), TokenKind::Eol | TokenKind::Eof) {
            loop {
                operands.push(self.parse_operand()?);
                if matches!(self.lexer.kind(), TokenKind::Comma) {
                    self.lexer.advance()?;
                    continue;
                }
                break;
            }
        }

        reclassify_immediate_widths(&mnemonic, &mut operands);
        let encoded = encoder::encode(&mnemonic, &operands, &loc)?;
        self.push_chunk(Chunk::Code {
            primary: encoded.bytes,
            primary_reloc: encoded.reloc,
            secondary: None,
            secondary_reloc: None,
            using_primary: true,
        });
        Ok(())
    }

    fn parse_branch_instruction(&mut self, mnemonic: &str, loc: SourceLocation) -> AsResult<()> {
        let name = match self.lexer.kind().clone() {
            TokenKind::Identifier(n) => n,
            other => return Err(AsError::syntactic(loc, format!("expected branch target, found {:?}", other))),
        };
        self.lexer.advance()?;
        let target = self.symtab.get_or_add(&name);

        let mut long = encoder::encode_branch_form(mnemonic, BranchForm::Long, &loc)?;
        long.reloc.as_mut().expect("branch form always carries a reloc").symbol = target;

        // `call` has no short encoding on x86-64 — its single template would
        // otherwise be mis-matched by the short-form search too (same opcode
        // byte range, no `is_branch` distinction between the two searches).
        let short = if mnemonic == "call" {
            None
        } else {
            encoder::encode_branch_form(mnemonic, BranchForm::Short, &loc).ok().map(|mut s| {
                s.reloc.as_mut().expect("branch form always carries a reloc").symbol = target;
                s
            })
        };

        self.push_chunk(Chunk::Code {
            primary: long.bytes,
            primary_reloc: long.reloc,
            secondary: short.as_ref().map(|s| s.bytes.clone()),
            secondary_reloc: short.and_then(|s| s.reloc),
            using_primary: true,
        });
        Ok(())
    }

    fn parse_operand(&mut self) -> AsResult<Operand> {
        match self.lexer.kind().clone() {
            TokenKind::Dollar => {
                self.lexer.advance()?;
                let node = expr::parse_expression(&mut self.lexer, &mut self.symtab)?;
                let value = expr::evaluate_constant(&node, 0, &self.symtab)?;
                Ok(Operand::Immediate(Immediate { width: infer_immediate_width(value), value }))
            }
            TokenKind::Register(r) => {
                self.lexer.advance()?;
                Ok(Operand::Register(r))
            }
            _ => self.parse_memory_operand(),
        }
    }

    fn parse_memory_operand(&mut self) -> AsResult<Operand> {
        let loc = self.lexer.location();
        let mut mem = MemoryRef { base: None, index: None, scale: 1, displacement: 0, has_displacement: false, symbol: None };

        if !matches!(self.lexer.kind(), TokenKind::LParen) {
            let node = expr::parse_expression(&mut self.lexer, &mut self.symtab)?;
            match node {
                Node::Leaf(v) => {
                    mem.displacement = v.number;
                    mem.symbol = v.symbol;
                    mem.has_displacement = true;
                }
                Node::BinOp { .. } => {
                    return Err(AsError::semantic(loc, "unsupported expression in memory operand"));
                }
            }
        }

        if matches!(self.lexer.kind(), TokenKind::LParen) {
            self.lexer.advance()?;
            if let TokenKind::Register(r) = self.lexer.kind().clone() {
                mem.base = Some(r);
                self.lexer.advance()?;
            }
            if matches!(self.lexer.kind(), TokenKind::Comma) {
                self.lexer.advance()?;
                if let TokenKind::Register(r) = self.lexer.kind().clone() {
                    mem.index = Some(r);
                    self.lexer.advance()?;
                }
                if matches!(self.lexer.kind(), TokenKind::Comma) {
                    self.lexer.advance()?;
                    if let TokenKind::Integer(n) = self.lexer.kind().clone() {
                        mem.scale = n as u8;
                        self.lexer.advance()?;
                    }
                }
            }
            self.lexer.expect(&TokenKind::RParen)?;
        } else if mem.symbol.is_none() && !mem.has_displacement {
            return Err(AsError::syntactic(loc, "expected a memory operand"));
        }

        Ok(Operand::Memory { indirect: false, mem })
    }

    // ---- finish ----------------------------------------------------------

    fn finish(mut self) -> AsResult<ParseOutput> {
        self.flush_pending_labels();

        for i in 0..self.sections.len() {
            let id = SectionId(i as u32);
            let section = self.sections.get_mut(id);
            if section.chunks.is_empty() {
                continue;
            }
            crate::relax::relax_section(&mut section.chunks, id, &mut self.symtab)?;
        }

        for patch in &self.pending_data {
            let current_offset = self.symtab.get(patch.mark).value;
            let value = expr::evaluate(&patch.node, current_offset, &self.symtab)?;
            let bytes = truncate_le(value.number, patch.width);
            let section = self.sections.get_mut(patch.section);
            if let Chunk::Data { bytes: slot, .. } = &mut section.chunks[patch.chunk_index].chunk {
                *slot = bytes;
            }
        }

        for pending in &self.pending_sizes {
            let current_offset = self.symtab.get(pending.mark).value;
            let value = expr::evaluate(&pending.node, current_offset, &self.symtab)?;
            self.symtab.get_mut(pending.target).size = value.number as u64;
        }

        let debug_line = if self.files.is_empty() { None } else { Some(self.files.build_section()) };

        Ok(ParseOutput { sections: self.sections, symtab: self.symtab, debug_line })
    }
}

fn infer_immediate_width(value: i64) -> ImmediateWidth {
    if i8::try_from(value).is_ok() {
        ImmediateWidth::Imm8
    } else if i16::try_from(value).is_ok() {
        ImmediateWidth::Imm16
    } else if i32::try_from(value).is_ok() {
        ImmediateWidth::Imm32
    } else {
        ImmediateWidth::Imm64
    }
}

/// `infer_immediate_width` only knows the literal's own signed fit, so an
/// ordinary unsigned 32-bit pattern like `0xffffffff` reads as `Imm64` even
/// though it fits the destination size fine — that would force a match
/// against `movabs`-only templates and reject `movl $0xffffffff, %eax`.
/// Once the instruction's operand size is known — from a register operand,
/// or from a size-suffixed mnemonic (`movl`, `movl ..., (%rax)`) when there
/// is no register to read it from — narrow the width against that size's
/// unsigned range instead of the value's signed-i64 fit.
fn reclassify_immediate_widths(mnemonic: &str, operands: &mut [Operand]) {
    let dest_bits = operands
        .iter()
        .find_map(|op| match op {
            Operand::Register(r) => r.class.size_bits(),
            _ => None,
        })
        .or_else(|| opcode::catalogue().lookup(mnemonic).and_then(|alias| size_mask_bits(alias.fixed_size)));
    let Some(bits) = dest_bits else { return };
    for op in operands.iter_mut() {
        if let Operand::Immediate(imm) = op {
            imm.width = narrow_immediate_width(imm.value, bits);
        }
    }
}

fn size_mask_bits(mask: u8) -> Option<u32> {
    match mask {
        opcode::SIZE8 => Some(8),
        opcode::SIZE16 => Some(16),
        opcode::SIZE32 => Some(32),
        opcode::SIZE64 => Some(64),
        _ => None,
    }
}

fn narrow_immediate_width(value: i64, dest_bits: u32) -> ImmediateWidth {
    match dest_bits {
        64 => {
            if i32::try_from(value).is_ok() {
                ImmediateWidth::Imm32
            } else {
                ImmediateWidth::Imm64
            }
        }
        32 => {
            if i32::try_from(value).is_ok() || (0..=u32::MAX as i64).contains(&value) {
                ImmediateWidth::Imm32
            } else {
                ImmediateWidth::Imm64
            }
        }
        16 => {
            if i16::try_from(value).is_ok() || (0..=u16::MAX as i64).contains(&value) {
                ImmediateWidth::Imm16
            } else if i32::try_from(value).is_ok() || (0..=u32::MAX as i64).contains(&value) {
                ImmediateWidth::Imm32
            } else {
                ImmediateWidth::Imm64
            }
        }
        8 => {
            if i8::try_from(value).is_ok() || (0..=u8::MAX as i64).contains(&value) {
                ImmediateWidth::Imm8
            } else if i16::try_from(value).is_ok() || (0..=u16::MAX as i64).contains(&value) {
                ImmediateWidth::Imm16
            } else {
                infer_immediate_width(value)
            }
        }
        _ => infer_immediate_width(value),
    }
}

fn truncate_le(value: i64, width: u8) -> Vec<u8> {
    let full = value.to_le_bytes();
    full[..width as usize].to_vec()
}

fn align_up(offset: u64, align: u64) -> u64 {
    let align = align.max(1);
    (offset + align - 1) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(src: &str) -> ParseOutput {
        Parser::new("t.s", src.as_bytes().to_vec()).unwrap().run().unwrap()
    }

    #[test]
    fn simple_instruction_encodes_into_text() {
        let out = run("add %al, %al\n");
        let text = out.sections.get(SectionId(1));
        assert_eq!(text.chunks.len(), 1);
        let (bytes, _) = text.chunks[0].chunk.active();
        assert_eq!(bytes, &[0x00, 0xc0]);
    }

    #[test]
    fn unsigned_32bit_immediate_fits_32bit_destination() {
        let out = run("movl $0xffffffff, %eax\n");
        let text = out.sections.get(SectionId(1));
        let (bytes, _) = text.chunks[0].chunk.active();
        // b8+r (mov r32, imm32) with the full unsigned 32-bit pattern, not movabs.
        assert_eq!(bytes, &[0xb8, 0xff, 0xff, 0xff, 0xff]);
    }

    #[test]
    fn unsigned_32bit_immediate_fits_32bit_memory_destination() {
        // No register operand to read a size from, so the size suffix on
        // `movl` is the only thing that can narrow the immediate's width.
        let out = run("movl $0xffffffff, (%rax)\n");
        let text = out.sections.get(SectionId(1));
        let (bytes, _) = text.chunks[0].chunk.active();
        assert_eq!(bytes, &[0xc7, 0x00, 0xff, 0xff, 0xff, 0xff]);
    }

    #[test]
    fn short_branch_relaxes_and_self_relocates() {
        let out = run("jne target\ntarget:\n  ret\n");
        let text = out.sections.get(SectionId(1));
        assert_eq!(text.chunks.len(), 2);
        let (bytes, reloc) = text.chunks[0].chunk.active();
        assert_eq!(bytes, &[0x75, 0x00]);
        assert!(reloc.is_none());
    }

    #[test]
    fn label_attaches_to_next_chunk() {
        let out = run("foo:\n  ret\n");
        let id = out.symtab.lookup("foo").unwrap();
        let text = out.sections.get(SectionId(1));
        assert!(text.chunks[0].symbols.contains(&id));
    }

    #[test]
    fn string_directive_emits_bytes_with_nul() {
        let out = run(".string \"abc\"\n");
        let text = out.sections.get(SectionId(1));
        let (bytes, _) = text.chunks[0].chunk.active();
        assert_eq!(bytes, &[b'a', b'b', b'c', 0]);
    }

    #[test]
    fn quad_literal_emits_eight_bytes() {
        let out = run(".quad -1\n");
        let text = out.sections.get(SectionId(1));
        let (bytes, _) = text.chunks[0].chunk.active();
        assert_eq!(bytes, &[0xff; 8]);
    }

    #[test]
    fn comm_allocates_in_bss() {
        let out = run(".comm counter, 8, 8\n");
        let id = out.symtab.lookup("counter").unwrap();
        let sym = out.symtab.get(id);
        assert_eq!(sym.size, 8);
        assert_eq!(sym.binding, Binding::Global);
    }

    #[test]
    fn dot_prefixed_locals_are_tracked_but_not_special_cased_here() {
        let out = run(".L1:\n  nop\n");
        assert!(out.symtab.lookup(".L1").is_some());
    }

    #[test]
    fn call_never_gets_a_short_form() {
        let out = run("call foo\nfoo:\n  ret\n");
        let text = out.sections.get(SectionId(1));
        match &text.chunks[0].chunk {
            Chunk::Code { secondary, .. } => assert!(secondary.is_none()),
            other => panic!("expected a Code chunk, got {:?}", other),
        }
    }
}
