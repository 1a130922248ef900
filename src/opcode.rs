//! The opcode catalogue (C1).
//!
//! A static table of encoding templates, built once behind a process-wide
//! `OnceLock` and never mutated afterwards — the read-only, built-once shape
//! the data model calls for.

use std::sync::OnceLock;

use hashbrown::HashMap;

/// Addressing-mode code, as used by the opcode table to constrain which
/// operand shapes a template operand will match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrMode {
    /// General-purpose register or memory.
    E,
    /// General-purpose register only (ModR/M.reg).
    G,
    /// Immediate.
    I,
    /// RIP-relative / relative branch displacement.
    J,
    /// Memory only.
    M,
    /// Register selected by the low 3 bits of the opcode byte.
    Z,
    /// x87 FPU stack register.
    St,
    /// 128-bit XMM register or memory.
    W,
    /// 128-bit XMM register (ModR/M.reg).
    V,
}

// Operand-size bitmask constants. The original source uses plain `#define`
// integer masks for operand sizes rather than a flags type; a literal port
// keeps that texture instead of reaching for a `bitflags` dependency the
// write-side crate doesn't otherwise need here.
pub const SIZE8: u8 = 0x01;
pub const SIZE16: u8 = 0x02;
pub const SIZE32: u8 = 0x04;
pub const SIZE64: u8 = 0x08;
pub const SIZE_XMM: u8 = 0x10;
pub const SIZE_ST: u8 = 0x20;

/// One operand slot of a template: its addressing mode, which sizes it
/// accepts (a bitmask of the `SIZE*` constants, 0 meaning "no size
/// restriction", e.g. for `M`), and whether a 32-bit immediate in this slot
/// rejects values with the top bit set (sign-extension safety).
#[derive(Debug, Clone, Copy)]
pub struct TemplateOperand {
    pub mode: AddrMode,
    pub sizes: u8,
    pub sign_extended: bool,
    /// True for the "uses the instruction's overall operand size" rule
    /// used to size immediates/memory operands (vs. the operand's own size).
    pub uses_op_size: bool,
    pub can_be_imm64: bool,
}

impl TemplateOperand {
    const fn new(mode: AddrMode, sizes: u8) -> Self {
        TemplateOperand {
            mode,
            sizes,
            sign_extended: false,
            uses_op_size: false,
            can_be_imm64: false,
        }
    }

    const fn sign_extended(mut self) -> Self {
        self.sign_extended = true;
        self
    }

    const fn uses_op_size(mut self) -> Self {
        self.uses_op_size = true;
        self
    }

    const fn imm64(mut self) -> Self {
        self.can_be_imm64 = true;
        self
    }
}

/// One opcode encoding template: mnemonic-independent shape plus the byte(s)
/// that select it.
#[derive(Debug, Clone)]
pub struct Template {
    pub prefix: Option<u8>,
    pub has_0f: bool,
    pub primary_opcode: u8,
    /// ModR/M.reg is fixed to this value (`/digit` extension) rather than
    /// carrying a register operand.
    pub opcode_ext: Option<u8>,
    pub needs_mod_rm: bool,
    pub op1: Option<TemplateOperand>,
    pub op2: Option<TemplateOperand>,
    /// Fixed destination-is-accumulator form (`add $imm, %eax` short encoding).
    pub accumulator: bool,
    pub is_branch: bool,
    /// Size-conversion instruction (`movzx`/`movsx`/`cltd`/...): operand size
    /// comes from the destination, not the source.
    pub is_conversion: bool,
    pub is_x87: bool,
    /// Operand size already defaults to 64 bits without a REX.W bit
    /// (`push`/`pop`): the encoder must not set REX.W just because the
    /// operand happens to be a 64-bit register.
    pub implicit_size64: bool,
}

impl Template {
    const fn plain(primary_opcode: u8) -> Self {
        Template {
            prefix: None,
            has_0f: false,
            primary_opcode,
            opcode_ext: None,
            needs_mod_rm: false,
            op1: None,
            op2: None,
            accumulator: false,
            is_branch: false,
            is_conversion: false,
            implicit_size64: false,
            is_x87: false,
        }
    }
}

/// A user-written mnemonic plus its fixed operation size (`addb` -> `add`
/// fixed to 8 bits; `add` itself has no fixed size and is derived from the
/// operands).
pub struct Alias {
    pub base_mnemonic: &'static str,
    /// 0 means "not fixed by the mnemonic" (derive from operands).
    pub fixed_size: u8,
    pub templates: Vec<Template>,
}

pub struct OpcodeCatalogue {
    aliases: HashMap<&'static str, Alias>,
}

impl OpcodeCatalogue {
    pub fn lookup(&self, mnemonic: &str) -> Option<&Alias> {
        self.aliases.get(mnemonic)
    }
}

fn reg_rm(sizes: u8) -> (TemplateOperand, TemplateOperand) {
    (
        TemplateOperand::new(AddrMode::G, sizes),
        TemplateOperand::new(AddrMode::E, sizes),
    )
}

/// Build the classic "ALU group" of eight two-operand instructions that
/// share the 0x00/0x08/.../0x38 opcode-base pattern (`add or adc sbb and sub
/// xor cmp`), plus their `/r` accumulator-immediate and `80/81/83` immediate
/// forms. Mirrors how these mnemonics are, in practice, one parameterised
/// shape in every x86-64 encoder, including the ones in this pack.
fn push_alu_group(out: &mut HashMap<&'static str, Alias>, mnemonic: &'static str, base_mnemonic: &'static str, opcode_base: u8, ext: u8) {
    let mut templates = Vec::new();

    // r/m8, r8  and  r/m32(16/64), r32(16/64)  (direction bit 0: reg->rm)
    templates.push(Template {
        needs_mod_rm: true,
        op1: Some(TemplateOperand::new(AddrMode::E, SIZE8)),
        op2: Some(TemplateOperand::new(AddrMode::G, SIZE8)),
        ..Template::plain(opcode_base)
    });
    templates.push(Template {
        needs_mod_rm: true,
        op1: Some(TemplateOperand::new(AddrMode::E, SIZE16 | SIZE32 | SIZE64)),
        op2: Some(TemplateOperand::new(AddrMode::G, SIZE16 | SIZE32 | SIZE64)),
        ..Template::plain(opcode_base + 1)
    });
    // r8, r/m8  and  r32(16/64), r/m32(16/64)  (direction bit 1: rm->reg)
    templates.push(Template {
        needs_mod_rm: true,
        op1: Some(TemplateOperand::new(AddrMode::G, SIZE8)),
        op2: Some(TemplateOperand::new(AddrMode::E, SIZE8)),
        ..Template::plain(opcode_base + 2)
    });
    templates.push(Template {
        needs_mod_rm: true,
        op1: Some(TemplateOperand::new(AddrMode::G, SIZE16 | SIZE32 | SIZE64)),
        op2: Some(TemplateOperand::new(AddrMode::E, SIZE16 | SIZE32 | SIZE64)),
        ..Template::plain(opcode_base + 3)
    });
    // AL/eAX, imm (accumulator short forms)
    templates.push(Template {
        accumulator: true,
        op1: Some(TemplateOperand::new(AddrMode::I, SIZE8)),
        ..Template::plain(opcode_base + 4)
    });
    templates.push(Template {
        accumulator: true,
        op1: Some(TemplateOperand::new(AddrMode::I, SIZE16 | SIZE32 | SIZE64).uses_op_size()),
        ..Template::plain(opcode_base + 5)
    });
    // r/m8, imm8   (0x80 /ext)
    templates.push(Template {
        needs_mod_rm: true,
        opcode_ext: Some(ext),
        op1: Some(TemplateOperand::new(AddrMode::E, SIZE8)),
        op2: Some(TemplateOperand::new(AddrMode::I, SIZE8)),
        ..Template::plain(0x80)
    });
    // r/m16/32/64, imm32 (sign extended)   (0x81 /ext)
    templates.push(Template {
        needs_mod_rm: true,
        opcode_ext: Some(ext),
        op1: Some(TemplateOperand::new(AddrMode::E, SIZE16 | SIZE32 | SIZE64)),
        op2: Some(TemplateOperand::new(AddrMode::I, SIZE16 | SIZE32 | SIZE64).uses_op_size().sign_extended()),
        ..Template::plain(0x81)
    });
    // r/m16/32/64, imm8 (sign extended)   (0x83 /ext)
    templates.push(Template {
        needs_mod_rm: true,
        opcode_ext: Some(ext),
        op1: Some(TemplateOperand::new(AddrMode::E, SIZE16 | SIZE32 | SIZE64)),
        op2: Some(TemplateOperand::new(AddrMode::I, SIZE8)),
        ..Template::plain(0x83)
    });

    out.insert(
        mnemonic,
        Alias {
            base_mnemonic,
            fixed_size: 0,
            templates,
        },
    );
}

fn push_conditional_jump(out: &mut HashMap<&'static str, Alias>, mnemonic: &'static str, cc: u8) {
    let templates = vec![
        Template {
            is_branch: true,
            op1: Some(TemplateOperand::new(AddrMode::J, 0)),
            ..Template::plain(0x70 + cc)
        },
        Template {
            is_branch: true,
            has_0f: true,
            op1: Some(TemplateOperand::new(AddrMode::J, 0)),
            ..Template::plain(0x80 + cc)
        },
    ];
    out.insert(
        mnemonic,
        Alias {
            base_mnemonic: mnemonic,
            fixed_size: 0,
            templates,
        },
    );
}

fn build_catalogue() -> OpcodeCatalogue {
    let mut aliases: HashMap<&'static str, Alias> = HashMap::new();

    push_alu_group(&mut aliases, "add", "add", 0x00, 0);
    push_alu_group(&mut aliases, "or", "or", 0x08, 1);
    push_alu_group(&mut aliases, "adc", "adc", 0x10, 2);
    push_alu_group(&mut aliases, "sbb", "sbb", 0x18, 3);
    push_alu_group(&mut aliases, "and", "and", 0x20, 4);
    push_alu_group(&mut aliases, "sub", "sub", 0x28, 5);
    push_alu_group(&mut aliases, "xor", "xor", 0x30, 6);
    push_alu_group(&mut aliases, "cmp", "cmp", 0x38, 7);

    // mov: reg<->rm (8/16/32/64), and the imm forms including the forced
    // 64-bit-immediate movabs form (B8+r, imm64).
    aliases.insert(
        "mov",
        Alias {
            base_mnemonic: "mov",
            fixed_size: 0,
            templates: vec![
                Template {
                    needs_mod_rm: true,
                    op1: Some(TemplateOperand::new(AddrMode::E, SIZE8)),
                    op2: Some(TemplateOperand::new(AddrMode::G, SIZE8)),
                    ..Template::plain(0x88)
                },
                Template {
                    needs_mod_rm: true,
                    op1: Some(TemplateOperand::new(AddrMode::E, SIZE16 | SIZE32 | SIZE64)),
                    op2: Some(TemplateOperand::new(AddrMode::G, SIZE16 | SIZE32 | SIZE64)),
                    ..Template::plain(0x89)
                },
                Template {
                    needs_mod_rm: true,
                    op1: Some(TemplateOperand::new(AddrMode::G, SIZE8)),
                    op2: Some(TemplateOperand::new(AddrMode::E, SIZE8)),
                    ..Template::plain(0x8a)
                },
                Template {
                    needs_mod_rm: true,
                    op1: Some(TemplateOperand::new(AddrMode::G, SIZE16 | SIZE32 | SIZE64)),
                    op2: Some(TemplateOperand::new(AddrMode::E, SIZE16 | SIZE32 | SIZE64)),
                    ..Template::plain(0x8b)
                },
                // mov r/m8, imm8   (C6 /0)
                Template {
                    needs_mod_rm: true,
                    opcode_ext: Some(0),
                    op1: Some(TemplateOperand::new(AddrMode::E, SIZE8)),
                    op2: Some(TemplateOperand::new(AddrMode::I, SIZE8)),
                    ..Template::plain(0xc6)
                },
                // mov r/m16/32/64, imm32   (C7 /0)
                Template {
                    needs_mod_rm: true,
                    opcode_ext: Some(0),
                    op1: Some(TemplateOperand::new(AddrMode::E, SIZE16 | SIZE32 | SIZE64)),
                    op2: Some(TemplateOperand::new(AddrMode::I, SIZE16 | SIZE32).uses_op_size()),
                    ..Template::plain(0xc7)
                },
                // mov r8, imm8   (B0+r)
                Template {
                    op1: Some(TemplateOperand::new(AddrMode::Z, SIZE8)),
                    op2: Some(TemplateOperand::new(AddrMode::I, SIZE8)),
                    ..Template::plain(0xb0)
                },
                // mov r16/32, imm16/32   (B8+r)
                Template {
                    op1: Some(TemplateOperand::new(AddrMode::Z, SIZE16 | SIZE32)),
                    op2: Some(TemplateOperand::new(AddrMode::I, SIZE16 | SIZE32).uses_op_size()),
                    ..Template::plain(0xb8)
                },
                // movabs r64, imm64   (B8+r, full 64-bit immediate — the only
                // form whose immediate may need all 8 bytes, so it wins the
                // shortest-match tie only when SIZE32 would truncate/mis-sign
                // the value; the encoder enforces that by rejecting the C7
                // form for a too-wide sign-extended immediate).
                Template {
                    op1: Some(TemplateOperand::new(AddrMode::Z, SIZE64)),
                    op2: Some(TemplateOperand::new(AddrMode::I, SIZE64).imm64()),
                    ..Template::plain(0xb8)
                },
            ],
        },
    );

    // lea r, m
    aliases.insert(
        "lea",
        Alias {
            base_mnemonic: "lea",
            fixed_size: 0,
            templates: vec![Template {
                needs_mod_rm: true,
                op1: Some(TemplateOperand::new(AddrMode::G, SIZE16 | SIZE32 | SIZE64)),
                op2: Some(TemplateOperand::new(AddrMode::M, 0)),
                ..Template::plain(0x8d)
            }],
        },
    );

    // push/pop r64 (default 64-bit operand size, no REX.W needed)
    aliases.insert(
        "push",
        Alias {
            base_mnemonic: "push",
            fixed_size: 0,
            templates: vec![Template {
                op1: Some(TemplateOperand::new(AddrMode::Z, SIZE64)),
                implicit_size64: true,
                ..Template::plain(0x50)
            }],
        },
    );
    aliases.insert(
        "pop",
        Alias {
            base_mnemonic: "pop",
            fixed_size: 0,
            templates: vec![Template {
                op1: Some(TemplateOperand::new(AddrMode::Z, SIZE64)),
                implicit_size64: true,
                ..Template::plain(0x58)
            }],
        },
    );

    // test: accumulator + r/m,r forms + r/m,imm (F6/F7 /0)
    aliases.insert(
        "test",
        Alias {
            base_mnemonic: "test",
            fixed_size: 0,
            templates: vec![
                Template {
                    needs_mod_rm: true,
                    op1: Some(TemplateOperand::new(AddrMode::E, SIZE8)),
                    op2: Some(TemplateOperand::new(AddrMode::G, SIZE8)),
                    ..Template::plain(0x84)
                },
                Template {
                    needs_mod_rm: true,
                    op1: Some(TemplateOperand::new(AddrMode::E, SIZE16 | SIZE32 | SIZE64)),
                    op2: Some(TemplateOperand::new(AddrMode::G, SIZE16 | SIZE32 | SIZE64)),
                    ..Template::plain(0x85)
                },
                Template {
                    needs_mod_rm: true,
                    opcode_ext: Some(0),
                    op1: Some(TemplateOperand::new(AddrMode::E, SIZE8)),
                    op2: Some(TemplateOperand::new(AddrMode::I, SIZE8)),
                    ..Template::plain(0xf6)
                },
                Template {
                    needs_mod_rm: true,
                    opcode_ext: Some(0),
                    op1: Some(TemplateOperand::new(AddrMode::E, SIZE16 | SIZE32 | SIZE64)),
                    op2: Some(TemplateOperand::new(AddrMode::I, SIZE16 | SIZE32).uses_op_size()),
                    ..Template::plain(0xf7)
                },
            ],
        },
    );

    // Grp3: neg/not/mul/imul/div/idiv, single-operand r/m forms (F6/F7 /ext)
    for (mnemonic, ext) in [("not", 2u8), ("neg", 3), ("mul", 4), ("imul", 5), ("div", 6), ("idiv", 7)] {
        aliases.insert(
            mnemonic,
            Alias {
                base_mnemonic: mnemonic,
                fixed_size: 0,
                templates: vec![
                    Template {
                        needs_mod_rm: true,
                        opcode_ext: Some(ext),
                        op1: Some(TemplateOperand::new(AddrMode::E, SIZE8)),
                        ..Template::plain(0xf6)
                    },
                    Template {
                        needs_mod_rm: true,
                        opcode_ext: Some(ext),
                        op1: Some(TemplateOperand::new(AddrMode::E, SIZE16 | SIZE32 | SIZE64)),
                        ..Template::plain(0xf7)
                    },
                ],
            },
        );
    }

    // Grp5: inc/dec, r/m forms (FE/FF /ext)
    for (mnemonic, ext) in [("inc", 0u8), ("dec", 1)] {
        aliases.insert(
            mnemonic,
            Alias {
                base_mnemonic: mnemonic,
                fixed_size: 0,
                templates: vec![
                    Template {
                        needs_mod_rm: true,
                        opcode_ext: Some(ext),
                        op1: Some(TemplateOperand::new(AddrMode::E, SIZE8)),
                        ..Template::plain(0xfe)
                    },
                    Template {
                        needs_mod_rm: true,
                        opcode_ext: Some(ext),
                        op1: Some(TemplateOperand::new(AddrMode::E, SIZE16 | SIZE32 | SIZE64)),
                        ..Template::plain(0xff)
                    },
                ],
            },
        );
    }

    // call/jmp near relative (branch forms: only jmp has a short encoding)
    aliases.insert(
        "jmp",
        Alias {
            base_mnemonic: "jmp",
            fixed_size: 0,
            templates: vec![
                Template {
                    is_branch: true,
                    op1: Some(TemplateOperand::new(AddrMode::J, 0)),
                    ..Template::plain(0xeb)
                },
                Template {
                    is_branch: true,
                    op1: Some(TemplateOperand::new(AddrMode::J, 0)),
                    ..Template::plain(0xe9)
                },
            ],
        },
    );
    aliases.insert(
        "call",
        Alias {
            base_mnemonic: "call",
            fixed_size: 0,
            templates: vec![Template {
                is_branch: true,
                op1: Some(TemplateOperand::new(AddrMode::J, 0)),
                ..Template::plain(0xe8)
            }],
        },
    );

    push_conditional_jump(&mut aliases, "je", 0x4);
    push_conditional_jump(&mut aliases, "jz", 0x4);
    push_conditional_jump(&mut aliases, "jne", 0x5);
    push_conditional_jump(&mut aliases, "jnz", 0x5);
    push_conditional_jump(&mut aliases, "jl", 0xc);
    push_conditional_jump(&mut aliases, "jge", 0xd);
    push_conditional_jump(&mut aliases, "jle", 0xe);
    push_conditional_jump(&mut aliases, "jg", 0xf);
    push_conditional_jump(&mut aliases, "jb", 0x2);
    push_conditional_jump(&mut aliases, "jae", 0x3);
    push_conditional_jump(&mut aliases, "jbe", 0x6);
    push_conditional_jump(&mut aliases, "ja", 0x7);
    push_conditional_jump(&mut aliases, "js", 0x8);
    push_conditional_jump(&mut aliases, "jns", 0x9);

    // Zero-operand instructions.
    aliases.insert(
        "ret",
        Alias {
            base_mnemonic: "ret",
            fixed_size: 0,
            templates: vec![Template::plain(0xc3)],
        },
    );
    aliases.insert(
        "leave",
        Alias {
            base_mnemonic: "leave",
            fixed_size: 0,
            templates: vec![Template::plain(0xc9)],
        },
    );
    aliases.insert(
        "nop",
        Alias {
            base_mnemonic: "nop",
            fixed_size: 0,
            templates: vec![Template::plain(0x90)],
        },
    );
    aliases.insert(
        "syscall",
        Alias {
            base_mnemonic: "syscall",
            fixed_size: 0,
            templates: vec![Template {
                has_0f: true,
                ..Template::plain(0x05)
            }],
        },
    );
    aliases.insert(
        "int3",
        Alias {
            base_mnemonic: "int3",
            fixed_size: 0,
            templates: vec![Template::plain(0xcc)],
        },
    );
    // cltd/cdq/cqto: sign-extend accumulator into edx:eax / rdx:rax.
    // These are size-conversion forms whose size is driven by an explicit
    // alias rather than by any register operand.
    aliases.insert(
        "cltd",
        Alias {
            base_mnemonic: "cltd",
            fixed_size: SIZE32,
            templates: vec![Template {
                is_conversion: true,
                ..Template::plain(0x99)
            }],
        },
    );
    aliases.insert(
        "cqto",
        Alias {
            base_mnemonic: "cqto",
            fixed_size: SIZE64,
            templates: vec![Template {
                is_conversion: true,
                ..Template::plain(0x99)
            }],
        },
    );
    aliases.insert(
        "cltq",
        Alias {
            base_mnemonic: "cltq",
            fixed_size: SIZE64,
            templates: vec![Template {
                is_conversion: true,
                ..Template::plain(0x98)
            }],
        },
    );

    add_size_suffixed_aliases(&mut aliases);

    OpcodeCatalogue { aliases }
}

/// GAS-style size-suffixed aliases (`addb`, `movl`, `cmpq`, ...) select the
/// same templates as their base mnemonic but fix the operation size.
fn add_size_suffixed_aliases(aliases: &mut HashMap<&'static str, Alias>) {
    let suffixed: &[(&'static str, &'static str, u8)] = &[
        ("addb", "add", SIZE8), ("addw", "add", SIZE16), ("addl", "add", SIZE32), ("addq", "add", SIZE64),
        ("subb", "sub", SIZE8), ("subw", "sub", SIZE16), ("subl", "sub", SIZE32), ("subq", "sub", SIZE64),
        ("andb", "and", SIZE8), ("andw", "and", SIZE16), ("andl", "and", SIZE32), ("andq", "and", SIZE64),
        ("orb", "or", SIZE8), ("orw", "or", SIZE16), ("orl", "or", SIZE32), ("orq", "or", SIZE64),
        ("xorb", "xor", SIZE8), ("xorw", "xor", SIZE16), ("xorl", "xor", SIZE32), ("xorq", "xor", SIZE64),
        ("cmpb", "cmp", SIZE8), ("cmpw", "cmp", SIZE16), ("cmpl", "cmp", SIZE32), ("cmpq", "cmp", SIZE64),
        ("movb", "mov", SIZE8), ("movw", "mov", SIZE16), ("movl", "mov", SIZE32), ("movq", "mov", SIZE64),
        ("testb", "test", SIZE8), ("testw", "test", SIZE16), ("testl", "test", SIZE32), ("testq", "test", SIZE64),
        ("incb", "inc", SIZE8), ("incw", "inc", SIZE16), ("incl", "inc", SIZE32), ("incq", "inc", SIZE64),
        ("decb", "dec", SIZE8), ("decw", "dec", SIZE16), ("decl", "dec", SIZE32), ("decq", "dec", SIZE64),
    ];
    for (alias_name, base, size) in suffixed {
        let templates = aliases.get(base).expect("base mnemonic registered").templates.clone();
        aliases.insert(
            alias_name,
            Alias {
                base_mnemonic: base,
                fixed_size: *size,
                templates,
            },
        );
    }
}

static CATALOGUE: OnceLock<OpcodeCatalogue> = OnceLock::new();

pub fn catalogue() -> &'static OpcodeCatalogue {
    CATALOGUE.get_or_init(build_catalogue)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mov_has_the_full_alias_set() {
        let mov = catalogue().lookup("mov").expect("mov registered");
        let opcodes: Vec<u8> = mov.templates.iter().map(|t| t.primary_opcode).collect();
        assert!(opcodes.contains(&0x88));
        assert!(opcodes.contains(&0x89));
        assert!(opcodes.contains(&0xc7));
        assert!(opcodes.contains(&0xb8));
        // Only one template carries a full imm64 immediate: movabs.
        let imm64_count = mov.templates.iter().filter(|t| t.op2.is_some_and(|op| op.can_be_imm64)).count();
        assert_eq!(imm64_count, 1);
    }

    #[test]
    fn size_suffixed_aliases_fix_a_size_and_keep_the_base_templates() {
        let movl = catalogue().lookup("movl").expect("movl registered");
        assert_eq!(movl.fixed_size, SIZE32);
        assert_eq!(movl.base_mnemonic, "mov");
        let mov = catalogue().lookup("mov").unwrap();
        assert_eq!(movl.templates.len(), mov.templates.len());
    }

    #[test]
    fn jne_has_a_short_and_a_long_branch_template() {
        let jne = catalogue().lookup("jne").expect("jne registered");
        assert_eq!(jne.templates.len(), 2);
        assert!(jne.templates.iter().all(|t| t.is_branch));
        assert!(jne.templates.iter().any(|t| t.primary_opcode == 0x75 && !t.has_0f));
        assert!(jne.templates.iter().any(|t| t.primary_opcode == 0x85 && t.has_0f));
    }

    #[test]
    fn unknown_mnemonic_is_not_registered() {
        assert!(catalogue().lookup("frobnicate").is_none());
    }

    #[test]
    fn alu_group_accumulator_form_uses_operand_size() {
        let add = catalogue().lookup("add").expect("add registered");
        let acc = add.templates.iter().find(|t| t.accumulator && t.primary_opcode == 0x05).unwrap();
        assert!(acc.op1.unwrap().uses_op_size);
    }
}
