//! The section model (C4).

use crate::chunk::PositionedChunk;

/// An identifier used to reference a section without borrowing the owning list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SectionId(pub u32);

/// ELF `sh_type` values this assembler emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionType {
    Null,
    ProgBits,
    SymTab,
    StrTab,
    Rela,
    NoBits,
}

impl SectionType {
    pub fn sh_type(self) -> u32 {
        match self {
            SectionType::Null => 0,
            SectionType::ProgBits => 1,
            SectionType::SymTab => 2,
            SectionType::StrTab => 3,
            SectionType::Rela => 4,
            SectionType::NoBits => 8,
        }
    }
}

pub const SHF_WRITE: u64 = 1;
pub const SHF_ALLOC: u64 = 2;
pub const SHF_EXECINSTR: u64 = 4;
pub const SHF_INFO_LINK: u64 = 0x40;

/// A section: a named, growable byte buffer plus ELF metadata.
///
/// `.bss` carries no bytes — its `size` grows independently of `data` (the
/// data-model invariant: "`.bss` is size-only, carries no bytes").
#[derive(Debug)]
pub struct Section {
    pub name: String,
    pub sh_type: SectionType,
    pub flags: u64,
    pub align: u64,
    data: Vec<u8>,
    /// Logical size; equals `data.len()` except for `.bss`.
    size: u64,
    pub is_nobits: bool,
    pub chunks: Vec<PositionedChunk>,
    /// The companion `.rela.*` section, created on first relocation against this one.
    pub rela_section: Option<SectionId>,
    /// Final index in the ELF section header table, assigned during serialisation.
    pub header_index: Option<u32>,
}

impl Section {
    pub fn new(name: impl Into<String>, sh_type: SectionType, flags: u64, align: u64) -> Self {
        let is_nobits = matches!(sh_type, SectionType::NoBits);
        Section {
            name: name.into(),
            sh_type,
            flags,
            align,
            data: Vec::new(),
            size: 0,
            is_nobits,
            chunks: Vec::new(),
            rela_section: None,
            header_index: None,
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Append bytes to the section buffer. Must not be called on `.bss`.
    pub fn emit(&mut self, bytes: &[u8]) {
        debug_assert!(!self.is_nobits, "cannot emit bytes into a NOBITS section");
        self.data.extend_from_slice(bytes);
        self.size = self.data.len() as u64;
    }

    /// Grow a `.bss`-like section by `n` bytes without touching `data`.
    pub fn grow_nobits(&mut self, n: u64) {
        debug_assert!(self.is_nobits);
        self.size += n;
    }

    pub fn align_to(&mut self, align: u64) {
        if align > self.align {
            self.align = align;
        }
    }
}

/// The fixed set of sections that exist from the start of assembly, in ELF
/// section-header order.
pub struct StandardSections {
    pub null: SectionId,
    pub text: SectionId,
    pub data: SectionId,
    pub bss: SectionId,
    pub symtab: SectionId,
    pub strtab: SectionId,
    pub shstrtab: SectionId,
}

#[derive(Default)]
pub struct SectionTable {
    sections: Vec<Section>,
    by_name: hashbrown::HashMap<String, SectionId>,
}

impl SectionTable {
    pub fn with_standard_sections() -> (Self, StandardSections) {
        let mut table = SectionTable::default();
        let null = table.add(Section::new("", SectionType::Null, 0, 0));
        let text = table.add(Section::new(
            ".text",
            SectionType::ProgBits,
            SHF_ALLOC | SHF_EXECINSTR,
            0x10,
        ));
        let data = table.add(Section::new(".data", SectionType::ProgBits, SHF_WRITE | SHF_ALLOC, 0x04));
        let bss = table.add(Section::new(".bss", SectionType::NoBits, SHF_WRITE | SHF_ALLOC, 0x04));
        let symtab = table.add(Section::new(".symtab", SectionType::SymTab, 0, 0x08));
        let strtab = table.add(Section::new(".strtab", SectionType::StrTab, 0, 0x01));
        let shstrtab = table.add(Section::new(".shstrtab", SectionType::StrTab, 0, 0x01));
        let standard = StandardSections {
            null,
            text,
            data,
            bss,
            symtab,
            strtab,
            shstrtab,
        };
        (table, standard)
    }

    pub fn add(&mut self, section: Section) -> SectionId {
        let id = SectionId(self.sections.len() as u32);
        self.by_name.insert(section.name.clone(), id);
        self.sections.push(section);
        id
    }

    pub fn lookup(&self, name: &str) -> Option<SectionId> {
        self.by_name.get(name).copied()
    }

    /// Return the `.rela.X` section for `section`, creating it on demand.
    pub fn rela_section_for(&mut self, section: SectionId) -> SectionId {
        if let Some(id) = self.get(section).rela_section {
            return id;
        }
        let name = format!(".rela{}", self.get(section).name);
        let id = self.add(Section::new(name, SectionType::Rela, SHF_INFO_LINK, 0x08));
        self.get_mut(section).rela_section = Some(id);
        id
    }

    pub fn get(&self, id: SectionId) -> &Section {
        &self.sections[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: SectionId) -> &mut Section {
        &mut self.sections[id.0 as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = (SectionId, &Section)> {
        self.sections
            .iter()
            .enumerate()
            .map(|(i, s)| (SectionId(i as u32), s))
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }
}
