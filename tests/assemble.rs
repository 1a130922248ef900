//! End-to-end: parse a tiny program, serialise it, and check the resulting
//! object file's ELF header and section count.

use was::elf;
use was::parser::Parser;

#[test]
fn assembles_a_tiny_program_to_a_valid_elf_object() {
    let source = b"
.globl main
.text
main:
    mov $42, %eax
    ret
"
    .to_vec();

    let parsed = Parser::new("t.s", source).unwrap().run().unwrap();
    let mut symtab = parsed.symtab;
    let bytes = elf::write_object(&parsed.sections, &mut symtab);

    assert_eq!(&bytes[0..4], &[0x7f, b'E', b'L', b'F']);
    assert_eq!(bytes[4], 2); // ELFCLASS64
    let e_type = u16::from_le_bytes([bytes[16], bytes[17]]);
    assert_eq!(e_type, 1); // ET_REL

    let e_shnum = u16::from_le_bytes([bytes[60], bytes[61]]);
    assert_eq!(e_shnum as usize, parsed.sections.len());
    assert!(e_shnum >= 7); // null, .text, .data, .bss, .symtab, .strtab, .shstrtab

    let main_id = symtab.lookup("main").expect("main symbol recorded");
    assert_eq!(symtab.get(main_id).binding, was::symbol::Binding::Global);
}
