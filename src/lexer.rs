//! The lexer (C11).
//!
//! A single-pass, line-oriented scanner over one input file. Tracks its own
//! filename/line for every token, the way the original tool's global
//! `cur_filename`/`cur_line` pair did, but as owned state on [`Lexer`]
//! instead of process globals.

use std::path::{Path, PathBuf};

use crate::error::{AsError, AsResult, SourceLocation};
use crate::operand::{RegClass, Register};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    Align,
    Ascii,
    Bss,
    Byte,
    Comm,
    Data,
    File,
    Globl,
    Local,
    Long,
    Loc,
    Quad,
    Section,
    Size,
    Sleb128,
    StringZ,
    Rodata,
    Text,
    Type,
    Uleb128,
    Value,
    Word,
    Zero,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Eof,
    Eol,
    Integer(i64),
    StringLiteral(Vec<u8>),
    /// An identifier immediately followed by `:` — a label definition.
    Label(String),
    Identifier(String),
    Directive(Directive),
    Register(Register),
    LParen,
    RParen,
    Comma,
    Plus,
    Minus,
    Star,
    Slash,
    Dollar,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub location: SourceLocation,
}

/// Scans `source` one byte at a time using `memchr` to jump between
/// newlines, matching the line-oriented nature of AT&T assembly source
/// (each statement lives on its own line).
pub struct Lexer {
    filename: PathBuf,
    bytes: Vec<u8>,
    pos: usize,
    line: u32,
    current: Token,
}

impl Lexer {
    pub fn new(filename: impl AsRef<Path>, source: Vec<u8>) -> AsResult<Self> {
        let mut lexer = Lexer {
            filename: filename.as_ref().to_path_buf(),
            bytes: source,
            pos: 0,
            line: 1,
            current: Token {
                kind: TokenKind::Eof,
                location: SourceLocation::new(filename.as_ref(), 1),
            },
        };
        lexer.advance()?;
        Ok(lexer)
    }

    pub fn kind(&self) -> &TokenKind {
        &self.current.kind
    }

    pub fn location(&self) -> SourceLocation {
        self.current.location.clone()
    }

    pub fn token(&self) -> &Token {
        &self.current
    }

    fn peek_byte(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek_byte()?;
        self.pos += 1;
        Some(b)
    }

    fn err(&self, message: impl Into<String>) -> AsError {
        AsError::lexical(self.location(), message)
    }

    pub fn expect(&mut self, expected: &TokenKind) -> AsResult<()> {
        if self.current.kind != *expected {
            return Err(AsError::syntactic(
                self.location(),
                format!("expected {:?}, found {:?}", expected, self.current.kind),
            ));
        }
        self.advance()
    }

    /// Scan and install the next token.
    pub fn advance(&mut self) -> AsResult<()> {
        loop {
            self.skip_spaces_and_comments();
            let loc = SourceLocation::new(self.filename.clone(), self.line);

            let Some(b) = self.peek_byte() else {
                self.current = Token { kind: TokenKind::Eof, location: loc };
                return Ok(());
            };

            let kind = match b {
                b'\n' => {
                    self.pos += 1;
                    self.line += 1;
                    TokenKind::Eol
                }
                b'(' => { self.pos += 1; TokenKind::LParen }
                b')' => { self.pos += 1; TokenKind::RParen }
                b',' => { self.pos += 1; TokenKind::Comma }
                b'+' => { self.pos += 1; TokenKind::Plus }
                b'*' => { self.pos += 1; TokenKind::Star }
                b'/' => { self.pos += 1; TokenKind::Slash }
                b'$' => { self.pos += 1; TokenKind::Dollar }
                b'-' => { self.pos += 1; TokenKind::Minus }
                b'%' => { self.pos += 1; self.scan_register(&loc)? }
                b'"' => self.scan_string(&loc)?,
                b'.' => self.scan_dot(&loc)?,
                b'0'..=b'9' => self.scan_number(),
                b'_' | b'@' | b'a'..=b'z' | b'A'..=b'Z' => self.scan_identifier_or_label(),
                other => return Err(self.err(format!("unexpected character {:?}", other as char))),
            };

            self.current = Token { kind, location: loc };
            return Ok(());
        }
    }

    fn skip_spaces_and_comments(&mut self) {
        loop {
            match self.peek_byte() {
                Some(b' ') | Some(b'\t') | Some(b'\r') => {
                    self.pos += 1;
                }
                Some(b'#') => {
                    while !matches!(self.peek_byte(), None | Some(b'\n')) {
                        self.pos += 1;
                    }
                }
                _ => return,
            }
        }
    }

    fn is_ident_byte(b: u8) -> bool {
        b.is_ascii_alphanumeric() || b == b'_' || b == b'.' || b == b'$' || b == b'@'
    }

    fn scan_word(&mut self) -> String {
        let start = self.pos;
        while self.peek_byte().is_some_and(Self::is_ident_byte) {
            self.pos += 1;
        }
        String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned()
    }

    fn scan_identifier_or_label(&mut self) -> TokenKind {
        let word = self.scan_word();
        if self.peek_byte() == Some(b':') {
            self.pos += 1;
            TokenKind::Label(word)
        } else {
            TokenKind::Identifier(word)
        }
    }

    fn scan_number(&mut self) -> TokenKind {
        let start = self.pos;
        if self.peek_byte() == Some(b'0') && matches!(self.bytes.get(self.pos + 1), Some(b'x') | Some(b'X')) {
            self.pos += 2;
            while self.peek_byte().is_some_and(|b| b.is_ascii_hexdigit()) {
                self.pos += 1;
            }
            let text = std::str::from_utf8(&self.bytes[start + 2..self.pos]).unwrap_or("0");
            return TokenKind::Integer(i64::from_str_radix(text, 16).unwrap_or(0));
        }
        while self.peek_byte().is_some_and(|b| b.is_ascii_digit()) {
            self.pos += 1;
        }
        let text = std::str::from_utf8(&self.bytes[start..self.pos]).unwrap_or("0");
        TokenKind::Integer(text.parse().unwrap_or(0))
    }

    fn scan_string(&mut self, loc: &SourceLocation) -> AsResult<TokenKind> {
        self.pos += 1; // opening quote
        let mut out = Vec::new();
        loop {
            match self.bump() {
                None | Some(b'\n') => {
                    return Err(AsError::lexical(loc.clone(), "unterminated string literal"))
                }
                Some(b'"') => break,
                Some(b'\\') => match self.bump() {
                    Some(b'n') => out.push(b'\n'),
                    Some(b't') => out.push(b'\t'),
                    Some(b'0') => out.push(0),
                    Some(b'\\') => out.push(b'\\'),
                    Some(b'"') => out.push(b'"'),
                    Some(other) => out.push(other),
                    None => return Err(AsError::lexical(loc.clone(), "unterminated string literal")),
                },
                Some(other) => out.push(other),
            }
        }
        Ok(TokenKind::StringLiteral(out))
    }

    fn scan_dot(&mut self, loc: &SourceLocation) -> AsResult<TokenKind> {
        let word = self.scan_word();
        let directive = match word.as_str() {
            ".align" | ".p2align" => Some(Directive::Align),
            ".ascii" => Some(Directive::Ascii),
            ".bss" => Some(Directive::Bss),
            ".byte" => Some(Directive::Byte),
            ".comm" => Some(Directive::Comm),
            ".data" => Some(Directive::Data),
            ".file" => Some(Directive::File),
            ".globl" | ".global" => Some(Directive::Globl),
            ".local" => Some(Directive::Local),
            ".long" => Some(Directive::Long),
            ".loc" => Some(Directive::Loc),
            ".quad" => Some(Directive::Quad),
            ".section" => Some(Directive::Section),
            ".size" => Some(Directive::Size),
            ".sleb128" => Some(Directive::Sleb128),
            ".string" | ".asciz" => Some(Directive::StringZ),
            ".rodata" => Some(Directive::Rodata),
            ".text" => Some(Directive::Text),
            ".type" => Some(Directive::Type),
            ".uleb128" => Some(Directive::Uleb128),
            ".value" => Some(Directive::Value),
            ".word" | ".short" => Some(Directive::Word),
            ".zero" | ".skip" => Some(Directive::Zero),
            _ => None,
        };
        if let Some(d) = directive {
            return Ok(TokenKind::Directive(d));
        }
        // Not a known directive: a dot-prefixed symbol (`.`, `.L1`, ...), or
        // a label if immediately followed by `:`.
        if self.peek_byte() == Some(b':') {
            self.pos += 1;
            return Ok(TokenKind::Label(word));
        }
        if word == "." {
            return Ok(TokenKind::Identifier(word));
        }
        if word.len() < 2 {
            return Err(AsError::lexical(loc.clone(), format!("unknown directive {:?}", word)));
        }
        Ok(TokenKind::Identifier(word))
    }

    fn scan_register(&mut self, loc: &SourceLocation) -> AsResult<TokenKind> {
        let name = self.scan_word();
        register_by_name(&name)
            .map(TokenKind::Register)
            .ok_or_else(|| AsError::lexical(loc.clone(), format!("unknown register %{}", name)))
    }
}

const GPR_NAMES_64: &[&str] = &["rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi", "r8", "r9", "r10", "r11", "r12", "r13", "r14", "r15"];
const GPR_NAMES_32: &[&str] = &["eax", "ecx", "edx", "ebx", "esp", "ebp", "esi", "edi", "r8d", "r9d", "r10d", "r11d", "r12d", "r13d", "r14d", "r15d"];
const GPR_NAMES_16: &[&str] = &["ax", "cx", "dx", "bx", "sp", "bp", "si", "di", "r8w", "r9w", "r10w", "r11w", "r12w", "r13w", "r14w", "r15w"];
const GPR_NAMES_8: &[&str] = &["al", "cl", "dl", "bl", "spl", "bpl", "sil", "dil", "r8b", "r9b", "r10b", "r11b", "r12b", "r13b", "r14b", "r15b"];
const GPR_NAMES_8_LEGACY: &[&str] = &["al", "cl", "dl", "bl", "ah", "ch", "dh", "bh"];

fn index_of(names: &[&str], name: &str) -> Option<u8> {
    names.iter().position(|n| *n == name).map(|i| i as u8)
}

/// Resolve a bare register name (without the leading `%`) to a [`Register`].
/// Legacy 8-bit high-byte names (`ah`/`ch`/`dh`/`bh`) share index 4..7 with
/// the REX-only `spl`/`bpl`/`sil`/`dil` names and are distinguished by
/// `is_alt_8bit`.
pub fn register_by_name(name: &str) -> Option<Register> {
    if name == "rip" {
        return Some(Register::new(RegClass::Rip, 0));
    }
    if let Some(i) = index_of(GPR_NAMES_64, name) {
        return Some(Register::new(RegClass::Quad, i));
    }
    if let Some(i) = index_of(GPR_NAMES_32, name) {
        return Some(Register::new(RegClass::Long, i));
    }
    if let Some(i) = index_of(GPR_NAMES_16, name) {
        return Some(Register::new(RegClass::Word, i));
    }
    if let Some(i) = index_of(GPR_NAMES_8, name) {
        return Some(Register::new(RegClass::Byte, i));
    }
    if let Some(i) = index_of(GPR_NAMES_8_LEGACY, name) {
        return Some(Register::alt8(i + 4));
    }
    if let Some(stripped) = name.strip_prefix("xmm") {
        if let Ok(i) = stripped.parse::<u8>() {
            return Some(Register::new(RegClass::Xmm, i));
        }
    }
    if let Some(stripped) = name.strip_prefix("st") {
        let idx = stripped.trim_start_matches('(').trim_end_matches(')');
        let i: u8 = if idx.is_empty() { 0 } else { idx.parse().ok()? };
        return Some(Register::new(RegClass::St, i));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        let mut lexer = Lexer::new("t.s", src.as_bytes().to_vec()).unwrap();
        let mut out = Vec::new();
        loop {
            let k = lexer.kind().clone();
            let done = matches!(k, TokenKind::Eof);
            out.push(k);
            if done {
                break;
            }
            lexer.advance().unwrap();
        }
        out
    }

    #[test]
    fn hex_and_decimal_integers() {
        assert_eq!(kinds("0x2a\n"), vec![TokenKind::Integer(42), TokenKind::Eol, TokenKind::Eof]);
        assert_eq!(kinds("42\n"), vec![TokenKind::Integer(42), TokenKind::Eol, TokenKind::Eof]);
    }

    #[test]
    fn label_vs_identifier() {
        assert_eq!(kinds("foo:\n"), vec![TokenKind::Label("foo".into()), TokenKind::Eol, TokenKind::Eof]);
        assert_eq!(kinds("foo\n"), vec![TokenKind::Identifier("foo".into()), TokenKind::Eol, TokenKind::Eof]);
    }

    #[test]
    fn known_registers_resolve_by_class() {
        assert_eq!(register_by_name("eax").unwrap(), Register::new(RegClass::Long, 0));
        assert_eq!(register_by_name("al").unwrap(), Register::new(RegClass::Byte, 0));
        assert_eq!(register_by_name("r15").unwrap(), Register::new(RegClass::Quad, 15));
        assert!(register_by_name("bogus").is_none());
    }

    #[test]
    fn alt_8bit_high_byte_names_are_flagged() {
        let ah = register_by_name("ah").unwrap();
        assert!(ah.is_alt_8bit);
        assert_eq!(ah.index, 4);
    }

    #[test]
    fn hash_comment_is_skipped_to_end_of_line() {
        assert_eq!(kinds("mov # comment\n"), vec![TokenKind::Identifier("mov".into()), TokenKind::Eol, TokenKind::Eof]);
    }

    #[test]
    fn unterminated_string_is_a_lexical_error() {
        assert!(Lexer::new("t.s", b"\"abc".to_vec()).is_err());
    }

    #[test]
    fn directive_keywords_are_recognised() {
        assert_eq!(kinds(".text\n"), vec![TokenKind::Directive(Directive::Text), TokenKind::Eol, TokenKind::Eof]);
    }
}
