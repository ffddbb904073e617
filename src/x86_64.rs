//! x86-64 instruction encoding.
//!
//! One method per instruction form, appending opcode, REX prefix, and
//! operand bytes to the output buffer. Targets the System V AMD64 calling
//! convention. Relative jump and call displacements are routed through the
//! relocation engine so that targets may be labeled after the reference.

use std::fmt;

use log::debug;

use crate::buffer::CodeBuf;
use crate::error::AsmError;
use crate::memory::Executable;
use crate::reloc::{Placeholder, RelocTable};

/// x86-64 general-purpose registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Reg {
    Rax = 0,  // Return value
    Rcx = 1,  // 4th argument
    Rdx = 2,  // 3rd argument
    Rbx = 3,  // Callee-saved
    Rsp = 4,  // Stack pointer
    Rbp = 5,  // Frame pointer (callee-saved)
    Rsi = 6,  // 2nd argument
    Rdi = 7,  // 1st argument
    R8 = 8,   // 5th argument
    R9 = 9,   // 6th argument
    R10 = 10, // Caller-saved
    R11 = 11, // Caller-saved
    R12 = 12, // Callee-saved
    R13 = 13, // Callee-saved
    R14 = 14, // Callee-saved
    R15 = 15, // Callee-saved
}

const REG_NAMES: [&str; 16] = [
    "rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi", "r8", "r9", "r10", "r11", "r12",
    "r13", "r14", "r15",
];

impl Reg {
    /// Register code (lower 3 bits).
    pub fn code(self) -> u8 {
        (self as u8) & 0x7
    }

    /// Full register ID (0-15).
    pub fn id(self) -> u8 {
        self as u8
    }

    /// Whether this register needs a REX extension bit.
    pub fn needs_rex_ext(self) -> bool {
        (self as u8) >= 8
    }

    /// REX.B bit (register used as base/rm).
    pub fn rex_b(self) -> u8 {
        if self.needs_rex_ext() { 0x01 } else { 0x00 }
    }

    /// REX.R bit (register used as reg).
    pub fn rex_r(self) -> u8 {
        if self.needs_rex_ext() { 0x04 } else { 0x00 }
    }

    /// Memory operand `[self + disp]`.
    pub fn at(self, disp: i32) -> Mem {
        Mem { base: self, disp }
    }

    /// The REX-addressable low byte of this register (AL, CL, ..., DIL).
    ///
    /// # Panics
    /// Panics for extended registers (R8-R15).
    pub fn low8(self) -> Reg8L {
        assert!(self.id() < 8, "no low-byte form for extended registers");
        Reg8L(self.id())
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REG_NAMES[self.id() as usize])
    }
}

/// 32-bit register operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Reg32 {
    Eax = 0,
    Ecx = 1,
    Edx = 2,
    Ebx = 3,
    Esp = 4,
    Ebp = 5,
    Esi = 6,
    Edi = 7,
}

impl Reg32 {
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// 16-bit register operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Reg16 {
    Ax = 0,
    Cx = 1,
    Dx = 2,
    Bx = 3,
}

impl Reg16 {
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Legacy 8-bit register operands (no REX prefix).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Reg8 {
    Al = 0,
    Cl = 1,
    Dl = 2,
    Bl = 3,
    Ah = 4,
    Ch = 5,
    Dh = 6,
    Bh = 7,
}

impl Reg8 {
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// REX-addressable low-byte registers (AL..BL, SPL, BPL, SIL, DIL).
///
/// Codes 4-7 name SPL/BPL/SIL/DIL rather than AH/CH/DH/BH and need an
/// empty REX prefix to avoid the legacy high-byte encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reg8L(u8);

impl Reg8L {
    pub const AL: Reg8L = Reg8L(0);
    pub const CL: Reg8L = Reg8L(1);
    pub const DL: Reg8L = Reg8L(2);
    pub const BL: Reg8L = Reg8L(3);
    pub const SPL: Reg8L = Reg8L(4);
    pub const BPL: Reg8L = Reg8L(5);
    pub const SIL: Reg8L = Reg8L(6);
    pub const DIL: Reg8L = Reg8L(7);

    pub fn code(self) -> u8 {
        self.0
    }
}

/// Memory operand: base register plus signed 32-bit displacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mem {
    pub base: Reg,
    pub disp: i32,
}

/// x86-64 condition codes (for Jcc and SETcc).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Cond {
    O = 0x0,  // Overflow
    No = 0x1, // Not overflow
    B = 0x2,  // Below (unsigned <)
    Ae = 0x3, // Above or equal (unsigned >=)
    E = 0x4,  // Equal
    Ne = 0x5, // Not equal
    Be = 0x6, // Below or equal (unsigned <=)
    A = 0x7,  // Above (unsigned >)
    S = 0x8,  // Sign (negative)
    Ns = 0x9, // Not sign (non-negative)
    P = 0xA,  // Parity even
    Np = 0xB, // Parity odd
    L = 0xC,  // Less (signed <)
    Ge = 0xD, // Greater or equal (signed >=)
    Le = 0xE, // Less or equal (signed <=)
    G = 0xF,  // Greater (signed >)
}

impl Cond {
    /// Invert the condition.
    pub fn invert(self) -> Self {
        match self {
            Cond::O => Cond::No,
            Cond::No => Cond::O,
            Cond::B => Cond::Ae,
            Cond::Ae => Cond::B,
            Cond::E => Cond::Ne,
            Cond::Ne => Cond::E,
            Cond::Be => Cond::A,
            Cond::A => Cond::Be,
            Cond::S => Cond::Ns,
            Cond::Ns => Cond::S,
            Cond::P => Cond::Np,
            Cond::Np => Cond::P,
            Cond::L => Cond::Ge,
            Cond::Ge => Cond::L,
            Cond::Le => Cond::G,
            Cond::G => Cond::Le,
        }
    }
}

fn is_8bit(x: i32) -> bool {
    (-128..=127).contains(&x)
}

/// Any single instruction encodes to at most 15 bytes; reserving once up
/// front keeps each emission to a single growth check.
const MAX_ENC: usize = 15;

/// x86-64 machine-code emitter.
///
/// Owns the output buffer and the label/reference tables. Instructions are
/// appended in program order; jump and call targets are [`Placeholder`]s
/// that may be labeled before or after the instructions that refer to them.
pub struct Asm {
    buf: CodeBuf,
    relocs: RelocTable,
}

impl Asm {
    pub fn new() -> Self {
        Self {
            buf: CodeBuf::new(),
            relocs: RelocTable::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: CodeBuf::with_capacity(capacity),
            relocs: RelocTable::new(),
        }
    }

    /// Bytes emitted so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// The emitted code (displacements to unlabeled placeholders are still
    /// zero at this point).
    pub fn code(&self) -> &[u8] {
        self.buf.as_slice()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf.into_bytes()
    }

    /// Hex rendering of the emitted bytes, 16 per line.
    pub fn hex_dump(&self) -> String {
        self.buf.hex_dump()
    }

    /// Append raw bytes verbatim (inline data, pre-encoded fragments).
    pub fn emit_bytes(&mut self, bytes: &[u8]) {
        self.buf.push_bytes(bytes);
    }

    // ==================== Labels ====================

    /// Create a fresh placeholder.
    pub fn new_placeholder(&mut self) -> Placeholder {
        Placeholder::fresh()
    }

    /// Fix `ph` to the current position and patch all pending references.
    pub fn label(&mut self, ph: Placeholder) -> Result<(), AsmError> {
        let at = self.buf.len();
        self.relocs.bind(&mut self.buf, ph, at)
    }

    /// Offset at which `ph` was labeled, if it has been.
    pub fn label_offset(&self, ph: Placeholder) -> Option<usize> {
        self.relocs.label_of(ph)
    }

    /// Append `other`'s code, re-basing all of its labels and pending
    /// references by this emitter's current length. Afterwards the combined
    /// stream behaves as if `other`'s instructions had been emitted here
    /// directly.
    pub fn append(&mut self, other: Asm) -> Result<(), AsmError> {
        let base = self.buf.len();
        self.buf.push_bytes(other.buf.as_slice());
        self.relocs.absorb(&mut self.buf, other.relocs, base)
    }

    /// Check that no reference is left dangling and copy the code into
    /// executable memory.
    pub fn finalize(self) -> Result<Executable, AsmError> {
        if let Some(ph) = self.relocs.first_pending() {
            return Err(AsmError::UnboundPlaceholder(ph));
        }
        debug!("finalizing {} bytes of code", self.buf.len());
        Ok(Executable::new(self.buf.as_slice())?)
    }

    // ==================== Encoding helpers ====================

    /// REX.W prefix for a two-register form.
    fn rex_w(reg: Reg, rm: Reg) -> u8 {
        0x48 | reg.rex_r() | rm.rex_b()
    }

    /// ModR/M byte: mode (2 bits), reg (3 bits), rm (3 bits).
    fn modrm(mode: u8, reg: u8, rm: u8) -> u8 {
        ((mode & 0x3) << 6) | ((reg & 0x7) << 3) | (rm & 0x7)
    }

    /// Emit ModR/M (+ SIB escape, + displacement) for `[base + disp]`.
    ///
    /// Three-way displacement choice: none (disp == 0 and base code != 5,
    /// since code 5 means RIP-relative in mod 00), 8-bit, or 32-bit. Base
    /// code 4 always takes the 0x24 SIB escape byte.
    fn emit_mem(&mut self, reg_bits: u8, mem: Mem) {
        let base = mem.base.code();
        if !is_8bit(mem.disp) {
            self.buf.push_u8(Self::modrm(0b10, reg_bits, base));
            if base == 4 {
                self.buf.push_u8(0x24);
            }
            self.buf.push_u32(mem.disp as u32);
        } else if mem.disp != 0 || base == 5 {
            self.buf.push_u8(Self::modrm(0b01, reg_bits, base));
            if base == 4 {
                self.buf.push_u8(0x24);
            }
            self.buf.push_u8(mem.disp as u8);
        } else {
            self.buf.push_u8(Self::modrm(0b00, reg_bits, base));
            if base == 4 {
                self.buf.push_u8(0x24);
            }
        }
    }

    // ==================== Data movement ====================

    /// MOV r64, r64
    pub fn mov_rr(&mut self, dst: Reg, src: Reg) {
        self.buf.reserve(MAX_ENC);
        self.buf.push_u8(Self::rex_w(src, dst));
        self.buf.push_u8(0x89); // MOV r/m64, r64
        self.buf.push_u8(Self::modrm(0b11, src.code(), dst.code()));
    }

    /// MOV r64, imm32 (sign-extended)
    pub fn mov_ri32(&mut self, dst: Reg, imm: i32) {
        self.buf.reserve(MAX_ENC);
        self.buf.push_u8(0x48 | dst.rex_b());
        self.buf.push_u8(0xC7); // MOV r/m64, imm32
        self.buf.push_u8(Self::modrm(0b11, 0, dst.code()));
        self.buf.push_u32(imm as u32);
    }

    /// MOV r64, imm64
    pub fn mov_ri64(&mut self, dst: Reg, imm: i64) {
        self.buf.reserve(MAX_ENC);
        self.buf.push_u8(0x48 | dst.rex_b());
        self.buf.push_u8(0xB8 + dst.code()); // MOV r64, imm64
        self.buf.push_u64(imm as u64);
    }

    /// MOV r64, [base + disp]
    pub fn mov_rm(&mut self, dst: Reg, src: Mem) {
        self.buf.reserve(MAX_ENC);
        self.buf.push_u8(Self::rex_w(dst, src.base));
        self.buf.push_u8(0x8B); // MOV r64, r/m64
        self.emit_mem(dst.code(), src);
    }

    /// MOV [base + disp], r64
    pub fn mov_mr(&mut self, dst: Mem, src: Reg) {
        self.buf.reserve(MAX_ENC);
        self.buf.push_u8(Self::rex_w(src, dst.base));
        self.buf.push_u8(0x89); // MOV r/m64, r64
        self.emit_mem(src.code(), dst);
    }

    /// MOV DWORD PTR [base + disp], imm32
    pub fn mov_mi32(&mut self, dst: Mem, imm: u32) {
        self.buf.reserve(MAX_ENC);
        if dst.base.needs_rex_ext() {
            self.buf.push_u8(0x41);
        }
        self.buf.push_u8(0xC7); // MOV r/m32, imm32
        self.emit_mem(0, dst);
        self.buf.push_u32(imm);
    }

    /// MOV BYTE PTR [base + disp], imm8
    pub fn mov_mi8(&mut self, dst: Mem, imm: u8) {
        self.buf.reserve(MAX_ENC);
        if dst.base.needs_rex_ext() {
            self.buf.push_u8(0x41);
        }
        self.buf.push_u8(0xC6); // MOV r/m8, imm8
        self.emit_mem(0, dst);
        self.buf.push_u8(imm);
    }

    /// MOV r32, [base + disp] (zero-extends to 64-bit)
    ///
    /// # Panics
    /// Panics for extended base registers or displacements outside the
    /// 8-bit range.
    pub fn mov_r32m(&mut self, dst: Reg32, src: Mem) {
        assert!(is_8bit(src.disp), "displacement too large for this form");
        assert!(src.base.id() < 8, "extended base not supported here");
        self.buf.reserve(MAX_ENC);
        self.buf.push_u8(0x8B); // MOV r32, r/m32
        self.emit_mem(dst.code(), src);
    }

    /// MOV r8, [base + disp] (legacy byte registers)
    ///
    /// # Panics
    /// Panics for extended base registers.
    pub fn mov_r8m(&mut self, dst: Reg8, src: Mem) {
        assert!(src.base.id() < 8, "extended base not supported here");
        self.buf.reserve(MAX_ENC);
        self.buf.push_u8(0x8A); // MOV r8, r/m8
        self.emit_mem(dst.code(), src);
    }

    /// MOV r8, [base + disp] (REX low-byte registers)
    ///
    /// # Panics
    /// Panics for extended base registers.
    pub fn mov_r8lm(&mut self, dst: Reg8L, src: Mem) {
        assert!(src.base.id() < 8, "extended base not supported here");
        self.buf.reserve(MAX_ENC);
        self.buf.push_u8(0x40); // empty REX selects SPL/BPL/SIL/DIL
        self.buf.push_u8(0x8A);
        self.emit_mem(dst.code(), src);
    }

    /// MOV [base + disp], r8 (legacy byte registers)
    pub fn mov_mr8(&mut self, dst: Mem, src: Reg8) {
        self.buf.reserve(MAX_ENC);
        if dst.base.needs_rex_ext() {
            self.buf.push_u8(0x41);
        }
        self.buf.push_u8(0x88); // MOV r/m8, r8
        self.emit_mem(src.code(), dst);
    }

    /// MOV [base + disp], r8 (REX low-byte registers)
    pub fn mov_mr8l(&mut self, dst: Mem, src: Reg8L) {
        self.buf.reserve(MAX_ENC);
        self.buf
            .push_u8(if dst.base.needs_rex_ext() { 0x41 } else { 0x40 });
        self.buf.push_u8(0x88);
        self.emit_mem(src.code(), dst);
    }

    /// LEA r64, [rip + rel32] resolving to the placeholder's position.
    ///
    /// # Panics
    /// Panics for extended destination registers.
    pub fn load_addr(&mut self, dst: Reg, ph: Placeholder) -> Result<(), AsmError> {
        assert!(dst.id() < 8, "extended destination not supported here");
        self.buf.reserve(MAX_ENC);
        self.buf.push_u8(0x48);
        self.buf.push_u8(0x8D); // LEA r64, m
        self.buf.push_u8(Self::modrm(0b00, dst.code(), 0b101)); // RIP-relative
        self.buf.push_u32(0);
        let field = self.buf.len() - 4;
        self.relocs.reference_32(&mut self.buf, ph, field)
    }

    // ==================== Arithmetic ====================

    /// ADD r64, r64
    pub fn add_rr(&mut self, dst: Reg, src: Reg) {
        self.buf.reserve(MAX_ENC);
        self.buf.push_u8(Self::rex_w(src, dst));
        self.buf.push_u8(0x01); // ADD r/m64, r64
        self.buf.push_u8(Self::modrm(0b11, src.code(), dst.code()));
    }

    /// ADD r64, imm32 (imm8 form when the value fits, short form for RAX)
    pub fn add_ri32(&mut self, dst: Reg, imm: i32) {
        self.buf.reserve(MAX_ENC);
        self.buf.push_u8(0x48 | dst.rex_b());
        if is_8bit(imm) {
            self.buf.push_u8(0x83); // ADD r/m64, imm8
            self.buf.push_u8(Self::modrm(0b11, 0, dst.code()));
            self.buf.push_u8(imm as u8);
        } else if dst == Reg::Rax {
            self.buf.push_u8(0x05); // ADD RAX, imm32
            self.buf.push_u32(imm as u32);
        } else {
            self.buf.push_u8(0x81); // ADD r/m64, imm32
            self.buf.push_u8(Self::modrm(0b11, 0, dst.code()));
            self.buf.push_u32(imm as u32);
        }
    }

    /// ADD r64, [base + disp]
    pub fn add_rm(&mut self, dst: Reg, src: Mem) {
        self.buf.reserve(MAX_ENC);
        self.buf.push_u8(Self::rex_w(dst, src.base));
        self.buf.push_u8(0x03); // ADD r64, r/m64
        self.emit_mem(dst.code(), src);
    }

    /// ADD r16, imm16
    ///
    /// # Panics
    /// Panics for AX (which has its own accumulator form).
    pub fn add16_ri(&mut self, dst: Reg16, imm: u16) {
        assert!(dst != Reg16::Ax, "AX takes the accumulator form");
        self.buf.reserve(MAX_ENC);
        self.buf.push_u8(0x66);
        self.buf.push_u8(0x81); // ADD r/m16, imm16
        self.buf.push_u8(Self::modrm(0b11, 0, dst.code()));
        self.buf.push_u16(imm);
    }

    /// SUB r64, r64
    pub fn sub_rr(&mut self, dst: Reg, src: Reg) {
        self.buf.reserve(MAX_ENC);
        self.buf.push_u8(Self::rex_w(src, dst));
        self.buf.push_u8(0x29); // SUB r/m64, r64
        self.buf.push_u8(Self::modrm(0b11, src.code(), dst.code()));
    }

    /// SUB r64, imm8
    ///
    /// # Panics
    /// Panics for extended registers.
    pub fn sub_ri8(&mut self, dst: Reg, imm: u8) {
        assert!(dst.id() < 8, "extended register not supported here");
        self.buf.reserve(MAX_ENC);
        self.buf.push_u8(0x48);
        self.buf.push_u8(0x83); // SUB r/m64, imm8
        self.buf.push_u8(Self::modrm(0b11, 5, dst.code()));
        self.buf.push_u8(imm);
    }

    /// SUB r16, imm8
    pub fn sub16_ri8(&mut self, dst: Reg16, imm: u8) {
        self.buf.reserve(MAX_ENC);
        self.buf.push_u8(0x66);
        self.buf.push_u8(0x83); // SUB r/m16, imm8
        self.buf.push_u8(Self::modrm(0b11, 5, dst.code()));
        self.buf.push_u8(imm);
    }

    /// NEG r64
    ///
    /// # Panics
    /// Panics for extended registers.
    pub fn neg(&mut self, dst: Reg) {
        assert!(dst.id() < 8, "extended register not supported here");
        self.buf.reserve(MAX_ENC);
        self.buf.push_u8(0x48);
        self.buf.push_u8(0xF7); // NEG r/m64
        self.buf.push_u8(Self::modrm(0b11, 3, dst.code()));
    }

    /// CQO (sign-extend RAX into RDX:RAX)
    pub fn cqo(&mut self) {
        self.buf.reserve(MAX_ENC);
        self.buf.push_u8(0x48);
        self.buf.push_u8(0x99);
    }

    /// MUL r64 (unsigned: RDX:RAX = RAX * r64)
    pub fn mul(&mut self, src: Reg) {
        self.buf.reserve(MAX_ENC);
        self.buf.push_u8(0x48 | src.rex_b());
        self.buf.push_u8(0xF7); // MUL r/m64
        self.buf.push_u8(Self::modrm(0b11, 4, src.code()));
    }

    /// IMUL r64 (signed: RDX:RAX = RAX * r64)
    pub fn imul(&mut self, src: Reg) {
        self.buf.reserve(MAX_ENC);
        self.buf.push_u8(0x48 | src.rex_b());
        self.buf.push_u8(0xF7); // IMUL r/m64
        self.buf.push_u8(Self::modrm(0b11, 5, src.code()));
    }

    /// DIV r64 (unsigned divide RDX:RAX by r64)
    ///
    /// # Panics
    /// Panics for extended registers.
    pub fn div(&mut self, src: Reg) {
        assert!(src.id() < 8, "extended register not supported here");
        self.buf.reserve(MAX_ENC);
        self.buf.push_u8(0x48);
        self.buf.push_u8(0xF7); // DIV r/m64
        self.buf.push_u8(Self::modrm(0b11, 6, src.code()));
    }

    /// IDIV r64 (signed divide RDX:RAX by r64)
    pub fn idiv(&mut self, src: Reg) {
        self.buf.reserve(MAX_ENC);
        self.buf.push_u8(0x48 | src.rex_b());
        self.buf.push_u8(0xF7); // IDIV r/m64
        self.buf.push_u8(Self::modrm(0b11, 7, src.code()));
    }

    /// IDIV r32 (signed divide EDX:EAX by r32)
    pub fn idiv32(&mut self, src: Reg32) {
        self.buf.reserve(MAX_ENC);
        self.buf.push_u8(0xF7); // IDIV r/m32
        self.buf.push_u8(Self::modrm(0b11, 7, src.code()));
    }

    /// XOR r64, r64
    ///
    /// # Panics
    /// Panics for extended registers.
    pub fn xor_rr(&mut self, dst: Reg, src: Reg) {
        assert!(
            dst.id() < 8 && src.id() < 8,
            "extended register not supported here"
        );
        self.buf.reserve(MAX_ENC);
        self.buf.push_u8(0x48);
        self.buf.push_u8(0x31); // XOR r/m64, r64
        self.buf.push_u8(Self::modrm(0b11, src.code(), dst.code()));
    }

    /// XOR r64, imm8
    ///
    /// # Panics
    /// Panics for extended registers.
    pub fn xor_ri8(&mut self, dst: Reg, imm: u8) {
        assert!(dst.id() < 8, "extended register not supported here");
        self.buf.reserve(MAX_ENC);
        self.buf.push_u8(0x48);
        self.buf.push_u8(0x83); // XOR r/m64, imm8
        self.buf.push_u8(Self::modrm(0b11, 6, dst.code()));
        self.buf.push_u8(imm);
    }

    // ==================== Compare and test ====================

    /// CMP r64, r64
    pub fn cmp_rr(&mut self, dst: Reg, src: Reg) {
        self.buf.reserve(MAX_ENC);
        self.buf.push_u8(Self::rex_w(src, dst));
        self.buf.push_u8(0x39); // CMP r/m64, r64
        self.buf.push_u8(Self::modrm(0b11, src.code(), dst.code()));
    }

    /// CMP r64, imm8
    ///
    /// # Panics
    /// Panics for extended registers.
    pub fn cmp_ri8(&mut self, dst: Reg, imm: u8) {
        assert!(dst.id() < 8, "extended register not supported here");
        self.buf.reserve(MAX_ENC);
        self.buf.push_u8(0x48);
        self.buf.push_u8(0x83); // CMP r/m64, imm8
        self.buf.push_u8(Self::modrm(0b11, 7, dst.code()));
        self.buf.push_u8(imm);
    }

    /// CMP r32, imm8
    pub fn cmp32_ri8(&mut self, dst: Reg32, imm: u8) {
        self.buf.reserve(MAX_ENC);
        self.buf.push_u8(0x83); // CMP r/m32, imm8
        self.buf.push_u8(Self::modrm(0b11, 7, dst.code()));
        self.buf.push_u8(imm);
    }

    /// CMP r8, imm8
    pub fn cmp8_ri(&mut self, dst: Reg8, imm: u8) {
        self.buf.reserve(MAX_ENC);
        self.buf.push_u8(0x80); // CMP r/m8, imm8
        self.buf.push_u8(Self::modrm(0b11, 7, dst.code()));
        self.buf.push_u8(imm);
    }

    /// TEST r64, r64
    pub fn test_rr(&mut self, dst: Reg, src: Reg) {
        self.buf.reserve(MAX_ENC);
        self.buf.push_u8(Self::rex_w(src, dst));
        self.buf.push_u8(0x85); // TEST r/m64, r64
        self.buf.push_u8(Self::modrm(0b11, src.code(), dst.code()));
    }

    /// TEST r32, r32
    pub fn test32_rr(&mut self, dst: Reg32, src: Reg32) {
        self.buf.reserve(MAX_ENC);
        self.buf.push_u8(0x85); // TEST r/m32, r32
        self.buf.push_u8(Self::modrm(0b11, src.code(), dst.code()));
    }

    /// TEST r16, r16
    pub fn test16_rr(&mut self, dst: Reg16, src: Reg16) {
        self.buf.reserve(MAX_ENC);
        self.buf.push_u8(0x66);
        self.buf.push_u8(0x85); // TEST r/m16, r16
        self.buf.push_u8(Self::modrm(0b11, src.code(), dst.code()));
    }

    // ==================== Shifts ====================

    /// SHL r64, imm8
    ///
    /// # Panics
    /// Panics for extended registers.
    pub fn shl_ri(&mut self, dst: Reg, imm: u8) {
        assert!(dst.id() < 8, "extended register not supported here");
        self.buf.reserve(MAX_ENC);
        self.buf.push_u8(0x48);
        self.buf.push_u8(0xC1); // SHL r/m64, imm8
        self.buf.push_u8(Self::modrm(0b11, 4, dst.code()));
        self.buf.push_u8(imm);
    }

    /// SHL r16, imm8
    pub fn shl16_ri(&mut self, dst: Reg16, imm: u8) {
        self.buf.reserve(MAX_ENC);
        self.buf.push_u8(0x66);
        self.buf.push_u8(0xC1); // SHL r/m16, imm8
        self.buf.push_u8(Self::modrm(0b11, 4, dst.code()));
        self.buf.push_u8(imm);
    }

    /// SHR r16, imm8 (1-shift short form when imm == 1)
    pub fn shr16_ri(&mut self, dst: Reg16, imm: u8) {
        self.buf.reserve(MAX_ENC);
        self.buf.push_u8(0x66);
        if imm == 1 {
            self.buf.push_u8(0xD1); // SHR r/m16, 1
            self.buf.push_u8(Self::modrm(0b11, 5, dst.code()));
        } else {
            self.buf.push_u8(0xC1); // SHR r/m16, imm8
            self.buf.push_u8(Self::modrm(0b11, 5, dst.code()));
            self.buf.push_u8(imm);
        }
    }

    /// SAR r64, imm8
    ///
    /// # Panics
    /// Panics for extended registers.
    pub fn sar_ri(&mut self, dst: Reg, imm: u8) {
        assert!(dst.id() < 8, "extended register not supported here");
        self.buf.reserve(MAX_ENC);
        self.buf.push_u8(0x48);
        self.buf.push_u8(0xC1); // SAR r/m64, imm8
        self.buf.push_u8(Self::modrm(0b11, 7, dst.code()));
        self.buf.push_u8(imm);
    }

    // ==================== Stack ====================

    /// PUSH r64
    ///
    /// # Panics
    /// Panics for extended registers.
    pub fn push(&mut self, reg: Reg) {
        assert!(reg.id() < 8, "extended register not supported here");
        self.buf.reserve(MAX_ENC);
        self.buf.push_u8(0x50 + reg.code());
    }

    /// PUSH r16
    pub fn push16(&mut self, reg: Reg16) {
        self.buf.reserve(MAX_ENC);
        self.buf.push_u8(0x66);
        self.buf.push_u8(0x50 + reg.code());
    }

    /// PUSH imm8 (sign-extended by the CPU)
    pub fn push_i8(&mut self, imm: u8) {
        self.buf.reserve(MAX_ENC);
        self.buf.push_u8(0x6A);
        self.buf.push_u8(imm);
    }

    /// PUSH imm32 (sign-extended by the CPU)
    pub fn push_i32(&mut self, imm: i32) {
        self.buf.reserve(MAX_ENC);
        self.buf.push_u8(0x68);
        self.buf.push_u32(imm as u32);
    }

    /// POP r64
    pub fn pop(&mut self, reg: Reg) {
        self.buf.reserve(MAX_ENC);
        if reg.needs_rex_ext() {
            self.buf.push_u8(0x41); // REX.B
        }
        self.buf.push_u8(0x58 + reg.code());
    }

    // ==================== Control flow ====================

    /// JMP rel8 (short jump to a placeholder)
    pub fn jmp_rel8(&mut self, target: Placeholder) -> Result<(), AsmError> {
        self.buf.reserve(MAX_ENC);
        self.buf.push_u8(0xEB);
        self.buf.push_u8(0);
        let field = self.buf.len() - 1;
        self.relocs.reference_8(&mut self.buf, target, field)
    }

    /// JMP rel32 (near jump to a placeholder)
    pub fn jmp_rel32(&mut self, target: Placeholder) -> Result<(), AsmError> {
        self.buf.reserve(MAX_ENC);
        self.buf.push_u8(0xE9);
        self.buf.push_u32(0);
        let field = self.buf.len() - 4;
        self.relocs.reference_32(&mut self.buf, target, field)
    }

    /// JMP r64 (indirect)
    pub fn jmp_r(&mut self, reg: Reg) {
        self.buf.reserve(MAX_ENC);
        if reg.needs_rex_ext() {
            self.buf.push_u8(0x41);
        }
        self.buf.push_u8(0xFF); // JMP r/m64
        self.buf.push_u8(Self::modrm(0b11, 4, reg.code()));
    }

    /// Jcc rel8 (conditional short jump to a placeholder)
    pub fn jcc_rel8(&mut self, cond: Cond, target: Placeholder) -> Result<(), AsmError> {
        self.buf.reserve(MAX_ENC);
        self.buf.push_u8(0x70 + cond as u8);
        self.buf.push_u8(0);
        let field = self.buf.len() - 1;
        self.relocs.reference_8(&mut self.buf, target, field)
    }

    /// Jcc rel32 (conditional near jump to a placeholder)
    pub fn jcc_rel32(&mut self, cond: Cond, target: Placeholder) -> Result<(), AsmError> {
        self.buf.reserve(MAX_ENC);
        self.buf.push_u8(0x0F);
        self.buf.push_u8(0x80 + cond as u8);
        self.buf.push_u32(0);
        let field = self.buf.len() - 4;
        self.relocs.reference_32(&mut self.buf, target, field)
    }

    /// CALL rel32 (call a placeholder)
    pub fn call_rel32(&mut self, target: Placeholder) -> Result<(), AsmError> {
        self.buf.reserve(MAX_ENC);
        self.buf.push_u8(0xE8);
        self.buf.push_u32(0);
        let field = self.buf.len() - 4;
        self.relocs.reference_32(&mut self.buf, target, field)
    }

    /// CALL r64 (indirect)
    pub fn call_r(&mut self, reg: Reg) {
        self.buf.reserve(MAX_ENC);
        if reg.needs_rex_ext() {
            self.buf.push_u8(0x41);
        }
        self.buf.push_u8(0xFF); // CALL r/m64
        self.buf.push_u8(Self::modrm(0b11, 2, reg.code()));
    }

    /// RET
    pub fn ret(&mut self) {
        self.buf.reserve(MAX_ENC);
        self.buf.push_u8(0xC3);
    }

    /// SYSCALL
    pub fn syscall(&mut self) {
        self.buf.reserve(MAX_ENC);
        self.buf.push_u8(0x0F);
        self.buf.push_u8(0x05);
    }

    /// NOP
    pub fn nop(&mut self) {
        self.buf.reserve(MAX_ENC);
        self.buf.push_u8(0x90);
    }

    // ==================== Conditional set ====================

    /// SETcc r8 (legacy byte registers)
    pub fn setcc(&mut self, cond: Cond, dst: Reg8) {
        self.buf.reserve(MAX_ENC);
        self.buf.push_u8(0x0F);
        self.buf.push_u8(0x90 + cond as u8); // SETcc r/m8
        self.buf.push_u8(Self::modrm(0b11, 0, dst.code()));
    }

    /// SETcc r8 (REX low-byte registers)
    pub fn setcc_low(&mut self, cond: Cond, dst: Reg8L) {
        self.buf.reserve(MAX_ENC);
        if dst.code() >= 4 {
            self.buf.push_u8(0x40); // empty REX selects SPL/BPL/SIL/DIL
        }
        self.buf.push_u8(0x0F);
        self.buf.push_u8(0x90 + cond as u8);
        self.buf.push_u8(Self::modrm(0b11, 0, dst.code()));
    }

    // ==================== Exchange ====================

    /// XCHG r64, r64 (no-op for identical registers, short form with RAX)
    pub fn xchg_rr(&mut self, a: Reg, b: Reg) {
        if a == b {
            return;
        }
        if a == Reg::Rax {
            return self.xchg_rax(b);
        }
        if b == Reg::Rax {
            return self.xchg_rax(a);
        }
        self.buf.reserve(MAX_ENC);
        self.buf.push_u8(Self::rex_w(a, b));
        self.buf.push_u8(0x87); // XCHG r/m64, r64
        self.buf.push_u8(Self::modrm(0b11, a.code(), b.code()));
    }

    fn xchg_rax(&mut self, reg: Reg) {
        self.buf.reserve(MAX_ENC);
        self.buf.push_u8(0x48 | reg.rex_b());
        self.buf.push_u8(0x90 | reg.code()); // XCHG RAX, r64
    }

    // ==================== Load effective address ====================

    /// LEA r64, [base + disp]
    pub fn lea(&mut self, dst: Reg, src: Mem) {
        self.buf.reserve(MAX_ENC);
        self.buf.push_u8(Self::rex_w(dst, src.base));
        self.buf.push_u8(0x8D); // LEA r64, m
        self.emit_mem(dst.code(), src);
    }

    /// LEA r64, [rip + disp32]
    ///
    /// # Panics
    /// Panics for extended destination registers.
    pub fn lea_rip(&mut self, dst: Reg, disp: i32) {
        assert!(dst.id() < 8, "extended destination not supported here");
        self.buf.reserve(MAX_ENC);
        self.buf.push_u8(0x48);
        self.buf.push_u8(0x8D);
        self.buf.push_u8(Self::modrm(0b00, dst.code(), 0b101)); // RIP-relative
        self.buf.push_u32(disp as u32);
    }
}

impl Default for Asm {
    fn default() -> Self {
        Self::new()
    }
}
