//! Property-based tests using proptest.
//!
//! These verify relocation and encoding invariants across randomly
//! generated inputs, complementing the byte-exact unit tests.

use braze::buffer::CodeBuf;
use braze::reloc::{Placeholder, RelocTable};
use braze::{Asm, Reg};
use proptest::prelude::*;

fn zeroed(len: usize) -> CodeBuf {
    let mut buf = CodeBuf::new();
    buf.push_bytes(&vec![0u8; len]);
    buf
}

fn fresh_placeholder() -> Placeholder {
    Asm::new().new_placeholder()
}

proptest! {
    /// An in-range 8-bit displacement decodes back to target - (field + 1).
    #[test]
    fn rel8_patch_roundtrip(field in 0usize..256, delta in -128i64..=127) {
        let target = field as i64 + 1 + delta;
        prop_assume!(target >= 0);
        let target = target as usize;

        let mut buf = zeroed(512);
        let mut relocs = RelocTable::new();
        let ph = fresh_placeholder();
        relocs.bind(&mut buf, ph, target).unwrap();
        relocs.reference_8(&mut buf, ph, field).unwrap();

        let decoded = buf.as_slice()[field] as i8 as i64;
        prop_assert_eq!(decoded, delta);
    }

    /// An in-range 32-bit displacement decodes back to target - (field + 4).
    #[test]
    fn rel32_patch_roundtrip(field in 0usize..1024, delta in -1024i64..=1024) {
        let target = field as i64 + 4 + delta;
        prop_assume!(target >= 0);
        let target = target as usize;

        let mut buf = zeroed(4096);
        let mut relocs = RelocTable::new();
        let ph = fresh_placeholder();
        relocs.bind(&mut buf, ph, target).unwrap();
        relocs.reference_32(&mut buf, ph, field).unwrap();

        let bytes: [u8; 4] = buf.as_slice()[field..field + 4].try_into().unwrap();
        prop_assert_eq!(i32::from_le_bytes(bytes) as i64, delta);
    }

    /// Resolving a reference before the label and after it writes the same
    /// bytes.
    #[test]
    fn forward_and_backward_resolution_agree(
        field in 0usize..500,
        target in 0usize..500,
    ) {
        let mut fwd_buf = zeroed(512);
        let mut fwd = RelocTable::new();
        let ph1 = fresh_placeholder();
        fwd.reference_32(&mut fwd_buf, ph1, field).unwrap();
        fwd.bind(&mut fwd_buf, ph1, target).unwrap();

        let mut bwd_buf = zeroed(512);
        let mut bwd = RelocTable::new();
        let ph2 = fresh_placeholder();
        bwd.bind(&mut bwd_buf, ph2, target).unwrap();
        bwd.reference_32(&mut bwd_buf, ph2, field).unwrap();

        prop_assert_eq!(fwd_buf.as_slice(), bwd_buf.as_slice());
    }

    /// The immediate of MOV r64, imm32 is stored little-endian in the last
    /// four bytes of the instruction.
    #[test]
    fn mov_ri32_immediate_is_little_endian(imm in any::<i32>()) {
        let mut asm = Asm::new();
        asm.mov_ri32(Reg::Rax, imm);

        let code = asm.code();
        prop_assert_eq!(code.len(), 7);
        prop_assert_eq!(&code[3..], &imm.to_le_bytes());
    }

    /// The immediate of MOV r64, imm64 is stored little-endian.
    #[test]
    fn mov_ri64_immediate_is_little_endian(imm in any::<i64>()) {
        let mut asm = Asm::new();
        asm.mov_ri64(Reg::R11, imm);

        let code = asm.code();
        prop_assert_eq!(code.len(), 10);
        prop_assert_eq!(&code[2..], &imm.to_le_bytes());
    }

    /// A memory displacement survives encoding: the trailing bytes of
    /// MOV r64, [RBX + disp] decode back to the displacement.
    #[test]
    fn memory_displacement_roundtrip(disp in any::<i32>()) {
        let mut asm = Asm::new();
        asm.mov_rm(Reg::Rax, Reg::Rbx.at(disp));

        let code = asm.code();
        let decoded = if disp == 0 {
            prop_assert_eq!(code.len(), 3);
            0
        } else if (-128..=127).contains(&disp) {
            prop_assert_eq!(code.len(), 4);
            code[3] as i8 as i32
        } else {
            prop_assert_eq!(code.len(), 7);
            i32::from_le_bytes(code[3..7].try_into().unwrap())
        };
        prop_assert_eq!(decoded, disp);
    }

    /// Merging fragments shifts every label by the length of the code in
    /// front of it.
    #[test]
    fn append_rebases_labels(pad in 0usize..64) {
        let mut first = Asm::new();
        for _ in 0..pad {
            first.nop();
        }

        let mut second = Asm::new();
        let ph = second.new_placeholder();
        second.nop();
        second.label(ph).unwrap();

        first.append(second).unwrap();
        prop_assert_eq!(first.label_offset(ph), Some(pad + 1));
    }
}
