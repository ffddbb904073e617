//! Placeholder and label relocation.
//!
//! Jump and call targets may be referenced before their position is known.
//! A [`Placeholder`] names such a position; the [`RelocTable`] records every
//! displacement field that refers to a not-yet-labeled placeholder and
//! back-patches them all the moment the placeholder is labeled.
//!
//! An 8-bit field at offset `f` targeting offset `t` stores `t - (f + 1)`
//! as a signed byte; a 32-bit field stores `t - (f + 4)` as a signed
//! little-endian 32-bit value. The offset is the position of the
//! displacement field itself, not of the instruction that contains it.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use log::trace;

use crate::buffer::CodeBuf;
use crate::error::AsmError;

/// An opaque token naming a code location that may not be placed yet.
///
/// Identifiers come from a process-wide counter, so placeholders created by
/// independent emitters stay distinct when their outputs are merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Placeholder(u32);

static NEXT_PLACEHOLDER: AtomicU32 = AtomicU32::new(0);

impl Placeholder {
    pub(crate) fn fresh() -> Self {
        Placeholder(NEXT_PLACEHOLDER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Labels placed so far, plus displacement fields still waiting for one.
#[derive(Default)]
pub struct RelocTable {
    /// Placeholder -> offset at which it was labeled.
    labels: HashMap<Placeholder, usize>,
    /// Placeholder -> offsets of pending 8-bit displacement fields.
    refs8: HashMap<Placeholder, Vec<usize>>,
    /// Placeholder -> offsets of pending 32-bit displacement fields.
    refs32: HashMap<Placeholder, Vec<usize>>,
}

fn patch8(buf: &mut CodeBuf, field: usize, target: usize) -> Result<(), AsmError> {
    let rel = target as i64 - (field as i64 + 1);
    if !(i8::MIN as i64..=i8::MAX as i64).contains(&rel) {
        return Err(AsmError::Rel8OutOfRange { field, target, rel });
    }
    buf.patch_u8(field, rel as i8 as u8);
    Ok(())
}

fn patch32(buf: &mut CodeBuf, field: usize, target: usize) -> Result<(), AsmError> {
    let rel = target as i64 - (field as i64 + 4);
    if !(i32::MIN as i64..=i32::MAX as i64).contains(&rel) {
        return Err(AsmError::Rel32OutOfRange { field, target, rel });
    }
    buf.patch_u32(field, rel as i32 as u32);
    Ok(())
}

impl RelocTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an 8-bit relative displacement field at `field`.
    ///
    /// Resolved and written immediately if the placeholder is already
    /// labeled, otherwise recorded for patching at label time.
    pub fn reference_8(
        &mut self,
        buf: &mut CodeBuf,
        ph: Placeholder,
        field: usize,
    ) -> Result<(), AsmError> {
        match self.labels.get(&ph) {
            Some(&target) => patch8(buf, field, target),
            None => {
                self.refs8.entry(ph).or_default().push(field);
                Ok(())
            }
        }
    }

    /// Register a 32-bit relative displacement field at `field`.
    pub fn reference_32(
        &mut self,
        buf: &mut CodeBuf,
        ph: Placeholder,
        field: usize,
    ) -> Result<(), AsmError> {
        match self.labels.get(&ph) {
            Some(&target) => patch32(buf, field, target),
            None => {
                self.refs32.entry(ph).or_default().push(field);
                Ok(())
            }
        }
    }

    /// Fix `ph` to `target` and patch every pending reference to it.
    pub fn bind(
        &mut self,
        buf: &mut CodeBuf,
        ph: Placeholder,
        target: usize,
    ) -> Result<(), AsmError> {
        if self.labels.contains_key(&ph) {
            return Err(AsmError::DuplicateLabel(ph));
        }
        self.labels.insert(ph, target);
        if let Some(fields) = self.refs8.remove(&ph) {
            for field in fields {
                trace!("patching rel8 field at {field} -> {target}");
                patch8(buf, field, target)?;
            }
        }
        if let Some(fields) = self.refs32.remove(&ph) {
            for field in fields {
                trace!("patching rel32 field at {field} -> {target}");
                patch32(buf, field, target)?;
            }
        }
        Ok(())
    }

    /// Replay another table's labels and pending references into this one,
    /// with every offset shifted by `base` (the destination length before
    /// the corresponding bytes were appended).
    pub fn absorb(
        &mut self,
        buf: &mut CodeBuf,
        other: RelocTable,
        base: usize,
    ) -> Result<(), AsmError> {
        for (ph, fields) in other.refs8 {
            for field in fields {
                self.reference_8(buf, ph, base + field)?;
            }
        }
        for (ph, fields) in other.refs32 {
            for field in fields {
                self.reference_32(buf, ph, base + field)?;
            }
        }
        for (ph, target) in other.labels {
            self.bind(buf, ph, base + target)?;
        }
        Ok(())
    }

    /// Any placeholder that is still referenced but unlabeled.
    pub fn first_pending(&self) -> Option<Placeholder> {
        self.refs8.keys().chain(self.refs32.keys()).next().copied()
    }

    pub fn label_of(&self, ph: Placeholder) -> Option<usize> {
        self.labels.get(&ph).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zeroed(len: usize) -> CodeBuf {
        let mut buf = CodeBuf::new();
        buf.push_bytes(&vec![0u8; len]);
        buf
    }

    #[test]
    fn test_backward_reference_resolves_immediately() {
        let mut buf = zeroed(8);
        let mut relocs = RelocTable::new();
        let ph = Placeholder::fresh();

        relocs.bind(&mut buf, ph, 0).unwrap();
        relocs.reference_8(&mut buf, ph, 5).unwrap();

        // 0 - (5 + 1) = -6
        assert_eq!(buf.as_slice()[5], 0xFA);
        assert!(relocs.first_pending().is_none());
    }

    #[test]
    fn test_forward_reference_patched_at_bind() {
        let mut buf = zeroed(8);
        let mut relocs = RelocTable::new();
        let ph = Placeholder::fresh();

        relocs.reference_8(&mut buf, ph, 1).unwrap();
        assert_eq!(relocs.first_pending(), Some(ph));

        relocs.bind(&mut buf, ph, 6).unwrap();
        // 6 - (1 + 1) = 4
        assert_eq!(buf.as_slice()[1], 0x04);
        assert!(relocs.first_pending().is_none());
    }

    #[test]
    fn test_forward_and_backward_agree() {
        // Same field/target pair, resolved on the pending path and on the
        // immediate path, must produce the same byte.
        let ph1 = Placeholder::fresh();
        let mut buf1 = zeroed(16);
        let mut relocs1 = RelocTable::new();
        relocs1.reference_32(&mut buf1, ph1, 2).unwrap();
        relocs1.bind(&mut buf1, ph1, 12).unwrap();

        let ph2 = Placeholder::fresh();
        let mut buf2 = zeroed(16);
        let mut relocs2 = RelocTable::new();
        relocs2.bind(&mut buf2, ph2, 12).unwrap();
        relocs2.reference_32(&mut buf2, ph2, 2).unwrap();

        assert_eq!(buf1.as_slice(), buf2.as_slice());
        // 12 - (2 + 4) = 6
        assert_eq!(&buf1.as_slice()[2..6], &[0x06, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_rel8_overflow_rejected() {
        let mut buf = zeroed(300);
        let mut relocs = RelocTable::new();
        let ph = Placeholder::fresh();

        relocs.reference_8(&mut buf, ph, 0).unwrap();
        let err = relocs.bind(&mut buf, ph, 200).unwrap_err();
        assert!(matches!(err, AsmError::Rel8OutOfRange { rel: 199, .. }));
    }

    #[test]
    fn test_rel8_backward_overflow_rejected() {
        let mut buf = zeroed(300);
        let mut relocs = RelocTable::new();
        let ph = Placeholder::fresh();

        relocs.bind(&mut buf, ph, 0).unwrap();
        let err = relocs.reference_8(&mut buf, ph, 250).unwrap_err();
        assert!(matches!(err, AsmError::Rel8OutOfRange { .. }));
    }

    #[test]
    fn test_duplicate_bind_rejected() {
        let mut buf = zeroed(4);
        let mut relocs = RelocTable::new();
        let ph = Placeholder::fresh();

        relocs.bind(&mut buf, ph, 0).unwrap();
        let err = relocs.bind(&mut buf, ph, 2).unwrap_err();
        assert!(matches!(err, AsmError::DuplicateLabel(p) if p == ph));
        // The first binding survives the rejected rebind.
        assert_eq!(relocs.label_of(ph), Some(0));
    }

    #[test]
    fn test_absorb_rebases_refs_and_labels() {
        // Destination: 4 bytes already emitted.
        let mut buf = zeroed(4);
        let mut relocs = RelocTable::new();

        // Source: pending 8-bit ref at 1, label at 3.
        let mut src_buf = zeroed(4);
        let mut src = RelocTable::new();
        let ph = Placeholder::fresh();
        src.reference_8(&mut src_buf, ph, 1).unwrap();
        src.bind(&mut src_buf, ph, 3).unwrap();
        assert_eq!(src_buf.as_slice()[1], 0x01);

        // Source with the ref still pending at merge time.
        let mut src_buf2 = zeroed(4);
        let mut src2 = RelocTable::new();
        let ph2 = Placeholder::fresh();
        src2.reference_8(&mut src_buf2, ph2, 1).unwrap();

        buf.push_bytes(src_buf2.as_slice());
        relocs.absorb(&mut buf, src2, 4).unwrap();
        assert_eq!(relocs.first_pending(), Some(ph2));

        relocs.bind(&mut buf, ph2, 7).unwrap();
        // 7 - (5 + 1) = 1, same displacement as the unmerged build.
        assert_eq!(buf.as_slice()[5], 0x01);
        assert_eq!(relocs.label_of(ph2), Some(7));
    }

    #[test]
    fn test_placeholders_are_unique_across_instances() {
        let a = Placeholder::fresh();
        let b = Placeholder::fresh();
        assert_ne!(a, b);
    }
}
