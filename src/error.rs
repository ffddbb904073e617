//! Error types for the emitter.

use thiserror::Error;

use crate::memory::MemoryError;
use crate::reloc::Placeholder;

/// Errors produced while emitting, linking, or materializing code.
#[derive(Debug, Error)]
pub enum AsmError {
    /// An 8-bit relative displacement does not fit in a signed byte.
    #[error("8-bit displacement out of range: {rel} (field at {field}, target {target})")]
    Rel8OutOfRange {
        field: usize,
        target: usize,
        rel: i64,
    },

    /// A 32-bit relative displacement does not fit in a signed 32-bit value.
    #[error("32-bit displacement out of range: {rel} (field at {field}, target {target})")]
    Rel32OutOfRange {
        field: usize,
        target: usize,
        rel: i64,
    },

    /// The same placeholder was labeled twice.
    #[error("placeholder {0} labeled twice")]
    DuplicateLabel(Placeholder),

    /// A referenced placeholder was never labeled before finalization.
    #[error("placeholder {0} referenced but never labeled")]
    UnboundPlaceholder(Placeholder),

    /// Executable memory could not be allocated or protected.
    #[error(transparent)]
    Memory(#[from] MemoryError),
}
