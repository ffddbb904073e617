//! braze - a minimal x86-64 machine-code emitter.
//!
//! Code is built up one instruction at a time in a [`Asm`] emitter, with
//! jump and call targets named by [`Placeholder`]s that can be labeled
//! before or after the instructions that use them. Finished code is copied
//! into executable memory and called directly:
//!
//! ```no_run
//! use braze::{Asm, Reg};
//!
//! let mut asm = Asm::new();
//! asm.mov_ri32(Reg::Rax, 49);
//! asm.ret();
//!
//! let exe = asm.finalize()?;
//! let f: extern "C" fn() -> i64 = unsafe { exe.as_fn() };
//! assert_eq!(f(), 49);
//! # Ok::<(), braze::AsmError>(())
//! ```

pub mod buffer;
pub mod error;
pub mod memory;
pub mod reloc;
pub mod x86_64;

pub use buffer::{CodeBuf, Emit};
pub use error::AsmError;
pub use memory::{Executable, ExecutableMemory, MemoryError};
pub use reloc::Placeholder;
pub use x86_64::{Asm, Cond, Mem, Reg, Reg8, Reg8L, Reg16, Reg32};
