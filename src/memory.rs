//! Executable memory management using mmap.
//!
//! Finished code is copied into an anonymous private mapping that starts
//! out writable and is flipped to read+execute before any call is made
//! through it. The mapping is released when its owner is dropped.

use std::ptr::NonNull;

use log::debug;
use thiserror::Error;

/// Error type for memory operations.
#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("memory allocation failed")]
    AllocationFailed,
    #[error("memory protection change failed")]
    ProtectionFailed,
    #[error("invalid memory size")]
    InvalidSize,
}

/// A block of memory allocated via mmap.
///
/// The memory is initially writable. Call `make_executable()` to make it
/// executable (and read-only) before calling into it. There is exactly one
/// owner; dropping the block unmaps it.
pub struct ExecutableMemory {
    ptr: NonNull<u8>,
    size: usize,
    executable: bool,
}

impl ExecutableMemory {
    /// Allocate a writable, page-aligned block of at least `size` bytes.
    pub fn new(size: usize) -> Result<Self, MemoryError> {
        if size == 0 {
            return Err(MemoryError::InvalidSize);
        }

        let page_size = Self::page_size();
        let aligned_size = (size + page_size - 1) & !(page_size - 1);

        let ptr = Self::mmap_alloc(aligned_size)?;

        Ok(Self {
            ptr,
            size: aligned_size,
            executable: false,
        })
    }

    fn page_size() -> usize {
        unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
    }

    fn mmap_alloc(size: usize) -> Result<NonNull<u8>, MemoryError> {
        use std::ptr;

        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            return Err(MemoryError::AllocationFailed);
        }

        NonNull::new(ptr as *mut u8).ok_or(MemoryError::AllocationFailed)
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    /// Size of the mapping (rounded up to a page multiple).
    pub fn size(&self) -> usize {
        self.size
    }

    /// Copy `data` into the mapping at `offset`.
    ///
    /// Fails once the mapping has been made executable, or if the write
    /// would run past the end of the mapping.
    pub fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), MemoryError> {
        if self.executable {
            return Err(MemoryError::ProtectionFailed);
        }

        if offset + data.len() > self.size {
            return Err(MemoryError::InvalidSize);
        }

        unsafe {
            let dest = self.ptr.as_ptr().add(offset);
            std::ptr::copy_nonoverlapping(data.as_ptr(), dest, data.len());
        }

        Ok(())
    }

    /// Flip the mapping to read+execute. After this the memory can no
    /// longer be written.
    pub fn make_executable(&mut self) -> Result<(), MemoryError> {
        if self.executable {
            return Ok(());
        }

        let result = unsafe {
            libc::mprotect(
                self.ptr.as_ptr() as *mut libc::c_void,
                self.size,
                libc::PROT_READ | libc::PROT_EXEC,
            )
        };

        if result != 0 {
            return Err(MemoryError::ProtectionFailed);
        }

        self.executable = true;
        Ok(())
    }

    pub fn is_executable(&self) -> bool {
        self.executable
    }
}

impl Drop for ExecutableMemory {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.size);
        }
    }
}

// The mapping is exclusively owned and immutable once executable.
unsafe impl Send for ExecutableMemory {}
unsafe impl Sync for ExecutableMemory {}

/// A finished, directly callable code image.
///
/// Construction copies the code into fresh executable memory; the image
/// never exposes a partially written mapping.
pub struct Executable {
    mem: ExecutableMemory,
    code_len: usize,
}

impl Executable {
    /// Materialize `code` into executable memory.
    pub fn new(code: &[u8]) -> Result<Self, MemoryError> {
        let mut mem = ExecutableMemory::new(code.len())?;
        mem.write(0, code)?;
        mem.make_executable()?;
        debug!("materialized {} bytes of code", code.len());
        Ok(Self {
            mem,
            code_len: code.len(),
        })
    }

    /// Length of the code the image was built from.
    pub fn code_len(&self) -> usize {
        self.code_len
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.mem.as_ptr()
    }

    /// Reinterpret the image's base address as an entry point.
    ///
    /// # Safety
    /// `F` must be a function pointer type whose signature matches the
    /// calling convention of the emitted code (System V AMD64: integer and
    /// pointer arguments in RDI, RSI, RDX, RCX, R8, R9; return value in
    /// RAX). A mismatch is undefined behavior at the call site.
    pub unsafe fn as_fn<F: Copy>(&self) -> F {
        const {
            assert!(std::mem::size_of::<F>() == std::mem::size_of::<fn()>());
        }
        let ptr = self.mem.as_ptr();
        unsafe { std::mem::transmute_copy(&ptr) }
    }
}

impl std::fmt::Debug for Executable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executable")
            .field("code_len", &self.code_len)
            .finish()
    }
}
