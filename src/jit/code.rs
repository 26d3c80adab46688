//! Executable page lifecycle.
//!
//! Each compiled function owns one anonymous mapping: filled while
//! writable, flipped to read-execute before the entry address is published.
//! Pages never move and are only unmapped when the runtime shuts down, so a
//! redefined function's old code simply lingers until exit.

use std::ptr;

use super::JitError;

pub const CODE_PAGE_SIZE: usize = 4096;

pub struct CodePage {
    base: *mut u8,
    size: usize,
}

impl CodePage {
    pub fn new(size: usize) -> Result<CodePage, JitError> {
        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(JitError::Os("mmap for code page failed".into()));
        }
        Ok(CodePage { base: base as *mut u8, size })
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.base, self.size) }
    }

    pub fn entry(&self) -> *const u8 {
        self.base
    }

    /// Flips the page from read-write to read-execute.
    pub fn protect_exec(&self) -> Result<(), JitError> {
        let rc = unsafe {
            libc::mprotect(self.base as *mut libc::c_void, self.size, libc::PROT_READ | libc::PROT_EXEC)
        };
        if rc != 0 {
            return Err(JitError::Os("mprotect to executable failed".into()));
        }
        Ok(())
    }
}

impl Drop for CodePage {
    fn drop(&mut self) {
        unsafe { libc::munmap(self.base as *mut libc::c_void, self.size) };
    }
}
