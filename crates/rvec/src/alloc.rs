//! Native memory primitives
//!
//! Thin wrappers over `std::alloc` used by mirrors. All blocks share one
//! alignment so a block can be freed knowing only its address and byte size.
//! There is no fallback allocator: a failed request is reported once and the
//! caller's operation is aborted.

use crate::error::{NativeError, VecResult};
use std::alloc::{self, Layout};
use std::ptr::NonNull;

/// Alignment of every native block, wide enough for doubles and handles
pub const NATIVE_ALIGN: usize = 8;

fn layout(bytes: usize) -> VecResult<Layout> {
    Layout::from_size_align(bytes, NATIVE_ALIGN)
        .map_err(|_| NativeError::AllocationFailure { bytes }.into())
}

/// Allocate a zeroed block of `bytes` bytes.
///
/// Zero-byte requests are rejected; empty vectors use the context's sentinel
/// address instead.
pub fn allocate(bytes: usize) -> VecResult<NonNull<u8>> {
    if bytes == 0 {
        return Err(NativeError::AllocationFailure { bytes }.into());
    }
    let layout = layout(bytes)?;
    // SAFETY: layout has non-zero size
    let ptr = unsafe { alloc::alloc_zeroed(layout) };
    tracing::trace!(bytes, address = ptr as usize, "allocated native memory");
    NonNull::new(ptr).ok_or_else(|| NativeError::AllocationFailure { bytes }.into())
}

/// Grow or shrink a block, preserving the common prefix. Bytes past the old
/// size are zeroed.
///
/// # Safety
///
/// `address` must come from [`allocate`] or [`reallocate`] with exactly
/// `old_bytes` bytes and must not have been freed.
pub unsafe fn reallocate(
    address: usize,
    old_bytes: usize,
    new_bytes: usize,
) -> VecResult<NonNull<u8>> {
    if new_bytes == 0 {
        return Err(NativeError::AllocationFailure { bytes: new_bytes }.into());
    }
    let old_layout = layout(old_bytes)?;
    layout(new_bytes)?;
    let ptr = alloc::realloc(address as *mut u8, old_layout, new_bytes);
    let ptr = NonNull::new(ptr).ok_or(NativeError::AllocationFailure { bytes: new_bytes })?;
    if new_bytes > old_bytes {
        std::ptr::write_bytes(ptr.as_ptr().add(old_bytes), 0, new_bytes - old_bytes);
    }
    tracing::trace!(
        old = address,
        new = ptr.as_ptr() as usize,
        new_bytes,
        "reallocated native memory"
    );
    Ok(ptr)
}

/// Free a block.
///
/// # Safety
///
/// Same contract as [`reallocate`]; the block must not be used afterwards.
pub unsafe fn free(address: usize, bytes: usize) {
    if address == 0 || bytes == 0 {
        return;
    }
    // A layout that was valid at allocation time is still valid here.
    if let Ok(layout) = layout(bytes) {
        alloc::dealloc(address as *mut u8, layout);
        tracing::trace!(address, bytes, "freed native memory");
    }
}

/// Read a NUL-terminated byte string.
///
/// # Safety
///
/// `address` must point at readable memory containing a NUL byte.
pub unsafe fn read_c_string(address: usize) -> String {
    let start = address as *const u8;
    let mut len = 0;
    while *start.add(len) != 0 {
        len += 1;
    }
    let bytes = std::slice::from_raw_parts(start, len);
    String::from_utf8_lossy(bytes).into_owned()
}

/// A `char**` array laid out in one contiguous block: `len` pointers
/// followed by the NUL-terminated strings they point to.
///
/// Used to hand a batch of strings to native code without one allocation
/// per element.
#[derive(Debug)]
pub struct NativeStringArray {
    address: usize,
    bytes: usize,
    len: usize,
}

impl NativeStringArray {
    pub fn new<S: AsRef<str>>(strings: &[S]) -> VecResult<Self> {
        let len = strings.len();
        let header = len * std::mem::size_of::<u64>();
        let bytes = header
            + strings
                .iter()
                .map(|s| s.as_ref().len() + 1)
                .sum::<usize>();
        let block = allocate(bytes.max(NATIVE_ALIGN))?;
        let base = block.as_ptr();
        // SAFETY: the block holds the header plus every string and its NUL
        unsafe {
            let mut cursor = base.add(header);
            for (i, s) in strings.iter().enumerate() {
                let s = s.as_ref().as_bytes();
                (base.add(i * 8) as *mut u64).write_unaligned(cursor as u64);
                std::ptr::copy_nonoverlapping(s.as_ptr(), cursor, s.len());
                cursor = cursor.add(s.len());
                *cursor = 0;
                cursor = cursor.add(1);
            }
            debug_assert_eq!(cursor as usize, base as usize + bytes);
        }
        Ok(Self {
            address: base as usize,
            bytes: bytes.max(NATIVE_ALIGN),
            len,
        })
    }

    pub fn as_ptr(&self) -> *const *const u8 {
        self.address as *const *const u8
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Read the strings back, following the pointers native code may have
    /// rewritten, and free the block.
    pub fn into_strings(self) -> Vec<String> {
        let base = self.address as *const u8;
        (0..self.len)
            .map(|i| {
                // SAFETY: header slots hold pointers to NUL-terminated strings
                unsafe {
                    let ptr = (base.add(i * 8) as *const u64).read_unaligned();
                    read_c_string(ptr as usize)
                }
            })
            .collect()
    }
}

impl Drop for NativeStringArray {
    fn drop(&mut self) {
        // SAFETY: allocated in `new` with `self.bytes` bytes
        unsafe { free(self.address, self.bytes) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_zeroed() {
        let block = allocate(32).unwrap();
        let bytes = unsafe { std::slice::from_raw_parts(block.as_ptr(), 32) };
        assert!(bytes.iter().all(|b| *b == 0));
        assert_eq!(block.as_ptr() as usize % NATIVE_ALIGN, 0);
        unsafe { free(block.as_ptr() as usize, 32) };
    }

    #[test]
    fn test_allocate_zero_bytes_fails() {
        assert!(allocate(0).is_err());
    }

    #[test]
    fn test_allocate_huge_fails() {
        assert!(allocate(usize::MAX - 4).is_err());
    }

    #[test]
    fn test_reallocate_preserves_prefix() {
        let block = allocate(8).unwrap();
        unsafe {
            block.as_ptr().write_bytes(7, 8);
            let grown = reallocate(block.as_ptr() as usize, 8, 16).unwrap();
            let bytes = std::slice::from_raw_parts(grown.as_ptr(), 16);
            assert_eq!(&bytes[..8], &[7; 8]);
            assert_eq!(&bytes[8..], &[0; 8]);
            free(grown.as_ptr() as usize, 16);
        }
    }

    #[test]
    fn test_string_array() {
        let array = NativeStringArray::new(&["alpha", "", "gamma"]).unwrap();
        assert_eq!(array.len(), 3);
        let first = unsafe { read_c_string(*array.as_ptr() as usize) };
        assert_eq!(first, "alpha");
        assert_eq!(array.into_strings(), vec!["alpha", "", "gamma"]);
    }

    #[test]
    fn test_empty_string_array() {
        let array = NativeStringArray::new::<&str>(&[]).unwrap();
        assert!(array.is_empty());
        assert!(array.into_strings().is_empty());
    }
}
