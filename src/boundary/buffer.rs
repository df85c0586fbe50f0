//! Buffer types crossing the C boundary
//!
//! Two kinds of buffer cross the interface: a borrowed view of
//! caller-owned bytes, and a transferred buffer allocated here whose
//! ownership moves to the caller. The transferred buffer records the
//! allocation's capacity alongside its length so the release path can
//! hand the memory back to the Rust allocator with the layout it was
//! created with.

use std::{mem, ptr, slice};

use thiserror::Error;

/// Why a borrowed buffer failed to decode.
#[derive(Debug, Error)]
pub(crate) enum InputError {
    #[error("buffer data pointer is null but length is nonzero")]
    NullData,

    #[error("buffer contents are not valid UTF-8")]
    InvalidUtf8,
}

/// A read-only view of caller-owned bytes.
///
/// Valid only for the duration of a single boundary call. This library
/// never retains, frees, or mutates the pointed-to memory.
#[repr(C)]
pub struct BorrowedStr {
    data: *const u8,
    length: usize,
}

impl BorrowedStr {
    pub const fn new(data: *const u8, length: usize) -> Self {
        Self { data, length }
    }

    /// Decodes the view as UTF-8 text.
    ///
    /// A null pointer with zero length is the empty string; a null
    /// pointer with nonzero length is rejected rather than trusted.
    ///
    /// # Safety
    /// `data` must point to `length` readable bytes that stay valid and
    /// unmoved for the borrow's lifetime.
    pub(crate) unsafe fn decode(&self) -> Result<&str, InputError> {
        if self.data.is_null() {
            if self.length != 0 {
                return Err(InputError::NullData);
            }
            return Ok("");
        }
        let bytes = slice::from_raw_parts(self.data, self.length);
        std::str::from_utf8(bytes).map_err(|_| InputError::InvalidUtf8)
    }
}

/// A Rust-allocated buffer whose ownership transfers to the caller.
///
/// Produced by a single allocation path inside the library and released
/// only through `localm_release_buffer`, which returns the memory to the
/// Rust allocator and poisons the struct (`data` becomes null) so a
/// second release is detectable.
#[repr(C)]
pub struct OwnedBuf {
    data: *mut u8,
    length: usize,
    capacity: usize,
}

impl OwnedBuf {
    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// The buffer contents, or an empty slice once released.
    pub fn as_bytes(&self) -> &[u8] {
        if self.data.is_null() || self.length == 0 {
            return &[];
        }
        // SAFETY: non-null data came from the From<String> path and is
        // valid for `length` bytes until released.
        unsafe { slice::from_raw_parts(self.data, self.length) }
    }

    /// Frees the underlying allocation and poisons the struct.
    pub(crate) fn release(&mut self) {
        debug_assert!(!self.data.is_null(), "transferred buffer released twice");
        if self.data.is_null() {
            return;
        }
        // SAFETY: data/length/capacity were recorded verbatim from the
        // Vec this buffer was created from.
        unsafe { drop(Vec::from_raw_parts(self.data, self.length, self.capacity)) };
        self.data = ptr::null_mut();
        self.length = 0;
        self.capacity = 0;
    }
}

impl From<String> for OwnedBuf {
    fn from(value: String) -> Self {
        let mut bytes = value.into_bytes();
        let buf = Self {
            data: bytes.as_mut_ptr(),
            length: bytes.len(),
            capacity: bytes.capacity(),
        };
        mem::forget(bytes);
        buf
    }
}

impl Drop for OwnedBuf {
    fn drop(&mut self) {
        if self.data.is_null() {
            return;
        }
        // SAFETY: same invariant as release().
        unsafe { drop(Vec::from_raw_parts(self.data, self.length, self.capacity)) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn borrowed_decodes_utf8() {
        let text = "hello";
        let view = BorrowedStr::new(text.as_ptr(), text.len());
        assert_eq!(unsafe { view.decode() }.unwrap(), "hello");
    }

    #[test]
    fn borrowed_null_with_zero_length_is_empty() {
        let view = BorrowedStr::new(ptr::null(), 0);
        assert_eq!(unsafe { view.decode() }.unwrap(), "");
    }

    #[test]
    fn borrowed_null_with_nonzero_length_is_rejected() {
        let view = BorrowedStr::new(ptr::null(), 4);
        assert!(matches!(
            unsafe { view.decode() },
            Err(InputError::NullData)
        ));
    }

    #[test]
    fn borrowed_rejects_invalid_utf8() {
        let bytes = [0xffu8, 0xfe, 0x41];
        let view = BorrowedStr::new(bytes.as_ptr(), bytes.len());
        assert!(matches!(
            unsafe { view.decode() },
            Err(InputError::InvalidUtf8)
        ));
    }

    #[test]
    fn owned_records_length_and_capacity() {
        let mut text = String::with_capacity(32);
        text.push_str("generated text");
        let buf = OwnedBuf::from(text);
        assert_eq!(buf.as_bytes(), b"generated text");
        assert_eq!(buf.len(), 14);
        assert!(buf.capacity >= 32);
    }

    #[test]
    fn owned_empty_is_a_valid_buffer() {
        let buf = OwnedBuf::from(String::new());
        // Zero-length success is a real buffer, not a null
        assert!(!buf.data.is_null());
        assert_eq!(buf.len(), 0);
        assert!(buf.is_empty());
        assert_eq!(buf.as_bytes(), b"");
    }

    #[test]
    fn release_poisons_the_buffer() {
        let mut buf = OwnedBuf::from(String::from("soon gone"));
        buf.release();
        assert!(buf.data.is_null());
        assert_eq!(buf.len(), 0);
        assert_eq!(buf.capacity, 0);
    }

    #[test]
    #[should_panic(expected = "released twice")]
    fn double_release_is_detected() {
        let mut buf = OwnedBuf::from(String::from("once only"));
        buf.release();
        buf.release();
    }

    #[test]
    fn roundtrip_leaves_no_allocation() {
        let before = crate::testalloc::net_bytes();
        let mut buf = OwnedBuf::from(String::from("the quick brown fox"));
        buf.release();
        assert_eq!(crate::testalloc::net_bytes(), before);
    }

    #[test]
    fn drop_frees_unreleased_buffer() {
        let before = crate::testalloc::net_bytes();
        {
            let _buf = OwnedBuf::from(String::from("dropped internally"));
        }
        assert_eq!(crate::testalloc::net_bytes(), before);
    }
}
