//! C boundary entry points
//!
//! The exported surface of the library: load a model by name, generate
//! text against a handle, and release what was handed out. Every
//! fallible call returns a [`Status`]; results travel through out
//! parameters that are written only on success, so a caller never sees
//! a bare null without an error signal.
//!
//! Ownership contract:
//! - model handles are owned by the caller from `localm_load_model`
//!   until exactly one `localm_release_model`
//! - every buffer written to an out parameter is owned by the caller
//!   until exactly one `localm_release_buffer`
//! - borrowed inputs are only read for the duration of the call

pub mod buffer;

use std::cell::RefCell;
use std::ptr;

use once_cell::sync::Lazy;

use crate::registry::{Model, ModelRegistry, RegistryError};

pub use buffer::{BorrowedStr, OwnedBuf};

use buffer::InputError;

/// Outcome of a boundary call.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok = 0,
    /// A pointer argument violated the contract (null where forbidden).
    InvalidArgument = 1,
    /// A borrowed buffer did not decode as UTF-8 text.
    InvalidUtf8 = 2,
    /// The requested model name is not in the supported catalog.
    UnknownModel = 3,
    /// The model was recognized but fetching or loading it failed.
    LoadFailed = 4,
    /// The engine reported an error mid-generation; no text is returned.
    GenerationFailed = 5,
}

/// Process-wide registry backing the free-function ABI.
static REGISTRY: Lazy<ModelRegistry> = Lazy::new(ModelRegistry::with_defaults);

thread_local! {
    static LAST_ERROR: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Records the failure message for `localm_last_error` and returns the
/// status unchanged.
fn fail(status: Status, message: impl ToString) -> Status {
    let message = message.to_string();
    tracing::warn!("boundary call failed ({:?}): {}", status, message);
    LAST_ERROR.with(|e| *e.borrow_mut() = Some(message));
    status
}

fn input_status(err: &InputError) -> Status {
    match err {
        InputError::NullData => Status::InvalidArgument,
        InputError::InvalidUtf8 => Status::InvalidUtf8,
    }
}

fn registry_status(err: &RegistryError) -> Status {
    match err {
        RegistryError::UnknownModel(_) => Status::UnknownModel,
        RegistryError::Download(_) | RegistryError::Artifact(_) | RegistryError::Engine(_) => {
            Status::LoadFailed
        }
    }
}

/// Load a model from the supported catalog by canonical name.
///
/// Blocking; may perform disk and network I/O (the artifact is fetched
/// from HuggingFace when not cached locally). On `Ok` the caller owns
/// the handle written to `out_model` and must release it exactly once
/// with `localm_release_model`. On any failure no handle exists and
/// `out_model` is untouched.
#[no_mangle]
pub unsafe extern "C" fn localm_load_model(
    name: BorrowedStr,
    out_model: *mut *mut Model,
) -> Status {
    if out_model.is_null() {
        return fail(Status::InvalidArgument, "out_model must not be null");
    }
    let name = match name.decode() {
        Ok(name) => name,
        Err(e) => return fail(input_status(&e), format!("model name: {e}")),
    };
    match REGISTRY.load(name) {
        Ok(model) => {
            ptr::write(out_model, Box::into_raw(Box::new(model)));
            Status::Ok
        }
        Err(e) => fail(registry_status(&e), e),
    }
}

/// Release a model handle obtained from `localm_load_model`.
///
/// Must be called exactly once per handle. Blocks only on resource
/// teardown (the handle's inference worker is joined). Using the handle
/// after this call is undefined behavior; debug builds poison the
/// handle so misuse trips an assertion.
#[no_mangle]
pub unsafe extern "C" fn localm_release_model(model: *mut Model) {
    if model.is_null() {
        debug_assert!(false, "null model handle released");
        return;
    }
    let mut model = Box::from_raw(model);
    model.retire();
    drop(model);
}

/// Generate up to `max_tokens` tokens of text continuing `prompt`.
///
/// Blocking for the full duration of the generation. The budget is an
/// upper bound; generation stops earlier when the model emits its
/// end-of-generation token. A zero budget and an immediately-ending
/// generation both succeed with a zero-length buffer. On `Ok` the
/// caller owns the buffer written to `out_text` and must release it
/// exactly once with `localm_release_buffer`; on failure any partially
/// generated text is discarded and `out_text` is untouched.
///
/// Concurrent calls on one handle are serialized internally; distinct
/// handles generate independently.
#[no_mangle]
pub unsafe extern "C" fn localm_generate(
    model: *mut Model,
    prompt: BorrowedStr,
    max_tokens: usize,
    out_text: *mut OwnedBuf,
) -> Status {
    if out_text.is_null() {
        return fail(Status::InvalidArgument, "out_text must not be null");
    }
    let prompt = match prompt.decode() {
        Ok(prompt) => prompt,
        Err(e) => return fail(input_status(&e), format!("prompt: {e}")),
    };
    if model.is_null() {
        return fail(Status::InvalidArgument, "model handle must not be null");
    }
    let model = &*model;
    match model.complete(prompt, max_tokens) {
        Ok(text) => {
            ptr::write(out_text, OwnedBuf::from(text));
            Status::Ok
        }
        Err(e) => fail(Status::GenerationFailed, e),
    }
}

/// Release a transferred buffer obtained from this library.
///
/// Must be called exactly once per buffer; the memory is returned to
/// the allocator that produced it. The struct is poisoned (`data`
/// becomes null) so a second release is detectable in debug builds.
#[no_mangle]
pub unsafe extern "C" fn localm_release_buffer(buf: *mut OwnedBuf) {
    if buf.is_null() {
        debug_assert!(false, "null buffer released");
        return;
    }
    (*buf).release();
}

/// Copy the calling thread's most recent failure message into a
/// transferred buffer.
///
/// Returns `true` and writes `out_message` if a boundary call on this
/// thread has failed; the message persists until the next failure
/// overwrites it. The buffer must be released with
/// `localm_release_buffer`.
#[no_mangle]
pub unsafe extern "C" fn localm_last_error(out_message: *mut OwnedBuf) -> bool {
    if out_message.is_null() {
        return false;
    }
    let message = LAST_ERROR.with(|e| e.borrow().clone());
    match message {
        Some(message) => {
            ptr::write(out_message, OwnedBuf::from(message));
            true
        }
        None => false,
    }
}

/// Install a `tracing` subscriber reading the `RUST_LOG` environment
/// variable.
///
/// Opt-in: a library must not hijack the host's logging, so nothing is
/// installed unless the embedder asks. Safe to call more than once;
/// later calls are no-ops.
#[no_mangle]
pub extern "C" fn localm_init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let _ = tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("localm=info".parse().unwrap()))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn borrowed(text: &str) -> BorrowedStr {
        BorrowedStr::new(text.as_ptr(), text.len())
    }

    #[test]
    fn unknown_model_is_a_lookup_failure() {
        let mut out: *mut Model = ptr::null_mut();
        let status = unsafe { localm_load_model(borrowed("not-a-real-model"), &mut out) };
        assert_eq!(status, Status::UnknownModel);
        assert!(out.is_null(), "no handle may be issued on failure");
    }

    #[test]
    fn load_rejects_invalid_utf8_name() {
        let bytes = [0xffu8, 0xfe, 0xfd];
        let name = BorrowedStr::new(bytes.as_ptr(), bytes.len());
        let mut out: *mut Model = ptr::null_mut();
        let status = unsafe { localm_load_model(name, &mut out) };
        assert_eq!(status, Status::InvalidUtf8);
        assert!(out.is_null());
    }

    #[test]
    fn load_rejects_null_out_pointer() {
        let status = unsafe { localm_load_model(borrowed("mistral"), ptr::null_mut()) };
        assert_eq!(status, Status::InvalidArgument);
    }

    #[test]
    fn empty_name_is_a_lookup_failure() {
        let mut out: *mut Model = ptr::null_mut();
        let status = unsafe { localm_load_model(BorrowedStr::new(ptr::null(), 0), &mut out) };
        assert_eq!(status, Status::UnknownModel);
        assert!(out.is_null());
    }

    #[test]
    fn generate_rejects_null_handle() {
        let mut out = OwnedBuf::from(String::new());
        let status =
            unsafe { localm_generate(ptr::null_mut(), borrowed("hello"), 10, &mut out) };
        assert_eq!(status, Status::InvalidArgument);
    }

    #[test]
    fn generate_rejects_invalid_utf8_prompt() {
        // Input marshalling is checked before the handle is touched, so
        // the validity failure is observable without a loaded model.
        let bytes = [0x80u8, 0x80];
        let prompt = BorrowedStr::new(bytes.as_ptr(), bytes.len());
        let mut out = OwnedBuf::from(String::new());
        let status = unsafe { localm_generate(ptr::null_mut(), prompt, 10, &mut out) };
        assert_eq!(status, Status::InvalidUtf8);
        assert!(out.is_empty(), "no buffer may be produced on failure");
    }

    #[test]
    fn generate_rejects_null_out_pointer() {
        let status = unsafe {
            localm_generate(ptr::null_mut(), borrowed("hello"), 10, ptr::null_mut())
        };
        assert_eq!(status, Status::InvalidArgument);
    }

    #[test]
    fn release_buffer_poisons_through_the_entry_point() {
        let mut buf = OwnedBuf::from(String::from("generated"));
        unsafe { localm_release_buffer(&mut buf) };
        assert!(buf.is_empty());
        assert_eq!(buf.as_bytes(), b"");
    }

    #[test]
    fn last_error_reports_the_most_recent_failure() {
        let mut out: *mut Model = ptr::null_mut();
        unsafe { localm_load_model(borrowed("no-such-model"), &mut out) };

        let mut message = OwnedBuf::from(String::new());
        assert!(unsafe { localm_last_error(&mut message) });
        let text = String::from_utf8(message.as_bytes().to_vec()).unwrap();
        assert!(text.contains("no-such-model"), "message was: {text}");
        unsafe { localm_release_buffer(&mut message) };
    }

    #[test]
    fn last_error_buffer_roundtrip_leaves_no_allocation() {
        let mut out: *mut Model = ptr::null_mut();
        unsafe { localm_load_model(borrowed("no-such-model"), &mut out) };

        let before = crate::testalloc::net_bytes();
        let mut message = OwnedBuf::from(String::new());
        assert!(unsafe { localm_last_error(&mut message) });
        unsafe { localm_release_buffer(&mut message) };
        assert_eq!(crate::testalloc::net_bytes(), before);
    }

    // Requires a cached model artifact and links against llama.cpp.
    #[test]
    #[ignore]
    fn end_to_end_generate_and_release() {
        let mut model: *mut Model = ptr::null_mut();
        let status = unsafe { localm_load_model(borrowed("gpt2"), &mut model) };
        assert_eq!(status, Status::Ok);
        assert!(!model.is_null());

        // Zero budget succeeds with a zero-length buffer
        let mut text = OwnedBuf::from(String::new());
        let status = unsafe { localm_generate(model, borrowed("hello"), 0, &mut text) };
        assert_eq!(status, Status::Ok);
        assert_eq!(text.len(), 0);
        unsafe { localm_release_buffer(&mut text) };

        let mut text = OwnedBuf::from(String::new());
        let status = unsafe { localm_generate(model, borrowed("The sky is"), 8, &mut text) };
        assert_eq!(status, Status::Ok);
        unsafe { localm_release_buffer(&mut text) };

        // A second handle of the same name is independent: releasing
        // the first must not invalidate it.
        let mut second: *mut Model = ptr::null_mut();
        let status = unsafe { localm_load_model(borrowed("gpt2"), &mut second) };
        assert_eq!(status, Status::Ok);
        unsafe { localm_release_model(model) };

        let mut text = OwnedBuf::from(String::new());
        let status = unsafe { localm_generate(second, borrowed("One two"), 4, &mut text) };
        assert_eq!(status, Status::Ok);
        unsafe { localm_release_buffer(&mut text) };
        unsafe { localm_release_model(second) };
    }
}
