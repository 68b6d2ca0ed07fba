//! Error types for native vector storage
//!
//! Native faults (allocation failure, stale handles) terminate the current
//! operation and are never retried. Access faults cover malformed requests
//! against a vector's typed storage. Both carry `miette` diagnostics with
//! stable codes.

use miette::Diagnostic;
use rvec_val::ElemType;
use thiserror::Error;

/// Alias for Result type with vector storage errors
pub type VecResult<T> = std::result::Result<T, VecError>;

/// Every error the storage core can report
#[derive(Error, Diagnostic, Debug)]
pub enum VecError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Native(#[from] NativeError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Access(#[from] AccessError),
}

impl VecError {
    /// Internal-consistency faults signal a defect elsewhere, not bad input
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            VecError::Native(NativeError::InvalidHandle { .. })
                | VecError::Access(AccessError::RepresentationMismatch { .. })
        )
    }
}

// ============================================================================
// Native Errors (E0401-E0499)
// ============================================================================

#[derive(Error, Diagnostic, Debug)]
pub enum NativeError {
    #[error("failed to allocate {bytes} bytes of native memory")]
    #[diagnostic(
        code(rvec_native_E0401),
        help("Native allocations are not retried; free memory or reduce the vector size")
    )]
    AllocationFailure { bytes: usize },

    #[error("unknown native reference {handle:#x} (current id count: {counter:#x})")]
    #[diagnostic(code(rvec_native_E0402))]
    InvalidHandle {
        handle: u64,
        counter: u64,
        /// Allocation site of the mirror, when site tracing is enabled
        #[help]
        site: Option<String>,
    },

    #[error("cannot adopt a null native buffer of length {length}")]
    #[diagnostic(code(rvec_native_E0403))]
    NullBuffer { length: usize },

    #[error("native context has been dropped")]
    #[diagnostic(
        code(rvec_native_E0404),
        help("String elements keep only a weak link to their context")
    )]
    ContextDropped,
}

// ============================================================================
// Access Errors (E0501-E0599)
// ============================================================================

#[derive(Error, Diagnostic, Debug)]
pub enum AccessError {
    #[error("representation mismatch: expected {expected} element, found {found}")]
    #[diagnostic(
        code(rvec_access_E0501),
        help("Element type and storage width disagree; this should be unreachable")
    )]
    RepresentationMismatch { expected: ElemType, found: ElemType },

    #[error("index {index} out of bounds for length {length}")]
    #[diagnostic(code(rvec_access_E0502))]
    IndexOutOfBounds { index: usize, length: usize },

    #[error("length {length} exceeds allocated capacity {true_length}")]
    #[diagnostic(
        code(rvec_access_E0503),
        help("Grow the true length first to reallocate the backing store")
    )]
    LengthExceedsCapacity { length: usize, true_length: usize },

    #[error("true length {true_length} is below length {length}")]
    #[diagnostic(code(rvec_access_E0504), help("Shrink the length before the capacity"))]
    TrueLengthBelowLength { true_length: usize, length: usize },

    #[error("{ty} vectors cannot adopt an external native buffer")]
    #[diagnostic(code(rvec_access_E0505))]
    UnsupportedExternal { ty: ElemType },
}

impl AccessError {
    pub fn mismatch(expected: ElemType, found: ElemType) -> VecError {
        VecError::Access(AccessError::RepresentationMismatch { expected, found })
    }

    pub fn out_of_bounds(index: usize, length: usize) -> VecError {
        VecError::Access(AccessError::IndexOutOfBounds { index, length })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err: VecError = NativeError::AllocationFailure { bytes: 16 }.into();
        assert_eq!(
            err.code().map(|c| c.to_string()),
            Some("rvec_native_E0401".to_string())
        );
        assert!(!err.is_internal());

        let err = AccessError::mismatch(ElemType::Int, ElemType::Double);
        assert_eq!(
            err.code().map(|c| c.to_string()),
            Some("rvec_access_E0501".to_string())
        );
        assert!(err.is_internal());
    }

    #[test]
    fn test_invalid_handle_message() {
        let err: VecError = NativeError::InvalidHandle {
            handle: 0x11,
            counter: 0x21,
            site: None,
        }
        .into();
        assert!(err.is_internal());
        assert_eq!(
            err.to_string(),
            "unknown native reference 0x11 (current id count: 0x21)"
        );
    }
}
