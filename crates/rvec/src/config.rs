/// Environment variable enabling the data-address reverse index
pub const ENV_NATIVE_INSPECTOR: &str = "RVEC_NATIVE_INSPECTOR";
/// Environment variable enabling allocation-site tracing for mirrors
pub const ENV_TRACE_MIRRORS: &str = "RVEC_TRACE_MIRRORS";

/// Handles start at an odd value that is not a plausible native address
pub const DEFAULT_HANDLE_BASE: u64 = 0x0def_0000_0000_0001;
/// Odd base plus an even stride keeps every handle odd and non-zero
pub const DEFAULT_HANDLE_STRIDE: u64 = 2;

/// Odd base, even non-zero stride
pub(crate) fn handle_sequence(base: u64, stride: u64) -> (u64, u64) {
    (base | 1, stride.max(2) & !1)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeConfig {
    pub address_index: bool,
    pub trace_allocation_sites: bool,
    pub handle_base: u64,
    pub handle_stride: u64,
    pub worker_name: String,
}

impl Default for NativeConfig {
    fn default() -> Self {
        Self {
            address_index: false,
            trace_allocation_sites: false,
            handle_base: DEFAULT_HANDLE_BASE,
            handle_stride: DEFAULT_HANDLE_STRIDE,
            worker_name: "native-reference-queue-worker".to_string(),
        }
    }
}

impl NativeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults, with the debugging switches read from the environment
    pub fn from_env() -> Self {
        Self::default()
            .with_address_index(std::env::var_os(ENV_NATIVE_INSPECTOR).is_some())
            .with_trace_allocation_sites(std::env::var_os(ENV_TRACE_MIRRORS).is_some())
    }

    pub fn with_address_index(mut self, enabled: bool) -> Self {
        self.address_index = enabled;
        self
    }

    pub fn with_trace_allocation_sites(mut self, enabled: bool) -> Self {
        self.trace_allocation_sites = enabled;
        self
    }

    /// Base and stride of the handle counter.
    ///
    /// The base is forced odd and the stride even (at least 2), so every
    /// handle is odd: the counter can wrap but never yields the "not
    /// materialized" zero.
    pub fn with_handles(mut self, base: u64, stride: u64) -> Self {
        (self.handle_base, self.handle_stride) = handle_sequence(base, stride);
        self
    }

    pub fn with_worker_name(mut self, name: impl Into<String>) -> Self {
        self.worker_name = name.into();
        self
    }
}
