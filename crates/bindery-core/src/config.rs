/// Tunables for one [`Engine`](crate::Engine).
///
/// Defaults match what markup authors expect; hosts usually start from
/// [`EngineConfig::from_env`] so behaviour can be adjusted without a rebuild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Consecutive statements without state changes before the async
    /// processor forces one cooperative yield to the host.
    pub idle_yield_threshold: usize,
    /// Names starting with this character are synthetic, read-only bindings.
    pub reserved_sigil: char,
    /// Treat every member access as `?.` (reading a member of `undefined`
    /// yields `undefined` instead of failing).
    pub optional_member_access: bool,
    /// Whether handler failures reach the error sink when the caller did not
    /// say otherwise.
    pub signal_errors_by_default: bool,
    /// Log every executed statement at `trace` level.
    pub trace_statements: bool,
    /// Nesting limit for script function calls. Deeper calls fail with
    /// [`ScriptError::CallDepthExceeded`](crate::ScriptError::CallDepthExceeded).
    pub max_call_depth: usize,
    /// Largest length a script may grow an array to (by index or `length`
    /// writes) or pad a string to. Never above
    /// [`EngineConfig::ARRAY_LENGTH_CEILING`].
    pub max_array_length: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            idle_yield_threshold: 100,
            reserved_sigil: '$',
            optional_member_access: false,
            signal_errors_by_default: true,
            trace_statements: false,
            max_call_depth: 64,
            max_array_length: 1 << 20,
        }
    }
}

impl EngineConfig {
    pub const IDLE_YIELD_THRESHOLD_VAR: &'static str = "BINDERY_IDLE_YIELD_THRESHOLD";
    pub const OPTIONAL_MEMBER_ACCESS_VAR: &'static str = "BINDERY_OPTIONAL_MEMBER_ACCESS";
    pub const TRACE_VAR: &'static str = "BINDERY_TRACE";

    /// Hard upper bound for [`EngineConfig::max_array_length`]; container
    /// commits enforce it regardless of configuration.
    pub const ARRAY_LENGTH_CEILING: usize = 1 << 24;

    /// Defaults overridden by `BINDERY_*` environment variables. Unparsable
    /// values are ignored with a warning.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(raw) = lookup(Self::IDLE_YIELD_THRESHOLD_VAR) {
            match raw.trim().parse::<usize>() {
                Ok(value) => config.idle_yield_threshold = value,
                Err(_) => log::warn!(
                    "ignoring {}={raw:?}: not a number",
                    Self::IDLE_YIELD_THRESHOLD_VAR
                ),
            }
        }
        if let Some(raw) = lookup(Self::OPTIONAL_MEMBER_ACCESS_VAR) {
            config.optional_member_access = flag(&raw);
        }
        if let Some(raw) = lookup(Self::TRACE_VAR) {
            config.trace_statements = flag(&raw);
        }
        config
    }

    pub fn with_idle_yield_threshold(mut self, threshold: usize) -> Self {
        self.idle_yield_threshold = threshold;
        self
    }

    pub fn with_reserved_sigil(mut self, sigil: char) -> Self {
        self.reserved_sigil = sigil;
        self
    }

    pub fn with_optional_member_access(mut self, enabled: bool) -> Self {
        self.optional_member_access = enabled;
        self
    }

    pub fn with_signal_errors_by_default(mut self, enabled: bool) -> Self {
        self.signal_errors_by_default = enabled;
        self
    }

    pub fn with_trace_statements(mut self, enabled: bool) -> Self {
        self.trace_statements = enabled;
        self
    }

    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    pub fn with_max_array_length(mut self, length: usize) -> Self {
        self.max_array_length = length.min(Self::ARRAY_LENGTH_CEILING);
        self
    }
}

fn flag(raw: &str) -> bool {
    !matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "" | "0" | "false" | "no" | "off"
    )
}
