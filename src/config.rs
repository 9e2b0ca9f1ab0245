//! Environment-derived runtime configuration.
//!
//! Read once, at construction, into an explicit value; nothing downstream consults the
//! environment again. This is deliberately separate from [`crate::addr::MachineConfig`],
//! which describes the fixed physical shape of a deployment rather than a per-run knob.

/// Runtime knobs read from the environment at [`RuntimeConfig::from_env`] time.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RuntimeConfig {
    /// Board count in x, overriding the caller's default. `None` leaves the default untouched.
    pub boards_x: Option<u32>,
    /// Board count in y, overriding the caller's default.
    pub boards_y: Option<u32>,
    /// Physical box grid width declared by the host link transport.
    pub boxes_x: Option<u32>,
    /// Physical box grid height declared by the host link transport.
    pub boxes_y: Option<u32>,
    /// Whether to emit a timing breakdown; `true` unless `POLITE_CHATTY=0`.
    pub chatty: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            boards_x: None,
            boards_y: None,
            boxes_x: None,
            boxes_y: None,
            chatty: true,
        }
    }
}

#[cfg(feature = "std")]
impl RuntimeConfig {
    /// Read `POLITE_BOARDS_X`, `POLITE_BOARDS_Y`, `HOSTLINK_BOXES_X`, `HOSTLINK_BOXES_Y`, and
    /// `POLITE_CHATTY` exactly once, into an immutable value.
    pub fn from_env() -> Self {
        let cfg = Self {
            boards_x: read_u32("POLITE_BOARDS_X"),
            boards_y: read_u32("POLITE_BOARDS_Y"),
            boxes_x: read_u32("HOSTLINK_BOXES_X"),
            boxes_y: read_u32("HOSTLINK_BOXES_Y"),
            chatty: std::env::var("POLITE_CHATTY").map(|v| v != "0").unwrap_or(true),
        };
        crate::fmt::debug!("runtime config loaded from environment");
        cfg
    }
}

#[cfg(feature = "std")]
fn read_u32(name: &str) -> Option<u32> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    #[test]
    fn from_env_defaults_when_unset() {
        // SAFETY: test-only, no other thread in this process touches these variable names.
        unsafe {
            std::env::remove_var("POLITE_BOARDS_X");
            std::env::remove_var("POLITE_CHATTY");
        }
        let cfg = RuntimeConfig::from_env();
        assert_eq!(cfg.boards_x, None);
        assert!(cfg.chatty);
    }

    #[test]
    fn from_env_is_pure_after_construction() {
        // SAFETY: test-only, single-threaded access to this variable name.
        unsafe {
            std::env::set_var("POLITE_CHATTY", "0");
        }
        let cfg = RuntimeConfig::from_env();
        assert!(!cfg.chatty);
        // SAFETY: test-only, single-threaded access to this variable name.
        unsafe {
            std::env::set_var("POLITE_CHATTY", "1");
        }
        // `cfg` must not have changed retroactively.
        assert!(!cfg.chatty);
    }
}
