//! Debug switch for the command line tool
//!
//! Set ONNXML_DEBUG=1 or ONNXML_DEBUG=true to log plan assembly at `debug`
//! level. `RUST_LOG` still takes precedence when set.

use std::env;
use std::sync::OnceLock;

static DEBUG_ENABLED: OnceLock<bool> = OnceLock::new();

fn flag_enabled(value: Option<&str>) -> bool {
    value.is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

/// Check if debug mode is enabled via the ONNXML_DEBUG environment variable
#[inline]
pub fn debug_enabled() -> bool {
    *DEBUG_ENABLED.get_or_init(|| flag_enabled(env::var("ONNXML_DEBUG").ok().as_deref()))
}

/// Filter directive used when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    if debug_enabled() { "debug" } else { "warn" }
}

#[cfg(test)]
mod tests {
    use super::flag_enabled;

    #[test]
    fn accepts_one_and_true() {
        assert!(flag_enabled(Some("1")));
        assert!(flag_enabled(Some("TRUE")));
        assert!(!flag_enabled(Some("0")));
        assert!(!flag_enabled(Some("yes")));
        assert!(!flag_enabled(None));
    }
}
