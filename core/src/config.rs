//! Process-wide engine options.
//!
//! Options are resolved once: either explicitly through [`install_options`]
//! before the first composed call runs, or lazily from the environment.

use anyhow::{Result, anyhow};
use once_cell::sync::OnceCell;
use serde::Deserialize;

/// Number of interpreted invocations after which a plan is lowered.
pub const DEFAULT_COMPILE_THRESHOLD: i32 = 30;

const ENV_COMPILE_THRESHOLD: &str = "CALLPLAN_COMPILE_THRESHOLD";
const ENV_EAGER_FORCE_INLINE: &str = "CALLPLAN_EAGER_FORCE_INLINE";
const ENV_DUMP_LOWERED: &str = "CALLPLAN_DUMP_LOWERED";

static OPTIONS: OnceCell<EngineOptions> = OnceCell::new();

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineOptions {
    /// Invocation count that trips lowering. `0` lowers on the first call,
    /// a negative value keeps every plan interpreted.
    pub compile_threshold: i32,
    /// Lower plans flagged `force_inline` on their first invocation.
    pub eager_force_inline: bool,
    /// Log every installed routine listing at `debug` level.
    pub dump_lowered: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            compile_threshold: DEFAULT_COMPILE_THRESHOLD,
            eager_force_inline: true,
            dump_lowered: false,
        }
    }
}

impl EngineOptions {
    /// Defaults overridden by `CALLPLAN_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut options = Self::default();
        if let Ok(raw) = std::env::var(ENV_COMPILE_THRESHOLD) {
            options.compile_threshold = raw
                .trim()
                .parse()
                .map_err(|e| anyhow!("{} must be an integer, got '{}': {}", ENV_COMPILE_THRESHOLD, raw, e))?;
        }
        if let Ok(raw) = std::env::var(ENV_EAGER_FORCE_INLINE) {
            options.eager_force_inline = parse_flag(ENV_EAGER_FORCE_INLINE, &raw)?;
        }
        if let Ok(raw) = std::env::var(ENV_DUMP_LOWERED) {
            options.dump_lowered = parse_flag(ENV_DUMP_LOWERED, &raw)?;
        }
        Ok(options)
    }

    /// Parses a JSON options object; missing keys keep their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| anyhow!("invalid engine options: {}", e))
    }

    /// Whether a plan that has been invoked `count` times should be lowered now.
    pub fn should_lower(&self, count: u32, force_inline: bool) -> bool {
        if force_inline && self.eager_force_inline {
            return true;
        }
        match u32::try_from(self.compile_threshold) {
            Ok(threshold) => count >= threshold,
            Err(_) => false,
        }
    }
}

fn parse_flag(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(anyhow!("{} must be a boolean flag, got '{}'", name, other)),
    }
}

/// Installs the process-wide options. Fails if options were already resolved.
pub fn install_options(options: EngineOptions) -> Result<()> {
    OPTIONS
        .set(options)
        .map_err(|_| anyhow!("engine options were already installed"))
}

/// The active options, resolving them from the environment on first use.
pub fn options() -> &'static EngineOptions {
    OPTIONS.get_or_init(|| match EngineOptions::from_env() {
        Ok(options) => options,
        Err(err) => {
            tracing::warn!(target: "callplan::config", "ignoring invalid environment options: {:#}", err);
            EngineOptions::default()
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_overrides_only_given_keys() {
        let options = EngineOptions::from_json(r#"{"compileThreshold": 3}"#).unwrap();
        assert_eq!(options.compile_threshold, 3);
        assert!(options.eager_force_inline);
        assert!(!options.dump_lowered);
    }

    #[test]
    fn json_rejects_wrong_types() {
        assert!(EngineOptions::from_json(r#"{"compileThreshold": "soon"}"#).is_err());
    }

    #[test]
    fn negative_threshold_never_lowers() {
        let options = EngineOptions {
            compile_threshold: -1,
            eager_force_inline: false,
            dump_lowered: false,
        };
        assert!(!options.should_lower(u32::MAX, false));
        assert!(!options.should_lower(u32::MAX, true));
    }

    #[test]
    fn force_inline_lowers_eagerly() {
        let options = EngineOptions::default();
        assert!(options.should_lower(1, true));
        assert!(!options.should_lower(1, false));
        assert!(options.should_lower(DEFAULT_COMPILE_THRESHOLD as u32, false));
    }

    #[test]
    fn flags_accept_common_spellings() {
        assert!(parse_flag("X", "On").unwrap());
        assert!(!parse_flag("X", "0").unwrap());
        assert!(parse_flag("X", "maybe").is_err());
    }
}
