/*!

Debug settings.

Settings are read once, usually from `NEO_*` environment variables, and
shared immutably by the [`Device`](crate::device::Device) and everything
created from it. Tests construct a fresh value per case instead of mutating
process state.

```
# use neo_dispatch::config::DebugSettings;
let settings = DebugSettings::from_lookup(|key| {
    (key == "NEO_ENABLE_SW_TAGS").then(|| "1".to_string())
})?;
assert!(settings.enable_sw_tags);
assert_eq!(settings.enable_implicit_scaling, -1);
# Ok::<(), anyhow::Error>(())
```
*/

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// A value that can be parsed from an environment variable.
pub trait SettingValue: Sized {
    fn parse_setting(value: &str) -> Result<Self>;
}

impl SettingValue for bool {
    fn parse_setting(value: &str) -> Result<Self> {
        match value.trim() {
            "1" | "true" | "TRUE" | "True" => Ok(true),
            "0" | "false" | "FALSE" | "False" => Ok(false),
            other => bail!("expected a boolean, found {other:?}"),
        }
    }
}

macro_rules! impl_setting_value_from_str {
    ($($t:ty),*) => {
        $(
            impl SettingValue for $t {
                fn parse_setting(value: &str) -> Result<Self> {
                    Ok(value.trim().parse()?)
                }
            }
        )*
    };
}

impl_setting_value_from_str!(i32, i64, u32, u64, String);

macro_rules! debug_settings {
    ($(
        $(#[$meta:meta])*
        $field:ident: $t:ty = $default:expr, $var:literal;
    )*) => {
        /// Process wide driver configuration. `-1` selects the platform
        /// default for integer settings.
        ///
        /// Missing fields deserialize to their defaults.
        #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(default)]
        pub struct DebugSettings {
            $(
                $(#[$meta])*
                pub $field: $t,
            )*
        }

        impl Default for DebugSettings {
            fn default() -> Self {
                Self {
                    $($field: $default,)*
                }
            }
        }

        impl DebugSettings {
            /// Names of the environment variables that are read.
            pub const VARIABLES: &'static [&'static str] = &[$($var),*];

            /// Reads every setting through `lookup`, keeping the default for
            /// missing keys.
            pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
                let mut settings = Self::default();
                $(
                    if let Some(value) = lookup($var) {
                        settings.$field = <$t as SettingValue>::parse_setting(&value)
                            .with_context(|| format!("{}={value:?}", $var))?;
                    }
                )*
                Ok(settings)
            }
        }
    };
}

debug_settings! {
    /// Emit diagnostics on stderr.
    print_debug_messages: bool = false, "NEO_PRINT_DEBUG_MESSAGES";
    /// `1` forces indirect access off for every kernel.
    disable_indirect_access: i32 = -1, "NEO_DISABLE_INDIRECT_ACCESS";
    /// Reject kernel pointer arguments that are not tracked allocations.
    disallow_system_pointers: bool = false, "NEO_DISABLE_SYSTEM_POINTER_KERNEL_ARGUMENT";
    allow_mixing_regular_and_cooperative_kernels: bool = false, "NEO_ALLOW_MIXING_REGULAR_AND_COOPERATIVE_KERNELS";
    /// Wrap every launch in marker no-ops.
    enable_sw_tags: bool = false, "NEO_ENABLE_SW_TAGS";
    force_default_thread_arbitration_policy_if_not_specified: bool = false,
        "NEO_FORCE_DEFAULT_THREAD_ARBITRATION_POLICY_IF_NOT_SPECIFIED";
    /// Overrides the queue's initial thread arbitration policy.
    override_thread_arbitration_policy: i32 = -1, "NEO_OVERRIDE_THREAD_ARBITRATION_POLICY";
    enable_implicit_scaling: i32 = -1, "NEO_ENABLE_IMPLICIT_SCALING";
    over_dispatch_control: i32 = -1, "NEO_OVER_DISPATCH_CONTROL";
    enable_pass_inline_data: i32 = -1, "NEO_ENABLE_PASS_INLINE_DATA";
    /// `1` dispatches command list buffers as primary batch buffers.
    dispatch_cmdlist_batch_buffer_as_primary: i32 = -1, "NEO_DISPATCH_CMDLIST_CMD_BUFFER_PRIMARY";
    enable_direct_submission: bool = false, "NEO_ENABLE_DIRECT_SUBMISSION";
    enable_relaxed_ordering: bool = false, "NEO_DIRECT_SUBMISSION_RELAXED_ORDERING";
    /// Zeroes deferred noop space with store commands at submission.
    enable_patching_preamble: i32 = -1, "NEO_FORCE_PATCHING_PREAMBLE";
    /// Size in bytes of the device wide bindless surface state heap.
    bindless_heap_size: u64 = 64 * 1024, "NEO_BINDLESS_HEAP_SIZE";
}

impl DebugSettings {
    /// Reads the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
    pub(crate) fn debug_message(&self, message: std::fmt::Arguments) {
        if self.print_debug_messages {
            eprintln!("{message}");
        }
    }
}

/// Resolves a tri-state `-1`/`0`/`1` setting against a platform default.
pub(crate) fn tri_state(value: i32, default: bool) -> bool {
    match value {
        -1 => default,
        0 => false,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_select_platform_behavior() {
        let settings = DebugSettings::default();
        assert!(!settings.print_debug_messages);
        assert_eq!(settings.disable_indirect_access, -1);
        assert!(tri_state(settings.enable_implicit_scaling, true));
        assert!(!tri_state(0, true));
    }

    #[test]
    fn lookup_overrides_and_rejects_garbage() {
        let vars: HashMap<&str, &str> = [
            ("NEO_PRINT_DEBUG_MESSAGES", "true"),
            ("NEO_OVER_DISPATCH_CONTROL", "3"),
        ]
        .into_iter()
        .collect();
        let settings = DebugSettings::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap();
        assert!(settings.print_debug_messages);
        assert_eq!(settings.over_dispatch_control, 3);
        let err = DebugSettings::from_lookup(|key| {
            (key == "NEO_ENABLE_SW_TAGS").then(|| "maybe".to_string())
        })
        .unwrap_err();
        assert!(format!("{err:#}").contains("NEO_ENABLE_SW_TAGS"));
        assert_eq!(DebugSettings::VARIABLES.len(), 15);
    }

    #[test]
    fn settings_can_be_captured() {
        let settings = DebugSettings {
            enable_sw_tags: true,
            enable_patching_preamble: 1,
            ..DebugSettings::default()
        };
        let bytes = bincode::serialize(&settings).unwrap();
        assert_eq!(bincode::deserialize::<DebugSettings>(&bytes).unwrap(), settings);
    }
}
