//! Decoder options.
//!
//! Options are declared once in the `options!` invocation below, each with a type, a validator
//! and a default. Every option can be overridden by an environment variable named after it with
//! the `GCINFO_` prefix (e.g. `GCINFO_EAGER_SLOT_LIMIT=64`), or programmatically through
//! [`Options::set_from_str`]. Invalid values are rejected with a warning and the previous value
//! is kept.

use crate::util::log;
use crate::vm::Arch;

/// The default number of slot descriptors decoded eagerly when a decoder is created. Slots past
/// this prefix are decoded on demand by scanning forward from the end of the prefix.
pub const DEFAULT_EAGER_SLOT_LIMIT: usize = 32;

/// The prefix of environment variables that set options.
pub const ENV_PREFIX: &str = "GCINFO_";

fn always_valid<T>(_: &T) -> bool {
    true
}

macro_rules! options {
    ($($(#[$outer:meta])* $name:ident: $type:ty[$validator:expr] = $default:expr),*,) => [
        options!($($(#[$outer])* $name: $type[$validator] = $default),*);
    ];
    ($($(#[$outer:meta])* $name:ident: $type:ty[$validator:expr] = $default:expr),*) => [
        #[derive(Clone, Debug)]
        pub struct Options {
            $($(#[$outer])* pub $name: $type),*
        }
        impl Options {
            /// Options with their built-in defaults, ignoring the environment.
            pub fn builtin() -> Self {
                Options {
                    $($name: $default),*
                }
            }

            /// Set an option by its name, parsing the value from a string. Returns false (and
            /// keeps the old value) if the name is unknown, or the value cannot be parsed or is
            /// rejected by the option's validator.
            pub fn set_from_str(&mut self, s: &str, val: &str) -> bool {
                match s {
                    // Parse the given value from str (by env vars or by calling set_from_str()) to the right type
                    $(stringify!($name) => if let Ok(ref val) = val.parse::<$type>() {
                        // Validate
                        let validate_fn = $validator;
                        let is_valid = validate_fn(val);
                        if is_valid {
                            // Only set value if valid.
                            self.$name = val.clone();
                        } else {
                            log::warn!("Unable to set {}={:?}. Invalid value. Previous value will be used.", s, val);
                        }
                        is_valid
                    } else {
                        log::warn!("Unable to set {}={:?}. Cannot parse value. Previous value will be used.", s, val);
                        false
                    })*
                    _ => {
                        log::warn!("Unknown option {}", s);
                        false
                    }
                }
            }

            /// Apply every `GCINFO_*` environment variable that names an option.
            pub fn read_env_var_settings(&mut self) {
                for (key, val) in std::env::vars() {
                    // strip the prefix, and get the lower case string
                    if let Some(rest_of_key) = key.strip_prefix(ENV_PREFIX) {
                        let lowercase: &str = &rest_of_key.to_lowercase();
                        match lowercase {
                            $(stringify!($name) => { self.set_from_str(lowercase, &val); },)*
                            _ => {}
                        }
                    }
                }
            }
        }
        impl Default for Options {
            fn default() -> Self {
                // If we have env vars that start with GCINFO_ and match any option (such as GCINFO_EAGER_SLOT_LIMIT),
                // we set the option to its value (if it is a valid value). Otherwise, use the default value.
                let mut options = Options::builtin();
                options.read_env_var_settings();
                options
            }
        }
    ]
}

options! {
    /// How many slot descriptors are materialized when a decoder is created. Queries for higher
    /// slot indices scan forward from the end of this prefix.
    eager_slot_limit:          usize  [|v: &usize| *v > 0] = DEFAULT_EAGER_SLOT_LIMIT,
    /// Memoize decoded rows of the shared safe-point live-state pool inside a decoder.
    cache_live_rows:           bool   [always_valid]       = true,
    /// Let the text dumper warn about stack slots with a negative offset from the frame's
    /// stack pointer. Such slots are reported as encoded; the warning only flags them.
    warn_suspicious_stack_base: bool  [always_valid]       = true,
    /// The architecture the text dumper assumes when none is given explicitly.
    dump_arch:                 Arch   [always_valid]       = Arch::X64,
}

lazy_static! {
    /// Process-wide options, read from the environment on first use.
    pub static ref OPTIONS: Options = Options::default();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_defaults() {
        let options = Options::builtin();
        assert_eq!(options.eager_slot_limit, DEFAULT_EAGER_SLOT_LIMIT);
        assert!(options.cache_live_rows);
        assert_eq!(options.dump_arch, Arch::X64);
    }

    #[test]
    fn set_valid_values() {
        let mut options = Options::builtin();
        assert!(options.set_from_str("eager_slot_limit", "4"));
        assert_eq!(options.eager_slot_limit, 4);
        assert!(options.set_from_str("cache_live_rows", "false"));
        assert!(!options.cache_live_rows);
        assert!(options.set_from_str("dump_arch", "Arm64"));
        assert_eq!(options.dump_arch, Arch::Arm64);
    }

    #[test]
    fn reject_invalid_values() {
        let mut options = Options::builtin();
        assert!(!options.set_from_str("eager_slot_limit", "0"));
        assert_eq!(options.eager_slot_limit, DEFAULT_EAGER_SLOT_LIMIT);
        assert!(!options.set_from_str("eager_slot_limit", "many"));
        assert!(!options.set_from_str("dump_arch", "Sparc"));
        assert_eq!(options.dump_arch, Arch::X64);
        assert!(!options.set_from_str("no_such_option", "1"));
    }
}
