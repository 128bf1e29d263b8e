//! Utilities used by the decoder, the encoder and the diagnostic tools.

/// Address arithmetic for frame slots.
pub mod address;
/// Bit-granular reading and writing, and the variable-length integer code.
pub mod bit_stream;
/// Fixed-length bit sets for live slot sets.
pub mod bitmap;
/// Constants of the host machine.
pub mod constants;
/// Wrappers of the logging macros.
pub(crate) mod log;
/// The built-in `env_logger` setup.
pub mod logger;
/// Decoder options.
pub mod options;

#[cfg(any(test, feature = "test_private"))]
pub mod test_util;

pub use self::address::Address;
