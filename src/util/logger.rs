use the_log_crate::SetLoggerError;

/// Attempt to init a env_logger for the decoder and its diagnostic tools.
/// Does nothing if the "builtin_env_logger" feature is disabled.
///
/// Embedders that already install their own `log` backend should disable the feature (or simply
/// not call this function).
pub fn try_init() -> Result<(), SetLoggerError> {
    cfg_if::cfg_if! {
        if #[cfg(feature = "builtin_env_logger")] {
            env_logger::try_init_from_env(
                // By default, use info level logging.
                env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
            )
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn init_twice() {
        // Another test may have installed a logger already, so only the second call is certain
        // to fail (when a logger is built in at all).
        let _ = super::try_init();
        let second = super::try_init();
        if cfg!(feature = "builtin_env_logger") {
            assert!(second.is_err());
        } else {
            assert!(second.is_ok());
        }
    }
}
