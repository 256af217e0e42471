//! Logging setup for the probe binary and GPU tests

/// Initialize the logging system
///
/// Uses env_logger with default filter level of `info`.
/// Override with RUST_LOG environment variable. Safe to call more than
/// once; later calls keep the logger already installed.
///
/// # Example
/// ```
/// quadterrain::core::logging::init();
/// log::info!("Terrain selection started");
/// ```
pub fn init() {
    let installed = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info")
    ).try_init();
    if let Err(e) = installed {
        log::debug!("Keeping existing logger: {}", e);
    }
}

/// Logger for test binaries: output is captured per test and the default
/// level is `debug` so capacity and reallocation messages show on failure.
pub fn init_for_tests() {
    let installed = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("debug")
    )
    .is_test(true)
    .try_init();
    if let Err(e) = installed {
        log::trace!("Keeping existing test logger: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_init_keeps_first_logger() {
        init_for_tests();
        init_for_tests();
        init();
        log::info!("logger survives repeated init");
    }
}
