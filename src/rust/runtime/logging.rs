// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use ::flexi_logger::{
    Logger,
    LoggerHandle,
};
use ::std::sync::{
    Once,
    OnceLock,
};

//==============================================================================
// Static Variables
//==============================================================================

/// Guardian to the logging initialize function.
static INIT_LOG: Once = Once::new();

/// Keeps the logger alive for the lifetime of the program.
static LOGGER: OnceLock<LoggerHandle> = OnceLock::new();

//==============================================================================
// Standalone Functions
//==============================================================================

/// Initializes logging features. `RUST_LOG` takes precedence over `default_spec`.
pub fn initialize(default_spec: &str) {
    INIT_LOG.call_once(|| {
        match Logger::try_with_env_or_str(default_spec).and_then(|logger| logger.start()) {
            Ok(handle) => {
                let _ = LOGGER.set(handle);
            },
            Err(e) => eprintln!("initialize(): cannot start logger ({:?})", e),
        }
    });
}
