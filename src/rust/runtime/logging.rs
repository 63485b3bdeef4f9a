// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use ::flexi_logger::Logger;
use ::std::sync::Once;

//==============================================================================
// Static Variables
//==============================================================================

/// Guardian to the logging initialize function.
static INIT_LOG: Once = Once::new();

//==============================================================================
// Standalone Functions
//==============================================================================

/// Initializes logging features. The log filter is read from the `RUST_LOG` environment variable.
pub fn initialize() {
    INIT_LOG.call_once(|| {
        // A second logger may already be installed by the embedding kernel, in which case we keep that one.
        if let Err(e) = Logger::try_with_env_or_str("").and_then(|logger| logger.start()) {
            eprintln!("initialize(): failed to start logger ({:?})", e);
        }
    });
}
