//! Result type alias for mpcopy operations

use crate::Error;

/// Result type alias for mpcopy operations
pub type Result<T> = std::result::Result<T, Error>;
