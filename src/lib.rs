// Satchel - Server-side session state for Rust
//
// One session contract over several storage backends, with eager or lazy
// persistence, identifier regeneration and read-once flash messages.

// Re-export session functionality
pub use satchel_session::*;

// Re-export logging
pub use satchel_log as log;

/// Prelude for common imports.
///
/// ```
/// use satchel::prelude::*;
/// ```
pub mod prelude {
    pub use satchel_session::prelude::*;
    pub use satchel_session::{IdStrategy, IdGenerator, Granularity, FLASH_KEY};
}
