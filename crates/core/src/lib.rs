//! # Omniex Core
//!
//! Primitives shared by every exchange connection:
//!
//! 1. **monoio runtime** - `ClientRuntime` drives blocking call variants and
//!    dedicated stream threads
//! 2. **Time** - the `Clock` seam, Unix-time helpers and `PerfTimer`
//! 3. **Nonces** - strictly increasing, per-connection request tokens
//! 4. **Secrets** - masked, zero-on-drop credential storage
//! 5. **Exact decimals** - `Fixed` for prices, amounts and fees
//! 6. **Logging** - tracing events with an ftlog or fmt subscriber

pub mod fixed;
pub mod id_gen;
pub mod logging;
pub mod nonce;
pub mod runtime;
pub mod secret;
pub mod timing;

pub use fixed::{Fixed, FixedError};
pub use id_gen::{generate_id, ClientOrderId};
pub use logging::init_logging;
pub use nonce::{Nonce, NonceFormat, NonceGenerator};
pub use runtime::{ClientRuntime, RuntimeConfig};
pub use secret::ProtectedSecret;
pub use timing::{nanos, unix_millis, Clock, PerfTimer, SystemClock};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixed::Fixed;
    pub use crate::id_gen::{generate_id, ClientOrderId};
    pub use crate::logging::init_logging;
    pub use crate::nonce::{Nonce, NonceFormat, NonceGenerator};
    pub use crate::runtime::ClientRuntime;
    pub use crate::secret::ProtectedSecret;
    pub use crate::timing::{nanos, unix_millis, Clock, PerfTimer, SystemClock};

    pub use monoio;
    pub use serde::{Deserialize, Serialize};
}
