//! [`reqwest`] transport for the tilbud dispatch engine.
//!
//! ```no_run
//! use std::time::Duration;
//! use tilbud_reqwest::ReqwestTransport;
//!
//! let transport = ReqwestTransport::builder()
//!     .timeout(Duration::from_secs(10))
//!     .user_agent("tilbud/0.1")
//!     .build()?;
//! # Ok::<(), reqwest::Error>(())
//! ```

mod transport;

pub use transport::{ReqwestTransport, ReqwestTransportBuilder, classify};

/// Re-export of the underlying client for custom configuration.
pub use reqwest::Client;
