//! `wonderbits-client` – connection, command and event broker for wonderbits
//! peripherals.
//!
//! A companion process owns the serial link to the hardware and exposes each
//! attached module (`buggy1`, `signal2`, …) over one persistent socket. This
//! crate turns that socket into a future-based API.
//!
//! # Modules
//!
//! - [`session`] – [`Session`], the cloneable handle applications talk to.
//! - [`pending`] – request/response correlation by command string.
//! - [`subscriptions`] – peripheral event registration and routing.
//! - [`coercion`] – wire text to typed [`Value`](wonderbits_types::Value).
//! - [`lifecycle`] – connect / disconnect / reset / run-error fan-out.
//! - [`transport`] – the [`Transport`] / [`Connector`] seam.
//! - [`ws_transport`] – the WebSocket implementation of that seam.
//! - [`config`] – `~/.wonderbits/config.toml` plus environment overrides.
//! - [`telemetry`] – `tracing` subscriber initialisation.

use std::panic::{AssertUnwindSafe, catch_unwind};

use tracing::error;

pub mod coercion;
pub mod config;
pub mod lifecycle;
pub mod pending;
pub mod session;
pub mod subscriptions;
pub mod telemetry;
pub mod transport;
pub mod ws_transport;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::{ClientConfig, ReconnectPolicy};
pub use lifecycle::LifecycleNotifier;
pub use pending::{CallKind, PendingCalls};
pub use session::{Session, SubscriptionHandle};
pub use subscriptions::{EventCallback, SubscriptionRegistry};
pub use transport::{Connector, Transport, TransportEvent};
pub use ws_transport::WsConnector;

/// Run a user callback, logging instead of unwinding if it panics.
pub(crate) fn guarded(what: &str, f: impl FnOnce()) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(f)) {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        error!(callback = what, panic = %message, "callback panicked");
    }
}
