//! `wonderbits-modules` – typed wrappers for wonderbits hardware modules.
//!
//! Each wrapper pairs a [`ModuleRef`] with a [`Session`](wonderbits_client::Session)
//! and turns method calls into command strings, validating argument ranges
//! before anything is sent.
//!
//! # Modules
//!
//! - [`module`] – [`ModuleRef`], [`OnboardColor`] and the [`Peripheral`]
//!   trait shared by every wrapper.
//! - [`signal`], [`led`], [`hall`], [`distance`], [`observer`],
//!   [`control`], [`buggy`] – one wrapper per module kind.

pub mod buggy;
pub mod control;
pub mod distance;
pub mod hall;
pub mod led;
pub mod module;
pub mod observer;
pub mod signal;

#[cfg(test)]
pub(crate) mod test_support;

pub use buggy::Buggy;
pub use control::Control;
pub use distance::Distance;
pub use hall::Hall;
pub use led::Led;
pub use module::{ModuleRef, OnboardColor, Peripheral};
pub use observer::Observer;
pub use signal::Signal;
