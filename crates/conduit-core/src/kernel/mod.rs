//! # Conduit Kernel
//!
//! The host's backbone: the [`Application`](bootstrap::Application)
//! composition root, the [`KernelComponent`](component::KernelComponent)
//! lifecycle trait its components implement, shared constants, and the
//! top-level [`Error`](error::Error) type.
pub mod bootstrap;
pub mod component;
pub mod constants;
pub mod error;

pub use bootstrap::{Application, ApplicationBuilder};
pub use component::KernelComponent;
pub use error::{Error, Result};

// Test module declaration
#[cfg(test)]
mod tests;
