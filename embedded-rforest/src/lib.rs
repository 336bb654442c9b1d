#![cfg_attr(not(feature = "std"), no_std)]

//! Bit-packed storage, tree/forest inference primitives, and the platform
//! capability trait the on-device random forest engine runs against.
//!
//! This crate is the part of the engine that actually runs on the MCU: no
//! filesystem, no allocation beyond a handful of `Vec`s, nothing that
//! assumes a host OS. File persistence, the chunked dataset store, training,
//! and everything else that needs a real filesystem live in `rforest-engine`
//! against the [`platform::Platform`] trait this crate defines.

extern crate alloc;

pub mod error;
pub mod forest;
pub mod idvector;
pub mod packed;
pub mod platform;
pub mod random;
pub mod tree;

pub use error::Error;
