//! Parley Runner Library Crate
//!
//! Configuration, demonstration handlers and the console transport used by
//! the `parley` binary. The binary itself is a thin wrapper around this
//! library.

pub mod config;
pub mod console;
pub mod handlers;
