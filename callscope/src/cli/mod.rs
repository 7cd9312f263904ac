//! Command-line interface for callscope
//!
//! This module contains CLI argument parsing

pub mod args;

pub use args::{Args, Command, DemoArgs};
