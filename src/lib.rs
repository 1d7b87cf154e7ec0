//! Strata - incremental layered image builder
//!
//! Runs build steps against working containers and commits one
//! content-addressed layer per step, so a rebuild resumes after the longest
//! unchanged prefix of steps.

pub mod action;
pub mod backend;
pub mod buildfile;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod image;
pub mod pipeline;
pub mod process;
pub mod target;

pub use error::{StrataError, StrataResult};
