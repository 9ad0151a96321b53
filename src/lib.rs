//! Assembles minimized, self-contained runtime images with multiple launchers.
//!
//! A run takes the archives produced by each project module, merges them
//! over a trimmed base runtime, attaches named launchers and platform
//! scripts, and optionally copies the finished tree to an install target.
//!
//! # Architecture
//!
//! ```text
//! collect-artifacts ──> build-runtime-image ──> register-launchers ──> install-scripts
//!                              │                       │                      │
//!                              └───────────────────────┴──────────────────────┴──> install
//!                                                                             (only with a target)
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use image_assembler::{AssemblyConfig, Orchestrator};
//!
//! let config = AssemblyConfig::load("assembly.toml".as_ref())?;
//! let report = Orchestrator::new(config)?.run()?;
//! assert!(report.succeeded());
//! ```

pub mod archive;
pub mod config;
pub mod error;
pub mod filesystem;
pub mod image;
pub mod logging;
pub mod pipeline;
pub mod policy;
pub mod preflight;
pub mod runtime;
pub mod stages;

#[cfg(test)]
mod testutil;

pub use config::{AssemblyConfig, ImageOptions, LauncherSet, LauncherSpec, ModuleSpec};
pub use error::{AssemblyError, Result};
pub use image::{ImageManifest, RuntimeImage};
pub use pipeline::{Orchestrator, RunReport, StageGraph, StageOutcome};
pub use stages::{Stage, StageContext, StageId};
