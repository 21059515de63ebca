//! Core utilities for the tessera frame-construction crates.
//!
//! This crate provides the pieces with no GPU dependency:
//! - Error types and result aliases
//! - Logging initialization
//! - Renderer configuration
//! - The per-worker FIFO thread pool used for command recording
//! - Generation-checked arenas for materials and textures

mod arena;
mod config;
mod error;
mod logging;
mod worker_pool;

pub use arena::{Arena, Handle};
pub use config::{ENV_MAX_ANISOTROPY, ENV_SHADER_DIR, ENV_WORKERS, RendererConfig};
pub use error::{Error, Result};
pub use logging::{DEFAULT_FILTER, init_logging, try_init_logging};
pub use worker_pool::{Job, WorkerPool, default_worker_count};
