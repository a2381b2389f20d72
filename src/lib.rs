// src/lib.rs

//! Strata Environment Manager
//!
//! Installs packages into isolated environments rooted at a prefix, with
//! planned transactions, a per-prefix lock and an append-only history.
//!
//! # Architecture
//!
//! - Orchestration: requests become specs, specs become an action plan
//! - Pluggable collaborators: index provider, resolver, interpreter and
//!   confirmation are traits
//! - Recovery: `update --all` skips packages that disappeared and retries
//! - Audit: every linked-set change and command lands in `conda-meta/history`

pub mod archive;
pub mod capability;
pub mod clone;
pub mod collect;
pub mod config;
pub mod environment;
mod error;
pub mod executor;
pub mod history;
pub mod index;
pub mod interpreter;
pub mod lock;
pub mod orchestrator;
pub mod plan;
pub mod resolver;
pub mod spec;
pub mod suggest;
pub mod version;

pub use error::{Error, Result};
