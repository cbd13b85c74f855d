// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # bnserve
//!
//! Concurrent serving layer for Bayesian network inference: a registry of
//! loaded networks, evidence cases entered under per-network locks, and
//! point predictions read back for a target node.
//!
//! ## Architecture
//!
//! - **Backend** (`backend`): the inference engine behind a narrow trait, with
//!   an exact enumeration engine as the reference implementation
//! - **Engine handle** (`engine`): lifecycle plus drain-and-check around every call
//! - **Registry** (`registry`): networks by name or stable index, directory loading
//! - **Networks and nodes** (`network`, `node`): read/write views and node accessors
//! - **Evidence and batches** (`evidence`, `batch`): token parsing, whole-case
//!   rollback, enter-infer-clear per case
//! - **Query surface** (`api`, `server`): JSON views and the HTTP routes
//!
//! ## Library usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use bnserve::backend::enumerate::EnumerationBackend;
//! use bnserve::batch::run_batch;
//! use bnserve::engine::EngineHandle;
//! use bnserve::registry::NetworkRegistry;
//!
//! let engine = EngineHandle::initialize(Arc::new(EnumerationBackend::new()), None).unwrap();
//! let registry = NetworkRegistry::new(Arc::clone(&engine));
//! let net = registry.load_file("networks/sprinkler.toml".as_ref()).unwrap();
//! let case = [("Rain".to_string(), "yes".to_string())].into_iter().collect();
//! let results = run_batch(&net, "WetGrass", &[case]).unwrap();
//! println!("{}", results[0].value);
//! engine.shutdown().unwrap();
//! ```

pub mod api;
pub mod backend;
pub mod batch;
pub mod config;
pub mod engine;
pub mod error;
pub mod evidence;
pub mod network;
pub mod node;
pub mod registry;
#[cfg(feature = "server")]
pub mod server;
