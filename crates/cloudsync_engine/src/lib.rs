//! # Cloudsync Engine
//!
//! Migrates a set of collections from a source cluster to a sink cluster
//! using a shared snapshot repository as the only channel between them.
//!
//! This crate provides:
//! - Start command parsing and validation ([`RunParams`])
//! - Startup recovery (resume a previous run or build a fresh ledger)
//! - The source loop (backlog gate → select → export → commit)
//! - The sink loop (discover → restore → await health → retire)
//! - Status aggregation over the ledger and the repository listing
//! - An in-memory mock cluster and a filesystem-backed cluster
//!
//! ## Architecture
//!
//! ```text
//!   source cluster                repository                 sink cluster
//!  ┌──────────────┐  export   ┌──────────────────┐ restore  ┌─────────────┐
//!  │ SourceLoop   │ ────────► │ snapshot_<name>  │ ───────► │ SinkLoop    │
//!  │  + ledger    │ ◄──────── │  (work queue)    │ ◄─────── │             │
//!  └──────────────┘  count    └──────────────────┘  delete  └─────────────┘
//! ```
//!
//! The two loops never talk to each other. The repository listing *is* the
//! queue: the source stops adding artifacts while `backlog_bound` of them
//! are resident, and the sink frees capacity by deleting what it restored.
//!
//! ## Key Invariants
//!
//! - Only the source writes the ledger, and only one source runs per ledger
//! - An entry is marked `SNAPSHOT_IN_PROGRESS` before its export starts
//! - Export rejection stops the source; restore rejection is retried later
//! - The sink keeps no state of its own beyond the repository listing

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cancel;
mod cluster;
mod config;
mod error;
mod fs_cluster;
mod mock;
mod params;
mod pattern;
mod recovery;
mod runner;
mod sink;
mod source;
mod status;

pub use cancel::CancelToken;
pub use cluster::{
    ensure_repository, Acceptance, Cluster, CollectionCatalog, HealthStatus, RepositorySettings,
    SnapshotRepository,
};
pub use config::{RetryConfig, SyncConfig};
pub use error::{SyncError, SyncResult};
pub use fs_cluster::FsCluster;
pub use mock::MockCluster;
pub use params::{RunMode, RunParams, StoreType};
pub use pattern::NamePattern;
pub use recovery::{recover, RecoveryOutcome};
pub use runner::{check_plugin, start, LoopHandle, LoopReport};
pub use sink::{SinkCycleResult, SinkLoop, SinkStats};
pub use source::{SourceCycle, SourceLoop, SourceStats};
pub use status::{format_bytes, status, StatusReport};
