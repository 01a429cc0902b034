//! ovamigrate Core Library
//!
//! This crate moves the disks of exported OVF bundles into a hypervisor's
//! staging area and marks the destination descriptor as imported.
//!
//! # Overview
//!
//! Each VM has an export directory (`<export_root>/<vm>/*.ovf` plus disk
//! files) and a staging directory (`<staging_root>/<vm>/<vm>.xml`). The
//! OVF's disk files are paired positionally with the network disks of the
//! destination descriptor and copied to `<uuid>.qcow2`; the descriptor then
//! receives a provenance tag. The main entry point is [`Migrator`].
//!
//! # Modules
//!
//! - [`error`] - Error types and Result alias
//! - [`config`] - Configuration record and per-VM layout
//! - [`ovf`] - OVF disk list reading
//! - [`domain`] - Destination descriptor disk id reading
//! - [`plan`] - Positional pairing into a copy plan
//! - [`materialize`] - Executing the copy plan
//! - [`tags`] - Provenance tag rewrite of the destination descriptor
//! - [`discovery`] - Candidate VM discovery
//! - [`selection`] - Operator selection and import modes
//! - [`import`] - REST import trigger
//! - [`migrate`] - Per-VM pipeline and batch orchestration
//!
//! # Quick Start
//!
//! ```no_run
//! use ovamigrate_core::{discover, ImportPolicy, MigrationConfig, Migrator};
//!
//! let config = MigrationConfig::default();
//! let vms = discover(&config).unwrap();
//! let summary = Migrator::new(config).migrate_batch(&vms, &mut ImportPolicy::skip(), None);
//! println!("{} migrated, {} failed", summary.reports.len(), summary.failures.len());
//! ```

pub mod config;
pub mod discovery;
pub mod domain;
pub mod error;
pub mod import;
pub mod materialize;
pub mod migrate;
pub mod ovf;
pub mod plan;
pub mod selection;
pub mod tags;

pub use error::{Error, Result};

// Re-export the main migration types for convenience
pub use config::{ApiConfig, LoggingConfig, MigrationConfig, RunMode, VmLayout};
pub use discovery::discover;
pub use import::{ApiClient, ImportReceipt, Importer};
pub use materialize::{CopyProgress, ProgressCallback};
pub use migrate::{BatchSummary, ImportPolicy, Migrator, VmReport};
pub use plan::{CopyPlan, DiskPair};
pub use selection::{ImportMode, SelectionMode};
