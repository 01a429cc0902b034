//! Migration orchestrator.
//!
//! For each VM the pipeline is:
//! 1. Read the OVF disk list and the destination disk identifiers
//! 2. Pair them into a [`CopyPlan`]
//! 3. Remove stale destination images, then copy each source disk
//! 4. Rewrite the provenance tags of the destination descriptor
//! 5. Optionally trigger the REST import
//!
//! VMs of a batch run one after another; a failing VM is logged and recorded
//! and the batch moves on.
//!
//! # Example
//!
//! ```no_run
//! use ovamigrate_core::{ImportPolicy, MigrationConfig, Migrator};
//!
//! let config = MigrationConfig {
//!     dry_run: true,
//!     ..MigrationConfig::default()
//! };
//! let migrator = Migrator::new(config);
//! let summary = migrator.migrate_batch(&["web01".to_string()], &mut ImportPolicy::skip(), None);
//! assert!(summary.failures.is_empty());
//! ```

use std::io;
use std::path::PathBuf;

use crate::config::{MigrationConfig, VmLayout};
use crate::discovery::find_ovf;
use crate::domain::read_disk_ids;
use crate::error::{Error, Result};
use crate::import::{ImportReceipt, Importer};
use crate::materialize::{materialize, remove_stale_images, MaterializedDisk, ProgressCallback};
use crate::ovf::read_disk_files;
use crate::plan::CopyPlan;
use crate::selection::ImportMode;
use crate::tags::{patch_descriptor, TagPatch};

/// Decides whether each staged VM is imported, and through what.
pub struct ImportPolicy<'a> {
    mode: ImportMode,
    importer: Option<&'a dyn Importer>,
    confirm: Box<dyn FnMut(&str) -> bool + 'a>,
}

impl<'a> ImportPolicy<'a> {
    /// Never import.
    pub fn skip() -> Self {
        Self {
            mode: ImportMode::Skip,
            importer: None,
            confirm: Box::new(|_| false),
        }
    }

    /// Import every VM without asking.
    pub fn auto(importer: &'a dyn Importer) -> Self {
        Self {
            mode: ImportMode::Auto,
            importer: Some(importer),
            confirm: Box::new(|_| true),
        }
    }

    /// Ask `confirm(vm)` before importing each VM.
    pub fn prompt(importer: &'a dyn Importer, confirm: impl FnMut(&str) -> bool + 'a) -> Self {
        Self {
            mode: ImportMode::Prompt,
            importer: Some(importer),
            confirm: Box::new(confirm),
        }
    }

    pub fn mode(&self) -> ImportMode {
        self.mode
    }

    fn run(&mut self, vm: &str) -> Result<Option<ImportReceipt>> {
        let Some(importer) = self.importer else {
            return Ok(None);
        };
        let proceed = match self.mode {
            ImportMode::Skip => false,
            ImportMode::Auto => true,
            ImportMode::Prompt => (self.confirm)(vm),
        };
        if !proceed {
            tracing::info!(vm = %vm, "import skipped");
            return Ok(None);
        }
        importer.import(vm).map(Some)
    }
}

/// Outcome of one successfully migrated VM.
#[derive(Debug, Clone)]
pub struct VmReport {
    pub layout: VmLayout,
    /// The OVF descriptor the disk list was read from.
    pub ovf: PathBuf,
    pub plan: CopyPlan,
    /// Stale images removed (or, in dry-run mode, that would be removed).
    pub removed: Vec<PathBuf>,
    pub disks: Vec<MaterializedDisk>,
    pub tags: TagPatch,
    pub import: Option<ImportReceipt>,
}

/// Outcome of a batch.
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub reports: Vec<VmReport>,
    /// VMs that failed, with the error that stopped them.
    pub failures: Vec<(String, Error)>,
}

impl BatchSummary {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Runs migrations under one [`MigrationConfig`].
pub struct Migrator {
    config: MigrationConfig,
}

impl Migrator {
    pub fn new(config: MigrationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Read both descriptors of `vm` and pair their disks. Touches nothing.
    pub fn plan_vm(&self, vm: &str) -> Result<(PathBuf, CopyPlan)> {
        let layout = self.config.layout(vm);
        let ovf = find_ovf(&layout.source_dir)?.ok_or_else(|| {
            Error::io(
                io::Error::new(io::ErrorKind::NotFound, "no OVF descriptor"),
                &layout.source_dir,
            )
        })?;

        let hrefs = read_disk_files(&ovf)?;
        let ids = read_disk_ids(&layout.descriptor)?;
        let plan = CopyPlan::build(&layout, &hrefs, &ids, &self.config.disk_extension);
        Ok((ovf, plan))
    }

    /// Migrate one VM.
    ///
    /// Errors stop this VM only. An import failure is returned after the
    /// copy and tag rewrite already took effect.
    pub fn migrate_vm(
        &self,
        vm: &str,
        import: &mut ImportPolicy<'_>,
        progress_callback: Option<&ProgressCallback>,
    ) -> Result<VmReport> {
        let _span = tracing::info_span!("migrate", vm = %vm).entered();
        let mode = self.config.mode();
        let layout = self.config.layout(vm);

        let (ovf, plan) = self.plan_vm(vm)?;
        let removed = remove_stale_images(&layout.staging_dir, &self.config.disk_extension, mode)?;
        let disks = materialize(&plan, mode, progress_callback)?;
        let tags = patch_descriptor(&layout.descriptor, mode)?;

        let import = if mode.is_dry_run() {
            None
        } else {
            import.run(vm)?
        };

        Ok(VmReport {
            layout,
            ovf,
            plan,
            removed,
            disks,
            tags,
            import,
        })
    }

    /// Migrate `vms` in order, isolating failures per VM.
    pub fn migrate_batch(
        &self,
        vms: &[String],
        import: &mut ImportPolicy<'_>,
        progress_callback: Option<&ProgressCallback>,
    ) -> BatchSummary {
        let mut summary = BatchSummary::default();

        for vm in vms.iter().map(|vm| vm.trim()).filter(|vm| !vm.is_empty()) {
            match self.migrate_vm(vm, import, progress_callback) {
                Ok(report) => summary.reports.push(report),
                Err(e) => {
                    tracing::error!(vm = %vm, error = %e, "migration failed");
                    summary.failures.push((vm.to_string(), e));
                }
            }
        }

        summary
    }
}
