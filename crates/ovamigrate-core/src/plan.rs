//! Positional pairing of source disks with destination disk identifiers.

use std::path::PathBuf;

use crate::config::VmLayout;

/// One source file to be written to one destination image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskPair {
    pub source: PathBuf,
    pub destination: PathBuf,
}

/// Ordered copy plan for one VM.
///
/// Entry `i` pairs the `i`-th OVF disk with the `i`-th destination disk. When
/// the lists differ in length, the surplus on the longer side is left unpaired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyPlan {
    pub pairs: Vec<DiskPair>,
    /// Number of disk files declared by the OVF.
    pub source_count: usize,
    /// Number of qualifying disks declared by the destination descriptor.
    pub destination_count: usize,
}

impl CopyPlan {
    /// Pair `hrefs` (relative to the source directory) with destination `ids`.
    ///
    /// Destination images are named `<id>.<extension>` inside the staging
    /// directory.
    pub fn build(layout: &VmLayout, hrefs: &[String], ids: &[String], extension: &str) -> Self {
        let pairs: Vec<DiskPair> = hrefs
            .iter()
            .zip(ids)
            .map(|(href, id)| DiskPair {
                source: layout.source_dir.join(href),
                destination: layout.staging_dir.join(format!("{}.{}", id, extension)),
            })
            .collect();

        let plan = Self {
            pairs,
            source_count: hrefs.len(),
            destination_count: ids.len(),
        };

        if plan.is_mismatched() {
            tracing::warn!(
                vm = %layout.name,
                ovf = plan.source_count,
                destination = plan.destination_count,
                paired = plan.len(),
                "disk count mismatch, pairing the minimum"
            );
        }

        plan
    }

    /// Whether the two descriptors declared different numbers of disks.
    pub fn is_mismatched(&self) -> bool {
        self.source_count != self.destination_count
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}
