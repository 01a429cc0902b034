//! End-to-end tests for the migration pipeline.

use ovamigrate_core::{
    CopyProgress, Error, ImportPolicy, ImportReceipt, Importer, MigrationConfig, Migrator,
};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

const DESCRIPTOR: &str = r#"<domain type='kvm'>
  <name>NAME</name>
  <metadata>
    <scale-metadata>
      <state>SHUTOFF</state>
    </scale-metadata>
  </metadata>
  <devices>
    <disk type='network' device='disk'>
      <source protocol='scribe' name='scribe/aaa'/>
    </disk>
    <disk type='network' device='disk'>
      <source protocol='scribe' name='scribe/bbb'/>
    </disk>
  </devices>
</domain>
"#;

const OVF: &str = r#"<?xml version="1.0"?>
<Envelope xmlns:ovf="http://schemas.dmtf.org/ovf/envelope/1">
  <References>
    <File ovf:href="disk-2.vmdk" ovf:id="file1"/>
    <File ovf:href="disk-1.vmdk" ovf:id="file0"/>
  </References>
</Envelope>
"#;

fn config_for(root: &Path) -> MigrationConfig {
    MigrationConfig {
        export_root: root.join("ova"),
        staging_root: root.join("scale"),
        ..MigrationConfig::default()
    }
}

/// Lay out one VM with two source disks and a staging directory holding a
/// descriptor and one stale image.
fn add_vm(config: &MigrationConfig, vm: &str) {
    let layout = config.layout(vm);
    fs::create_dir_all(&layout.source_dir).unwrap();
    fs::create_dir_all(&layout.staging_dir).unwrap();
    fs::write(layout.source_dir.join(format!("{}.ovf", vm)), OVF).unwrap();
    fs::write(layout.source_dir.join("disk-1.vmdk"), b"first disk").unwrap();
    fs::write(layout.source_dir.join("disk-2.vmdk"), b"second disk").unwrap();
    fs::write(&layout.descriptor, DESCRIPTOR.replace("NAME", vm)).unwrap();
    fs::write(layout.staging_dir.join("old.qcow2"), b"stale").unwrap();
}

/// Snapshot every file under `root` with its contents.
fn snapshot(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    let mut files = BTreeMap::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                stack.push(path);
            } else {
                files.insert(path.clone(), fs::read(&path).unwrap());
            }
        }
    }
    files
}

struct FakeImporter {
    calls: RefCell<Vec<String>>,
    fail: bool,
}

impl FakeImporter {
    fn new(fail: bool) -> Self {
        Self {
            calls: RefCell::new(Vec::new()),
            fail,
        }
    }
}

impl Importer for FakeImporter {
    fn import(&self, vm: &str) -> ovamigrate_core::Result<ImportReceipt> {
        self.calls.borrow_mut().push(vm.to_string());
        if self.fail {
            return Err(Error::network("API error 500: internal"));
        }
        Ok(ImportReceipt {
            task_tag: format!("task-{}", vm),
            created_uuid: format!("uuid-{}", vm),
        })
    }
}

#[test]
fn test_end_to_end_copy_plan() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(dir.path());
    add_vm(&config, "web01");
    let layout = config.layout("web01");

    let migrator = Migrator::new(config);
    let report = migrator
        .migrate_vm("web01", &mut ImportPolicy::skip(), None)
        .expect("Migration failed");

    let pairs: Vec<(PathBuf, PathBuf)> = report
        .plan
        .pairs
        .iter()
        .map(|p| (p.source.clone(), p.destination.clone()))
        .collect();
    assert_eq!(
        pairs,
        vec![
            (
                layout.source_dir.join("disk-1.vmdk"),
                layout.staging_dir.join("aaa.qcow2")
            ),
            (
                layout.source_dir.join("disk-2.vmdk"),
                layout.staging_dir.join("bbb.qcow2")
            ),
        ]
    );

    assert_eq!(fs::read(layout.staging_dir.join("aaa.qcow2")).unwrap(), b"first disk");
    assert_eq!(fs::read(layout.staging_dir.join("bbb.qcow2")).unwrap(), b"second disk");
    assert!(!layout.staging_dir.join("old.qcow2").exists());
    assert_eq!(report.removed, vec![layout.staging_dir.join("old.qcow2")]);
    assert_eq!(report.disks.iter().map(|d| d.bytes).collect::<Vec<_>>(), vec![Some(10), Some(11)]);

    let descriptor = fs::read_to_string(&layout.descriptor).unwrap();
    assert!(descriptor.contains("<tag name=\"imported_by_script\"/>"));
    assert!(report.import.is_none());
}

#[test]
fn test_dry_run_touches_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_for(dir.path());
    config.dry_run = true;
    add_vm(&config, "web01");
    // A second VM with nothing stale to remove.
    add_vm(&config, "web02");
    fs::remove_file(config.layout("web02").staging_dir.join("old.qcow2")).unwrap();
    let before = snapshot(dir.path());

    let importer = FakeImporter::new(false);
    let migrator = Migrator::new(config);
    let summary = migrator.migrate_batch(
        &["web01".to_string(), "web02".to_string()],
        &mut ImportPolicy::auto(&importer),
        None,
    );

    assert!(summary.is_success(), "failures: {:?}", summary.failures);
    assert_eq!(snapshot(dir.path()), before);
    assert!(importer.calls.borrow().is_empty(), "dry-run never imports");

    let report = &summary.reports[0];
    assert_eq!(report.plan.len(), 2);
    assert!(report.disks.iter().all(|d| d.bytes.is_none()));
    assert!(report.tags.changed);
}

#[test]
fn test_mismatch_pairs_minimum() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(dir.path());
    add_vm(&config, "web01");
    let layout = config.layout("web01");
    fs::write(
        &layout.descriptor,
        DESCRIPTOR.replace(
            "  </devices>",
            "    <disk type='network' device='disk'><source name='scribe/ccc'/></disk>\n  </devices>",
        ),
    )
    .unwrap();

    let report = Migrator::new(config)
        .migrate_vm("web01", &mut ImportPolicy::skip(), None)
        .unwrap();

    assert!(report.plan.is_mismatched());
    assert_eq!(report.plan.len(), 2);
    assert_eq!(report.plan.destination_count, 3);
    assert!(!layout.staging_dir.join("ccc.qcow2").exists());
}

#[test]
fn test_failing_vm_does_not_stop_batch() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(dir.path());
    add_vm(&config, "bad");
    add_vm(&config, "good");
    fs::write(config.layout("bad").descriptor, "<domain><devices></domain>").unwrap();

    let summary = Migrator::new(config.clone()).migrate_batch(
        &["bad".to_string(), " good ".to_string(), "".to_string()],
        &mut ImportPolicy::skip(),
        None,
    );

    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].0, "bad");
    assert!(matches!(summary.failures[0].1, Error::Parse { .. }));
    assert_eq!(summary.reports.len(), 1);
    assert_eq!(summary.reports[0].layout.name, "good");

    // The failed VM's staging directory was not emptied.
    assert!(config.layout("bad").staging_dir.join("old.qcow2").exists());
}

#[test]
fn test_missing_source_disk_aborts_vm() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(dir.path());
    add_vm(&config, "web01");
    let layout = config.layout("web01");
    fs::remove_file(layout.source_dir.join("disk-2.vmdk")).unwrap();
    let descriptor_before = fs::read(&layout.descriptor).unwrap();

    let err = Migrator::new(config)
        .migrate_vm("web01", &mut ImportPolicy::skip(), None)
        .unwrap_err();

    assert!(matches!(err, Error::Copy { .. }));
    assert!(layout.staging_dir.join("aaa.qcow2").exists());
    assert!(!layout.staging_dir.join("bbb.qcow2").exists());
    assert_eq!(fs::read(&layout.descriptor).unwrap(), descriptor_before);
}

#[test]
fn test_missing_ovf_is_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(dir.path());
    add_vm(&config, "web01");
    fs::remove_file(config.layout("web01").source_dir.join("web01.ovf")).unwrap();

    let err = Migrator::new(config)
        .migrate_vm("web01", &mut ImportPolicy::skip(), None)
        .unwrap_err();
    assert!(matches!(err, Error::Io { .. }));
}

#[test]
fn test_auto_import_runs_after_staging() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(dir.path());
    add_vm(&config, "web01");

    let importer = FakeImporter::new(false);
    let report = Migrator::new(config)
        .migrate_vm("web01", &mut ImportPolicy::auto(&importer), None)
        .unwrap();

    assert_eq!(*importer.calls.borrow(), vec!["web01"]);
    assert_eq!(
        report.import,
        Some(ImportReceipt {
            task_tag: "task-web01".to_string(),
            created_uuid: "uuid-web01".to_string(),
        })
    );
}

#[test]
fn test_prompt_import_respects_answer() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(dir.path());
    add_vm(&config, "web01");
    add_vm(&config, "web02");

    let importer = FakeImporter::new(false);
    let asked = RefCell::new(Vec::new());
    let mut policy = ImportPolicy::prompt(&importer, |vm: &str| {
        asked.borrow_mut().push(vm.to_string());
        vm == "web02"
    });

    let summary = Migrator::new(config).migrate_batch(
        &["web01".to_string(), "web02".to_string()],
        &mut policy,
        None,
    );
    drop(policy);

    assert!(summary.is_success());
    assert_eq!(*asked.borrow(), vec!["web01", "web02"]);
    assert_eq!(*importer.calls.borrow(), vec!["web02"]);
    assert!(summary.reports[0].import.is_none());
    assert!(summary.reports[1].import.is_some());
}

#[test]
fn test_import_failure_keeps_staged_files() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(dir.path());
    add_vm(&config, "web01");
    let layout = config.layout("web01");

    let importer = FakeImporter::new(true);
    let err = Migrator::new(config)
        .migrate_vm("web01", &mut ImportPolicy::auto(&importer), None)
        .unwrap_err();

    assert!(matches!(err, Error::Network { .. }));
    assert!(layout.staging_dir.join("aaa.qcow2").exists());
    assert!(fs::read_to_string(&layout.descriptor)
        .unwrap()
        .contains("imported_by_script"));
}

#[test]
fn test_progress_callback_sees_each_pair() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(dir.path());
    add_vm(&config, "web01");

    let seen: Arc<Mutex<Vec<CopyProgress>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let callback: ovamigrate_core::ProgressCallback =
        Box::new(move |progress| sink.lock().unwrap().push(progress));

    Migrator::new(config)
        .migrate_vm("web01", &mut ImportPolicy::skip(), Some(&callback))
        .unwrap();

    let seen = seen.lock().unwrap();
    let last_per_pair: Vec<(usize, u64)> = (0..2)
        .map(|i| {
            let last = seen.iter().filter(|p| p.pair_index == i).last().unwrap();
            (i, last.bytes_copied)
        })
        .collect();
    assert_eq!(last_per_pair, vec![(0, 10), (1, 11)]);
    assert!(seen.iter().all(|p| p.pair_count == 2));
}

#[test]
fn test_truncated_ovf_leaves_staging_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(dir.path());
    add_vm(&config, "web01");
    let layout = config.layout("web01");
    let cut = &OVF[..OVF.find("</References>").unwrap()];
    fs::write(layout.source_dir.join("web01.ovf"), cut).unwrap();
    let before = snapshot(&layout.staging_dir);

    let err = Migrator::new(config)
        .migrate_vm("web01", &mut ImportPolicy::skip(), None)
        .unwrap_err();

    assert!(matches!(err, Error::Parse { .. }));
    assert_eq!(snapshot(&layout.staging_dir), before);
}
