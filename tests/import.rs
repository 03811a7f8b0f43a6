mod common;

use common::{config, host_device};
use gpu_physmem::host::{HostPageBackend, HostPmrImporter};
use gpu_physmem::pmr::{PmrExport, PmrHandle, PmrImporter};
use gpu_physmem::{AllocationRequest, Physmem, PhysmemError, PhysmemResult};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Default)]
struct CountingImporter {
    calls: AtomicUsize,
}

impl PmrImporter for CountingImporter {
    fn import_pmr(&self, export: &PmrExport, _password: u64, _size: u64, _log2: u32) -> PhysmemResult<PmrHandle> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(export.pmr().clone())
    }
}

fn exported_pmr(physmem: &Physmem, device: &gpu_physmem::DeviceNode, password: u64) -> PmrExport {
    let mut req = AllocationRequest::new(4096, 12);
    let pmr = physmem.new_ram_backed_pmr(None, device, &mut req).unwrap();
    PmrExport::new(pmr, password)
}

#[test]
fn foreign_export_is_not_permitted() {
    let backend = Arc::new(HostPageBackend::new());
    let dev_a = host_device(0, backend.clone());
    let dev_b = host_device(1, backend);
    let physmem = Physmem::new(config());
    let importer = CountingImporter::default();

    let export = exported_pmr(&physmem, &dev_a, 0x1234);
    let err = physmem
        .import_pmr(&importer, None, &dev_b, &export, 0x1234, 4096, 12)
        .unwrap_err();

    assert!(matches!(err, PhysmemError::NotPermitted));
    assert_eq!(importer.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn own_export_is_delegated() {
    let backend = Arc::new(HostPageBackend::new());
    let dev = host_device(3, backend);
    let physmem = Physmem::new(config());
    let importer = CountingImporter::default();

    let export = exported_pmr(&physmem, &dev, 1);
    let pmr = physmem.import_pmr(&importer, None, &dev, &export, 1, 4096, 12).unwrap();

    assert!(Arc::ptr_eq(&pmr, export.pmr()));
    assert_eq!(importer.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn importer_errors_pass_through() {
    let backend = Arc::new(HostPageBackend::new());
    let dev = host_device(0, backend);
    let physmem = Physmem::new(config());

    let export = exported_pmr(&physmem, &dev, 99);
    let err = physmem
        .import_pmr(&HostPmrImporter, None, &dev, &export, 98, 4096, 12)
        .unwrap_err();
    assert!(matches!(err, PhysmemError::InvalidParams));

    let err = physmem
        .import_pmr(&HostPmrImporter, None, &dev, &export, 99, 8192, 12)
        .unwrap_err();
    assert!(matches!(err, PhysmemError::InvalidParams));

    assert!(physmem.import_pmr(&HostPmrImporter, None, &dev, &export, 99, 4096, 12).is_ok());
}
