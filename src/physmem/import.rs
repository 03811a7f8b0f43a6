use crate::device::DeviceNode;
use crate::error::{PhysmemError, PhysmemResult};
use crate::pmr::{Connection, PmrExport, PmrHandle, PmrImporter};

/// Imports an exported PMR on `device`, refusing exports that belong to a
/// different device.
///
/// # Errors
/// [`PhysmemError::NotPermitted`] on a device mismatch; otherwise whatever
/// the importer returns.
pub fn import_pmr(
    importer: &dyn PmrImporter,
    _connection: Option<&Connection>,
    device: &DeviceNode,
    export: &PmrExport,
    password: u64,
    size: u64,
    log2_contig: u32,
) -> PhysmemResult<PmrHandle> {
    if export.device_id() != device.id() {
        log::error!(
            "import_pmr: PMR invalid for this device (owner {:?}, target {:?})",
            export.device_id(),
            device.id()
        );
        return Err(PhysmemError::NotPermitted);
    }

    importer.import_pmr(export, password, size, log2_contig)
}
