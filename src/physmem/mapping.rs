use crate::error::{MapIndexFault, PhysmemError, PhysmemResult};
use crate::utils::{log2_div, log2_mod};

/// Checks that the first `index_count` entries of `mapping_table` are all
/// below `total_virt_chunks` and that none repeats.
///
/// Runs in O(n) using a bitmap with one bit per virtual chunk.
///
/// # Errors
/// * [`PhysmemError::InvalidMapIndexArray`] on the first out of range or duplicate entry.
/// * [`PhysmemError::InvalidParams`] if the table holds fewer than `index_count` entries.
/// * [`PhysmemError::OutOfMemory`] if the tracking bitmap cannot be allocated.
pub fn validate_mapping_table(
    total_virt_chunks: u32,
    index_count: u32,
    mapping_table: &[u32],
) -> PhysmemResult<()> {
    let Some(indices) = mapping_table.get(..index_count as usize) else {
        log::error!(
            "mapping table has {} entries, {index_count} expected",
            mapping_table.len()
        );
        return Err(PhysmemError::InvalidParams);
    };

    let mut tracked = IndexBitmap::new(total_virt_chunks)?;

    for &index in indices {
        if index >= total_virt_chunks {
            log::error!("validate_mapping_table: Index {index} is OOB");
            return Err(PhysmemError::InvalidMapIndexArray(MapIndexFault::OutOfBounds(index)));
        }
        if tracked.test_and_set(index) {
            log::error!("validate_mapping_table: Duplicate index found: {index}");
            return Err(PhysmemError::InvalidMapIndexArray(MapIndexFault::Duplicate(index)));
        }
    }

    Ok(())
}

struct IndexBitmap {
    bytes: Vec<u8>,
}

impl IndexBitmap {
    #[allow(clippy::cast_possible_truncation)]
    fn new(bits: u32) -> PhysmemResult<Self> {
        let mut len = log2_div(u64::from(bits), 3) as usize;
        if log2_mod(u64::from(bits), 3) != 0 {
            len += 1;
        }

        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(len)
            .map_err(|_| PhysmemError::OutOfMemory)?;
        bytes.resize(len, 0);
        Ok(Self { bytes })
    }

    /// Sets the bit, returning whether it was already set.
    #[allow(clippy::cast_possible_truncation)]
    fn test_and_set(&mut self, index: u32) -> bool {
        let byte = &mut self.bytes[log2_div(u64::from(index), 3) as usize];
        let bit = 1u8 << log2_mod(u64::from(index), 3);
        let was_set = *byte & bit != 0;
        *byte |= bit;
        was_set
    }
}
