//! Per-row provenance tags threaded between column-group passes.

use llkv_result::{Error, Result};

/// Highest source number a mask can carry.
pub const MAX_ROW_SOURCE_MASK_SOURCE: usize = 0x7FFF;

const SOURCE_MASK: u16 = 0x7FFF;
const DUPLICATE_FLAG: u16 = 0x8000;

/// Which merge source produced an output row, and whether the row is a
/// superseded duplicate.
///
/// Encoded in 16 bits: the low 15 bits hold the source number, the high bit
/// the duplicate flag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct RowSourceMask(u16);

impl RowSourceMask {
    /// # Panics
    ///
    /// Panics in debug builds when `source` exceeds
    /// [`MAX_ROW_SOURCE_MASK_SOURCE`].
    #[inline]
    pub fn new(source: u16, is_duplicate: bool) -> Self {
        debug_assert!(source as usize <= MAX_ROW_SOURCE_MASK_SOURCE);
        let mut data = source & SOURCE_MASK;
        if is_duplicate {
            data |= DUPLICATE_FLAG;
        }
        Self(data)
    }

    #[inline]
    pub fn from_data(data: u16) -> Self {
        Self(data)
    }

    #[inline]
    pub fn data(self) -> u16 {
        self.0
    }

    #[inline]
    pub fn source(self) -> u16 {
        self.0 & SOURCE_MASK
    }

    #[inline]
    pub fn is_duplicate(self) -> bool {
        self.0 & DUPLICATE_FLAG != 0
    }

    #[inline]
    pub fn set_duplicate(&mut self, is_duplicate: bool) {
        if is_duplicate {
            self.0 |= DUPLICATE_FLAG;
        } else {
            self.0 &= SOURCE_MASK;
        }
    }
}

/// Rejects merges with more sources than a mask can address.
pub fn check_source_count(sources: usize) -> Result<()> {
    if sources > MAX_ROW_SOURCE_MASK_SOURCE + 1 {
        return Err(Error::InvalidArgumentError(format!(
            "{sources} merge sources exceed the row source mask limit of {}",
            MAX_ROW_SOURCE_MASK_SOURCE + 1
        )));
    }
    Ok(())
}
