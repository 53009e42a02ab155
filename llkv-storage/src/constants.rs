use crate::types::PhysicalKey;

/// Well-known key holding the tablet catalog blob.
pub const CATALOG_ROOT_PKEY: PhysicalKey = 0;
