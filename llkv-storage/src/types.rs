/// Opaque 64-bit address in the pager namespace.
///
/// Segment files, column-group parts, transaction logs and the catalog root are
/// all addressed by a `PhysicalKey`; higher layers never interpret its value.
pub type PhysicalKey = u64;
