use crate::error::Error;

/// Result type alias used by every crate in the workspace.
///
/// Shorthand for `std::result::Result<T, Error>`. Pager calls, segment reads,
/// mask-buffer I/O and the compaction task itself all return this type so
/// failures can be propagated with `?` up to the task boundary.
pub type Result<T> = std::result::Result<T, Error>;
