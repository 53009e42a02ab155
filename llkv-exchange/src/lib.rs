//! Pass-through chunk buffers for fragments exchanging data inside one
//! process.
//!
//! When the sender and receiver of an exchange live in the same process, the
//! sender hands its [`RecordBatch`](arrow::record_batch::RecordBatch)es to a
//! shared buffer instead of serializing them. Buffers are organised as:
//!
//! ```text
//! PassThroughChunkBufferManager      query id -> buffer (reference counted)
//!   PassThroughChunkBuffer           (fragment instance, node) -> channel
//!     PassThroughChannel             sender id -> sender channel
//!       PassThroughSenderChannel     chunks + byte sizes, drained by pull
//! ```
//!
//! Every fragment instance of a query calls
//! [`PassThroughChunkBufferManager::open_fragment_instance`] before use and
//! [`PassThroughChunkBufferManager::close_fragment_instance`] when done; the
//! buffer leaves the manager when the last instance closes. Handles already
//! given out stay valid until dropped.

#![forbid(unsafe_code)]

mod pass_through;
mod types;

pub use pass_through::{
    ChannelKey, PassThroughChannel, PassThroughChunkBuffer, PassThroughChunkBufferManager,
    PassThroughContext, PassThroughSenderChannel,
};
pub use types::{NodeId, SenderId, UniqueId};
