//! Hook into the primary-key delta subsystem.

use bytes::Bytes;
use llkv_result::Result;
use llkv_storage::pager::Pager;
use llkv_tablet::{Tablet, TabletSchema, TxnLog};

/// Precomputes state the delta subsystem needs to apply a compaction, so the
/// later publish is cheap.
///
/// Called after the transaction log is stored, for primary-key tablets only.
/// Failures are logged by the caller and never fail the compaction.
pub trait CompactionStatePreloader<P>: Send + Sync
where
    P: Pager<Blob = Bytes>,
{
    fn preload_compaction_state(
        &self,
        txn_log: &TxnLog,
        tablet: &Tablet<P>,
        schema: &TabletSchema,
    ) -> Result<()>;
}

/// Preloader that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCompactionStatePreloader;

impl<P> CompactionStatePreloader<P> for NoopCompactionStatePreloader
where
    P: Pager<Blob = Bytes>,
{
    fn preload_compaction_state(
        &self,
        _txn_log: &TxnLog,
        _tablet: &Tablet<P>,
        _schema: &TabletSchema,
    ) -> Result<()> {
        Ok(())
    }
}
