use crate::types::{NodeId, SenderId, UniqueId};
use arrow::record_batch::RecordBatch;
use rustc_hash::FxHashMap;
use std::sync::{Arc, Mutex};

/// Chunks appended by one sender, waiting to be pulled.
#[derive(Debug, Default)]
pub struct PassThroughSenderChannel {
    inner: Mutex<SenderBuffer>,
}

#[derive(Debug, Default)]
struct SenderBuffer {
    chunks: Vec<RecordBatch>,
    bytes: Vec<usize>,
}

impl PassThroughSenderChannel {
    /// Queue a copy of `chunk`. `bytes` is the size the sender accounts for
    /// it and is handed back unchanged by [`Self::pull_chunks`].
    pub fn append_chunk(&self, chunk: &RecordBatch, bytes: usize) {
        let chunk = chunk.clone();
        let mut inner = self.inner.lock().expect("sender channel lock poisoned");
        inner.chunks.push(chunk);
        inner.bytes.push(bytes);
    }

    /// Take everything queued so far, in append order.
    pub fn pull_chunks(&self) -> (Vec<RecordBatch>, Vec<usize>) {
        let mut inner = self.inner.lock().expect("sender channel lock poisoned");
        (
            std::mem::take(&mut inner.chunks),
            std::mem::take(&mut inner.bytes),
        )
    }

    pub fn pending_chunks(&self) -> usize {
        self.inner
            .lock()
            .expect("sender channel lock poisoned")
            .chunks
            .len()
    }
}

/// Channel of one `(fragment instance, node)` pair, split per sender.
#[derive(Debug, Default)]
pub struct PassThroughChannel {
    senders: Mutex<FxHashMap<SenderId, Arc<PassThroughSenderChannel>>>,
}

impl PassThroughChannel {
    pub fn get_or_create_sender_channel(&self, sender_id: SenderId) -> Arc<PassThroughSenderChannel> {
        let mut senders = self.senders.lock().expect("pass-through channel lock poisoned");
        Arc::clone(senders.entry(sender_id).or_default())
    }

    pub fn num_senders(&self) -> usize {
        self.senders
            .lock()
            .expect("pass-through channel lock poisoned")
            .len()
    }
}

/// `(fragment instance id, destination node id)`.
pub type ChannelKey = (UniqueId, NodeId);

/// All pass-through channels of one query.
#[derive(Debug)]
pub struct PassThroughChunkBuffer {
    query_id: UniqueId,
    channels: Mutex<FxHashMap<ChannelKey, Arc<PassThroughChannel>>>,
}

impl PassThroughChunkBuffer {
    fn new(query_id: UniqueId) -> Self {
        Self {
            query_id,
            channels: Mutex::new(FxHashMap::default()),
        }
    }

    #[inline]
    pub fn query_id(&self) -> UniqueId {
        self.query_id
    }

    pub fn get_or_create_channel(&self, key: ChannelKey) -> Arc<PassThroughChannel> {
        let mut channels = self.channels.lock().expect("chunk buffer lock poisoned");
        Arc::clone(channels.entry(key).or_default())
    }

    pub fn num_channels(&self) -> usize {
        self.channels.lock().expect("chunk buffer lock poisoned").len()
    }
}

struct BufferEntry {
    buffer: Arc<PassThroughChunkBuffer>,
    open_instances: usize,
}

/// Registry of per-query chunk buffers.
///
/// A buffer is created by the first `open_fragment_instance` of its query and
/// removed by the matching last `close_fragment_instance`.
#[derive(Default)]
pub struct PassThroughChunkBufferManager {
    buffers: Mutex<FxHashMap<UniqueId, BufferEntry>>,
}

impl PassThroughChunkBufferManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one more fragment instance of `query_id` and return the
    /// query's buffer.
    pub fn open_fragment_instance(&self, query_id: UniqueId) -> Arc<PassThroughChunkBuffer> {
        let mut buffers = self.buffers.lock().expect("chunk buffer manager lock poisoned");
        let entry = buffers.entry(query_id).or_insert_with(|| BufferEntry {
            buffer: Arc::new(PassThroughChunkBuffer::new(query_id)),
            open_instances: 0,
        });
        entry.open_instances += 1;
        tracing::trace!(
            query = %query_id,
            open_instances = entry.open_instances,
            "opened pass-through fragment instance"
        );
        Arc::clone(&entry.buffer)
    }

    /// Release one fragment instance of `query_id`. Unknown ids are ignored.
    pub fn close_fragment_instance(&self, query_id: UniqueId) {
        let mut buffers = self.buffers.lock().expect("chunk buffer manager lock poisoned");
        let Some(entry) = buffers.get_mut(&query_id) else {
            return;
        };
        entry.open_instances -= 1;
        tracing::trace!(
            query = %query_id,
            open_instances = entry.open_instances,
            "closed pass-through fragment instance"
        );
        if entry.open_instances == 0 {
            buffers.remove(&query_id);
            tracing::debug!(query = %query_id, "released pass-through chunk buffer");
        }
    }

    pub fn get(&self, query_id: UniqueId) -> Option<Arc<PassThroughChunkBuffer>> {
        self.buffers
            .lock()
            .expect("chunk buffer manager lock poisoned")
            .get(&query_id)
            .map(|e| Arc::clone(&e.buffer))
    }

    /// Open fragment instances of `query_id`, `0` if it has no buffer.
    pub fn open_instances(&self, query_id: UniqueId) -> usize {
        self.buffers
            .lock()
            .expect("chunk buffer manager lock poisoned")
            .get(&query_id)
            .map_or(0, |e| e.open_instances)
    }

    pub fn len(&self) -> usize {
        self.buffers
            .lock()
            .expect("chunk buffer manager lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The channel of one exchange node within one fragment instance.
#[derive(Debug, Clone)]
pub struct PassThroughContext {
    buffer: Arc<PassThroughChunkBuffer>,
    fragment_instance_id: UniqueId,
    node_id: NodeId,
    channel: Arc<PassThroughChannel>,
}

impl PassThroughContext {
    pub fn new(
        buffer: Arc<PassThroughChunkBuffer>,
        fragment_instance_id: UniqueId,
        node_id: NodeId,
    ) -> Self {
        let channel = buffer.get_or_create_channel((fragment_instance_id, node_id));
        Self {
            buffer,
            fragment_instance_id,
            node_id,
            channel,
        }
    }

    pub fn query_id(&self) -> UniqueId {
        self.buffer.query_id()
    }

    pub fn fragment_instance_id(&self) -> UniqueId {
        self.fragment_instance_id
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn append_chunk(&self, sender_id: SenderId, chunk: &RecordBatch, bytes: usize) {
        self.channel
            .get_or_create_sender_channel(sender_id)
            .append_chunk(chunk, bytes);
    }

    pub fn pull_chunks(&self, sender_id: SenderId) -> (Vec<RecordBatch>, Vec<usize>) {
        self.channel
            .get_or_create_sender_channel(sender_id)
            .pull_chunks()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Int32Array;
    use arrow::datatypes::{DataType, Field, Schema};

    fn chunk(values: Vec<i32>) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![Field::new("a", DataType::Int32, false)]));
        RecordBatch::try_new(schema, vec![Arc::new(Int32Array::from(values))]).unwrap()
    }

    #[test]
    fn pull_drains_in_append_order() {
        let channel = PassThroughSenderChannel::default();
        channel.append_chunk(&chunk(vec![1]), 4);
        channel.append_chunk(&chunk(vec![2, 3]), 8);
        let (chunks, bytes) = channel.pull_chunks();
        assert_eq!(chunks, vec![chunk(vec![1]), chunk(vec![2, 3])]);
        assert_eq!(bytes, vec![4, 8]);
        let (chunks, bytes) = channel.pull_chunks();
        assert!(chunks.is_empty() && bytes.is_empty());
    }

    #[test]
    fn channels_are_shared_per_key() {
        let buffer = PassThroughChunkBuffer::new(UniqueId::new(1, 1));
        let a = buffer.get_or_create_channel((UniqueId::new(2, 0), 5));
        let b = buffer.get_or_create_channel((UniqueId::new(2, 0), 5));
        let c = buffer.get_or_create_channel((UniqueId::new(2, 0), 6));
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(buffer.num_channels(), 2);

        let s = a.get_or_create_sender_channel(0);
        assert!(Arc::ptr_eq(&s, &b.get_or_create_sender_channel(0)));
        assert_eq!(a.num_senders(), 1);
    }
}
