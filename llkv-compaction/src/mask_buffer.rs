//! Spillable buffer of row source masks.
//!
//! The key column group writes one mask per merged row; every later group
//! replays them in order. The buffer moves through three phases:
//!
//! ```text
//!   Writing --flush--> Sealed --flip_to_read--> Reading
//!                                  ^                |
//!                                  +--flip_to_read--+
//! ```
//!
//! Writes are rejected once sealed and reads are rejected until the first
//! `flip_to_read`, so an out-of-order caller fails immediately instead of
//! replaying a partial mask stream.

use crate::row_source_mask::RowSourceMask;
use llkv_result::{Error, Result};
use llkv_tablet::TabletId;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

const MASK_BYTES: usize = std::mem::size_of::<u16>();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Writing,
    Sealed,
    Reading,
}

enum Spill {
    None,
    Writing(BufWriter<File>),
    Idle(File),
    Reading(BufReader<File>),
}

/// Single-writer-then-single-reader channel of [`RowSourceMask`]s for one
/// compaction task.
pub struct RowSourceMaskBuffer {
    tablet_id: TabletId,
    memory_limit: usize,
    buffer_size: usize,
    spill_dir: PathBuf,
    phase: Phase,
    /// Unspilled masks. Once spilled, only the tail awaiting the next spill.
    mem: Vec<u16>,
    spill: Spill,
    spilled: bool,
    total: u64,
    consumed: u64,
    read_buf: Vec<u16>,
    read_pos: usize,
}

impl RowSourceMaskBuffer {
    /// `memory_limit` bounds the bytes of masks held in memory while writing;
    /// `buffer_size` is the I/O buffer of the spill file.
    pub fn new(
        tablet_id: TabletId,
        memory_limit: usize,
        buffer_size: usize,
        spill_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            tablet_id,
            memory_limit,
            buffer_size: buffer_size.max(MASK_BYTES),
            spill_dir: spill_dir.into(),
            phase: Phase::Writing,
            mem: Vec::new(),
            spill: Spill::None,
            spilled: false,
            total: 0,
            consumed: 0,
            read_buf: Vec::new(),
            read_pos: 0,
        }
    }

    /// Append `masks` in order.
    pub fn write(&mut self, masks: &[RowSourceMask]) -> Result<()> {
        if self.phase != Phase::Writing {
            return Err(Error::InvalidState(format!(
                "row source mask buffer of tablet {} written after it was sealed",
                self.tablet_id
            )));
        }
        self.mem.extend(masks.iter().map(|m| m.data()));
        self.total += masks.len() as u64;
        if self.mem.len() * MASK_BYTES > self.memory_limit {
            self.spill_mem()?;
        }
        Ok(())
    }

    fn spill_mem(&mut self) -> Result<()> {
        if matches!(self.spill, Spill::None) {
            let file = tempfile::tempfile_in(&self.spill_dir)?;
            tracing::debug!(
                tablet = %self.tablet_id,
                dir = %self.spill_dir.display(),
                masks = self.total,
                "spilling row source masks"
            );
            self.spill = Spill::Writing(BufWriter::with_capacity(self.buffer_size, file));
            self.spilled = true;
        }
        let Spill::Writing(writer) = &mut self.spill else {
            return Err(Error::Internal(
                "row source mask spill file is not writable".into(),
            ));
        };
        for v in &self.mem {
            writer.write_all(&v.to_le_bytes())?;
        }
        self.mem.clear();
        Ok(())
    }

    /// Seal the write phase. Called exactly once, after the key column group
    /// wrote its last masks.
    pub fn flush(&mut self) -> Result<()> {
        if self.phase != Phase::Writing {
            return Err(Error::InvalidState(format!(
                "row source mask buffer of tablet {} sealed twice",
                self.tablet_id
            )));
        }
        if self.spilled {
            self.spill_mem()?;
            match std::mem::replace(&mut self.spill, Spill::None) {
                Spill::Writing(writer) => {
                    let file = writer.into_inner().map_err(|e| e.into_error())?;
                    self.spill = Spill::Idle(file);
                }
                _ => {
                    return Err(Error::Internal(
                        "row source mask spill file is not writable".into(),
                    ));
                }
            }
        }
        self.mem.shrink_to_fit();
        self.phase = Phase::Sealed;
        Ok(())
    }

    /// Rewind to the first mask. Requires a sealed buffer; may be called
    /// again to replay the masks for another column group.
    pub fn flip_to_read(&mut self) -> Result<()> {
        if self.phase == Phase::Writing {
            return Err(Error::InvalidState(format!(
                "row source mask buffer of tablet {} read before it was sealed",
                self.tablet_id
            )));
        }
        self.consumed = 0;
        self.read_buf.clear();
        self.read_pos = 0;
        if self.spilled {
            let mut file = match std::mem::replace(&mut self.spill, Spill::None) {
                Spill::Idle(file) => file,
                Spill::Reading(reader) => reader.into_inner(),
                _ => {
                    return Err(Error::Internal(
                        "row source mask spill file is not readable".into(),
                    ));
                }
            };
            file.seek(SeekFrom::Start(0))?;
            self.spill = Spill::Reading(BufReader::with_capacity(self.buffer_size, file));
        }
        self.phase = Phase::Reading;
        Ok(())
    }

    #[inline]
    pub fn has_remaining(&self) -> bool {
        self.phase == Phase::Reading && self.consumed < self.total
    }

    /// Masks left to read in the current pass.
    #[inline]
    pub fn remaining(&self) -> u64 {
        if self.phase == Phase::Reading {
            self.total - self.consumed
        } else {
            0
        }
    }

    /// Consume the next mask. Reading past the last written mask is an
    /// internal error: the column groups disagree on the number of rows.
    pub fn next_mask(&mut self) -> Result<RowSourceMask> {
        if self.phase != Phase::Reading {
            return Err(Error::InvalidState(format!(
                "row source mask buffer of tablet {} read before flip_to_read",
                self.tablet_id
            )));
        }
        if self.consumed >= self.total {
            tracing::error!(
                tablet = %self.tablet_id,
                total = self.total,
                "row source mask buffer exhausted"
            );
            return Err(Error::Internal(format!(
                "row source mask buffer exhausted after {} masks",
                self.total
            )));
        }
        let data = if self.spilled {
            if self.read_pos >= self.read_buf.len() {
                self.refill()?;
            }
            let v = self.read_buf[self.read_pos];
            self.read_pos += 1;
            v
        } else {
            self.mem[self.consumed as usize]
        };
        self.consumed += 1;
        Ok(RowSourceMask::from_data(data))
    }

    fn refill(&mut self) -> Result<()> {
        let Spill::Reading(reader) = &mut self.spill else {
            return Err(Error::Internal(
                "row source mask spill file is not readable".into(),
            ));
        };
        let want = ((self.total - self.consumed) as usize).min(self.buffer_size / MASK_BYTES);
        let mut bytes = vec![0u8; want * MASK_BYTES];
        reader.read_exact(&mut bytes)?;
        self.read_buf.clear();
        self.read_buf.extend(
            bytes
                .chunks_exact(MASK_BYTES)
                .map(|c| u16::from_le_bytes([c[0], c[1]])),
        );
        self.read_pos = 0;
        Ok(())
    }

    /// Number of masks written.
    #[inline]
    pub fn total_written(&self) -> u64 {
        self.total
    }

    /// Number of masks read in the current pass.
    #[inline]
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    #[inline]
    pub fn is_spilled(&self) -> bool {
        self.spilled
    }

    /// Heap bytes held by the buffer.
    pub fn memory_usage(&self) -> usize {
        let io = if self.spilled { self.buffer_size } else { 0 };
        (self.mem.capacity() + self.read_buf.capacity()) * MASK_BYTES + io
    }
}

impl std::fmt::Debug for RowSourceMaskBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowSourceMaskBuffer")
            .field("tablet_id", &self.tablet_id)
            .field("phase", &self.phase)
            .field("total", &self.total)
            .field("consumed", &self.consumed)
            .field("spilled", &self.spilled)
            .finish()
    }
}
