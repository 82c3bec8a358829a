//! Overlap index: fixed-capacity interval index inferring data hazards.
//!
//! # Scope
//! Maps buffer address ranges to their access history (last writer, current
//! version, pending readers since that writer) so the scheduler can infer
//! RAW/WAW/WAR edges purely from range intersection. Callers never author
//! edges; this index is the sole source of dependency truth.
//!
//! # Structure
//! Entries are pool-allocated records addressed by `u32` index. Lookup is a
//! fixed bucket array keyed by coarse page (`addr >> COARSE_PAGE_SHIFT`); an
//! entry is linked into the bucket of every page its range spans, so a query
//! overlapping any part of the range finds it regardless of where either
//! range starts. Queries spanning several pages deduplicate entries with a
//! visit-generation stamp. Reader sets are pool-allocated link records.
//!
//! # Invariants
//! - No pool ever grows; exhaustion is a fatal [`Fault`].
//! - Any nonzero intersection is a full hazard; there is no sub-range
//!   splitting.
//! - Versions only move forward, and only on writer (OUTPUT/INOUT) events.
//! - Chain traversal order is fixed for a fixed insertion history, so
//!   identical programs yield identical dependency graphs.

use crate::error::Fault;
use crate::stdx::{SlotPool, NIL};
use crate::tensor::{HazardKind, ParamRole, TaskId, TensorDesc};

/// Coarse page granularity for bucket hashing: 4 KiB.
pub const COARSE_PAGE_SHIFT: u32 = 12;

/// Sizing for the overlap index pools.
///
/// Defaults match a mid-sized orchestration (thousands of live ranges);
/// all four limits are hard.
#[derive(Clone, Copy, Debug)]
pub struct TensorMapConfig {
    /// Bucket count; must be a power of two.
    pub buckets: u32,
    /// Range-record capacity.
    pub entries: u32,
    /// Bucket-chain link capacity. Each entry consumes one link per coarse
    /// page its range spans.
    pub chain_links: u32,
    /// Pending-reader record capacity.
    pub readers: u32,
}

impl Default for TensorMapConfig {
    fn default() -> Self {
        Self {
            buckets: 1024,
            entries: 4096,
            chain_links: 8192,
            readers: 8192,
        }
    }
}

struct Entry {
    addr: u64,
    len: u32,
    writer: Option<TaskId>,
    version: u32,
    /// Head of this range's pending-reader list.
    readers: u32,
    /// Bucket links still pointing at this entry.
    links: u32,
    /// Visit-generation stamp for multi-page query dedupe.
    visit: u64,
}

#[derive(Clone, Copy)]
struct ChainLink {
    entry: u32,
    next: u32,
}

#[derive(Clone, Copy)]
struct ReaderLink {
    task: TaskId,
    next: u32,
}

/// Pool occupancy snapshot for host-side sizing analysis.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TensorMapStats {
    pub entries_in_use: u32,
    pub chain_links_in_use: u32,
    pub readers_in_use: u32,
}

/// Fixed-capacity interval index. See module docs.
pub struct TensorMap {
    buckets: Box<[u32]>,
    entries: SlotPool<Entry>,
    chain: SlotPool<ChainLink>,
    readers: SlotPool<ReaderLink>,
    visit_gen: u64,
    /// Reusable scratch of overlapping entry indices found by the current
    /// query; sized once so steady state never allocates.
    scratch_overlaps: Vec<u32>,
    scratch_buckets: Vec<u32>,
}

impl TensorMap {
    pub fn new(config: TensorMapConfig) -> Self {
        assert!(config.buckets.is_power_of_two(), "bucket count must be a power of two");
        assert!(config.entries > 0);

        Self {
            buckets: vec![NIL; config.buckets as usize].into_boxed_slice(),
            entries: SlotPool::with_capacity(config.entries),
            chain: SlotPool::with_capacity(config.chain_links),
            readers: SlotPool::with_capacity(config.readers),
            visit_gen: 0,
            scratch_overlaps: Vec::with_capacity(config.entries as usize),
            scratch_buckets: Vec::with_capacity(64),
        }
    }

    #[inline]
    fn bucket_of(&self, page: u64) -> usize {
        // Fibonacci multiplicative mix; bucket count is a power of two.
        let mixed = page.wrapping_mul(0x9e37_79b9_7f4a_7c15);
        (mixed >> 32) as usize & (self.buckets.len() - 1)
    }

    #[inline]
    fn page_range(addr: u64, len: u32) -> (u64, u64) {
        debug_assert!(len > 0);
        (
            addr >> COARSE_PAGE_SHIFT,
            (addr + u64::from(len) - 1) >> COARSE_PAGE_SHIFT,
        )
    }

    /// Current monotonic version of the exact range, 0 if never written.
    pub fn version_of(&self, desc: &TensorDesc) -> u32 {
        let (p0, _) = Self::page_range(desc.addr, desc.len);
        let mut link = self.buckets[self.bucket_of(p0)];
        while link != NIL {
            let ChainLink { entry, next } = *self.chain.get(link);
            let e = self.entries.get(entry);
            if e.addr == desc.addr && e.len == desc.len {
                return e.version;
            }
            link = next;
        }
        0
    }

    /// Record one buffer access for `task`, emitting every hazard source it
    /// conflicts with, then updating the index for the task's own effect.
    ///
    /// Hazards are emitted in a fixed order for a fixed program: pages
    /// ascending, then chain order within each bucket. The caller filters
    /// sources that are already terminal and deduplicates repeated sources.
    pub fn record_access(
        &mut self,
        task: TaskId,
        role: ParamRole,
        desc: TensorDesc,
        mut emit: impl FnMut(TaskId, HazardKind),
    ) -> Result<(), Fault> {
        assert!(desc.len > 0, "zero-length access");
        let (p0, p1) = Self::page_range(desc.addr, desc.len);

        self.visit_gen += 1;
        let gen = self.visit_gen;
        self.scratch_overlaps.clear();

        // Collect overlapping entries once, deduped across pages.
        for page in p0..=p1 {
            let bucket = self.bucket_of(page);
            let mut link = self.buckets[bucket];
            while link != NIL {
                let ChainLink { entry, next } = *self.chain.get(link);
                link = next;

                let e = self.entries.get_mut(entry);
                if e.visit == gen {
                    continue;
                }
                e.visit = gen;
                if desc.overlaps(e.addr, e.len) {
                    self.scratch_overlaps.push(entry);
                }
            }
        }

        let mut exact = None;
        for i in 0..self.scratch_overlaps.len() {
            let entry = self.scratch_overlaps[i];
            let e = self.entries.get(entry);
            if e.addr == desc.addr && e.len == desc.len {
                exact = Some(entry);
            }

            if let Some(writer) = e.writer {
                if writer != task {
                    let kind = if role.writes() {
                        HazardKind::Waw
                    } else {
                        HazardKind::Raw
                    };
                    emit(writer, kind);
                }
            }

            if role.writes() {
                let mut r = e.readers;
                while r != NIL {
                    let ReaderLink { task: reader, next } = *self.readers.get(r);
                    if reader != task {
                        emit(reader, HazardKind::War);
                    }
                    r = next;
                }
            }
        }

        if role.writes() {
            // WAR edges are captured above; the displaced readers must not
            // hazard against anything later.
            for i in 0..self.scratch_overlaps.len() {
                let entry = self.scratch_overlaps[i];
                self.clear_readers_of(entry);
            }

            match exact {
                Some(entry) => {
                    let e = self.entries.get_mut(entry);
                    e.writer = Some(task);
                    e.version += 1;
                }
                None => {
                    self.insert_entry(desc, Some(task), 1, p0, p1)?;
                }
            }
        } else {
            let entry = match exact {
                Some(entry) => entry,
                None => self.insert_entry(desc, None, 0, p0, p1)?,
            };
            self.push_reader(entry, task)?;
        }

        Ok(())
    }

    /// Drop every entry whose range was allocated inside the reclaimed
    /// span, so future allocations at the same addresses start with a clean
    /// history. Returns the number of entries purged.
    pub fn purge_span(&mut self, addr: u64, len: u64) -> u32 {
        if len == 0 {
            return 0;
        }
        let p0 = addr >> COARSE_PAGE_SHIFT;
        let p1 = (addr + len - 1) >> COARSE_PAGE_SHIFT;

        self.scratch_buckets.clear();
        for page in p0..=p1 {
            let bucket = self.bucket_of(page) as u32;
            if !self.scratch_buckets.contains(&bucket) {
                self.scratch_buckets.push(bucket);
            }
        }

        let mut purged = 0;
        for i in 0..self.scratch_buckets.len() {
            let bucket = self.scratch_buckets[i] as usize;

            let mut prev = NIL;
            let mut link = self.buckets[bucket];
            while link != NIL {
                let ChainLink { entry, next } = *self.chain.get(link);

                let (contained, overlapping) = {
                    let e = self.entries.get(entry);
                    let end = e.addr + u64::from(e.len);
                    (
                        e.addr >= addr && end <= addr + len,
                        e.addr < addr + len && addr < end,
                    )
                };
                // Arena spans reclaim whole allocations; a range straddling
                // the span boundary would mean the bump discipline broke.
                debug_assert!(contained == overlapping);

                if contained {
                    if prev == NIL {
                        self.buckets[bucket] = next;
                    } else {
                        self.chain.get_mut(prev).next = next;
                    }
                    self.chain.release(link);

                    let remaining = {
                        let e = self.entries.get_mut(entry);
                        e.links -= 1;
                        e.links
                    };
                    if remaining == 0 {
                        self.clear_readers_of(entry);
                        self.entries.release(entry);
                        purged += 1;
                    }
                } else {
                    prev = link;
                }
                link = next;
            }
        }
        purged
    }

    pub fn stats(&self) -> TensorMapStats {
        TensorMapStats {
            entries_in_use: self.entries.in_use(),
            chain_links_in_use: self.chain.in_use(),
            readers_in_use: self.readers.in_use(),
        }
    }

    fn insert_entry(
        &mut self,
        desc: TensorDesc,
        writer: Option<TaskId>,
        version: u32,
        p0: u64,
        p1: u64,
    ) -> Result<u32, Fault> {
        let pages = (p1 - p0 + 1) as u32;

        // Check both pools up front so a failed insert leaves no partial
        // linkage behind.
        if self.entries.is_exhausted() {
            return Err(Fault::IndexPoolExhausted {
                capacity: self.entries.capacity(),
            });
        }
        if self.chain.capacity() - self.chain.in_use() < pages {
            return Err(Fault::IndexPoolExhausted {
                capacity: self.chain.capacity(),
            });
        }

        let entry = self
            .entries
            .acquire(Entry {
                addr: desc.addr,
                len: desc.len,
                writer,
                version,
                readers: NIL,
                links: pages,
                visit: self.visit_gen,
            })
            .expect("entry pool checked above");

        for page in p0..=p1 {
            let bucket = self.bucket_of(page);
            let head = self.buckets[bucket];
            let link = self
                .chain
                .acquire(ChainLink { entry, next: head })
                .expect("chain pool checked above");
            self.buckets[bucket] = link;
        }

        Ok(entry)
    }

    fn push_reader(&mut self, entry: u32, task: TaskId) -> Result<(), Fault> {
        // A task reading the same range through several params is one
        // reader.
        let mut r = self.entries.get(entry).readers;
        while r != NIL {
            let ReaderLink { task: existing, next } = *self.readers.get(r);
            if existing == task {
                return Ok(());
            }
            r = next;
        }

        let head = self.entries.get(entry).readers;
        let link = self
            .readers
            .acquire(ReaderLink { task, next: head })
            .ok_or(Fault::IndexPoolExhausted {
                capacity: self.readers.capacity(),
            })?;
        self.entries.get_mut(entry).readers = link;
        Ok(())
    }

    fn clear_readers_of(&mut self, entry: u32) {
        let mut r = self.entries.get(entry).readers;
        while r != NIL {
            let next = self.readers.get(r).next;
            self.readers.release(r);
            r = next;
        }
        self.entries.get_mut(entry).readers = NIL;
    }
}
