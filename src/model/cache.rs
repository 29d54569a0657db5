//! Page cache and diff engine in front of a [`Transport`].

use alloc::{collections::BTreeMap, vec::Vec};

use crate::model::{
    MemoryAddress, MemoryLayout, ModelError, PageKey, Transport, TransportError,
    helpers::page_set, layout::MAX_BATCH_SIZE,
};

/// Counters of cache activity since creation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CacheStats {
    /// Page lookups served from the cache.
    pub hits: u64,
    /// Page lookups that went to the transport.
    pub misses: u64,
    pub page_reads: u64,
    pub chunk_writes: u64,
    pub invalidations: u64,
}

/// A contiguous run of changed bytes within one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffRun {
    pub offset: u16,
    pub data: heapless::Vec<u8, MAX_BATCH_SIZE>,
}

/// Computes the write runs turning `old` into `new`.
///
/// A run extends while consecutive bytes differ and is cut after
/// `batch_size` bytes or at `boundary`; unchanged bytes are never part of a run.
pub fn diff_runs(old: &[u8], new: &[u8], batch_size: usize, boundary: Option<u16>) -> Vec<DiffRun> {
    let batch_size = batch_size.clamp(1, MAX_BATCH_SIZE);
    let differs = |i: usize| old.get(i) != new.get(i);
    let mut runs = Vec::new();
    let mut i = 0;
    while i < new.len() {
        if !differs(i) {
            i += 1;
            continue;
        }
        let offset = i as u16;
        let mut data = heapless::Vec::new();
        while i < new.len() && differs(i) && data.len() < batch_size {
            if !data.is_empty() && boundary == Some(i as u16) {
                break;
            }
            if data.push(new[i]).is_err() {
                break;
            }
            i += 1;
        }
        runs.push(DiffRun { offset, data });
    }
    runs
}

/// Remote memory cache: whole pages are read once and served from memory,
/// writes only push the bytes that differ from the cached content.
///
/// Every cached page holds the last content read or successfully written.
/// Any transport failure drops the whole cache.
pub struct MemoryCache<T> {
    transport: T,
    layout: MemoryLayout,
    pages: BTreeMap<PageKey, Vec<u8>>,
    stats: CacheStats,
}

impl<T: Transport> MemoryCache<T> {
    pub fn new(transport: T, layout: MemoryLayout) -> Self {
        Self {
            transport,
            layout,
            pages: BTreeMap::new(),
            stats: CacheStats::default(),
        }
    }

    pub fn layout(&self) -> &MemoryLayout {
        &self.layout
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    pub fn is_cached(&self, key: PageKey) -> bool {
        self.pages.contains_key(&key)
    }

    pub fn cached_pages(&self) -> usize {
        self.pages.len()
    }

    /// Drops every cached page; the next access re-reads from the transport.
    pub fn invalidate(&mut self) {
        if !self.pages.is_empty() {
            log::info!("MEMORY: cache invalidated ({} pages)", self.pages.len());
        }
        self.pages.clear();
        self.stats.invalidations += 1;
    }

    /// Runs `f`, invalidating the whole cache if it fails.
    fn guarded<R>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<R, ModelError>,
    ) -> Result<R, ModelError> {
        let result = f(self);
        if result.is_err() {
            self.invalidate();
        }
        result
    }

    fn fetch(&mut self, (space, page): PageKey) -> Result<(), ModelError> {
        let expected = self.layout.space(space)?.page_size as usize;
        log::debug!("MEMORY.{}: read P{}", space.code(), page);
        let data = self.transport.read_page(space, page)?;
        self.stats.page_reads += 1;
        if data.len() != expected {
            return Err(TransportError::ShortRead {
                expected,
                actual: data.len(),
            }
            .into());
        }
        self.pages.insert((space, page), data);
        Ok(())
    }

    /// Makes sure every page in `keys` is cached; volatile pages are re-read.
    fn ensure(&mut self, keys: impl IntoIterator<Item = PageKey>) -> Result<(), ModelError> {
        for key in keys {
            let volatile = self.layout.space(key.0)?.volatile;
            if !volatile && self.pages.contains_key(&key) {
                self.stats.hits += 1;
                continue;
            }
            self.stats.misses += 1;
            self.fetch(key)?;
        }
        Ok(())
    }

    /// Reads the bytes of each address, in order.
    ///
    /// Each distinct page is read from the transport at most once per call.
    ///
    /// # Errors
    /// * layout violations ([`ModelError::OutOfBounds`], [`ModelError::ZeroLength`],
    ///   [`ModelError::UnknownSpace`])
    /// * [`ModelError::Transport`] - the cache has been invalidated
    pub fn read(&mut self, addresses: &[MemoryAddress]) -> Result<Vec<Vec<u8>>, ModelError> {
        let mut ranges = Vec::with_capacity(addresses.len());
        for address in addresses {
            ranges.push(self.layout.check(address)?);
        }
        self.guarded(|cache| {
            cache.ensure(page_set(addresses))?;
            addresses
                .iter()
                .zip(ranges)
                .map(|(address, range)| {
                    cache
                        .pages
                        .get(&address.page_key())
                        .map(|page| page[range].to_vec())
                        .ok_or(ModelError::OutOfBounds { address: *address })
                })
                .collect()
        })
    }

    /// Writes every `(address, bytes)` pair, pushing only changed runs.
    ///
    /// Returns whether any byte was written.
    ///
    /// # Errors
    /// * [`ModelError::LengthMismatch`] - bytes do not match the address length
    /// * layout violations, see [`read`](Self::read)
    /// * [`ModelError::Transport`] - the cache has been invalidated
    pub fn write(&mut self, writes: &[(MemoryAddress, Vec<u8>)]) -> Result<bool, ModelError> {
        for (address, data) in writes {
            self.layout.check(address)?;
            if data.len() != address.length as usize {
                return Err(ModelError::LengthMismatch {
                    address: *address,
                    actual: data.len(),
                });
            }
        }
        let batch_size = self.layout.batch_size();
        self.guarded(|cache| {
            cache.ensure(page_set(writes.iter().map(|(address, _)| address)))?;

            let mut working: BTreeMap<PageKey, Vec<u8>> = BTreeMap::new();
            for (address, data) in writes {
                let key = address.page_key();
                if !working.contains_key(&key) {
                    let cached = cache
                        .pages
                        .get(&key)
                        .cloned()
                        .ok_or(ModelError::OutOfBounds { address: *address })?;
                    working.insert(key, cached);
                }
                if let Some(page) = working.get_mut(&key) {
                    page[address.range()].copy_from_slice(data);
                }
            }

            let mut written = false;
            for ((space, page), new) in &working {
                let Some(old) = cache.pages.get(&(*space, *page)) else {
                    continue;
                };
                let boundary = cache.layout.space(*space)?.write_boundary;
                for run in diff_runs(old, new, batch_size, boundary) {
                    log::info!(
                        "MEMORY.{}: write P{} S{} {:?}",
                        space.code(),
                        page,
                        run.offset,
                        run.data.as_slice()
                    );
                    cache
                        .transport
                        .write_chunk(*space, *page, run.offset, &run.data)?;
                    cache.stats.chunk_writes += 1;
                    written = true;
                }
            }
            cache.pages.extend(working);
            Ok(written)
        })
    }

    /// Sends the activation signal.
    pub fn activate(&mut self) -> Result<(), ModelError> {
        log::info!("MEMORY: activate");
        self.transport.activate()?;
        Ok(())
    }
}
