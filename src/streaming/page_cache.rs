//! Application controlled page cache over a read-only byte stream

use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom};

use crate::core::types::Result;
use crate::core::Error;

/// Default page size in bytes
pub const DEFAULT_PAGE_SIZE: u64 = 512 * 1024;

/// Paged read cache where the application schedules the I/O.
///
/// `prefetch` marks pages wanted at some priority without touching the
/// stream; `fetch_now` performs a bounded number of the highest priority
/// reads; `read` is a pure lookup that fails (returns false) when any
/// overlapping page is missing. Pages are never evicted: the cache grows
/// to the working set actually visited.
pub struct StreamPageCache<R: Read + Seek> {
    input: R,
    page_size: u64,
    file_size: u64,
    pending: HashMap<u64, f64>,
    pages: HashMap<u64, Vec<u8>>,
}

impl<R: Read + Seek> StreamPageCache<R> {
    pub fn new(input: R) -> Result<Self> {
        Self::with_page_size(input, DEFAULT_PAGE_SIZE)
    }

    pub fn with_page_size(mut input: R, page_size: u64) -> Result<Self> {
        assert!(page_size > 0);
        let file_size = input.seek(SeekFrom::End(0))?;
        input.seek(SeekFrom::Start(0))?;
        Ok(Self {
            input,
            page_size,
            file_size,
            pending: HashMap::new(),
            pages: HashMap::new(),
        })
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    fn page_index(&self, address: u64) -> u64 {
        address / self.page_size
    }

    /// Mark the pages overlapping `[offset, offset+length)` for fetching.
    ///
    /// A pending page's priority is the maximum of any overlapping
    /// request. No I/O happens here; the return value says whether the
    /// whole range is already cached.
    pub fn prefetch(&mut self, offset: u64, length: u64, priority: f64) -> Result<bool> {
        if offset + length > self.file_size {
            return Err(Error::Streaming(format!(
                "prefetch request [{}, {}) past end of file ({} bytes)",
                offset,
                offset + length,
                self.file_size
            )));
        }
        let pages_begin = self.page_index(offset);
        let pages_end = self.page_index(offset + length - 1) + 1;
        let mut in_cache = true;
        for page_idx in pages_begin..pages_end {
            if self.pages.contains_key(&page_idx) {
                continue;
            }
            let entry = self.pending.entry(page_idx).or_insert(priority);
            if *entry < priority {
                *entry = priority;
            }
            in_cache = false;
        }
        Ok(in_cache)
    }

    /// Copy `length` bytes starting at `offset` into `buf`.
    ///
    /// Returns false without side effects if any overlapping page is not
    /// cached; the caller should `prefetch` then `fetch_now` and retry.
    pub fn read(&self, buf: &mut [u8], offset: u64, length: u64) -> bool {
        debug_assert!(buf.len() as u64 >= length);
        let pages_begin = self.page_index(offset);
        let pages_end = self.page_index(offset + length - 1) + 1;
        let mut out_pos = 0usize;
        for page_idx in pages_begin..pages_end {
            let Some(page) = self.pages.get(&page_idx) else {
                return false;
            };
            let page_offset_begin = page_idx * self.page_size;
            let page_offset_end = (page_idx + 1) * self.page_size;
            let byte_begin = offset.saturating_sub(page_offset_begin);
            let byte_end = if page_offset_end > offset + length {
                offset + length - page_offset_begin
            } else {
                self.page_size
            };
            let nbytes = (byte_end - byte_begin) as usize;
            buf[out_pos..out_pos + nbytes]
                .copy_from_slice(&page[byte_begin as usize..byte_end as usize]);
            out_pos += nbytes;
        }
        true
    }

    /// Fetch up to `num_fetch` pending pages, highest priority first.
    /// This is the only method that touches the underlying stream.
    /// Returns the number of pages fetched.
    pub fn fetch_now(&mut self, num_fetch: usize) -> Result<usize> {
        let mut priority_pages: Vec<(f64, u64)> =
            self.pending.iter().map(|(&idx, &pri)| (pri, idx)).collect();
        let num_fetch = num_fetch.min(priority_pages.len());
        if num_fetch < priority_pages.len() {
            priority_pages.select_nth_unstable_by(num_fetch, |a, b| {
                b.0.total_cmp(&a.0).then(b.1.cmp(&a.1))
            });
        }
        for &(_, page_idx) in &priority_pages[..num_fetch] {
            let page_offset = page_idx * self.page_size;
            let nbytes = self.page_size.min(self.file_size - page_offset) as usize;
            let mut page = vec![0u8; nbytes];
            self.input.seek(SeekFrom::Start(page_offset))?;
            self.input.read_exact(&mut page)?;
            let prev = self.pages.insert(page_idx, page);
            debug_assert!(prev.is_none(), "page fetched twice");
            self.pending.remove(&page_idx);
        }
        Ok(num_fetch)
    }
}
