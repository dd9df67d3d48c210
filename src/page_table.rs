/*
 *  Copyright (C) 2026  vm_heap developers
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  You should have received a copy of the GNU General Public License
 *  along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use core::mem::{size_of, MaybeUninit};
use core::ptr;

use log::{debug, info, trace};

use crate::modules::storage::StorageModule;
use crate::vm_config::VmConfig;
use crate::vm_error::VmError;

/// RAM buffer of one resident page.
///
/// Backed by `u64` words so the buffer start is always 8-byte aligned; every
/// payload handed out by the heap sits on an aligned offset, which keeps
/// typed accesses through the handles sound.
struct PageBuf {
    words: Box<[u64]>,
}

impl PageBuf {
    fn zeroed(page_size: usize) -> Self {
        debug_assert_eq!(page_size % 8, 0);
        Self {
            words: vec![0u64; page_size / 8].into_boxed_slice(),
        }
    }

    fn bytes(&self) -> &[u8] {
        unsafe { core::slice::from_raw_parts(self.words.as_ptr() as *const u8, self.words.len() * 8) }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        unsafe {
            core::slice::from_raw_parts_mut(self.words.as_mut_ptr() as *mut u8, self.words.len() * 8)
        }
    }
}

/// Bookkeeping for one fixed-size page slot.
struct PageDescriptor {
    /// slot is in use by some owner (heap or dedicated)
    allocated: bool,

    /// live RAM buffer, exclusively owned by the page table; `Some` == resident
    buf: Option<PageBuf>,

    /// policy bit fixed at allocation time; `false` pins the page in RAM
    can_free_ram: bool,

    /// RAM content diverged from the persisted content
    dirty: bool,

    /// content is known to be all zero without having touched storage
    zero_filled: bool,

    /// owned by the small-block heap (vs. dedicated to a single owner)
    is_heap: bool,

    /// byte offset of this page's region in the backing store, fixed at init
    swap_offset: usize,

    /// tick of the most recent touch, the eviction selection key
    last_access: u64,
}

impl PageDescriptor {
    fn unallocated(swap_offset: usize) -> Self {
        PageDescriptor {
            allocated: false,
            buf: None,
            can_free_ram: true,
            dirty: false,
            zero_filled: true,
            is_heap: false,
            swap_offset,
            last_access: 0,
        }
    }
}

/// How a freshly allocated page obtains its initial content.
#[derive(Debug, Clone, Copy)]
pub(crate) struct AllocOptions {
    /// allow eviction of this page later; `false` pins it
    pub can_free_ram: bool,

    /// guarantee all-zero initial content
    pub zero: bool,

    /// load the page's backing-store region instead of starting fresh
    pub reuse_swap_data: bool,
}

impl Default for AllocOptions {
    fn default() -> Self {
        AllocOptions {
            can_free_ram: true,
            zero: true,
            reuse_swap_data: false,
        }
    }
}

/// The paging engine: sole owner of page RAM buffers and sole issuer of
/// persistence operations against the backing store.
///
/// RAM is modelled as a budget of `max_resident_pages` frames. Acquiring a
/// buffer beyond the budget triggers least-recently-used eviction among the
/// pages that are allocated, resident and not pinned; the evicted page is
/// persisted first when dirty. Single logical thread of control throughout,
/// there is no internal locking.
pub(crate) struct PageTable<S: StorageModule> {
    pages: Vec<PageDescriptor>,
    storage: S,
    page_size: usize,
    max_resident: usize,
    resident: usize,
    tick: u64,
}

impl<S: StorageModule> PageTable<S> {
    /// Claims `page_count * page_size` bytes of the storage region, writes it
    /// out as zeros and resets every descriptor to the unallocated,
    /// zero-filled state.
    pub(crate) fn new(mut storage: S, config: VmConfig) -> Result<Self, VmError> {
        config.validate()?;
        if storage.max_size() < config.page_count * config.page_size {
            return Err(VmError::InvalidConfig);
        }

        let zeros = vec![0u8; config.page_size];
        for index in 0..config.page_count {
            storage.write(index * config.page_size, &zeros)?;
        }
        storage.flush()?;

        let pages = (0..config.page_count)
            .map(|index| PageDescriptor::unallocated(index * config.page_size))
            .collect();

        info!(
            "page table up: {} pages x {} bytes, {} resident frames",
            config.page_count, config.page_size, config.max_resident_pages
        );

        Ok(PageTable {
            pages,
            storage,
            page_size: config.page_size,
            max_resident: config.max_resident_pages,
            resident: 0,
            tick: 0,
        })
    }

    pub(crate) fn page_size(&self) -> usize {
        self.page_size
    }

    pub(crate) fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub(crate) fn resident_pages(&self) -> usize {
        self.resident
    }

    pub(crate) fn is_heap_page(&self, index: usize) -> bool {
        index < self.pages.len() && self.pages[index].allocated && self.pages[index].is_heap
    }

    pub(crate) fn mark_heap(&mut self, index: usize) {
        debug_assert!(self.pages[index].allocated, "marking an unallocated slot");
        self.pages[index].is_heap = true;
    }

    fn check_index(&self, index: usize) -> Result<(), VmError> {
        if index >= self.pages.len() {
            return Err(VmError::InvalidPage);
        }
        Ok(())
    }

    fn touch(&mut self, index: usize) {
        self.tick += 1;
        self.pages[index].last_access = self.tick;
    }

    /// Least `last_access` among evictable pages, ties broken by scan order.
    fn pick_victim(&self) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (index, page) in self.pages.iter().enumerate() {
            if !(page.allocated && page.buf.is_some() && page.can_free_ram) {
                continue;
            }
            match best {
                Some(current) if self.pages[current].last_access <= page.last_access => {}
                _ => best = Some(index),
            }
        }
        best
    }

    /// Obtains one zeroed RAM frame, evicting the LRU page when the budget
    /// is spent. Bounded: after `page_count` evictions either a frame is
    /// free or nothing was evictable to begin with.
    fn acquire_buf(&mut self) -> Result<PageBuf, VmError> {
        for _ in 0..=self.pages.len() {
            if self.resident < self.max_resident {
                return Ok(PageBuf::zeroed(self.page_size));
            }
            let victim = match self.pick_victim() {
                Some(index) => index,
                None => return Err(VmError::OutOfMemory),
            };
            trace!("evicting page {} (tick {})", victim, self.pages[victim].last_access);
            self.swap_out(victim, false)?;
            if self.pages[victim].buf.is_some() {
                // victim refused to release its frame; nothing else will either
                return Err(VmError::OutOfMemory);
            }
        }
        Err(VmError::OutOfMemory)
    }

    /// Allocates the first free slot. See [`PageTable::alloc_page_at`].
    pub(crate) fn alloc_page(&mut self, opts: AllocOptions) -> Result<usize, VmError> {
        let index = match self.pages.iter().position(|page| !page.allocated) {
            Some(index) => index,
            None => return Err(VmError::OutOfMemory),
        };
        self.alloc_page_at(index, opts)?;
        Ok(index)
    }

    /// Allocates the slot `index`: obtains a RAM frame (evicting if needed)
    /// and initializes content per `opts`. Content not loaded from the store
    /// is marked dirty so it survives a later eviction.
    pub(crate) fn alloc_page_at(&mut self, index: usize, opts: AllocOptions) -> Result<(), VmError> {
        self.check_index(index)?;
        if self.pages[index].allocated {
            return Err(VmError::InvalidPage);
        }

        let buf = self.acquire_buf()?;
        let prev_zero_filled = self.pages[index].zero_filled;
        {
            let page = &mut self.pages[index];
            page.buf = Some(buf);
            page.allocated = true;
            page.can_free_ram = opts.can_free_ram;
            page.is_heap = false;
            page.dirty = !opts.reuse_swap_data;
            page.zero_filled = !opts.reuse_swap_data && opts.zero;
        }
        self.resident += 1;

        if opts.reuse_swap_data {
            let offset = self.pages[index].swap_offset;
            let result = self
                .storage
                .read(offset, self.pages[index].buf.as_mut().unwrap().bytes_mut());
            if let Err(err) = result {
                // leave the slot free again, a failed allocation claims nothing
                let page = &mut self.pages[index];
                page.buf = None;
                page.allocated = false;
                page.dirty = false;
                page.zero_filled = prev_zero_filled;
                self.resident -= 1;
                return Err(err);
            }
        }

        self.touch(index);
        trace!(
            "allocated page {} (pinned: {}, reuse: {})",
            index,
            !opts.can_free_ram,
            opts.reuse_swap_data
        );
        Ok(())
    }

    /// Persists the page when dirty (or forced) and, when not pinned,
    /// releases its RAM frame. Succeeds as a no-op for non-resident pages.
    pub(crate) fn swap_out(&mut self, index: usize, force: bool) -> Result<(), VmError> {
        self.check_index(index)?;
        if self.pages[index].buf.is_none() {
            return Ok(());
        }

        if self.pages[index].dirty || force {
            let offset = self.pages[index].swap_offset;
            self.storage
                .write(offset, self.pages[index].buf.as_ref().unwrap().bytes())?;
            self.storage.flush()?;
            self.pages[index].dirty = false;
        }

        if self.pages[index].can_free_ram {
            self.pages[index].buf = None;
            self.resident -= 1;
        }
        Ok(())
    }

    /// Makes the page resident, loading content from the store (or zeros,
    /// when the content is known all-zero). Freshly loaded content mirrors
    /// storage, so dirty is cleared.
    pub(crate) fn swap_in(&mut self, index: usize) -> Result<(), VmError> {
        self.check_index(index)?;
        if self.pages[index].buf.is_some() {
            return Ok(());
        }

        let buf = self.acquire_buf()?;
        self.pages[index].buf = Some(buf);
        self.resident += 1;

        if !self.pages[index].zero_filled {
            let offset = self.pages[index].swap_offset;
            let result = self
                .storage
                .read(offset, self.pages[index].buf.as_mut().unwrap().bytes_mut());
            if let Err(err) = result {
                self.pages[index].buf = None;
                self.resident -= 1;
                return Err(err);
            }
        }
        self.pages[index].dirty = false;
        trace!("swapped in page {}", index);
        Ok(())
    }

    fn check_access(&self, index: usize, offset: usize, len: usize) -> Result<(), VmError> {
        self.check_index(index)?;
        if !self.pages[index].allocated {
            return Err(VmError::InvalidPage);
        }
        if offset + len > self.page_size {
            return Err(VmError::OutOfBounds);
        }
        Ok(())
    }

    /// Read accessor: guarantees residency and returns the bytes at
    /// `[offset, offset + len)`. Does not mark the page dirty, which is what
    /// lets read-only traversal avoid future persistence I/O.
    pub(crate) fn read_ptr(&mut self, index: usize, offset: usize, len: usize) -> Result<&[u8], VmError> {
        self.check_access(index, offset, len)?;
        self.swap_in(index)?;
        self.touch(index);
        Ok(&self.pages[index].buf.as_ref().unwrap().bytes()[offset..offset + len])
    }

    /// Write accessor: like [`PageTable::read_ptr`] but marks the page dirty
    /// and drops the all-zero knowledge.
    pub(crate) fn write_ptr(
        &mut self,
        index: usize,
        offset: usize,
        len: usize,
    ) -> Result<&mut [u8], VmError> {
        self.check_access(index, offset, len)?;
        self.swap_in(index)?;
        self.touch(index);
        let page = &mut self.pages[index];
        page.dirty = true;
        page.zero_filled = false;
        Ok(&mut page.buf.as_mut().unwrap().bytes_mut()[offset..offset + len])
    }

    /// Reads a plain-data value out of a page.
    ///
    /// Safety: `T` must be valid for any bit pattern (`#[repr(C)]` header
    /// structs of integers); padding bytes are taken as-is.
    pub(crate) unsafe fn read_obj<T: Sized>(&mut self, index: usize, offset: usize) -> Result<T, VmError> {
        let bytes = self.read_ptr(index, offset, size_of::<T>())?;
        let mut value = MaybeUninit::<T>::uninit();
        ptr::copy_nonoverlapping(bytes.as_ptr(), value.as_mut_ptr() as *mut u8, size_of::<T>());
        Ok(value.assume_init())
    }

    /// Writes a plain-data value into a page, dirtying it.
    pub(crate) fn write_obj<T: Sized>(
        &mut self,
        index: usize,
        offset: usize,
        value: &T,
    ) -> Result<(), VmError> {
        let bytes = self.write_ptr(index, offset, size_of::<T>())?;
        unsafe {
            ptr::copy_nonoverlapping(value as *const T as *const u8, bytes.as_mut_ptr(), size_of::<T>());
        }
        Ok(())
    }

    /// Releases the slot. `wipe` zeroes the backing-store region instead of
    /// persisting; otherwise dirty resident content is written back first so
    /// a later `reuse_swap_data` allocation can pick it up.
    pub(crate) fn free_page(&mut self, index: usize, wipe: bool) -> Result<(), VmError> {
        self.check_index(index)?;
        if !self.pages[index].allocated {
            return Err(VmError::InvalidPage);
        }

        if wipe {
            let offset = self.pages[index].swap_offset;
            let zeros = vec![0u8; self.page_size];
            self.storage.write(offset, &zeros)?;
        } else if self.pages[index].buf.is_some() && self.pages[index].dirty {
            let offset = self.pages[index].swap_offset;
            self.storage
                .write(offset, self.pages[index].buf.as_ref().unwrap().bytes())?;
        }

        let page = &mut self.pages[index];
        if page.buf.take().is_some() {
            self.resident -= 1;
        }
        page.allocated = false;
        page.is_heap = false;
        page.dirty = false;
        page.can_free_ram = true;
        page.zero_filled = wipe;
        trace!("freed page {} (wipe: {})", index, wipe);
        Ok(())
    }

    /// Force-persists every allocated resident page, keeping all RAM frames.
    pub(crate) fn flush_all(&mut self) -> Result<(), VmError> {
        for index in 0..self.pages.len() {
            if self.pages[index].allocated && self.pages[index].buf.is_some() {
                let offset = self.pages[index].swap_offset;
                self.storage
                    .write(offset, self.pages[index].buf.as_ref().unwrap().bytes())?;
                self.pages[index].dirty = false;
            }
        }
        self.storage.flush()
    }

    /// Flush-all, then release every RAM frame. The storage module itself is
    /// closed when the table is dropped.
    pub(crate) fn shutdown(&mut self) -> Result<(), VmError> {
        self.flush_all()?;
        for page in self.pages.iter_mut() {
            page.buf = None;
        }
        self.resident = 0;
        debug!("page table shut down");
        Ok(())
    }
}
