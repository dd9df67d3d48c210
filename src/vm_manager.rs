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

use log::{debug, info};

use crate::block_heap::{self, HeapLoc};
use crate::modules::storage::StorageModule;
use crate::page_table::{AllocOptions, PageTable};
use crate::vm_config::VmConfig;
use crate::vm_error::VmError;

/// The virtual memory context: owns the page table (and through it all page
/// RAM buffers and the backing store) and fronts the small-block heap.
///
/// One instance per storage region; create it once and pass it to every
/// handle and container operation. The public surface is deliberately
/// narrow: allocation, swapping and raw page access stay crate-internal,
/// because unconstrained direct page manipulation is unsafe for ordinary
/// callers; handles and containers are the supported way in.
///
/// # Threading
///
/// Single logical thread of control only. There is no internal locking and
/// no atomics; every operation takes `&mut self` and runs to completion on
/// the caller's thread. For use behind a shared boundary see
/// [`SharedVm`](crate::SharedVm).
pub struct VmManager<S: StorageModule> {
    table: PageTable<S>,
}

impl<S: StorageModule> VmManager<S> {
    /// Claims and zeroes `page_count * page_size` bytes of `storage` and
    /// resets all page bookkeeping.
    pub fn new(storage: S, config: VmConfig) -> Result<Self, VmError> {
        info!(
            "vm manager starting: {} x {} byte pages",
            config.page_count, config.page_size
        );
        Ok(VmManager {
            table: PageTable::new(storage, config)?,
        })
    }

    pub fn page_size(&self) -> usize {
        self.table.page_size()
    }

    pub fn page_count(&self) -> usize {
        self.table.page_count()
    }

    /// Number of pages currently holding a RAM buffer.
    pub fn resident_pages(&self) -> usize {
        self.table.resident_pages()
    }

    /// Force-persists every allocated page. RAM buffers stay in place.
    pub fn flush_all(&mut self) -> Result<(), VmError> {
        self.table.flush_all()
    }

    /// Persists everything, releases all RAM buffers and closes the backing
    /// store (dropped with the manager).
    pub fn shutdown(mut self) -> Result<(), VmError> {
        self.table.shutdown()?;
        debug!("vm manager shut down");
        Ok(())
    }

    // ---- privileged interface: heap allocator, handles, containers ----

    pub(crate) fn heap_alloc(&mut self, size: usize) -> Result<HeapLoc, VmError> {
        block_heap::alloc(&mut self.table, size)
    }

    pub(crate) fn heap_free(&mut self, loc: HeapLoc) -> Result<(), VmError> {
        block_heap::free(&mut self.table, loc)
    }

    pub(crate) fn heap_realloc(
        &mut self,
        loc: HeapLoc,
        new_size: usize,
        preserve: usize,
    ) -> Result<HeapLoc, VmError> {
        block_heap::realloc_move(&mut self.table, loc, new_size, preserve)
    }

    /// A whole page for a single owner, zeroed, evictable unless pinned.
    pub(crate) fn alloc_dedicated_page(&mut self, can_free_ram: bool) -> Result<usize, VmError> {
        self.table.alloc_page(AllocOptions {
            can_free_ram,
            zero: true,
            reuse_swap_data: false,
        })
    }

    pub(crate) fn free_page(&mut self, index: usize, wipe: bool) -> Result<(), VmError> {
        self.table.free_page(index, wipe)
    }

    /// Persists the page (when dirty) and releases its RAM buffer.
    pub(crate) fn unload_page(&mut self, index: usize) -> Result<(), VmError> {
        self.table.swap_out(index, false)
    }

    pub(crate) fn page_read(
        &mut self,
        index: usize,
        offset: usize,
        len: usize,
    ) -> Result<&[u8], VmError> {
        self.table.read_ptr(index, offset, len)
    }

    pub(crate) fn page_write(
        &mut self,
        index: usize,
        offset: usize,
        len: usize,
    ) -> Result<&mut [u8], VmError> {
        self.table.write_ptr(index, offset, len)
    }
}
