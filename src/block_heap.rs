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

//! First-fit free-list allocator layered on top of "heap" pages.
//!
//! Many sub-page objects share one page: each heap page starts with a
//! [`HeapHeader`] followed by a chain of blocks, every block led by a
//! [`BlockHeader`]. Free blocks of one page form a singly linked list
//! starting at `first_free`. Adjacent free blocks are never coalesced;
//! repeated alloc/free cycles may fragment a page. That is an accepted
//! trade-off inherited from the original design (see DESIGN.md).

use core::mem::size_of;

use log::trace;
use static_assertions::const_assert;
use static_assertions::const_assert_eq;

use crate::modules::storage::StorageModule;
use crate::page_table::{AllocOptions, PageTable};
use crate::vm_error::VmError;

/// Payload alignment; every payload offset is a multiple of this.
pub(crate) const ALIGN: usize = 8;

/// Identifies a heap page's content versus stale or zeroed data.
const HEAP_MAGIC: u32 = 0x5648_4541; // "VHEA"
const HEAP_VERSION: u32 = 1;

/// Terminates the free list.
const NO_BLOCK: u32 = u32::MAX;

/// Header sizes on the page, rounded up to the alignment boundary.
pub(crate) const HEAP_HEADER_SIZE: usize = 16;
pub(crate) const BLOCK_HEADER_SIZE: usize = 16;

/// Lives at offset 0 of every heap page.
///
/// **Important**: don't remove `#[repr(C)]`, instances are moved to and from
/// page memory by bytes.
#[repr(C)]
struct HeapHeader {
    magic: u32,
    version: u32,

    /// offset of the first free block's header, `NO_BLOCK` when full
    first_free: u32,

    /// running total of free payload bytes on this page
    free_total: u32,
}

/// Precedes every block, used and free.
#[repr(C)]
struct BlockHeader {
    /// payload size in bytes, always a multiple of `ALIGN`
    size: u32,

    /// 1 when the block is on the free list
    free: u32,

    /// offset of the next free block's header; meaningful only when free
    next_free: u32,
}

const_assert!(size_of::<HeapHeader>() <= HEAP_HEADER_SIZE);
const_assert!(size_of::<BlockHeader>() <= BLOCK_HEADER_SIZE);
const_assert_eq!(HEAP_HEADER_SIZE % ALIGN, 0);
const_assert_eq!(BLOCK_HEADER_SIZE % ALIGN, 0);

/// Location of one payload: `(page index, byte offset of the payload)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct HeapLoc {
    pub page: usize,
    pub offset: usize,
}

pub(crate) fn round_up(size: usize) -> usize {
    (size + ALIGN - 1) & !(ALIGN - 1)
}

/// Largest payload a single (empty) heap page can host.
pub(crate) fn usable_capacity(page_size: usize) -> usize {
    page_size - HEAP_HEADER_SIZE - BLOCK_HEADER_SIZE
}

/// Allocates `size` bytes (rounded up to `ALIGN`) from the first heap page
/// with a fitting free block, claiming a fresh heap page from the page table
/// when none fits. Requests beyond one page's usable capacity fail
/// deterministically.
pub(crate) fn alloc<S: StorageModule>(
    pt: &mut PageTable<S>,
    size: usize,
) -> Result<HeapLoc, VmError> {
    let need = round_up(size.max(1));
    if need > usable_capacity(pt.page_size()) {
        return Err(VmError::AllocTooLarge);
    }

    for index in 0..pt.page_count() {
        if !pt.is_heap_page(index) {
            continue;
        }
        let header = load_or_init_header(pt, index)?;
        if (header.free_total as usize) < need {
            // no single free block can be larger than the page's free total
            continue;
        }
        if let Some(offset) = alloc_in_page(pt, index, need)? {
            return Ok(HeapLoc { page: index, offset });
        }
    }

    // nothing fit, grow the heap by one page
    let index = pt.alloc_page(AllocOptions {
        can_free_ram: true,
        zero: true,
        reuse_swap_data: false,
    })?;
    pt.mark_heap(index);
    init_header(pt, index)?;

    match alloc_in_page(pt, index, need)? {
        Some(offset) => {
            trace!("heap grew by page {}", index);
            Ok(HeapLoc { page: index, offset })
        }
        None => {
            debug_assert!(false, "fresh heap page cannot satisfy a fitting request");
            Err(VmError::OutOfMemory)
        }
    }
}

/// Returns a used block to its page's free list (head insertion, no
/// coalescing) and accounts its payload back into the free total.
pub(crate) fn free<S: StorageModule>(pt: &mut PageTable<S>, loc: HeapLoc) -> Result<(), VmError> {
    if !pt.is_heap_page(loc.page) {
        return Err(VmError::InvalidPage);
    }
    if loc.offset < HEAP_HEADER_SIZE + BLOCK_HEADER_SIZE
        || loc.offset % ALIGN != 0
        || loc.offset >= pt.page_size()
    {
        return Err(VmError::OutOfBounds);
    }

    let mut header = load_header(pt, loc.page)?;
    let block_offset = loc.offset - BLOCK_HEADER_SIZE;
    let mut block: BlockHeader = unsafe { pt.read_obj(loc.page, block_offset)? };
    if block.free != 0 || block.size as usize > usable_capacity(pt.page_size()) {
        // not a live block: double free or a fabricated offset
        return Err(VmError::OutOfBounds);
    }

    block.free = 1;
    block.next_free = header.first_free;
    pt.write_obj(loc.page, block_offset, &block)?;

    header.first_free = block_offset as u32;
    header.free_total += block.size;
    store_header(pt, loc.page, &header)?;

    trace!("heap free {} bytes at ({}, {})", block.size, loc.page, loc.offset);
    Ok(())
}

/// Move-reallocate: fresh storage of at least `new_size` bytes, the first
/// `preserve` bytes copied over (clamped to the new capacity), old block
/// freed. Used to grow storage beyond its current block.
pub(crate) fn realloc_move<S: StorageModule>(
    pt: &mut PageTable<S>,
    old: HeapLoc,
    new_size: usize,
    preserve: usize,
) -> Result<HeapLoc, VmError> {
    let new_loc = alloc(pt, new_size)?;
    let copy = preserve.min(round_up(new_size.max(1)));

    let result = (|| -> Result<(), VmError> {
        if copy > 0 {
            let data = pt.read_ptr(old.page, old.offset, copy)?.to_vec();
            pt.write_ptr(new_loc.page, new_loc.offset, copy)?
                .copy_from_slice(&data);
        }
        free(pt, old)
    })();

    match result {
        Ok(()) => Ok(new_loc),
        Err(err) => {
            // the fresh block must not leak when the move fails
            let _ = free(pt, new_loc);
            Err(err)
        }
    }
}

/// Fresh heap page: one free block spanning the whole usable payload area.
fn init_header<S: StorageModule>(pt: &mut PageTable<S>, index: usize) -> Result<HeapHeader, VmError> {
    let block = BlockHeader {
        size: usable_capacity(pt.page_size()) as u32,
        free: 1,
        next_free: NO_BLOCK,
    };
    pt.write_obj(index, HEAP_HEADER_SIZE, &block)?;

    let header = HeapHeader {
        magic: HEAP_MAGIC,
        version: HEAP_VERSION,
        first_free: HEAP_HEADER_SIZE as u32,
        free_total: block.size,
    };
    store_header(pt, index, &header)?;
    Ok(header)
}

fn load_header<S: StorageModule>(pt: &mut PageTable<S>, index: usize) -> Result<HeapHeader, VmError> {
    let header: HeapHeader = unsafe { pt.read_obj(index, 0)? };
    if header.magic != HEAP_MAGIC || header.version != HEAP_VERSION {
        return Err(VmError::InvalidPage);
    }
    Ok(header)
}

/// Validates the page's header, initializing it on first touch of a fresh
/// (zeroed or stale) heap page.
fn load_or_init_header<S: StorageModule>(
    pt: &mut PageTable<S>,
    index: usize,
) -> Result<HeapHeader, VmError> {
    let header: HeapHeader = unsafe { pt.read_obj(index, 0)? };
    if header.magic != HEAP_MAGIC || header.version != HEAP_VERSION {
        return init_header(pt, index);
    }
    Ok(header)
}

fn store_header<S: StorageModule>(
    pt: &mut PageTable<S>,
    index: usize,
    header: &HeapHeader,
) -> Result<(), VmError> {
    pt.write_obj(index, 0, header)
}

/// First-fit walk of one page's free list. On a fit the block is split when
/// the leftover can host another header plus one aligned payload unit,
/// otherwise taken whole (internal fragmentation accepted). Returns the
/// payload offset, or `None` when nothing on this page fits.
fn alloc_in_page<S: StorageModule>(
    pt: &mut PageTable<S>,
    index: usize,
    need: usize,
) -> Result<Option<usize>, VmError> {
    let mut header = load_header(pt, index)?;

    let mut prev = NO_BLOCK;
    let mut cur = header.first_free;
    while cur != NO_BLOCK {
        let block: BlockHeader = unsafe { pt.read_obj(index, cur as usize)? };
        debug_assert_eq!(block.free, 1, "used block on the free list");

        if (block.size as usize) < need {
            prev = cur;
            cur = block.next_free;
            continue;
        }

        let leftover = block.size as usize - need;
        let successor: u32;
        if leftover >= BLOCK_HEADER_SIZE + ALIGN {
            // split: head becomes the allocation, tail a new free block
            let split_offset = cur as usize + BLOCK_HEADER_SIZE + need;
            let split = BlockHeader {
                size: (leftover - BLOCK_HEADER_SIZE) as u32,
                free: 1,
                next_free: block.next_free,
            };
            pt.write_obj(index, split_offset, &split)?;
            successor = split_offset as u32;

            pt.write_obj(
                index,
                cur as usize,
                &BlockHeader {
                    size: need as u32,
                    free: 0,
                    next_free: NO_BLOCK,
                },
            )?;
            header.free_total -= (need + BLOCK_HEADER_SIZE) as u32;
        } else {
            // take the whole block and unlink it
            successor = block.next_free;
            pt.write_obj(
                index,
                cur as usize,
                &BlockHeader {
                    size: block.size,
                    free: 0,
                    next_free: NO_BLOCK,
                },
            )?;
            header.free_total -= block.size;
        }

        if prev == NO_BLOCK {
            header.first_free = successor;
        } else {
            let mut prev_block: BlockHeader = unsafe { pt.read_obj(index, prev as usize)? };
            prev_block.next_free = successor;
            pt.write_obj(index, prev as usize, &prev_block)?;
        }
        store_header(pt, index, &header)?;

        let payload = cur as usize + BLOCK_HEADER_SIZE;
        trace!("heap alloc {} bytes at ({}, {})", need, index, payload);
        return Ok(Some(payload));
    }

    Ok(None)
}
