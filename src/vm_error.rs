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

use core::fmt;

/// Failure conditions of the virtual memory layer.
///
/// The page table and the block heap return these directly so the eviction
/// retry loop can inspect failures as cheaply as a flag check (`VmError` is
/// `Copy` and fieldless). The handle and container layers pass them through
/// unchanged, so by the time an error reaches the user it still tells apart
/// an I/O failure from plain resource exhaustion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    /// A read, write or flush against the backing store failed.
    /// No automatic retry is performed; retry policy belongs to the caller.
    StorageIo,

    /// No RAM buffer could be obtained even after exhausting all eviction
    /// candidates, or no page slot is left. Occurs without any store
    /// operation failing.
    OutOfMemory,

    /// The requested allocation exceeds one page's usable payload capacity
    /// and can never be satisfied, not even on an empty page.
    AllocTooLarge,

    /// A page index outside the table, or a slot in the wrong allocation
    /// state for the requested operation.
    InvalidPage,

    /// `offset + len` runs past the end of a page. Objects never straddle
    /// a page boundary, so this is a contract violation of the caller.
    OutOfBounds,

    /// Arithmetic or an operation requiring bound storage was attempted on
    /// an unbound handle (dereference is exempt: it binds lazily).
    Unbound,

    /// The optional integration-boundary lock is currently held.
    Busy,

    /// Rejected configuration (page size not a multiple of the alignment,
    /// too small to host a heap page, zero page count, storage region
    /// smaller than `page_count * page_size`).
    InvalidConfig,
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            VmError::StorageIo => "backing store i/o failed",
            VmError::OutOfMemory => "out of memory: no evictable page or free slot",
            VmError::AllocTooLarge => "allocation exceeds one page's usable capacity",
            VmError::InvalidPage => "invalid page index or page state",
            VmError::OutOfBounds => "access crosses the page boundary",
            VmError::Unbound => "operation on an unbound handle",
            VmError::Busy => "manager lock is held",
            VmError::InvalidConfig => "invalid configuration",
        };
        f.write_str(text)
    }
}
