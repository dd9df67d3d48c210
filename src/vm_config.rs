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

use crate::block_heap::{ALIGN, BLOCK_HEADER_SIZE, HEAP_HEADER_SIZE};
use crate::vm_error::VmError;

/// The smallest page that can still host a heap header, one block header and
/// one aligned payload unit.
pub const MIN_PAGE_SIZE: usize = HEAP_HEADER_SIZE + BLOCK_HEADER_SIZE + ALIGN;

/// Geometry of the virtual memory region.
///
/// `page_count * page_size` bytes of backing store are claimed at
/// initialization. `max_resident_pages` is the RAM frame budget: how many
/// pages may hold a live RAM buffer at the same time. Once it is reached,
/// further buffer acquisitions evict the least recently used page first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmConfig {
    pub page_size: usize,
    pub page_count: usize,
    pub max_resident_pages: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            page_size: 4096,
            page_count: 16,
            max_resident_pages: 16,
        }
    }
}

impl VmConfig {
    pub(crate) fn validate(&self) -> Result<(), VmError> {
        if self.page_size < MIN_PAGE_SIZE || self.page_size % ALIGN != 0 {
            return Err(VmError::InvalidConfig);
        }
        if self.page_size > u32::MAX as usize {
            // heap headers store offsets as u32
            return Err(VmError::InvalidConfig);
        }
        if self.page_count == 0 || self.max_resident_pages == 0 {
            return Err(VmError::InvalidConfig);
        }
        Ok(())
    }
}
