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

use core::ptr;

use crate::block_heap::{usable_capacity, HeapLoc};
use crate::modules::storage::StorageModule;
use crate::vm_error::VmError;
use crate::vm_manager::VmManager;

/// Growable UTF-8 string on a single heap block.
///
/// The bytes live in one small-block allocation, so the maximum length is
/// the largest block a page can hold. Capacity doubles on growth and is
/// never given back until [`VmString::destroy`]; `clear` only resets the
/// length.
///
/// Invariant: only complete UTF-8 sequences are ever written, which is what
/// makes the unchecked conversion in [`VmString::as_str`] sound.
pub struct VmString {
    loc: Option<HeapLoc>,
    len: usize,
    capacity: usize,
}

impl VmString {
    /// An empty string. No storage is allocated until the first append.
    pub fn new() -> Self {
        VmString {
            loc: None,
            len: 0,
            capacity: 0,
        }
    }

    /// An empty string with a block for at least `capacity` bytes already
    /// claimed.
    pub fn with_capacity<S: StorageModule>(
        mgr: &mut VmManager<S>,
        capacity: usize,
    ) -> Result<Self, VmError> {
        let mut string = Self::new();
        if capacity > 0 {
            string.ensure_capacity(mgr, capacity)?;
        }
        Ok(string)
    }

    pub fn from_str<S: StorageModule>(
        mgr: &mut VmManager<S>,
        content: &str,
    ) -> Result<Self, VmError> {
        let mut string = Self::new();
        string.push_str(mgr, content)?;
        Ok(string)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes the current block can hold without reallocating.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Grows the block so at least `needed` bytes fit, moving the content
    /// if the allocator has to relocate.
    fn ensure_capacity<S: StorageModule>(
        &mut self,
        mgr: &mut VmManager<S>,
        needed: usize,
    ) -> Result<(), VmError> {
        if needed <= self.capacity {
            return Ok(());
        }
        let limit = usable_capacity(mgr.page_size());
        if needed > limit {
            return Err(VmError::AllocTooLarge);
        }
        let new_capacity = (self.capacity * 2).max(needed).max(8).min(limit);

        match self.loc {
            None => {
                self.loc = Some(mgr.heap_alloc(new_capacity)?);
            }
            Some(loc) => {
                self.loc = Some(mgr.heap_realloc(loc, new_capacity, self.len)?);
            }
        }
        self.capacity = new_capacity;
        Ok(())
    }

    pub fn push_str<S: StorageModule>(
        &mut self,
        mgr: &mut VmManager<S>,
        content: &str,
    ) -> Result<(), VmError> {
        if content.is_empty() {
            return Ok(());
        }
        self.ensure_capacity(mgr, self.len + content.len())?;

        // ensure_capacity guarantees a block here
        let loc = self.loc.ok_or(VmError::Unbound)?;
        let dest = mgr.page_write(loc.page, loc.offset + self.len, content.len())?;
        unsafe {
            ptr::copy_nonoverlapping(content.as_ptr(), dest.as_mut_ptr(), content.len());
        }
        self.len += content.len();
        Ok(())
    }

    pub fn push<S: StorageModule>(
        &mut self,
        mgr: &mut VmManager<S>,
        ch: char,
    ) -> Result<(), VmError> {
        let mut utf8 = [0u8; 4];
        self.push_str(mgr, ch.encode_utf8(&mut utf8))
    }

    /// Replaces the whole content. Existing capacity is reused.
    pub fn assign<S: StorageModule>(
        &mut self,
        mgr: &mut VmManager<S>,
        content: &str,
    ) -> Result<(), VmError> {
        self.len = 0;
        self.push_str(mgr, content)
    }

    /// Resets the length. The block stays allocated.
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Borrows the content. The reference is only valid until the next
    /// manager operation (the page may get evicted).
    pub fn as_str<'m, S: StorageModule>(
        &self,
        mgr: &'m mut VmManager<S>,
    ) -> Result<&'m str, VmError> {
        let loc = match self.loc {
            Some(loc) if self.len > 0 => loc,
            _ => return Ok(""),
        };
        let bytes = mgr.page_read(loc.page, loc.offset, self.len)?;
        Ok(unsafe { core::str::from_utf8_unchecked(bytes) })
    }

    /// Content equality of two VM strings. Byte-wise; one side is staged in
    /// host memory because both contents go through the same manager.
    pub fn eq_string<S: StorageModule>(
        &self,
        mgr: &mut VmManager<S>,
        other: &VmString,
    ) -> Result<bool, VmError> {
        if self.len != other.len {
            return Ok(false);
        }
        if self.len == 0 {
            return Ok(true);
        }
        let mine = self.as_str(mgr)?.as_bytes().to_vec();
        Ok(mine == other.as_str(mgr)?.as_bytes())
    }

    pub fn eq_str<S: StorageModule>(
        &self,
        mgr: &mut VmManager<S>,
        other: &str,
    ) -> Result<bool, VmError> {
        Ok(self.as_str(mgr)? == other)
    }

    /// Gives the block back. The string is empty and reusable afterwards.
    pub fn destroy<S: StorageModule>(&mut self, mgr: &mut VmManager<S>) -> Result<(), VmError> {
        self.len = 0;
        self.capacity = 0;
        match self.loc.take() {
            Some(loc) => mgr.heap_free(loc),
            None => Ok(()),
        }
    }
}

impl Default for VmString {
    fn default() -> Self {
        Self::new()
    }
}
