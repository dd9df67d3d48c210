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

use core::marker::PhantomData;
use core::mem::{needs_drop, size_of};
use core::ptr;

use log::debug;

use crate::block_heap::{self, HeapLoc};
use crate::modules::storage::StorageModule;
use crate::vm_error::VmError;
use crate::vm_manager::VmManager;

/// Where a vector's elements live.
enum VecStorage {
    /// one contiguous heap block, grown by move-reallocation
    Flat { loc: Option<HeapLoc>, capacity: usize },

    /// fixed-size chunks, one dedicated page each
    Paged {
        chunks: Vec<usize>,
        chunk_capacity: usize,
    },
}

/// Dynamic array with hybrid growth.
///
/// Starts *flat*: all elements in one small-block heap allocation, doubling
/// through move-reallocation. Once the needed capacity no longer fits a
/// single block, the vector transitions to *paged* mode, with elements spread
/// over dedicated page chunks. The transition is one-directional: a paged
/// vector never becomes flat again, and single-buffer contiguity is gone for
/// good (stated behavior of the design this reproduces, not an accident).
///
/// Element types must not need alignment above 8 and must fit a page.
/// Storage is released by [`VmVec::destroy`], not by `Drop`.
pub struct VmVec<T> {
    storage: VecStorage,
    len: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> VmVec<T> {
    pub fn new() -> Self {
        const { assert!(core::mem::align_of::<T>() <= block_heap::ALIGN) };

        VmVec {
            storage: VecStorage::Flat {
                loc: None,
                capacity: 0,
            },
            len: 0,
            _marker: PhantomData,
        }
    }

    fn elem_size() -> usize {
        size_of::<T>().max(1)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_paged(&self) -> bool {
        matches!(self.storage, VecStorage::Paged { .. })
    }

    pub fn capacity(&self) -> usize {
        match &self.storage {
            VecStorage::Flat { capacity, .. } => *capacity,
            VecStorage::Paged {
                chunks,
                chunk_capacity,
            } => chunks.len() * chunk_capacity,
        }
    }

    /// Page and byte offset of element `index`; the element never straddles
    /// a page boundary in either mode.
    fn slot(&self, index: usize) -> Result<(usize, usize), VmError> {
        let elem = Self::elem_size();
        match &self.storage {
            VecStorage::Flat { loc: Some(loc), .. } => Ok((loc.page, loc.offset + index * elem)),
            VecStorage::Flat { loc: None, .. } => Err(VmError::Unbound),
            VecStorage::Paged {
                chunks,
                chunk_capacity,
            } => {
                let chunk = index / chunk_capacity;
                match chunks.get(chunk) {
                    Some(page) => Ok((*page, (index % chunk_capacity) * elem)),
                    None => Err(VmError::OutOfBounds),
                }
            }
        }
    }

    pub fn get<'m, S: StorageModule>(
        &self,
        mgr: &'m mut VmManager<S>,
        index: usize,
    ) -> Result<&'m T, VmError> {
        if index >= self.len {
            return Err(VmError::OutOfBounds);
        }
        let (page, offset) = self.slot(index)?;
        let bytes = mgr.page_read(page, offset, Self::elem_size())?;
        Ok(unsafe { &*(bytes.as_ptr() as *const T) })
    }

    pub fn get_mut<'m, S: StorageModule>(
        &mut self,
        mgr: &'m mut VmManager<S>,
        index: usize,
    ) -> Result<&'m mut T, VmError> {
        if index >= self.len {
            return Err(VmError::OutOfBounds);
        }
        let (page, offset) = self.slot(index)?;
        let bytes = mgr.page_write(page, offset, Self::elem_size())?;
        Ok(unsafe { &mut *(bytes.as_mut_ptr() as *mut T) })
    }

    /// Replaces element `index`, tearing the old value down first.
    pub fn set<S: StorageModule>(
        &mut self,
        mgr: &mut VmManager<S>,
        index: usize,
        value: T,
    ) -> Result<(), VmError> {
        if needs_drop::<T>() {
            let old = self.get_mut(mgr, index)?;
            unsafe { ptr::drop_in_place(old as *mut T) };
        } else if index >= self.len {
            return Err(VmError::OutOfBounds);
        }
        let (page, offset) = self.slot(index)?;
        write_value(mgr, page, offset, value)
    }

    pub fn push<S: StorageModule>(
        &mut self,
        mgr: &mut VmManager<S>,
        value: T,
    ) -> Result<(), VmError> {
        self.reserve_one(mgr)?;
        let (page, offset) = self.slot(self.len)?;
        write_value(mgr, page, offset, value)?;
        self.len += 1;
        Ok(())
    }

    /// Removes and returns the last element. Emptied trailing chunks go back
    /// to the page table.
    pub fn pop<S: StorageModule>(&mut self, mgr: &mut VmManager<S>) -> Result<Option<T>, VmError> {
        if self.len == 0 {
            return Ok(None);
        }
        let (page, offset) = self.slot(self.len - 1)?;
        let bytes = mgr.page_read(page, offset, Self::elem_size())?;
        let value = unsafe { ptr::read(bytes.as_ptr() as *const T) };
        self.len -= 1;

        if let VecStorage::Paged {
            chunks,
            chunk_capacity,
        } = &mut self.storage
        {
            let needed = (self.len + *chunk_capacity - 1) / *chunk_capacity;
            while chunks.len() > needed {
                if let Some(page) = chunks.pop() {
                    mgr.free_page(page, false)?;
                }
            }
        }
        Ok(Some(value))
    }

    /// Grows or shrinks to exactly `new_len` elements. Growth appends clones
    /// of `value`; shrinking pops, running each removed element's teardown.
    pub fn resize<S: StorageModule>(
        &mut self,
        mgr: &mut VmManager<S>,
        new_len: usize,
        value: T,
    ) -> Result<(), VmError>
    where
        T: Clone,
    {
        while self.len > new_len {
            self.pop(mgr)?;
        }
        while self.len < new_len {
            self.push(mgr, value.clone())?;
        }
        Ok(())
    }

    /// Replaces the whole content with `count` clones of `value`.
    pub fn assign<S: StorageModule>(
        &mut self,
        mgr: &mut VmManager<S>,
        count: usize,
        value: T,
    ) -> Result<(), VmError>
    where
        T: Clone,
    {
        self.clear(mgr)?;
        self.resize(mgr, count, value)
    }

    /// Replaces the whole content with the iterator's elements.
    pub fn assign_from<S: StorageModule>(
        &mut self,
        mgr: &mut VmManager<S>,
        values: impl IntoIterator<Item = T>,
    ) -> Result<(), VmError> {
        self.clear(mgr)?;
        for value in values {
            self.push(mgr, value)?;
        }
        Ok(())
    }

    /// Tears all elements down. Paged chunks are released; a flat block is
    /// kept for reuse.
    pub fn clear<S: StorageModule>(&mut self, mgr: &mut VmManager<S>) -> Result<(), VmError> {
        if needs_drop::<T>() {
            for index in 0..self.len {
                let (page, offset) = self.slot(index)?;
                let bytes = mgr.page_write(page, offset, Self::elem_size())?;
                unsafe { ptr::drop_in_place(bytes.as_mut_ptr() as *mut T) };
            }
        }
        self.len = 0;

        if let VecStorage::Paged { chunks, .. } = &mut self.storage {
            for page in chunks.drain(..) {
                mgr.free_page(page, false)?;
            }
        }
        Ok(())
    }

    /// Clears and releases all storage, leaving a fresh empty vector.
    pub fn destroy<S: StorageModule>(&mut self, mgr: &mut VmManager<S>) -> Result<(), VmError> {
        self.clear(mgr)?;
        if let VecStorage::Flat { loc, .. } = &mut self.storage {
            if let Some(loc) = loc.take() {
                mgr.heap_free(loc)?;
            }
        }
        self.storage = VecStorage::Flat {
            loc: None,
            capacity: 0,
        };
        Ok(())
    }

    /// Makes room for one more element, growing the flat block. Once a block
    /// can no longer hold the doubled capacity, switches to paged chunks.
    fn reserve_one<S: StorageModule>(&mut self, mgr: &mut VmManager<S>) -> Result<(), VmError> {
        let elem = Self::elem_size();

        let flat_capacity = match &self.storage {
            VecStorage::Flat { capacity, .. } => Some(*capacity),
            VecStorage::Paged { .. } => None,
        };
        let capacity = match flat_capacity {
            Some(capacity) => capacity,
            None => return self.ensure_chunk(mgr),
        };
        if self.len < capacity {
            return Ok(());
        }

        let usable = block_heap::usable_capacity(mgr.page_size());
        let new_capacity = (capacity * 2).max(4);
        if elem > usable || new_capacity * elem > usable {
            self.transition_to_paged(mgr)?;
            return self.ensure_chunk(mgr);
        }

        let old = match &mut self.storage {
            VecStorage::Flat { loc, .. } => loc.take(),
            VecStorage::Paged { .. } => unreachable!(),
        };
        let new_loc = match old {
            Some(old_loc) => mgr.heap_realloc(old_loc, new_capacity * elem, self.len * elem)?,
            None => mgr.heap_alloc(new_capacity * elem)?,
        };
        if let VecStorage::Flat { loc, capacity } = &mut self.storage {
            *loc = Some(new_loc);
            *capacity = new_capacity;
        }
        Ok(())
    }

    /// Paged mode: make sure the chunk for index `len` exists.
    fn ensure_chunk<S: StorageModule>(&mut self, mgr: &mut VmManager<S>) -> Result<(), VmError> {
        if let VecStorage::Paged {
            chunks,
            chunk_capacity,
        } = &mut self.storage
        {
            let chunk = self.len / *chunk_capacity;
            while chunks.len() <= chunk {
                chunks.push(mgr.alloc_dedicated_page(true)?);
            }
            Ok(())
        } else {
            debug_assert!(false, "ensure_chunk on a flat vector");
            Err(VmError::InvalidPage)
        }
    }

    /// The one-way flat -> paged transition: moves existing elements into
    /// dedicated page chunks and frees the flat block.
    fn transition_to_paged<S: StorageModule>(
        &mut self,
        mgr: &mut VmManager<S>,
    ) -> Result<(), VmError> {
        let elem = Self::elem_size();
        let chunk_capacity = mgr.page_size() / elem;
        if chunk_capacity == 0 {
            return Err(VmError::AllocTooLarge);
        }

        let old_loc = match &mut self.storage {
            VecStorage::Flat { loc, .. } => loc.take(),
            VecStorage::Paged { .. } => return Ok(()),
        };

        let mut chunks = Vec::new();
        if let Some(loc) = old_loc {
            let mut moved = 0;
            while moved < self.len {
                let page = mgr.alloc_dedicated_page(true)?;
                chunks.push(page);
                let count = chunk_capacity.min(self.len - moved);
                let data = mgr
                    .page_read(loc.page, loc.offset + moved * elem, count * elem)?
                    .to_vec();
                mgr.page_write(page, 0, count * elem)?.copy_from_slice(&data);
                moved += count;
            }
            mgr.heap_free(loc)?;
        }

        debug!(
            "vm_vec transitioned to paged mode: {} elements over {} chunks",
            self.len,
            chunks.len()
        );
        self.storage = VecStorage::Paged {
            chunks,
            chunk_capacity,
        };
        Ok(())
    }
}

impl<T> Default for VmVec<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn write_value<T, S: StorageModule>(
    mgr: &mut VmManager<S>,
    page: usize,
    offset: usize,
    value: T,
) -> Result<(), VmError> {
    let bytes = mgr.page_write(page, offset, size_of::<T>().max(1))?;
    unsafe {
        ptr::copy_nonoverlapping(&value as *const T as *const u8, bytes.as_mut_ptr(), size_of::<T>());
    }
    core::mem::forget(value);
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::modules::storage::MemStorageModule;
    use crate::vm_config::VmConfig;
    use core::cell::RefCell;

    fn manager(page_size: usize, page_count: usize) -> VmManager<MemStorageModule> {
        VmManager::new(
            MemStorageModule::new(page_size * page_count),
            VmConfig {
                page_size,
                page_count,
                max_resident_pages: page_count,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_push_pop_round_trip() {
        let mut mgr = manager(256, 8);
        let mut vec: VmVec<u32> = VmVec::new();

        for i in 0..20u32 {
            vec.push(&mut mgr, i * 7).unwrap();
        }
        assert_eq!(vec.len(), 20);
        for i in 0..20u32 {
            assert_eq!(*vec.get(&mut mgr, i as usize).unwrap(), i * 7);
        }
        for i in (0..20u32).rev() {
            assert_eq!(vec.pop(&mut mgr).unwrap(), Some(i * 7));
        }
        assert_eq!(vec.pop(&mut mgr).unwrap(), None);
        vec.destroy(&mut mgr).unwrap();
    }

    #[test]
    fn test_transition_to_paged_is_one_way() {
        // flat blocks cap out quickly on 64-byte pages
        let mut mgr = manager(64, 8);
        let mut vec: VmVec<u64> = VmVec::new();

        assert!(!vec.is_paged());
        for i in 0..12u64 {
            vec.push(&mut mgr, i).unwrap();
        }
        assert!(vec.is_paged(), "vector never left flat mode");

        for i in 0..12u64 {
            assert_eq!(*vec.get(&mut mgr, i as usize).unwrap(), i);
        }

        // shrinking back below one block's worth must not revert the mode
        while vec.len() > 1 {
            vec.pop(&mut mgr).unwrap();
        }
        assert!(vec.is_paged());
        vec.destroy(&mut mgr).unwrap();
    }

    #[test]
    fn test_paged_elements_resolve_across_chunks() {
        let mut mgr = manager(64, 8);
        let mut vec: VmVec<u64> = VmVec::new();
        for i in 0..17u64 {
            vec.push(&mut mgr, i + 100).unwrap();
        }
        assert!(vec.is_paged());
        // 8 elements per 64-byte chunk: index 8 sits at chunk 1, offset 0
        let (_, offset) = vec.slot(8).unwrap();
        assert_eq!(offset, 0);
        assert_eq!(*vec.get(&mut mgr, 8).unwrap(), 108);
        assert_eq!(*vec.get(&mut mgr, 16).unwrap(), 116);
        vec.destroy(&mut mgr).unwrap();
    }

    #[test]
    fn test_set_and_get_mut() {
        let mut mgr = manager(256, 4);
        let mut vec: VmVec<u32> = VmVec::new();
        vec.push(&mut mgr, 1).unwrap();
        vec.push(&mut mgr, 2).unwrap();

        vec.set(&mut mgr, 0, 41).unwrap();
        *vec.get_mut(&mut mgr, 1).unwrap() = 42;
        assert_eq!(*vec.get(&mut mgr, 0).unwrap(), 41);
        assert_eq!(*vec.get(&mut mgr, 1).unwrap(), 42);
        assert_eq!(vec.set(&mut mgr, 5, 0).err(), Some(VmError::OutOfBounds));
        vec.destroy(&mut mgr).unwrap();
    }

    #[test]
    fn test_clear_runs_element_teardown() {
        thread_local! {
            static DROPS: RefCell<usize> = RefCell::new(0);
        }

        struct Counted(#[allow(unused)] u32);
        impl Drop for Counted {
            fn drop(&mut self) {
                DROPS.with(|d| *d.borrow_mut() += 1);
            }
        }

        let mut mgr = manager(256, 8);
        let mut vec: VmVec<Counted> = VmVec::new();
        for i in 0..5 {
            vec.push(&mut mgr, Counted(i)).unwrap();
        }
        assert_eq!(DROPS.with(|d| *d.borrow()), 0);
        vec.clear(&mut mgr).unwrap();
        assert_eq!(DROPS.with(|d| *d.borrow()), 5);
        assert!(vec.is_empty());
        vec.destroy(&mut mgr).unwrap();
        assert_eq!(DROPS.with(|d| *d.borrow()), 5, "destroy dropped cleared elements again");
    }

    #[test]
    fn test_resize_grows_with_clones() {
        let mut mgr = manager(256, 8);
        let mut vec: VmVec<u32> = VmVec::new();
        vec.push(&mut mgr, 1).unwrap();

        vec.resize(&mut mgr, 5, 9).unwrap();
        assert_eq!(vec.len(), 5);
        assert_eq!(*vec.get(&mut mgr, 0).unwrap(), 1);
        for index in 1..5 {
            assert_eq!(*vec.get(&mut mgr, index).unwrap(), 9);
        }

        // resizing to the current length changes nothing
        vec.resize(&mut mgr, 5, 7).unwrap();
        assert_eq!(*vec.get(&mut mgr, 4).unwrap(), 9);
        vec.destroy(&mut mgr).unwrap();
    }

    #[test]
    fn test_resize_shrinks_with_teardown() {
        thread_local! {
            static DROPS: RefCell<usize> = RefCell::new(0);
        }

        #[derive(Clone)]
        struct Counted;
        impl Drop for Counted {
            fn drop(&mut self) {
                DROPS.with(|d| *d.borrow_mut() += 1);
            }
        }

        let mut mgr = manager(256, 8);
        let mut vec: VmVec<Counted> = VmVec::new();
        for _ in 0..5 {
            vec.push(&mut mgr, Counted).unwrap();
        }
        assert_eq!(DROPS.with(|d| *d.borrow()), 0);

        // three popped elements plus the unused fill value
        vec.resize(&mut mgr, 2, Counted).unwrap();
        assert_eq!(vec.len(), 2);
        assert_eq!(DROPS.with(|d| *d.borrow()), 4);
        vec.destroy(&mut mgr).unwrap();
        assert_eq!(DROPS.with(|d| *d.borrow()), 6);
    }

    #[test]
    fn test_assign_replaces_content() {
        let mut mgr = manager(256, 8);
        let mut vec: VmVec<u32> = VmVec::new();
        for i in 0..7u32 {
            vec.push(&mut mgr, i).unwrap();
        }

        vec.assign(&mut mgr, 3, 0xffff).unwrap();
        assert_eq!(vec.len(), 3);
        for index in 0..3 {
            assert_eq!(*vec.get(&mut mgr, index).unwrap(), 0xffff);
        }

        vec.assign_from(&mut mgr, [10u32, 20, 30, 40]).unwrap();
        assert_eq!(vec.len(), 4);
        assert_eq!(*vec.get(&mut mgr, 0).unwrap(), 10);
        assert_eq!(*vec.get(&mut mgr, 3).unwrap(), 40);
        vec.destroy(&mut mgr).unwrap();
    }

    #[test]
    fn test_pop_releases_empty_chunks() {
        let mut mgr = manager(64, 8);
        let mut vec: VmVec<u64> = VmVec::new();
        for i in 0..17u64 {
            vec.push(&mut mgr, i).unwrap();
        }
        assert!(vec.is_paged());
        let chunks_before = match &vec.storage {
            VecStorage::Paged { chunks, .. } => chunks.len(),
            VecStorage::Flat { .. } => unreachable!(),
        };

        vec.pop(&mut mgr).unwrap();
        let chunks_after = match &vec.storage {
            VecStorage::Paged { chunks, .. } => chunks.len(),
            VecStorage::Flat { .. } => unreachable!(),
        };
        assert_eq!(chunks_after, chunks_before - 1, "empty trailing chunk kept");
        vec.destroy(&mut mgr).unwrap();
    }
}
