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

use log::warn;

use crate::block_heap::ALIGN;
use crate::modules::storage::StorageModule;
use crate::vm_error::VmError;
use crate::vm_manager::VmManager;

/// Fixed-size array on one dedicated page.
///
/// All `N` elements live on a single page of their own, so `N *
/// size_of::<T>()` must fit the configured page size. The page is evictable:
/// between two accesses the content may live only in the backing store, and
/// [`VmArray::unload`] forces that proactively to give the RAM buffer back.
///
/// Storage is released by [`VmArray::destroy`]; `Drop` releases nothing.
pub struct VmArray<T, const N: usize> {
    page: Option<usize>,
    _marker: PhantomData<fn() -> T>,
}

impl<T, const N: usize> VmArray<T, N> {
    fn elem_size() -> usize {
        size_of::<T>().max(1)
    }

    /// Allocates the page and constructs every element with `f(index)`.
    pub fn new_with<S: StorageModule>(
        mgr: &mut VmManager<S>,
        mut f: impl FnMut(usize) -> T,
    ) -> Result<Self, VmError> {
        const { assert!(core::mem::align_of::<T>() <= ALIGN) };

        if N * Self::elem_size() > mgr.page_size() {
            return Err(VmError::AllocTooLarge);
        }

        let page = mgr.alloc_dedicated_page(true)?;
        for index in 0..N {
            let value = f(index);
            let result = (|| {
                let bytes = mgr.page_write(page, index * Self::elem_size(), Self::elem_size())?;
                unsafe {
                    ptr::copy_nonoverlapping(
                        &value as *const T as *const u8,
                        bytes.as_mut_ptr(),
                        size_of::<T>(),
                    );
                }
                core::mem::forget(value);
                Ok(())
            })();
            if let Err(err) = result {
                // tear down what was constructed so far, then give the page back
                let mut partial = VmArray::<T, N> {
                    page: Some(page),
                    _marker: PhantomData,
                };
                partial.drop_elements(mgr, index);
                let _ = mgr.free_page(page, false);
                return Err(err);
            }
        }

        Ok(VmArray {
            page: Some(page),
            _marker: PhantomData,
        })
    }

    /// Allocates the page with all elements defaulted.
    pub fn new<S: StorageModule>(mgr: &mut VmManager<S>) -> Result<Self, VmError>
    where
        T: Default,
    {
        Self::new_with(mgr, |_| T::default())
    }

    pub const fn len(&self) -> usize {
        N
    }

    pub const fn is_empty(&self) -> bool {
        N == 0
    }

    fn page_index(&self) -> Result<usize, VmError> {
        self.page.ok_or(VmError::Unbound)
    }

    fn check_index(index: usize) -> Result<(), VmError> {
        if index >= N {
            return Err(VmError::OutOfBounds);
        }
        Ok(())
    }

    pub fn get<'m, S: StorageModule>(
        &self,
        mgr: &'m mut VmManager<S>,
        index: usize,
    ) -> Result<&'m T, VmError> {
        Self::check_index(index)?;
        let page = self.page_index()?;
        let bytes = mgr.page_read(page, index * Self::elem_size(), Self::elem_size())?;
        Ok(unsafe { &*(bytes.as_ptr() as *const T) })
    }

    pub fn get_mut<'m, S: StorageModule>(
        &mut self,
        mgr: &'m mut VmManager<S>,
        index: usize,
    ) -> Result<&'m mut T, VmError> {
        Self::check_index(index)?;
        let page = self.page_index()?;
        let bytes = mgr.page_write(page, index * Self::elem_size(), Self::elem_size())?;
        Ok(unsafe { &mut *(bytes.as_mut_ptr() as *mut T) })
    }

    /// Replaces element `index`, tearing the old value down first.
    pub fn set<S: StorageModule>(
        &mut self,
        mgr: &mut VmManager<S>,
        index: usize,
        value: T,
    ) -> Result<(), VmError> {
        Self::check_index(index)?;
        let page = self.page_index()?;
        let bytes = mgr.page_write(page, index * Self::elem_size(), Self::elem_size())?;
        unsafe {
            if needs_drop::<T>() {
                ptr::drop_in_place(bytes.as_mut_ptr() as *mut T);
            }
            ptr::copy_nonoverlapping(&value as *const T as *const u8, bytes.as_mut_ptr(), size_of::<T>());
        }
        core::mem::forget(value);
        Ok(())
    }

    pub fn fill<S: StorageModule>(&mut self, mgr: &mut VmManager<S>, value: T) -> Result<(), VmError>
    where
        T: Clone,
    {
        for index in 0..N {
            self.set(mgr, index, value.clone())?;
        }
        Ok(())
    }

    /// Persists the page if dirty and releases its RAM buffer. The next
    /// access swaps it back in transparently.
    pub fn unload<S: StorageModule>(&mut self, mgr: &mut VmManager<S>) -> Result<(), VmError> {
        let page = self.page_index()?;
        mgr.unload_page(page)
    }

    /// Tears every element down (best-effort when the page cannot be
    /// loaded) and gives the page back. Safe to call twice.
    pub fn destroy<S: StorageModule>(&mut self, mgr: &mut VmManager<S>) -> Result<(), VmError> {
        let page = match self.page.take() {
            Some(page) => page,
            None => return Ok(()),
        };
        let mut this = VmArray::<T, N> {
            page: Some(page),
            _marker: PhantomData,
        };
        this.drop_elements(mgr, N);
        mgr.free_page(page, false)
    }

    /// Drops the first `count` elements in place.
    fn drop_elements<S: StorageModule>(&mut self, mgr: &mut VmManager<S>, count: usize) {
        if !needs_drop::<T>() {
            return;
        }
        for index in 0..count {
            let page = match self.page_index() {
                Ok(page) => page,
                Err(_) => return,
            };
            match mgr.page_write(page, index * Self::elem_size(), Self::elem_size()) {
                Ok(bytes) => unsafe { ptr::drop_in_place(bytes.as_mut_ptr() as *mut T) },
                Err(err) => {
                    warn!("skipping teardown of element {}: {}", index, err);
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::modules::storage::MemStorageModule;
    use crate::vm_config::VmConfig;
    use core::cell::RefCell;

    fn manager(page_size: usize, page_count: usize, max_resident: usize) -> VmManager<MemStorageModule> {
        VmManager::new(
            MemStorageModule::new(page_size * page_count),
            VmConfig {
                page_size,
                page_count,
                max_resident_pages: max_resident,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_zeroed_start_and_fill() {
        let mut mgr = manager(256, 4, 4);
        let mut array: VmArray<u32, 16> = VmArray::new(&mut mgr).unwrap();

        for index in 0..16 {
            assert_eq!(*array.get(&mut mgr, index).unwrap(), 0);
        }
        array.fill(&mut mgr, 0x0bad_f00d).unwrap();
        for index in 0..16 {
            assert_eq!(*array.get(&mut mgr, index).unwrap(), 0x0bad_f00d);
        }
        array.destroy(&mut mgr).unwrap();
    }

    #[test]
    fn test_content_survives_unload() {
        let mut mgr = manager(256, 4, 4);
        let mut array: VmArray<u16, 8> = VmArray::new(&mut mgr).unwrap();
        for index in 0..8 {
            array.set(&mut mgr, index, index as u16 * 11).unwrap();
        }

        let resident_before = mgr.resident_pages();
        array.unload(&mut mgr).unwrap();
        assert_eq!(mgr.resident_pages(), resident_before - 1);

        for index in 0..8 {
            assert_eq!(*array.get(&mut mgr, index).unwrap(), index as u16 * 11);
        }
        array.destroy(&mut mgr).unwrap();
    }

    #[test]
    fn test_does_not_fit_page() {
        let mut mgr = manager(64, 4, 4);
        assert_eq!(
            VmArray::<u64, 9>::new(&mut mgr).err(),
            Some(VmError::AllocTooLarge)
        );
    }

    #[test]
    fn test_index_out_of_range() {
        let mut mgr = manager(256, 4, 4);
        let mut array: VmArray<u8, 4> = VmArray::new(&mut mgr).unwrap();
        assert_eq!(array.get(&mut mgr, 4).err(), Some(VmError::OutOfBounds));
        array.destroy(&mut mgr).unwrap();
        assert_eq!(array.get(&mut mgr, 0).err(), Some(VmError::Unbound));
    }

    #[test]
    fn test_destroy_tears_elements_down() {
        thread_local! {
            static DROPS: RefCell<usize> = RefCell::new(0);
        }

        #[derive(Clone, Default)]
        struct Counted;
        impl Drop for Counted {
            fn drop(&mut self) {
                DROPS.with(|d| *d.borrow_mut() += 1);
            }
        }

        let mut mgr = manager(256, 4, 4);
        let mut array: VmArray<Counted, 6> = VmArray::new(&mut mgr).unwrap();
        assert_eq!(DROPS.with(|d| *d.borrow()), 0);
        array.destroy(&mut mgr).unwrap();
        assert_eq!(DROPS.with(|d| *d.borrow()), 6);
        // second destroy is a no-op
        array.destroy(&mut mgr).unwrap();
        assert_eq!(DROPS.with(|d| *d.borrow()), 6);
    }

    #[test]
    fn test_construct_with_index() {
        let mut mgr = manager(256, 4, 4);
        let array: VmArray<u32, 10> = VmArray::new_with(&mut mgr, |i| i as u32 * i as u32).unwrap();
        for index in 0..10 {
            assert_eq!(*array.get(&mut mgr, index).unwrap(), (index * index) as u32);
        }
    }
}
