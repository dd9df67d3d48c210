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

use core::cmp::Ordering;
use core::fmt;
use core::marker::PhantomData;
use core::mem::{align_of, needs_drop, size_of};
use core::ops::{Add, AddAssign, Sub, SubAssign};
use core::ptr;

use log::{trace, warn};

use crate::block_heap::{HeapLoc, ALIGN};
use crate::modules::storage::StorageModule;
use crate::vm_error::VmError;
use crate::vm_manager::VmManager;

const UNBOUND: i64 = -1;

/// A pointer-like handle into the paged address space: a logical
/// `(page index, byte offset)` pair naming one `T`'s storage.
///
/// A fresh handle is *unbound* and claims a heap block lazily on first
/// dereference (the only implicit allocation in the system). The handle is a
/// non-owning logical reference despite the pointer ergonomics: dropping the
/// value releases nothing, storage lives until [`VmPtr::destroy`] is called.
///
/// Dereferencing takes the manager, re-acquires the RAM address each time
/// (the previous one may have been evicted) and distinguishes read from
/// write access so read-only traversal never causes write-back I/O.
///
/// `T` must fit inside one page (objects never straddle a page boundary) and
/// must not require alignment beyond 8 bytes.
pub struct VmPtr<T> {
    page: i64,
    offset: i64,

    /// Captured at bind time; the arithmetic domain of this handle.
    /// Zero doubles as the unbound marker: arithmetic may walk the page
    /// index below zero transiently, so the page field alone cannot tell
    /// "unbound" from "out of range".
    page_size: u32,

    _marker: PhantomData<fn() -> T>,
}

impl<T> VmPtr<T> {
    /// The public factory: an unbound handle. Bound handles can only be
    /// produced by this module, so callers cannot fabricate arbitrary
    /// `(page, offset)` pairs.
    pub fn unbound() -> Self {
        VmPtr {
            page: UNBOUND,
            offset: 0,
            page_size: 0,
            _marker: PhantomData,
        }
    }

    /// Allocates storage and moves `value` into it.
    ///
    /// If anything fails after the block was claimed, the block is freed
    /// again before the error propagates.
    pub fn alloc_new<S: StorageModule>(mgr: &mut VmManager<S>, value: T) -> Result<Self, VmError> {
        let mut this = Self::unbound();
        this.bind(mgr)?;
        if let Err(err) = this.store(mgr, value) {
            let loc = this.loc();
            this.reset();
            if let Some(loc) = loc {
                let _ = mgr.heap_free(loc);
            }
            return Err(err);
        }
        Ok(this)
    }

    pub(crate) fn from_loc(loc: HeapLoc, page_size: usize) -> Self {
        VmPtr {
            page: loc.page as i64,
            offset: loc.offset as i64,
            page_size: page_size as u32,
            _marker: PhantomData,
        }
    }

    pub fn is_bound(&self) -> bool {
        self.page_size != 0
    }

    /// Bytes the heap reserves for one `T`.
    fn stored_size() -> usize {
        size_of::<T>().max(1)
    }

    fn loc(&self) -> Option<HeapLoc> {
        if self.is_bound() && self.page >= 0 && self.offset >= 0 {
            Some(HeapLoc {
                page: self.page as usize,
                offset: self.offset as usize,
            })
        } else {
            None
        }
    }

    fn reset(&mut self) {
        self.page = UNBOUND;
        self.offset = 0;
        self.page_size = 0;
    }

    /// First-touch binding: claims a heap block sized to `T`. Idempotent.
    fn bind<S: StorageModule>(&mut self, mgr: &mut VmManager<S>) -> Result<(), VmError> {
        const { assert!(align_of::<T>() <= ALIGN, "stored types may not need alignment above 8") };

        if self.is_bound() {
            return Ok(());
        }
        let loc = mgr.heap_alloc(Self::stored_size())?;
        self.page = loc.page as i64;
        self.offset = loc.offset as i64;
        self.page_size = mgr.page_size() as u32;
        trace!("handle bound to ({}, {})", self.page, self.offset);
        Ok(())
    }

    /// Validates that the handle names an in-range location whose object
    /// lies entirely within its page.
    fn checked_loc<S: StorageModule>(&self, mgr: &VmManager<S>) -> Result<HeapLoc, VmError> {
        if !self.is_bound() {
            return Err(VmError::Unbound);
        }
        if self.page < 0 || self.page as usize >= mgr.page_count() {
            return Err(VmError::InvalidPage);
        }
        if self.offset < 0 || self.offset as usize + Self::stored_size() > mgr.page_size() {
            return Err(VmError::OutOfBounds);
        }
        debug_assert_eq!(
            self.offset as usize % align_of::<T>().max(1),
            0,
            "arithmetic produced a misaligned offset"
        );
        Ok(HeapLoc {
            page: self.page as usize,
            offset: self.offset as usize,
        })
    }

    /// Read access: binds lazily, guarantees residency, does not dirty the
    /// owning page.
    pub fn get<'m, S: StorageModule>(&mut self, mgr: &'m mut VmManager<S>) -> Result<&'m T, VmError> {
        self.bind(mgr)?;
        let loc = self.checked_loc(mgr)?;
        let bytes = mgr.page_read(loc.page, loc.offset, Self::stored_size())?;
        Ok(unsafe { &*(bytes.as_ptr() as *const T) })
    }

    /// Write access: like [`VmPtr::get`] but marks the owning page dirty.
    pub fn get_mut<'m, S: StorageModule>(
        &mut self,
        mgr: &'m mut VmManager<S>,
    ) -> Result<&'m mut T, VmError> {
        self.bind(mgr)?;
        let loc = self.checked_loc(mgr)?;
        let bytes = mgr.page_write(loc.page, loc.offset, Self::stored_size())?;
        Ok(unsafe { &mut *(bytes.as_mut_ptr() as *mut T) })
    }

    /// Moves `value` into the handle's storage without dropping whatever
    /// bytes were there before.
    fn store<S: StorageModule>(&mut self, mgr: &mut VmManager<S>, value: T) -> Result<(), VmError> {
        self.bind(mgr)?;
        let loc = self.checked_loc(mgr)?;
        let bytes = mgr.page_write(loc.page, loc.offset, Self::stored_size())?;
        unsafe {
            ptr::copy_nonoverlapping(&value as *const T as *const u8, bytes.as_mut_ptr(), size_of::<T>());
        }
        core::mem::forget(value);
        Ok(())
    }

    /// Overwrites the stored value, running the old value's teardown first.
    pub fn set<S: StorageModule>(&mut self, mgr: &mut VmManager<S>, value: T) -> Result<(), VmError> {
        self.bind(mgr)?;
        if needs_drop::<T>() {
            let old = self.get_mut(mgr)?;
            unsafe { ptr::drop_in_place(old as *mut T) };
        }
        self.store(mgr, value)
    }

    /// Ends the stored object's lifetime and frees its block. No-op on an
    /// unbound handle; never fails for that reason, so calling it twice is
    /// safe.
    ///
    /// Teardown is best-effort: when the object cannot be loaded (store I/O
    /// failure) its drop code is skipped, but the block is still freed;
    /// storage must not leak even when teardown cannot run.
    pub fn destroy<S: StorageModule>(&mut self, mgr: &mut VmManager<S>) -> Result<(), VmError> {
        if !self.is_bound() {
            return Ok(());
        }
        let loc = match self.loc() {
            Some(loc) => loc,
            None => {
                // arithmetic walked this handle outside its allocation;
                // there is no block of its own to tear down or free
                self.reset();
                return Err(VmError::InvalidPage);
            }
        };

        if needs_drop::<T>() {
            match mgr.page_write(loc.page, loc.offset, Self::stored_size()) {
                Ok(bytes) => unsafe { ptr::drop_in_place(bytes.as_mut_ptr() as *mut T) },
                Err(err) => warn!(
                    "skipping teardown at ({}, {}): {}",
                    loc.page, loc.offset, err
                ),
            }
        }

        self.reset();
        mgr.heap_free(loc)
    }

    /// The handle `n` elements further (or, negative `n`, earlier). Signed
    /// floor-division semantics: the offset borrows whole pages in either
    /// direction, so `p.offset_by(-1)` of a page-start handle lands at the
    /// end of the previous page. Fails on an unbound handle.
    pub fn offset_by(&self, n: isize) -> Result<Self, VmError> {
        if !self.is_bound() {
            return Err(VmError::Unbound);
        }
        let elem = Self::stored_size() as i64;
        let page_size = self.page_size as i64;
        let byte = self.offset + n as i64 * elem;
        Ok(VmPtr {
            page: self.page + byte.div_euclid(page_size),
            offset: byte.rem_euclid(page_size),
            page_size: self.page_size,
            _marker: PhantomData,
        })
    }

    /// Indexing shorthand for [`VmPtr::offset_by`].
    pub fn element(&self, n: isize) -> Result<Self, VmError> {
        self.offset_by(n)
    }

    /// Element distance `self - other`, accounting for the page difference.
    /// Only meaningful when both handles address the same logically
    /// contiguous virtual array (caller contract, not enforced here).
    pub fn diff(&self, other: &Self) -> Result<isize, VmError> {
        if !self.is_bound() || !other.is_bound() {
            return Err(VmError::Unbound);
        }
        debug_assert_eq!(self.page_size, other.page_size);
        let page_size = self.page_size as i64;
        let bytes = (self.page - other.page) * page_size + (self.offset - other.offset);
        Ok(bytes.div_euclid(Self::stored_size() as i64) as isize)
    }
}

impl<T> Clone for VmPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for VmPtr<T> {}

impl<T> fmt::Debug for VmPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_bound() {
            write!(f, "VmPtr({}, {})", self.page, self.offset)
        } else {
            write!(f, "VmPtr(unbound)")
        }
    }
}

impl<T> PartialEq for VmPtr<T> {
    fn eq(&self, other: &Self) -> bool {
        self.page == other.page && self.offset == other.offset
    }
}

impl<T> Eq for VmPtr<T> {}

/// Address-space ordering, lexicographic on `(page, offset)`. Not a value
/// ordering of the pointed-to content.
impl<T> Ord for VmPtr<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.page, self.offset).cmp(&(other.page, other.offset))
    }
}

impl<T> PartialOrd for VmPtr<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Operator sugar for bound handles. Arithmetic on an unbound handle is a
/// contract violation and panics; use [`VmPtr::offset_by`] for the checked
/// form.
impl<T> Add<isize> for VmPtr<T> {
    type Output = VmPtr<T>;

    fn add(self, n: isize) -> VmPtr<T> {
        self.offset_by(n).expect("pointer arithmetic on an unbound VmPtr")
    }
}

impl<T> Sub<isize> for VmPtr<T> {
    type Output = VmPtr<T>;

    fn sub(self, n: isize) -> VmPtr<T> {
        self.offset_by(-n).expect("pointer arithmetic on an unbound VmPtr")
    }
}

impl<T> AddAssign<isize> for VmPtr<T> {
    fn add_assign(&mut self, n: isize) {
        *self = *self + n;
    }
}

impl<T> SubAssign<isize> for VmPtr<T> {
    fn sub_assign(&mut self, n: isize) {
        *self = *self - n;
    }
}

impl<T> Sub for VmPtr<T> {
    type Output = isize;

    fn sub(self, other: VmPtr<T>) -> isize {
        self.diff(&other).expect("pointer difference on an unbound VmPtr")
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
    fn test_lazy_bind_is_idempotent() {
        let mut mgr = manager(256, 4, 4);
        let mut ptr: VmPtr<u64> = VmPtr::unbound();
        assert!(!ptr.is_bound());

        *ptr.get_mut(&mut mgr).unwrap() = 99;
        let first = ptr.loc().unwrap();
        assert_eq!(*ptr.get(&mut mgr).unwrap(), 99);
        assert_eq!(ptr.loc().unwrap(), first, "second dereference moved the handle");
    }

    #[test]
    fn test_alloc_new_and_read_back() {
        let mut mgr = manager(256, 4, 4);
        let mut ptr = VmPtr::alloc_new(&mut mgr, 0xdead_beefu32).unwrap();
        assert_eq!(*ptr.get(&mut mgr).unwrap(), 0xdead_beef);
        ptr.destroy(&mut mgr).unwrap();
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let mut mgr = manager(256, 4, 4);
        let mut ptr = VmPtr::alloc_new(&mut mgr, 5u16).unwrap();
        ptr.destroy(&mut mgr).unwrap();
        assert!(!ptr.is_bound());
        ptr.destroy(&mut mgr).unwrap();
        ptr.destroy(&mut mgr).unwrap();
    }

    #[test]
    fn test_destroy_runs_teardown() {
        thread_local! {
            static DROPS: RefCell<usize> = RefCell::new(0);
        }

        struct Counted(#[allow(unused)] u32);
        impl Drop for Counted {
            fn drop(&mut self) {
                DROPS.with(|d| *d.borrow_mut() += 1);
            }
        }

        let mut mgr = manager(256, 4, 4);
        let mut ptr = VmPtr::alloc_new(&mut mgr, Counted(1)).unwrap();
        assert_eq!(DROPS.with(|d| *d.borrow()), 0, "storing ran drop");
        ptr.destroy(&mut mgr).unwrap();
        assert_eq!(DROPS.with(|d| *d.borrow()), 1);
        // idempotent destroy must not drop again
        ptr.destroy(&mut mgr).unwrap();
        assert_eq!(DROPS.with(|d| *d.borrow()), 1);
    }

    #[test]
    fn test_set_drops_old_value() {
        thread_local! {
            static DROPS: RefCell<usize> = RefCell::new(0);
        }

        struct Counted(#[allow(unused)] u32);
        impl Drop for Counted {
            fn drop(&mut self) {
                DROPS.with(|d| *d.borrow_mut() += 1);
            }
        }

        let mut mgr = manager(256, 4, 4);
        let mut ptr = VmPtr::alloc_new(&mut mgr, Counted(1)).unwrap();
        ptr.set(&mut mgr, Counted(2)).unwrap();
        assert_eq!(DROPS.with(|d| *d.borrow()), 1);
        ptr.destroy(&mut mgr).unwrap();
        assert_eq!(DROPS.with(|d| *d.borrow()), 2);
    }

    #[test]
    fn test_arithmetic_algebra() {
        let mut mgr = manager(64, 8, 8);
        let mut ptr: VmPtr<u64> = VmPtr::unbound();
        ptr.get_mut(&mut mgr).unwrap();

        for (m, n) in [(1isize, 2isize), (5, -3), (-2, -2), (9, -9), (0, 7)] {
            let left = ptr.offset_by(m).unwrap().offset_by(n).unwrap();
            let right = ptr.offset_by(m + n).unwrap();
            assert_eq!(left, right, "(p + {}) + {} != p + {}", m, n, m + n);
        }

        for n in [-17isize, -1, 0, 1, 6, 40] {
            let round_trip = (ptr + n) - n;
            assert_eq!(round_trip, ptr, "(p + {}) - {} != p", n, n);
            assert_eq!(ptr.offset_by(n).unwrap().diff(&ptr).unwrap(), n);
        }
    }

    #[test]
    fn test_arithmetic_crosses_pages_with_floor_semantics() {
        // 64-byte pages of u64: 8 elements per page
        let base: VmPtr<u64> = VmPtr::from_loc(HeapLoc { page: 2, offset: 0 }, 64);

        let forward = base.offset_by(8).unwrap();
        assert_eq!((forward.page, forward.offset), (3, 0));

        let back = base.offset_by(-1).unwrap();
        assert_eq!((back.page, back.offset), (1, 56), "negative remainder must borrow a page");

        let mut walking = base;
        walking += 11;
        assert_eq!((walking.page, walking.offset), (3, 24));
        walking -= 11;
        assert_eq!(walking, base);
    }

    #[test]
    fn test_boundary_element_resolves_to_next_page() {
        // sequential elements past one page's capacity: the element at the
        // boundary index lives on the second page at offset 0
        let mut mgr = manager(64, 8, 8);
        let first = mgr.alloc_dedicated_page(true).unwrap();
        let second = mgr.alloc_dedicated_page(true).unwrap();
        assert_eq!(second, first + 1);

        let base: VmPtr<u64> = VmPtr::from_loc(HeapLoc { page: first, offset: 0 }, 64);
        for i in 0..16 {
            let mut elem = base.offset_by(i).unwrap();
            *elem.get_mut(&mut mgr).unwrap() = i as u64 * 3;
        }

        let mut boundary = base.offset_by(8).unwrap();
        assert_eq!(boundary.loc().unwrap(), HeapLoc { page: second, offset: 0 });
        assert_eq!(*boundary.get(&mut mgr).unwrap(), 24);
    }

    #[test]
    fn test_ordering_is_lexicographic() {
        let a: VmPtr<u32> = VmPtr::from_loc(HeapLoc { page: 1, offset: 32 }, 64);
        let b: VmPtr<u32> = VmPtr::from_loc(HeapLoc { page: 2, offset: 0 }, 64);
        assert!(a < b);
        assert!(a == a);
        assert!(b > a);
    }

    #[test]
    fn test_unusable_handle_is_reported() {
        let mut mgr = manager(64, 4, 4);
        let unbound: VmPtr<u32> = VmPtr::unbound();
        assert_eq!(unbound.offset_by(1).err(), Some(VmError::Unbound));
        assert_eq!(unbound.diff(&unbound).err(), Some(VmError::Unbound));

        // out of range after arithmetic: reported at dereference
        let bound: VmPtr<u32> = VmPtr::from_loc(HeapLoc { page: 0, offset: 0 }, 64);
        let mut wild = bound.offset_by(4 * 16 * 2).unwrap();
        assert_eq!(wild.get(&mut mgr).err(), Some(VmError::InvalidPage));

        let mut before = bound.offset_by(-1).unwrap();
        assert!(before.get(&mut mgr).is_err());
    }

    #[test]
    fn test_type_larger_than_page_fails() {
        let mut mgr = manager(64, 4, 4);
        let mut ptr: VmPtr<[u8; 128]> = VmPtr::unbound();
        assert_eq!(ptr.get(&mut mgr).err(), Some(VmError::AllocTooLarge));
        assert!(!ptr.is_bound(), "failed bind left the handle bound");
    }
}
