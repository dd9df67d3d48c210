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

//! A software-managed virtual memory layer for memory-constrained devices.
//!
//! The crate splits a backing store into fixed-size pages and keeps only a
//! bounded number of them buffered in RAM; the rest live in the store and
//! are swapped in on access, with the least recently used evictable page
//! making room. On top of the page table sits a small-block heap allocator
//! and a family of handles and containers:
//!
//! - [`VmPtr`]: a logical `(page, offset)` pointer with lazy binding and
//!   pointer arithmetic
//! - [`VmVec`], [`VmArray`], [`VmString`]: containers whose element
//!   storage lives in virtual memory
//!
//! # Lifetime model
//!
//! Storage is released manually: dropping a handle or container frees
//! nothing, `destroy` does. This mirrors how the layer is used from
//! long-lived embedded firmwares, where the storage region outlives any
//! particular RAM state.
//!
//! # Threading
//!
//! Everything takes `&mut VmManager` and is single-threaded; [`SharedVm`]
//! is the opt-in gate for embeddings that must share a manager.
//!
//! ```
//! use vm_heap::{VmConfig, VmManager, VmPtr};
//! use vm_heap::modules::storage::MemStorageModule;
//!
//! let config = VmConfig::default();
//! let storage = MemStorageModule::new(config.page_size * config.page_count);
//! let mut mgr = VmManager::new(storage, config).unwrap();
//!
//! let mut ptr: VmPtr<u64> = VmPtr::unbound();
//! *ptr.get_mut(&mut mgr).unwrap() = 42; // first access binds the handle
//! assert_eq!(*ptr.get(&mut mgr).unwrap(), 42);
//!
//! ptr.destroy(&mut mgr).unwrap();
//! mgr.shutdown().unwrap();
//! ```

mod block_heap;
mod page_table;
mod shared_vm;
mod vm_config;
mod vm_error;
mod vm_manager;
mod vm_ptr;

pub mod containers;
pub mod modules;

#[cfg(test)]
mod test;

pub use containers::{VmArray, VmString, VmVec};
pub use shared_vm::SharedVm;
pub use vm_config::VmConfig;
pub use vm_error::VmError;
pub use vm_manager::VmManager;
pub use vm_ptr::VmPtr;
