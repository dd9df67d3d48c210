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

//! Container adapters over the virtual memory layer.
//!
//! All three are thin consumers of the heap allocator and the page table:
//! they re-acquire the RAM address through the manager immediately before
//! every access (any operation may have evicted the page in between) and
//! they follow the layer's manual-lifetime model: dropping a container
//! value releases nothing; call `destroy` to give the storage back.

mod vm_array;
mod vm_string;
mod vm_vec;

pub use vm_array::VmArray;
pub use vm_string::VmString;
pub use vm_vec::VmVec;
