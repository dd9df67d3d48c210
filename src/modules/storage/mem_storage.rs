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

use super::StorageModule;
use crate::vm_error::VmError;

/// Backing store on a plain heap buffer.
///
/// Useful for tests and for embeddings without a filesystem; the "persisted"
/// region simply lives in a second RAM area. Starts zero filled like a
/// freshly created swap region.
pub struct MemStorageModule {
    region: Vec<u8>,
}

impl MemStorageModule {
    pub fn new(size: usize) -> Self {
        Self {
            region: vec![0u8; size],
        }
    }
}

impl StorageModule for MemStorageModule {
    fn read(&mut self, offset: usize, dest: &mut [u8]) -> Result<(), VmError> {
        debug_assert!(
            offset + dest.len() <= self.region.len(),
            "illegal access, offset: {}, len: {}, region: {}",
            offset,
            dest.len(),
            self.region.len()
        );
        if offset + dest.len() > self.region.len() {
            return Err(VmError::StorageIo);
        }

        dest.copy_from_slice(&self.region[offset..offset + dest.len()]);
        Ok(())
    }

    fn write(&mut self, offset: usize, src: &[u8]) -> Result<(), VmError> {
        debug_assert!(
            offset + src.len() <= self.region.len(),
            "illegal access, offset: {}, len: {}, region: {}",
            offset,
            src.len(),
            self.region.len()
        );
        if offset + src.len() > self.region.len() {
            return Err(VmError::StorageIo);
        }

        self.region[offset..offset + src.len()].copy_from_slice(src);
        Ok(())
    }

    fn max_size(&self) -> usize {
        self.region.len()
    }
}
