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

mod file_storage;
mod mem_storage;

pub use file_storage::FileStorageModule;
pub use mem_storage::MemStorageModule;

use crate::vm_error::VmError;

/// A fixed-length, byte-addressable persistent region.
///
/// The page table treats an implementation as a flat random-access byte
/// array of exactly `page_count * page_size` bytes, pre-zeroed at
/// initialization. It keeps the module for the whole process lifetime so no
/// repeated open/close cost is paid.
pub trait StorageModule {
    /// Reads the region `[offset, offset + dest.len())` into `dest`.
    ///
    /// If this call fails, `dest` may already hold partial data.
    fn read(&mut self, offset: usize, dest: &mut [u8]) -> Result<(), VmError>;

    /// Writes `src` to the region `[offset, offset + src.len())`.
    fn write(&mut self, offset: usize, src: &[u8]) -> Result<(), VmError>;

    /// Pushes buffered writes down to the device. Default: nothing buffered.
    fn flush(&mut self) -> Result<(), VmError> {
        Ok(())
    }

    /// Maximum size in bytes of this storage.
    ///
    /// It is illegal to read or write across this border.
    fn max_size(&self) -> usize;
}

#[cfg(test)]
pub(crate) mod test {
    use super::StorageModule;

    fn gen_number(i: usize) -> u8 {
        (i * 3 + (i % 3) * 7 + (i % 11) * 51) as u8
    }

    pub(super) const STORAGE_TEST_SIZE: usize = 4096;

    /// write in chunks, read back in chunks, expect identical bytes
    pub(super) fn test_storage_round_trip<S: StorageModule>(mut module: S) {
        const CHUNK: usize = STORAGE_TEST_SIZE / 32;

        let mut source = [0u8; STORAGE_TEST_SIZE];
        for i in 0..STORAGE_TEST_SIZE {
            source[i] = gen_number(i);
        }

        let mut chunk = [0u8; CHUNK];
        for i in 0..STORAGE_TEST_SIZE / CHUNK {
            let offset = i * CHUNK;
            chunk.copy_from_slice(&source[offset..offset + CHUNK]);
            module.write(offset, &chunk).unwrap();
        }
        module.flush().unwrap();

        for i in 0..STORAGE_TEST_SIZE / CHUNK {
            let offset = i * CHUNK;
            module.read(offset, &mut chunk).unwrap();
            assert_eq!(&chunk[..], &source[offset..offset + CHUNK]);
        }
    }

    /// a fresh region must read back as zeros
    pub(super) fn test_storage_starts_zeroed<S: StorageModule>(mut module: S) {
        let mut buffer = [0xffu8; STORAGE_TEST_SIZE];
        module.read(0, &mut buffer).unwrap();
        assert!(buffer.iter().all(|b| *b == 0));
    }

    /// writes must only touch the addressed region
    pub(super) fn test_storage_write_is_contained<S: StorageModule>(mut module: S) {
        module.write(0, &[0xaa; 100]).unwrap();
        module.write(10, &[0x55; 20]).unwrap();

        let mut buffer = [0u8; 100];
        module.read(0, &mut buffer).unwrap();
        for (i, byte) in buffer.iter().enumerate() {
            if (10..30).contains(&i) {
                assert_eq!(*byte, 0x55, "inside region, position {}", i);
            } else {
                assert_eq!(*byte, 0xaa, "outside region, position {}", i);
            }
        }
    }
}
