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

use std::{
    fs::{remove_file, File},
    io::{Read, Seek, Write},
    mem::ManuallyDrop,
    path::Path,
};

use log::debug;

use super::StorageModule;
use crate::vm_error::VmError;

/// Backing store on a regular file.
///
/// `create` destroys any stale region at the same path and recreates it
/// pre-zeroed; the handle stays open (read and write) until drop, which also
/// removes the file again. The swap region is private to one process
/// lifetime and is never reopened.
pub struct FileStorageModule {
    /// dropped by hand so the handle is closed before the file is removed
    file: ManuallyDrop<File>,

    /// path of the file, kept for removal on drop
    file_path: String,

    /// cached region size, so no `metadata` call is necessary
    file_size: usize,
}

impl FileStorageModule {
    pub fn create(filepath: String, size: usize) -> Result<Self, VmError> {
        if Path::new(filepath.as_str()).exists() {
            remove_file(filepath.as_str()).map_err(|_| VmError::StorageIo)?;
        }

        let file = File::options()
            .read(true)
            .write(true)
            .truncate(true)
            .create(true)
            .open(filepath.clone())
            .map_err(|_| VmError::StorageIo)?;

        // set_len leaves the whole region zero filled
        file.set_len(size as u64).map_err(|_| VmError::StorageIo)?;

        debug!("created swap region {} ({} bytes)", filepath, size);

        Ok(Self {
            file: ManuallyDrop::new(file),
            file_path: filepath,
            file_size: size,
        })
    }
}

impl StorageModule for FileStorageModule {
    fn read(&mut self, offset: usize, dest: &mut [u8]) -> Result<(), VmError> {
        debug_assert!(
            offset + dest.len() <= self.file_size,
            "illegal access, offset: {}, len: {}, file_size: {}",
            offset,
            dest.len(),
            self.file_size
        );

        self.file
            .seek(std::io::SeekFrom::Start(offset as u64))
            .map_err(|_| VmError::StorageIo)?;
        self.file.read_exact(dest).map_err(|_| VmError::StorageIo)?;

        Ok(())
    }

    fn write(&mut self, offset: usize, src: &[u8]) -> Result<(), VmError> {
        debug_assert!(
            offset + src.len() <= self.file_size,
            "illegal access, offset: {}, len: {}, file_size: {}",
            offset,
            src.len(),
            self.file_size
        );

        self.file
            .seek(std::io::SeekFrom::Start(offset as u64))
            .map_err(|_| VmError::StorageIo)?;
        self.file.write_all(src).map_err(|_| VmError::StorageIo)?;

        Ok(())
    }

    fn flush(&mut self) -> Result<(), VmError> {
        // Write::flush is a no-op for File; sync_data reaches the device
        self.file.sync_data().map_err(|_| VmError::StorageIo)
    }

    fn max_size(&self) -> usize {
        self.file_size
    }
}

impl Drop for FileStorageModule {
    fn drop(&mut self) {
        // drop and close the file before removing it
        // note that after this call, file must never be accessed again
        unsafe {
            ManuallyDrop::drop(&mut self.file);
        }

        if Path::new(self.file_path.as_str()).exists() {
            let _ = remove_file(self.file_path.as_str());
        }
    }
}
