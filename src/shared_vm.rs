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

use try_lock::TryLock;

use crate::modules::storage::StorageModule;
use crate::vm_error::VmError;
use crate::vm_manager::VmManager;

/// Opt-in mutex at the integration boundary.
///
/// The manager itself is single-threaded by design and takes `&mut self`
/// everywhere. Embeddings that must park it in a shared place (an interrupt
/// driven executive, a `static`) can wrap it here: access is serialized by a
/// try-lock, and contention surfaces as [`VmError::Busy`] instead of
/// blocking, since there is no waiting primitive on the targets this is
/// meant for. This wrapper adds no fairness and no queueing; it is a gate,
/// not a scheduler.
pub struct SharedVm<S: StorageModule> {
    inner: TryLock<VmManager<S>>,
}

impl<S: StorageModule> SharedVm<S> {
    pub fn new(manager: VmManager<S>) -> Self {
        SharedVm {
            inner: TryLock::new(manager),
        }
    }

    /// Runs `f` with exclusive access to the manager.
    pub fn with<R>(&self, f: impl FnOnce(&mut VmManager<S>) -> R) -> Result<R, VmError> {
        let mut guard = match self.inner.try_lock() {
            Some(guard) => guard,
            None => return Err(VmError::Busy),
        };
        Ok(f(&mut guard))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::modules::storage::MemStorageModule;
    use crate::vm_config::VmConfig;
    use crate::vm_ptr::VmPtr;

    fn shared() -> SharedVm<MemStorageModule> {
        let config = VmConfig {
            page_size: 256,
            page_count: 4,
            max_resident_pages: 4,
        };
        let manager = VmManager::new(
            MemStorageModule::new(config.page_size * config.page_count),
            config,
        )
        .unwrap();
        SharedVm::new(manager)
    }

    #[test]
    fn test_with_gives_exclusive_access() {
        let shared = shared();
        let mut ptr: VmPtr<u32> = VmPtr::unbound();

        shared
            .with(|mgr| *ptr.get_mut(mgr).unwrap() = 11)
            .unwrap();
        let value = shared.with(|mgr| *ptr.get(mgr).unwrap()).unwrap();
        assert_eq!(value, 11);
    }

    #[test]
    fn test_reentry_reports_busy() {
        let shared = shared();
        shared
            .with(|_outer| {
                assert_eq!(shared.with(|_inner| ()).err(), Some(VmError::Busy));
            })
            .unwrap();
    }
}
