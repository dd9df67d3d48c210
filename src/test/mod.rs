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

//! Whole-system tests that drive the public surface end to end, backed by a
//! real swap file per test.


use crate::modules::storage::FileStorageModule;
use crate::vm_config::VmConfig;
use crate::vm_manager::VmManager;

pub(crate) fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// One manager per test, on its own swap file under /tmp. The file is
/// removed again when the storage module drops.
pub(crate) fn get_test_manager(
    test_name: &str,
    config: VmConfig,
) -> VmManager<FileStorageModule> {
    init_logging();
    let storage = FileStorageModule::create(
        format!("/tmp/{}.swap", test_name),
        config.page_size * config.page_count,
    )
    .unwrap();
    VmManager::new(storage, config).unwrap()
}
