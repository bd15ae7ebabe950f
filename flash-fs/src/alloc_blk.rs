//! # 块管理层
//!
//! 分配策略兼顾局部性与磨损均衡：优先落在提示块的擦除组里，
//! 其次选择没有被别的序列号占用的组，最后才接受任意空闲块。
//! 三轮都失败时就地回收——挑出CLOSED块占比低于阈值的擦除组，
//! 把幸存块暂存、整组擦除、再写回原位，阈值逐级放宽。

use crate::block::{BlockId, BlockKind, BlockStatus, Serial};
use crate::scratch;
use crate::store::Store;

/// 回收阈值的递进序列，以擦除组容量的分数表示
const THRESHOLDS: [(usize, usize); 4] = [(1, 16), (1, 8), (1, 4), (3, 4)];

/// 分配一个块并登记给属主，返回时块处于OPEN态、块体为擦除态。
///
/// `hint`用于把同一文件的块聚在同一个擦除组里。
pub fn allocate(
    store: &mut Store,
    serial: Serial,
    hint: Option<BlockId>,
    kind: BlockKind,
) -> Result<BlockId, vfs::Error> {
    loop {
        if let Some(id) = search(store, serial, hint) {
            store.claim(id, serial, kind);
            return Ok(id);
        }

        let mut reclaimed = false;
        for (num, den) in THRESHOLDS {
            let threshold = (store.group_blocks() * num / den).max(1);
            if reclaim(store, threshold)? {
                reclaimed = true;
                break;
            }
        }
        if !reclaimed {
            log::error!("flash exhausted, no reclaimable group");
            return Err(vfs::Error::NoSpace);
        }
    }
}

/// 关闭一个块，此后块体不可再变
pub fn close(store: &mut Store, id: BlockId) {
    store.set_block_status(id, BlockStatus::Closed);
}

/// 废弃一个块。从不当场擦除，物理擦除推迟到组回收
pub fn discard(store: &mut Store, id: BlockId) {
    store.set_block_status(id, BlockStatus::Dirty);
}

fn search(store: &mut Store, serial: Serial, hint: Option<BlockId>) -> Option<BlockId> {
    // (a) 提示块所在的擦除组
    if let Some(hint) = hint {
        let group = store.group_of(hint);
        if group < store.data_groups() {
            if let Some(id) = free_in_group(store, group) {
                return Some(id);
            }
        }
    }

    // (b) 没有被别的序列号占用的擦除组
    for group in 0..store.data_groups() {
        if owned_by_other(store, group, serial) {
            continue;
        }
        if let Some(id) = free_in_group(store, group) {
            return Some(id);
        }
    }

    // (c) 任意空闲块
    for group in 0..store.data_groups() {
        if let Some(id) = free_in_group(store, group) {
            return Some(id);
        }
    }

    None
}

fn free_in_group(store: &mut Store, group: usize) -> Option<BlockId> {
    store.group_range(group).find(|id| store.header(*id).is_free())
}

/// 组内是否存在别的序列号的存活块；DIRTY块不属于任何人
fn owned_by_other(store: &mut Store, group: usize, serial: Serial) -> bool {
    for id in store.group_range(group) {
        let header = store.header(id);
        match header.status() {
            BlockStatus::Free | BlockStatus::Dirty => {}
            _ => {
                if header.serial() != Some(serial) {
                    return true;
                }
            }
        }
    }
    false
}

/// 回收CLOSED块数低于`threshold`的擦除组。
///
/// 含OPEN块或序列号目录存活块的组不参与；
/// 幸存块经暂存区保全，擦除后写回原位。
pub fn reclaim(store: &mut Store, threshold: usize) -> Result<bool, vfs::Error> {
    let mut erased_any = false;

    for group in 0..store.data_groups() {
        let mut closed = 0;
        let mut dirty = 0;
        let mut skip = false;

        for id in store.group_range(group) {
            let header = store.header(id);
            match header.status() {
                BlockStatus::Open => skip = true,
                BlockStatus::Closed | BlockStatus::Discarding => {
                    if header.serial() == Some(Serial::CATALOG) {
                        skip = true;
                    }
                    closed += 1;
                }
                BlockStatus::Dirty => dirty += 1,
                BlockStatus::Free => {}
            }
            if skip {
                break;
            }
        }

        // 没有脏块的组擦了也腾不出空间
        if skip || dirty == 0 || closed >= threshold {
            continue;
        }

        log::debug!("reclaiming group {group}: {closed} closed, {dirty} dirty");

        // 上一组回收注销掉的表项还占着槽位，先腾空暂存区
        scratch::compact(store);
        for id in store.group_range(group) {
            let header = store.header(id);
            match header.status() {
                BlockStatus::Closed | BlockStatus::Discarding => scratch::save(store, id)?,
                _ => {}
            }
        }
        store.erase_group(group);
        // 擦除回读验证，失败说明设备不再接受擦除
        for id in store.group_range(group) {
            if !store.header(id).is_free() {
                log::error!("group {group} failed to erase");
                return Err(vfs::Error::Io);
            }
        }
        scratch::restore_all(store);
        erased_any = true;
    }

    Ok(erased_any)
}
