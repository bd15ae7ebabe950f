//! # 暂存区层
//!
//! 设备最后一个擦除组保留作暂存区：前部是表项区，后部是整块大小的
//! 备份槽。组回收前，幸存块先整块复制进备份槽并登记表项；
//! 擦除完成后再写回原位并注销表项。
//!
//! 恢复顺序构成擦除的崩溃安全性：表项校验和在复制完成后才写入，
//! 因此挂载时遇到校验和不完整的表项，说明原组的擦除从未发生，
//! 原块本身仍然完好，直接注销即可。

use crate::block::{BlockId, BLOCK_SIZE};
use crate::checksum::Tag;
use crate::store::Store;

/// 暂存表项大小（字节）
const ENTRY_SIZE: usize = 12;
/// 每个表项块能容纳的表项数，表项不跨块
const ENTRIES_PER_BLOCK: usize = BLOCK_SIZE / ENTRY_SIZE;

const FREE: u8 = 0xFF;
const COPIED: u8 = 0x7F;
const STRUCK: u8 = 0x00;

/// 暂存表项的闪存布局
#[derive(Debug, Clone, Copy)]
#[repr(C)]
struct ScratchEntry {
    status: u8,
    _pad: [u8; 3],
    /// 备份来源的块号
    block: u32,
    /// 覆盖备份槽全部256字节的校验和
    tag: u32,
}

/// 表项区块数与备份槽容量
fn layout(store: &Store) -> (usize, usize) {
    let group_blocks = store.group_blocks();
    let mut table_blocks = 1;
    loop {
        let capacity = group_blocks - table_blocks;
        if capacity <= table_blocks * ENTRIES_PER_BLOCK {
            return (table_blocks, capacity);
        }
        table_blocks += 1;
    }
}

fn entry_pos(store: &Store, index: usize) -> (BlockId, usize) {
    let base = store.scratch_base();
    let block = BlockId::new(base.raw() + (index / ENTRIES_PER_BLOCK) as u32);
    (block, index % ENTRIES_PER_BLOCK * ENTRY_SIZE)
}

fn slot_block(store: &Store, index: usize) -> BlockId {
    let (table_blocks, _) = layout(store);
    BlockId::new(store.scratch_base().raw() + (table_blocks + index) as u32)
}

fn read_entry(store: &mut Store, index: usize) -> ScratchEntry {
    let (block, offset) = entry_pos(store, index);
    store.map(block, offset, |entry: &ScratchEntry| *entry)
}

fn strike(store: &mut Store, index: usize) {
    let (block, offset) = entry_pos(store, index);
    store.map_mut(block, offset, |status: &mut u8| *status = STRUCK);
}

/// 把一个块整块备份进暂存区。
///
/// 备份槽必须验证为擦除态：非正常复位可能留下表项区与槽内容
/// 不一致的残局，残槽在下次暂存区擦除前不再使用。
pub fn save(store: &mut Store, id: BlockId) -> Result<(), vfs::Error> {
    let (_, capacity) = layout(store);

    let mut retried = false;
    loop {
        for index in 0..capacity {
            if read_entry(store, index).status != FREE {
                continue;
            }
            let slot = slot_block(store, index);
            if !slot_erased(store, slot) {
                log::warn!("scratch slot {index} stale, skipping");
                continue;
            }

            let mut data = [0u8; BLOCK_SIZE];
            store.read_block(id, &mut data);
            store.write_block(slot, &data);

            let tag = Tag::over(&data);
            let (block, offset) = entry_pos(store, index);
            // 先写载荷与校验和，最后一笔写状态字节
            store.map_mut(block, offset + 4, |payload: &mut [u32; 2]| {
                payload[0] = id.raw();
                payload[1] = tag.raw();
            });
            store.map_mut(block, offset, |status: &mut u8| *status = COPIED);
            return Ok(());
        }

        // 表项耗尽：全部已注销时可以擦除整个暂存区后重试
        if retried || !compact(store) {
            log::error!("scratch area exhausted");
            return Err(vfs::Error::NoSpace);
        }
        retried = true;
    }
}

/// 挂载时最先运行：把复制完整的备份写回原位。
///
/// 写回对未擦除的原块也是安全的——内容相同，清位写入等于空操作。
pub fn restore_all(store: &mut Store) {
    let (_, capacity) = layout(store);

    for index in 0..capacity {
        let entry = read_entry(store, index);
        match entry.status {
            FREE => {}
            COPIED => {
                let slot = slot_block(store, index);
                let mut data = [0u8; BLOCK_SIZE];
                store.read_block(slot, &mut data);

                if Tag::from_raw(entry.tag).verify(&data) {
                    if let Some(origin) = BlockId::from_raw(entry.block) {
                        store.write_block(origin, &data);
                    }
                } else {
                    // 复制未完成，原组必然未被擦除
                    log::warn!("incomplete scratch copy for block {}", entry.block);
                }
                strike(store, index);
            }
            STRUCK => {}
            other => {
                log::warn!("torn scratch status {other:#04x}, striking");
                strike(store, index);
            }
        }
    }
}

/// 没有存活表项时擦除暂存区，腾出全部槽位
pub fn compact(store: &mut Store) -> bool {
    let (_, capacity) = layout(store);

    let mut any_used = false;
    for index in 0..capacity {
        match read_entry(store, index).status {
            FREE => {}
            COPIED => return false,
            _ => any_used = true,
        }
    }

    if any_used {
        let group = store.group_of(store.scratch_base());
        store.erase_group(group);
    }
    any_used
}

fn slot_erased(store: &mut Store, slot: BlockId) -> bool {
    let mut data = [0u8; BLOCK_SIZE];
    store.read_block(slot, &mut data);
    data.iter().all(|byte| *byte == 0xFF)
}
