//! # 序列号目录层
//!
//! 整个文件系统唯一的根链表，把文件的持久序列号映射到当前的头块。
//! 表项状态是一台崩溃可恢复的状态机：每个多步操作的每一步完成，
//! 都以一次单字节状态写入作结，挂载时的重放只看状态值本身，
//! 与该步其余写入完成了多少无关。
//!
//! 头节点在挂载时从块0开始线性探测，凭自举表项自我验证：
//! 序列号0的表项必须指回头节点自己。压实会短暂留下两个合法的
//! 头节点，头节点里的纪元号裁决归属——纪元大者胜，
//! 败者的节点由挂载清扫回收。

use alloc::vec::Vec;

use crate::alloc_blk;
use crate::block::{BlockId, BlockKind, BlockStatus, Serial};
use crate::chain::{self, items_per_node, Chain, ChainItem, ItemAddr};
use crate::checksum::Tag;
use crate::store::Store;

/// 校验和字段在表项内的偏移
const ENTRY_TAG_OFFSET: usize = 12;

/// 目录表项状态，单调清位编码。
///
/// 创建/修改走 FREE→OPEN→CLOSING→CLOSED；
/// 删除走 CLOSED→DISCARDING→DIRTY；
/// 换代清理走 CLOSED→DISCARDING_HDR_LIST→DISCARDING_HDR→DIRTY。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EntryStatus {
    Free = 0xFF,
    Open = 0x7F,
    Closing = 0x3F,
    Closed = 0x1F,
    DiscardingHdrList = 0x0F,
    DiscardingHdr = 0x07,
    Discarding = 0x03,
    Dirty = 0x00,
}

impl EntryStatus {
    pub const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0xFF => Some(Self::Free),
            0x7F => Some(Self::Open),
            0x3F => Some(Self::Closing),
            0x1F => Some(Self::Closed),
            0x0F => Some(Self::DiscardingHdrList),
            0x07 => Some(Self::DiscardingHdr),
            0x03 => Some(Self::Discarding),
            0x00 => Some(Self::Dirty),
            _ => None,
        }
    }
}

/// 目录表项的闪存布局
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct CatalogEntry {
    status: u8,
    _pad: [u8; 3],
    serial: u32,
    /// 当前代的文件头块
    header: u32,
    tag: u32,
}

impl CatalogEntry {
    pub fn new(serial: Serial, header: BlockId, status: EntryStatus) -> Self {
        Self {
            status: status as u8,
            _pad: [0xFF; 3],
            serial: serial.raw(),
            header: header.raw(),
            tag: payload_tag(serial.raw(), header.raw()).raw(),
        }
    }

    /// 校验和字段留在擦除态的表项，此时还不会通过自我验证。
    /// 压实用它先占住自举槽位，补写校验和即是提交。
    fn untagged(serial: Serial, header: BlockId, status: EntryStatus) -> Self {
        Self {
            tag: crate::block::RAW_NONE,
            ..Self::new(serial, header, status)
        }
    }

    pub fn serial(&self) -> Option<Serial> {
        Serial::from_raw(self.serial)
    }

    pub fn header_block(&self) -> Option<BlockId> {
        BlockId::from_raw(self.header)
    }

    /// 撕裂的状态字节归入DIRTY，重放自然跳过
    pub fn status(&self) -> EntryStatus {
        EntryStatus::from_raw(self.status).unwrap_or(EntryStatus::Dirty)
    }

    pub fn tag_ok(&self) -> bool {
        Tag::from_raw(self.tag).verify(&payload_bytes(self.serial, self.header))
    }
}

impl ChainItem for CatalogEntry {
    fn status_raw(&self) -> u8 {
        self.status
    }

    fn keep_on_rebuild(&self) -> bool {
        !self.is_free() && !self.is_dirty()
    }
}

fn payload_bytes(serial: u32, header: u32) -> [u8; 8] {
    let mut bytes = [0; 8];
    bytes[..4].copy_from_slice(&serial.to_le_bytes());
    bytes[4..].copy_from_slice(&header.to_le_bytes());
    bytes
}

fn payload_tag(serial: u32, header: u32) -> Tag {
    Tag::over(&payload_bytes(serial, header))
}

pub struct Catalog {
    chain: Chain<CatalogEntry>,
    /// 头节点的纪元号，每次压实加一
    epoch: u32,
}

impl Catalog {
    /// 格式化时建立根链表并写入自举表项
    pub fn create(store: &mut Store) -> Result<Self, vfs::Error> {
        let chain = Chain::create(store, Serial::CATALOG, BlockKind::Catalog, None)?;
        store.map_mut(chain.head(), chain::PREV_OFFSET, |epoch: &mut u32| *epoch = 0);
        let bootstrap = CatalogEntry::new(Serial::CATALOG, chain.head(), EntryStatus::Closed);
        chain.append(store, bootstrap)?;
        Ok(Self { chain, epoch: 0 })
    }

    /// 从块0开始探测头节点。
    ///
    /// 合法的头节点凭自举表项自我验证；压实中断可能留下两个，
    /// 纪元大者胜——压实把新头的自举校验和写在复制完成之后，
    /// 所以纪元更大的合法头节点必然是完整的。
    pub fn locate(store: &mut Store) -> Option<Self> {
        let mut found: Option<Self> = None;

        let data_blocks = store.data_groups() * store.group_blocks();
        for index in 0..data_blocks {
            let id = BlockId::new(index as u32);
            let header = store.header(id);
            if header.kind() != Some(BlockKind::Catalog)
                || header.status() != BlockStatus::Open
                || header.serial() != Some(Serial::CATALOG)
            {
                continue;
            }

            let chain = Chain::<CatalogEntry>::new(id, Serial::CATALOG, BlockKind::Catalog);
            let bootstrap = chain.read_item(
                store,
                ItemAddr {
                    block: id,
                    slot: 0,
                },
            );
            if bootstrap.serial() != Some(Serial::CATALOG)
                || bootstrap.header_block() != Some(id)
                || !bootstrap.tag_ok()
            {
                continue;
            }

            let epoch = store.map(id, chain::PREV_OFFSET, |epoch: &u32| *epoch);
            match &found {
                Some(older) if epoch <= older.epoch => {
                    log::info!("superseded catalog head at block {index}, epoch {epoch}");
                }
                _ => found = Some(Self { chain, epoch }),
            }
        }
        found
    }

    pub fn nodes(&self, store: &mut Store) -> Vec<BlockId> {
        self.chain.nodes(store)
    }

    /// 全部非空闲表项，遍历序。
    ///
    /// 校验和不合法的表项当场降级为DIRTY——对撕裂写入的自愈，
    /// 这个失败从不上抛给调用者。
    pub fn entries(&self, store: &mut Store) -> Vec<(ItemAddr, CatalogEntry)> {
        let mut entries = self.chain.items(store);
        for (addr, entry) in entries.iter_mut() {
            if entry.status() != EntryStatus::Dirty && !entry.tag_ok() {
                log::warn!("checksum mismatch in catalog entry, self-healing to dirty");
                self.chain
                    .set_item_status(store, *addr, EntryStatus::Dirty as u8);
                entry.status = EntryStatus::Dirty as u8;
            }
        }
        entries
    }

    pub fn append(
        &self,
        store: &mut Store,
        serial: Serial,
        header: BlockId,
        status: EntryStatus,
    ) -> Result<ItemAddr, vfs::Error> {
        self.chain
            .append(store, CatalogEntry::new(serial, header, status))
    }

    /// 整个引擎的崩溃安全原语：恰好一次单字节写入
    pub fn set_status(&self, store: &mut Store, addr: ItemAddr, status: EntryStatus) {
        self.chain.set_item_status(store, addr, status as u8);
    }

    /// 下一个未用过的序列号
    pub fn next_serial(&self, store: &mut Store) -> Serial {
        let top = self
            .entries(store)
            .into_iter()
            .filter(|(_, entry)| entry.tag_ok())
            .filter_map(|(_, entry)| entry.serial())
            .max()
            .unwrap_or(Serial::CATALOG);
        top.next()
    }

    /// 脏表项占多数时重建根链表。
    ///
    /// 自举表项必须指向新头节点，不能照抄，所以不走通用重建。
    /// 提交点是新自举表项的校验和：在那之前崩溃，新头通不过
    /// 自我验证，旧链仍是权威；在那之后，纪元裁决偏向新链，
    /// 两种残局的败方节点都由挂载清扫回收。
    pub fn compact_if_needed(&mut self, store: &mut Store) -> Result<(), vfs::Error> {
        let entries = self.entries(store);
        let dirty = entries
            .iter()
            .filter(|(_, entry)| entry.status() == EntryStatus::Dirty)
            .count();
        let live = entries.len() - dirty;
        if dirty < items_per_node::<CatalogEntry>() || dirty <= live {
            return Ok(());
        }

        log::debug!("compacting catalog: {live} live, {dirty} dirty entries");

        let rebuilt = Chain::create(
            store,
            Serial::CATALOG,
            BlockKind::Catalog,
            Some(self.chain.head()),
        )?;
        let epoch = self.epoch.wrapping_add(1);
        store.map_mut(rebuilt.head(), chain::PREV_OFFSET, |slot: &mut u32| {
            *slot = epoch;
        });

        // 自举表项先占住0号槽位，校验和压到复制完成之后
        let bootstrap = CatalogEntry::untagged(Serial::CATALOG, rebuilt.head(), EntryStatus::Closed);
        rebuilt.append(store, bootstrap)?;
        for (_, entry) in entries {
            if entry.keep_on_rebuild() && entry.serial() != Some(Serial::CATALOG) {
                rebuilt.append(store, entry)?;
            }
        }

        // 提交点：新头从这一笔写入起才通过自我验证
        let tag = payload_tag(Serial::CATALOG.raw(), rebuilt.head().raw());
        store.map_mut(
            rebuilt.head(),
            chain::ITEMS_OFFSET + ENTRY_TAG_OFFSET,
            |slot: &mut u32| *slot = tag.raw(),
        );

        for node in self.chain.nodes(store) {
            alloc_blk::discard(store, node);
        }
        self.chain = rebuilt;
        self.epoch = epoch;
        Ok(())
    }
}
