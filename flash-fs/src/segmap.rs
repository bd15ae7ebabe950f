//! # 分段映射层
//!
//! 每个文件一张建立在链表引擎上的映射：逻辑段号到物理数据块。
//! 逻辑覆写不做原地修改——追加一条新的CURRENT表项，再把旧表项
//! 标成OBSOLETE，每个槽位只写一次。

use alloc::vec::Vec;

use crate::block::{BlockId, BlockKind, Serial};
use crate::chain::{Chain, ChainItem, ItemAddr};
use crate::checksum::Tag;
use crate::store::Store;

/// 分段表项状态，单调清位编码
pub mod seg_status {
    pub const CURRENT: u8 = 0x7F;
    pub const OBSOLETE: u8 = 0x3F;
    pub const DIRTY: u8 = 0x00;
}

/// 分段表项的闪存布局
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct SegItem {
    status: u8,
    _pad: [u8; 3],
    /// 物理数据块
    block: u32,
    /// 逻辑段号
    segment: u32,
    tag: u32,
}

impl SegItem {
    fn new(segment: u32, block: BlockId) -> Self {
        Self {
            status: seg_status::CURRENT,
            _pad: [0xFF; 3],
            block: block.raw(),
            segment,
            tag: payload_tag(block.raw(), segment).raw(),
        }
    }

    pub fn block(&self) -> Option<BlockId> {
        BlockId::from_raw(self.block)
    }

    pub fn segment(&self) -> u32 {
        self.segment
    }

    pub fn is_current(&self) -> bool {
        self.status == seg_status::CURRENT
    }

    pub fn is_obsolete(&self) -> bool {
        self.status == seg_status::OBSOLETE
    }

    pub fn tag_ok(&self) -> bool {
        Tag::from_raw(self.tag).verify(&payload_bytes(self.block, self.segment))
    }
}

impl ChainItem for SegItem {
    fn status_raw(&self) -> u8 {
        self.status
    }

    /// 换代播种只带走CURRENT表项
    fn keep_on_rebuild(&self) -> bool {
        self.is_current() && self.tag_ok()
    }
}

fn payload_bytes(block: u32, segment: u32) -> [u8; 8] {
    let mut bytes = [0; 8];
    bytes[..4].copy_from_slice(&block.to_le_bytes());
    bytes[4..].copy_from_slice(&segment.to_le_bytes());
    bytes
}

fn payload_tag(block: u32, segment: u32) -> Tag {
    Tag::over(&payload_bytes(block, segment))
}

pub struct SegmentMap {
    chain: Chain<SegItem>,
}

impl SegmentMap {
    pub fn new(head: BlockId, serial: Serial) -> Self {
        Self {
            chain: Chain::new(head, serial, BlockKind::SegmentList),
        }
    }

    pub fn create(
        store: &mut Store,
        serial: Serial,
        hint: Option<BlockId>,
    ) -> Result<Self, vfs::Error> {
        Ok(Self {
            chain: Chain::create(store, serial, BlockKind::SegmentList, hint)?,
        })
    }

    pub fn head(&self) -> BlockId {
        self.chain.head()
    }

    /// 自愈后的全部非空闲表项
    pub fn items(&self, store: &mut Store) -> Vec<(ItemAddr, SegItem)> {
        let mut items = self.chain.items(store);
        for (addr, item) in items.iter_mut() {
            if !item.is_dirty() && !item.tag_ok() {
                log::warn!("checksum mismatch in segment item, self-healing to dirty");
                self.chain.set_item_status(store, *addr, seg_status::DIRTY);
                item.status = seg_status::DIRTY;
            }
        }
        items
    }

    /// 逻辑段对应的物理块；从未写过的段返回`None`，读方补零。
    ///
    /// 取**最后**一条匹配的CURRENT表项：覆写在“追加新项”与
    /// “作废旧项”之间断电时，两条CURRENT并存，后写的胜出。
    pub fn get(&self, store: &mut Store, segment: u32) -> Option<BlockId> {
        self.items(store)
            .into_iter()
            .filter(|(_, item)| item.is_current() && item.segment() == segment)
            .last()
            .and_then(|(_, item)| item.block())
    }

    /// 逻辑覆写：先追加新表项，再作废旧表项
    pub fn update(
        &self,
        store: &mut Store,
        segment: u32,
        block: BlockId,
    ) -> Result<(), vfs::Error> {
        let prior = self
            .items(store)
            .into_iter()
            .filter(|(_, item)| item.is_current() && item.segment() == segment)
            .last();

        self.chain.append(store, SegItem::new(segment, block))?;
        if let Some((addr, _)) = prior {
            self.chain.set_item_status(store, addr, seg_status::OBSOLETE);
        }
        Ok(())
    }

    /// 每个段的现行物理块
    pub fn current_blocks(&self, store: &mut Store) -> Vec<(u32, BlockId)> {
        self.items(store)
            .into_iter()
            .filter(|(_, item)| item.is_current())
            .filter_map(|(_, item)| item.block().map(|block| (item.segment(), block)))
            .collect()
    }

    /// 作废表项与其数据块
    pub fn obsolete_blocks(&self, store: &mut Store) -> Vec<(ItemAddr, BlockId)> {
        self.items(store)
            .into_iter()
            .filter(|(_, item)| item.is_obsolete() && item.tag_ok())
            .filter_map(|(addr, item)| item.block().map(|block| (addr, block)))
            .collect()
    }

    pub fn mark_dirty(&self, store: &mut Store, addr: ItemAddr) {
        self.chain.set_item_status(store, addr, seg_status::DIRTY);
    }

    /// 为新一代播种：把CURRENT表项合并进新序列号名下的新链
    pub fn seed(&self, store: &mut Store, new_serial: Serial) -> Result<SegmentMap, vfs::Error> {
        Ok(Self {
            chain: self.chain.consolidate(store, new_serial, false)?,
        })
    }

    pub fn nodes(&self, store: &mut Store) -> Vec<BlockId> {
        self.chain.nodes(store)
    }

    pub fn close_nodes(&self, store: &mut Store) {
        self.chain.close_nodes(store);
    }

    pub fn discard_nodes(&self, store: &mut Store) {
        self.chain.discard_nodes(store);
    }
}
