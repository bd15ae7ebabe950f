//! # 文件代际层
//!
//! 一个文件在闪存上的一**代**由三部分组成：一个文件头块、一条
//! 分段映射链、若干数据块。打开写入即创建新一代（播种自旧一代，
//! 数据块共享），提交时把目录表项推过CLOSING→CLOSED，再对旧一代
//! 走换代回收阶梯。每一步都以单字节状态写入作结，挂载重放只凭
//! 表项状态决定回滚还是推进。
//!
//! 文件头块体布局：分段链头块号、文件名、提交尺寸。尺寸字段保持
//! 擦除态直到提交，挂载时据此识别未提交的一代。

use alloc::string::String;
use alloc::vec::Vec;

use crate::alloc_blk;
use crate::block::{BlockId, BlockKind, Serial, HEADER_SIZE, RAW_NONE, SEGMENT_SIZE};
use crate::catalog::{Catalog, EntryStatus};
use crate::chain::ItemAddr;
use crate::segmap::SegmentMap;
use crate::store::Store;
use crate::NAME_MAX;

/// 提交尺寸字段的块内偏移
const SIZE_OFFSET: usize = HEADER_SIZE + 8 + NAME_MAX;

/// 文件头块体的闪存布局
#[derive(Clone, Copy)]
#[repr(C)]
struct FileHeaderBody {
    /// 分段映射链的头块
    seg_head: u32,
    name_len: u8,
    _pad: [u8; 3],
    name: [u8; NAME_MAX],
    /// 提交尺寸；擦除态表示这一代尚未提交
    size: u32,
}

/// 文件的一代：头块加上它的分段映射
pub struct Generation {
    serial: Serial,
    header: BlockId,
    segmap: SegmentMap,
}

impl Generation {
    /// 建立新一代。`seed`给出时从旧一代播种分段映射，
    /// 新旧两代共享尚未覆写的数据块。
    pub fn create(
        store: &mut Store,
        catalog: &Catalog,
        serial: Serial,
        name: &str,
        seed: Option<&Generation>,
    ) -> Result<(ItemAddr, Self), vfs::Error> {
        let hint = seed.map(|old| old.header);
        let header = alloc_blk::allocate(store, serial, hint, BlockKind::Header)?;
        let segmap = match seed {
            Some(old) => old.segmap.seed(store, serial)?,
            None => SegmentMap::create(store, serial, Some(header))?,
        };

        let seg_head = segmap.head();
        store.map_mut(header, HEADER_SIZE, |body: &mut FileHeaderBody| {
            body.seg_head = seg_head.raw();
            body.name_len = name.len() as u8;
            body.name[..name.len()].copy_from_slice(name.as_bytes());
        });

        // 表项落下之前崩溃，整棵树是孤儿，由挂载清扫回收
        let addr = catalog.append(store, serial, header, EntryStatus::Open)?;
        Ok((addr, Self { serial, header, segmap }))
    }

    /// 从目录表项指向的头块还原一代。
    ///
    /// 头块体撕裂、分段链头对不上属主时返回`None`，
    /// 调用者按“只有头块”的残代处理。
    pub fn load(store: &mut Store, serial: Serial, header: BlockId) -> Option<Self> {
        let raw = store.map(header, HEADER_SIZE, |body: &FileHeaderBody| body.seg_head);
        let seg_head = BlockId::from_raw(raw)?;
        if seg_head.index() >= store.block_count() {
            return None;
        }

        let head = store.header(seg_head);
        if head.serial() != Some(serial) || head.kind() != Some(BlockKind::SegmentList) {
            log::warn!("segment list head of serial {} unreadable", serial.raw());
            return None;
        }
        Some(Self {
            serial,
            header,
            segmap: SegmentMap::new(seg_head, serial),
        })
    }

    pub fn serial(&self) -> Serial {
        self.serial
    }

    pub fn name(&self, store: &mut Store) -> String {
        store.map(self.header, HEADER_SIZE, |body: &FileHeaderBody| {
            let len = (body.name_len as usize).min(NAME_MAX);
            String::from_utf8_lossy(&body.name[..len]).into_owned()
        })
    }

    /// 提交尺寸；未提交的一代返回`None`
    pub fn size(&self, store: &mut Store) -> Option<u32> {
        let raw = store.map(self.header, HEADER_SIZE, |body: &FileHeaderBody| body.size);
        (raw != RAW_NONE).then_some(raw)
    }

    /// 读提交内容。稀疏段补零，越过提交尺寸截断
    pub fn read_at(&self, store: &mut Store, offset: usize, buf: &mut [u8]) -> usize {
        let size = self.size(store).unwrap_or(0) as usize;
        if offset >= size || buf.is_empty() {
            return 0;
        }
        let end = size.min(offset + buf.len());

        let mut pos = offset;
        while pos < end {
            let seg = (pos / SEGMENT_SIZE) as u32;
            let seg_off = pos % SEGMENT_SIZE;
            let take = (SEGMENT_SIZE - seg_off).min(end - pos);
            let dst = &mut buf[pos - offset..pos - offset + take];
            match self.segmap.get(store, seg) {
                Some(block) => store.read_bytes(block, HEADER_SIZE + seg_off, dst),
                None => dst.fill(0),
            }
            pos += take;
        }
        end - offset
    }

    /// 读一个逻辑段的当前内容，未写过的段得到全零
    pub fn read_segment(&self, store: &mut Store, seg: u32, buf: &mut [u8; SEGMENT_SIZE]) {
        match self.segmap.get(store, seg) {
            Some(block) => store.read_bytes(block, HEADER_SIZE, buf),
            None => buf.fill(0),
        }
    }

    /// 落盘一个逻辑段：新数据块写满即关闭，再切换映射。
    ///
    /// 数据块一旦关闭就不再改动，覆写同一段只会再换一个块。
    pub fn write_segment(
        &self,
        store: &mut Store,
        seg: u32,
        data: &[u8; SEGMENT_SIZE],
    ) -> Result<(), vfs::Error> {
        let block = alloc_blk::allocate(store, self.serial, Some(self.segmap.head()), BlockKind::Data)?;
        store.write_bytes(block, HEADER_SIZE, data);
        alloc_blk::close(store, block);
        self.segmap.update(store, seg, block)
    }

    /// 这一代引用的全部数据块，含已作废的
    fn data_blocks(&self, store: &mut Store) -> Vec<BlockId> {
        let mut blocks: Vec<BlockId> = self
            .segmap
            .current_blocks(store)
            .into_iter()
            .map(|(_, block)| block)
            .collect();
        blocks.extend(
            self.segmap
                .obsolete_blocks(store)
                .into_iter()
                .map(|(_, block)| block),
        );
        blocks
    }

    /// 现行映射的数据块集合，换代时作为保留集
    pub fn current_blocks(&self, store: &mut Store) -> Vec<BlockId> {
        self.segmap
            .current_blocks(store)
            .into_iter()
            .map(|(_, block)| block)
            .collect()
    }

    pub fn tree_blocks(&self, store: &mut Store) -> Vec<BlockId> {
        let mut blocks = self.segmap.nodes(store);
        blocks.push(self.header);
        blocks
    }

    /// 提交这一代：写入尺寸，表项推到CLOSED。
    ///
    /// CLOSING一旦落下，挂载重放只会向前推进，再不回滚。
    pub fn commit(
        &self,
        store: &mut Store,
        catalog: &Catalog,
        addr: ItemAddr,
        size: u32,
    ) -> Result<(), vfs::Error> {
        store.map_mut(self.header, SIZE_OFFSET, |field: &mut u32| *field = size);
        catalog.set_status(store, addr, EntryStatus::Closing);
        self.commit_resume(store, catalog, addr);
        Ok(())
    }

    /// CLOSING之后的推进段，挂载重放直接从这里续跑
    pub fn commit_resume(&self, store: &mut Store, catalog: &Catalog, addr: ItemAddr) {
        for (item, block) in self.segmap.obsolete_blocks(store) {
            alloc_blk::discard(store, block);
            self.segmap.mark_dirty(store, item);
        }
        self.segmap.close_nodes(store);
        alloc_blk::close(store, self.header);
        catalog.set_status(store, addr, EntryStatus::Closed);
    }

    /// 换代回收阶梯：新一代CLOSED之后拆掉旧一代的头块、分段链，
    /// 以及未被新一代共享的数据块。`keep`是幸存一代的现行数据块，
    /// 播种共享出去的块必须活着。
    pub fn supersede(
        &self,
        store: &mut Store,
        catalog: &Catalog,
        addr: ItemAddr,
        keep: Option<&Generation>,
    ) {
        catalog.set_status(store, addr, EntryStatus::DiscardingHdrList);
        let kept = keep.map_or_else(Vec::new, |gen| gen.current_blocks(store));
        for block in self.data_blocks(store) {
            if !kept.contains(&block) {
                alloc_blk::discard(store, block);
            }
        }
        self.segmap.discard_nodes(store);
        self.supersede_resume(store, catalog, addr);
    }

    /// DISCARDING_HDR_LIST之后的推进段
    fn supersede_resume(&self, store: &mut Store, catalog: &Catalog, addr: ItemAddr) {
        catalog.set_status(store, addr, EntryStatus::DiscardingHdr);
        alloc_blk::discard(store, self.header);
        catalog.set_status(store, addr, EntryStatus::Dirty);
    }

    /// 删除阶梯：数据块、分段链、头块依次废弃。
    ///
    /// 中途崩溃后链可能探测不全，漏网的块交给挂载清扫。
    pub fn delete(&self, store: &mut Store, catalog: &Catalog, addr: ItemAddr) {
        catalog.set_status(store, addr, EntryStatus::Discarding);
        self.delete_resume(store, catalog, addr);
    }

    /// DISCARDING之后的推进段
    pub fn delete_resume(&self, store: &mut Store, catalog: &Catalog, addr: ItemAddr) {
        for block in self.data_blocks(store) {
            alloc_blk::discard(store, block);
        }
        self.segmap.discard_nodes(store);
        alloc_blk::discard(store, self.header);
        catalog.set_status(store, addr, EntryStatus::Dirty);
    }

    /// 回滚未提交的一代。`keep`是幸存一代的现行数据块，
    /// 播种共享来的块不能跟着陪葬。
    pub fn rollback(
        &self,
        store: &mut Store,
        catalog: &Catalog,
        addr: ItemAddr,
        keep: Option<&Generation>,
    ) {
        let kept = keep.map_or_else(Vec::new, |gen| gen.current_blocks(store));
        for block in self.data_blocks(store) {
            if !kept.contains(&block) {
                alloc_blk::discard(store, block);
            }
        }
        self.segmap.discard_nodes(store);
        alloc_blk::discard(store, self.header);
        catalog.set_status(store, addr, EntryStatus::Dirty);
    }
}
