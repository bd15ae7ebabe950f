//! # 存储层
//!
//! 按块缓存的设备访问。与通常的写回缓存不同，这里所有修改都**直写**
//! 设备：崩溃恢复依赖“设备按程序顺序看到每一次写入”这一前提，
//! 缓存只为读路径省去重复的设备访问。
//!
//! 挂载实例各自持有一个[`Store`]，不存在进程级的全局缓存。

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::mem;

use flash_dev::{FlashDevice, FlashGeometry};

use crate::block::{BlockHeader, BlockId, BlockKind, BlockStatus, Serial, BLOCK_SIZE};

/// 块缓存个数的上限
const CAPACITY: usize = 16;

#[derive(Clone)]
#[repr(align(4))]
struct BlockBuf([u8; BLOCK_SIZE]);

pub struct Store {
    /// 底层闪存驱动的引用
    dev: Arc<dyn FlashDevice>,
    geo: FlashGeometry,
    queue: Vec<(BlockId, BlockBuf)>,
}

impl Store {
    pub fn new(dev: &Arc<dyn FlashDevice>) -> Result<Self, vfs::Error> {
        let geo = dev.geometry();
        if geo.block_size != BLOCK_SIZE
            || geo.group_size % geo.block_size != 0
            || geo.block_count % geo.group_blocks() != 0
            || geo.group_count() < 2
        {
            log::error!("unusable flash geometry: {geo:?}");
            return Err(vfs::Error::InvalidInput);
        }

        Ok(Self {
            dev: dev.clone(),
            geo,
            queue: Vec::new(),
        })
    }

    pub fn geometry(&self) -> &FlashGeometry {
        &self.geo
    }

    pub fn block_count(&self) -> usize {
        self.geo.block_count
    }

    /// 每个擦除组包含的块数
    pub fn group_blocks(&self) -> usize {
        self.geo.group_blocks()
    }

    /// 数据擦除组个数；最后一组保留给暂存区
    pub fn data_groups(&self) -> usize {
        self.geo.group_count() - 1
    }

    /// 暂存区的起始块
    pub fn scratch_base(&self) -> BlockId {
        BlockId::new((self.data_groups() * self.group_blocks()) as u32)
    }

    /// 块所在的擦除组
    pub fn group_of(&self, id: BlockId) -> usize {
        id.index() / self.group_blocks()
    }

    /// 擦除组内的全部块号
    pub fn group_range(&self, group: usize) -> impl Iterator<Item = BlockId> {
        let start = group * self.group_blocks();
        (start..start + self.group_blocks()).map(|i| BlockId::new(i as u32))
    }
}

/* 字节与类型化访问 */

impl Store {
    pub fn map<T: Sized, V>(&mut self, id: BlockId, offset: usize, f: impl FnOnce(&T) -> V) -> V {
        let index = self.fetch(id);
        let buf = &self.queue[index].1;
        f(get(&buf.0, offset))
    }

    /// 修改之后立刻把被覆盖的字节段直写设备
    pub fn map_mut<T: Sized, V>(
        &mut self,
        id: BlockId,
        offset: usize,
        f: impl FnOnce(&mut T) -> V,
    ) -> V {
        let index = self.fetch(id);
        let buf = &mut self.queue[index].1;
        let value = f(get_mut(&mut buf.0, offset));

        let span = &buf.0[offset..offset + mem::size_of::<T>()];
        self.dev.write_at(id.index() * BLOCK_SIZE + offset, span);
        value
    }

    pub fn read_bytes(&mut self, id: BlockId, offset: usize, buf: &mut [u8]) {
        assert!(offset + buf.len() <= BLOCK_SIZE);
        let index = self.fetch(id);
        buf.copy_from_slice(&self.queue[index].1 .0[offset..offset + buf.len()]);
    }

    pub fn write_bytes(&mut self, id: BlockId, offset: usize, bytes: &[u8]) {
        assert!(offset + bytes.len() <= BLOCK_SIZE);
        let index = self.fetch(id);
        self.queue[index].1 .0[offset..offset + bytes.len()].copy_from_slice(bytes);
        self.dev.write_at(id.index() * BLOCK_SIZE + offset, bytes);
    }

    pub fn read_block(&mut self, id: BlockId, buf: &mut [u8; BLOCK_SIZE]) {
        self.read_bytes(id, 0, buf);
    }

    pub fn write_block(&mut self, id: BlockId, bytes: &[u8; BLOCK_SIZE]) {
        self.write_bytes(id, 0, bytes);
    }
}

/* 块头访问 */

impl Store {
    pub fn header(&mut self, id: BlockId) -> BlockHeader {
        self.map(id, 0, |header: &BlockHeader| *header)
    }

    /// 把一个FREE块登记给属主，块体此时仍是擦除态
    pub fn claim(&mut self, id: BlockId, serial: Serial, kind: BlockKind) {
        self.map_mut(id, 0, |header: &mut BlockHeader| {
            header.serial = serial.raw();
            header.kind = kind as u8;
            header.status = BlockStatus::Open as u8;
        });
    }

    /// 状态迁移：恰好一次单字节写入
    pub fn set_block_status(&mut self, id: BlockId, status: BlockStatus) {
        self.map_mut(id, BlockHeader::STATUS_OFFSET, |byte: &mut u8| {
            *byte = status as u8;
        });
    }

    /// 物理擦除一个擦除组，组内块回到FREE
    pub fn erase_group(&mut self, group: usize) {
        let start = group * self.group_blocks();
        let end = start + self.group_blocks();
        self.queue
            .retain(|(id, _)| id.index() < start || id.index() >= end);
        self.dev.erase_group(start * BLOCK_SIZE);
    }
}

impl Store {
    // 块缓存调度策略：踢走最久未载入的块
    fn fetch(&mut self, id: BlockId) -> usize {
        if let Some(index) = self.queue.iter().position(|(cached, _)| *cached == id) {
            return index;
        }

        // 直写缓存没有脏块，直接丢弃即可
        if self.queue.len() == CAPACITY {
            self.queue.remove(0);
        }

        let mut buf = BlockBuf([0; BLOCK_SIZE]);
        self.dev.read_at(id.index() * BLOCK_SIZE, &mut buf.0);
        self.queue.push((id, buf));
        self.queue.len() - 1
    }
}

fn get<T: Sized>(data: &[u8; BLOCK_SIZE], offset: usize) -> &T {
    assert!(mem::size_of::<T>() + offset <= BLOCK_SIZE);
    let addr = &data[offset];
    unsafe { mem::transmute(addr) }
}

fn get_mut<T: Sized>(data: &mut [u8; BLOCK_SIZE], offset: usize) -> &mut T {
    assert!(mem::size_of::<T>() + offset <= BLOCK_SIZE);
    let addr = &mut data[offset];
    unsafe { mem::transmute(addr) }
}
