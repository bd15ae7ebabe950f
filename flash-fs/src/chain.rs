//! # 链表引擎层
//!
//! 同类型块串成的闪存链表，每个节点的块体开头是{prev, next}双向
//! 链接，其后是一个**从前往后填充**的定长表项数组：遇到空闲槽即是
//! 链尾，空闲槽之后不会再有有效表项。
//!
//! 每次跨节点移动都校验反向链接，不一致的节点按链尾处理；
//! `next`指回自身的环也会被拒绝。追加总是从头扫描，不缓存尾指针。

use alloc::vec::Vec;
use core::marker::PhantomData;
use core::mem;

use crate::alloc_blk;
use crate::block::{BlockId, BlockKind, BlockStatus, Serial, BLOCK_SIZE, HEADER_SIZE};
use crate::store::Store;

/// 块体开头的链接区大小
const LINKS_SIZE: usize = 8;
/// prev链接的块内偏移。头节点没有前驱，这个字段不参与链接校验，
/// 调用者可以另作他用
pub const PREV_OFFSET: usize = HEADER_SIZE;
/// next链接的块内偏移
const NEXT_OFFSET: usize = HEADER_SIZE + 4;
/// 表项数组的块内偏移
pub const ITEMS_OFFSET: usize = HEADER_SIZE + LINKS_SIZE;

/// 每个节点容纳的表项数
pub const fn items_per_node<T: ChainItem>() -> usize {
    (BLOCK_SIZE - ITEMS_OFFSET) / mem::size_of::<T>()
}

/// 链表表项。状态字节必须位于表项起始处，采用单调清位编码
pub trait ChainItem: Copy + Sized {
    fn status_raw(&self) -> u8;

    fn is_free(&self) -> bool {
        self.status_raw() == 0xFF
    }

    fn is_dirty(&self) -> bool {
        self.status_raw() == 0x00
    }

    /// 重建链时是否保留
    fn keep_on_rebuild(&self) -> bool;
}

/// 表项在闪存上的地址
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemAddr {
    pub block: BlockId,
    pub slot: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct Chain<T> {
    head: BlockId,
    serial: Serial,
    kind: BlockKind,
    _marker: PhantomData<T>,
}

/// 遍历游标；`hops`防御头块扫描不到的长环
#[derive(Debug, Clone, Copy)]
pub struct Cursor {
    block: BlockId,
    slot: usize,
    hops: usize,
}

impl<T: ChainItem> Chain<T> {
    pub fn new(head: BlockId, serial: Serial, kind: BlockKind) -> Self {
        Self {
            head,
            serial,
            kind,
            _marker: PhantomData,
        }
    }

    /// 分配头节点建立空链
    pub fn create(
        store: &mut Store,
        serial: Serial,
        kind: BlockKind,
        hint: Option<BlockId>,
    ) -> Result<Self, vfs::Error> {
        let head = alloc_blk::allocate(store, serial, hint, kind)?;
        Ok(Self::new(head, serial, kind))
    }

    pub fn head(&self) -> BlockId {
        self.head
    }

    pub fn cursor(&self) -> Cursor {
        Cursor {
            block: self.head,
            slot: 0,
            hops: 0,
        }
    }

    /// 取下一个表项；空闲槽或链接缺失即为链尾
    pub fn step(&self, store: &mut Store, cursor: &mut Cursor) -> Option<(ItemAddr, T)> {
        loop {
            if cursor.slot < items_per_node::<T>() {
                let addr = ItemAddr {
                    block: cursor.block,
                    slot: cursor.slot,
                };
                let item = self.read_item(store, addr);
                if item.is_free() {
                    return None;
                }
                cursor.slot += 1;
                return Some((addr, item));
            }

            let next = self.follow(store, cursor.block)?;
            cursor.hops += 1;
            if cursor.hops > store.block_count() {
                log::error!("chain of serial {} exceeds device size", self.serial.raw());
                return None;
            }
            cursor.block = next;
            cursor.slot = 0;
        }
    }

    /// 遍历序快照
    pub fn items(&self, store: &mut Store) -> Vec<(ItemAddr, T)> {
        let mut items = Vec::new();
        let mut cursor = self.cursor();
        while let Some(entry) = self.step(store, &mut cursor) {
            items.push(entry);
        }
        items
    }

    /// 追加到第一个空闲槽；尾节点已满时分配新节点并接上。
    ///
    /// 链接次序固定：先写旧尾的`next`，再写新节点的`prev`。
    pub fn append(&self, store: &mut Store, item: T) -> Result<ItemAddr, vfs::Error> {
        let mut node = self.head;
        let mut hops = 0;

        loop {
            for slot in 0..items_per_node::<T>() {
                let addr = ItemAddr { block: node, slot };
                if self.read_item(store, addr).is_free() {
                    self.write_item(store, addr, item);
                    return Ok(addr);
                }
            }

            match next_link(store, node) {
                Some(next) => {
                    if !self.link_consistent(store, node, next) {
                        return Err(vfs::Error::Io);
                    }
                    hops += 1;
                    if hops > store.block_count() {
                        return Err(vfs::Error::Io);
                    }
                    node = next;
                }
                None => {
                    let tail = alloc_blk::allocate(store, self.serial, Some(node), self.kind)?;
                    store.map_mut(node, NEXT_OFFSET, |next: &mut u32| *next = tail.raw());
                    store.map_mut(tail, PREV_OFFSET, |prev: &mut u32| *prev = node.raw());

                    let addr = ItemAddr {
                        block: tail,
                        slot: 0,
                    };
                    self.write_item(store, addr, item);
                    return Ok(addr);
                }
            }
        }
    }

    /// 链上全部节点，坏链接处截断
    pub fn nodes(&self, store: &mut Store) -> Vec<BlockId> {
        let mut nodes = Vec::new();
        let mut node = self.head;
        loop {
            nodes.push(node);
            match self.follow(store, node) {
                Some(next) if nodes.len() <= store.block_count() => node = next,
                _ => return nodes,
            }
        }
    }

    pub fn close_nodes(&self, store: &mut Store) {
        for node in self.nodes(store) {
            alloc_blk::close(store, node);
        }
    }

    pub fn discard_nodes(&self, store: &mut Store) {
        for node in self.nodes(store) {
            alloc_blk::discard(store, node);
        }
    }

    /// 重建：把存活表项按遍历序复制进全新的链。
    ///
    /// 先建后换是链的崩溃原子性所在——新链关闭之前崩溃，
    /// 旧链原封不动仍是权威；属主目录表项的切换由调用者完成。
    pub fn consolidate(
        &self,
        store: &mut Store,
        new_serial: Serial,
        close: bool,
    ) -> Result<Chain<T>, vfs::Error> {
        let rebuilt = Chain::create(store, new_serial, self.kind, Some(self.head))?;
        for (_, item) in self.items(store) {
            if item.keep_on_rebuild() {
                rebuilt.append(store, item)?;
            }
        }
        if close {
            rebuilt.close_nodes(store);
        }
        Ok(rebuilt)
    }

    pub fn read_item(&self, store: &mut Store, addr: ItemAddr) -> T {
        store.map(addr.block, item_offset::<T>(addr.slot), |item: &T| *item)
    }

    fn write_item(&self, store: &mut Store, addr: ItemAddr, item: T) {
        store.map_mut(addr.block, item_offset::<T>(addr.slot), |slot: &mut T| {
            *slot = item
        });
    }

    /// 表项状态迁移：恰好一次单字节写入
    pub fn set_item_status(&self, store: &mut Store, addr: ItemAddr, status: u8) {
        store.map_mut(addr.block, item_offset::<T>(addr.slot), |byte: &mut u8| {
            *byte = status;
        });
    }

    fn follow(&self, store: &mut Store, node: BlockId) -> Option<BlockId> {
        let next = next_link(store, node)?;
        self.link_consistent(store, node, next).then_some(next)
    }

    fn link_consistent(&self, store: &mut Store, node: BlockId, next: BlockId) -> bool {
        if next == node || next.index() >= store.block_count() {
            log::error!("chain node {} has circular or wild next link", node.raw());
            return false;
        }

        let header = store.header(next);
        let status_ok = matches!(header.status(), BlockStatus::Open | BlockStatus::Closed);
        if header.serial() != Some(self.serial) || header.kind() != Some(self.kind) || !status_ok {
            log::error!("chain node {} links to foreign block {}", node.raw(), next.raw());
            return false;
        }

        let prev = store.map(next, PREV_OFFSET, |prev: &u32| *prev);
        if BlockId::from_raw(prev) != Some(node) {
            log::error!("broken back link at chain node {}", next.raw());
            return false;
        }
        true
    }
}

fn next_link(store: &mut Store, node: BlockId) -> Option<BlockId> {
    let raw = store.map(node, NEXT_OFFSET, |next: &u32| *next);
    BlockId::from_raw(raw)
}

fn item_offset<T>(slot: usize) -> usize {
    ITEMS_OFFSET + slot * mem::size_of::<T>()
}
