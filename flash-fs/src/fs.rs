//! # 文件系统层
//!
//! 挂载、格式化与按名字的文件操作。挂载分五步：暂存区写回、
//! 探测目录头节点、按表项状态重放未完成的操作、全盘清扫孤儿块、
//! 压实目录与暂存区。重放是表项状态的纯函数，挂载因此幂等——
//! 重放途中再断电，下次挂载得到同样的结果。
//!
//! 写打开拿到的是文件的**新一代**，提交前读打开的句柄看到的
//! 始终是上一次提交的完整快照。同一文件同时只允许一个写句柄。

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use enumflags2::BitFlags;
use flash_dev::FlashDevice;
use spin::Mutex;
use vfs::{DirEntryType, OpenFlag};

use crate::alloc_blk;
use crate::block::{BlockId, BlockStatus, Serial, SEGMENT_SIZE};
use crate::catalog::{Catalog, EntryStatus};
use crate::chain::ItemAddr;
use crate::file::Generation;
use crate::scratch;
use crate::store::Store;
use crate::NAME_MAX;

pub struct FlashFileSystem {
    store: Store,
    catalog: Catalog,
    /// 持有写句柄的文件，(序列号, 名字)
    writers: Vec<(Serial, String)>,
}

impl FlashFileSystem {
    /// 整盘擦除并写入空目录
    pub fn format(dev: &Arc<dyn FlashDevice>) -> Result<(), vfs::Error> {
        let mut store = Store::new(dev)?;
        for group in 0..store.geometry().group_count() {
            store.erase_group(group);
        }
        Catalog::create(&mut store)?;
        Ok(())
    }

    pub fn mount(dev: &Arc<dyn FlashDevice>) -> Result<Arc<Mutex<Self>>, vfs::Error> {
        let mut store = Store::new(dev)?;
        scratch::restore_all(&mut store);

        let catalog = Catalog::locate(&mut store).ok_or_else(|| {
            log::error!("catalog head not found, device not formatted?");
            vfs::Error::Io
        })?;

        let mut fs = Self {
            store,
            catalog,
            writers: Vec::new(),
        };
        fs.replay();
        fs.sweep();
        fs.catalog.compact_if_needed(&mut fs.store)?;
        scratch::compact(&mut fs.store);
        Ok(Arc::new(Mutex::new(fs)))
    }

    /// 打开文件。写打开创建新一代，提交发生在[`FileHandle::close`]
    pub fn open_file(
        fs: &Arc<Mutex<Self>>,
        name: &str,
        flags: BitFlags<OpenFlag>,
    ) -> Result<FileHandle, vfs::Error> {
        if name.is_empty() || name.len() > NAME_MAX {
            return Err(vfs::Error::InvalidInput);
        }
        if !flags.intersects(OpenFlag::Read | OpenFlag::Write) {
            return Err(vfs::Error::InvalidInput);
        }
        if flags.intersects(OpenFlag::Create | OpenFlag::Excl | OpenFlag::Truncate)
            && !flags.contains(OpenFlag::Write)
        {
            return Err(vfs::Error::InvalidInput);
        }

        let mut guard = fs.lock();
        let this = &mut *guard;
        let found = this.lookup(name);

        if !flags.contains(OpenFlag::Write) {
            // 只读句柄钉住当前已提交的一代
            let (_, gen) = found.ok_or(vfs::Error::NotFound)?;
            let serial = gen.serial();
            return Ok(FileHandle {
                fs: fs.clone(),
                serial,
                flags,
                mode: Some(Mode::Read(gen)),
            });
        }

        if found.is_some() && flags.contains(OpenFlag::Excl) {
            return Err(vfs::Error::AlreadyExists);
        }
        match &found {
            Some((_, gen)) if this.writer_of(gen.serial()) => {
                return Err(vfs::Error::PermissionDenied)
            }
            None if this.writer_named(name) => return Err(vfs::Error::PermissionDenied),
            None if !flags.contains(OpenFlag::Create) => return Err(vfs::Error::NotFound),
            _ => {}
        }

        let (serial, prior, prior_size) = match found {
            Some((addr, gen)) => {
                let size = gen.size(&mut this.store).unwrap_or(0);
                (gen.serial(), Some((addr, gen)), size)
            }
            None => (this.catalog.next_serial(&mut this.store), None, 0),
        };

        let truncate = flags.contains(OpenFlag::Truncate);
        let seed = if truncate {
            None
        } else {
            prior.as_ref().map(|(_, gen)| gen)
        };
        let (addr, gen) = Generation::create(&mut this.store, &this.catalog, serial, name, seed)?;
        this.writers.push((serial, String::from(name)));

        Ok(FileHandle {
            fs: fs.clone(),
            serial,
            flags,
            mode: Some(Mode::Write(WriteState {
                gen,
                addr,
                prior,
                buf: [0; SEGMENT_SIZE],
                seg: None,
                dirty: false,
                size: if truncate { 0 } else { prior_size },
            })),
        })
    }

    /// 删除文件。被写句柄持有的文件拒绝删除
    pub fn remove(&mut self, name: &str) -> Result<(), vfs::Error> {
        if name.is_empty() || name.len() > NAME_MAX {
            return Err(vfs::Error::InvalidInput);
        }
        let (addr, gen) = self.lookup(name).ok_or(vfs::Error::NotFound)?;
        if self.writer_of(gen.serial()) {
            return Err(vfs::Error::PermissionDenied);
        }
        gen.delete(&mut self.store, &self.catalog, addr);
        self.maybe_compact_catalog()
    }

    /// 压实会搬动表项，写句柄持有的表项地址不能失效，
    /// 所以只在没有写句柄时进行
    fn maybe_compact_catalog(&mut self) -> Result<(), vfs::Error> {
        if self.writers.is_empty() {
            self.catalog.compact_if_needed(&mut self.store)?;
        }
        Ok(())
    }

    pub fn stat(&mut self, name: &str) -> Result<vfs::Stat, vfs::Error> {
        let (_, gen) = self.lookup(name).ok_or(vfs::Error::NotFound)?;
        let size = gen.size(&mut self.store).unwrap_or(0);
        let blocks = gen.current_blocks(&mut self.store).len();
        Ok(vfs::Stat {
            mode: DirEntryType::Regular,
            inode: gen.serial().raw() as u64,
            block_size: SEGMENT_SIZE as u64,
            blocks: blocks as u64,
            size: size as u64,
        })
    }

    /// 枚举全部已提交的文件
    pub fn readdir(&mut self) -> Vec<vfs::DirEntry> {
        let mut entries = Vec::new();
        for (serial, _, header) in self.latest_closed() {
            if let Some(gen) = Generation::load(&mut self.store, serial, header) {
                entries.push(vfs::DirEntry {
                    inode: serial.raw() as u64,
                    ty: DirEntryType::Regular,
                    name: gen.name(&mut self.store),
                });
            }
        }
        entries
    }

    /// 按状态清点数据区的块，测试与磨损观测用
    pub fn census(&mut self) -> BlockCensus {
        let mut census = BlockCensus::default();
        let data_blocks = self.store.data_groups() * self.store.group_blocks();
        for index in 0..data_blocks {
            let id = BlockId::new(index as u32);
            match self.store.header(id).status() {
                BlockStatus::Free => census.free += 1,
                BlockStatus::Open => census.open += 1,
                BlockStatus::Closed => census.closed += 1,
                BlockStatus::Discarding => census.discarding += 1,
                BlockStatus::Dirty => census.dirty += 1,
            }
        }
        census
    }
}

/* 名字查找 */

impl FlashFileSystem {
    /// 每个序列号最后一条CLOSED表项，即每个文件的当前一代
    fn latest_closed(&mut self) -> Vec<(Serial, ItemAddr, BlockId)> {
        let mut latest: Vec<(Serial, ItemAddr, BlockId)> = Vec::new();
        for (addr, entry) in self.catalog.entries(&mut self.store) {
            if entry.status() != EntryStatus::Closed {
                continue;
            }
            let (Some(serial), Some(header)) = (entry.serial(), entry.header_block()) else {
                continue;
            };
            if serial == Serial::CATALOG {
                continue;
            }
            match latest.iter_mut().find(|(s, ..)| *s == serial) {
                Some(slot) => *slot = (serial, addr, header),
                None => latest.push((serial, addr, header)),
            }
        }
        latest
    }

    fn lookup(&mut self, name: &str) -> Option<(ItemAddr, Generation)> {
        for (serial, addr, header) in self.latest_closed() {
            if let Some(gen) = Generation::load(&mut self.store, serial, header) {
                if gen.name(&mut self.store) == name {
                    return Some((addr, gen));
                }
            }
        }
        None
    }

    fn writer_of(&self, serial: Serial) -> bool {
        self.writers.iter().any(|(s, _)| *s == serial)
    }

    fn writer_named(&self, name: &str) -> bool {
        self.writers.iter().any(|(_, n)| n == name)
    }
}

/* 挂载恢复 */

impl FlashFileSystem {
    /// 按表项状态重放未完成的操作。
    ///
    /// OPEN回滚，CLOSING推进到CLOSED，三个回收阶梯各自续跑；
    /// 同一序列号出现多条CLOSED时后写的胜出，旧的走换代阶梯。
    fn replay(&mut self) {
        let mut serials: Vec<Serial> = Vec::new();
        for (_, entry) in self.catalog.entries(&mut self.store) {
            if let Some(serial) = entry.serial() {
                if serial != Serial::CATALOG && !serials.contains(&serial) {
                    serials.push(serial);
                }
            }
        }

        for serial in serials {
            self.replay_serial(serial);
        }
    }

    fn replay_serial(&mut self, serial: Serial) {
        let mut closed: Vec<(ItemAddr, BlockId)> = Vec::new();
        let mut open: Vec<(ItemAddr, BlockId)> = Vec::new();
        let mut superseding: Vec<(ItemAddr, BlockId)> = Vec::new();

        let entries: Vec<_> = self
            .catalog
            .entries(&mut self.store)
            .into_iter()
            .filter(|(_, entry)| entry.serial() == Some(serial))
            .collect();

        for (addr, entry) in entries {
            let Some(header) = entry.header_block() else {
                continue;
            };
            match entry.status() {
                EntryStatus::Closed => closed.push((addr, header)),
                EntryStatus::Open => open.push((addr, header)),
                EntryStatus::Closing => {
                    match Generation::load(&mut self.store, serial, header) {
                        Some(gen) => {
                            log::info!("rolling forward commit of serial {}", serial.raw());
                            gen.commit_resume(&mut self.store, &self.catalog, addr);
                            closed.push((addr, header));
                        }
                        None => self.demolish(addr, header),
                    }
                }
                // 换代阶梯需要知道幸存一代的保留集，押后处理
                EntryStatus::DiscardingHdrList => superseding.push((addr, header)),
                EntryStatus::DiscardingHdr => self.demolish(addr, header),
                EntryStatus::Discarding => {
                    match Generation::load(&mut self.store, serial, header) {
                        Some(gen) => gen.delete_resume(&mut self.store, &self.catalog, addr),
                        None => self.demolish(addr, header),
                    }
                }
                EntryStatus::Free | EntryStatus::Dirty => {}
            }
        }

        // 后写的CLOSED表项胜出，共享块以它的现行映射为准
        let keep = closed
            .last()
            .and_then(|(_, header)| Generation::load(&mut self.store, serial, *header));

        while closed.len() > 1 {
            let (addr, header) = closed.remove(0);
            match Generation::load(&mut self.store, serial, header) {
                Some(gen) => gen.supersede(&mut self.store, &self.catalog, addr, keep.as_ref()),
                None => self.demolish(addr, header),
            }
        }

        for (addr, header) in superseding {
            match Generation::load(&mut self.store, serial, header) {
                Some(gen) => gen.supersede(&mut self.store, &self.catalog, addr, keep.as_ref()),
                None => self.demolish(addr, header),
            }
        }

        for (addr, header) in open {
            log::info!("rolling back uncommitted generation of serial {}", serial.raw());
            match Generation::load(&mut self.store, serial, header) {
                Some(gen) => gen.rollback(&mut self.store, &self.catalog, addr, keep.as_ref()),
                None => self.demolish(addr, header),
            }
        }
    }

    /// 残代的兜底拆除：只废弃还能辨认的头块，其余交给清扫
    fn demolish(&mut self, addr: ItemAddr, header: BlockId) {
        alloc_blk::discard(&mut self.store, header);
        self.catalog
            .set_status(&mut self.store, addr, EntryStatus::Dirty);
    }

    /// 全盘标记清扫：不被任何存活表项引用的OPEN/CLOSED块都是孤儿。
    ///
    /// 这是重放的兜底——阶梯中途断链漏掉的块最终都落到这里。
    fn sweep(&mut self) {
        let mut live = self.catalog.nodes(&mut self.store);
        for (serial, _, header) in self.latest_closed() {
            match Generation::load(&mut self.store, serial, header) {
                Some(gen) => {
                    live.extend(gen.tree_blocks(&mut self.store));
                    live.extend(gen.current_blocks(&mut self.store));
                }
                // 树走不通的已提交文件按原样保留头块，不越俎代庖
                None => live.push(header),
            }
        }

        let data_blocks = self.store.data_groups() * self.store.group_blocks();
        for index in 0..data_blocks {
            let id = BlockId::new(index as u32);
            match self.store.header(id).status() {
                BlockStatus::Open | BlockStatus::Closed | BlockStatus::Discarding => {
                    if !live.contains(&id) {
                        log::debug!("sweeping orphan block {index}");
                        alloc_blk::discard(&mut self.store, id);
                    }
                }
                BlockStatus::Free | BlockStatus::Dirty => {}
            }
        }
    }
}

impl fmt::Debug for FlashFileSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlashFileSystem")
            .field("writers", &self.writers)
            .finish_non_exhaustive()
    }
}

/// 数据区按状态清点的结果
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BlockCensus {
    pub free: usize,
    pub open: usize,
    pub closed: usize,
    pub discarding: usize,
    pub dirty: usize,
}

enum Mode {
    /// 钉住一代已提交快照
    Read(Generation),
    Write(WriteState),
}

struct WriteState {
    gen: Generation,
    addr: ItemAddr,
    /// 被替换的上一代，提交后走换代阶梯
    prior: Option<(ItemAddr, Generation)>,
    /// 单段写缓冲；跨段时先落盘再装载
    buf: [u8; SEGMENT_SIZE],
    seg: Option<u32>,
    dirty: bool,
    size: u32,
}

pub struct FileHandle {
    fs: Arc<Mutex<FlashFileSystem>>,
    serial: Serial,
    flags: BitFlags<OpenFlag>,
    /// `None`表示已关闭，Drop不再回滚
    mode: Option<Mode>,
}

impl fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileHandle")
            .field("serial", &self.serial)
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

impl FileHandle {
    pub fn serial(&self) -> Serial {
        self.serial
    }

    pub fn size(&mut self) -> u64 {
        let mut guard = self.fs.lock();
        let fs = &mut *guard;
        match self.mode.as_ref() {
            Some(Mode::Read(gen)) => gen.size(&mut fs.store).unwrap_or(0) as u64,
            Some(Mode::Write(w)) => w.size as u64,
            None => 0,
        }
    }

    pub fn read_at(&mut self, offset: usize, buf: &mut [u8]) -> Result<usize, vfs::Error> {
        if !self.flags.contains(OpenFlag::Read) {
            return Err(vfs::Error::PermissionDenied);
        }
        let mut guard = self.fs.lock();
        let fs = &mut *guard;
        match self.mode.as_mut() {
            Some(Mode::Read(gen)) => Ok(gen.read_at(&mut fs.store, offset, buf)),
            Some(Mode::Write(w)) => Ok(read_buffered(fs, w, offset, buf)),
            None => Err(vfs::Error::PermissionDenied),
        }
    }

    pub fn write_at(&mut self, offset: usize, data: &[u8]) -> Result<usize, vfs::Error> {
        let mut guard = self.fs.lock();
        let fs = &mut *guard;
        let Some(Mode::Write(w)) = self.mode.as_mut() else {
            return Err(vfs::Error::PermissionDenied);
        };

        let end = offset + data.len();
        let mut pos = offset;
        while pos < end {
            let seg = (pos / SEGMENT_SIZE) as u32;
            let off = pos % SEGMENT_SIZE;
            let take = (SEGMENT_SIZE - off).min(end - pos);
            load_segment(fs, w, seg)?;
            w.buf[off..off + take].copy_from_slice(&data[pos - offset..pos - offset + take]);
            w.dirty = true;
            pos += take;
        }
        if !data.is_empty() {
            w.size = w.size.max(end as u32);
        }
        Ok(data.len())
    }

    /// 关闭句柄。写句柄在此提交：缓冲落盘、写入尺寸、
    /// 表项推到CLOSED、上一代走换代阶梯
    pub fn close(mut self) -> Result<(), vfs::Error> {
        let Some(mode) = self.mode.take() else {
            return Ok(());
        };
        let Mode::Write(mut w) = mode else {
            return Ok(());
        };

        let mut guard = self.fs.lock();
        let fs = &mut *guard;
        if let Err(err) = flush_segment(fs, &mut w) {
            w.gen.rollback(
                &mut fs.store,
                &fs.catalog,
                w.addr,
                w.prior.as_ref().map(|(_, gen)| gen),
            );
            fs.writers.retain(|(s, _)| *s != self.serial);
            return Err(err);
        }

        w.gen.commit(&mut fs.store, &fs.catalog, w.addr, w.size)?;
        if let Some((prior_addr, prior_gen)) = w.prior {
            prior_gen.supersede(&mut fs.store, &fs.catalog, prior_addr, Some(&w.gen));
        }
        fs.writers.retain(|(s, _)| *s != self.serial);
        fs.maybe_compact_catalog()
    }
}

impl Drop for FileHandle {
    /// 未关闭就丢弃的写句柄按断电处理：整代回滚
    fn drop(&mut self) {
        if let Some(Mode::Write(w)) = self.mode.take() {
            let mut guard = self.fs.lock();
            let fs = &mut *guard;
            w.gen.rollback(
                &mut fs.store,
                &fs.catalog,
                w.addr,
                w.prior.as_ref().map(|(_, gen)| gen),
            );
            fs.writers.retain(|(s, _)| *s != self.serial);
        }
    }
}

/// 切换写缓冲到另一个逻辑段，先落盘再装载
fn load_segment(
    fs: &mut FlashFileSystem,
    w: &mut WriteState,
    seg: u32,
) -> Result<(), vfs::Error> {
    if w.seg == Some(seg) {
        return Ok(());
    }
    flush_segment(fs, w)?;
    w.gen.read_segment(&mut fs.store, seg, &mut w.buf);
    w.seg = Some(seg);
    Ok(())
}

fn flush_segment(fs: &mut FlashFileSystem, w: &mut WriteState) -> Result<(), vfs::Error> {
    if w.dirty {
        if let Some(seg) = w.seg {
            w.gen.write_segment(&mut fs.store, seg, &w.buf)?;
        }
        w.dirty = false;
    }
    Ok(())
}

/// 写句柄视角的读：缓冲段优先，其余走新一代的映射
fn read_buffered(
    fs: &mut FlashFileSystem,
    w: &mut WriteState,
    offset: usize,
    buf: &mut [u8],
) -> usize {
    let size = w.size as usize;
    if offset >= size || buf.is_empty() {
        return 0;
    }
    let end = size.min(offset + buf.len());

    let mut pos = offset;
    while pos < end {
        let seg = (pos / SEGMENT_SIZE) as u32;
        let off = pos % SEGMENT_SIZE;
        let take = (SEGMENT_SIZE - off).min(end - pos);
        let dst = &mut buf[pos - offset..pos - offset + take];
        if w.seg == Some(seg) {
            dst.copy_from_slice(&w.buf[off..off + take]);
        } else {
            let mut seg_buf = [0u8; SEGMENT_SIZE];
            w.gen.read_segment(&mut fs.store, seg, &mut seg_buf);
            dst.copy_from_slice(&seg_buf[off..off + take]);
        }
        pos += take;
    }
    end - offset
}
