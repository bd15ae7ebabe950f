//! # 宿主侧闪存驱动
//!
//! 两个在标准库环境下运行的[`FlashDevice`]实现：
//! [`FlashFile`]把镜像放在宿主文件里，打包工具用它生成可烧录的镜像；
//! [`MemFlash`]把镜像放在内存里，额外带断电注入与擦除计数，
//! 崩溃恢复测试靠它逐写入枚举断电点。
//!
//! 两个驱动都忠实模拟NOR闪存的写入语义：写入按位与，
//! 只有整组擦除才能把位恢复成1。

#[cfg(test)]
mod tests;

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Mutex;

use flash_dev::{FlashDevice, FlashGeometry};
use flash_fs::BLOCK_SIZE;

/// 常用几何参数：`groups`个擦除组，每组`group_blocks`个块
pub fn geometry(groups: usize, group_blocks: usize) -> FlashGeometry {
    FlashGeometry {
        block_size: BLOCK_SIZE,
        group_size: BLOCK_SIZE * group_blocks,
        block_count: groups * group_blocks,
        group_erase_ms: 10,
        chip_erase_ms: 500,
    }
}

/// 宿主文件里的闪存镜像
pub struct FlashFile {
    file: Mutex<File>,
    geo: FlashGeometry,
}

impl FlashFile {
    /// 建立全擦除态的新镜像
    pub fn create(path: impl AsRef<Path>, geo: FlashGeometry) -> std::io::Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.write_all(&vec![0xFF; geo.capacity()])?;
        Ok(Self {
            file: Mutex::new(file),
            geo,
        })
    }

    pub fn open(path: impl AsRef<Path>, geo: FlashGeometry) -> std::io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        assert_eq!(
            file.metadata()?.len(),
            geo.capacity() as u64,
            "image size doesn't match geometry"
        );
        Ok(Self {
            file: Mutex::new(file),
            geo,
        })
    }
}

impl FlashDevice for FlashFile {
    fn read_at(&self, offset: usize, buf: &mut [u8]) {
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(offset as u64)).expect("seeking error");
        file.read_exact(buf).expect("short image read");
    }

    fn write_at(&self, offset: usize, buf: &[u8]) {
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(offset as u64)).expect("seeking error");
        let mut old = vec![0u8; buf.len()];
        file.read_exact(&mut old).expect("short image read");
        for (cell, byte) in old.iter_mut().zip(buf) {
            *cell &= byte;
        }
        file.seek(SeekFrom::Start(offset as u64)).expect("seeking error");
        file.write_all(&old).expect("short image write");
    }

    fn erase_group(&self, offset: usize) {
        assert_eq!(offset % self.geo.group_size, 0);
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(offset as u64)).expect("seeking error");
        file.write_all(&vec![0xFF; self.geo.group_size])
            .expect("short image write");
    }

    fn geometry(&self) -> FlashGeometry {
        self.geo
    }
}

/// 内存闪存镜像，带断电注入。
///
/// [`Self::power_cut_after`]之后的写入与擦除被悄悄丢弃——
/// 模拟断电瞬间RAM里的状态与闪存脱节，之后引擎的行为不再作数，
/// 重新挂载看到的才是设备真正的内容。
pub struct MemFlash {
    geo: FlashGeometry,
    state: Mutex<MemState>,
}

struct MemState {
    data: Vec<u8>,
    /// 已发起的写入/擦除操作总数，含被丢弃的
    ops: u64,
    /// 超过此操作数的写入被丢弃
    cut_at: Option<u64>,
    erase_counts: Vec<u64>,
}

impl MemFlash {
    pub fn new(geo: FlashGeometry) -> std::sync::Arc<Self> {
        Self::from_image(geo, vec![0xFF; geo.capacity()])
    }

    pub fn from_image(geo: FlashGeometry, image: Vec<u8>) -> std::sync::Arc<Self> {
        assert_eq!(image.len(), geo.capacity());
        std::sync::Arc::new(Self {
            geo,
            state: Mutex::new(MemState {
                data: image,
                ops: 0,
                cut_at: None,
                erase_counts: vec![0; geo.group_count()],
            }),
        })
    }

    pub fn image(&self) -> Vec<u8> {
        self.state.lock().unwrap().data.clone()
    }

    /// 已发起的写入/擦除操作总数
    pub fn ops(&self) -> u64 {
        self.state.lock().unwrap().ops
    }

    /// 从现在起再执行`ops`次写入/擦除后断电
    pub fn power_cut_after(&self, ops: u64) {
        let mut state = self.state.lock().unwrap();
        state.cut_at = Some(state.ops + ops);
    }

    /// 重新上电，写入恢复生效
    pub fn power_on(&self) {
        self.state.lock().unwrap().cut_at = None;
    }

    /// 每个擦除组实际经历的擦除次数，磨损观测用
    pub fn erase_counts(&self) -> Vec<u64> {
        self.state.lock().unwrap().erase_counts.clone()
    }
}

impl MemState {
    /// 记一次操作，返回它是否落在断电之前
    fn charge(&mut self) -> bool {
        self.ops += 1;
        self.cut_at.map_or(true, |cut| self.ops <= cut)
    }
}

impl FlashDevice for MemFlash {
    fn read_at(&self, offset: usize, buf: &mut [u8]) {
        let state = self.state.lock().unwrap();
        buf.copy_from_slice(&state.data[offset..offset + buf.len()]);
    }

    fn write_at(&self, offset: usize, buf: &[u8]) {
        let mut state = self.state.lock().unwrap();
        if !state.charge() {
            return;
        }
        for (index, byte) in buf.iter().enumerate() {
            state.data[offset + index] &= byte;
        }
    }

    fn erase_group(&self, offset: usize) {
        assert_eq!(offset % self.geo.group_size, 0);
        let mut state = self.state.lock().unwrap();
        if !state.charge() {
            return;
        }
        state.data[offset..offset + self.geo.group_size].fill(0xFF);
        let group = offset / self.geo.group_size;
        state.erase_counts[group] += 1;
    }

    fn geometry(&self) -> FlashGeometry {
        self.geo
    }
}
