//! # 闪存设备接口层
//!
//! 裸NOR/NAND闪存以**擦除组**为最小擦除单位：写入只能把位从1清成0，
//! 只有整组擦除才能把位恢复成1。[`FlashDevice`] 就是对这类介质的抽象，
//! 实现了此特质的类型称为**闪存驱动**。
//!
//! 存储引擎只在块边界内发起写入（暂存区整块复制除外），
//! 擦除则总是以擦除组为单位。

#![no_std]

use core::any::Any;

/// 闪存驱动特质。
///
/// `erase_group` 会阻塞调用线程直至擦除完成，
/// 耗时参考 [`FlashGeometry::group_erase_ms`]。
pub trait FlashDevice: Send + Sync + Any {
    /// 读取一段字节，`offset`与长度必须落在设备容量之内。
    fn read_at(&self, offset: usize, buf: &mut [u8]);

    /// 写入一段字节，只能清位；重复写同一位置是合法的。
    fn write_at(&self, offset: usize, buf: &[u8]);

    /// 擦除`offset`起始的一个擦除组，组内全部字节恢复为`0xFF`。
    fn erase_group(&self, offset: usize);

    fn geometry(&self) -> FlashGeometry;
}

/// 设备几何参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashGeometry {
    /// 块大小（字节）
    pub block_size: usize,
    /// 擦除组大小（字节），必须是块大小的整数倍
    pub group_size: usize,
    /// 总块数，必须是每组块数的整数倍
    pub block_count: usize,
    /// 单个擦除组的典型擦除耗时（毫秒）
    pub group_erase_ms: u32,
    /// 全片擦除的典型耗时（毫秒）
    pub chip_erase_ms: u32,
}

impl FlashGeometry {
    /// 每个擦除组包含的块数
    pub const fn group_blocks(&self) -> usize {
        self.group_size / self.block_size
    }

    /// 擦除组个数
    pub const fn group_count(&self) -> usize {
        self.block_count / self.group_blocks()
    }

    /// 设备总容量（字节）
    pub const fn capacity(&self) -> usize {
        self.block_size * self.block_count
    }
}
