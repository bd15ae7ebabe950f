//! 目录表项、分段表项与暂存表项共用的校验和。
//!
//! 校验和只覆盖表项的载荷，不覆盖状态字节，
//! 这样状态迁移的单字节写入不会使校验和失效。

use crc::{Crc, CRC_32_ISCSI};

const CASTAGNOLI: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct Tag(u32);

impl Tag {
    pub fn over(bytes: &[u8]) -> Self {
        Self(CASTAGNOLI.checksum(bytes))
    }

    pub fn verify(self, bytes: &[u8]) -> bool {
        Self::over(bytes) == self
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }
}
