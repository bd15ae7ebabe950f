//! # 块模型层
//!
//! 闪存上的最小寻址单位是**块**：固定256字节，起始8字节是块头，
//! 其余是块体。擦除后的字节全部为`0xFF`，写入只能清位，
//! 因此所有状态字段都采用**单调清位**编码——每次合法状态迁移
//! 都恰好是一次单字节写入，这也是整个引擎唯一的崩溃安全原语。

use derive_more::{From, Into};

/// 块大小（字节）
pub const BLOCK_SIZE: usize = 256;
/// 块头大小（字节）
pub const HEADER_SIZE: usize = 8;
/// 块体大小（字节）
pub const BODY_SIZE: usize = BLOCK_SIZE - HEADER_SIZE;
/// 一个逻辑分段的容量，即一个数据块的块体
pub const SEGMENT_SIZE: usize = BODY_SIZE;

/// 擦除态的u32字段，在闪存上表示“无”
pub const RAW_NONE: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, From, Into)]
#[repr(transparent)]
pub struct BlockId(u32);

impl BlockId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    /// 闪存上的裸块号转可选句柄，擦除态即“无”
    pub const fn from_raw(raw: u32) -> Option<Self> {
        if raw == RAW_NONE {
            None
        } else {
            Some(Self(raw))
        }
    }

    pub fn to_raw(id: Option<Self>) -> u32 {
        id.map_or(RAW_NONE, |id| id.0)
    }
}

/// 文件的持久身份，与当前头块所在的物理位置无关
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, From, Into)]
#[repr(transparent)]
pub struct Serial(u32);

impl Serial {
    /// 序列号目录自身的序列号
    pub const CATALOG: Self = Self(0);

    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn from_raw(raw: u32) -> Option<Self> {
        if raw == RAW_NONE {
            None
        } else {
            Some(Self(raw))
        }
    }

    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

/// 块生命周期。
///
/// FREE → OPEN → CLOSED → DIRTY →（物理擦除）→ FREE。
/// 废弃从不当场擦除，只把状态清成DIRTY，物理擦除推迟到组回收。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BlockStatus {
    Free = 0xFF,
    Open = 0x7F,
    Closed = 0x3F,
    Discarding = 0x1F,
    Dirty = 0x00,
}

impl BlockStatus {
    pub const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0xFF => Some(Self::Free),
            0x7F => Some(Self::Open),
            0x3F => Some(Self::Closed),
            0x1F => Some(Self::Discarding),
            0x00 => Some(Self::Dirty),
            _ => None,
        }
    }
}

/// 块的用途
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BlockKind {
    /// 序列号目录的链节点
    Catalog = 0x11,
    /// 文件头
    Header = 0x22,
    /// 分段映射的链节点
    SegmentList = 0x33,
    /// 文件数据
    Data = 0x44,
}

impl BlockKind {
    pub const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0x11 => Some(Self::Catalog),
            0x22 => Some(Self::Header),
            0x33 => Some(Self::SegmentList),
            0x44 => Some(Self::Data),
            _ => None,
        }
    }
}

/// 块头的闪存布局
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct BlockHeader {
    /// 属主序列号，擦除态为[`RAW_NONE`]
    pub serial: u32,
    pub kind: u8,
    pub status: u8,
    _pad: [u8; 2],
}

impl BlockHeader {
    /// 状态字节在块内的偏移
    pub const STATUS_OFFSET: usize = 5;

    pub fn serial(&self) -> Option<Serial> {
        Serial::from_raw(self.serial)
    }

    pub fn kind(&self) -> Option<BlockKind> {
        BlockKind::from_raw(self.kind)
    }

    /// 无法识别的状态字节视作撕裂写入，按DIRTY处理
    pub fn status(&self) -> BlockStatus {
        match BlockStatus::from_raw(self.status) {
            Some(status) => status,
            None => {
                log::warn!("torn status byte {:#04x}, treating as dirty", self.status);
                BlockStatus::Dirty
            }
        }
    }

    pub fn is_free(&self) -> bool {
        self.status() == BlockStatus::Free
    }
}
