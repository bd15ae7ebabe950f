use enumflags2::bitflags;

/// 打开文件的访问模式。
///
/// POSIX打开标志到这组内部模式的翻译由上层的分发胶水完成。
#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenFlag {
    Read = 1 << 0,
    Write = 1 << 1,
    /// 不存在时创建
    Create = 1 << 2,
    /// 已存在时失败
    Excl = 1 << 3,
    /// 打开时清空旧内容
    Truncate = 1 << 4,
}
