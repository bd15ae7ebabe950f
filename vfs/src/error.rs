/// 文件系统调用的统一错误。
///
/// 校验和失败不会出现在这里：引擎会把损坏的表项降级为脏项并继续，
/// 只有设备级与空间耗尽类的错误才会传播给调用者。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    AlreadyExists,
    NotFound,
    PermissionDenied,
    /// 设备耗尽，回收之后仍然分配不出块
    NoSpace,
    /// 设备操作失败或链表结构不一致
    Io,
    InvalidInput,
}
