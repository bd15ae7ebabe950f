#![no_std]

extern crate alloc;

/* flash-fs 的整体架构，自上而下 */

// 文件系统层：挂载/格式化、按名字打开与删除、目录枚举
mod fs;
pub use fs::{BlockCensus, FileHandle, FlashFileSystem};

// 文件管理层：读写状态机、分段缓冲、代际交接
mod file;

// 序列号目录层：文件身份到头块的映射，也是崩溃恢复的状态机
mod catalog;

// 分段映射层：逻辑段号到物理块的映射
mod segmap;

// 链表引擎层：闪存上同类型块组成的链，存放定长表项
mod chain;

// 块管理层：分配、关闭、废弃与磨损均衡回收
mod alloc_blk;

// 暂存区层：擦除组回收时的整块备份与崩溃恢复
mod scratch;

// 存储层：按块缓存的设备访问，所有写入直写设备
mod store;

// 块模型层：块号、序列号、块头与状态编码
mod block;
pub use block::{BlockId, Serial, BLOCK_SIZE, SEGMENT_SIZE};

// 校验和：目录表项、分段表项、暂存表项统一使用
mod checksum;

/// 文件名长度上限（字节）
pub const NAME_MAX: usize = 120;
