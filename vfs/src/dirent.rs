use alloc::string::String;

#[derive(Debug)]
pub struct DirEntry {
    /// Inode number（文件序列号）
    pub inode: u64,
    pub ty: DirEntryType,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum DirEntryType {
    Directory,
    #[default]
    Regular,
}
