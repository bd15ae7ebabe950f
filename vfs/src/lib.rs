#![no_std]

extern crate alloc;

mod dirent;
mod error;
mod flags;
mod stat;

pub use self::{
    dirent::{DirEntry, DirEntryType},
    error::Error,
    flags::OpenFlag,
    stat::Stat,
};
