//! 整个卷驱动共用的错误类型.
//!
//! 前置条件错误 (未挂载, 越界, 重复的缓存键 ...) 在产生任何副作用之前返回;
//! 传输层错误 ([`JbodError::Rejected`], [`JbodError::Io`], [`JbodError::Protocol`])
//! 会立即中止正在进行的多块操作, 不做任何重试.

use thiserror::Error;

use super::{Opcode, CACHE_MAX_ENTRIES, CACHE_MIN_ENTRIES, MAX_IO_LEN};

#[derive(Error, Debug)]
pub enum JbodError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("volume is not mounted")]
    NotMounted,

    #[error("volume is already mounted")]
    AlreadyMounted,

    #[error("write permission is already granted")]
    AlreadyWritable,

    #[error("write permission is not granted")]
    WriteNotPermitted,

    #[error("request of {0} bytes exceeds the {}-byte limit", MAX_IO_LEN)]
    TooLong(usize),

    #[error("range {addr:#x}+{len} lies outside the linear address space")]
    OutOfRange { addr: u32, len: usize },

    #[error("disk {disk} block {block} does not exist")]
    BadLocation { disk: u32, block: u32 },

    #[error("block cache is already created")]
    CacheExists,

    #[error("block cache is not created")]
    CacheMissing,

    #[error("cache capacity {0} is outside [{}, {}]", CACHE_MIN_ENTRIES, CACHE_MAX_ENTRIES)]
    CacheCapacity(usize),

    #[error("block cache holds no entries")]
    CacheEmpty,

    #[error("disk {disk} block {block} is already cached")]
    DuplicateEntry { disk: u32, block: u32 },

    /// 传输层执行了命令, 但是远端 JBOD 报告失败
    #[error("JBOD rejected {op}: {reason}")]
    Rejected { op: Opcode, reason: &'static str },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("invalid geometry: {0}")]
    Geometry(String),

    #[error("trace line {line}: {detail}")]
    Trace { line: usize, detail: String },
}

pub type Result<T> = std::result::Result<T, JbodError>;
