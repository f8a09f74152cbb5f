mod block_cache;
mod error;
mod layout;
mod net;
mod session;
mod transport;
mod volume;

extern crate log;

/// Use a block size of 256 bytes
pub const BLOCK_SIZE: usize = 256;
/// 默认的磁盘数量
pub const NUM_DISKS: u32 = 16;
/// 默认的每个磁盘的块数量
pub const BLOCKS_PER_DISK: u32 = 256;
/// 单次 read/write 最多传输的字节数
pub const MAX_IO_LEN: usize = 2048;
/// 块缓存容量的下界
pub const CACHE_MIN_ENTRIES: usize = 2;
/// 块缓存容量的上界
pub const CACHE_MAX_ENTRIES: usize = 4096;
/// 操作码中磁盘号字段的宽度为 4 bits, 块号字段为 8 bits
pub const MAX_DISKS: u32 = 1 << 4;
pub const MAX_BLOCKS_PER_DISK: u32 = 1 << 8;

/// 一个块的数据
pub type Block = [u8; BLOCK_SIZE];

pub use block_cache::{BlockCache, CacheStats};
pub use error::{JbodError, Result};
pub use layout::Geometry;
pub use net::{JbodClient, JbodServer};
pub use session::Session;
pub use transport::{Command, Opcode, Transport};
pub use volume::Volume;
