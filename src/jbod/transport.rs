//! 传输层仅支持以操作码为单位执行原语命令, 需要由具体的传输实现 (网络客户端, 本地模拟器) 来实现.
//! 卷驱动层会调用 [`Transport::execute`], 完成挂载, 寻道和块的读写.
//! 泛用性: 卷驱动可以驱动任何实现了 Transport Trait 的 JBOD.

use std::fmt::{self, Display, Formatter};

use super::{Block, Result};

/// JBOD 支持的原语命令
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Command {
    Mount = 0,
    Unmount = 1,
    SeekToDisk = 2,
    SeekToBlock = 3,
    ReadBlock = 4,
    WriteBlock = 5,
    WritePermission = 6,
    RevokeWritePermission = 7,
}

impl Command {
    pub fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => Self::Mount,
            1 => Self::Unmount,
            2 => Self::SeekToDisk,
            3 => Self::SeekToBlock,
            4 => Self::ReadBlock,
            5 => Self::WriteBlock,
            6 => Self::WritePermission,
            7 => Self::RevokeWritePermission,
            _ => return None,
        })
    }
}

const BLOCK_SHIFT: u32 = 0;
const DISK_SHIFT: u32 = 8;
const COMMAND_SHIFT: u32 = 12;
const BLOCK_MASK: u32 = 0xff;
const DISK_MASK: u32 = 0xf;
const COMMAND_MASK: u32 = 0x3f;

/// 32 位操作码
///
/// | bits   | 字段     |
/// |--------|----------|
/// | 0..8   | 块号     |
/// | 8..12  | 磁盘号   |
/// | 12..18 | 命令     |
/// | 18..32 | 保留, 为 0 |
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Opcode(u32);

impl Opcode {
    pub fn new(command: Command, disk: u32, block: u32) -> Self {
        debug_assert!(disk <= DISK_MASK && block <= BLOCK_MASK);
        Self(
            (command as u32) << COMMAND_SHIFT
                | (disk & DISK_MASK) << DISK_SHIFT
                | (block & BLOCK_MASK) << BLOCK_SHIFT,
        )
    }

    /// 不带参数的命令
    pub fn bare(command: Command) -> Self {
        Self::new(command, 0, 0)
    }

    pub fn seek_disk(disk: u32) -> Self {
        Self::new(Command::SeekToDisk, disk, 0)
    }

    pub fn seek_block(block: u32) -> Self {
        Self::new(Command::SeekToBlock, 0, block)
    }

    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u32 {
        self.0
    }

    /// 无法识别的命令字段返回 None
    pub fn command(&self) -> Option<Command> {
        Command::from_raw((self.0 >> COMMAND_SHIFT) & COMMAND_MASK)
    }

    pub fn disk(&self) -> u32 {
        (self.0 >> DISK_SHIFT) & DISK_MASK
    }

    pub fn block(&self) -> u32 {
        (self.0 >> BLOCK_SHIFT) & BLOCK_MASK
    }
}

impl Display for Opcode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.command() {
            Some(Command::SeekToDisk) => write!(f, "SeekToDisk({})", self.disk()),
            Some(Command::SeekToBlock) => write!(f, "SeekToBlock({})", self.block()),
            Some(command) => write!(f, "{:?}", command),
            None => write!(f, "Unknown({:#x})", self.0),
        }
    }
}

// 传输接口层
// 定义 JBOD 需要实现的原语命令接口 Transport trait

pub trait Transport {
    /// 执行一条命令并等待结果. 阻塞直到远端应答或者通道出错.
    ///
    /// ReadBlock 会将读到的块填入 block; WriteBlock 则将 block 的内容写入当前块.
    /// 其他命令不使用 block.
    fn execute(&mut self, op: Opcode, block: Option<&mut Block>) -> Result<()>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn execute(&mut self, op: Opcode, block: Option<&mut Block>) -> Result<()> {
        (**self).execute(op, block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_fields() {
        let op = Opcode::seek_disk(3);
        assert_eq!(op.raw(), 2 << 12 | 3 << 8);
        assert_eq!(op.command(), Some(Command::SeekToDisk));
        assert_eq!(op.disk(), 3);
        assert_eq!(op.block(), 0);

        let op = Opcode::seek_block(255);
        assert_eq!(op.raw(), 3 << 12 | 255);
        assert_eq!(op.block(), 255);

        assert_eq!(Opcode::bare(Command::Mount).raw(), 0);
        assert_eq!(Opcode::bare(Command::Unmount).raw(), 1 << 12);
    }

    #[test]
    fn unknown_command() {
        let op = Opcode::from_raw(0x3f << 12);
        assert_eq!(op.command(), None);
        assert_eq!(format!("{}", op), "Unknown(0x3f000)");
        assert_eq!(format!("{}", Opcode::seek_block(7)), "SeekToBlock(7)");
    }
}
