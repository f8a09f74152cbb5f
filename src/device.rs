use std::{
    fs::{File, OpenOptions},
    io::{Cursor, Read, Seek, SeekFrom, Write},
    path::Path,
};

use log::debug;

use crate::jbod::{Block, Command, Geometry, JbodError, Opcode, Result, Transport, BLOCK_SIZE};

/// 一个本地的 JBOD 阵列, 整个阵列的内容保存在一个字节镜像里 (内存或者文件).
///
/// 镜像中磁盘依次排列, 每个磁盘的块依次排列, 所以 (disk, block) 所在的位置是
/// (disk * blocks_per_disk + block) * BLOCK_SIZE.
/// 和真正的 JBOD 一样, 它维护一个当前磁盘和当前块的指针, 读写之后块指针前进一个块.
pub struct JbodArray<S> {
    storage: S,
    geometry: Geometry,
    mounted: bool,
    writable: bool,
    disk: u32,
    block: u32,
}

impl JbodArray<Cursor<Vec<u8>>> {
    /// 全部清零的内存阵列
    pub fn in_memory(geometry: Geometry) -> Self {
        Self::new(
            Cursor::new(vec![0u8; geometry.capacity() as usize]),
            geometry,
        )
    }
}

impl JbodArray<File> {
    /// 打开 (必要时创建) 一个镜像文件, 并将它的大小设置为整个阵列的大小
    pub fn open_image(path: impl AsRef<Path>, geometry: Geometry) -> Result<Self> {
        let f = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        f.set_len(geometry.capacity())?;
        Ok(Self::new(f, geometry))
    }
}

impl<S: Read + Write + Seek> JbodArray<S> {
    pub fn new(storage: S, geometry: Geometry) -> Self {
        Self {
            storage,
            geometry,
            mounted: false,
            writable: false,
            disk: 0,
            block: 0,
        }
    }

    /// 当前块在镜像中的字节位置
    fn position(&self) -> u64 {
        (self.disk as u64 * self.geometry.blocks_per_disk() as u64 + self.block as u64)
            * BLOCK_SIZE as u64
    }

    fn transfer(&mut self, op: Opcode, block: Option<&mut Block>) -> Result<()> {
        let rejected = |reason| JbodError::Rejected { op, reason };
        let buf = block.ok_or_else(|| rejected("missing block buffer"))?;
        if self.block >= self.geometry.blocks_per_disk() {
            return Err(rejected("past the end of the disk"));
        }
        let position = self.position();
        self.storage.seek(SeekFrom::Start(position))?;
        match op.command() {
            Some(Command::ReadBlock) => self.storage.read_exact(buf)?,
            _ => {
                if !self.writable {
                    return Err(rejected("write permission not granted"));
                }
                self.storage.write_all(buf)?;
            }
        }
        self.block += 1;
        Ok(())
    }
}

impl<S: Read + Write + Seek> Transport for JbodArray<S> {
    fn execute(&mut self, op: Opcode, block: Option<&mut Block>) -> Result<()> {
        let rejected = |reason| JbodError::Rejected { op, reason };
        let command = op.command().ok_or_else(|| rejected("unknown command"))?;
        debug!("jbod array: {}", op);
        if command != Command::Mount && !self.mounted {
            return Err(rejected("not mounted"));
        }
        match command {
            Command::Mount => {
                if self.mounted {
                    return Err(rejected("already mounted"));
                }
                self.mounted = true;
            }
            // 写权限和挂载状态相互独立, 卸载不会收回写权限
            Command::Unmount => self.mounted = false,
            Command::SeekToDisk => {
                if op.disk() >= self.geometry.num_disks() {
                    return Err(rejected("bad disk number"));
                }
                self.disk = op.disk();
                self.block = 0;
            }
            Command::SeekToBlock => {
                if op.block() >= self.geometry.blocks_per_disk() {
                    return Err(rejected("bad block number"));
                }
                self.block = op.block();
            }
            Command::ReadBlock | Command::WriteBlock => self.transfer(op, block)?,
            Command::WritePermission => self.writable = true,
            Command::RevokeWritePermission => self.writable = false,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> JbodArray<Cursor<Vec<u8>>> {
        JbodArray::in_memory(Geometry::new(2, 4).unwrap())
    }

    #[test]
    fn rejects_until_mounted() {
        let mut jbod = small();
        assert!(matches!(
            jbod.execute(Opcode::seek_disk(0), None),
            Err(JbodError::Rejected {
                reason: "not mounted",
                ..
            })
        ));
        jbod.execute(Opcode::bare(Command::Mount), None).unwrap();
        assert!(jbod.execute(Opcode::bare(Command::Mount), None).is_err());
        jbod.execute(Opcode::seek_disk(1), None).unwrap();
        assert!(jbod.execute(Opcode::seek_disk(2), None).is_err());
        assert!(jbod.execute(Opcode::seek_block(4), None).is_err());
        assert!(jbod
            .execute(Opcode::from_raw(0x3f << 12), None)
            .is_err());
    }

    #[test]
    fn write_then_read_advances() {
        let mut jbod = small();
        jbod.execute(Opcode::bare(Command::Mount), None).unwrap();
        let mut block = [7u8; BLOCK_SIZE];
        jbod.execute(Opcode::seek_disk(1), None).unwrap();
        jbod.execute(Opcode::seek_block(2), None).unwrap();
        assert!(jbod
            .execute(Opcode::bare(Command::WriteBlock), Some(&mut block))
            .is_err());

        jbod.execute(Opcode::bare(Command::WritePermission), None)
            .unwrap();
        jbod.execute(Opcode::seek_block(2), None).unwrap();
        jbod.execute(Opcode::bare(Command::WriteBlock), Some(&mut block))
            .unwrap();
        // 块指针已经移动到块 3
        let mut block = [1u8; BLOCK_SIZE];
        jbod.execute(Opcode::bare(Command::WriteBlock), Some(&mut block))
            .unwrap();
        assert!(jbod
            .execute(Opcode::bare(Command::WriteBlock), Some(&mut block))
            .is_err());

        let mut buf = [0u8; BLOCK_SIZE];
        jbod.execute(Opcode::seek_block(2), None).unwrap();
        jbod.execute(Opcode::bare(Command::ReadBlock), Some(&mut buf))
            .unwrap();
        assert_eq!(buf, [7u8; BLOCK_SIZE]);
        jbod.execute(Opcode::bare(Command::ReadBlock), Some(&mut buf))
            .unwrap();
        assert_eq!(buf, [1u8; BLOCK_SIZE]);

        let image = jbod.storage.into_inner();
        let disk_size = 4 * BLOCK_SIZE;
        assert!(image[disk_size + 2 * BLOCK_SIZE..disk_size + 3 * BLOCK_SIZE]
            .iter()
            .all(|b| *b == 7));
        assert!(image[..disk_size].iter().all(|b| *b == 0));
    }

    #[test]
    fn write_permission_survives_remount() {
        let mut jbod = small();
        jbod.execute(Opcode::bare(Command::Mount), None).unwrap();
        jbod.execute(Opcode::bare(Command::WritePermission), None)
            .unwrap();
        jbod.execute(Opcode::bare(Command::Unmount), None).unwrap();
        let mut block = [3u8; BLOCK_SIZE];
        assert!(jbod
            .execute(Opcode::bare(Command::WriteBlock), Some(&mut block))
            .is_err());

        jbod.execute(Opcode::bare(Command::Mount), None).unwrap();
        jbod.execute(Opcode::seek_disk(0), None).unwrap();
        jbod.execute(Opcode::bare(Command::WriteBlock), Some(&mut block))
            .unwrap();
        jbod.execute(Opcode::bare(Command::RevokeWritePermission), None)
            .unwrap();
        jbod.execute(Opcode::seek_disk(0), None).unwrap();
        assert!(jbod
            .execute(Opcode::bare(Command::WriteBlock), Some(&mut block))
            .is_err());
    }

    #[test]
    fn read_needs_buffer() {
        let mut jbod = small();
        jbod.execute(Opcode::bare(Command::Mount), None).unwrap();
        assert!(matches!(
            jbod.execute(Opcode::bare(Command::ReadBlock), None),
            Err(JbodError::Rejected {
                reason: "missing block buffer",
                ..
            })
        ));
    }
}
