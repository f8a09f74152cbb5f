//! 线性地址空间的布局
//!
//! 线性地址空间 [0, D * S) 按照磁盘号从小到大依次拼接 D 个磁盘,
//! 每个磁盘由 B 个大小为 [`BLOCK_SIZE`] 的块组成 (S = B * BLOCK_SIZE).
//!
//! - 一个地址唯一地分解为 (磁盘号, 块号, 块内偏移), 见 [`Geometry::locate`]
//! - 一段字节区间 [addr, addr + len) 被展开为一个有序的 [`Segment`] 序列, 见 [`Geometry::segments`].
//!   每个 Segment 描述了在某个块内需要传输的子区间, 只有第一个块和最后一个块会被裁剪.

use super::{JbodError, Result, BLOCKS_PER_DISK, BLOCK_SIZE, MAX_BLOCKS_PER_DISK, MAX_DISKS, NUM_DISKS};

/// JBOD 阵列的几何参数
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Geometry {
    num_disks: u32,
    blocks_per_disk: u32,
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            num_disks: NUM_DISKS,
            blocks_per_disk: BLOCKS_PER_DISK,
        }
    }
}

impl Geometry {
    /// 磁盘号和块号需要能够编码进操作码, 因此最多 16 个磁盘, 每个磁盘最多 256 个块
    pub fn new(num_disks: u32, blocks_per_disk: u32) -> Result<Self> {
        if num_disks == 0 || num_disks > MAX_DISKS {
            return Err(JbodError::Geometry(format!(
                "{} disks, expected 1..={}",
                num_disks, MAX_DISKS
            )));
        }
        if blocks_per_disk == 0 || blocks_per_disk > MAX_BLOCKS_PER_DISK {
            return Err(JbodError::Geometry(format!(
                "{} blocks per disk, expected 1..={}",
                blocks_per_disk, MAX_BLOCKS_PER_DISK
            )));
        }
        Ok(Self {
            num_disks,
            blocks_per_disk,
        })
    }

    pub fn num_disks(&self) -> u32 {
        self.num_disks
    }

    pub fn blocks_per_disk(&self) -> u32 {
        self.blocks_per_disk
    }

    /// 每个磁盘的字节数
    pub fn disk_size(&self) -> u64 {
        self.blocks_per_disk as u64 * BLOCK_SIZE as u64
    }

    /// 整个线性地址空间的字节数
    pub fn capacity(&self) -> u64 {
        self.num_disks as u64 * self.disk_size()
    }

    pub fn contains(&self, disk: u32, block: u32) -> bool {
        disk < self.num_disks && block < self.blocks_per_disk
    }

    /// 将线性地址分解为 (磁盘号, 块号, 块内偏移)
    pub fn locate(&self, addr: u64) -> Location {
        let global_block = addr / BLOCK_SIZE as u64;
        Location {
            disk: (global_block / self.blocks_per_disk as u64) as u32,
            block: (global_block % self.blocks_per_disk as u64) as u32,
            offset: (addr % BLOCK_SIZE as u64) as usize,
        }
    }

    /// 检查 [addr, addr + len) 是否完整地落在线性地址空间内
    pub fn check_range(&self, addr: u32, len: usize) -> Result<()> {
        if addr as u64 + len as u64 > self.capacity() {
            return Err(JbodError::OutOfRange { addr, len });
        }
        Ok(())
    }

    /// 将 [addr, addr + len) 展开为按顺序访问的块的序列.
    ///
    /// 调用者需要先通过 [`Geometry::check_range`] 检查区间. len 为 0 时序列为空.
    pub fn segments(&self, addr: u32, len: usize) -> Segments {
        let start = addr as u64;
        let end = start + len as u64;
        let first = start / BLOCK_SIZE as u64;
        Segments {
            blocks_per_disk: self.blocks_per_disk as u64,
            next: first,
            first,
            // 最后一个被访问的块 (开区间). 空区间不访问任何块, 即使 addr 没有对齐
            end: if len == 0 {
                first
            } else {
                (end + BLOCK_SIZE as u64 - 1) / BLOCK_SIZE as u64
            },
            first_offset: (start % BLOCK_SIZE as u64) as usize,
            // 最后一个块中最后一个字节的偏移 (闭区间)
            last_offset: (end.saturating_sub(1) % BLOCK_SIZE as u64) as usize,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Location {
    pub disk: u32,
    pub block: u32,
    pub offset: usize,
}

/// 在一个块内需要传输的子区间
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Segment {
    pub disk: u32,
    pub block: u32,
    /// 子区间在块内的起始偏移
    pub start: usize,
    /// 子区间的字节数
    pub len: usize,
}

impl Segment {
    /// 子区间在块内的范围
    pub fn range(&self) -> std::ops::Range<usize> {
        self.start..self.start + self.len
    }
}

/// 以全局块号 (磁盘号 * 每盘块数 + 块号) 遍历,
/// 跨越磁盘边界时块号自然地回到 0, 磁盘号加 1
pub struct Segments {
    blocks_per_disk: u64,
    next: u64,
    first: u64,
    end: u64,
    first_offset: usize,
    last_offset: usize,
}

impl Iterator for Segments {
    type Item = Segment;

    fn next(&mut self) -> Option<Segment> {
        if self.next >= self.end {
            return None;
        }
        let global_block = self.next;
        self.next += 1;
        let start = if global_block == self.first {
            self.first_offset
        } else {
            0
        };
        let last = if global_block + 1 == self.end {
            self.last_offset
        } else {
            BLOCK_SIZE - 1
        };
        Some(Segment {
            disk: (global_block / self.blocks_per_disk) as u32,
            block: (global_block % self.blocks_per_disk) as u32,
            start,
            len: last - start + 1,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.end.saturating_sub(self.next) as usize;
        (n, Some(n))
    }
}

impl ExactSizeIterator for Segments {}
