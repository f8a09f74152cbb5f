//! 卷驱动: 将整个 JBOD 阵列呈现为一个线性的, 按字节寻址的卷.
//!
//! 对于卷的使用者而言, 他们并不关心数据位于哪个磁盘的哪个块上, 只需要提供线性地址和缓冲区.
//! [`Volume`] 负责把字节区间展开成一系列 (磁盘, 块, 块内子区间) 的操作 (见 [`Geometry::segments`]),
//! 在每个块上先查询 [`BlockCache`], 只有缓存未命中时才访问 JBOD.
//!
//! 会话状态, 块缓存和传输层都由 Volume 持有, 不存在进程级的全局状态.

use log::{debug, trace, warn};

use super::{
    Block, BlockCache, CacheStats, Command, Geometry, JbodError, Opcode, Result, Session,
    Transport, BLOCK_SIZE, MAX_IO_LEN,
};

pub struct Volume<T: Transport> {
    transport: T,
    geometry: Geometry,
    session: Session,
    cache: BlockCache,
}

impl<T: Transport> Volume<T> {
    pub fn new(transport: T, geometry: Geometry) -> Self {
        Self {
            transport,
            geometry,
            session: Session::new(),
            cache: BlockCache::new(geometry),
        }
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    #[allow(unused)]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    #[allow(unused)]
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    #[allow(unused)]
    pub fn into_transport(self) -> T {
        self.transport
    }

    pub fn mount(&mut self) -> Result<()> {
        self.session.mount(&mut self.transport)
    }

    pub fn unmount(&mut self) -> Result<()> {
        self.session.unmount(&mut self.transport)
    }

    pub fn grant_write(&mut self) -> Result<()> {
        self.session.grant_write(&mut self.transport)
    }

    pub fn revoke_write(&mut self) -> Result<()> {
        self.session.revoke_write(&mut self.transport)
    }

    pub fn cache_create(&mut self, capacity: usize) -> Result<()> {
        self.cache.create(capacity)
    }

    pub fn cache_destroy(&mut self) -> Result<()> {
        self.cache.destroy()
    }

    pub fn cache_enabled(&self) -> bool {
        self.cache.enabled()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// 长度检查通过之后, 空请求不检查地址
    fn check_request(&self, addr: u32, len: usize) -> Result<()> {
        if len > MAX_IO_LEN {
            return Err(JbodError::TooLong(len));
        }
        if len > 0 {
            self.geometry.check_range(addr, len)?;
        }
        Ok(())
    }

    /// 从线性地址 addr 开始读取 buf.len() 个字节, 返回读取的字节数.
    ///
    /// JBOD 出错时立即返回错误, 已经复制到 buf 中的数据不会回滚.
    pub fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<usize> {
        if !self.session.is_mounted() {
            return Err(JbodError::NotMounted);
        }
        self.check_request(addr, buf.len())?;
        if buf.is_empty() {
            return Ok(0);
        }
        trace!(
            "read {} bytes from {:?}",
            buf.len(),
            self.geometry.locate(addr as u64)
        );

        let mut block = [0u8; BLOCK_SIZE];
        let mut offset = 0usize;
        for segment in self.geometry.segments(addr, buf.len()) {
            if !self.lookup_cached(segment.disk, segment.block, &mut block) {
                self.fetch_block(segment.disk, segment.block, &mut block)?;
                if self.cache.enabled() {
                    self.cache_insert(segment.disk, segment.block, &block);
                }
            }
            buf[offset..offset + segment.len].copy_from_slice(&block[segment.range()]);
            offset += segment.len;
        }
        Ok(offset)
    }

    /// 将 buf 写入从线性地址 addr 开始的区间, 返回写入的字节数.
    ///
    /// 每个被涉及的块都会经历一次 读-改-写, 并且一定会写到 JBOD 上;
    /// 之后再同步到缓存 (write-through).
    pub fn write(&mut self, addr: u32, buf: &[u8]) -> Result<usize> {
        if !self.session.is_mounted() {
            return Err(JbodError::NotMounted);
        }
        if !self.session.is_write_permitted() {
            return Err(JbodError::WriteNotPermitted);
        }
        self.check_request(addr, buf.len())?;
        if buf.is_empty() {
            return Ok(0);
        }

        let mut block = [0u8; BLOCK_SIZE];
        let mut offset = 0usize;
        for segment in self.geometry.segments(addr, buf.len()) {
            self.fetch_block(segment.disk, segment.block, &mut block)?;
            block[segment.range()].copy_from_slice(&buf[offset..offset + segment.len]);
            self.store_block(segment.disk, segment.block, &mut block)?;

            if self.cache.enabled() {
                if self.cache.contains(segment.disk, segment.block) {
                    self.cache.update(segment.disk, segment.block, &block);
                } else {
                    self.cache_insert(segment.disk, segment.block, &block);
                }
            }
            offset += segment.len;
        }
        Ok(offset)
    }

    /// 缓存命中时 block 中就是块的内容.
    /// 缓存未启用, 缓存为空和未命中都视为未命中.
    fn lookup_cached(&mut self, disk: u32, block: u32, buf: &mut Block) -> bool {
        if !self.cache.enabled() {
            return false;
        }
        match self.cache.lookup(disk, block, buf) {
            Ok(hit) => hit,
            Err(JbodError::CacheEmpty) => false,
            Err(err) => {
                warn!("cache lookup of disk {} block {} failed: {}", disk, block, err);
                false
            }
        }
    }

    /// 缓存的错误不影响读写本身
    fn cache_insert(&mut self, disk: u32, block: u32, buf: &Block) {
        if let Err(err) = self.cache.insert(disk, block, buf) {
            warn!("cache insert of disk {} block {} failed: {}", disk, block, err);
        }
    }

    fn seek(&mut self, disk: u32, block: u32) -> Result<()> {
        self.transport.execute(Opcode::seek_disk(disk), None)?;
        self.transport.execute(Opcode::seek_block(block), None)
    }

    /// 从 JBOD 读取完整的一个块
    fn fetch_block(&mut self, disk: u32, block: u32, buf: &mut Block) -> Result<()> {
        trace!("fetch disk {} block {}", disk, block);
        self.seek(disk, block)?;
        self.transport
            .execute(Opcode::bare(Command::ReadBlock), Some(buf))
    }

    /// 将完整的一个块写到 JBOD
    fn store_block(&mut self, disk: u32, block: u32, buf: &mut Block) -> Result<()> {
        debug!("write through disk {} block {}", disk, block);
        self.seek(disk, block)?;
        self.transport
            .execute(Opcode::bare(Command::WriteBlock), Some(buf))
    }
}
