//! 块缓存层: 在内存中缓存 JBOD 块的数据, 避免重复的远程读取
//!
//! 每一次访问远端的 JBOD 都要经过一次请求/应答的往返, 开销很大.
//! 因此我们把读到的块保存在一个固定容量的缓冲区 [`BlockCache`] 中,
//! 后续对同一个块的读取就可以直接在内存中完成了.
//!
//! 块缓存是 write-through 的: 卷驱动的每一次写入都会先到达 JBOD, 之后再同步到缓存里,
//! 缓存永远不会持有唯一一份被修改过的数据, 因此这里不需要 sync / 写回.
//!
//! 缓存的存储空间在 [`BlockCache::create`] 时一次性分配, 在 [`BlockCache::destroy`] 时一次性释放.
//! 缓存项不会被单独释放, 只会在缓存已满的时候被替换 (LFU).

use log::debug;

use super::{
    Block, Geometry, JbodError, Result, BLOCK_SIZE, CACHE_MAX_ENTRIES, CACHE_MIN_ENTRIES,
};

/// Cached block inside memory
struct CacheEntry {
    /// 该缓存项是否已被占用
    valid: bool,
    disk: u32,
    block: u32,
    /// 块的内容
    data: Block,
    /// 插入时为 1, 之后每次命中或者更新都加 1
    accesses: u32,
}

impl CacheEntry {
    fn empty() -> Self {
        Self {
            valid: false,
            disk: 0,
            block: 0,
            data: [0u8; BLOCK_SIZE],
            accesses: 0,
        }
    }

    fn matches(&self, disk: u32, block: u32) -> bool {
        self.valid && self.disk == disk && self.block == block
    }

    fn fill(&mut self, disk: u32, block: u32, buf: &Block) {
        self.valid = true;
        self.disk = disk;
        self.block = block;
        self.accesses = 1;
        self.data.copy_from_slice(buf);
    }
}

/// 缓存查询的统计信息, 仅用于报告命中率
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct CacheStats {
    pub queries: u64,
    pub hits: u64,
}

impl CacheStats {
    /// hits / queries; 没有任何查询时为 NaN
    pub fn hit_rate(&self) -> f64 {
        self.hits as f64 / self.queries as f64
    }
}

/// 固定容量的块缓存, 以 (磁盘号, 块号) 为键.
///
/// 刚创建的 BlockCache 处于 "未创建" 状态, 需要先调用 [`BlockCache::create`] 分配存储空间.
pub struct BlockCache {
    geometry: Geometry,
    /// None 表示缓存尚未创建
    entries: Option<Box<[CacheEntry]>>,
    stats: CacheStats,
}

impl BlockCache {
    pub fn new(geometry: Geometry) -> Self {
        Self {
            geometry,
            entries: None,
            stats: CacheStats::default(),
        }
    }

    /// 分配 capacity 个空的缓存项, 并清零统计信息
    pub fn create(&mut self, capacity: usize) -> Result<()> {
        if self.entries.is_some() {
            return Err(JbodError::CacheExists);
        }
        if !(CACHE_MIN_ENTRIES..=CACHE_MAX_ENTRIES).contains(&capacity) {
            return Err(JbodError::CacheCapacity(capacity));
        }
        self.entries = Some((0..capacity).map(|_| CacheEntry::empty()).collect());
        self.stats = CacheStats::default();
        debug!("block cache created with {} entries", capacity);
        Ok(())
    }

    /// 一次性释放全部缓存项
    pub fn destroy(&mut self) -> Result<()> {
        if self.entries.take().is_none() {
            return Err(JbodError::CacheMissing);
        }
        debug!("block cache destroyed");
        Ok(())
    }

    /// 卷驱动据此决定是否访问缓存
    pub fn enabled(&self) -> bool {
        self.entries.as_ref().map_or(false, |entries| !entries.is_empty())
    }

    #[cfg(test)]
    fn capacity(&self) -> usize {
        self.entries.as_ref().map_or(0, |entries| entries.len())
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    fn check_location(&self, disk: u32, block: u32) -> Result<()> {
        if !self.geometry.contains(disk, block) {
            return Err(JbodError::BadLocation { disk, block });
        }
        Ok(())
    }

    /// 查找块 (disk, block). 命中时将块的内容复制到 buf 并返回 true, 未命中返回 false.
    ///
    /// 缓存未创建, 缓存为空, 位置越界时返回错误, 此时不计入查询次数.
    pub fn lookup(&mut self, disk: u32, block: u32, buf: &mut Block) -> Result<bool> {
        let entries = self.entries.as_mut().ok_or(JbodError::CacheMissing)?;
        if !entries.iter().any(|entry| entry.valid) {
            return Err(JbodError::CacheEmpty);
        }
        if !self.geometry.contains(disk, block) {
            return Err(JbodError::BadLocation { disk, block });
        }
        self.stats.queries += 1;
        match entries.iter_mut().find(|entry| entry.matches(disk, block)) {
            Some(entry) => {
                buf.copy_from_slice(&entry.data);
                entry.accesses += 1;
                self.stats.hits += 1;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// 是否缓存了块 (disk, block). 不影响访问计数和统计信息.
    pub fn contains(&self, disk: u32, block: u32) -> bool {
        self.entries.as_ref().map_or(false, |entries| {
            entries.iter().any(|entry| entry.matches(disk, block))
        })
    }

    /// 插入一个新的块.
    ///
    /// 如果还有空闲的缓存项, 则占用第一个空闲项;
    /// 否则替换访问次数最少的缓存项 (次数相同时替换下标最小的).
    /// 已经缓存了相同的键时返回错误, 不修改任何缓存项.
    pub fn insert(&mut self, disk: u32, block: u32, buf: &Block) -> Result<()> {
        self.check_location(disk, block)?;
        let entries = self.entries.as_mut().ok_or(JbodError::CacheMissing)?;
        if entries.iter().any(|entry| entry.matches(disk, block)) {
            return Err(JbodError::DuplicateEntry { disk, block });
        }
        if let Some(entry) = entries.iter_mut().find(|entry| !entry.valid) {
            entry.fill(disk, block, buf);
            return Ok(());
        }
        // 缓存已满, 所有缓存项都是有效的.
        // min_by_key 在多个最小值中返回第一个, 正好是下标最小的那一个
        let (idx, victim) = entries
            .iter_mut()
            .enumerate()
            .min_by_key(|(_, entry)| entry.accesses)
            .ok_or(JbodError::CacheMissing)?;
        debug!(
            "evict entry {} (disk {} block {}, {} accesses) for disk {} block {}",
            idx, victim.disk, victim.block, victim.accesses, disk, block
        );
        victim.fill(disk, block, buf);
        Ok(())
    }

    /// 用 buf 覆盖已缓存的块 (disk, block) 的内容. 没有缓存该块时什么也不做.
    pub fn update(&mut self, disk: u32, block: u32, buf: &Block) {
        if let Some(entry) = self
            .entries
            .as_mut()
            .and_then(|entries| entries.iter_mut().find(|entry| entry.matches(disk, block)))
        {
            entry.data.copy_from_slice(buf);
            entry.accesses += 1;
        }
    }

    #[cfg(test)]
    fn accesses(&self, disk: u32, block: u32) -> Option<u32> {
        self.entries
            .as_ref()?
            .iter()
            .find(|entry| entry.matches(disk, block))
            .map(|entry| entry.accesses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_of(byte: u8) -> Block {
        [byte; BLOCK_SIZE]
    }

    fn created(capacity: usize) -> BlockCache {
        let mut cache = BlockCache::new(Geometry::default());
        cache.create(capacity).unwrap();
        cache
    }

    #[test]
    fn create_and_destroy() {
        let mut cache = BlockCache::new(Geometry::default());
        assert!(!cache.enabled());
        assert!(matches!(cache.destroy(), Err(JbodError::CacheMissing)));
        assert!(matches!(cache.create(1), Err(JbodError::CacheCapacity(1))));
        assert!(matches!(
            cache.create(4097),
            Err(JbodError::CacheCapacity(4097))
        ));
        cache.create(2).unwrap();
        assert!(cache.enabled());
        assert!(matches!(cache.create(10), Err(JbodError::CacheExists)));
        assert_eq!(cache.capacity(), 2);
        cache.destroy().unwrap();
        assert!(!cache.enabled());
        assert!(matches!(cache.destroy(), Err(JbodError::CacheMissing)));
        cache.create(4096).unwrap();
        assert_eq!(cache.capacity(), 4096);
    }

    #[test]
    fn lookup_preconditions() {
        let mut cache = BlockCache::new(Geometry::default());
        let mut buf = [0u8; BLOCK_SIZE];
        assert!(matches!(
            cache.lookup(0, 0, &mut buf),
            Err(JbodError::CacheMissing)
        ));
        cache.create(4).unwrap();
        assert!(matches!(
            cache.lookup(0, 0, &mut buf),
            Err(JbodError::CacheEmpty)
        ));
        cache.insert(0, 0, &block_of(1)).unwrap();
        assert!(matches!(
            cache.lookup(16, 0, &mut buf),
            Err(JbodError::BadLocation { disk: 16, block: 0 })
        ));
        assert!(matches!(
            cache.lookup(0, 256, &mut buf),
            Err(JbodError::BadLocation { .. })
        ));
        // 前置条件失败不计入查询
        assert_eq!(cache.stats().queries, 0);
    }

    #[test]
    fn insert_then_lookup() {
        let mut cache = created(8);
        cache.insert(3, 200, &block_of(0xab)).unwrap();
        assert_eq!(cache.accesses(3, 200), Some(1));

        let mut buf = [0u8; BLOCK_SIZE];
        assert!(cache.lookup(3, 200, &mut buf).unwrap());
        assert_eq!(buf, block_of(0xab));
        assert_eq!(cache.accesses(3, 200), Some(2));

        assert!(!cache.lookup(3, 201, &mut buf).unwrap());
        assert_eq!(
            cache.stats(),
            CacheStats {
                queries: 2,
                hits: 1
            }
        );
        assert_eq!(cache.stats().hit_rate(), 0.5);
    }

    #[test]
    fn hit_rate_without_queries() {
        let cache = created(2);
        assert!(cache.stats().hit_rate().is_nan());
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let mut cache = created(4);
        cache.insert(1, 1, &block_of(1)).unwrap();
        assert!(matches!(
            cache.insert(1, 1, &block_of(2)),
            Err(JbodError::DuplicateEntry { disk: 1, block: 1 })
        ));
        let mut buf = [0u8; BLOCK_SIZE];
        assert!(cache.lookup(1, 1, &mut buf).unwrap());
        assert_eq!(buf, block_of(1));
        assert_eq!(cache.accesses(1, 1), Some(2));
    }

    #[test]
    fn insert_preconditions() {
        let mut cache = BlockCache::new(Geometry::default());
        assert!(matches!(
            cache.insert(0, 0, &block_of(0)),
            Err(JbodError::CacheMissing)
        ));
        cache.create(2).unwrap();
        assert!(matches!(
            cache.insert(0, 300, &block_of(0)),
            Err(JbodError::BadLocation { .. })
        ));
    }

    #[test]
    fn evict_least_frequently_used() {
        let mut cache = created(3);
        let mut buf = [0u8; BLOCK_SIZE];
        cache.insert(0, 0, &block_of(0)).unwrap();
        cache.insert(0, 1, &block_of(1)).unwrap();
        cache.insert(0, 2, &block_of(2)).unwrap();
        // 访问次数: (0,0) = 3, (0,1) = 2, (0,2) = 4
        for _ in 0..2 {
            cache.lookup(0, 0, &mut buf).unwrap();
        }
        cache.lookup(0, 1, &mut buf).unwrap();
        for _ in 0..3 {
            cache.lookup(0, 2, &mut buf).unwrap();
        }

        cache.insert(5, 5, &block_of(5)).unwrap();
        assert!(!cache.contains(0, 1));
        assert!(cache.contains(0, 0));
        assert!(cache.contains(0, 2));
        assert_eq!(cache.accesses(5, 5), Some(1));

        // 新插入的块访问次数最少, 下一次被替换的就是它
        cache.insert(6, 6, &block_of(6)).unwrap();
        assert!(!cache.contains(5, 5));
        assert!(cache.lookup(6, 6, &mut buf).unwrap());
        assert_eq!(buf, block_of(6));
    }

    #[test]
    fn evict_earliest_on_tie() {
        let mut cache = created(2);
        let mut buf = [0u8; BLOCK_SIZE];
        cache.insert(0, 0, &block_of(0)).unwrap();
        cache.insert(0, 1, &block_of(1)).unwrap();
        cache.insert(0, 2, &block_of(2)).unwrap();
        assert!(!cache.contains(0, 0));
        assert!(cache.contains(0, 1));

        // (0,2) 在下标 0, (0,1) 在下标 1; 让 (0,1) 比 (0,2) 更常用
        cache.lookup(0, 1, &mut buf).unwrap();
        cache.insert(0, 3, &block_of(3)).unwrap();
        assert!(!cache.contains(0, 2));
        assert!(cache.contains(0, 1));
    }

    #[test]
    fn update_existing_only() {
        let mut cache = created(2);
        cache.update(0, 0, &block_of(9));
        assert!(!cache.contains(0, 0));

        cache.insert(2, 3, &block_of(1)).unwrap();
        cache.update(2, 3, &block_of(7));
        assert_eq!(cache.accesses(2, 3), Some(2));
        let mut buf = [0u8; BLOCK_SIZE];
        assert!(cache.lookup(2, 3, &mut buf).unwrap());
        assert_eq!(buf, block_of(7));
    }

    #[test]
    fn recreate_resets_stats() {
        let mut cache = created(2);
        let mut buf = [0u8; BLOCK_SIZE];
        cache.insert(0, 0, &block_of(0)).unwrap();
        cache.lookup(0, 0, &mut buf).unwrap();
        cache.destroy().unwrap();
        cache.create(2).unwrap();
        assert_eq!(cache.stats(), CacheStats::default());
        assert!(!cache.contains(0, 0));
    }
}
