//! 渲染产物缓存。
//!
//! 位图以引用计数缓冲（`Arc<Pixmap>`）的形式驻留，缓存是驻留期间唯一的所有者登记处：
//! 条目因 TTL 到期、显式失效、被替换或容量淘汰而离开缓存时，淘汰监听器恰好调用一次
//! 释放钩子并丢弃缓存持有的那一份引用。读者拿到的是共享只读句柄，需要绘制时必须
//! 先复制出私有副本。

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use moka::Expiry;
use moka::future::Cache;
use moka::notification::RemovalCause;
use tiny_skia::Pixmap;

use super::layout::LocationMetadata;

/// 缓存产物的载荷
#[derive(Clone)]
pub enum Payload {
    /// 像素缓冲（共享模板 / 语言模板 / 单品图）
    Bitmap(Arc<Pixmap>),
    /// 与共享模板配对的布局元数据
    Layout(Arc<LocationMetadata>),
}

/// 缓存条目
#[derive(Clone)]
pub struct CachedArtifact {
    pub payload: Payload,
    /// 自写入起算的存活时间（不随读取续期）
    pub ttl: Duration,
    /// 构建代数：同一次构建产出的模板与元数据共享同一代数
    pub generation: u64,
}

impl CachedArtifact {
    pub fn bitmap(pixmap: Arc<Pixmap>, ttl: Duration, generation: u64) -> Self {
        Self {
            payload: Payload::Bitmap(pixmap),
            ttl,
            generation,
        }
    }

    pub fn layout(meta: Arc<LocationMetadata>, ttl: Duration, generation: u64) -> Self {
        Self {
            payload: Payload::Layout(meta),
            ttl,
            generation,
        }
    }

    pub fn as_bitmap(&self) -> Option<&Arc<Pixmap>> {
        match &self.payload {
            Payload::Bitmap(p) => Some(p),
            Payload::Layout(_) => None,
        }
    }

    pub fn as_layout(&self) -> Option<&Arc<LocationMetadata>> {
        match &self.payload {
            Payload::Layout(m) => Some(m),
            Payload::Bitmap(_) => None,
        }
    }

    /// 缓存容量加权：位图按像素字节数，元数据按固定小权重
    fn weight(&self) -> u32 {
        match &self.payload {
            Payload::Bitmap(p) => u32::try_from(p.data().len()).unwrap_or(u32::MAX),
            Payload::Layout(m) => u32::try_from(m.entry_count() * 64 + 256).unwrap_or(u32::MAX),
        }
    }
}

/// 像素缓冲离开缓存时调用的释放钩子（键、被释放的缓冲、原因）
pub type ReleaseHook = Arc<dyn Fn(&str, &Pixmap, RemovalCause) + Send + Sync>;

/// 按条目自带 TTL 计算过期；读取不续期，覆盖写入重新计时。
struct PerEntryTtl;

impl Expiry<String, CachedArtifact> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CachedArtifact,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CachedArtifact,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    releases: AtomicU64,
}

/// 缓存统计快照
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// 已执行的像素缓冲释放次数
    pub releases: u64,
}

/// 进程级产物缓存（可廉价克隆）
#[derive(Clone)]
pub struct ArtifactCache {
    inner: Cache<String, CachedArtifact>,
    counters: Arc<Counters>,
}

impl ArtifactCache {
    pub fn new(max_bytes: u64) -> Self {
        Self::build(max_bytes, None)
    }

    /// 附带外部释放钩子（在内置计数与日志之后调用）
    pub fn with_release_hook(max_bytes: u64, hook: ReleaseHook) -> Self {
        Self::build(max_bytes, Some(hook))
    }

    fn build(max_bytes: u64, hook: Option<ReleaseHook>) -> Self {
        let counters = Arc::new(Counters::default());
        let listener_counters = Arc::clone(&counters);
        let inner = Cache::builder()
            .weigher(|_k, v: &CachedArtifact| v.weight())
            .max_capacity(max_bytes)
            .expire_after(PerEntryTtl)
            .eviction_listener(move |key: Arc<String>, value: CachedArtifact, cause| {
                if let Payload::Bitmap(pixmap) = &value.payload {
                    listener_counters.releases.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(
                        key = %key,
                        cause = ?cause,
                        bytes = pixmap.data().len(),
                        "释放缓存像素缓冲"
                    );
                    if let Some(hook) = hook.as_ref() {
                        hook(key.as_str(), &**pixmap, cause);
                    }
                }
                // value 在此析构，缓存持有的那份引用随之归还
            })
            .build();
        Self { inner, counters }
    }

    /// 未命中时顺带执行维护任务，已过期条目的释放不会滞后于“不可见”
    pub async fn get(&self, key: &str) -> Option<CachedArtifact> {
        match self.inner.get(key).await {
            Some(found) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Some(found)
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                self.inner.run_pending_tasks().await;
                None
            }
        }
    }

    /// 读取位图条目；载荷类型不符视为缺失
    pub async fn get_bitmap(&self, key: &str) -> Option<(Arc<Pixmap>, u64)> {
        let artifact = self.get(key).await?;
        let pixmap = artifact.as_bitmap()?.clone();
        Some((pixmap, artifact.generation))
    }

    /// 读取元数据条目；载荷类型不符视为缺失
    pub async fn get_layout(&self, key: &str) -> Option<(Arc<LocationMetadata>, u64)> {
        let artifact = self.get(key).await?;
        let meta = artifact.as_layout()?.clone();
        Some((meta, artifact.generation))
    }

    pub async fn set(&self, key: impl Into<String>, artifact: CachedArtifact) {
        self.inner.insert(key.into(), artifact).await;
    }

    /// 显式失效
    pub async fn invalidate(&self, key: &str) {
        self.inner.invalidate(key).await;
    }

    /// 清空全部条目并立即执行释放（退出时调用）
    pub async fn clear(&self) {
        self.inner.invalidate_all();
        self.inner.run_pending_tasks().await;
    }

    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }

    /// 执行挂起的维护任务（过期清理与淘汰通知）
    pub async fn run_pending_tasks(&self) {
        self.inner.run_pending_tasks().await;
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            releases: self.counters.releases.load(Ordering::Relaxed),
        }
    }
}
