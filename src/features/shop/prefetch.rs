//! 单品图片预取。
//!
//! 以有限并发处理一次请求的全部条目；每个条目在自己的命名锁下查缓存、拉取、
//! 写缓存，因此并发请求共享同一条目时只会拉取一次。整个阶段是屏障：
//! [`ImagePrefetcher::prefetch`] 返回时所有条目都已解析完毕。

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::stream;
use tiny_skia::Pixmap;

use super::cache::{ArtifactCache, CachedArtifact};
use super::drawing::decode_pixmap;
use super::fetch::ImageFetcher;
use super::named_lock::NamedLock;
use super::template_key::item_image_key;
use super::types::{ImageSource, Section};
use crate::config::ShopRenderConfig;
use crate::error::FetchError;

/// 预取参数
#[derive(Debug, Clone)]
pub struct PrefetchSettings {
    pub parallelism: usize,
    pub ttl: Duration,
    /// 解码后缩放到的边长（正方形），同时也是占位图尺寸
    pub image_size: u32,
    pub fetch_timeout: Duration,
    pub optimize_speed: bool,
}

impl PrefetchSettings {
    pub fn from_config(config: &ShopRenderConfig) -> Self {
        Self {
            parallelism: config.prefetch_parallelism(),
            ttl: config.item_image_ttl(),
            image_size: config.item_image_size.max(1),
            fetch_timeout: config.fetch_timeout(),
            optimize_speed: config.optimize_speed,
        }
    }
}

/// 预取计数快照
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefetchStats {
    /// 实际发出的拉取次数（含备用地址）
    pub fetches: u64,
    /// 以占位图替代的条目次数
    pub placeholders: u64,
}

pub struct ImagePrefetcher {
    cache: ArtifactCache,
    locks: NamedLock,
    fetcher: Arc<dyn ImageFetcher>,
    settings: PrefetchSettings,
    fetches: AtomicU64,
    placeholders: AtomicU64,
}

impl ImagePrefetcher {
    pub fn new(
        cache: ArtifactCache,
        locks: NamedLock,
        fetcher: Arc<dyn ImageFetcher>,
        settings: PrefetchSettings,
    ) -> Self {
        Self {
            cache,
            locks,
            fetcher,
            settings,
            fetches: AtomicU64::new(0),
            placeholders: AtomicU64::new(0),
        }
    }

    /// 为所有分区的全部条目就地填充 `resolved_image`，全部完成后才返回。
    pub async fn prefetch(&self, sections: &mut [Section]) {
        let entries = sections.iter_mut().flat_map(|s| s.entries.iter_mut());
        stream::iter(entries)
            .for_each_concurrent(self.settings.parallelism.max(1), |entry| async move {
                entry.resolved_image = self.resolve(&entry.id, &entry.image).await;
            })
            .await;
    }

    async fn resolve(&self, entry_id: &str, source: &ImageSource) -> Option<Arc<Pixmap>> {
        let key = item_image_key(entry_id);
        let _guard = self.locks.acquire(&key).await;

        if let Some((pixmap, _)) = self.cache.get_bitmap(&key).await {
            return Some(pixmap);
        }

        let pixmap = match self.fetch_with_fallback(source).await {
            Ok(pixmap) => pixmap,
            Err(e) => {
                tracing::warn!(entry = entry_id, error = %e, "单品图片获取失败，使用占位图");
                self.placeholders.fetch_add(1, Ordering::Relaxed);
                self.placeholder()?
            }
        };
        let pixmap = Arc::new(pixmap);
        // 写入缓存后才释放锁，等待同一条目的请求会直接命中
        self.cache
            .set(key, CachedArtifact::bitmap(Arc::clone(&pixmap), self.settings.ttl, 0))
            .await;
        Some(pixmap)
    }

    /// 首选地址失败（或缺失）时尝试一次备用地址，不做其他重试。
    async fn fetch_with_fallback(&self, source: &ImageSource) -> Result<Pixmap, FetchError> {
        let primary = source.primary.as_deref().filter(|u| !u.trim().is_empty());
        let fallback = source.fallback.as_deref().filter(|u| !u.trim().is_empty());
        match (primary, fallback) {
            (Some(url), fallback) => match self.fetch_one(url).await {
                Ok(pixmap) => Ok(pixmap),
                Err(e) => match fallback {
                    Some(alt) => {
                        tracing::debug!(url, error = %e, "首选地址失败，改用备用地址");
                        self.fetch_one(alt).await
                    }
                    None => Err(e),
                },
            },
            (None, Some(url)) => self.fetch_one(url).await,
            (None, None) => Err(FetchError::MissingSource),
        }
    }

    async fn fetch_one(&self, url: &str) -> Result<Pixmap, FetchError> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        let bytes = tokio::time::timeout(self.settings.fetch_timeout, self.fetcher.fetch(url))
            .await
            .map_err(|_| FetchError::Timeout)??;

        let size = self.settings.image_size;
        let fast = self.settings.optimize_speed;
        tokio::task::spawn_blocking(move || decode_pixmap(&bytes, Some((size, size)), fast))
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))?
            .map_err(FetchError::from)
    }

    /// 固定尺寸的透明占位图
    fn placeholder(&self) -> Option<Pixmap> {
        Pixmap::new(self.settings.image_size, self.settings.image_size)
    }

    pub fn stats(&self) -> PrefetchStats {
        PrefetchStats {
            fetches: self.fetches.load(Ordering::Relaxed),
            placeholders: self.placeholders.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::super::drawing::encode_png;
    use super::super::fetch::ImageFetcher;
    use crate::error::FetchError;
    use futures_util::future::BoxFuture;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tiny_skia::{Color, Pixmap};

    pub fn png_bytes(color: Color) -> Vec<u8> {
        let mut pixmap = Pixmap::new(32, 32).expect("pixmap");
        pixmap.fill(color);
        encode_png(&pixmap, true).expect("png")
    }

    /// 内存假实现：未登记的 URL 返回网络错误；记录每个 URL 的请求次数与最大并发
    #[derive(Default)]
    pub struct FakeFetcher {
        pub bodies: HashMap<String, Vec<u8>>,
        pub delay: Duration,
        pub calls: Mutex<HashMap<String, usize>>,
        pub in_flight: AtomicUsize,
        pub max_in_flight: AtomicUsize,
    }

    impl FakeFetcher {
        pub fn with(mut self, url: &str, body: Vec<u8>) -> Self {
            self.bodies.insert(url.to_string(), body);
            self
        }

        pub fn calls_for(&self, url: &str) -> usize {
            self.calls.lock().expect("calls").get(url).copied().unwrap_or(0)
        }
    }

    impl ImageFetcher for FakeFetcher {
        fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Vec<u8>, FetchError>> {
            Box::pin(async move {
                *self.calls.lock().expect("calls").entry(url.to_string()).or_default() += 1;
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_in_flight.fetch_max(now, Ordering::SeqCst);
                if !self.delay.is_zero() {
                    tokio::time::sleep(self.delay).await;
                }
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                self.bodies
                    .get(url)
                    .cloned()
                    .ok_or_else(|| FetchError::Network(format!("unreachable: {url}")))
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{FakeFetcher, png_bytes};
    use super::{ImagePrefetcher, PrefetchSettings};
    use crate::features::shop::cache::ArtifactCache;
    use crate::features::shop::named_lock::NamedLock;
    use crate::features::shop::types::fixtures::{entry, section};
    use crate::features::shop::types::ImageSource;
    use std::sync::Arc;
    use std::time::Duration;
    use tiny_skia::Color;

    fn settings(parallelism: usize) -> PrefetchSettings {
        PrefetchSettings {
            parallelism,
            ttl: Duration::from_secs(600),
            image_size: 64,
            fetch_timeout: Duration::from_millis(500),
            optimize_speed: true,
        }
    }

    fn prefetcher(fetcher: Arc<FakeFetcher>, parallelism: usize) -> ImagePrefetcher {
        ImagePrefetcher::new(
            ArtifactCache::new(64 * 1024 * 1024),
            NamedLock::new(),
            fetcher,
            settings(parallelism),
        )
    }

    #[tokio::test]
    async fn failing_entry_gets_placeholder_and_siblings_still_resolve() {
        let fetcher = Arc::new(
            FakeFetcher::default()
                .with("https://img.test/a.png", png_bytes(Color::from_rgba8(255, 0, 0, 255)))
                .with("https://img.test/c.png", png_bytes(Color::from_rgba8(0, 0, 255, 255))),
        );
        let p = prefetcher(fetcher.clone(), 2);
        let mut sections = vec![section("s", vec![entry("a", 1.0), entry("b", 1.0), entry("c", 0.5)])];
        p.prefetch(&mut sections).await;

        for e in &sections[0].entries {
            let image = e.resolved_image.as_ref().expect("every entry resolved");
            assert_eq!((image.width(), image.height()), (64, 64));
        }
        let placeholder = sections[0].entries[1].resolved_image.as_ref().expect("b");
        assert_eq!(placeholder.pixel(10, 10).expect("px").alpha(), 0);
        let real = sections[0].entries[0].resolved_image.as_ref().expect("a");
        assert_eq!(real.pixel(10, 10).expect("px").red(), 255);
        assert_eq!(p.stats().placeholders, 1);
    }

    #[tokio::test]
    async fn falls_back_once_when_primary_fails() {
        let fetcher = Arc::new(
            FakeFetcher::default().with("https://cdn.test/fallback.png", png_bytes(Color::WHITE)),
        );
        let p = prefetcher(fetcher.clone(), 1);
        let mut e = entry("x", 1.0);
        e.image = ImageSource {
            primary: Some("https://img.test/broken.png".to_string()),
            fallback: Some("https://cdn.test/fallback.png".to_string()),
        };
        let mut sections = vec![section("s", vec![e])];
        p.prefetch(&mut sections).await;

        assert_eq!(fetcher.calls_for("https://img.test/broken.png"), 1);
        assert_eq!(fetcher.calls_for("https://cdn.test/fallback.png"), 1);
        assert_eq!(p.stats().placeholders, 0);
    }

    #[tokio::test]
    async fn concurrent_requests_sharing_an_entry_fetch_once() {
        let fetcher = Arc::new(FakeFetcher {
            delay: Duration::from_millis(30),
            ..FakeFetcher::default()
        }
        .with("https://img.test/shared.png", png_bytes(Color::WHITE)));
        let p = Arc::new(prefetcher(fetcher.clone(), 4));

        let mut tasks = Vec::new();
        for _ in 0..6 {
            let p = p.clone();
            tasks.push(tokio::spawn(async move {
                let mut sections = vec![section("s", vec![entry("shared", 1.0)])];
                p.prefetch(&mut sections).await;
                sections[0].entries[0].resolved_image.clone().expect("resolved")
            }));
        }
        let mut images = Vec::new();
        for t in tasks {
            images.push(t.await.expect("task"));
        }
        assert_eq!(fetcher.calls_for("https://img.test/shared.png"), 1);
        assert!(images.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[tokio::test]
    async fn parallelism_is_bounded() {
        let mut fake = FakeFetcher {
            delay: Duration::from_millis(20),
            ..FakeFetcher::default()
        };
        let mut entries = Vec::new();
        for i in 0..10 {
            let id = format!("e{i}");
            fake = fake.with(&format!("https://img.test/{id}.png"), png_bytes(Color::WHITE));
            entries.push(entry(&id, 1.0));
        }
        let fetcher = Arc::new(fake);
        let p = prefetcher(fetcher.clone(), 3);
        let mut sections = vec![section("s", entries)];
        p.prefetch(&mut sections).await;

        let max = fetcher.max_in_flight.load(std::sync::atomic::Ordering::SeqCst);
        assert!(max <= 3 && max >= 1, "max in flight = {max}");
        assert_eq!(p.stats().fetches, 10);
    }

    #[tokio::test]
    async fn slow_fetch_times_out_into_placeholder() {
        let fetcher = Arc::new(FakeFetcher {
            delay: Duration::from_secs(2),
            ..FakeFetcher::default()
        }
        .with("https://img.test/slow.png", png_bytes(Color::WHITE)));
        let p = prefetcher(fetcher, 1);
        let mut sections = vec![section("s", vec![entry("slow", 1.0)])];
        p.prefetch(&mut sections).await;
        assert!(sections[0].entries[0].resolved_image.is_some());
        assert_eq!(p.stats().placeholders, 1);
    }
}
