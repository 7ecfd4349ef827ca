//! 渲染流水线编排。
//!
//! 请求 → 命名锁 `template:<hash>` → 共享模板缓存 → 未命中时预取 + 布局并成对写入 →
//! 命名锁（语言键）→ 语言模板缓存 → 未命中时叠加本地化内容 → 最终合成（从不缓存）。
//! 共享模板的锁覆盖“检查-构建-写入”全过程，调用方只会看到“尚未构建”或完整的（位图, 元数据）对。

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tiny_skia::Pixmap;

use super::assets::AssetProvider;
use super::cache::{ArtifactCache, CacheStats, CachedArtifact};
use super::compose::RequestCompositor;
use super::drawing::encode_png;
use super::fetch::ImageFetcher;
use super::layout::{LayoutEngine, LayoutMetrics, LocationMetadata};
use super::locale::LocaleCompositor;
use super::named_lock::NamedLock;
use super::prefetch::{ImagePrefetcher, PrefetchSettings, PrefetchStats};
use super::template_key::TemplateKey;
use super::types::ShopRequest;
use crate::config::AppConfig;
use crate::error::AppError;

/// 渲染器统计快照
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RendererStats {
    pub cache: CacheStats,
    pub prefetch: PrefetchStats,
    /// 共享模板实际构建次数
    pub layout_builds: u64,
    /// 语言模板实际构建次数
    pub locale_builds: u64,
}

type SharedTemplate = (Arc<Pixmap>, Arc<LocationMetadata>, u64);

/// 进程级渲染器：启动时构造一次，经由 `AppState` 注入。
pub struct ShopRenderer {
    cache: ArtifactCache,
    locks: NamedLock,
    prefetcher: ImagePrefetcher,
    layout: Arc<LayoutEngine>,
    locale: Arc<LocaleCompositor>,
    compositor: Arc<RequestCompositor>,
    assets: Arc<AssetProvider>,
    template_ttl: Duration,
    optimize_speed: bool,
    generation: AtomicU64,
    layout_builds: AtomicU64,
    locale_builds: AtomicU64,
}

impl ShopRenderer {
    pub fn new(config: &AppConfig, assets: Arc<AssetProvider>, fetcher: Arc<dyn ImageFetcher>) -> Self {
        let cache = ArtifactCache::new(config.shop.cache_max_bytes);
        Self::with_cache(config, assets, fetcher, cache)
    }

    /// 使用外部构造的缓存（例如带释放钩子的缓存）
    pub fn with_cache(
        config: &AppConfig,
        assets: Arc<AssetProvider>,
        fetcher: Arc<dyn ImageFetcher>,
        cache: ArtifactCache,
    ) -> Self {
        let locks = NamedLock::new();
        let metrics = LayoutMetrics::default();
        let prefetcher = ImagePrefetcher::new(
            cache.clone(),
            locks.clone(),
            fetcher,
            PrefetchSettings::from_config(&config.shop),
        );
        Self {
            cache,
            locks,
            prefetcher,
            compositor: Arc::new(RequestCompositor::new(&metrics)),
            layout: Arc::new(LayoutEngine::new(metrics, config.branding.footer_text.clone())),
            locale: Arc::new(LocaleCompositor::new()),
            assets,
            template_ttl: config.shop.template_ttl(),
            optimize_speed: config.shop.optimize_speed,
            generation: AtomicU64::new(0),
            layout_builds: AtomicU64::new(0),
            locale_builds: AtomicU64::new(0),
        }
    }

    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }

    pub fn stats(&self) -> RendererStats {
        RendererStats {
            cache: self.cache.stats(),
            prefetch: self.prefetcher.stats(),
            layout_builds: self.layout_builds.load(Ordering::Relaxed),
            locale_builds: self.locale_builds.load(Ordering::Relaxed),
        }
    }

    /// 渲染并编码为 PNG
    pub async fn render_png(&self, request: ShopRequest) -> Result<Vec<u8>, AppError> {
        let pixmap = self.render(request).await?;
        let fast = self.optimize_speed;
        tokio::task::spawn_blocking(move || encode_png(&pixmap, fast))
            .await
            .map_err(join_error)?
            .map_err(AppError::from)
    }

    /// 渲染最终像素缓冲：要么得到完整图片，要么整体失败。
    pub async fn render(&self, mut request: ShopRequest) -> Result<Pixmap, AppError> {
        let started = Instant::now();
        let dropped = request.sanitize()?;
        if dropped > 0 {
            tracing::warn!(dropped, "请求中存在不合法的条目，已剔除");
        }

        let key = TemplateKey::from_sections(&request.sections);
        let (template, meta, generation) = self.shared_template(&key, &mut request).await?;
        let locale_template = self
            .locale_template(&key, &request, template, meta, generation)
            .await?;

        let compositor = Arc::clone(&self.compositor);
        let assets = Arc::clone(&self.assets);
        let locale = request.locale.clone();
        let pixmap = tokio::task::spawn_blocking(move || {
            compositor.compose(&locale_template, &request, &assets)
        })
        .await
        .map_err(join_error)??;

        tracing::info!(
            template = %key,
            locale = %locale,
            generation,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "商店图渲染完成"
        );
        Ok(pixmap)
    }

    async fn shared_template(
        &self,
        key: &TemplateKey,
        request: &mut ShopRequest,
    ) -> Result<SharedTemplate, AppError> {
        let _guard = self.locks.acquire(&key.template_cache_key()).await;

        if request.fresh {
            tracing::debug!(template = %key, "全新商店版本，绕过共享模板缓存");
        } else if let Some(hit) = self.lookup_template(key).await {
            tracing::debug!(template = %key, generation = hit.2, "共享模板缓存命中");
            return Ok(hit);
        }

        let started = Instant::now();
        self.prefetcher.prefetch(&mut request.sections).await;

        let layout = Arc::clone(&self.layout);
        let assets = Arc::clone(&self.assets);
        let sections = request.sections.clone();
        let (pixmap, meta) = tokio::task::spawn_blocking(move || layout.build(&sections, &assets))
            .await
            .map_err(join_error)??;
        self.layout_builds.fetch_add(1, Ordering::Relaxed);

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let pixmap = Arc::new(pixmap);
        let meta = Arc::new(meta);
        // 位图与元数据同代数、同 TTL，成对写入
        self.cache
            .set(
                key.template_cache_key(),
                CachedArtifact::bitmap(Arc::clone(&pixmap), self.template_ttl, generation),
            )
            .await;
        self.cache
            .set(
                key.metadata_cache_key(),
                CachedArtifact::layout(Arc::clone(&meta), self.template_ttl, generation),
            )
            .await;

        tracing::info!(
            template = %key,
            generation,
            entries = meta.entry_count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "共享模板构建完成"
        );
        Ok((pixmap, meta, generation))
    }

    /// 只有位图与元数据同时存在、代数一致且尺寸匹配才算命中；否则清掉残留并视为未命中。
    async fn lookup_template(&self, key: &TemplateKey) -> Option<SharedTemplate> {
        let template_key = key.template_cache_key();
        let meta_key = key.metadata_cache_key();
        let pixmap = self.cache.get_bitmap(&template_key).await;
        let meta = self.cache.get_layout(&meta_key).await;

        match (pixmap, meta) {
            (Some((pixmap, g1)), Some((meta, g2))) if g1 == g2 && meta.matches(&pixmap) => {
                Some((pixmap, meta, g1))
            }
            (None, None) => None,
            _ => {
                tracing::warn!(template = %key, "共享模板与元数据不一致，按未命中重建");
                self.cache.invalidate(&template_key).await;
                self.cache.invalidate(&meta_key).await;
                None
            }
        }
    }

    async fn locale_template(
        &self,
        key: &TemplateKey,
        request: &ShopRequest,
        template: Arc<Pixmap>,
        meta: Arc<LocationMetadata>,
        generation: u64,
    ) -> Result<Arc<Pixmap>, AppError> {
        let locale_key = key.locale_cache_key(&request.locale, generation);
        let _guard = self.locks.acquire(&locale_key).await;

        if let Some((pixmap, _)) = self.cache.get_bitmap(&locale_key).await {
            tracing::debug!(key = %locale_key, "语言模板缓存命中");
            return Ok(pixmap);
        }

        let locale = Arc::clone(&self.locale);
        let assets = Arc::clone(&self.assets);
        let sections = request.sections.clone();
        let tag = request.locale.clone();
        let pixmap = tokio::task::spawn_blocking(move || {
            locale.compose(&template, &meta, &sections, &tag, &assets)
        })
        .await
        .map_err(join_error)??;
        self.locale_builds.fetch_add(1, Ordering::Relaxed);

        let pixmap = Arc::new(pixmap);
        self.cache
            .set(
                locale_key,
                CachedArtifact::bitmap(Arc::clone(&pixmap), self.template_ttl, generation),
            )
            .await;
        Ok(pixmap)
    }
}

fn join_error(err: tokio::task::JoinError) -> AppError {
    AppError::Internal(format!("渲染任务异常: {err}"))
}
