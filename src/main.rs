use std::sync::Arc;

use shop_render::features::shop::{AssetProvider, HttpImageFetcher, ShopRenderer};
use shop_render::state::AppState;
use shop_render::{ShutdownManager, build_router, config::AppConfig};

fn init_tracing(config: &AppConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.default_directive().into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.logging.format.eq_ignore_ascii_case("compact") {
        builder.compact().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() {
    // 配置只在这里加载一次，之后显式传递
    let config = match AppConfig::load() {
        Ok(c) => Arc::new(c),
        Err(e) => {
            eprintln!("Config init failed: {e}");
            std::process::exit(1);
        }
    };
    init_tracing(&config);

    let shutdown_manager = ShutdownManager::new();
    if let Err(e) = shutdown_manager.start_signal_handler() {
        tracing::error!("信号处理器启动失败: {}", e);
        std::process::exit(1);
    }

    // 字体与命名位图在启动期加载，进程内常驻
    let assets = Arc::new(AssetProvider::load(&config.assets));
    let fetcher = match HttpImageFetcher::new(config.shop.fetch_timeout()) {
        Ok(f) => Arc::new(f),
        Err(e) => {
            tracing::error!("HTTP client init failed: {}", e);
            std::process::exit(1);
        }
    };
    let renderer = Arc::new(ShopRenderer::new(&config, assets, fetcher));
    let app_state = AppState::new(Arc::clone(&config), Arc::clone(&renderer));
    tracing::info!(
        permits = app_state.render_semaphore.available_permits(),
        prefetch_parallelism = config.shop.prefetch_parallelism(),
        template_ttl_secs = config.shop.template_ttl_secs,
        "渲染器已就绪"
    );

    let app = build_router(app_state);

    let addr = config.server_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("Bind address failed {}: {}", addr, e);
            std::process::exit(1);
        });

    tracing::info!("Server: http://{}", addr);
    tracing::info!("Docs: http://{}/docs", addr);
    tracing::info!("Health: http://{}/health", addr);
    tracing::info!("Render API: http://{}{}/shop/render", addr, config.api.prefix);

    let shutdown_timeout = config.shutdown.timeout_duration();
    let renderer_for_cleanup = Arc::clone(&renderer);
    let shutdown_signal = async move {
        let reason = shutdown_manager.wait_for_shutdown().await;
        tracing::info!("接收到退出信号: {:?}，开始优雅退出...", reason);

        match tokio::time::timeout(shutdown_timeout, async move {
            // 释放所有驻留的像素缓冲
            let cache = renderer_for_cleanup.cache();
            let resident = cache.entry_count();
            cache.clear().await;
            tracing::info!(resident, releases = cache.stats().releases, "渲染缓存已清空");
        })
        .await
        {
            Ok(_) => tracing::info!("优雅退出完成"),
            Err(_) => tracing::warn!("优雅退出超时，强制退出"),
        }
    };

    let graceful = axum::serve(listener, app).with_graceful_shutdown(async {
        shutdown_signal.await;
        tracing::info!("开始优雅关闭HTTP服务器...");
    });

    if let Err(e) = graceful.await {
        tracing::error!("服务器运行错误: {}", e);
        std::process::exit(1);
    }

    tracing::info!("服务器已优雅关闭");
}
