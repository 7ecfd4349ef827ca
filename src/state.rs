use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::config::AppConfig;
use crate::features::shop::ShopRenderer;

/// 聚合的应用共享状态
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    /// 进程级渲染器（持有缓存、命名锁与资源）
    pub renderer: Arc<ShopRenderer>,
    /// 控制并发渲染的信号量（限制 CPU 密集型任务数量）
    pub render_semaphore: Arc<Semaphore>,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, renderer: Arc<ShopRenderer>) -> Self {
        let permits = config.shop.render_permits();
        Self {
            config,
            renderer,
            render_semaphore: Arc::new(Semaphore::new(permits)),
        }
    }
}
