/// 统一错误处理模块
pub mod error;

/// 配置模块
pub mod config;

/// 功能聚合模块
pub mod features;

/// 应用状态聚合模块
pub mod state;

/// 优雅退出管理模块
pub mod shutdown;

/// 请求追踪 ID 中间件
pub mod request_id;

/// OpenAPI 文档
pub mod openapi;

// 导出常用类型供外部使用
pub use config::AppConfig;
pub use error::AppError;
pub use shutdown::{ShutdownManager, ShutdownReason};

use axum::{Router, routing::get};
use tower_http::compression::CompressionLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::state::AppState;

/// 响应压缩策略：明确排除不该压缩的响应（图片本身已压缩）。
pub fn compression_predicate() -> impl tower_http::compression::predicate::Predicate {
    use tower_http::compression::predicate::{NotForContentType, Predicate, SizeAbove};

    SizeAbove::default()
        .and(NotForContentType::GRPC)
        .and(NotForContentType::IMAGES)
        .and(NotForContentType::SSE)
        .and(NotForContentType::const_new("application/octet-stream"))
}

/// 组装完整路由（main 与集成测试共用）
pub fn build_router(state: AppState) -> Router {
    let prefix = state.config.api.prefix.clone();
    let api_router = Router::<AppState>::new().merge(features::shop::create_shop_router());

    Router::<AppState>::new()
        .route("/health", get(features::health::health_check))
        .nest(&prefix, api_router)
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", openapi::ApiDoc::openapi()))
        .with_state(state)
        .layer(axum::middleware::from_fn(request_id::request_id_middleware))
        .layer(CompressionLayer::new().compress_when(compression_predicate()))
}
