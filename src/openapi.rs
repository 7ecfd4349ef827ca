use utoipa::openapi::server::{ServerBuilder, ServerVariableBuilder};
use utoipa::{Modify, OpenApi};

/// 为 Swagger UI 提供正确的“业务接口前缀”Servers 配置。
///
/// - 业务接口默认前缀为 `/api/v1`（对应 `config.api.prefix` / `APP_API_PREFIX`）。
/// - `/health` 不带前缀，因此额外提供 `/` 作为备用 server。
struct ApiServers;

impl Modify for ApiServers {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let api = ServerBuilder::new()
            .url("{api_prefix}")
            .description(Some("业务接口（默认 /api/v1）"))
            .parameter(
                "api_prefix",
                ServerVariableBuilder::new()
                    .default_value("/api/v1")
                    .description(Some(
                        "业务接口前缀：对应 config.api.prefix（可通过 APP_API_PREFIX 覆盖）",
                    )),
            )
            .build();

        let root = ServerBuilder::new()
            .url("/")
            .description(Some("根路径（用于 /health 等不带前缀接口）"))
            .build();

        openapi.servers = Some(vec![api, root]);
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::features::health::handler::health_check,
        crate::features::shop::handler::render_shop,
    ),
    components(schemas(
        crate::error::ProblemDetails,
        crate::features::shop::ShopRequest,
        crate::features::shop::Section,
        crate::features::shop::Entry,
        crate::features::shop::Price,
        crate::features::shop::Banner,
        crate::features::shop::ImageSource,
        crate::features::shop::CreatorCode,
        crate::features::health::HealthResponse,
    )),
    modifiers(&ApiServers),
    tags(
        (name = "Shop", description = "商店图渲染：共享模板 / 语言模板两级缓存 + 每请求合成。"),
        (name = "Health", description = "健康检查：服务探活。"),
    ),
    info(
        title = "Shop Render API",
        version = env!("CARGO_PKG_VERSION"),
        description = "商店图渲染服务（Axum + utoipa）。除 /health 外，业务接口挂载在 `config.api.prefix`（默认 /api/v1）下，OpenAPI 的 paths 不包含该前缀。"
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::ApiDoc;
    use utoipa::OpenApi;

    #[test]
    fn document_lists_render_and_health_paths() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/shop/render"));
        assert!(doc.paths.paths.contains_key("/health"));
        assert_eq!(doc.servers.as_ref().map(Vec::len), Some(2));
    }
}
