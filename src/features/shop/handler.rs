use std::time::Instant;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderValue, StatusCode, header},
    response::IntoResponse,
    routing::post,
};

use crate::{error::AppError, state::AppState};

use super::types::ShopRequest;

#[utoipa::path(
    post,
    path = "/shop/render",
    summary = "渲染商店图",
    description = "按分区/条目数据渲染商店图（PNG）。共享模板按分区组成缓存，语言模板按语言缓存；creatorCode 与背景每次重新合成。fresh=true 时强制重建共享模板。",
    request_body = ShopRequest,
    responses(
        (status = 200, description = "PNG bytes of the shop board", content_type = "image/png"),
        (status = 422, description = "请求参数不合法", body = crate::error::ProblemDetails),
        (status = 500, description = "渲染失败", body = crate::error::ProblemDetails)
    ),
    tag = "Shop"
)]
pub async fn render_shop(
    State(state): State<AppState>,
    Json(req): Json<ShopRequest>,
) -> Result<impl IntoResponse, AppError> {
    let t_total = Instant::now();
    let locale = req.locale.clone();
    let sections = req.sections.len();

    let t_wait = Instant::now();
    let _permit = state
        .render_semaphore
        .clone()
        .acquire_owned()
        .await
        .map_err(|e| AppError::Internal(format!("获取渲染信号量失败: {e}")))?;
    let wait_ms = t_wait.elapsed().as_millis() as u64;

    let png = state.renderer.render_png(req).await?;

    tracing::info!(
        locale = %locale,
        sections,
        bytes = png.len(),
        wait_ms,
        total_ms = t_total.elapsed().as_millis() as u64,
        "商店图请求完成"
    );
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, HeaderValue::from_static("image/png"))],
        png,
    ))
}

pub fn create_shop_router() -> Router<AppState> {
    Router::new().route("/shop/render", post(render_shop))
}
