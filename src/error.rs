use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// 应用统一错误类型
#[derive(Error, Debug, utoipa::ToSchema)]
pub enum AppError {
    /// 参数校验错误
    #[error("参数校验错误: {0}")]
    Validation(String),

    /// 绘制能力错误（位图/文字/表面），对当前请求是致命的
    #[error("图像渲染错误: {0}")]
    Render(String),

    /// 资源加载错误（字体/位图损坏等）
    #[error("资源错误: {0}")]
    Asset(String),

    /// 内部服务器错误
    #[error("内部错误: {0}")]
    Internal(String),
}

/// 外部图片拉取错误。
///
/// 该错误只在预取阶段内部流转，最终会被占位图替换，不会作为请求错误返回。
#[derive(Error, Debug)]
pub enum FetchError {
    /// 网络请求错误
    #[error("网络错误: {0}")]
    Network(String),
    /// 上游超时
    #[error("超时")]
    Timeout,
    /// 非 2xx 响应
    #[error("上游状态码异常: {0}")]
    Status(u16),
    /// 图片解码失败
    #[error("图片解码失败: {0}")]
    Decode(String),
    /// 条目没有可用的图片地址
    #[error("缺少图片地址")]
    MissingSource,
}

/// 绘制能力错误
#[derive(Error, Debug)]
pub enum DrawError {
    /// 无法分配像素缓冲（尺寸为 0 或过大）
    #[error("无法创建 {width}x{height} 的像素缓冲")]
    Surface { width: u32, height: u32 },
    /// 几何参数非法
    #[error("非法几何参数: {0}")]
    Geometry(String),
    /// 文字排版失败
    #[error("文字排版失败: {0}")]
    Text(String),
    /// 编码失败
    #[error("编码失败: {0}")]
    Encode(String),
    /// 绘制所需的资源不可用
    #[error(transparent)]
    Asset(#[from] AssetError),
}

/// 资源加载错误
#[derive(Error, Debug)]
pub enum AssetError {
    /// I/O 错误
    #[error("读取资源 `{name}` 失败: {message}")]
    Io { name: String, message: String },
    /// 资源已损坏，无法解码
    #[error("资源 `{name}` 解码失败: {message}")]
    Corrupt { name: String, message: String },
}

/// RFC7807 风格的错误响应（Problem Details）。
#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProblemDetails {
    /// 问题类型（URI）。若无更细分的类型，可使用 about:blank。
    #[serde(rename = "type")]
    #[schema(example = "about:blank")]
    pub type_url: String,

    /// 简短标题，用于概括错误。
    #[schema(example = "Validation Failed")]
    pub title: String,

    /// HTTP 状态码（与响应 status 一致）。
    #[schema(example = 422)]
    pub status: u16,

    /// 人类可读的详细信息。
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,

    /// 稳定的错误码，用于程序化处理。
    #[schema(example = "VALIDATION_FAILED")]
    pub code: String,

    /// 请求追踪 ID。
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Render(_) | AppError::Asset(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn stable_code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_FAILED",
            AppError::Render(_) => "RENDER_FAILED",
            AppError::Asset(_) => "ASSET_FAILED",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn title(&self) -> &'static str {
        match self.status_code() {
            StatusCode::UNPROCESSABLE_ENTITY => "Validation Failed",
            StatusCode::INTERNAL_SERVER_ERROR => "Internal Server Error",
            _ => "Error",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let problem = ProblemDetails {
            type_url: "about:blank".to_string(),
            title: self.title().to_string(),
            status: status.as_u16(),
            detail: Some(self.to_string()),
            code: self.stable_code().to_string(),
            request_id: crate::request_id::current_request_id(),
        };

        let mut res = Json(problem).into_response();
        *res.status_mut() = status;
        res.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/problem+json"),
        );
        res
    }
}

// =============== Error conversions ===============

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else if let Some(status) = err.status() {
            FetchError::Status(status.as_u16())
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

impl From<image::ImageError> for FetchError {
    fn from(err: image::ImageError) -> Self {
        FetchError::Decode(err.to_string())
    }
}

impl From<DrawError> for AppError {
    fn from(err: DrawError) -> Self {
        match err {
            DrawError::Asset(e) => e.into(),
            other => AppError::Render(other.to_string()),
        }
    }
}

impl From<AssetError> for AppError {
    fn from(err: AssetError) -> Self {
        AppError::Asset(err.to_string())
    }
}
