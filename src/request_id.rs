use axum::{extract::Request, http::HeaderValue, middleware::Next, response::Response};
use tracing::Instrument;
use uuid::Uuid;

const REQUEST_ID_HEADER: &str = "x-request-id";
const MAX_REQUEST_ID_LEN: usize = 128;

/// 请求上下文中的 request_id（通过 extensions 传给 handler）。
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

tokio::task_local! {
    /// 当前请求任务绑定的 request_id，供错误响应与日志使用。
    static CURRENT: String;
}

/// 获取当前请求上下文中的 request_id（不在请求任务内时为 None）。
pub fn current_request_id() -> Option<String> {
    CURRENT.try_with(Clone::clone).ok()
}

fn accept_client_id(raw: &str) -> Option<&str> {
    let v = raw.trim();
    let safe = !v.is_empty()
        && v.len() <= MAX_REQUEST_ID_LEN
        && v
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'));
    safe.then_some(v)
}

/// request_id 中间件：
/// - 客户端传入安全的 `X-Request-Id` 时原样透传
/// - 否则生成 `req_<uuid>`
/// - 回写响应头，并在任务上下文中可见
pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(accept_client_id)
        .map(str::to_string)
        .unwrap_or_else(|| format!("req_{}", Uuid::new_v4().simple()));

    req.extensions_mut().insert(RequestId(id.clone()));
    let span = tracing::info_span!("request", request_id = %id);
    let mut res = CURRENT
        .scope(id.clone(), next.run(req).instrument(span))
        .await;

    if let Ok(value) = HeaderValue::from_str(&id) {
        res.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    res
}

#[cfg(test)]
mod tests {
    use super::accept_client_id;

    #[test]
    fn client_id_accepts_safe_chars() {
        assert_eq!(accept_client_id(" shop.req-01_a "), Some("shop.req-01_a"));
    }

    #[test]
    fn client_id_rejects_empty_long_and_unsafe() {
        assert_eq!(accept_client_id(""), None);
        assert_eq!(accept_client_id("has space"), None);
        assert_eq!(accept_client_id("a/b"), None);
        assert_eq!(accept_client_id(&"x".repeat(129)), None);
    }
}
