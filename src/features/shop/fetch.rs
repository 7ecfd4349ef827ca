use std::time::Duration;

use futures_util::future::BoxFuture;
use reqwest::Client;

use crate::error::FetchError;

/// 远程图片获取能力：给定 URL 返回原始字节或失败
pub trait ImageFetcher: Send + Sync {
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Vec<u8>, FetchError>>;
}

/// 基于 reqwest 的实现；`Client` 内部带连接池，整个进程复用一个实例。
#[derive(Clone)]
pub struct HttpImageFetcher {
    client: Client,
}

impl HttpImageFetcher {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("shop-render/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

impl ImageFetcher for HttpImageFetcher {
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Vec<u8>, FetchError>> {
        Box::pin(async move {
            let resp = self.client.get(url).send().await?.error_for_status()?;
            let bytes = resp.bytes().await?;
            Ok(bytes.to_vec())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{HttpImageFetcher, ImageFetcher};
    use crate::error::FetchError;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn serve_once(response: &'static [u8]) -> std::net::SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let _ = socket.write_all(response).await;
            }
        });
        addr
    }

    #[tokio::test]
    async fn returns_body_bytes_on_success() {
        let addr = serve_once(b"HTTP/1.1 200 OK\r\ncontent-length: 3\r\nconnection: close\r\n\r\nabc").await;
        let fetcher = HttpImageFetcher::new(Duration::from_secs(2)).expect("client");
        let body = fetcher
            .fetch(&format!("http://{addr}/a.png"))
            .await
            .expect("body");
        assert_eq!(body, b"abc");
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let addr = serve_once(b"HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\nconnection: close\r\n\r\n").await;
        let fetcher = HttpImageFetcher::new(Duration::from_secs(2)).expect("client");
        let err = fetcher
            .fetch(&format!("http://{addr}/missing.png"))
            .await
            .expect_err("404");
        assert!(matches!(err, FetchError::Status(404)), "got {err:?}");
    }
}
