#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use shop_render::AppConfig;
use shop_render::error::FetchError;
use shop_render::features::shop::drawing::encode_png;
use shop_render::features::shop::{AssetProvider, ImageFetcher, ShopRenderer, ShopRequest};
use tiny_skia::{Color, Pixmap};

/// 以 URL 为键的内存拉取器；未登记的 URL 视为网络错误
#[derive(Default)]
pub struct StubFetcher {
    bodies: HashMap<String, Vec<u8>>,
    delay: Duration,
    calls: AtomicUsize,
    per_url: Mutex<HashMap<String, usize>>,
}

impl StubFetcher {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn serve(mut self, url: &str, color: Color) -> Self {
        let mut pixmap = Pixmap::new(48, 48).expect("pixmap");
        pixmap.fill(color);
        self.bodies
            .insert(url.to_string(), encode_png(&pixmap, true).expect("png"));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, url: &str) -> usize {
        self.per_url
            .lock()
            .expect("per_url")
            .get(url)
            .copied()
            .unwrap_or(0)
    }
}

impl ImageFetcher for StubFetcher {
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Vec<u8>, FetchError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self
                .per_url
                .lock()
                .expect("per_url")
                .entry(url.to_string())
                .or_default() += 1;
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.bodies
                .get(url)
                .cloned()
                .ok_or_else(|| FetchError::Network(format!("unreachable: {url}")))
        })
    }
}

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.shop.item_image_size = 64;
    config.shop.fetch_timeout_secs = 2;
    config.shop.optimize_speed = true;
    config.branding.footer_text = "test footer".to_string();
    config
}

pub fn renderer(fetcher: Arc<StubFetcher>) -> ShopRenderer {
    ShopRenderer::new(&test_config(), Arc::new(AssetProvider::in_memory()), fetcher)
}

pub fn item_url(id: &str) -> String {
    format!("https://img.test/{id}.png")
}

pub fn entry_json(id: &str, size: f32, regular: u32, final_price: u32) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "name": format!("Item {id}"),
        "size": size,
        "price": { "regular": regular, "final": final_price },
        "image": { "primary": item_url(id) }
    })
}

/// 两个分区、含整卡/半卡与折扣的请求
pub fn sample_request(locale: &str) -> ShopRequest {
    let json = serde_json::json!({
        "locale": locale,
        "title": "Item Shop",
        "date": "Friday, October 18",
        "sections": [
            {
                "id": "featured",
                "name": "Featured",
                "entries": [entry_json("a", 1.0, 1500, 1500), entry_json("b", 0.5, 800, 600), entry_json("c", 0.5, 800, 800)]
            },
            {
                "id": "daily",
                "name": "Daily",
                "overflow": 2,
                "entries": [entry_json("d", 1.0, 1200, 1200)]
            }
        ]
    });
    serde_json::from_value(json).expect("sample request")
}


pub fn stub_for_sample(delay: Duration) -> StubFetcher {
    ["a", "b", "c", "d"]
        .iter()
        .fold(StubFetcher::new(delay), |f, id| {
            f.serve(&item_url(id), Color::from_rgba8(200, 40, 40, 255))
        })
}
