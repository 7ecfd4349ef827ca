pub mod assets;
pub mod cache;
pub mod compose;
pub mod drawing;
pub mod fetch;
pub mod handler;
pub mod layout;
pub mod locale;
pub mod named_lock;
pub mod prefetch;
pub mod service;
pub mod template_key;
pub mod types;

pub use assets::AssetProvider;
pub use cache::{ArtifactCache, CacheStats, CachedArtifact, ReleaseHook};
pub use fetch::{HttpImageFetcher, ImageFetcher};
pub use handler::create_shop_router;
pub use layout::LocationMetadata;
pub use named_lock::NamedLock;
pub use service::{RendererStats, ShopRenderer};
pub use template_key::TemplateKey;
pub use types::{Banner, CreatorCode, Entry, ImageSource, Price, Section, ShopRequest};
