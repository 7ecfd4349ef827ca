use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// 监听地址
    #[serde(default = "ServerConfig::default_host")]
    pub host: String,
    /// 监听端口
    #[serde(default = "ServerConfig::default_port")]
    pub port: u16,
}

impl ServerConfig {
    fn default_host() -> String {
        "0.0.0.0".to_string()
    }
    fn default_port() -> u16 {
        3940
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 默认日志级别（`RUST_LOG` 优先）
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
    /// 日志格式：full | compact
    #[serde(default = "LoggingConfig::default_format")]
    pub format: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
    fn default_format() -> String {
        "full".to_string()
    }

    /// 生成 EnvFilter 使用的默认指令
    pub fn default_directive(&self) -> String {
        format!("shop_render={},tower_http=info", self.level)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            format: Self::default_format(),
        }
    }
}

/// API 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// API 路由前缀
    #[serde(default = "ApiConfig::default_prefix")]
    pub prefix: String,
}

impl ApiConfig {
    fn default_prefix() -> String {
        "/api/v1".to_string()
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            prefix: Self::default_prefix(),
        }
    }
}

/// 商店图渲染与缓存配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShopRenderConfig {
    /// 共享模板 / 语言模板 / 布局元数据的 TTL（秒，自最后一次写入起算）
    #[serde(default = "ShopRenderConfig::default_template_ttl")]
    pub template_ttl_secs: u64,
    /// 单品图片缓存 TTL（秒）
    #[serde(default = "ShopRenderConfig::default_item_ttl")]
    pub item_image_ttl_secs: u64,
    /// 产物缓存最大容量（字节），按像素缓冲大小加权
    #[serde(default = "ShopRenderConfig::default_cache_max_bytes")]
    pub cache_max_bytes: u64,
    /// 预取并发占 CPU 核心数的比例（结果至少为 1）
    #[serde(default = "ShopRenderConfig::default_prefetch_fraction")]
    pub prefetch_cpu_fraction: f32,
    /// 单张图片拉取超时（秒），超时按失败处理并使用占位图
    #[serde(default = "ShopRenderConfig::default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
    /// 单品图片（及占位图）的边长像素
    #[serde(default = "ShopRenderConfig::default_item_image_size")]
    pub item_image_size: u32,
    /// 并发渲染许可数（0=自动，取 CPU 核心数）
    #[serde(default)]
    pub max_parallel: u32,
    /// 是否优先速度（缩放滤波与 PNG 压缩）
    #[serde(default)]
    pub optimize_speed: bool,
}

impl ShopRenderConfig {
    fn default_template_ttl() -> u64 {
        600
    }
    fn default_item_ttl() -> u64 {
        600
    }
    fn default_cache_max_bytes() -> u64 {
        512 * 1024 * 1024
    }
    fn default_prefetch_fraction() -> f32 {
        0.5
    }
    fn default_fetch_timeout() -> u64 {
        15
    }
    fn default_item_image_size() -> u32 {
        256
    }

    pub fn template_ttl(&self) -> Duration {
        Duration::from_secs(self.template_ttl_secs)
    }

    pub fn item_image_ttl(&self) -> Duration {
        Duration::from_secs(self.item_image_ttl_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs.max(1))
    }

    /// 预取并发度：CPU 核心数 × 比例，向下取整，至少为 1
    pub fn prefetch_parallelism(&self) -> usize {
        let cpus = num_cpus::get() as f32;
        let fraction = if self.prefetch_cpu_fraction.is_finite() {
            self.prefetch_cpu_fraction.clamp(0.0, 1.0)
        } else {
            Self::default_prefetch_fraction()
        };
        ((cpus * fraction) as usize).max(1)
    }

    /// 渲染信号量许可数
    pub fn render_permits(&self) -> usize {
        if self.max_parallel == 0 {
            num_cpus::get()
        } else {
            self.max_parallel as usize
        }
    }
}

impl Default for ShopRenderConfig {
    fn default() -> Self {
        Self {
            template_ttl_secs: Self::default_template_ttl(),
            item_image_ttl_secs: Self::default_item_ttl(),
            cache_max_bytes: Self::default_cache_max_bytes(),
            prefetch_cpu_fraction: Self::default_prefetch_fraction(),
            fetch_timeout_secs: Self::default_fetch_timeout(),
            item_image_size: Self::default_item_image_size(),
            max_parallel: 0,
            optimize_speed: false,
        }
    }
}

/// 字体与位图资源配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetsConfig {
    /// 自定义字体目录（ttf/otf）
    #[serde(default = "AssetsConfig::default_fonts_dir")]
    pub fonts_dir: String,
    /// 命名位图目录（`<name>.png`，如 background_*、currency、ad_banner）
    #[serde(default = "AssetsConfig::default_bitmaps_dir")]
    pub bitmaps_dir: String,
    /// 是否加载系统字体
    #[serde(default = "AssetsConfig::default_system_fonts")]
    pub load_system_fonts: bool,
    /// 文字默认字体族
    #[serde(default = "AssetsConfig::default_font_family")]
    pub font_family: String,
}

impl AssetsConfig {
    fn default_fonts_dir() -> String {
        "resources/fonts".to_string()
    }
    fn default_bitmaps_dir() -> String {
        "resources/bitmaps".to_string()
    }
    fn default_system_fonts() -> bool {
        true
    }
    fn default_font_family() -> String {
        "Burbank Big Condensed".to_string()
    }
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            fonts_dir: Self::default_fonts_dir(),
            bitmaps_dir: Self::default_bitmaps_dir(),
            load_system_fonts: Self::default_system_fonts(),
            font_family: Self::default_font_family(),
        }
    }
}

/// 品牌/展示配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrandingConfig {
    /// 共享模板底部的署名文字（留空则不显示）
    #[serde(default = "BrandingConfig::default_footer")]
    pub footer_text: String,
}

impl BrandingConfig {
    fn default_footer() -> String {
        "Item Shop data provided by the shop API".to_string()
    }
}

impl Default for BrandingConfig {
    fn default() -> Self {
        Self {
            footer_text: Self::default_footer(),
        }
    }
}

/// 优雅退出配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// 优雅退出超时时间（秒）
    #[serde(default = "ShutdownConfig::default_timeout")]
    pub timeout_secs: u64,
}

impl ShutdownConfig {
    fn default_timeout() -> u64 {
        30
    }

    /// 获取优雅退出超时时间
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout_secs: Self::default_timeout(),
        }
    }
}

/// 应用配置
///
/// 启动时加载一次，之后以引用/`Arc` 显式传递给需要的组件。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub api: ApiConfig,
    /// 渲染与缓存配置
    #[serde(default)]
    pub shop: ShopRenderConfig,
    /// 资源配置
    #[serde(default)]
    pub assets: AssetsConfig,
    /// 品牌/展示配置
    #[serde(default)]
    pub branding: BrandingConfig,
    /// 优雅退出配置
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

impl AppConfig {
    /// 从配置文件加载配置（文件可缺省），支持环境变量覆盖
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Self::config_path())
    }

    /// 从指定路径加载配置
    pub fn load_from(path: PathBuf) -> Result<Self, ConfigError> {
        tracing::info!("正在从 {:?} 加载配置文件", path);

        let builder = ConfigBuilder::builder()
            .add_source(File::from(path).required(false))
            // 支持环境变量覆盖，例如：APP_API_PREFIX
            .add_source(
                Environment::with_prefix("APP")
                    .separator("_")
                    .try_parsing(true),
            )
            .build()?;

        builder.try_deserialize()
    }

    fn config_path() -> PathBuf {
        std::env::var("APP_CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.toml"))
    }

    /// 获取服务器监听地址
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
