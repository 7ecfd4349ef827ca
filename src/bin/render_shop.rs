//! 离线渲染工具：读取请求 JSON，走与服务端相同的流水线，输出 PNG。

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use shop_render::AppConfig;
use shop_render::features::shop::{AssetProvider, HttpImageFetcher, ShopRenderer, ShopRequest};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 最小日志：仅在需要调试时启用（例如 RUST_LOG=debug）。
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let args = Args::parse(std::env::args().skip(1).collect());
    if args.help {
        print_help();
        return Ok(());
    }
    let Some(input) = args.input else {
        print_help();
        return Err("缺少 --input".into());
    };

    let config = match args.config_path {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };

    let raw = fs::read_to_string(&input)?;
    let mut request: ShopRequest = serde_json::from_str(&raw)?;
    if let Some(locale) = args.locale {
        request.locale = locale;
    }
    request.fresh |= args.fresh;

    let assets = Arc::new(AssetProvider::load(&config.assets));
    let fetcher = Arc::new(HttpImageFetcher::new(config.shop.fetch_timeout())?);
    let renderer = ShopRenderer::new(&config, assets, fetcher);

    let started = Instant::now();
    let png = renderer.render_png(request).await?;
    fs::write(&args.out_path, &png)?;

    let stats = renderer.stats();
    println!(
        "已写入: {} ({} bytes, {} ms, 拉取 {} 次, 占位图 {} 张)",
        args.out_path.display(),
        png.len(),
        started.elapsed().as_millis(),
        stats.prefetch.fetches,
        stats.prefetch.placeholders,
    );
    Ok(())
}

struct Args {
    help: bool,
    input: Option<PathBuf>,
    out_path: PathBuf,
    config_path: Option<PathBuf>,
    locale: Option<String>,
    fresh: bool,
}

impl Args {
    fn parse(argv: Vec<String>) -> Self {
        let mut args = Self {
            help: false,
            input: None,
            out_path: PathBuf::from("shop.png"),
            config_path: None,
            locale: None,
            fresh: false,
        };

        let mut it = argv.into_iter();
        while let Some(a) = it.next() {
            match a.as_str() {
                "-h" | "--help" => args.help = true,
                "-i" | "--input" => args.input = it.next().map(PathBuf::from),
                "-o" | "--out" => {
                    if let Some(v) = it.next() {
                        args.out_path = PathBuf::from(v);
                    }
                }
                "--config" => args.config_path = it.next().map(PathBuf::from),
                "--locale" => args.locale = it.next(),
                "--fresh" => args.fresh = true,
                _ => {}
            }
        }
        args
    }
}

fn print_help() {
    println!(
        r#"render_shop（离线商店图渲染）

用法：
  cargo run --bin render_shop -- --input shop.json --out shop.png

参数：
  -i, --input PATH      请求 JSON（与 POST /shop/render 的请求体一致）
  -o, --out PATH        输出 PNG 路径（默认 shop.png）
  --config PATH         配置文件（默认 APP_CONFIG_PATH 或 config.toml）
  --locale TAG          覆盖请求中的 locale
  --fresh               强制重建共享模板
  -h, --help            显示帮助"#
    );
}

#[cfg(test)]
mod tests {
    use super::Args;

    fn argv(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_flags_and_defaults() {
        let args = Args::parse(argv(&["--input", "req.json", "--locale", "de", "--fresh"]));
        assert_eq!(args.input.as_deref(), Some(std::path::Path::new("req.json")));
        assert_eq!(args.out_path, std::path::PathBuf::from("shop.png"));
        assert_eq!(args.locale.as_deref(), Some("de"));
        assert!(args.fresh);
        assert!(!args.help);
    }

    #[test]
    fn unknown_flags_are_ignored() {
        let args = Args::parse(argv(&["--bogus", "-o", "x.png"]));
        assert!(args.input.is_none());
        assert_eq!(args.out_path, std::path::PathBuf::from("x.png"));
    }
}
