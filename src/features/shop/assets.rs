use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use resvg::usvg::fontdb;
use tiny_skia::Pixmap;

use super::drawing::decode_pixmap;
use crate::config::AssetsConfig;
use crate::error::AssetError;

/// 进程级资源提供者：持有字体库与命名位图，生命周期与进程一致。
///
/// 可用的位图名在启动时从 `bitmaps_dir` 列出并固定；只有这些名字会被按需解码并常驻，
/// 其余名字一律视为缺失且不占用任何条目。
pub struct AssetProvider {
    fonts: Arc<fontdb::Database>,
    font_family: String,
    bitmaps_dir: Option<PathBuf>,
    available: HashSet<String>,
    bitmaps: Mutex<HashMap<String, Arc<Pixmap>>>,
}

impl AssetProvider {
    /// 加载字体（系统字体 + 字体目录）并准备位图目录
    pub fn load(config: &AssetsConfig) -> Self {
        let mut font_db = fontdb::Database::new();
        if config.load_system_fonts {
            font_db.load_system_fonts();
        }

        let fonts_dir = PathBuf::from(&config.fonts_dir);
        if fonts_dir.exists() {
            if let Ok(entries) = fs::read_dir(&fonts_dir) {
                for entry in entries.flatten() {
                    let path = entry.path();
                    if path.is_file()
                        && (path.extension() == Some("ttf".as_ref())
                            || path.extension() == Some("otf".as_ref()))
                    {
                        if let Err(e) = font_db.load_font_file(&path) {
                            tracing::error!("加载字体文件失败 '{}': {}", path.display(), e);
                        }
                    }
                }
            }
        }
        tracing::info!(faces = font_db.len(), dir = %fonts_dir.display(), "字体库已加载");

        let bitmaps_dir = PathBuf::from(&config.bitmaps_dir);
        let available = list_bitmap_names(&bitmaps_dir);
        tracing::info!(bitmaps = available.len(), dir = %bitmaps_dir.display(), "命名位图已登记");

        Self {
            fonts: Arc::new(font_db),
            font_family: config.font_family.clone(),
            bitmaps_dir: Some(bitmaps_dir),
            available,
            bitmaps: Mutex::new(HashMap::new()),
        }
    }

    /// 不访问磁盘的提供者（位图只能通过 [`AssetProvider::insert_bitmap`] 注入）
    pub fn in_memory() -> Self {
        Self {
            fonts: Arc::new(fontdb::Database::new()),
            font_family: "sans-serif".to_string(),
            bitmaps_dir: None,
            available: HashSet::new(),
            bitmaps: Mutex::new(HashMap::new()),
        }
    }

    pub fn fonts(&self) -> Arc<fontdb::Database> {
        Arc::clone(&self.fonts)
    }

    pub fn font_family(&self) -> &str {
        &self.font_family
    }

    pub fn insert_bitmap(&self, name: &str, pixmap: Pixmap) {
        self.bitmaps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), Arc::new(pixmap));
    }

    /// 获取命名位图。资源不存在返回 `Ok(None)`；存在但无法解码是错误。
    pub fn bitmap(&self, name: &str) -> Result<Option<Arc<Pixmap>>, AssetError> {
        if let Some(hit) = self
            .bitmaps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return Ok(Some(Arc::clone(hit)));
        }
        if !self.available.contains(name) {
            tracing::debug!(name, "未登记的位图资源");
            return Ok(None);
        }
        let Some(dir) = &self.bitmaps_dir else {
            return Ok(None);
        };

        let path = dir.join(format!("{name}.png"));
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(AssetError::Io {
                    name: name.to_string(),
                    message: e.to_string(),
                });
            }
        };
        let pixmap = decode_pixmap(&bytes, None, false).map_err(|e| AssetError::Corrupt {
            name: name.to_string(),
            message: e.to_string(),
        })?;

        let pixmap = Arc::new(pixmap);
        self.bitmaps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name.to_string())
            .or_insert_with(|| Arc::clone(&pixmap));
        Ok(Some(pixmap))
    }
}

/// 列出目录下的 `<name>.png`；名称只允许安全字符，防止目录穿越
fn list_bitmap_names(dir: &Path) -> HashSet<String> {
    let Ok(entries) = fs::read_dir(dir) else {
        return HashSet::new();
    };
    entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension() == Some("png".as_ref()))
        .filter_map(|path| path.file_stem()?.to_str().map(str::to_string))
        .filter(|name| {
            let safe = !name.is_empty()
                && name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
            if !safe {
                tracing::warn!(name = %name, "忽略不安全的资源文件名");
            }
            safe
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::AssetProvider;
    use crate::config::AssetsConfig;
    use tiny_skia::Pixmap;

    fn temp_dir(tag: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("shop-assets-{tag}-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("temp dir");
        dir
    }

    fn provider_for(dir: &std::path::Path) -> AssetProvider {
        AssetProvider::load(&AssetsConfig {
            fonts_dir: dir.join("fonts").display().to_string(),
            bitmaps_dir: dir.display().to_string(),
            load_system_fonts: false,
            font_family: "sans-serif".to_string(),
        })
    }

    #[test]
    fn missing_and_unsafe_names_are_absent() {
        let dir = temp_dir("missing");
        let assets = provider_for(&dir);
        assert!(assets.bitmap("currency").expect("lookup").is_none());
        assert!(assets.bitmap("../etc/passwd").expect("lookup").is_none());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn unknown_names_leave_no_resident_entries() {
        let dir = temp_dir("unknown");
        let assets = provider_for(&dir);
        for i in 0..1000 {
            assert!(assets.bitmap(&format!("bg{i}")).expect("lookup").is_none());
        }
        assert!(assets.bitmap("../bg0").expect("lookup").is_none());
        assert!(assets.bitmaps.lock().expect("bitmaps").is_empty());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn files_added_after_startup_are_not_served() {
        let dir = temp_dir("late");
        let assets = provider_for(&dir);
        let png = crate::features::shop::drawing::encode_png(&Pixmap::new(2, 2).expect("pixmap"), true)
            .expect("png");
        std::fs::write(dir.join("late.png"), png).expect("write");
        assert!(assets.bitmap("late").expect("lookup").is_none());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn corrupt_bitmap_is_an_error() {
        let dir = temp_dir("corrupt");
        std::fs::write(dir.join("ad_banner.png"), b"definitely not png").expect("write");
        let assets = provider_for(&dir);
        assert!(assets.bitmap("ad_banner").is_err());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn bitmaps_load_once_and_stay_resident() {
        let dir = temp_dir("ok");
        let mut pixmap = Pixmap::new(3, 2).expect("pixmap");
        pixmap.fill(tiny_skia::Color::WHITE);
        let png = crate::features::shop::drawing::encode_png(&pixmap, true).expect("png");
        std::fs::write(dir.join("currency.png"), png).expect("write");

        let assets = provider_for(&dir);
        let first = assets.bitmap("currency").expect("load").expect("present");
        std::fs::remove_file(dir.join("currency.png")).expect("remove");
        let second = assets.bitmap("currency").expect("cached").expect("present");
        assert!(std::sync::Arc::ptr_eq(&first, &second));
        assert_eq!((first.width(), first.height()), (3, 2));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn injected_bitmaps_are_served_in_memory() {
        let assets = AssetProvider::in_memory();
        assert!(assets.bitmap("background").expect("lookup").is_none());
        assets.insert_bitmap("background", Pixmap::new(4, 4).expect("pixmap"));
        assert!(assets.bitmap("background").expect("lookup").is_some());
    }
}
