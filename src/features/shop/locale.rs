//! 语言模板：在共享模板的私有副本上按位置元数据叠加本地化文字、价格与横幅。
//!
//! 元数据按稳定 id 而非数组下标寻址条目；元数据里有而本次请求里没有的条目直接跳过。

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError};

use lru::LruCache;
use tiny_skia::{Color, Pixmap};

use super::assets::AssetProvider;
use super::drawing::{
    Align, Bounds, Canvas, Fill, SkiaCanvas, TextStyle, fit_font_size, new_pixmap, parse_hex_color,
};
use super::layout::LocationMetadata;
use super::types::{Banner, Entry, Section};
use crate::error::DrawError;

const BANNER_CACHE_SIZE: usize = 64;
const NAME_FONT_SIZE: f32 = 28.0;
const NAME_MIN_FONT_SIZE: f32 = 14.0;
const PRICE_FONT_SIZE: f32 = 26.0;
const SECTION_FONT_SIZE: f32 = 34.0;

/// 货币图标资源名
pub const CURRENCY_ASSET: &str = "currency";

/// 按语言子标签选择千位分组符
pub fn format_price(value: u32, locale: &str) -> String {
    let language = locale
        .split(['-', '_'])
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    let separator = match language.as_str() {
        "de" | "es" | "it" | "pt" | "tr" | "nl" | "id" => ".",
        "fr" | "pl" | "ru" | "uk" | "cs" | "sv" | "no" | "fi" => "\u{202f}",
        _ => ",",
    };

    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 * 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push_str(separator);
        }
        out.push(ch);
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BannerKey {
    banner: Banner,
    width: u32,
    height: u32,
}

/// 一次叠加的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OverlayOutcome {
    pub drawn: usize,
    /// 元数据中存在但请求中缺失的条目
    pub skipped: usize,
}

pub struct LocaleCompositor {
    banners: Mutex<LruCache<BannerKey, Arc<Pixmap>>>,
}

impl Default for LocaleCompositor {
    fn default() -> Self {
        Self::new()
    }
}

impl LocaleCompositor {
    pub fn new() -> Self {
        let capacity = NonZeroUsize::new(BANNER_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN);
        Self {
            banners: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// 复制共享模板并叠加本地化内容；缓存中的原图不会被修改。
    pub fn compose(
        &self,
        template: &Pixmap,
        meta: &LocationMetadata,
        sections: &[Section],
        locale: &str,
        assets: &AssetProvider,
    ) -> Result<Pixmap, DrawError> {
        let mut pixmap = template.clone();
        let outcome = {
            let mut canvas = SkiaCanvas::new(&mut pixmap, assets.fonts(), assets.font_family());
            self.overlay(&mut canvas, meta, sections, locale, assets)?
        };
        tracing::debug!(locale, drawn = outcome.drawn, skipped = outcome.skipped, "语言模板叠加完成");
        Ok(pixmap)
    }

    pub fn overlay<C: Canvas + ?Sized>(
        &self,
        canvas: &mut C,
        meta: &LocationMetadata,
        sections: &[Section],
        locale: &str,
        assets: &AssetProvider,
    ) -> Result<OverlayOutcome, DrawError> {
        let currency = assets.bitmap(CURRENCY_ASSET)?;
        let by_id: HashMap<&str, &Section> = sections.iter().map(|s| (s.id.as_str(), s)).collect();
        let mut outcome = OverlayOutcome::default();

        for location in &meta.sections {
            let Some(section) = by_id.get(location.section_id.as_str()) else {
                tracing::debug!(section = %location.section_id, "请求中缺少该分区，跳过");
                outcome.skipped += location.entries.len();
                continue;
            };
            if let (Some(label), Some(name)) = (location.name_label, section.name.as_deref()) {
                let style = TextStyle::new(SECTION_FONT_SIZE, Color::WHITE).bold();
                canvas.draw_text(name, label, &style)?;
            }

            let entries: HashMap<&str, &Entry> =
                section.entries.iter().map(|e| (e.id.as_str(), e)).collect();
            for loc in &location.entries {
                let Some(entry) = entries.get(loc.entry_id.as_str()) else {
                    tracing::debug!(entry = %loc.entry_id, "请求中缺少该条目，跳过");
                    outcome.skipped += 1;
                    continue;
                };

                let name_style = TextStyle::new(NAME_FONT_SIZE, Color::WHITE)
                    .align(Align::Center)
                    .bold();
                let size = fit_font_size(canvas, &entry.name, &name_style, loc.name.w, NAME_MIN_FONT_SIZE)?;
                canvas.draw_text(&entry.name, loc.name, &name_style.with_size(size))?;

                self.draw_price(canvas, entry, loc.price, locale, currency.as_deref())?;

                match (&entry.banner, loc.banner) {
                    (Some(banner), Some(area)) => match self.banner_bitmap(banner, area, assets)? {
                        Some(bitmap) => canvas.draw_bitmap(&bitmap, area, None)?,
                        None => tracing::warn!(entry = %entry.id, "横幅颜色无法解析，跳过横幅"),
                    },
                    // 半卡没有横幅位
                    (Some(_), None) => tracing::debug!(entry = %entry.id, "半卡不绘制横幅，跳过"),
                    _ => {}
                }
                outcome.drawn += 1;
            }
        }
        Ok(outcome)
    }

    fn draw_price<C: Canvas + ?Sized>(
        &self,
        canvas: &mut C,
        entry: &Entry,
        area: Bounds,
        locale: &str,
        currency: Option<&Pixmap>,
    ) -> Result<(), DrawError> {
        let mut x = area.x;
        if let Some(icon) = currency {
            canvas.draw_bitmap(icon, Bounds::new(x, area.y, area.h, area.h), None)?;
            x += area.h + 6.0;
        }

        let final_text = format_price(entry.price.final_price, locale);
        let final_style = TextStyle::new(PRICE_FONT_SIZE, Color::WHITE).bold();
        canvas.draw_text(&final_text, Bounds::new(x, area.y, area.right() - x, area.h), &final_style)?;

        if entry.price.is_discounted() {
            x += canvas.measure_text(&final_text, &final_style)? + 12.0;
            let regular_text = format_price(entry.price.regular, locale);
            let grey = Color::from_rgba8(190, 190, 200, 255);
            let regular_style = TextStyle::new(PRICE_FONT_SIZE * 0.8, grey);
            let width = canvas.measure_text(&regular_text, &regular_style)?;
            canvas.draw_text(
                &regular_text,
                Bounds::new(x, area.y, (area.right() - x).max(width), area.h),
                &regular_style,
            )?;
            let mid = area.y + area.h / 2.0 + 1.0;
            canvas.draw_line((x - 2.0, mid), (x + width + 2.0, mid), grey, 2.0)?;
        }
        Ok(())
    }

    /// 每种（文字, 颜色, 尺寸）只渲染一次；颜色非法返回 None。
    fn banner_bitmap(
        &self,
        banner: &Banner,
        area: Bounds,
        assets: &AssetProvider,
    ) -> Result<Option<Arc<Pixmap>>, DrawError> {
        let (Some(start), Some(end)) = (
            parse_hex_color(&banner.color_start),
            parse_hex_color(&banner.color_end),
        ) else {
            return Ok(None);
        };
        let key = BannerKey {
            banner: banner.clone(),
            width: area.w.ceil() as u32,
            height: area.h.ceil() as u32,
        };
        if let Some(hit) = self
            .banners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return Ok(Some(Arc::clone(hit)));
        }

        let mut pixmap = new_pixmap(key.width, key.height)?;
        {
            let mut canvas = SkiaCanvas::new(&mut pixmap, assets.fonts(), assets.font_family());
            let local = Bounds::new(0.0, 0.0, key.width as f32, key.height as f32);
            canvas.fill_rounded_rect(local, local.h / 2.0, &Fill::Horizontal { left: start, right: end })?;
            let style = TextStyle::new(local.h * 0.6, Color::BLACK).align(Align::Center).bold();
            let size = fit_font_size(&canvas, &banner.text, &style, local.w - 12.0, 10.0)?;
            canvas.draw_text(&banner.text, local, &style.with_size(size))?;
        }
        let pixmap = Arc::new(pixmap);
        self.banners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put(key, Arc::clone(&pixmap));
        Ok(Some(pixmap))
    }
}
