use std::sync::Arc;

use tiny_skia::{Color, Pixmap};

use super::assets::AssetProvider;
use super::drawing::{Align, Bounds, Canvas, Fill, SkiaCanvas, TextStyle, new_pixmap};
use super::layout::LayoutMetrics;
use super::types::ShopRequest;
use crate::error::DrawError;

/// 创作者代码旁的广告横幅资源名
pub const AD_BANNER_ASSET: &str = "ad_banner";

const TITLE_FONT_SIZE: f32 = 72.0;
const DATE_FONT_SIZE: f32 = 30.0;
const BADGE_FONT_SIZE: f32 = 40.0;
const BADGE_MIN_FONT_SIZE: f32 = 12.0;
/// 徽章字号收缩的迭代上限
const BADGE_MAX_STEPS: usize = 32;
const BADGE_PADDING: f32 = 18.0;
const BADGE_GAP: f32 = 24.0;

/// 创作者代码徽章的最终位置
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BadgePlacement {
    pub bounds: Bounds,
    pub font_size: f32,
    pub steps: usize,
}

/// 最终图合成：每次请求都重新执行，不进入缓存。
pub struct RequestCompositor {
    margin: f32,
    header_height: f32,
    radius: f32,
}

impl RequestCompositor {
    pub fn new(metrics: &LayoutMetrics) -> Self {
        Self {
            margin: metrics.margin,
            header_height: metrics.header_height,
            radius: 36.0,
        }
    }

    pub fn compose(
        &self,
        locale_template: &Pixmap,
        request: &ShopRequest,
        assets: &AssetProvider,
    ) -> Result<Pixmap, DrawError> {
        let background = match request.background.as_deref() {
            Some(name) => {
                let found = assets.bitmap(name)?;
                if found.is_none() {
                    tracing::warn!(background = name, "背景资源不存在，使用默认渐变");
                }
                found
            }
            None => None,
        };
        let ad_banner = match request.creator_code {
            Some(_) => assets.bitmap(AD_BANNER_ASSET)?,
            None => None,
        };

        let mut pixmap = new_pixmap(locale_template.width(), locale_template.height())?;
        {
            let mut canvas = SkiaCanvas::new(&mut pixmap, assets.fonts(), assets.font_family());
            self.draw(&mut canvas, locale_template, request, background, ad_banner.as_deref())?;
        }
        Ok(pixmap)
    }

    pub fn draw<C: Canvas + ?Sized>(
        &self,
        canvas: &mut C,
        locale_template: &Pixmap,
        request: &ShopRequest,
        background: Option<Arc<Pixmap>>,
        ad_banner: Option<&Pixmap>,
    ) -> Result<Option<BadgePlacement>, DrawError> {
        let (w, h) = (canvas.width() as f32, canvas.height() as f32);
        let full = Bounds::new(0.0, 0.0, w, h);
        let fill = match background {
            Some(bitmap) => Fill::Cover(bitmap),
            None => Fill::Vertical {
                top: Color::from_rgba8(30, 58, 138, 255),
                bottom: Color::from_rgba8(12, 18, 48, 255),
            },
        };
        canvas.fill_rounded_rect(full, self.radius, &fill)?;
        canvas.draw_bitmap(locale_template, full, None)?;

        let title_row = Bounds::new(
            self.margin,
            self.margin,
            w - self.margin * 2.0,
            self.header_height * 0.6,
        );
        let title_style = TextStyle::new(TITLE_FONT_SIZE, Color::WHITE).bold();
        canvas.draw_text(&request.title, title_row, &title_style)?;
        let date_row = Bounds::new(
            self.margin,
            title_row.bottom(),
            title_row.w,
            self.header_height * 0.3,
        );
        let date_style = TextStyle::new(DATE_FONT_SIZE, Color::from_rgba8(200, 210, 235, 255));
        canvas.draw_text(&request.date, date_row, &date_style)?;

        let Some(code) = &request.creator_code else {
            return Ok(None);
        };

        let ad_size = ad_banner.map(|ad| {
            let height = title_row.h * 0.8;
            let width = height * ad.width() as f32 / ad.height().max(1) as f32;
            (width, height)
        });
        let ad_width = ad_size.map(|(aw, _)| aw + BADGE_GAP).unwrap_or(0.0);
        let title_width = canvas.measure_text(&request.title, &title_style)?;
        let available = title_row.w - title_width - BADGE_GAP - ad_width;

        let text = format!("{}: {}", code.title, code.value);
        let badge_style = TextStyle::new(BADGE_FONT_SIZE, Color::WHITE)
            .align(Align::Center)
            .bold();
        let (font_size, steps) = shrink_badge_font(canvas, &text, &badge_style, available)?;
        let style = badge_style.with_size(font_size);
        let text_width = canvas.measure_text(&text, &style)?;

        let badge_w = text_width + BADGE_PADDING * 2.0;
        let badge_h = font_size * 1.6;
        let right = title_row.right() - ad_width;
        let bounds = Bounds::new(
            right - badge_w,
            title_row.y + (title_row.h - badge_h) / 2.0,
            badge_w,
            badge_h,
        );
        canvas.fill_rounded_rect(bounds, badge_h / 2.0, &Fill::Solid(Color::from_rgba8(0, 0, 0, 150)))?;
        canvas.draw_text(&text, bounds, &style)?;

        if let (Some(ad), Some((aw, ah))) = (ad_banner, ad_size) {
            let dest = Bounds::new(
                title_row.right() - aw,
                title_row.y + (title_row.h - ah) / 2.0,
                aw,
                ah,
            );
            canvas.draw_bitmap(ad, dest, None)?;
        }

        Ok(Some(BadgePlacement {
            bounds,
            font_size,
            steps,
        }))
    }
}

/// 逐步缩小徽章字号直到文字加内边距放得下；不低于最小字号，迭代次数有上限。
fn shrink_badge_font<C: Canvas + ?Sized>(
    canvas: &C,
    text: &str,
    style: &TextStyle,
    available: f32,
) -> Result<(f32, usize), DrawError> {
    let mut size = style.size;
    let mut steps = 0;
    while steps < BADGE_MAX_STEPS && size > BADGE_MIN_FONT_SIZE {
        let width = canvas.measure_text(text, &style.with_size(size))?;
        if width + BADGE_PADDING * 2.0 <= available {
            break;
        }
        size = (size - 2.0).max(BADGE_MIN_FONT_SIZE);
        steps += 1;
    }
    Ok((size, steps))
}

#[cfg(test)]
mod tests {
    use super::{BADGE_FONT_SIZE, BADGE_MAX_STEPS, BADGE_MIN_FONT_SIZE, RequestCompositor};
    use crate::features::shop::layout::LayoutMetrics;
    use crate::features::shop::layout::testing::RecordingCanvas;
    use crate::features::shop::types::CreatorCode;
    use crate::features::shop::types::fixtures::request;
    use tiny_skia::Pixmap;

    fn compositor() -> RequestCompositor {
        RequestCompositor::new(&LayoutMetrics::default())
    }

    fn template() -> Pixmap {
        Pixmap::new(1200, 900).expect("pixmap")
    }

    #[test]
    fn no_creator_code_means_no_badge() {
        let mut canvas = RecordingCanvas::new(1200, 900);
        let badge = compositor()
            .draw(&mut canvas, &template(), &request(vec![]), None, None)
            .expect("draw");
        assert!(badge.is_none());
        // 背景 + 模板贴图
        assert_eq!(canvas.rects.len(), 1);
        assert_eq!(canvas.bitmaps.len(), 1);
    }

    #[test]
    fn short_code_keeps_full_size_and_is_right_aligned() {
        let mut req = request(vec![]);
        req.creator_code = Some(CreatorCode {
            title: "Code".to_string(),
            value: "ABC".to_string(),
        });
        let mut canvas = RecordingCanvas::new(1200, 900);
        let badge = compositor()
            .draw(&mut canvas, &template(), &req, None, None)
            .expect("draw")
            .expect("badge");
        assert_eq!(badge.font_size, BADGE_FONT_SIZE);
        assert_eq!(badge.steps, 0);
        let metrics = LayoutMetrics::default();
        assert!((badge.bounds.right() - (1200.0 - metrics.margin)).abs() < 0.01);
    }

    #[test]
    fn pathological_code_shrinks_within_bounds() {
        let mut req = request(vec![]);
        req.creator_code = Some(CreatorCode {
            title: "Code".to_string(),
            value: "X".repeat(500),
        });
        let mut canvas = RecordingCanvas::new(1200, 900);
        let badge = compositor()
            .draw(&mut canvas, &template(), &req, None, None)
            .expect("draw")
            .expect("badge");
        assert!(badge.font_size >= BADGE_MIN_FONT_SIZE);
        assert!(badge.steps <= BADGE_MAX_STEPS);
    }

    #[test]
    fn ad_banner_sits_right_of_the_badge() {
        let mut req = request(vec![]);
        req.creator_code = Some(CreatorCode {
            title: "Code".to_string(),
            value: "ABC".to_string(),
        });
        let ad = Pixmap::new(200, 100).expect("ad");
        let mut canvas = RecordingCanvas::new(1200, 900);
        let badge = compositor()
            .draw(&mut canvas, &template(), &req, None, Some(&ad))
            .expect("draw")
            .expect("badge");
        let ad_box = *canvas.bitmaps.last().expect("ad drawn");
        assert!(ad_box.x > badge.bounds.right());
        assert!((ad_box.w / ad_box.h - 2.0).abs() < 0.01);
    }
}
