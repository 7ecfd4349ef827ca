//! 绘制能力：核心逻辑只通过 [`Canvas`] 使用绘图原语。
//!
//! 生产实现 [`SkiaCanvas`] 以 tiny-skia 像素缓冲为表面，文字通过 usvg 排版后由 resvg 栅格化。

use std::fmt::Write as _;
use std::sync::Arc;

use image::imageops::FilterType;
use resvg::usvg::{self, fontdb};
use serde::{Deserialize, Serialize};
use tiny_skia::{
    Color, FillRule, FilterQuality, GradientStop, IntSize, LinearGradient, Paint, Path,
    PathBuilder, Pattern, Pixmap, Point, Rect, SpreadMode, Stroke, Transform,
};

use crate::error::DrawError;

/// 模板坐标空间中的矩形
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl Bounds {
    pub const fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    pub fn right(&self) -> f32 {
        self.x + self.w
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.h
    }

    /// `other` 是否完全落在本矩形内
    pub fn contains(&self, other: &Bounds) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right() + f32::EPSILON
            && other.bottom() <= self.bottom() + f32::EPSILON
    }

    fn to_rect(self) -> Result<Rect, DrawError> {
        Rect::from_xywh(self.x, self.y, self.w, self.h)
            .ok_or_else(|| DrawError::Geometry(format!("{self:?}")))
    }
}

/// 圆角矩形的填充方式
#[derive(Clone)]
pub enum Fill {
    Solid(Color),
    /// 自上而下的线性渐变
    Vertical { top: Color, bottom: Color },
    /// 自左而右的线性渐变
    Horizontal { left: Color, right: Color },
    /// 位图着色器，按 cover 方式缩放居中
    Cover(Arc<Pixmap>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    Left,
    Center,
    Right,
}

/// 文字样式
#[derive(Debug, Clone)]
pub struct TextStyle {
    pub size: f32,
    pub color: Color,
    pub align: Align,
    pub bold: bool,
}

impl TextStyle {
    pub fn new(size: f32, color: Color) -> Self {
        Self {
            size,
            color,
            align: Align::Left,
            bold: false,
        }
    }

    pub fn align(mut self, align: Align) -> Self {
        self.align = align;
        self
    }

    pub fn bold(mut self) -> Self {
        self.bold = true;
        self
    }

    pub fn with_size(&self, size: f32) -> Self {
        Self {
            size,
            ..self.clone()
        }
    }
}

/// 绘制表面能力
pub trait Canvas {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn fill_rounded_rect(&mut self, rect: Bounds, radius: f32, fill: &Fill) -> Result<(), DrawError>;
    /// 位图贴图；`crop` 为源图上的裁剪区域（缺省为整张）
    fn draw_bitmap(&mut self, bitmap: &Pixmap, dest: Bounds, crop: Option<Bounds>) -> Result<(), DrawError>;
    fn measure_text(&self, text: &str, style: &TextStyle) -> Result<f32, DrawError>;
    /// 在 `bounds` 内按对齐方式绘制单行文字，基线位于框内垂直居中偏下
    fn draw_text(&mut self, text: &str, bounds: Bounds, style: &TextStyle) -> Result<(), DrawError>;
    fn draw_line(&mut self, from: (f32, f32), to: (f32, f32), color: Color, width: f32) -> Result<(), DrawError>;
}

/// 在最小字号与最大迭代次数的约束下，缩小字号直到文字宽度不超过 `max_width`。
pub fn fit_font_size<C: Canvas + ?Sized>(
    canvas: &C,
    text: &str,
    style: &TextStyle,
    max_width: f32,
    min_size: f32,
) -> Result<f32, DrawError> {
    const MAX_STEPS: usize = 256;
    let mut size = style.size;
    for _ in 0..MAX_STEPS {
        if size <= min_size {
            return Ok(min_size);
        }
        if canvas.measure_text(text, &style.with_size(size))? <= max_width {
            return Ok(size);
        }
        size -= 1.0;
    }
    Ok(size.max(min_size))
}

/// 基于 tiny-skia 像素缓冲的绘制表面（作用域内借用缓冲）
pub struct SkiaCanvas<'a> {
    pixmap: &'a mut Pixmap,
    fonts: Arc<fontdb::Database>,
    font_family: String,
}

impl<'a> SkiaCanvas<'a> {
    pub fn new(pixmap: &'a mut Pixmap, fonts: Arc<fontdb::Database>, font_family: &str) -> Self {
        Self {
            pixmap,
            fonts,
            font_family: font_family.to_string(),
        }
    }

    fn text_tree(
        &self,
        text: &str,
        x: f32,
        baseline: f32,
        canvas_w: u32,
        canvas_h: u32,
        style: &TextStyle,
    ) -> Result<usvg::Tree, DrawError> {
        let c = style.color.to_color_u8();
        let anchor = match style.align {
            Align::Left => "start",
            Align::Center => "middle",
            Align::Right => "end",
        };
        let mut svg = String::with_capacity(256 + text.len());
        let _ = write!(
            svg,
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{canvas_w}" height="{canvas_h}"><text x="{x}" y="{baseline}" font-family="{family}" font-size="{size}" font-weight="{weight}" fill="rgb({r},{g},{b})" fill-opacity="{a}" text-anchor="{anchor}">{body}</text></svg>"#,
            family = escape_xml(&self.font_family),
            size = style.size,
            weight = if style.bold { 700 } else { 400 },
            r = c.red(),
            g = c.green(),
            b = c.blue(),
            a = f32::from(c.alpha()) / 255.0,
            body = escape_xml(text),
        );

        let opts = usvg::Options {
            fontdb: Arc::clone(&self.fonts),
            font_family: self.font_family.clone(),
            font_size: style.size,
            text_rendering: usvg::TextRendering::OptimizeLegibility,
            ..Default::default()
        };
        usvg::Tree::from_data(svg.as_bytes(), &opts).map_err(|e| DrawError::Text(e.to_string()))
    }
}

impl Canvas for SkiaCanvas<'_> {
    fn width(&self) -> u32 {
        self.pixmap.width()
    }

    fn height(&self) -> u32 {
        self.pixmap.height()
    }

    fn fill_rounded_rect(&mut self, rect: Bounds, radius: f32, fill: &Fill) -> Result<(), DrawError> {
        let path = rounded_rect_path(rect, radius)?;
        let mut paint = Paint {
            anti_alias: true,
            ..Paint::default()
        };
        match fill {
            Fill::Solid(color) => paint.set_color(*color),
            Fill::Vertical { top, bottom } => {
                paint.shader = gradient(
                    Point::from_xy(rect.x, rect.y),
                    Point::from_xy(rect.x, rect.bottom()),
                    *top,
                    *bottom,
                );
            }
            Fill::Horizontal { left, right } => {
                paint.shader = gradient(
                    Point::from_xy(rect.x, rect.y),
                    Point::from_xy(rect.right(), rect.y),
                    *left,
                    *right,
                );
            }
            Fill::Cover(bitmap) => {
                let (iw, ih) = (bitmap.width() as f32, bitmap.height() as f32);
                let scale = (rect.w / iw).max(rect.h / ih);
                let tx = rect.x + (rect.w - iw * scale) / 2.0;
                let ty = rect.y + (rect.h - ih * scale) / 2.0;
                paint.shader = Pattern::new(
                    Pixmap::as_ref(bitmap),
                    SpreadMode::Pad,
                    FilterQuality::Bilinear,
                    1.0,
                    Transform::from_row(scale, 0.0, 0.0, scale, tx, ty),
                );
            }
        }
        self.pixmap
            .fill_path(&path, &paint, FillRule::Winding, Transform::identity(), None);
        Ok(())
    }

    fn draw_bitmap(&mut self, bitmap: &Pixmap, dest: Bounds, crop: Option<Bounds>) -> Result<(), DrawError> {
        let src = crop.unwrap_or(Bounds::new(
            0.0,
            0.0,
            bitmap.width() as f32,
            bitmap.height() as f32,
        ));
        if src.w <= 0.0 || src.h <= 0.0 {
            return Err(DrawError::Geometry(format!("crop {src:?}")));
        }
        let sx = dest.w / src.w;
        let sy = dest.h / src.h;
        let paint = Paint {
            shader: Pattern::new(
                bitmap.as_ref(),
                SpreadMode::Pad,
                FilterQuality::Bilinear,
                1.0,
                Transform::from_row(sx, 0.0, 0.0, sy, dest.x - src.x * sx, dest.y - src.y * sy),
            ),
            anti_alias: false,
            ..Paint::default()
        };
        self.pixmap
            .fill_rect(dest.to_rect()?, &paint, Transform::identity(), None);
        Ok(())
    }

    fn measure_text(&self, text: &str, style: &TextStyle) -> Result<f32, DrawError> {
        if text.is_empty() {
            return Ok(0.0);
        }
        let h = (style.size * 2.0).ceil().max(1.0) as u32;
        let left = TextStyle {
            align: Align::Left,
            ..style.clone()
        };
        let tree = self.text_tree(text, 0.0, style.size, 8192, h, &left)?;
        let root = tree.root();
        if !root.has_children() {
            return Ok(0.0);
        }
        Ok(root.abs_bounding_box().width())
    }

    fn draw_text(&mut self, text: &str, bounds: Bounds, style: &TextStyle) -> Result<(), DrawError> {
        if text.is_empty() {
            return Ok(());
        }
        let x = match style.align {
            Align::Left => bounds.x,
            Align::Center => bounds.x + bounds.w / 2.0,
            Align::Right => bounds.right(),
        };
        let baseline = bounds.y + (bounds.h + style.size * 0.7) / 2.0;
        let (w, h) = (self.pixmap.width(), self.pixmap.height());
        let tree = self.text_tree(text, x, baseline, w, h, style)?;
        resvg::render(&tree, Transform::identity(), &mut self.pixmap.as_mut());
        Ok(())
    }

    fn draw_line(&mut self, from: (f32, f32), to: (f32, f32), color: Color, width: f32) -> Result<(), DrawError> {
        let mut pb = PathBuilder::new();
        pb.move_to(from.0, from.1);
        pb.line_to(to.0, to.1);
        let path = pb
            .finish()
            .ok_or_else(|| DrawError::Geometry(format!("line {from:?} -> {to:?}")))?;
        let mut paint = Paint {
            anti_alias: true,
            ..Paint::default()
        };
        paint.set_color(color);
        let stroke = Stroke {
            width,
            ..Stroke::default()
        };
        self.pixmap
            .stroke_path(&path, &paint, &stroke, Transform::identity(), None);
        Ok(())
    }
}

fn gradient(start: Point, end: Point, from: Color, to: Color) -> tiny_skia::Shader<'static> {
    LinearGradient::new(
        start,
        end,
        vec![GradientStop::new(0.0, from), GradientStop::new(1.0, to)],
        SpreadMode::Pad,
        Transform::identity(),
    )
    // 起止点重合时退化为纯色
    .unwrap_or(tiny_skia::Shader::SolidColor(from))
}

fn rounded_rect_path(rect: Bounds, radius: f32) -> Result<Path, DrawError> {
    let r = radius.max(0.0).min(rect.w / 2.0).min(rect.h / 2.0);
    if r <= 0.0 {
        return Ok(PathBuilder::from_rect(rect.to_rect()?));
    }
    let (x, y, right, bottom) = (rect.x, rect.y, rect.right(), rect.bottom());
    let mut pb = PathBuilder::new();
    pb.move_to(x + r, y);
    pb.line_to(right - r, y);
    pb.quad_to(right, y, right, y + r);
    pb.line_to(right, bottom - r);
    pb.quad_to(right, bottom, right - r, bottom);
    pb.line_to(x + r, bottom);
    pb.quad_to(x, bottom, x, bottom - r);
    pb.line_to(x, y + r);
    pb.quad_to(x, y, x + r, y);
    pb.close();
    pb.finish()
        .ok_or_else(|| DrawError::Geometry(format!("rounded rect {rect:?}")))
}

fn escape_xml(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// 分配一块透明像素缓冲
pub fn new_pixmap(width: u32, height: u32) -> Result<Pixmap, DrawError> {
    Pixmap::new(width, height).ok_or(DrawError::Surface { width, height })
}

/// 解码图片字节；给定 `fill_to` 时按 cover 方式缩放裁剪到该尺寸。
pub fn decode_pixmap(
    bytes: &[u8],
    fill_to: Option<(u32, u32)>,
    fast: bool,
) -> Result<Pixmap, image::ImageError> {
    let img = image::load_from_memory(bytes)?;
    let img = match fill_to {
        Some((w, h)) => {
            let filter = if fast {
                FilterType::Triangle
            } else {
                FilterType::Lanczos3
            };
            img.resize_to_fill(w, h, filter)
        }
        None => img,
    };
    let rgba = img.to_rgba8();
    let (w, h) = rgba.dimensions();
    let mut data = rgba.into_raw();
    // tiny-skia 使用预乘 alpha
    for px in data.chunks_exact_mut(4) {
        let a = u16::from(px[3]);
        for c in &mut px[..3] {
            *c = ((u16::from(*c) * a + 127) / 255) as u8;
        }
    }
    IntSize::from_wh(w, h)
        .and_then(|size| Pixmap::from_vec(data, size))
        .ok_or_else(|| {
            image::ImageError::Parameter(image::error::ParameterError::from_kind(
                image::error::ParameterErrorKind::DimensionMismatch,
            ))
        })
}

/// 将像素缓冲编码为 PNG（反预乘为直通 alpha）
pub fn encode_png(pixmap: &Pixmap, fast: bool) -> Result<Vec<u8>, DrawError> {
    let (w, h) = (pixmap.width(), pixmap.height());
    let mut rgba = Vec::with_capacity(pixmap.data().len());
    for px in pixmap.pixels() {
        let c = px.demultiply();
        rgba.extend_from_slice(&[c.red(), c.green(), c.blue(), c.alpha()]);
    }

    let mut out = Vec::with_capacity(rgba.len() / 2);
    {
        let mut encoder = png::Encoder::new(&mut out, w, h);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        if fast {
            encoder.set_compression(png::Compression::Fast);
            encoder.set_filter(png::FilterType::NoFilter);
        } else {
            encoder.set_compression(png::Compression::Default);
            encoder.set_filter(png::FilterType::Paeth);
        }
        let mut writer = encoder
            .write_header()
            .map_err(|e| DrawError::Encode(format!("PNG write_header error: {e}")))?;
        writer
            .write_image_data(&rgba)
            .map_err(|e| DrawError::Encode(format!("PNG write_image_data error: {e}")))?;
        writer
            .finish()
            .map_err(|e| DrawError::Encode(format!("PNG finish error: {e}")))?;
    }
    Ok(out)
}

/// 解析 `#RRGGBB` / `#RRGGBBAA`（`#` 可省略）
pub fn parse_hex_color(raw: &str) -> Option<Color> {
    let hex = raw.trim().trim_start_matches('#');
    let byte = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
    match hex.len() {
        6 => Some(Color::from_rgba8(byte(0)?, byte(2)?, byte(4)?, 255)),
        8 => Some(Color::from_rgba8(byte(0)?, byte(2)?, byte(4)?, byte(6)?)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::{Bounds, Canvas, Fill, SkiaCanvas, decode_pixmap, encode_png, new_pixmap, parse_hex_color};
    use resvg::usvg::fontdb;
    use std::sync::Arc;
    use tiny_skia::Color;

    #[test]
    fn parses_hex_colors() {
        let c = parse_hex_color("#ff8000").expect("rgb").to_color_u8();
        assert_eq!((c.red(), c.green(), c.blue(), c.alpha()), (255, 128, 0, 255));
        let c = parse_hex_color("00000080").expect("rgba").to_color_u8();
        assert_eq!(c.alpha(), 128);
        assert!(parse_hex_color("#12345").is_none());
        assert!(parse_hex_color("zzzzzz").is_none());
    }

    #[test]
    fn png_roundtrip_keeps_dimensions_and_cover_resize() {
        let mut src = new_pixmap(40, 20).expect("pixmap");
        src.fill(Color::from_rgba8(10, 200, 30, 255));
        let bytes = encode_png(&src, true).expect("encode");
        let decoded = decode_pixmap(&bytes, Some((16, 16)), true).expect("decode");
        assert_eq!((decoded.width(), decoded.height()), (16, 16));
        let px = decoded.pixel(8, 8).expect("pixel");
        assert_eq!(px.alpha(), 255);
        assert!(px.green() > 150);
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        assert!(decode_pixmap(b"not an image", None, true).is_err());
    }

    #[test]
    fn skia_canvas_fills_and_blits() {
        let mut target = new_pixmap(64, 64).expect("pixmap");
        let mut tile = new_pixmap(4, 4).expect("tile");
        tile.fill(Color::from_rgba8(0, 0, 255, 255));
        {
            let mut canvas = SkiaCanvas::new(&mut target, Arc::new(fontdb::Database::new()), "sans-serif");
            canvas
                .fill_rounded_rect(
                    Bounds::new(0.0, 0.0, 32.0, 32.0),
                    6.0,
                    &Fill::Solid(Color::from_rgba8(255, 0, 0, 255)),
                )
                .expect("fill");
            canvas
                .draw_bitmap(&tile, Bounds::new(32.0, 32.0, 32.0, 32.0), None)
                .expect("blit");
            // 没有可用字体时文字不产生像素，但不是错误
            canvas
                .draw_text("Hello", Bounds::new(0.0, 40.0, 30.0, 20.0), &super::TextStyle::new(12.0, Color::WHITE))
                .expect("text");
        }
        let red = target.pixel(16, 16).expect("pixel");
        assert_eq!(red.red(), 255);
        let blue = target.pixel(48, 48).expect("pixel");
        assert_eq!(blue.blue(), 255);
        assert!(Bounds::new(0.0, 0.0, 10.0, 10.0).contains(&Bounds::new(2.0, 2.0, 8.0, 8.0)));
    }
}
