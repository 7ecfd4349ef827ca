//! 共享模板布局：把条目装箱进分区网格、把分区分配到画板列，并在同一遍中
//! 绘制卡片底图与记录位置元数据。
//!
//! 元数据与位图只能成对产出：两者都由 [`BoardPlan`] 中的同一组坐标派生，
//! 语言阶段据此把文字叠加到正确位置。

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tiny_skia::{Color, Pixmap};

use super::assets::AssetProvider;
use super::drawing::{Align, Bounds, Canvas, Fill, SkiaCanvas, TextStyle, new_pixmap};
use super::types::{Entry, Section};
use crate::error::DrawError;

/// 布局常量（像素）
#[derive(Debug, Clone)]
pub struct LayoutMetrics {
    pub card_width: f32,
    pub card_height: f32,
    /// 分区内卡片间距，也是半卡上下两格之间的间距
    pub card_gap: f32,
    pub card_radius: f32,
    /// 分区标题行高度
    pub section_header: f32,
    /// 同一画板列内分区之间的间距
    pub section_gap: f32,
    /// 画板列之间的间距
    pub column_gutter: f32,
    pub margin: f32,
    /// 画板顶部为标题保留的高度
    pub header_height: f32,
    pub footer_height: f32,
    /// 分区每行的卡片列数
    pub section_columns: usize,
    /// 画板列数上限
    pub board_columns: usize,
    pub min_width: f32,
}

impl Default for LayoutMetrics {
    fn default() -> Self {
        Self {
            card_width: 256.0,
            card_height: 400.0,
            card_gap: 12.0,
            card_radius: 14.0,
            section_header: 56.0,
            section_gap: 32.0,
            column_gutter: 48.0,
            margin: 48.0,
            header_height: 200.0,
            footer_height: 80.0,
            section_columns: 4,
            board_columns: 3,
            min_width: 1200.0,
        }
    }
}

impl LayoutMetrics {
    fn half_height(&self) -> f32 {
        (self.card_height - self.card_gap) / 2.0
    }

    /// `n` 张卡并排的像素宽度
    fn span_width(&self, n: usize) -> f32 {
        if n == 0 {
            return 0.0;
        }
        n as f32 * self.card_width + (n - 1) as f32 * self.card_gap
    }

    fn rows_height(&self, rows: usize) -> f32 {
        if rows == 0 {
            return 0.0;
        }
        rows as f32 * self.card_height + (rows - 1) as f32 * self.card_gap
    }
}

/// 卡片在卡片列中占据的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardSlot {
    Full,
    HalfTop,
    HalfBottom,
}

impl CardSlot {
    pub fn is_full(self) -> bool {
        matches!(self, CardSlot::Full)
    }
}

#[derive(Debug, Clone)]
pub struct PlacedCard {
    /// 在分区 `entries` 中的下标
    pub entry_index: usize,
    /// 分区内的卡片列序号（跨行连续编号）
    pub column: usize,
    pub slot: CardSlot,
    pub bounds: Bounds,
}

#[derive(Debug, Clone)]
pub struct PlacedSection {
    /// 在请求 `sections` 中的下标
    pub section_index: usize,
    pub board_column: usize,
    /// 含标题行的分区外框
    pub bounds: Bounds,
    pub cards: Vec<PlacedCard>,
}

/// 纯计算的布局结果
#[derive(Debug, Clone)]
pub struct BoardPlan {
    pub width: u32,
    pub height: u32,
    pub columns: usize,
    pub sections: Vec<PlacedSection>,
}

/// 单个条目的文字叠加位置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryLocation {
    pub entry_id: String,
    pub name: Bounds,
    pub price: Bounds,
    /// 仅整卡保留横幅位置
    pub banner: Option<Bounds>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionLocation {
    pub section_id: String,
    pub name_label: Option<Bounds>,
    pub entries: Vec<EntryLocation>,
}

/// 与某一张共享模板位图配对的位置元数据
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationMetadata {
    /// 配对位图的尺寸
    pub width: u32,
    pub height: u32,
    pub sections: Vec<SectionLocation>,
}

impl LocationMetadata {
    pub fn entry_count(&self) -> usize {
        self.sections.iter().map(|s| s.entries.len()).sum()
    }

    /// 是否与给定位图尺寸匹配
    pub fn matches(&self, pixmap: &Pixmap) -> bool {
        self.width == pixmap.width() && self.height == pixmap.height()
    }
}

struct PackedSection {
    section_index: usize,
    slots: Vec<(usize, usize, CardSlot)>,
    card_columns: usize,
    width: f32,
    height: f32,
}

pub struct LayoutEngine {
    metrics: LayoutMetrics,
    footer_text: String,
}

impl LayoutEngine {
    pub fn new(metrics: LayoutMetrics, footer_text: impl Into<String>) -> Self {
        Self {
            metrics,
            footer_text: footer_text.into(),
        }
    }

    /// 按分数游标装箱一个分区的条目。
    ///
    /// 游标以半格为单位：整卡先把游标推进到下一个整列再占一整列，
    /// 半卡占半列，同一列上下各放一张。返回（条目下标, 卡片列, 格位）与使用的卡片列数。
    fn pack_entries(entries: &[Entry]) -> (Vec<(usize, usize, CardSlot)>, usize) {
        let mut halves = 0usize;
        let mut slots = Vec::with_capacity(entries.len());
        for (index, entry) in entries.iter().enumerate() {
            if entry.is_full() {
                halves = halves.next_multiple_of(2);
                slots.push((index, halves / 2, CardSlot::Full));
                halves += 2;
            } else {
                let slot = if halves % 2 == 0 {
                    CardSlot::HalfTop
                } else {
                    CardSlot::HalfBottom
                };
                slots.push((index, halves / 2, slot));
                halves += 1;
            }
        }
        (slots, halves.div_ceil(2))
    }

    /// 纯布局计算：不触碰任何绘制表面。
    pub fn plan(&self, sections: &[Section]) -> BoardPlan {
        let m = &self.metrics;
        let per_row = m.section_columns.max(1);

        let packed: Vec<PackedSection> = sections
            .iter()
            .enumerate()
            .filter(|(_, s)| !s.entries.is_empty())
            .map(|(section_index, s)| {
                let (slots, card_columns) = Self::pack_entries(&s.entries);
                let rows = card_columns.div_ceil(per_row);
                PackedSection {
                    section_index,
                    slots,
                    card_columns,
                    width: m.span_width(card_columns.min(per_row)),
                    height: m.section_header + m.rows_height(rows),
                }
            })
            .collect();

        // 贪心：每个分区进入当前最矮的画板列，并列时取下标最小者
        let columns = m.board_columns.max(1).min(packed.len().max(1));
        let mut heights = vec![0.0f32; columns];
        let mut widths = vec![0.0f32; columns];
        let mut assigned = Vec::with_capacity(packed.len());
        for p in &packed {
            let mut target = 0;
            for (i, h) in heights.iter().enumerate() {
                if *h < heights[target] {
                    target = i;
                }
            }
            let y = if heights[target] > 0.0 {
                heights[target] + m.section_gap
            } else {
                0.0
            };
            heights[target] = y + p.height;
            widths[target] = widths[target].max(p.width);
            assigned.push((target, y));
        }

        let mut origins = Vec::with_capacity(columns);
        let mut x = m.margin;
        for w in &widths {
            origins.push(x);
            x += w + m.column_gutter;
        }
        let content_width = widths.iter().sum::<f32>() + m.column_gutter * (columns - 1) as f32;
        let width = (m.margin * 2.0 + content_width).max(m.min_width);
        let tallest = heights.iter().copied().fold(0.0f32, f32::max);
        let top = m.margin + m.header_height;
        let height = top + tallest + m.section_gap + m.footer_height + m.margin;

        let placed = packed
            .into_iter()
            .zip(assigned)
            .map(|(p, (board_column, y))| {
                let origin_x = origins[board_column];
                let origin_y = top + y;
                let cards = p
                    .slots
                    .iter()
                    .map(|&(entry_index, column, slot)| {
                        let row = column / per_row;
                        let cx = origin_x + (column % per_row) as f32 * (m.card_width + m.card_gap);
                        let cy = origin_y
                            + m.section_header
                            + row as f32 * (m.card_height + m.card_gap);
                        let bounds = match slot {
                            CardSlot::Full => Bounds::new(cx, cy, m.card_width, m.card_height),
                            CardSlot::HalfTop => Bounds::new(cx, cy, m.card_width, m.half_height()),
                            CardSlot::HalfBottom => Bounds::new(
                                cx,
                                cy + m.half_height() + m.card_gap,
                                m.card_width,
                                m.half_height(),
                            ),
                        };
                        PlacedCard {
                            entry_index,
                            column,
                            slot,
                            bounds,
                        }
                    })
                    .collect();
                debug_assert!(p.card_columns > 0);
                PlacedSection {
                    section_index: p.section_index,
                    board_column,
                    bounds: Bounds::new(origin_x, origin_y, p.width, p.height),
                    cards,
                }
            })
            .collect();

        BoardPlan {
            width: width.ceil() as u32,
            height: height.ceil() as u32,
            columns,
            sections: placed,
        }
    }

    /// 由一张卡片的外框派生文字区域；绘制与元数据都只经由这里取坐标。
    fn card_regions(&self, card: &PlacedCard) -> CardRegions {
        let b = card.bounds;
        let pad = 10.0;
        let plate_h = (b.h * 0.3).max(64.0).min(b.h);
        let plate = Bounds::new(b.x, b.bottom() - plate_h, b.w, plate_h);
        let line_h = (plate_h - pad * 2.0) / 2.0;
        CardRegions {
            image: Bounds::new(b.x, b.y, b.w, b.h - plate_h),
            plate,
            name: Bounds::new(b.x + pad, plate.y + pad, b.w - pad * 2.0, line_h),
            price: Bounds::new(b.x + pad, plate.y + pad + line_h, b.w - pad * 2.0, line_h),
            banner: card
                .slot
                .is_full()
                .then(|| Bounds::new(b.x + 8.0, b.y + 8.0, b.w * 0.6, 30.0)),
        }
    }

    /// 在给定表面上绘制计划，并在同一遍中记录元数据。
    pub fn render<C: Canvas + ?Sized>(
        &self,
        plan: &BoardPlan,
        sections: &[Section],
        canvas: &mut C,
    ) -> Result<LocationMetadata, DrawError> {
        let m = &self.metrics;
        let mut meta = LocationMetadata {
            width: plan.width,
            height: plan.height,
            sections: Vec::with_capacity(plan.sections.len()),
        };

        for placed in &plan.sections {
            let section = &sections[placed.section_index];
            let header = Bounds::new(
                placed.bounds.x,
                placed.bounds.y,
                placed.bounds.w,
                m.section_header - 8.0,
            );
            if section.overflow > 0 {
                let style = TextStyle::new(26.0, Color::from_rgba8(255, 255, 255, 200))
                    .align(Align::Right)
                    .bold();
                canvas.draw_text(&format!("+{}", section.overflow), header, &style)?;
            }

            let mut entries = Vec::with_capacity(placed.cards.len());
            for card in &placed.cards {
                let entry = &section.entries[card.entry_index];
                let regions = self.card_regions(card);
                self.draw_card(canvas, entry, card, &regions)?;
                entries.push(EntryLocation {
                    entry_id: entry.id.clone(),
                    name: regions.name,
                    price: regions.price,
                    banner: regions.banner,
                });
            }

            meta.sections.push(SectionLocation {
                section_id: section.id.clone(),
                name_label: section.name.as_ref().map(|_| header),
                entries,
            });
        }

        if !self.footer_text.is_empty() {
            let footer = Bounds::new(
                0.0,
                plan.height as f32 - m.margin - m.footer_height,
                plan.width as f32,
                m.footer_height,
            );
            let style = TextStyle::new(28.0, Color::from_rgba8(255, 255, 255, 160)).align(Align::Center);
            canvas.draw_text(&self.footer_text, footer, &style)?;
        }
        Ok(meta)
    }

    fn draw_card<C: Canvas + ?Sized>(
        &self,
        canvas: &mut C,
        entry: &Entry,
        card: &PlacedCard,
        regions: &CardRegions,
    ) -> Result<(), DrawError> {
        let radius = self.metrics.card_radius;
        let frame = if entry.special {
            Fill::Vertical {
                top: Color::from_rgba8(255, 214, 92, 255),
                bottom: Color::from_rgba8(184, 120, 24, 255),
            }
        } else {
            Fill::Vertical {
                top: Color::from_rgba8(44, 92, 196, 255),
                bottom: Color::from_rgba8(22, 40, 110, 255),
            }
        };
        canvas.fill_rounded_rect(card.bounds, radius, &frame)?;

        if let Some(image) = &entry.resolved_image {
            let inset = if entry.special { 4.0 } else { 0.0 };
            let area = Bounds::new(
                regions.image.x + inset,
                regions.image.y + inset,
                regions.image.w - inset * 2.0,
                regions.image.h - inset,
            );
            canvas.fill_rounded_rect(area, radius, &Fill::Cover(Arc::clone(image)))?;
        }

        canvas.fill_rounded_rect(
            regions.plate,
            radius,
            &Fill::Solid(Color::from_rgba8(8, 12, 30, 210)),
        )
    }

    /// 分配位图并渲染共享模板；位图与元数据作为一个整体返回。
    pub fn build(
        &self,
        sections: &[Section],
        assets: &AssetProvider,
    ) -> Result<(Pixmap, LocationMetadata), DrawError> {
        let plan = self.plan(sections);
        let mut pixmap = new_pixmap(plan.width, plan.height)?;
        let meta = {
            let mut canvas = SkiaCanvas::new(&mut pixmap, assets.fonts(), assets.font_family());
            self.render(&plan, sections, &mut canvas)?
        };
        tracing::debug!(
            width = plan.width,
            height = plan.height,
            columns = plan.columns,
            sections = meta.sections.len(),
            entries = meta.entry_count(),
            "共享模板布局完成"
        );
        Ok((pixmap, meta))
    }
}

struct CardRegions {
    image: Bounds,
    plate: Bounds,
    name: Bounds,
    price: Bounds,
    banner: Option<Bounds>,
}

#[cfg(test)]
pub(crate) mod testing {
    use super::super::drawing::{Bounds, Canvas, Fill, TextStyle};
    use crate::error::DrawError;
    use tiny_skia::{Color, Pixmap};

    /// 记录调用的假表面；文字宽度按字符数估算
    #[derive(Default)]
    pub struct RecordingCanvas {
        pub width: u32,
        pub height: u32,
        pub rects: Vec<Bounds>,
        pub texts: Vec<(String, Bounds, f32)>,
        pub bitmaps: Vec<Bounds>,
        pub lines: usize,
    }

    impl RecordingCanvas {
        pub fn new(width: u32, height: u32) -> Self {
            Self {
                width,
                height,
                ..Self::default()
            }
        }
    }

    impl Canvas for RecordingCanvas {
        fn width(&self) -> u32 {
            self.width
        }
        fn height(&self) -> u32 {
            self.height
        }
        fn fill_rounded_rect(&mut self, rect: Bounds, _radius: f32, _fill: &Fill) -> Result<(), DrawError> {
            self.rects.push(rect);
            Ok(())
        }
        fn draw_bitmap(&mut self, _bitmap: &Pixmap, dest: Bounds, _crop: Option<Bounds>) -> Result<(), DrawError> {
            self.bitmaps.push(dest);
            Ok(())
        }
        fn measure_text(&self, text: &str, style: &TextStyle) -> Result<f32, DrawError> {
            Ok(text.chars().count() as f32 * style.size * 0.6)
        }
        fn draw_text(&mut self, text: &str, bounds: Bounds, style: &TextStyle) -> Result<(), DrawError> {
            self.texts.push((text.to_string(), bounds, style.size));
            Ok(())
        }
        fn draw_line(&mut self, _from: (f32, f32), _to: (f32, f32), _color: Color, _width: f32) -> Result<(), DrawError> {
            self.lines += 1;
            Ok(())
        }
    }
}
