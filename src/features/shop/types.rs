use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tiny_skia::Pixmap;

use crate::error::AppError;

/// 商店图渲染请求
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ShopRequest {
    /// 语言标签（如 en、de、pt-BR）
    #[schema(example = "en")]
    pub locale: String,
    /// 是否为全新的商店版本；为 true 时强制重建共享模板
    #[serde(default)]
    pub fresh: bool,
    /// 有序的分区列表
    pub sections: Vec<Section>,
    /// 可选：创作者代码徽章
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator_code: Option<CreatorCode>,
    /// 标题
    #[schema(example = "Item Shop")]
    pub title: String,
    /// 已格式化的日期字符串
    #[schema(example = "Friday, October 18")]
    pub date: String,
    /// 背景选择：命名位图资源；缺省使用固定渐变
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<String>,
}

/// 创作者代码
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreatorCode {
    /// 前缀文案（已本地化），如 "Code"
    pub title: String,
    /// 代码本身
    pub value: String,
}

/// 分区
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    /// 稳定标识（参与 TemplateKey 计算）
    pub id: String,
    /// 已本地化的显示名称
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// 有序条目
    #[serde(default)]
    pub entries: Vec<Entry>,
    /// 未展示的条目数
    #[serde(default)]
    pub overflow: u32,
}

/// 条目（一张卡片）
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    /// 稳定标识
    pub id: String,
    /// 已本地化的名称
    #[serde(default)]
    pub name: String,
    /// 尺寸权重：>=1 为整卡，<1 为半卡
    #[serde(default = "default_size")]
    pub size: f32,
    /// 价格
    pub price: Price,
    /// 可选：促销横幅
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub banner: Option<Banner>,
    /// 图片来源
    #[serde(default)]
    pub image: ImageSource,
    /// 是否为特殊条目（使用金色卡框）
    #[serde(default)]
    pub special: bool,
    /// 预取阶段解析出的图片，仅在一次渲染内有效，不参与请求身份
    #[serde(skip)]
    pub resolved_image: Option<Arc<Pixmap>>,
}

fn default_size() -> f32 {
    1.0
}

impl Entry {
    /// 是否为整卡（高度为整卡高度）
    pub fn is_full(&self) -> bool {
        self.size >= 1.0
    }
}

/// 价格对
#[derive(Debug, Clone, Copy, Serialize, Deserialize, utoipa::ToSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Price {
    /// 原价
    pub regular: u32,
    /// 现价
    #[serde(rename = "final")]
    pub final_price: u32,
}

impl Price {
    pub fn is_discounted(&self) -> bool {
        self.final_price != self.regular
    }
}

/// 促销横幅
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct Banner {
    pub text: String,
    /// 起始颜色（#RRGGBB 或 #RRGGBBAA）
    #[schema(example = "#ffe500")]
    pub color_start: String,
    /// 结束颜色
    #[schema(example = "#ffaa00")]
    pub color_end: String,
}

/// 图片来源选择
#[derive(Debug, Clone, Default, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImageSource {
    /// 首选地址
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary: Option<String>,
    /// 备用地址
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
}

impl ShopRequest {
    /// 校验必填字段，并按最小粒度剔除不合法的分区/条目。
    ///
    /// 返回被剔除的条目数（用于日志）。
    pub fn sanitize(&mut self) -> Result<usize, AppError> {
        if self.locale.trim().is_empty() {
            return Err(AppError::Validation("locale 不能为空".to_string()));
        }
        if self.title.trim().is_empty() {
            return Err(AppError::Validation("title 不能为空".to_string()));
        }

        let mut dropped = 0usize;
        let mut section_ids = HashSet::new();
        self.sections.retain(|s| {
            if s.id.trim().is_empty() {
                tracing::warn!(entries = s.entries.len(), "丢弃缺少 id 的分区");
                dropped += s.entries.len();
                return false;
            }
            // 分区 id 必须唯一，否则本地化叠加无法定位到对应分区
            if !section_ids.insert(s.id.clone()) {
                tracing::warn!(section = %s.id, entries = s.entries.len(), "丢弃重复 id 的分区");
                dropped += s.entries.len();
                return false;
            }
            true
        });

        for section in &mut self.sections {
            let mut seen = HashSet::new();
            let before = section.entries.len();
            section.entries.retain(|e| {
                let valid = !e.id.trim().is_empty()
                    && e.size.is_finite()
                    && e.size > 0.0
                    && seen.insert(e.id.clone());
                if !valid {
                    tracing::warn!(section = %section.id, entry = %e.id, size = e.size, "丢弃不合法的条目");
                }
                valid
            });
            dropped += before - section.entries.len();
        }
        Ok(dropped)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::{Entry, ImageSource, Price, Section, ShopRequest};

    pub fn entry(id: &str, size: f32) -> Entry {
        Entry {
            id: id.to_string(),
            name: format!("Item {id}"),
            size,
            price: Price {
                regular: 1500,
                final_price: 1500,
            },
            banner: None,
            image: ImageSource {
                primary: Some(format!("https://img.test/{id}.png")),
                fallback: None,
            },
            special: false,
            resolved_image: None,
        }
    }

    pub fn section(id: &str, entries: Vec<Entry>) -> Section {
        Section {
            id: id.to_string(),
            name: Some(format!("Section {id}")),
            entries,
            overflow: 0,
        }
    }

    pub fn request(sections: Vec<Section>) -> ShopRequest {
        ShopRequest {
            locale: "en".to_string(),
            fresh: false,
            sections,
            creator_code: None,
            title: "Item Shop".to_string(),
            date: "Friday, October 18".to_string(),
            background: None,
        }
    }
}
