use std::fmt;

use sha2::{Digest, Sha256};

use super::types::Section;

/// 共享模板的缓存身份：由有序的分区 id 序列派生。
///
/// 分区 id 按顺序以长度前缀写入哈希，因此顺序敏感且不存在拼接歧义
/// （`["ab","c"]` 与 `["a","bc"]` 不同）。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TemplateKey(String);

impl TemplateKey {
    pub fn from_section_ids<'a>(ids: impl IntoIterator<Item = &'a str>) -> Self {
        let mut hasher = Sha256::new();
        for id in ids {
            hasher.update((id.len() as u64).to_le_bytes());
            hasher.update(id.as_bytes());
        }
        let digest = hasher.finalize();
        Self(hex::encode(&digest[..16]))
    }

    pub fn from_sections(sections: &[Section]) -> Self {
        Self::from_section_ids(sections.iter().map(|s| s.id.as_str()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `template:<hash>`：共享模板位图
    pub fn template_cache_key(&self) -> String {
        format!("template:{}", self.0)
    }

    /// `template-meta:<hash>`：与共享模板配对的布局元数据
    pub fn metadata_cache_key(&self) -> String {
        format!("template-meta:{}", self.0)
    }

    /// `template:<locale>:<hash>:<generation>`：语言模板。
    ///
    /// 带上共享模板的构建代数，共享模板重建后旧的语言模板自然失效。
    pub fn locale_cache_key(&self, locale: &str, generation: u64) -> String {
        format!("template:{}:{}:{}", locale.to_ascii_lowercase(), self.0, generation)
    }
}

impl fmt::Display for TemplateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `item-image:<entryId>`：单品图片，与所属商店/语言无关
pub fn item_image_key(entry_id: &str) -> String {
    format!("item-image:{entry_id}")
}
