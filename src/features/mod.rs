/// 健康检查
pub mod health;

/// 商店图渲染
pub mod shop;
