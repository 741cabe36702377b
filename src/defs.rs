/// 记录布局定义（配置数据）
///
/// - **common**: 多种记录共用的子记录片段（编辑器ID、名称、边界、关键字、物品、位置等）
/// - **fallout4**: 具体记录类型的布局与注册表
pub mod common;
pub mod fallout4;

pub use fallout4::registry;
