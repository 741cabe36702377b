use super::{Plugin, PluginRecord};
use serde::Serialize;
use std::collections::BTreeMap;

/// 插件统计信息
#[derive(Debug, Clone, Serialize)]
pub struct PluginStats {
    pub name: String,
    pub is_master: bool,
    pub is_light: bool,
    pub is_localized: bool,
    pub masters: Vec<String>,
    pub group_count: usize,
    pub record_count: usize,
    /// 未解码（无模式或解码失败）的记录数
    pub raw_count: usize,
    /// 各签名的记录数
    pub by_signature: BTreeMap<String, usize>,
}

impl std::fmt::Display for PluginStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== 插件统计信息 ===")?;
        writeln!(f, "名称: {}", self.name)?;
        writeln!(f, "主文件: {}", if self.is_master { "是" } else { "否" })?;
        writeln!(f, "轻量级: {}", if self.is_light { "是" } else { "否" })?;
        writeln!(f, "本地化: {}", if self.is_localized { "是" } else { "否" })?;
        writeln!(f, "依赖主文件数: {}", self.masters.len())?;
        for master in &self.masters {
            writeln!(f, "  - {}", master)?;
        }
        writeln!(f, "组数量: {}", self.group_count)?;
        writeln!(f, "记录数量: {} (未解码 {})", self.record_count, self.raw_count)?;
        for (signature, count) in &self.by_signature {
            writeln!(f, "  {}: {}", signature, count)?;
        }
        Ok(())
    }
}

impl Plugin {
    /// 获取统计信息
    pub fn get_stats(&self) -> PluginStats {
        let mut by_signature = BTreeMap::new();
        let mut raw_count = 0;
        for record in self.records() {
            *by_signature.entry(record.signature()).or_insert(0) += 1;
            if matches!(record, PluginRecord::Raw(_)) {
                raw_count += 1;
            }
        }

        PluginStats {
            name: self.get_name().to_string(),
            is_master: self.is_master(),
            is_light: self.is_light(),
            is_localized: self.is_localized(),
            masters: self.masters().masters().iter().map(|m| m.to_string()).collect(),
            group_count: self.groups.len() + self.groups.iter().map(|g| g.count_subgroups()).sum::<usize>(),
            record_count: by_signature.values().sum(),
            raw_count,
            by_signature,
        }
    }
}
