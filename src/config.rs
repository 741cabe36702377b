use crate::utils::EspError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 遇到模式未声明的子记录签名时的处理方式
///
/// 直接调用 [`crate::schema::RecordSchema::decode`] 时 `Skip` 跳过该子记录；
/// 文件加载器则把整条记录保留为原始字节，保证写回时不丢数据。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownSignaturePolicy {
    /// 记录警告并跳过（加载器中：保留整条记录的原始字节）
    #[default]
    Skip,
    /// 作为解码错误返回
    Fail,
}

/// 单条记录解码失败时文件加载器的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordErrorPolicy {
    /// 保留为未解码的原始记录，写回时原样输出
    #[default]
    Skip,
    /// 中止整个文件的加载
    Abort,
}

/// 加载选项
///
/// 可从 JSON 文件读取，缺失的字段取默认值：
///
/// ```json
/// { "unknown_signatures": "fail", "record_errors": "abort", "parallel": false }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadOptions {
    pub unknown_signatures: UnknownSignaturePolicy,
    pub record_errors: RecordErrorPolicy,
    /// 按顶层组并行解码
    pub parallel: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            unknown_signatures: UnknownSignaturePolicy::Skip,
            record_errors: RecordErrorPolicy::Skip,
            parallel: true,
        }
    }
}

impl LoadOptions {
    /// 严格模式：任何未知签名或解码失败都作为错误
    pub fn strict() -> Self {
        Self {
            unknown_signatures: UnknownSignaturePolicy::Fail,
            record_errors: RecordErrorPolicy::Abort,
            ..Self::default()
        }
    }

    pub fn from_json_file(path: &Path) -> Result<Self, EspError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let options: LoadOptions = serde_json::from_str(r#"{ "unknown_signatures": "fail" }"#).unwrap();
        assert_eq!(options.unknown_signatures, UnknownSignaturePolicy::Fail);
        assert_eq!(options.record_errors, RecordErrorPolicy::Skip);
        assert!(options.parallel);
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("options.json");
        std::fs::write(&path, r#"{ "record_errors": "abort", "parallel": false }"#).unwrap();
        let options = LoadOptions::from_json_file(&path).unwrap();
        assert_eq!(options.record_errors, RecordErrorPolicy::Abort);
        assert!(!options.parallel);

        std::fs::write(&path, r#"{ "record_errors": "maybe" }"#).unwrap();
        assert!(matches!(LoadOptions::from_json_file(&path), Err(EspError::JsonError(_))));
    }
}
