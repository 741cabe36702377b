use thiserror::Error;
use std::path::Path;

/// 自定义错误类型
#[derive(Error, Debug)]
pub enum EspError {
    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("Subrecord {sig}: payload of {size} bytes matches none of the declared sizes {expected:?}")]
    StructSizeMismatch {
        sig: String,
        size: usize,
        expected: Vec<usize>,
    },

    #[error("Subrecord {sig}: payload of {size} bytes is smaller than the narrowest layout ({min} bytes)")]
    TruncationNotSupported {
        sig: String,
        size: usize,
        min: usize,
    },

    #[error("Subrecord {sig}: array payload of {size} bytes is not a multiple of the element size {element}")]
    ArraySizeMismatch {
        sig: String,
        size: usize,
        element: usize,
    },

    #[error("Record {record}: unknown subrecord signature {sig}")]
    UnknownSubrecordSignature { record: String, sig: String },

    #[error("Subrecord {sig}: decider produced key {key} with no mapped codec")]
    DeciderKeyError { sig: String, key: String },

    #[error("FormID references master {master}, which is not in the master list of {owner}")]
    FormIdMasterNotFound { master: String, owner: String },

    #[error("Master list of {0} is full (255 masters)")]
    TooManyMasters(String),

    #[error("Attribute {attr}: value {value} cannot be represented as {prim}")]
    ValueOutOfRange {
        attr: String,
        value: String,
        prim: String,
    },

    #[error("Attribute {attr}: expected {expected}, found {found}")]
    TypeMismatch {
        attr: String,
        expected: String,
        found: String,
    },

    #[error("Unknown flag: {0}")]
    UnknownFlag(String),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Record {sig} [{form_id:08X}]: {source}")]
    Record {
        sig: String,
        form_id: u32,
        #[source]
        source: Box<EspError>,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl EspError {
    /// 为记录级错误附加记录身份
    pub fn in_record(self, sig: &str, form_id: u32) -> Self {
        match self {
            err @ EspError::Record { .. } => err,
            other => EspError::Record {
                sig: sig.to_string(),
                form_id,
                source: Box::new(other),
            },
        }
    }

    /// 是否为未声明子记录签名导致的错误（穿透记录身份包装）
    pub fn is_unknown_signature(&self) -> bool {
        match self {
            EspError::UnknownSubrecordSignature { .. } => true,
            EspError::Record { source, .. } => source.is_unknown_signature(),
            _ => false,
        }
    }
}

/// 创建文件备份
pub fn create_backup(file_path: &Path) -> Result<std::path::PathBuf, EspError> {
    if !file_path.exists() {
        return Err(EspError::IoError(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "原文件不存在"
        )));
    }

    let timestamp = chrono::Local::now().format("%Y-%m-%d-%H-%M-%S");
    let backup_path = file_path.with_extension(format!("{}.bak", timestamp));

    std::fs::copy(file_path, &backup_path)
        .map_err(EspError::IoError)?;

    Ok(backup_path)
}
