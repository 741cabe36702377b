pub mod datatypes;
pub mod utils;
pub mod subrecord;
pub mod value;
pub mod formid;
pub mod record;
pub mod schema;
pub mod defs;
pub mod group;
pub mod plugin;
pub mod config;

// 重新导出主要结构
pub use config::{LoadOptions, RecordErrorPolicy, UnknownSignaturePolicy};
pub use formid::{FileId, FormId, MasterList};
pub use group::{Group, GroupChild, GroupType};
pub use plugin::{Plugin, PluginRecord, PluginStats};
pub use record::{RawRecord, Record, RecordHeader};
pub use schema::{RecordSchema, SchemaRegistry};
pub use subrecord::Signature;
pub use utils::EspError;
pub use value::{AttrMap, Value};

// 常量定义
pub const SUPPORTED_EXTENSIONS: &[&str] = &["esp", "esm", "esl"];
