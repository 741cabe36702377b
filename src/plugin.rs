mod stats;
mod writer;

pub use stats::PluginStats;

use crate::config::{LoadOptions, RecordErrorPolicy, UnknownSignaturePolicy};
use crate::datatypes::{RawString, RecordFlags};
use crate::defs::fallout4::tes4;
use crate::formid::{FileId, FormId, MasterList};
use crate::group::{Group, GroupChild};
use crate::record::{RawRecord, Record};
use crate::schema::{HeaderContext, SchemaRegistry};
use crate::subrecord::{Signature, SubrecordReader};
use crate::utils::EspError;
use crate::value::{AttrMap, Value};
use memmap2::Mmap;
use rayon::prelude::*;
use std::collections::HashSet;
use std::io::Cursor;
use std::path::{Path, PathBuf};

/// 插件中的一条记录：已按模式解码，或保持原始字节
#[derive(Debug, Clone)]
pub enum PluginRecord {
    Decoded(Record),
    /// 没有注册模式或解码失败的记录，写回时原样输出
    Raw(RawRecord),
}

impl PluginRecord {
    pub fn signature(&self) -> String {
        match self {
            PluginRecord::Decoded(record) => record.signature.clone(),
            PluginRecord::Raw(raw) => raw.header.signature.to_string(),
        }
    }

    pub fn as_decoded(&self) -> Option<&Record> {
        match self {
            PluginRecord::Decoded(record) => Some(record),
            PluginRecord::Raw(_) => None,
        }
    }

    pub fn as_decoded_mut(&mut self) -> Option<&mut Record> {
        match self {
            PluginRecord::Decoded(record) => Some(record),
            PluginRecord::Raw(_) => None,
        }
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, PluginRecord::Raw(_))
    }
}

/// ESP插件：TES4 头部 + 组树
#[derive(Debug, Clone)]
pub struct Plugin {
    /// 文件路径
    pub path: PathBuf,
    /// 头部记录（已解码）
    pub header: Record,
    /// 组列表
    pub groups: Vec<Group>,
    /// 主文件列表（解码时使用）
    masters: MasterList,
}

impl Plugin {
    /// 新建空插件
    pub fn new(name: &str, masters: Vec<FileId>) -> Result<Self, EspError> {
        let masters = MasterList::new(FileId::from(name), masters);
        let mut header = tes4()?.new_record(FormId::NULL, 131);
        header.set(
            "masters",
            Value::List(masters.masters().iter().map(master_entry).collect()),
        );
        Ok(Plugin {
            path: PathBuf::from(name),
            header,
            groups: Vec::new(),
            masters,
        })
    }

    /// 从文件加载插件
    ///
    /// ```rust,ignore
    /// let registry = esp_records::defs::registry()?;
    /// let plugin = Plugin::load("example.esp".into(), &registry, &LoadOptions::default())?;
    /// ```
    pub fn load(path: PathBuf, registry: &SchemaRegistry, options: &LoadOptions) -> Result<Self, EspError> {
        // 使用内存映射文件（零拷贝）
        let file = std::fs::File::open(&path)?;
        let mmap = unsafe { Mmap::map(&file)? };

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| EspError::InvalidFormat(format!("无法获取插件名称: {:?}", path)))?;
        let mut plugin = Self::from_bytes(&name, &mmap[..], registry, options)?;
        plugin.path = path;
        Ok(plugin)
    }

    /// 从内存数据解析插件
    pub fn from_bytes(
        name: &str,
        data: &[u8],
        registry: &SchemaRegistry,
        options: &LoadOptions,
    ) -> Result<Self, EspError> {
        let mut cursor = Cursor::new(data);
        let raw_header = RawRecord::parse(&mut cursor)?;
        if raw_header.header.signature != Signature(*b"TES4") {
            return Err(EspError::InvalidFormat(format!(
                "expected TES4 header, found {}", raw_header.header.signature
            )));
        }

        let masters = MasterList::new(FileId::from(name), Self::scan_masters(&raw_header.data)?);
        let header = tes4()?
            .decode_record(&raw_header.header, &raw_header.data, &HeaderContext::new(raw_header.header.form_version, &masters))
            .map_err(|e| e.in_record("TES4", 0))?;
        tracing::debug!(plugin = name, masters = masters.len(), "parsed header");

        let localized = header.get_flags().contains(RecordFlags::LOCALIZED);
        let mut groups = Self::parse_groups(&mut cursor, data, options.parallel)?;
        Self::decode_groups(&mut groups, registry, &masters, localized, options)?;

        Ok(Plugin {
            path: PathBuf::from(name),
            header,
            groups,
            masters,
        })
    }

    /// 预扫描 MAST 子记录，得到解码其余内容所需的主文件列表
    fn scan_masters(data: &[u8]) -> Result<Vec<FileId>, EspError> {
        let mut masters = Vec::new();
        for sub in SubrecordReader::new(data) {
            let sub = sub?;
            if sub.signature == Signature(*b"MAST") {
                masters.push(FileId::from(RawString::parse_zstring(sub.data).content));
            }
        }
        Ok(masters)
    }

    /// 解析所有顶层组
    fn parse_groups(cursor: &mut Cursor<&[u8]>, data: &[u8], parallel: bool) -> Result<Vec<Group>, EspError> {
        let ranges = Self::scan_group_boundaries(cursor, data)?;
        let parse = |&(start, size): &(usize, usize)| {
            let mut group_cursor = Cursor::new(&data[start..start + size]);
            Group::parse(&mut group_cursor)
        };
        if parallel {
            ranges.par_iter().map(parse).collect()
        } else {
            ranges.iter().map(parse).collect()
        }
    }

    /// 扫描顶层组边界（用于并行解析）
    fn scan_group_boundaries(cursor: &mut Cursor<&[u8]>, data: &[u8]) -> Result<Vec<(usize, usize)>, EspError> {
        let mut boundaries = Vec::new();
        let mut pos = cursor.position() as usize;

        while pos < data.len() {
            let Some(head) = data.get(pos..pos + 8) else {
                return Err(EspError::InvalidFormat(format!("在位置 {} 有不完整的组头部", pos)));
            };
            if &head[..4] != b"GRUP" {
                return Err(EspError::InvalidFormat(format!(
                    "在位置 {} 期望 GRUP，但找到 {}", pos, String::from_utf8_lossy(&head[..4])
                )));
            }
            let size = u32::from_le_bytes([head[4], head[5], head[6], head[7]]) as usize;
            if size < Group::HEADER_SIZE || pos + size > data.len() {
                return Err(EspError::InvalidFormat(format!("在位置 {} 发现异常组大小: {} bytes", pos, size)));
            }
            boundaries.push((pos, size));
            pos += size;
        }

        cursor.set_position(pos as u64);
        Ok(boundaries)
    }

    /// 按注册表解码组内记录
    ///
    /// 文件加载器不会丢弃子记录：含有模式未声明子记录的记录在 `skip` 策略下保持原始字节，
    /// 在 `fail` 策略下按解码失败交给 `record_errors` 处理。
    fn decode_groups(
        groups: &mut [Group],
        registry: &SchemaRegistry,
        masters: &MasterList,
        localized: bool,
        options: &LoadOptions,
    ) -> Result<(), EspError> {
        let decode = |group: &mut Group| -> Result<(), EspError> {
            for record in group.records_mut() {
                let PluginRecord::Raw(raw) = record else {
                    continue;
                };
                match registry.decode_record(raw, masters, localized, UnknownSignaturePolicy::Fail) {
                    Ok(Some(decoded)) => *record = PluginRecord::Decoded(decoded),
                    Ok(None) => {}
                    Err(e) if e.is_unknown_signature()
                        && options.unknown_signatures == UnknownSignaturePolicy::Skip =>
                    {
                        tracing::warn!(error = %e, "record has undeclared subrecords, keeping it raw");
                    }
                    Err(e) => match options.record_errors {
                        RecordErrorPolicy::Skip => {
                            tracing::warn!(error = %e, "keeping record undecoded");
                        }
                        RecordErrorPolicy::Abort => return Err(e),
                    },
                }
            }
            Ok(())
        };
        if options.parallel {
            groups.par_iter_mut().try_for_each(decode)
        } else {
            groups.iter_mut().try_for_each(decode)
        }
    }

    /// 获取插件名称
    pub fn get_name(&self) -> &str {
        self.masters.owner().as_str()
    }

    pub fn file_id(&self) -> &FileId {
        self.masters.owner()
    }

    pub fn masters(&self) -> &MasterList {
        &self.masters
    }

    /// 是否为主文件
    pub fn is_master(&self) -> bool {
        self.header.get_flags().contains(RecordFlags::MASTER_FILE)
    }

    /// 是否本地化
    pub fn is_localized(&self) -> bool {
        self.header.get_flags().contains(RecordFlags::LOCALIZED)
    }

    /// 是否为轻量插件：扩展名为 .esl 或设置了 LightMaster 标志
    pub fn is_light(&self) -> bool {
        let esl = Path::new(self.get_name())
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("esl"));
        esl || self.header.get_flags().contains(RecordFlags::LIGHT_MASTER)
    }

    /// 所有记录（不含头部）
    pub fn records(&self) -> impl Iterator<Item = &PluginRecord> {
        self.groups.iter().flat_map(|group| group.records())
    }

    /// 所有已解码的记录
    pub fn decoded_records(&self) -> impl Iterator<Item = &Record> {
        self.records().filter_map(PluginRecord::as_decoded)
    }

    pub fn decoded_records_mut(&mut self) -> impl Iterator<Item = &mut Record> {
        self.groups
            .iter_mut()
            .flat_map(|group| group.records_mut())
            .filter_map(PluginRecord::as_decoded_mut)
    }

    /// 按 FormID 查找已解码记录
    pub fn find(&self, form_id: &FormId) -> Option<&Record> {
        self.decoded_records().find(|record| &record.form_id == form_id)
    }

    /// 添加记录到对应的顶层组（不存在时在末尾新建）
    pub fn add_record(&mut self, record: Record) -> Result<(), EspError> {
        let signature = record.header_with(0)?.signature;
        let index = match self.groups.iter().position(|g| g.signature() == Some(signature)) {
            Some(index) => index,
            None => {
                self.groups.push(Group::top(signature));
                self.groups.len() - 1
            }
        };
        self.groups[index].children.push(GroupChild::Record(PluginRecord::Decoded(record)));
        Ok(())
    }

    /// 只保留对 `keep` 中文件（及插件自身）的引用
    ///
    /// 所有已解码记录执行 `keep_fids`；记录本身属于被移除文件的覆盖记录被删除，
    /// 主文件列表收缩为保留的文件（保持原顺序）。存在未解码记录时无法重排索引，返回错误。
    pub fn keep_masters(&mut self, keep: &HashSet<FileId>) -> Result<(), EspError> {
        let raw_count = self.records().filter(|r| r.is_raw()).count();
        if raw_count > 0 || self.groups.iter().any(Group::has_form_id_labels) {
            return Err(EspError::InvalidFormat(format!(
                "{}: cannot drop masters while {} records stay undecoded", self.get_name(), raw_count
            )));
        }

        let mut keep = keep.clone();
        keep.insert(self.file_id().clone());

        self.header.keep_fids(&keep);
        let mut removed = 0;
        for group in &mut self.groups {
            removed += group.retain_records(&mut |record: &PluginRecord| {
                record
                    .as_decoded()
                    .and_then(|r| r.form_id.file())
                    .map_or(true, |file| keep.contains(file))
            });
        }
        for record in self.decoded_records_mut() {
            record.keep_fids(&keep);
        }

        let kept: Vec<FileId> = self
            .masters
            .masters()
            .iter()
            .filter(|m| keep.contains(*m))
            .cloned()
            .collect();
        tracing::debug!(plugin = %self.file_id(), removed, masters = kept.len(), "filtered masters");
        self.masters = MasterList::new(self.file_id().clone(), kept);
        self.header.set(
            "masters",
            Value::List(self.masters.masters().iter().map(master_entry).collect()),
        );
        Ok(())
    }
}

/// TES4 masters 列表中的一项（MAST + DATA）
fn master_entry(file: &FileId) -> Value {
    let mut entry = AttrMap::new();
    entry.insert("name".into(), Value::Str(file.to_string()));
    entry.insert("size".into(), Value::Bytes(vec![0; 8]));
    Value::Group(entry)
}

impl std::fmt::Display for Plugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.get_stats())
    }
}
