use crate::utils::EspError;
use crate::value::{AttrMap, Value};
use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};

/// 插件文件身份（文件名，比较时不区分大小写）
#[derive(Debug, Clone)]
pub struct FileId(String);

impl FileId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn key(&self) -> String {
        self.0.to_ascii_lowercase()
    }
}

impl From<&str> for FileId {
    fn from(name: &str) -> Self {
        FileId(name.to_string())
    }
}

impl From<String> for FileId {
    fn from(name: String) -> Self {
        FileId(name)
    }
}

impl PartialEq for FileId {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for FileId {}

impl Hash for FileId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl PartialOrd for FileId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FileId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for FileId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// 已解析的 FormID：(来源文件, 低24位对象ID)
///
/// 磁盘上的值为 `(主文件索引 << 24) | 对象ID`，只有结合所属文件的主文件列表才有意义。
/// 原始值 0 表示空引用，不指向任何文件。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FormId {
    file: Option<FileId>,
    object_id: u32,
}

impl FormId {
    pub const NULL: FormId = FormId { file: None, object_id: 0 };

    pub fn new(file: FileId, object_id: u32) -> Self {
        Self {
            file: Some(file),
            object_id: object_id & 0x00FF_FFFF,
        }
    }

    pub fn file(&self) -> Option<&FileId> {
        self.file.as_ref()
    }

    pub fn object_id(&self) -> u32 {
        self.object_id
    }

    pub fn is_null(&self) -> bool {
        self.file.is_none()
    }
}

impl fmt::Display for FormId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file {
            Some(file) => write!(f, "{:06X}|{}", self.object_id, file),
            None => f.write_str("NULL"),
        }
    }
}

/// 主文件列表：插件依赖的文件（有序、只追加），末尾隐含插件自身
#[derive(Debug, Clone)]
pub struct MasterList {
    owner: FileId,
    masters: Vec<FileId>,
}

impl MasterList {
    /// 单个插件最多引用 255 个主文件（索引 0xFF 之前）
    pub const MAX_MASTERS: usize = 0xFF;

    pub fn new(owner: FileId, masters: Vec<FileId>) -> Self {
        Self { owner, masters }
    }

    pub fn owner(&self) -> &FileId {
        &self.owner
    }

    pub fn masters(&self) -> &[FileId] {
        &self.masters
    }

    pub fn len(&self) -> usize {
        self.masters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.masters.is_empty()
    }

    /// 文件在列表中的索引；插件自身的索引等于主文件数量
    pub fn index_of(&self, file: &FileId) -> Option<usize> {
        self.masters.iter().position(|m| m == file)
            .or_else(|| (file == &self.owner).then_some(self.masters.len()))
    }

    /// 解码磁盘上的 FormID
    pub fn decode_fid(&self, raw: u32) -> Result<FormId, EspError> {
        if raw == 0 {
            return Ok(FormId::NULL);
        }
        let index = (raw >> 24) as usize;
        let object_id = raw & 0x00FF_FFFF;
        let file = match index.cmp(&self.masters.len()) {
            Ordering::Less => self.masters[index].clone(),
            Ordering::Equal => self.owner.clone(),
            Ordering::Greater => {
                return Err(EspError::FormIdMasterNotFound {
                    master: format!("#{:02X} ({} masters)", index, self.masters.len()),
                    owner: self.owner.to_string(),
                })
            }
        };
        Ok(FormId::new(file, object_id))
    }

    /// 编码 FormID；引用的文件必须已在列表中
    pub fn encode_fid(&self, fid: &FormId) -> Result<u32, EspError> {
        let Some(file) = fid.file() else {
            return Ok(0);
        };
        let index = self.index_of(file).ok_or_else(|| EspError::FormIdMasterNotFound {
            master: file.to_string(),
            owner: self.owner.to_string(),
        })?;
        Ok(((index as u32) << 24) | fid.object_id())
    }

    /// 查找或追加主文件，返回其索引
    pub fn add_master(&mut self, file: &FileId) -> Result<usize, EspError> {
        if let Some(index) = self.index_of(file) {
            return Ok(index);
        }
        if self.masters.len() >= Self::MAX_MASTERS {
            return Err(EspError::TooManyMasters(self.owner.to_string()));
        }
        tracing::debug!(owner = %self.owner, master = %file, "appending master");
        self.masters.push(file.clone());
        Ok(self.masters.len() - 1)
    }

    /// 把属性树中引用到的所有文件追加到列表（已存在的保持原顺序）
    pub fn extend_from_attrs(&mut self, attrs: &AttrMap) -> Result<(), EspError> {
        let mut files = Vec::new();
        for value in attrs.values() {
            collect_files(value, &mut files);
        }
        for file in files {
            self.add_master(file)?;
        }
        Ok(())
    }
}

fn collect_files<'a>(value: &'a Value, files: &mut Vec<&'a FileId>) {
    match value {
        Value::FormId(fid) => {
            if let Some(file) = fid.file() {
                files.push(file);
            }
        }
        Value::List(items) => items.iter().for_each(|v| collect_files(v, files)),
        Value::Group(map) => map.values().for_each(|v| collect_files(v, files)),
        _ => {}
    }
}

fn in_scope(fid: &FormId, keep: &HashSet<FileId>) -> bool {
    fid.file().map_or(true, |file| keep.contains(file))
}

/// 列表元素是否保留：FormID 元素直接判断，组元素判断其直接字段
fn element_kept(value: &Value, keep: &HashSet<FileId>) -> bool {
    match value {
        Value::FormId(fid) => in_scope(fid, keep),
        Value::Group(map) => map.values().all(|v| match v {
            Value::FormId(fid) => in_scope(fid, keep),
            _ => true,
        }),
        _ => true,
    }
}

fn keep_value(value: &mut Value, keep: &HashSet<FileId>) {
    match value {
        Value::FormId(fid) => {
            if !in_scope(fid, keep) {
                *fid = FormId::NULL;
            }
        }
        Value::List(items) => {
            items.retain(|item| element_kept(item, keep));
            items.iter_mut().for_each(|item| keep_value(item, keep));
        }
        Value::Group(map) => keep_fids(map, keep),
        _ => {}
    }
}

/// 过滤属性树中不在 `keep` 集合内的 FormID
///
/// 列表中的越界元素被移除（保持剩余元素的相对顺序），
/// 单值 FormID 属性被置为空引用，嵌套组与数组递归处理。
pub fn keep_fids(attrs: &mut AttrMap, keep: &HashSet<FileId>) {
    for value in attrs.values_mut() {
        keep_value(value, keep);
    }
}
