use crate::formid::MasterList;
use crate::subrecord::{Signature, SubrecordRef};
use crate::utils::EspError;
use crate::value::AttrMap;

/// 解码上下文：来自记录头部与所属文件的信息，外加少量解码状态
pub struct LoadContext<'a> {
    /// 记录头部的格式版本
    pub form_version: u16,
    /// 所属文件的主文件列表（用于解析 FormID）
    pub masters: &'a MasterList,
    /// 所属文件是否本地化（字符串存为 STRING 表 ID）
    pub localized: bool,
    previous: Option<Signature>,
}

impl<'a> LoadContext<'a> {
    pub fn new(form_version: u16, masters: &'a MasterList, localized: bool) -> Self {
        Self {
            form_version,
            masters,
            localized,
            previous: None,
        }
    }

    /// 上一个已分派的子记录签名
    pub fn previous(&self) -> Option<Signature> {
        self.previous
    }

    pub(crate) fn set_previous(&mut self, signature: Signature) {
        self.previous = Some(signature);
    }
}

/// 编码上下文：目标文件的主文件列表与记录格式版本
pub struct DumpContext<'a> {
    pub form_version: u16,
    pub masters: &'a MasterList,
}

impl<'a> DumpContext<'a> {
    pub fn new(form_version: u16, masters: &'a MasterList) -> Self {
        Self { form_version, masters }
    }
}

/// 子记录编解码器
///
/// 一个编解码器认领若干子记录签名，把它们的负载解码为目标属性表中的属性，
/// 并能从属性表重新编码出完整的子记录（签名 + 大小 + 负载）。
/// 编解码器在构建后不可变，可在线程间共享。
pub trait Codec: Send + Sync {
    /// 认领的子记录签名
    fn signatures(&self) -> Vec<Signature>;

    /// 写入目标属性表的属性名
    fn attrs(&self) -> Vec<&'static str>;

    /// 为新建记录填充默认值
    fn set_defaults(&self, target: &mut AttrMap);

    /// 解码一个子记录
    fn load(
        &self,
        target: &mut AttrMap,
        sub: &SubrecordRef<'_>,
        ctx: &mut LoadContext<'_>,
    ) -> Result<(), EspError>;

    /// 编码为零个或多个完整子记录；属性缺失时不输出
    fn dump(&self, source: &AttrMap, out: &mut Vec<u8>, ctx: &DumpContext<'_>) -> Result<(), EspError>;

    /// 属性表中是否存在本编解码器的任何属性
    fn has_data(&self, source: &AttrMap) -> bool {
        self.attrs().iter().any(|attr| source.contains_key(*attr))
    }
}
