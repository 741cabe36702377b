use crate::datatypes::{read_i32, read_u16, read_u32};
use crate::plugin::PluginRecord;
use crate::record::RawRecord;
use crate::subrecord::Signature;
use crate::utils::EspError;
use std::io::{Cursor, Read};

/// 组类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupType {
    /// 顶层组（标签为记录签名）
    Top,
    /// 世界空间子组
    WorldChildren,
    InteriorCellBlock,
    InteriorCellSubBlock,
    ExteriorCellBlock,
    ExteriorCellSubBlock,
    /// 单元格子组
    CellChildren,
    TopicChildren,
    CellPersistentChildren,
    CellTemporaryChildren,
    QuestChildren,
    /// 未知类型
    Unknown(i32),
}

impl GroupType {
    /// 转换为i32值
    pub fn to_i32(&self) -> i32 {
        match self {
            GroupType::Top => 0,
            GroupType::WorldChildren => 1,
            GroupType::InteriorCellBlock => 2,
            GroupType::InteriorCellSubBlock => 3,
            GroupType::ExteriorCellBlock => 4,
            GroupType::ExteriorCellSubBlock => 5,
            GroupType::CellChildren => 6,
            GroupType::TopicChildren => 7,
            GroupType::CellPersistentChildren => 8,
            GroupType::CellTemporaryChildren => 9,
            GroupType::QuestChildren => 10,
            GroupType::Unknown(value) => *value,
        }
    }

    /// 标签是否为父记录的磁盘 FormID（随主文件列表变化）
    pub fn label_is_form_id(&self) -> bool {
        matches!(
            self,
            GroupType::WorldChildren
                | GroupType::CellChildren
                | GroupType::TopicChildren
                | GroupType::CellPersistentChildren
                | GroupType::CellTemporaryChildren
                | GroupType::QuestChildren
        )
    }
}

impl From<i32> for GroupType {
    fn from(value: i32) -> Self {
        match value {
            0 => GroupType::Top,
            1 => GroupType::WorldChildren,
            2 => GroupType::InteriorCellBlock,
            3 => GroupType::InteriorCellSubBlock,
            4 => GroupType::ExteriorCellBlock,
            5 => GroupType::ExteriorCellSubBlock,
            6 => GroupType::CellChildren,
            7 => GroupType::TopicChildren,
            8 => GroupType::CellPersistentChildren,
            9 => GroupType::CellTemporaryChildren,
            10 => GroupType::QuestChildren,
            _ => GroupType::Unknown(value),
        }
    }
}

/// 组结构（大小在写入时重新计算，不保存）
#[derive(Debug, Clone)]
pub struct Group {
    /// 标签
    pub label: [u8; 4],
    /// 组类型
    pub group_type: GroupType,
    /// 时间戳
    pub timestamp: u16,
    /// 版本控制信息
    pub version_control_info: u16,
    /// 未知字段
    pub unknown: u32,
    /// 子元素
    pub children: Vec<GroupChild>,
}

/// 组子元素
#[derive(Debug, Clone)]
pub enum GroupChild {
    /// 子组
    Group(Box<Group>),
    /// 记录
    Record(PluginRecord),
}

impl Group {
    pub const HEADER_SIZE: usize = 24;

    /// 新建空的顶层组
    pub fn top(signature: Signature) -> Self {
        Group {
            label: signature.0,
            group_type: GroupType::Top,
            timestamp: 0,
            version_control_info: 0,
            unknown: 0,
            children: Vec::new(),
        }
    }

    /// 解析组；记录以未解码形式保存
    pub fn parse(cursor: &mut Cursor<&[u8]>) -> Result<Self, EspError> {
        // 检查是否有足够的数据读取头部
        if cursor.position() + Self::HEADER_SIZE as u64 > cursor.get_ref().len() as u64 {
            return Err(EspError::InvalidFormat("Insufficient data for group header".into()));
        }

        let mut type_bytes = [0u8; 4];
        cursor.read_exact(&mut type_bytes)?;
        if &type_bytes != b"GRUP" {
            return Err(EspError::InvalidFormat(format!(
                "Expected GRUP, found {}", String::from_utf8_lossy(&type_bytes)
            )));
        }

        let size = read_u32(cursor)?;
        if size > 200_000_000 {  // 200MB限制
            return Err(EspError::InvalidFormat(format!("组大小异常: {} bytes (可能数据损坏)", size)));
        }
        if (size as usize) < Self::HEADER_SIZE {
            return Err(EspError::InvalidFormat(format!("组大小太小: {} bytes (最小应为24字节)", size)));
        }

        let mut label = [0u8; 4];
        cursor.read_exact(&mut label)?;
        let group_type = GroupType::from(read_i32(cursor)?);
        let timestamp = read_u16(cursor)?;
        let version_control_info = read_u16(cursor)?;
        let unknown = read_u32(cursor)?;

        let data_size = size as u64 - Self::HEADER_SIZE as u64;
        if cursor.position() + data_size > cursor.get_ref().len() as u64 {
            return Err(EspError::InvalidFormat(format!(
                "Insufficient data for group data: expected {} bytes", data_size
            )));
        }
        let data_end = cursor.position() + data_size;

        let mut children = Vec::new();
        while cursor.position() < data_end {
            // 预读取4字节判断类型
            let peek_pos = cursor.position();
            let mut peek_bytes = [0u8; 4];
            cursor.read_exact(&mut peek_bytes)?;
            cursor.set_position(peek_pos);

            if &peek_bytes == b"GRUP" {
                children.push(GroupChild::Group(Box::new(Group::parse(cursor)?)));
            } else {
                let record = RawRecord::parse(cursor)?;
                children.push(GroupChild::Record(PluginRecord::Raw(record)));
            }
        }
        if cursor.position() != data_end {
            return Err(EspError::InvalidFormat(format!(
                "组 {} 的子元素越过了组边界", String::from_utf8_lossy(&label)
            )));
        }

        Ok(Group {
            label,
            group_type,
            timestamp,
            version_control_info,
            unknown,
            children,
        })
    }

    /// 顶层组的记录签名
    pub fn signature(&self) -> Option<Signature> {
        (self.group_type == GroupType::Top).then_some(Signature(self.label))
    }

    /// 获取组标签字符串
    pub fn get_label_string(&self) -> String {
        String::from_utf8_lossy(&self.label).into_owned()
    }

    /// 获取所有记录（递归）
    pub fn records(&self) -> Vec<&PluginRecord> {
        let mut records = Vec::new();
        self.collect_records(&mut records);
        records
    }

    fn collect_records<'a>(&'a self, records: &mut Vec<&'a PluginRecord>) {
        for child in &self.children {
            match child {
                GroupChild::Group(group) => group.collect_records(records),
                GroupChild::Record(record) => records.push(record),
            }
        }
    }

    /// 获取所有记录的可变引用（递归）
    pub fn records_mut(&mut self) -> Vec<&mut PluginRecord> {
        let mut records = Vec::new();
        self.collect_records_mut(&mut records);
        records
    }

    fn collect_records_mut<'a>(&'a mut self, records: &mut Vec<&'a mut PluginRecord>) {
        for child in &mut self.children {
            match child {
                GroupChild::Group(group) => group.collect_records_mut(records),
                GroupChild::Record(record) => records.push(record),
            }
        }
    }

    /// 递归移除不满足条件的记录，返回移除数量
    pub fn retain_records(&mut self, keep: &mut impl FnMut(&PluginRecord) -> bool) -> usize {
        let before = self.children.len();
        let mut removed = 0;
        self.children.retain_mut(|child| match child {
            GroupChild::Group(group) => {
                removed += group.retain_records(keep);
                true
            }
            GroupChild::Record(record) => keep(record),
        });
        removed + before - self.children.len()
    }

    /// 记录总数（递归）
    pub fn count_records(&self) -> usize {
        self.children.iter().map(|child| match child {
            GroupChild::Group(group) => group.count_records(),
            GroupChild::Record(_) => 1,
        }).sum()
    }

    /// 子组总数（递归，不含自身）
    pub fn count_subgroups(&self) -> usize {
        self.children.iter().map(|child| match child {
            GroupChild::Group(group) => 1 + group.count_subgroups(),
            GroupChild::Record(_) => 0,
        }).sum()
    }

    /// 是否含有标签为 FormID 的子组（递归）
    pub fn has_form_id_labels(&self) -> bool {
        self.group_type.label_is_form_id()
            || self.children.iter().any(|child| match child {
                GroupChild::Group(group) => group.has_form_id_labels(),
                GroupChild::Record(_) => false,
            })
    }
}
