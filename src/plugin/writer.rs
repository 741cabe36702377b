use super::{master_entry, Plugin, PluginRecord};
use crate::defs::fallout4::tes4;
use crate::formid::{FileId, MasterList};
use crate::group::{Group, GroupChild};
use crate::record::RawRecord;
use crate::schema::SchemaRegistry;
use crate::utils::EspError;
use crate::value::Value;
use std::path::Path;

impl Plugin {
    /// 写出时使用的主文件列表
    ///
    /// 在原列表末尾按出现顺序追加已解码记录引用到的新文件，已有文件的索引不变。
    pub fn target_masters(&self) -> Result<MasterList, EspError> {
        let mut target = self.masters.clone();
        target.extend_from_attrs(&self.header.attrs)?;
        for record in self.decoded_records() {
            if let Some(file) = record.form_id.file() {
                target.add_master(file)?;
            }
            target.extend_from_attrs(&record.attrs)?;
        }
        Ok(target)
    }

    /// 序列化整个插件
    pub fn to_bytes(&self, registry: &SchemaRegistry) -> Result<Vec<u8>, EspError> {
        let target = self.target_masters()?;
        if target.len() > self.masters.len() {
            // 插件自身的索引会后移，未解码的字节无法随之更新
            let raw_count = self.records().filter(|r| r.is_raw()).count();
            if raw_count > 0 || self.groups.iter().any(Group::has_form_id_labels) {
                return Err(EspError::InvalidFormat(format!(
                    "{}: master list grows from {} to {} while {} records stay undecoded",
                    self.get_name(), self.masters.len(), target.len(), raw_count
                )));
            }
        }

        let mut output = Vec::new();
        self.write_header(&target, &mut output)?;
        for group in &self.groups {
            Self::write_group(group, registry, &target, &mut output)?;
        }
        tracing::debug!(plugin = %self.file_id(), bytes = output.len(), masters = target.len(), "serialized plugin");
        Ok(output)
    }

    /// 写入文件
    pub fn write_to_file(&self, path: &Path, registry: &SchemaRegistry) -> Result<(), EspError> {
        let output = self.to_bytes(registry)?;
        std::fs::write(path, output)?;
        Ok(())
    }

    /// 写入 TES4 头部：主文件列表与记录数按写出内容更新
    fn write_header(&self, target: &MasterList, output: &mut Vec<u8>) -> Result<(), EspError> {
        let mut header = self.header.clone();

        let existing = header.get("masters").and_then(Value::as_list).unwrap_or(&[]);
        let entries: Vec<Value> = target
            .masters()
            .iter()
            .map(|file| {
                existing
                    .iter()
                    .find(|entry| {
                        entry
                            .as_group()
                            .and_then(|g| g.get("name"))
                            .and_then(Value::as_str)
                            .is_some_and(|name| &FileId::from(name) == file)
                    })
                    .cloned()
                    .unwrap_or_else(|| master_entry(file))
            })
            .collect();
        header.set("masters", Value::List(entries));

        if header.get("numRecords").is_some() {
            let count: usize = self
                .groups
                .iter()
                .map(|g| 1 + g.count_subgroups() + g.count_records())
                .sum();
            header.set("numRecords", Value::Int(count as i64));
        }

        let data = tes4()?
            .encode_attrs(&header.attrs, header.form_version, target)
            .map_err(|e| e.in_record("TES4", 0))?;
        RawRecord::new(header.header_with(0)?, data).write(output)
    }

    /// 写入组（大小按实际内容回填）
    fn write_group(
        group: &Group,
        registry: &SchemaRegistry,
        target: &MasterList,
        output: &mut Vec<u8>,
    ) -> Result<(), EspError> {
        output.extend_from_slice(b"GRUP");

        // 临时占位符，稍后计算实际大小
        let size_pos = output.len();
        output.extend_from_slice(&[0u8; 4]);

        output.extend_from_slice(&group.label);
        output.extend_from_slice(&group.group_type.to_i32().to_le_bytes());
        output.extend_from_slice(&group.timestamp.to_le_bytes());
        output.extend_from_slice(&group.version_control_info.to_le_bytes());
        output.extend_from_slice(&group.unknown.to_le_bytes());

        for child in &group.children {
            match child {
                GroupChild::Group(subgroup) => Self::write_group(subgroup, registry, target, output)?,
                GroupChild::Record(PluginRecord::Raw(raw)) => raw.write(output)?,
                GroupChild::Record(PluginRecord::Decoded(record)) => {
                    registry.encode_record(record, target)?.write(output)?
                }
            }
        }

        // 大小包含"GRUP"的4字节
        let actual_size = (output.len() - size_pos + 4) as u32;
        output[size_pos..size_pos + 4].copy_from_slice(&actual_size.to_le_bytes());
        Ok(())
    }
}
