use crate::datatypes::{read_u16, read_u32, RecordFlags};
use crate::formid::{keep_fids, FileId, FormId};
use crate::subrecord::Signature;
use crate::utils::EspError;
use crate::value::{AttrMap, Value};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::Serialize;
use std::collections::HashSet;
use std::io::{Cursor, Read, Write};

/// 记录头部（24字节）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordHeader {
    /// 记录类型
    pub signature: Signature,
    /// 标志位（原始32位数据）
    pub flags: u32,
    /// 磁盘上的 FormID（未解析）
    pub form_id: u32,
    /// 时间戳
    pub timestamp: u16,
    /// 版本控制信息
    pub version_control_info: u16,
    /// 格式版本（form version）
    pub form_version: u16,
    /// 未知字段
    pub unknown: u16,
}

impl RecordHeader {
    pub const SIZE: usize = 24;

    pub fn new(signature: Signature, form_id: u32, form_version: u16) -> Self {
        Self {
            signature,
            flags: 0,
            form_id,
            timestamp: 0,
            version_control_info: 0,
            form_version,
            unknown: 0,
        }
    }

    pub fn get_flags(&self) -> RecordFlags {
        RecordFlags::from_bits_truncate(self.flags)
    }

    pub fn is_compressed(&self) -> bool {
        self.flags & RecordFlags::COMPRESSED.bits() != 0
    }
}

/// 未解码的记录：头部 + 解压后的子记录流
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub header: RecordHeader,
    /// 子记录数据（已解压）
    pub data: Vec<u8>,
    /// 原始压缩数据（未修改时原样写回）
    pub original_compressed_data: Option<Vec<u8>>,
}

impl RawRecord {
    pub fn new(header: RecordHeader, data: Vec<u8>) -> Self {
        Self {
            header,
            data,
            original_compressed_data: None,
        }
    }

    /// 解析记录
    pub fn parse(cursor: &mut Cursor<&[u8]>) -> Result<Self, EspError> {
        Self::validate_header_size(cursor)?;

        let mut type_bytes = [0u8; 4];
        cursor.read_exact(&mut type_bytes)?;
        let signature = Signature(type_bytes);

        let data_size = read_u32(cursor)?;
        Self::validate_data_size(data_size, &signature)?;

        let flags = read_u32(cursor)?;
        let form_id = read_u32(cursor)?;
        let timestamp = read_u16(cursor)?;
        let version_control_info = read_u16(cursor)?;
        let form_version = read_u16(cursor)?;
        let unknown = read_u16(cursor)?;

        Self::validate_data_availability(cursor, data_size)?;

        let mut data = vec![0u8; data_size as usize];
        cursor.read_exact(&mut data)?;

        let header = RecordHeader {
            signature,
            flags,
            form_id,
            timestamp,
            version_control_info,
            form_version,
            unknown,
        };

        if header.is_compressed() {
            let decompressed = Self::decompress_data(&data)
                .map_err(|e| e.in_record(&signature.to_string(), form_id))?;
            tracing::trace!(%signature, compressed = data.len(), size = decompressed.len(), "decompressed record");
            Ok(RawRecord {
                header,
                data: decompressed,
                original_compressed_data: Some(data),
            })
        } else {
            Ok(RawRecord::new(header, data))
        }
    }

    /// 验证头部大小
    fn validate_header_size(cursor: &Cursor<&[u8]>) -> Result<(), EspError> {
        if cursor.position() + RecordHeader::SIZE as u64 > cursor.get_ref().len() as u64 {
            return Err(EspError::InvalidFormat("Insufficient data for record header".into()));
        }
        Ok(())
    }

    /// 验证数据大小
    fn validate_data_size(data_size: u32, signature: &Signature) -> Result<(), EspError> {
        if data_size > 100_000_000 {  // 100MB限制
            return Err(EspError::InvalidFormat(format!(
                "记录 {} 数据大小异常: {} bytes (可能数据损坏)", signature, data_size
            )));
        }
        Ok(())
    }

    /// 验证数据可用性
    fn validate_data_availability(cursor: &Cursor<&[u8]>, data_size: u32) -> Result<(), EspError> {
        if cursor.position() + data_size as u64 > cursor.get_ref().len() as u64 {
            return Err(EspError::InvalidFormat(format!(
                "Insufficient data for record data: expected {} bytes", data_size
            )));
        }
        Ok(())
    }

    /// 解压缩数据
    fn decompress_data(data: &[u8]) -> Result<Vec<u8>, EspError> {
        if data.len() < 4 {
            return Err(EspError::Compression("压缩数据太短，无法包含解压大小".into()));
        }

        let mut data_cursor = Cursor::new(data);
        let decompressed_size = read_u32(&mut data_cursor)?;
        if decompressed_size > 50_000_000 {  // 50MB限制
            return Err(EspError::Compression(format!(
                "解压大小过大: {} bytes (可能数据损坏)", decompressed_size
            )));
        }

        let mut decoder = ZlibDecoder::new(&data[4..]);
        let mut decompressed = Vec::with_capacity(decompressed_size as usize);
        decoder.read_to_end(&mut decompressed)
            .map_err(|e| EspError::Compression(e.to_string()))?;

        if decompressed.len() != decompressed_size as usize {
            return Err(EspError::Compression(format!(
                "解压大小不匹配: 期望 {} bytes，实际 {} bytes",
                decompressed_size, decompressed.len()
            )));
        }

        Ok(decompressed)
    }

    /// 压缩子记录数据（4字节解压大小 + zlib流）
    fn compress_data(data: &[u8]) -> Result<Vec<u8>, EspError> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data)?;
        let compressed_data = encoder.finish()?;

        let mut result = Vec::with_capacity(compressed_data.len() + 4);
        result.extend_from_slice(&(data.len() as u32).to_le_bytes());
        result.extend_from_slice(&compressed_data);
        Ok(result)
    }

    /// 写入记录（头部 + 数据，按标志位决定是否压缩）
    pub fn write(&self, output: &mut Vec<u8>) -> Result<(), EspError> {
        let compressed;
        let payload: &[u8] = if self.header.is_compressed() {
            match &self.original_compressed_data {
                Some(original) => original,
                None => {
                    compressed = Self::compress_data(&self.data)?;
                    &compressed
                }
            }
        } else {
            &self.data
        };

        let header = &self.header;
        output.extend_from_slice(header.signature.as_bytes());
        output.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        output.extend_from_slice(&header.flags.to_le_bytes());
        output.extend_from_slice(&header.form_id.to_le_bytes());
        output.extend_from_slice(&header.timestamp.to_le_bytes());
        output.extend_from_slice(&header.version_control_info.to_le_bytes());
        output.extend_from_slice(&header.form_version.to_le_bytes());
        output.extend_from_slice(&header.unknown.to_le_bytes());
        output.extend_from_slice(payload);
        Ok(())
    }
}

/// 解码后的记录：签名 + 头部 + 属性表
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub signature: String,
    pub flags: u32,
    pub form_id: FormId,
    pub timestamp: u16,
    pub version_control_info: u16,
    pub form_version: u16,
    pub unknown: u16,
    pub attrs: AttrMap,
}

impl Record {
    pub fn new(header: &RecordHeader, form_id: FormId, attrs: AttrMap) -> Self {
        Self {
            signature: header.signature.to_string(),
            flags: header.flags,
            form_id,
            timestamp: header.timestamp,
            version_control_info: header.version_control_info,
            form_version: header.form_version,
            unknown: header.unknown,
            attrs,
        }
    }

    pub fn get(&self, attr: &str) -> Option<&Value> {
        self.attrs.get(attr)
    }

    pub fn set(&mut self, attr: &str, value: Value) {
        self.attrs.insert(attr.to_string(), value);
    }

    /// 获取编辑器ID
    pub fn get_editor_id(&self) -> Option<&str> {
        self.get("eid").and_then(Value::as_str)
    }

    pub fn get_flags(&self) -> RecordFlags {
        RecordFlags::from_bits_truncate(self.flags)
    }

    /// 移除/置空所有不在 `keep` 集合内的 FormID 引用（原地修改）
    pub fn keep_fids(&mut self, keep: &HashSet<FileId>) {
        keep_fids(&mut self.attrs, keep);
    }

    /// 返回过滤后的副本
    pub fn with_kept_fids(&self, keep: &HashSet<FileId>) -> Record {
        let mut filtered = self.clone();
        filtered.keep_fids(keep);
        filtered
    }

    /// 以给定的磁盘 FormID 与数据重建头部
    pub fn header_with(&self, form_id: u32) -> Result<RecordHeader, EspError> {
        let bytes: [u8; 4] = self.signature.as_bytes().try_into().map_err(|_| {
            EspError::InvalidFormat(format!("invalid record signature: {:?}", self.signature))
        })?;
        Ok(RecordHeader {
            signature: Signature(bytes),
            flags: self.flags,
            form_id,
            timestamp: self.timestamp,
            version_control_info: self.version_control_info,
            form_version: self.form_version,
            unknown: self.unknown,
        })
    }
}
