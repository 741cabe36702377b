use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::ser::{Serialize, SerializeStruct, Serializer};
use std::io::{Cursor, Write};
use encoding_rs;
use crate::utils::EspError;

// 基础整数类型读取函数
pub fn read_u8(cursor: &mut Cursor<&[u8]>) -> Result<u8, std::io::Error> {
    cursor.read_u8()
}

pub fn read_i8(cursor: &mut Cursor<&[u8]>) -> Result<i8, std::io::Error> {
    cursor.read_i8()
}

pub fn read_u16(cursor: &mut Cursor<&[u8]>) -> Result<u16, std::io::Error> {
    cursor.read_u16::<LittleEndian>()
}

pub fn read_i16(cursor: &mut Cursor<&[u8]>) -> Result<i16, std::io::Error> {
    cursor.read_i16::<LittleEndian>()
}

pub fn read_u32(cursor: &mut Cursor<&[u8]>) -> Result<u32, std::io::Error> {
    cursor.read_u32::<LittleEndian>()
}

pub fn read_i32(cursor: &mut Cursor<&[u8]>) -> Result<i32, std::io::Error> {
    cursor.read_i32::<LittleEndian>()
}

pub fn read_f32(cursor: &mut Cursor<&[u8]>) -> Result<f32, std::io::Error> {
    cursor.read_f32::<LittleEndian>()
}

// 基础整数类型写入函数
pub fn write_u8(writer: &mut dyn Write, value: u8) -> Result<(), std::io::Error> {
    writer.write_u8(value)
}

pub fn write_i8(writer: &mut dyn Write, value: i8) -> Result<(), std::io::Error> {
    writer.write_i8(value)
}

pub fn write_u16(writer: &mut dyn Write, value: u16) -> Result<(), std::io::Error> {
    writer.write_u16::<LittleEndian>(value)
}

pub fn write_i16(writer: &mut dyn Write, value: i16) -> Result<(), std::io::Error> {
    writer.write_i16::<LittleEndian>(value)
}

pub fn write_u32(writer: &mut dyn Write, value: u32) -> Result<(), std::io::Error> {
    writer.write_u32::<LittleEndian>(value)
}

pub fn write_i32(writer: &mut dyn Write, value: i32) -> Result<(), std::io::Error> {
    writer.write_i32::<LittleEndian>(value)
}

pub fn write_f32(writer: &mut dyn Write, value: f32) -> Result<(), std::io::Error> {
    writer.write_f32::<LittleEndian>(value)
}

#[derive(Debug, Clone)]
pub struct RawString {
    pub content: String,
    pub encoding: String,
}

impl RawString {
    /// 解码字符串，与 [`RawString::encode_zstring`] 的编码选择对称
    ///
    /// 只有当字节是合法 UTF-8、且解码结果无法用 windows-1252 表示时才按 UTF-8 解码
    /// （编码时只有这种文本会回退到 UTF-8），其余一律按 windows-1252 解码。
    pub fn decode(data: &[u8]) -> Self {
        if let Ok(text) = std::str::from_utf8(data) {
            if !is_cp1252_encodable(text) {
                return RawString {
                    content: text.to_string(),
                    encoding: "utf-8".to_string(),
                };
            }
        }

        // windows-1252 覆盖全部 256 个字节值，不会失败
        let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(data);
        RawString {
            content: decoded.into_owned(),
            encoding: "windows-1252".to_string(),
        }
    }

    /// Z字符串解析(以null结尾)
    pub fn parse_zstring(data: &[u8]) -> Self {
        let null_pos = data.iter().position(|&b| b == 0).unwrap_or(data.len());
        Self::decode(&data[..null_pos])
    }

    /// 编码为Z字符串
    ///
    /// 优先使用 windows-1252（游戏原生编码），无法表示时回退到 UTF-8。
    pub fn encode_zstring(text: &str) -> Vec<u8> {
        let (encoded, _, had_errors) = encoding_rs::WINDOWS_1252.encode(text);
        let mut bytes = if had_errors {
            text.as_bytes().to_vec()
        } else {
            encoded.into_owned()
        };
        bytes.push(0);
        bytes
    }
}

fn is_cp1252_encodable(text: &str) -> bool {
    let (_, _, had_errors) = encoding_rs::WINDOWS_1252.encode(text);
    !had_errors
}

// 记录标志位定义
bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RecordFlags: u32 {
        const MASTER_FILE = 0x00000001;        // ESM标志
        const DELETED = 0x00000020;            // 已删除
        const LOCALIZED = 0x00000080;          // 本地化
        const LIGHT_MASTER = 0x00000200;       // 轻量级主文件
        const PERSISTENT = 0x00000400;         // 持久化
        const DISABLED = 0x00000800;           // 禁用
        const IGNORED = 0x00001000;            // 忽略
        const VISIBLE_DISTANT = 0x00008000;    // 远距离可见
        const COMPRESSED = 0x00040000;         // 压缩
    }
}

/// 位域描述表：有序的 (位索引, 名称) 对
#[derive(Debug)]
pub struct FlagTable {
    bits: &'static [(u32, &'static str)],
}

impl FlagTable {
    pub const fn new(bits: &'static [(u32, &'static str)]) -> Self {
        Self { bits }
    }

    /// 按名称查找位索引
    pub fn bit(&self, name: &str) -> Option<u32> {
        self.bits.iter().find(|(_, n)| *n == name).map(|(b, _)| *b)
    }

    pub fn entries(&self) -> &'static [(u32, &'static str)] {
        self.bits
    }
}

/// 带描述表的标志位值
#[derive(Debug, Clone, Copy)]
pub struct Flags {
    bits: u64,
    table: &'static FlagTable,
}

impl Flags {
    pub fn new(bits: u64, table: &'static FlagTable) -> Self {
        Self { bits, table }
    }

    pub fn bits(&self) -> u64 {
        self.bits
    }

    pub fn table(&self) -> &'static FlagTable {
        self.table
    }

    pub fn is_set(&self, bit: u32) -> bool {
        bit < 64 && self.bits & (1u64 << bit) != 0
    }

    pub fn set_bit(&mut self, bit: u32, on: bool) {
        if bit >= 64 {
            return;
        }
        if on {
            self.bits |= 1u64 << bit;
        } else {
            self.bits &= !(1u64 << bit);
        }
    }

    /// 按名称读取标志（未声明的名称视为未设置）
    pub fn get(&self, name: &str) -> bool {
        self.table.bit(name).map(|b| self.is_set(b)).unwrap_or(false)
    }

    /// 按名称设置标志
    pub fn set(&mut self, name: &str, on: bool) -> Result<(), EspError> {
        let bit = self.table.bit(name)
            .ok_or_else(|| EspError::UnknownFlag(name.to_string()))?;
        self.set_bit(bit, on);
        Ok(())
    }

    /// 所有已设置且有名称的标志
    pub fn names_set(&self) -> Vec<&'static str> {
        self.table.entries().iter()
            .filter(|(bit, _)| self.is_set(*bit))
            .map(|(_, name)| *name)
            .collect()
    }
}

impl PartialEq for Flags {
    fn eq(&self, other: &Self) -> bool {
        self.bits == other.bits
    }
}

impl Serialize for Flags {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Flags", 2)?;
        state.serialize_field("bits", &self.bits)?;
        state.serialize_field("set", &self.names_set())?;
        state.end()
    }
}
