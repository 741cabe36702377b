use crate::datatypes::{
    read_f32, read_i16, read_i32, read_i8, read_u16, read_u32, read_u8, write_f32, write_i16,
    write_i32, write_i8, write_u16, write_u32, write_u8, FlagTable, Flags,
};
use crate::formid::{FormId, MasterList};
use crate::utils::EspError;
use crate::value::Value;
use std::io::{Cursor, Read};

/// 结构体中的基础类型
///
/// 格式代码：`b`/`B` 1字节有/无符号整数，`h`/`H` 2字节，`i`/`I` 4字节，
/// `f` 4字节浮点，`Ns` N字节定长块。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prim {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    F32,
    Block(usize),
}

impl Prim {
    fn from_code(code: char) -> Option<Prim> {
        match code {
            'b' => Some(Prim::I8),
            'B' => Some(Prim::U8),
            'h' => Some(Prim::I16),
            'H' => Some(Prim::U16),
            'i' => Some(Prim::I32),
            'I' => Some(Prim::U32),
            'f' => Some(Prim::F32),
            _ => None,
        }
    }

    pub fn size(&self) -> usize {
        match self {
            Prim::I8 | Prim::U8 => 1,
            Prim::I16 | Prim::U16 => 2,
            Prim::I32 | Prim::U32 | Prim::F32 => 4,
            Prim::Block(n) => *n,
        }
    }

    pub fn is_integer(&self) -> bool {
        !matches!(self, Prim::F32 | Prim::Block(_))
    }

    fn range(&self) -> Option<(i64, i64)> {
        match self {
            Prim::I8 => Some((i8::MIN as i64, i8::MAX as i64)),
            Prim::U8 => Some((0, u8::MAX as i64)),
            Prim::I16 => Some((i16::MIN as i64, i16::MAX as i64)),
            Prim::U16 => Some((0, u16::MAX as i64)),
            Prim::I32 => Some((i32::MIN as i64, i32::MAX as i64)),
            Prim::U32 => Some((0, u32::MAX as i64)),
            Prim::F32 | Prim::Block(_) => None,
        }
    }

    pub fn name(&self) -> String {
        match self {
            Prim::I8 => "int8".into(),
            Prim::U8 => "uint8".into(),
            Prim::I16 => "int16".into(),
            Prim::U16 => "uint16".into(),
            Prim::I32 => "int32".into(),
            Prim::U32 => "uint32".into(),
            Prim::F32 => "float32".into(),
            Prim::Block(n) => format!("{}-byte block", n),
        }
    }

    pub fn default_value(&self) -> Value {
        match self {
            Prim::F32 => Value::Float(0.0),
            Prim::Block(n) => Value::Bytes(vec![0; *n]),
            _ => Value::Int(0),
        }
    }

    pub(crate) fn unpack(&self, cursor: &mut Cursor<&[u8]>) -> Result<Value, EspError> {
        let value = match self {
            Prim::I8 => Value::Int(read_i8(cursor)? as i64),
            Prim::U8 => Value::Int(read_u8(cursor)? as i64),
            Prim::I16 => Value::Int(read_i16(cursor)? as i64),
            Prim::U16 => Value::Int(read_u16(cursor)? as i64),
            Prim::I32 => Value::Int(read_i32(cursor)? as i64),
            Prim::U32 => Value::Int(read_u32(cursor)? as i64),
            Prim::F32 => Value::Float(read_f32(cursor)?),
            Prim::Block(n) => {
                let mut buffer = vec![0u8; *n];
                cursor.read_exact(&mut buffer)?;
                Value::Bytes(buffer)
            }
        };
        Ok(value)
    }

    /// 按宽度写入，超出范围的值报错而不是截断
    pub(crate) fn pack(&self, value: &Value, attr: &str, out: &mut Vec<u8>) -> Result<(), EspError> {
        let mismatch = |expected: &str| EspError::TypeMismatch {
            attr: attr.to_string(),
            expected: expected.to_string(),
            found: value.type_name().to_string(),
        };
        match self {
            Prim::F32 => {
                let v = match value {
                    Value::Float(f) => *f,
                    Value::Int(i) => *i as f32,
                    _ => return Err(mismatch("float")),
                };
                write_f32(out, v)?;
            }
            Prim::Block(n) => {
                let Value::Bytes(bytes) = value else {
                    return Err(mismatch("bytes"));
                };
                if bytes.len() != *n {
                    return Err(EspError::ValueOutOfRange {
                        attr: attr.to_string(),
                        value: format!("{} bytes", bytes.len()),
                        prim: self.name(),
                    });
                }
                out.extend_from_slice(bytes);
            }
            _ => {
                let v = value.as_int().ok_or_else(|| mismatch("int"))?;
                if let Some((min, max)) = self.range() {
                    if v < min || v > max {
                        return Err(EspError::ValueOutOfRange {
                            attr: attr.to_string(),
                            value: v.to_string(),
                            prim: self.name(),
                        });
                    }
                }
                match self {
                    Prim::I8 => write_i8(out, v as i8)?,
                    Prim::U8 => write_u8(out, v as u8)?,
                    Prim::I16 => write_i16(out, v as i16)?,
                    Prim::U16 => write_u16(out, v as u16)?,
                    Prim::I32 => write_i32(out, v as i32)?,
                    _ => write_u32(out, v as u32)?,
                }
            }
        }
        Ok(())
    }
}

/// 解析格式描述，如 `["2I", "f", "4s"]` 或紧凑形式 `["6I5f2IfI"]`
pub fn parse_format(tokens: &[&str]) -> Result<Vec<Prim>, EspError> {
    let mut prims = Vec::new();
    for token in tokens {
        parse_compact(token, &mut prims)?;
    }
    Ok(prims)
}

fn parse_compact(token: &str, prims: &mut Vec<Prim>) -> Result<(), EspError> {
    let mut count: Option<usize> = None;
    for c in token.chars() {
        if c.is_whitespace() {
            continue;
        }
        if let Some(digit) = c.to_digit(10) {
            count = Some(count.unwrap_or(0) * 10 + digit as usize);
            continue;
        }
        let n = count.take().unwrap_or(1);
        if n == 0 {
            return Err(EspError::InvalidSchema(format!("zero repeat count in format '{}'", token)));
        }
        if c == 's' {
            prims.push(Prim::Block(n));
            continue;
        }
        let prim = Prim::from_code(c).ok_or_else(|| {
            EspError::InvalidSchema(format!("unknown format code '{}' in '{}'", c, token))
        })?;
        prims.extend(std::iter::repeat(prim).take(n));
    }
    if count.is_some() {
        return Err(EspError::InvalidSchema(format!("dangling repeat count in format '{}'", token)));
    }
    Ok(())
}

pub fn format_size(prims: &[Prim]) -> usize {
    prims.iter().map(Prim::size).sum()
}

/// 字段的语义类型
#[derive(Debug, Clone, Copy)]
pub enum FieldKind {
    Plain,
    /// 通过主文件列表解析的 FormID
    FormId,
    /// 绑定位域描述表的标志位
    Flags(&'static FlagTable),
}

/// 结构体字段：属性名、语义类型、可选默认值
#[derive(Debug, Clone)]
pub struct Field {
    pub name: &'static str,
    pub kind: FieldKind,
    default: Option<Value>,
}

impl Field {
    pub fn new(name: &'static str) -> Self {
        Self { name, kind: FieldKind::Plain, default: None }
    }

    pub fn fid(name: &'static str) -> Self {
        Self { name, kind: FieldKind::FormId, default: None }
    }

    pub fn flags(name: &'static str, table: &'static FlagTable) -> Self {
        Self { name, kind: FieldKind::Flags(table), default: None }
    }

    pub fn with_kind(name: &'static str, kind: FieldKind) -> Self {
        Self { name, kind, default: None }
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub(crate) fn check(&self, prim: Prim) -> Result<(), EspError> {
        let ok = match self.kind {
            FieldKind::Plain => true,
            FieldKind::FormId => prim == Prim::U32,
            FieldKind::Flags(_) => prim.is_integer(),
        };
        if ok {
            Ok(())
        } else {
            Err(EspError::InvalidSchema(format!(
                "field '{}' cannot be stored as {}", self.name, prim.name()
            )))
        }
    }

    pub fn default_for(&self, prim: Prim) -> Value {
        if let Some(value) = &self.default {
            return value.clone();
        }
        match self.kind {
            FieldKind::Plain => prim.default_value(),
            FieldKind::FormId => Value::FormId(FormId::NULL),
            FieldKind::Flags(table) => Value::Flags(Flags::new(0, table)),
        }
    }

    /// 原始值 → 语义值
    pub(crate) fn decode(&self, raw: Value, masters: &MasterList) -> Result<Value, EspError> {
        match (self.kind, &raw) {
            (FieldKind::FormId, Value::Int(v)) => Ok(Value::FormId(masters.decode_fid(*v as u32)?)),
            (FieldKind::Flags(table), Value::Int(v)) => Ok(Value::Flags(Flags::new(*v as u64, table))),
            _ => Ok(raw),
        }
    }

    /// 语义值 → 原始值
    pub(crate) fn encode(&self, value: &Value, masters: &MasterList) -> Result<Value, EspError> {
        match (self.kind, value) {
            (FieldKind::FormId, Value::FormId(fid)) => Ok(Value::Int(masters.encode_fid(fid)? as i64)),
            (FieldKind::FormId, other) => Err(EspError::TypeMismatch {
                attr: self.name.to_string(),
                expected: "formid".to_string(),
                found: other.type_name().to_string(),
            }),
            (FieldKind::Flags(_), Value::Flags(flags)) => Ok(Value::Int(flags.bits() as i64)),
            _ => Ok(value.clone()),
        }
    }
}
