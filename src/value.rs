use crate::datatypes::Flags;
use crate::formid::FormId;
use crate::utils::EspError;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// 记录属性表（属性名 → 值）
pub type AttrMap = BTreeMap<String, Value>;

/// 解码后的属性值
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Float(f32),
    Bytes(Vec<u8>),
    Str(String),
    FormId(FormId),
    Flags(Flags),
    List(Vec<Value>),
    Group(AttrMap),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bytes(_) => "bytes",
            Value::Str(_) => "string",
            Value::FormId(_) => "formid",
            Value::Flags(_) => "flags",
            Value::List(_) => "list",
            Value::Group(_) => "group",
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Flags(f) => Some(f.bits() as i64),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_form_id(&self) -> Option<&FormId> {
        match self {
            Value::FormId(fid) => Some(fid),
            _ => None,
        }
    }

    pub fn as_flags(&self) -> Option<&Flags> {
        match self {
            Value::Flags(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_list_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_group(&self) -> Option<&AttrMap> {
        match self {
            Value::Group(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_group_mut(&mut self) -> Option<&mut AttrMap> {
        match self {
            Value::Group(map) => Some(map),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Int(_) | Value::Flags(_) => 0,
            Value::Float(_) => 1,
            Value::Bytes(_) => 2,
            Value::Str(_) => 3,
            Value::FormId(_) => 4,
            Value::List(_) => 5,
            Value::Group(_) => 6,
        }
    }

    /// 规范排序使用的全序比较
    ///
    /// 字符串按小写比较，FormID 按 (来源文件, 对象ID)，组之间视为相等。
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Bytes(a), Value::Bytes(b)) => a.cmp(b),
            (Value::Str(a), Value::Str(b)) => a.to_lowercase().cmp(&b.to_lowercase()),
            (Value::FormId(a), Value::FormId(b)) => a.cmp(b),
            (Value::List(a), Value::List(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    let ord = x.sort_cmp(y);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            (Value::Group(_), Value::Group(_)) => Ordering::Equal,
            (a, b) => match (a.as_int(), b.as_int()) {
                (Some(x), Some(y)) => x.cmp(&y),
                _ => a.rank().cmp(&b.rank()),
            },
        }
    }
}

/// 按名称读取属性，缺失或类型不符时报错
pub fn expect_list<'a>(attrs: &'a AttrMap, attr: &str) -> Result<Option<&'a [Value]>, EspError> {
    match attrs.get(attr) {
        None => Ok(None),
        Some(Value::List(items)) => Ok(Some(items)),
        Some(other) => Err(EspError::TypeMismatch {
            attr: attr.to_string(),
            expected: "list".to_string(),
            found: other.type_name().to_string(),
        }),
    }
}

/// 取出（必要时创建）列表属性
pub fn list_entry<'a>(attrs: &'a mut AttrMap, attr: &str) -> Result<&'a mut Vec<Value>, EspError> {
    let value = attrs.entry(attr.to_string()).or_insert_with(|| Value::List(Vec::new()));
    let found = value.type_name();
    value.as_list_mut().ok_or_else(|| EspError::TypeMismatch {
        attr: attr.to_string(),
        expected: "list".to_string(),
        found: found.to_string(),
    })
}
