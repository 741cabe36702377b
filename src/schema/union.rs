use super::codec::{Codec, DumpContext, LoadContext};
use super::structs::StructLayout;
use super::primitive::Field;
use crate::subrecord::{Signature, SubrecordRef};
use crate::utils::EspError;
use crate::value::{AttrMap, Value};
use std::collections::HashMap;
use std::fmt;

/// 决策器产生的选择键
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeciderKey {
    Int(i64),
    Bool(bool),
    Bytes(Vec<u8>),
    Str(String),
    /// 决定属性不存在
    Missing,
}

impl DeciderKey {
    fn from_value(attr: &str, value: &Value) -> Result<Self, EspError> {
        match value {
            Value::Int(_) | Value::Flags(_) => Ok(DeciderKey::Int(value.as_int().unwrap_or_default())),
            Value::Str(s) => Ok(DeciderKey::Str(s.clone())),
            Value::Bytes(b) => Ok(DeciderKey::Bytes(b.clone())),
            other => Err(EspError::TypeMismatch {
                attr: attr.to_string(),
                expected: "int, string or bytes".to_string(),
                found: other.type_name().to_string(),
            }),
        }
    }
}

impl fmt::Display for DeciderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeciderKey::Int(v) => write!(f, "{}", v),
            DeciderKey::Bool(v) => write!(f, "{}", v),
            DeciderKey::Bytes(v) => write!(f, "{:02X?}", v),
            DeciderKey::Str(v) => write!(f, "{:?}", v),
            DeciderKey::Missing => write!(f, "<missing>"),
        }
    }
}

impl From<i64> for DeciderKey {
    fn from(value: i64) -> Self {
        DeciderKey::Int(value)
    }
}

impl From<bool> for DeciderKey {
    fn from(value: bool) -> Self {
        DeciderKey::Bool(value)
    }
}

impl From<&str> for DeciderKey {
    fn from(value: &str) -> Self {
        DeciderKey::Str(value.to_string())
    }
}

/// 决策器：根据上下文为联合体选择布局
///
/// 解码与编码两侧必须对同一条记录给出相同的键。
pub trait Decider: Send + Sync {
    /// 解码时求值；可以向目标属性表写入先行解码的决定字段
    fn decide_load(
        &self,
        target: &mut AttrMap,
        sub: &SubrecordRef<'_>,
        ctx: &LoadContext<'_>,
    ) -> Result<DeciderKey, EspError>;

    /// 编码时求值
    fn decide_dump(&self, source: &AttrMap, ctx: &DumpContext<'_>) -> Result<DeciderKey, EspError>;
}

/// 以记录上已解码属性的值作为键
pub struct AttrValDecider {
    attr: &'static str,
}

impl AttrValDecider {
    pub fn new(attr: &'static str) -> Self {
        Self { attr }
    }

    fn key(&self, attrs: &AttrMap) -> Result<DeciderKey, EspError> {
        match attrs.get(self.attr) {
            None => Ok(DeciderKey::Missing),
            Some(value) => DeciderKey::from_value(self.attr, value),
        }
    }
}

impl Decider for AttrValDecider {
    fn decide_load(&self, target: &mut AttrMap, _sub: &SubrecordRef<'_>, _ctx: &LoadContext<'_>) -> Result<DeciderKey, EspError> {
        self.key(target)
    }

    fn decide_dump(&self, source: &AttrMap, _ctx: &DumpContext<'_>) -> Result<DeciderKey, EspError> {
        self.key(source)
    }
}

/// 两阶段解码：先按临时布局解码负载前缀中的决定字段，再交给内部决策器
pub struct PartialLoadDecider {
    determinant: StructLayout,
    inner: Box<dyn Decider>,
}

impl PartialLoadDecider {
    pub fn new(format: &[&str], fields: Vec<Field>, inner: impl Decider + 'static) -> Result<Self, EspError> {
        Ok(Self {
            determinant: StructLayout::new(format, fields)?,
            inner: Box::new(inner),
        })
    }

    /// 最常见的形式：前缀中的一个字段，直接以其值为键
    pub fn on_field(format: &str, attr: &'static str) -> Result<Self, EspError> {
        Self::new(&[format], vec![Field::new(attr)], AttrValDecider::new(attr))
    }
}

impl Decider for PartialLoadDecider {
    fn decide_load(&self, target: &mut AttrMap, sub: &SubrecordRef<'_>, ctx: &LoadContext<'_>) -> Result<DeciderKey, EspError> {
        let size = self.determinant.size();
        if sub.data.len() < size {
            return Err(EspError::TruncationNotSupported {
                sig: sub.signature.to_string(),
                size: sub.data.len(),
                min: size,
            });
        }
        let raw = StructLayout::unpack_raw(self.determinant.prims(), &sub.data[..size])?;
        for (name, value) in self.determinant.decode_fields(raw, ctx.masters)? {
            target.insert(name.to_string(), value);
        }
        self.inner.decide_load(target, sub, ctx)
    }

    fn decide_dump(&self, source: &AttrMap, ctx: &DumpContext<'_>) -> Result<DeciderKey, EspError> {
        self.inner.decide_dump(source, ctx)
    }
}

/// 比较运算符
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Lt,
    Le,
    Eq,
    Ne,
    Ge,
    Gt,
}

impl CmpOp {
    pub fn eval(&self, left: u16, right: u16) -> bool {
        match self {
            CmpOp::Lt => left < right,
            CmpOp::Le => left <= right,
            CmpOp::Eq => left == right,
            CmpOp::Ne => left != right,
            CmpOp::Ge => left >= right,
            CmpOp::Gt => left > right,
        }
    }
}

/// 以"记录格式版本 op 阈值"的比较结果作为键（`Bool`）
pub struct FormVersionDecider {
    op: CmpOp,
    threshold: u16,
}

impl FormVersionDecider {
    pub fn new(op: CmpOp, threshold: u16) -> Self {
        Self { op, threshold }
    }
}

impl Decider for FormVersionDecider {
    fn decide_load(&self, _target: &mut AttrMap, _sub: &SubrecordRef<'_>, ctx: &LoadContext<'_>) -> Result<DeciderKey, EspError> {
        Ok(DeciderKey::Bool(self.op.eval(ctx.form_version, self.threshold)))
    }

    fn decide_dump(&self, _source: &AttrMap, ctx: &DumpContext<'_>) -> Result<DeciderKey, EspError> {
        Ok(DeciderKey::Bool(self.op.eval(ctx.form_version, self.threshold)))
    }
}

/// 多态布局：决策器给出的键 → 编解码器，外加可选的后备编解码器
pub struct UnionCodec {
    decider: Box<dyn Decider>,
    codecs: Vec<Box<dyn Codec>>,
    choices: HashMap<DeciderKey, usize>,
    fallback: Option<usize>,
}

impl UnionCodec {
    pub fn new(decider: impl Decider + 'static) -> Self {
        Self {
            decider: Box::new(decider),
            codecs: Vec::new(),
            choices: HashMap::new(),
            fallback: None,
        }
    }

    pub fn choice(self, key: impl Into<DeciderKey>, codec: impl Codec + 'static) -> Result<Self, EspError> {
        self.choice_many([key], codec)
    }

    /// 多个键共用一个编解码器
    pub fn choice_many<K: Into<DeciderKey>>(
        mut self,
        keys: impl IntoIterator<Item = K>,
        codec: impl Codec + 'static,
    ) -> Result<Self, EspError> {
        let index = self.codecs.len();
        self.codecs.push(Box::new(codec));
        for key in keys {
            let key = key.into();
            if self.choices.insert(key.clone(), index).is_some() {
                return Err(EspError::InvalidSchema(format!("union key {} declared twice", key)));
            }
        }
        Ok(self)
    }

    pub fn fallback(mut self, codec: impl Codec + 'static) -> Self {
        self.fallback = Some(self.codecs.len());
        self.codecs.push(Box::new(codec));
        self
    }

    fn select(&self, key: &DeciderKey) -> Result<&dyn Codec, EspError> {
        self.choices
            .get(key)
            .copied()
            .or(self.fallback)
            .and_then(|index| self.codecs.get(index))
            .map(|codec| codec.as_ref())
            .ok_or_else(|| EspError::DeciderKeyError {
                sig: self.signature_label(),
                key: key.to_string(),
            })
    }

    fn signature_label(&self) -> String {
        self.signatures()
            .iter()
            .map(Signature::to_string)
            .collect::<Vec<_>>()
            .join("/")
    }
}

impl Codec for UnionCodec {
    fn signatures(&self) -> Vec<Signature> {
        let mut signatures = Vec::new();
        for codec in &self.codecs {
            for signature in codec.signatures() {
                if !signatures.contains(&signature) {
                    signatures.push(signature);
                }
            }
        }
        signatures
    }

    fn attrs(&self) -> Vec<&'static str> {
        let mut attrs = Vec::new();
        for codec in &self.codecs {
            for attr in codec.attrs() {
                if !attrs.contains(&attr) {
                    attrs.push(attr);
                }
            }
        }
        attrs
    }

    // 新建记录使用第一个分支的默认值
    fn set_defaults(&self, target: &mut AttrMap) {
        if let Some(codec) = self.codecs.first() {
            codec.set_defaults(target);
        }
    }

    fn load(&self, target: &mut AttrMap, sub: &SubrecordRef<'_>, ctx: &mut LoadContext<'_>) -> Result<(), EspError> {
        let key = self.decider.decide_load(target, sub, ctx)?;
        let codec = self.select(&key)?;
        if !codec.signatures().contains(&sub.signature) {
            return Err(EspError::InvalidFormat(format!(
                "union key {} selected a layout without subrecord {}", key, sub.signature
            )));
        }
        tracing::trace!(signature = %sub.signature, %key, "union layout selected");
        codec.load(target, sub, ctx)
    }

    fn dump(&self, source: &AttrMap, out: &mut Vec<u8>, ctx: &DumpContext<'_>) -> Result<(), EspError> {
        if !self.has_data(source) {
            return Ok(());
        }
        let key = self.decider.decide_dump(source, ctx)?;
        self.select(&key)?.dump(source, out, ctx)
    }
}
