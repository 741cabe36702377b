use super::codec::{Codec, DumpContext, LoadContext};
use super::primitive::{format_size, parse_format, Field, Prim};
use crate::formid::MasterList;
use crate::subrecord::{write_subrecord, Signature, SubrecordRef};
use crate::utils::EspError;
use crate::value::{AttrMap, Value};
use std::collections::HashSet;
use std::io::Cursor;

/// 定长结构体布局：基础类型序列 + 一一对应的字段
#[derive(Debug, Clone)]
pub struct StructLayout {
    prims: Vec<Prim>,
    fields: Vec<Field>,
    size: usize,
}

impl StructLayout {
    pub fn new(format: &[&str], fields: Vec<Field>) -> Result<Self, EspError> {
        let prims = parse_format(format)?;
        if prims.len() != fields.len() {
            return Err(EspError::InvalidSchema(format!(
                "format {:?} describes {} values but {} fields were given",
                format, prims.len(), fields.len()
            )));
        }
        let mut seen = HashSet::new();
        for (field, prim) in fields.iter().zip(&prims) {
            field.check(*prim)?;
            if !seen.insert(field.name) {
                return Err(EspError::InvalidSchema(format!("duplicate field '{}'", field.name)));
            }
        }
        let size = format_size(&prims);
        Ok(Self { prims, fields, size })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub(crate) fn prims(&self) -> &[Prim] {
        &self.prims
    }

    pub fn defaults(&self) -> Vec<Value> {
        self.fields.iter().zip(&self.prims)
            .map(|(field, prim)| field.default_for(*prim))
            .collect()
    }

    pub(crate) fn unpack_raw(prims: &[Prim], data: &[u8]) -> Result<Vec<Value>, EspError> {
        let mut cursor = Cursor::new(data);
        prims.iter().map(|prim| prim.unpack(&mut cursor)).collect()
    }

    /// 原始值（与字段一一对应）→ (属性名, 语义值)
    pub(crate) fn decode_fields(
        &self,
        raw: Vec<Value>,
        masters: &MasterList,
    ) -> Result<Vec<(&'static str, Value)>, EspError> {
        self.fields.iter().zip(raw)
            .map(|(field, value)| Ok((field.name, field.decode(value, masters)?)))
            .collect()
    }

    /// 按当前（最宽）布局打包；缺失的属性使用默认值
    pub(crate) fn pack(&self, source: &AttrMap, masters: &MasterList, out: &mut Vec<u8>) -> Result<(), EspError> {
        for (field, prim) in self.fields.iter().zip(&self.prims) {
            let fallback;
            let value = match source.get(field.name) {
                Some(value) => value,
                None => {
                    fallback = field.default_for(*prim);
                    &fallback
                }
            };
            let raw = field.encode(value, masters)?;
            prim.pack(&raw, field.name, out)?;
        }
        Ok(())
    }

    /// 打包单字段布局的一个值
    pub(crate) fn pack_single(&self, value: &Value, masters: &MasterList, out: &mut Vec<u8>) -> Result<(), EspError> {
        let (Some(field), Some(prim)) = (self.fields.first(), self.prims.first()) else {
            return Err(EspError::InvalidSchema("empty struct layout".to_string()));
        };
        let raw = field.encode(value, masters)?;
        prim.pack(&raw, field.name, out)
    }
}

/// 定长结构体子记录：每个字段作为独立属性写入目标属性表
pub struct StructCodec {
    signature: Signature,
    layout: StructLayout,
}

impl StructCodec {
    pub fn new(sig: &[u8; 4], format: &[&str], fields: Vec<Field>) -> Result<Self, EspError> {
        Ok(Self {
            signature: Signature(*sig),
            layout: StructLayout::new(format, fields)?,
        })
    }

    pub fn layout(&self) -> &StructLayout {
        &self.layout
    }

    pub fn signature(&self) -> Signature {
        self.signature
    }

    pub(crate) fn decode_payload(
        &self,
        data: &[u8],
        masters: &MasterList,
    ) -> Result<Vec<(&'static str, Value)>, EspError> {
        if data.len() != self.layout.size {
            return Err(EspError::StructSizeMismatch {
                sig: self.signature.to_string(),
                size: data.len(),
                expected: vec![self.layout.size],
            });
        }
        let raw = StructLayout::unpack_raw(&self.layout.prims, data)?;
        self.layout.decode_fields(raw, masters)
    }
}

impl Codec for StructCodec {
    fn signatures(&self) -> Vec<Signature> {
        vec![self.signature]
    }

    fn attrs(&self) -> Vec<&'static str> {
        self.layout.fields.iter().map(|f| f.name).collect()
    }

    fn set_defaults(&self, target: &mut AttrMap) {
        for (field, value) in self.layout.fields.iter().zip(self.layout.defaults()) {
            target.insert(field.name.to_string(), value);
        }
    }

    fn load(&self, target: &mut AttrMap, sub: &SubrecordRef<'_>, ctx: &mut LoadContext<'_>) -> Result<(), EspError> {
        for (name, value) in self.decode_payload(sub.data, ctx.masters)? {
            target.insert(name.to_string(), value);
        }
        Ok(())
    }

    fn dump(&self, source: &AttrMap, out: &mut Vec<u8>, ctx: &DumpContext<'_>) -> Result<(), EspError> {
        if !self.has_data(source) {
            return Ok(());
        }
        let mut payload = Vec::with_capacity(self.layout.size);
        self.layout.pack(source, ctx.masters, &mut payload)?;
        write_subrecord(out, self.signature, &payload);
        Ok(())
    }
}

/// 旧布局解码后的预处理钩子：(原始值, 当前布局默认值) → 调整后的原始值
pub type PreProcess = Box<dyn Fn(Vec<Value>, &[Value]) -> Vec<Value> + Send + Sync>;

/// 截断结构体：除当前布局外，还接受若干字段更少的历史布局
///
/// 解码时按负载长度选择布局（先当前布局，再按大小降序的旧布局），
/// 缺失的尾部字段取声明的默认值。编码始终输出当前布局。
pub struct TruncatedStructCodec {
    inner: StructCodec,
    old_versions: Vec<Vec<Prim>>,
    pre_process: Option<PreProcess>,
}

impl TruncatedStructCodec {
    pub fn new(
        sig: &[u8; 4],
        format: &[&str],
        fields: Vec<Field>,
        old_versions: &[&str],
    ) -> Result<Self, EspError> {
        let inner = StructCodec::new(sig, format, fields)?;
        let mut sizes = HashSet::from([inner.layout.size]);
        let mut parsed = Vec::with_capacity(old_versions.len());
        for old in old_versions {
            let prims = parse_format(&[*old])?;
            let fields = inner.layout.fields();
            if prims.len() > fields.len() {
                return Err(EspError::InvalidSchema(format!(
                    "{}: old version '{}' describes {} values but only {} fields exist",
                    inner.signature, old, prims.len(), fields.len()
                )));
            }
            for (field, prim) in fields.iter().zip(&prims) {
                field.check(*prim).map_err(|e| {
                    EspError::InvalidSchema(format!("{}: old version '{}': {}", inner.signature, old, e))
                })?;
            }
            if !sizes.insert(format_size(&prims)) {
                return Err(EspError::InvalidSchema(format!(
                    "{}: old version '{}' has an ambiguous size of {} bytes",
                    inner.signature, old, format_size(&prims)
                )));
            }
            parsed.push(prims);
        }
        parsed.sort_by_key(|prims| std::cmp::Reverse(format_size(prims)));
        Ok(Self {
            inner,
            old_versions: parsed,
            pre_process: None,
        })
    }

    /// 设置预处理钩子（用于旧布局缺少中间字段而非尾部字段的情况）
    pub fn with_pre_process<F>(mut self, hook: F) -> Self
    where
        F: Fn(Vec<Value>, &[Value]) -> Vec<Value> + Send + Sync + 'static,
    {
        self.pre_process = Some(Box::new(hook));
        self
    }

    pub fn layout(&self) -> &StructLayout {
        &self.inner.layout
    }

    pub fn signature(&self) -> Signature {
        self.inner.signature
    }

    /// 当前布局与所有旧布局的大小
    pub(crate) fn accepted_sizes(&self) -> Vec<usize> {
        std::iter::once(self.inner.layout.size)
            .chain(self.old_versions.iter().map(|p| format_size(p)))
            .collect()
    }

    pub(crate) fn decode_payload(
        &self,
        data: &[u8],
        masters: &MasterList,
    ) -> Result<Vec<(&'static str, Value)>, EspError> {
        let layout = &self.inner.layout;
        if data.len() == layout.size {
            return self.inner.decode_payload(data, masters);
        }

        let Some(old) = self.old_versions.iter().find(|p| format_size(p) == data.len()) else {
            let min = self.accepted_sizes().into_iter().min().unwrap_or(layout.size);
            if data.len() < min {
                return Err(EspError::TruncationNotSupported {
                    sig: self.inner.signature.to_string(),
                    size: data.len(),
                    min,
                });
            }
            return Err(EspError::StructSizeMismatch {
                sig: self.inner.signature.to_string(),
                size: data.len(),
                expected: self.accepted_sizes(),
            });
        };

        let defaults = layout.defaults();
        let mut raw = StructLayout::unpack_raw(old, data)?;
        if let Some(hook) = &self.pre_process {
            raw = hook(raw, &defaults);
        }
        if raw.len() > defaults.len() {
            return Err(EspError::InvalidSchema(format!(
                "{}: old layout produced {} values for {} fields",
                self.inner.signature, raw.len(), defaults.len()
            )));
        }
        let decoded = raw.len();
        raw.extend(defaults.into_iter().skip(decoded));
        layout.decode_fields(raw, masters)
    }
}

impl Codec for TruncatedStructCodec {
    fn signatures(&self) -> Vec<Signature> {
        self.inner.signatures()
    }

    fn attrs(&self) -> Vec<&'static str> {
        self.inner.attrs()
    }

    fn set_defaults(&self, target: &mut AttrMap) {
        self.inner.set_defaults(target);
    }

    fn load(&self, target: &mut AttrMap, sub: &SubrecordRef<'_>, ctx: &mut LoadContext<'_>) -> Result<(), EspError> {
        for (name, value) in self.decode_payload(sub.data, ctx.masters)? {
            target.insert(name.to_string(), value);
        }
        Ok(())
    }

    fn dump(&self, source: &AttrMap, out: &mut Vec<u8>, ctx: &DumpContext<'_>) -> Result<(), EspError> {
        self.inner.dump(source, out, ctx)
    }
}
