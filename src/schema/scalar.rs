use super::codec::{Codec, DumpContext, LoadContext};
use super::primitive::{parse_format, Field, FieldKind, Prim};
use super::structs::StructLayout;
use crate::datatypes::RawString;
use crate::subrecord::{write_subrecord, Signature, SubrecordRef};
use crate::utils::EspError;
use crate::value::{expect_list, list_entry, AttrMap, Value};

/// 字符串子记录（以 NULL 结尾）
///
/// 本地化字段在本地化文件中存储为 4 字节的 STRING 表 ID，解码为整数值。
pub struct StringCodec {
    signature: Signature,
    attr: &'static str,
    localized: bool,
}

impl StringCodec {
    pub fn new(sig: &[u8; 4], attr: &'static str) -> Self {
        Self {
            signature: Signature(*sig),
            attr,
            localized: false,
        }
    }

    /// 可本地化的字符串（FULL、DESC 等）
    pub fn localized(sig: &[u8; 4], attr: &'static str) -> Self {
        Self {
            signature: Signature(*sig),
            attr,
            localized: true,
        }
    }
}

impl Codec for StringCodec {
    fn signatures(&self) -> Vec<Signature> {
        vec![self.signature]
    }

    fn attrs(&self) -> Vec<&'static str> {
        vec![self.attr]
    }

    // 字符串子记录是可选的，新建记录不填充
    fn set_defaults(&self, _target: &mut AttrMap) {}

    fn load(&self, target: &mut AttrMap, sub: &SubrecordRef<'_>, ctx: &mut LoadContext<'_>) -> Result<(), EspError> {
        let value = if self.localized && ctx.localized {
            let id: [u8; 4] = sub.data.try_into().map_err(|_| EspError::StructSizeMismatch {
                sig: self.signature.to_string(),
                size: sub.data.len(),
                expected: vec![4],
            })?;
            Value::Int(u32::from_le_bytes(id) as i64)
        } else {
            Value::Str(RawString::parse_zstring(sub.data).content)
        };
        target.insert(self.attr.to_string(), value);
        Ok(())
    }

    fn dump(&self, source: &AttrMap, out: &mut Vec<u8>, _ctx: &DumpContext<'_>) -> Result<(), EspError> {
        let payload = match source.get(self.attr) {
            None => return Ok(()),
            Some(Value::Str(text)) => RawString::encode_zstring(text),
            Some(id @ Value::Int(_)) if self.localized => {
                let mut payload = Vec::with_capacity(4);
                Prim::U32.pack(id, self.attr, &mut payload)?;
                payload
            }
            Some(other) => {
                return Err(EspError::TypeMismatch {
                    attr: self.attr.to_string(),
                    expected: "string".to_string(),
                    found: other.type_name().to_string(),
                })
            }
        };
        write_subrecord(out, self.signature, &payload);
        Ok(())
    }
}

/// 不解释内容的原始字节子记录
pub struct RawCodec {
    signature: Signature,
    attr: &'static str,
}

impl RawCodec {
    pub fn new(sig: &[u8; 4], attr: &'static str) -> Self {
        Self {
            signature: Signature(*sig),
            attr,
        }
    }
}

impl Codec for RawCodec {
    fn signatures(&self) -> Vec<Signature> {
        vec![self.signature]
    }

    fn attrs(&self) -> Vec<&'static str> {
        vec![self.attr]
    }

    fn set_defaults(&self, _target: &mut AttrMap) {}

    fn load(&self, target: &mut AttrMap, sub: &SubrecordRef<'_>, _ctx: &mut LoadContext<'_>) -> Result<(), EspError> {
        target.insert(self.attr.to_string(), Value::Bytes(sub.data.to_vec()));
        Ok(())
    }

    fn dump(&self, source: &AttrMap, out: &mut Vec<u8>, _ctx: &DumpContext<'_>) -> Result<(), EspError> {
        match source.get(self.attr) {
            None => Ok(()),
            Some(Value::Bytes(bytes)) => {
                write_subrecord(out, self.signature, bytes);
                Ok(())
            }
            Some(other) => Err(EspError::TypeMismatch {
                attr: self.attr.to_string(),
                expected: "bytes".to_string(),
                found: other.type_name().to_string(),
            }),
        }
    }
}

/// 认领但忽略的子记录：解码时丢弃，编码时不输出
pub struct NullCodec {
    signatures: Vec<Signature>,
}

impl NullCodec {
    pub fn new(sigs: &[&[u8; 4]]) -> Self {
        Self {
            signatures: sigs.iter().map(|sig| Signature(**sig)).collect(),
        }
    }
}

impl Codec for NullCodec {
    fn signatures(&self) -> Vec<Signature> {
        self.signatures.clone()
    }

    fn attrs(&self) -> Vec<&'static str> {
        Vec::new()
    }

    fn set_defaults(&self, _target: &mut AttrMap) {}

    fn load(&self, _target: &mut AttrMap, sub: &SubrecordRef<'_>, _ctx: &mut LoadContext<'_>) -> Result<(), EspError> {
        tracing::trace!(signature = %sub.signature, size = sub.data.len(), "ignored subrecord");
        Ok(())
    }

    fn dump(&self, _source: &AttrMap, _out: &mut Vec<u8>, _ctx: &DumpContext<'_>) -> Result<(), EspError> {
        Ok(())
    }
}

/// 同一签名重复出现，每次携带一个标量值，解码为列表
pub struct RepeatedCodec {
    signature: Signature,
    attr: &'static str,
    layout: StructLayout,
}

impl RepeatedCodec {
    pub fn new(sig: &[u8; 4], attr: &'static str, format: &str, kind: FieldKind) -> Result<Self, EspError> {
        Ok(Self {
            signature: Signature(*sig),
            attr,
            layout: StructLayout::new(&[format], vec![Field::with_kind(attr, kind)])?,
        })
    }

    /// 每个子记录一个 FormID
    pub fn fids(sig: &[u8; 4], attr: &'static str) -> Result<Self, EspError> {
        Self::new(sig, attr, "I", FieldKind::FormId)
    }
}

impl Codec for RepeatedCodec {
    fn signatures(&self) -> Vec<Signature> {
        vec![self.signature]
    }

    fn attrs(&self) -> Vec<&'static str> {
        vec![self.attr]
    }

    fn set_defaults(&self, target: &mut AttrMap) {
        target.insert(self.attr.to_string(), Value::List(Vec::new()));
    }

    fn load(&self, target: &mut AttrMap, sub: &SubrecordRef<'_>, ctx: &mut LoadContext<'_>) -> Result<(), EspError> {
        if sub.data.len() != self.layout.size() {
            return Err(EspError::StructSizeMismatch {
                sig: self.signature.to_string(),
                size: sub.data.len(),
                expected: vec![self.layout.size()],
            });
        }
        let raw = StructLayout::unpack_raw(self.layout.prims(), sub.data)?;
        let values = self.layout.decode_fields(raw, ctx.masters)?;
        let entry = list_entry(target, self.attr)?;
        entry.extend(values.into_iter().map(|(_, value)| value));
        Ok(())
    }

    fn dump(&self, source: &AttrMap, out: &mut Vec<u8>, ctx: &DumpContext<'_>) -> Result<(), EspError> {
        let Some(items) = expect_list(source, self.attr)? else {
            return Ok(());
        };
        for item in items {
            let mut payload = Vec::with_capacity(self.layout.size());
            self.layout.pack_single(item, ctx.masters, &mut payload)?;
            write_subrecord(out, self.signature, &payload);
        }
        Ok(())
    }
}

/// 计数子记录：值由被计数的列表长度推导，编码时自动生成
///
/// 解码时只校验负载宽度，不保存计数值；列表为空时不输出。
pub struct CounterCodec {
    signature: Signature,
    prim: Prim,
    counts: &'static str,
}

impl CounterCodec {
    pub fn new(sig: &[u8; 4], format: &str, counts: &'static str) -> Result<Self, EspError> {
        let prims = parse_format(&[format])?;
        let prim = match prims.as_slice() {
            [prim] if prim.is_integer() => *prim,
            _ => {
                return Err(EspError::InvalidSchema(format!(
                    "{}: counter format '{}' must be a single integer", Signature(*sig), format
                )))
            }
        };
        Ok(Self {
            signature: Signature(*sig),
            prim,
            counts,
        })
    }
}

impl Codec for CounterCodec {
    fn signatures(&self) -> Vec<Signature> {
        vec![self.signature]
    }

    fn attrs(&self) -> Vec<&'static str> {
        Vec::new()
    }

    fn set_defaults(&self, _target: &mut AttrMap) {}

    fn load(&self, _target: &mut AttrMap, sub: &SubrecordRef<'_>, _ctx: &mut LoadContext<'_>) -> Result<(), EspError> {
        if sub.data.len() != self.prim.size() {
            return Err(EspError::StructSizeMismatch {
                sig: self.signature.to_string(),
                size: sub.data.len(),
                expected: vec![self.prim.size()],
            });
        }
        Ok(())
    }

    fn dump(&self, source: &AttrMap, out: &mut Vec<u8>, _ctx: &DumpContext<'_>) -> Result<(), EspError> {
        let count = expect_list(source, self.counts)?.map_or(0, <[Value]>::len);
        if count == 0 {
            return Ok(());
        }
        let mut payload = Vec::with_capacity(self.prim.size());
        self.prim.pack(&Value::Int(count as i64), self.counts, &mut payload)?;
        write_subrecord(out, self.signature, &payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formid::{FileId, FormId, MasterList};

    fn masters() -> MasterList {
        MasterList::new(FileId::from("Test.esp"), vec![FileId::from("Fallout4.esm")])
    }

    fn load_one(codec: &dyn Codec, sig: &[u8; 4], data: &[u8], localized: bool) -> Result<AttrMap, EspError> {
        let masters = masters();
        let mut ctx = LoadContext::new(131, &masters, localized);
        let mut target = AttrMap::new();
        codec.load(&mut target, &SubrecordRef { signature: Signature(*sig), data }, &mut ctx)?;
        Ok(target)
    }

    fn dump_all(codec: &dyn Codec, source: &AttrMap) -> Result<Vec<u8>, EspError> {
        let masters = masters();
        let mut out = Vec::new();
        codec.dump(source, &mut out, &DumpContext::new(131, &masters))?;
        Ok(out)
    }

    #[test]
    fn test_string_round_trip() {
        let codec = StringCodec::new(b"EDID", "eid");
        let attrs = load_one(&codec, b"EDID", b"WeapTypeGun\0", false).unwrap();
        assert_eq!(attrs["eid"], Value::Str("WeapTypeGun".into()));
        assert_eq!(dump_all(&codec, &attrs).unwrap(), b"EDID\x0c\x00WeapTypeGun\0".to_vec());
        assert!(dump_all(&codec, &AttrMap::new()).unwrap().is_empty());
    }

    #[test]
    fn test_localized_string_id() {
        let codec = StringCodec::localized(b"FULL", "full");
        let attrs = load_one(&codec, b"FULL", &[0x10, 0, 0, 0], true).unwrap();
        assert_eq!(attrs["full"], Value::Int(0x10));
        assert_eq!(dump_all(&codec, &attrs).unwrap(), b"FULL\x04\x00\x10\x00\x00\x00".to_vec());
        assert!(load_one(&codec, b"FULL", &[1, 2], true).is_err());
    }

    #[test]
    fn test_repeated_fids() {
        let codec = RepeatedCodec::fids(b"LNAM", "forms").unwrap();
        let masters = masters();
        let mut ctx = LoadContext::new(131, &masters, false);
        let mut target = AttrMap::new();
        for raw in [0x0000_0001u32, 0x0100_0002] {
            let bytes = raw.to_le_bytes();
            codec
                .load(&mut target, &SubrecordRef { signature: Signature(*b"LNAM"), data: &bytes }, &mut ctx)
                .unwrap();
        }
        assert_eq!(
            target["forms"],
            Value::List(vec![
                Value::FormId(FormId::new(FileId::from("Fallout4.esm"), 1)),
                Value::FormId(FormId::new(FileId::from("Test.esp"), 2)),
            ])
        );
        let out = dump_all(&codec, &target).unwrap();
        assert_eq!(out.len(), 2 * 10);
    }

    #[test]
    fn test_counter_follows_list() {
        let codec = CounterCodec::new(b"LLCT", "B", "entries").unwrap();
        let mut source = AttrMap::new();
        assert!(dump_all(&codec, &source).unwrap().is_empty());

        source.insert("entries".into(), Value::List(vec![Value::Int(1), Value::Int(2)]));
        assert_eq!(dump_all(&codec, &source).unwrap(), b"LLCT\x01\x00\x02".to_vec());

        source.insert("entries".into(), Value::List(vec![Value::Int(0); 256]));
        assert!(matches!(dump_all(&codec, &source), Err(EspError::ValueOutOfRange { .. })));
    }

    #[test]
    fn test_null_codec_is_silent() {
        let codec = NullCodec::new(&[b"PNAM", b"MODT"]);
        let attrs = load_one(&codec, b"PNAM", &[1, 2, 3], false).unwrap();
        assert!(attrs.is_empty());
        assert!(dump_all(&codec, &attrs).unwrap().is_empty());
    }
}
