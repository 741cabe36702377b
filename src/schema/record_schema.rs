use super::codec::{Codec, DumpContext, LoadContext};
use super::distributor::{Distributor, RouteState, Routing};
use crate::config::UnknownSignaturePolicy;
use crate::formid::{FormId, MasterList};
use crate::record::{Record, RecordHeader};
use crate::subrecord::{Signature, SubrecordReader};
use crate::utils::EspError;
use crate::value::AttrMap;

/// 解码一条记录所需的头部上下文
#[derive(Debug, Clone, Copy)]
pub struct HeaderContext<'a> {
    pub form_version: u16,
    /// 所属文件的主文件列表
    pub masters: &'a MasterList,
    pub localized: bool,
    pub unknown_signatures: UnknownSignaturePolicy,
}

impl<'a> HeaderContext<'a> {
    pub fn new(form_version: u16, masters: &'a MasterList) -> Self {
        Self {
            form_version,
            masters,
            localized: false,
            unknown_signatures: UnknownSignaturePolicy::Skip,
        }
    }

    pub fn localized(mut self, localized: bool) -> Self {
        self.localized = localized;
        self
    }

    pub fn unknown_signatures(mut self, policy: UnknownSignaturePolicy) -> Self {
        self.unknown_signatures = policy;
        self
    }
}

/// 一种记录类型的完整布局：有序的编解码器列表 + 签名分派表 + 可选路由表
///
/// 构建后不可变，可在线程间共享只读使用。
pub struct RecordSchema {
    signature: Signature,
    elements: Vec<Box<dyn Codec>>,
    routing: Routing,
}

/// `RecordSchema` 构建器
pub struct RecordSchemaBuilder {
    signature: Signature,
    elements: Vec<Box<dyn Codec>>,
    distributor: Option<Distributor>,
}

impl RecordSchemaBuilder {
    pub fn element(mut self, codec: impl Codec + 'static) -> Self {
        self.elements.push(Box::new(codec));
        self
    }

    /// 追加一组公共片段（如关键字块、物品块）
    pub fn extend(mut self, fragment: Vec<Box<dyn Codec>>) -> Self {
        self.elements.extend(fragment);
        self
    }

    pub fn distributor(mut self, distributor: Distributor) -> Self {
        self.distributor = Some(distributor);
        self
    }

    pub fn build(self) -> Result<RecordSchema, EspError> {
        let mut seen = Vec::new();
        for element in &self.elements {
            for attr in element.attrs() {
                if seen.contains(&attr) {
                    return Err(EspError::InvalidSchema(format!(
                        "{}: attribute '{}' is declared twice", self.signature, attr
                    )));
                }
                seen.push(attr);
            }
        }
        let routing = Routing::build(&self.elements, self.distributor.as_ref())
            .map_err(|e| EspError::InvalidSchema(format!("{}: {}", self.signature, e)))?;
        Ok(RecordSchema {
            signature: self.signature,
            elements: self.elements,
            routing,
        })
    }
}

impl RecordSchema {
    pub fn builder(sig: &[u8; 4]) -> RecordSchemaBuilder {
        RecordSchemaBuilder {
            signature: Signature(*sig),
            elements: Vec::new(),
            distributor: None,
        }
    }

    pub fn signature(&self) -> Signature {
        self.signature
    }

    /// 所有顶层属性名（声明顺序）
    pub fn attrs(&self) -> Vec<&'static str> {
        self.elements.iter().flat_map(|element| element.attrs()).collect()
    }

    pub fn claims(&self, sig: &Signature) -> bool {
        self.routing.knows(sig)
    }

    /// 解码子记录流为属性表
    ///
    /// 任一子记录失败时整条记录失败，不返回部分结果。
    pub fn decode(&self, data: &[u8], ctx: &HeaderContext<'_>) -> Result<AttrMap, EspError> {
        let mut attrs = AttrMap::new();
        let mut load_ctx = LoadContext::new(ctx.form_version, ctx.masters, ctx.localized);
        let mut state = RouteState::default();

        for sub in SubrecordReader::new(data) {
            let sub = sub?;
            let element = self
                .routing
                .resolve(sub.signature, &mut state)
                .and_then(|index| self.elements.get(index));
            match element {
                Some(element) => element.load(&mut attrs, &sub, &mut load_ctx)?,
                None => match ctx.unknown_signatures {
                    UnknownSignaturePolicy::Skip => {
                        tracing::warn!(record = %self.signature, signature = %sub.signature, size = sub.data.len(), "skipping unknown subrecord");
                    }
                    UnknownSignaturePolicy::Fail => {
                        return Err(EspError::UnknownSubrecordSignature {
                            record: self.signature.to_string(),
                            sig: sub.signature.to_string(),
                        });
                    }
                },
            }
            load_ctx.set_previous(sub.signature);
        }
        Ok(attrs)
    }

    /// 解码整条记录（头部 FormID 同样经主文件列表解析）
    pub fn decode_record(&self, header: &RecordHeader, data: &[u8], ctx: &HeaderContext<'_>) -> Result<Record, EspError> {
        let form_id = ctx.masters.decode_fid(header.form_id)?;
        let attrs = self.decode(data, ctx)?;
        Ok(Record::new(header, form_id, attrs))
    }

    /// 按给定主文件列表编码属性表；引用的文件必须已在列表中
    pub fn encode_attrs(&self, attrs: &AttrMap, form_version: u16, masters: &MasterList) -> Result<Vec<u8>, EspError> {
        let ctx = DumpContext::new(form_version, masters);
        let mut out = Vec::new();
        for element in &self.elements {
            element.dump(attrs, &mut out, &ctx)?;
        }
        Ok(out)
    }

    /// 编码记录的子记录流；记录引用而目标列表中没有的文件会被追加到列表末尾
    pub fn encode(&self, record: &Record, target: &mut MasterList) -> Result<Vec<u8>, EspError> {
        self.extend_masters(record, target)?;
        self.encode_attrs(&record.attrs, record.form_version, target)
    }

    /// 把记录引用到的文件追加到目标主文件列表
    pub fn extend_masters(&self, record: &Record, target: &mut MasterList) -> Result<(), EspError> {
        if let Some(file) = record.form_id.file() {
            target.add_master(file)?;
        }
        target.extend_from_attrs(&record.attrs)
    }

    /// 新建记录：所有元素填充默认值
    pub fn new_record(&self, form_id: FormId, form_version: u16) -> Record {
        let mut attrs = AttrMap::new();
        for element in &self.elements {
            element.set_defaults(&mut attrs);
        }
        let header = RecordHeader::new(self.signature, 0, form_version);
        Record::new(&header, form_id, attrs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formid::FileId;
    use crate::schema::{Field, StringCodec, StructCodec};
    use crate::subrecord::write_subrecord;
    use crate::value::Value;

    fn schema() -> RecordSchema {
        RecordSchema::builder(b"GLOB")
            .element(StringCodec::new(b"EDID", "eid"))
            .element(StructCodec::new(b"FNAM", &["B"], vec![Field::new("value_type")]).unwrap())
            .element(StructCodec::new(b"FLTV", &["f"], vec![Field::new("value")]).unwrap())
            .build()
            .unwrap()
    }

    fn masters() -> MasterList {
        MasterList::new(FileId::from("Test.esp"), vec![FileId::from("Fallout4.esm")])
    }

    #[test]
    fn test_decode_encode_in_schema_order() {
        let mut data = Vec::new();
        write_subrecord(&mut data, Signature(*b"FLTV"), &1.5f32.to_le_bytes());
        write_subrecord(&mut data, Signature(*b"EDID"), b"Speed\0");
        let masters = masters();
        let attrs = schema().decode(&data, &HeaderContext::new(131, &masters)).unwrap();
        assert_eq!(attrs["value"], Value::Float(1.5));
        assert!(!attrs.contains_key("value_type"));

        let out = schema().encode_attrs(&attrs, 131, &masters).unwrap();
        assert_eq!(&out[..4], b"EDID");
        assert_eq!(out.len(), data.len());
    }

    #[test]
    fn test_unknown_signature_policy() {
        let mut data = Vec::new();
        write_subrecord(&mut data, Signature(*b"EDID"), b"Speed\0");
        write_subrecord(&mut data, Signature(*b"ZZZZ"), &[1, 2]);
        let masters = masters();

        let ctx = HeaderContext::new(131, &masters);
        assert_eq!(schema().decode(&data, &ctx).unwrap().len(), 1);

        let strict = ctx.unknown_signatures(UnknownSignaturePolicy::Fail);
        assert!(matches!(
            schema().decode(&data, &strict),
            Err(EspError::UnknownSubrecordSignature { ref sig, .. }) if sig == "ZZZZ"
        ));
    }

    #[test]
    fn test_duplicate_attribute_rejected() {
        let result = RecordSchema::builder(b"GLOB")
            .element(StringCodec::new(b"EDID", "eid"))
            .element(StringCodec::new(b"FULL", "eid"))
            .build();
        assert!(matches!(result, Err(EspError::InvalidSchema(_))));
    }

    #[test]
    fn test_new_record_defaults() {
        let record = schema().new_record(FormId::new(FileId::from("Test.esp"), 0x800), 131);
        assert_eq!(record.signature, "GLOB");
        assert_eq!(record.get("value"), Some(&Value::Float(0.0)));
        assert_eq!(record.get("value_type"), Some(&Value::Int(0)));
        assert!(record.get_editor_id().is_none());
    }

    #[test]
    fn test_encode_appends_missing_master() {
        let schema = RecordSchema::builder(b"FLST")
            .element(crate::schema::RepeatedCodec::fids(b"LNAM", "forms").unwrap())
            .build()
            .unwrap();
        let mut record = schema.new_record(FormId::new(FileId::from("Test.esp"), 0x800), 131);
        record.set(
            "forms",
            Value::List(vec![Value::FormId(FormId::new(FileId::from("DLCCoast.esm"), 0x10))]),
        );
        let mut target = masters();
        let out = schema.encode(&record, &mut target).unwrap();
        assert_eq!(target.masters().len(), 2);
        assert_eq!(&out[6..], &0x0100_0010u32.to_le_bytes());
    }
}
