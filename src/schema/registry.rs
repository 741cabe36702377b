use super::record_schema::{HeaderContext, RecordSchema};
use crate::config::UnknownSignaturePolicy;
use crate::formid::MasterList;
use crate::record::{RawRecord, Record};
use crate::subrecord::Signature;
use crate::utils::EspError;
use std::collections::HashMap;

/// 按记录签名索引的模式注册表
///
/// 启动时构建一次，之后只读共享。
#[derive(Default)]
pub struct SchemaRegistry {
    schemas: HashMap<Signature, RecordSchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, schema: RecordSchema) -> Result<(), EspError> {
        let signature = schema.signature();
        if self.schemas.contains_key(&signature) {
            return Err(EspError::InvalidSchema(format!("record {} is registered twice", signature)));
        }
        self.schemas.insert(signature, schema);
        Ok(())
    }

    pub fn get(&self, signature: &Signature) -> Option<&RecordSchema> {
        self.schemas.get(signature)
    }

    pub fn contains(&self, signature: &Signature) -> bool {
        self.schemas.contains_key(signature)
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// 已注册的记录签名（排序后）
    pub fn signatures(&self) -> Vec<Signature> {
        let mut signatures: Vec<_> = self.schemas.keys().copied().collect();
        signatures.sort();
        signatures
    }

    /// 解码原始记录；没有对应模式时返回 `None`
    pub fn decode_record(
        &self,
        raw: &RawRecord,
        masters: &MasterList,
        localized: bool,
        unknown_signatures: UnknownSignaturePolicy,
    ) -> Result<Option<Record>, EspError> {
        let Some(schema) = self.get(&raw.header.signature) else {
            return Ok(None);
        };
        let ctx = HeaderContext::new(raw.header.form_version, masters)
            .localized(localized)
            .unknown_signatures(unknown_signatures);
        schema
            .decode_record(&raw.header, &raw.data, &ctx)
            .map(Some)
            .map_err(|e| e.in_record(&raw.header.signature.to_string(), raw.header.form_id))
    }

    /// 编码记录为原始记录（头部 FormID 按目标列表重新编码）
    ///
    /// 目标列表必须已包含记录引用的所有文件，参见 [`RecordSchema::extend_masters`]。
    pub fn encode_record(&self, record: &Record, target: &MasterList) -> Result<RawRecord, EspError> {
        let form_id = target.encode_fid(&record.form_id)?;
        let wrap = |e: EspError| e.in_record(&record.signature, form_id);
        let header = record.header_with(form_id).map_err(wrap)?;
        let schema = self.get(&header.signature).ok_or_else(|| {
            EspError::InvalidSchema(format!("no schema registered for record {}", header.signature))
        })?;
        let data = schema
            .encode_attrs(&record.attrs, record.form_version, target)
            .map_err(wrap)?;
        Ok(RawRecord::new(header, data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formid::{FileId, FormId};
    use crate::record::RecordHeader;
    use crate::schema::StringCodec;
    use crate::subrecord::write_subrecord;

    fn registry() -> SchemaRegistry {
        let mut registry = SchemaRegistry::new();
        registry
            .register(RecordSchema::builder(b"KYWD").element(StringCodec::new(b"EDID", "eid")).build().unwrap())
            .unwrap();
        registry
    }

    #[test]
    fn test_register_twice() {
        let mut registry = registry();
        let again = RecordSchema::builder(b"KYWD").build().unwrap();
        assert!(registry.register(again).is_err());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_decode_and_encode_record() {
        let masters = MasterList::new(FileId::from("Test.esp"), vec![FileId::from("Fallout4.esm")]);
        let mut data = Vec::new();
        write_subrecord(&mut data, Signature(*b"EDID"), b"AnimFurnChair\0");
        let raw = RawRecord::new(RecordHeader::new(Signature(*b"KYWD"), 0x0000_1234, 131), data.clone());

        let record = registry()
            .decode_record(&raw, &masters, false, UnknownSignaturePolicy::Fail)
            .unwrap()
            .unwrap();
        assert_eq!(record.form_id, FormId::new(FileId::from("Fallout4.esm"), 0x1234));
        assert_eq!(record.get_editor_id(), Some("AnimFurnChair"));

        let encoded = registry().encode_record(&record, &masters).unwrap();
        assert_eq!(encoded.header, raw.header);
        assert_eq!(encoded.data, data);
    }

    #[test]
    fn test_unregistered_record_is_none() {
        let masters = MasterList::new(FileId::from("Test.esp"), Vec::new());
        let raw = RawRecord::new(RecordHeader::new(Signature(*b"NPC_"), 0x800, 131), Vec::new());
        assert!(registry()
            .decode_record(&raw, &masters, false, UnknownSignaturePolicy::Skip)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_decode_error_carries_record_identity() {
        let masters = MasterList::new(FileId::from("Test.esp"), Vec::new());
        let mut data = Vec::new();
        write_subrecord(&mut data, Signature(*b"DNAM"), &[0]);
        let raw = RawRecord::new(RecordHeader::new(Signature(*b"KYWD"), 0x0000_0801, 131), data);
        let err = registry()
            .decode_record(&raw, &masters, false, UnknownSignaturePolicy::Fail)
            .unwrap_err();
        assert!(matches!(err, EspError::Record { form_id: 0x0801, .. }));
    }
}
