use super::codec::{Codec, DumpContext, LoadContext};
use crate::subrecord::{Signature, SubrecordRef};
use crate::utils::EspError;
use crate::value::{expect_list, list_entry, AttrMap, Value};
use std::collections::HashMap;

/// 组成员：按签名分派到成员编解码器
struct Members {
    codecs: Vec<Box<dyn Codec>>,
    index: HashMap<Signature, usize>,
}

impl Members {
    fn new(attr: &str, codecs: Vec<Box<dyn Codec>>) -> Result<Self, EspError> {
        if codecs.is_empty() {
            return Err(EspError::InvalidSchema(format!("group '{}' has no members", attr)));
        }
        let mut index = HashMap::new();
        for (i, codec) in codecs.iter().enumerate() {
            for signature in codec.signatures() {
                if index.insert(signature, i).is_some() {
                    return Err(EspError::InvalidSchema(format!(
                        "group '{}' claims subrecord {} twice", attr, signature
                    )));
                }
            }
        }
        Ok(Self { codecs, index })
    }

    fn signatures(&self) -> Vec<Signature> {
        self.codecs.iter().flat_map(|codec| codec.signatures()).collect()
    }

    fn contains(&self, signature: &Signature) -> bool {
        self.index.contains_key(signature)
    }

    fn defaults(&self) -> AttrMap {
        let mut group = AttrMap::new();
        for codec in &self.codecs {
            codec.set_defaults(&mut group);
        }
        group
    }

    fn load(&self, group: &mut AttrMap, sub: &SubrecordRef<'_>, ctx: &mut LoadContext<'_>) -> Result<(), EspError> {
        match self.index.get(&sub.signature).and_then(|i| self.codecs.get(*i)) {
            Some(codec) => codec.load(group, sub, ctx),
            None => Err(EspError::InvalidFormat(format!("subrecord {} is not a group member", sub.signature))),
        }
    }

    fn dump(&self, group: &AttrMap, out: &mut Vec<u8>, ctx: &DumpContext<'_>) -> Result<(), EspError> {
        for codec in &self.codecs {
            codec.dump(group, out, ctx)?;
        }
        Ok(())
    }
}

fn as_group<'a>(attr: &str, value: &'a Value) -> Result<&'a AttrMap, EspError> {
    value.as_group().ok_or_else(|| EspError::TypeMismatch {
        attr: attr.to_string(),
        expected: "group".to_string(),
        found: value.type_name().to_string(),
    })
}

/// 单个嵌套组：若干子记录解码到一个组属性中
pub struct GroupCodec {
    attr: &'static str,
    members: Members,
    optional: bool,
}

impl GroupCodec {
    pub fn new(attr: &'static str, codecs: Vec<Box<dyn Codec>>) -> Result<Self, EspError> {
        Ok(Self {
            attr,
            members: Members::new(attr, codecs)?,
            optional: false,
        })
    }

    /// 可选组（模型、破坏数据等）：新建记录时不填充，缺失时不输出
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

impl Codec for GroupCodec {
    fn signatures(&self) -> Vec<Signature> {
        self.members.signatures()
    }

    fn attrs(&self) -> Vec<&'static str> {
        vec![self.attr]
    }

    fn set_defaults(&self, target: &mut AttrMap) {
        if !self.optional {
            target.insert(self.attr.to_string(), Value::Group(self.members.defaults()));
        }
    }

    fn load(&self, target: &mut AttrMap, sub: &SubrecordRef<'_>, ctx: &mut LoadContext<'_>) -> Result<(), EspError> {
        let entry = target
            .entry(self.attr.to_string())
            .or_insert_with(|| Value::Group(AttrMap::new()));
        let found = entry.type_name();
        let group = entry.as_group_mut().ok_or_else(|| EspError::TypeMismatch {
            attr: self.attr.to_string(),
            expected: "group".to_string(),
            found: found.to_string(),
        })?;
        self.members.load(group, sub, ctx)
    }

    fn dump(&self, source: &AttrMap, out: &mut Vec<u8>, ctx: &DumpContext<'_>) -> Result<(), EspError> {
        match source.get(self.attr) {
            None => Ok(()),
            Some(value) => self.members.dump(as_group(self.attr, value)?, out, ctx),
        }
    }
}

/// 重复组：一段连续的子记录序列作为一个整体重复出现，解码为组列表
///
/// 遇到以下情况时开始新的一组：
/// - 列表为空
/// - 子记录签名属于组的首个成员（序列重新开始）
/// - 上一个子记录不属于本组（之前的一段已经结束）
pub struct GroupsCodec {
    attr: &'static str,
    members: Members,
    init: Vec<Signature>,
}

impl GroupsCodec {
    pub fn new(attr: &'static str, codecs: Vec<Box<dyn Codec>>) -> Result<Self, EspError> {
        let members = Members::new(attr, codecs)?;
        let init = members.codecs.first().map(|codec| codec.signatures()).unwrap_or_default();
        Ok(Self { attr, members, init })
    }
}

impl Codec for GroupsCodec {
    fn signatures(&self) -> Vec<Signature> {
        self.members.signatures()
    }

    fn attrs(&self) -> Vec<&'static str> {
        vec![self.attr]
    }

    fn set_defaults(&self, target: &mut AttrMap) {
        target.insert(self.attr.to_string(), Value::List(Vec::new()));
    }

    fn load(&self, target: &mut AttrMap, sub: &SubrecordRef<'_>, ctx: &mut LoadContext<'_>) -> Result<(), EspError> {
        let diverged = ctx.previous().map_or(true, |previous| !self.members.contains(&previous));
        let list = list_entry(target, self.attr)?;
        if list.is_empty() || diverged || self.init.contains(&sub.signature) {
            list.push(Value::Group(AttrMap::new()));
        }
        let group = list
            .last_mut()
            .and_then(Value::as_group_mut)
            .ok_or_else(|| EspError::TypeMismatch {
                attr: self.attr.to_string(),
                expected: "group".to_string(),
                found: "list entry".to_string(),
            })?;
        self.members.load(group, sub, ctx)
    }

    fn dump(&self, source: &AttrMap, out: &mut Vec<u8>, ctx: &DumpContext<'_>) -> Result<(), EspError> {
        let Some(items) = expect_list(source, self.attr)? else {
            return Ok(());
        };
        for item in items {
            self.members.dump(as_group(self.attr, item)?, out, ctx)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formid::{FileId, MasterList};
    use crate::schema::{Field, RawCodec, StringCodec, StructCodec};

    fn masters() -> MasterList {
        MasterList::new(FileId::from("Test.esp"), Vec::new())
    }

    fn templates() -> GroupsCodec {
        GroupsCodec::new("combinations", vec![
            Box::new(RawCodec::new(b"OBTS", "properties")),
            Box::new(StringCodec::new(b"FULL", "full")),
        ])
        .unwrap()
    }

    /// 依次解码，模拟记录级分派对 `previous` 的维护
    fn load_seq(codec: &dyn Codec, seq: &[(&[u8; 4], &[u8])]) -> AttrMap {
        let masters = masters();
        let mut ctx = LoadContext::new(131, &masters, false);
        let mut target = AttrMap::new();
        for &(sig, data) in seq {
            let sub = SubrecordRef { signature: Signature(*sig), data };
            codec.load(&mut target, &sub, &mut ctx).unwrap();
            ctx.set_previous(sub.signature);
        }
        target
    }

    #[test]
    fn test_run_restarts_on_first_member() {
        let seq: [(&[u8; 4], &[u8]); 5] = [
            (b"OBTS", &[1]),
            (b"FULL", b"Default\0"),
            (b"OBTS", &[2]),
            (b"OBTS", &[3]),
            (b"FULL", b"Heavy\0"),
        ];
        let attrs = load_seq(&templates(), &seq);
        let list = attrs["combinations"].as_list().unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(list[0].as_group().unwrap()["full"], Value::Str("Default".into()));
        assert!(!list[1].as_group().unwrap().contains_key("full"));
        assert_eq!(list[2].as_group().unwrap()["properties"], Value::Bytes(vec![3]));
    }

    #[test]
    fn test_run_restarts_after_divergence() {
        let masters = masters();
        let codec = templates();
        let mut ctx = LoadContext::new(131, &masters, false);
        let mut target = AttrMap::new();

        let full = SubrecordRef { signature: Signature(*b"FULL"), data: b"A\0" };
        codec.load(&mut target, &full, &mut ctx).unwrap();
        ctx.set_previous(full.signature);
        ctx.set_previous(Signature(*b"STOP"));
        codec.load(&mut target, &full, &mut ctx).unwrap();
        assert_eq!(target["combinations"].as_list().unwrap().len(), 2);
    }

    #[test]
    fn test_groups_dump_in_member_order() {
        let codec = templates();
        let seq: [(&[u8; 4], &[u8]); 2] = [(b"OBTS", &[9]), (b"FULL", b"X\0")];
        let attrs = load_seq(&codec, &seq);
        let masters = masters();
        let mut out = Vec::new();
        codec.dump(&attrs, &mut out, &DumpContext::new(131, &masters)).unwrap();
        assert_eq!(out, b"OBTS\x01\x00\x09FULL\x02\x00X\x00".to_vec());
    }

    #[test]
    fn test_optional_group_has_no_defaults() {
        let members = || -> Vec<Box<dyn Codec>> {
            vec![
                Box::new(StringCodec::new(b"MODL", "modPath")),
                Box::new(StructCodec::new(b"MODC", &["f"], vec![Field::new("color")]).unwrap()),
            ]
        };
        let mut attrs = AttrMap::new();
        GroupCodec::new("model", members()).unwrap().optional().set_defaults(&mut attrs);
        assert!(attrs.is_empty());

        GroupCodec::new("model", members()).unwrap().set_defaults(&mut attrs);
        assert_eq!(attrs["model"].as_group().map(|g| g.contains_key("color")), Some(true));
    }

    #[test]
    fn test_duplicate_member_signature() {
        let result = GroupCodec::new("dup", vec![
            Box::new(RawCodec::new(b"DATA", "a")),
            Box::new(RawCodec::new(b"DATA", "b")),
        ]);
        assert!(matches!(result, Err(EspError::InvalidSchema(_))));
    }
}
