use super::codec::{Codec, DumpContext, LoadContext};
use super::primitive::{Field, FieldKind};
use super::structs::TruncatedStructCodec;
use super::union::CmpOp;
use crate::subrecord::{write_subrecord, Signature, SubrecordRef};
use crate::utils::EspError;
use crate::value::{expect_list, list_entry, AttrMap, Value};

/// 数组元素宽度
#[derive(Debug, Clone, Copy)]
pub enum ElementWidth {
    /// 始终使用当前布局的宽度
    Fixed,
    /// 由记录头部的格式版本决定：比较成立时为 `then`，否则为 `otherwise`
    FormVersion {
        op: CmpOp,
        threshold: u16,
        then: usize,
        otherwise: usize,
    },
}

/// 定长元素数组：一个子记录内连续排列的若干元素
///
/// 多字段元素解码为组列表，单字段元素（`simple`）解码为标量列表。
pub struct ArrayCodec {
    attr: &'static str,
    element: TruncatedStructCodec,
    scalar: bool,
    width: ElementWidth,
}

impl ArrayCodec {
    pub fn new(attr: &'static str, element: TruncatedStructCodec) -> Self {
        Self {
            attr,
            element,
            scalar: false,
            width: ElementWidth::Fixed,
        }
    }

    /// 单字段元素数组，如 FormID 列表
    pub fn simple(sig: &[u8; 4], attr: &'static str, format: &str, kind: FieldKind) -> Result<Self, EspError> {
        let element = TruncatedStructCodec::new(sig, &[format], vec![Field::with_kind(attr, kind)], &[])?;
        Ok(Self {
            attr,
            element,
            scalar: true,
            width: ElementWidth::Fixed,
        })
    }

    /// 按格式版本选择元素宽度；两个宽度都必须是元素已声明的布局大小
    pub fn with_element_width(mut self, width: ElementWidth) -> Result<Self, EspError> {
        if let ElementWidth::FormVersion { then, otherwise, .. } = width {
            let accepted = self.element.accepted_sizes();
            for size in [then, otherwise] {
                if !accepted.contains(&size) {
                    return Err(EspError::InvalidSchema(format!(
                        "{}: element width {} is not one of the declared layouts {:?}",
                        self.element.signature(), size, accepted
                    )));
                }
            }
        }
        self.width = width;
        Ok(self)
    }

    fn element_size(&self, form_version: u16) -> usize {
        match self.width {
            ElementWidth::Fixed => self.element.layout().size(),
            ElementWidth::FormVersion { op, threshold, then, otherwise } => {
                if op.eval(form_version, threshold) {
                    then
                } else {
                    otherwise
                }
            }
        }
    }
}

impl Codec for ArrayCodec {
    fn signatures(&self) -> Vec<Signature> {
        self.element.signatures()
    }

    fn attrs(&self) -> Vec<&'static str> {
        vec![self.attr]
    }

    fn set_defaults(&self, target: &mut AttrMap) {
        target.insert(self.attr.to_string(), Value::List(Vec::new()));
    }

    fn load(&self, target: &mut AttrMap, sub: &SubrecordRef<'_>, ctx: &mut LoadContext<'_>) -> Result<(), EspError> {
        let element = self.element_size(ctx.form_version);
        if element == 0 || sub.data.len() % element != 0 {
            return Err(EspError::ArraySizeMismatch {
                sig: sub.signature.to_string(),
                size: sub.data.len(),
                element,
            });
        }

        let mut items = Vec::with_capacity(sub.data.len() / element);
        for chunk in sub.data.chunks_exact(element) {
            let fields = self.element.decode_payload(chunk, ctx.masters)?;
            if self.scalar {
                items.extend(fields.into_iter().map(|(_, value)| value));
            } else {
                let group: AttrMap = fields.into_iter().map(|(name, value)| (name.to_string(), value)).collect();
                items.push(Value::Group(group));
            }
        }
        list_entry(target, self.attr)?.extend(items);
        Ok(())
    }

    fn dump(&self, source: &AttrMap, out: &mut Vec<u8>, ctx: &DumpContext<'_>) -> Result<(), EspError> {
        let items = match expect_list(source, self.attr)? {
            Some(items) if !items.is_empty() => items,
            _ => return Ok(()),
        };

        let layout = self.element.layout();
        let width = self.element_size(ctx.form_version);
        let mut payload = Vec::with_capacity(items.len() * width);
        let mut packed = Vec::with_capacity(layout.size());
        for item in items {
            packed.clear();
            if self.scalar {
                layout.pack_single(item, ctx.masters, &mut packed)?;
            } else {
                let group = item.as_group().ok_or_else(|| EspError::TypeMismatch {
                    attr: self.attr.to_string(),
                    expected: "group".to_string(),
                    found: item.type_name().to_string(),
                })?;
                layout.pack(group, ctx.masters, &mut packed)?;
            }
            // 旧格式版本只写出元素的前缀部分
            payload.extend_from_slice(&packed[..width.min(packed.len())]);
        }
        write_subrecord(out, self.element.signature(), &payload);
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

    fn marker_array() -> ArrayCodec {
        let element = TruncatedStructCodec::new(
            b"SNAM",
            &["4f", "I", "B", "3s"],
            vec![
                Field::new("offset_x"),
                Field::new("offset_y"),
                Field::new("offset_z"),
                Field::new("rotation_z"),
                Field::fid("keyword"),
                Field::new("entry_types"),
                Field::new("unused"),
            ],
            &["4fI"],
        )
        .unwrap();
        ArrayCodec::new("markers", element)
            .with_element_width(ElementWidth::FormVersion {
                op: CmpOp::Ge,
                threshold: 125,
                then: 24,
                otherwise: 20,
            })
            .unwrap()
    }

    fn load(codec: &ArrayCodec, data: &[u8], form_version: u16) -> Result<AttrMap, EspError> {
        let masters = masters();
        let mut ctx = LoadContext::new(form_version, &masters, false);
        let mut target = AttrMap::new();
        codec.load(&mut target, &SubrecordRef { signature: Signature(*b"SNAM"), data }, &mut ctx)?;
        Ok(target)
    }

    fn old_marker(keyword: u32) -> Vec<u8> {
        let mut data = Vec::new();
        for f in [1.0f32, 2.0, 3.0, 0.5] {
            data.extend_from_slice(&f.to_le_bytes());
        }
        data.extend_from_slice(&keyword.to_le_bytes());
        data
    }

    #[test]
    fn test_width_follows_form_version() {
        let codec = marker_array();
        let data = [old_marker(0x0000_0010), old_marker(0)].concat();
        let attrs = load(&codec, &data, 120).unwrap();
        let markers = attrs["markers"].as_list().unwrap();
        assert_eq!(markers.len(), 2);
        let first = markers[0].as_group().unwrap();
        assert_eq!(first["keyword"], Value::FormId(FormId::new(FileId::from("Fallout4.esm"), 0x10)));
        assert_eq!(first["entry_types"], Value::Int(0));
        assert_eq!(markers[1].as_group().unwrap()["keyword"], Value::FormId(FormId::NULL));

        // 40 字节在新版本下不是 24 的整数倍
        assert!(matches!(
            load(&codec, &data, 131),
            Err(EspError::ArraySizeMismatch { element: 24, .. })
        ));
    }

    #[test]
    fn test_encode_cuts_to_form_version_width() {
        let codec = marker_array();
        let data = old_marker(0x0000_0010);
        let attrs = load(&codec, &data, 120).unwrap();

        let masters = masters();
        let mut old = Vec::new();
        codec.dump(&attrs, &mut old, &DumpContext::new(120, &masters)).unwrap();
        assert_eq!(&old[6..], &data[..]);

        let mut new = Vec::new();
        codec.dump(&attrs, &mut new, &DumpContext::new(131, &masters)).unwrap();
        assert_eq!(new.len(), 6 + 24);
    }

    #[test]
    fn test_simple_fid_array() {
        let codec = ArrayCodec::simple(b"KWDA", "keywords", "I", FieldKind::FormId).unwrap();
        let masters = masters();
        let mut ctx = LoadContext::new(131, &masters, false);
        let mut target = AttrMap::new();
        let data = [0x0000_0001u32.to_le_bytes(), 0x0100_0002u32.to_le_bytes()].concat();
        codec
            .load(&mut target, &SubrecordRef { signature: Signature(*b"KWDA"), data: &data }, &mut ctx)
            .unwrap();
        assert_eq!(target["keywords"].as_list().unwrap().len(), 2);

        let mut out = Vec::new();
        codec.dump(&target, &mut out, &DumpContext::new(131, &masters)).unwrap();
        assert_eq!(&out[6..], &data[..]);

        target.insert("keywords".into(), Value::List(Vec::new()));
        out.clear();
        codec.dump(&target, &mut out, &DumpContext::new(131, &masters)).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_rejects_undeclared_width() {
        let element = TruncatedStructCodec::new(b"DNAM", &["2I"], vec![Field::new("a"), Field::new("b")], &[]).unwrap();
        let result = ArrayCodec::new("values", element).with_element_width(ElementWidth::FormVersion {
            op: CmpOp::Ge,
            threshold: 78,
            then: 8,
            otherwise: 4,
        });
        assert!(matches!(result, Err(EspError::InvalidSchema(_))));
    }
}
