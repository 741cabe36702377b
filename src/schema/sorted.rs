use super::codec::{Codec, DumpContext, LoadContext};
use crate::subrecord::{Signature, SubrecordRef};
use crate::utils::EspError;
use crate::value::{expect_list, AttrMap, Value};
use std::cmp::Ordering;
use std::sync::Arc;

/// 规范排序键
#[derive(Clone)]
pub enum SortKey {
    /// 按元素值本身排序（标量列表）
    Value,
    /// 按组元素的若干属性依次比较，缺失的属性排在最前
    Attrs(Vec<&'static str>),
    Custom(Arc<dyn Fn(&Value, &Value) -> Ordering + Send + Sync>),
}

impl SortKey {
    pub fn attr(attr: &'static str) -> Self {
        SortKey::Attrs(vec![attr])
    }

    fn compare(&self, a: &Value, b: &Value) -> Ordering {
        match self {
            SortKey::Value => a.sort_cmp(b),
            SortKey::Attrs(attrs) => {
                let (ga, gb) = (a.as_group(), b.as_group());
                for attr in attrs {
                    let va = ga.and_then(|g| g.get(*attr));
                    let vb = gb.and_then(|g| g.get(*attr));
                    let ord = match (va, vb) {
                        (Some(x), Some(y)) => x.sort_cmp(y),
                        (None, Some(_)) => Ordering::Less,
                        (Some(_), None) => Ordering::Greater,
                        (None, None) => Ordering::Equal,
                    };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            }
            SortKey::Custom(cmp) => cmp(a, b),
        }
    }
}

/// 规范排序包装：解码保持发现顺序，编码前按键稳定排序后交给被包装的列表编解码器
pub struct SortedCodec {
    inner: Box<dyn Codec>,
    attr: &'static str,
    key: SortKey,
}

impl SortedCodec {
    /// 被包装的编解码器必须只产生一个列表属性
    pub fn new(inner: impl Codec + 'static, key: SortKey) -> Result<Self, EspError> {
        let attrs = inner.attrs();
        let [attr] = attrs.as_slice() else {
            return Err(EspError::InvalidSchema(format!(
                "sorted wrapper needs exactly one list attribute, found {:?}", attrs
            )));
        };
        Ok(Self {
            attr: *attr,
            inner: Box::new(inner),
            key,
        })
    }
}

impl Codec for SortedCodec {
    fn signatures(&self) -> Vec<Signature> {
        self.inner.signatures()
    }

    fn attrs(&self) -> Vec<&'static str> {
        vec![self.attr]
    }

    fn set_defaults(&self, target: &mut AttrMap) {
        self.inner.set_defaults(target);
    }

    fn load(&self, target: &mut AttrMap, sub: &SubrecordRef<'_>, ctx: &mut LoadContext<'_>) -> Result<(), EspError> {
        self.inner.load(target, sub, ctx)
    }

    fn dump(&self, source: &AttrMap, out: &mut Vec<u8>, ctx: &DumpContext<'_>) -> Result<(), EspError> {
        let Some(items) = expect_list(source, self.attr)? else {
            return Ok(());
        };
        let mut sorted = items.to_vec();
        sorted.sort_by(|a, b| self.key.compare(a, b));
        let mut view = AttrMap::new();
        view.insert(self.attr.to_string(), Value::List(sorted));
        self.inner.dump(&view, out, ctx)
    }
}
