use super::codec::Codec;
use crate::subrecord::Signature;
use crate::utils::EspError;
use std::collections::HashMap;

/// 签名路由表
///
/// 同一签名可能同时出现在记录顶层和某个嵌套块中（例如顶层 FULL 与对象模板中的 FULL）。
/// 路由表为这类签名指定默认目标（按属性名找到顶层元素），
/// 并可声明"作用域"：见到开启签名后，作用域内的签名改投到指定元素，
/// 直到出现既不属于开启元素也不属于作用域目标的子记录为止。
///
/// 路由表是纯配置，构建后不再修改。
#[derive(Debug, Clone, Default)]
pub struct Distributor {
    defaults: HashMap<Signature, &'static str>,
    scopes: HashMap<Signature, Vec<(Signature, &'static str)>>,
}

impl Distributor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 作用域外的默认目标
    pub fn route(mut self, sig: &[u8; 4], attr: &'static str) -> Self {
        self.defaults.insert(Signature(*sig), attr);
        self
    }

    /// 开启签名 `opener` 之后，`targets` 中的签名改投到对应属性的元素
    pub fn scope(mut self, opener: &[u8; 4], targets: &[(&[u8; 4], &'static str)]) -> Self {
        let targets = targets.iter().map(|(sig, attr)| (Signature(**sig), *attr)).collect();
        self.scopes.insert(Signature(*opener), targets);
        self
    }
}

struct Scope {
    opener: usize,
    targets: HashMap<Signature, usize>,
}

/// 编译后的路由：签名 → 元素下标
pub(crate) struct Routing {
    owners: HashMap<Signature, Vec<usize>>,
    defaults: HashMap<Signature, usize>,
    scopes: HashMap<Signature, Scope>,
}

/// 单条记录解码过程中的路由状态
#[derive(Debug, Default)]
pub(crate) struct RouteState {
    open: Option<Signature>,
}

impl Routing {
    pub(crate) fn build(elements: &[Box<dyn Codec>], distributor: Option<&Distributor>) -> Result<Self, EspError> {
        let mut owners: HashMap<Signature, Vec<usize>> = HashMap::new();
        for (index, element) in elements.iter().enumerate() {
            for signature in element.signatures() {
                owners.entry(signature).or_default().push(index);
            }
        }

        let element_for = |sig: Signature, attr: &str| -> Result<usize, EspError> {
            let index = elements
                .iter()
                .position(|element| element.attrs().contains(&attr))
                .ok_or_else(|| EspError::InvalidSchema(format!("route target '{}' is not an element", attr)))?;
            if !owners.get(&sig).is_some_and(|o| o.contains(&index)) {
                return Err(EspError::InvalidSchema(format!(
                    "route target '{}' does not claim subrecord {}", attr, sig
                )));
            }
            Ok(index)
        };

        let mut defaults = HashMap::new();
        let mut scopes = HashMap::new();
        if let Some(distributor) = distributor {
            for (sig, attr) in &distributor.defaults {
                defaults.insert(*sig, element_for(*sig, attr)?);
            }
            for (opener, targets) in &distributor.scopes {
                let opener_index = match (defaults.get(opener), owners.get(opener).map(Vec::as_slice)) {
                    (Some(index), _) => *index,
                    (None, Some([index])) => *index,
                    _ => {
                        return Err(EspError::InvalidSchema(format!(
                            "scope opener {} must belong to exactly one element", opener
                        )))
                    }
                };
                let mut compiled = HashMap::new();
                for (sig, attr) in targets {
                    compiled.insert(*sig, element_for(*sig, attr)?);
                }
                scopes.insert(*opener, Scope { opener: opener_index, targets: compiled });
            }
        }

        for (sig, claimed) in &owners {
            if claimed.len() > 1 && !defaults.contains_key(sig) {
                return Err(EspError::InvalidSchema(format!(
                    "subrecord {} is claimed by {} elements without a route", sig, claimed.len()
                )));
            }
        }

        Ok(Self { owners, defaults, scopes })
    }

    pub(crate) fn knows(&self, sig: &Signature) -> bool {
        self.owners.contains_key(sig)
    }

    /// 解析子记录的目标元素并推进作用域状态；未知签名返回 `None`
    pub(crate) fn resolve(&self, sig: Signature, state: &mut RouteState) -> Option<usize> {
        let first_owner = self.owners.get(&sig)?.first().copied()?;
        let open_scope = state.open.and_then(|opener| self.scopes.get(&opener));
        let index = open_scope
            .and_then(|scope| scope.targets.get(&sig).copied())
            .or_else(|| self.defaults.get(&sig).copied())
            .unwrap_or(first_owner);

        if let Some(scope) = open_scope {
            let inside = index == scope.opener || scope.targets.values().any(|t| *t == index);
            if !inside {
                state.open = None;
            }
        }
        if self.scopes.contains_key(&sig) {
            state.open = Some(sig);
        }
        Some(index)
    }
}
