/// 记录模式/编解码引擎
///
/// 以声明式的方式描述一种记录的二进制布局：一组有序、具名的编解码器（`Codec`），
/// 每个编解码器认领一个或多个子记录签名。`RecordSchema` 按签名把子记录分派给对应的
/// 编解码器解码为属性表，再按相同顺序把属性表编码回字节。
///
/// # 模块结构
///
/// - **codec**: `Codec` trait 与解码/编码上下文
/// - **primitive**: 基础类型格式描述与字段定义
/// - **structs**: 定长结构体与截断结构体（旧版本布局）
/// - **scalar**: 字符串、原始字节、忽略、重复、计数等叶子编解码器
/// - **array**: 定长元素数组（含按格式版本决定元素宽度）
/// - **group**: 单个组与重复组
/// - **union**: 多态布局与决策器
/// - **sorted**: 规范排序包装
/// - **distributor**: 同一签名出现在多个嵌套位置时的路由表
/// - **record_schema**: 记录模式与构建器
/// - **registry**: 按记录签名索引的模式注册表
pub mod codec;
pub mod primitive;
pub mod structs;
pub mod scalar;
pub mod array;
pub mod group;
pub mod union;
pub mod sorted;
pub mod distributor;
pub mod record_schema;
pub mod registry;

pub use codec::{Codec, DumpContext, LoadContext};
pub use primitive::{Field, FieldKind, Prim};
pub use structs::{StructCodec, TruncatedStructCodec};
pub use scalar::{CounterCodec, NullCodec, RawCodec, RepeatedCodec, StringCodec};
pub use array::{ArrayCodec, ElementWidth};
pub use group::{GroupCodec, GroupsCodec};
pub use union::{
    AttrValDecider, CmpOp, Decider, DeciderKey, FormVersionDecider, PartialLoadDecider,
    UnionCodec,
};
pub use sorted::{SortKey, SortedCodec};
pub use distributor::Distributor;
pub use record_schema::{HeaderContext, RecordSchema, RecordSchemaBuilder};
pub use registry::SchemaRegistry;
