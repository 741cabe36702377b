use crate::datatypes::FlagTable;
use crate::schema::{
    ArrayCodec, Codec, CounterCodec, Field, FieldKind, GroupCodec, GroupsCodec, NullCodec,
    PartialLoadDecider, RawCodec, SortKey, SortedCodec, StringCodec, StructCodec,
    TruncatedStructCodec, UnionCodec,
};
use crate::utils::EspError;
use crate::value::Value;

static DEST_FLAGS: FlagTable = FlagTable::new(&[
    (0, "vats_targetable"),
    (1, "large_actor_destroys"),
]);

static DEST_STAGE_FLAGS: FlagTable = FlagTable::new(&[
    (0, "cap_damage"),
    (1, "disable"),
    (2, "destroy"),
    (3, "ignore_external_damage"),
    (4, "becomes_dynamic"),
]);

static ACTI_FLAGS: FlagTable = FlagTable::new(&[
    (0, "no_displacement"),
    (1, "ignored_by_sandbox"),
    (4, "is_a_radio"),
]);

static ENTRY_POINTS: FlagTable = FlagTable::new(&[
    (0, "entry_point_front"),
    (1, "entry_point_behind"),
    (2, "entry_point_right"),
    (3, "entry_point_left"),
    (4, "entry_point_up"),
]);

/// EDID
pub fn edid() -> StringCodec {
    StringCodec::new(b"EDID", "eid")
}

/// FULL（可本地化）
pub fn full() -> StringCodec {
    StringCodec::localized(b"FULL", "full")
}

/// OBND 对象边界，放在 `bounds` 组中
pub fn bounds() -> Result<GroupCodec, EspError> {
    GroupCodec::new("bounds", vec![Box::new(StructCodec::new(
        b"OBND",
        &["6h"],
        vec![
            Field::new("boundX1"),
            Field::new("boundY1"),
            Field::new("boundZ1"),
            Field::new("boundX2"),
            Field::new("boundY2"),
            Field::new("boundZ2"),
        ],
    )?)])
}

/// 单个 FormID 子记录
pub fn fid(sig: &[u8; 4], attr: &'static str) -> Result<StructCodec, EspError> {
    StructCodec::new(sig, &["I"], vec![Field::fid(attr)])
}

/// KSIZ/KWDA 关键字：计数 + 排序后的 FormID 数组
pub fn keywords() -> Result<Vec<Box<dyn Codec>>, EspError> {
    Ok(vec![
        Box::new(CounterCodec::new(b"KSIZ", "I", "keywords")?),
        Box::new(SortedCodec::new(
            ArrayCodec::simple(b"KWDA", "keywords", "I", FieldKind::FormId)?,
            SortKey::Value,
        )?),
    ])
}

/// COED 物主数据
pub fn coed() -> Result<StructCodec, EspError> {
    StructCodec::new(
        b"COED",
        &["2I", "f"],
        vec![Field::fid("item_owner"), Field::fid("item_global"), Field::new("item_condition")],
    )
}

/// COCT/CNTO/COED 物品：计数 + 按 (物品, 数量) 排序的组列表
pub fn items() -> Result<Vec<Box<dyn Codec>>, EspError> {
    let entries = GroupsCodec::new("items", vec![
        Box::new(StructCodec::new(b"CNTO", &["I", "i"], vec![Field::fid("item"), Field::new("count")])?),
        Box::new(coed()?),
    ])?;
    Ok(vec![
        Box::new(CounterCodec::new(b"COCT", "I", "items")?),
        Box::new(SortedCodec::new(entries, SortKey::Attrs(vec!["item", "count"]))?),
    ])
}

/// LLCT/LVLO/COED 等级列表条目
pub fn leveled_entries() -> Result<Vec<Box<dyn Codec>>, EspError> {
    let entries = GroupsCodec::new("entries", vec![
        Box::new(StructCodec::new(
            b"LVLO",
            &["H", "2s", "I", "H", "B", "s"],
            vec![
                Field::new("level"),
                Field::new("unused1"),
                Field::fid("listId"),
                Field::new("count").with_default(Value::Int(1)),
                Field::new("item_chance_none"),
                Field::new("unused2"),
            ],
        )?),
        Box::new(coed()?),
    ])?;
    Ok(vec![
        Box::new(CounterCodec::new(b"LLCT", "B", "entries")?),
        Box::new(SortedCodec::new(entries, SortKey::Attrs(vec!["level", "listId", "count"]))?),
    ])
}

/// PLDT/PLVD 位置：类型字段嵌在负载开头，先解码类型再选择布局
pub fn location(sig: &[u8; 4]) -> Result<UnionCodec, EspError> {
    let fields = |value: Field| {
        vec![
            Field::new("location_type"),
            value,
            Field::new("location_radius"),
            Field::new("location_collection_index"),
        ]
    };
    let decider = PartialLoadDecider::on_field("i", "location_type")?;
    UnionCodec::new(decider)
        .choice_many(
            [0i64, 1, 4, 6],
            StructCodec::new(sig, &["i", "I", "i", "I"], fields(Field::fid("location_value")))?,
        )?
        .choice_many(
            [2i64, 3, 7, 12, 13],
            StructCodec::new(sig, &["i", "4s", "i", "I"], fields(Field::new("location_value")))?,
        )?
        .choice_many(
            [5i64, 10, 11],
            StructCodec::new(sig, &["i", "I", "i", "I"], fields(Field::new("location_value")))?,
        )?
        .choice_many(
            [8i64, 9, 14],
            StructCodec::new(sig, &["3i", "I"], fields(Field::new("location_value")))?,
        )
        .map(|union| union.fallback(NullCodec::new(&[sig])))
}

/// MODL/MODT/MODC/MODS/MODF 模型
pub fn model() -> Result<GroupCodec, EspError> {
    model_group([b"MODL", b"MODT", b"MODC", b"MODS"], Some(b"MODF"))
}

/// 模型组的四个（或五个）子记录：路径、纹理哈希、颜色重映射、材质替换
fn model_group(sigs: [&[u8; 4]; 4], unknown: Option<&[u8; 4]>) -> Result<GroupCodec, EspError> {
    let mut members: Vec<Box<dyn Codec>> = vec![
        Box::new(StringCodec::new(sigs[0], "modPath")),
        Box::new(RawCodec::new(sigs[1], "texture_hashes")),
        Box::new(StructCodec::new(sigs[2], &["f"], vec![Field::new("color_remapping_index")])?),
        Box::new(fid(sigs[3], "material_swap")?),
    ];
    if let Some(sig) = unknown {
        members.push(Box::new(RawCodec::new(sig, "unknown_modf")));
    }
    Ok(GroupCodec::new("model", members)?.optional())
}

/// DEST/DAMC/DSTD/DSTA/DMDL.../DSTF 破坏数据
pub fn destructible() -> Result<GroupCodec, EspError> {
    let resistances = SortedCodec::new(
        ArrayCodec::new(
            "resistances",
            TruncatedStructCodec::new(b"DAMC", &["2I"], vec![Field::fid("damage_type"), Field::new("resistance_value")], &[])?,
        ),
        SortKey::attr("damage_type"),
    )?;
    let stages = GroupsCodec::new("stages", vec![
        Box::new(StructCodec::new(
            b"DSTD",
            &["4B", "i", "2I", "i"],
            vec![
                Field::new("health"),
                Field::new("index"),
                Field::new("damage_stage"),
                Field::flags("stage_flags", &DEST_STAGE_FLAGS),
                Field::new("self_damage_per_second"),
                Field::fid("explosion"),
                Field::fid("debris"),
                Field::new("debris_count"),
            ],
        )?),
        Box::new(StringCodec::new(b"DSTA", "sequence_name")),
        Box::new(model_group([b"DMDL", b"DMDT", b"DMDC", b"DMDS"], None)?),
        Box::new(RawCodec::new(b"DSTF", "dest_end_marker")),
    ])?;
    Ok(GroupCodec::new("destructible", vec![
        Box::new(StructCodec::new(
            b"DEST",
            &["i", "2B", "2s"],
            vec![
                Field::new("health"),
                Field::new("count"),
                Field::flags("dest_flags", &DEST_FLAGS),
                Field::new("dest_unknown"),
            ],
        )?),
        Box::new(resistances),
        Box::new(stages),
    ])?
    .optional())
}

/// PRPS 属性：按角色值排序
pub fn properties() -> Result<SortedCodec, EspError> {
    SortedCodec::new(
        ArrayCodec::new(
            "properties",
            TruncatedStructCodec::new(b"PRPS", &["I", "f"], vec![Field::fid("prop_actor_value"), Field::new("prop_value")], &[])?,
        ),
        SortKey::attr("prop_actor_value"),
    )
}

/// 四字节颜色
pub fn color(sig: &[u8; 4]) -> Result<StructCodec, EspError> {
    StructCodec::new(
        sig,
        &["4B"],
        vec![Field::new("red"), Field::new("green"), Field::new("blue"), Field::new("unused_alpha")],
    )
}

/// ATTX 激活文本覆盖
pub fn attx() -> StringCodec {
    StringCodec::localized(b"ATTX", "activate_text_override")
}

/// FNAM 激活器标志（家具等记录沿用）
pub fn acti_flags() -> Result<StructCodec, EspError> {
    StructCodec::new(b"FNAM", &["H"], vec![Field::flags("acti_flags", &ACTI_FLAGS)])
}

/// CITC/CTDA/CIS1/CIS2 条件：CTDA 负载按原样保留
pub fn conditions() -> Result<Vec<Box<dyn Codec>>, EspError> {
    Ok(vec![
        Box::new(CounterCodec::new(b"CITC", "I", "conditions")?),
        Box::new(GroupsCodec::new("conditions", vec![
            Box::new(RawCodec::new(b"CTDA", "condition_data")),
            Box::new(StringCodec::new(b"CIS1", "param1_str")),
            Box::new(StringCodec::new(b"CIS2", "param2_str")),
        ])?),
    ])
}

/// ENAM/NAM0 家具标记、FNPR 入口点、XMRK 标记模型
pub fn furn_marker_data() -> Result<Vec<Box<dyn Codec>>, EspError> {
    Ok(vec![
        Box::new(GroupsCodec::new("furn_markers", vec![
            Box::new(StructCodec::new(b"ENAM", &["i"], vec![Field::new("furn_marker_index")])?),
            Box::new(StructCodec::new(
                b"NAM0",
                &["2s", "H"],
                vec![
                    Field::new("furn_marker_unknown"),
                    Field::flags("furn_marker_disabled_entry_points", &ENTRY_POINTS),
                ],
            )?),
        ])?),
        Box::new(GroupsCodec::new("marker_entry_points", vec![Box::new(StructCodec::new(
            b"FNPR",
            &["2H"],
            vec![
                Field::new("furn_marker_type"),
                Field::flags("furn_marker_entry_points", &ENTRY_POINTS),
            ],
        )?)])?),
        Box::new(StringCodec::new(b"XMRK", "marker_model")),
    ])
}
