use super::common::{
    acti_flags, attx, bounds, color, conditions, destructible, edid, fid, full, furn_marker_data, items,
    keywords, leveled_entries, model, properties,
};
use crate::datatypes::FlagTable;
use crate::schema::{
    ArrayCodec, CmpOp, CounterCodec, Distributor, ElementWidth, Field, FieldKind, FormVersionDecider,
    GroupsCodec, NullCodec, RawCodec, RecordSchema, RepeatedCodec, SchemaRegistry, SortKey, SortedCodec,
    StringCodec, StructCodec, TruncatedStructCodec, UnionCodec,
};
use crate::utils::EspError;
use crate::value::Value;

static EXPL_FLAGS: FlagTable = FlagTable::new(&[
    (1, "always_uses_world_orientation"),
    (2, "knock_down_always"),
    (3, "knock_down_by_formula"),
    (4, "ignore_los_check"),
    (5, "push_explosion_source_ref_only"),
    (6, "ignore_image_space_swap"),
    (7, "explosion_chain"),
    (8, "no_controller_vibration"),
    (9, "placed_object_persists"),
    (10, "skip_underwater_tests"),
]);

static LVL_FLAGS: FlagTable = FlagTable::new(&[
    (0, "calc_from_all_levels"),
    (1, "calc_for_each_item"),
    (2, "use_all_items"),
    (3, "special_loot"),
]);

static MARKER_ENTRY_TYPES: FlagTable = FlagTable::new(&[
    (0, "entry_type_front"),
    (1, "entry_type_rear"),
    (2, "entry_type_right"),
    (3, "entry_type_left"),
    (4, "entry_type_other"),
]);

static ACTIVE_MARKERS: FlagTable = FlagTable::new(&[
    (22, "allow_awake_sound"),
    (23, "enter_with_weapon_drawn"),
    (24, "play_anim_when_full"),
    (25, "disables_activation"),
    (26, "is_perch"),
    (27, "must_exit_to_talk"),
    (28, "use_static_to_avoid_node"),
    (30, "has_model"),
    (31, "is_sleep_furniture"),
]);

/// 文件头部
pub fn tes4() -> Result<RecordSchema, EspError> {
    Ok(RecordSchema::builder(b"TES4")
        .element(StructCodec::new(
            b"HEDR",
            &["f", "2I"],
            vec![
                Field::new("version").with_default(Value::Float(1.0)),
                Field::new("numRecords"),
                Field::new("nextObject").with_default(Value::Int(0x800)),
            ],
        )?)
        .element(NullCodec::new(&[b"OFST", b"DELE"]))
        .element(StringCodec::new(b"CNAM", "author"))
        .element(StringCodec::new(b"SNAM", "description"))
        .element(GroupsCodec::new("masters", vec![
            Box::new(StringCodec::new(b"MAST", "name")),
            Box::new(StructCodec::new(b"DATA", &["8s"], vec![Field::new("size")])?),
        ])?)
        .element(ArrayCodec::simple(b"ONAM", "overrides", "I", FieldKind::FormId)?)
        .element(RawCodec::new(b"SCRN", "screenshot"))
        .element(StructCodec::new(b"INTV", &["I"], vec![Field::new("unknownINTV")])?)
        .element(StructCodec::new(b"INCC", &["I"], vec![Field::new("internal_cell_count")])?)
        .build()?)
}

fn kywd() -> Result<RecordSchema, EspError> {
    RecordSchema::builder(b"KYWD")
        .element(edid())
        .element(color(b"CNAM")?)
        .element(StringCodec::new(b"DNAM", "aact_kywd_notes"))
        .element(StructCodec::new(b"TNAM", &["I"], vec![Field::new("aact_kywd_type")])?)
        .element(fid(b"DATA", "attraction_rule")?)
        .element(full())
        .build()
}

fn glob() -> Result<RecordSchema, EspError> {
    RecordSchema::builder(b"GLOB")
        .element(edid())
        .element(StructCodec::new(
            b"FNAM",
            &["B"],
            vec![Field::new("global_format").with_default(Value::Int(b'f' as i64))],
        )?)
        .element(StructCodec::new(b"FLTV", &["f"], vec![Field::new("global_value")])?)
        .build()
}

fn flst() -> Result<RecordSchema, EspError> {
    // 列表顺序有意义，不排序
    RecordSchema::builder(b"FLST")
        .element(edid())
        .element(full())
        .element(RepeatedCodec::fids(b"LNAM", "formIDInList")?)
        .build()
}

/// 伤害类型：格式版本 78 起每个元素带法术引用
pub fn dmgt() -> Result<RecordSchema, EspError> {
    let current = ArrayCodec::new(
        "damage_types",
        TruncatedStructCodec::new(b"DNAM", &["2I"], vec![Field::fid("dt_actor_value"), Field::fid("dt_spell")], &[])?,
    );
    let legacy = ArrayCodec::simple(b"DNAM", "damage_types", "I", FieldKind::Plain)?;
    RecordSchema::builder(b"DMGT")
        .element(edid())
        .element(
            UnionCodec::new(FormVersionDecider::new(CmpOp::Ge, 78))
                .choice(true, current)?
                .choice(false, legacy)?,
        )
        .build()
}

/// 爆炸：DATA 有四个历史布局，其中 13~15 个值的布局缺少中间的 inner_radius
pub fn expl() -> Result<RecordSchema, EspError> {
    let data = TruncatedStructCodec::new(
        b"DATA",
        &["6I", "6f", "2I", "f", "I", "4f", "I"],
        vec![
            Field::fid("expl_light"),
            Field::fid("expl_sound1"),
            Field::fid("expl_sound2"),
            Field::fid("expl_impact_dataset"),
            Field::fid("placed_object"),
            Field::fid("spawn_object"),
            Field::new("expl_force"),
            Field::new("expl_damage"),
            Field::new("inner_radius"),
            Field::new("outer_radius"),
            Field::new("is_radius"),
            Field::new("vertical_offset_mult"),
            Field::flags("expl_flags", &EXPL_FLAGS),
            Field::new("expl_sound_level"),
            Field::new("placed_object_autofade_delay"),
            Field::new("expl_stagger"),
            Field::new("expl_spawn_x"),
            Field::new("expl_spawn_y"),
            Field::new("expl_spawn_z"),
            Field::new("expl_spawn_spread_degrees"),
            Field::new("expl_spawn_count"),
        ],
        &["6I6f2IfI", "6I5f2IfI", "6I5f2If", "6I5f2I"],
    )?
    .with_pre_process(|mut raw, defaults| {
        // 格式版本 97 在 outer_radius 之前加入了 inner_radius
        if matches!(raw.len(), 13..=15) {
            if let Some(inner_radius) = defaults.get(8) {
                raw.insert(8, inner_radius.clone());
            }
        }
        raw
    });

    RecordSchema::builder(b"EXPL")
        .element(edid())
        .element(bounds()?)
        .element(full())
        .element(model()?)
        .element(fid(b"EITM", "enchantment")?)
        .element(fid(b"MNAM", "image_space_modifier")?)
        .element(data)
        .build()
}

/// 家具：包含对象模板，模板内的 FULL 与顶层 FULL 同签名，需要路由表区分
pub fn furn() -> Result<RecordSchema, EspError> {
    let marker_params = ArrayCodec::new(
        "furn_marker_parameters",
        TruncatedStructCodec::new(
            b"SNAM",
            &["4f", "I", "B", "3s"],
            vec![
                Field::new("param_offset_x"),
                Field::new("param_offset_y"),
                Field::new("param_offset_z"),
                Field::new("param_rotation_z"),
                Field::fid("param_keyword"),
                Field::flags("param_entry_types", &MARKER_ENTRY_TYPES),
                Field::new("param_unknown"),
            ],
            &["4fI"],
        )?,
    )
    // 格式版本 125 在末尾加入了入口类型
    .with_element_width(ElementWidth::FormVersion {
        op: CmpOp::Ge,
        threshold: 125,
        then: 24,
        otherwise: 20,
    })?;

    let combinations = GroupsCodec::new("ot_combinations", vec![
        Box::new(RawCodec::new(b"OBTS", "ot_properties")),
        Box::new(StringCodec::localized(b"FULL", "ot_name")),
    ])?;

    RecordSchema::builder(b"FURN")
        .element(edid())
        .element(RawCodec::new(b"VMAD", "vmad"))
        .element(bounds()?)
        .element(fid(b"PTRN", "preview_transform")?)
        .element(full())
        .element(model()?)
        .element(destructible()?)
        .extend(keywords()?)
        .element(properties()?)
        .element(fid(b"NTRM", "native_terminal")?)
        .element(fid(b"FTYP", "forced_loc_ref_type")?)
        .element(color(b"PNAM")?)
        .element(fid(b"WNAM", "drinking_water_type")?)
        .element(attx())
        .element(acti_flags()?)
        .extend(conditions()?)
        .extend(items()?)
        .element(StructCodec::new(b"MNAM", &["I"], vec![Field::flags("active_markers_flags", &ACTIVE_MARKERS)])?)
        .element(TruncatedStructCodec::new(
            b"WBDT",
            &["B", "b"],
            vec![Field::new("bench_type"), Field::new("uses_skill")],
            &["B"],
        )?)
        .element(fid(b"NAM1", "associated_form")?)
        .extend(furn_marker_data()?)
        .element(marker_params)
        .element(ArrayCodec::simple(b"APPR", "attach_parent_slots", "I", FieldKind::FormId)?)
        .element(CounterCodec::new(b"OBTE", "I", "ot_combinations")?)
        .element(combinations)
        .element(RawCodec::new(b"STOP", "ot_end_marker"))
        .element(RawCodec::new(b"NVNM", "navmesh_geometry"))
        .distributor(
            Distributor::new()
                .route(b"FULL", "full")
                .scope(b"OBTE", &[(b"FULL", "ot_combinations")]),
        )
        .build()
}

/// 等级物品列表
pub fn lvli() -> Result<RecordSchema, EspError> {
    let keyword_chances = SortedCodec::new(
        ArrayCodec::new(
            "filter_keyword_chances",
            TruncatedStructCodec::new(b"LLKC", &["2I"], vec![Field::fid("llkc_keyword"), Field::new("llkc_chance")], &[])?,
        ),
        SortKey::attr("llkc_keyword"),
    )?;

    RecordSchema::builder(b"LVLI")
        .element(edid())
        .element(bounds()?)
        .element(StructCodec::new(b"LVLD", &["B"], vec![Field::new("lvl_chance_none")])?)
        .element(StructCodec::new(b"LVLM", &["B"], vec![Field::new("lvl_max_count")])?)
        .element(StructCodec::new(b"LVLF", &["B"], vec![Field::flags("flags", &LVL_FLAGS)])?)
        .element(fid(b"LVLG", "lvl_global")?)
        .extend(leveled_entries()?)
        .element(keyword_chances)
        .element(fid(b"LVSG", "epic_loot_chance")?)
        .element(StringCodec::localized(b"ONAM", "lvli_override_name"))
        .build()
}

/// Fallout 4 记录注册表（不含文件头部，头部由插件加载器单独处理）
pub fn registry() -> Result<SchemaRegistry, EspError> {
    let mut registry = SchemaRegistry::new();
    for schema in [kywd()?, glob()?, flst()?, dmgt()?, expl()?, furn()?, lvli()?] {
        registry.register(schema)?;
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formid::{FileId, FormId, MasterList};
    use crate::schema::HeaderContext;
    use crate::subrecord::{write_subrecord, Signature};

    fn masters() -> MasterList {
        MasterList::new(FileId::from("Test.esp"), vec![FileId::from("Fallout4.esm")])
    }

    #[test]
    fn test_registry_builds() {
        let registry = registry().unwrap();
        assert_eq!(registry.len(), 7);
        assert!(registry.contains(&Signature(*b"FURN")));
        assert!(tes4().is_ok());
    }

    #[test]
    fn test_dmgt_form_version_union() {
        let mut data = Vec::new();
        write_subrecord(&mut data, Signature(*b"DNAM"), &[0x10u32.to_le_bytes(), 0x20u32.to_le_bytes()].concat());
        let masters = masters();

        let old = dmgt().unwrap().decode(&data, &HeaderContext::new(70, &masters)).unwrap();
        assert_eq!(old["damage_types"], Value::List(vec![Value::Int(0x10), Value::Int(0x20)]));

        let new = dmgt().unwrap().decode(&data, &HeaderContext::new(131, &masters)).unwrap();
        let entries = new["damage_types"].as_list().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(
            entries[0].as_group().unwrap()["dt_spell"],
            Value::FormId(FormId::new(FileId::from("Fallout4.esm"), 0x20))
        );
    }

    #[test]
    fn test_expl_old_layout_inserts_inner_radius() {
        // 6I5f2I：13 个值
        let mut payload = Vec::new();
        for _ in 0..6 {
            payload.extend_from_slice(&0u32.to_le_bytes());
        }
        for f in [10.0f32, 20.0, 300.0, 1.0, 0.5] {
            payload.extend_from_slice(&f.to_le_bytes());
        }
        payload.extend_from_slice(&0x4u32.to_le_bytes());
        payload.extend_from_slice(&70u32.to_le_bytes());
        let mut data = Vec::new();
        write_subrecord(&mut data, Signature(*b"DATA"), &payload);

        let masters = masters();
        let schema = expl().unwrap();
        let attrs = schema.decode(&data, &HeaderContext::new(80, &masters)).unwrap();
        assert_eq!(attrs["expl_damage"], Value::Float(20.0));
        assert_eq!(attrs["inner_radius"], Value::Float(0.0));
        assert_eq!(attrs["outer_radius"], Value::Float(300.0));
        assert!(attrs["expl_flags"].as_flags().unwrap().get("knock_down_always"));
        assert_eq!(attrs["expl_sound_level"], Value::Int(70));
        assert_eq!(attrs["expl_spawn_count"], Value::Int(0));

        let out = schema.encode_attrs(&attrs, 131, &masters).unwrap();
        assert_eq!(out.len(), 6 + 84);
    }

    fn u32s(values: &[u32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn test_furn_full_layout_round_trip() {
        let mut data = Vec::new();
        let mut sub = |sig: &[u8; 4], payload: &[u8]| write_subrecord(&mut data, Signature(*sig), payload);
        sub(b"EDID", b"WorkshopChair\0");
        sub(b"VMAD", &[6, 0, 2, 0, 0, 0]);
        sub(b"FULL", b"Chair\0");
        sub(b"MODL", b"Furniture\\Chair.nif\0");
        sub(b"MODT", &[1, 2, 3, 4]);
        sub(b"MODC", &1.0f32.to_le_bytes());
        sub(b"MODS", &u32s(&[0x0000_1234]));
        sub(b"DEST", &[100, 0, 0, 0, 1, 0, 0, 0]);
        sub(b"DAMC", &u32s(&[0x0000_0100, 25]));
        sub(b"DSTD", &[50, 0, 1, 4, 0, 0, 0, 0, 0, 2, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        sub(b"DSTA", b"Broken\0");
        sub(b"DMDL", b"Chair_Broken.nif\0");
        sub(b"DSTF", &[]);
        sub(b"PRPS", &[u32s(&[0x0000_02D5]), 1.0f32.to_le_bytes().to_vec()].concat());
        sub(b"PNAM", &[255, 128, 0, 0]);
        sub(b"ATTX", b"Sit\0");
        sub(b"FNAM", &[0x11, 0]);
        sub(b"CITC", &u32s(&[1]));
        sub(b"CTDA", &[0; 32]);
        sub(b"CIS1", b"Param\0");
        sub(b"MNAM", &u32s(&[0x4000_0000]));
        sub(b"ENAM", &u32s(&[0]));
        sub(b"NAM0", &[0, 0, 1, 0]);
        sub(b"FNPR", &[1, 0, 3, 0]);
        sub(b"XMRK", b"Marker.nif\0");
        sub(b"NVNM", &[15, 0, 0, 0]);

        let masters = masters();
        let schema = furn().unwrap();
        let ctx = HeaderContext::new(131, &masters).unknown_signatures(crate::config::UnknownSignaturePolicy::Fail);
        let attrs = schema.decode(&data, &ctx).unwrap();

        assert_eq!(attrs["model"].as_group().unwrap()["modPath"], Value::Str("Furniture\\Chair.nif".into()));
        let destructible = attrs["destructible"].as_group().unwrap();
        let stages = destructible["stages"].as_list().unwrap();
        assert_eq!(stages.len(), 1);
        assert_eq!(
            stages[0].as_group().unwrap()["model"].as_group().unwrap()["modPath"],
            Value::Str("Chair_Broken.nif".into())
        );
        let properties = attrs["properties"].as_list().unwrap();
        assert_eq!(
            properties[0].as_group().unwrap()["prop_actor_value"],
            Value::FormId(FormId::new(FileId::from("Fallout4.esm"), 0x2D5))
        );
        assert!(attrs["acti_flags"].as_flags().unwrap().get("is_a_radio"));
        assert_eq!(attrs["conditions"].as_list().map(|c| c.len()), Some(1));
        assert_eq!(attrs["furn_markers"].as_list().map(|m| m.len()), Some(1));

        assert_eq!(schema.encode_attrs(&attrs, 131, &masters).unwrap(), data);
    }

    #[test]
    fn test_optional_groups_not_emitted_for_new_records() {
        let masters = masters();
        let schema = furn().unwrap();
        let record = schema.new_record(FormId::new(FileId::from("Test.esp"), 0x800), 131);
        assert!(!record.attrs.contains_key("model"));
        assert!(!record.attrs.contains_key("destructible"));
        let out = schema.encode_attrs(&record.attrs, 131, &masters).unwrap();
        assert!(!out.windows(4).any(|w| w == b"MODL" || w == b"DEST"));
    }

    #[test]
    fn test_expl_model() {
        let mut data = Vec::new();
        write_subrecord(&mut data, Signature(*b"EDID"), b"FragGrenadeExplosion\0");
        write_subrecord(&mut data, Signature(*b"MODL"), b"Effects\\Frag.nif\0");
        write_subrecord(&mut data, Signature(*b"MODF"), &[0]);
        let masters = masters();
        let schema = expl().unwrap();
        let ctx = HeaderContext::new(131, &masters).unknown_signatures(crate::config::UnknownSignaturePolicy::Fail);
        let attrs = schema.decode(&data, &ctx).unwrap();
        assert_eq!(attrs["model"].as_group().unwrap()["unknown_modf"], Value::Bytes(vec![0]));
        assert_eq!(schema.encode_attrs(&attrs, 131, &masters).unwrap(), data);
    }

    #[test]
    fn test_lvli_entries_sorted_on_encode() {
        let masters = masters();
        let schema = lvli().unwrap();
        let entry = |level: u16, fid: u32| {
            let mut payload = Vec::new();
            payload.extend_from_slice(&level.to_le_bytes());
            payload.extend_from_slice(&[0, 0]);
            payload.extend_from_slice(&fid.to_le_bytes());
            payload.extend_from_slice(&1u16.to_le_bytes());
            payload.extend_from_slice(&[0, 0]);
            payload
        };
        let mut data = Vec::new();
        write_subrecord(&mut data, Signature(*b"LLCT"), &[2]);
        write_subrecord(&mut data, Signature(*b"LVLO"), &entry(10, 0x100));
        write_subrecord(&mut data, Signature(*b"LVLO"), &entry(1, 0x200));

        let attrs = schema.decode(&data, &HeaderContext::new(131, &masters)).unwrap();
        let entries = attrs["entries"].as_list().unwrap();
        assert_eq!(entries[0].as_group().unwrap()["level"], Value::Int(10));

        let out = schema.encode_attrs(&attrs, 131, &masters).unwrap();
        let mut expected = Vec::new();
        write_subrecord(&mut expected, Signature(*b"LLCT"), &[2]);
        write_subrecord(&mut expected, Signature(*b"LVLO"), &entry(1, 0x200));
        write_subrecord(&mut expected, Signature(*b"LVLO"), &entry(10, 0x100));
        assert_eq!(out, expected);
    }
}
