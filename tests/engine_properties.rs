use esp_records::defs::{common, fallout4};
use esp_records::schema::{
    AttrValDecider, Field, HeaderContext, RecordSchema, StructCodec, TruncatedStructCodec, UnionCodec,
};
use esp_records::subrecord::write_subrecord;
use esp_records::{EspError, FileId, FormId, MasterList, Record, RecordHeader, Signature, Value};
use std::collections::HashSet;

fn sub(out: &mut Vec<u8>, sig: &[u8; 4], data: &[u8]) {
    write_subrecord(out, Signature(*sig), data);
}

fn u32s(values: &[u32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn masters() -> MasterList {
    MasterList::new(FileId::from("Test.esp"), vec![FileId::from("Fallout4.esm")])
}

fn base(object_id: u32) -> Value {
    Value::FormId(FormId::new(FileId::from("Fallout4.esm"), object_id))
}

fn decode(schema: &RecordSchema, data: &[u8], masters: &MasterList) -> Record {
    let header = RecordHeader::new(schema.signature(), 0x0100_0800, 131);
    schema
        .decode_record(&header, data, &HeaderContext::new(131, masters))
        .unwrap()
}

/// EDID, OBND, FULL, 关键字, MNAM, 一个对象模板
fn furn_payload() -> Vec<u8> {
    let mut data = Vec::new();
    sub(&mut data, b"EDID", b"ChairWood\0");
    sub(&mut data, b"OBND", &[0xF6, 0xFF, 0xF6, 0xFF, 0, 0, 10, 0, 10, 0, 40, 0]);
    sub(&mut data, b"FULL", b"Chair\0");
    sub(&mut data, b"KSIZ", &u32s(&[2]));
    sub(&mut data, b"KWDA", &u32s(&[0x0001_0100, 0x0002_0200]));
    sub(&mut data, b"MNAM", &u32s(&[0x3]));
    sub(&mut data, b"OBTE", &u32s(&[1]));
    sub(&mut data, b"OBTS", &[1, 2, 3, 4]);
    sub(&mut data, b"FULL", b"Rusty\0");
    sub(&mut data, b"STOP", &[]);
    data
}

#[test]
fn round_trip_reproduces_bytes_and_attributes() {
    let schema = fallout4::furn().unwrap();
    let masters = masters();
    let data = furn_payload();

    let record = decode(&schema, &data, &masters);
    let encoded = schema.encode_attrs(&record.attrs, record.form_version, &masters).unwrap();
    assert_eq!(encoded, data);

    let again = decode(&schema, &encoded, &masters);
    assert_eq!(again, record);
}

#[test]
fn distributor_routes_nested_full() {
    let schema = fallout4::furn().unwrap();
    let record = decode(&schema, &furn_payload(), &masters());

    assert_eq!(record.get("full"), Some(&Value::Str("Chair".into())));
    let combinations = record.get("ot_combinations").and_then(Value::as_list).unwrap();
    assert_eq!(combinations.len(), 1);
    let combination = combinations[0].as_group().unwrap();
    assert_eq!(combination.get("ot_name"), Some(&Value::Str("Rusty".into())));
    assert_eq!(combination.get("ot_properties"), Some(&Value::Bytes(vec![1, 2, 3, 4])));
    assert_eq!(record.get("ot_end_marker"), Some(&Value::Bytes(Vec::new())));

    // 没有 OBTE 时 FULL 回到顶层
    let mut bare = Vec::new();
    sub(&mut bare, b"OBTS", &[9]);
    sub(&mut bare, b"FULL", b"Top\0");
    let record = decode(&schema, &bare, &masters());
    assert_eq!(record.get("full"), Some(&Value::Str("Top".into())));
}

#[test]
fn old_layout_takes_defaults_and_encodes_widest() {
    let schema = RecordSchema::builder(b"TEST")
        .element(
            TruncatedStructCodec::new(
                b"DATA",
                &["3i"],
                vec![Field::new("first"), Field::new("second"), Field::new("third")],
                &["2i"],
            )
            .unwrap(),
        )
        .build()
        .unwrap();
    let masters = masters();

    let mut data = Vec::new();
    sub(&mut data, b"DATA", &u32s(&[1, 2]));
    let record = decode(&schema, &data, &masters);
    assert_eq!(record.get("first"), Some(&Value::Int(1)));
    assert_eq!(record.get("second"), Some(&Value::Int(2)));
    assert_eq!(record.get("third"), Some(&Value::Int(0)));

    let encoded = schema.encode_attrs(&record.attrs, 131, &masters).unwrap();
    let mut expected = Vec::new();
    sub(&mut expected, b"DATA", &u32s(&[1, 2, 0]));
    assert_eq!(encoded, expected);
}

#[test]
fn every_declared_old_size_decodes() {
    let schema = fallout4::expl().unwrap();
    let masters = masters();
    for size in [84usize, 64, 60, 56, 52] {
        let mut data = Vec::new();
        sub(&mut data, b"DATA", &vec![0; size]);
        let record = decode(&schema, &data, &masters);
        let encoded = schema.encode_attrs(&record.attrs, 131, &masters).unwrap();
        assert_eq!(encoded.len(), 6 + 84, "old size {}", size);
    }
}

fn leveled_entry(level: i64, item: u32, count: i64) -> Value {
    let mut entry = esp_records::AttrMap::new();
    entry.insert("level".into(), Value::Int(level));
    entry.insert("listId".into(), base(item));
    entry.insert("count".into(), Value::Int(count));
    Value::Group(entry)
}

#[test]
fn permuted_collections_encode_identically() {
    let schema = fallout4::lvli().unwrap();
    let masters = masters();
    let entries = [
        leveled_entry(1, 0x20, 1),
        leveled_entry(1, 0x10, 2),
        leveled_entry(5, 0x10, 1),
        leveled_entry(1, 0x10, 1),
    ];
    let orders: [[usize; 4]; 4] = [[0, 1, 2, 3], [3, 2, 1, 0], [2, 0, 3, 1], [1, 3, 0, 2]];

    let mut outputs = Vec::new();
    for order in orders {
        let mut record = schema.new_record(FormId::new(FileId::from("Test.esp"), 0x800), 131);
        record.set("entries", Value::List(order.iter().map(|&i| entries[i].clone()).collect()));
        outputs.push(schema.encode_attrs(&record.attrs, 131, &masters).unwrap());
    }
    assert!(outputs.windows(2).all(|pair| pair[0] == pair[1]));

    // 编码结果按 (等级, 物品, 数量) 排列
    let record = decode(&schema, &outputs[0], &masters);
    let decoded = record.get("entries").and_then(Value::as_list).unwrap();
    let keys: Vec<_> = decoded
        .iter()
        .map(|e| {
            let e = e.as_group().unwrap();
            (e["level"].as_int().unwrap(), e["listId"].as_form_id().unwrap().object_id(), e["count"].as_int().unwrap())
        })
        .collect();
    assert_eq!(keys, vec![(1, 0x10, 1), (1, 0x10, 2), (1, 0x20, 1), (5, 0x10, 1)]);
}

#[test]
fn form_ids_survive_master_reorder() {
    let schema = fallout4::registry().unwrap();
    let flst = schema.get(&Signature(*b"FLST")).unwrap();
    let before = MasterList::new(
        FileId::from("Patch.esp"),
        vec![FileId::from("Fallout4.esm"), FileId::from("DLCRobot.esm")],
    );
    let after = MasterList::new(
        FileId::from("Patch.esp"),
        vec![FileId::from("DLCRobot.esm"), FileId::from("Fallout4.esm")],
    );

    let mut data = Vec::new();
    sub(&mut data, b"LNAM", &u32s(&[0x0000_0F99]));
    sub(&mut data, b"LNAM", &u32s(&[0x0100_0123]));
    sub(&mut data, b"LNAM", &u32s(&[0x0200_0800]));
    let record = decode(flst, &data, &before);

    let encoded = flst.encode_attrs(&record.attrs, 131, &after).unwrap();
    let mut expected = Vec::new();
    sub(&mut expected, b"LNAM", &u32s(&[0x0100_0F99]));
    sub(&mut expected, b"LNAM", &u32s(&[0x0000_0123]));
    sub(&mut expected, b"LNAM", &u32s(&[0x0200_0800]));
    assert_eq!(encoded, expected);

    let again = decode(flst, &encoded, &after);
    assert_eq!(again.get("formIDInList"), record.get("formIDInList"));
}

#[test]
fn decider_routes_each_key() {
    let schema = RecordSchema::builder(b"PACK")
        .element(common::location(b"PLDT").unwrap())
        .build()
        .unwrap();
    let masters = masters();

    let cases: [(i32, Value); 4] = [
        (0, base(0x1234)),
        (2, Value::Bytes(0x1234u32.to_le_bytes().to_vec())),
        (5, Value::Int(0x1234)),
        (12, Value::Bytes(0x1234u32.to_le_bytes().to_vec())),
    ];
    for (location_type, expected) in cases {
        let mut payload = location_type.to_le_bytes().to_vec();
        payload.extend(u32s(&[0x0000_1234, 256, 0]));
        let mut data = Vec::new();
        sub(&mut data, b"PLDT", &payload);

        let record = decode(&schema, &data, &masters);
        assert_eq!(record.get("location_value"), Some(&expected), "type {}", location_type);
        assert_eq!(schema.encode_attrs(&record.attrs, 131, &masters).unwrap(), data);
    }

    // 类型 8 布局没有 FormID：值是三个整数中的第一个
    let mut payload = 8i32.to_le_bytes().to_vec();
    payload.extend(u32s(&[7, 256, 0]));
    let mut data = Vec::new();
    sub(&mut data, b"PLDT", &payload);
    let record = decode(&schema, &data, &masters);
    assert_eq!(record.get("location_value"), Some(&Value::Int(7)));
}

#[test]
fn unmapped_decider_key_fails() {
    let schema = RecordSchema::builder(b"TEST")
        .element(StructCodec::new(b"TNAM", &["I"], vec![Field::new("kind")]).unwrap())
        .element(
            UnionCodec::new(AttrValDecider::new("kind"))
                .choice(1i64, StructCodec::new(b"DATA", &["I"], vec![Field::fid("target")]).unwrap())
                .unwrap()
                .choice(2i64, StructCodec::new(b"DATA", &["f"], vec![Field::new("value")]).unwrap())
                .unwrap(),
        )
        .build()
        .unwrap();
    let masters = masters();
    let ctx = HeaderContext::new(131, &masters);

    let mut data = Vec::new();
    sub(&mut data, b"TNAM", &u32s(&[2]));
    sub(&mut data, b"DATA", &1.5f32.to_le_bytes());
    let attrs = schema.decode(&data, &ctx).unwrap();
    assert_eq!(attrs["value"], Value::Float(1.5));
    assert!(!attrs.contains_key("target"));

    let mut data = Vec::new();
    sub(&mut data, b"TNAM", &u32s(&[3]));
    sub(&mut data, b"DATA", &u32s(&[0]));
    assert!(matches!(schema.decode(&data, &ctx), Err(EspError::DeciderKeyError { .. })));
}

#[test]
fn keep_fids_filters_array_in_order() {
    let schema = fallout4::registry().unwrap();
    let flst = schema.get(&Signature(*b"FLST")).unwrap();
    let masters = MasterList::new(
        FileId::from("Patch.esp"),
        vec![FileId::from("Fallout4.esm"), FileId::from("DLCCoast.esm")],
    );

    let mut data = Vec::new();
    sub(&mut data, b"LNAM", &u32s(&[0x0000_0002]));
    sub(&mut data, b"LNAM", &u32s(&[0x0100_0003]));
    sub(&mut data, b"LNAM", &u32s(&[0x0000_0001]));
    let record = decode(flst, &data, &masters);

    let keep: HashSet<FileId> = [FileId::from("Fallout4.esm"), FileId::from("Patch.esp")].into();
    let filtered = record.with_kept_fids(&keep);
    assert_eq!(
        filtered.get("formIDInList"),
        Some(&Value::List(vec![base(2), base(1)]))
    );
    // 原记录不变
    assert_eq!(record.get("formIDInList").and_then(Value::as_list).map(<[Value]>::len), Some(3));
}

#[test]
fn strings_round_trip_in_either_encoding() {
    let registry = fallout4::registry().unwrap();
    let kywd = registry.get(&Signature(*b"KYWD")).unwrap();
    let masters = masters();

    for text in ["Ã©", "Café", "铁栅栏"] {
        let mut record = kywd.new_record(FormId::new(FileId::from("Test.esp"), 0x800), 131);
        record.set("eid", Value::Str(text.into()));
        let encoded = kywd.encode_attrs(&record.attrs, 131, &masters).unwrap();
        let decoded = decode(kywd, &encoded, &masters);
        assert_eq!(decoded.get("eid"), Some(&Value::Str(text.into())), "{}", text);
    }
}
