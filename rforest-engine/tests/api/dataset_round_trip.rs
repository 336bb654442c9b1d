//! Spec §8: "SampleStore round-trip" and "SampleStore subset" — exercised
//! directly against `SampleStore`, independent of the `RandomForest` façade.

use embedded_rforest::idvector::IdVector;
use embedded_rforest::platform::{FileHandle, FileMode};
use rforest_engine::platform_mem::MemPlatform;
use rforest_engine::sample_store::SampleStore;

fn write_csv(platform: &MemPlatform, path: &str, rows: &[(u8, [u8; 2])]) {
    let mut text = String::new();
    for (label, features) in rows {
        text.push_str(&format!("{label},{},{}\n", features[0], features[1]));
    }
    let mut file = platform.open(path, FileMode::Write).unwrap();
    file.write_all(text.as_bytes()).unwrap();
}

#[test]
fn convert_then_load_reproduces_every_sample() {
    let platform = MemPlatform::new();
    let rows = [(0u8, [0u8, 1u8]), (1, [1, 0]), (1, [1, 1]), (0, [0, 0]), (1, [0, 1])];
    write_csv(&platform, "/d/d_nml.csv", &rows);

    let mut store = SampleStore::init("/d/d_nml.bin", 2, 1, 1);
    store.convert_csv_to_binary(&platform, "/d/d_nml.csv").unwrap();
    assert!(!platform.exists("/d/d_nml.csv"), "csv source is removed after conversion");

    store.load_data(&platform, true).unwrap();
    assert_eq!(store.num_samples(), rows.len() as u32);
    for (i, (label, features)) in rows.iter().enumerate() {
        assert_eq!(store.get_label(i as u32), *label);
        assert_eq!(store.get_feature(i as u32, 0), features[0]);
        assert_eq!(store.get_feature(i as u32, 1), features[1]);
    }
}

#[test]
fn subset_load_matches_source_order() {
    let platform = MemPlatform::new();
    let rows: Vec<(u8, [u8; 2])> = (0..10u8).map(|i| (i % 2, [i % 2, (i + 1) % 2])).collect();
    write_csv(&platform, "/full/full_nml.csv", &rows);

    let mut source = SampleStore::init("/full/full_nml.bin", 2, 1, 1);
    source.convert_csv_to_binary(&platform, "/full/full_nml.csv").unwrap();

    let wanted = [1u32, 3, 4, 7, 9];
    let mut ids = IdVector::<8>::new(rows.len()).unwrap();
    for &id in &wanted {
        ids.push_back(id as usize).unwrap();
    }

    let mut subset = SampleStore::init("/sub/sub_nml.bin", 2, 1, 1);
    subset.load_data_subset(&platform, &mut source, &ids, false).unwrap();

    assert_eq!(subset.num_samples(), wanted.len() as u32);
    for (i, &id) in wanted.iter().enumerate() {
        let (label, features) = rows[id as usize];
        assert_eq!(subset.get_label(i as u32), label);
        assert_eq!(subset.get_feature(i as u32, 0), features[0]);
        assert_eq!(subset.get_feature(i as u32, 1), features[1]);
    }
}

#[test]
fn add_new_data_extends_without_touching_existing_samples() {
    let platform = MemPlatform::new();
    let rows = [(0u8, [0u8, 0u8]), (1, [1, 1])];
    write_csv(&platform, "/e/e_nml.csv", &rows);

    let mut store = SampleStore::init("/e/e_nml.bin", 2, 1, 1);
    store.convert_csv_to_binary(&platform, "/e/e_nml.csv").unwrap();

    let new_samples = vec![
        rforest_engine::sample_store::Sample { label: 1, features: vec![0, 1] },
        rforest_engine::sample_store::Sample { label: 0, features: vec![1, 0] },
    ];
    let overwritten = store.add_new_data(&platform, &new_samples, true).unwrap();
    assert!(overwritten.is_empty());

    store.load_data(&platform, true).unwrap();
    assert_eq!(store.num_samples(), 4);
    assert_eq!(store.get_label(0), 0);
    assert_eq!(store.get_label(1), 1);
    assert_eq!(store.get_label(2), 1);
    assert_eq!(store.get_label(3), 0);
}

#[test]
fn add_new_data_overwrite_preserves_sample_count_and_reports_replaced_labels() {
    let platform = MemPlatform::new();
    let rows = [(0u8, [0u8, 0u8]), (1, [1, 1]), (1, [0, 1])];
    write_csv(&platform, "/o/o_nml.csv", &rows);

    let mut store = SampleStore::init("/o/o_nml.bin", 2, 1, 1);
    store.convert_csv_to_binary(&platform, "/o/o_nml.csv").unwrap();

    let replacement = vec![rforest_engine::sample_store::Sample { label: 0, features: vec![1, 1] }];
    let overwritten = store.add_new_data(&platform, &replacement, false).unwrap();
    assert_eq!(overwritten, vec![0u8]);

    store.load_data(&platform, true).unwrap();
    assert_eq!(store.num_samples(), rows.len() as u32);
    assert_eq!(store.get_label(0), 0);
    assert_eq!(store.get_feature(0, 0), 1);
    assert_eq!(store.get_label(1), 1);
    assert_eq!(store.get_label(2), 1);
}
