//! Spec §8 scenario 5: predict three samples producing labels `[a,a,b]`,
//! feed back actual labels `[a,a,c]`, flush, and check both the extended
//! dataset and the inference log.

use embedded_rforest::platform::{FileHandle, FileMode};
use rforest_engine::model::RandomForest;
use rforest_engine::platform_mem::MemPlatform;
use rforest_engine::sample_store::SampleStore;

use crate::helpers::{seed_csv_dataset, xor_like_rows};

fn read_inference_log(platform: &MemPlatform, path: &str) -> (u32, Vec<(u8, u8)>) {
    let mut file = platform.open(path, FileMode::Read).unwrap();
    let mut header = [0u8; 8];
    file.read_exact(&mut header).unwrap();
    assert_eq!(&header[0..4], b"INFL");
    let count = u32::from_le_bytes(header[4..8].try_into().unwrap());
    let mut pairs = Vec::new();
    for _ in 0..count {
        let mut pair = [0u8; 2];
        file.read_exact(&mut pair).unwrap();
        pairs.push((pair[0], pair[1]));
    }
    (count, pairs)
}

#[test]
fn flush_extends_dataset_and_appends_matching_inference_log_pairs() {
    let platform = MemPlatform::new();
    seed_csv_dataset(&platform, "pf", &xor_like_rows(), 1, 50);

    let mut model = RandomForest::new(platform.clone(), "pf").unwrap();
    model.set_dataset_shape(4, 1);
    model.set_num_trees(5);
    model.set_random_seed(13);
    model.build_model().unwrap();

    let rows_before = {
        let mut store = SampleStore::init("/pf/pf_nml.bin", 4, 1, 1);
        store.load_data(&platform, true).unwrap();
        store.num_samples()
    };

    // Predict three samples, expecting the pattern [a, a, b] (a=label for an
    // all-low and a high-first sample, b=label for the two all-high rows).
    let samples: [[u8; 4]; 3] = [[0, 0, 0, 0], [1, 0, 0, 0], [1, 1, 1, 1]];
    let mut predicted = Vec::new();
    for features in &samples {
        let raw: Vec<f32> = features.iter().map(|&b| b as f32).collect();
        let result = model.predict(&raw);
        assert!(result.success);
        predicted.push(result.label_id);
        model.log_pending_data(features.to_vec(), result.label_id).unwrap();
    }
    assert_eq!(model.pending_count(), 3);

    let a = predicted[0];
    let b = predicted[2];
    let c = if b == 0 { 1 } else { 0 };
    let actuals = [a, a, c];
    for &label in &actuals {
        model.add_actual_label(label);
    }

    model.flush_pending_data().unwrap();
    assert_eq!(model.pending_count(), 0);

    let mut store = SampleStore::init("/pf/pf_nml.bin", 4, 1, 1);
    store.load_data(&platform, true).unwrap();
    assert_eq!(store.num_samples(), rows_before + 3);
    for (i, &label) in actuals.iter().enumerate() {
        assert_eq!(store.get_label(rows_before + i as u32), label);
    }

    let (count, pairs) = read_inference_log(&platform, "/pf/pf_infer_log.bin");
    assert_eq!(count, 3);
    assert_eq!(pairs, vec![(predicted[0], a), (predicted[1], a), (predicted[2], c)]);
}
