//! Spec §8 scenario 6: renaming a complete model must leave zero files under
//! the old prefix and an identical set under the new one, with predictions
//! unaffected.

use rforest_engine::model::RandomForest;
use rforest_engine::platform_mem::MemPlatform;

use crate::helpers::{seed_csv_dataset, xor_like_rows};

#[test]
fn renaming_a_complete_model_moves_every_artifact_and_preserves_predictions() {
    let platform = MemPlatform::new();
    seed_csv_dataset(&platform, "m1", &xor_like_rows(), 1, 50);

    let mut model = RandomForest::new(platform.clone(), "m1").unwrap();
    model.set_dataset_shape(4, 1);
    model.set_num_trees(5);
    model.set_random_seed(3);
    model.build_model().unwrap();
    assert!(model.able_to_inference());

    let before: Vec<u8> = xor_like_rows()
        .into_iter()
        .map(|(_, features)| {
            let raw: Vec<f32> = features.iter().map(|&b| b as f32).collect();
            model.predict(&raw).label_id
        })
        .collect();

    model.set_model_name("m2");
    assert_eq!(model.model_name(), "m2");

    for suffix in ["_nml.bin", "_ctg.csv", "_dp.csv", "_config.json", "_forest.bin"] {
        assert!(!platform.exists(&format!("/m1/m1{suffix}")), "old file {suffix} should be gone");
        assert!(platform.exists(&format!("/m2/m2{suffix}")), "new file {suffix} should exist");
    }

    let after: Vec<u8> = xor_like_rows()
        .into_iter()
        .map(|(_, features)| {
            let raw: Vec<f32> = features.iter().map(|&b| b as f32).collect();
            model.predict(&raw).label_id
        })
        .collect();
    assert_eq!(before, after);

    // A fresh façade opened against the new name must still be able to
    // predict — not just the already-loaded in-memory forest.
    let reopened = RandomForest::new(platform, "m2").unwrap();
    assert!(reopened.able_to_inference());
    for (label, features) in xor_like_rows() {
        let raw: Vec<f32> = features.iter().map(|&b| b as f32).collect();
        assert_eq!(reopened.predict(&raw).label_id, label);
    }
}
