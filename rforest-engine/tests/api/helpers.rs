use embedded_rforest::platform::{FileHandle, FileMode};
use rforest_engine::platform_mem::MemPlatform;

/// Writes `<model>_nml.csv` and a passthrough (identity) `<model>_ctg.csv`
/// quantiser table for a `num_features`-wide, `bits`-per-feature dataset, so
/// `RandomForest::new` immediately sees `BASE_DATA_IS_CSV` and
/// `CTG_FILE_EXIST` and `build_model` can run end to end.
pub fn seed_csv_dataset(platform: &MemPlatform, model: &str, rows: &[(u8, Vec<u8>)], bits: u8, repeats: u32) {
    let mut csv = String::new();
    for _ in 0..repeats {
        for (label, features) in rows {
            csv.push_str(&label.to_string());
            for f in features {
                csv.push(',');
                csv.push_str(&f.to_string());
            }
            csv.push('\n');
        }
    }
    let mut file = platform
        .open(&format!("/{model}/{model}_nml.csv"), FileMode::Write)
        .unwrap();
    file.write_all(csv.as_bytes()).unwrap();

    let num_features = rows.first().map(|(_, f)| f.len()).unwrap_or(0);
    let mut ctg = String::new();
    let max_level = (1u32 << bits).saturating_sub(1);
    for i in 0..num_features {
        ctg.push_str(&i.to_string());
        for level in 0..max_level {
            ctg.push(',');
            ctg.push_str(&format!("{}", level as f32 + 0.5));
        }
        ctg.push('\n');
    }
    let mut ctg_file = platform
        .open(&format!("/{model}/{model}_ctg.csv"), FileMode::Write)
        .unwrap();
    ctg_file.write_all(ctg.as_bytes()).unwrap();
}

/// The spec §8 scenario-1 dataset: binary classification, Q=1, F=4.
pub fn xor_like_rows() -> Vec<(u8, Vec<u8>)> {
    vec![
        (0, vec![0, 0, 0, 0]),
        (0, vec![1, 0, 0, 0]),
        (1, vec![1, 1, 1, 1]),
        (1, vec![0, 1, 1, 1]),
    ]
}
