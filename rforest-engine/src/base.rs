//! Model directory state machine (spec §4.8), grounded on `Rf_base` in
//! `Rf_components.h`: a flag bitset plus strict path naming under
//! `/<model>/<model>_<suffix>` (and `/<model>/tree_<i>.bin`), rescanned on
//! every `init`/`update_resource_status`/`set_model_name`.

use embedded_rforest::platform::Platform;

/// Maximum number of per-tree files `set_model_name` will look for when
/// renaming an individual (non-unified) forest.
pub const RF_MAX_TREES: u8 = 100;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ResourceFlags: u16 {
        const SCANNED             = 1 << 0;
        const BASE_DATA_EXIST     = 1 << 1;
        const BASE_DATA_IS_CSV    = 1 << 2;
        const CTG_FILE_EXIST      = 1 << 3;
        const DP_FILE_EXIST       = 1 << 4;
        const CONFIG_FILE_EXIST   = 1 << 5;
        const UNIFIED_FOREST_EXIST= 1 << 6;
        const NODE_PRED_FILE_EXIST= 1 << 7;
        const ABLE_TO_INFERENCE   = 1 << 8;
        const ABLE_TO_TRAINING    = 1 << 9;
    }
}

/// Scans a model's directory and derives a flag bitset describing which
/// companion files exist and whether the model is ready for training or
/// inference. Owns path construction for every file the rest of the crate
/// touches; nothing else should hand-assemble a model path.
#[derive(Debug, Clone)]
pub struct ResourceBase {
    model_name: String,
    flags: ResourceFlags,
}

impl ResourceBase {
    /// An unscanned, nameless base. `ready_to_use()` is false until `init`.
    pub fn new() -> Self {
        ResourceBase {
            model_name: String::new(),
            flags: ResourceFlags::empty(),
        }
    }

    pub fn init<P: Platform>(platform: &P, name: &str) -> Self {
        let mut base = ResourceBase {
            model_name: name.to_string(),
            flags: ResourceFlags::empty(),
        };
        if !name.is_empty() {
            base.scan(platform);
        }
        base
    }

    pub fn update_resource_status<P: Platform>(&mut self, platform: &P) {
        if self.model_name.is_empty() {
            return;
        }
        self.flags = ResourceFlags::empty();
        self.scan(platform);
    }

    fn scan<P: Platform>(&mut self, platform: &P) {
        let mut flags = ResourceFlags::empty();

        if platform.exists(&self.base_data_path()) {
            flags |= ResourceFlags::BASE_DATA_EXIST;
        } else if platform.exists(&self.base_data_csv_path()) {
            flags |= ResourceFlags::BASE_DATA_IS_CSV;
        } else {
            self.model_name.clear();
            self.flags = ResourceFlags::empty();
            return;
        }

        if platform.exists(&self.ctg_path()) {
            flags |= ResourceFlags::CTG_FILE_EXIST;
        } else {
            self.model_name.clear();
            self.flags = ResourceFlags::empty();
            return;
        }

        if platform.exists(&self.dp_path()) {
            flags |= ResourceFlags::DP_FILE_EXIST;
        }
        if platform.exists(&self.config_path()) {
            flags |= ResourceFlags::CONFIG_FILE_EXIST;
        }
        if platform.exists(&self.forest_path()) {
            flags |= ResourceFlags::UNIFIED_FOREST_EXIST;
        }
        if platform.exists(&self.node_pred_path()) {
            flags |= ResourceFlags::NODE_PRED_FILE_EXIST;
        }

        if flags.contains(ResourceFlags::UNIFIED_FOREST_EXIST) && flags.contains(ResourceFlags::CTG_FILE_EXIST) {
            flags |= ResourceFlags::ABLE_TO_INFERENCE;
        }
        if flags.contains(ResourceFlags::BASE_DATA_EXIST) && flags.contains(ResourceFlags::CTG_FILE_EXIST) {
            flags |= ResourceFlags::ABLE_TO_TRAINING;
        }
        flags |= ResourceFlags::SCANNED;
        self.flags = flags;
    }

    fn build_path(&self, suffix: &str) -> String {
        format!("/{}/{}{}", self.model_name, self.model_name, suffix)
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn base_data_path(&self) -> String {
        self.build_path("_nml.bin")
    }

    pub fn base_data_csv_path(&self) -> String {
        self.build_path("_nml.csv")
    }

    pub fn dp_path(&self) -> String {
        self.build_path("_dp.csv")
    }

    pub fn ctg_path(&self) -> String {
        self.build_path("_ctg.csv")
    }

    pub fn infer_log_path(&self) -> String {
        self.build_path("_infer_log.bin")
    }

    pub fn config_path(&self) -> String {
        self.build_path("_config.json")
    }

    pub fn node_pred_path(&self) -> String {
        self.build_path("_node_pred.bin")
    }

    pub fn node_log_path(&self) -> String {
        self.build_path("_node_log.csv")
    }

    pub fn forest_path(&self) -> String {
        self.build_path("_forest.bin")
    }

    pub fn time_log_path(&self) -> String {
        self.build_path("_time_log.csv")
    }

    pub fn memory_log_path(&self) -> String {
        self.build_path("_memory_log.csv")
    }

    pub fn temp_base_data_path(&self) -> String {
        self.build_path("_cpy.bin")
    }

    pub fn tree_path(&self, tree_index: u8) -> String {
        format!("/{}/tree_{}.bin", self.model_name, tree_index)
    }

    pub fn ready_to_use(&self) -> bool {
        !self.model_name.is_empty() && self.flags.contains(ResourceFlags::SCANNED)
    }

    pub fn dp_file_exists(&self) -> bool {
        self.flags.contains(ResourceFlags::DP_FILE_EXIST)
    }

    pub fn config_file_exists(&self) -> bool {
        self.flags.contains(ResourceFlags::CONFIG_FILE_EXIST)
    }

    pub fn node_pred_file_exists(&self) -> bool {
        self.flags.contains(ResourceFlags::NODE_PRED_FILE_EXIST)
    }

    pub fn base_data_is_csv(&self) -> bool {
        self.flags.contains(ResourceFlags::BASE_DATA_IS_CSV)
    }

    pub fn forest_file_exists(&self) -> bool {
        self.flags.contains(ResourceFlags::UNIFIED_FOREST_EXIST)
    }

    pub fn able_to_training(&self) -> bool {
        self.flags.contains(ResourceFlags::ABLE_TO_TRAINING)
    }

    pub fn able_to_inference(&self) -> bool {
        self.flags.contains(ResourceFlags::ABLE_TO_INFERENCE)
    }

    pub fn set_config_status(&mut self, exists: bool) -> bool {
        self.flags.set(ResourceFlags::CONFIG_FILE_EXIST, exists);
        self.config_file_exists()
    }

    pub fn set_dp_status(&mut self, exists: bool) -> bool {
        self.flags.set(ResourceFlags::DP_FILE_EXIST, exists);
        self.dp_file_exists()
    }

    pub fn set_node_pred_status(&mut self, exists: bool) -> bool {
        self.flags.set(ResourceFlags::NODE_PRED_FILE_EXIST, exists);
        self.node_pred_file_exists()
    }

    /// Renames the model and every companion file that exists under the old
    /// name, then rescans. Individual tree files (`tree_<i>.bin`) are only
    /// renamed up to the first missing index, matching the original's
    /// break-on-first-gap behaviour; a unified `_forest.bin` is renamed
    /// instead when present.
    pub fn set_model_name<P: Platform>(&mut self, platform: &P, new_name: &str) {
        if new_name.is_empty() {
            return;
        }
        let old_name = self.model_name.clone();
        self.model_name = new_name.to_string();

        if old_name.is_empty() {
            self.scan(platform);
            return;
        }

        let rename_suffix = |platform: &P, old_name: &str, new_name: &str, suffix: &str| {
            let old_path = format!("/{old_name}/{old_name}{suffix}");
            let new_path = format!("/{new_name}/{new_name}{suffix}");
            if platform.exists(&old_path) {
                let _ = platform.mkdir(&format!("/{new_name}"));
                let _ = platform.rename(&old_path, &new_path);
            }
        };

        for suffix in [
            "_nml.bin",
            "_dp.csv",
            "_ctg.csv",
            "_infer_log.bin",
            "_node_pred.bin",
            "_node_log.csv",
            "_config.json",
            "_memory_log.csv",
            "_time_log.csv",
        ] {
            rename_suffix(platform, &old_name, &self.model_name, suffix);
        }

        let old_forest = format!("/{old_name}/{old_name}_forest.bin");
        let new_forest = format!("/{}/{}_forest.bin", self.model_name, self.model_name);
        if platform.exists(&old_forest) {
            let _ = platform.rename(&old_forest, &new_forest);
        } else {
            for i in 0..RF_MAX_TREES {
                let old_tree = format!("/{old_name}/tree_{i}.bin");
                let new_tree = format!("/{}/tree_{}.bin", self.model_name, i);
                if platform.exists(&old_tree) {
                    let _ = platform.rename(&old_tree, &new_tree);
                } else {
                    break;
                }
            }
        }

        self.flags = ResourceFlags::empty();
        self.scan(platform);
    }
}

impl Default for ResourceBase {
    fn default() -> Self {
        Self::new()
    }
}
