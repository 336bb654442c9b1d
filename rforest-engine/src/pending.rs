//! Online prediction/label pairing (spec §4.11), grounded on
//! `Rf_pending_data` in `Rf_components.h`: two parallel ordered sequences
//! ingesting delayed ground-truth labels, flushing into the `SampleStore`
//! and the `"INFL"`-magic inference log.

use embedded_rforest::platform::{FileHandle, FileMode, Platform, SeekFrom};

use crate::config::{Config, RF_MAX_SAMPLES};
use crate::error::{EngineError, EngineResult};
use crate::sample_store::{Sample, SampleStore};

const MAGIC: [u8; 4] = *b"INFL";

/// Maintains `pending_samples` (each carrying the model's own prediction as
/// its label) and `actual_labels` (`None` = explicit skip sentinel,
/// `Some(label)` = a received ground truth). Invariant:
/// `actual_labels.len() <= pending_samples.len()`.
pub struct PendingBuffer {
    pending_samples: Vec<Sample>,
    actual_labels: Vec<Option<u8>>,
    max_pending: usize,
    max_wait_ms: u64,
    last_label_time_ms: Option<u64>,
}

impl PendingBuffer {
    pub fn new(max_pending: usize, max_wait_ms: u64) -> Self {
        PendingBuffer {
            pending_samples: Vec::new(),
            actual_labels: Vec::new(),
            max_pending,
            max_wait_ms: max_wait_ms.max(1),
            last_label_time_ms: None,
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending_samples.len()
    }

    /// Appends a pending sample; if the queue now exceeds `max_pending`, a
    /// flush is triggered immediately.
    pub fn add_pending_sample<P: Platform>(
        &mut self,
        platform: &P,
        sample: Sample,
        base_data: &mut SampleStore,
        config: &mut Config,
        infer_log_path: &str,
    ) -> EngineResult<()> {
        self.pending_samples.push(sample);
        if self.pending_samples.len() > self.max_pending {
            self.flush(platform, base_data, config, infer_log_path)?;
        }
        Ok(())
    }

    /// Backfills skip-sentinels for every `max_wait_ms` elapsed since the
    /// previous ground truth, then appends `label` — unless every pending
    /// sample already has a slot filled, in which case the label is
    /// dropped.
    pub fn add_actual_label(&mut self, now_ms: u64, label: u8) {
        if let Some(last) = self.last_label_time_ms {
            let elapsed = now_ms.saturating_sub(last);
            let skips = elapsed / self.max_wait_ms;
            for _ in 0..skips {
                if self.actual_labels.len() >= self.pending_samples.len() {
                    break;
                }
                self.actual_labels.push(None);
            }
        }
        self.last_label_time_ms = Some(now_ms);

        if self.actual_labels.len() >= self.pending_samples.len() {
            return;
        }
        self.actual_labels.push(Some(label));
    }

    /// For every index with both a pending sample and a non-sentinel
    /// actual label: writes a cleaned (relabelled) sample into `base_data`
    /// and appends `(predicted, actual)` to the inference log. Updates
    /// `config.dataset.samples_per_label`/`num_samples` accordingly, then
    /// clears both buffers unconditionally.
    pub fn flush<P: Platform>(
        &mut self,
        platform: &P,
        base_data: &mut SampleStore,
        config: &mut Config,
        infer_log_path: &str,
    ) -> EngineResult<()> {
        let mut cleaned = Vec::new();
        let mut pairs = Vec::new();
        for (i, sample) in self.pending_samples.iter().enumerate() {
            if let Some(Some(actual)) = self.actual_labels.get(i) {
                cleaned.push(Sample { label: *actual, features: sample.features.clone() });
                pairs.push((sample.label, *actual));
            }
        }

        if !cleaned.is_empty() {
            let overwritten = base_data.add_new_data(platform, &cleaned, config.extend_base_data)?;
            for label in overwritten {
                if let Some(c) = config.dataset.samples_per_label.get_mut(label as usize) {
                    *c = c.saturating_sub(1);
                }
            }
            for &(_, actual) in &pairs {
                let idx = actual as usize;
                if idx >= config.dataset.samples_per_label.len() {
                    config.dataset.samples_per_label.resize(idx + 1, 0);
                }
                config.dataset.samples_per_label[idx] += 1;
            }
            if config.extend_base_data {
                config.dataset.num_samples = (config.dataset.num_samples + cleaned.len() as u32).min(RF_MAX_SAMPLES);
            }
            append_inference_log(platform, infer_log_path, &pairs, platform.max_infer_log_bytes())?;
        }

        self.pending_samples.clear();
        self.actual_labels.clear();
        Ok(())
    }
}

fn read_header<P: Platform>(platform: &P, path: &str) -> EngineResult<u32> {
    let mut file = platform
        .open(path, FileMode::Read)
        .map_err(|e| EngineError::io(path, std::io::Error::other(format!("{e:?}"))))?;
    let mut header = [0u8; 8];
    file.read_exact(&mut header)
        .map_err(|_| EngineError::Format("truncated inference log header".into()))?;
    if header[0..4] != MAGIC {
        return Err(EngineError::Format("bad inference log magic".into()));
    }
    Ok(u32::from_le_bytes(header[4..8].try_into().unwrap()))
}

/// Appends `pairs` to the inference log, creating it with an empty header
/// if missing, then rewrites the count. If the resulting file exceeds
/// `cap_bytes`, trims by dropping the oldest half and rewriting.
fn append_inference_log<P: Platform>(platform: &P, path: &str, pairs: &[(u8, u8)], cap_bytes: u64) -> EngineResult<()> {
    if !platform.exists(path) {
        let mut file = platform
            .open(path, FileMode::Write)
            .map_err(|e| EngineError::io(path, std::io::Error::other(format!("{e:?}"))))?;
        let mut header = Vec::with_capacity(8);
        header.extend_from_slice(&MAGIC);
        header.extend_from_slice(&0u32.to_le_bytes());
        file.write_all(&header).map_err(|e| EngineError::Format(format!("{e:?}")))?;
    }

    let old_count = read_header(platform, path)?;
    let mut file = platform
        .open(path, FileMode::ReadWrite)
        .map_err(|e| EngineError::io(path, std::io::Error::other(format!("{e:?}"))))?;

    file.seek(SeekFrom::Start(8 + old_count as u64 * 2))
        .map_err(|e| EngineError::Format(format!("{e:?}")))?;
    for &(predicted, actual) in pairs {
        file.write_all(&[predicted, actual])
            .map_err(|e| EngineError::Format(format!("{e:?}")))?;
    }
    let new_count = old_count + pairs.len() as u32;
    file.seek(SeekFrom::Start(4)).map_err(|e| EngineError::Format(format!("{e:?}")))?;
    file.write_all(&new_count.to_le_bytes())
        .map_err(|e| EngineError::Format(format!("{e:?}")))?;

    let total_bytes = 8 + new_count as u64 * 2;
    if total_bytes > cap_bytes {
        trim_oldest_half(platform, path, new_count)?;
    }
    Ok(())
}

fn trim_oldest_half<P: Platform>(platform: &P, path: &str, count: u32) -> EngineResult<()> {
    let drop_count = count / 2;
    let keep_count = count - drop_count;

    let mut file = platform
        .open(path, FileMode::Read)
        .map_err(|e| EngineError::io(path, std::io::Error::other(format!("{e:?}"))))?;
    file.seek(SeekFrom::Start(8 + drop_count as u64 * 2))
        .map_err(|e| EngineError::Format(format!("{e:?}")))?;
    let mut kept = vec![0u8; keep_count as usize * 2];
    file.read_exact(&mut kept)
        .map_err(|_| EngineError::Format("truncated inference log during trim".into()))?;

    let mut out = platform
        .open(path, FileMode::Write)
        .map_err(|e| EngineError::io(path, std::io::Error::other(format!("{e:?}"))))?;
    let mut header = Vec::with_capacity(8 + kept.len());
    header.extend_from_slice(&MAGIC);
    header.extend_from_slice(&keep_count.to_le_bytes());
    header.extend_from_slice(&kept);
    out.write_all(&header).map_err(|e| EngineError::Format(format!("{e:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform_mem::MemPlatform;

    fn sample_store() -> SampleStore {
        SampleStore::init("/m/m_nml.bin", 2, 2, 2)
    }

    #[test]
    fn add_actual_label_backfills_sentinels_by_elapsed_time() {
        let mut buf = PendingBuffer::new(100, 1000);
        for _ in 0..5 {
            buf.pending_samples.push(Sample { label: 0, features: vec![0, 0] });
        }
        buf.add_actual_label(0, 9);
        buf.add_actual_label(2500, 7); // 2 windows elapsed -> 2 sentinels then label
        assert_eq!(buf.actual_labels, vec![Some(9), None, None, Some(7)]);
    }

    #[test]
    fn add_actual_label_drops_when_no_slot_remains() {
        let mut buf = PendingBuffer::new(100, 1000);
        buf.pending_samples.push(Sample { label: 0, features: vec![0, 0] });
        buf.add_actual_label(0, 1);
        buf.add_actual_label(10, 2); // no second pending sample -> dropped
        assert_eq!(buf.actual_labels, vec![Some(1)]);
    }

    #[test]
    fn flush_writes_cleaned_samples_and_inference_log() {
        let platform = MemPlatform::new();
        let mut store = sample_store();
        store.store_sample_for_test(0, &Sample { label: 0, features: vec![0, 0] });
        store.set_num_samples_for_test(1);
        store.release_data(&platform, false).unwrap();

        let mut config = Config::default();
        config.extend_base_data = true;
        config.dataset.num_labels = 3;
        config.dataset.num_samples = 1;
        config.dataset.samples_per_label = vec![1, 0, 0];

        let mut buf = PendingBuffer::new(10, 1000);
        buf.add_pending_sample(&platform, Sample { label: 1, features: vec![1, 1] }, &mut store, &mut config, "/m/m_infer_log.bin").unwrap();
        buf.add_actual_label(0, 2);
        buf.flush(&platform, &mut store, &mut config, "/m/m_infer_log.bin").unwrap();

        assert_eq!(buf.pending_count(), 0);
        assert_eq!(config.dataset.samples_per_label[2], 1);
        assert_eq!(config.dataset.num_samples, 2);

        store.load_data(&platform, true).unwrap();
        assert_eq!(store.num_samples(), 2);
        assert_eq!(store.get_label(1), 2);

        assert!(platform.exists("/m/m_infer_log.bin"));
    }

    #[test]
    fn flush_triggered_automatically_when_queue_exceeds_max_pending() {
        let platform = MemPlatform::new();
        let mut store = sample_store();
        store.store_sample_for_test(0, &Sample { label: 0, features: vec![0, 0] });
        store.set_num_samples_for_test(1);
        store.release_data(&platform, false).unwrap();

        let mut config = Config::default();
        let mut buf = PendingBuffer::new(1, 1000);
        buf.add_pending_sample(&platform, Sample { label: 0, features: vec![0, 0] }, &mut store, &mut config, "/m/m_infer_log.bin").unwrap();
        buf.add_pending_sample(&platform, Sample { label: 0, features: vec![0, 0] }, &mut store, &mut config, "/m/m_infer_log.bin").unwrap();
        assert_eq!(buf.pending_count(), 0);
    }
}
