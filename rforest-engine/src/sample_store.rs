//! Chunked, file-backed labelled-sample dataset (spec §4.4), grounded on
//! `Rf_data` in `Rf_components.h`. Feature bins live in fixed-size
//! `PackedVector<8>` chunks so only one chunk's worth of samples is ever
//! materialised per allocation; labels are a single packed vector spanning
//! the whole loaded extent.

use embedded_rforest::idvector::IdVector;
use embedded_rforest::packed::PackedVector;
use embedded_rforest::platform::{FileHandle, FileMode, Platform, SeekFrom};

use crate::config::RF_MAX_SAMPLES;
use crate::error::{EngineError, EngineResult};

const CHUNK_BYTES: u32 = 8192;
const BATCH_BYTES: usize = 2048;

#[derive(Debug, Clone)]
pub struct Sample {
    pub label: u8,
    pub features: Vec<u8>,
}

/// A chunked, file-backed dataset. `init` records layout parameters only;
/// nothing is read from disk until `load_data`/`load_chunk` is called.
pub struct SampleStore {
    path: String,
    num_features: u16,
    quant_bits: u8,
    label_bits: u8,
    samples_per_chunk: u32,
    num_samples: u32,
    chunks: Vec<PackedVector<8>>,
    labels: PackedVector<8>,
    is_loaded: bool,
    properly_initialized: bool,
}

impl SampleStore {
    /// `C = floor(CHUNK_BYTES * 8 / (F * Q))`, never less than 1.
    fn chunk_capacity(num_features: u16, quant_bits: u8) -> u32 {
        let denom = num_features as u32 * quant_bits as u32;
        if denom == 0 {
            return 1;
        }
        (CHUNK_BYTES * 8 / denom).max(1)
    }

    fn record_size(num_features: u16, quant_bits: u8) -> usize {
        1 + ((num_features as usize * quant_bits as usize) + 7) / 8
    }

    pub fn init(path: impl Into<String>, num_features: u16, quant_bits: u8, label_bits: u8) -> Self {
        let properly_initialized = num_features > 0 && quant_bits > 0 && quant_bits <= 8;
        SampleStore {
            path: path.into(),
            num_features,
            quant_bits,
            label_bits: label_bits.max(1),
            samples_per_chunk: Self::chunk_capacity(num_features, quant_bits),
            num_samples: 0,
            chunks: Vec::new(),
            labels: PackedVector::new(label_bits.max(1)).unwrap_or_else(|_| PackedVector::new(1).unwrap()),
            is_loaded: false,
            properly_initialized,
        }
    }

    pub fn properly_initialized(&self) -> bool {
        self.properly_initialized
    }

    pub fn is_loaded(&self) -> bool {
        self.is_loaded
    }

    pub fn num_samples(&self) -> u32 {
        self.num_samples
    }

    pub fn num_features(&self) -> u16 {
        self.num_features
    }

    pub fn samples_per_chunk(&self) -> u32 {
        self.samples_per_chunk
    }

    pub fn total_chunks(&self) -> usize {
        self.chunks.len()
    }

    fn location(&self, sample_index: u32) -> (usize, usize) {
        let chunk = sample_index / self.samples_per_chunk;
        let local = sample_index % self.samples_per_chunk;
        (chunk as usize, local as usize)
    }

    fn ensure_chunks(&mut self, num_samples: u32) -> EngineResult<()> {
        let needed = if num_samples == 0 {
            0
        } else {
            ((num_samples - 1) / self.samples_per_chunk + 1) as usize
        };
        while self.chunks.len() < needed {
            let elements = self.samples_per_chunk as usize * self.num_features as usize;
            let mut chunk = PackedVector::with_capacity(self.quant_bits, elements)
                .map_err(|e| EngineError::Domain(format!("{e:?}")))?;
            for _ in 0..elements {
                chunk.push(0).map_err(|e| EngineError::Domain(format!("{e:?}")))?;
            }
            self.chunks.push(chunk);
        }
        Ok(())
    }

    fn clear_memory(&mut self) {
        self.chunks.clear();
        self.labels = PackedVector::new(self.label_bits).unwrap();
        self.is_loaded = false;
    }

    fn encode_record(&self, sample: &Sample) -> Vec<u8> {
        let mut record = vec![0u8; Self::record_size(self.num_features, self.quant_bits)];
        record[0] = sample.label;
        let mut bit_pos = 0usize;
        for &value in &sample.features {
            let byte_idx = 1 + (bit_pos >> 3);
            let bit_off = bit_pos & 7;
            let bits = self.quant_bits as usize;
            let value = value & (((1u16 << self.quant_bits) - 1) as u8);
            if bit_off + bits <= 8 {
                record[byte_idx] |= value << bit_off;
            } else {
                let bits_in_first = 8 - bit_off;
                record[byte_idx] |= value << bit_off;
                record[byte_idx + 1] |= value >> bits_in_first;
            }
            bit_pos += bits;
        }
        record
    }

    fn decode_record(&self, record: &[u8]) -> Sample {
        let label = record[0];
        let mut features = Vec::with_capacity(self.num_features as usize);
        let mut bit_pos = 0usize;
        let bits = self.quant_bits as usize;
        let mask = ((1u16 << self.quant_bits) - 1) as u8;
        for _ in 0..self.num_features {
            let byte_idx = 1 + (bit_pos >> 3);
            let bit_off = bit_pos & 7;
            let value = if bit_off + bits <= 8 {
                (record[byte_idx] >> bit_off) & mask
            } else {
                let bits_in_first = 8 - bit_off;
                let bits_in_second = bits - bits_in_first;
                let first = record[byte_idx] >> bit_off;
                let second = (record[byte_idx + 1] & ((1u8 << bits_in_second) - 1)) << bits_in_first;
                (first | second) & mask
            };
            features.push(value);
            bit_pos += bits;
        }
        Sample { label, features }
    }

    /// Test-only direct write into memory, bypassing CSV/binary parsing —
    /// lets other modules' tests assemble a dataset without round-tripping
    /// through a file.
    #[cfg(test)]
    pub(crate) fn store_sample_for_test(&mut self, index: u32, sample: &Sample) {
        self.store_sample(index, sample).unwrap();
    }

    #[cfg(test)]
    pub(crate) fn set_num_samples_for_test(&mut self, num_samples: u32) {
        self.num_samples = num_samples;
    }

    fn store_sample(&mut self, index: u32, sample: &Sample) -> EngineResult<()> {
        self.ensure_chunks(index + 1)?;
        if self.labels.len() <= index as usize {
            while self.labels.len() <= index as usize {
                self.labels.push(0).map_err(|e| EngineError::Domain(format!("{e:?}")))?;
            }
        }
        self.labels
            .set(index as usize, sample.label)
            .map_err(|e| EngineError::Domain(format!("{e:?}")))?;
        let (chunk, local) = self.location(index);
        let base = local * self.num_features as usize;
        for (j, &value) in sample.features.iter().enumerate() {
            self.chunks[chunk]
                .set(base + j, value)
                .map_err(|e| EngineError::Domain(format!("{e:?}")))?;
        }
        Ok(())
    }

    /// One-shot: parses `csv_path`, builds the dataset in memory, writes the
    /// binary form, then removes the CSV. Rows with the wrong feature count
    /// are dropped (and counted); empty lines are skipped.
    pub fn convert_csv_to_binary<P: Platform>(&mut self, platform: &P, csv_path: &str) -> EngineResult<u32> {
        let mut file = platform
            .open(csv_path, FileMode::Read)
            .map_err(|e| EngineError::io(csv_path, std::io::Error::other(format!("{e:?}"))))?;
        let mut text = Vec::new();
        let mut buf = [0u8; BATCH_BYTES];
        loop {
            let n = file.read(&mut buf).map_err(|e| EngineError::Format(format!("{e:?}")))?;
            if n == 0 {
                break;
            }
            text.extend_from_slice(&buf[..n]);
        }
        let text = String::from_utf8_lossy(&text);

        self.clear_memory();
        let mut accepted = 0u32;
        let mut dropped = 0u32;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(text.as_bytes());
        for record in reader.records() {
            let record = record.map_err(|e| EngineError::Format(e.to_string()))?;
            if record.is_empty() || record.iter().all(|f| f.trim().is_empty()) {
                continue;
            }
            if record.len() != self.num_features as usize + 1 || accepted >= RF_MAX_SAMPLES {
                dropped += 1;
                continue;
            }
            let parsed: Option<Vec<u8>> = record.iter().map(|f| f.trim().parse::<u8>().ok()).collect();
            let Some(mut fields) = parsed else {
                dropped += 1;
                continue;
            };
            let label = fields.remove(0);
            let sample = Sample { label, features: fields };
            self.store_sample(accepted, &sample)?;
            accepted += 1;
        }
        self.num_samples = accepted;
        self.is_loaded = true;
        self.release_data(platform, false)?;
        platform
            .remove(csv_path)
            .map_err(|e| EngineError::io(csv_path, std::io::Error::other(format!("{e:?}"))))?;
        let _ = dropped;
        Ok(dropped)
    }

    /// Writes header + every in-memory sample to disk, then drops memory
    /// (`reuse = false`); or simply drops memory, trusting the file already
    /// matches (`reuse = true`).
    pub fn release_data<P: Platform>(&mut self, platform: &P, reuse: bool) -> EngineResult<()> {
        if !reuse {
            let mut file = platform
                .open(&self.path, FileMode::Write)
                .map_err(|e| EngineError::io(&self.path, std::io::Error::other(format!("{e:?}"))))?;
            let mut header = Vec::with_capacity(6);
            header.extend_from_slice(&self.num_samples.to_le_bytes());
            header.extend_from_slice(&self.num_features.to_le_bytes());
            file.write_all(&header)
                .map_err(|e| EngineError::Format(format!("{e:?}")))?;
            for i in 0..self.num_samples {
                let (chunk, local) = self.location(i);
                let base = local * self.num_features as usize;
                let mut features = Vec::with_capacity(self.num_features as usize);
                for j in 0..self.num_features as usize {
                    features.push(self.chunks[chunk].get(base + j).unwrap_or(0));
                }
                let label = self.labels.get(i as usize).unwrap_or(0);
                let record = self.encode_record(&Sample { label, features });
                file.write_all(&record).map_err(|e| EngineError::Format(format!("{e:?}")))?;
            }
        }
        self.clear_memory();
        Ok(())
    }

    fn read_header<P: Platform>(&self, platform: &P) -> EngineResult<(u32, u16, P::File)> {
        let mut file = platform
            .open(&self.path, FileMode::Read)
            .map_err(|e| EngineError::io(&self.path, std::io::Error::other(format!("{e:?}"))))?;
        let mut header = [0u8; 6];
        file.read_exact(&mut header)
            .map_err(|_| EngineError::Format("truncated dataset header".into()))?;
        let num_samples = u32::from_le_bytes(header[0..4].try_into().unwrap());
        let num_features = u16::from_le_bytes(header[4..6].try_into().unwrap());
        if num_features != self.num_features {
            return Err(EngineError::Format(format!(
                "dataset header feature count {num_features} does not match expected {}",
                self.num_features
            )));
        }
        Ok((num_samples, num_features, file))
    }

    /// Reads the whole file into memory, batching reads up to 2 KB. On
    /// `reuse = false` the file is removed after a successful load.
    pub fn load_data<P: Platform>(&mut self, platform: &P, reuse: bool) -> EngineResult<()> {
        let (num_samples, _num_features, mut file) = self.read_header(platform)?;
        self.clear_memory();
        self.ensure_chunks(num_samples)?;
        for i in 0..num_samples {
            if self.labels.len() <= i as usize {
                self.labels.push(0).map_err(|e| EngineError::Domain(format!("{e:?}")))?;
            }
        }

        let record_size = Self::record_size(self.num_features, self.quant_bits);
        let mut remaining = num_samples as usize;
        let mut index = 0u32;
        let mut batch = vec![0u8; BATCH_BYTES];
        while remaining > 0 {
            let records_in_batch = (BATCH_BYTES / record_size).max(1).min(remaining);
            let bytes = records_in_batch * record_size;
            if batch.len() < bytes {
                batch.resize(bytes, 0);
            }
            file.read_exact(&mut batch[..bytes])
                .map_err(|_| EngineError::Format("truncated dataset body".into()))?;
            for r in 0..records_in_batch {
                let record = &batch[r * record_size..(r + 1) * record_size];
                let sample = self.decode_record(record);
                self.store_sample(index, &sample)?;
                index += 1;
            }
            remaining -= records_in_batch;
        }

        self.num_samples = num_samples;
        self.is_loaded = true;
        if !reuse {
            platform
                .remove(&self.path)
                .map_err(|e| EngineError::io(&self.path, std::io::Error::other(format!("{e:?}"))))?;
        }
        Ok(())
    }

    /// Copies only the ids in `id_set` (ascending, repeated by count) from
    /// `source`'s file into `self`. If `source` is currently loaded and
    /// `save_ram` is set, `source` is released before the copy and reloaded
    /// after, so both copies are never resident together.
    pub fn load_data_subset<P: Platform>(
        &mut self,
        platform: &P,
        source: &mut SampleStore,
        id_set: &IdVector<8>,
        save_ram: bool,
    ) -> EngineResult<()> {
        let source_was_loaded = source.is_loaded;
        if source_was_loaded && save_ram {
            source.release_data(platform, true)?;
        }

        let (source_count, _, mut file) = source.read_header(platform)?;
        let record_size = Self::record_size(source.num_features, source.quant_bits);

        self.clear_memory();
        let mut index = 0u32;
        let mut record = vec![0u8; record_size];
        for id in id_set.iter() {
            if id as u32 >= source_count {
                continue;
            }
            let offset = 6 + id as u64 * record_size as u64;
            file.seek(SeekFrom::Start(offset))
                .map_err(|e| EngineError::Format(format!("{e:?}")))?;
            file.read_exact(&mut record)
                .map_err(|_| EngineError::Format("seek past end of dataset".into()))?;
            let sample = source.decode_record(&record);
            self.store_sample(index, &sample)?;
            index += 1;
        }
        self.num_samples = index;
        self.is_loaded = true;

        if source_was_loaded && save_ram {
            source.load_data(platform, true)?;
        }
        Ok(())
    }

    /// Convenience wrapper over [`load_data_subset`](Self::load_data_subset)
    /// for the contiguous id range `[chunk*C, min((chunk+1)*C, N))`.
    pub fn load_chunk<P: Platform>(
        &mut self,
        platform: &P,
        source: &mut SampleStore,
        chunk_index: u32,
        save_ram: bool,
    ) -> EngineResult<()> {
        let start = chunk_index * self.samples_per_chunk;
        let end = ((chunk_index + 1) * self.samples_per_chunk).min(source.num_samples);
        let mut ids = IdVector::<8>::new(source.num_samples.max(1) as usize)
            .map_err(|e| EngineError::Domain(format!("{e:?}")))?;
        for id in start..end {
            ids.push_back(id as usize).map_err(|e| EngineError::Domain(format!("{e:?}")))?;
        }
        self.load_data_subset(platform, source, &ids, save_ram)
    }

    /// Streaming append/overwrite directly on disk; returns the labels that
    /// were overwritten (empty when extending).
    pub fn add_new_data<P: Platform>(
        &mut self,
        platform: &P,
        samples: &[Sample],
        extend: bool,
    ) -> EngineResult<Vec<u8>> {
        let (num_samples, _, _file) = self.read_header(platform)?;
        let record_size = Self::record_size(self.num_features, self.quant_bits);

        let mut file = platform
            .open(&self.path, FileMode::ReadWrite)
            .map_err(|e| EngineError::io(&self.path, std::io::Error::other(format!("{e:?}"))))?;

        if extend {
            let room = RF_MAX_SAMPLES.saturating_sub(num_samples) as usize;
            let size_cap = platform.max_dataset_bytes() as usize;
            let cap_by_bytes = size_cap.saturating_sub(6 + num_samples as usize * record_size) / record_size.max(1);
            let take = samples.len().min(room).min(cap_by_bytes);

            file.seek(SeekFrom::Start(6 + num_samples as u64 * record_size as u64))
                .map_err(|e| EngineError::Format(format!("{e:?}")))?;
            for sample in &samples[..take] {
                let record = self.encode_record(sample);
                file.write_all(&record).map_err(|e| EngineError::Format(format!("{e:?}")))?;
            }
            let new_count = num_samples + take as u32;
            file.seek(SeekFrom::Start(0))
                .map_err(|e| EngineError::Format(format!("{e:?}")))?;
            file.write_all(&new_count.to_le_bytes())
                .map_err(|e| EngineError::Format(format!("{e:?}")))?;
            self.num_samples = new_count;
            Ok(Vec::new())
        } else {
            let take = samples.len().min(num_samples as usize);
            let mut overwritten = Vec::with_capacity(take);
            for (i, sample) in samples[..take].iter().enumerate() {
                let offset = 6 + i as u64 * record_size as u64;
                file.seek(SeekFrom::Start(offset))
                    .map_err(|e| EngineError::Format(format!("{e:?}")))?;
                let mut old = vec![0u8; record_size];
                file.read_exact(&mut old)
                    .map_err(|_| EngineError::Format("seek past end of dataset".into()))?;
                overwritten.push(old[0]);
                file.seek(SeekFrom::Start(offset))
                    .map_err(|e| EngineError::Format(format!("{e:?}")))?;
                let record = self.encode_record(sample);
                file.write_all(&record).map_err(|e| EngineError::Format(format!("{e:?}")))?;
            }
            Ok(overwritten)
        }
    }

    /// Hot-path accessor; assumes `is_loaded`.
    #[inline]
    pub fn get_label(&self, index: u32) -> u8 {
        self.labels.get(index as usize).unwrap_or(0)
    }

    /// Hot-path accessor; assumes `is_loaded`.
    #[inline]
    pub fn get_feature(&self, index: u32, feature: u16) -> u8 {
        let (chunk, local) = self.location(index);
        let base = local * self.num_features as usize + feature as usize;
        self.chunks
            .get(chunk)
            .and_then(|c| c.get(base).ok())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform_mem::MemPlatform;

    fn store(path: &str) -> SampleStore {
        SampleStore::init(path, 3, 2, 2)
    }

    #[test]
    fn chunk_capacity_matches_formula() {
        let s = store("/m/m_nml.bin");
        assert_eq!(s.samples_per_chunk(), 8192 * 8 / (3 * 2));
    }

    #[test]
    fn convert_csv_round_trips_through_binary() {
        let platform = MemPlatform::new();
        let mut file = platform.open("/m/m_nml.csv", FileMode::Write).unwrap();
        file.write_all(b"0,1,2,3\n1,3,2,1\n\n2,1,1,9,9\n").unwrap();

        let mut s = store("/m/m_nml.bin");
        let dropped = s.convert_csv_to_binary(&platform, "/m/m_nml.csv").unwrap();
        assert_eq!(dropped, 1);
        assert!(!platform.exists("/m/m_nml.csv"));
        assert!(platform.exists("/m/m_nml.bin"));

        s.load_data(&platform, true).unwrap();
        assert_eq!(s.num_samples(), 2);
        assert_eq!(s.get_label(0), 0);
        assert_eq!(s.get_feature(0, 0), 1);
        assert_eq!(s.get_feature(1, 2), 1);
    }

    #[test]
    fn add_new_data_extend_appends_and_updates_header() {
        let platform = MemPlatform::new();
        let mut s = store("/m/m_nml.bin");
        s.store_sample(0, &Sample { label: 0, features: vec![0, 0, 0] }).unwrap();
        s.num_samples = 1;
        s.release_data(&platform, false).unwrap();

        let overwritten = s
            .add_new_data(&platform, &[Sample { label: 1, features: vec![1, 1, 1] }], true)
            .unwrap();
        assert!(overwritten.is_empty());
        assert_eq!(s.num_samples(), 2);

        s.load_data(&platform, true).unwrap();
        assert_eq!(s.get_label(1), 1);
    }

    #[test]
    fn add_new_data_overwrite_preserves_count_and_reports_old_labels() {
        let platform = MemPlatform::new();
        let mut s = store("/m/m_nml.bin");
        s.store_sample(0, &Sample { label: 5, features: vec![0, 0, 0] }).unwrap();
        s.num_samples = 1;
        s.release_data(&platform, false).unwrap();

        let overwritten = s
            .add_new_data(&platform, &[Sample { label: 2, features: vec![1, 1, 1] }], false)
            .unwrap();
        assert_eq!(overwritten, vec![5]);
        assert_eq!(s.num_samples(), 1);

        s.load_data(&platform, true).unwrap();
        assert_eq!(s.get_label(0), 2);
    }

    #[test]
    fn load_data_subset_copies_only_requested_ids() {
        let platform = MemPlatform::new();
        let mut source = store("/m/m_nml.bin");
        for i in 0..4u32 {
            source
                .store_sample(i, &Sample { label: i as u8, features: vec![i as u8 % 4, 0, 0] })
                .unwrap();
        }
        source.num_samples = 4;
        source.release_data(&platform, false).unwrap();
        source.load_data(&platform, true).unwrap();

        let mut ids = IdVector::<8>::new(4).unwrap();
        ids.push_back(1).unwrap();
        ids.push_back(1).unwrap();
        ids.push_back(3).unwrap();

        let mut subset = SampleStore::init("/m2/m2_nml.bin", 3, 2, 2);
        subset.load_data_subset(&platform, &mut source, &ids, true).unwrap();
        assert_eq!(subset.num_samples(), 3);
        assert_eq!(subset.get_label(0), 1);
        assert_eq!(subset.get_label(1), 1);
        assert_eq!(subset.get_label(2), 3);
        assert!(source.is_loaded());
    }
}
