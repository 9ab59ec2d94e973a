//! 缓存确定性前处理结果的数据集.

use std::sync::Arc;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use super::{DatasetError, FileRecord};
use crate::data::Sample;
use crate::transforms::Compose;

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::iter::{IndexedParallelIterator, IntoParallelIterator, ParallelIterator};
    }
}

/// 缓存数据集.
///
/// 构建时对前 `floor(n * cache_rate)` 个病例运行流水线的确定性前缀
/// (`0..transform.first_random()`) 并常驻内存; 之后每次 [`CacheDataset::get`]
/// 只在缓存副本上运行剩余的随机步骤. 未缓存的病例每次都运行完整流水线.
pub struct CacheDataset {
    records: Vec<FileRecord>,
    transform: Arc<Compose>,
    cache: Vec<Vec<Sample>>,
}

impl std::fmt::Debug for CacheDataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheDataset")
            .field("patients", &self.patients())
            .field("transform", &self.transform)
            .field("cached", &self.cache.len())
            .finish()
    }
}

impl CacheDataset {
    /// 创建并立即填充缓存.
    ///
    /// `num_workers` 为填充缓存的线程数, `None` 表示使用全部 CPU.
    /// 未启用 `rayon` feature 时总是顺序填充.
    pub fn new(
        records: Vec<FileRecord>,
        transform: Arc<Compose>,
        cache_rate: f64,
        num_workers: Option<usize>,
    ) -> Result<Self, DatasetError> {
        if !(0.0..=1.0).contains(&cache_rate) {
            return Err(DatasetError::Config {
                name: "cache_rate",
                value: cache_rate.to_string(),
            });
        }
        let cache_len = ((records.len() as f64 * cache_rate) as usize).min(records.len());
        let workers = num_workers.filter(|&n| n > 0).unwrap_or_else(num_cpus::get);
        let prefix = transform.first_random();

        log::info!(
            "caching {cache_len}/{} samples ({prefix} deterministic steps, {workers} workers)",
            records.len()
        );
        let start = Instant::now();
        let cache = fill_cache(&records[..cache_len], &transform, workers)?;
        log::info!("cache filled in {:.2?}", start.elapsed());

        Ok(Self {
            records,
            transform,
            cache,
        })
    }

    /// 由已有缓存 (如 [`super::NpzCache::load`] 的结果) 创建.
    ///
    /// `cache` 的第 `i` 项必须是第 `i` 个病例运行确定性前缀后的结果.
    /// `cache` 比 `records` 长时多余部分被丢弃.
    pub fn with_cache(
        records: Vec<FileRecord>,
        transform: Arc<Compose>,
        mut cache: Vec<Vec<Sample>>,
    ) -> Self {
        cache.truncate(records.len());
        Self {
            records,
            transform,
            cache,
        }
    }

    /// 获取第 `index` 个病例的变换结果.
    ///
    /// 验证流水线返回 1 个完整体数据, 训练流水线返回多个子块.
    pub fn get(&self, index: usize, rng: &mut dyn RngCore) -> Result<Vec<Sample>, DatasetError> {
        let record = self.records.get(index).ok_or(DatasetError::Index {
            index,
            len: self.records.len(),
        })?;
        let wrap = |source| DatasetError::Transform { index, source };
        match self.cache.get(index) {
            Some(cached) => self
                .transform
                .apply_range(
                    self.transform.first_random()..self.transform.len(),
                    cached.clone(),
                    rng,
                )
                .map_err(wrap),
            None => {
                log::debug!("sample {index} is not cached, running full pipeline");
                self.transform.apply(record.to_sample(), rng).map_err(wrap)
            }
        }
    }

    /// 病例个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// 是否没有病例?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// 文件记录.
    #[inline]
    pub fn records(&self) -> &[FileRecord] {
        &self.records
    }

    /// 病例编号.
    pub fn patients(&self) -> Vec<u32> {
        self.records.iter().map(|r| r.patient()).collect()
    }

    /// 已缓存的病例个数.
    #[inline]
    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    /// 第 `index` 个病例的缓存.
    #[inline]
    pub fn cached(&self, index: usize) -> Option<&[Sample]> {
        self.cache.get(index).map(Vec::as_slice)
    }

    /// 变换流水线.
    #[inline]
    pub fn transform(&self) -> &Arc<Compose> {
        &self.transform
    }
}

/// 对一个病例运行确定性前缀. 前缀不消耗随机数, 这里的生成器只为满足接口.
fn cache_one(
    index: usize,
    record: &FileRecord,
    transform: &Compose,
) -> Result<Vec<Sample>, DatasetError> {
    let start = Instant::now();
    let mut rng = StdRng::seed_from_u64(0);
    let out = transform
        .apply_range(
            0..transform.first_random(),
            vec![record.to_sample()],
            &mut rng,
        )
        .map_err(|source| DatasetError::Transform { index, source })?;
    log::debug!(
        "cached patient {} in {:.2?}",
        record.patient(),
        start.elapsed()
    );
    Ok(out)
}

#[cfg(feature = "rayon")]
fn fill_cache(
    records: &[FileRecord],
    transform: &Compose,
    workers: usize,
) -> Result<Vec<Vec<Sample>>, DatasetError> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()?;
    pool.install(|| {
        records
            .into_par_iter()
            .enumerate()
            .map(|(i, r)| cache_one(i, r, transform))
            .collect()
    })
}

#[cfg(not(feature = "rayon"))]
fn fill_cache(
    records: &[FileRecord],
    transform: &Compose,
    _workers: usize,
) -> Result<Vec<Vec<Sample>>, DatasetError> {
    records
        .iter()
        .enumerate()
        .map(|(i, r)| cache_one(i, r, transform))
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::CacheDataset;
    use crate::data::{Affine, Key, Sample, Volume};
    use crate::dataset::{DatasetError, FileRecord};
    use crate::transforms::testing::{array_of, rng};
    use crate::transforms::{
        Compose, LoadImage, RandShiftIntensity, ScaleIntensityRange, Transform, TransformResult,
    };
    use crate::CtWindow;
    use ndarray::ArrayD;
    use rand::RngCore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn float_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-6
    }

    /// 以病例编号填充的合成体数据, 代替磁盘读取.
    pub(crate) struct Synthetic {
        pub calls: Arc<AtomicUsize>,
    }

    impl Transform for Synthetic {
        fn name(&self) -> &'static str {
            "Synthetic"
        }

        fn apply(&self, sample: Sample, _: &mut dyn RngCore) -> TransformResult<Vec<Sample>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let id = sample.patient().unwrap_or(0) as f32;
            let mut out = Sample::new().with_patient(id as u32);
            for key in [Key::Image, Key::Label] {
                let data = ArrayD::from_elem(vec![1, 4, 4, 4], id * 10.0);
                out.insert_volume(key, Volume::new(data, Affine::identity()));
            }
            Ok(vec![out])
        }
    }

    pub(crate) fn synthetic_dataset(
        ids: &[u32],
        cache_rate: f64,
        jitter: bool,
    ) -> (CacheDataset, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut c = Compose::new()
            .then(Synthetic {
                calls: Arc::clone(&calls),
            })
            .then(ScaleIntensityRange::new(
                [Key::Image],
                CtWindow::from_bounds(0.0, 200.0).unwrap(),
            ));
        if jitter {
            c = c.then(RandShiftIntensity::new([Key::Image], 0.1, 1.0));
        }
        let records = ids
            .iter()
            .map(|&id| FileRecord::from_patient("/nonexistent", id))
            .collect();
        let ds = CacheDataset::new(records, Arc::new(c), cache_rate, Some(2)).unwrap();
        (ds, calls)
    }

    #[test]
    fn test_cache_fill() {
        let _ = simple_logger::SimpleLogger::new()
            .with_level(log::LevelFilter::Debug)
            .init();
        let (ds, calls) = synthetic_dataset(&[1, 4, 5, 6], 0.5, true);
        assert_eq!(ds.len(), 4);
        assert_eq!(ds.cached_len(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(ds.patients(), [1, 4, 5, 6]);

        let cached = ds.cached(1).unwrap();
        assert_eq!(cached[0].patient(), Some(4));
        assert!(array_of(&cached[0], Key::Image)
            .iter()
            .all(|&v| float_eq(v, 0.2)));
        assert!(ds.cached(2).is_none());
    }

    #[test]
    fn test_get_runs_random_suffix_only() {
        let (ds, calls) = synthetic_dataset(&[1, 4], 1.0, true);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let mut r = rng(3);
        let a = ds.get(0, &mut r).unwrap();
        let b = ds.get(0, &mut r).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let (x, y) = (array_of(&a[0], Key::Image), array_of(&b[0], Key::Image));
        assert!((x[[0, 0, 0, 0]] - 0.05).abs() <= 0.1 + 1e-6);
        assert_ne!(x[[0, 0, 0, 0]], y[[0, 0, 0, 0]]);

        // 缓存本身不被随机步骤修改.
        assert!(array_of(&ds.cached(0).unwrap()[0], Key::Image)
            .iter()
            .all(|&v| float_eq(v, 0.05)));
    }

    #[test]
    fn test_uncached_runs_full_pipeline() {
        let (ds, calls) = synthetic_dataset(&[1, 4, 5], 0.0, false);
        assert_eq!(ds.cached_len(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let out = ds.get(2, &mut rng(0)).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(out[0].patient(), Some(5));
        assert!(array_of(&out[0], Key::Image)
            .iter()
            .all(|&v| float_eq(v, 0.25)));
    }

    #[test]
    fn test_errors() {
        let (ds, _) = synthetic_dataset(&[1], 1.0, false);
        assert!(matches!(
            ds.get(1, &mut rng(0)),
            Err(DatasetError::Index { index: 1, len: 1 })
        ));

        let c = Arc::new(Compose::new().then(LoadImage::new([Key::Image])));
        let records = vec![FileRecord::from_patient("/nonexistent", 9)];
        assert!(matches!(
            CacheDataset::new(records.clone(), Arc::clone(&c), 2.0, None),
            Err(DatasetError::Config { .. })
        ));
        assert!(matches!(
            CacheDataset::new(records, c, 1.0, None),
            Err(DatasetError::Transform { index: 0, .. })
        ));
    }
}
