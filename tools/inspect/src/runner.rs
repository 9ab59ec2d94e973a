//! 程序运行函数.

use crate::result::{InspectResult, Profile};
use ct_vessel::dataset::{DataLoader, DatasetError};
use std::time::Instant;
use utils::loader;

fn profile_epoch(name: &str, dl: &mut DataLoader) -> Result<Profile, DatasetError> {
    log::info!("{name}: {} batches of {} patients", dl.len(), dl.batch_size());
    let mut profile = Profile::default();
    let mut it = dl.iter();
    loop {
        let start = Instant::now();
        let Some(batch) = it.next() else { break };
        let batch = batch?;
        log::debug!("{name}: batch {:?} from {:?}", batch.image.dim(), batch.patients);
        profile.record(&batch, start.elapsed());
    }
    Ok(profile)
}

/// 实际运行: 加载数据集并各跑一轮训练/验证加载器.
pub fn run() -> Result<InspectResult, DatasetError> {
    let root = loader::dataset_dir_from_env_or_home();
    log::info!(
        "Inspecting IRCAD dataset at {} with {} cpus",
        root.display(),
        utils::cpus()
    );

    let (mut train, mut val, _test) = loader::loaders_from_env_or_home()?;
    let train = profile_epoch("train", &mut train)?;
    let val = profile_epoch("val", &mut val)?;
    Ok(InspectResult::from_iter([("train", train), ("val", val)]))
}
