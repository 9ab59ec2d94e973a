//! 加载 IRCAD 数据集并输出每个加载器一轮的批次统计.
//!
//! 配置由 `IRCAD_*` 环境变量给出, 见 `ct_vessel::dataset::DatasetConfig::from_env`.

mod result;
mod runner;

use std::process::ExitCode;

fn main() -> ExitCode {
    if let Err(e) = simple_logger::init_with_env() {
        eprintln!("Failed to initialize logger: {e}");
    }

    match runner::run() {
        Ok(result) => {
            if let Err(e) = result.analyze() {
                log::error!("Failed to write report: {e}");
                return ExitCode::FAILURE;
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
