//! 数据集检查工具依赖的通用组件.

pub mod loader;

const SEP: &str = "--------------------------------------------------------";

/// 简单分隔线.
#[inline]
pub fn sep() {
    println!("{SEP}");
}

/// 获得可并行核心数.
pub fn cpus() -> usize {
    std::thread::available_parallelism().map_or_else(|_| num_cpus::get(), usize::from)
}

/// 前景体素占比. 空数组返回 `None`.
pub fn foreground_ratio<'a, I: IntoIterator<Item = &'a f32>>(it: I) -> Option<f64> {
    let (mut fg, mut total) = (0usize, 0usize);
    for &v in it {
        total += 1;
        if ct_vessel::consts::gray::is_foreground(v) {
            fg += 1;
        }
    }
    (total > 0).then(|| fg as f64 / total as f64)
}

#[cfg(test)]
mod tests {
    use super::{cpus, foreground_ratio};

    #[test]
    fn test_foreground_ratio() {
        assert_eq!(foreground_ratio(&[0.0, 1.0, 1.0, 0.0]), Some(0.5));
        assert_eq!(foreground_ratio(std::iter::empty()), None);
    }

    #[test]
    fn test_cpus() {
        assert!(cpus() >= 1);
    }
}
