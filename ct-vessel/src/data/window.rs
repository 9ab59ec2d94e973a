//! CT 窗口.

use crate::consts::{VESSEL_HU_MAX, VESSEL_HU_MIN};

/// CT 窗口, 由窗下限与窗上限确定. 窗位 (window level) 与窗宽 (window width)
/// 可由其推导.
///
/// 该窗口是只读的. 若要修改窗口参数, 你应该创建新的实例.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CtWindow {
    lower: f32,
    upper: f32,
}

impl CtWindow {
    /// 由窗下限 `lower` 与窗上限 `upper` 构建 CT 窗.
    ///
    /// 两者必须有限且 `lower < upper`, 否则返回 `None`.
    pub fn from_bounds(lower: f32, upper: f32) -> Option<CtWindow> {
        (lower.is_finite() && upper.is_finite() && lower < upper).then_some(Self { lower, upper })
    }

    /// 构建用于血管分割的腹部增强 CT 窗口, 范围为 \[-100, 371\] HU.
    #[inline]
    pub const fn from_vessel_contrast() -> CtWindow {
        Self {
            lower: VESSEL_HU_MIN,
            upper: VESSEL_HU_MAX,
        }
    }

    /// 单位窗口 \[0, 1\]. 常用于对标签值做截断.
    #[inline]
    pub const fn unit() -> CtWindow {
        Self {
            lower: 0.0,
            upper: 1.0,
        }
    }

    /// 窗下限.
    #[inline]
    pub fn lower_bound(&self) -> f32 {
        self.lower
    }

    /// 窗上限.
    #[inline]
    pub fn upper_bound(&self) -> f32 {
        self.upper
    }

    /// 窗宽.
    #[inline]
    pub fn width(&self) -> f32 {
        self.upper - self.lower
    }

    /// 将 `ct` 线性映射到 `[0, 1]`, 窗下限对应 0, 窗上限对应 1. 不做截断.
    #[inline]
    pub fn normalize(&self, ct: f32) -> f32 {
        (ct - self.lower) / self.width()
    }
}

#[cfg(test)]
mod tests {
    use crate::CtWindow;

    fn float_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn test_ct_window_invalid_input() {
        assert!(CtWindow::from_bounds(1.0, 1.0).is_none());
        assert!(CtWindow::from_bounds(2.0, 1.0).is_none());
        assert!(CtWindow::from_bounds(f32::NEG_INFINITY, 1.0).is_none());
        assert!(CtWindow::from_bounds(0.0, f32::NAN).is_none());
    }

    #[test]
    fn test_ct_window_generic() {
        let ct = CtWindow::from_bounds(60.0, 100.0).unwrap();
        assert_eq!(ct.lower_bound(), 60.0);
        assert_eq!(ct.upper_bound(), 100.0);
        assert!(float_eq(ct.width(), 40.0));

        assert!(float_eq(ct.normalize(60.0), 0.0));
        assert!(float_eq(ct.normalize(70.0), 0.25));
        assert!(float_eq(ct.normalize(90.0), 0.75));
        assert!(float_eq(ct.normalize(100.0), 1.0));
        // 不做截断.
        assert!(float_eq(ct.normalize(20.0), -1.0));
    }

    #[test]
    fn test_ct_window_vessel() {
        let ct = CtWindow::from_vessel_contrast();
        assert!(float_eq(ct.normalize(-100.0), 0.0));
        assert!(float_eq(ct.normalize(371.0), 1.0));
        assert!(float_eq(ct.width(), 471.0));
        assert!(float_eq(ct.normalize(135.5), 0.5));
        assert!(float_eq(ct.normalize(842.0), 2.0));
        assert_eq!(CtWindow::unit().width(), 1.0);
    }
}
