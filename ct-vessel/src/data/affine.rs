//! 体素索引到 RAS 世界坐标 (毫米) 的仿射变换, 以及由其推导的方向编码.
//!
//! 所有矩阵均为 4x4 齐次矩阵, 按行存储. 对于体素索引 `(i, j, k)`,
//! 世界坐标为 `A * (i, j, k, 1)^T`.

use std::fmt::Formatter;
use std::str::FromStr;

type Mat4 = [[f64; 4]; 4];

const IDENTITY: Mat4 = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
];

/// 4x4 齐次仿射变换.
#[derive(Copy, Clone, PartialEq)]
pub struct Affine(Mat4);

impl Default for Affine {
    #[inline]
    fn default() -> Self {
        Self::identity()
    }
}

/// 压缩到一行, 仅打印前三行.
impl std::fmt::Debug for Affine {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let [r0, r1, r2, _] = &self.0;
        f.write_fmt(format_args!("Affine {{ {r0:?}, {r1:?}, {r2:?} }}"))
    }
}

impl Affine {
    /// 单位变换.
    #[inline]
    pub const fn identity() -> Self {
        Self(IDENTITY)
    }

    /// 直接由行数据构建.
    #[inline]
    pub const fn from_rows(rows: Mat4) -> Self {
        Self(rows)
    }

    /// 由体素分辨率构建对角变换, 原点在 `(0, 0, 0)`.
    pub fn from_spacing(spacing: [f64; 3]) -> Self {
        let mut m = IDENTITY;
        for (axis, s) in spacing.into_iter().enumerate() {
            m[axis][axis] = s;
        }
        Self(m)
    }

    /// 由三个体素轴方向向量 (已含分辨率) 与原点构建.
    pub fn from_columns(columns: [[f64; 3]; 3], origin: [f64; 3]) -> Self {
        let mut m = IDENTITY;
        for row in 0..3 {
            for (col, c) in columns.iter().enumerate() {
                m[row][col] = c[row];
            }
            m[row][3] = origin[row];
        }
        Self(m)
    }

    /// 获取底层矩阵.
    #[inline]
    pub fn rows(&self) -> &Mat4 {
        &self.0
    }

    /// 第 `axis` 个体素轴在世界坐标系下的方向向量 (含分辨率).
    #[inline]
    pub fn column(&self, axis: usize) -> [f64; 3] {
        [self.0[0][axis], self.0[1][axis], self.0[2][axis]]
    }

    /// 索引 `(0, 0, 0)` 体素中心的世界坐标.
    #[inline]
    pub fn origin(&self) -> [f64; 3] {
        [self.0[0][3], self.0[1][3], self.0[2][3]]
    }

    /// 各体素轴方向的分辨率 (毫米), 即方向向量的长度.
    pub fn spacing(&self) -> [f64; 3] {
        [0, 1, 2].map(|axis| {
            let c = self.column(axis);
            (c[0] * c[0] + c[1] * c[1] + c[2] * c[2]).sqrt()
        })
    }

    /// 求体素索引 `index` (可以是非整数) 在世界坐标系下的位置.
    pub fn apply(&self, index: [f64; 3]) -> [f64; 3] {
        [0, 1, 2].map(|row| {
            let r = &self.0[row];
            r[0] * index[0] + r[1] * index[1] + r[2] * index[2] + r[3]
        })
    }

    /// 矩阵乘法 `self * rhs`.
    ///
    /// 若 `rhs` 描述的是 "新索引 -> 旧索引" 的映射, 则结果是新索引对应的仿射变换.
    pub fn compose(&self, rhs: &Affine) -> Affine {
        let mut m = [[0.0; 4]; 4];
        for (r, row) in m.iter_mut().enumerate() {
            for (c, v) in row.iter_mut().enumerate() {
                *v = (0..4).map(|k| self.0[r][k] * rhs.0[k][c]).sum();
            }
        }
        Affine(m)
    }

    /// 体素索引整体平移 `offset` 后的仿射变换 (新索引 0 对应旧索引 `offset`).
    /// 用于裁剪 (正偏移) 和填充 (负偏移).
    pub fn shifted(&self, offset: [f64; 3]) -> Affine {
        let mut t = IDENTITY;
        for (axis, o) in offset.into_iter().enumerate() {
            t[axis][3] = o;
        }
        self.compose(&Affine(t))
    }

    /// 体素索引按 `factors` 缩放后的仿射变换 (新索引 `n` 对应旧索引 `n * factor`).
    /// 用于重采样.
    pub fn scaled(&self, factors: [f64; 3]) -> Affine {
        let mut s = IDENTITY;
        for (axis, f) in factors.into_iter().enumerate() {
            s[axis][axis] = f;
        }
        self.compose(&Affine(s))
    }

    /// 由仿射变换推导各体素轴的方向编码.
    ///
    /// 每个体素轴取其方向向量中绝对值最大的世界分量; 按绝对值降序贪心分配,
    /// 保证三个轴对应三个不同的世界轴.
    pub fn axcodes(&self) -> AxCodes {
        let mut candidates = Vec::with_capacity(9);
        for axis in 0..3 {
            let c = self.column(axis);
            for (world, v) in c.into_iter().enumerate() {
                candidates.push((v.abs(), axis, world, v >= 0.0));
            }
        }
        candidates.sort_by(|a, b| b.0.total_cmp(&a.0));

        let mut codes = [None; 3];
        let mut used = [false; 3];
        for (_, axis, world, positive) in candidates {
            if codes[axis].is_none() && !used[world] {
                codes[axis] = Some(AxisCode::from_world(world, positive));
                used[world] = true;
            }
        }
        // 9 个候选覆盖了所有 (axis, world) 组合, 贪心分配必然填满三个轴.
        AxCodes(codes.map(|c| c.unwrap_or(AxisCode::R)))
    }
}

/// 单个体素轴在 RAS 世界坐标系下的朝向.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum AxisCode {
    /// 向右 (+x).
    R,
    /// 向左 (-x).
    L,
    /// 向前 (+y).
    A,
    /// 向后 (-y).
    P,
    /// 向上 (+z).
    S,
    /// 向下 (-z).
    I,
}

impl AxisCode {
    #[inline]
    fn from_world(world: usize, positive: bool) -> Self {
        match (world, positive) {
            (0, true) => Self::R,
            (0, false) => Self::L,
            (1, true) => Self::A,
            (1, false) => Self::P,
            (2, true) => Self::S,
            _ => Self::I,
        }
    }

    /// 对应的世界轴, 0/1/2 分别为 x/y/z.
    #[inline]
    pub fn world_axis(&self) -> usize {
        match self {
            Self::R | Self::L => 0,
            Self::A | Self::P => 1,
            Self::S | Self::I => 2,
        }
    }

    /// 是否沿世界轴正方向?
    #[inline]
    pub fn is_positive(&self) -> bool {
        matches!(self, Self::R | Self::A | Self::S)
    }

    /// 单字符表示.
    #[inline]
    pub fn as_char(&self) -> char {
        match self {
            Self::R => 'R',
            Self::L => 'L',
            Self::A => 'A',
            Self::P => 'P',
            Self::S => 'S',
            Self::I => 'I',
        }
    }

    fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'R' => Some(Self::R),
            'L' => Some(Self::L),
            'A' => Some(Self::A),
            'P' => Some(Self::P),
            'S' => Some(Self::S),
            'I' => Some(Self::I),
            _ => None,
        }
    }
}

/// 三个体素轴的方向编码, 如 `RAS`, `LPS`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct AxCodes(pub [AxisCode; 3]);

impl AxCodes {
    /// 标准 `RAS` 方向.
    pub const RAS: AxCodes = AxCodes([AxisCode::R, AxisCode::A, AxisCode::S]);

    /// 计算从 `self` 方向重排到 `target` 方向所需的轴变换.
    ///
    /// 返回 `(order, flips)`: 新的第 `t` 个轴来自旧的第 `order[t]` 个轴,
    /// `flips[t]` 指示该轴是否需要反转.
    pub fn transform_to(&self, target: &AxCodes) -> ([usize; 3], [bool; 3]) {
        let mut order = [0; 3];
        let mut flips = [false; 3];
        for (t, code) in target.0.iter().enumerate() {
            // `self` 的三个编码两两对应不同的世界轴, 故一定能找到.
            let s = self
                .0
                .iter()
                .position(|c| c.world_axis() == code.world_axis())
                .unwrap_or(t);
            order[t] = s;
            flips[t] = self.0[s].is_positive() != code.is_positive();
        }
        (order, flips)
    }
}

impl std::fmt::Display for AxCodes {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for c in self.0.iter() {
            f.write_fmt(format_args!("{}", c.as_char()))?;
        }
        Ok(())
    }
}

/// 解析 [`AxCodes`] 错误.
#[derive(Clone, Debug, PartialEq)]
pub struct ParseAxCodesError(pub String);

impl std::fmt::Display for ParseAxCodesError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "非法的方向编码 `{}`", self.0)
    }
}

impl std::error::Error for ParseAxCodesError {}

impl FromStr for AxCodes {
    type Err = ParseAxCodesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseAxCodesError(s.to_string());
        let mut chars = s.chars();
        let mut codes = [AxisCode::R; 3];
        for c in codes.iter_mut() {
            *c = chars.next().and_then(AxisCode::from_char).ok_or_else(err)?;
        }
        if chars.next().is_some() {
            return Err(err());
        }
        let mut seen = [false; 3];
        for c in codes.iter() {
            if std::mem::replace(&mut seen[c.world_axis()], true) {
                return Err(err());
            }
        }
        Ok(AxCodes(codes))
    }
}
