//! 检查结果.

use std::io::{self, Write};
use std::time::Duration;

/// 一轮加载的统计信息.
#[derive(Debug, Default)]
pub struct Profile {
    batches: usize,
    samples: usize,
    patients: Vec<u32>,
    shapes: Vec<[usize; 5]>,
    fg_ratios: Vec<f64>,
    intensity: Option<(f32, f32)>,
    elapsed: Duration,
    slowest: Option<Duration>,
}

impl Profile {
    /// 记录一个批次.
    pub fn record(&mut self, batch: &ct_vessel::dataset::Batch, cost: Duration) {
        self.batches += 1;
        self.samples += batch.len();
        self.patients.extend(batch.patients.iter().flatten());
        let (n, c, i, j, k) = batch.image.dim();
        self.shapes.push([n, c, i, j, k]);
        if let Some(r) = utils::foreground_ratio(batch.label.iter()) {
            self.fg_ratios.push(r);
        }
        for &v in batch.image.iter() {
            self.intensity = Some(match self.intensity {
                Some((lo, hi)) => (lo.min(v), hi.max(v)),
                None => (v, v),
            });
        }
        self.elapsed += cost;
        self.slowest = Some(self.slowest.map_or(cost, |s| s.max(cost)));
    }

    fn avg_fg_ratio(&self) -> Option<f64> {
        (!self.fg_ratios.is_empty())
            .then(|| self.fg_ratios.iter().sum::<f64>() / self.fg_ratios.len() as f64)
    }
}

/// 将 `profile` 的结果写进 `w` 中.
fn describe_into<W: Write>(name: &str, p: &Profile, w: &mut W) -> io::Result<()> {
    const S4: &str = "    ";

    #[inline]
    fn f64_to_display(f: Option<f64>) -> String {
        match f {
            Some(f) => format!("{f:.6}"),
            None => "/".to_string(),
        }
    }

    writeln!(w, "Loader `{name}`:")?;
    writeln!(w, "{S4}Batches: {}", p.batches)?;
    writeln!(w, "{S4}Samples: {}", p.samples)?;
    writeln!(w, "{S4}Patients: {:?}", p.patients)?;
    match (p.shapes.first(), p.shapes.iter().all(|s| Some(s) == p.shapes.first())) {
        (Some(s), true) => writeln!(w, "{S4}Batch shape: {s:?}")?,
        (Some(_), false) => writeln!(w, "{S4}Batch shapes: {:?}", p.shapes)?,
        (None, _) => writeln!(w, "{S4}Batch shape: /")?,
    }
    writeln!(
        w,
        "{S4}Average foreground ratio: {}",
        f64_to_display(p.avg_fg_ratio())
    )?;
    match p.intensity {
        Some((lo, hi)) => writeln!(w, "{S4}Image intensity range: [{lo:.4}, {hi:.4}]")?,
        None => writeln!(w, "{S4}Image intensity range: /")?,
    }
    writeln!(w, "{S4}Total time: {} ms", p.elapsed.as_millis())?;
    let t = p.slowest.map(|d| d.as_millis() as f64);
    write!(w, "{S4}Slowest batch costs {} ms", f64_to_display(t))?;
    Ok(())
}

/// 检查最终结果.
pub struct InspectResult {
    data: Vec<(&'static str, Profile)>,
}

impl InspectResult {
    pub fn from_iter<I: IntoIterator<Item = (&'static str, Profile)>>(it: I) -> Self {
        Self {
            data: it.into_iter().collect(),
        }
    }

    /// 分析运行结果.
    pub fn analyze(&self) -> io::Result<()> {
        utils::sep();
        let mut buf = Vec::with_capacity(512);

        for (key, profile) in self.data.iter() {
            describe_into(key, profile, &mut buf)?;
            println!("{}", String::from_utf8_lossy(&buf));
            buf.clear();

            utils::sep();
        }
        Ok(())
    }
}
