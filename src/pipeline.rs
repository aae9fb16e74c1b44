//! Демонстрационный прогон: выделение, заполнение, умножение, проверка

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use crate::check::{check, Comparator, GoldenFile, Location, Verdict};
use crate::config::{Backend, RunConfig};
use crate::device::{Accelerator, HostAccelerator};
use crate::matrix::{fill, matvec, Matrix, Resident, Vector};
use crate::utils::measure_time;

/// Место проверки в эталонах. Не зависит от строк исходника, поэтому файл
/// эталонов переживает правки кода.
pub fn check_point(index: u32) -> Location {
    Location::new("main.rs", "main", index)
}

/// Итог проверки одного контейнера
#[derive(Debug, Clone, PartialEq)]
pub struct CheckRecord {
    pub name: String,
    pub count: usize,
    pub verdict: Verdict,
}

impl CheckRecord {
    fn new(name: &str, count: usize, verdict: Verdict) -> Self {
        Self {
            name: name.to_string(),
            count,
            verdict,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub device: String,
    pub rows: usize,
    pub cols: usize,
    /// Результат, забранный с устройства после умножения
    pub output: Vec<f32>,
    pub compute_time: Duration,
    /// Пусто, если проверка выключена
    pub checks: Vec<CheckRecord>,
}

impl RunSummary {
    pub fn all_checks_passed(&self) -> bool {
        self.checks.iter().all(|c| !c.verdict.is_mismatch())
    }
}

/// Выполняет прогон на заданном ускорителе.
/// Проверка выполняется, только если `config.check` включён и передан компаратор.
pub fn run<A: Accelerator>(
    accel: &A,
    config: &RunConfig,
    comparator: Option<&mut dyn Comparator>,
) -> Result<RunSummary> {
    info!(device = %accel.name(), rows = config.rows, cols = config.cols, "запуск");

    let mut mat = Matrix::new(accel, config.rows, config.cols).context("Выделение матрицы")?;
    let mut vec = Vector::new(accel, config.cols).context("Выделение вектора")?;
    let mut out = Vector::new(accel, config.rows).context("Выделение результата")?;

    fill(&mut mat, config.matrix_value)?;
    fill(&mut vec, config.vector_value)?;

    let (computed, compute_time) = measure_time(|| matvec(&mat, &vec, &mut out));
    computed?;
    info!(?compute_time, "умножение завершено");

    let mut checks = Vec::new();
    if let Some(comparator) = comparator.filter(|_| config.check) {
        let verdict = check(&mut mat, "mat", &check_point(1), comparator)?;
        checks.push(CheckRecord::new("mat", mat.len(), verdict));
        let verdict = check(&mut vec, "vec", &check_point(2), comparator)?;
        checks.push(CheckRecord::new("vec", vec.len(), verdict));
        let verdict = check(&mut out, "out", &check_point(3), comparator)?;
        checks.push(CheckRecord::new("out", out.len(), verdict));
    }

    out.pull_from_device()?;

    Ok(RunSummary {
        device: accel.name(),
        rows: config.rows,
        cols: config.cols,
        output: out.host().to_vec(),
        compute_time,
        checks,
    })
}

/// Создаёт ускоритель и компаратор по конфигурации и выполняет прогон
pub fn run_with_config(config: &RunConfig) -> Result<RunSummary> {
    match config.backend {
        Backend::Host => {
            let accel = match config.host_threads {
                Some(threads) => HostAccelerator::with_threads(threads)?,
                None => HostAccelerator::new(),
            };
            run_checked(&accel, config)
        }
        #[cfg(feature = "opencl")]
        Backend::OpenCl => {
            let accel = crate::opencl::OpenClAccelerator::new()?;
            run_checked(&accel, config)
        }
        #[cfg(not(feature = "opencl"))]
        Backend::OpenCl => Err(crate::error::AccelError::Backend(
            "built without the `opencl` feature".into(),
        )
        .into()),
    }
}

fn run_checked<A: Accelerator>(accel: &A, config: &RunConfig) -> Result<RunSummary> {
    if !config.check {
        return run(accel, config, None);
    }
    let mut golden = GoldenFile::open(&config.golden_path, config.tolerance)?;
    let summary = run(accel, config, Some(&mut golden))?;
    golden.save()?;
    Ok(summary)
}
