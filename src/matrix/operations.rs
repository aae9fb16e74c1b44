//! Операции над контейнерами: заполнение и умножение матрицы на вектор

use ndarray::{ArrayView1, ArrayView2};
use tracing::{debug, warn};

use super::types::{Matrix, Resident, Vector};
use crate::check::Tolerance;
use crate::device::Accelerator;
use crate::error::{AccelError, Result};

/// Заполняет буфер устройства значением `value`. Host-копия не меняется.
pub fn fill<'d, A, C>(container: &mut C, value: f32) -> Result<()>
where
    A: Accelerator + 'd,
    C: Resident<'d, A>,
{
    let extent = container.extent();
    debug!(?extent, value, "fill");
    if extent.is_empty() {
        return Ok(());
    }
    let mirror = container.mirror_mut();
    mirror.accel.fill(&mut mirror.device, extent, value)
}

/// `out = mat x vec` на устройстве.
///
/// При несовпадении размерностей пишет предупреждение и возвращает
/// [`AccelError::DimensionMismatch`], не трогая `out`.
pub fn matvec<'d, A: Accelerator + 'd>(
    mat: &Matrix<'d, A>,
    vec: &Vector<'d, A>,
    out: &mut Vector<'d, A>,
) -> Result<()> {
    let (rows, cols) = (mat.rows(), mat.cols());
    if cols != vec.len() || rows != out.len() {
        let err = AccelError::DimensionMismatch {
            rows,
            cols,
            vec_len: vec.len(),
            out_len: out.len(),
        };
        warn!("{err}");
        return Err(err);
    }
    debug!(rows, cols, "matvec");
    if rows == 0 {
        return Ok(());
    }

    let accel = mat.accelerator();
    accel.matvec(
        &mat.mirror().device,
        rows,
        cols,
        &vec.mirror().device,
        &mut out.mirror_mut().device,
    )
}

/// Эталонное умножение на CPU для проверки результатов устройства
pub fn reference_matvec(mat: &[f32], rows: usize, cols: usize, vec: &[f32]) -> Result<Vec<f32>> {
    let mismatch = || AccelError::DimensionMismatch {
        rows,
        cols,
        vec_len: vec.len(),
        out_len: rows,
    };
    let mat = ArrayView2::from_shape((rows, cols), mat).map_err(|_| mismatch())?;
    let vec = ArrayView1::from_shape(cols, vec).map_err(|_| mismatch())?;
    Ok(mat.dot(&vec).to_vec())
}

/// Итог поэлементного сравнения
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Comparison {
    pub compared: usize,
    pub differing: usize,
    pub max_diff: f32,
}

impl Comparison {
    pub fn matches(&self) -> bool {
        self.differing == 0
    }
}

/// Сравнивает результаты устройства с эталоном.
/// Элементы за пределами более короткого буфера считаются различающимися.
pub fn compare_results(actual: &[f32], expected: &[f32], tolerance: Tolerance) -> Comparison {
    let mut differing = actual.len().abs_diff(expected.len());
    let mut max_diff = 0.0f32;

    for (&a, &e) in actual.iter().zip(expected) {
        if !tolerance.accepts(a, e) {
            differing += 1;
            let diff = (a - e).abs();
            // NaN не участвует в max, но считается расхождением
            if diff > max_diff {
                max_diff = diff;
            }
        }
    }

    Comparison {
        compared: actual.len().min(expected.len()),
        differing,
        max_diff,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::HostAccelerator;

    fn filled<'d>(
        accel: &'d HostAccelerator,
        rows: usize,
        cols: usize,
        a: f32,
        v: f32,
    ) -> (Matrix<'d, HostAccelerator>, Vector<'d, HostAccelerator>) {
        let mut mat = Matrix::new(accel, rows, cols).unwrap();
        let mut vec = Vector::new(accel, cols).unwrap();
        fill(&mut mat, a).unwrap();
        fill(&mut vec, v).unwrap();
        (mat, vec)
    }

    #[test]
    fn ones_times_twos_gives_512() {
        let accel = HostAccelerator::new();
        let (mat, vec) = filled(&accel, 128, 256, 1.0, 2.0);
        let mut out = Vector::new(&accel, 128).unwrap();

        matvec(&mat, &vec, &mut out).unwrap();
        out.pull_from_device().unwrap();

        assert!(out.host().iter().all(|&x| x == 512.0));
    }

    #[test]
    fn one_by_one() {
        let accel = HostAccelerator::new();
        let (mat, vec) = filled(&accel, 1, 1, 3.0, 4.0);
        let mut out = Vector::new(&accel, 1).unwrap();

        matvec(&mat, &vec, &mut out).unwrap();
        out.pull_from_device().unwrap();

        assert_eq!(out.host(), &[12.0]);
    }

    #[test]
    fn mismatch_leaves_output_untouched() {
        let accel = HostAccelerator::new();
        let (mat, _) = filled(&accel, 128, 256, 1.0, 2.0);
        let mut vec = Vector::new(&accel, 255).unwrap();
        fill(&mut vec, 2.0).unwrap();
        let mut out = Vector::new(&accel, 128).unwrap();
        out.host_mut()
            .iter_mut()
            .enumerate()
            .for_each(|(i, x)| *x = i as f32 - 0.25);
        out.push_to_device().unwrap();
        let before: Vec<u32> = out.host().iter().map(|x| x.to_bits()).collect();

        let err = matvec(&mat, &vec, &mut out).unwrap_err();
        assert!(matches!(
            err,
            AccelError::DimensionMismatch {
                rows: 128,
                cols: 256,
                vec_len: 255,
                out_len: 128
            }
        ));

        let host_after: Vec<u32> = out.host().iter().map(|x| x.to_bits()).collect();
        assert_eq!(before, host_after);
        out.pull_from_device().unwrap();
        let device_after: Vec<u32> = out.host().iter().map(|x| x.to_bits()).collect();
        assert_eq!(before, device_after);
    }

    #[test]
    fn wrong_output_length_is_a_mismatch() {
        let accel = HostAccelerator::new();
        let (mat, vec) = filled(&accel, 4, 8, 1.0, 1.0);
        let mut out = Vector::new(&accel, 5).unwrap();
        assert!(matvec(&mat, &vec, &mut out).is_err());
    }

    #[test]
    fn fill_is_idempotent() {
        let accel = HostAccelerator::new();
        let mut once = Matrix::new(&accel, 9, 13).unwrap();
        let mut twice = Matrix::new(&accel, 9, 13).unwrap();

        fill(&mut once, 0.1).unwrap();
        fill(&mut twice, 0.1).unwrap();
        fill(&mut twice, 0.1).unwrap();

        once.pull_from_device().unwrap();
        twice.pull_from_device().unwrap();
        assert_eq!(once.host(), twice.host());
    }

    #[test]
    fn fill_and_matvec_do_not_touch_host() {
        let accel = HostAccelerator::new();
        let (mat, vec) = filled(&accel, 2, 3, 1.0, 1.0);
        assert!(mat.host().iter().all(|&x| x == 0.0));

        let mut out = Vector::new(&accel, 2).unwrap();
        *out.at(0) = -7.0;
        matvec(&mat, &vec, &mut out).unwrap();
        assert_eq!(out.host(), &[-7.0, 0.0]);

        out.pull_from_device().unwrap();
        assert_eq!(out.host(), &[3.0, 3.0]);
    }

    #[test]
    fn device_matches_reference_for_pushed_data() {
        let accel = HostAccelerator::new();
        let mut mat = Matrix::new(&accel, 3, 2).unwrap();
        let mut vec = Vector::new(&accel, 2).unwrap();
        mat.host_mut().copy_from_slice(&[1.0, -1.0, 0.5, 2.0, 3.0, 0.0]);
        vec.host_mut().copy_from_slice(&[4.0, 2.0]);
        mat.push_to_device().unwrap();
        vec.push_to_device().unwrap();

        let mut out = Vector::new(&accel, 3).unwrap();
        matvec(&mat, &vec, &mut out).unwrap();
        out.pull_from_device().unwrap();

        let expected = reference_matvec(mat.host(), 3, 2, vec.host()).unwrap();
        assert_eq!(expected, vec![2.0, 6.0, 12.0]);
        assert_eq!(out.host(), expected.as_slice());
    }

    #[test]
    fn reference_rejects_bad_shapes() {
        assert!(reference_matvec(&[1.0; 5], 2, 3, &[1.0; 3]).is_err());
        assert!(reference_matvec(&[1.0; 6], 2, 3, &[1.0; 2]).is_err());
    }

    #[test]
    fn compare_results_counts_differences() {
        let tol = Tolerance::default();
        let cmp = compare_results(&[1.0, 2.0, 3.5], &[1.0, 2.0, 3.0], tol);
        assert_eq!(cmp.differing, 1);
        assert_eq!(cmp.max_diff, 0.5);
        assert!(!cmp.matches());

        let cmp = compare_results(&[1.0, 2.0], &[1.0, 2.0, 3.0], tol);
        assert_eq!(cmp.compared, 2);
        assert_eq!(cmp.differing, 1);

        assert!(compare_results(&[512.0], &[512.0 + 1.0e-4], tol).matches());
    }
}
