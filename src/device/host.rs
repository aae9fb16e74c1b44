//! Многоядерный CPU в роли ускорителя
//!
//! Память "устройства" - отдельный буфер, не связанный с host-копией контейнера,
//! поэтому расхождение host/device здесь настоящее. Параллельные регионы
//! исполняются на rayon.

use rayon::prelude::*;
use tracing::debug;

use super::{alloc_zeroed, check_matvec, check_span, check_transfer, Accelerator, Extent};
use crate::error::{AccelError, MemoryDomain, Result};

/// Ширина строки, начиная с которой редукция строки тоже делится между задачами rayon
pub const VECTOR_PAR_THRESHOLD: usize = 16 * 1024;

/// Число независимых аккумуляторов в редукции строки
const LANES: usize = 8;

/// Кусок строки, который одна задача rayon сворачивает целиком
const REDUCTION_CHUNK: usize = 4096;

/// Буфер в "памяти устройства"
#[derive(Debug)]
pub struct HostBuffer {
    data: Vec<f32>,
}

impl HostBuffer {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// CPU-ускоритель на rayon
pub struct HostAccelerator {
    pool: Option<rayon::ThreadPool>,
}

impl HostAccelerator {
    /// Использует глобальный пул rayon
    pub fn new() -> Self {
        Self { pool: None }
    }

    /// Отдельный пул с фиксированным числом потоков (групп)
    pub fn with_threads(threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("matvec-gang-{i}"))
            .build()
            .map_err(|e| AccelError::Backend(format!("rayon thread pool: {e}")))?;
        Ok(Self { pool: Some(pool) })
    }

    pub fn threads(&self) -> usize {
        match &self.pool {
            Some(pool) => pool.current_num_threads(),
            None => rayon::current_num_threads(),
        }
    }

    /// Запускает параллельный регион и дожидается его завершения
    fn region<R, F>(&self, body: F) -> R
    where
        R: Send,
        F: FnOnce() -> R + Send,
    {
        match &self.pool {
            Some(pool) => pool.install(body),
            None => body(),
        }
    }
}

impl Default for HostAccelerator {
    fn default() -> Self {
        Self::new()
    }
}

impl Accelerator for HostAccelerator {
    type Buffer = HostBuffer;

    fn name(&self) -> String {
        format!("host ({} threads)", self.threads())
    }

    fn alloc(&self, len: usize) -> Result<HostBuffer> {
        debug!(len, "host accelerator: alloc");
        Ok(HostBuffer {
            data: alloc_zeroed(len, MemoryDomain::Device)?,
        })
    }

    fn upload(&self, src: &[f32], dst: &mut HostBuffer) -> Result<()> {
        check_transfer(dst.len(), src.len())?;
        dst.data.copy_from_slice(src);
        Ok(())
    }

    fn download(&self, src: &HostBuffer, dst: &mut [f32]) -> Result<()> {
        check_transfer(src.len(), dst.len())?;
        dst.copy_from_slice(&src.data);
        Ok(())
    }

    fn fill(&self, buf: &mut HostBuffer, extent: Extent, value: f32) -> Result<()> {
        check_span(buf.len(), extent.len())?;
        let data = &mut buf.data[..extent.len()];
        self.region(|| data.par_iter_mut().for_each(|x| *x = value));
        Ok(())
    }

    fn matvec(
        &self,
        mat: &HostBuffer,
        rows: usize,
        cols: usize,
        vec: &HostBuffer,
        out: &mut HostBuffer,
    ) -> Result<()> {
        check_matvec(mat.len(), rows, cols, vec.len(), out.len())?;
        let mat = &mat.data[..rows * cols];
        let vec = &vec.data[..cols];
        let out = &mut out.data[..rows];

        self.region(|| {
            if cols == 0 {
                out.par_iter_mut().for_each(|o| *o = 0.0);
                return;
            }
            out.par_iter_mut()
                .zip(mat.par_chunks_exact(cols))
                .for_each(|(o, row)| *o = row_dot(row, vec));
        });
        Ok(())
    }
}

/// Редукция одной строки
fn row_dot(row: &[f32], vec: &[f32]) -> f32 {
    if row.len() >= VECTOR_PAR_THRESHOLD {
        row.par_chunks(REDUCTION_CHUNK)
            .zip(vec.par_chunks(REDUCTION_CHUNK))
            .map(|(a, b)| lanes_dot(a, b))
            .sum()
    } else {
        lanes_dot(row, vec)
    }
}

fn lanes_dot(a: &[f32], b: &[f32]) -> f32 {
    let mut acc = [0.0f32; LANES];
    let mut a_chunks = a.chunks_exact(LANES);
    let mut b_chunks = b.chunks_exact(LANES);

    for (x, y) in (&mut a_chunks).zip(&mut b_chunks) {
        for lane in 0..LANES {
            acc[lane] += x[lane] * y[lane];
        }
    }

    let mut sum: f32 = acc.iter().sum();
    for (x, y) in a_chunks.remainder().iter().zip(b_chunks.remainder()) {
        sum += x * y;
    }
    sum
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(accel: &HostAccelerator, values: &[f32]) -> HostBuffer {
        let mut buf = accel.alloc(values.len()).unwrap();
        accel.upload(values, &mut buf).unwrap();
        buf
    }

    fn read(accel: &HostAccelerator, buf: &HostBuffer) -> Vec<f32> {
        let mut out = vec![0.0; buf.len()];
        accel.download(buf, &mut out).unwrap();
        out
    }

    #[test]
    fn upload_download_roundtrip() {
        let accel = HostAccelerator::new();
        let values: Vec<f32> = (0..37).map(|i| i as f32 * 0.5 - 3.0).collect();
        let buf = buffer(&accel, &values);
        assert_eq!(read(&accel, &buf), values);
    }

    #[test]
    fn fill_covers_collapsed_grid() {
        let accel = HostAccelerator::new();
        let mut buf = accel.alloc(12).unwrap();
        accel
            .fill(&mut buf, Extent::Grid { rows: 3, cols: 4 }, 7.5)
            .unwrap();
        assert_eq!(read(&accel, &buf), vec![7.5; 12]);
    }

    #[test]
    fn matvec_small_known_product() {
        let accel = HostAccelerator::new();
        // [[1, 2, 3], [4, 5, 6]] x [1, 0, -1]
        let mat = buffer(&accel, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let vec = buffer(&accel, &[1.0, 0.0, -1.0]);
        let mut out = accel.alloc(2).unwrap();
        accel.matvec(&mat, 2, 3, &vec, &mut out).unwrap();
        assert_eq!(read(&accel, &out), vec![-2.0, -2.0]);
    }

    #[test]
    fn matvec_zero_columns_gives_zeros() {
        let accel = HostAccelerator::new();
        let mat = accel.alloc(0).unwrap();
        let vec = accel.alloc(0).unwrap();
        let mut out = buffer(&accel, &[9.0, 9.0, 9.0]);
        accel.matvec(&mat, 3, 0, &vec, &mut out).unwrap();
        assert_eq!(read(&accel, &out), vec![0.0; 3]);
    }

    #[test]
    fn wide_rows_use_split_reduction() {
        let accel = HostAccelerator::new();
        let cols = VECTOR_PAR_THRESHOLD + 13;
        let mat = buffer(&accel, &vec![0.5; 2 * cols]);
        let vec = buffer(&accel, &vec![2.0; cols]);
        let mut out = accel.alloc(2).unwrap();
        accel.matvec(&mat, 2, cols, &vec, &mut out).unwrap();
        assert_eq!(read(&accel, &out), vec![cols as f32; 2]);
    }

    #[test]
    fn transfers_reject_wrong_lengths() {
        let accel = HostAccelerator::new();
        let mut buf = buffer(&accel, &[5.0; 10]);

        let err = accel.upload(&[1.0], &mut buf).unwrap_err();
        assert!(matches!(err, AccelError::BufferLength { buffer: 10, required: 1 }));
        let mut short = [0.0f32; 3];
        assert!(accel.download(&buf, &mut short).is_err());
        assert_eq!(short, [0.0; 3]);
        // Буфер не пострадал
        assert_eq!(read(&accel, &buf), vec![5.0; 10]);
    }

    #[test]
    fn regions_reject_spans_beyond_buffers() {
        let accel = HostAccelerator::new();
        let mut small = accel.alloc(4).unwrap();
        assert!(accel
            .fill(&mut small, Extent::Grid { rows: 2, cols: 3 }, 1.0)
            .is_err());

        let mat = accel.alloc(6).unwrap();
        let vec = accel.alloc(3).unwrap();
        let mut out = accel.alloc(2).unwrap();
        assert!(accel.matvec(&mat, 3, 3, &vec, &mut out).is_err());
        assert!(accel.matvec(&mat, 2, 4, &vec, &mut out).is_err());
        assert!(accel.matvec(&mat, 2, 3, &vec, &mut out).is_ok());
    }

    #[test]
    fn lanes_dot_handles_remainder() {
        let a: Vec<f32> = (1..=11).map(|i| i as f32).collect();
        let b = vec![1.0; 11];
        assert_eq!(lanes_dot(&a, &b), 66.0);
    }

    #[test]
    fn dedicated_pool_reports_thread_count() {
        let accel = HostAccelerator::with_threads(2).unwrap();
        assert_eq!(accel.threads(), 2);
        assert!(accel.name().contains("2 threads"));
    }
}
