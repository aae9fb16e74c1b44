//! Интерфейс ускорителя
//!
//! Всё, что знает о конкретном устройстве, спрятано за [`Accelerator`]:
//! - выделение буфера на устройстве (освобождение происходит при drop буфера)
//! - копирование host -> device и device -> host
//! - параллельные регионы: заполнение и умножение матрицы на вектор
//!
//! Все операции синхронные: возврат из метода означает, что работа на
//! устройстве и передача данных завершены.

mod host;

pub use host::{HostAccelerator, HostBuffer, VECTOR_PAR_THRESHOLD};

use crate::error::{AccelError, MemoryDomain, Result};

/// Форма параллельного диапазона для заполнения
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extent {
    /// Одномерный диапазон (вектор)
    Linear(usize),
    /// Двумерный диапазон строк и столбцов, схлопывается в rows * cols элементов
    Grid { rows: usize, cols: usize },
}

impl Extent {
    pub fn len(&self) -> usize {
        match *self {
            Extent::Linear(n) => n,
            Extent::Grid { rows, cols } => rows * cols,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Устройство, на которое выгружаются вычисления
pub trait Accelerator {
    /// Буфер в памяти устройства. Drop освобождает память устройства.
    type Buffer;

    /// Человекочитаемое имя устройства для логов
    fn name(&self) -> String;

    /// Выделяет неинициализированный буфер на `len` элементов f32
    fn alloc(&self, len: usize) -> Result<Self::Buffer>;

    /// Копирует `src` целиком в буфер устройства.
    /// Длина `src` должна совпадать с длиной буфера, иначе [`AccelError::BufferLength`].
    fn upload(&self, src: &[f32], dst: &mut Self::Buffer) -> Result<()>;

    /// Копирует буфер устройства целиком в `dst`
    fn download(&self, src: &Self::Buffer, dst: &mut [f32]) -> Result<()>;

    /// Параллельный регион: записывает `value` во все элементы диапазона
    fn fill(&self, buf: &mut Self::Buffer, extent: Extent, value: f32) -> Result<()>;

    /// Параллельный регион: `out = mat x vec`.
    /// Строки распределяются между группами (gang), сумма строки считается
    /// параллельной редукцией внутри группы (vector). Размерности, не влезающие
    /// в буферы, дают [`AccelError::BufferLength`].
    fn matvec(
        &self,
        mat: &Self::Buffer,
        rows: usize,
        cols: usize,
        vec: &Self::Buffer,
        out: &mut Self::Buffer,
    ) -> Result<()>;
}

/// Передача host <-> device копирует буфер целиком: длины должны совпадать
pub(crate) fn check_transfer(buffer: usize, slice: usize) -> Result<()> {
    if buffer != slice {
        return Err(AccelError::BufferLength {
            buffer,
            required: slice,
        });
    }
    Ok(())
}

/// Диапазон региона не должен выходить за буфер
pub(crate) fn check_span(buffer: usize, required: usize) -> Result<()> {
    if required > buffer {
        return Err(AccelError::BufferLength { buffer, required });
    }
    Ok(())
}

/// Границы для `matvec`: rows * cols в матрице, cols в векторе, rows в результате
pub(crate) fn check_matvec(
    mat: usize,
    rows: usize,
    cols: usize,
    vec: usize,
    out: usize,
) -> Result<()> {
    let cells = rows.checked_mul(cols).ok_or(AccelError::BufferLength {
        buffer: mat,
        required: usize::MAX,
    })?;
    check_span(mat, cells)?;
    check_span(vec, cols)?;
    check_span(out, rows)
}

/// Выделяет обнулённый буфер, не паникуя при нехватке памяти
pub(crate) fn alloc_zeroed(len: usize, domain: MemoryDomain) -> Result<Vec<f32>> {
    let bytes = len.saturating_mul(std::mem::size_of::<f32>());
    let mut data = Vec::new();
    data.try_reserve_exact(len)
        .map_err(|_| AccelError::Allocation { domain, bytes })?;
    data.resize(len, 0.0);
    Ok(data)
}
