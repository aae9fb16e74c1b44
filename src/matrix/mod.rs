//! Модуль для работы с матрицами и векторами на ускорителе
//!
//! Предоставляет:
//! - Контейнеры с зеркалом на устройстве
//! - Заполнение и умножение матрицы на вектор
//! - Эталонную CPU-реализацию для сверки
//! - Исходники ядер OpenCL (с feature `opencl`)

mod types;
pub mod operations;
#[cfg(feature = "opencl")]
pub mod kernels;

pub use types::{Matrix, Mirror, Resident, Vector};
pub use operations::{compare_results, fill, matvec, reference_matvec, Comparison};
