//! Умножение плотной матрицы на вектор с выгрузкой на ускоритель
//!
//! Контейнеры держат host-буфер и его зеркало на устройстве, передачи между
//! ними только явные. Параллельные регионы (заполнение, умножение) исполняются
//! за интерфейсом [`device::Accelerator`].

// Макросы для вызовов OpenCL (коды возврата и создание объектов)
#[cfg(feature = "opencl")]
#[macro_use]
mod macros {
    /// Вызывает функцию OpenCL, возвращающую код ошибки
    macro_rules! cl_check {
        ($func:ident($($arg:expr),* $(,)?)) => {{
            let code = unsafe { $func($($arg),*) };
            if code != $crate::opencl::ffi::CL_SUCCESS {
                return Err($crate::error::AccelError::OpenCl {
                    call: stringify!($func),
                    code,
                });
            }
        }};
    }

    /// Создаёт объект OpenCL; код ошибки передаётся последним аргументом автоматически
    macro_rules! cl_create {
        ($func:ident($($arg:expr),* $(,)?)) => {{
            let mut errcode: $crate::opencl::ffi::cl_int = $crate::opencl::ffi::CL_SUCCESS;
            let obj = unsafe { $func($($arg,)* &mut errcode) };
            if obj.is_null() || errcode != $crate::opencl::ffi::CL_SUCCESS {
                return Err($crate::error::AccelError::OpenCl {
                    call: stringify!($func),
                    code: errcode,
                });
            }
            obj
        }};
    }
}

pub mod check;
pub mod config;
pub mod device;
pub mod error;
pub mod matrix;
#[cfg(feature = "opencl")]
pub mod opencl;
pub mod pipeline;
pub mod utils;

// Реэкспорт основных типов для удобства
pub use check::{Comparator, GoldenFile, Location, ReferenceSet, Tolerance, Verdict};
pub use config::{Backend, RunConfig};
pub use device::{Accelerator, Extent, HostAccelerator};
pub use error::{AccelError, Result};
pub use matrix::{fill, matvec, Matrix, Resident, Vector};
pub use pipeline::{run, run_with_config, RunSummary};
