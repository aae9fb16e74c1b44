//! OpenCL ядра для заполнения и умножения матрицы на вектор

use std::ffi::CStr;

pub const FILL_KERNEL: &CStr = c"fill_value";
pub const MATVEC_KERNEL: &CStr = c"matvec_rows";

/// Исходный код программы с обоими ядрами.
///
/// `fill_value` запускается на 1-D (вектор) или 2-D (матрица) диапазоне.
/// `matvec_rows` - одна рабочая группа на строку, элементы группы делят
/// столбцы между собой и сворачивают частичные суммы в локальной памяти.
/// Размер группы должен быть степенью двойки.
pub static MATVEC_PROGRAM: &str = r#"
__kernel void fill_value(__global float* data, const float value)
{
    const size_t idx = get_global_id(0) * get_global_size(1) + get_global_id(1);
    data[idx] = value;
}

__kernel void matvec_rows(
    __global const float* mat,
    __global const float* vec,
    __global float* out,
    __local float* partial,
    const uint rows,
    const uint cols
) {
    const uint row = get_group_id(0);
    const uint lane = get_local_id(0);
    const uint lanes = get_local_size(0);

    __global const float* row_data = mat + (size_t)row * cols;

    float sum = 0.0f;
    for (uint j = lane; j < cols; j += lanes) {
        sum += row_data[j] * vec[j];
    }
    partial[lane] = sum;
    barrier(CLK_LOCAL_MEM_FENCE);

    // Редукция деревом
    for (uint stride = lanes / 2; stride > 0; stride >>= 1) {
        if (lane < stride) {
            partial[lane] += partial[lane + stride];
        }
        barrier(CLK_LOCAL_MEM_FENCE);
    }

    if (lane == 0 && row < rows) {
        out[row] = partial[0];
    }
}
"#;
