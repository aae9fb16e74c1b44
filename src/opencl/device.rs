//! Ускоритель на OpenCL

use std::ffi::c_void;
use std::mem::size_of;
use std::ptr;

use tracing::{debug, error, info};

use super::ffi::*;
use crate::device::{check_matvec, check_span, check_transfer, Accelerator, Extent};
use crate::error::{AccelError, MemoryDomain, Result};
use crate::matrix::kernels::{FILL_KERNEL, MATVEC_KERNEL, MATVEC_PROGRAM};

/// Верхняя граница размера рабочей группы в `matvec_rows`
pub const GEMV_LANES: usize = 128;

/// Буфер в памяти устройства OpenCL
pub struct ClBuffer {
    mem: cl_mem,
    len: usize,
}

impl ClBuffer {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn bytes(&self) -> usize {
        self.len * size_of::<f32>()
    }
}

impl Drop for ClBuffer {
    fn drop(&mut self) {
        if !self.mem.is_null() {
            unsafe {
                clReleaseMemObject(self.mem);
            }
        }
    }
}

/// Контекст, очередь команд и собранная программа на одном устройстве
pub struct OpenClAccelerator {
    context: cl_context,
    queue: cl_command_queue,
    program: cl_program,
    fill_kernel: cl_kernel,
    matvec_kernel: cl_kernel,
    device_name: String,
    lanes: usize,
}

impl OpenClAccelerator {
    /// Берёт первую платформу и первый GPU на ней (или любое устройство, если GPU нет)
    pub fn new() -> Result<Self> {
        let mut platform: cl_platform_id = ptr::null_mut();
        let mut num_platforms = 0;
        cl_check!(clGetPlatformIDs(1, &mut platform, &mut num_platforms));
        if num_platforms == 0 {
            return Err(AccelError::Backend("no OpenCL platforms".into()));
        }

        let device = pick_device(platform)?;
        let device_name = device_name(device)?;

        let mut max_work_group = 0usize;
        cl_check!(clGetDeviceInfo(
            device,
            CL_DEVICE_MAX_WORK_GROUP_SIZE,
            size_of::<usize>(),
            &mut max_work_group as *mut usize as *mut c_void,
            ptr::null_mut()
        ));
        info!(device = %device_name, max_work_group, "OpenCL: устройство выбрано");

        // Частично созданные объекты освобождает Drop
        let mut accel = Self {
            context: ptr::null_mut(),
            queue: ptr::null_mut(),
            program: ptr::null_mut(),
            fill_kernel: ptr::null_mut(),
            matvec_kernel: ptr::null_mut(),
            device_name,
            lanes: 1,
        };

        accel.context = cl_create!(clCreateContext(
            ptr::null(),
            1,
            &device,
            None,
            ptr::null_mut()
        ));
        accel.queue = cl_create!(clCreateCommandQueue(accel.context, device, 0));

        let source = MATVEC_PROGRAM.as_ptr() as *const std::ffi::c_char;
        let source_len = MATVEC_PROGRAM.len();
        accel.program = cl_create!(clCreateProgramWithSource(
            accel.context,
            1,
            &source,
            &source_len
        ));

        let status = unsafe {
            clBuildProgram(
                accel.program,
                1,
                &device,
                ptr::null(),
                None,
                ptr::null_mut(),
            )
        };
        if status != CL_SUCCESS {
            let log = build_log(accel.program, device);
            error!(code = status, "OpenCL: ошибка компиляции программы\n{log}");
            return Err(AccelError::Backend(format!(
                "program build failed with code {status}: {log}"
            )));
        }

        accel.fill_kernel = cl_create!(clCreateKernel(accel.program, FILL_KERNEL.as_ptr()));
        accel.matvec_kernel = cl_create!(clCreateKernel(accel.program, MATVEC_KERNEL.as_ptr()));

        // Ядро с __local-буфером может допускать меньшую группу, чем устройство
        let mut kernel_work_group = 0usize;
        cl_check!(clGetKernelWorkGroupInfo(
            accel.matvec_kernel,
            device,
            CL_KERNEL_WORK_GROUP_SIZE,
            size_of::<usize>(),
            &mut kernel_work_group as *mut usize as *mut c_void,
            ptr::null_mut()
        ));
        accel.lanes = lanes_for(max_work_group, kernel_work_group);
        info!(kernel_work_group, lanes = accel.lanes, "OpenCL: ширина группы для matvec_rows");

        Ok(accel)
    }

    pub fn lanes(&self) -> usize {
        self.lanes
    }

    /// Ждёт завершения всех команд в очереди
    fn finish(&self) -> Result<()> {
        cl_check!(clFinish(self.queue));
        Ok(())
    }
}

impl Drop for OpenClAccelerator {
    fn drop(&mut self) {
        unsafe {
            if !self.matvec_kernel.is_null() {
                clReleaseKernel(self.matvec_kernel);
            }
            if !self.fill_kernel.is_null() {
                clReleaseKernel(self.fill_kernel);
            }
            if !self.program.is_null() {
                clReleaseProgram(self.program);
            }
            if !self.queue.is_null() {
                clReleaseCommandQueue(self.queue);
            }
            if !self.context.is_null() {
                clReleaseContext(self.context);
            }
        }
    }
}

impl Accelerator for OpenClAccelerator {
    type Buffer = ClBuffer;

    fn name(&self) -> String {
        format!("OpenCL ({})", self.device_name)
    }

    fn alloc(&self, len: usize) -> Result<ClBuffer> {
        // Буфер нулевого размера OpenCL не создаёт
        let bytes = len.max(1) * size_of::<f32>();
        let mut errcode = CL_SUCCESS;
        let mem = unsafe {
            clCreateBuffer(
                self.context,
                CL_MEM_READ_WRITE,
                bytes,
                ptr::null_mut(),
                &mut errcode,
            )
        };
        match errcode {
            CL_SUCCESS if !mem.is_null() => {
                debug!(len, "OpenCL: alloc");
                Ok(ClBuffer { mem, len })
            }
            CL_MEM_OBJECT_ALLOCATION_FAILURE
            | CL_OUT_OF_RESOURCES
            | CL_OUT_OF_HOST_MEMORY
            | CL_INVALID_BUFFER_SIZE => Err(AccelError::Allocation {
                domain: MemoryDomain::Device,
                bytes,
            }),
            code => Err(AccelError::OpenCl {
                call: "clCreateBuffer",
                code,
            }),
        }
    }

    fn upload(&self, src: &[f32], dst: &mut ClBuffer) -> Result<()> {
        check_transfer(dst.len(), src.len())?;
        if dst.is_empty() {
            return Ok(());
        }
        cl_check!(clEnqueueWriteBuffer(
            self.queue,
            dst.mem,
            CL_TRUE,
            0,
            dst.bytes(),
            src.as_ptr() as *const c_void,
            0,
            ptr::null(),
            ptr::null_mut()
        ));
        Ok(())
    }

    fn download(&self, src: &ClBuffer, dst: &mut [f32]) -> Result<()> {
        check_transfer(src.len(), dst.len())?;
        if src.is_empty() {
            return Ok(());
        }
        cl_check!(clEnqueueReadBuffer(
            self.queue,
            src.mem,
            CL_TRUE,
            0,
            src.bytes(),
            dst.as_mut_ptr() as *mut c_void,
            0,
            ptr::null(),
            ptr::null_mut()
        ));
        Ok(())
    }

    fn fill(&self, buf: &mut ClBuffer, extent: Extent, value: f32) -> Result<()> {
        check_span(buf.len(), extent.len())?;
        if extent.is_empty() {
            return Ok(());
        }
        let (work_dim, global) = match extent {
            Extent::Linear(n) => (1, [n, 1]),
            Extent::Grid { rows, cols } => (2, [rows, cols]),
        };
        set_arg(self.fill_kernel, 0, &buf.mem)?;
        set_arg(self.fill_kernel, 1, &value)?;
        cl_check!(clEnqueueNDRangeKernel(
            self.queue,
            self.fill_kernel,
            work_dim,
            ptr::null(),
            global.as_ptr(),
            ptr::null(),
            0,
            ptr::null(),
            ptr::null_mut()
        ));
        self.finish()
    }

    fn matvec(
        &self,
        mat: &ClBuffer,
        rows: usize,
        cols: usize,
        vec: &ClBuffer,
        out: &mut ClBuffer,
    ) -> Result<()> {
        check_matvec(mat.len(), rows, cols, vec.len(), out.len())?;
        if rows == 0 {
            return Ok(());
        }
        let to_uint = |n: usize| {
            cl_uint::try_from(n)
                .map_err(|_| AccelError::Backend(format!("dimension {n} exceeds OpenCL uint")))
        };
        let (rows_arg, cols_arg) = (to_uint(rows)?, to_uint(cols)?);

        let kernel = self.matvec_kernel;
        set_arg(kernel, 0, &mat.mem)?;
        set_arg(kernel, 1, &vec.mem)?;
        set_arg(kernel, 2, &out.mem)?;
        cl_check!(clSetKernelArg(
            kernel,
            3,
            self.lanes * size_of::<f32>(),
            ptr::null()
        ));
        set_arg(kernel, 4, &rows_arg)?;
        set_arg(kernel, 5, &cols_arg)?;

        let global = rows * self.lanes;
        let local = self.lanes;
        debug!(rows, cols, global, local, "OpenCL: matvec_rows");
        cl_check!(clEnqueueNDRangeKernel(
            self.queue,
            kernel,
            1,
            ptr::null(),
            &global,
            &local,
            0,
            ptr::null(),
            ptr::null_mut()
        ));
        self.finish()
    }
}

fn set_arg<T>(kernel: cl_kernel, index: cl_uint, value: &T) -> Result<()> {
    cl_check!(clSetKernelArg(
        kernel,
        index,
        size_of::<T>(),
        value as *const T as *const c_void
    ));
    Ok(())
}

fn pick_device(platform: cl_platform_id) -> Result<cl_device_id> {
    for device_type in [CL_DEVICE_TYPE_GPU, CL_DEVICE_TYPE_ALL] {
        let mut device: cl_device_id = ptr::null_mut();
        let mut num_devices = 0;
        let code = unsafe { clGetDeviceIDs(platform, device_type, 1, &mut device, &mut num_devices) };
        if code == CL_SUCCESS && num_devices > 0 {
            return Ok(device);
        }
    }
    Err(AccelError::Backend("no OpenCL devices".into()))
}

fn device_name(device: cl_device_id) -> Result<String> {
    let mut size = 0usize;
    cl_check!(clGetDeviceInfo(device, CL_DEVICE_NAME, 0, ptr::null_mut(), &mut size));
    let mut raw = vec![0u8; size];
    cl_check!(clGetDeviceInfo(
        device,
        CL_DEVICE_NAME,
        size,
        raw.as_mut_ptr() as *mut c_void,
        ptr::null_mut()
    ));
    Ok(String::from_utf8_lossy(&raw).trim_end_matches('\0').trim().to_string())
}

/// Лог компиляции программы; пустая строка, если его не удалось получить
fn build_log(program: cl_program, device: cl_device_id) -> String {
    let mut size = 0usize;
    let code = unsafe {
        clGetProgramBuildInfo(
            program,
            device,
            CL_PROGRAM_BUILD_LOG,
            0,
            ptr::null_mut(),
            &mut size,
        )
    };
    if code != CL_SUCCESS || size == 0 {
        return String::new();
    }
    let mut log = vec![0u8; size];
    let code = unsafe {
        clGetProgramBuildInfo(
            program,
            device,
            CL_PROGRAM_BUILD_LOG,
            size,
            log.as_mut_ptr() as *mut c_void,
            ptr::null_mut(),
        )
    };
    if code != CL_SUCCESS {
        return String::new();
    }
    String::from_utf8_lossy(&log).trim_end_matches('\0').to_string()
}

/// Наибольшая степень двойки, не превышающая ни предел устройства, ни предел ядра,
/// ни [`GEMV_LANES`]
pub(crate) fn lanes_for(device_max: usize, kernel_max: usize) -> usize {
    let cap = device_max.min(kernel_max).clamp(1, GEMV_LANES);
    1 << (usize::BITS - 1 - cap.leading_zeros())
}
