//! Контейнеры с зеркалом на устройстве
//!
//! Каждый контейнер владеет ровно одним host-буфером и одним буфером устройства.
//! Копии не синхронизируются сами: доступ через `at` меняет только host-буфер,
//! `fill` и `matvec` меняют только буфер устройства. Передачи делаются явно через
//! [`Resident::pull_from_device`] и [`Resident::push_to_device`].

use tracing::debug;

use crate::device::{alloc_zeroed, Accelerator, Extent};
use crate::error::{AccelError, MemoryDomain, Result};

/// Пара host-буфер + буфер устройства одинаковой длины
pub struct Mirror<'d, A: Accelerator> {
    // Порядок полей важен: буфер устройства освобождается раньше host-буфера
    pub(crate) device: A::Buffer,
    pub(crate) host: Vec<f32>,
    pub(crate) accel: &'d A,
}

impl<'d, A: Accelerator> Mirror<'d, A> {
    fn new(accel: &'d A, len: usize) -> Result<Self> {
        let host = alloc_zeroed(len, MemoryDomain::Host)?;
        let device = accel.alloc(len)?;
        Ok(Self {
            device,
            host,
            accel,
        })
    }

    fn pull(&mut self) -> Result<()> {
        debug!(len = self.host.len(), "device -> host");
        self.accel.download(&self.device, &mut self.host)
    }

    fn push(&mut self) -> Result<()> {
        debug!(len = self.host.len(), "host -> device");
        self.accel.upload(&self.host, &mut self.device)
    }
}

/// Общее поведение контейнеров, живущих на устройстве
pub trait Resident<'d, A: Accelerator + 'd> {
    /// Форма диапазона для параллельных регионов
    fn extent(&self) -> Extent;

    fn mirror(&self) -> &Mirror<'d, A>;

    fn mirror_mut(&mut self) -> &mut Mirror<'d, A>;

    /// Число элементов
    fn len(&self) -> usize {
        self.mirror().host.len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Host-копия данных (без синхронизации)
    fn host<'s>(&'s self) -> &'s [f32]
    where
        'd: 's,
    {
        &self.mirror().host
    }

    fn host_mut<'s>(&'s mut self) -> &'s mut [f32]
    where
        'd: 's,
    {
        &mut self.mirror_mut().host
    }

    fn accelerator(&self) -> &'d A {
        self.mirror().accel
    }

    /// Перезаписывает host-буфер содержимым устройства. Блокирующая.
    fn pull_from_device(&mut self) -> Result<()> {
        self.mirror_mut().pull()
    }

    /// Перезаписывает буфер устройства содержимым host-буфера. Блокирующая.
    fn push_to_device(&mut self) -> Result<()> {
        self.mirror_mut().push()
    }
}

/// Плотная матрица nx x ny, хранение по строкам
pub struct Matrix<'d, A: Accelerator> {
    nx: usize,
    ny: usize,
    storage: Mirror<'d, A>,
}

impl<'d, A: Accelerator> Matrix<'d, A> {
    /// Выделяет host-буфер и привязанный к нему буфер на устройстве
    pub fn new(accel: &'d A, nx: usize, ny: usize) -> Result<Self> {
        let len = nx.checked_mul(ny).ok_or(AccelError::Allocation {
            domain: MemoryDomain::Host,
            bytes: usize::MAX,
        })?;
        debug!(nx, ny, device = %accel.name(), "matrix: alloc");
        Ok(Self {
            nx,
            ny,
            storage: Mirror::new(accel, len)?,
        })
    }

    pub fn rows(&self) -> usize {
        self.nx
    }

    pub fn cols(&self) -> usize {
        self.ny
    }

    /// Элемент (x, y) в host-буфере
    pub fn at(&mut self, x: usize, y: usize) -> &mut f32 {
        assert!(y < self.ny, "column {y} out of range for {} columns", self.ny);
        &mut self.storage.host[x * self.ny + y]
    }
}

impl<'d, A: Accelerator + 'd> Resident<'d, A> for Matrix<'d, A> {
    fn extent(&self) -> Extent {
        Extent::Grid {
            rows: self.nx,
            cols: self.ny,
        }
    }

    fn mirror(&self) -> &Mirror<'d, A> {
        &self.storage
    }

    fn mirror_mut(&mut self) -> &mut Mirror<'d, A> {
        &mut self.storage
    }
}

/// Плотный вектор длины n
pub struct Vector<'d, A: Accelerator> {
    n: usize,
    storage: Mirror<'d, A>,
}

impl<'d, A: Accelerator> Vector<'d, A> {
    pub fn new(accel: &'d A, n: usize) -> Result<Self> {
        debug!(n, device = %accel.name(), "vector: alloc");
        Ok(Self {
            n,
            storage: Mirror::new(accel, n)?,
        })
    }

    /// Элемент i в host-буфере
    pub fn at(&mut self, i: usize) -> &mut f32 {
        &mut self.storage.host[i]
    }
}

impl<'d, A: Accelerator + 'd> Resident<'d, A> for Vector<'d, A> {
    fn extent(&self) -> Extent {
        Extent::Linear(self.n)
    }

    fn mirror(&self) -> &Mirror<'d, A> {
        &self.storage
    }

    fn mirror_mut(&mut self) -> &mut Mirror<'d, A> {
        &mut self.storage
    }
}
