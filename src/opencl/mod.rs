//! Бэкенд OpenCL
//!
//! Низкоуровневые привязки и ускоритель поверх них

pub mod ffi;
mod device;

pub use device::{ClBuffer, OpenClAccelerator, GEMV_LANES};
