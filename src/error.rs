//! Ошибки ядра: контейнеры, ускорители, умножение

use std::fmt;

/// Где выделялась память
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryDomain {
    Host,
    Device,
}

impl fmt::Display for MemoryDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryDomain::Host => write!(f, "host"),
            MemoryDomain::Device => write!(f, "device"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AccelError {
    #[error("matrix/vector dimensions incompatible: matrix {rows}x{cols}, vector {vec_len}, output {out_len}")]
    DimensionMismatch {
        rows: usize,
        cols: usize,
        vec_len: usize,
        out_len: usize,
    },

    #[error("buffer holds {buffer} elements, operation needs {required}")]
    BufferLength { buffer: usize, required: usize },

    #[error("failed to allocate {bytes} bytes on {domain}")]
    Allocation { domain: MemoryDomain, bytes: usize },

    #[error("OpenCL error code {code} in {call}")]
    OpenCl { call: &'static str, code: i32 },

    #[error("accelerator unavailable: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, AccelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mismatch_message_names_all_dimensions() {
        let err = AccelError::DimensionMismatch {
            rows: 128,
            cols: 256,
            vec_len: 255,
            out_len: 128,
        };
        let msg = err.to_string();
        assert!(msg.contains("128x256"));
        assert!(msg.contains("vector 255"));
    }

    #[test]
    fn buffer_length_message() {
        let err = AccelError::BufferLength {
            buffer: 10,
            required: 1,
        };
        assert_eq!(err.to_string(), "buffer holds 10 elements, operation needs 1");
    }

    #[test]
    fn allocation_message_names_domain() {
        let err = AccelError::Allocation {
            domain: MemoryDomain::Device,
            bytes: 1024,
        };
        assert_eq!(err.to_string(), "failed to allocate 1024 bytes on device");
    }
}
