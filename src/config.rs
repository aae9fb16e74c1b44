//! Параметры запуска

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::check::Tolerance;

/// Размеры из демонстрационного примера
pub const DEFAULT_ROWS: usize = 128;
pub const DEFAULT_COLS: usize = 256;

/// На чём считать
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Многоядерный CPU через rayon
    #[default]
    Host,
    /// GPU через OpenCL (нужна сборка с feature `opencl`)
    OpenCl,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub rows: usize,
    pub cols: usize,
    pub matrix_value: f32,
    pub vector_value: f32,
    /// Включает проверку корректности. По умолчанию только в debug-сборке.
    pub check: bool,
    pub golden_path: PathBuf,
    pub tolerance: Tolerance,
    pub backend: Backend,
    /// None - глобальный пул rayon
    pub host_threads: Option<usize>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            rows: DEFAULT_ROWS,
            cols: DEFAULT_COLS,
            matrix_value: 1.0,
            vector_value: 2.0,
            check: cfg!(debug_assertions),
            golden_path: PathBuf::from("matvec_golden.json"),
            tolerance: Tolerance::default(),
            backend: Backend::default(),
            host_threads: None,
        }
    }
}

impl RunConfig {
    /// Читает конфигурацию из JSON, отсутствующие поля берутся по умолчанию
    pub fn from_json_str(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("Некорректная конфигурация запуска")
    }

    /// Ожидаемое значение каждого элемента результата
    pub fn expected_output(&self) -> f32 {
        self.matrix_value * self.cols as f32 * self.vector_value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_demo_program() {
        let config = RunConfig::default();
        assert_eq!((config.rows, config.cols), (128, 256));
        assert_eq!(config.expected_output(), 512.0);
        assert_eq!(config.backend, Backend::Host);
        assert_eq!(config.check, cfg!(debug_assertions));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config =
            RunConfig::from_json_str(r#"{ "rows": 1, "cols": 1, "matrix_value": 3.0, "vector_value": 4.0 }"#)
                .unwrap();
        assert_eq!(config.expected_output(), 12.0);
        assert_eq!(config.golden_path, PathBuf::from("matvec_golden.json"));
        assert_eq!(config.tolerance, Tolerance::default());
    }

    #[test]
    fn backend_names_are_lowercase() {
        let config = RunConfig::from_json_str(r#"{ "backend": "opencl", "host_threads": 4 }"#).unwrap();
        assert_eq!(config.backend, Backend::OpenCl);
        assert_eq!(config.host_threads, Some(4));
        assert!(RunConfig::from_json_str(r#"{ "backend": "cuda" }"#).is_err());
    }
}
