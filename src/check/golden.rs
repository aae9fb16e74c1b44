//! Эталоны в JSON-файле
//!
//! При первом запуске файл создаётся и наполняется результатами, при следующих
//! запусках результаты сверяются с сохранёнными.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use super::{Comparator, Location, ReferenceSet, Tolerance, Verdict};

pub struct GoldenFile {
    path: PathBuf,
    refs: ReferenceSet,
}

impl GoldenFile {
    /// Загружает эталоны из `path`, если файл существует
    pub fn open(path: impl AsRef<Path>, tolerance: Tolerance) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut refs = if path.exists() {
            let text = fs::read_to_string(&path)
                .with_context(|| format!("Не удалось прочитать эталоны {}", path.display()))?;
            serde_json::from_str::<ReferenceSet>(&text)
                .with_context(|| format!("Повреждён файл эталонов {}", path.display()))?
        } else {
            ReferenceSet::default()
        };
        refs.set_tolerance(tolerance);
        info!(path = %path.display(), entries = refs.len(), "эталоны загружены");
        Ok(Self { path, refs })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn references(&self) -> &ReferenceSet {
        &self.refs
    }

    /// Записывает файл, если появились новые эталоны. Возвращает true, если запись была.
    pub fn save(&self) -> Result<bool> {
        if self.refs.recorded() == 0 {
            return Ok(false);
        }
        let text = serde_json::to_string_pretty(&self.refs)?;
        fs::write(&self.path, text)
            .with_context(|| format!("Не удалось записать эталоны {}", self.path.display()))?;
        info!(path = %self.path.display(), entries = self.refs.len(), "эталоны сохранены");
        Ok(true)
    }
}

impl Comparator for GoldenFile {
    fn compare(&mut self, data: &[f32], name: &str, location: &Location) -> Result<Verdict> {
        self.refs.compare(data, name, location)
    }
}
