//! Автоматическая проверка корректности
//!
//! Контейнер забирается с устройства, и его host-буфер вместе с именем и местом
//! вызова передаётся внешнему [`Comparator`]. Первое наблюдение под данным ключом
//! становится эталоном, последующие сравниваются с ним.

mod golden;

pub use golden::GoldenFile;

use std::collections::BTreeMap;
use std::fmt;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::device::Accelerator;
use crate::matrix::{compare_results, Resident};

/// Тег типа элементов, который получает компаратор
pub const ELEMENT_TYPE: &str = "float";

/// Место вызова проверки
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub file: String,
    pub function: String,
    pub line: u32,
}

impl Location {
    pub fn new(file: &str, function: &str, line: u32) -> Self {
        Self {
            file: file.to_string(),
            function: function.to_string(),
            line,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.function, self.line)
    }
}

/// Текущее место в исходниках
#[macro_export]
macro_rules! here {
    () => {
        $crate::check::Location::new(file!(), module_path!(), line!())
    };
}

/// Допуск при сравнении чисел с плавающей точкой
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tolerance {
    pub relative: f32,
    pub absolute: f32,
}

impl Default for Tolerance {
    fn default() -> Self {
        Self {
            relative: 1.0e-5,
            absolute: 1.0e-6,
        }
    }
}

impl Tolerance {
    pub fn accepts(&self, actual: f32, expected: f32) -> bool {
        // Те же биты (в том числе NaN и бесконечности) - совпадение
        if actual.to_bits() == expected.to_bits() {
            return true;
        }
        let diff = (actual - expected).abs();
        if !diff.is_finite() {
            return false;
        }
        diff <= self.absolute || diff <= self.relative * actual.abs().max(expected.abs())
    }
}

/// Результат одной проверки
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    /// Эталона не было, данные сохранены как эталон
    Recorded,
    Matched,
    Mismatched { differing: usize, max_diff: f32 },
}

impl Verdict {
    pub fn is_mismatch(&self) -> bool {
        matches!(self, Verdict::Mismatched { .. })
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Recorded => write!(f, "записан эталон"),
            Verdict::Matched => write!(f, "совпадает"),
            Verdict::Mismatched {
                differing,
                max_diff,
            } => write!(f, "различается: {differing} эл., макс. разница {max_diff}"),
        }
    }
}

/// Внешний механизм сравнения с эталоном
pub trait Comparator {
    fn compare(&mut self, data: &[f32], name: &str, location: &Location) -> Result<Verdict>;
}

/// Сохранённый эталон
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceEntry {
    pub name: String,
    #[serde(flatten)]
    pub location: Location,
    pub element_type: String,
    /// Хранятся битами IEEE-754: JSON не умеет NaN и бесконечности
    #[serde(with = "f32_bits")]
    pub values: Vec<f32>,
}

mod f32_bits {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(values: &[f32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(values.iter().map(|x| x.to_bits()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f32>, D::Error> {
        let bits = Vec::<u32>::deserialize(deserializer)?;
        Ok(bits.into_iter().map(f32::from_bits).collect())
    }
}

/// Эталоны в памяти, ключ - `name@file:function:line`
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ReferenceSet {
    #[serde(skip)]
    tolerance: Tolerance,
    entries: BTreeMap<String, ReferenceEntry>,
    #[serde(skip)]
    recorded: usize,
}

impl ReferenceSet {
    pub fn new(tolerance: Tolerance) -> Self {
        Self {
            tolerance,
            ..Self::default()
        }
    }

    pub fn key(name: &str, location: &Location) -> String {
        format!("{name}@{location}")
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Сколько эталонов записано с момента создания/загрузки
    pub fn recorded(&self) -> usize {
        self.recorded
    }

    pub fn get(&self, name: &str, location: &Location) -> Option<&ReferenceEntry> {
        self.entries.get(&Self::key(name, location))
    }

    pub(crate) fn set_tolerance(&mut self, tolerance: Tolerance) {
        self.tolerance = tolerance;
    }
}

impl Comparator for ReferenceSet {
    fn compare(&mut self, data: &[f32], name: &str, location: &Location) -> Result<Verdict> {
        let key = Self::key(name, location);
        let Some(entry) = self.entries.get(&key) else {
            self.entries.insert(
                key,
                ReferenceEntry {
                    name: name.to_string(),
                    location: location.clone(),
                    element_type: ELEMENT_TYPE.to_string(),
                    values: data.to_vec(),
                },
            );
            self.recorded += 1;
            return Ok(Verdict::Recorded);
        };

        let cmp = compare_results(data, &entry.values, self.tolerance);
        if cmp.matches() {
            Ok(Verdict::Matched)
        } else {
            Ok(Verdict::Mismatched {
                differing: cmp.differing,
                max_diff: cmp.max_diff,
            })
        }
    }
}

/// Забирает контейнер с устройства и сверяет его host-буфер с эталоном
pub fn check<'d, A, C>(
    container: &mut C,
    name: &str,
    location: &Location,
    comparator: &mut dyn Comparator,
) -> Result<Verdict>
where
    A: Accelerator + 'd,
    C: Resident<'d, A>,
{
    container.pull_from_device()?;
    let verdict = comparator.compare(container.host(), name, location)?;
    if verdict.is_mismatch() {
        warn!(container = name, %location, %verdict, "проверка не пройдена");
    } else {
        info!(container = name, count = container.len(), %verdict, "проверка");
    }
    Ok(verdict)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::HostAccelerator;
    use crate::matrix::{fill, Vector};

    #[test]
    fn tolerance_is_relative_for_large_values() {
        let tol = Tolerance::default();
        assert!(tol.accepts(512.0, 512.004));
        assert!(!tol.accepts(512.0, 512.1));
        assert!(tol.accepts(0.0, 5.0e-7));
        assert!(!tol.accepts(0.0, 1.0e-3));
        assert!(!tol.accepts(f32::NAN, 1.0));
        assert!(tol.accepts(f32::NAN, f32::NAN));
        assert!(tol.accepts(f32::INFINITY, f32::INFINITY));
        assert!(!tol.accepts(f32::INFINITY, f32::NEG_INFINITY));
        assert!(!tol.accepts(f32::INFINITY, 1.0e30));
    }

    #[test]
    fn reference_values_survive_json_bit_exact() {
        let mut refs = ReferenceSet::new(Tolerance::default());
        let loc = Location::new("main.rs", "main", 3);
        let values = [1.0, -0.0, f32::NAN, f32::NEG_INFINITY, f32::MIN_POSITIVE];
        refs.compare(&values, "out", &loc).unwrap();

        let text = serde_json::to_string(&refs).unwrap();
        let back: ReferenceSet = serde_json::from_str(&text).unwrap();
        let stored: Vec<u32> = back
            .get("out", &loc)
            .unwrap()
            .values
            .iter()
            .map(|x| x.to_bits())
            .collect();
        let expected: Vec<u32> = values.iter().map(|x| x.to_bits()).collect();
        assert_eq!(stored, expected);
    }

    #[test]
    fn first_observation_is_recorded_then_matched() {
        let mut refs = ReferenceSet::new(Tolerance::default());
        let loc = here!();

        assert_eq!(refs.compare(&[1.0, 2.0], "out", &loc).unwrap(), Verdict::Recorded);
        assert_eq!(refs.compare(&[1.0, 2.0], "out", &loc).unwrap(), Verdict::Matched);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs.recorded(), 1);
        assert_eq!(refs.get("out", &loc).unwrap().element_type, ELEMENT_TYPE);
    }

    #[test]
    fn same_name_at_other_location_is_separate() {
        let mut refs = ReferenceSet::new(Tolerance::default());
        refs.compare(&[1.0], "vec", &Location::new("a.rs", "main", 1)).unwrap();
        let verdict = refs
            .compare(&[2.0], "vec", &Location::new("a.rs", "main", 2))
            .unwrap();
        assert_eq!(verdict, Verdict::Recorded);
    }

    #[test]
    fn mismatch_reports_count_and_magnitude() {
        let mut refs = ReferenceSet::new(Tolerance::default());
        let loc = Location::new("main.rs", "main", 3);
        refs.compare(&[512.0; 4], "out", &loc).unwrap();

        let verdict = refs.compare(&[512.0, 510.0, 512.0, 511.0], "out", &loc).unwrap();
        assert_eq!(
            verdict,
            Verdict::Mismatched {
                differing: 2,
                max_diff: 2.0
            }
        );
    }

    #[test]
    fn check_pulls_device_data_first() {
        let accel = HostAccelerator::new();
        let mut vec = Vector::new(&accel, 8).unwrap();
        fill(&mut vec, 2.0).unwrap();
        let mut refs = ReferenceSet::new(Tolerance::default());
        let loc = here!();

        check(&mut vec, "vec", &loc, &mut refs).unwrap();
        assert_eq!(refs.get("vec", &loc).unwrap().values, vec![2.0; 8]);
        assert_eq!(vec.host(), &[2.0; 8]);
    }

    #[test]
    fn location_display() {
        let loc = Location::new("OpenACCExample.cpp", "main", 1);
        assert_eq!(loc.to_string(), "OpenACCExample.cpp:main:1");
    }
}
