//! Вспомогательные функции

use std::time::{Duration, Instant};

/// Выполняет `f` и возвращает результат вместе со временем выполнения
pub fn measure_time<F, T>(f: F) -> (T, Duration)
where
    F: FnOnce() -> T,
{
    let start = Instant::now();
    let result = f();
    (result, start.elapsed())
}

/// Первые `count` элементов через пробел, с многоточием, если есть ещё
pub fn preview(values: &[f32], count: usize) -> String {
    let mut text = values
        .iter()
        .take(count)
        .map(|x| format!("{x:.1}"))
        .collect::<Vec<_>>()
        .join(" ");
    if values.len() > count {
        text.push_str(" ...");
    }
    text
}
