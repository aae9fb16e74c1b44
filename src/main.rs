//! Умножение матрицы 128x256 на вектор с выгрузкой на ускоритель

use anyhow::Result;
use prettytable::{row, Table};
use tracing::{warn, Level};

use accel_matvec::{run_with_config, utils::preview, RunConfig};

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let config = RunConfig::default();
    println!("Умножение матрицы на вектор на ускорителе");
    println!("Размер матрицы: {}x{}", config.rows, config.cols);

    let summary = run_with_config(&config)?;

    println!("\nУстройство: {}", summary.device);
    println!("Время умножения: {:?}", summary.compute_time);
    println!("Результат ({}): {}", summary.output.len(), preview(&summary.output, 4));

    if summary.checks.is_empty() {
        println!("Проверка корректности отключена");
        return Ok(());
    }

    let mut table = Table::new();
    table.add_row(row!["Контейнер", "Элементов", "Проверка"]);
    for record in &summary.checks {
        table.add_row(row![record.name, record.count, record.verdict]);
    }
    table.printstd();

    if !summary.all_checks_passed() {
        warn!("результаты расходятся с эталоном {}", config.golden_path.display());
    }

    Ok(())
}
