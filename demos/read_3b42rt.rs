use time::format_description::FormatItem;
use time::macros::format_description;
use tracing_subscriber::EnvFilter;

use trmm_rt::{Product, TrmmReader};

/// 公称日時の書式
const NOMINAL_DATETIME_FMT: &[FormatItem<'_>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "resources/3B42RT.2008010103.7R2.bin.gz".to_string());
    let mut reader = TrmmReader::open_product(&path, Product::B42RT)?;

    let header = reader.header();
    for (key, value) in header.fields() {
        println!("{key:>28}: {value}");
    }
    println!(
        "公称日時: {}",
        header.nominal_date_time().format(NOMINAL_DATETIME_FMT)?
    );

    let grid = reader.precipitation_grid()?;
    println!("格子数: {:?}", grid.shape());
    println!("欠測格子数: {}", grid.missing_count());
    if let Some(stats) = grid.statistics() {
        println!("最大値: {:.3} mm/hr", stats.max);
        println!("最小値: {:.3} mm/hr", stats.min);
        println!("平均値: {:.3} mm/hr", stats.mean);
        println!("標準偏差: {:.3} mm/hr", stats.std_dev);
    }

    Ok(())
}
