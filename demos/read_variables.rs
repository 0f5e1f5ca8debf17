use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing_subscriber::EnvFilter;

use trmm_rt::{TrmmReader, Variable};

/// 3B42RTの最北西端の格子の中心（度）
const FIRST_BOX_CENTER: (f64, f64) = (59.875, 0.125);

/// 3B42RTの格子間隔（度）
const GRID_INTERVAL: f64 = 0.25;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let path = args
        .next()
        .unwrap_or_else(|| "resources/3B42RT.2008010103.7R2.bin.gz".to_string());
    let dest = args.next().unwrap_or_else(|| "3B42RT.csv".to_string());

    let reader = TrmmReader::open(&path)?;
    let product = reader.product().unwrap_or(trmm_rt::Product::B42RT);
    let grids = product
        .variables()
        .iter()
        .map(|&v| reader.variable_grid_by(v).map(|g| (v, g)))
        .collect::<Result<Vec<_>, _>>()?;

    let dest_file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(Path::new(&dest))?;
    let mut writer = BufWriter::new(dest_file);
    let names: Vec<String> = grids.iter().map(|(v, _)| column_name(*v)).collect();
    writeln!(writer, "latitude,longitude,{}", names.join(","))?;

    let header = reader.header();
    for row in 0..header.height() {
        let latitude = FIRST_BOX_CENTER.0 - row as f64 * GRID_INTERVAL;
        for col in 0..header.width() {
            let longitude = FIRST_BOX_CENTER.1 + col as f64 * GRID_INTERVAL;
            let values: Vec<String> = grids
                .iter()
                .map(|(_, g)| g.get(row, col).map(|v| v.to_string()).unwrap_or_default())
                .collect();
            writeln!(writer, "{latitude},{longitude},{}", values.join(","))?;
        }
    }
    writer.flush()?;

    Ok(())
}

fn column_name(variable: Variable) -> String {
    format!("{variable:?}").to_lowercase()
}
