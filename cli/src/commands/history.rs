use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use aquakeeper_core::export::write_measurements_csv;
use aquakeeper_core::service::AquaService;

use super::helpers::{fmt_opt, fmt_opt_prec, short_timestamp};

pub(crate) fn cmd_history(
    svc: &AquaService,
    aquarium_id: i64,
    json: bool,
    csv: Option<&Path>,
) -> Result<()> {
    let aquarium = svc
        .db()
        .get_aquarium(aquarium_id)?
        .with_context(|| format!("Aquarium {aquarium_id} not found"))?;
    let measurements = svc.measurement_history(aquarium.id, None)?;

    if let Some(path) = csv {
        let file = File::create(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        let written = write_measurements_csv(file, &measurements)?;
        if json {
            println!(
                "{}",
                serde_json::json!({ "exported": written, "path": path.display().to_string() })
            );
        } else {
            println!("Exported {written} measurements to {}", path.display());
        }
        return Ok(());
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&measurements)?);
        return Ok(());
    }
    if measurements.is_empty() {
        eprintln!(
            "No measurements for {}. Record one with /add_test in the bot.",
            aquarium.name
        );
        return Ok(());
    }

    #[derive(Tabled)]
    struct MeasurementRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Measured")]
        measured_at: String,
        #[tabled(rename = "pH")]
        ph: String,
        #[tabled(rename = "KH")]
        kh: String,
        #[tabled(rename = "GH")]
        gh: String,
        #[tabled(rename = "NO2")]
        no2: String,
        #[tabled(rename = "NO3")]
        no3: String,
        #[tabled(rename = "PO4")]
        po4: String,
        #[tabled(rename = "TAN")]
        tan: String,
        #[tabled(rename = "°C")]
        temp: String,
        #[tabled(rename = "NH3")]
        nh3: String,
    }

    let rows: Vec<MeasurementRow> = measurements
        .iter()
        .map(|m| MeasurementRow {
            id: m.id,
            measured_at: short_timestamp(&m.measured_at),
            ph: fmt_opt(m.ph),
            kh: fmt_opt(m.kh),
            gh: fmt_opt(m.gh),
            no2: fmt_opt(m.no2),
            no3: fmt_opt(m.no3),
            po4: fmt_opt(m.po4),
            tan: fmt_opt(m.tan),
            temp: fmt_opt(m.temperature_c),
            nh3: fmt_opt_prec(m.nh3_mg_l, 4),
        })
        .collect();

    println!("{} (#{})", aquarium.name, aquarium.id);
    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(2..11)).with(Alignment::right()))
        .to_string();
    println!("{table}");

    Ok(())
}
