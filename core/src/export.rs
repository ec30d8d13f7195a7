use std::io::Write;

use anyhow::{Context, Result};

use crate::models::Measurement;

/// Write measurements as CSV with a header row. Missing readings are empty cells.
/// Returns the number of data rows written.
pub fn write_measurements_csv<W: Write>(writer: W, measurements: &[Measurement]) -> Result<usize> {
    let mut wtr = csv::Writer::from_writer(writer);
    for m in measurements {
        wtr.serialize(m)
            .with_context(|| format!("Failed to write measurement {}", m.id))?;
    }
    wtr.flush().context("Failed to flush CSV output")?;
    Ok(measurements.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn measurement(id: i64, ph: Option<f64>) -> Measurement {
        Measurement {
            id,
            uuid: format!("m-{id}"),
            aquarium_id: 3,
            measured_at: "2024-06-15T10:00:00.000000Z".to_string(),
            ph,
            kh: None,
            gh: None,
            no2: None,
            no3: Some(10.0),
            po4: None,
            tan: Some(0.2),
            temperature_c: Some(25.0),
            nh3_mg_l: None,
            nh4_mg_l: None,
        }
    }

    #[test]
    fn test_write_measurements_csv() {
        let mut out = Vec::new();
        let rows = vec![measurement(1, Some(7.2)), measurement(2, None)];
        let written = write_measurements_csv(&mut out, &rows).unwrap();
        assert_eq!(written, 2);

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("id,uuid,aquarium_id,measured_at,ph,kh"));
        assert!(lines[0].ends_with("nh3_mg_l,nh4_mg_l"));
        assert!(lines[1].starts_with("1,m-1,3,2024-06-15T10:00:00.000000Z,7.2,,,,10.0,"));
        assert!(lines[2].contains(",m-2,3,2024-06-15T10:00:00.000000Z,,"));
    }

    #[test]
    fn test_write_empty_has_no_rows() {
        let mut out = Vec::new();
        assert_eq!(write_measurements_csv(&mut out, &[]).unwrap(), 0);
        assert!(out.is_empty());
    }
}
