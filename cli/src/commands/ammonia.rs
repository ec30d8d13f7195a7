use anyhow::{Result, bail};
use serde::Serialize;

use aquakeeper_core::chemistry::{self, AmmoniaSplit};

#[derive(Serialize)]
struct AmmoniaReport {
    ph: f64,
    temperature_c: f64,
    tan: f64,
    pka: f64,
    unionized_fraction: f64,
    #[serde(flatten)]
    split: AmmoniaSplit,
    toxic: bool,
}

fn report(ph: f64, temperature_c: f64, tan: f64, threshold: f64) -> Result<AmmoniaReport> {
    if !ph.is_finite() || !(0.0..=14.0).contains(&ph) {
        bail!("pH must be between 0 and 14");
    }
    if !temperature_c.is_finite() || !(-5.0..=50.0).contains(&temperature_c) {
        bail!("Temperature must be between -5 and 50 °C");
    }
    if !tan.is_finite() || tan < 0.0 {
        bail!("Total ammonia must not be negative");
    }
    let split = chemistry::unionized_ammonia(ph, temperature_c, tan);
    Ok(AmmoniaReport {
        ph,
        temperature_c,
        tan,
        pka: chemistry::ammonium_pka(temperature_c),
        unionized_fraction: chemistry::unionized_fraction(ph, temperature_c),
        split,
        toxic: chemistry::is_toxic(split.nh3, threshold),
    })
}

pub(crate) fn cmd_ammonia(
    ph: f64,
    temperature_c: f64,
    tan: f64,
    threshold: f64,
    json: bool,
) -> Result<()> {
    let r = report(ph, temperature_c, tan, threshold)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&r)?);
    } else {
        println!("TAN {tan} mg/L at pH {ph}, {temperature_c} °C");
        println!(
            "  pKa {:.4}, free fraction {:.3}%",
            r.pka,
            r.unionized_fraction * 100.0
        );
        println!("  NH3 (free):    {:.4} mg/L", r.split.nh3);
        println!("  NH4+ (ionized): {:.4} mg/L", r.split.nh4);
        if r.toxic {
            println!("  WARNING: free ammonia above {threshold} mg/L is toxic to fish");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_values() {
        let r = report(7.2, 25.0, 0.2, 0.05).unwrap();
        assert!((r.split.nh3 + r.split.nh4 - 0.2).abs() < 1e-12);
        assert!((r.pka - 9.2464).abs() < 1e-3);
        assert!(!r.toxic);

        let r = report(8.5, 30.0, 3.0, 0.05).unwrap();
        assert!(r.toxic);
    }

    #[test]
    fn test_report_json_is_flat() {
        let r = report(7.0, 24.0, 1.0, 0.05).unwrap();
        let json = serde_json::to_value(&r).unwrap();
        assert!(json["nh3"].is_number());
        assert!(json["nh4"].is_number());
        assert_eq!(json["toxic"], false);
    }

    #[test]
    fn test_report_rejects_bad_input() {
        assert!(report(15.0, 25.0, 0.2, 0.05).is_err());
        assert!(report(7.0, 80.0, 0.2, 0.05).is_err());
        assert!(report(7.0, 25.0, -1.0, 0.05).is_err());
        assert!(report(f64::NAN, 25.0, 0.2, 0.05).is_err());
    }
}
