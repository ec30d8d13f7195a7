use serde::Serialize;

use crate::models::{Measurement, OrganismKind, Range, SpeciesProfile};
use crate::species::SpeciesTable;

/// Result of checking a species against an aquarium's water.
///
/// Once a water test has been evaluated, `compatible` holds exactly when
/// `messages` is empty. `notes` carry remarks that never affect the verdict.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verdict {
    pub compatible: bool,
    pub messages: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

impl Verdict {
    fn advisory(message: String) -> Self {
        Self {
            compatible: true,
            messages: vec![message],
            notes: Vec::new(),
        }
    }
}

/// What to do with an organism addition whose verdict is incompatible.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AdditionPolicy {
    /// Persist anyway and show the verdict.
    #[default]
    Warn,
    /// Refuse to persist.
    Block,
}

/// Check `species_name` against the latest water test of an aquarium.
///
/// Unknown species and aquariums without any measurement are treated as
/// unverifiable and reported as compatible with a single advisory message.
#[must_use]
pub fn check(
    table: &SpeciesTable,
    kind: OrganismKind,
    species_name: &str,
    latest: Option<&Measurement>,
) -> Verdict {
    let Some(profile) = table.find(species_name) else {
        return Verdict::advisory(format!(
            "'{}' is not in the species table; compatibility is unverified",
            species_name.trim()
        ));
    };
    let Some(measurement) = latest else {
        return Verdict::advisory(format!(
            "No water test recorded yet; add a measurement to verify '{}'",
            profile.common_name
        ));
    };

    let violations = evaluate(profile, measurement);
    let mut notes = Vec::new();
    if profile.kind != kind {
        notes.push(format!(
            "Note: '{}' is listed as a {}, not a {kind}",
            profile.common_name, profile.kind
        ));
    }
    Verdict {
        compatible: violations.is_empty(),
        messages: violations,
        notes,
    }
}

fn evaluate(profile: &SpeciesProfile, m: &Measurement) -> Vec<String> {
    let mut out = Vec::new();
    check_range(&mut out, "pH", m.ph, profile.ph);
    check_range(&mut out, "GH", m.gh, profile.gh);
    check_range(&mut out, "KH", m.kh, profile.kh);
    check_range(&mut out, "Temperature °C", m.temperature_c, profile.temperature_c);
    match profile.kind {
        OrganismKind::Fish => {
            check_ceiling(&mut out, "NO2 mg/L", m.no2, profile.no2_max);
            check_ceiling(&mut out, "Free NH3 mg/L", m.nh3_mg_l, profile.nh3_max);
        }
        OrganismKind::Plant => {
            check_range(&mut out, "NO3 mg/L", m.no3, profile.no3);
            check_range(&mut out, "PO4 mg/L", m.po4, profile.po4);
        }
    }
    out
}

fn check_range(out: &mut Vec<String>, label: &str, value: Option<f64>, range: Option<Range>) {
    let (Some(value), Some(range)) = (value, range) else {
        return;
    };
    if range.contains(value) {
        return;
    }
    if value < range.min {
        out.push(format!(
            "{label} {value} is below the minimum {} (tolerated {range})",
            range.min
        ));
    } else {
        out.push(format!(
            "{label} {value} is above the maximum {} (tolerated {range})",
            range.max
        ));
    }
}

fn check_ceiling(out: &mut Vec<String>, label: &str, value: Option<f64>, max: Option<f64>) {
    if let (Some(value), Some(max)) = (value, max) {
        if value > max {
            out.push(format!("{label} {value:.4} is above the maximum {max}"));
        }
    }
}
