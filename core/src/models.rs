use std::fmt;
use std::str::FromStr;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use crate::chemistry::{self, AmmoniaSplit};

#[derive(Debug, Clone, Serialize)]
pub struct Aquarium {
    pub id: i64,
    pub owner_id: i64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_l: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct NewAquarium {
    pub owner_id: i64,
    pub name: String,
    pub volume_l: Option<f64>,
    pub description: Option<String>,
}

/// One water test. Rows are never updated; a correction is a new row.
#[derive(Debug, Clone, Serialize)]
pub struct Measurement {
    pub id: i64,
    pub uuid: String,
    pub aquarium_id: i64,
    pub measured_at: String,
    pub ph: Option<f64>,
    pub kh: Option<f64>,
    pub gh: Option<f64>,
    pub no2: Option<f64>,
    pub no3: Option<f64>,
    pub po4: Option<f64>,
    pub tan: Option<f64>,
    pub temperature_c: Option<f64>,
    pub nh3_mg_l: Option<f64>,
    pub nh4_mg_l: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewMeasurement {
    pub aquarium_id: i64,
    pub ph: Option<f64>,
    pub kh: Option<f64>,
    pub gh: Option<f64>,
    pub no2: Option<f64>,
    pub no3: Option<f64>,
    pub po4: Option<f64>,
    pub tan: Option<f64>,
    pub temperature_c: Option<f64>,
}

impl NewMeasurement {
    /// NH3/NH4+ split, available only when TAN, pH and temperature are all known.
    #[must_use]
    pub fn ammonia(&self) -> Option<AmmoniaSplit> {
        match (self.ph, self.temperature_c, self.tan) {
            (Some(ph), Some(temp), Some(tan)) => Some(chemistry::unionized_ammonia(ph, temp, tan)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrganismKind {
    Fish,
    Plant,
}

impl OrganismKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fish => "fish",
            Self::Plant => "plant",
        }
    }
}

impl fmt::Display for OrganismKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrganismKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "fish" | "рыба" | "рыбка" => Ok(Self::Fish),
            "plant" | "растение" => Ok(Self::Plant),
            _ => bail!("Invalid organism kind '{s}'. Must be one of: fish, plant"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Organism {
    pub id: i64,
    pub aquarium_id: i64,
    pub kind: OrganismKind,
    pub species_name: String,
    pub quantity: i64,
    pub added_at: String,
}

#[derive(Debug, Clone)]
pub struct NewOrganism {
    pub aquarium_id: i64,
    pub kind: OrganismKind,
    pub species_name: String,
    pub quantity: i64,
}

/// Inclusive tolerance range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Range {
    pub min: f64,
    pub max: f64,
}

impl Range {
    #[must_use]
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.min, self.max)
    }
}

/// Static reference entry for a fish or plant species.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeciesProfile {
    pub common_name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub kind: OrganismKind,
    #[serde(default)]
    pub ph: Option<Range>,
    #[serde(default)]
    pub gh: Option<Range>,
    #[serde(default)]
    pub kh: Option<Range>,
    #[serde(default)]
    pub temperature_c: Option<Range>,
    /// Fish only: nitrite ceiling, mg/L.
    #[serde(default)]
    pub no2_max: Option<f64>,
    /// Fish only: free ammonia ceiling, mg/L.
    #[serde(default)]
    pub nh3_max: Option<f64>,
    /// Plants only.
    #[serde(default)]
    pub no3: Option<Range>,
    /// Plants only.
    #[serde(default)]
    pub po4: Option<Range>,
}

/// Measurement parameters that can be charted with `/history`.
pub const MEASUREMENT_PARAMS: &[&str] = &[
    "ph", "kh", "gh", "no2", "no3", "po4", "tan", "temp", "nh3", "nh4",
];

impl Measurement {
    /// Look up a single parameter by its short name (see [`MEASUREMENT_PARAMS`]).
    #[must_use]
    pub fn param(&self, name: &str) -> Option<f64> {
        match name {
            "ph" => self.ph,
            "kh" => self.kh,
            "gh" => self.gh,
            "no2" => self.no2,
            "no3" => self.no3,
            "po4" => self.po4,
            "tan" => self.tan,
            "temp" => self.temperature_c,
            "nh3" => self.nh3_mg_l,
            "nh4" => self.nh4_mg_l,
            _ => None,
        }
    }
}

pub fn validate_measurement_param(param: &str) -> Result<String> {
    let lower = param.trim().to_lowercase();
    let normalized = match lower.as_str() {
        "temperature" | "temperature_c" | "temp_c" | "t" => "temp".to_string(),
        "nh3_total" => "tan".to_string(),
        _ => lower,
    };
    if MEASUREMENT_PARAMS.contains(&normalized.as_str()) {
        Ok(normalized)
    } else {
        bail!(
            "Unknown parameter '{param}'. Must be one of: {}",
            MEASUREMENT_PARAMS.join(", ")
        )
    }
}

/// Validate a new aquarium: non-empty name, positive volume if present.
pub fn validate_aquarium(aquarium: &NewAquarium) -> Result<()> {
    if aquarium.name.trim().is_empty() {
        bail!("Aquarium name must not be empty");
    }
    if aquarium.volume_l.is_some_and(|v| !v.is_finite() || v <= 0.0) {
        bail!("volume_l must be greater than 0");
    }
    Ok(())
}

/// Validate a new measurement: finite values, pH within 0..14, concentrations not negative.
pub fn validate_measurement(m: &NewMeasurement) -> Result<()> {
    let fields = [
        ("ph", m.ph),
        ("kh", m.kh),
        ("gh", m.gh),
        ("no2", m.no2),
        ("no3", m.no3),
        ("po4", m.po4),
        ("tan", m.tan),
        ("temperature_c", m.temperature_c),
    ];
    for (name, value) in fields {
        if value.is_some_and(|v| !v.is_finite()) {
            bail!("{name} must be a finite number");
        }
    }
    if m.ph.is_some_and(|v| !(0.0..=14.0).contains(&v)) {
        bail!("ph must be between 0 and 14");
    }
    for (name, value) in &fields[1..7] {
        if value.is_some_and(|v| v < 0.0) {
            bail!("{name} must not be negative");
        }
    }
    Ok(())
}

pub fn validate_organism(organism: &NewOrganism) -> Result<()> {
    if organism.species_name.trim().is_empty() {
        bail!("Species name must not be empty");
    }
    if organism.quantity <= 0 {
        bail!("quantity must be greater than 0");
    }
    Ok(())
}
