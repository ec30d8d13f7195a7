use serde::Serialize;

/// Free ammonia concentration above which the bot warns about toxicity.
pub const DEFAULT_NH3_WARNING_MG_L: f64 = 0.05;

const KELVIN_OFFSET: f64 = 273.15;

/// Split of total ammonia nitrogen into its free (NH3) and ionized (NH4+) parts, mg/L.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AmmoniaSplit {
    pub nh3: f64,
    pub nh4: f64,
}

/// Temperature-dependent pKa of the ammonium ion in freshwater (Emerson et al.).
#[must_use]
pub fn ammonium_pka(temperature_c: f64) -> f64 {
    0.09018 + 2729.92 / (KELVIN_OFFSET + temperature_c)
}

/// Fraction of TAN present as unionized NH3, clamped to `[0, 1]`.
#[must_use]
pub fn unionized_fraction(ph: f64, temperature_c: f64) -> f64 {
    let fraction = 1.0 / (1.0 + 10f64.powf(ammonium_pka(temperature_c) - ph));
    fraction.clamp(0.0, 1.0)
}

/// Convert a TAN reading into NH3/NH4+ concentrations.
///
/// Negative `tan` is treated as zero. Inputs must be finite; callers are
/// expected to reject `NaN` and infinities before getting here.
#[must_use]
pub fn unionized_ammonia(ph: f64, temperature_c: f64, tan: f64) -> AmmoniaSplit {
    let tan = tan.max(0.0);
    let nh3 = tan * unionized_fraction(ph, temperature_c);
    AmmoniaSplit {
        nh3,
        nh4: tan - nh3,
    }
}

#[must_use]
pub fn is_toxic(nh3_mg_l: f64, threshold_mg_l: f64) -> bool {
    nh3_mg_l > threshold_mg_l
}
