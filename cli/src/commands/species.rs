use anyhow::{Result, bail};
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use aquakeeper_core::models::{OrganismKind, SpeciesProfile};
use aquakeeper_core::species::SpeciesTable;

use super::helpers::{fmt_opt, fmt_range, truncate};

fn matching<'a>(table: &'a SpeciesTable, kind: Option<&str>) -> Result<Vec<&'a SpeciesProfile>> {
    Ok(match kind {
        Some(kind) => {
            let kind: OrganismKind = kind.parse()?;
            table.of_kind(kind).collect()
        }
        None => table.iter().collect(),
    })
}

pub(crate) fn cmd_species_list(table: &SpeciesTable, kind: Option<&str>, json: bool) -> Result<()> {
    let species = matching(table, kind)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&species)?);
        return Ok(());
    }
    if species.is_empty() {
        eprintln!("No species found.");
        return Ok(());
    }

    #[derive(Tabled)]
    struct SpeciesRow {
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Kind")]
        kind: String,
        #[tabled(rename = "pH")]
        ph: String,
        #[tabled(rename = "GH")]
        gh: String,
        #[tabled(rename = "Temp °C")]
        temp: String,
        #[tabled(rename = "Also known as")]
        aliases: String,
    }

    let rows: Vec<SpeciesRow> = species
        .iter()
        .map(|s| SpeciesRow {
            name: s.common_name.clone(),
            kind: s.kind.to_string(),
            ph: fmt_range(s.ph),
            gh: fmt_range(s.gh),
            temp: fmt_range(s.temperature_c),
            aliases: truncate(&s.aliases.join(", "), 30),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(2..5)).with(Alignment::right()))
        .to_string();
    println!("{table}");

    Ok(())
}

pub(crate) fn cmd_species_show(table: &SpeciesTable, name: &str, json: bool) -> Result<()> {
    let Some(profile) = table.find(name) else {
        bail!("Species '{name}' is not in the species table");
    };

    if json {
        println!("{}", serde_json::to_string_pretty(profile)?);
        return Ok(());
    }

    println!("{} ({})", profile.common_name, profile.kind);
    if !profile.aliases.is_empty() {
        println!("  Also known as: {}", profile.aliases.join(", "));
    }
    println!("  pH:          {}", fmt_range(profile.ph));
    println!("  GH:          {}", fmt_range(profile.gh));
    println!("  KH:          {}", fmt_range(profile.kh));
    println!("  Temperature: {} °C", fmt_range(profile.temperature_c));
    match profile.kind {
        OrganismKind::Fish => {
            println!("  NO2 max:     {} mg/L", fmt_opt(profile.no2_max));
            println!("  NH3 max:     {} mg/L", fmt_opt(profile.nh3_max));
        }
        OrganismKind::Plant => {
            println!("  NO3:         {} mg/L", fmt_range(profile.no3));
            println!("  PO4:         {} mg/L", fmt_range(profile.po4));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matching_by_kind() {
        let table = SpeciesTable::builtin().unwrap();
        let all = matching(&table, None).unwrap();
        let fish = matching(&table, Some("fish")).unwrap();
        let plants = matching(&table, Some("растение")).unwrap();
        assert_eq!(all.len(), table.len());
        assert_eq!(fish.len() + plants.len(), all.len());
        assert!(fish.iter().all(|s| s.kind == OrganismKind::Fish));
        assert!(matching(&table, Some("coral")).is_err());
    }

    #[test]
    fn test_show_unknown_species_fails() {
        let table = SpeciesTable::builtin().unwrap();
        assert!(cmd_species_show(&table, "заврик", true).is_err());
        assert!(cmd_species_show(&table, "Guppy", true).is_ok());
    }
}
