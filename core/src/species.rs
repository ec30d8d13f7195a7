use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result, bail};

use crate::models::{OrganismKind, SpeciesProfile};

const BUILTIN_SPECIES: &str = include_str!("../data/species.json");

/// Immutable species reference table, keyed by lowercased common name and aliases.
#[derive(Debug, Clone)]
pub struct SpeciesTable {
    species: Vec<SpeciesProfile>,
    index: HashMap<String, usize>,
}

fn lookup_key(name: &str) -> String {
    name.trim().to_lowercase()
}

impl SpeciesTable {
    pub fn builtin() -> Result<Self> {
        Self::from_json_str(BUILTIN_SPECIES).context("Built-in species table is invalid")
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read species file: {}", path.display()))?;
        Self::from_json_str(&data)
            .with_context(|| format!("Failed to load species file: {}", path.display()))
    }

    pub fn from_json_str(data: &str) -> Result<Self> {
        let species: Vec<SpeciesProfile> =
            serde_json::from_str(data).context("Failed to parse species JSON")?;
        Self::from_profiles(species)
    }

    pub fn from_profiles(species: Vec<SpeciesProfile>) -> Result<Self> {
        let mut index = HashMap::new();
        for (i, profile) in species.iter().enumerate() {
            if profile.common_name.trim().is_empty() {
                bail!("Species #{i} has an empty common_name");
            }
            let names = std::iter::once(&profile.common_name).chain(profile.aliases.iter());
            for name in names {
                if index.insert(lookup_key(name), i).is_some() {
                    bail!("Duplicate species name '{name}'");
                }
            }
        }
        Ok(Self { species, index })
    }

    /// Case-insensitive exact match on common name or alias.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&SpeciesProfile> {
        self.index.get(&lookup_key(name)).map(|&i| &self.species[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &SpeciesProfile> {
        self.species.iter()
    }

    pub fn of_kind(&self, kind: OrganismKind) -> impl Iterator<Item = &SpeciesProfile> {
        self.species.iter().filter(move |s| s.kind == kind)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.species.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.species.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_table_loads() {
        let table = SpeciesTable::builtin().unwrap();
        assert!(!table.is_empty());
        assert!(table.of_kind(OrganismKind::Fish).count() > 0);
        assert!(table.of_kind(OrganismKind::Plant).count() > 0);
    }

    #[test]
    fn test_find_is_case_insensitive() {
        let table = SpeciesTable::builtin().unwrap();
        let neon = table.find("НЕОН").unwrap();
        assert_eq!(neon.common_name, "неон");
        assert_eq!(neon.kind, OrganismKind::Fish);
        assert_eq!(table.find("  Neon Tetra ").unwrap().common_name, "неон");
    }

    #[test]
    fn test_find_unknown() {
        let table = SpeciesTable::builtin().unwrap();
        assert!(table.find("заврик").is_none());
        assert!(table.find("").is_none());
    }

    #[test]
    fn test_duplicate_alias_rejected() {
        let json = r#"[
            {"common_name": "a", "aliases": ["x"], "kind": "fish"},
            {"common_name": "X", "kind": "plant"}
        ]"#;
        let err = SpeciesTable::from_json_str(json).unwrap_err();
        assert!(err.to_string().contains("Duplicate"));
    }

    #[test]
    fn test_optional_ranges_default_to_none() {
        let json = r#"[{"common_name": "mystery", "kind": "plant"}]"#;
        let table = SpeciesTable::from_json_str(json).unwrap();
        let p = table.find("mystery").unwrap();
        assert!(p.ph.is_none());
        assert!(p.no3.is_none());
    }
}
