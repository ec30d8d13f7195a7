use std::path::Path;

use anyhow::Result;
use tracing::{info, warn};

use crate::chemistry::{self, DEFAULT_NH3_WARNING_MG_L};
use crate::compatibility::{self, AdditionPolicy, Verdict};
use crate::db::Database;
use crate::error::FlowError;
use crate::models::{
    Aquarium, Measurement, NewAquarium, NewMeasurement, NewOrganism, Organism, OrganismKind,
    validate_aquarium, validate_measurement, validate_organism,
};
use crate::species::SpeciesTable;

#[derive(Debug, Clone, Copy)]
pub struct ServiceSettings {
    pub addition_policy: AdditionPolicy,
    pub nh3_warning_mg_l: f64,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            addition_policy: AdditionPolicy::Warn,
            nh3_warning_mg_l: DEFAULT_NH3_WARNING_MG_L,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MeasurementReport {
    pub aquarium: Aquarium,
    pub measurement: Measurement,
    /// Free NH3 exceeds the configured warning threshold.
    pub toxic: bool,
}

#[derive(Debug, Clone)]
pub struct OrganismAddition {
    pub aquarium: Aquarium,
    pub organism: Organism,
    pub verdict: Verdict,
}

#[derive(Debug, Clone)]
pub struct CreatedAquarium {
    pub aquarium: Aquarium,
    pub became_active: bool,
}

pub struct AquaService {
    db: Database,
    species: SpeciesTable,
    settings: ServiceSettings,
}

impl AquaService {
    pub fn new(db_path: &Path, species: SpeciesTable, settings: ServiceSettings) -> Result<Self> {
        let db = Database::open(db_path)?;
        Ok(Self {
            db,
            species,
            settings,
        })
    }

    pub fn new_in_memory() -> Result<Self> {
        Ok(Self {
            db: Database::open_in_memory()?,
            species: SpeciesTable::builtin()?,
            settings: ServiceSettings::default(),
        })
    }

    #[must_use]
    pub fn with_settings(mut self, settings: ServiceSettings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn db(&self) -> &Database {
        &self.db
    }

    #[must_use]
    pub fn species(&self) -> &SpeciesTable {
        &self.species
    }

    #[must_use]
    pub fn settings(&self) -> ServiceSettings {
        self.settings
    }

    // --- Aquariums ---

    /// Create an aquarium; the owner's first aquarium becomes their active one.
    pub fn create_aquarium(&self, aquarium: &NewAquarium) -> Result<CreatedAquarium> {
        validate_aquarium(aquarium).map_err(|e| FlowError::MalformedInput(e.to_string()))?;
        let created = self.db.insert_aquarium(aquarium)?;
        let became_active = self.db.get_active_aquarium(aquarium.owner_id)?.is_none();
        if became_active {
            self.db.set_active_aquarium(aquarium.owner_id, created.id)?;
        }
        info!(
            aquarium_id = created.id,
            owner_id = created.owner_id,
            "aquarium created"
        );
        Ok(CreatedAquarium {
            aquarium: created,
            became_active,
        })
    }

    pub fn list_aquariums(&self, owner_id: i64) -> Result<Vec<Aquarium>> {
        self.db.list_aquariums(owner_id)
    }

    pub fn active_aquarium(&self, owner_id: i64) -> Result<Option<Aquarium>> {
        self.db.get_active_aquarium(owner_id)
    }

    /// Resolve an explicit id (must be owned) or fall back to the active aquarium.
    pub fn resolve_aquarium(&self, owner_id: i64, id: Option<i64>) -> Result<Aquarium> {
        match id {
            Some(id) => self
                .db
                .get_owned_aquarium(owner_id, id)?
                .ok_or_else(|| FlowError::UnknownAquarium(id).into()),
            None => self
                .db
                .get_active_aquarium(owner_id)?
                .ok_or_else(|| FlowError::NoActiveAquarium.into()),
        }
    }

    pub fn set_active_aquarium(&self, owner_id: i64, id: i64) -> Result<Aquarium> {
        let aquarium = self.resolve_aquarium(owner_id, Some(id))?;
        self.db.set_active_aquarium(owner_id, aquarium.id)?;
        Ok(aquarium)
    }

    pub fn delete_aquarium(&self, owner_id: i64, id: i64) -> Result<Aquarium> {
        let aquarium = self.resolve_aquarium(owner_id, Some(id))?;
        if !self.db.delete_aquarium(owner_id, aquarium.id)? {
            return Err(FlowError::UnknownAquarium(id).into());
        }
        info!(aquarium_id = id, owner_id, "aquarium deleted");
        Ok(aquarium)
    }

    // --- Measurements ---

    pub fn record_measurement(
        &self,
        owner_id: i64,
        measurement: &NewMeasurement,
    ) -> Result<MeasurementReport> {
        let aquarium = self.resolve_aquarium(owner_id, Some(measurement.aquarium_id))?;
        validate_measurement(measurement).map_err(|e| FlowError::MalformedInput(e.to_string()))?;
        let measurement = self.db.insert_measurement(measurement)?;
        let toxic = measurement
            .nh3_mg_l
            .is_some_and(|nh3| chemistry::is_toxic(nh3, self.settings.nh3_warning_mg_l));
        if toxic {
            warn!(
                aquarium_id = aquarium.id,
                nh3_mg_l = measurement.nh3_mg_l,
                "free ammonia above warning threshold"
            );
        }
        info!(
            aquarium_id = aquarium.id,
            measurement_id = measurement.id,
            "measurement recorded"
        );
        Ok(MeasurementReport {
            aquarium,
            measurement,
            toxic,
        })
    }

    pub fn latest_measurement(&self, aquarium_id: i64) -> Result<Option<Measurement>> {
        self.db.latest_measurement(aquarium_id)
    }

    pub fn measurement_history(
        &self,
        aquarium_id: i64,
        limit: Option<i64>,
    ) -> Result<Vec<Measurement>> {
        self.db.measurement_history(aquarium_id, limit)
    }

    // --- Organisms ---

    /// Evaluate a species against the aquarium's latest measurement without persisting anything.
    pub fn check_compatibility(
        &self,
        aquarium_id: i64,
        kind: OrganismKind,
        species_name: &str,
    ) -> Result<Verdict> {
        let latest = self.db.latest_measurement(aquarium_id)?;
        Ok(compatibility::check(
            &self.species,
            kind,
            species_name,
            latest.as_ref(),
        ))
    }

    /// Add an organism to an owned aquarium. Under [`AdditionPolicy::Block`] an
    /// incompatible verdict fails with [`FlowError::Blocked`] and nothing is stored.
    pub fn add_organism(&self, owner_id: i64, organism: &NewOrganism) -> Result<OrganismAddition> {
        let aquarium = self.resolve_aquarium(owner_id, Some(organism.aquarium_id))?;
        validate_organism(organism).map_err(|e| FlowError::MalformedInput(e.to_string()))?;
        let verdict =
            self.check_compatibility(aquarium.id, organism.kind, &organism.species_name)?;
        if !verdict.compatible && self.settings.addition_policy == AdditionPolicy::Block {
            warn!(
                aquarium_id = aquarium.id,
                species = organism.species_name.as_str(),
                "incompatible addition blocked"
            );
            return Err(FlowError::Blocked(verdict).into());
        }
        // The species table decides the kind of a known species.
        let kind = self
            .species
            .find(&organism.species_name)
            .map_or(organism.kind, |profile| profile.kind);
        let stored = self.db.insert_organism(&NewOrganism {
            kind,
            ..organism.clone()
        })?;
        info!(
            aquarium_id = aquarium.id,
            species = stored.species_name.as_str(),
            compatible = verdict.compatible,
            "organism added"
        );
        Ok(OrganismAddition {
            aquarium,
            organism: stored,
            verdict,
        })
    }

    pub fn list_organisms(&self, aquarium_id: i64) -> Result<Vec<Organism>> {
        self.db.list_organisms(aquarium_id)
    }
}
