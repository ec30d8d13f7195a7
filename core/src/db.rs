use std::path::Path;

use anyhow::{Context, Result};
use chrono::{Local, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use crate::models::{
    Aquarium, Measurement, NewAquarium, NewMeasurement, NewOrganism, Organism, OrganismKind,
};

const MEASUREMENT_COLUMNS: &str = "id, uuid, aquarium_id, measured_at, ph, kh, gh, no2, no3, po4,
     tan, temperature_c, nh3_mg_l, nh4_mg_l";

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS aquariums (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    owner_id INTEGER NOT NULL,
                    name TEXT NOT NULL,
                    volume_l REAL,
                    description TEXT,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS measurements (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    uuid TEXT NOT NULL UNIQUE,
                    aquarium_id INTEGER NOT NULL REFERENCES aquariums(id),
                    measured_at TEXT NOT NULL,
                    ph REAL,
                    kh REAL,
                    gh REAL,
                    no2 REAL,
                    no3 REAL,
                    po4 REAL,
                    tan REAL,
                    temperature_c REAL,
                    nh3_mg_l REAL,
                    nh4_mg_l REAL
                );

                CREATE TABLE IF NOT EXISTS organisms (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    aquarium_id INTEGER NOT NULL REFERENCES aquariums(id),
                    kind TEXT NOT NULL CHECK (kind IN ('fish', 'plant')),
                    species_name TEXT NOT NULL,
                    quantity INTEGER NOT NULL CHECK (quantity > 0),
                    added_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_aquariums_owner ON aquariums(owner_id);
                CREATE INDEX IF NOT EXISTS idx_measurements_aquarium
                    ON measurements(aquarium_id, measured_at);
                CREATE INDEX IF NOT EXISTS idx_organisms_aquarium ON organisms(aquarium_id);

                PRAGMA user_version = 1;",
            )?;
        }

        if version < 2 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS active_aquariums (
                    owner_id INTEGER PRIMARY KEY NOT NULL,
                    aquarium_id INTEGER NOT NULL REFERENCES aquariums(id),
                    updated_at TEXT NOT NULL
                );

                PRAGMA user_version = 2;",
            )?;
        }

        Ok(())
    }

    // --- Row mapping helpers ---

    fn aquarium_from_row(row: &rusqlite::Row) -> rusqlite::Result<Aquarium> {
        Ok(Aquarium {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            name: row.get(2)?,
            volume_l: row.get(3)?,
            description: row.get(4)?,
            created_at: row.get(5)?,
        })
    }

    fn measurement_from_row(row: &rusqlite::Row) -> rusqlite::Result<Measurement> {
        Ok(Measurement {
            id: row.get(0)?,
            uuid: row.get(1)?,
            aquarium_id: row.get(2)?,
            measured_at: row.get(3)?,
            ph: row.get(4)?,
            kh: row.get(5)?,
            gh: row.get(6)?,
            no2: row.get(7)?,
            no3: row.get(8)?,
            po4: row.get(9)?,
            tan: row.get(10)?,
            temperature_c: row.get(11)?,
            nh3_mg_l: row.get(12)?,
            nh4_mg_l: row.get(13)?,
        })
    }

    fn organism_from_row(row: &rusqlite::Row) -> rusqlite::Result<Organism> {
        let kind: String = row.get(2)?;
        let kind = if kind == "plant" {
            OrganismKind::Plant
        } else {
            OrganismKind::Fish
        };
        Ok(Organism {
            id: row.get(0)?,
            aquarium_id: row.get(1)?,
            kind,
            species_name: row.get(3)?,
            quantity: row.get(4)?,
            added_at: row.get(5)?,
        })
    }

    // --- Aquariums ---

    pub fn insert_aquarium(&self, aquarium: &NewAquarium) -> Result<Aquarium> {
        let now = Local::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO aquariums (owner_id, name, volume_l, description, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                aquarium.owner_id,
                aquarium.name.trim(),
                aquarium.volume_l,
                aquarium.description,
                now
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        self.get_aquarium(id)?
            .context("Aquarium not found after insert")
    }

    pub fn get_aquarium(&self, id: i64) -> Result<Option<Aquarium>> {
        let aquarium = self
            .conn
            .query_row(
                "SELECT id, owner_id, name, volume_l, description, created_at
                 FROM aquariums WHERE id = ?1",
                params![id],
                Self::aquarium_from_row,
            )
            .optional()?;
        Ok(aquarium)
    }

    /// Fetch an aquarium only if it belongs to `owner_id`.
    pub fn get_owned_aquarium(&self, owner_id: i64, id: i64) -> Result<Option<Aquarium>> {
        Ok(self.get_aquarium(id)?.filter(|a| a.owner_id == owner_id))
    }

    pub fn list_aquariums(&self, owner_id: i64) -> Result<Vec<Aquarium>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, owner_id, name, volume_l, description, created_at
             FROM aquariums WHERE owner_id = ?1 ORDER BY id",
        )?;
        let aquariums = stmt
            .query_map(params![owner_id], Self::aquarium_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(aquariums)
    }

    /// Delete an owned aquarium together with its measurements, organisms and
    /// any active-aquarium pointer to it. Returns false if nothing matched.
    pub fn delete_aquarium(&self, owner_id: i64, id: i64) -> Result<bool> {
        let tx = self.conn.unchecked_transaction()?;
        let owned: bool = tx
            .query_row(
                "SELECT COUNT(*) FROM aquariums WHERE id = ?1 AND owner_id = ?2",
                params![id, owner_id],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n > 0)?;
        if !owned {
            return Ok(false);
        }
        tx.execute(
            "DELETE FROM active_aquariums WHERE aquarium_id = ?1",
            params![id],
        )?;
        tx.execute("DELETE FROM organisms WHERE aquarium_id = ?1", params![id])?;
        tx.execute("DELETE FROM measurements WHERE aquarium_id = ?1", params![id])?;
        tx.execute("DELETE FROM aquariums WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(true)
    }

    // --- Active aquarium pointer ---

    pub fn set_active_aquarium(&self, owner_id: i64, aquarium_id: i64) -> Result<()> {
        let now = Local::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO active_aquariums (owner_id, aquarium_id, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(owner_id) DO UPDATE SET
                aquarium_id = excluded.aquarium_id,
                updated_at = excluded.updated_at",
            params![owner_id, aquarium_id, now],
        )?;
        Ok(())
    }

    pub fn get_active_aquarium(&self, owner_id: i64) -> Result<Option<Aquarium>> {
        let aquarium = self
            .conn
            .query_row(
                "SELECT a.id, a.owner_id, a.name, a.volume_l, a.description, a.created_at
                 FROM active_aquariums p
                 JOIN aquariums a ON a.id = p.aquarium_id
                 WHERE p.owner_id = ?1",
                params![owner_id],
                Self::aquarium_from_row,
            )
            .optional()?;
        Ok(aquarium)
    }

    // --- Measurements ---

    /// Insert a measurement, deriving NH3/NH4+ when TAN, pH and temperature are present.
    pub fn insert_measurement(&self, m: &NewMeasurement) -> Result<Measurement> {
        let uuid = Uuid::new_v4().to_string();
        let measured_at = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        let ammonia = m.ammonia();
        self.conn.execute(
            "INSERT INTO measurements (uuid, aquarium_id, measured_at, ph, kh, gh, no2, no3, po4,
                                       tan, temperature_c, nh3_mg_l, nh4_mg_l)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                uuid,
                m.aquarium_id,
                measured_at,
                m.ph,
                m.kh,
                m.gh,
                m.no2,
                m.no3,
                m.po4,
                m.tan,
                m.temperature_c,
                ammonia.map(|a| a.nh3),
                ammonia.map(|a| a.nh4),
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        self.get_measurement(id)
    }

    pub fn get_measurement(&self, id: i64) -> Result<Measurement> {
        self.conn
            .query_row(
                &format!("SELECT {MEASUREMENT_COLUMNS} FROM measurements WHERE id = ?1"),
                params![id],
                Self::measurement_from_row,
            )
            .with_context(|| format!("Measurement {id} not found"))
    }

    pub fn latest_measurement(&self, aquarium_id: i64) -> Result<Option<Measurement>> {
        let measurement = self
            .conn
            .query_row(
                &format!(
                    "SELECT {MEASUREMENT_COLUMNS} FROM measurements
                     WHERE aquarium_id = ?1
                     ORDER BY measured_at DESC, id DESC LIMIT 1"
                ),
                params![aquarium_id],
                Self::measurement_from_row,
            )
            .optional()?;
        Ok(measurement)
    }

    /// Measurements in chronological order; `limit` keeps only the most recent N.
    pub fn measurement_history(
        &self,
        aquarium_id: i64,
        limit: Option<i64>,
    ) -> Result<Vec<Measurement>> {
        let limit = limit.unwrap_or(-1);
        let mut stmt = self.conn.prepare(&format!(
            "SELECT * FROM (
                SELECT {MEASUREMENT_COLUMNS} FROM measurements
                WHERE aquarium_id = ?1
                ORDER BY measured_at DESC, id DESC LIMIT ?2
             ) ORDER BY measured_at ASC, id ASC"
        ))?;
        let measurements = stmt
            .query_map(params![aquarium_id, limit], Self::measurement_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(measurements)
    }

    // --- Organisms ---

    pub fn insert_organism(&self, organism: &NewOrganism) -> Result<Organism> {
        let now = Local::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO organisms (aquarium_id, kind, species_name, quantity, added_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                organism.aquarium_id,
                organism.kind.as_str(),
                organism.species_name.trim(),
                organism.quantity,
                now
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        self.conn
            .query_row(
                "SELECT id, aquarium_id, kind, species_name, quantity, added_at
                 FROM organisms WHERE id = ?1",
                params![id],
                Self::organism_from_row,
            )
            .context("Organism not found after insert")
    }

    pub fn list_organisms(&self, aquarium_id: i64) -> Result<Vec<Organism>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, aquarium_id, kind, species_name, quantity, added_at
             FROM organisms WHERE aquarium_id = ?1 ORDER BY id",
        )?;
        let organisms = stmt
            .query_map(params![aquarium_id], Self::organism_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(organisms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_aquarium(owner_id: i64) -> NewAquarium {
        NewAquarium {
            owner_id,
            name: "Living room".to_string(),
            volume_l: Some(120.0),
            description: None,
        }
    }

    fn sample_measurement(aquarium_id: i64) -> NewMeasurement {
        NewMeasurement {
            aquarium_id,
            ph: Some(7.2),
            kh: Some(4.0),
            gh: Some(8.0),
            no2: Some(0.02),
            no3: Some(10.0),
            po4: Some(0.5),
            tan: Some(0.2),
            temperature_c: Some(25.0),
        }
    }

    #[test]
    fn test_insert_and_get_aquarium() {
        let db = Database::open_in_memory().unwrap();
        let aq = db.insert_aquarium(&sample_aquarium(42)).unwrap();
        assert_eq!(aq.owner_id, 42);
        assert_eq!(aq.name, "Living room");
        assert_eq!(aq.volume_l, Some(120.0));

        let fetched = db.get_aquarium(aq.id).unwrap().unwrap();
        assert_eq!(fetched.id, aq.id);
        assert!(db.get_aquarium(999).unwrap().is_none());
    }

    #[test]
    fn test_owned_aquarium_checks_owner() {
        let db = Database::open_in_memory().unwrap();
        let aq = db.insert_aquarium(&sample_aquarium(1)).unwrap();
        assert!(db.get_owned_aquarium(1, aq.id).unwrap().is_some());
        assert!(db.get_owned_aquarium(2, aq.id).unwrap().is_none());
    }

    #[test]
    fn test_list_aquariums_by_owner() {
        let db = Database::open_in_memory().unwrap();
        db.insert_aquarium(&sample_aquarium(1)).unwrap();
        db.insert_aquarium(&sample_aquarium(1)).unwrap();
        db.insert_aquarium(&sample_aquarium(2)).unwrap();
        assert_eq!(db.list_aquariums(1).unwrap().len(), 2);
        assert_eq!(db.list_aquariums(2).unwrap().len(), 1);
        assert!(db.list_aquariums(3).unwrap().is_empty());
    }

    #[test]
    fn test_insert_measurement_derives_ammonia() {
        let db = Database::open_in_memory().unwrap();
        let aq = db.insert_aquarium(&sample_aquarium(1)).unwrap();
        let m = db.insert_measurement(&sample_measurement(aq.id)).unwrap();

        assert_eq!(m.aquarium_id, aq.id);
        assert!(!m.uuid.is_empty());
        let nh3 = m.nh3_mg_l.unwrap();
        let nh4 = m.nh4_mg_l.unwrap();
        assert!((nh3 + nh4 - 0.2).abs() < 1e-9);
        assert!(nh3 > 0.0 && nh3 < 0.01);
    }

    #[test]
    fn test_insert_measurement_without_temperature_has_no_ammonia() {
        let db = Database::open_in_memory().unwrap();
        let aq = db.insert_aquarium(&sample_aquarium(1)).unwrap();
        let mut new = sample_measurement(aq.id);
        new.temperature_c = None;
        let m = db.insert_measurement(&new).unwrap();
        assert_eq!(m.tan, Some(0.2));
        assert!(m.nh3_mg_l.is_none());
        assert!(m.nh4_mg_l.is_none());
    }

    #[test]
    fn test_latest_measurement() {
        let db = Database::open_in_memory().unwrap();
        let aq = db.insert_aquarium(&sample_aquarium(1)).unwrap();
        assert!(db.latest_measurement(aq.id).unwrap().is_none());

        db.insert_measurement(&sample_measurement(aq.id)).unwrap();
        let mut second = sample_measurement(aq.id);
        second.ph = Some(6.8);
        let inserted = db.insert_measurement(&second).unwrap();

        let latest = db.latest_measurement(aq.id).unwrap().unwrap();
        assert_eq!(latest.id, inserted.id);
        assert_eq!(latest.ph, Some(6.8));
    }

    #[test]
    fn test_measurement_history_is_chronological() {
        let db = Database::open_in_memory().unwrap();
        let aq = db.insert_aquarium(&sample_aquarium(1)).unwrap();
        for ph in [6.5, 6.8, 7.1] {
            let mut m = sample_measurement(aq.id);
            m.ph = Some(ph);
            db.insert_measurement(&m).unwrap();
        }

        let all = db.measurement_history(aq.id, None).unwrap();
        let phs: Vec<f64> = all.iter().filter_map(|m| m.ph).collect();
        assert_eq!(phs, vec![6.5, 6.8, 7.1]);

        let last_two = db.measurement_history(aq.id, Some(2)).unwrap();
        let phs: Vec<f64> = last_two.iter().filter_map(|m| m.ph).collect();
        assert_eq!(phs, vec![6.8, 7.1]);
    }

    #[test]
    fn test_active_aquarium_pointer() {
        let db = Database::open_in_memory().unwrap();
        let a = db.insert_aquarium(&sample_aquarium(1)).unwrap();
        let b = db.insert_aquarium(&sample_aquarium(1)).unwrap();
        assert!(db.get_active_aquarium(1).unwrap().is_none());

        db.set_active_aquarium(1, a.id).unwrap();
        assert_eq!(db.get_active_aquarium(1).unwrap().unwrap().id, a.id);

        db.set_active_aquarium(1, b.id).unwrap();
        assert_eq!(db.get_active_aquarium(1).unwrap().unwrap().id, b.id);
        assert!(db.get_active_aquarium(2).unwrap().is_none());
    }

    #[test]
    fn test_delete_aquarium_cascades() {
        let db = Database::open_in_memory().unwrap();
        let aq = db.insert_aquarium(&sample_aquarium(1)).unwrap();
        db.set_active_aquarium(1, aq.id).unwrap();
        db.insert_measurement(&sample_measurement(aq.id)).unwrap();
        db.insert_organism(&NewOrganism {
            aquarium_id: aq.id,
            kind: OrganismKind::Fish,
            species_name: "неон".to_string(),
            quantity: 10,
        })
        .unwrap();

        // Someone else cannot delete it
        assert!(!db.delete_aquarium(2, aq.id).unwrap());

        assert!(db.delete_aquarium(1, aq.id).unwrap());
        assert!(db.get_aquarium(aq.id).unwrap().is_none());
        assert!(db.get_active_aquarium(1).unwrap().is_none());
        assert!(db.latest_measurement(aq.id).unwrap().is_none());
        assert!(db.list_organisms(aq.id).unwrap().is_empty());
    }

    #[test]
    fn test_insert_and_list_organisms() {
        let db = Database::open_in_memory().unwrap();
        let aq = db.insert_aquarium(&sample_aquarium(1)).unwrap();
        let fish = db
            .insert_organism(&NewOrganism {
                aquarium_id: aq.id,
                kind: OrganismKind::Fish,
                species_name: " гуппи ".to_string(),
                quantity: 5,
            })
            .unwrap();
        assert_eq!(fish.species_name, "гуппи");
        assert_eq!(fish.kind, OrganismKind::Fish);

        db.insert_organism(&NewOrganism {
            aquarium_id: aq.id,
            kind: OrganismKind::Plant,
            species_name: "анубиас".to_string(),
            quantity: 2,
        })
        .unwrap();

        let all = db.list_organisms(aq.id).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].kind, OrganismKind::Plant);
    }

    #[test]
    fn test_migration_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aq.db");
        {
            let db = Database::open(&path).unwrap();
            db.insert_aquarium(&sample_aquarium(1)).unwrap();
        }
        let db = Database::open(&path).unwrap();
        assert_eq!(db.list_aquariums(1).unwrap().len(), 1);
    }
}
