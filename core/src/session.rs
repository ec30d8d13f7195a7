//! Per-user multi-step conversations.
//!
//! A [`Session`] walks one [`Flow`]'s step table, collecting one typed value
//! per inbound message. Sessions live in a [`SessionStore`]; a user without a
//! stored session is idle.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::FlowError;
use crate::models::OrganismKind;

/// Token accepted at optional steps to leave the field empty.
pub const SKIP_TOKEN: &str = "-";

const MAX_TEXT_LEN: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flow {
    AddAquarium,
    AddMeasurement,
    AddOrganism,
    DeleteAquarium,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldKind {
    Text { optional: bool },
    Number { min: f64, max: f64, optional: bool },
    Count,
    /// An aquarium id, or [`SKIP_TOKEN`] for the user's active aquarium.
    AquariumRef,
    OrganismKind,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Step {
    pub field: &'static str,
    pub prompt: &'static str,
    pub kind: FieldKind,
}

const fn reading(field: &'static str, prompt: &'static str, min: f64, max: f64) -> Step {
    Step {
        field,
        prompt,
        kind: FieldKind::Number {
            min,
            max,
            optional: true,
        },
    }
}

const ADD_AQUARIUM: &[Step] = &[
    Step {
        field: "name",
        prompt: "Name of the aquarium?",
        kind: FieldKind::Text { optional: false },
    },
    Step {
        field: "volume_l",
        prompt: "Volume in litres? (- to skip)",
        kind: FieldKind::Number {
            min: f64::MIN_POSITIVE,
            max: f64::MAX,
            optional: true,
        },
    },
    Step {
        field: "description",
        prompt: "Short description? (- to skip)",
        kind: FieldKind::Text { optional: true },
    },
];

const ADD_MEASUREMENT: &[Step] = &[
    Step {
        field: "aquarium_id",
        prompt: "Aquarium id? (- for the active aquarium)",
        kind: FieldKind::AquariumRef,
    },
    reading("ph", "pH? (- to skip)", 0.0, 14.0),
    reading("kh", "KH, °dKH? (- to skip)", 0.0, f64::MAX),
    reading("gh", "GH, °dGH? (- to skip)", 0.0, f64::MAX),
    reading("no2", "NO2, mg/L? (- to skip)", 0.0, f64::MAX),
    reading("no3", "NO3, mg/L? (- to skip)", 0.0, f64::MAX),
    reading("tan", "Total ammonia (NH3/NH4), mg/L? (- to skip)", 0.0, f64::MAX),
    reading("po4", "PO4, mg/L? (- to skip)", 0.0, f64::MAX),
    reading("temperature_c", "Water temperature, °C? (- to skip)", -5.0, 50.0),
];

const ADD_ORGANISM: &[Step] = &[
    Step {
        field: "kind",
        prompt: "Fish or plant?",
        kind: FieldKind::OrganismKind,
    },
    Step {
        field: "species_name",
        prompt: "Species name?",
        kind: FieldKind::Text { optional: false },
    },
    Step {
        field: "quantity",
        prompt: "How many?",
        kind: FieldKind::Count,
    },
];

const DELETE_AQUARIUM: &[Step] = &[Step {
    field: "aquarium_id",
    prompt: "Id of the aquarium to delete? (- for the active aquarium)",
    kind: FieldKind::AquariumRef,
}];

impl Flow {
    #[must_use]
    pub fn steps(self) -> &'static [Step] {
        match self {
            Self::AddAquarium => ADD_AQUARIUM,
            Self::AddMeasurement => ADD_MEASUREMENT,
            Self::AddOrganism => ADD_ORGANISM,
            Self::DeleteAquarium => DELETE_AQUARIUM,
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::AddAquarium => "add-aquarium",
            Self::AddMeasurement => "add-measurement",
            Self::AddOrganism => "add-organism",
            Self::DeleteAquarium => "delete-aquarium",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Integer(i64),
    Kind(OrganismKind),
    ActiveAquarium,
    Skipped,
}

/// Values collected so far, keyed by step field name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlowData(BTreeMap<&'static str, FieldValue>);

impl FlowData {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: &'static str, value: FieldValue) {
        self.0.insert(field, value);
    }

    #[must_use]
    pub fn with(mut self, field: &'static str, value: FieldValue) -> Self {
        self.insert(field, value);
        self
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.0.get(field)
    }

    #[must_use]
    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn number(&self, field: &str) -> Option<f64> {
        match self.get(field) {
            Some(FieldValue::Number(n)) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn integer(&self, field: &str) -> Option<i64> {
        match self.get(field) {
            Some(FieldValue::Integer(n)) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn text(&self, field: &str) -> Option<&str> {
        match self.get(field) {
            Some(FieldValue::Text(s)) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn kind(&self, field: &str) -> Option<OrganismKind> {
        match self.get(field) {
            Some(FieldValue::Kind(k)) => Some(*k),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pub flow: Flow,
    pub step: usize,
    pub data: FlowData,
    pub touched_at: Instant,
}

#[derive(Debug)]
pub enum StepOutcome {
    /// Input refused; the returned session is unchanged.
    Rejected { session: Session, error: FlowError },
    Advanced(Session),
    Completed { flow: Flow, data: FlowData },
}

impl Session {
    #[must_use]
    pub fn start(flow: Flow) -> Self {
        Self::start_with(flow, FlowData::new())
    }

    /// Start a flow with some fields already known; the session begins at the
    /// first step whose field is missing.
    #[must_use]
    pub fn start_with(flow: Flow, prefill: FlowData) -> Self {
        let mut session = Self {
            flow,
            step: 0,
            data: prefill,
            touched_at: Instant::now(),
        };
        session.skip_filled();
        session
    }

    fn skip_filled(&mut self) {
        let steps = self.flow.steps();
        while self.step < steps.len() && self.data.contains(steps[self.step].field) {
            self.step += 1;
        }
    }

    #[must_use]
    pub fn current_step(&self) -> Option<&'static Step> {
        self.flow.steps().get(self.step)
    }

    #[must_use]
    pub fn prompt(&self) -> &'static str {
        self.current_step().map_or("", |s| s.prompt)
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.current_step().is_none()
    }

    /// Feed one inbound message to the current step.
    #[must_use]
    pub fn feed(mut self, input: &str) -> StepOutcome {
        let Some(step) = self.current_step() else {
            return StepOutcome::Completed {
                flow: self.flow,
                data: self.data,
            };
        };
        match parse_field(step.kind, input) {
            Err(error) => {
                debug!(flow = self.flow.name(), field = step.field, "rejected input");
                StepOutcome::Rejected {
                    session: self,
                    error,
                }
            }
            Ok(value) => {
                self.data.insert(step.field, value);
                self.step += 1;
                self.skip_filled();
                self.touched_at = Instant::now();
                if self.is_complete() {
                    debug!(flow = self.flow.name(), "flow complete");
                    StepOutcome::Completed {
                        flow: self.flow,
                        data: self.data,
                    }
                } else {
                    debug!(flow = self.flow.name(), step = self.step, "advanced");
                    StepOutcome::Advanced(self)
                }
            }
        }
    }
}

/// Parse a user-typed number, accepting a decimal comma. Non-finite values are refused.
pub fn parse_number(input: &str) -> Result<f64, FlowError> {
    let normalized = input.trim().replace(',', ".");
    let value: f64 = normalized
        .parse()
        .map_err(|_| FlowError::MalformedInput(format!("'{}' is not a number", input.trim())))?;
    if !value.is_finite() {
        return Err(FlowError::MalformedInput(format!(
            "'{}' is not a finite number",
            input.trim()
        )));
    }
    Ok(value)
}

pub fn parse_count(input: &str) -> Result<i64, FlowError> {
    let value: i64 = input.trim().parse().map_err(|_| {
        FlowError::MalformedInput(format!("'{}' is not a whole number", input.trim()))
    })?;
    if value <= 0 {
        return Err(FlowError::MalformedInput(
            "The number must be greater than 0".to_string(),
        ));
    }
    Ok(value)
}

pub fn parse_field(kind: FieldKind, input: &str) -> Result<FieldValue, FlowError> {
    let input = input.trim();
    match kind {
        FieldKind::Text { optional } => {
            if optional && input == SKIP_TOKEN {
                return Ok(FieldValue::Skipped);
            }
            if input.is_empty() {
                return Err(FlowError::MalformedInput("Text must not be empty".to_string()));
            }
            if input.chars().count() > MAX_TEXT_LEN {
                return Err(FlowError::MalformedInput(format!(
                    "Text must be at most {MAX_TEXT_LEN} characters"
                )));
            }
            Ok(FieldValue::Text(input.to_string()))
        }
        FieldKind::Number { min, max, optional } => {
            if optional && input == SKIP_TOKEN {
                return Ok(FieldValue::Skipped);
            }
            let value = parse_number(input)?;
            if value < min || value > max {
                let message = if max == f64::MAX {
                    if min > 0.0 {
                        "The value must be greater than 0".to_string()
                    } else {
                        format!("The value must be at least {min}")
                    }
                } else {
                    format!("The value must be between {min} and {max}")
                };
                return Err(FlowError::MalformedInput(message));
            }
            Ok(FieldValue::Number(value))
        }
        FieldKind::Count => parse_count(input).map(FieldValue::Integer),
        FieldKind::AquariumRef => {
            if input == SKIP_TOKEN {
                return Ok(FieldValue::ActiveAquarium);
            }
            parse_count(input)
                .map(FieldValue::Integer)
                .map_err(|_| FlowError::MalformedInput(format!("'{input}' is not an aquarium id")))
        }
        FieldKind::OrganismKind => input
            .parse::<OrganismKind>()
            .map(FieldValue::Kind)
            .map_err(|e| FlowError::MalformedInput(e.to_string())),
    }
}

/// Storage for in-progress sessions, one slot per user.
pub trait SessionStore: Send + Sync {
    fn get(&self, user_id: i64) -> Option<Session>;
    fn put(&self, user_id: i64, session: Session);
    fn evict(&self, user_id: i64) -> Option<Session>;
    /// Drop sessions untouched for at least `max_idle`. Returns how many were dropped.
    fn evict_stale(&self, max_idle: Duration) -> usize;
}

const DEFAULT_SHARDS: usize = 16;

/// In-memory store split into independently locked shards, so users on
/// different shards never wait on each other.
pub struct ShardedSessionStore {
    shards: Vec<Mutex<HashMap<i64, Session>>>,
}

impl Default for ShardedSessionStore {
    fn default() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }
}

impl ShardedSessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_shards(count: usize) -> Self {
        let shards = (0..count.max(1))
            .map(|_| Mutex::new(HashMap::new()))
            .collect();
        Self { shards }
    }

    fn shard(&self, user_id: i64) -> &Mutex<HashMap<i64, Session>> {
        let mut hasher = DefaultHasher::new();
        user_id.hash(&mut hasher);
        let idx = (hasher.finish() % self.shards.len() as u64) as usize;
        &self.shards[idx]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.lock().unwrap_or_else(PoisonError::into_inner).len())
            .sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SessionStore for ShardedSessionStore {
    fn get(&self, user_id: i64) -> Option<Session> {
        self.shard(user_id)
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&user_id)
            .cloned()
    }

    fn put(&self, user_id: i64, mut session: Session) {
        session.touched_at = Instant::now();
        self.shard(user_id)
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(user_id, session);
    }

    fn evict(&self, user_id: i64) -> Option<Session> {
        self.shard(user_id)
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&user_id)
    }

    fn evict_stale(&self, max_idle: Duration) -> usize {
        let mut evicted = 0;
        for shard in &self.shards {
            let mut sessions = shard.lock().unwrap_or_else(PoisonError::into_inner);
            let before = sessions.len();
            sessions.retain(|_, s| s.touched_at.elapsed() < max_idle);
            evicted += before - sessions.len();
        }
        evicted
    }
}
