//! Inbound text dispatch: fixed command tokens first, then the user's active
//! flow, otherwise a generic hint.

use anyhow::Result;
use chrono::DateTime;
use tracing::{debug, error};

use crate::chemistry;
use crate::compatibility::Verdict;
use crate::error::FlowError;
use crate::models::{
    Aquarium, Measurement, NewAquarium, NewMeasurement, NewOrganism, OrganismKind,
    validate_measurement_param,
};
use crate::service::{AquaService, CreatedAquarium, MeasurementReport, OrganismAddition};
use crate::session::{
    FieldKind, FieldValue, Flow, FlowData, Session, SessionStore, ShardedSessionStore,
    StepOutcome, parse_count, parse_field,
};

const HISTORY_LIMIT: i64 = 30;

pub const HELP_TEXT: &str = "\
Aquarium water log.

/add_aq [name volume] - add an aquarium
/add_test [aq ph kh gh no2 no3 tan po4 temp] - record a water test
/add_fish [name qty], /add_plant [name qty] - add livestock to the active aquarium
/delete_aq [id] - delete an aquarium
/aquariums - list your aquariums
/use <id> - switch the active aquarium
/latest [id] - latest water test
/history <param> [id] - values of one parameter over time
/organisms [id] - fish and plants in an aquarium
/check <name> - check a species against the current water
/cancel - abandon the current step-by-step entry

Send - to skip an optional value or to use the active aquarium.";

const GENERIC_FAILURE: &str = "Something went wrong while saving. Please try again.";

/// Top-level actions recognized before any flow input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Cancel,
    AddAquarium(String),
    AddMeasurement(String),
    AddOrganism {
        kind: Option<OrganismKind>,
        args: String,
    },
    DeleteAquarium(String),
    ListAquariums,
    Use(String),
    Latest(String),
    History(String),
    Organisms(String),
    Check(String),
    /// A slash command that is not recognized.
    Unknown(String),
}

impl Command {
    /// Parse a slash command (an `@botname` suffix is ignored) or a menu label.
    /// Returns `None` for anything else, which is then treated as flow input.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if let Some(rest) = text.strip_prefix('/') {
            let (token, args) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
            let token = token.split('@').next().unwrap_or(token).to_lowercase();
            let args = args.trim().to_string();
            return Some(match token.as_str() {
                "start" | "help" => Self::Help,
                "cancel" => Self::Cancel,
                "add_aq" => Self::AddAquarium(args),
                "add_test" => Self::AddMeasurement(args),
                "add_fish" => Self::AddOrganism {
                    kind: Some(OrganismKind::Fish),
                    args,
                },
                "add_plant" => Self::AddOrganism {
                    kind: Some(OrganismKind::Plant),
                    args,
                },
                "add_organism" => Self::AddOrganism { kind: None, args },
                "delete_aq" => Self::DeleteAquarium(args),
                "aquariums" => Self::ListAquariums,
                "use" => Self::Use(args),
                "latest" => Self::Latest(args),
                "history" => Self::History(args),
                "organisms" => Self::Organisms(args),
                "check" => Self::Check(args),
                _ => Self::Unknown(token),
            });
        }

        let command = match text.to_lowercase().as_str() {
            "help" => Self::Help,
            "cancel" => Self::Cancel,
            "add aquarium" => Self::AddAquarium(String::new()),
            "add measurement" => Self::AddMeasurement(String::new()),
            "add fish" => Self::AddOrganism {
                kind: Some(OrganismKind::Fish),
                args: String::new(),
            },
            "add plant" => Self::AddOrganism {
                kind: Some(OrganismKind::Plant),
                args: String::new(),
            },
            "delete aquarium" => Self::DeleteAquarium(String::new()),
            "my aquariums" => Self::ListAquariums,
            "latest test" => Self::Latest(String::new()),
            _ => return None,
        };
        Some(command)
    }
}

pub struct Bot<S = ShardedSessionStore> {
    sessions: S,
}

impl Default for Bot<ShardedSessionStore> {
    fn default() -> Self {
        Self::new(ShardedSessionStore::new())
    }
}

impl<S: SessionStore> Bot<S> {
    pub fn new(sessions: S) -> Self {
        Self { sessions }
    }

    pub fn sessions(&self) -> &S {
        &self.sessions
    }

    /// Handle one inbound message and return the replies, in order.
    pub fn handle(&self, svc: &AquaService, user_id: i64, text: &str) -> Vec<String> {
        match self.dispatch(svc, user_id, text.trim()) {
            Ok(replies) => replies,
            Err(err) => match err.downcast::<FlowError>() {
                Ok(flow_err) => {
                    debug!(user_id, "flow error: {flow_err}");
                    vec![describe(&flow_err)]
                }
                Err(err) => {
                    error!(user_id, "request failed: {err:#}");
                    vec![GENERIC_FAILURE.to_string()]
                }
            },
        }
    }

    fn dispatch(&self, svc: &AquaService, user_id: i64, text: &str) -> Result<Vec<String>> {
        if let Some(command) = Command::parse(text) {
            if let Command::Unknown(token) = &command {
                let mut reply = format!("Unknown command /{token}. Send /help for the list.");
                if let Some(session) = self.sessions.get(user_id) {
                    reply.push('\n');
                    reply.push_str(session.prompt());
                }
                return Ok(vec![reply]);
            }
            if let Some(old) = self.sessions.evict(user_id) {
                debug!(user_id, flow = old.flow.name(), "flow abandoned by command");
            }
            return self.run_command(svc, user_id, command);
        }

        match self.sessions.get(user_id) {
            Some(session) => self.continue_flow(svc, user_id, session, text),
            None => Err(FlowError::UnknownFlow.into()),
        }
    }

    fn start_flow(&self, user_id: i64, flow: Flow, prefill: FlowData) -> Vec<String> {
        let session = Session::start_with(flow, prefill);
        let prompt = session.prompt().to_string();
        debug!(user_id, flow = flow.name(), "flow started");
        self.sessions.put(user_id, session);
        vec![prompt]
    }

    fn continue_flow(
        &self,
        svc: &AquaService,
        user_id: i64,
        session: Session,
        text: &str,
    ) -> Result<Vec<String>> {
        let accepted = session.current_step().map(|step| step.kind);
        match session.feed(text) {
            StepOutcome::Rejected { session, error } => {
                let reply = format!("{error}\n{}", session.prompt());
                self.sessions.put(user_id, session);
                Ok(vec![reply])
            }
            StepOutcome::Advanced(next) => {
                // An aquarium reference is checked as soon as it is given.
                if accepted == Some(FieldKind::AquariumRef) {
                    if let Err(err) = aquarium_from(svc, user_id, &next.data) {
                        self.sessions.evict(user_id);
                        return Err(err);
                    }
                }
                let prompt = next.prompt().to_string();
                self.sessions.put(user_id, next);
                Ok(vec![prompt])
            }
            StepOutcome::Completed { flow, data } => {
                self.sessions.evict(user_id);
                complete(svc, user_id, flow, &data)
            }
        }
    }

    fn run_command(
        &self,
        svc: &AquaService,
        user_id: i64,
        command: Command,
    ) -> Result<Vec<String>> {
        match command {
            Command::Help | Command::Unknown(_) => Ok(vec![HELP_TEXT.to_string()]),
            Command::Cancel => Ok(vec!["Cancelled.".to_string()]),
            Command::AddAquarium(args) => {
                if args.is_empty() {
                    return Ok(self.start_flow(user_id, Flow::AddAquarium, FlowData::new()));
                }
                let data = inline_aquarium(&args)?;
                complete(svc, user_id, Flow::AddAquarium, &data)
            }
            Command::AddMeasurement(args) => {
                if args.is_empty() {
                    return Ok(self.start_flow(user_id, Flow::AddMeasurement, FlowData::new()));
                }
                let data = inline_measurement(&args)?;
                complete(svc, user_id, Flow::AddMeasurement, &data)
            }
            Command::AddOrganism { kind, args } => {
                svc.resolve_aquarium(user_id, None)?;
                let mut data = FlowData::new();
                let Some(kind) = kind else {
                    return Ok(self.start_flow(user_id, Flow::AddOrganism, data));
                };
                data.insert("kind", FieldValue::Kind(kind));
                if args.is_empty() {
                    return Ok(self.start_flow(user_id, Flow::AddOrganism, data));
                }
                let (name, quantity) = inline_organism(&args, kind)?;
                data.insert("species_name", FieldValue::Text(name));
                match quantity {
                    Some(quantity) => {
                        data.insert("quantity", FieldValue::Integer(quantity));
                        complete(svc, user_id, Flow::AddOrganism, &data)
                    }
                    None => Ok(self.start_flow(user_id, Flow::AddOrganism, data)),
                }
            }
            Command::DeleteAquarium(args) => {
                if args.is_empty() {
                    return Ok(self.start_flow(user_id, Flow::DeleteAquarium, FlowData::new()));
                }
                let value = parse_field(FieldKind::AquariumRef, &args)
                    .map_err(|e| usage(&e, "/delete_aq <id>"))?;
                let data = FlowData::new().with("aquarium_id", value);
                complete(svc, user_id, Flow::DeleteAquarium, &data)
            }
            Command::ListAquariums => list_aquariums(svc, user_id),
            Command::Use(args) => {
                let id = parse_count(&args).map_err(|e| usage(&e, "/use <id>"))?;
                let aquarium = svc.set_active_aquarium(user_id, id)?;
                Ok(vec![format!(
                    "Active aquarium: #{} {}",
                    aquarium.id, aquarium.name
                )])
            }
            Command::Latest(args) => {
                let id = optional_id(&args, "/latest [id]")?;
                let aquarium = svc.resolve_aquarium(user_id, id)?;
                let reply = match svc.latest_measurement(aquarium.id)? {
                    Some(m) => {
                        format_measurement(&aquarium, &m, svc.settings().nh3_warning_mg_l)
                    }
                    None => format!(
                        "No water tests recorded for {} yet. Send /add_test to add one.",
                        aquarium.name
                    ),
                };
                Ok(vec![reply])
            }
            Command::History(args) => history(svc, user_id, &args),
            Command::Organisms(args) => {
                let id = optional_id(&args, "/organisms [id]")?;
                let aquarium = svc.resolve_aquarium(user_id, id)?;
                let organisms = svc.list_organisms(aquarium.id)?;
                if organisms.is_empty() {
                    return Ok(vec![format!("No fish or plants in {} yet.", aquarium.name)]);
                }
                let mut reply = format!("Livestock in {}:", aquarium.name);
                for o in &organisms {
                    reply.push_str(&format!("\n{} x {} ({})", o.quantity, o.species_name, o.kind));
                }
                Ok(vec![reply])
            }
            Command::Check(args) => {
                if args.is_empty() {
                    return Err(FlowError::MalformedInput("Usage: /check <species name>".into()).into());
                }
                let aquarium = svc.resolve_aquarium(user_id, None)?;
                let kind = svc
                    .species()
                    .find(&args)
                    .map_or(OrganismKind::Fish, |profile| profile.kind);
                let verdict = svc.check_compatibility(aquarium.id, kind, &args)?;
                let headline = if verdict.compatible {
                    format!("'{args}' looks fine for {}.", aquarium.name)
                } else {
                    format!("'{args}' may not suit the water in {}:", aquarium.name)
                };
                Ok(vec![with_messages(headline, &verdict)])
            }
        }
    }
}

/// Persist a finished flow and describe the result.
fn complete(
    svc: &AquaService,
    user_id: i64,
    flow: Flow,
    data: &FlowData,
) -> Result<Vec<String>> {
    match flow {
        Flow::AddAquarium => {
            let created = svc.create_aquarium(&NewAquarium {
                owner_id: user_id,
                name: data.text("name").unwrap_or_default().to_string(),
                volume_l: data.number("volume_l"),
                description: data.text("description").map(str::to_string),
            })?;
            Ok(vec![format_created(&created)])
        }
        Flow::AddMeasurement => {
            let aquarium = aquarium_from(svc, user_id, data)?;
            let measurement = NewMeasurement {
                aquarium_id: aquarium.id,
                ph: data.number("ph"),
                kh: data.number("kh"),
                gh: data.number("gh"),
                no2: data.number("no2"),
                no3: data.number("no3"),
                po4: data.number("po4"),
                tan: data.number("tan"),
                temperature_c: data.number("temperature_c"),
            };
            let report = svc.record_measurement(user_id, &measurement)?;
            Ok(vec![format_report(&report, svc.settings().nh3_warning_mg_l)])
        }
        Flow::AddOrganism => {
            let aquarium = svc.resolve_aquarium(user_id, None)?;
            let kind = data
                .kind("kind")
                .ok_or_else(|| FlowError::MalformedInput("Fish or plant?".to_string()))?;
            let addition = svc.add_organism(
                user_id,
                &NewOrganism {
                    aquarium_id: aquarium.id,
                    kind,
                    species_name: data.text("species_name").unwrap_or_default().to_string(),
                    quantity: data.integer("quantity").unwrap_or(1),
                },
            )?;
            Ok(vec![format_addition(&addition)])
        }
        Flow::DeleteAquarium => {
            let aquarium = aquarium_from(svc, user_id, data)?;
            let deleted = svc.delete_aquarium(user_id, aquarium.id)?;
            Ok(vec![format!(
                "Aquarium #{} {} deleted together with its tests and livestock.",
                deleted.id, deleted.name
            )])
        }
    }
}

fn aquarium_from(svc: &AquaService, user_id: i64, data: &FlowData) -> Result<Aquarium> {
    let id = match data.get("aquarium_id") {
        Some(FieldValue::Integer(id)) => Some(*id),
        _ => None,
    };
    svc.resolve_aquarium(user_id, id)
}

fn list_aquariums(svc: &AquaService, user_id: i64) -> Result<Vec<String>> {
    let aquariums = svc.list_aquariums(user_id)?;
    if aquariums.is_empty() {
        return Ok(vec![
            "You have no aquariums yet. Send /add_aq to create one.".to_string(),
        ]);
    }
    let active = svc.active_aquarium(user_id)?.map(|a| a.id);
    let mut reply = String::from("Your aquariums:");
    for a in &aquariums {
        let marker = if Some(a.id) == active { " (active)" } else { "" };
        let volume = a.volume_l.map(|v| format!(", {v} L")).unwrap_or_default();
        reply.push_str(&format!("\n#{} {}{volume}{marker}", a.id, a.name));
    }
    Ok(vec![reply])
}

fn history(svc: &AquaService, user_id: i64, args: &str) -> Result<Vec<String>> {
    const USAGE: &str = "/history <param> [id]";
    let mut tokens = args.split_whitespace();
    let Some(param) = tokens.next() else {
        return Err(FlowError::MalformedInput(format!("Usage: {USAGE}")).into());
    };
    let param = validate_measurement_param(param)
        .map_err(|e| FlowError::MalformedInput(e.to_string()))?;
    let id = optional_id(tokens.next().unwrap_or_default(), USAGE)?;
    let aquarium = svc.resolve_aquarium(user_id, id)?;

    let history = svc.measurement_history(aquarium.id, Some(HISTORY_LIMIT))?;
    let points: Vec<(String, f64)> = history
        .iter()
        .filter_map(|m| m.param(&param).map(|v| (short_date(&m.measured_at), v)))
        .collect();
    if points.is_empty() {
        return Ok(vec![format!("No {param} values recorded for {}.", aquarium.name)]);
    }
    let mut reply = format!("{param} in {}:", aquarium.name);
    for (when, value) in points {
        reply.push_str(&format!("\n{when}  {value}"));
    }
    Ok(vec![reply])
}

// --- Inline arguments ---

fn usage(err: &FlowError, usage: &str) -> FlowError {
    FlowError::MalformedInput(format!("{err}\nUsage: {usage}"))
}

fn optional_id(args: &str, usage_text: &str) -> Result<Option<i64>, FlowError> {
    let args = args.trim();
    if args.is_empty() {
        return Ok(None);
    }
    parse_count(args).map(Some).map_err(|e| usage(&e, usage_text))
}

fn inline_aquarium(args: &str) -> Result<FlowData, FlowError> {
    const USAGE: &str = "/add_aq <name> <volume_l>";
    let steps = Flow::AddAquarium.steps();
    let Some((name, volume)) = args.rsplit_once(char::is_whitespace) else {
        return Err(FlowError::MalformedInput(format!("Usage: {USAGE}")));
    };
    let name = parse_field(steps[0].kind, name).map_err(|e| usage(&e, USAGE))?;
    let volume = parse_field(steps[1].kind, volume).map_err(|e| usage(&e, USAGE))?;
    Ok(FlowData::new()
        .with("name", name)
        .with("volume_l", volume)
        .with("description", FieldValue::Skipped))
}

fn inline_measurement(args: &str) -> Result<FlowData, FlowError> {
    const USAGE: &str = "/add_test <aquarium_id> <ph> <kh> <gh> <no2> <no3> <tan> <po4> <temp_c>";
    let steps = Flow::AddMeasurement.steps();
    let tokens: Vec<&str> = args.split_whitespace().collect();
    if tokens.len() != steps.len() {
        return Err(FlowError::MalformedInput(format!(
            "Expected {} values, got {}.\nUsage: {USAGE}",
            steps.len(),
            tokens.len()
        )));
    }
    let mut data = FlowData::new();
    for (step, token) in steps.iter().zip(tokens) {
        let value = parse_field(step.kind, token).map_err(|e| {
            FlowError::MalformedInput(format!("{}: {e}\nUsage: {USAGE}", step.field))
        })?;
        data.insert(step.field, value);
    }
    Ok(data)
}

/// `<name> [qty]`: a trailing number is the quantity and must be a positive integer.
fn inline_organism(args: &str, kind: OrganismKind) -> Result<(String, Option<i64>), FlowError> {
    let usage_text = format!("/add_{kind} <name> [quantity]");
    if let Some((name, last)) = args.rsplit_once(char::is_whitespace) {
        if last.replace(',', ".").parse::<f64>().is_ok() {
            let quantity = parse_count(last).map_err(|e| usage(&e, &usage_text))?;
            return Ok((name.trim().to_string(), Some(quantity)));
        }
    }
    if args.replace(',', ".").parse::<f64>().is_ok() {
        return Err(FlowError::MalformedInput(format!("Usage: {usage_text}")));
    }
    Ok((args.trim().to_string(), None))
}

// --- Replies ---

/// User-facing text for a flow error.
#[must_use]
pub fn describe(err: &FlowError) -> String {
    match err {
        FlowError::MalformedInput(message) => message.clone(),
        FlowError::UnknownFlow => {
            "I didn't understand that. Choose an action from the menu or send /help.".to_string()
        }
        FlowError::NoActiveAquarium => {
            "You have no active aquarium. Create one with /add_aq or pick one with /use <id>."
                .to_string()
        }
        FlowError::UnknownAquarium(id) => {
            format!("Aquarium #{id} not found. Send /aquariums to see yours.")
        }
        FlowError::Blocked(verdict) => with_messages(
            "Not added: the species does not suit the current water.".to_string(),
            verdict,
        ),
    }
}

fn with_messages(headline: String, verdict: &Verdict) -> String {
    let mut out = headline;
    for message in &verdict.messages {
        out.push_str("\n- ");
        out.push_str(message);
    }
    for note in &verdict.notes {
        out.push('\n');
        out.push_str(note);
    }
    out
}

fn format_created(created: &CreatedAquarium) -> String {
    let a = &created.aquarium;
    let mut reply = format!("Aquarium #{} {} added.", a.id, a.name);
    if created.became_active {
        reply.push_str(" It is now your active aquarium.");
    }
    reply
}

fn format_addition(addition: &OrganismAddition) -> String {
    let o = &addition.organism;
    let headline = format!(
        "Added {} x {} ({}) to {}.",
        o.quantity, o.species_name, o.kind, addition.aquarium.name
    );
    if addition.verdict.compatible {
        with_messages(headline, &addition.verdict)
    } else {
        with_messages(
            format!("{headline}\nWarning: it may not suit the current water:"),
            &addition.verdict,
        )
    }
}

fn format_report(report: &MeasurementReport, threshold: f64) -> String {
    format!(
        "Saved.\n{}",
        format_measurement(&report.aquarium, &report.measurement, threshold)
    )
}

fn short_date(iso: &str) -> String {
    DateTime::parse_from_rfc3339(iso)
        .map_or_else(|_| iso.to_string(), |dt| dt.format("%Y-%m-%d %H:%M").to_string())
}

#[must_use]
pub fn format_measurement(aquarium: &Aquarium, m: &Measurement, threshold: f64) -> String {
    let mut out = format!(
        "Water test #{} for {} ({} UTC)",
        m.id,
        aquarium.name,
        short_date(&m.measured_at)
    );
    let readings = [
        ("pH", m.ph, ""),
        ("KH", m.kh, " °dKH"),
        ("GH", m.gh, " °dGH"),
        ("NO2", m.no2, " mg/L"),
        ("NO3", m.no3, " mg/L"),
        ("PO4", m.po4, " mg/L"),
        ("TAN", m.tan, " mg/L"),
        ("Temperature", m.temperature_c, " °C"),
    ];
    for (label, value, unit) in readings {
        if let Some(value) = value {
            out.push_str(&format!("\n{label}: {value}{unit}"));
        }
    }
    match (m.nh3_mg_l, m.nh4_mg_l) {
        (Some(nh3), Some(nh4)) => {
            out.push_str(&format!(
                "\nFree NH3: {nh3:.4} mg/L, NH4+: {nh4:.4} mg/L"
            ));
            if chemistry::is_toxic(nh3, threshold) {
                out.push_str(&format!(
                    "\nWARNING: free ammonia is above {threshold} mg/L and toxic to fish. Change water now."
                ));
            }
        }
        _ if m.tan.is_some() => {
            out.push_str("\nNH3/NH4+ not computed: pH and temperature are needed as well.");
        }
        _ => {}
    }
    out
}
