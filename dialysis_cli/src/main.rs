use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use dialysis_core::*;
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "hdsched")]
#[command(about = "Hemodialysis session scheduler", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Load configuration from this file instead of the default path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Name recorded in the activity log
    #[arg(long, global = true, default_value = "staff")]
    actor: String,

    /// Treat this date as today
    #[arg(long, global = true)]
    today: Option<NaiveDate>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Log more detail to stderr (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Book a patient from their prescription
    Book {
        #[arg(long)]
        patient: String,
        #[arg(long)]
        date: NaiveDate,
        /// Slot id (defaults to the prescription's preferred slot)
        #[arg(long)]
        slot: Option<String>,
    },

    /// Generate recurring sessions from an anchor session
    Generate {
        #[arg(long)]
        session: Uuid,
        /// Days after the anchor to cover (defaults to config)
        #[arg(long)]
        horizon: Option<u32>,
        /// Stop after creating this many sessions
        #[arg(long)]
        max: Option<usize>,
    },

    /// Show the first free bed in a slot
    AssignBed {
        #[arg(long)]
        slot: String,
        #[arg(long)]
        date: NaiveDate,
        /// Ignore this session's bed
        #[arg(long)]
        exclude: Option<Uuid>,
    },

    /// Show bed occupancy for a slot
    Grid {
        #[arg(long)]
        slot: String,
        #[arg(long)]
        date: NaiveDate,
    },

    /// Apply a clinical phase action
    Phase {
        #[arg(long)]
        session: Uuid,
        /// save-pre, complete-pre, record-intra, start-post, save-post, complete-post
        #[arg(long)]
        action: PhaseAction,
        /// Field values as key=value (e.g. preWeight=60.5)
        #[arg(long = "set", value_name = "KEY=VALUE")]
        values: Vec<String>,
        /// Fail if the session has changed since this revision
        #[arg(long)]
        revision: Option<u64>,
    },

    /// Mark a session as missed
    Missed {
        #[arg(long)]
        session: Uuid,
        #[arg(long)]
        reason: String,
        #[arg(long)]
        notes: Option<String>,
    },

    /// Resolve a missed session
    ResolveMissed {
        #[arg(long)]
        session: Uuid,
    },

    /// Activate today's reserved session
    Activate {
        #[arg(long)]
        session: Uuid,
    },

    /// Move a session to another bed
    ChangeBed {
        #[arg(long)]
        session: Uuid,
        #[arg(long)]
        bed: u32,
        #[arg(long)]
        slot: Option<String>,
    },

    /// Move a session to another date
    Reschedule {
        #[arg(long)]
        session: Uuid,
        #[arg(long)]
        date: NaiveDate,
        #[arg(long)]
        slot: Option<String>,
        #[arg(long)]
        bed: Option<u32>,
    },

    /// Discharge a session without completing treatment
    Discharge {
        #[arg(long)]
        session: Uuid,
        #[arg(long)]
        reason: String,
    },

    /// Amend locked fields with an audit record
    Correct {
        #[arg(long)]
        session: Uuid,
        #[arg(long, value_enum)]
        group: GroupArg,
        #[arg(long)]
        reason: String,
        #[arg(long = "set", value_name = "KEY=VALUE", required = true)]
        values: Vec<String>,
    },

    /// Move sessions to history
    Archive {
        #[arg(long, conflicts_with = "before", required_unless_present = "before")]
        session: Option<Uuid>,
        /// Archive every finished session dated before this date
        #[arg(long)]
        before: Option<NaiveDate>,
    },

    /// Append archived sessions to the history CSV
    Export {
        /// Output path (defaults to history.csv in the data directory)
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Show one session
    Show {
        #[arg(long)]
        session: Uuid,
    },

    /// List sessions on a date
    List {
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum GroupArg {
    Pre,
    Intra,
    Post,
}

impl From<GroupArg> for FieldGroup {
    fn from(group: GroupArg) -> Self {
        match group {
            GroupArg::Pre => FieldGroup::PreDialysis,
            GroupArg::Intra => FieldGroup::IntraDialysis,
            GroupArg::Post => FieldGroup::PostDialysis,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    dialysis_core::logging::init(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(dir) = cli.data_dir.clone() {
        config.data.data_dir = dir;
    }
    std::fs::create_dir_all(&config.data.data_dir)?;
    tracing::debug!("Using data directory {:?}", config.data.data_dir);

    let scheduler = open_scheduler(&config, cli.today);
    let out = Output { json: cli.json };
    let actor = cli.actor.as_str();

    match cli.command {
        Commands::Book {
            patient,
            date,
            slot,
        } => {
            let session = scheduler.book_patient(&patient, date, slot.as_deref())?;
            out.session("Booked", &session)
        }
        Commands::Generate {
            session,
            horizon,
            max,
        } => {
            let horizon = horizon.unwrap_or(config.scheduling.default_horizon_days);
            let report = scheduler.generate_recurring_sessions(session, horizon, max)?;
            out.report(&scheduler, &report)
        }
        Commands::AssignBed {
            slot,
            date,
            exclude,
        } => {
            let bed = scheduler.assign_bed(&slot, date, exclude)?;
            if out.json {
                return out.print_json(&bed);
            }
            match bed {
                Some(bed) => println!("Bed {} is free in {} on {}", bed, slot, date),
                None => println!("No bed available in {} on {}", slot, date),
            }
            Ok(())
        }
        Commands::Grid { slot, date } => {
            let grid = scheduler.occupancy_grid(&slot, date)?;
            if out.json {
                return out.print_json(&grid);
            }
            println!("{} on {}", slot, date);
            for cell in &grid {
                match &cell.patient_id {
                    Some(patient) => {
                        println!(
                            "  bed {:>2}  {:<14} {}",
                            cell.bed_number,
                            cell.status.to_string(),
                            patient
                        )
                    }
                    None => println!("  bed {:>2}  {}", cell.bed_number, cell.status),
                }
            }
            Ok(())
        }
        Commands::Phase {
            session,
            action,
            values,
            revision,
        } => {
            let patch = FieldPatch::from_pairs(action.group(), &values)?;
            let session = scheduler.transition_phase(session, action, &patch, revision)?;
            out.session(&format!("Applied {}", action), &session)
        }
        Commands::Missed {
            session,
            reason,
            notes,
        } => {
            let session = scheduler.mark_missed(session, &reason, notes.as_deref(), actor)?;
            out.session("Marked missed", &session)
        }
        Commands::ResolveMissed { session } => {
            let session = scheduler.resolve_missed(session, actor)?;
            out.session("Resolved", &session)
        }
        Commands::Activate { session } => {
            let session = scheduler.activate_reserved(session)?;
            out.session("Activated", &session)
        }
        Commands::ChangeBed { session, bed, slot } => {
            let session = scheduler.change_bed(session, bed, slot.as_deref(), actor)?;
            out.session("Moved", &session)
        }
        Commands::Reschedule {
            session,
            date,
            slot,
            bed,
        } => {
            let target = RescheduleTarget {
                date,
                slot_id: slot,
                bed_number: bed,
            };
            let session = scheduler.reschedule(session, &target, actor)?;
            out.session("Rescheduled", &session)
        }
        Commands::Discharge { session, reason } => {
            let session = scheduler.force_discharge(session, &reason, actor)?;
            out.session("Discharged", &session)
        }
        Commands::Correct {
            session,
            group,
            reason,
            values,
        } => {
            let patch = FieldPatch::from_pairs(group.into(), &values)?;
            let (session, correction) =
                scheduler.correct_locked_fields(session, &patch, actor, &reason)?;
            if out.json {
                return out.print_json(&correction);
            }
            for change in &correction.changes {
                println!("  {}: {} -> {}", change.field, change.previous, change.new);
            }
            out.session("Corrected", &session)
        }
        Commands::Archive { session, before } => match (session, before) {
            (Some(id), _) => {
                let session = scheduler.archive_session(id, actor)?;
                out.session("Archived", &session)
            }
            (None, Some(cutoff)) => {
                let archived = scheduler.archive_before(cutoff, actor)?;
                if out.json {
                    let ids: Vec<Uuid> = archived.iter().map(|s| s.id).collect();
                    return out.print_json(&ids);
                }
                println!("✓ Archived {} sessions dated before {}", archived.len(), cutoff);
                Ok(())
            }
            (None, None) => Err(Error::Validation("give --session or --before".into())),
        },
        Commands::Export { out: path } => {
            let path = path.unwrap_or_else(|| config.history_path());
            let archived = scheduler.archived_sessions()?;
            let count = dialysis_core::history::export_archived(&archived, &path)?;
            if out.json {
                return out.print_json(&count);
            }
            println!("✓ Exported {} sessions", count);
            println!("  CSV: {}", path.display());
            Ok(())
        }
        Commands::Show { session } => {
            let session = scheduler.session(session)?;
            if out.json {
                return out.print_json(&session);
            }
            print_details(&session);
            Ok(())
        }
        Commands::List { date } => {
            let date = date.unwrap_or_else(|| cli.today.unwrap_or_else(|| SystemClock.today()));
            let sessions = scheduler.sessions_on(date)?;
            if out.json {
                return out.print_json(&sessions);
            }
            if sessions.is_empty() {
                println!("No sessions on {}", date);
            }
            for session in &sessions {
                print_line(session);
            }
            Ok(())
        }
    }
}

fn open_scheduler(config: &Config, today: Option<NaiveDate>) -> Scheduler<JsonFileSessionStore> {
    let scheduler = Scheduler::new(
        JsonFileSessionStore::new(config.sessions_path()),
        JsonPatientFile::new(config.patients_path()),
        ConfiguredSlots::new(config.slots.clone()),
        JsonlActivityLog::new(config.activity_path()),
    )
    .with_equipment_monitor(ReuseThresholds {
        dialyser_max_reuse: config.equipment.dialyser_max_reuse,
        blood_tubing_max_reuse: config.equipment.blood_tubing_max_reuse,
    });

    match today {
        Some(date) => scheduler.with_clock(FixedClock::new(Utc::now(), date)),
        None => scheduler,
    }
}

struct Output {
    json: bool,
}

impl Output {
    fn print_json<T: serde::Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }

    fn session(&self, verb: &str, session: &Session) -> Result<()> {
        if self.json {
            return self.print_json(session);
        }
        println!("✓ {} session {}", verb, session.id);
        print_line(session);
        Ok(())
    }

    fn report<S: SessionStore>(
        &self,
        scheduler: &Scheduler<S>,
        report: &GenerationReport,
    ) -> Result<()> {
        if self.json {
            return self.print_json(report);
        }
        println!(
            "✓ Created {} sessions, skipped {}",
            report.created.len(),
            report.skipped.len()
        );
        for id in &report.created {
            print_line(&scheduler.session(*id)?);
        }
        for skipped in &report.skipped {
            println!("  skipped {}: {}", skipped.date, skipped.reason);
        }
        Ok(())
    }
}

fn print_line(session: &Session) {
    let bed = session
        .bed_number
        .map(|b| format!("bed {}", b))
        .unwrap_or_else(|| "no bed".into());
    println!(
        "  {}  {}  {:<10} {:<7} {:<15} {:<13} {}",
        session.id,
        session.date,
        session.slot_id,
        bed,
        session.phase.to_string(),
        session.status.to_string(),
        session.patient_id
    );
}

fn print_details(session: &Session) {
    println!("Session {}", session.id);
    println!("  Patient:   {}", session.patient_id);
    println!("  Date:      {} ({})", session.date, session.slot_id);
    match session.bed_number {
        Some(bed) => println!("  Bed:       {}", bed),
        None => println!("  Bed:       unassigned"),
    }
    println!("  Phase:     {}", session.phase);
    println!("  Status:    {}", session.status);
    println!(
        "  Recurrence: {} ({})",
        session.recurrence,
        CyclePattern::parse(&session.recurrence)
    );
    println!("  Revision:  {}", session.revision);
    if let Some(loss) = session.weight_loss {
        println!("  Weight loss: {:.2} kg", loss);
    }
    if let Some(missed) = &session.missed {
        let state = if missed.is_resolved() { "resolved" } else { "open" };
        println!("  Missed:    {} ({})", missed.reason, state);
    }
    if let Some(reason) = &session.discharge_reason {
        println!("  Discharged: {}", reason);
    }
    if session.is_moved_to_history {
        println!("  Archived");
    }
    for correction in &session.corrections {
        println!(
            "  Correction by {} at {}: {} ({} fields)",
            correction.corrected_by,
            correction.corrected_at.to_rfc3339(),
            correction.reason,
            correction.changes.len()
        );
    }
}
