use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate, NaiveTime};
use clap::{Parser, Subcommand};
use rollcall_core::Embedding;
use rollcall_store::{NewIdentity, Store};

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance administration CLI")]
struct Cli {
    /// Path to the attendance database
    #[arg(long, env = "ROLLCALL_DB_PATH")]
    db: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Close stale open attendance records with a default checkout time
    Sweep {
        /// Close records this many days old or older
        #[arg(long, default_value_t = 1)]
        days: u64,
        /// Checkout time written to swept records (HH:MM)
        #[arg(long, default_value = "23:59")]
        checkout_time: String,
    },
    /// Mark everyone without a record for a date as absent
    MarkAbsent {
        /// Date to process (YYYY-MM-DD, defaults to today)
        #[arg(long)]
        date: Option<String>,
    },
    /// Show or change the present/late cutoff times
    Policy {
        #[command(subcommand)]
        command: PolicyCommands,
    },
    /// Enroll a new identity from a precomputed embedding
    Enroll {
        #[arg(long)]
        name: String,
        #[arg(long)]
        roll_no: String,
        #[arg(long)]
        department_id: i64,
        #[arg(long)]
        course_id: i64,
        #[arg(long)]
        session_id: i64,
        #[arg(long)]
        semester_id: i64,
        /// JSON file containing the embedding as an array of floats
        #[arg(long)]
        embedding_file: PathBuf,
    },
    /// List enrolled identities
    List,
    /// Register a course
    AddCourse { name: String },
    /// Register a semester
    AddSemester { name: String },
    /// Create an operator account
    AddOperator {
        username: String,
        password: String,
        #[arg(long)]
        admin: bool,
    },
}

#[derive(Subcommand)]
enum PolicyCommands {
    /// Show the current cutoffs
    Show,
    /// Set new cutoffs (HH:MM); present must precede late
    Set {
        #[arg(long)]
        present_cutoff: String,
        #[arg(long)]
        late_cutoff: String,
    },
}

fn parse_time(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M").with_context(|| format!("invalid time '{s}', want HH:MM"))
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("invalid date '{s}', want YYYY-MM-DD"))
}

fn load_embedding(path: &PathBuf) -> Result<Embedding> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading embedding file {}", path.display()))?;
    let values: Vec<f32> = serde_json::from_str(&raw)
        .with_context(|| format!("parsing {} as a JSON float array", path.display()))?;
    if values.is_empty() {
        bail!("embedding file {} is empty", path.display());
    }
    Ok(Embedding::new(values))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut store = Store::open(&cli.db)
        .with_context(|| format!("opening database {}", cli.db.display()))?;

    match cli.command {
        Commands::Sweep { days, checkout_time } => {
            let time = parse_time(&checkout_time)?;
            let today = Local::now().date_naive();
            let report = store.sweep_auto_checkout(today, days, time)?;
            println!(
                "Swept {} open record(s), skipped {} already closed",
                report.updated, report.skipped
            );
            for (date, count) in &report.by_date {
                println!("  {date}: {count}");
            }
        }
        Commands::MarkAbsent { date } => {
            let date = match date {
                Some(s) => parse_date(&s)?,
                None => Local::now().date_naive(),
            };
            let marked = store.mark_absentees(date)?;
            println!("Marked {marked} identit(ies) absent for {date}");
        }
        Commands::Policy { command } => match command {
            PolicyCommands::Show => {
                let policy = store.policy()?;
                println!("present until: {}", policy.present_cutoff.format("%H:%M"));
                println!("late until:    {}", policy.late_cutoff.format("%H:%M"));
            }
            PolicyCommands::Set { present_cutoff, late_cutoff } => {
                let policy =
                    store.set_policy(parse_time(&present_cutoff)?, parse_time(&late_cutoff)?)?;
                println!(
                    "Policy updated: present until {}, late until {}",
                    policy.present_cutoff.format("%H:%M"),
                    policy.late_cutoff.format("%H:%M")
                );
            }
        },
        Commands::Enroll {
            name,
            roll_no,
            department_id,
            course_id,
            session_id,
            semester_id,
            embedding_file,
        } => {
            let embedding = load_embedding(&embedding_file)?;
            let new = NewIdentity {
                name,
                roll_no,
                department_id,
                course_id,
                session_id,
                semester_id,
                authorized: true,
            };
            let id = store.enroll_identity(&new, &embedding, rollcall_core::DEFAULT_TOLERANCE)?;
            println!("Enrolled '{}' as identity {id}", new.name);
        }
        Commands::List => {
            let identities = store.list_identities()?;
            if identities.is_empty() {
                println!("No identities enrolled");
            }
            for i in identities {
                let course = store.course_name(i.course_id)?.unwrap_or_default();
                let semester = store.semester_name(i.semester_id)?.unwrap_or_default();
                println!(
                    "{:>5}  {:<12} {:<24} {course} / {semester}{}",
                    i.id,
                    i.roll_no,
                    i.name,
                    if i.authorized { "" } else { "  [unauthorized]" }
                );
            }
        }
        Commands::AddCourse { name } => {
            let id = store.add_course(&name, true)?;
            println!("Added course '{name}' with id {id}");
        }
        Commands::AddSemester { name } => {
            let id = store.add_semester(&name, true)?;
            println!("Added semester '{name}' with id {id}");
        }
        Commands::AddOperator { username, password, admin } => {
            let id = store.create_operator(&username, &password, admin)?;
            println!("Created operator '{username}' with id {id}");
        }
    }

    Ok(())
}
