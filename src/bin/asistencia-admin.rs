//! Maintenance and diagnostics for an `asistenciad` workspace.
//!
//! Reads the same workspace database through the same store queries the
//! sidecar uses, so what it prints is what the application sees.

use anyhow::{bail, Result};
use asistenciad::{db, logging, matching, nav::Role, store};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Workspace directory holding the database
    #[arg(short, long)]
    workspace: PathBuf,

    /// Print one JSON object per line instead of a table
    #[arg(long)]
    json: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List subjects in match-priority order
    Subjects,
    /// List user accounts
    Users,
    /// List sections, optionally for one department
    Sections {
        #[arg(long)]
        department: Option<String>,
    },
    /// Resolve a free-text subject label against the catalog
    Match { label: String },
    /// List attendance records
    Attendance {
        /// Single day; shorthand for --from D --to D
        #[arg(long, conflicts_with_all = ["from", "to"])]
        date: Option<NaiveDate>,
        #[arg(long)]
        from: Option<NaiveDate>,
        #[arg(long)]
        to: Option<NaiveDate>,
        #[arg(long)]
        user: Option<String>,
    },
}

fn print_json_lines<T: Serialize>(items: &[T]) -> Result<()> {
    for item in items {
        println!("{}", serde_json::to_string(item)?);
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(if args.verbose { "debug" } else { "warn" });

    let db_path = args.workspace.join(db::DB_FILE_NAME);
    if !db_path.is_file() {
        bail!("no workspace database at {}", db_path.to_string_lossy());
    }
    let conn = db::open_db(&args.workspace)?;
    tracing::debug!(workspace = %args.workspace.to_string_lossy(), "workspace opened");

    match args.command {
        Command::Subjects => {
            let subjects = store::list_subjects(&conn)?;
            if args.json {
                return print_json_lines(&subjects);
            }
            for s in &subjects {
                let normalized = matching::normalize(&s.name);
                let flag = if normalized.is_empty() { "  (unmatchable)" } else { "" };
                println!(
                    "{:>4}  {:<36}  {:<30}  {}{}",
                    s.sort_order,
                    s.id,
                    s.name,
                    normalized,
                    flag
                );
            }
        }
        Command::Users => {
            let users = store::list_users(&conn)?;
            if args.json {
                return print_json_lines(&users);
            }
            for u in &users {
                println!(
                    "{:<36}  {:<20}  {:<12}  {}{}",
                    u.id,
                    u.username,
                    Role::normalize(&u.role).as_str(),
                    u.name,
                    if u.active { "" } else { "  (inactive)" }
                );
            }
        }
        Command::Sections { department } => {
            let sections = store::list_sections(&conn, department.as_deref())?;
            if args.json {
                return print_json_lines(&sections);
            }
            for s in &sections {
                println!(
                    "{:<36}  {:<24}  {:<16}  {}",
                    s.id,
                    s.department_name,
                    s.name,
                    s.grade_level.as_deref().unwrap_or("-")
                );
            }
        }
        Command::Match { label } => {
            let references = store::reference_labels(&conn)?;
            let found = matching::find_match(&label, &references);
            if args.json {
                println!("{}", serde_json::to_string(&found)?);
                return Ok(());
            }
            match found {
                Some(m) => println!(
                    "{} -> {} ({})  [{} ~ {}]",
                    label, m.name, m.id, m.normalized_input, m.normalized_match
                ),
                None => println!(
                    "{} -> no match among {} subjects  [{}]",
                    label,
                    references.len(),
                    matching::normalize(&label)
                ),
            }
        }
        Command::Attendance {
            date,
            from,
            to,
            user,
        } => {
            let filter = store::AttendanceFilter {
                from: date.or(from),
                to: date.or(to),
                user_id: user,
                ..Default::default()
            };
            let records = store::list_attendance(&conn, &filter)?;
            if args.json {
                return print_json_lines(&records);
            }
            for r in &records {
                println!(
                    "{}  {:<24}  {:<24}  {:<12}  {}",
                    r.date,
                    r.user_name,
                    r.subject_name,
                    r.section_name.as_deref().unwrap_or("-"),
                    r.status
                );
            }
        }
    }
    Ok(())
}
