//! Ward CLI - console client for the hospital ward API
//!
//! Thin front end over ward-core: every command maps to a repository
//! operation, so the offline queue and cache behave exactly as they do for
//! the other shells. Run with `--offline` to force the local-first path.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use clap::{Parser, Subcommand};
use serde::Serialize;
use thiserror::Error;
use ward_core::config::{ApiConfig, ENV_API_URL};
use ward_core::models::{
    Bed, BedDraft, EntityId, Island, IslandDraft, Nurse, NurseDraft, Patient, PatientDraft, Room,
    RoomDraft,
};
use ward_core::repo::Outcome;
use ward_core::WardClient;

/// Environment variable overriding the local database location.
const ENV_DB_PATH: &str = "WARD_DB_PATH";

#[derive(Parser)]
#[command(name = "ward")]
#[command(about = "Hospital ward console: beds, rooms, nurses, patients, admissions")]
#[command(version)]
#[command(disable_help_subcommand = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Optional path to the local database file
    #[arg(long, value_name = "PATH", global = true)]
    db_path: Option<PathBuf>,

    /// API base URL (defaults to WARD_API_URL)
    #[arg(long, value_name = "URL", global = true)]
    api_url: Option<String>,

    /// Bearer token (defaults to WARD_TOKEN)
    #[arg(long, value_name = "TOKEN", global = true)]
    token: Option<String>,

    /// Force the offline path: mutations queue, reads serve the cache
    #[arg(long, global = true)]
    offline: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage beds
    Beds {
        #[command(subcommand)]
        action: BedAction,
    },
    /// Manage rooms
    Rooms {
        #[command(subcommand)]
        action: RoomAction,
    },
    /// Manage islands (ward areas)
    Islands {
        #[command(subcommand)]
        action: IslandAction,
    },
    /// Manage nurses
    Nurses {
        #[command(subcommand)]
        action: NurseAction,
    },
    /// Manage patients
    Patients {
        #[command(subcommand)]
        action: PatientAction,
    },
    /// Admit a patient to a bed
    Admit {
        patient_id: i64,
        bed_id: i64,
    },
    /// Discharge an admitted patient
    Discharge {
        admission_id: i64,
    },
    /// Move an admitted patient to another bed
    ChangeBed {
        admission_id: i64,
        bed_id: i64,
    },
    /// Help alerts (patient button / nurse console)
    Help {
        #[command(subcommand)]
        action: HelpAction,
    },
    /// Replay queued operations against the server
    Sync,
    /// Show queued operations awaiting sync
    Queue,
}

#[derive(Subcommand)]
enum BedAction {
    /// List beds with their occupancy
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Create a bed in a room
    Add {
        /// Room the bed belongs to
        #[arg(long = "room")]
        room_id: i64,
        /// Bed label, e.g. "B-12"
        label: String,
    },
    /// Delete a bed (online-only unless it was never synced)
    Delete {
        id: String,
    },
}

#[derive(Subcommand)]
enum RoomAction {
    List {
        #[arg(long)]
        json: bool,
    },
    /// Create a room with its initial bed count
    Add {
        #[arg(long = "island")]
        island_id: i64,
        #[arg(long, default_value = "1")]
        beds: i64,
        name: String,
    },
}

#[derive(Subcommand)]
enum IslandAction {
    List {
        #[arg(long)]
        json: bool,
    },
    Add {
        name: String,
        #[arg(long, default_value = "")]
        description: String,
    },
}

#[derive(Subcommand)]
enum NurseAction {
    List {
        #[arg(long)]
        json: bool,
    },
    /// Register a nurse account
    Add {
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
        name: String,
        surnames: String,
    },
    /// Delete a nurse account (online-only)
    Delete {
        id: String,
    },
    /// Replace a nurse's room assignments
    Assign {
        nurse_id: i64,
        #[arg(required = true)]
        room_ids: Vec<i64>,
    },
}

#[derive(Subcommand)]
enum PatientAction {
    List {
        #[arg(long)]
        json: bool,
    },
    /// Register a patient
    Add {
        name: String,
        surnames: String,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Edit a patient's record
    Update {
        id: String,
        name: String,
        surnames: String,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Delete a patient record
    Delete {
        id: String,
    },
}

#[derive(Subcommand)]
enum HelpAction {
    /// Raise a help alert for an admission
    Trigger {
        admission_id: i64,
    },
    /// List unresolved alerts (nurse console)
    Pending {
        #[arg(long)]
        json: bool,
    },
    /// Mark an alert as attended
    Resolve {
        alert_id: i64,
    },
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Core(#[from] ward_core::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("{ENV_API_URL} is not set and --api-url was not given")]
    ApiUnconfigured,
    #[error("Invalid id '{0}'")]
    InvalidId(String),
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ward_core=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    let config = resolve_config(cli.api_url.clone(), cli.token.clone())?;
    let db_path = resolve_db_path(cli.db_path.clone());

    let client = WardClient::open(&db_path, config).await?;
    if cli.offline {
        client.connectivity().set_online(false);
    }

    match cli.command {
        Commands::Beds { action } => run_beds(&client, action).await?,
        Commands::Rooms { action } => run_rooms(&client, action).await?,
        Commands::Islands { action } => run_islands(&client, action).await?,
        Commands::Nurses { action } => run_nurses(&client, action).await?,
        Commands::Patients { action } => run_patients(&client, action).await?,
        Commands::Admit { patient_id, bed_id } => {
            client.admissions().admit(patient_id, bed_id).await?;
            println!("Patient {patient_id} admitted to bed {bed_id}");
        }
        Commands::Discharge { admission_id } => {
            client.admissions().discharge(admission_id).await?;
            println!("Admission {admission_id} discharged");
        }
        Commands::ChangeBed {
            admission_id,
            bed_id,
        } => {
            client.admissions().change_bed(admission_id, bed_id).await?;
            println!("Admission {admission_id} moved to bed {bed_id}");
        }
        Commands::Help { action } => run_help(&client, action).await?,
        Commands::Sync => run_sync(&client).await?,
        Commands::Queue => run_queue(&client).await?,
    }

    Ok(())
}

fn resolve_config(api_url: Option<String>, token: Option<String>) -> Result<ApiConfig, CliError> {
    let mut config = match api_url {
        Some(url) => ApiConfig::new(url)?,
        None => ApiConfig::from_env().map_err(|_| CliError::ApiUnconfigured)?,
    };
    if let Some(token) = token {
        config = config.with_token(token);
    }
    Ok(config)
}

fn resolve_db_path(flag: Option<PathBuf>) -> PathBuf {
    if let Some(path) = flag {
        return path;
    }
    if let Ok(path) = env::var(ENV_DB_PATH) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }
    dirs::data_dir().map_or_else(
        || PathBuf::from("ward.db"),
        |data| data.join("ward").join("ward.db"),
    )
}

fn parse_id(raw: &str) -> Result<EntityId, CliError> {
    EntityId::from_str(raw).map_err(|_| CliError::InvalidId(raw.to_string()))
}

/// Shared "saved or queued" message after a mutation.
fn report_outcome<T>(outcome: &Outcome<T>, applied: &str) {
    if outcome.queued {
        println!("{applied} (saved locally, will sync when connectivity returns)");
    } else {
        println!("{applied}");
    }
}

fn print_json<T: Serialize>(items: &[T]) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(items)?);
    Ok(())
}

fn pending_marker(pending: bool) -> &'static str {
    if pending {
        "  [pending sync]"
    } else {
        ""
    }
}

async fn run_beds(client: &WardClient, action: BedAction) -> Result<(), CliError> {
    let repo = client.beds();
    match action {
        BedAction::List { json } => {
            let beds = repo.list().await?;
            if json {
                return print_json(&beds);
            }
            if beds.is_empty() {
                println!("No beds registered");
                return Ok(());
            }
            for bed in beds {
                println!("{}", format_bed(&bed));
            }
        }
        BedAction::Add { room_id, label } => {
            let outcome = repo
                .create(BedDraft {
                    room_id,
                    bed_label: label,
                })
                .await?;
            report_outcome(
                &outcome,
                &format!("Bed {} created", outcome.data.bed_label),
            );
        }
        BedAction::Delete { id } => {
            repo.delete(&parse_id(&id)?).await?;
            println!("Bed {id} deleted");
        }
    }
    Ok(())
}

fn format_bed(bed: &Bed) -> String {
    let state = if bed.is_occupied {
        "occupied"
    } else {
        "available"
    };
    let room = bed
        .room
        .as_ref()
        .map(|r| r.name.clone())
        .or_else(|| bed.room_id.map(|id| format!("room {id}")))
        .unwrap_or_else(|| "unassigned".to_string());
    format!(
        "{:<12} {:<10} {}{}",
        bed.bed_label,
        state,
        room,
        pending_marker(bed.pending)
    )
}

async fn run_rooms(client: &WardClient, action: RoomAction) -> Result<(), CliError> {
    let repo = client.rooms();
    match action {
        RoomAction::List { json } => {
            let rooms = repo.list().await?;
            if json {
                return print_json(&rooms);
            }
            if rooms.is_empty() {
                println!("No rooms registered");
                return Ok(());
            }
            for room in rooms {
                println!("{}", format_room(&room));
            }
        }
        RoomAction::Add {
            island_id,
            beds,
            name,
        } => {
            let outcome = repo
                .create(RoomDraft {
                    name,
                    beds,
                    island_id,
                })
                .await?;
            report_outcome(&outcome, &format!("Room {} created", outcome.data.name));
        }
    }
    Ok(())
}

fn format_room(room: &Room) -> String {
    let beds = room
        .beds
        .map_or_else(String::new, |count| format!("  {count} beds"));
    format!("{}{}{}", room.name, beds, pending_marker(room.pending))
}

async fn run_islands(client: &WardClient, action: IslandAction) -> Result<(), CliError> {
    let repo = client.islands();
    match action {
        IslandAction::List { json } => {
            let islands = repo.list().await?;
            if json {
                return print_json(&islands);
            }
            if islands.is_empty() {
                println!("No islands registered");
                return Ok(());
            }
            for island in islands {
                println!("{}", format_island(&island));
            }
        }
        IslandAction::Add { name, description } => {
            let outcome = repo.create(IslandDraft { name, description }).await?;
            report_outcome(&outcome, &format!("Island {} created", outcome.data.name));
        }
    }
    Ok(())
}

fn format_island(island: &Island) -> String {
    let description = island
        .description
        .as_deref()
        .filter(|text| !text.is_empty())
        .map_or_else(String::new, |text| format!("  - {text}"));
    format!(
        "{}{}{}",
        island.name,
        description,
        pending_marker(island.pending)
    )
}

async fn run_nurses(client: &WardClient, action: NurseAction) -> Result<(), CliError> {
    let repo = client.nurses();
    match action {
        NurseAction::List { json } => {
            let nurses = repo.list().await?;
            if json {
                return print_json(&nurses);
            }
            if nurses.is_empty() {
                println!("No nurses registered");
                return Ok(());
            }
            for nurse in nurses {
                println!("{}", format_nurse(&nurse));
            }
        }
        NurseAction::Add {
            username,
            password,
            name,
            surnames,
        } => {
            let outcome = repo
                .create(NurseDraft {
                    name,
                    surnames,
                    username,
                    password,
                })
                .await?;
            report_outcome(
                &outcome,
                &format!(
                    "Nurse {} {} registered",
                    outcome.data.name, outcome.data.surnames
                ),
            );
        }
        NurseAction::Delete { id } => {
            repo.delete(&parse_id(&id)?).await?;
            println!("Nurse {id} deleted");
        }
        NurseAction::Assign { nurse_id, room_ids } => {
            client
                .nurse_console()
                .assign_rooms(nurse_id, &room_ids)
                .await?;
            println!("Nurse {nurse_id} assigned to rooms {room_ids:?}");
        }
    }
    Ok(())
}

fn format_nurse(nurse: &Nurse) -> String {
    let username = nurse
        .username
        .as_deref()
        .map_or_else(String::new, |name| format!("  ({name})"));
    format!(
        "{} {}{}{}",
        nurse.name,
        nurse.surnames,
        username,
        pending_marker(nurse.pending)
    )
}

async fn run_patients(client: &WardClient, action: PatientAction) -> Result<(), CliError> {
    let repo = client.patients();
    match action {
        PatientAction::List { json } => {
            let patients = repo.list().await?;
            if json {
                return print_json(&patients);
            }
            if patients.is_empty() {
                println!("No patients registered");
                return Ok(());
            }
            for patient in patients {
                println!("{}", format_patient(&patient));
            }
        }
        PatientAction::Add {
            name,
            surnames,
            notes,
        } => {
            let outcome = repo
                .create(PatientDraft {
                    name,
                    surnames,
                    notes,
                })
                .await?;
            report_outcome(
                &outcome,
                &format!(
                    "Patient {} {} registered",
                    outcome.data.name, outcome.data.surnames
                ),
            );
        }
        PatientAction::Update {
            id,
            name,
            surnames,
            notes,
        } => {
            let outcome = repo
                .update(
                    &parse_id(&id)?,
                    PatientDraft {
                        name,
                        surnames,
                        notes,
                    },
                )
                .await?;
            report_outcome(&outcome, &format!("Patient {id} updated"));
        }
        PatientAction::Delete { id } => {
            let outcome = repo.delete(&parse_id(&id)?).await?;
            report_outcome(&outcome, &format!("Patient {id} deleted"));
        }
    }
    Ok(())
}

fn format_patient(patient: &Patient) -> String {
    let notes = patient
        .notes
        .as_deref()
        .filter(|text| !text.is_empty())
        .map_or_else(String::new, |text| format!("  - {text}"));
    format!(
        "{} {}{}{}",
        patient.name,
        patient.surnames,
        notes,
        pending_marker(patient.pending)
    )
}

async fn run_help(client: &WardClient, action: HelpAction) -> Result<(), CliError> {
    let help = client.help();
    match action {
        HelpAction::Trigger { admission_id } => {
            let outcome = help.trigger(admission_id).await?;
            report_outcome(&outcome, "Help alert sent");
        }
        HelpAction::Pending { json } => {
            let alerts = help.pending().await?;
            if json {
                return print_json(&alerts);
            }
            if alerts.is_empty() {
                println!("No pending alerts");
                return Ok(());
            }
            for alert in alerts {
                let place = match (&alert.room_name, &alert.bed_label) {
                    (Some(room), Some(bed)) => format!("{room} / {bed}"),
                    (Some(room), None) => room.clone(),
                    (None, Some(bed)) => bed.clone(),
                    (None, None) => "unknown bed".to_string(),
                };
                println!(
                    "#{:<6} {}  {}{}",
                    alert.id.to_string(),
                    place,
                    alert.created_at.as_deref().unwrap_or("-"),
                    pending_marker(alert.pending)
                );
            }
        }
        HelpAction::Resolve { alert_id } => {
            help.resolve(alert_id).await?;
            println!("Alert {alert_id} resolved");
        }
    }
    Ok(())
}

async fn run_sync(client: &WardClient) -> Result<(), CliError> {
    let queued = client.pending_operations().await?.len();
    if queued == 0 {
        println!("Nothing to sync");
        return Ok(());
    }
    println!("Syncing {queued} queued operation(s)...");
    client.sync_now().await?;

    let remaining = client.pending_operations().await?.len();
    if remaining == 0 {
        println!("All queued operations confirmed");
    } else {
        println!("{remaining} operation(s) still queued (server unreachable), will retry");
    }
    Ok(())
}

async fn run_queue(client: &WardClient) -> Result<(), CliError> {
    let entries = client.pending_operations().await?;
    if entries.is_empty() {
        println!("Outbox is empty");
        return Ok(());
    }
    for entry in entries {
        let when = chrono::DateTime::from_timestamp_millis(entry.created_at)
            .map_or_else(|| entry.created_at.to_string(), |dt| dt.to_rfc3339());
        println!(
            "{:<8} {:<12} {:<28} {}",
            entry.method.as_str(),
            entry.collection.as_str(),
            entry.target_id,
            when
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn db_path_flag_wins_over_defaults() {
        let explicit = resolve_db_path(Some(PathBuf::from("/tmp/custom.db")));
        assert_eq!(explicit, PathBuf::from("/tmp/custom.db"));
    }

    #[test]
    fn parse_id_accepts_server_and_temp_forms() {
        assert_eq!(parse_id("42").unwrap(), EntityId::Server(42));
        assert!(parse_id("temp_1_abc").unwrap().is_temp());
        assert!(parse_id("garbage").is_err());
    }

    #[test]
    fn cli_parses_nested_subcommands() {
        let cli = Cli::try_parse_from([
            "ward", "beds", "add", "--room", "3", "B-12", "--offline",
        ])
        .unwrap();
        assert!(cli.offline);
        match cli.command {
            Commands::Beds {
                action: BedAction::Add { room_id, label },
            } => {
                assert_eq!(room_id, 3);
                assert_eq!(label, "B-12");
            }
            _ => panic!("unexpected parse"),
        }
    }
}
