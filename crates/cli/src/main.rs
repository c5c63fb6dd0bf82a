use catalog_core::{
    CatalogFilter, CoreConfig, DateLabel, DicomUpload, NewStudy, StudyError, StudyId,
    StudyService, TimeFilter,
};
use chrono::Local;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "dicom-catalog")]
#[command(about = "DICOM study catalog CLI")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Catalog a new study
    Create {
        /// Patient/study label
        #[arg(long)]
        name: String,
        /// Free-text description
        #[arg(long)]
        description: String,
        /// DICOM file to upload
        #[arg(long)]
        file: PathBuf,
        /// Media type to claim for the file (e.g. application/dicom)
        #[arg(long)]
        media_type: Option<String>,
    },
    /// Edit a study, optionally replacing its file
    Update {
        /// Study id
        id: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        description: String,
        /// Replacement DICOM file
        #[arg(long)]
        file: Option<PathBuf>,
        #[arg(long)]
        media_type: Option<String>,
    },
    /// Delete a study and its file
    Delete {
        /// Study id
        id: String,
    },
    /// List studies, newest first
    List {
        /// Time window: all, today, week or month
        #[arg(long, default_value = "all")]
        since: TimeFilter,
        /// Case-insensitive substring of the study name
        #[arg(long)]
        search: Option<String>,
    },
    /// Print the download URL of a study's file
    Url {
        /// Study id
        id: String,
    },
    /// Report orphan files and dangling records
    Reconcile {
        /// Remove orphan files older than the grace period
        #[arg(long)]
        apply: bool,
    },
}

fn read_upload(path: &Path, media_type: Option<String>) -> Result<DicomUpload, std::io::Error> {
    let content = std::fs::read(path)?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(DicomUpload::new(file_name, media_type, content))
}

fn parse_id(raw: &str) -> Result<StudyId, StudyError> {
    raw.parse()
        .map_err(|_| StudyError::Validation(format!("invalid study id {raw:?}")))
}

fn fail(action: &str, err: StudyError) -> ! {
    eprintln!("Error {action} [{}]: {err}", err.kind());
    std::process::exit(1);
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("catalog_core=warn".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let Some(command) = cli.command else {
        println!("Use 'dicom-catalog --help' for commands");
        return Ok(());
    };

    let cfg = Arc::new(CoreConfig::from_env()?);
    let service = StudyService::open(cfg)?;

    match command {
        Commands::Create {
            name,
            description,
            file,
            media_type,
        } => {
            let upload = read_upload(&file, media_type)?;
            match service.create_study(NewStudy {
                name,
                description,
                file: Some(upload),
            }) {
                Ok(record) => println!(
                    "Created study {} ({}) at {}",
                    record.id, record.name, record.storage_path
                ),
                Err(e) => fail("creating study", e),
            }
        }
        Commands::Update {
            id,
            name,
            description,
            file,
            media_type,
        } => {
            let id = parse_id(&id).unwrap_or_else(|e| fail("updating study", e));
            let replacement = file
                .map(|path| read_upload(&path, media_type))
                .transpose()?;
            match service.update_study_by_id(id, name, description, replacement) {
                Ok(record) => println!(
                    "Updated study {} ({}), file: {}",
                    record.id, record.name, record.file_name
                ),
                Err(e) => fail("updating study", e),
            }
        }
        Commands::Delete { id } => {
            let id = parse_id(&id).unwrap_or_else(|e| fail("deleting study", e));
            match service.delete_study_by_id(id) {
                Ok(()) => println!("Deleted study {id}"),
                Err(e) => fail("deleting study", e),
            }
        }
        Commands::List { since, search } => {
            match service.list_studies(&CatalogFilter::new(since, search)) {
                Ok(studies) if studies.is_empty() => println!("No studies found."),
                Ok(studies) => {
                    let now = Local::now();
                    for study in studies {
                        println!(
                            "ID: {}, Name: {}, File: {}, Created: {}",
                            study.id,
                            study.name,
                            study.file_name,
                            DateLabel::for_timestamp(study.created_at, &now)
                        );
                    }
                }
                Err(e) => fail("listing studies", e),
            }
        }
        Commands::Url { id } => {
            let id = parse_id(&id).unwrap_or_else(|e| fail("resolving download", e));
            match service.download_url(id) {
                Ok(download) => println!("{} ({})", download.url, download.file_name),
                Err(e) => fail("resolving download", e),
            }
        }
        Commands::Reconcile { apply } => match service.reconcile(apply) {
            Ok(report) => println!("{}", serde_json::to_string_pretty(&report)?),
            Err(e) => fail("reconciling stores", e),
        },
    }

    Ok(())
}
