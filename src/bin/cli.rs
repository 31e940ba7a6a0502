use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use facematch::{
    CaseLog, CaseRecord, Embedding, FileModelStore, MatchOutcome, MatchWorkflow, Origin, Params,
    Status,
};

#[derive(Parser)]
#[command(name = "facematch")]
struct Cli {
    /// JSON file with matching and classifier parameters.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    threshold: Option<f32>,
    #[arg(long, global = true)]
    dimension: Option<usize>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Side {
    Registered,
    Sighting,
}

impl From<Side> for Origin {
    fn from(side: Side) -> Self {
        match side {
            Side::Registered => Origin::Registered,
            Side::Sighting => Origin::PublicSighting,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum StatusArg {
    Open,
    Found,
}

impl From<StatusArg> for Status {
    fn from(status: StatusArg) -> Self {
        match status {
            StatusArg::Open => Status::NotFound,
            StatusArg::Found => Status::Found,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Register a missing-person case.
    Register {
        path: PathBuf,
        id: String,
        submitted_by: String,
        vector: String,
    },
    /// File a public sighting.
    Report {
        path: PathBuf,
        id: String,
        vector: String,
        #[arg(long)]
        submitted_by: Option<String>,
    },
    /// Propose matches between open cases and sightings.
    Match { path: PathBuf },
    /// Confirm a proposed match.
    Confirm {
        path: PathBuf,
        registered_id: String,
        sighting_id: String,
    },
    /// Retrain a submitter's identity classifier.
    Train {
        path: PathBuf,
        models: PathBuf,
        submitter: String,
    },
    /// Classify an embedding with a submitter's trained model.
    Classify {
        path: PathBuf,
        models: PathBuf,
        submitter: String,
        vector: String,
    },
    /// Delete a case or sighting.
    Remove {
        path: PathBuf,
        #[arg(value_enum)]
        side: Side,
        id: String,
    },
    /// List stored records.
    Show {
        path: PathBuf,
        #[arg(value_enum)]
        side: Side,
        #[arg(long)]
        submitted_by: Option<String>,
        #[arg(long, value_enum)]
        status: Option<StatusArg>,
    },
    /// Count a submitter's registered cases.
    Count {
        path: PathBuf,
        submitter: String,
        #[arg(long, value_enum)]
        status: Option<StatusArg>,
    },
}

fn parse_vector(s: &str, dim: usize) -> anyhow::Result<Embedding> {
    let values = s
        .split(',')
        .map(|x| x.trim().parse::<f32>())
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("invalid vector {s:?}"))?;
    Ok(Embedding::with_dim(values, dim)?)
}

fn load_params(cli: &Cli) -> anyhow::Result<Params> {
    let mut params = match &cli.config {
        Some(path) => Params::from_json_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => Params::default(),
    };
    if let Some(threshold) = cli.threshold {
        params.threshold = threshold;
    }
    if let Some(dimension) = cli.dimension {
        params.dimension = dimension;
    }
    params.validate()?;
    Ok(params)
}

fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));
    let cli = Cli::parse();
    let params = load_params(&cli)?;
    match cli.command {
        Commands::Register {
            path,
            id,
            submitted_by,
            vector,
        } => {
            let log = CaseLog::open(&path, params.dimension)?;
            let embedding = parse_vector(&vector, params.dimension)?;
            log.register(CaseRecord::registered(id, submitted_by, Some(&embedding)))?;
        }
        Commands::Report {
            path,
            id,
            vector,
            submitted_by,
        } => {
            let log = CaseLog::open(&path, params.dimension)?;
            let embedding = parse_vector(&vector, params.dimension)?;
            let mut record = CaseRecord::sighting(id, Some(&embedding));
            if let Some(submitter) = submitted_by {
                record = record.submitted_by(submitter);
            }
            log.register(record)?;
        }
        Commands::Match { path } => {
            let log = CaseLog::open(&path, params.dimension)?;
            let workflow = MatchWorkflow::new(&log, params)?;
            match workflow.propose_matches()? {
                MatchOutcome::EmptyComparisonSet {
                    registered,
                    sightings,
                    ..
                } => {
                    println!("no comparison performed ({registered} registered, {sightings} sightings)");
                }
                MatchOutcome::Compared(report) => {
                    for c in &report.candidates {
                        println!("{} {} {:.4}", c.registered_id, c.sighting_id, c.similarity);
                    }
                    if report.candidates.is_empty() {
                        println!("no matches");
                    }
                }
            }
        }
        Commands::Confirm {
            path,
            registered_id,
            sighting_id,
        } => {
            let log = CaseLog::open(&path, params.dimension)?;
            let workflow = MatchWorkflow::new(&log, params)?;
            workflow.update_status(&registered_id, &sighting_id)?;
        }
        Commands::Train {
            path,
            models,
            submitter,
        } => {
            let log = CaseLog::open(&path, params.dimension)?;
            let store = FileModelStore::new(&models)?;
            let workflow = MatchWorkflow::new(&log, params)?;
            let summary = workflow.train(&submitter, &store)?;
            println!(
                "trained {} on {}/{} rows, {} identities, k={}",
                summary.submitter, summary.used_rows, summary.rows, summary.identities, summary.k
            );
        }
        Commands::Classify {
            path,
            models,
            submitter,
            vector,
        } => {
            let log = CaseLog::open(&path, params.dimension)?;
            let store = FileModelStore::new(&models)?;
            let workflow = MatchWorkflow::new(&log, params)?;
            let embedding = parse_vector(&vector, params.dimension)?;
            let prediction = workflow.classify(&submitter, &embedding, &store)?;
            println!("{} {:.4}", prediction.label, prediction.confidence);
        }
        Commands::Remove { path, side, id } => {
            let log = CaseLog::open(&path, params.dimension)?;
            log.remove(side.into(), &id)?;
        }
        Commands::Show {
            path,
            side,
            submitted_by,
            status,
        } => {
            let log = CaseLog::open(&path, params.dimension)?;
            let records =
                log.filtered(side.into(), submitted_by.as_deref(), status.map(Status::from))?;
            if records.is_empty() {
                println!("no {} records", Origin::from(side));
            }
            for r in records {
                println!(
                    "{} {} {} {}",
                    r.id,
                    r.status,
                    r.submitted_by.as_deref().unwrap_or("-"),
                    r.matched_with.as_deref().unwrap_or("-")
                );
            }
        }
        Commands::Count {
            path,
            submitter,
            status,
        } => {
            let log = CaseLog::open(&path, params.dimension)?;
            let count = log.count_registered(&submitter, status.map(Status::from))?;
            println!("{count}");
        }
    }
    Ok(())
}
