use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;
use traj_cache::codec;
use traj_cache::{
    AuditReport, CacheConfig, CacheError, ParamSet, ParamValue, Params, TrajectoryIndex,
    TrajectoryRecord,
};

#[derive(Parser)]
#[command(name = "traj", version = "0.1.0", about = "Trajectory cache for population simulations")]
struct Cli {
    /// YAML file with `data_dir` and `index_path`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    #[arg(long, global = true)]
    index: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the complete parameter set a run with these overrides would use.
    Resolve {
        #[arg(long = "set")]
        set_values: Vec<String>,
        #[arg(long)]
        json: bool,
    },
    /// List cached trajectories matching the given parameters.
    Find {
        #[arg(long = "set")]
        set_values: Vec<String>,
        /// Only filter on the given keys instead of pinning the rest to defaults.
        #[arg(long)]
        no_defaults: bool,
        #[arg(long)]
        json: bool,
    },
    List {
        #[arg(long)]
        json: bool,
    },
    /// Decode a stored trajectory.
    Show {
        file: String,
        /// Truncate to this many generations.
        #[arg(long)]
        steps: Option<u64>,
        #[arg(long)]
        json: bool,
    },
    /// Store a plain-text trajectory (e.g. simulator output) and index it.
    Import {
        path: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Compare the trajectory directory with the index.
    Audit {
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let json_mode = command_json_mode(&cli.command);
    let result = load_config(&cli).and_then(|config| run_command(&config, cli.command));
    match result {
        Ok(Some(payload)) => {
            emit_json(&payload);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            if json_mode {
                let code = err
                    .downcast_ref::<CacheError>()
                    .map(CacheError::code)
                    .unwrap_or("command_failed");
                emit_json(&json_error(code, format!("{:#}", err), json!({})));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn load_config(cli: &Cli) -> Result<CacheConfig> {
    let mut config = match &cli.config {
        Some(path) => CacheConfig::from_yaml_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => CacheConfig::default(),
    };
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(index) = &cli.index {
        config.index_path = index.clone();
    }
    Ok(config)
}

fn run_command(config: &CacheConfig, command: Commands) -> Result<Option<Value>> {
    match command {
        Commands::Resolve { set_values, json } => {
            let overrides = parse_set_values(&set_values)?;
            let params = traj_cache::resolve(&overrides, &mut rand::thread_rng())?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "resolve",
                    "params": params.to_set(),
                    "engine_args": params.engine_args(),
                    "exe_args": params.exe_args(),
                    "cost_units": params.cost_units(),
                    "estimated_seconds": params.estimated_seconds(),
                })));
            }
            for (key, value) in params.to_set() {
                println!("{}: {}", key, value);
            }
            println!("cost_units: {}", params.cost_units());
            println!("estimated_seconds: {:.3}", params.estimated_seconds());
        }
        Commands::Find {
            set_values,
            no_defaults,
            json,
        } => {
            let mut criteria = parse_set_values(&set_values)?;
            if no_defaults {
                criteria
                    .entry("steps".to_string())
                    .or_insert(ParamValue::Int(0));
            }
            let index = TrajectoryIndex::open(config)?;
            let found = index.find(&criteria, !no_defaults)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "find",
                    "use_defaults": !no_defaults,
                    "matches": found.iter().map(record_to_json).collect::<Vec<_>>(),
                })));
            }
            print_records(&found);
        }
        Commands::List { json } => {
            let index = TrajectoryIndex::open(config)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "list",
                    "index": index.index_path().display().to_string(),
                    "records": index.records().iter().map(record_to_json).collect::<Vec<_>>(),
                })));
            }
            print_records(index.records());
        }
        Commands::Show { file, steps, json } => {
            let index = TrajectoryIndex::open(config)?;
            let (stored, mut table) = index.load_file(&file)?;
            if let Some(steps) = steps {
                let params = Params::from_stored(&stored)?;
                if steps > params.steps {
                    return Err(anyhow!(
                        "{} only holds {} steps (requested {})",
                        file,
                        params.steps,
                        steps
                    ));
                }
                table = table.truncated(params.sample_count(steps));
            }
            if json {
                let columns: serde_json::Map<String, Value> = table
                    .names()
                    .iter()
                    .map(|name| (name.clone(), json!(table.column(name).unwrap_or(&[]))))
                    .collect();
                return Ok(Some(json!({
                    "ok": true,
                    "command": "show",
                    "file": file,
                    "params": stored,
                    "rows": table.len(),
                    "stats": columns,
                })));
            }
            print!("{}", codec::encode_text(&stored, &table)?);
        }
        Commands::Import { path, json } => {
            let record = import_trajectory(config, &path)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "import",
                    "source": path.display().to_string(),
                    "record": record_to_json(&record),
                })));
            }
            println!("imported: {}", path.display());
            println!("file: {}", record.file);
        }
        Commands::Audit { json } => {
            let index = TrajectoryIndex::open(config)?;
            let report = index.audit()?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "audit",
                    "consistent": report.is_consistent(),
                    "unindexed_files": report.unindexed_files,
                    "missing_files": report.missing_files,
                })));
            }
            print_audit(&report);
        }
    }
    Ok(None)
}

fn import_trajectory(config: &CacheConfig, path: &Path) -> Result<TrajectoryRecord> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let (stored, table) = match std::str::from_utf8(&bytes) {
        Ok(text) => codec::decode_text(text)?,
        Err(_) => codec::decode(&bytes)?,
    };
    let params = Params::from_stored(&stored)?;
    let mut index = TrajectoryIndex::open(config)?;
    let record = index.save_run(&params, &table)?;
    info!(source = %path.display(), file = %record.file, "imported trajectory");
    Ok(record)
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\",\"details\":{{}}}}}}"
        ),
    }
}

fn json_error(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::Resolve { json, .. }
        | Commands::Find { json, .. }
        | Commands::List { json }
        | Commands::Show { json, .. }
        | Commands::Import { json, .. }
        | Commands::Audit { json } => *json,
    }
}

fn record_to_json(record: &TrajectoryRecord) -> Value {
    json!({
        "file": record.file,
        "steps": record.steps(),
        "params": record.params,
        "stat_names": record.stat_names,
    })
}

fn print_records(records: &[TrajectoryRecord]) {
    for record in records {
        let seed = record
            .params
            .get("seed")
            .map(ToString::to_string)
            .unwrap_or_else(|| "?".to_string());
        let steps = record
            .params
            .get("steps")
            .map(ToString::to_string)
            .unwrap_or_else(|| "?".to_string());
        println!("{}  steps={} seed={}", record.file, steps, seed);
    }
    println!("matches: {}", records.len());
}

fn print_audit(report: &AuditReport) {
    for file in &report.unindexed_files {
        println!("unindexed: {}", file);
    }
    for file in &report.missing_files {
        println!("missing: {}", file);
    }
    println!("consistent: {}", report.is_consistent());
}

fn parse_set_values(values: &[String]) -> Result<ParamSet> {
    let mut out = ParamSet::new();
    for raw in values {
        let (key, val_raw) = raw
            .split_once('=')
            .ok_or_else(|| anyhow!("invalid --set '{}': expected k=v", raw))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(anyhow!("invalid --set '{}': key cannot be empty", raw));
        }
        let value = match val_raw.trim() {
            "True" => ParamValue::Bool(true),
            "False" => ParamValue::Bool(false),
            other => serde_json::from_str::<ParamValue>(other)
                .map_err(|_| anyhow!("invalid --set '{}': {} is not a number or boolean", raw, other))?,
        };
        out.insert(key.to_string(), value);
    }
    Ok(out)
}
