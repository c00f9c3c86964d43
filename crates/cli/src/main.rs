use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use spacekit_api::{completion, Callback, Completion, Limit, RecordingTransport, Request};
use spacekit_core::{Layout, Record, Row, Value};
use spacekit_space::{CallOpts, Keys, SelectOpts, Space, SpacesConfig, UpdateEntry, WriteOpts};
use tracing::{debug, info, warn};

#[derive(Parser, Debug)]
#[command(name = "spacectl", version, about = "Resolve space requests without a server")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Space definitions (YAML, or JSON by extension)
    #[arg(short = 'c', long = "config", env = "SPACEKIT_CONFIG", global = true)]
    config: PathBuf,

    /// Space name inside the config
    #[arg(short = 's', long = "space", global = true)]
    space: Option<String>,

    /// Canned reply tuples as JSON, e.g. '[[1, "ann"]]'; shown translated
    #[arg(long = "reply", global = true)]
    reply: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// List spaces, or show fields and indexes of one
    Describe,
    /// Select by any index
    Select {
        /// Key record(s) as JSON: '{"name": "ann"}', '[{"id": 1}, {"id": 2}]' or '{"id": [1, 2]}'
        keys: String,
        #[arg(long = "offset", default_value_t = 0)]
        offset: u32,
        #[arg(long = "limit")]
        limit: Option<u32>,
        /// First match only
        #[arg(long = "first", action = ArgAction::SetTrue, conflicts_with = "limit")]
        first: bool,
    },
    /// Fetch one tuple by primary key
    Get {
        /// Primary key: scalar, JSON list or JSON record
        pk: String,
    },
    /// Insert a record; fails on an existing key
    Insert {
        record: String,
        #[arg(long = "return-tuple", action = ArgAction::SetTrue)]
        return_tuple: bool,
    },
    /// Insert or overwrite a record
    Replace {
        record: String,
        #[arg(long = "return-tuple", action = ArgAction::SetTrue)]
        return_tuple: bool,
    },
    /// Update by primary key
    Update {
        pk: String,
        /// Entries as JSON: '[["name", {"set": "x"}], [0, {"add": 1}], ["_tail", [{"set": "a"}]]]'
        ops: String,
        #[arg(long = "return-tuple", action = ArgAction::SetTrue)]
        return_tuple: bool,
    },
    /// Delete by primary key
    Delete {
        pk: String,
        #[arg(long = "return-tuple", action = ArgAction::SetTrue)]
        return_tuple: bool,
    },
    /// Call a stored procedure with the space number prepended
    Call {
        function: String,
        /// Arguments as a JSON list
        #[arg(default_value = "[]")]
        args: String,
    },
}

fn init_tracing() {
    let env = std::env::var("SPACEKIT_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("SPACEKIT_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid SPACEKIT_METRICS_ADDR; expected host:port");
        }
    }
}

fn load_config(path: &Path) -> Result<SpacesConfig> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let cfg: SpacesConfig = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&text).with_context(|| format!("parsing JSON {}", path.display()))?,
        _ => serde_yaml::from_str(&text).with_context(|| format!("parsing YAML {}", path.display()))?,
    };
    debug!(spaces = cfg.spaces.len(), path = %path.display(), "config loaded");
    Ok(cfg)
}

/// Key argument: one record or a list of records.
#[derive(Deserialize)]
#[serde(untagged)]
enum KeysArg {
    One(Record),
    Many(Vec<Record>),
}

/// Primary key argument: a record, or raw values.
#[derive(Deserialize)]
#[serde(untagged)]
enum PkArg {
    Named(Record),
    Raw(Value),
}

fn parse_json<T: DeserializeOwned>(what: &str, text: &str) -> Result<T> {
    serde_json::from_str(text).with_context(|| format!("parsing {} {:?}", what, text))
}

/// Bare words are taken as string keys.
fn parse_pk(text: &str) -> Result<spacekit_schema::PrimaryKey> {
    let arg = match serde_json::from_str::<PkArg>(text) {
        Ok(arg) => arg,
        Err(_) => PkArg::Raw(Value::from(text)),
    };
    Ok(match arg {
        PkArg::Named(rec) => rec.into(),
        PkArg::Raw(v) => v.into(),
    })
}

fn codecs(l: &Layout) -> String { l.codecs.iter().map(|c| c.name()).collect::<Vec<_>>().join(",") }

fn row(vals: &[Value]) -> String { vals.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ") }

fn print_request(req: &Request, output: Output) -> Result<()> {
    match output {
        Output::Json => println!("{}", serde_json::to_string_pretty(req)?),
        Output::Human => {
            match req {
                Request::Select(r) => {
                    println!("select space={} index={} offset={} limit={:?}", r.space_no, r.index_no, r.offset, r.limit);
                    println!("  index types: {}", codecs(&r.index_types));
                    for k in &r.keys { println!("  key: [{}]", row(k)); }
                    println!("  shards: {:?}", r.shard_numbers.as_slice());
                }
                Request::Insert(r) => {
                    println!("{} space={} return_tuple={}", req.name(), r.space_no, r.return_tuple);
                    println!("  tuple: [{}]", row(&r.tuple));
                    println!("  types: {}", codecs(&r.field_types));
                    println!("  shards: {:?}", r.shard_numbers.as_slice());
                }
                Request::Update(r) => {
                    println!("update space={} return_tuple={}", r.space_no, r.return_tuple);
                    println!("  key: [{}]", row(&r.key));
                    for op in &r.ops { println!("  #{} {:?}", op.position, op.op); }
                    println!("  shards: {:?}", r.shard_numbers.as_slice());
                }
                Request::Delete(r) => {
                    println!("delete space={} return_tuple={}", r.space_no, r.return_tuple);
                    println!("  key: [{}]", row(&r.key));
                    println!("  shards: {:?}", r.shard_numbers.as_slice());
                }
                Request::Call(r) => {
                    println!("call {}({}) return_tuple={}", r.function, row(&r.args), r.return_tuple);
                    if let Some(l) = &r.returns { println!("  returns: {}", codecs(l)); }
                }
            }
        }
    }
    Ok(())
}

async fn print_rows(done: Completion, output: Output) -> Result<()> {
    let rows = done.await.map_err(|e| anyhow!("transport: {}", e))?;
    for row in rows {
        match (row, output) {
            (Row::Record(rec), Output::Json) => println!("{}", serde_json::to_string(&rec)?),
            (Row::Record(rec), Output::Human) => {
                let parts: Vec<String> = rec.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
                println!("  -> {}", parts.join(" "));
            }
            (Row::Tuple(t), _) => println!("  -> {}", Value::Array(t)),
            (other, _) => println!("  -> {:?}", other),
        }
    }
    Ok(())
}

fn describe(cfg: &SpacesConfig, name: Option<&str>, space: Option<&Space>, output: Output) -> Result<()> {
    let (name, space) = match (name, space) {
        (Some(n), Some(s)) => (n, s),
        _ => {
            match output {
                Output::Json => println!("{}", serde_json::to_string_pretty(&cfg.spaces)?),
                Output::Human => for (n, def) in &cfg.spaces { println!("{:<16} space_no={} fields={}", n, def.space_no, def.fields.len()) },
            }
            return Ok(());
        }
    };
    match output {
        Output::Json => println!("{}", serde_json::to_string_pretty(&cfg.get(name))?),
        Output::Human => {
            let schema = space.schema();
            println!("{} (space {})", name, space.space_no());
            for f in schema.field_names() {
                let codec = schema.codec(f).map(|c| c.name().to_string()).unwrap_or_default();
                println!("  {:>2} {:<16} {}", schema.position(f).unwrap_or_default(), f, codec);
            }
            let tail: Vec<&str> = schema.tail_codecs().iter().map(|c| c.name()).collect();
            println!(
                "  {:>2} _tail            [{}]{}",
                schema.tail_position(),
                tail.join(","),
                if schema.tail_declared() { "" } else { " (implicit)" }
            );
            for (no, idx) in space.indexes().iter().enumerate() {
                println!("  index {}: {}", no, idx.fields().join(", "));
            }
            println!("  shard key: {} over {} shard(s)", space.router().fields().join(", "), space.router().shard_count());
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    let cfg = load_config(&cli.config)?;
    let transport = Arc::new(RecordingTransport::new());
    let space = match cli.space.as_deref() {
        Some(name) => {
            let def = cfg.get(name).ok_or_else(|| anyhow!("no space {:?} in {}", name, cli.config.display()))?;
            Some(def.build(transport.clone()).with_context(|| format!("defining space {:?}", name))?)
        }
        None => None,
    };
    let space = match space {
        Some(space) => space,
        None if matches!(cli.command, Commands::Describe) => return describe(&cfg, None, None, cli.output),
        None => bail!("--space is required for this command"),
    };

    if let Some(reply) = cli.reply.as_deref() {
        transport.push_reply(Ok(parse_json::<Vec<Vec<Value>>>("reply", reply)?));
    }
    let (cb, done): (Callback, Completion) = completion();
    let write = |return_tuple: bool| WriteOpts { return_tuple };

    match cli.command {
        Commands::Describe => return describe(&cfg, cli.space.as_deref(), Some(&space), cli.output),
        Commands::Select { keys, offset, limit, first } => {
            let keys = match parse_json::<KeysArg>("keys", &keys)? {
                KeysArg::One(rec) => Keys::One(rec),
                KeysArg::Many(recs) => Keys::Many(recs),
            };
            let limit = match (first, limit) {
                (true, _) => Limit::First,
                (false, Some(n)) => Limit::Count(n),
                (false, None) => Limit::Unbounded,
            };
            space.all(keys, cb, SelectOpts { offset, limit })?;
        }
        Commands::Get { pk } => space.get_by_primary_key(parse_pk(&pk)?, cb)?,
        Commands::Insert { record, return_tuple } => space.insert(&parse_json("record", &record)?, cb, write(return_tuple))?,
        Commands::Replace { record, return_tuple } => space.replace(&parse_json("record", &record)?, cb, write(return_tuple))?,
        Commands::Update { pk, ops, return_tuple } => {
            let entries: Vec<UpdateEntry> = parse_json("update entries", &ops)?;
            space.update(parse_pk(&pk)?, &entries, cb, write(return_tuple))?;
        }
        Commands::Delete { pk, return_tuple } => space.delete(parse_pk(&pk)?, cb, write(return_tuple))?,
        Commands::Call { function, args } => space.call(&function, parse_json("args", &args)?, cb, CallOpts::default())?,
    }
    metrics::counter!("spacectl_commands_total", 1);

    for req in transport.take_requests() { print_request(&req, cli.output)?; }
    print_rows(done, cli.output).await
}
