//! CLI subcommands: init, validate, list, run, explain, schema.

use crate::config::{Config, OutputFormat, STARTER_CONFIG};
use crate::core::error::{ExecutionError, QueryError};
use crate::core::executor::{self, ExecutionContext};
use crate::core::parser::{self, DocumentParser};
use crate::core::registry::QueryRegistry;
use crate::core::resolver::Params;
use crate::core::result::QueryResult;
use crate::core::temporal::parse_date_text;
use crate::store::{snapshot, MemoryStore, RecordStore, Row, SqliteStore};
use chrono::{DateTime, Utc};
use clap::{Args, Subcommand};
use serde_json::Value;
use std::path::{Path, PathBuf};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a starter markql.toml, view document and snapshot
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Check view documents without touching a record store
    Validate {
        /// View document (repeatable; default: [views] paths)
        #[arg(short, long = "file")]
        files: Vec<PathBuf>,
    },

    /// List the views defined by the loaded documents
    List {
        /// View document (repeatable; default: [views] paths)
        #[arg(short, long = "file")]
        files: Vec<PathBuf>,
    },

    /// Run a view and print its rows
    Run {
        /// View name
        name: String,

        #[command(flatten)]
        source: SourceArgs,

        /// Output format (default: [output] format)
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
    },

    /// Show a view's shape, dependencies and pushdown split
    Explain {
        /// View name
        name: String,

        #[command(flatten)]
        source: SourceArgs,
    },

    /// Print the JSON schema of the view document format
    Schema,
}

/// Where views and records come from, and how to run against them.
#[derive(Args, Debug, Default)]
pub struct SourceArgs {
    /// View document (repeatable; default: [views] paths)
    #[arg(short, long = "file")]
    pub files: Vec<PathBuf>,

    /// Snapshot file of records (overrides [store])
    #[arg(long, conflicts_with = "sqlite")]
    pub snapshot: Option<PathBuf>,

    /// SQLite database of records (overrides [store])
    #[arg(long)]
    pub sqlite: Option<PathBuf>,

    /// Parameter binding, name=value (repeatable)
    #[arg(short, long = "param", value_parser = parse_param)]
    pub params: Vec<(String, String)>,

    /// Evaluate relative dates against this instant instead of now
    #[arg(long)]
    pub now: Option<String>,

    /// Evaluate every predicate in memory
    #[arg(long)]
    pub no_pushdown: bool,
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands, config: &Config) -> Result<(), String> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { files } => cmd_validate(&files, config),
        Commands::List { files } => cmd_list(&files, config),
        Commands::Run { name, source, format } => {
            cmd_run(&name, &source, format.unwrap_or(config.output.format), config)
        }
        Commands::Explain { name, source } => cmd_explain(&name, &source, config),
        Commands::Schema => cmd_schema(),
    }
}

const STARTER_VIEWS: &str = r#"# markql views
recent:
  description: Bookmarks saved in the last 30 days
  filter:
    created_at: within 30 days
  sort: created_at desc

recent_ai:
  description: Recent bookmarks tagged ai or anything under ai/
  from: recent
  filter:
    tags: any [ai, ai/*]

by_domain:
  description: Bookmark count and total stars per domain
  group: domain
  compute:
    count: count()
    sum_stars: sum(stars)
  sort: count desc

starred_since:
  description: Bookmarks with at least min_stars saved after a date
  params:
    min_stars: {type: int, default: 3}
    since: {type: date, default: 90 days ago}
  filter:
    stars: ">= {{params.min_stars}}"
    created_at: "after {{params.since}}"
"#;

const STARTER_RECORDS: &str = r#"bookmarks:
  - id: 1
    url: https://www.rust-lang.org/
    title: Rust
    domain: rust-lang.org
    tags: [rust, lang]
    stars: 5
    created_at: 2024-01-15
  - id: 2
    url: https://arxiv.org/abs/1706.03762
    title: Attention Is All You Need
    domain: arxiv.org
    tags: [ai/nlp, papers]
    stars: 4
    created_at: 2024-02-02
edges:
  - {source: 2, target: 1, relation: related}
"#;

fn cmd_init(path: &Path) -> Result<(), String> {
    let config_path = path.join(crate::config::CONFIG_FILE);
    if config_path.exists() {
        return Err(format!("{} already exists", config_path.display()));
    }

    let views_dir = path.join("views");
    std::fs::create_dir_all(&views_dir).map_err(|e| format!("cannot create views dir: {}", e))?;

    let files = [
        (config_path, STARTER_CONFIG),
        (views_dir.join("starter.yaml"), STARTER_VIEWS),
        (path.join("records.yaml"), STARTER_RECORDS),
    ];
    for (file, content) in &files {
        if file.exists() {
            continue;
        }
        std::fs::write(file, content).map_err(|e| format!("cannot write {}: {}", file.display(), e))?;
    }

    println!("Initialized markql project at {}", path.display());
    for (file, _) in &files {
        println!("  Created: {}", file.display());
    }
    Ok(())
}

/// Parse every view document into one registry.
///
/// Documents may reference views defined in other documents.
fn load_registry(files: &[PathBuf], config: &Config) -> Result<QueryRegistry, String> {
    let files = if files.is_empty() {
        config.view_files().map_err(|e| e.to_string())?
    } else {
        files.to_vec()
    };
    if files.is_empty() {
        return Err("no view documents (pass -f or set [views] paths)".to_string());
    }

    let parser = DocumentParser::new();
    let mut registry = QueryRegistry::new();
    for file in &files {
        parser
            .parse_file(file, &mut registry)
            .map_err(|e| format!("{}: {}", file.display(), e))?;
    }
    Ok(registry)
}

/// References to views no loaded document defines.
fn unresolved(registry: &QueryRegistry) -> Vec<String> {
    registry
        .iter()
        .flat_map(|(name, query)| {
            query
                .references()
                .into_iter()
                .filter(|view| !registry.contains(view))
                .map(move |view| format!("view '{}': unresolved view reference '{}'", name, view))
        })
        .collect()
}

fn cmd_validate(files: &[PathBuf], config: &Config) -> Result<(), String> {
    let registry = load_registry(files, config)?;
    let mut errors = unresolved(&registry);

    // Required parameters are unknown here; unresolved views are reported above.
    let empty = MemoryStore::new();
    let ctx = ExecutionContext::new(&empty, &registry);
    for (name, query) in registry.iter() {
        match executor::explain(query, &ctx, &Params::new()) {
            Ok(_)
            | Err(QueryError::Execution(
                ExecutionError::MissingParameter { .. } | ExecutionError::MissingView { .. },
            )) => {}
            Err(e) => errors.push(format!("view '{}': {}", name, e)),
        }
    }

    if errors.is_empty() {
        println!("OK: {} views", registry.len());
        Ok(())
    } else {
        for e in &errors {
            eprintln!("  ERROR: {}", e);
        }
        Err(format!("{} validation error(s)", errors.len()))
    }
}

fn cmd_list(files: &[PathBuf], config: &Config) -> Result<(), String> {
    let registry = load_registry(files, config)?;
    let empty = MemoryStore::new();
    let ctx = ExecutionContext::new(&empty, &registry);
    let width = registry.names().map(str::len).max().unwrap_or(0);

    for (name, query) in registry.iter() {
        let entity = match executor::explain(query, &ctx, &Params::new()) {
            Ok(explained) => explained.entity.to_string(),
            Err(_) => query
                .entity
                .map(|e| e.to_string())
                .unwrap_or_else(|| "?".to_string()),
        };
        let mut line = format!("{:<width$}  {:<8}", name, entity, width = width);
        let deps = query.references();
        if !deps.is_empty() {
            line.push_str(&format!("  from {}", deps.join(", ")));
        }
        if let Some(description) = &query.description {
            line.push_str(&format!("  {}", description));
        }
        println!("{}", line.trim_end());
    }
    Ok(())
}

/// Open the record store named on the command line, else in the config.
fn open_store(source: &SourceArgs, config: &Config) -> Result<Box<dyn RecordStore>, String> {
    let (snapshot_path, sqlite_path) = match (&source.snapshot, &source.sqlite) {
        (None, None) => (config.snapshot_path(), config.sqlite_path()),
        (snap, db) => (snap.clone(), db.clone()),
    };
    if let Some(path) = snapshot_path {
        let store = snapshot::load(&path).map_err(|e| e.to_string())?.into_store();
        return Ok(Box::new(store));
    }
    if let Some(path) = sqlite_path {
        if !path.is_file() {
            return Err(format!("sqlite database {} not found", path.display()));
        }
        let store = SqliteStore::open(&path).map_err(|e| e.to_string())?;
        return Ok(Box::new(store));
    }
    Err("no record store (pass --snapshot/--sqlite or set [store])".to_string())
}

fn parse_param(text: &str) -> Result<(String, String), String> {
    let (name, value) = text
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{}'", text))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("empty parameter name in '{}'", text));
    }
    Ok((name.to_string(), value.to_string()))
}

fn parse_now(text: Option<&str>) -> Result<DateTime<Utc>, String> {
    match text {
        None => Ok(Utc::now()),
        Some(t) => parse_date_text(t).ok_or_else(|| format!("invalid --now instant '{}'", t)),
    }
}

fn params_of(source: &SourceArgs) -> Params {
    source
        .params
        .iter()
        .map(|(name, value)| (name.clone(), Value::String(value.clone())))
        .collect()
}

fn context<'a>(
    store: &'a dyn RecordStore,
    registry: &'a QueryRegistry,
    source: &SourceArgs,
    config: &Config,
) -> Result<ExecutionContext<'a>, String> {
    let mut ctx = ExecutionContext::new(store, registry).with_now(parse_now(source.now.as_deref())?);
    if source.no_pushdown || !config.execution.pushdown {
        ctx = ctx.without_pushdown();
    }
    Ok(ctx)
}

fn cmd_run(name: &str, source: &SourceArgs, format: OutputFormat, config: &Config) -> Result<(), String> {
    let registry = load_registry(&source.files, config)?;
    let store = open_store(source, config)?;
    let ctx = context(store.as_ref(), &registry, source, config)?;
    let result = executor::execute_view(name, &ctx, &params_of(source)).map_err(|e| e.to_string())?;
    print!("{}", render(&result, format)?);
    Ok(())
}

fn cmd_explain(name: &str, source: &SourceArgs, config: &Config) -> Result<(), String> {
    let registry = load_registry(&source.files, config)?;
    let store = open_store(source, config)?;
    let ctx = context(store.as_ref(), &registry, source, config)?;
    let query = registry
        .get(name)
        .ok_or_else(|| format!("unknown view '{}'", name))?;
    let explained = executor::explain(query, &ctx, &params_of(source)).map_err(|e| e.to_string())?;
    print!("{}", explained);
    Ok(())
}

fn cmd_schema() -> Result<(), String> {
    let schema = serde_json::to_string_pretty(&parser::document_schema()).map_err(|e| e.to_string())?;
    println!("{}", schema);
    Ok(())
}

// ============================================================================
// Output
// ============================================================================

/// Render a result in the requested format.
pub fn render(result: &QueryResult, format: OutputFormat) -> Result<String, String> {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(result)
            .map(|s| s + "\n")
            .map_err(|e| e.to_string()),
        OutputFormat::Yaml => serde_yaml_ng::to_string(result).map_err(|e| e.to_string()),
        OutputFormat::Table => Ok(render_table(&result.rows())),
    }
}

const MAX_CELL: usize = 60;

fn cell(value: &Value) -> String {
    let text = match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) if items.iter().all(Value::is_string) => items
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    };
    if text.chars().count() > MAX_CELL {
        let cut: String = text.chars().take(MAX_CELL - 3).collect();
        format!("{}...", cut)
    } else {
        text
    }
}

fn render_table(rows: &[Row]) -> String {
    let mut columns: Vec<&str> = Vec::new();
    for row in rows {
        for key in row.keys() {
            if !columns.contains(&key.as_str()) {
                columns.push(key);
            }
        }
    }

    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            columns
                .iter()
                .map(|c| row.get(*c).map(cell).unwrap_or_default())
                .collect()
        })
        .collect();
    let widths: Vec<usize> = columns
        .iter()
        .enumerate()
        .map(|(i, c)| {
            cells
                .iter()
                .map(|r| r[i].chars().count())
                .chain(std::iter::once(c.len()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let line = |values: Vec<&str>| -> String {
        let padded: Vec<String> = values
            .iter()
            .zip(&widths)
            .map(|(v, w)| format!("{:<w$}", v, w = *w))
            .collect();
        padded.join("  ").trim_end().to_string()
    };

    let mut out = String::new();
    if !columns.is_empty() {
        out.push_str(&line(columns.clone()));
        out.push('\n');
        let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
        out.push_str(&line(rule.iter().map(String::as_str).collect()));
        out.push('\n');
        for row in &cells {
            out.push_str(&line(row.iter().map(String::as_str).collect()));
            out.push('\n');
        }
    }
    match rows.len() {
        1 => out.push_str("(1 row)\n"),
        n => out.push_str(&format!("({} rows)\n", n)),
    }
    out
}
