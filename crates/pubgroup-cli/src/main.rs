use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use pubgroup_core::{
    AppConfig, Database, ImportSource, PublicationAttributes, PublicationType, User, UserIdentifier,
};
use pubgroup_dedup::{
    ActionOutcome, AdminActions, AutoMergePolicy, DuplicateGroupManager, IgnoreRequest,
    ImportReconciler, MergeRequest, NormalizedContributor, PublicationService, SimilarityMatcher,
    read_jsonl,
};

// ─── CLI Definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "pubgroup",
    about = "Publication import reconciliation and duplicate review",
    version,
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output in JSON format (for scripts).
    /// Also enabled by setting PUBGROUP_JSON=1.
    #[arg(long, global = true)]
    json: bool,

    /// Raise log verbosity (-v debug, -vv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Import a JSON Lines file of normalized records from one source.
    Import {
        /// activity_reporting, research_info, citation_index or manual.
        source: String,
        file: PathBuf,
    },

    /// Operations on publications.
    Publication {
        #[command(subcommand)]
        action: PublicationAction,
    },

    /// User management.
    User {
        #[command(subcommand)]
        action: UserAction,
    },

    /// Duplicate groups.
    Group {
        #[command(subcommand)]
        action: GroupAction,
    },

    /// Merge selected publications of a group into a target.
    Merge {
        #[arg(long)]
        group: String,
        #[arg(long)]
        target: Option<String>,
        #[arg(long = "select", action = clap::ArgAction::Append)]
        selected: Vec<String>,
        /// Delete conflicting non-duplicate groups instead of stopping.
        #[arg(long)]
        confirm_override: bool,
    },

    /// Mark selected publications as not duplicates of one another.
    Ignore {
        #[arg(long)]
        group: String,
        #[arg(long = "select", action = clap::ArgAction::Append)]
        selected: Vec<String>,
    },

    /// Merge every unambiguous two-source pair.
    AutoMerge,
}

// ─── Publication Actions ────────────────────────────────────────────────────

#[derive(Subcommand)]
enum PublicationAction {
    /// List publications, newest first.
    List {
        /// Include hidden publications.
        #[arg(long)]
        all: bool,
        #[arg(long, default_value = "50")]
        limit: usize,
        #[arg(long, default_value = "0")]
        offset: usize,
    },

    /// Show a publication with its imports, contributors and authorships.
    Show { id: String },

    /// Enter a publication by hand.
    Add {
        #[arg(long)]
        title: String,
        #[command(flatten)]
        fields: AttributeArgs,
        /// Contributor as "First Last", in order.
        #[arg(long, action = clap::ArgAction::Append)]
        author: Vec<String>,
    },

    /// Edit a publication; it is then protected from import overwrites.
    Edit {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[command(flatten)]
        fields: AttributeArgs,
    },
}

#[derive(Args)]
struct AttributeArgs {
    #[arg(long)]
    secondary_title: Option<String>,
    #[arg(long = "type")]
    publication_type: Option<String>,
    #[arg(long)]
    journal: Option<String>,
    #[arg(long)]
    volume: Option<String>,
    #[arg(long)]
    issue: Option<String>,
    #[arg(long)]
    pages: Option<String>,
    #[arg(long)]
    issn: Option<String>,
    #[arg(long)]
    isbn: Option<String>,
    #[arg(long)]
    doi: Option<String>,
    /// YYYY-MM-DD
    #[arg(long)]
    date: Option<String>,
    #[arg(long)]
    citations: Option<u32>,
}

// ─── User Actions ───────────────────────────────────────────────────────────

#[derive(Subcommand)]
enum UserAction {
    /// Register an internal user.
    Add {
        #[arg(long)]
        first: String,
        #[arg(long)]
        last: String,
        /// Cross reference as scheme:value, e.g. orcid:0000-0002-1825-0097.
        #[arg(long, action = clap::ArgAction::Append)]
        identifier: Vec<String>,
    },
    /// List users.
    List,
}

// ─── Group Actions ──────────────────────────────────────────────────────────

#[derive(Subcommand)]
enum GroupAction {
    /// List duplicate groups.
    List,
    /// Show a group with its members and overlapping non-duplicate groups.
    Show { id: String },
    /// Re-run grouping over every publication.
    Rebuild,
}

// ─── Main ────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let start = Instant::now();
    let cli = Cli::parse();

    let json_output = cli.json || std::env::var("PUBGROUP_JSON").as_deref() == Ok("1");

    let mut config = AppConfig::load()?;
    if let Ok(dir) = std::env::var("PUBGROUP_DATA_DIR") {
        config.set_data_dir(dir.into());
    }
    init_tracing(&config, cli.verbose);

    let db = open_db(&config)?;
    let manager = DuplicateGroupManager::new(SimilarityMatcher::from_config(&config.matching));

    match cli.command {
        Commands::Import { source, file } => {
            let source = ImportSource::from_str(&source)?;
            let reader = BufReader::new(
                File::open(&file).with_context(|| format!("cannot open {}", file.display()))?,
            );
            let report = ImportReconciler::new(source, manager).run(&db, read_jsonl(reader))?;

            if json_output {
                print_ok(&report, start)?;
            } else {
                println!(
                    "{source}: {} created, {} updated, {} protected, {} errors",
                    report.created,
                    report.updated,
                    report.protected,
                    report.errors.len()
                );
                for err in &report.errors {
                    let ident = err.source_identifier.as_deref().unwrap_or("-");
                    eprintln!("  record {} ({ident}): {}", err.record, err.message);
                }
            }
        }

        Commands::Publication { action } => match action {
            PublicationAction::List { all, limit, offset } => {
                let items = db.list_publications(!all, limit, offset)?;
                if json_output {
                    let total = db.count_publications()?;
                    print_ok(
                        &serde_json::json!({ "items": items, "total": total, "limit": limit, "offset": offset }),
                        start,
                    )?;
                } else if items.is_empty() {
                    println!("No publications. Use `pubgroup import` or `pubgroup publication add`.");
                } else {
                    for p in &items {
                        let year = p.attributes.publication_year().map(|y| y.to_string()).unwrap_or_default();
                        let flags = match (p.visible, p.duplicate_group_id.is_some()) {
                            (false, _) => "hidden",
                            (true, true) => "grouped",
                            (true, false) => "",
                        };
                        println!(
                            "{id}  {title:<50}  {year:<4}  {flags}",
                            id = &p.id.to_string()[..8],
                            title = p.title(),
                        );
                    }
                }
            }

            PublicationAction::Show { id } => {
                let id = parse_id(&id)?;
                match db.get_publication_detail(&id) {
                    Ok(detail) => {
                        if json_output {
                            print_ok(&detail, start)?;
                        } else {
                            println!("{}", serde_json::to_string_pretty(&detail)?);
                        }
                    }
                    Err(_) => not_found("publication", &id, json_output, start)?,
                }
            }

            PublicationAction::Add { title, fields, author } => {
                let mut attributes = PublicationAttributes::new(title);
                fields.apply(&mut attributes)?;
                let contributors: Vec<NormalizedContributor> = author
                    .iter()
                    .enumerate()
                    .map(|(idx, name)| contributor(idx as u32 + 1, name))
                    .collect();

                let (publication, grouping) =
                    PublicationService::new(manager).create_manual(&db, attributes, &contributors)?;
                if json_output {
                    print_ok(&serde_json::json!({ "publication": publication, "grouping": grouping }), start)?;
                } else {
                    println!("Added: {} ({})", publication.title(), publication.id);
                }
            }

            PublicationAction::Edit { id, title, fields } => {
                let id = parse_id(&id)?;
                let Ok(current) = db.get_publication(&id) else {
                    return not_found("publication", &id, json_output, start);
                };
                let mut attributes = current.attributes;
                if let Some(title) = title {
                    attributes.title = title;
                }
                fields.apply(&mut attributes)?;

                let publication = PublicationService::new(manager).edit(&db, &id, attributes)?;
                if json_output {
                    print_ok(&publication, start)?;
                } else {
                    println!("Updated: {}", publication.title());
                }
            }
        },

        Commands::User { action } => match action {
            UserAction::Add { first, last, identifier } => {
                let mut user = User::new(first, last);
                for raw in &identifier {
                    user = user.with_identifier(UserIdentifier::from_str(raw)?);
                }
                db.save_user(&user)?;
                if json_output {
                    print_ok(&user, start)?;
                } else {
                    println!("Added user {} {} ({})", user.first_name, user.last_name, user.id);
                }
            }
            UserAction::List => {
                let users = db.list_users()?;
                if json_output {
                    print_ok(&serde_json::json!({ "items": users, "total": users.len() }), start)?;
                } else {
                    for user in &users {
                        let ids: Vec<String> = user
                            .identifiers
                            .iter()
                            .map(|i| format!("{}:{}", i.scheme, i.value))
                            .collect();
                        println!("{}  {} {}  {}", &user.id.to_string()[..8], user.first_name, user.last_name, ids.join(" "));
                    }
                }
            }
        },

        Commands::Group { action } => match action {
            GroupAction::List => {
                let groups = db.list_duplicate_groups()?;
                if json_output {
                    print_ok(&serde_json::json!({ "items": groups, "total": groups.len() }), start)?;
                } else if groups.is_empty() {
                    println!("No duplicate groups.");
                } else {
                    for group in &groups {
                        println!("{}  {} members", group.id, group.members.len());
                    }
                }
            }

            GroupAction::Show { id } => {
                let id = parse_id(&id)?;
                match db.get_group_view(&id) {
                    Ok(view) => {
                        if json_output {
                            print_ok(&view, start)?;
                        } else {
                            println!("Group {}", view.group.id);
                            for p in &view.members {
                                let marker = if p.visible { "*" } else { " " };
                                println!("  {marker} {}  {}", p.id, p.title());
                            }
                            for ndg in &view.non_duplicate_groups {
                                println!("  not duplicates: {}", ndg.members.iter().map(Uuid::to_string).collect::<Vec<_>>().join(", "));
                            }
                        }
                    }
                    Err(_) => not_found("group", &id, json_output, start)?,
                }
            }

            GroupAction::Rebuild => {
                let report = manager.regroup_all(&db)?;
                if json_output {
                    print_ok(&report, start)?;
                } else {
                    println!(
                        "Scanned {}: {} groups created, {} extended",
                        report.scanned, report.created, report.extended
                    );
                }
            }
        },

        Commands::Merge { group, target, selected, confirm_override } => {
            let request = MergeRequest {
                group_id: parse_id(&group)?,
                target_publication_id: target.as_deref().map(parse_id).transpose()?,
                selected_publication_ids: selected.iter().map(|s| parse_id(s)).collect::<Result<_>>()?,
            };
            let actions = AdminActions::new();
            let mut outcome = actions.merge(&db, &request)?;
            if confirm_override
                && let ActionOutcome::ConfirmOverride { conflicting, .. } = &outcome
            {
                let conflicting = conflicting.clone();
                outcome = actions.confirm_override(&db, &request, &conflicting)?;
            }
            report_outcome(&outcome, json_output, start)?;
        }

        Commands::Ignore { group, selected } => {
            let request = IgnoreRequest {
                group_id: parse_id(&group)?,
                selected_publication_ids: selected.iter().map(|s| parse_id(s)).collect::<Result<_>>()?,
            };
            let outcome = AdminActions::new().ignore(&db, &request)?;
            report_outcome(&outcome, json_output, start)?;
        }

        Commands::AutoMerge => {
            let report = AutoMergePolicy::from_config(&config.auto_merge).run(&db)?;
            if json_output {
                print_ok(&report, start)?;
            } else {
                println!(
                    "Examined {} groups: {} merged, {} left for review",
                    report.examined,
                    report.merged.len(),
                    report.skipped
                );
            }
        }
    }

    Ok(())
}

// ─── Helpers ────────────────────────────────────────────────────────────────

fn init_tracing(config: &AppConfig, verbose: u8) {
    let level = match verbose {
        0 => config.logging.level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("pubgroup_core={level},pubgroup_dedup={level},pubgroup_cli={level}"))
    });

    let json = config.logging.json;
    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .init();
}

impl AttributeArgs {
    fn apply(self, attributes: &mut PublicationAttributes) -> Result<()> {
        if let Some(v) = self.secondary_title { attributes.secondary_title = Some(v); }
        if let Some(v) = self.publication_type { attributes.publication_type = PublicationType::from_str(&v)?; }
        if let Some(v) = self.journal { attributes.journal = Some(v); }
        if let Some(v) = self.volume { attributes.volume = Some(v); }
        if let Some(v) = self.issue { attributes.issue = Some(v); }
        if let Some(v) = self.pages { attributes.page_range = Some(v); }
        if let Some(v) = self.issn { attributes.issn = Some(v); }
        if let Some(v) = self.isbn { attributes.isbn = Some(v); }
        if let Some(v) = self.doi { attributes.doi = Some(v); }
        if let Some(v) = self.date {
            let date = NaiveDate::parse_from_str(&v, "%Y-%m-%d")
                .with_context(|| format!("invalid date {v:?}, expected YYYY-MM-DD"))?;
            attributes.publication_date = Some(date);
        }
        if let Some(v) = self.citations { attributes.citation_count = v; }
        Ok(())
    }
}

/// "First Middle Last" becomes first + last with the last word as surname.
fn contributor(position: u32, name: &str) -> NormalizedContributor {
    let mut words: Vec<&str> = name.split_whitespace().collect();
    let last = words.pop().map(str::to_string);
    let first = (!words.is_empty()).then(|| words.join(" "));
    NormalizedContributor {
        position,
        first_name: first,
        last_name: last,
        ..Default::default()
    }
}

fn report_outcome(outcome: &ActionOutcome, json_output: bool, start: Instant) -> Result<()> {
    let failed = match outcome {
        ActionOutcome::Redirect { notice, .. } => notice.is_error(),
        ActionOutcome::ConfirmOverride { .. } => true,
    };

    if json_output {
        let status = if failed { "error" } else { "ok" };
        print_json(&serde_json::json!({
            "status": status,
            "data": outcome,
            "meta": { "duration_ms": start.elapsed().as_millis() }
        }))?;
    } else {
        match outcome {
            ActionOutcome::Redirect { group_id, notice } => {
                println!("group {group_id}: {}", serde_json::to_string(notice)?);
            }
            ActionOutcome::ConfirmOverride { group_id, conflicting, .. } => {
                eprintln!(
                    "group {group_id}: blocked by {} non-duplicate group(s); rerun with --confirm-override",
                    conflicting.len()
                );
            }
        }
    }

    if failed {
        std::process::exit(1);
    }
    Ok(())
}

fn print_ok<T: Serialize>(data: &T, start: Instant) -> Result<()> {
    print_json(&serde_json::json!({
        "status": "ok",
        "data": data,
        "meta": { "duration_ms": start.elapsed().as_millis() }
    }))
}

fn print_json(val: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(val)?);
    Ok(())
}

fn not_found(kind: &str, id: &Uuid, json_output: bool, start: Instant) -> Result<()> {
    if json_output {
        print_json(&serde_json::json!({
            "status": "error",
            "error": "not_found",
            "message": format!("{kind} {id} not found"),
            "meta": { "duration_ms": start.elapsed().as_millis() }
        }))?;
    } else {
        eprintln!("{kind} not found: {id}");
    }
    std::process::exit(2);
}

fn parse_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw.trim()).with_context(|| format!("invalid id {raw:?}"))
}

fn open_db(config: &AppConfig) -> Result<Database> {
    let db_path = config.database_path();
    let db = Database::open(&db_path)
        .with_context(|| format!("cannot open database {}", db_path.display()))?;
    tracing::debug!(path = %db_path.display(), "database opened");
    Ok(db)
}
