use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use cholotool_core::backup::{BackupLedger, Snapshot};
use cholotool_core::builder::load_cards;
use cholotool_core::config::{ConfigPatch, ToolConfig, load_config, patch_config};
use cholotool_core::css::{CssScope, page_url, purge_css, resolve_site_url, warm_page};
use cholotool_core::http::{HttpClient, HttpClientConfig, parse_url};
use cholotool_core::ids::IdGenerator;
use cholotool_core::media::{DownloadOptions, download_image};
use cholotool_core::migrate::{latest_version, pending_migration_count, run_migrations};
use cholotool_core::mysql::MySqlStore;
use cholotool_core::pages::{
    CardPlacement, ImportMode, WriteOptions, WriteOutcome, apply_service_cards, export_page,
    find_keys, import_template, inspect_page, load_post, page_history, parse_setting_value,
    repair_page, restore_page, set_key, strip_keys, validate_page,
};
use cholotool_core::repair::RepairOptions;
use cholotool_core::runtime::{
    InitOptions, PathOverrides, ResolutionContext, ResolvedPaths, ensure_runtime_ready_for_writes,
    init_layout, inspect_runtime, normalize_for_display, resolve_paths,
};
use cholotool_core::smoke::{SmokeCheck, load_checks, run_smoke};
use cholotool_core::store::{PostMetaStore, PostSummary};
use cholotool_core::templates::{list_templates, load_template};
use cholotool_core::validate::WidgetRegistry;
use cholotool_core::wxr::convert_wxr;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(
    name = "cholotool",
    version,
    about = "Maintain Elementor page data of the Cholot WordPress site"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    data_dir: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[arg(short, long, global = true, help = "Enable debug logging on stderr")]
    verbose: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    project_root: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    config: Option<PathBuf>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            data_dir: cli.data_dir.clone(),
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    Init(InitArgs),
    Status(StatusArgs),
    Db(DbArgs),
    Posts(PostsArgs),
    Page(PageArgs),
    Templates(TemplatesArgs),
    Css(CssArgs),
    Media(MediaArgs),
    Wxr(WxrArgs),
    #[command(about = "Fetch front-end URLs and check for expected and forbidden text")]
    Smoke(SmokeArgs),
}

#[derive(Debug, Args)]
struct InitArgs {
    #[arg(long, help = "Overwrite an existing config.toml")]
    force: bool,
    #[arg(long, help = "Skip writing .cholotool/config.toml")]
    no_config: bool,
    #[arg(long, help = "Skip creating templates/")]
    no_templates: bool,
    #[arg(long, value_name = "URL")]
    site_url: Option<String>,
    #[arg(long, value_name = "HOST")]
    db_host: Option<String>,
    #[arg(long, value_name = "NAME")]
    db_name: Option<String>,
    #[arg(long, value_name = "USER")]
    db_user: Option<String>,
    #[arg(long, value_name = "PREFIX")]
    table_prefix: Option<String>,
}

#[derive(Debug, Args)]
struct StatusArgs {
    #[arg(long, help = "Connect to MySQL and report the server version")]
    check_db: bool,
}

#[derive(Debug, Args)]
struct DbArgs {
    #[command(subcommand)]
    command: DbSubcommand,
}

#[derive(Debug, Subcommand)]
enum DbSubcommand {
    Migrate,
    Stats,
}

#[derive(Debug, Args)]
struct PostsArgs {
    #[command(subcommand)]
    command: PostsSubcommand,
}

#[derive(Debug, Subcommand)]
enum PostsSubcommand {
    #[command(about = "List posts that carry Elementor data")]
    List,
}

#[derive(Debug, Args)]
struct WriteArgs {
    #[arg(long, help = "Show a diff instead of writing")]
    dry_run: bool,
    #[arg(long, help = "Do not snapshot the previous value")]
    no_backup: bool,
    #[arg(long, value_name = "TEXT", help = "Reason recorded with the snapshot")]
    reason: Option<String>,
}

#[derive(Debug, Args)]
struct PageArgs {
    #[command(subcommand)]
    command: PageSubcommand,
}

#[derive(Debug, Subcommand)]
enum PageSubcommand {
    Inspect {
        post_id: u64,
    },
    Validate {
        post_id: u64,
    },
    Export {
        post_id: u64,
        #[arg(long, value_name = "PATH", help = "File or directory (default: exports dir)")]
        output: Option<PathBuf>,
    },
    Import {
        post_id: u64,
        template: String,
        #[arg(long, default_value = "append", help = "replace, append or prepend")]
        mode: String,
        #[command(flatten)]
        write: WriteArgs,
    },
    #[command(about = "Insert the service-card section built from a cards JSON file")]
    Cards {
        post_id: u64,
        #[arg(long, value_name = "FILE")]
        cards: PathBuf,
        #[arg(long, conflicts_with = "replace")]
        prepend: bool,
        #[arg(long, value_name = "ELEMENT_ID")]
        replace: Option<String>,
        #[command(flatten)]
        write: WriteArgs,
    },
    Find {
        post_id: u64,
        prefix: String,
    },
    Set {
        post_id: u64,
        element_id: String,
        key: String,
        #[arg(help = "JSON value; anything else is stored as a string")]
        value: String,
        #[command(flatten)]
        write: WriteArgs,
    },
    Strip {
        post_id: u64,
        prefix: String,
        #[arg(long, value_name = "ELEMENT_ID", help = "Limit to one element")]
        element: Option<String>,
        #[command(flatten)]
        write: WriteArgs,
    },
    Repair {
        post_id: u64,
        #[arg(long, help = "Replace unparsable data with a placeholder page")]
        reset_invalid: bool,
        #[arg(long, help = "Remove widgets whose type is not registered")]
        drop_unknown_widgets: bool,
        #[command(flatten)]
        write: WriteArgs,
    },
    Restore {
        post_id: u64,
        #[arg(long, value_name = "ID", help = "Snapshot id (default: latest)")]
        snapshot: Option<i64>,
        #[command(flatten)]
        write: WriteArgs,
    },
    History {
        post_id: u64,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Debug, Args)]
struct TemplatesArgs {
    #[command(subcommand)]
    command: TemplatesSubcommand,
}

#[derive(Debug, Subcommand)]
enum TemplatesSubcommand {
    List,
}

#[derive(Debug, Args)]
struct CssArgs {
    #[command(subcommand)]
    command: CssSubcommand,
}

#[derive(Debug, Subcommand)]
enum CssSubcommand {
    Purge {
        #[arg(long, value_name = "ID", conflicts_with = "all", required_unless_present = "all")]
        post: Option<u64>,
        #[arg(long)]
        all: bool,
    },
    Warm {
        #[arg(value_name = "POST_ID|URL")]
        target: String,
    },
}

#[derive(Debug, Args)]
struct MediaArgs {
    #[command(subcommand)]
    command: MediaSubcommand,
}

#[derive(Debug, Subcommand)]
enum MediaSubcommand {
    Download {
        url: String,
        #[arg(long, value_name = "FILE")]
        name: Option<String>,
        #[arg(long, value_name = "YYYY/MM")]
        subdir: Option<String>,
        #[arg(long)]
        overwrite: bool,
    },
}

#[derive(Debug, Args)]
struct WxrArgs {
    #[command(subcommand)]
    command: WxrSubcommand,
}

#[derive(Debug, Subcommand)]
enum WxrSubcommand {
    Convert {
        input: PathBuf,
        #[arg(long, value_name = "DIR")]
        output: Option<PathBuf>,
        #[arg(long = "post-type", value_name = "TYPE")]
        post_types: Vec<String>,
    },
}

#[derive(Debug, Args)]
struct SmokeArgs {
    urls: Vec<String>,
    #[arg(long, value_name = "FILE", help = "TOML file with [[check]] entries")]
    file: Option<PathBuf>,
    #[arg(long, value_name = "TEXT", help = "Text every URL argument must contain")]
    expect: Vec<String>,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Init(args)) => run_init(&runtime, args),
        Some(Commands::Status(args)) => run_status(&runtime, args),
        Some(Commands::Db(DbArgs { command })) => match command {
            DbSubcommand::Migrate => run_db_migrate(&runtime),
            DbSubcommand::Stats => run_db_stats(&runtime),
        },
        Some(Commands::Posts(PostsArgs { command })) => match command {
            PostsSubcommand::List => run_posts_list(&runtime),
        },
        Some(Commands::Page(PageArgs { command })) => run_page(&runtime, command),
        Some(Commands::Templates(TemplatesArgs { command })) => match command {
            TemplatesSubcommand::List => run_templates_list(&runtime),
        },
        Some(Commands::Css(CssArgs { command })) => match command {
            CssSubcommand::Purge { post, all } => run_css_purge(&runtime, post, all),
            CssSubcommand::Warm { target } => run_css_warm(&runtime, &target),
        },
        Some(Commands::Media(MediaArgs { command })) => match command {
            MediaSubcommand::Download {
                url,
                name,
                subdir,
                overwrite,
            } => run_media_download(&runtime, &url, name, subdir, overwrite),
        },
        Some(Commands::Wxr(WxrArgs { command })) => match command {
            WxrSubcommand::Convert {
                input,
                output,
                post_types,
            } => run_wxr_convert(&runtime, &input, output, &post_types),
        },
        Some(Commands::Smoke(args)) => run_smoke_command(&runtime, args),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("cholotool=debug,cholotool_core=debug,warn")
    } else {
        EnvFilter::try_from_env("CHOLOTOOL_LOG").unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn run_init(runtime: &RuntimeOptions, args: InitArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let report = init_layout(
        &paths,
        &InitOptions {
            include_templates: !args.no_templates,
            materialize_config: !args.no_config,
            force: args.force,
        },
    )?;
    let patch = ConfigPatch {
        set_site_url: args.site_url,
        set_db_host: args.db_host,
        set_db_name: args.db_name,
        set_db_user: args.db_user,
        set_table_prefix: args.table_prefix,
    };
    let patched = patch_config(&paths.config_path, &patch)?;
    let migrations = run_migrations(&paths)?;

    println!("Initialized cholotool runtime layout");
    println!("project_root: {}", normalize_path(&paths.project_root));
    println!("templates: {}", normalize_path(&paths.templates_dir));
    println!("state_dir: {}", normalize_path(&paths.state_dir));
    println!("exports_dir: {}", normalize_path(&paths.exports_dir));
    println!("db_path: {}", normalize_path(&paths.db_path));
    println!("config_path: {}", normalize_path(&paths.config_path));
    println!("created_dirs: {}", report.created_dirs.len());
    println!("wrote_config: {}", report.wrote_config);
    println!("patched_config: {patched}");
    println!("ledger_schema_version: {}", migrations.current_version);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_status(runtime: &RuntimeOptions, args: StatusArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let status = inspect_runtime(&paths)?;
    let config = load_config(&paths.config_path)?;

    println!("runtime status");
    println!("project_root: {}", normalize_path(&paths.project_root));
    println!(
        "project_root_exists: {}",
        format_flag(status.project_root_exists)
    );
    println!("templates_exists: {}", format_flag(status.templates_exists));
    println!("state_dir_exists: {}", format_flag(status.state_dir_exists));
    println!("data_dir_exists: {}", format_flag(status.data_dir_exists));
    println!("db_exists: {}", format_flag(status.db_exists));
    println!(
        "db_size_bytes: {}",
        status
            .db_size_bytes
            .map(|size| size.to_string())
            .unwrap_or_else(|| "n/a".to_string())
    );
    println!("config_exists: {}", format_flag(status.config_exists));
    println!(
        "site_url: {}",
        config.site_url().unwrap_or_else(|| "<unset>".to_string())
    );
    println!("elementor_version: {}", config.elementor_version());
    match config.database_settings() {
        Ok(settings) => {
            println!("database: {}", settings.describe());
            if args.check_db {
                let mut store = MySqlStore::connect(&settings)?;
                println!("database.server_version: {}", store.server_version()?);
            }
        }
        Err(error) => println!("database: <unresolved> ({error:#})"),
    }
    if !status.warnings.is_empty() {
        println!("warnings:");
        for warning in &status.warnings {
            println!("  - {warning}");
        }
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_db_migrate(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let status = inspect_runtime(&paths)?;
    ensure_runtime_ready_for_writes(&paths, &status)?;
    let report = run_migrations(&paths)?;

    println!("db migrate");
    println!("db_path: {}", normalize_path(&paths.db_path));
    println!("applied: {}", report.applied.len());
    for migration in &report.applied {
        println!("applied.v{:03}: {}", migration.version, migration.name);
    }
    println!("current_version: {}", report.current_version);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_db_stats(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let status = inspect_runtime(&paths)?;

    println!("db stats");
    println!("db_path: {}", normalize_path(&paths.db_path));
    println!("db_exists: {}", format_flag(status.db_exists));
    println!(
        "db_size_bytes: {}",
        status
            .db_size_bytes
            .map(|size| size.to_string())
            .unwrap_or_else(|| "n/a".to_string())
    );
    if status.db_exists {
        println!("latest_version: {}", latest_version());
        println!("pending_migrations: {}", pending_migration_count(&paths)?);
        let ledger = BackupLedger::open(&paths)?;
        let stats = ledger.stats()?;
        println!("snapshots: {}", stats.snapshots);
        println!("snapshot_posts: {}", stats.posts);
        println!("snapshot_bytes: {}", stats.stored_bytes);
    } else {
        println!("ledger: <not created> (run `cholotool init`)");
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_posts_list(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    let mut store = connect_store(&config)?;
    let posts = store.builder_posts()?;

    println!("posts list");
    println!("posts.count: {}", posts.len());
    for entry in &posts {
        println!(
            "post.{}: {} [{}/{}] slug={} data_bytes={}",
            entry.post.id,
            entry.post.title,
            entry.post.post_type,
            entry.post.status,
            entry.post.slug,
            entry.data_bytes
        );
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

struct PageSession {
    paths: ResolvedPaths,
    config: ToolConfig,
    store: MySqlStore,
}

impl PageSession {
    fn open(runtime: &RuntimeOptions) -> Result<Self> {
        let paths = resolve_runtime_paths(runtime)?;
        let config = load_config(&paths.config_path)?;
        let store = connect_store(&config)?;
        Ok(Self {
            paths,
            config,
            store,
        })
    }

    fn ledger(&self) -> Result<BackupLedger> {
        let status = inspect_runtime(&self.paths)?;
        ensure_runtime_ready_for_writes(&self.paths, &status)?;
        BackupLedger::open(&self.paths)
    }

    fn registry(&self) -> WidgetRegistry {
        WidgetRegistry::with_extra(&self.config.elementor.extra_widget_types)
    }

    fn write_options(&self, args: &WriteArgs, default_reason: String) -> WriteOptions {
        WriteOptions {
            reason: args
                .reason
                .clone()
                .filter(|reason| !reason.trim().is_empty())
                .unwrap_or(default_reason),
            dry_run: args.dry_run,
            no_backup: args.no_backup,
            elementor_version: self.config.elementor_version().to_string(),
        }
    }
}

fn run_page(runtime: &RuntimeOptions, command: PageSubcommand) -> Result<()> {
    let mut session = PageSession::open(runtime)?;
    match command {
        PageSubcommand::Inspect { post_id } => {
            let inspection = inspect_page(&mut session.store, post_id)?;
            println!("page inspect");
            print_post(&inspection.post);
            println!("data_bytes: {}", inspection.data_bytes);
            println!(
                "elementor_version: {}",
                inspection.elementor_version.as_deref().unwrap_or("<unset>")
            );
            println!(
                "edit_mode: {}",
                inspection.edit_mode.as_deref().unwrap_or("<unset>")
            );
            println!("meta_keys: {}", inspection.meta_keys.join(", "));
            println!("nodes.total: {}", inspection.stats.total_nodes);
            println!("nodes.top_level: {}", inspection.stats.top_level);
            println!("nodes.inner_sections: {}", inspection.stats.inner_sections);
            println!("nodes.max_depth: {}", inspection.stats.max_depth);
            for (kind, count) in &inspection.stats.by_kind {
                println!("kind.{kind}: {count}");
            }
            for (widget_type, count) in &inspection.stats.widget_types {
                println!("widget.{widget_type}: {count}");
            }
        }
        PageSubcommand::Validate { post_id } => {
            let registry = session.registry();
            let (post, report) = validate_page(&mut session.store, post_id, &registry)?;
            println!("page validate");
            print_post(&post);
            println!("nodes_checked: {}", report.nodes_checked);
            println!("errors: {}", report.errors());
            println!("warnings: {}", report.warnings());
            for issue in &report.issues {
                println!(
                    "issue.{}: {} {} [{}] {}",
                    issue.severity.as_str(),
                    issue.kind.as_str(),
                    issue.path,
                    issue.id,
                    issue.message
                );
            }
            if report.errors() > 0 {
                bail!("post {post_id} has {} validation error(s)", report.errors());
            }
        }
        PageSubcommand::Export { post_id, output } => {
            let output = output.unwrap_or_else(|| session.paths.exports_dir.clone());
            let report = export_page(&mut session.store, post_id, &output)?;
            println!("page export");
            println!("path: {}", normalize_path(&report.path));
            println!("title: {}", report.title);
            println!("nodes: {}", report.nodes);
        }
        PageSubcommand::Import {
            post_id,
            template,
            mode,
            write,
        } => {
            let mode: ImportMode = mode.parse()?;
            let template = load_template(&session.paths.templates_dir, &template)?;
            let options = session.write_options(
                &write,
                format!("page import {}", normalize_path(&template.path)),
            );
            let ledger = session.ledger()?;
            let outcome = import_template(
                &mut session.store,
                &ledger,
                post_id,
                &template,
                mode,
                &mut IdGenerator::from_clock(),
                &options,
            )?;
            println!("page import");
            println!("template: {}", outcome.template_title);
            println!("inserted_top_level: {}", outcome.inserted_top_level);
            print_write(&outcome.write);
        }
        PageSubcommand::Cards {
            post_id,
            cards,
            prepend,
            replace,
            write,
        } => {
            let loaded = load_cards(&cards)?;
            let placement = match (replace, prepend) {
                (Some(id), _) => CardPlacement::Replace(id),
                (None, true) => CardPlacement::Prepend,
                (None, false) => CardPlacement::Append,
            };
            let options = session.write_options(&write, "page cards".to_string());
            let style = session.config.cards.clone();
            let ledger = session.ledger()?;
            let outcome = apply_service_cards(
                &mut session.store,
                &ledger,
                post_id,
                &loaded,
                &style,
                &placement,
                &mut IdGenerator::from_clock(),
                &options,
            )?;
            println!("page cards");
            println!("section_id: {}", outcome.section_id);
            println!("cards: {}", outcome.cards);
            print_write(&outcome.write);
        }
        PageSubcommand::Find { post_id, prefix } => {
            let hits = find_keys(&mut session.store, post_id, &prefix)?;
            println!("page find");
            println!("prefix: {prefix}");
            println!("hits.count: {}", hits.len());
            for hit in &hits {
                println!(
                    "hit: {} {} [{}] {} = {}",
                    hit.path, hit.kind, hit.id, hit.key, hit.value
                );
            }
        }
        PageSubcommand::Set {
            post_id,
            element_id,
            key,
            value,
            write,
        } => {
            let options = session.write_options(&write, format!("page set {element_id} {key}"));
            let ledger = session.ledger()?;
            let outcome = set_key(
                &mut session.store,
                &ledger,
                post_id,
                &element_id,
                &key,
                parse_setting_value(&value),
                &options,
            )?;
            println!("page set");
            println!(
                "previous: {}",
                outcome
                    .previous
                    .map(|value| value.to_string())
                    .unwrap_or_else(|| "<none>".to_string())
            );
            print_write(&outcome.write);
        }
        PageSubcommand::Strip {
            post_id,
            prefix,
            element,
            write,
        } => {
            let options = session.write_options(&write, format!("page strip {prefix}"));
            let ledger = session.ledger()?;
            let outcome = strip_keys(
                &mut session.store,
                &ledger,
                post_id,
                element.as_deref(),
                &prefix,
                &options,
            )?;
            println!("page strip");
            println!("removed: {}", outcome.removed);
            match &outcome.write {
                Some(write) => print_write(write),
                None => println!("write: <skipped> (nothing matched)"),
            }
        }
        PageSubcommand::Repair {
            post_id,
            reset_invalid,
            drop_unknown_widgets,
            write,
        } => {
            let registry = session.registry();
            let options = session.write_options(&write, "page repair".to_string());
            let ledger = session.ledger()?;
            let outcome = repair_page(
                &mut session.store,
                &ledger,
                post_id,
                &mut IdGenerator::from_clock(),
                &registry,
                &RepairOptions {
                    drop_unknown_widgets,
                },
                reset_invalid,
                &options,
            )?;
            println!("page repair");
            println!("actions: {}", outcome.report.actions.len());
            for action in &outcome.report.actions {
                println!("action: {}", action.describe());
            }
            println!("reset_to_placeholder: {}", outcome.reset_to_placeholder);
            if let Some(error) = &outcome.parse_error {
                println!("parse_error: {error}");
            }
            match &outcome.write {
                Some(write) => print_write(write),
                None => println!("write: <skipped> (already valid)"),
            }
        }
        PageSubcommand::Restore {
            post_id,
            snapshot,
            write,
        } => {
            let options = session.write_options(
                &write,
                match snapshot {
                    Some(id) => format!("page restore {id}"),
                    None => "page restore latest".to_string(),
                },
            );
            let ledger = session.ledger()?;
            let outcome = restore_page(&mut session.store, &ledger, post_id, snapshot, &options)?;
            println!("page restore");
            print_snapshot("restored", &outcome.snapshot);
            print_write(&outcome.write);
        }
        PageSubcommand::History { post_id, limit } => {
            let post = load_post(&mut session.store, post_id)?;
            let ledger = session.ledger()?;
            let history = page_history(&ledger, post_id, limit)?;
            println!("page history");
            print_post(&post);
            println!("snapshots.count: {}", history.len());
            for snapshot in &history {
                print_snapshot("snapshot", snapshot);
            }
        }
    }
    print_diagnostics(runtime, &session.paths);
    Ok(())
}

fn run_templates_list(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let entries = list_templates(&paths.templates_dir)?;

    println!("templates list");
    println!("templates_dir: {}", normalize_path(&paths.templates_dir));
    println!("templates.count: {}", entries.len());
    for entry in &entries {
        match (&entry.nodes, &entry.error) {
            (Some(nodes), _) => println!(
                "template.{}: {} nodes={nodes}",
                entry.name,
                entry.title.as_deref().unwrap_or("<untitled>")
            ),
            (None, Some(error)) => println!("template.{}: <invalid> {error}", entry.name),
            (None, None) => println!("template.{}: <empty>", entry.name),
        }
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_css_purge(runtime: &RuntimeOptions, post: Option<u64>, all: bool) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    let mut store = connect_store(&config)?;
    let scope = match (post, all) {
        (_, true) => CssScope::All,
        (Some(post_id), false) => CssScope::Post(post_id),
        (None, false) => bail!("css purge requires --post ID or --all"),
    };
    let report = purge_css(&mut store, scope)?;

    println!("css purge");
    println!("post_rows: {}", report.post_rows);
    println!("option_rows: {}", report.option_rows);
    for option in &report.options {
        println!("option: {option}");
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_css_warm(runtime: &RuntimeOptions, target: &str) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    let (url, post_id) = match target.trim().parse::<u64>() {
        Ok(post_id) => {
            let mut store = connect_store(&config)?;
            let post = load_post(&mut store, post_id)?;
            let site = resolve_site_url(&config, &mut store)?;
            (page_url(&site, &post)?, Some(post_id))
        }
        Err(_) => (parse_url(target)?, None),
    };
    let mut client = HttpClient::new(HttpClientConfig::from_config(&config))?;
    let report = warm_page(&mut client, &url, post_id)?;

    println!("css warm");
    println!("url: {}", report.url);
    println!("status: {}", report.status);
    println!("bytes: {}", report.bytes);
    println!("elapsed_ms: {}", report.elapsed_ms);
    println!("post_css_linked: {}", format_flag(report.post_css_linked));
    println!("inline_css: {}", format_flag(report.inline_css));
    println!("css_detected: {}", format_flag(report.has_css()));
    print_diagnostics(runtime, &paths);
    if !(200..300).contains(&report.status) {
        bail!("warming {} returned HTTP {}", report.url, report.status);
    }
    if !report.has_css() {
        warn!(url = %report.url, "no Elementor CSS found in the warmed page");
    }
    Ok(())
}

fn run_media_download(
    runtime: &RuntimeOptions,
    url: &str,
    name: Option<String>,
    subdir: Option<String>,
    overwrite: bool,
) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    let Some(uploads_dir) = config.uploads_dir(&paths.project_root) else {
        bail!("uploads directory unknown: set [site] uploads_dir or CHOLOT_UPLOADS_DIR");
    };
    let url = parse_url(url)?;
    let mut http = HttpClientConfig::from_config(&config);
    let options = DownloadOptions {
        subdir,
        filename: name,
        overwrite,
        site_url: config.site_url(),
        ..DownloadOptions::new(uploads_dir)
    };
    http.max_body_bytes = options.max_bytes;
    let mut client = HttpClient::new(http)?;
    let report = download_image(&mut client, &url, &options)?;

    println!("media download");
    println!("path: {}", normalize_path(&report.path));
    println!(
        "public_url: {}",
        report.public_url.as_deref().unwrap_or("<site url unset>")
    );
    println!("bytes: {}", report.bytes);
    println!(
        "content_type: {}",
        report.content_type.as_deref().unwrap_or("<unknown>")
    );
    println!("sha256: {}", report.sha256);
    println!("skipped: {}", report.skipped);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_wxr_convert(
    runtime: &RuntimeOptions,
    input: &Path,
    output: Option<PathBuf>,
    post_types: &[String],
) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let output = output.unwrap_or_else(|| paths.exports_dir.join("wxr"));
    let report = convert_wxr(input, &output, post_types)?;

    println!("wxr convert");
    println!("input: {}", normalize_path(input));
    println!("output: {}", normalize_path(&output));
    println!("items: {}", report.items);
    println!("written: {}", report.written);
    println!("skipped: {}", report.skipped);
    println!("index: {}", normalize_path(&report.index_path));
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_smoke_command(runtime: &RuntimeOptions, args: SmokeArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    let mut checks: Vec<SmokeCheck> = args
        .urls
        .iter()
        .map(|url| SmokeCheck {
            url: url.clone(),
            expect: args.expect.clone(),
            forbid: Vec::new(),
        })
        .collect();
    if let Some(file) = &args.file {
        checks.extend(load_checks(file)?);
    }
    if checks.is_empty() {
        match config.site_url() {
            Some(site) => checks.push(SmokeCheck {
                url: format!("{site}/"),
                expect: args.expect.clone(),
                forbid: Vec::new(),
            }),
            None => bail!("smoke needs URLs, --file, or a configured site url"),
        }
    }

    let mut client = HttpClient::new(HttpClientConfig::from_config(&config))?;
    let results = run_smoke(&mut client, &checks);
    let failed = results.iter().filter(|result| !result.passed).count();

    println!("smoke");
    println!("checks: {}", results.len());
    println!("failed: {failed}");
    for result in &results {
        println!(
            "check: {} {} status={} elapsed_ms={} bytes={}",
            if result.passed { "PASS" } else { "FAIL" },
            result.url,
            result
                .status
                .map(|status| status.to_string())
                .unwrap_or_else(|| "n/a".to_string()),
            result.elapsed_ms,
            result.bytes
        );
        for missing in &result.missing {
            println!("  missing: {missing}");
        }
        for found in &result.forbidden_found {
            println!("  forbidden: {found}");
        }
        if let Some(error) = &result.error {
            println!("  error: {error}");
        }
    }
    print_diagnostics(runtime, &paths);
    if failed > 0 {
        bail!("{failed} smoke check(s) failed");
    }
    Ok(())
}

fn connect_store(config: &ToolConfig) -> Result<MySqlStore> {
    let settings = config
        .database_settings()
        .context("database settings are incomplete")?;
    MySqlStore::connect(&settings)
}

fn print_post(post: &PostSummary) {
    println!("post_id: {}", post.id);
    println!("title: {}", post.title);
    println!("slug: {}", post.slug);
    println!("post_type: {}", post.post_type);
    println!("status: {}", post.status);
}

fn print_write(outcome: &WriteOutcome) {
    println!("dry_run: {}", outcome.dry_run);
    println!("changed: {}", outcome.changed);
    println!("bytes: {}", outcome.bytes);
    println!(
        "snapshot_id: {}",
        outcome
            .snapshot_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "<none>".to_string())
    );
    println!("css_rows_purged: {}", outcome.css_rows_purged);
    if let Some(diff) = &outcome.diff {
        if diff.is_empty() {
            println!("diff: <no changes>");
        } else {
            println!("diff:\n{diff}");
        }
    }
}

fn print_snapshot(prefix: &str, snapshot: &Snapshot) {
    println!(
        "{prefix}.{}: key={} bytes={} hash={} at={} reason={}",
        snapshot.id,
        snapshot.meta_key,
        snapshot
            .meta_value
            .as_ref()
            .map(|value| value.len().to_string())
            .unwrap_or_else(|| "null".to_string()),
        &snapshot.content_hash[..snapshot.content_hash.len().min(12)],
        snapshot.created_at_unix,
        snapshot.reason
    );
}

fn print_diagnostics(runtime: &RuntimeOptions, paths: &ResolvedPaths) {
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ResolvedPaths> {
    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        project_root: runtime.project_root.clone(),
        data_dir: runtime.data_dir.clone(),
        config: runtime.config.clone(),
    };

    let initial = resolve_paths(&context, &overrides)?;
    let project_env = initial.project_root.join(".env");
    if project_env.exists() {
        let _ = dotenvy::from_path_override(&project_env);
    }

    let paths = resolve_paths(&context, &overrides)?;
    debug!(
        project_root = %paths.project_root.display(),
        config = %paths.config_path.display(),
        "resolved runtime paths"
    );
    Ok(paths)
}

fn normalize_path(path: &Path) -> String {
    normalize_for_display(path)
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn page_set_parses_positional_arguments() {
        let cli = Cli::try_parse_from([
            "cholotool",
            "page",
            "set",
            "12",
            "abc1234",
            "title",
            "\"Welkom\"",
            "--dry-run",
        ])
        .expect("parse");
        match cli.command {
            Some(Commands::Page(PageArgs {
                command:
                    PageSubcommand::Set {
                        post_id,
                        element_id,
                        write,
                        ..
                    },
            })) => {
                assert_eq!(post_id, 12);
                assert_eq!(element_id, "abc1234");
                assert!(write.dry_run);
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn css_purge_requires_a_scope() {
        assert!(Cli::try_parse_from(["cholotool", "css", "purge"]).is_err());
        assert!(Cli::try_parse_from(["cholotool", "css", "purge", "--all"]).is_ok());
        assert!(
            Cli::try_parse_from(["cholotool", "css", "purge", "--post", "3", "--all"]).is_err()
        );
    }
}
