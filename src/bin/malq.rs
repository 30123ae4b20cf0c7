use std::io;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use malq::app::{App, SearchSettings};
use malq::catalog::MalHttpClient;
use malq::config::{ConfigLoader, ResolvedConfig, ResolvedSearch, load_access_token};
use malq::error::MalqError;
use malq::output::{OutputMode, print_json};
use malq::progress::{ProgressSink, RENDER_TICK, RendererSink, SilentSink, run_renderer};
use malq::prompt::Prompt;
use malq::search::QbittorrentClient;
use malq::session::run_session;
use malq::store::CacheStore;

#[derive(Parser)]
#[command(name = "malq")]
#[command(about = "Track a MyAnimeList watch list locally and search qBittorrent for finished shows")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Print the cached list without contacting the catalog")]
    List,
    #[command(about = "Refresh cached entries and save")]
    Refresh {
        #[arg(long, help = "Also refresh finished shows")]
        all: bool,
    },
    #[command(name = "render-progress", hide = true)]
    RenderProgress {
        #[arg(long, default_value = "")]
        prefix: String,
    },
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<MalqError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &MalqError) -> u8 {
    match error {
        MalqError::ConfigRead(_)
        | MalqError::ConfigParse(_)
        | MalqError::TokenRead(_)
        | MalqError::MalformedInput(_) => 2,
        err if err.is_transport() => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();

    if let Some(Commands::RenderProgress { prefix }) = &cli.command {
        // Ctrl-C reaches the whole process group; the parent ends the renderer.
        let _ = ctrlc::set_handler(|| {});
        let mut stdout = io::stdout().lock();
        run_renderer(prefix, io::stdin(), &mut stdout, RENDER_TICK).into_diagnostic()?;
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let output_mode = OutputMode::from_flag(cli.non_interactive);
    let config = ConfigLoader::resolve(cli.config.as_deref())?;

    match cli.command {
        Some(Commands::List) => run_list(&config, output_mode),
        Some(Commands::Refresh { all }) => run_refresh(&config, all, output_mode),
        Some(Commands::RenderProgress { .. }) => Ok(()),
        None => match output_mode {
            OutputMode::Interactive => run_interactive(config),
            OutputMode::NonInteractive => Err(miette::Report::msg(
                "command required in non-interactive mode (try `malq --help`)",
            )),
        },
    }
}

fn run_list(config: &ResolvedConfig, output_mode: OutputMode) -> miette::Result<()> {
    let store = CacheStore::load(config.cache_file.clone())?;
    match output_mode {
        OutputMode::NonInteractive => {
            let result = malq::app::ListResult {
                entries: store.entries().to_vec(),
            };
            print_json(&result).into_diagnostic()?;
        }
        OutputMode::Interactive => {
            for (index, entry) in store.entries().iter().enumerate() {
                println!("  [{index}] : {entry}");
            }
        }
    }
    Ok(())
}

fn run_refresh(config: &ResolvedConfig, all: bool, output_mode: OutputMode) -> miette::Result<()> {
    let store = CacheStore::load(config.cache_file.clone())?;
    let catalog = catalog_client(config)?;
    let mut app: App<MalHttpClient, QbittorrentClient> =
        App::new(store, catalog, None, search_settings(&config.search));

    let sink: &dyn ProgressSink = match output_mode {
        OutputMode::Interactive => &RendererSink,
        OutputMode::NonInteractive => &SilentSink,
    };
    let report = app.refresh(all, sink)?;
    app.save()?;

    match output_mode {
        OutputMode::NonInteractive => print_json(&report).into_diagnostic()?,
        OutputMode::Interactive => println!(
            "Refreshed {} of {} shows.",
            report.fetched,
            app.store().len()
        ),
    }
    Ok(())
}

fn run_interactive(config: ResolvedConfig) -> miette::Result<()> {
    let store = CacheStore::load(config.cache_file.clone())?;
    if store.is_empty() && !store.path().as_std_path().exists() {
        println!(
            "No cache file found at {}. If this isn't your first run, check the cache_file setting.",
            store.path()
        );
    } else {
        println!("Loaded {} cached shows.", store.len());
    }

    let catalog = catalog_client(&config)?;
    let search = connect_search(&config);
    let mut app = App::new(store, catalog, search, search_settings(&config.search));

    if let Err(err) = app.startup(&RendererSink) {
        warn!(error = %err, "startup refresh failed");
        println!("{err}");
    }

    let mut prompt = Prompt::stdin();
    run_session(&mut app, &mut prompt, &RendererSink)?;
    Ok(())
}

fn catalog_client(config: &ResolvedConfig) -> Result<MalHttpClient, MalqError> {
    let token = load_access_token(&config.token_file)?;
    MalHttpClient::new(token, &config.catalog_base_url, config.request_timeout)
}

fn connect_search(config: &ResolvedConfig) -> Option<QbittorrentClient> {
    let Some(credentials) = &config.search.credentials else {
        println!("qBittorrent server not found, check your environment variables.");
        return None;
    };
    let connected = QbittorrentClient::new(&credentials.host, config.request_timeout).and_then(
        |client| {
            client.login(&credentials.username, &credentials.password)?;
            Ok(client)
        },
    );
    match connected {
        Ok(client) => Some(client),
        Err(err) => {
            warn!(error = %err, "search service unavailable");
            println!("qBittorrent server not found, check your environment variables.");
            None
        }
    }
}

fn search_settings(search: &ResolvedSearch) -> SearchSettings {
    SearchSettings {
        scope: search.scope.clone(),
        poll_interval: search.poll_interval,
        max_results: search.max_results,
    }
}
