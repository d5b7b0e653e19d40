use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::Level;
use tokio::io::{AsyncBufReadExt, BufReader};
use vanopticon_mimir::config::{self, Settings};
use vanopticon_mimir::console::{Console, Feedback, parse_removal_choice, removal_menu};
use vanopticon_mimir::observability::init_logging;
use vanopticon_mimir::open_engine;
use vanopticon_mimir::sync::RemoveChoice;

#[derive(Parser)]
#[command(name = "mimir", about = "Mimir - sync subscription console")]
struct Cli {
	/// Application identifier the registry record is stored under
	#[arg(long)]
	app_id: Option<String>,
	/// Registry document path
	#[arg(long)]
	registry: Option<PathBuf>,
	/// Offline session document path
	#[arg(long)]
	session: Option<PathBuf>,
	/// Schema classes of the offline session (comma separated)
	#[arg(long, value_delimiter = ',')]
	classes: Vec<String>,
	/// Log level (error, warn, info, debug, trace)
	#[arg(long)]
	log_level: Option<String>,
	/// Print engine counters in Prometheus text format when done
	#[arg(long)]
	print_metrics: bool,
	#[command(subcommand)]
	command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
	/// Show the live subscriptions (default)
	List,
	/// Apply the saved subscriptions to an empty session
	Apply,
	/// Add a subscription, or modify the one with the same name
	Add {
		name: String,
		/// Collection/Table name
		class: String,
		/// RQL filter
		filter: String,
	},
	/// Remove a subscription; without a name, choose from a menu
	Remove { name: Option<String> },
	/// Clear the live set and rebuild it from the saved subscriptions
	Refresh,
}

fn apply_overrides(settings: &mut Settings, cli: &Cli) {
	if let Some(app_id) = &cli.app_id {
		settings.app_id = app_id.clone();
	}
	if let Some(path) = &cli.registry {
		settings.registry_path = path.clone();
	}
	if let Some(path) = &cli.session {
		settings.session_path = path.clone();
	}
	if !cli.classes.is_empty() {
		settings.schema_classes = cli.classes.clone();
	}
	if let Some(level) = &cli.log_level {
		match level.parse::<Level>() {
			Ok(parsed) => settings.log_level = parsed,
			Err(_) => eprintln!("ignoring unknown log level '{}'", level),
		}
	}
}

fn show(feedback: &Feedback) {
	match feedback {
		Feedback::Nothing => {}
		Feedback::Error(_) | Feedback::Warning(_) => eprintln!("{}", feedback),
		_ => println!("{}", feedback),
	}
}

/// Print the menu and read one answer from stdin.
async fn choose_removal(console: &Console) -> Option<RemoveChoice> {
	let rows = match console.list().await {
		Feedback::Rows(rows) => rows,
		other => {
			show(&other);
			return None;
		}
	};

	show(&Feedback::Rows(rows.clone()));
	println!("Which subscription do you want to remove?");
	for (i, entry) in removal_menu(&rows).iter().enumerate() {
		println!("  {}) {}", i + 1, entry);
	}

	let mut answer = String::new();
	let mut stdin = BufReader::new(tokio::io::stdin());
	if stdin.read_line(&mut answer).await.is_err() {
		return Some(RemoveChoice::Back);
	}

	let choice = parse_removal_choice(&answer, &rows);
	if choice.is_none() {
		eprintln!("'{}' is not one of the choices", answer.trim());
	}
	choice
}

#[tokio::main]
async fn main() -> ExitCode {
	let cli = Cli::parse();

	let mut settings = match config::load() {
		Ok(s) => s,
		Err(e) => {
			eprintln!("failed to load config, using defaults: {}", e);
			Settings::default()
		}
	};
	apply_overrides(&mut settings, &cli);

	if let Err(e) = init_logging(settings.log_level.to_level_filter()) {
		eprintln!("{}", e);
	}

	let engine = match open_engine(&settings).await {
		Ok(engine) => Arc::new(engine),
		Err(e) => {
			eprintln!("✖ {:#}", e);
			return ExitCode::FAILURE;
		}
	};
	let console = Console::new(Arc::clone(&engine));

	// Every run is a fresh session: bring it up from the registry first.
	let startup = console.apply().await;
	show(&startup);

	let command = cli.command.unwrap_or(Commands::List);
	let feedback = match command {
		Commands::Apply => Feedback::Nothing,
		Commands::List => console.list().await,
		Commands::Add {
			name,
			class,
			filter,
		} => console.add(&name, &class, &filter).await,
		Commands::Remove { name: Some(name) } => {
			console.remove(RemoveChoice::Subscription(name)).await
		}
		Commands::Remove { name: None } => match choose_removal(&console).await {
			Some(choice) => console.remove(choice).await,
			None => Feedback::Nothing,
		},
		Commands::Refresh => console.refresh().await,
	};
	show(&feedback);

	if cli.print_metrics {
		eprint!("{}", engine.metrics().to_prometheus_text());
	}

	if startup.is_error() || feedback.is_error() {
		ExitCode::FAILURE
	} else {
		ExitCode::SUCCESS
	}
}
