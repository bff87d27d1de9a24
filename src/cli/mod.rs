pub mod daemon_path;
pub mod process;
pub mod report;

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use process::{daemon_executable, kill_previous_servers, restart_server};
use report::{process_report_command, ReportCommand};
use tracing::level_filters::LevelFilter;

use crate::{
    daemon::{
        client::DaemonClient,
        collection::idle::IdleState,
        protocol::{Request, Response, DEFAULT_PORT},
        start_daemon,
        storage::config_store::ConfigUpdate,
    },
    utils::{
        dir::create_application_default_path,
        logging::{enable_logging, CLI_PREFIX, DAEMON_PREFIX},
    },
};

#[derive(Parser, Debug)]
#[command(name = "prodtime", version, long_about = None)]
#[command(about = "Tracks time spent on websites", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    commands: Commands,
    #[arg(long, global = true, help = "Enable logging")]
    log: bool,
    #[arg(
        long,
        global = true,
        default_value_t = DEFAULT_PORT,
        help = "Port of the daemon socket"
    )]
    port: u16,
    #[arg(
        long,
        global = true,
        help = "Application directory. By default tries to save into $XDG_STATE_HOME or $HOME/.local/state"
    )]
    dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
#[command(version, about, long_about = None)]
enum Commands {
    #[command(about = "Starts a daemon for the application")]
    Init {},
    #[command(
        about = "Run a daemon directly in current console. Used for debugging and service managers"
    )]
    Serve {},
    #[command(about = "Stop currently running daemon.")]
    Stop {},
    #[command(about = "Show what the daemon is currently tracking")]
    Status {},
    #[command(about = "Stop attributing time until resumed")]
    Pause {},
    #[command(about = "Resume attributing time")]
    Resume {},
    #[command(about = "Send the local ledger to the backend now")]
    Upload {},
    #[command(about = "Delete everything recorded today")]
    ResetToday {},
    #[command(about = "Change settings of the daemon")]
    Config {
        #[arg(long, help = "Endpoint receiving usage batches")]
        backend_url: Option<String>,
        #[arg(long, help = "Seconds without input before the user is considered idle")]
        idle_seconds: Option<u32>,
        #[arg(long, help = "Identifier sent with every batch")]
        user_id: Option<String>,
    },
    #[command(about = "Report browser events to the daemon. Used by browser shims and for testing")]
    Signal {
        #[command(subcommand)]
        signal: SignalCommand,
    },
    #[command(about = "Display usage of a day from the local ledger")]
    Report {
        #[command(flatten)]
        command: ReportCommand,
    },
}

#[derive(Subcommand, Debug)]
enum SignalCommand {
    #[command(about = "A tab became active")]
    Tab { url: Option<String> },
    #[command(about = "A tab changed its url or finished loading")]
    Updated {
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        status: Option<String>,
        #[arg(long, help = "The update happened in a background tab")]
        background: bool,
    },
    #[command(about = "The browser window gained focus")]
    Focus {},
    #[command(about = "Every browser window lost focus")]
    Blur {},
    #[command(about = "Idle state reported by the browser")]
    IdleState { state: IdleState },
    #[command(about = "Seconds since the last user input")]
    IdleTime { seconds: u64 },
}

impl From<SignalCommand> for Request {
    fn from(value: SignalCommand) -> Self {
        match value {
            SignalCommand::Tab { url } => Request::TabActivated { url },
            SignalCommand::Updated {
                url,
                status,
                background,
            } => Request::TabUpdated {
                url,
                status,
                active: !background,
            },
            SignalCommand::Focus {} => Request::WindowFocusChanged { focused: true },
            SignalCommand::Blur {} => Request::WindowFocusChanged { focused: false },
            SignalCommand::IdleState { state } => Request::IdleStateChanged { state },
            SignalCommand::IdleTime { seconds } => Request::IdleTime { seconds },
        }
    }
}

pub async fn run_cli() -> Result<()> {
    let args = Args::parse();

    let logging_level = if args.log {
        Some(LevelFilter::TRACE)
    } else {
        None
    };
    let app_dir = args
        .dir
        .clone()
        .map_or_else(create_application_default_path, Ok)?;
    let prefix = match args.commands {
        Commands::Serve {} => DAEMON_PREFIX,
        _ => CLI_PREFIX,
    };
    enable_logging(prefix, &app_dir, logging_level, args.log)?;

    let client = DaemonClient::local(args.port);
    match args.commands {
        Commands::Init {} => restart_server(args.dir.as_deref(), args.port),
        Commands::Stop {} => {
            let stopped = kill_previous_servers(&daemon_executable()?)?;
            println!("Stopped {stopped} daemon(s)");
            Ok(())
        }
        Commands::Serve {} => start_daemon(app_dir, args.port).await,
        Commands::Status {} => print_response(client.send(&Request::GetStatus).await?),
        Commands::Pause {} => {
            print_response(client.send(&Request::SetPaused { value: true }).await?)
        }
        Commands::Resume {} => {
            print_response(client.send(&Request::SetPaused { value: false }).await?)
        }
        Commands::Upload {} => print_response(client.send(&Request::ForceUpload).await?),
        Commands::ResetToday {} => print_response(client.send(&Request::ResetToday).await?),
        Commands::Config {
            backend_url,
            idle_seconds,
            user_id,
        } => {
            let update = ConfigUpdate {
                backend_url,
                idle_seconds,
                user_id,
            };
            if update.is_empty() {
                bail!("Nothing to change. See `prodtime config --help`");
            }
            print_response(client.send(&Request::SetConfig(update)).await?)
        }
        Commands::Signal { signal } => print_response(client.send(&signal.into()).await?),
        Commands::Report { command } => process_report_command(command, &app_dir).await,
    }
}

fn print_response(response: Response) -> Result<()> {
    match response {
        Response::Failed { error, .. } => bail!("Daemon refused the request: {error}"),
        Response::Status(status) => {
            println!("paused\t{}", status.paused);
            println!("idle\t{}", status.idle_state);
            println!("focused\t{}", status.window_focused);
            println!("backend\t{}", status.backend_url);
            println!(
                "domain\t{}",
                status.current_domain.as_deref().unwrap_or("-")
            );
        }
        Response::Paused { paused, .. } => {
            println!("{}", if paused { "Paused" } else { "Resumed" })
        }
        Response::Saved { saved, .. } => {
            if saved.is_empty() {
                println!("Nothing saved");
            } else {
                println!("Saved {}", serde_json::to_string(&saved)?);
            }
        }
        Response::Ack { .. } => println!("Ok"),
    }
    Ok(())
}
