use clap::{Parser, Subcommand};
use focusstreak_core::{Identity, UserId};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "focusstreak-cli", version, about = "Focus timer with daily streaks")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Timer control
    Timer {
        /// User credited with completed work sessions
        #[arg(long, global = true)]
        user: Option<UserId>,
        /// Email reported by the identity provider for --user
        #[arg(long, global = true)]
        email: Option<String>,
        #[command(subcommand)]
        action: commands::timer::TimerAction,
    },
    /// Streak inspection and reconciliation
    Streak {
        #[command(subcommand)]
        action: commands::streak::StreakAction,
    },
    /// Subscription events
    Billing {
        #[command(subcommand)]
        action: commands::billing::BillingAction,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Timer {
            user,
            email,
            action,
        } => match (user, email) {
            (None, Some(_)) => Err("--email needs --user".into()),
            (user, email) => {
                let identity = user.map(|id| Identity::new(id, email.unwrap_or_default()));
                commands::timer::run(action, identity).await
            }
        },
        Commands::Streak { action } => commands::streak::run(action).await,
        Commands::Billing { action } => commands::billing::run(action).await,
        Commands::Config { action } => commands::config::run(action),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
