use std::io::Write as _;
use std::path::PathBuf;

use clap::Args;
use ntfy_subscriber::{Client, Notification};
use tracing::{info, warn};

use crate::config::{self, FileConfig, Overrides};
use crate::error::CliResult;

#[derive(Args)]
pub struct ListenArgs {
    /// Path to a YAML config file
    #[arg(long, short)]
    config: Option<PathBuf>,
    /// ntfy server: hostname (e.g. ntfy.sh) or ws/wss/http/https URL
    #[arg(long, env = "NTFY_SERVER")]
    server: Option<String>,
    /// Topic to subscribe to
    #[arg(long, short, env = "NTFY_TOPIC")]
    topic: Option<String>,
    /// Access token
    #[arg(long, env = "NTFY_TOKEN", hide_env_values = true)]
    token: Option<String>,
    /// Username for basic auth (used when no token is given)
    #[arg(long, env = "NTFY_USER")]
    user: Option<String>,
    #[arg(long, env = "NTFY_PASSWORD", hide_env_values = true)]
    password: Option<String>,
    /// Server-side filter passed through as a query parameter (repeatable)
    #[arg(long = "filter", value_name = "KEY=VALUE", value_parser = config::parse_key_value)]
    filters: Vec<(String, String)>,
    /// Allow a program to be run by messages starting with its name (repeatable)
    #[arg(long = "shell-command", value_name = "PROGRAM")]
    shell_commands: Vec<String>,
    /// Bind a one-word alias to a fixed command line (repeatable)
    #[arg(long = "alias", value_name = "NAME=COMMAND", value_parser = config::parse_key_value)]
    aliases: Vec<(String, String)>,
    /// Per-handler time limit in seconds, 0 for none [default: 30]
    #[arg(long, value_name = "SECS")]
    handler_timeout: Option<u64>,
    /// Do not ask the server to replay missed messages after a reconnect
    #[arg(long)]
    no_resume: bool,
}

impl ListenArgs {
    fn overrides(self) -> Overrides {
        Overrides {
            server: self.server,
            topic: self.topic,
            token: self.token,
            user: self.user,
            password: self.password,
            no_resume: self.no_resume,
            filters: self.filters,
            handler_timeout_secs: self.handler_timeout,
            shell_commands: self.shell_commands,
            aliases: self.aliases,
        }
    }
}

/// Print one notification to stdout as a single JSON line.
fn print_record(n: &Notification) -> Result<(), ntfy_subscriber::BoxError> {
    let mut out = std::io::stdout().lock();
    serde_json::to_writer(&mut out, n)?;
    writeln!(out)?;
    out.flush()?;
    Ok(())
}

/// Load config, register handlers and listen until Ctrl-C.
pub async fn run_listen(args: ListenArgs) -> CliResult<()> {
    let file = match &args.config {
        Some(path) => config::load(path).await?,
        None => FileConfig::default(),
    };
    let listen = config::resolve(file, args.overrides())?;

    let client = Client::new(listen.client)?;
    let registry = client.registry();
    registry.register_parser("stdout", print_record);

    for program in &listen.shell_commands {
        registry.register_shell_command(program)?;
        info!(program = %program, "Shell command enabled");
    }
    for (alias, command_line) in &listen.aliases {
        registry.register_shell_alias(alias, [command_line.as_str()])?;
        info!(alias = %alias, command_line = %command_line, "Shell alias enabled");
    }

    let stopper = client.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl-C, stopping");
                stopper.stop();
            }
            Err(e) => warn!("Cannot listen for Ctrl-C: {e}"),
        }
    });

    info!(
        server = %client.config().server,
        topic = %client.config().topic,
        commands = ?registry.command_names(),
        "Listening"
    );
    client.start().await?;
    info!("Stopped");
    Ok(())
}
