use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;

use ntfy_subscriber::{ClientConfig, Credential, TimingConfig};
use serde::Deserialize;

use crate::error::{CliError, CliResult};

/// Contents of the YAML file passed with `--config`.
///
/// ```yaml
/// server: https://ntfy.example.com
/// topic: alerts
/// token: tk_...            # or user + password
/// resume: true
/// filters:
///   priority: "4,5"
/// handler_timeout_secs: 30
/// shell_commands: [uptime]
/// aliases:
///   disk: df -h /
/// ```
#[derive(Debug, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub server: Option<String>,
    pub topic: Option<String>,
    pub token: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub resume: Option<bool>,
    pub filters: BTreeMap<String, String>,
    pub handler_timeout_secs: Option<u64>,
    pub shell_commands: Vec<String>,
    pub aliases: BTreeMap<String, String>,
}

/// Values given as flags or environment variables. They win over the file.
#[derive(Debug, Default)]
pub struct Overrides {
    pub server: Option<String>,
    pub topic: Option<String>,
    pub token: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub no_resume: bool,
    pub filters: Vec<(String, String)>,
    pub handler_timeout_secs: Option<u64>,
    pub shell_commands: Vec<String>,
    pub aliases: Vec<(String, String)>,
}

/// Everything `listen` needs after merging file, environment and flags.
#[derive(Debug)]
pub struct ListenConfig {
    pub client: ClientConfig,
    pub shell_commands: Vec<String>,
    /// Alias name to command line.
    pub aliases: BTreeMap<String, String>,
}

/// Load a YAML config file.
pub async fn load(path: &Path) -> CliResult<FileConfig> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| CliError::Config(format!("read {}: {e}", path.display())))?;
    serde_yaml_ng::from_str(&content)
        .map_err(|e| CliError::Config(format!("parse {}: {e}", path.display())))
}

/// Merge `overrides` over `file`. Server, topic and credential are required.
pub fn resolve(file: FileConfig, overrides: Overrides) -> CliResult<ListenConfig> {
    let server = non_empty(overrides.server)
        .or(non_empty(file.server))
        .ok_or_else(|| CliError::Config("server is required (--server or NTFY_SERVER)".into()))?;
    let topic = non_empty(overrides.topic)
        .or(non_empty(file.topic))
        .ok_or_else(|| CliError::Config("topic is required (--topic or NTFY_TOPIC)".into()))?;

    // The highest layer that names any credential supplies all of it, so a
    // token in the file never mixes with a user given on the command line.
    let credential = credential_from(overrides.token, overrides.user, overrides.password)
        .or_else(|| credential_from(file.token, file.user, file.password))
        .ok_or_else(|| {
            CliError::Config(
                "credential is required (--token/NTFY_TOKEN or --user/NTFY_USER)".into(),
            )
        })?;

    let mut params: HashMap<String, String> = file.filters.into_iter().collect();
    params.extend(overrides.filters);

    let mut timing = TimingConfig::default();
    if let Some(secs) = overrides.handler_timeout_secs.or(file.handler_timeout_secs) {
        // 0 waits for handlers indefinitely.
        timing.handler_timeout = (secs > 0).then(|| Duration::from_secs(secs));
    }

    let resume = !overrides.no_resume && file.resume.unwrap_or(true);

    let mut shell_commands = file.shell_commands;
    for program in overrides.shell_commands {
        if !shell_commands.contains(&program) {
            shell_commands.push(program);
        }
    }
    let mut aliases = file.aliases;
    aliases.extend(overrides.aliases);

    Ok(ListenConfig {
        client: ClientConfig {
            server,
            topic,
            credential,
            params: (!params.is_empty()).then_some(params),
            resume,
            timing,
        },
        shell_commands,
        aliases,
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn credential_from(
    token: Option<String>,
    user: Option<String>,
    password: Option<String>,
) -> Option<Credential> {
    if let Some(token) = non_empty(token) {
        return Some(Credential::Token(token));
    }
    non_empty(user).map(|username| Credential::Basic {
        username,
        password: password.unwrap_or_default(),
    })
}

/// Parse `KEY=VALUE` for `--filter` and `--alias`.
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got {s:?}"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in {s:?}"));
    }
    Ok((key.to_string(), value.trim().to_string()))
}
