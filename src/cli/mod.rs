//! Command line interface: argument parsing and command inference.

pub mod toolbox;

pub use toolbox::{RoutesFn, Toolbox, WorkerFn};

use clap::{Parser, Subcommand};

pub const COMMAND_ENV: &str = "TOOLBOX_COMMAND";
pub const CHECK_URL_ENV: &str = "TOOLBOX_CHECK_URL";
pub const CHECK_STATUS_ENV: &str = "TOOLBOX_CHECK_STATUS";

#[derive(Parser, Debug)]
#[command(name = "apptoolbox")]
#[command(about = "Run the web server, the worker, patches and database maintenance")]
#[command(version)]
pub struct Cli {
    #[arg(
        short,
        long,
        global = true,
        env = "TOOLBOX_ROOT_DIR",
        default_value = ".",
        help = "Directory to run the command from"
    )]
    pub root: std::path::PathBuf,

    #[arg(long, global = true, help = "Print debug logs")]
    pub verbose: bool,

    #[arg(
        long,
        global = true,
        env = "TOOLBOX_LOG_NAME",
        default_value = "app",
        help = "Log target of the application"
    )]
    pub log: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    #[command(about = "Run the web server")]
    Web {
        #[arg(long, help = "Log every request")]
        access_log: bool,
    },

    #[command(about = "Run the background worker")]
    Worker,

    #[command(about = "Run a database patch, or list patches when no name is given")]
    Patch {
        #[arg(long, help = "Commit the patch instead of rolling it back")]
        live: bool,
        name: Option<String>,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    #[command(name = "reset_database", about = "Drop and recreate the database")]
    ResetDatabase,

    #[command(name = "flush_redis", about = "Empty the redis database")]
    FlushRedis,

    #[command(name = "check_web", about = "Check the web server responds with the expected status")]
    CheckWeb { url: Option<String>, status: Option<u16> },

    #[command(about = "Infer the command from TOOLBOX_COMMAND, DYNO or PORT")]
    Auto,
}

impl Commands {
    fn from_name(name: &str) -> Option<Commands> {
        Some(match name {
            "web" => Commands::Web { access_log: false },
            "worker" => Commands::Worker,
            "patch" => Commands::Patch {
                live: false,
                name: None,
                args: Vec::new(),
            },
            "reset_database" => Commands::ResetDatabase,
            "flush_redis" => Commands::FlushRedis,
            "check_web" => Commands::CheckWeb {
                url: None,
                status: None,
            },
            _ => return None,
        })
    }
}

/// Pick the command for `auto`: `TOOLBOX_COMMAND`, then `DYNO` (heroku), then
/// a numeric `PORT`; otherwise the worker.
pub fn auto_command(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Commands> {
    let non_empty = |name: &str| lookup(name).filter(|v| !v.is_empty());
    if let Some(command) = non_empty(COMMAND_ENV) {
        tracing::info!("using environment variable {}={:?} to infer command", COMMAND_ENV, command);
        let command = command.to_lowercase();
        return Commands::from_name(&command)
            .ok_or_else(|| anyhow::anyhow!("Invalid value for {}: {:?}", COMMAND_ENV, command));
    }
    if let Some(dyno) = non_empty("DYNO") {
        tracing::info!("using environment variable DYNO={:?} to infer command", dyno);
        return Ok(if dyno.to_lowercase().starts_with("web") {
            Commands::Web { access_log: false }
        } else {
            Commands::Worker
        });
    }
    if let Some(port) = non_empty("PORT").filter(|p| p.bytes().all(|b| b.is_ascii_digit())) {
        tracing::info!("using environment variable PORT={} to infer command as web", port);
        return Ok(Commands::Web { access_log: false });
    }
    tracing::info!("no environment variable found to infer command, assuming worker");
    Ok(Commands::Worker)
}

/// URL and expected status for `check_web`: arguments first, then the
/// environment, then `http://localhost:<port>/` and 200.
pub fn check_web_target(
    url: Option<String>,
    status: Option<u16>,
    port: u16,
    lookup: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<(String, u16)> {
    let url = url
        .or_else(|| lookup(CHECK_URL_ENV).filter(|v| !v.is_empty()))
        .unwrap_or_else(|| format!("http://localhost:{}/", port));
    let status = match status {
        Some(s) => s,
        None => match lookup(CHECK_STATUS_ENV).filter(|v| !v.is_empty()) {
            Some(v) => v
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid {} {:?}", CHECK_STATUS_ENV, v))?,
            None => 200,
        },
    };
    Ok((url, status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn parses_patch_with_extra_args() {
        let cli = Cli::try_parse_from(["apptoolbox", "patch", "--live", "fix_slugs", "a", "--b"]).unwrap();
        assert_eq!(
            cli.command,
            Commands::Patch {
                live: true,
                name: Some("fix_slugs".into()),
                args: vec!["a".into(), "--b".into()],
            }
        );
        assert_eq!(cli.log, "app");
    }

    #[test]
    fn parses_snake_case_commands_and_globals() {
        let cli = Cli::try_parse_from(["apptoolbox", "--verbose", "check_web", "http://x/", "204"]).unwrap();
        assert!(cli.verbose);
        assert_eq!(
            cli.command,
            Commands::CheckWeb {
                url: Some("http://x/".into()),
                status: Some(204),
            }
        );
        let cli = Cli::try_parse_from(["apptoolbox", "web", "--access-log", "-r", "/srv"]).unwrap();
        assert_eq!(cli.command, Commands::Web { access_log: true });
        assert_eq!(cli.root, std::path::PathBuf::from("/srv"));
        assert!(Cli::try_parse_from(["apptoolbox", "shell"]).is_err());
    }

    #[test]
    fn auto_prefers_toolbox_command() {
        let cmd = auto_command(env(&[("TOOLBOX_COMMAND", "Reset_Database"), ("DYNO", "web.1")])).unwrap();
        assert_eq!(cmd, Commands::ResetDatabase);
        let err = auto_command(env(&[("TOOLBOX_COMMAND", "auto")])).unwrap_err();
        assert_eq!(err.to_string(), "Invalid value for TOOLBOX_COMMAND: \"auto\"");
    }

    #[test]
    fn auto_falls_back_to_dyno_then_port() {
        assert_eq!(
            auto_command(env(&[("DYNO", "web.1"), ("PORT", "80")])).unwrap(),
            Commands::Web { access_log: false }
        );
        assert_eq!(auto_command(env(&[("DYNO", "worker.1")])).unwrap(), Commands::Worker);
        assert_eq!(
            auto_command(env(&[("PORT", "8000")])).unwrap(),
            Commands::Web { access_log: false }
        );
        assert_eq!(auto_command(env(&[("PORT", "eighty")])).unwrap(), Commands::Worker);
        assert_eq!(auto_command(env(&[])).unwrap(), Commands::Worker);
    }

    #[test]
    fn check_web_defaults() {
        assert_eq!(
            check_web_target(None, None, 8000, env(&[])).unwrap(),
            ("http://localhost:8000/".to_string(), 200)
        );
        assert_eq!(
            check_web_target(None, None, 8000, env(&[("TOOLBOX_CHECK_URL", "http://h/"), ("TOOLBOX_CHECK_STATUS", "404")]))
                .unwrap(),
            ("http://h/".to_string(), 404)
        );
        assert_eq!(
            check_web_target(Some("http://a/".into()), Some(301), 8000, env(&[("TOOLBOX_CHECK_STATUS", "404")])).unwrap(),
            ("http://a/".to_string(), 301)
        );
        assert!(check_web_target(None, None, 1, env(&[("TOOLBOX_CHECK_STATUS", "ok")])).is_err());
    }
}
