//! `Toolbox`: what an application plugs into the command line runner.

use crate::app::{serve, startup};
use crate::cli::{auto_command, check_web_target, Cli, Commands};
use crate::db::{flush_redis, reset_database, run_patch, PatchRegistry};
use crate::logs::setup_logging;
use crate::network::{check_server, wait_for_services};
use crate::settings::Settings;
use crate::state::AppState;
use axum::Router;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

const SERVICE_WAIT: Duration = Duration::from_secs(5);

pub type RoutesFn = Arc<dyn Fn(&Settings) -> Router<AppState> + Send + Sync>;
pub type WorkerFn = Arc<dyn Fn(Settings) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

pub struct Toolbox {
    routes: RoutesFn,
    worker: Option<WorkerFn>,
    patches: PatchRegistry,
}

impl Toolbox {
    pub fn new<F>(routes: F) -> Self
    where
        F: Fn(&Settings) -> Router<AppState> + Send + Sync + 'static,
    {
        Toolbox {
            routes: Arc::new(routes),
            worker: None,
            patches: PatchRegistry::default(),
        }
    }

    pub fn worker<F, Fut>(mut self, worker: F) -> Self
    where
        F: Fn(Settings) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.worker = Some(Arc::new(move |settings| Box::pin(worker(settings))));
        self
    }

    pub fn patches(mut self, patches: PatchRegistry) -> Self {
        self.patches = patches;
        self
    }

    /// Run the parsed command. Returns the process exit code.
    pub async fn run(&self, cli: Cli) -> i32 {
        setup_logging(cli.verbose, &cli.log);
        match self.try_run(cli).await {
            Ok(code) => code,
            Err(e) => {
                tracing::error!("{:#}", e);
                1
            }
        }
    }

    async fn try_run(&self, cli: Cli) -> anyhow::Result<i32> {
        std::env::set_current_dir(&cli.root)
            .map_err(|e| anyhow::anyhow!("unable to change to root directory {}: {}", cli.root.display(), e))?;
        let settings = Settings::load()?;
        let command = match cli.command {
            Commands::Auto => auto_command(|name| std::env::var(name).ok())?,
            other => other,
        };
        self.dispatch(command, settings).await
    }

    pub async fn dispatch(&self, command: Commands, settings: Settings) -> anyhow::Result<i32> {
        match command {
            Commands::Web { access_log } => {
                tracing::info!("running web server at {}...", settings.port);
                wait_for_services(&settings, SERVICE_WAIT).await?;
                let routes = (self.routes)(&settings);
                let state = startup(settings).await?;
                serve(state, routes, access_log).await?;
                Ok(0)
            }
            Commands::Worker => {
                let Some(worker) = &self.worker else {
                    anyhow::bail!("worker function not set, can't run the worker");
                };
                tracing::info!("running worker...");
                wait_for_services(&settings, SERVICE_WAIT).await?;
                worker(settings).await?;
                Ok(0)
            }
            Commands::Patch { live, name, args } => {
                tracing::info!("running patch...");
                wait_for_services(&settings, SERVICE_WAIT).await?;
                Ok(run_patch(&settings, &self.patches, name.as_deref(), live, args).await)
            }
            Commands::ResetDatabase => {
                tracing::info!("running reset_database...");
                wait_for_services(&settings, SERVICE_WAIT).await?;
                reset_database(&settings).await
            }
            Commands::FlushRedis => {
                flush_redis(&settings).await?;
                Ok(0)
            }
            Commands::CheckWeb { url, status } => {
                let (url, status) = check_web_target(url, status, settings.port, |name| std::env::var(name).ok())?;
                tracing::info!("checking server is running at \"{}\" expecting {}...", url, status);
                Ok(check_server(&url, status).await)
            }
            Commands::Auto => anyhow::bail!("auto must be resolved before dispatch"),
        }
    }
}
