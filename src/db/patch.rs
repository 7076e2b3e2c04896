//! Named one-off database patches, run from the CLI.
//!
//! Patches are registered explicitly at startup. A regular patch runs inside a
//! transaction that is only committed with `--live`; a direct patch runs on the
//! bare connection (needed for statements such as `ALTER TYPE ... ADD VALUE`)
//! and therefore always requires `--live`.

use crate::db::connection::lenient_connect;
use crate::settings::Settings;
use futures::future::BoxFuture;
use sqlx::{Connection, PgConnection};

/// What a patch gets besides its connection.
#[derive(Debug)]
pub struct PatchContext<'s> {
    pub settings: &'s Settings,
    pub live: bool,
    pub args: Vec<String>,
}

/// A patch returns an optional result line to log.
pub type PatchFn =
    for<'a> fn(&'a mut PgConnection, &'a PatchContext<'a>) -> BoxFuture<'a, anyhow::Result<Option<String>>>;

#[derive(Clone)]
pub struct Patch {
    pub name: String,
    pub doc: String,
    pub direct: bool,
    pub func: PatchFn,
}

impl Patch {
    pub fn new(name: impl Into<String>, doc: impl Into<String>, func: PatchFn) -> Self {
        Patch {
            name: name.into(),
            doc: doc.into(),
            direct: false,
            func,
        }
    }

    pub fn direct(mut self) -> Self {
        self.direct = true;
        self
    }
}

/// Patches in registration order.
#[derive(Clone)]
pub struct PatchRegistry {
    patches: Vec<Patch>,
}

impl Default for PatchRegistry {
    fn default() -> Self {
        let mut registry = PatchRegistry::empty();
        registry.register(Patch::new(
            "rerun_sql",
            "rerun the contents of settings.sql_path.",
            rerun_sql,
        ));
        registry
    }
}

impl PatchRegistry {
    pub fn empty() -> Self {
        PatchRegistry { patches: Vec::new() }
    }

    /// Register a patch; a later patch with the same name replaces the earlier one.
    pub fn register(&mut self, patch: Patch) -> &mut Self {
        match self.patches.iter_mut().find(|p| p.name == patch.name) {
            Some(existing) => *existing = patch,
            None => self.patches.push(patch),
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&Patch> {
        self.patches.iter().find(|p| p.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.patches.iter().map(|p| p.name.as_str()).collect()
    }

    /// `available patches:` followed by one `  name: doc` line per patch.
    pub fn listing(&self) -> String {
        let mut out = String::from("available patches:");
        for p in &self.patches {
            out.push_str(&format!("\n  {}: {}", p.name, p.doc.trim_matches(|c| c == '\n' || c == ' ')));
        }
        out
    }
}

fn rerun_sql<'a>(conn: &'a mut PgConnection, ctx: &'a PatchContext<'a>) -> BoxFuture<'a, anyhow::Result<Option<String>>> {
    Box::pin(async move {
        // Only safe when the script uses "CREATE ... IF NOT EXISTS" throughout.
        let sql = ctx.settings.sql()?;
        sqlx::Executor::execute(&mut *conn, sqlx::raw_sql(&sql)).await?;
        Ok(None)
    })
}

/// Resolve `name` in the registry and run it. Returns the process exit code.
pub async fn run_patch(
    settings: &Settings,
    registry: &PatchRegistry,
    name: Option<&str>,
    live: bool,
    args: Vec<String>,
) -> i32 {
    let Some(name) = name else {
        tracing::info!("{}", registry.listing());
        return 0;
    };
    let Some(patch) = registry.get(name) else {
        tracing::error!(patch = name, available = ?registry.names(), "patch not found");
        return 1;
    };

    if patch.direct {
        if !live {
            tracing::error!("direct patches must be called with \"--live\"");
            return 1;
        }
        tracing::info!("running patch {} direct", name);
    } else {
        tracing::info!("running patch {} live {}", name, live);
    }

    let ctx = PatchContext { settings, live, args };
    match execute_patch(settings, patch, &ctx).await {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!(error = ?e, "Error running {} patch", patch.name);
            1
        }
    }
}

async fn execute_patch(settings: &Settings, patch: &Patch, ctx: &PatchContext<'_>) -> anyhow::Result<()> {
    let mut conn = lenient_connect(settings, true).await?;
    tracing::info!("{}", "=".repeat(40));
    let outcome = if patch.direct {
        let result = (patch.func)(&mut conn, ctx).await;
        tracing::info!("{}", "=".repeat(40));
        result.map(|r| {
            log_result(r);
            tracing::info!("committed patch");
        })
    } else {
        let mut tx = conn.begin().await?;
        let result = (patch.func)(&mut *tx, ctx).await;
        tracing::info!("{}", "=".repeat(40));
        match result {
            Ok(r) => {
                log_result(r);
                if ctx.live {
                    tracing::info!("live, committed patch");
                    tx.commit().await?;
                } else {
                    tracing::info!("not live, rolling back");
                    tx.rollback().await?;
                }
                Ok(())
            }
            Err(e) => {
                tx.rollback().await?;
                Err(e)
            }
        }
    };
    conn.close().await?;
    outcome
}

fn log_result(result: Option<String>) {
    if let Some(r) = result {
        tracing::info!("result: {}", r);
    }
}
