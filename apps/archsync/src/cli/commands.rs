//! # CLI Command Implementations
//!
//! Every command except `serve` talks to a version store through
//! `HttpBackend`, one store per invocation.

use crate::api::{self, AppState};
use crate::client::HttpBackend;
use crate::config::{ClientConfig, ServerConfig};
use archsync_core::{
    ArchsyncError, Constraint, DiffStatus, DiffView, Direction, EnvironmentStore,
    EnvironmentVersion, InMemoryBackend, Navigation, StoreOptions, SyncEngine, Workspace,
};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

/// Maximum size of a constraints or seed file (16 MB).
const MAX_INPUT_FILE_SIZE: u64 = 16 * 1024 * 1024;

// =============================================================================
// CONNECTION
// =============================================================================

/// The store and sync engine for one `(architecture, environment)`.
pub struct Connection {
    pub architecture: String,
    pub store: Arc<EnvironmentStore<HttpBackend>>,
    pub sync: SyncEngine<HttpBackend>,
}

impl Connection {
    pub fn open(config: &ClientConfig, architecture: &str, environment: &str) -> Result<Self, ArchsyncError> {
        let backend = Arc::new(HttpBackend::from_config(config)?);
        let workspace = Workspace::new(
            backend,
            StoreOptions {
                can_overwrite: config.can_overwrite,
            },
        );
        Ok(Self {
            architecture: architecture.to_string(),
            store: workspace.store(architecture, environment),
            sync: workspace.sync(),
        })
    }
}

// =============================================================================
// INPUT FILES
// =============================================================================

/// Read and parse a JSON file, rejecting anything over the size limit.
pub fn read_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ArchsyncError> {
    let metadata = std::fs::metadata(path).map_err(|e| {
        ArchsyncError::InvalidInput(format!("cannot read '{}': {e}", path.display()))
    })?;
    if !metadata.is_file() {
        return Err(ArchsyncError::InvalidInput(format!(
            "'{}' is not a regular file",
            path.display()
        )));
    }
    if metadata.len() > MAX_INPUT_FILE_SIZE {
        return Err(ArchsyncError::InvalidInput(format!(
            "'{}' is {} bytes, limit is {}",
            path.display(),
            metadata.len(),
            MAX_INPUT_FILE_SIZE
        )));
    }
    let raw = std::fs::read_to_string(path).map_err(|e| {
        ArchsyncError::InvalidInput(format!("cannot read '{}': {e}", path.display()))
    })?;
    serde_json::from_str(&raw)
        .map_err(|e| ArchsyncError::InvalidInput(format!("invalid JSON in '{}': {e}", path.display())))
}

fn print_json<T: Serialize>(value: &T) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}

// =============================================================================
// SERVE COMMAND
// =============================================================================

/// Start the development server.
pub async fn cmd_serve(config: &ServerConfig, seed: Option<&Path>, quiet: bool) -> Result<(), ArchsyncError> {
    let state = AppState::new(InMemoryBackend::with_schema(config.schema.clone()));
    if let Some(path) = seed {
        let snapshots: Vec<EnvironmentVersion> = read_json_file(path)?;
        let count = state.seed(snapshots)?;
        tracing::info!("Seeded {} version(s) from {}", count, path.display());
    }

    if !quiet {
        println!("archsync development server v{}", env!("CARGO_PKG_VERSION"));
        println!("  Listening: http://{}", config.addr());
        println!("  Storage:   in-memory (lost on exit)");
        println!();
        println!("Press Ctrl+C to stop");
    }

    api::run_server(state, config).await
}

// =============================================================================
// SHOW COMMAND
// =============================================================================

/// Print an environment version.
pub async fn cmd_show(conn: &Connection, version: Option<u64>, json_mode: bool) -> Result<(), ArchsyncError> {
    let loaded = conn.store.load(version).await?;
    print_version(conn, &loaded, json_mode);
    Ok(())
}

fn print_version(conn: &Connection, version: &EnvironmentVersion, json_mode: bool) {
    let pointers = conn.store.pointers();
    if json_mode {
        print_json(&serde_json::json!({
            "version": version,
            "previous": pointers.previous,
            "next": pointers.next,
        }));
        return;
    }

    println!("{}/{} v{}", version.architecture_id, version.environment_id, version.version);
    println!(
        "History: previous {} | next {}",
        describe(pointers.previous),
        describe(pointers.next)
    );
    println!();
    println!("Resources ({}):", version.resources.len());
    for resource in version.resources.values() {
        let imported = if resource.imported { " [imported]" } else { "" };
        println!("  {}{}", resource.id, imported);
        for (key, value) in &resource.properties {
            println!("      {key} = {value}");
        }
    }
    println!("Edges ({}):", version.edges.len());
    for edge in &version.edges {
        println!("  {}", edge.key());
    }
    if !version.config_errors.is_empty() {
        println!("Configuration errors ({}):", version.config_errors.len());
        for err in &version.config_errors {
            println!("  {err}");
        }
    }
}

fn describe(version: Option<u64>) -> String {
    version.map_or_else(|| "-".to_string(), |v| format!("v{v}"))
}

// =============================================================================
// APPLY COMMAND
// =============================================================================

/// Stage a constraint file against the current version and apply it.
///
/// A stale apply fails unless `force` is set, in which case the overwrite is
/// confirmed (subject to `can_overwrite`).
pub async fn cmd_apply(conn: &Connection, file: &Path, force: bool, json_mode: bool) -> Result<(), ArchsyncError> {
    let constraints: Vec<Constraint> = read_json_file(file)?;
    let base = conn.store.load(None).await?;

    let mut replaced = 0usize;
    for constraint in constraints {
        if conn.store.stage(constraint)? {
            replaced += 1;
        }
    }
    tracing::info!(
        "Staged {} constraint(s) on v{} ({} coalesced)",
        conn.store.unapplied_constraints().len(),
        base.version,
        replaced
    );

    let applied = match conn.store.apply(false).await {
        Err(ArchsyncError::StaleVersion { local, remote }) if force => {
            eprintln!("Server is at v{remote}, this client last saw v{local}; overwriting.");
            conn.store.confirm_overwrite().await?
        }
        Err(err @ ArchsyncError::StaleVersion { .. }) => {
            eprintln!("{err}");
            eprintln!("Another client changed this environment. Re-run with --force to overwrite it.");
            return Err(err);
        }
        Err(ArchsyncError::Config(errors)) => {
            for error in &errors {
                eprintln!("  {error}");
            }
            return Err(ArchsyncError::Config(errors));
        }
        other => other?,
    };

    if json_mode {
        print_json(&*applied);
    } else {
        println!("Applied: v{} -> v{}", base.version, applied.version);
    }
    Ok(())
}

// =============================================================================
// HISTORY COMMANDS
// =============================================================================

/// Step one version from `version` (default: current).
pub async fn cmd_step(
    conn: &Connection,
    version: Option<u64>,
    direction: Direction,
    select: bool,
    json_mode: bool,
) -> Result<(), ArchsyncError> {
    conn.store.load(version).await?;
    let moved = match direction {
        Direction::Previous => conn.store.go_to_previous().await?,
        Direction::Next => conn.store.go_to_next().await?,
    };

    let reached = match moved {
        Navigation::Moved(reached) => reached,
        Navigation::Unavailable => {
            if json_mode {
                print_json(&serde_json::json!({ "moved": false, "direction": direction }));
            } else {
                println!("No {} version.", direction.as_str());
            }
            return Ok(());
        }
    };

    if select {
        conn.store.select(reached.version).await?;
    }
    print_version(conn, &reached, json_mode);
    Ok(())
}

/// Make a version current on the server.
pub async fn cmd_select(conn: &Connection, version: u64, json_mode: bool) -> Result<(), ArchsyncError> {
    let selected = conn.store.select(version).await?;
    if json_mode {
        print_json(&serde_json::json!({ "version": selected.version }));
    } else {
        println!(
            "Selected {}/{} v{}",
            selected.architecture_id, selected.environment_id, selected.version
        );
    }
    Ok(())
}

/// List the constraints behind the current version.
pub async fn cmd_constraints(conn: &Connection, json_mode: bool) -> Result<(), ArchsyncError> {
    let constraints = conn.store.list_constraints().await?;
    if json_mode {
        print_json(&constraints);
        return Ok(());
    }

    println!("{} ({} constraints)", conn.store.key(), constraints.len());
    for constraint in &constraints {
        println!("  {constraint}");
    }
    Ok(())
}

// =============================================================================
// SYNC COMMANDS
// =============================================================================

/// Diff two environments.
pub async fn cmd_diff(conn: &Connection, source: &str, target: &str, json_mode: bool) -> Result<(), ArchsyncError> {
    let view = conn.sync.diff_view(&conn.architecture, source, target).await?;
    if json_mode {
        print_json(&view);
    } else {
        print_diff(&view);
    }
    Ok(())
}

fn print_diff(view: &DiffView) {
    println!("{} -> {}", view.source, view.target);
    if view.rows().next().is_none() {
        println!("  (no differences)");
        return;
    }
    for row in view.rows() {
        let marker = match row.status {
            DiffStatus::Added => '+',
            DiffStatus::Removed => '-',
            DiffStatus::Changed => '~',
        };
        match &row.badge {
            Some(badge) => println!("  {marker} {} ({badge})", row.key),
            None => println!("  {marker} {}", row.key),
        }
        for property in &row.properties {
            println!(
                "      {}: {} -> {}",
                property.property,
                property.old.as_ref().map_or_else(|| "-".to_string(), ToString::to_string),
                property.new.as_ref().map_or_else(|| "-".to_string(), ToString::to_string)
            );
        }
    }
}

/// Check whether two environments are equivalent.
pub async fn cmd_insync(conn: &Connection, source: &str, target: &str, json_mode: bool) -> Result<(), ArchsyncError> {
    let in_sync = conn.sync.in_sync(&conn.architecture, source, target).await?;
    if json_mode {
        print_json(&api::InSyncResponse { in_sync });
    } else if in_sync {
        println!("{source} and {target} are in sync");
    } else {
        println!("{source} and {target} differ (run `archsync diff -s {source} -t {target}`)");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn constraint_files_parse() {
        let mut file = tempfile::NamedTempFile::new().expect("temp");
        write!(
            file,
            r#"[{{"scope":"resource","operator":"equals","target":"aws:ec2:web","property":"instanceType","value":"t3.large"}}]"#
        )
        .expect("write");

        let parsed: Vec<Constraint> = read_json_file(file.path()).expect("parse");
        assert_eq!(parsed.len(), 1);
    }

    #[test]
    fn directories_are_rejected() {
        let dir = tempfile::tempdir().expect("dir");
        let err = read_json_file::<Vec<Constraint>>(dir.path()).expect_err("dir");
        assert!(matches!(err, ArchsyncError::InvalidInput(_)));
    }

    #[test]
    fn invalid_json_is_reported() {
        let mut file = tempfile::NamedTempFile::new().expect("temp");
        write!(file, "not json").expect("write");
        let err = read_json_file::<Vec<Constraint>>(file.path()).expect_err("invalid");
        assert!(matches!(err, ArchsyncError::InvalidInput(_)));
    }
}
