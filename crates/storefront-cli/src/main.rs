//! Storefront CLI - plugin catalogue and tenant installation administration

use anyhow::{Context as _, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use storefront_core::config::Config;
use storefront_core::domain::plugins::{Installation, PluginManifest, PluginStore, SqlitePluginStore};
use storefront_core::storage::{Database, DatabaseConfig};
use storefront_plugins::{
    BundleResolver, LifecycleOutcome, ManagerConfig, PluginLoader, PluginManager, PluginRegistry,
    PluginResult, SettingsOutcome, settings_from_json, settings_to_json,
};
use tracing::warn;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "storefront")]
#[command(author, version, about = "Storefront plugin administration", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Database file (overrides config and STOREFRONT_DATABASE)
    #[arg(long, global = true)]
    database: Option<PathBuf>,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the plugin catalogue
    Plugin {
        #[command(subcommand)]
        action: PluginAction,
    },

    /// Install a plugin for a business
    Install {
        /// Plugin key
        plugin_key: String,
        #[arg(long)]
        business: Uuid,
        #[arg(long)]
        user: Uuid,
    },

    /// Activate an installation
    Activate {
        installation: Uuid,
        #[arg(long)]
        business: Uuid,
        #[arg(long)]
        user: Uuid,
    },

    /// Deactivate an installation
    Deactivate {
        installation: Uuid,
        #[arg(long)]
        business: Uuid,
        #[arg(long)]
        user: Uuid,
    },

    /// Uninstall a plugin, deleting its settings
    Uninstall {
        installation: Uuid,
        #[arg(long)]
        business: Uuid,
        #[arg(long)]
        user: Uuid,
    },

    /// Move an installation to the plugin's current version
    Upgrade {
        installation: Uuid,
        #[arg(long)]
        business: Uuid,
        #[arg(long)]
        user: Uuid,
    },

    /// List a business's installations
    Installed {
        #[arg(long)]
        business: Uuid,
    },

    /// Show or change installation settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },

    /// Resolve the public widget of an installation
    Widget {
        installation: Uuid,
        #[arg(long)]
        business: Uuid,
        #[arg(long)]
        profile: Uuid,
    },

    /// Show recent audit entries
    Audit {
        /// Only entries for this business
        #[arg(long)]
        business: Option<Uuid>,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Run health check
    Doctor,
}

#[derive(Subcommand)]
enum PluginAction {
    /// Register or update a plugin from a JSON manifest
    Register { manifest: PathBuf },
    /// List plugins offered in the marketplace
    List {
        /// Include withdrawn plugins
        #[arg(long)]
        all: bool,
    },
    /// Withdraw a plugin from the marketplace
    Disable { plugin_key: String },
    /// Offer a plugin in the marketplace again
    Enable { plugin_key: String },
}

#[derive(Subcommand)]
enum SettingsAction {
    /// Show effective settings (stored values over plugin defaults)
    Show {
        installation: Uuid,
        #[arg(long)]
        business: Uuid,
    },
    /// Deep-merge a JSON object into the stored settings
    Set {
        installation: Uuid,
        #[arg(long)]
        business: Uuid,
        #[arg(long)]
        json: String,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective configuration
    Show,
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
}

/// Everything a command needs to talk to the plugin system
struct App {
    db: Database,
    store: Arc<dyn PluginStore>,
    manager: PluginManager,
}

impl App {
    async fn open(config: &Config, database: Option<&Path>) -> anyhow::Result<Self> {
        let mut db_config = DatabaseConfig::from(&config.database);
        if let Some(path) = database {
            db_config.path = path.to_path_buf();
        }

        let db = Database::new(db_config).await?;
        let store: Arc<dyn PluginStore> = Arc::new(SqlitePluginStore::new(db.pool().clone()));

        let loader = PluginLoader::new(
            Arc::new(PluginRegistry::new()),
            Arc::new(BundleResolver::from_config(&config.plugins)),
        )
        .with_load_timeout(config.plugins.load_timeout());
        let manager = PluginManager::new(
            Arc::clone(&store),
            loader,
            ManagerConfig::from(&config.plugins),
        );

        Ok(Self { db, store, manager })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so JSON output stays parseable
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("storefront=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let format = cli.format;
    let database = cli.database.as_deref();

    // Opened lazily so `config` and `doctor` work without a usable database
    let open = move || async move {
        let config = Config::load()?;
        App::open(&config, database).await
    };

    match cli.command {
        Commands::Plugin { action } => cmd_plugin(&open().await?, action, format).await,

        Commands::Install {
            plugin_key,
            business,
            user,
        } => {
            let app = open().await?;
            report_lifecycle(
                "Installed",
                app.manager.install_plugin(&plugin_key, business, user).await,
                format,
            )
        }

        Commands::Activate {
            installation,
            business,
            user,
        } => {
            let app = open().await?;
            report_lifecycle(
                "Activated",
                app.manager
                    .activate_plugin(installation, business, user)
                    .await,
                format,
            )
        }

        Commands::Deactivate {
            installation,
            business,
            user,
        } => {
            let app = open().await?;
            report_lifecycle(
                "Deactivated",
                app.manager
                    .deactivate_plugin(installation, business, user)
                    .await,
                format,
            )
        }

        Commands::Uninstall {
            installation,
            business,
            user,
        } => {
            let app = open().await?;
            report_lifecycle(
                "Uninstalled",
                app.manager
                    .uninstall_plugin(installation, business, user)
                    .await,
                format,
            )
        }

        Commands::Upgrade {
            installation,
            business,
            user,
        } => {
            let app = open().await?;
            report_lifecycle(
                "Upgraded",
                app.manager
                    .upgrade_installation(installation, business, user)
                    .await,
                format,
            )
        }

        Commands::Installed { business } => cmd_installed(&open().await?, business, format).await,

        Commands::Settings { action } => cmd_settings(&open().await?.manager, action, format).await,

        Commands::Widget {
            installation,
            business,
            profile,
        } => cmd_widget(&open().await?, installation, business, profile, format).await,

        Commands::Audit { business, limit } => {
            cmd_audit(&open().await?, business, limit, format).await
        }

        Commands::Config { action } => cmd_config(action, format),

        Commands::Doctor => cmd_doctor(database, format).await,
    }
}

async fn cmd_installed(app: &App, business: Uuid, format: OutputFormat) -> anyhow::Result<()> {
    let installed = app.manager.list_installations(business).await?;
    if format == OutputFormat::Json {
        return print_json(&installed);
    }

    if installed.is_empty() {
        println!("No plugins installed for business {}.", business);
        println!(
            "\nInstall one with: storefront install <plugin-key> --business {} --user <id>",
            business
        );
        return Ok(());
    }

    println!("Installed plugins:");
    for details in installed {
        let i = &details.installation;
        println!(
            "  {} - {} v{}{}",
            i.id,
            details.plugin.plugin_key,
            i.installed_version,
            if i.is_active { "" } else { " [inactive]" }
        );
    }
    Ok(())
}

async fn cmd_widget(
    app: &App,
    installation: Uuid,
    business: Uuid,
    profile: Uuid,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let widget = app
        .manager
        .load_installation_widget(installation, business, profile)
        .await
        .context("Failed to load widget")?;

    if format == OutputFormat::Json {
        return print_json(&serde_json::json!({
            "plugin_key": widget.plugin_key,
            "installation_id": widget.installation.id,
            "entry_point": widget.component.entry_point(),
            "digest": widget.component.digest(),
            "cached": widget.cached,
            "settings": settings_to_json(&widget.settings),
        }));
    }

    println!("Widget: {}", widget.plugin_key);
    println!("  Entry point: {}", widget.component.entry_point());
    if let Some(digest) = widget.component.digest() {
        println!("  SHA-256: {}", digest);
    }
    println!("  Settings: {}", settings_to_json(&widget.settings));
    Ok(())
}

async fn cmd_audit(
    app: &App,
    business: Option<Uuid>,
    limit: i64,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let entries = app.store.list_audit(business, limit).await?;
    if format == OutputFormat::Json {
        return print_json(&entries);
    }

    if entries.is_empty() {
        println!("No audit entries.");
    }
    for entry in entries {
        let subject = entry
            .plugin_key
            .or(entry.installation_id.map(|id| id.to_string()))
            .unwrap_or_default();
        println!(
            "  {} {} {}",
            entry.created_at.format("%Y-%m-%d %H:%M:%S"),
            entry.action,
            subject
        );
    }
    Ok(())
}

async fn cmd_plugin(app: &App, action: PluginAction, format: OutputFormat) -> anyhow::Result<()> {
    let manager = &app.manager;

    match action {
        PluginAction::Register { manifest } => {
            let data = std::fs::read_to_string(&manifest)
                .with_context(|| format!("Failed to read manifest: {}", manifest.display()))?;
            let parsed: PluginManifest = serde_json::from_str(&data)
                .with_context(|| format!("Invalid manifest JSON: {}", manifest.display()))?;

            let stored = manager.register_plugin(parsed, None).await?;
            if format == OutputFormat::Json {
                return print_json(&stored);
            }
            println!("Registered {} v{}", stored.plugin_key, stored.version);
            println!("  ID: {}", stored.id);
            Ok(())
        }

        PluginAction::List { all } => {
            let plugins = if all {
                app.store.list_plugins(false).await?
            } else {
                manager.list_marketplace().await?
            };
            if format == OutputFormat::Json {
                return print_json(&plugins);
            }

            if plugins.is_empty() {
                println!("No plugins registered.");
                println!("\nRegister one with: storefront plugin register <manifest.json>");
                return Ok(());
            }

            println!("Plugins:");
            for p in plugins {
                println!(
                    "  {} - {} v{} ({}){}{}",
                    p.plugin_key,
                    p.name,
                    p.version,
                    p.plugin_type,
                    if p.is_premium { " [premium]" } else { "" },
                    if p.is_active { "" } else { " [withdrawn]" }
                );
            }
            Ok(())
        }

        PluginAction::Disable { plugin_key } => {
            set_availability(manager, &plugin_key, false, format).await
        }

        PluginAction::Enable { plugin_key } => {
            set_availability(manager, &plugin_key, true, format).await
        }
    }
}

async fn set_availability(
    manager: &PluginManager,
    plugin_key: &str,
    is_active: bool,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let manifest = manager
        .set_plugin_availability(plugin_key, is_active, None)
        .await?;
    if format == OutputFormat::Json {
        return print_json(&manifest);
    }
    println!(
        "{} {}",
        if is_active { "Enabled" } else { "Disabled" },
        manifest.plugin_key
    );
    Ok(())
}

async fn cmd_settings(
    manager: &PluginManager,
    action: SettingsAction,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let (result, verb) = match action {
        SettingsAction::Show {
            installation,
            business,
        } => (manager.get_settings(installation, business).await, None),
        SettingsAction::Set {
            installation,
            business,
            json,
        } => {
            let value: serde_json::Value =
                serde_json::from_str(&json).context("--json must be valid JSON")?;
            let partial = settings_from_json(value)?;
            (
                manager
                    .update_settings(installation, business, &partial)
                    .await,
                Some("Updated settings"),
            )
        }
    };

    let outcome = SettingsOutcome::from(result);
    match format {
        OutputFormat::Json => print_json(&outcome)?,
        OutputFormat::Text => {
            if let Some(settings) = &outcome.settings {
                if let Some(verb) = verb {
                    println!("{}", verb);
                }
                println!("{}", serde_json::to_string_pretty(&settings_to_json(settings))?);
            }
        }
    }

    if !outcome.ok {
        bail!(outcome.error.unwrap_or_else(|| "settings operation failed".to_string()));
    }
    Ok(())
}

fn report_lifecycle(
    verb: &str,
    result: PluginResult<Installation>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let outcome = LifecycleOutcome::from(result);

    match format {
        OutputFormat::Json => print_json(&outcome)?,
        OutputFormat::Text => {
            if let Some(i) = &outcome.installation {
                println!("{} installation {}", verb, i.id);
                println!("  Business: {}", i.business_id);
                println!("  Version: {}", i.installed_version);
                println!("  Active: {}", if i.is_active { "yes" } else { "no" });
            }
        }
    }

    if !outcome.ok {
        bail!(outcome.error.unwrap_or_else(|| format!("{} failed", verb)));
    }
    Ok(())
}

fn cmd_config(action: ConfigAction, format: OutputFormat) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            let config = Config::load()?;
            if format == OutputFormat::Json {
                return print_json(&config);
            }
            println!("Config file: {}", Config::config_path()?.display());
            println!();
            print!("{}", toml_string(&config)?);
        }
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            println!("{}", config.get(&key)?);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            println!("Set {} = {}", key, value);
        }
    }
    Ok(())
}

fn toml_string(config: &Config) -> anyhow::Result<String> {
    let value = serde_json::to_value(config)?;
    let mut out = String::new();
    if let serde_json::Value::Object(sections) = value {
        for (section, fields) in sections {
            out.push_str(&format!("[{}]\n", section));
            if let serde_json::Value::Object(fields) = fields {
                for (key, value) in fields {
                    out.push_str(&format!("{} = {}\n", key, value));
                }
            }
            out.push('\n');
        }
    }
    Ok(out)
}

async fn cmd_doctor(database: Option<&Path>, format: OutputFormat) -> anyhow::Result<()> {
    #[derive(Serialize)]
    struct Check {
        name: &'static str,
        ok: bool,
        detail: String,
    }

    let mut checks = Vec::new();

    let config = match Config::load() {
        Ok(config) => {
            checks.push(Check {
                name: "configuration",
                ok: true,
                detail: "valid".to_string(),
            });
            config
        }
        Err(e) => {
            checks.push(Check {
                name: "configuration",
                ok: false,
                detail: e.to_string(),
            });
            Config::default()
        }
    };

    match App::open(&config, database).await {
        Ok(app) => {
            let health = app.db.health_check().await;
            checks.push(Check {
                name: "database",
                ok: health.is_ok(),
                detail: match &health {
                    Ok(()) => app.db.path().display().to_string(),
                    Err(e) => e.to_string(),
                },
            });

            match app.db.migration_status().await {
                Ok(status) => checks.push(Check {
                    name: "schema",
                    ok: !status.needs_migration,
                    detail: format!(
                        "version {} of {}",
                        status.current_version, status.target_version
                    ),
                }),
                Err(e) => checks.push(Check {
                    name: "schema",
                    ok: false,
                    detail: e.to_string(),
                }),
            }

            match app.manager.hydrate_registry().await {
                Ok(count) => checks.push(Check {
                    name: "catalogue",
                    ok: true,
                    detail: format!("{} plugin(s) registered", count),
                }),
                Err(e) => checks.push(Check {
                    name: "catalogue",
                    ok: false,
                    detail: e.to_string(),
                }),
            }

            app.db.close().await;
        }
        Err(e) => checks.push(Check {
            name: "database",
            ok: false,
            detail: format!("{:#}", e),
        }),
    }

    let widget_root = &config.plugins.widget_root;
    checks.push(Check {
        name: "widget root",
        ok: widget_root.is_dir(),
        detail: widget_root.display().to_string(),
    });

    let all_ok = checks.iter().all(|c| c.ok);

    if format == OutputFormat::Json {
        print_json(&serde_json::json!({ "ok": all_ok, "checks": checks }))?;
    } else {
        println!("Storefront Health Check");
        println!("=======================");
        println!();
        for check in &checks {
            println!(
                "[{}] {}: {}",
                if check.ok { "OK" } else { "!!" },
                check.name,
                check.detail
            );
        }
        println!();
        if all_ok {
            println!("All checks passed.");
        } else {
            warn!("Health check found problems");
            println!("Some checks need attention.");
        }
    }

    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
