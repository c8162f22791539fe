mod config;
mod error;

use std::path::PathBuf;
use std::process::ExitCode;

use chrono::{DateTime, Duration, Local, TimeZone, Utc};
use clap::{Args, Parser, Subcommand};
use engine::{Engine, Lifecycle};
use policy::{Grantee, GranteeKind, Permission, ResourceType};
use storage::{Grant, GrantStore, Principal, PrincipalStore};
use tracing_subscriber::EnvFilter;

use config::{Config, LogConfig, LogFormat};
use error::{Error, Result};

const CONFIG_FILE: &str = "grantctl.toml";

/// Exit status of `check` when access is denied.
const EXIT_DENIED: u8 = 2;

#[derive(Parser)]
#[command(name = "grantctl")]
#[command(about = "Manage and query resource permission grants", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the config file
    #[arg(long, global = true, default_value = CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage principals
    #[command(subcommand)]
    Principal(PrincipalCommand),
    /// Manage group memberships
    #[command(subcommand)]
    Group(GroupCommand),
    /// Register a new resource with its creator as admin
    Create {
        #[command(flatten)]
        target: Target,
    },
    /// Grant a permission on a resource (requires admin)
    Grant {
        #[command(flatten)]
        target: Target,
        /// Permission to grant: read, write, delete, admin
        permission: String,
        #[command(flatten)]
        grantee: GranteeArgs,
        /// Expiry as an RFC 3339 timestamp or a duration (30m, 12h, 7d)
        #[arg(long)]
        expires: Option<String>,
    },
    /// Revoke a permission on a resource (requires admin)
    Revoke {
        #[command(flatten)]
        target: Target,
        /// Permission to revoke: read, write, delete, admin
        permission: String,
        #[command(flatten)]
        grantee: GranteeArgs,
    },
    /// Check whether a principal holds a permission on a resource
    Check {
        #[command(flatten)]
        target: Target,
        /// Permission to check: read, write, delete, admin
        permission: String,
    },
    /// List resources a principal holds a permission on
    List {
        /// Principal name
        #[arg(long = "as")]
        principal: String,
        /// Required permission
        #[arg(short, long, default_value = "read")]
        permission: String,
        /// Resource type (defaults to the configured type)
        #[arg(long = "type")]
        resource_type: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Show current grants on a resource
    Permissions {
        /// Resource id
        resource: String,
        #[arg(long = "type")]
        resource_type: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Show every grant ever recorded on a resource
    History {
        /// Resource id
        resource: String,
        #[arg(long = "type")]
        resource_type: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Revoke all grants on a deleted resource (requires delete)
    Retire {
        #[command(flatten)]
        target: Target,
    },
}

#[derive(Subcommand)]
enum PrincipalCommand {
    /// Register a principal
    Add { name: String },
    /// List principals
    List {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum GroupCommand {
    /// Add a principal to a group
    Join { principal: String, group: String },
    /// Remove a principal from a group
    Leave { principal: String, group: String },
}

/// The acting principal and the resource it acts on.
#[derive(Args)]
struct Target {
    /// Acting principal name
    #[arg(long = "as")]
    principal: String,
    /// Resource id
    resource: String,
    /// Resource type (defaults to the configured type)
    #[arg(long = "type")]
    resource_type: Option<String>,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct GranteeArgs {
    /// Grant to a principal, by name
    #[arg(long)]
    user: Option<String>,
    /// Grant to a group, by name
    #[arg(long)]
    group: Option<String>,
    /// Grant to everyone
    #[arg(long)]
    public: bool,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = Config::load_or_default(&cli.config)?;
    init_tracing(&config.log);

    let app = App::open(config)?;
    match cli.command {
        Commands::Principal(PrincipalCommand::Add { name }) => app.cmd_principal_add(&name),
        Commands::Principal(PrincipalCommand::List { json }) => app.cmd_principal_list(json),
        Commands::Group(GroupCommand::Join { principal, group }) => {
            app.cmd_group(&principal, &group, true)
        }
        Commands::Group(GroupCommand::Leave { principal, group }) => {
            app.cmd_group(&principal, &group, false)
        }
        Commands::Create { target } => app.cmd_create(&target),
        Commands::Grant {
            target,
            permission,
            grantee,
            expires,
        } => app.cmd_grant(&target, &permission, &grantee, expires.as_deref()),
        Commands::Revoke {
            target,
            permission,
            grantee,
        } => app.cmd_revoke(&target, &permission, &grantee),
        Commands::Check { target, permission } => app.cmd_check(&target, &permission),
        Commands::List {
            principal,
            permission,
            resource_type,
            json,
        } => app.cmd_list(&principal, &permission, resource_type.as_deref(), json),
        Commands::Permissions {
            resource,
            resource_type,
            json,
        } => app.cmd_permissions(&resource, resource_type.as_deref(), json),
        Commands::History {
            resource,
            resource_type,
            json,
        } => app.cmd_history(&resource, resource_type.as_deref(), json),
        Commands::Retire { target } => app.cmd_retire(&target),
    }
}

fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.filter));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match log.format {
        LogFormat::Text => subscriber.init(),
        LogFormat::Json => subscriber.json().init(),
    }
}

struct App {
    config: Config,
    engine: Engine<PrincipalStore>,
}

impl App {
    fn open(config: Config) -> Result<Self> {
        let db_path = match &config.store.path {
            Some(path) => path.clone(),
            None => dirs_data_dir()
                .unwrap_or_else(|| ".grantctl".into())
                .join("grants.db"),
        };
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        tracing::debug!(path = %db_path.display(), "opening store");

        let grants = GrantStore::open(&db_path)?;
        let principals = PrincipalStore::open(&db_path)?;
        Ok(Self {
            config,
            engine: Engine::new(grants, principals),
        })
    }

    fn principals(&self) -> &PrincipalStore {
        self.engine.directory()
    }

    fn principal(&self, name: &str) -> Result<Principal> {
        self.principals()
            .by_name(name)?
            .ok_or_else(|| Error::PrincipalNotFound {
                name: name.to_string(),
            })
    }

    fn resource_type(&self, flag: Option<&str>) -> Result<ResourceType> {
        match flag {
            Some(raw) => Ok(raw.parse()?),
            None => Ok(self.config.defaults.resource_type),
        }
    }

    fn grantee(&self, args: &GranteeArgs) -> Result<Grantee> {
        let grantee = if let Some(name) = &args.user {
            Grantee::from_parts(GranteeKind::User, Some(self.principal(name)?.id), None)?
        } else if let Some(group) = &args.group {
            Grantee::from_parts(GranteeKind::Group, None, Some(group.as_str()))?
        } else {
            Grantee::from_parts(GranteeKind::Public, None, None)?
        };
        Ok(grantee)
    }

    /// Human-readable grantee, with user ids resolved to names.
    fn grantee_label(&self, grantee: &Grantee) -> Result<String> {
        Ok(match grantee {
            Grantee::User { id } => match self.principals().get(*id)? {
                Some(p) => format!("user:{}", p.name),
                None => grantee.to_string(),
            },
            other => other.to_string(),
        })
    }

    fn cmd_principal_add(&self, name: &str) -> Result<ExitCode> {
        let principal = self.principals().create(name)?;
        println!("{}  {}", principal.id, principal.name);
        Ok(ExitCode::SUCCESS)
    }

    fn cmd_principal_list(&self, json: bool) -> Result<ExitCode> {
        let principals = self.principals().list()?;
        if json {
            println!("{}", serde_json::to_string_pretty(&principals)?);
            return Ok(ExitCode::SUCCESS);
        }
        if principals.is_empty() {
            println!("No principals found.");
            return Ok(ExitCode::SUCCESS);
        }

        println!("{:<36}  {:<20}  GROUPS", "PRINCIPAL ID", "NAME");
        println!("{}", "-".repeat(80));
        for principal in principals {
            let groups = self.principals().groups(principal.id)?;
            println!(
                "{:<36}  {:<20}  {}",
                principal.id,
                principal.name,
                groups.join(",")
            );
        }
        Ok(ExitCode::SUCCESS)
    }

    fn cmd_group(&self, name: &str, group: &str, join: bool) -> Result<ExitCode> {
        let principal = self.principal(name)?;
        let changed = if join {
            self.principals().join(principal.id, group)?
        } else {
            self.principals().leave(principal.id, group)?
        };
        if !changed {
            let state = if join { "already in" } else { "not in" };
            println!("{name} is {state} group {group}");
        }
        Ok(ExitCode::SUCCESS)
    }

    fn cmd_create(&self, target: &Target) -> Result<ExitCode> {
        let creator = self.principal(&target.principal)?;
        let resource_type = self.resource_type(target.resource_type.as_deref())?;
        let grant = Lifecycle::new(&self.engine).create_resource(
            creator.id,
            resource_type,
            &target.resource,
        )?;
        println!("Created {resource_type} {} (grant {})", target.resource, grant.id);
        Ok(ExitCode::SUCCESS)
    }

    fn cmd_grant(
        &self,
        target: &Target,
        permission: &str,
        grantee: &GranteeArgs,
        expires: Option<&str>,
    ) -> Result<ExitCode> {
        let caller = self.principal(&target.principal)?;
        let resource_type = self.resource_type(target.resource_type.as_deref())?;
        let grantee = self.grantee(grantee)?;
        let permission: Permission = permission.parse()?;
        let expires_at = expires.map(|raw| parse_expiry(raw, Utc::now())).transpose()?;

        let grant = Lifecycle::new(&self.engine).share(
            caller.id,
            resource_type,
            &target.resource,
            grantee,
            permission,
            expires_at,
        )?;
        println!(
            "Granted {} to {} (grant {})",
            grant.permission,
            self.grantee_label(&grant.grantee)?,
            grant.id
        );
        Ok(ExitCode::SUCCESS)
    }

    fn cmd_revoke(
        &self,
        target: &Target,
        permission: &str,
        grantee: &GranteeArgs,
    ) -> Result<ExitCode> {
        let caller = self.principal(&target.principal)?;
        let resource_type = self.resource_type(target.resource_type.as_deref())?;
        let grantee = self.grantee(grantee)?;
        let permission: Permission = permission.parse()?;

        let count = Lifecycle::new(&self.engine).unshare(
            caller.id,
            resource_type,
            &target.resource,
            &grantee,
            permission,
        )?;
        println!("Revoked {count} grant(s)");
        Ok(ExitCode::SUCCESS)
    }

    fn cmd_check(&self, target: &Target, permission: &str) -> Result<ExitCode> {
        let principal = self.principal(&target.principal)?;
        let resource_type = self.resource_type(target.resource_type.as_deref())?;
        let permission: Permission = permission.parse()?;

        if self
            .engine
            .has_permission(principal.id, resource_type, &target.resource, permission)?
        {
            println!("allowed");
            Ok(ExitCode::SUCCESS)
        } else {
            println!("denied");
            Ok(ExitCode::from(EXIT_DENIED))
        }
    }

    fn cmd_list(
        &self,
        name: &str,
        permission: &str,
        resource_type: Option<&str>,
        json: bool,
    ) -> Result<ExitCode> {
        let principal = self.principal(name)?;
        let resource_type = self.resource_type(resource_type)?;
        let permission: Permission = permission.parse()?;

        let resources = self
            .engine
            .accessible_resources(principal.id, resource_type, permission)?;
        if json {
            println!("{}", serde_json::to_string_pretty(&resources)?);
            return Ok(ExitCode::SUCCESS);
        }
        if resources.is_empty() {
            println!("No {resource_type} resources with {permission} for {name}.");
            return Ok(ExitCode::SUCCESS);
        }

        for resource in resources {
            let level = self
                .engine
                .effective_permission(principal.id, resource_type, &resource)?
                .map(|p| p.to_string())
                .unwrap_or_default();
            println!("{resource:<40}  {level}");
        }
        Ok(ExitCode::SUCCESS)
    }

    fn cmd_permissions(
        &self,
        resource: &str,
        resource_type: Option<&str>,
        json: bool,
    ) -> Result<ExitCode> {
        let resource_type = self.resource_type(resource_type)?;
        let permissions = self.engine.resource_permissions(resource_type, resource)?;
        if json {
            println!("{}", serde_json::to_string_pretty(&permissions)?);
            return Ok(ExitCode::SUCCESS);
        }
        if permissions.is_empty() {
            println!("No current grants on {resource_type} {resource}");
            return Ok(ExitCode::SUCCESS);
        }

        println!(
            "{:<30}  {:<10}  {:<20}  {:<16}  EXPIRES",
            "GRANTEE", "PERMISSION", "GRANTED BY", "GRANTED AT"
        );
        println!("{}", "-".repeat(100));
        for entry in permissions {
            let grantor = entry
                .grantor
                .map(|p| p.name)
                .unwrap_or_else(|| entry.grant.granted_by.to_string());
            println!(
                "{:<30}  {:<10}  {:<20}  {:<16}  {}",
                self.grantee_label(&entry.grant.grantee)?,
                entry.grant.permission,
                grantor,
                format_time(entry.grant.granted_at),
                entry
                    .grant
                    .expires_at
                    .map(format_time)
                    .unwrap_or_else(|| "never".to_string()),
            );
        }
        Ok(ExitCode::SUCCESS)
    }

    fn cmd_history(
        &self,
        resource: &str,
        resource_type: Option<&str>,
        json: bool,
    ) -> Result<ExitCode> {
        let resource_type = self.resource_type(resource_type)?;
        let grants = self.engine.history(resource_type, resource)?;
        if json {
            println!("{}", serde_json::to_string_pretty(&grants)?);
            return Ok(ExitCode::SUCCESS);
        }
        if grants.is_empty() {
            println!("No grants recorded on {resource_type} {resource}");
            return Ok(ExitCode::SUCCESS);
        }

        for grant in grants {
            self.print_history_entry(&grant)?;
        }
        Ok(ExitCode::SUCCESS)
    }

    fn print_history_entry(&self, grant: &Grant) -> Result<()> {
        let status = if !grant.active {
            "revoked"
        } else if !grant.is_current(Utc::now()) {
            "expired"
        } else {
            "active"
        };
        let grantor = match self.principals().get(grant.granted_by)? {
            Some(p) => p.name,
            None => grant.granted_by.to_string(),
        };
        println!(
            "[{}] {} {} -> {} by {grantor} ({status})",
            format_time(grant.granted_at),
            grant.id,
            grant.permission,
            self.grantee_label(&grant.grantee)?,
        );
        Ok(())
    }

    fn cmd_retire(&self, target: &Target) -> Result<ExitCode> {
        let caller = self.principal(&target.principal)?;
        let resource_type = self.resource_type(target.resource_type.as_deref())?;
        let count = Lifecycle::new(&self.engine).retire_resource(
            caller.id,
            resource_type,
            &target.resource,
        )?;
        println!(
            "Retired {resource_type} {}: {count} grant(s) revoked",
            target.resource
        );
        Ok(ExitCode::SUCCESS)
    }
}

/// Parse an RFC 3339 timestamp, or a duration relative to `now` such as
/// `30m`, `12h` or `7d`.
fn parse_expiry(raw: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Ok(at.with_timezone(&Utc));
    }

    let invalid = || Error::InvalidExpiry {
        value: raw.to_string(),
    };
    let (split, _) = raw.char_indices().last().ok_or_else(invalid)?;
    let (amount, unit) = raw.split_at(split);
    let amount: i64 = amount.parse().map_err(|_| invalid())?;
    if amount <= 0 {
        return Err(invalid());
    }
    let duration = match unit {
        "s" => Duration::try_seconds(amount),
        "m" => Duration::try_minutes(amount),
        "h" => Duration::try_hours(amount),
        "d" => Duration::try_days(amount),
        _ => None,
    }
    .ok_or_else(invalid)?;
    now.checked_add_signed(duration).ok_or_else(invalid)
}

fn format_time(at: DateTime<Utc>) -> String {
    Local
        .from_utc_datetime(&at.naive_utc())
        .format("%Y-%m-%d %H:%M")
        .to_string()
}

fn dirs_data_dir() -> Option<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME")
            .map(|h| PathBuf::from(h).join("Library/Application Support/grantctl"))
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local/share")))
            .map(|p| p.join("grantctl"))
    }
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|h| PathBuf::from(h).join("grantctl"))
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        None
    }
}
