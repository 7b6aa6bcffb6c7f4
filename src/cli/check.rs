use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chatgate::{GuildId, Permissions, PrincipalId};
use clap::Args;
use permissions_broker::config::load_overwrites_from_path;
use permissions_broker::{
    overwrite_context, resolve_missing, AuthzDecision, Broker, CapabilityScope,
    InMemoryCapabilities, OverwriteCheck, OverwritePolicy, PermissionsBroker,
};
use serde::Serialize;

use super::output::{emit_structured, OutputFormat};

#[derive(Args, Clone, Debug)]
pub struct CheckArgs {
    /// JSON or YAML file holding the overwrite list
    #[arg(long, value_name = "FILE")]
    pub overwrites: PathBuf,

    /// Principal being checked
    #[arg(long)]
    pub principal: PrincipalId,

    /// Root (default) principal of the resource, usually the guild id
    #[arg(long)]
    pub root: PrincipalId,

    /// Required permission names, e.g. MANAGE_CHANNELS
    #[arg(long, num_args = 1.., required = true)]
    pub require: Vec<String>,

    /// Coarse permission names held by the principal; also runs the full broker decision
    #[arg(long, num_args = 1..)]
    pub grant: Vec<String>,

    /// Let the coarse bits decide alone when the list has no entry for the principal
    #[arg(long)]
    pub coarse_fallback: bool,
}

#[derive(Serialize)]
struct CheckReport {
    principal: PrincipalId,
    root: PrincipalId,
    required: Permissions,
    matched: Option<PrincipalId>,
    allowed: bool,
    missing: Permissions,
    #[serde(skip_serializing_if = "Option::is_none")]
    decision: Option<AuthzDecision>,
}

pub async fn cmd_check(args: CheckArgs, output: OutputFormat) -> Result<()> {
    let overwrites = load_overwrites_from_path(&args.overwrites)
        .with_context(|| format!("Failed to load overwrites from {}", args.overwrites.display()))?;
    let required =
        Permissions::from_names(&args.require).context("Unknown required permission")?;

    let matched = overwrite_context(args.principal, args.root, &overwrites).map(|entry| entry.id);
    let missing = resolve_missing(args.principal, args.root, &overwrites, required);

    let decision = if args.grant.is_empty() {
        None
    } else {
        let granted = Permissions::from_names(&args.grant).context("Unknown granted permission")?;
        let guild = GuildId(args.root.get());
        let capabilities = Arc::new(InMemoryCapabilities::new());
        capabilities.grant_guild(args.principal, guild, granted);
        let policy = if args.coarse_fallback {
            OverwritePolicy::CoarseFallback
        } else {
            OverwritePolicy::Strict
        };
        let broker = PermissionsBroker::new(capabilities).with_overwrite_policy(policy);
        let check = OverwriteCheck {
            root: args.root,
            overwrites: &overwrites,
        };
        Some(
            broker
                .ensure_for(args.principal, CapabilityScope::Guild(guild), required, Some(check))
                .await?,
        )
    };

    let report = CheckReport {
        principal: args.principal,
        root: args.root,
        required,
        matched,
        allowed: missing.is_empty(),
        missing,
        decision,
    };

    if emit_structured(output, &report)? {
        return Ok(());
    }

    let matched = match report.matched {
        Some(id) if id == report.root => format!("root entry {id}"),
        Some(id) => format!("entry {id}"),
        None => "no entry".to_string(),
    };
    println!("Principal {} ({matched})", report.principal);
    println!("  required: {}", report.required);
    if report.allowed {
        println!("  overwrites: allowed");
    } else {
        println!("  overwrites: denied, missing {}", report.missing);
    }
    if let Some(decision) = &report.decision {
        println!(
            "  broker: {:?} via {:?}, missing {}",
            decision.kind, decision.source, decision.missing
        );
    }
    Ok(())
}
