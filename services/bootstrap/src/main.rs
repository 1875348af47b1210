//! plinth bootstrap binary.
//!
//! Drives a freshly provisioned head node through the full bootstrap
//! sequence and, once the cluster reports initialized, registers the
//! initial admin account.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use plinth_bootstrap::credentials::CredentialDistributor;
use plinth_bootstrap::{
    accounts, BootstrapConfig, BootstrapOrchestrator, ControllerClient, HookProvisioner,
    LocalState, NodeAddress, RoleLayout,
};
use plinth_remote::SshExecutor;

/// Bootstrap a plinth deployment onto a running machine.
#[derive(Parser, Debug)]
#[command(name = "plinth", version, about)]
struct Args {
    /// Public address of the head node to bootstrap.
    #[arg(long)]
    machine: String,

    /// Deployment keyname; selects the SSH key and secret under
    /// ~/.plinth.
    #[arg(long)]
    keyname: String,

    /// Datastore the deployment runs on.
    #[arg(long, default_value = "cassandra")]
    datastore: String,

    /// Generate and distribute TLS material for the deployment.
    #[arg(long)]
    tls: bool,

    /// Pass verbose logging through to the remote controller.
    #[arg(long)]
    verbose: bool,

    /// Email address for the initial admin account.
    #[arg(long)]
    admin_email: Option<String>,

    /// Password for the initial admin account.
    #[arg(long, env = "PLINTH_ADMIN_PASSWORD", hide_env_values = true)]
    admin_password: Option<String>,

    /// Local platform checkout to rsync onto the machine before
    /// launch (development deployments).
    #[arg(long)]
    source_dir: Option<PathBuf>,

    /// Shell command invoked to tear down provisioned instances when
    /// bootstrap fails.
    #[arg(long)]
    terminate_hook: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut config = BootstrapConfig::new(&args.keyname, &args.datastore);
    config.use_tls = args.tls;
    config.verbose = args.verbose;
    config.source_dir = args.source_dir.clone();
    config.terminate_hook = args.terminate_hook.clone();
    config.validate()?;

    let local = LocalState::new()?;
    let secret = local
        .read_secret(&config.keyname)
        .await
        .with_context(|| format!("no deployment secret for keyname {}", config.keyname))?;

    let exec = Arc::new(SshExecutor::new(local.ssh_key_path(&config.keyname)));
    let api = Arc::new(ControllerClient::new(secret));
    let provisioner = Arc::new(HookProvisioner::new(config.terminate_hook.clone()));

    let head = NodeAddress::from(args.machine.as_str());
    let keyname = config.keyname.clone();

    let orchestrator = BootstrapOrchestrator::new(
        config,
        exec.clone(),
        api.clone(),
        provisioner,
        local.clone(),
    );
    let snapshot = orchestrator.run(&head).await?;

    // The controller now knows the whole layout; mirror it back onto
    // the head node so tool invocations can find it.
    let distributor = CredentialDistributor::new(exec, local);
    distributor
        .copy_local_metadata(&head, &keyname, &snapshot.role_info)
        .await?;

    if let (Some(email), Some(password)) = (&args.admin_email, &args.admin_password) {
        accounts::create_user_accounts(api.as_ref(), &head, email, password).await?;
        info!(email = %email, "Admin account created");
    }

    // Sanity-check the reported layout against the machine we drove.
    let layout = RoleLayout::from_role_info(&snapshot.role_info);
    if layout.head_node() != Some(&head) {
        warn!(node = %head, "Controller reports a different head node than the one bootstrapped");
    }

    info!(
        node = %head,
        roles = ?layout.roles_of(&head),
        nodes = layout.len(),
        "Deployment is up"
    );
    Ok(())
}
