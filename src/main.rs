use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tracing::{debug, error, trace};

use benchlink::cli;
use benchlink::engine::{ActionPlan, PollSettings};
use benchlink::error::SetupError;
use benchlink::profile::{CliOverrides, EnvOverrides, ProfileStore, DEFAULT_PROFILE};
use benchlink::provider::benchling::BenchlingTokenValidator;
use benchlink::provider::InfraProvider;
use benchlink::setup::{self, ResumeRequest, SetupContext, SetupRequest, StatusRequest};

/// Connect a Benchling tenant to an existing Quilt stack
#[derive(Parser)]
#[command(name = "benchlink")]
#[command(about = "Provision the Benchling webhook integration for a Quilt stack", long_about = None)]
#[command(version)]
struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace, -vvv for all)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect the stack and walk through configuring the integration
    Setup {
        /// Profile to read and update
        #[arg(long, default_value = DEFAULT_PROFILE)]
        profile: String,

        /// CloudFormation stack to configure
        #[arg(long)]
        stack: Option<String>,

        /// AWS region for discovery (defaults to the ambient config)
        #[arg(long)]
        region: Option<String>,

        /// Benchling tenant, e.g. `acme` for acme.benchling.com
        #[arg(long)]
        tenant: Option<String>,

        /// Benchling app client id
        #[arg(long)]
        client_id: Option<String>,

        /// Benchling app definition id
        #[arg(long)]
        app_definition_id: Option<String>,

        /// Principal allowed to call the webhook; repeat for several
        #[arg(long = "allow")]
        allow: Vec<String>,

        /// Apply this plan instead of prompting for one
        #[arg(long, value_enum)]
        action: Option<ActionArg>,

        /// Accept the default plan and all non-destructive prompts
        #[arg(short = 'y', long)]
        yes: bool,

        /// Confirm a destructive plan up front (never implied by --yes)
        #[arg(long)]
        confirm_destructive: bool,

        /// Read the Benchling client secret from stdin
        #[arg(long)]
        client_secret_stdin: bool,
    },
    /// Report the discovered integration state without changing anything
    Status {
        /// Profile whose stack to inspect
        #[arg(long, default_value = DEFAULT_PROFILE)]
        profile: String,

        /// Stack to inspect when the profile does not name one
        #[arg(long)]
        stack: Option<String>,

        /// AWS region for discovery (defaults to the ambient config)
        #[arg(long)]
        region: Option<String>,
    },
    /// Re-attach to an operation a previous run left in flight
    Resume {
        /// Profile with the pending operation
        #[arg(long, default_value = DEFAULT_PROFILE)]
        profile: String,

        /// AWS region for discovery (defaults to the ambient config)
        #[arg(long)]
        region: Option<String>,

        /// Read the Benchling client secret from stdin, for pending
        /// steps that still need it
        #[arg(long)]
        client_secret_stdin: bool,
    },
}

/// Plans addressable from the command line. Mirrors the wizard menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ActionArg {
    UpdateSecret,
    EnableIntegration,
    DeployStandalone,
    UpdateStandalone,
    DisableIntegration,
    SwitchToStandalone,
    ReviewOnly,
}

impl From<ActionArg> for ActionPlan {
    fn from(arg: ActionArg) -> Self {
        match arg {
            ActionArg::UpdateSecret => ActionPlan::UpdateSecretOnly,
            ActionArg::EnableIntegration => ActionPlan::EnableIntegration,
            ActionArg::DeployStandalone => ActionPlan::DeployStandalone,
            ActionArg::UpdateStandalone => ActionPlan::UpdateStandalone,
            ActionArg::DisableIntegration => ActionPlan::DisableIntegration,
            ActionArg::SwitchToStandalone => ActionPlan::SwitchToStandalone,
            ActionArg::ReviewOnly => ActionPlan::ReviewOnly,
        }
    }
}

/// Everything the setup command needs, gathered off the arg parser.
struct SetupInvocation {
    profile: String,
    stack: Option<String>,
    region: Option<String>,
    tenant: Option<String>,
    client_id: Option<String>,
    app_definition_id: Option<String>,
    allow: Vec<String>,
    action: Option<ActionArg>,
    yes: bool,
    confirm_destructive: bool,
    client_secret_stdin: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        2 => "trace",
        _ => "trace,hyper=debug,tower=debug", // -vvv shows everything including dependencies
    };

    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_target(cli.verbose >= 2) // Show target module for -vv and above
        .with_thread_ids(cli.verbose >= 3) // Show thread IDs for -vvv
        .with_line_number(cli.verbose >= 3) // Show line numbers for -vvv
        .init();

    debug!("benchlink started with verbosity level: {}", cli.verbose);
    trace!("Full CLI args: {:?}", std::env::args().collect::<Vec<_>>());

    // Ctrl-C flips the cancellation flag; in-flight polling notices it,
    // records a resumable marker, and unwinds.
    let (cancel_tx, mut cancel) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = cancel_tx.send(true);
        }
    });

    let result = match cli.command {
        Commands::Setup {
            profile,
            stack,
            region,
            tenant,
            client_id,
            app_definition_id,
            allow,
            action,
            yes,
            confirm_destructive,
            client_secret_stdin,
        } => {
            run_setup(
                SetupInvocation {
                    profile,
                    stack,
                    region,
                    tenant,
                    client_id,
                    app_definition_id,
                    allow,
                    action,
                    yes,
                    confirm_destructive,
                    client_secret_stdin,
                },
                &mut cancel,
            )
            .await
        }
        Commands::Status {
            profile,
            stack,
            region,
        } => run_status(profile, stack, region).await,
        Commands::Resume {
            profile,
            region,
            client_secret_stdin,
        } => run_resume(profile, region, client_secret_stdin, &mut cancel).await,
    };

    if let Err(e) = result {
        error!("Fatal error: {}", e);
        eprintln!("Error: {e}");
        std::process::exit(e.exit_code());
    }
}

async fn run_setup(
    args: SetupInvocation,
    cancel: &mut watch::Receiver<bool>,
) -> Result<(), SetupError> {
    // Consume the piped secret before anything slow or fallible so an
    // empty pipe fails immediately.
    let material = cli::resolve_secret_material(args.client_secret_stdin)?;

    let env = EnvOverrides::from_env();
    let store = ProfileStore::open_default()?;
    let provider = connect_provider(args.region.clone().or_else(|| env.region.clone())).await?;
    let credentials = BenchlingTokenValidator::new()?;

    let request = SetupRequest {
        profile: args.profile,
        cli: CliOverrides {
            stack_name: args.stack,
            region: args.region,
            tenant: args.tenant,
            client_id: args.client_id,
            app_definition_id: args.app_definition_id,
            allow_list: if args.allow.is_empty() {
                None
            } else {
                Some(args.allow)
            },
        },
        env,
        material,
    };

    let mut choices = cli::choice_source(
        args.action.map(ActionPlan::from),
        args.yes,
        args.confirm_destructive,
        args.client_secret_stdin,
    );

    let ctx = SetupContext {
        provider: provider.as_ref(),
        credentials: &credentials,
        store: &store,
        settings: PollSettings::default(),
    };

    let outcome = setup::run_setup(&ctx, &request, choices.as_mut(), cancel).await?;

    match outcome.plan {
        Some(ActionPlan::ReviewOnly) => {
            println!(
                "Reviewed {}. Profile saved; nothing on the stack was changed.",
                outcome.document.stack.name
            );
        }
        Some(plan) => {
            println!(
                "✅ Completed '{plan}' against {}",
                outcome.document.stack.name
            );
        }
        None => {
            println!("✅ Resumed the pending operation to completion.");
        }
    }
    if !outcome.provenance.is_empty() {
        println!("Resolved configuration ({}):", outcome.state);
        print!("{}", cli::format_provenance(&outcome.provenance));
    }
    Ok(())
}

async fn run_status(
    profile: String,
    stack: Option<String>,
    region: Option<String>,
) -> Result<(), SetupError> {
    let env = EnvOverrides::from_env();
    let store = ProfileStore::open_default()?;
    let provider = connect_provider(region.or_else(|| env.region.clone())).await?;
    let credentials = BenchlingTokenValidator::new()?;

    let ctx = SetupContext {
        provider: provider.as_ref(),
        credentials: &credentials,
        store: &store,
        settings: PollSettings::default(),
    };
    let request = StatusRequest {
        profile,
        stack: stack.or(env.stack_name),
    };

    let report = setup::run_status(&ctx, &request).await?;
    print!("{}", report.render());
    Ok(())
}

async fn run_resume(
    profile: String,
    region: Option<String>,
    client_secret_stdin: bool,
    cancel: &mut watch::Receiver<bool>,
) -> Result<(), SetupError> {
    let material = cli::resolve_secret_material(client_secret_stdin)?;

    let env = EnvOverrides::from_env();
    let store = ProfileStore::open_default()?;
    let provider = connect_provider(region.or(env.region)).await?;
    let credentials = BenchlingTokenValidator::new()?;

    let ctx = SetupContext {
        provider: provider.as_ref(),
        credentials: &credentials,
        store: &store,
        settings: PollSettings::default(),
    };
    let request = ResumeRequest { profile, material };

    let document = setup::run_resume(&ctx, &request, cancel).await?;
    println!(
        "✅ Finished the pending work for stack {}",
        document.stack.name
    );
    Ok(())
}

#[cfg(feature = "aws")]
async fn connect_provider(region: Option<String>) -> Result<Box<dyn InfraProvider>, SetupError> {
    let provider = benchlink::provider::aws::AwsProvider::connect(region).await?;
    Ok(Box::new(provider))
}

#[cfg(not(feature = "aws"))]
async fn connect_provider(region: Option<String>) -> Result<Box<dyn InfraProvider>, SetupError> {
    let _ = region;
    Err(SetupError::invalid_field(
        "backend",
        "this build has no infrastructure backend; rebuild with the `aws` feature",
    ))
}
