use std::{path::PathBuf, sync::Arc};

use apkpipe_build::{
    BuildEvent, BuildHistory, BuildPipeline, BuildQueue, BuildRequest, ChannelSink,
    CustomKeystore, KeystoreManager, ProjectConfig, SigningConfig, StageStatus, Variant,
};
use apkpipe_toolchain::{
    installer::missing_minimal_tools, ArchiveInstaller, LogLevel, SdkInstaller, ToolchainError,
    ToolchainInfo, ToolchainResolver, TracingLog, UnconfiguredInstaller,
};
use clap::{Args, Parser, Subcommand};
use tracing::warn;

#[derive(Parser)]
#[command(name = "apkpipe", version, about = "Build signed Android packages from generated projects")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Resolve the JDK and SDK tools and report what was found
    Check,
    /// Run the seven-stage build for one project
    Build {
        /// Project root (the directory holding `app/`)
        #[arg(long)]
        project: Option<PathBuf>,
        #[arg(long)]
        variant: Option<Variant>,
        /// Project config file; flags given on the command line win
        #[arg(long)]
        config: Option<PathBuf>,
        #[command(flatten)]
        signing: SigningArgs,
        /// Print the final result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show recent builds
    History {
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[arg(long)]
        json: bool,
    },
    /// Project config files
    Config {
        #[command(subcommand)]
        cmd: ConfigCmd,
    },
}

#[derive(Subcommand)]
enum ConfigCmd {
    /// Write a new project config file
    Init {
        /// Config file to write
        path: PathBuf,
        #[arg(long)]
        project: PathBuf,
        #[arg(long, default_value_t = Variant::Debug)]
        variant: Variant,
        #[command(flatten)]
        signing: SigningArgs,
    },
    /// Print a project config file with passwords masked
    Show { path: PathBuf },
}

#[derive(Args)]
struct SigningArgs {
    /// Sign with the custom keystore even for debug builds
    #[arg(long)]
    no_auto_sign: bool,
    /// Custom keystore used for release builds
    #[arg(long)]
    keystore: Option<PathBuf>,
    #[arg(long, requires = "keystore")]
    ks_pass: Option<String>,
    #[arg(long, requires = "keystore")]
    key_alias: Option<String>,
    #[arg(long, requires = "keystore")]
    key_pass: Option<String>,
}

impl SigningArgs {
    fn apply(self, signing: &mut SigningConfig) {
        if self.no_auto_sign {
            signing.auto_sign = false;
        }
        if let Some(path) = self.keystore {
            signing.custom_keystore = Some(CustomKeystore {
                path: path.to_string_lossy().to_string(),
                store_password: self.ks_pass.unwrap_or_default(),
                key_alias: self.key_alias.unwrap_or_default(),
                key_password: self.key_pass.unwrap_or_default(),
            });
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    apkpipe_util::init_tracing()?;
    let cli = Cli::parse();

    match cli.cmd {
        Cmd::Check => {
            let tools_dir = apkpipe_util::tools_dir();
            match resolve_toolchain() {
                Ok(toolchain) => print_toolchain(&toolchain),
                Err(err) => {
                    eprintln!("toolchain: {err}");
                    for path in missing_minimal_tools(&tools_dir) {
                        eprintln!("missing  {}", path.display());
                    }
                    std::process::exit(1);
                }
            }
        }
        Cmd::Build {
            project,
            variant,
            config,
            signing,
            json,
        } => {
            let mut req = match (&config, &project) {
                (Some(path), _) => ProjectConfig::load(path)
                    .map_err(|err| format!("cannot read {}: {err}", path.display()))?
                    .to_request(),
                (None, Some(project)) => BuildRequest::new(project, Variant::Debug),
                (None, None) => return Err("either --project or --config is required".into()),
            };
            if let Some(project) = project {
                req.project_root = project;
            }
            if let Some(variant) = variant {
                req.variant = variant;
            }
            signing.apply(&mut req.signing);

            let toolchain = resolve_toolchain()?;
            let (sink, mut rx) = ChannelSink::new();
            let printer = tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    print_event(&event);
                }
            });

            let queue = BuildQueue::new(BuildPipeline::new(
                toolchain,
                Arc::new(KeystoreManager::for_base_dir(&apkpipe_util::data_dir())),
                Arc::new(sink),
            ));
            let result = queue.submit(req).await?;
            drop(queue);
            printer.await?;

            BuildHistory::default_location().record_best_effort(&result);
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else if let (Some(sha256), Some(size)) = (&result.sha256, result.size_bytes) {
                println!("sha256={sha256} size_bytes={size}");
            }
            if !result.success {
                std::process::exit(1);
            }
        }
        Cmd::History { limit, json } => {
            let records = BuildHistory::default_location().recent(limit);
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else if records.is_empty() {
                println!("no builds recorded");
            } else {
                for record in records {
                    let status = if record.success { "ok" } else { "FAILED" };
                    println!(
                        "{}  {:<7} {:<6} {}  {}",
                        record.created_at_unix_millis,
                        record.variant,
                        status,
                        record.project_path,
                        record.message
                    );
                }
            }
        }
        Cmd::Config { cmd } => match cmd {
            ConfigCmd::Init {
                path,
                project,
                variant,
                signing,
            } => {
                let mut cfg = ProjectConfig {
                    project_path: project.to_string_lossy().to_string(),
                    build_variant: variant,
                    ..ProjectConfig::default()
                };
                signing.apply(&mut cfg.signing);
                cfg.save(&path)?;
                println!("wrote {}", path.display());
            }
            ConfigCmd::Show { path } => {
                let mut cfg = ProjectConfig::load(&path)?;
                if let Some(ks) = cfg.signing.custom_keystore.as_mut() {
                    mask(&mut ks.store_password);
                    mask(&mut ks.key_password);
                }
                println!("{}", serde_json::to_string_pretty(&cfg)?);
            }
        },
    }

    Ok(())
}

fn resolve_toolchain() -> Result<ToolchainInfo, ToolchainError> {
    let archives = ArchiveInstaller::from_env();
    let installer: &dyn SdkInstaller = if archives.is_configured() {
        &archives
    } else {
        warn!("no SDK archives configured; missing tools cannot be installed");
        &UnconfiguredInstaller
    };
    ToolchainResolver::new(apkpipe_util::tools_dir(), installer, &TracingLog).resolve()
}

fn print_toolchain(toolchain: &ToolchainInfo) {
    println!("java       {}", toolchain.java.display());
    println!("javac      {}", toolchain.javac.display());
    match &toolchain.keytool {
        Some(path) => println!("keytool    {}", path.display()),
        None => println!("keytool    MISSING"),
    }
    println!("aapt2      {}", toolchain.aapt2.display());
    println!("zipalign   {}", toolchain.zipalign.display());
    println!("android    {}", toolchain.android_jar.display());
    match &toolchain.dexer {
        Some(dexer) => println!("d8         {dexer}"),
        None => println!("d8         MISSING"),
    }
    match &toolchain.signer {
        Some(signer) => println!("apksigner  {signer}"),
        None => println!("apksigner  MISSING"),
    }
}

fn print_event(event: &BuildEvent) {
    match event {
        BuildEvent::Log { level, message } => match level {
            LogLevel::Info => println!("{message}"),
            LogLevel::Warn => eprintln!("warning: {message}"),
            LogLevel::Error => eprintln!("error: {message}"),
        },
        BuildEvent::Stage {
            stage,
            status: StageStatus::Failed,
        } => eprintln!("{stage} failed"),
        BuildEvent::Stage { .. } => {}
        BuildEvent::Progress { percent } => println!("[{percent:>3}%]"),
    }
}

fn mask(secret: &mut String) {
    if !secret.is_empty() {
        *secret = "****".into();
    }
}
