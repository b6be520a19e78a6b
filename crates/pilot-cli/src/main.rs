//! `pilot` binary: serve the gateway, or generate and run test scripts
//! one-shot from the terminal.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};

use pilot_ai::{GoogleClient, GoogleConfig};
use pilot_browser::{DriverCliConfig, DriverCliLauncher};
use pilot_events::StdoutEventSink;
use pilot_gateway::{run_gateway_server, GatewayServerConfig};
use pilot_runner::{RunOutcome, ScriptRunner};
use pilot_script::{ScriptGenerator, ScriptGeneratorConfig, ScriptPolicy, ScriptStore};

#[derive(Debug, Parser)]
#[command(name = "pilot", about = "AI-generated browser test scripts: generate, store, run")]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Debug, Subcommand)]
enum CliCommand {
    /// Run the HTTP + WebSocket gateway.
    Serve {
        #[arg(long, default_value = "127.0.0.1:3000")]
        bind: String,
        #[command(flatten)]
        generation: GenerationArgs,
        #[command(flatten)]
        browser: BrowserArgs,
    },
    /// Generate one test script from a description and print its name.
    Generate {
        #[arg(long)]
        description: String,
        #[command(flatten)]
        generation: GenerationArgs,
    },
    /// Run one stored test script, streaming events to stdout.
    Run {
        #[arg(long)]
        file_name: String,
        #[arg(long, default_value = "./test-scripts")]
        scripts_dir: PathBuf,
        #[command(flatten)]
        browser: BrowserArgs,
    },
}

#[derive(Debug, Args)]
struct GenerationArgs {
    #[arg(long, default_value = "./test-scripts")]
    scripts_dir: PathBuf,
    #[arg(long, default_value = "gemini-2.5-flash")]
    model: String,
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    api_key: String,
}

#[derive(Debug, Args)]
struct BrowserArgs {
    /// Browser driver executable (subcommand + JSON payload ABI).
    #[arg(long)]
    driver_cli: String,
    #[arg(long, default_value = "./screenshots")]
    screenshots_dir: PathBuf,
}

impl GenerationArgs {
    fn build_client(&self) -> Result<Arc<GoogleClient>> {
        let client = GoogleClient::new(GoogleConfig {
            api_key: self.api_key.clone(),
            ..GoogleConfig::default()
        })
        .context("failed to configure the Gemini client")?;
        Ok(Arc::new(client))
    }

    fn generator_config(&self) -> ScriptGeneratorConfig {
        ScriptGeneratorConfig {
            model: self.model.clone(),
            ..ScriptGeneratorConfig::default()
        }
    }
}

/// RUST_LOG overrides the default; events stay quiet at warn otherwise so
/// the stdout event stream remains readable.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        CliCommand::Serve {
            bind,
            generation,
            browser,
        } => {
            let client = generation.build_client()?;
            run_gateway_server(GatewayServerConfig {
                client,
                bind,
                scripts_dir: generation.scripts_dir.clone(),
                screenshots_dir: browser.screenshots_dir.clone(),
                driver_cli_path: browser.driver_cli.clone(),
                generator: generation.generator_config(),
                policy: ScriptPolicy::default(),
            })
            .await
        }
        CliCommand::Generate {
            description,
            generation,
        } => {
            let client = generation.build_client()?;
            let store = ScriptStore::new(&generation.scripts_dir, ScriptPolicy::default());
            store
                .ensure_root()
                .context("failed to prepare the scripts directory")?;
            let generator = ScriptGenerator::new(client, store, generation.generator_config());
            let saved = generator
                .generate(&description, &StdoutEventSink)
                .await
                .context("test script generation failed")?;
            println!("{}", saved.name);
            Ok(())
        }
        CliCommand::Run {
            file_name,
            scripts_dir,
            browser,
        } => {
            let store = ScriptStore::new(&scripts_dir, ScriptPolicy::default());
            let launcher = DriverCliLauncher::new(DriverCliConfig {
                cli_path: browser.driver_cli,
                screenshots_dir: browser.screenshots_dir,
            })
            .context("failed to configure the browser driver launcher")?;
            let runner = ScriptRunner::new(store, Arc::new(launcher));

            let report = tokio::task::spawn_blocking(move || {
                runner.run(&file_name, &StdoutEventSink)
            })
            .await
            .context("test run task panicked")?
            .context("test script was rejected")?;

            match report.outcome {
                RunOutcome::Passed => Ok(()),
                RunOutcome::Failed {
                    error_code,
                    message,
                } => bail!("test run failed: [{error_code}] {message}"),
            }
        }
    }
}
