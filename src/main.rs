use anyhow::Result;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::debug;

mod amplify;
mod archive;
mod cli;
mod config;
mod deploy;
mod errors;
mod extract;
mod fallback;
mod links;
mod log;
mod materialize;
mod pipeline;
mod prompt;
mod provider;
mod safety;
mod server;
mod synth;
mod ux;
mod validate;
mod wire;

use cli::{Command, GenerateArgs};
use config::{env_secret, Config};
use pipeline::{DeployRequest, GenerateRequest, Pipeline};

fn build_pipeline(cfg: &Config) -> Result<Arc<Pipeline>> {
    let generator: Arc<dyn provider::Generator> = Arc::from(provider::make_generator(cfg)?);
    let deployer: Arc<dyn deploy::Deployer> = Arc::from(deploy::make_deployer(cfg)?);
    debug!(provider = generator.name(), model = %cfg.model, "pipeline ready");
    Ok(Arc::new(Pipeline::new(generator, deployer, cfg)))
}

async fn generate(cfg: &Config, g: GenerateArgs) -> Result<ExitCode> {
    let pipeline = build_pipeline(cfg)?;
    let deploy = g.deploy.then(|| DeployRequest {
        token: env_secret("GITHUB_TOKEN"),
        username: g.github_username.clone(),
        repo_name: g.repo_name.clone(),
    });
    let req = GenerateRequest {
        prompt: g.prompt.clone(),
        project_name: g.project_name.clone(),
        image: g.image.as_deref().map(PathBuf::from),
        deploy,
    };

    let spinner = ux::stage_spinner(g.progress && !g.json);
    let result = pipeline
        .run_observed(&req, &|stage| spinner.set_message(ux::stage_message(stage)))
        .await;
    spinner.finish_and_clear();

    if g.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        if let Some(rec) = &result.requirements_record {
            print!("{}", ux::render_requirements(rec));
        }
        print!("{}", ux::render_result(&result));
    }
    Ok(if result.success { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = cli::Args::parse();
    log::init_tracing(args.debug);

    let mut cfg = Config::load(args.config.as_deref().map(Path::new))?;
    cfg.apply_args(&args);

    match args.command {
        Command::Generate(g) => generate(&cfg, g).await,
        Command::Serve(s) => {
            if let Some(bind) = s.bind {
                cfg.bind = bind;
            }
            let pipeline = build_pipeline(&cfg)?;
            server::serve(&cfg, pipeline).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
