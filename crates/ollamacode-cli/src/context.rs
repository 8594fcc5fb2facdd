use crate::SessionArgs;
use anyhow::{Context, Result, bail};
use ollamacode_agent::{AgentContext, ConfirmationGate, OutputSink};
use ollamacode_core::{AppConfig, Mode, RouterConfig};
use std::path::PathBuf;
use std::sync::Arc;

/// Resolve the working directory and merge settings, then apply the
/// command-line overrides on top.
pub(crate) fn load_config(args: &SessionArgs) -> Result<(AppConfig, PathBuf)> {
    let work_dir = match &args.workdir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir()?,
    };
    if !work_dir.is_dir() {
        bail!("working directory {} does not exist", work_dir.display());
    }
    let work_dir = work_dir
        .canonicalize()
        .with_context(|| format!("failed to resolve {}", work_dir.display()))?;

    let mut config = AppConfig::load(&work_dir)?;
    apply_overrides(&mut config, args)?;
    config
        .router
        .validate()
        .context("invalid model configuration")?;
    Ok((config, work_dir))
}

pub(crate) fn apply_overrides(config: &mut AppConfig, args: &SessionArgs) -> Result<()> {
    if let Some(mode) = &args.mode {
        config.agent.mode = mode.parse::<Mode>()?;
    }
    if let Some(model) = &args.model {
        config.router = RouterConfig::single_model(model.trim());
    }
    if let Some(url) = &args.url {
        config.llm.base_url = url.trim_end_matches('/').to_string();
    }
    if args.verbose {
        config.verbose = true;
    }
    Ok(())
}

pub(crate) fn build_context(
    config: &AppConfig,
    work_dir: PathBuf,
    gate: Arc<dyn ConfirmationGate>,
    sink: Arc<dyn OutputSink>,
) -> Result<Arc<AgentContext>> {
    Ok(Arc::new(AgentContext::from_config(
        config, work_dir, gate, sink,
    )?))
}
