use crate::SessionArgs;
use crate::context::load_config;
use crate::output::print_json;
use anyhow::Result;
use ollamacode_core::{AppConfig, TaskClass};

pub(crate) fn run_config(args: &SessionArgs, json_mode: bool) -> Result<()> {
    let (config, work_dir) = load_config(args)?;
    if json_mode {
        return print_json(&config);
    }
    println!("workdir:  {}", work_dir.display());
    println!(
        "settings: {}",
        AppConfig::project_settings_path(&work_dir).display()
    );
    println!("backend:  {}", config.llm.base_url);
    println!("mode:     {}", config.agent.mode);
    if config.router.enabled {
        println!("router:   enabled");
        for class in TaskClass::ALL {
            if let Some(spec) = config.router.spec_for(class) {
                println!(
                    "  {:<9} {} (max_tokens {}, temperature {})",
                    class.as_str(),
                    spec.name,
                    spec.max_tokens,
                    spec.temperature
                );
            }
        }
    } else {
        println!(
            "router:   disabled, every task uses {}",
            config.router.default_model.name
        );
    }
    Ok(())
}
