use std::path::PathBuf;
use std::rc::Rc;

use anyhow::{Context, Result};
use clap::Args;
use serde_json::{Value, json};
use shadow_kernel::{Factory, Registry, RegistryConfig, ShadowCx, Teardown};

use crate::GlobalOpts;
use crate::output;

#[derive(Args, Debug)]
pub struct RoutesArgs {
    /// Registry config file (JSON with `define` and `routes`)
    #[arg(short, long)]
    pub config: PathBuf,

    /// Token to resolve
    pub token: String,
}

pub fn cmd_routes(opts: &GlobalOpts, args: &RoutesArgs) -> Result<()> {
    let config = RegistryConfig::from_path(&args.config)
        .with_context(|| format!("loading registry config {}", args.config.display()))?;
    let mut registry = Registry::new();
    // Only the shape of the registry matters here; every named factory
    // resolves to one that builds nothing.
    registry.load_config(&config, |_| {
        let factory: Factory =
            Rc::new(|_: &mut ShadowCx<'_>| -> anyhow::Result<Option<Teardown>> { Ok(None) });
        Some(factory)
    })?;

    let tokens: Vec<Value> = registry
        .find_tokens_by_route(&args.token)
        .into_iter()
        .map(|token| {
            let factory = config.define.get(&token).cloned();
            json!({ "token": token, "factory": factory })
        })
        .collect();
    let data = json!({ "token": args.token, "resolved": tokens });

    output::print(opts, data, |data| {
        let resolved = data["resolved"].as_array().cloned().unwrap_or_default();
        resolved
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                let token = entry["token"].as_str().unwrap_or_default();
                match entry["factory"].as_str() {
                    Some(factory) => format!("{index:>3}  {token}  ({factory})"),
                    None => format!("{index:>3}  {token}  (no factory)"),
                }
            })
            .collect()
    })
}
