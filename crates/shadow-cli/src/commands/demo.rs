use std::cell::RefCell;
use std::rc::Rc;

use anyhow::{Context, Result};
use clap::Args;
use serde_json::{Value, json};
use shadow_env::{EnvConfig, LocalEnv, RemoteEnv, ShadowEnv};
use shadow_kernel::ScriptCatalog;
use shadow_protocol::PropValue;
use shadow_view::ComponentContext;
use tokio::sync::mpsc;

use crate::GlobalOpts;
use crate::output;

const DEMO_SCRIPT: &str = "demo/counter.js";

#[derive(Args, Debug)]
pub struct DemoArgs {
    /// Run the kernel on a worker thread instead of in-process
    #[arg(long)]
    pub remote: bool,

    /// Number of counter updates to send
    #[arg(long, default_value_t = 3)]
    pub steps: u32,
}

pub async fn cmd_demo(opts: &GlobalOpts, args: &DemoArgs) -> Result<()> {
    let config = EnvConfig::from_env();
    let messages = if args.remote {
        let mut env = RemoteEnv::new(config, demo_catalog());
        drive(&mut env, args.steps).await?
    } else {
        let mut env = LocalEnv::new(config, demo_catalog());
        drive(&mut env, args.steps).await?
    };
    let data = json!({
        "env": if args.remote { "remote" } else { "local" },
        "steps": args.steps,
        "messages": messages,
    });

    output::print(opts, data, |data| {
        let messages = data["messages"].as_array().cloned().unwrap_or_default();
        messages
            .iter()
            .map(|message| format!("{} {}", message["type"].as_str().unwrap_or("?"), message["data"]))
            .collect()
    })
}

/// A counter that renders its count with the theme its ancestors provide,
/// and an `app` token that provides that theme.
fn demo_catalog() -> ScriptCatalog {
    let mut catalog = ScriptCatalog::new();
    catalog.register(DEMO_SCRIPT, |registry| {
        registry.define("counter", |cx| {
            let count = cx.use_property("count");
            let theme = cx.use_context("theme");
            let dispatcher = cx.dispatcher();
            cx.create_effect(move || {
                let Some(PropValue::Json(count)) = count.get() else {
                    return Ok(());
                };
                let count = count.as_i64().context("count must be an integer")?;
                dispatcher.dispatch(
                    "rendered",
                    json!({ "count": count, "doubled": count * 2, "theme": theme.get() }),
                );
                Ok(())
            });
            let dispatcher = cx.dispatcher();
            cx.on_event("reset", move |event| {
                dispatcher.dispatch("reset", event.data.clone());
                Ok(())
            });
            Ok(None)
        });
        registry.define("theme-provider", |cx| {
            let theme = cx.use_property("theme");
            let provided = cx.provide_context("theme", json!("light"));
            cx.create_effect(move || {
                if let Some(PropValue::Json(value)) = theme.get() {
                    provided.set(Some(value));
                }
                Ok(())
            });
            Ok(None)
        });
        registry.append_route("app", ["theme-provider"]);
        Ok(())
    });
    catalog
}

/// Builds `app > counter`, counts up, resets, and tears everything down.
/// Returns the messages the counter's view component received.
async fn drive<E: ShadowEnv>(env: &mut E, steps: u32) -> Result<Vec<Value>> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    env.on_message_to_view(Box::new(move |message| {
        let _ = tx.send(message);
    }));
    env.start().await?;
    env.import_script(DEMO_SCRIPT).await?;

    let received: Rc<RefCell<Vec<Value>>> = Rc::default();
    let mut view = ComponentContext::new();
    let app = view.create_component("app", None)?;
    let counter = view.create_component("counter", Some(app))?;
    {
        let received = received.clone();
        view.on_message(counter, move |message| {
            received.borrow_mut().push(json!({
                "type": message.message_type,
                "data": message.data.as_json().cloned().unwrap_or(Value::Null),
            }));
        })?;
    }
    view.set_property(app, "theme", "dark")?;
    env.apply_change_trail(view.flush(), true).await?;

    for step in 1..=steps {
        view.set_property(counter, "count", step)?;
        env.apply_change_trail(view.flush(), step == steps).await?;
        tracing::info!(step, "counter updated");
    }
    view.send_event(counter, "reset", json!({ "from": steps }))?;
    env.apply_change_trail(view.flush(), true).await?;

    while let Ok(message) = rx.try_recv() {
        view.deliver_message(&message);
    }

    view.destroy_component(app)?;
    env.apply_change_trail(view.flush(), true).await?;
    env.destroy().await?;

    let messages = received.borrow().clone();
    Ok(messages)
}
