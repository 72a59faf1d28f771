mod args;
mod output;

use std::collections::HashMap;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use orbit_common::telemetry::init_tracing;
use orbit_common::{ConfigStore, Error, LabelsOp, Result, TokenMode};
use orbit_core::{
    ContainerRuntime, CreateOpts, DockerRuntime, HostRuntime, JobService, JoinOpts, NodeService,
    PoolManager, TemplateEngine, WatcherClient,
};

use crate::args::{Args, Command, JobCommand, NodeCommand, PoolCommand};

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing("orbit");
    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            match e {
                Error::ConfigMissing(_) => ExitCode::from(2),
                Error::WatcherUnreachable(_) => ExitCode::from(3),
                _ => ExitCode::from(1),
            }
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let store = ConfigStore::new(ConfigStore::default_root());

    match args.command {
        Command::Pool { subcommand } => pool(&store, &args.runtime, subcommand).await,
        Command::Node { subcommand } => node(&store, subcommand).await,
        Command::Job { subcommand } => job(&store, subcommand).await,
        Command::Resources { nodes } => {
            let nodes: Option<Vec<String>> = nodes.map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .map(str::to_string)
                    .collect()
            });
            let summary = node_service(&store)?
                .fetch_resources(nodes.as_deref())
                .await?;
            output::print_resources(&summary);
            Ok(())
        }
        Command::Gpus { available } => {
            let gpus = node_service(&store)?.fetch_gpus(available).await?;
            output::print_gpus(&gpus);
            Ok(())
        }
    }
}

fn manager(store: &ConfigStore, runtime_flag: &str) -> Result<PoolManager> {
    let node_name = match store.load() {
        Ok(config) => config.node_name,
        Err(_) => local_hostname()?,
    };
    let runtime: Arc<dyn ContainerRuntime> = match runtime_flag {
        "host" => Arc::new(HostRuntime::new()),
        _ => Arc::new(DockerRuntime::new(store.compose_file(), &node_name)),
    };
    Ok(PoolManager::new(store.clone(), runtime))
}

fn node_service(store: &ConfigStore) -> Result<NodeService> {
    let config = store.load()?;
    Ok(NodeService::new(WatcherClient::new(
        &config.watcher_service,
        &config.admin_key,
    )))
}

fn job_service(store: &ConfigStore) -> Result<JobService> {
    let config = store.load()?;
    let watcher = WatcherClient::new(&config.watcher_service, &config.admin_key);
    let engine = TemplateEngine::new(store.templates_dir());
    Ok(JobService::new(watcher, engine, &config.server_ip))
}

fn local_hostname() -> Result<String> {
    Ok(hostname::get()?.to_string_lossy().into_owned())
}

async fn pool(store: &ConfigStore, runtime_flag: &str, command: PoolCommand) -> Result<()> {
    match command {
        PoolCommand::Create {
            name,
            ip,
            gpus,
            labels,
            vpn_token,
            location,
            platform,
            user_id,
        } => {
            let manager = manager(store, runtime_flag)?;
            let outcome = manager
                .create(CreateOpts {
                    cluster_name: name,
                    ip_address: ip,
                    num_gpus: gpus,
                    labels: labels.into_iter().collect(),
                    vpn_token,
                    location,
                    platform,
                    user_id,
                    user_api_key: std::env::var("ORBIT_USER_API_KEY").ok(),
                })
                .await?;
            if let Some(warning) = &outcome.warning {
                eprintln!("warning: {warning}");
            }
            println!(
                "Pool '{}' created, seed '{}' at {}.",
                outcome.cluster_name, outcome.node_name, outcome.server_ip
            );
            Ok(())
        }
        PoolCommand::Join {
            token,
            node_name,
            ip,
            gpus,
            labels,
            no_storage,
            platform,
            user_id,
        } => {
            let manager = manager(store, runtime_flag)?;
            let outcome = manager
                .join(JoinOpts {
                    token,
                    node_name,
                    ip_address: ip,
                    num_gpus: gpus,
                    labels: labels.into_iter().collect(),
                    storage_compatible: !no_storage,
                    platform,
                    user_id,
                })
                .await?;
            if let Some(warning) = &outcome.warning {
                eprintln!("warning: {warning}");
            }
            println!(
                "Joined pool '{}' as '{}'.",
                outcome.cluster_name, outcome.node_name
            );
            Ok(())
        }
        PoolCommand::Attach { token } => {
            let manager = manager(store, runtime_flag)?;
            let outcome = manager.attach(&token).await?;
            println!(
                "Attached to pool '{}' at {}.",
                outcome.cluster_name, outcome.server_ip
            );
            Ok(())
        }
        PoolCommand::Stop { skip_node_deletion } => {
            manager(store, runtime_flag)?.stop(skip_node_deletion).await?;
            println!("Left the pool. Local state cleaned.");
            Ok(())
        }
        PoolCommand::Pause => {
            manager(store, runtime_flag)?.pause().await?;
            println!("Agent paused.");
            Ok(())
        }
        PoolCommand::Resume => {
            manager(store, runtime_flag)?.resume().await?;
            println!("Agent resumed.");
            Ok(())
        }
        PoolCommand::Token { mode } => {
            let mode = match mode.as_str() {
                "admin" => TokenMode::Admin,
                "user" => TokenMode::User,
                "worker" => TokenMode::Worker,
                other => {
                    return Err(Error::State(format!(
                        "unknown token mode '{other}', expected admin, user or worker"
                    )))
                }
            };
            let token = manager(store, runtime_flag)?.get_pool_token(mode).await?;
            println!("{token}");
            Ok(())
        }
        PoolCommand::Status => {
            let manager = manager(store, runtime_flag)?;
            let config = store.load().ok();
            let (connected, agent, server) = match &config {
                Some(_) => (
                    manager.is_connected().await,
                    manager.is_agent_running().await,
                    manager.is_server().await,
                ),
                None => (false, false, false),
            };
            output::print_status(config.as_ref(), connected, agent, server);
            Ok(())
        }
    }
}

async fn node(store: &ConfigStore, command: NodeCommand) -> Result<()> {
    let service = node_service(store)?;
    match command {
        NodeCommand::List => {
            let nodes = service.fetch_devices().await?;
            output::print_nodes(&nodes);
        }
        NodeCommand::Delete { nodes } => {
            let deleted = service.delete_nodes(&nodes).await?;
            println!("Deleted {} node(s).", deleted.len());
        }
        NodeCommand::Cordon { nodes } => {
            service.cordon(&nodes).await?;
            println!("Cordoned {} node(s).", nodes.len());
        }
        NodeCommand::Uncordon { nodes } => {
            service.uncordon(&nodes).await?;
            println!("Uncordoned {} node(s).", nodes.len());
        }
        NodeCommand::Label { node, labels } => {
            let labels: HashMap<String, String> = labels.into_iter().collect();
            service.add_node_labels(&node, &labels).await?;
            println!("Labelled node '{node}'.");
        }
    }
    Ok(())
}

async fn job(store: &ConfigStore, command: JobCommand) -> Result<()> {
    let service = job_service(store)?;
    match command {
        JobCommand::Deploy {
            template,
            values,
            force_namespace,
            target_labels,
            any_label,
        } => {
            let values: HashMap<String, serde_json::Value> = values
                .into_iter()
                .map(|(k, v)| (k, parse_value(&v)))
                .collect();
            let target_labels: Option<HashMap<String, String>> = if target_labels.is_empty() {
                None
            } else {
                Some(target_labels.into_iter().collect())
            };
            let op = if any_label { LabelsOp::Or } else { LabelsOp::And };
            let result = service
                .deploy_job(
                    &template,
                    &values,
                    force_namespace.as_deref(),
                    target_labels.as_ref(),
                    op,
                )
                .await?;
            for name in &result.successful {
                println!("deployed: {name}");
            }
            for name in &result.failed {
                eprintln!("failed: {name}");
            }
        }
        JobCommand::Delete {
            name,
            force_namespace,
        } => {
            service.delete_job(&name, force_namespace.as_deref()).await?;
            println!("Job '{name}' deleted.");
        }
        JobCommand::List { namespace } => {
            let jobs = service.fetch_job_details(namespace.as_deref()).await?;
            output::print_jobs(&jobs);
        }
        JobCommand::Logs { name, pod, tail } => {
            let logs = service.fetch_job_logs(&name, pod.as_deref(), tail).await?;
            output::print_logs(&logs);
        }
        JobCommand::Templates => {
            let templates = service.fetch_job_templates()?;
            output::print_templates(&templates);
        }
        JobCommand::Defaults { template } => {
            let defaults = service.fetch_job_defaults(&template)?;
            output::print_defaults(&defaults);
        }
    }
    Ok(())
}

/// Template values arrive as strings on the command line; numbers and
/// booleans are promoted so manifests see typed values.
fn parse_value(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}
