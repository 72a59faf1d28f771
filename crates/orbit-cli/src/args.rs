use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "orbit")]
#[command(about = "Orbit compute pool management", long_about = None)]
pub struct Args {
    /// Container runtime backend: `docker` or `host`.
    #[arg(long, global = true, default_value = "docker")]
    pub runtime: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Pool membership of this host
    Pool {
        #[command(subcommand)]
        subcommand: PoolCommand,
    },
    /// Member node management
    Node {
        #[command(subcommand)]
        subcommand: NodeCommand,
    },
    /// Workload management
    Job {
        #[command(subcommand)]
        subcommand: JobCommand,
    },
    /// Pool-wide capacity summary
    Resources {
        /// Restrict to these nodes (comma-separated)
        #[arg(long)]
        nodes: Option<String>,
    },
    /// GPU inventory
    Gpus {
        /// Only GPUs with free capacity on ready nodes
        #[arg(long)]
        available: bool,
    },
}

#[derive(Debug, Subcommand)]
pub enum PoolCommand {
    /// Create a new pool with this host as the seed
    Create {
        #[arg(long)]
        name: String,
        /// Advertised address; autodetected when omitted
        #[arg(long)]
        ip: Option<String>,
        /// GPUs to reserve; negative probes the host
        #[arg(long, default_value_t = -1)]
        gpus: i32,
        /// Node label, `key=value`; repeatable
        #[arg(long = "label", value_parser = parse_key_val)]
        labels: Vec<(String, String)>,
        /// Overlay enrolment key for a public pool
        #[arg(long)]
        vpn_token: Option<String>,
        /// Public location advertised in join tokens
        #[arg(long)]
        location: Option<String>,
        #[arg(long)]
        platform: Option<String>,
        #[arg(long)]
        user_id: Option<String>,
    },
    /// Join an existing pool as a worker
    Join {
        token: String,
        #[arg(long)]
        node_name: Option<String>,
        #[arg(long)]
        ip: Option<String>,
        #[arg(long, default_value_t = -1)]
        gpus: i32,
        #[arg(long = "label", value_parser = parse_key_val)]
        labels: Vec<(String, String)>,
        /// Mark this host unfit for distributed storage
        #[arg(long)]
        no_storage: bool,
        #[arg(long)]
        platform: Option<String>,
        #[arg(long)]
        user_id: Option<String>,
    },
    /// Become a management-only client (no local runtime)
    Attach { token: String },
    /// Leave the pool and clean local state
    Stop {
        #[arg(long)]
        skip_node_deletion: bool,
    },
    /// Stop the local runtime container, keeping membership
    Pause,
    /// Restart a paused runtime container
    Resume,
    /// Issue a join token (seed only)
    Token {
        /// admin, user or worker
        #[arg(long, default_value = "user")]
        mode: String,
    },
    /// Show local membership state
    Status,
}

#[derive(Debug, Subcommand)]
pub enum NodeCommand {
    /// List member nodes and their conditions
    List,
    /// Remove nodes from the pool
    Delete { nodes: Vec<String> },
    /// Mark nodes unschedulable
    Cordon { nodes: Vec<String> },
    /// Mark nodes schedulable
    Uncordon { nodes: Vec<String> },
    /// Add labels to one node
    Label {
        node: String,
        #[arg(value_parser = parse_key_val)]
        labels: Vec<(String, String)>,
    },
}

#[derive(Debug, Subcommand)]
pub enum JobCommand {
    /// Deploy a templated workload
    Deploy {
        #[arg(long)]
        template: String,
        /// Template value, `key=value`; repeatable
        #[arg(long = "value", value_parser = parse_key_val)]
        values: Vec<(String, String)>,
        #[arg(long)]
        force_namespace: Option<String>,
        /// Target node label, `key=value`; repeatable
        #[arg(long = "target-label", value_parser = parse_key_val)]
        target_labels: Vec<(String, String)>,
        /// Match any target label instead of all
        #[arg(long)]
        any_label: bool,
    },
    /// Delete a job and its derived services
    Delete {
        name: String,
        #[arg(long)]
        force_namespace: Option<String>,
    },
    /// List jobs with status and endpoints
    List {
        #[arg(long)]
        namespace: Option<String>,
    },
    /// Show pod logs of a job
    Logs {
        name: String,
        #[arg(long)]
        pod: Option<String>,
        /// Lines per pod (default 100)
        #[arg(long)]
        tail: Option<u32>,
    },
    /// List installed templates
    Templates,
    /// Show the declared values of a template
    Defaults {
        #[arg(long)]
        template: String,
    },
}

fn parse_key_val(raw: &str) -> Result<(String, String), String> {
    let Some((key, value)) = raw.split_once('=') else {
        return Err(format!("'{raw}': expected key=value"));
    };
    if key.trim().is_empty() {
        return Err(format!("'{raw}': empty key"));
    }
    Ok((key.trim().to_string(), value.trim().to_string()))
}
