use std::collections::HashMap;

use orbit_common::{Gpu, Job, JobStatus, Node, NodeRole, PoolConfig, ResourceSummary, TemplateValue};

/// Resource keys hidden from the capacity table; noise for operators.
const HIDDEN_RESOURCES: [&str; 2] = ["ephemeral-storage", "pods"];

fn resource_visible(key: &str) -> bool {
    !HIDDEN_RESOURCES.contains(&key) && !key.starts_with("hugepages-")
}

pub fn print_nodes(nodes: &[Node]) {
    println!("\n=== Pool Nodes ===\n");
    if nodes.is_empty() {
        println!("No nodes registered.");
        return;
    }
    println!(
        "{:<25} {:<8} {:<8} {:<12} {:<10}",
        "Name", "Role", "Ready", "Schedulable", "Pressure"
    );
    println!("{:-<70}", "");
    for node in nodes {
        let role = match node.role {
            NodeRole::Server => "server",
            NodeRole::Worker => "worker",
        };
        let mut pressure = Vec::new();
        if node.memory_pressure {
            pressure.push("mem");
        }
        if node.disk_pressure {
            pressure.push("disk");
        }
        if node.pid_pressure {
            pressure.push("pid");
        }
        println!(
            "{:<25} {:<8} {:<8} {:<12} {:<10}",
            node.name,
            role,
            if node.ready { "yes" } else { "no" },
            if node.unschedulable { "cordoned" } else { "yes" },
            if pressure.is_empty() {
                "-".to_string()
            } else {
                pressure.join(",")
            },
        );
    }
    println!();
}

pub fn print_gpus(gpus: &[Gpu]) {
    println!("\n=== GPUs ===\n");
    if gpus.is_empty() {
        println!("No GPUs found.");
        return;
    }
    println!(
        "{:<25} {:<30} {:<12} {:<8} {:<12}",
        "Node", "Model", "Memory (MB)", "Ready", "Free/Total"
    );
    println!("{:-<90}", "");
    for gpu in gpus {
        println!(
            "{:<25} {:<30} {:<12} {:<8} {}/{}",
            gpu.node,
            gpu.model,
            gpu.memory_mb,
            if gpu.ready { "yes" } else { "no" },
            gpu.available_count,
            gpu.total_count,
        );
    }
    println!();
}

pub fn print_resources(summary: &ResourceSummary) {
    println!("\n=== Pool Capacity ===\n");
    let mut keys: Vec<&String> = summary
        .total
        .keys()
        .filter(|k| resource_visible(k))
        .collect();
    keys.sort();
    if keys.is_empty() {
        println!("No capacity reported.");
        return;
    }
    println!("{:<25} {:>15} {:>15}", "Resource", "Available", "Total");
    println!("{:-<60}", "");
    for key in keys {
        let total = summary.total.get(key).copied().unwrap_or(0.0);
        let available = summary.available.get(key).copied().unwrap_or(0.0);
        println!("{key:<25} {available:>15} {total:>15}");
    }
    println!();
}

pub fn print_jobs(jobs: &[Job]) {
    println!("\n=== Jobs ===\n");
    if jobs.is_empty() {
        println!("No jobs deployed.");
        return;
    }
    println!(
        "{:<25} {:<15} {:<10} {:<20} {:<30}",
        "Name", "Owner", "Status", "Workers", "Endpoints"
    );
    println!("{:-<105}", "");
    for job in jobs {
        let status = job.status.map(status_str).unwrap_or("unknown");
        let workers = job
            .workers
            .as_deref()
            .unwrap_or("-")
            .replace('\n', ", ");
        println!(
            "{:<25} {:<15} {:<10} {:<20} {:<30}",
            job.name,
            job.owner,
            status,
            workers,
            job.endpoint_urls.join(", "),
        );
    }
    println!();
}

fn status_str(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Running => "running",
        JobStatus::Pending => "pending",
        JobStatus::Working => "working",
        JobStatus::Error => "error",
        JobStatus::Completed => "completed",
    }
}

pub fn print_logs(logs: &HashMap<String, String>) {
    let mut pods: Vec<&String> = logs.keys().collect();
    pods.sort();
    for pod in pods {
        println!("--- {pod} ---");
        println!("{}", logs[pod]);
    }
}

pub fn print_templates(templates: &[String]) {
    println!("\n=== Templates ===\n");
    if templates.is_empty() {
        println!("No templates installed.");
        return;
    }
    for name in templates {
        println!("  {name}");
    }
    println!();
}

pub fn print_defaults(defaults: &[TemplateValue]) {
    println!("\n=== Template Values ===\n");
    println!(
        "{:<25} {:<25} {:<10} {:<40}",
        "Name", "Default", "Required", "Description"
    );
    println!("{:-<100}", "");
    for value in defaults {
        println!(
            "{:<25} {:<25} {:<10} {:<40}",
            value.name,
            value.default.to_string(),
            if value.required.unwrap_or(false) {
                "yes"
            } else {
                "no"
            },
            value.description.as_deref().unwrap_or(""),
        );
    }
    println!();
}

pub fn print_status(config: Option<&PoolConfig>, connected: bool, agent: bool, server: bool) {
    println!("\n=== Pool Status ===\n");
    match config {
        Some(config) => {
            println!("  Cluster:   {}", config.cluster_name);
            println!("  Node:      {}", config.node_name);
            println!("  Server:    {}", config.server_ip);
            println!("  Watcher:   {}", config.watcher_service);
            println!("  Connected: {}", if connected { "yes" } else { "no" });
            println!("  Agent:     {}", if agent { "running" } else { "stopped" });
            println!("  Role:      {}", if server { "seed" } else { "worker" });
        }
        None => println!("Not a pool member. Use 'orbit pool create' or 'orbit pool join'."),
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infrastructure_resources_are_hidden() {
        assert!(resource_visible("cpu"));
        assert!(resource_visible("nvidia.com/gpu"));
        assert!(!resource_visible("ephemeral-storage"));
        assert!(!resource_visible("pods"));
        assert!(!resource_visible("hugepages-2Mi"));
    }
}
