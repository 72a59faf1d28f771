use std::collections::HashMap;

use serde::Deserialize;
use serde_json::json;
use tracing::info;

use orbit_common::{
    DeployResult, Error, Job, JobStatus, LabelsOp, Result, TemplateValue,
};

use crate::template::TemplateEngine;
use crate::watcher::WatcherClient;
use crate::JOB_NAME_LABEL;

const DEFAULT_LOG_TAIL: u32 = 100;

/// Workload deployment and inspection.
#[derive(Debug, Clone)]
pub struct JobService {
    watcher: WatcherClient,
    engine: TemplateEngine,
    /// Advertised address used to build NodePort endpoint URLs.
    server_ip: String,
}

#[derive(Debug, Deserialize)]
struct JobRef {
    name: String,
    namespace: String,
}

#[derive(Debug, Default, Deserialize)]
struct PodsStatus {
    #[serde(default)]
    phases: HashMap<String, u32>,
    #[serde(default)]
    nodes: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ServicePorts {
    #[serde(default)]
    ports: Vec<u16>,
}

impl JobService {
    pub fn new(watcher: WatcherClient, engine: TemplateEngine, server_ip: &str) -> Self {
        Self {
            watcher,
            engine,
            server_ip: server_ip.to_string(),
        }
    }

    /// Render a template and hand the manifest to the watcher.
    ///
    /// The deployment id derived from the template's `id_field` becomes
    /// the job name and its selector label.
    pub async fn deploy_job(
        &self,
        template_name: &str,
        values: &HashMap<String, serde_json::Value>,
        force_namespace: Option<&str>,
        target_labels: Option<&HashMap<String, String>>,
        target_labels_ops: LabelsOp,
    ) -> Result<DeployResult> {
        let bundle = self.engine.fetch(template_name, None)?;
        let manifest = self.engine.render(&bundle, values, false)?;
        let name = self
            .engine
            .deployment_id(&bundle, values)?
            .unwrap_or_else(|| bundle.name.clone());

        let body = json!({
            "template": manifest,
            "template_values": values,
            "job_name": name,
            "label": JOB_NAME_LABEL,
            "force_namespace": force_namespace,
            "target_labels": target_labels,
            "target_labels_ops": target_labels_ops,
        });
        let value = self.watcher.post("/v1/deploy_job", &body).await?;
        let result: DeployResult = serde_json::from_value(value)
            .map_err(|e| Error::WatcherUnreachable(format!("malformed deploy reply: {e}")))?;
        info!(job = %name, deployed = result.successful.len(), "job submitted");
        Ok(result)
    }

    /// Delete every resource labelled with the job name, including the
    /// Services derived from the workload.
    pub async fn delete_job(&self, name: &str, force_namespace: Option<&str>) -> Result<()> {
        let body = json!({
            "label": JOB_NAME_LABEL,
            "value": name,
            "force_namespace": force_namespace,
        });
        self.watcher.post("/v1/delete_labeled_resources", &body).await?;
        Ok(())
    }

    /// Names of every deployed job, across namespaces.
    pub async fn fetch_job_names(&self) -> Result<Vec<String>> {
        Ok(self.job_refs().await?.into_iter().map(|j| j.name).collect())
    }

    /// Full job records with status derived from live pod phases.
    pub async fn fetch_job_details(&self, namespace: Option<&str>) -> Result<Vec<Job>> {
        let mut jobs = Vec::new();
        for job_ref in self.job_refs().await? {
            if let Some(namespace) = namespace {
                if job_ref.namespace != namespace {
                    continue;
                }
            }

            let selector = json!({
                "label": JOB_NAME_LABEL,
                "value": job_ref.name,
                "namespace": job_ref.namespace,
            });
            let pods: PodsStatus = parse(
                self.watcher
                    .post("/v1/get_pods_status_for_label", &selector)
                    .await?,
                "pod status",
            )?;
            let services: ServicePorts = parse(
                self.watcher
                    .post("/v1/get_ports_for_services", &selector)
                    .await?,
                "service ports",
            )?;

            let status = JobStatus::from_pod_phases(&pods.phases);
            let mut workers: Vec<String> = pods
                .phases
                .iter()
                .filter(|(_, n)| **n > 0)
                .map(|(phase, n)| format!("{phase}: {n}"))
                .collect();
            workers.sort();

            jobs.push(Job {
                owner: job_ref.namespace,
                name: job_ref.name,
                template_name: None,
                values: HashMap::new(),
                target_labels: None,
                target_labels_ops: LabelsOp::default(),
                status: Some(status),
                workers: Some(workers.join("\n")),
                endpoint_urls: services
                    .ports
                    .iter()
                    .map(|port| format!("http://{}:{port}", self.server_ip))
                    .collect(),
                host_nodes: pods.nodes,
            });
        }
        Ok(jobs)
    }

    /// Logs of a job's pods, newest `tail` lines each (default 100).
    pub async fn fetch_job_logs(
        &self,
        name: &str,
        pod: Option<&str>,
        tail: Option<u32>,
    ) -> Result<HashMap<String, String>> {
        let body = json!({
            "label": JOB_NAME_LABEL,
            "value": name,
            "pod_name": pod,
            "tail": tail.unwrap_or(DEFAULT_LOG_TAIL),
        });
        let value = self.watcher.post("/v1/get_logs_for_label", &body).await?;
        parse(value, "job logs")
    }

    /// Locally installed template names.
    pub fn fetch_job_templates(&self) -> Result<Vec<String>> {
        self.engine.list()
    }

    /// Declared values of one template, for prompting and validation.
    pub fn fetch_job_defaults(&self, template_name: &str) -> Result<Vec<TemplateValue>> {
        self.engine.defaults(template_name)
    }

    async fn job_refs(&self) -> Result<Vec<JobRef>> {
        let body = json!({ "object_type": "deployments", "label": JOB_NAME_LABEL });
        let value = self.watcher.post("/v1/get_objects_of_type", &body).await?;
        parse(value, "job list")
    }
}

fn parse<T: serde::de::DeserializeOwned>(value: serde_json::Value, what: &str) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| Error::WatcherUnreachable(format!("malformed {what}: {e}")))
}
