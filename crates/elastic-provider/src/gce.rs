//! Google Compute Engine gateway
//!
//! Talks to the Compute Engine v1 REST API with a bearer token taken from
//! the environment. Minting and refreshing that token is left to whatever
//! runs the autoscaler (`gcloud auth print-access-token`, metadata server).

use async_trait::async_trait;
use elastic_core::{
    ElasticError, ElasticResult, NodeNaming, NodeTemplate, ProviderConfig, ProvisionedNode,
};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::traits::FleetGateway;

const DEFAULT_API_BASE: &str = "https://compute.googleapis.com/compute/v1";
const COMPUTE_SCOPE: &str = "https://www.googleapis.com/auth/compute";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstanceList {
    #[serde(default)]
    items: Vec<Instance>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Instance {
    name: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    network_interfaces: Vec<NetworkInterface>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NetworkInterface {
    #[serde(rename = "networkIP")]
    network_ip: Option<String>,
    #[serde(default)]
    access_configs: Vec<AccessConfig>,
}

#[derive(Debug, Deserialize)]
struct AccessConfig {
    #[serde(rename = "natIP")]
    nat_ip: Option<String>,
}

impl Instance {
    /// External address if there is one, internal otherwise
    fn address(&self) -> Option<String> {
        let external = self
            .network_interfaces
            .iter()
            .flat_map(|ni| ni.access_configs.iter())
            .find_map(|ac| ac.nat_ip.clone());
        external.or_else(|| {
            self.network_interfaces
                .iter()
                .find_map(|ni| ni.network_ip.clone())
        })
    }

    fn is_running(&self) -> bool {
        self.status == "RUNNING"
    }
}

/// Fleet gateway for Google Compute Engine
pub struct GceGateway {
    client: reqwest::Client,
    config: ProviderConfig,
    naming: NodeNaming,
    token: String,
    api_base: String,
}

impl GceGateway {
    /// Create a gateway using an already-minted access token
    pub fn new(config: ProviderConfig, token: String) -> ElasticResult<Self> {
        if config.project.is_empty() {
            return Err(ElasticError::Config(
                "provider.project is required for the gce provider".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| ElasticError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            naming: NodeNaming::new(config.name_prefix.clone()),
            client,
            config,
            token,
            api_base: DEFAULT_API_BASE.to_string(),
        })
    }

    /// Create a gateway reading the token from `provider.token_env`
    pub fn from_env(config: ProviderConfig) -> ElasticResult<Self> {
        let token = std::env::var(&config.token_env).map_err(|_| {
            ElasticError::Config(format!(
                "Access token variable {} is not set",
                config.token_env
            ))
        })?;
        Self::new(config, token)
    }

    /// Point the gateway at a different API root
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn instances_url(&self) -> String {
        format!(
            "{}/projects/{}/zones/{}/instances",
            self.api_base, self.config.project, self.config.zone
        )
    }

    fn instance_url(&self, name: &str) -> String {
        format!("{}/{}", self.instances_url(), name)
    }

    /// Request body for `instances.insert`
    fn insert_body(&self, name: &str, template: &NodeTemplate) -> serde_json::Value {
        let zone = &self.config.zone;
        let mut body = json!({
            "name": name,
            "machineType": format!("zones/{}/machineTypes/{}", zone, template.machine_type),
            "disks": [{
                "boot": true,
                "autoDelete": true,
                "initializeParams": { "sourceImage": template.image },
            }],
            "networkInterfaces": [{
                "network": "global/networks/default",
                "accessConfigs": [{ "type": "ONE_TO_ONE_NAT", "name": "External NAT" }],
            }],
        });

        if let Some(email) = &template.service_account_email {
            body["serviceAccounts"] = json!([{ "email": email, "scopes": [COMPUTE_SCOPE] }]);
        }

        // GPU hosts cannot live-migrate
        if let Some((accelerator, count)) = &template.accelerator {
            body["guestAccelerators"] = json!([{
                "acceleratorType": format!("zones/{}/acceleratorTypes/{}", zone, accelerator),
                "acceleratorCount": count,
            }]);
            body["scheduling"] = json!({ "onHostMaintenance": "TERMINATE" });
        }

        body
    }

    fn to_node(&self, instance: &Instance) -> Option<ProvisionedNode> {
        let created_at = self.naming.created_at(&instance.name)?;
        Some(ProvisionedNode {
            name: instance.name.clone(),
            address: instance.address(),
            created_at,
        })
    }

    async fn check(response: reqwest::Response) -> ElasticResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ElasticError::Provider(format!("{}: {}", status, body.trim())))
    }

    async fn get_instance(&self, name: &str) -> ElasticResult<Option<Instance>> {
        let response = self
            .client
            .get(self.instance_url(name))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| ElasticError::Provider(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let instance = Self::check(response)
            .await?
            .json::<Instance>()
            .await
            .map_err(|e| ElasticError::Provider(e.to_string()))?;
        Ok(Some(instance))
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.config.poll_interval_secs.max(1))
    }

    fn deadline(&self) -> Instant {
        Instant::now() + Duration::from_secs(self.config.operation_timeout_secs)
    }
}

#[async_trait]
impl FleetGateway for GceGateway {
    async fn list_nodes(&self) -> ElasticResult<Vec<ProvisionedNode>> {
        let mut nodes = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self.client.get(self.instances_url()).bearer_auth(&self.token);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token)]);
            }

            let response = request
                .send()
                .await
                .map_err(|e| ElasticError::Provider(e.to_string()))?;
            let page: InstanceList = Self::check(response)
                .await?
                .json()
                .await
                .map_err(|e| ElasticError::Provider(e.to_string()))?;

            for instance in &page.items {
                match self.to_node(instance) {
                    Some(node) => nodes.push(node),
                    None => debug!(node = %instance.name, "Ignoring node not managed by elastic"),
                }
            }

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(nodes)
    }

    async fn create_nodes(
        &self,
        names: &[String],
        template: &NodeTemplate,
    ) -> ElasticResult<Vec<ProvisionedNode>> {
        let mut created = Vec::new();

        for name in names {
            let Some(created_at) = self.naming.created_at(name) else {
                warn!(node = %name, "Refusing to create node with an unmanaged name");
                continue;
            };

            info!(node = %name, machine_type = %template.machine_type, "Creating node");
            let result = self
                .client
                .post(self.instances_url())
                .bearer_auth(&self.token)
                .json(&self.insert_body(name, template))
                .send()
                .await
                .map_err(|e| ElasticError::Provider(e.to_string()));

            let result = match result {
                Ok(response) => Self::check(response).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(_) => created.push(ProvisionedNode {
                    name: name.clone(),
                    address: None,
                    created_at,
                }),
                Err(e) => warn!(node = %name, error = %e, "Failed to create node"),
            }
        }

        Ok(created)
    }

    async fn wait_until_running(
        &self,
        nodes: &[ProvisionedNode],
    ) -> ElasticResult<Vec<ProvisionedNode>> {
        let deadline = self.deadline();
        let mut pending: HashMap<&str, &ProvisionedNode> =
            nodes.iter().map(|n| (n.name.as_str(), n)).collect();
        let mut running = Vec::new();

        while !pending.is_empty() {
            let names: Vec<&str> = pending.keys().copied().collect();
            for name in names {
                match self.get_instance(name).await {
                    Ok(Some(instance)) if instance.is_running() => {
                        if let Some(address) = instance.address() {
                            info!(node = %name, address = %address, "Node running");
                            if let Some(node) = pending.remove(name) {
                                running.push(ProvisionedNode {
                                    address: Some(address),
                                    ..node.clone()
                                });
                            }
                        }
                    }
                    Ok(Some(instance)) => {
                        debug!(node = %name, status = %instance.status, "Waiting for node")
                    }
                    Ok(None) => {
                        warn!(node = %name, "Node disappeared while starting");
                        pending.remove(name);
                    }
                    Err(e) => warn!(node = %name, error = %e, "Failed to poll node"),
                }
            }

            if pending.is_empty() {
                break;
            }
            if Instant::now() >= deadline {
                for name in pending.keys() {
                    warn!(node = %name, "Node did not reach RUNNING in time");
                }
                break;
            }
            tokio::time::sleep(self.poll_interval()).await;
        }

        Ok(running)
    }

    async fn destroy_nodes(&self, names: &[String]) -> ElasticResult<Vec<String>> {
        let mut deleting = Vec::new();

        for name in names {
            info!(node = %name, "Destroying node");
            let result = self
                .client
                .delete(self.instance_url(name))
                .bearer_auth(&self.token)
                .send()
                .await
                .map_err(|e| ElasticError::Provider(e.to_string()));

            match result {
                Ok(response) if response.status() == reqwest::StatusCode::NOT_FOUND => {
                    deleting.push(name.clone())
                }
                Ok(response) => match Self::check(response).await {
                    Ok(_) => deleting.push(name.clone()),
                    Err(e) => warn!(node = %name, error = %e, "Failed to destroy node"),
                },
                Err(e) => warn!(node = %name, error = %e, "Failed to destroy node"),
            }
        }

        let deadline = self.deadline();
        let mut destroyed = Vec::new();
        while !deleting.is_empty() {
            let mut still_there = Vec::new();
            for name in deleting {
                match self.get_instance(&name).await {
                    Ok(None) => {
                        info!(node = %name, "Node destroyed");
                        destroyed.push(name);
                    }
                    Ok(Some(_)) => still_there.push(name),
                    Err(e) => {
                        warn!(node = %name, error = %e, "Failed to poll node deletion");
                        still_there.push(name);
                    }
                }
            }
            deleting = still_there;

            if deleting.is_empty() {
                break;
            }
            if Instant::now() >= deadline {
                for name in &deleting {
                    warn!(node = %name, "Node still present after deletion timeout");
                }
                break;
            }
            tokio::time::sleep(self.poll_interval()).await;
        }

        Ok(destroyed)
    }

    fn name(&self) -> &'static str {
        "gce"
    }
}
