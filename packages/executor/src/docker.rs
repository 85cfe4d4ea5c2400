// ABOUTME: Docker-backed task implementation via bollard
// ABOUTME: Handles container creation, SGX/GPU device attachment, readiness polling, and the execute/attest protocol

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use bollard::{
    container::{
        Config, CreateContainerOptions, LogsOptions, NetworkingConfig, RemoveContainerOptions,
        StartContainerOptions,
    },
    models::{DeviceMapping, DeviceRequest, EndpointSettings, HostConfig, Mount, MountTypeEnum},
    Docker,
};
use futures_util::stream::StreamExt;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, info};

use crate::error::{ExecutorError, Result};
use crate::microvm::MicroVmTask;
use crate::task::{Task, TaskFactory};
use crate::types::{EnclaveConfig, ResourceLimit, TaskConfig, TaskType};

/// Prefix of every container name managed by this engine
const TASK_NAME_PREFIX: &str = "mecanywhere";

/// Overlay network all task containers join; it resolves container names to
/// addresses, so a container's name doubles as its virtual address
const TASK_VNET: &str = "mecanywhere";

/// Marker the in-sandbox server prints on stdout once it finished booting
const READY_LOG_MARK: &str = "meca-init-done";

/// Total readiness log checks before giving up (first check plus retries)
const READY_CHECKS: u32 = 6;

/// Sleep between readiness checks
const READY_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Port the in-sandbox task server listens on
const TASK_SERVER_PORT: u16 = 8080;

/// Reserved input value that reroutes an enclave execute call to the
/// attestation endpoint; callers must never pass it as genuine payload
pub const ATTESTATION_REQUEST: &[u8] = b"SGXRAREQUEST";

/// Container-internal path the SGX enclave device is exposed at
const SGX_DEVICE_CONTAINER_PATH: &str = "/dev/sgx_enclave";

/// Container-internal path the AESM daemon socket directory is mounted at
const AESM_SOCKET_CONTAINER_PATH: &str = "/var/run/aesmd";

/// Cgroup permissions for the enclave device (read, write, mknod)
const SGX_DEVICE_PERMISSIONS: &str = "mrw";

/// Derive the container name for an image identifier
///
/// Strips any registry path up to the last `/`, splits the remainder at the
/// first `:` into base name and tag, and joins them under the engine prefix.
/// Stable for a given image so repeated runs can be correlated to images.
pub(crate) fn container_name(image_id: &str) -> String {
    let base = match image_id.rfind('/') {
        Some(idx) => &image_id[idx + 1..],
        None => image_id,
    };
    let (name, tag) = match base.split_once(':') {
        Some((name, tag)) => (name, tag),
        None => (base, ""),
    };
    format!("{}_{}_{}", TASK_NAME_PREFIX, name, tag)
}

/// CPU cores to engine nano-CPU units
fn nano_cpus(cpus: f64) -> i64 {
    (cpus * 1_000_000_000.0) as i64
}

/// Configured memory (KiB) to engine bytes
fn memory_bytes(memory_kib: i64) -> i64 {
    memory_kib * 1024 * 1024
}

/// Build the `device=<id,..>` selector for the granted GPU indices
///
/// An empty index list yields no selector rather than a malformed one.
fn gpu_device_selector(devices: &[u32]) -> Option<String> {
    if devices.is_empty() {
        return None;
    }
    let ids: Vec<String> = devices.iter().map(u32::to_string).collect();
    Some(format!("device={}", ids.join(",")))
}

/// Translate granted GPU indices into an engine device request
fn gpu_device_request(devices: &[u32]) -> Option<DeviceRequest> {
    let selector = gpu_device_selector(devices)?;
    debug!("gpu device selector: {}", selector);
    Some(DeviceRequest {
        driver: None,
        count: None,
        device_ids: Some(devices.iter().map(u32::to_string).collect()),
        capabilities: Some(vec![vec!["gpu".to_string()]]),
        options: None,
    })
}

/// Removal options for task containers: forced, so a still-running container
/// comes down too, and with anonymous volumes removed alongside it
fn container_remove_options() -> RemoveContainerOptions {
    RemoveContainerOptions {
        force: true,
        v: true,
        ..Default::default()
    }
}

/// Bounded readiness poll
///
/// Runs `check` up to `checks` times, sleeping `interval` between attempts.
/// A `ReadyMarkerNotFound` result consumes a retry; any other error is
/// propagated immediately. Cancellation takes effect between attempts when
/// the surrounding future is dropped.
async fn poll_ready<F, Fut>(checks: u32, interval: Duration, mut check: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    for attempt in 0..checks {
        match check().await {
            Ok(()) => return Ok(()),
            Err(ExecutorError::ReadyMarkerNotFound) => {}
            Err(e) => return Err(e),
        }
        if attempt + 1 < checks {
            tokio::time::sleep(interval).await;
        }
    }
    Err(ExecutorError::StartTimeout)
}

/// A task backed by an OS-level Docker container
///
/// Constructed empty by the factory; `init` creates and starts the container
/// and records its handle and virtual address. `execute` proxies payloads to
/// the task server inside the container until `clean_up` removes it.
pub struct DockerTask {
    task_id: String,
    image_id: String,
    container_id: Option<String>,
    virtual_addr: Option<String>,
    resource: ResourceLimit,
    runtime: String,
    use_sgx: bool,
    sgx: Option<EnclaveConfig>,
    docker: Docker,
    http: reqwest::Client,
    ready_checks: u32,
    ready_interval: Duration,
    server_port: u16,
}

impl DockerTask {
    pub fn new(task_id: &str, config: TaskConfig, docker: Docker, http: reqwest::Client) -> Self {
        Self {
            task_id: task_id.to_string(),
            image_id: config.image_id,
            container_id: None,
            virtual_addr: None,
            resource: config.resource,
            runtime: config.runtime,
            use_sgx: config.use_sgx,
            sgx: config.sgx,
            docker,
            http,
            ready_checks: READY_CHECKS,
            ready_interval: READY_POLL_INTERVAL,
            server_port: TASK_SERVER_PORT,
        }
    }

    /// Base URL of the task server reached over the overlay network
    fn server_url(&self) -> Result<String> {
        let addr = self
            .virtual_addr
            .as_deref()
            .ok_or(ExecutorError::NotInitialized)?;
        Ok(format!("http://{}:{}", addr, self.server_port))
    }

    /// Fetch the accumulated stdout log and look for the readiness marker
    async fn check_ready_log(&self, container_id: &str) -> Result<()> {
        let options = LogsOptions::<String> {
            stdout: true,
            ..Default::default()
        };
        let mut logs = self.docker.logs(container_id, Some(options));
        let mut collected = String::new();
        while let Some(chunk) = logs.next().await {
            collected.push_str(&chunk?.to_string());
        }
        if collected.contains(READY_LOG_MARK) {
            Ok(())
        } else {
            Err(ExecutorError::ReadyMarkerNotFound)
        }
    }

    /// Block until the in-sandbox server reports ready or the bound is hit
    ///
    /// There is no structured health endpoint in the sandboxed process; the
    /// log marker is a coarse signal, so the wait is bounded.
    async fn wait_for_ready(&self) -> Result<()> {
        let container_id = self
            .container_id
            .clone()
            .ok_or(ExecutorError::NotInitialized)?;
        poll_ready(self.ready_checks, self.ready_interval, || {
            self.check_ready_log(&container_id)
        })
        .await
    }

    /// Fetch an attestation report from the enclave task server
    async fn attest(&self, base_url: &str) -> Result<Vec<u8>> {
        let response = self.http.get(format!("{}/ra", base_url)).send().await?;
        let body = response
            .bytes()
            .await
            .map_err(|_| ExecutorError::DecodeResponse)?;
        Ok(body.to_vec())
    }
}

#[async_trait::async_trait]
impl Task for DockerTask {
    fn id(&self) -> &str {
        &self.task_id
    }

    fn resource(&self) -> &ResourceLimit {
        &self.resource
    }

    async fn init(
        &mut self,
        _network_hint: &str,
        _port_hint: u16,
        gpu_devices: &[u32],
    ) -> Result<()> {
        let name = container_name(&self.image_id);
        debug!(
            "initializing task {} as container {} from image {}",
            self.task_id, name, self.image_id
        );

        let mut host_config = HostConfig {
            nano_cpus: Some(nano_cpus(self.resource.cpus)),
            memory: Some(memory_bytes(self.resource.memory_kib)),
            runtime: (!self.runtime.is_empty()).then(|| self.runtime.clone()),
            ..Default::default()
        };

        // SGX and GPU attachment are mutually exclusive; the enclave device
        // wins when both are configured.
        if self.use_sgx {
            let sgx = self.sgx.as_ref().ok_or_else(|| {
                ExecutorError::InvalidConfig(
                    "use_sgx is set but no enclave paths are configured".to_string(),
                )
            })?;
            host_config.devices = Some(vec![DeviceMapping {
                path_on_host: Some(sgx.device_path.clone()),
                path_in_container: Some(SGX_DEVICE_CONTAINER_PATH.to_string()),
                cgroup_permissions: Some(SGX_DEVICE_PERMISSIONS.to_string()),
            }]);
            host_config.mounts = Some(vec![Mount {
                typ: Some(MountTypeEnum::BIND),
                source: Some(sgx.aesm_socket_path.clone()),
                target: Some(AESM_SOCKET_CONTAINER_PATH.to_string()),
                ..Default::default()
            }]);
        } else if self.resource.use_gpu {
            if let Some(request) = gpu_device_request(gpu_devices) {
                host_config.device_requests = Some(vec![request]);
            }
        }

        // Join the task overlay network with no explicit endpoint settings;
        // the engine auto-assigns the address.
        let networking_config = NetworkingConfig {
            endpoints_config: HashMap::from([(TASK_VNET.to_string(), EndpointSettings::default())]),
        };

        let config = Config {
            image: Some(self.image_id.clone()),
            host_config: Some(host_config),
            networking_config: Some(networking_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: name.clone(),
            platform: None,
        };

        let response = self.docker.create_container(Some(options), config).await?;
        debug!("created container {} for task {}", response.id, self.task_id);
        self.container_id = Some(response.id.clone());

        self.docker
            .start_container(&response.id, None::<StartContainerOptions<String>>)
            .await?;
        debug!("started container {} for task {}", response.id, self.task_id);

        let container_info = self.docker.inspect_container(&response.id, None).await?;
        debug!(
            "container {} network settings: {:?}",
            response.id, container_info.network_settings
        );

        self.virtual_addr = Some(name);

        self.wait_for_ready().await?;
        info!("task {} is ready at {:?}", self.task_id, self.virtual_addr);
        Ok(())
    }

    async fn execute(&self, input: &[u8]) -> Result<Vec<u8>> {
        let base_url = self.server_url()?;

        // The opaque input channel doubles as a control channel: the exact
        // sentinel value selects the attestation endpoint instead of a run.
        if self.use_sgx && input == ATTESTATION_REQUEST {
            return self.attest(&base_url).await;
        }

        let url = if self.use_sgx {
            format!("{}/run", base_url)
        } else {
            base_url
        };

        let response = self
            .http
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(input.to_vec())
            .send()
            .await?;
        let body = response
            .bytes()
            .await
            .map_err(|_| ExecutorError::DecodeResponse)?;
        Ok(body.to_vec())
    }

    async fn clean_up(&self) -> Result<()> {
        // A task that never finished init has nothing to remove.
        let Some(container_id) = self.container_id.as_deref() else {
            return Ok(());
        };
        self.docker
            .remove_container(container_id, Some(container_remove_options()))
            .await?;
        info!("removed container {} for task {}", container_id, self.task_id);
        Ok(())
    }
}

/// Builds Docker-backed tasks over one shared engine client
pub struct DockerTaskFactory {
    docker: Docker,
    http: reqwest::Client,
    /// Runtime name for the micro-VM backend (e.g., kata)
    microvm_runtime: Option<String>,
}

impl DockerTaskFactory {
    pub fn new(docker: Docker, microvm_runtime: Option<String>) -> Self {
        Self {
            docker,
            http: reqwest::Client::new(),
            microvm_runtime,
        }
    }
}

impl TaskFactory for DockerTaskFactory {
    fn build(&self, task_id: &str, config: TaskConfig) -> Result<Box<dyn Task>> {
        match config.task_type {
            TaskType::Container => Ok(Box::new(DockerTask::new(
                task_id,
                config,
                self.docker.clone(),
                self.http.clone(),
            ))),
            TaskType::MicroVm => {
                let mut config = config;
                if config.runtime.is_empty() {
                    config.runtime = self.microvm_runtime.clone().ok_or_else(|| {
                        ExecutorError::InvalidConfig(
                            "no micro-VM runtime configured".to_string(),
                        )
                    })?;
                }
                Ok(Box::new(MicroVmTask::new(DockerTask::new(
                    task_id,
                    config,
                    self.docker.clone(),
                    self.http.clone(),
                ))))
            }
        }
    }
}
