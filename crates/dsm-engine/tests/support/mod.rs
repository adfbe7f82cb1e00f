//! Recording, stateful stand-in for the Docker daemon.
#![allow(dead_code)]

use async_trait::async_trait;
use bollard::container::{Config, LogOutput, LogsOptions};
use bollard::errors::Error as BollardError;
use bollard::models::{
    ContainerConfig, ContainerInspectResponse, ContainerSummary, EndpointSettings, ImageSummary,
    NetworkSettings,
};
use dsm_engine::runtime::{ContainerRuntime, LogFeed, RuntimeResult};
use futures::stream::{self, Stream, StreamExt};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::sync::Notify;

#[derive(Debug, Clone)]
pub enum Call {
    List { show_all: bool },
    Inspect(String),
    ListImages(String),
    Pull(String),
    Stop { id: String, timeout: u32 },
    Restart { id: String, timeout: u32 },
    Remove { id: String, force: bool },
    Create { name: String, config: Config<String> },
    Start(String),
    Connect {
        network: String,
        container: String,
        aliases: Option<Vec<String>>,
    },
    Logs { id: String, options: LogsOptions<String> },
}

#[derive(Debug, Clone)]
pub enum Frame {
    Stdout(&'static str),
    Stderr(&'static str),
    Fail(u16, &'static str),
}

#[derive(Debug, Clone, Copy)]
pub enum Ending {
    Complete,
    Hang,
}

#[derive(Debug, Clone)]
pub struct MockContainer {
    pub info: ContainerInspectResponse,
    pub running: bool,
    /// Reported state of a listed container other than "running"/"exited".
    pub state: Option<&'static str>,
}

#[derive(Default)]
struct MockState {
    containers: BTreeMap<String, MockContainer>,
    local_images: HashMap<String, String>,
    registry_images: HashMap<String, String>,
    failures: HashMap<String, (u16, String)>,
    next_ids: VecDeque<String>,
    log_script: Option<(Vec<Frame>, Ending)>,
    gates: HashMap<String, Arc<Notify>>,
    calls: Vec<Call>,
}

impl MockState {
    /// Resolves a full id or a container name, as the daemon does.
    fn resolve(&self, key: &str) -> Option<String> {
        if self.containers.contains_key(key) {
            return Some(key.to_string());
        }
        let wanted = format!("/{key}");
        self.containers
            .iter()
            .find(|(_, c)| c.info.name.as_deref() == Some(wanted.as_str()))
            .map(|(id, _)| id.clone())
    }

    fn get_mut(&mut self, key: &str) -> RuntimeResult<&mut MockContainer> {
        let id = self
            .resolve(key)
            .ok_or_else(|| server_error(404, &format!("No such container: {key}")))?;
        self.containers
            .get_mut(&id)
            .ok_or_else(|| server_error(404, &format!("No such container: {key}")))
    }
}

#[derive(Default)]
pub struct MockRuntime {
    state: Mutex<MockState>,
    feed_drops: Arc<AtomicUsize>,
    feeds_opened: AtomicUsize,
}

pub fn server_error(status_code: u16, message: &str) -> BollardError {
    BollardError::DockerResponseServerError {
        status_code,
        message: message.to_string(),
    }
}

/// Inspect record with a name, image and the given networks (with one alias each).
pub fn inspect(id: &str, name: &str, image: &str, networks: &[&str]) -> ContainerInspectResponse {
    let networks = networks
        .iter()
        .map(|network| {
            (
                network.to_string(),
                EndpointSettings {
                    aliases: Some(vec![format!("{name}-{network}")]),
                    ..Default::default()
                },
            )
        })
        .collect();

    ContainerInspectResponse {
        id: Some(id.to_string()),
        name: Some(format!("/{name}")),
        config: Some(ContainerConfig {
            image: Some(image.to_string()),
            ..Default::default()
        }),
        network_settings: Some(NetworkSettings {
            networks: Some(networks),
            ..Default::default()
        }),
        ..Default::default()
    }
}

impl MockRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_container(&self, info: ContainerInspectResponse, running: bool) {
        let id = info.id.clone().expect("mock containers need an id");
        self.state
            .lock()
            .unwrap()
            .containers
            .insert(
                id,
                MockContainer {
                    info,
                    running,
                    state: None,
                },
            );
    }

    /// Keeps the container in the running listing but reports `state`,
    /// the way the daemon lists paused or restarting containers.
    pub fn set_state(&self, id: &str, state: &'static str) {
        if let Some(container) = self.state.lock().unwrap().containers.get_mut(id) {
            container.running = true;
            container.state = Some(state);
        }
    }

    pub fn container(&self, id: &str) -> Option<MockContainer> {
        self.state.lock().unwrap().containers.get(id).cloned()
    }

    pub fn container_named(&self, name: &str) -> Option<(String, MockContainer)> {
        let wanted = format!("/{name}");
        self.state
            .lock()
            .unwrap()
            .containers
            .iter()
            .find(|(_, c)| c.info.name.as_deref() == Some(wanted.as_str()))
            .map(|(id, c)| (id.clone(), c.clone()))
    }

    /// Makes every call to `op` fail with the given daemon status.
    /// Network connects are keyed as `connect:<network>`.
    pub fn fail(&self, op: &str, status_code: u16, message: &str) {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert(op.to_string(), (status_code, message.to_string()));
    }

    /// Makes every call to `op` wait until the returned gate is notified.
    pub fn hold(&self, op: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state
            .lock()
            .unwrap()
            .gates
            .insert(op.to_string(), gate.clone());
        gate
    }

    pub fn queue_new_id(&self, id: &str) {
        self.state.lock().unwrap().next_ids.push_back(id.to_string());
    }

    pub fn set_local_image(&self, reference: &str, image_id: &str) {
        self.state
            .lock()
            .unwrap()
            .local_images
            .insert(reference.to_string(), image_id.to_string());
    }

    /// Image id that a pull of `reference` will store locally.
    pub fn set_registry_image(&self, reference: &str, image_id: &str) {
        self.state
            .lock()
            .unwrap()
            .registry_images
            .insert(reference.to_string(), image_id.to_string());
    }

    pub fn script_logs(&self, frames: Vec<Frame>, ending: Ending) {
        self.state.lock().unwrap().log_script = Some((frames, ending));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|call| matches(call)).count()
    }

    /// Number of destructive calls (stop, restart, remove, create) issued.
    pub fn destructive_calls(&self) -> usize {
        self.count(|call| {
            matches!(
                call,
                Call::Stop { .. } | Call::Restart { .. } | Call::Remove { .. } | Call::Create { .. }
            )
        })
    }

    pub fn feed_drops(&self) -> usize {
        self.feed_drops.load(Ordering::SeqCst)
    }

    pub fn feeds_opened(&self) -> usize {
        self.feeds_opened.load(Ordering::SeqCst)
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }

    async fn gated(&self, op: &str) {
        let gate = self.state.lock().unwrap().gates.get(op).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
    }

    fn injected(&self, op: &str) -> RuntimeResult<()> {
        match self.state.lock().unwrap().failures.get(op) {
            Some((status, message)) => Err(server_error(*status, message)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn list_containers(&self, show_all: bool) -> RuntimeResult<Vec<ContainerSummary>> {
        self.record(Call::List { show_all });
        self.injected("list")?;
        let state = self.state.lock().unwrap();
        Ok(state
            .containers
            .iter()
            .filter(|(_, c)| show_all || c.running)
            .map(|(id, c)| ContainerSummary {
                id: Some(id.clone()),
                names: c.info.name.clone().map(|name| vec![name]),
                image: c.info.config.as_ref().and_then(|config| config.image.clone()),
                state: Some(
                    c.state
                        .unwrap_or(if c.running { "running" } else { "exited" })
                        .to_string(),
                ),
                status: Some(if c.running { "Up 1 minute" } else { "Exited (0)" }.to_string()),
                ..Default::default()
            })
            .collect())
    }

    async fn inspect_container(&self, id: &str) -> RuntimeResult<ContainerInspectResponse> {
        self.record(Call::Inspect(id.to_string()));
        self.injected("inspect")?;
        self.state
            .lock()
            .unwrap()
            .get_mut(id)
            .map(|c| c.info.clone())
    }

    async fn list_images(&self, reference: &str) -> RuntimeResult<Vec<ImageSummary>> {
        self.record(Call::ListImages(reference.to_string()));
        self.injected("list_images")?;
        let state = self.state.lock().unwrap();
        Ok(state
            .local_images
            .get(reference)
            .map(|id| {
                vec![ImageSummary {
                    id: id.clone(),
                    ..Default::default()
                }]
            })
            .unwrap_or_default())
    }

    async fn pull_image(&self, reference: &str) -> RuntimeResult<()> {
        self.record(Call::Pull(reference.to_string()));
        self.gated("pull").await;
        self.injected("pull")?;
        let mut state = self.state.lock().unwrap();
        if let Some(id) = state.registry_images.get(reference).cloned() {
            state.local_images.insert(reference.to_string(), id);
        }
        Ok(())
    }

    async fn stop_container(&self, id: &str, timeout_secs: u32) -> RuntimeResult<()> {
        self.record(Call::Stop {
            id: id.to_string(),
            timeout: timeout_secs,
        });
        self.injected("stop")?;
        let mut state = self.state.lock().unwrap();
        let container = state.get_mut(id)?;
        if !container.running {
            return Err(server_error(304, ""));
        }
        container.running = false;
        Ok(())
    }

    async fn restart_container(&self, id: &str, timeout_secs: u32) -> RuntimeResult<()> {
        self.record(Call::Restart {
            id: id.to_string(),
            timeout: timeout_secs,
        });
        self.injected("restart")?;
        let mut state = self.state.lock().unwrap();
        let container = state.get_mut(id)?;
        container.running = true;
        Ok(())
    }

    async fn remove_container(&self, id: &str, force: bool) -> RuntimeResult<()> {
        self.record(Call::Remove {
            id: id.to_string(),
            force,
        });
        self.injected("remove")?;
        let mut state = self.state.lock().unwrap();
        let running = state.get_mut(id)?.running;
        if running && !force {
            return Err(server_error(409, "cannot remove a running container"));
        }
        if let Some(resolved) = state.resolve(id) {
            state.containers.remove(&resolved);
        }
        Ok(())
    }

    async fn create_container(&self, name: &str, config: Config<String>) -> RuntimeResult<String> {
        self.record(Call::Create {
            name: name.to_string(),
            config: config.clone(),
        });
        self.injected("create")?;
        let mut state = self.state.lock().unwrap();
        let full_name = format!("/{name}");
        if state
            .containers
            .values()
            .any(|c| c.info.name.as_deref() == Some(full_name.as_str()))
        {
            return Err(server_error(409, &format!("name {name} is already in use")));
        }

        let id = state
            .next_ids
            .pop_front()
            .unwrap_or_else(|| format!("new-{}", state.containers.len()));
        let info = ContainerInspectResponse {
            id: Some(id.clone()),
            name: Some(full_name),
            config: Some(ContainerConfig {
                image: config.image,
                env: config.env,
                labels: config.labels,
                cmd: config.cmd,
                ..Default::default()
            }),
            host_config: config.host_config,
            ..Default::default()
        };
        state.containers.insert(
            id.clone(),
            MockContainer {
                info,
                running: false,
                state: None,
            },
        );
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> RuntimeResult<()> {
        self.record(Call::Start(id.to_string()));
        self.injected("start")?;
        let mut state = self.state.lock().unwrap();
        let container = state.get_mut(id)?;
        container.running = true;
        Ok(())
    }

    async fn connect_network(
        &self,
        network: &str,
        container_id: &str,
        aliases: Option<Vec<String>>,
    ) -> RuntimeResult<()> {
        self.record(Call::Connect {
            network: network.to_string(),
            container: container_id.to_string(),
            aliases,
        });
        self.injected(&format!("connect:{network}"))
    }

    fn read_logs(&self, id: &str, options: LogsOptions<String>) -> LogFeed {
        self.record(Call::Logs {
            id: id.to_string(),
            options,
        });
        self.feeds_opened.fetch_add(1, Ordering::SeqCst);

        let (frames, ending) = self
            .state
            .lock()
            .unwrap()
            .log_script
            .clone()
            .unwrap_or((Vec::new(), Ending::Complete));

        let items = stream::iter(frames.into_iter().map(|frame| match frame {
            Frame::Stdout(text) => Ok(LogOutput::StdOut {
                message: text.as_bytes().to_vec().into(),
            }),
            Frame::Stderr(text) => Ok(LogOutput::StdErr {
                message: text.as_bytes().to_vec().into(),
            }),
            Frame::Fail(status, message) => Err(server_error(status, message)),
        }));
        let tail = match ending {
            Ending::Complete => stream::empty().boxed(),
            Ending::Hang => stream::pending().boxed(),
        };

        TrackedFeed {
            inner: items.chain(tail).boxed(),
            drops: self.feed_drops.clone(),
        }
        .boxed()
    }
}

/// Feed wrapper that counts how often a subscription is released.
struct TrackedFeed {
    inner: LogFeed,
    drops: Arc<AtomicUsize>,
}

impl Stream for TrackedFeed {
    type Item = Result<LogOutput, BollardError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl Drop for TrackedFeed {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}
