//! Test support utilities shared across unit and integration tests.
//!
//! [`FakeCloud`] is an in-memory Incus server. The connector, server and
//! image index handles it hands out all share one state, so a test can
//! script responses up front and inspect every call afterwards.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::future::ready;
use std::sync::{Arc, Mutex, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};

use crate::command::{CommandError, CommandOutput, CommandRunner};
use crate::incus::api::{
    ImageAlias, InstanceState, InstanceStatePut, InstancesPost, NetworkInfo, Operation,
};
use crate::incus::client::{
    ClientError, ClientFuture, ConnectionSettings, Connector, ImageIndex, InstanceServer,
};
use crate::ssh_key::{KeyError, KeyProvider};

/// Call on the fake server that a test can make fail.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FakeCall {
    /// Opening the server connection.
    Connect,
    /// Opening the public image index.
    IndexConnect,
    /// Submitting the creation request.
    CreateInstance,
    /// Submitting a state change with the given action name and force flag.
    UpdateState {
        /// Action name, for example `stop`.
        action: String,
        /// Whether the change was forced.
        force: bool,
    },
    /// Submitting the deletion request.
    DeleteInstance,
    /// Waiting on the operation of the given kind, for example `create`.
    Wait(String),
    /// Querying the runtime state.
    GetInstanceState,
}

#[derive(Debug, Default)]
struct CloudState {
    projects: BTreeSet<String>,
    profiles: BTreeSet<String>,
    networks: BTreeMap<String, String>,
    pools: BTreeSet<String>,
    local_aliases: BTreeSet<String>,
    remote_aliases: BTreeSet<String>,
    instance_states: VecDeque<InstanceState>,
    fallback_state: Option<InstanceState>,
    failures: Vec<(FakeCall, ClientError)>,
    calls: Vec<String>,
    created: Vec<InstancesPost>,
    connects: u32,
    state_queries: u32,
}

impl CloudState {
    fn failure(&self, call: &FakeCall) -> Option<ClientError> {
        self.failures
            .iter()
            .find(|(candidate, _)| candidate == call)
            .map(|(_, err)| err.clone())
    }

    fn check(&mut self, call: &FakeCall, log: String) -> Result<(), ClientError> {
        self.calls.push(log);
        self.failure(call).map_or(Ok(()), Err)
    }
}

fn not_found(resource: &str, name: &str) -> ClientError {
    ClientError::NotFound {
        resource: format!("{resource} {name}"),
    }
}

fn operation(kind: &str) -> Operation {
    Operation {
        path: format!("/1.0/operations/{kind}"),
    }
}

/// Shared in-memory Incus server.
#[derive(Clone, Debug, Default)]
pub struct FakeCloud {
    state: Arc<Mutex<CloudState>>,
}

impl FakeCloud {
    /// Server with the stock `default` project and profile, an `incusbr0`
    /// bridge and a `local` storage pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
            .with_project("default")
            .with_profile("default")
            .with_network("incusbr0", "bridge")
            .with_pool("local")
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CloudState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a project.
    #[must_use]
    pub fn with_project(self, name: &str) -> Self {
        self.lock().projects.insert(name.to_owned());
        self
    }

    /// Adds a profile.
    #[must_use]
    pub fn with_profile(self, name: &str) -> Self {
        self.lock().profiles.insert(name.to_owned());
        self
    }

    /// Adds a network of type `network_type`.
    #[must_use]
    pub fn with_network(self, name: &str, network_type: &str) -> Self {
        self.lock()
            .networks
            .insert(name.to_owned(), network_type.to_owned());
        self
    }

    /// Adds a storage pool.
    #[must_use]
    pub fn with_pool(self, name: &str) -> Self {
        self.lock().pools.insert(name.to_owned());
        self
    }

    /// Adds an image alias to the server's own catalog.
    #[must_use]
    pub fn with_local_alias(self, alias: &str) -> Self {
        self.lock().local_aliases.insert(alias.to_owned());
        self
    }

    /// Adds an image alias to the public image index.
    #[must_use]
    pub fn with_remote_alias(self, alias: &str) -> Self {
        self.lock().remote_aliases.insert(alias.to_owned());
        self
    }

    /// Makes `call` fail with `err`.
    #[must_use]
    pub fn failing(self, call: FakeCall, err: ClientError) -> Self {
        self.lock().failures.push((call, err));
        self
    }

    /// Queues a runtime state returned by the next state query.
    pub fn push_state(&self, state: InstanceState) {
        self.lock().instance_states.push_back(state);
    }

    /// Sets the runtime state returned once the queue is empty.
    pub fn set_fallback_state(&self, state: InstanceState) {
        self.lock().fallback_state = Some(state);
    }

    /// Connector handing out handles on this server.
    #[must_use]
    pub fn connector(&self) -> FakeConnector {
        FakeConnector {
            cloud: self.clone(),
        }
    }

    /// Log of every call made, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Creation requests received.
    #[must_use]
    pub fn created(&self) -> Vec<InstancesPost> {
        self.lock().created.clone()
    }

    /// Number of successful server connections.
    #[must_use]
    pub fn connects(&self) -> u32 {
        self.lock().connects
    }

    /// Number of runtime state queries answered or failed.
    #[must_use]
    pub fn state_queries(&self) -> u32 {
        self.lock().state_queries
    }
}

/// Connector for [`FakeCloud`].
#[derive(Clone, Debug)]
pub struct FakeConnector {
    cloud: FakeCloud,
}

impl Connector for FakeConnector {
    type Server = FakeServer;
    type Index = FakeIndex;

    fn connect<'a>(&'a self, settings: &'a ConnectionSettings) -> ClientFuture<'a, FakeServer> {
        let mut state = self.cloud.lock();
        let result = state.check(&FakeCall::Connect, format!("connect {}", settings.endpoint));
        if result.is_ok() {
            state.connects += 1;
        }
        drop(state);
        Box::pin(ready(result.map(|()| FakeServer {
            cloud: self.cloud.clone(),
        })))
    }

    fn connect_image_index<'a>(&'a self, url: &'a str) -> ClientFuture<'a, FakeIndex> {
        let result = self
            .cloud
            .lock()
            .check(&FakeCall::IndexConnect, format!("index_connect {url}"))
            .map(|()| FakeIndex {
                cloud: self.cloud.clone(),
            });
        Box::pin(ready(result))
    }
}

/// Server handle for [`FakeCloud`].
#[derive(Clone, Debug)]
pub struct FakeServer {
    cloud: FakeCloud,
}

impl FakeServer {
    fn lookup(
        &self,
        log: String,
        found: impl FnOnce(&CloudState) -> bool,
        resource: &str,
        name: &str,
    ) -> Result<(), ClientError> {
        let mut state = self.cloud.lock();
        state.calls.push(log);
        if found(&state) {
            Ok(())
        } else {
            Err(not_found(resource, name))
        }
    }

    fn submit(&self, call: &FakeCall, log: String, kind: &str) -> Result<Operation, ClientError> {
        self.cloud
            .lock()
            .check(call, log)
            .map(|()| operation(kind))
    }
}

impl InstanceServer for FakeServer {
    fn get_project<'a>(&'a self, name: &'a str) -> ClientFuture<'a, ()> {
        Box::pin(ready(self.lookup(
            format!("get_project {name}"),
            |state| state.projects.contains(name),
            "project",
            name,
        )))
    }

    fn use_project(&self, project: &str) -> Self {
        self.cloud
            .lock()
            .calls
            .push(format!("use_project {project}"));
        Self {
            cloud: self.cloud.clone(),
        }
    }

    fn get_profile<'a>(&'a self, name: &'a str) -> ClientFuture<'a, ()> {
        Box::pin(ready(self.lookup(
            format!("get_profile {name}"),
            |state| state.profiles.contains(name),
            "profile",
            name,
        )))
    }

    fn get_network<'a>(&'a self, name: &'a str) -> ClientFuture<'a, NetworkInfo> {
        let mut state = self.cloud.lock();
        state.calls.push(format!("get_network {name}"));
        let result = state
            .networks
            .get(name)
            .map(|network_type| NetworkInfo {
                name: name.to_owned(),
                network_type: network_type.clone(),
            })
            .ok_or_else(|| not_found("network", name));
        Box::pin(ready(result))
    }

    fn get_storage_pool<'a>(&'a self, name: &'a str) -> ClientFuture<'a, ()> {
        Box::pin(ready(self.lookup(
            format!("get_storage_pool {name}"),
            |state| state.pools.contains(name),
            "storage pool",
            name,
        )))
    }

    fn get_image_alias<'a>(&'a self, name: &'a str) -> ClientFuture<'a, ImageAlias> {
        let result = self
            .lookup(
                format!("get_image_alias {name}"),
                |state| state.local_aliases.contains(name),
                "image alias",
                name,
            )
            .map(|()| ImageAlias {
                name: name.to_owned(),
                target: format!("fingerprint-{name}"),
            });
        Box::pin(ready(result))
    }

    fn create_instance<'a>(&'a self, request: &'a InstancesPost) -> ClientFuture<'a, Operation> {
        let result = self.submit(
            &FakeCall::CreateInstance,
            format!("create_instance {}", request.name),
            "create",
        );
        if result.is_ok() {
            self.cloud.lock().created.push(request.clone());
        }
        Box::pin(ready(result))
    }

    fn update_instance_state<'a>(
        &'a self,
        name: &'a str,
        state: InstanceStatePut,
    ) -> ClientFuture<'a, Operation> {
        let action = state.action.to_string();
        let call = FakeCall::UpdateState {
            action: action.clone(),
            force: state.force,
        };
        Box::pin(ready(self.submit(
            &call,
            format!("update_state {name} {action} force={}", state.force),
            &action,
        )))
    }

    fn delete_instance<'a>(&'a self, name: &'a str) -> ClientFuture<'a, Operation> {
        Box::pin(ready(self.submit(
            &FakeCall::DeleteInstance,
            format!("delete_instance {name}"),
            "delete",
        )))
    }

    fn get_instance_state<'a>(&'a self, name: &'a str) -> ClientFuture<'a, InstanceState> {
        let mut state = self.cloud.lock();
        state.state_queries += 1;
        let result = match state.check(
            &FakeCall::GetInstanceState,
            format!("get_instance_state {name}"),
        ) {
            Ok(()) => {
                let queued = state.instance_states.pop_front();
                queued
                    .or_else(|| state.fallback_state.clone())
                    .ok_or_else(|| not_found("instance", name))
            }
            Err(err) => Err(err),
        };
        Box::pin(ready(result))
    }

    fn wait<'a>(&'a self, operation: &'a Operation) -> ClientFuture<'a, ()> {
        let kind = operation
            .path
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_owned();
        let result = self.cloud.lock().check(
            &FakeCall::Wait(kind),
            format!("wait {}", operation.path),
        );
        Box::pin(ready(result))
    }
}

/// Image index handle for [`FakeCloud`].
#[derive(Clone, Debug)]
pub struct FakeIndex {
    cloud: FakeCloud,
}

impl ImageIndex for FakeIndex {
    fn get_image_alias<'a>(&'a self, name: &'a str) -> ClientFuture<'a, ImageAlias> {
        let mut state = self.cloud.lock();
        state.calls.push(format!("index_alias {name}"));
        let result = if state.remote_aliases.contains(name) {
            Ok(ImageAlias {
                name: name.to_owned(),
                target: format!("product-{name}"),
            })
        } else {
            Err(not_found("image alias", name))
        };
        Box::pin(ready(result))
    }
}

#[derive(Debug, Default)]
struct KeyState {
    public_key: String,
    generate_error: Option<String>,
    generated: Vec<Utf8PathBuf>,
}

/// Key provider returning a fixed public key without touching the disk.
#[derive(Clone, Debug, Default)]
pub struct FakeKeys {
    state: Arc<Mutex<KeyState>>,
}

impl FakeKeys {
    /// Provider whose public key is `public_key`.
    #[must_use]
    pub fn new(public_key: &str) -> Self {
        let keys = Self::default();
        keys.lock().public_key = public_key.to_owned();
        keys
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, KeyState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes key generation fail with `message`.
    #[must_use]
    pub fn failing_generation(self, message: &str) -> Self {
        self.lock().generate_error = Some(message.to_owned());
        self
    }

    /// Paths key generation was requested for.
    #[must_use]
    pub fn generated(&self) -> Vec<Utf8PathBuf> {
        self.lock().generated.clone()
    }
}

impl KeyProvider for FakeKeys {
    fn generate_key_pair(&self, path: &Utf8Path) -> Result<(), KeyError> {
        let mut state = self.lock();
        state.generated.push(path.to_path_buf());
        state
            .generate_error
            .clone()
            .map_or(Ok(()), |message| {
                Err(KeyError::Generate {
                    path: path.to_path_buf(),
                    message,
                })
            })
    }

    fn read_public_key(&self, _path: &Utf8Path) -> Result<String, KeyError> {
        Ok(self.lock().public_key.clone())
    }
}

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Arc<Mutex<VecDeque<CommandOutput>>>,
    invocations: Arc<Mutex<Vec<CommandInvocation>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn push(&self, output: CommandOutput) {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(output);
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push(CommandOutput {
            code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
        });
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32) {
        self.push(CommandOutput {
            code: Some(code),
            stdout: String::new(),
            stderr: String::from("simulated failure"),
        });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, CommandError> {
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(CommandInvocation {
                program: program.to_owned(),
                args: args.to_vec(),
            });
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .ok_or_else(|| CommandError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: AsyncMutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets `set` and removes `unset` while holding a global mutex.
    pub async fn apply(set: &[(&str, &str)], unset: &[&str]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                set.iter()
                    .map(|(key, _)| *key)
                    .chain(unset.iter().copied())
                    .all(|key| seen.insert(key))
            },
            "duplicate environment variable keys passed to EnvGuard::apply"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(set.len() + unset.len());
        for (key, value) in set {
            previous.push(((*key).to_owned(), env::var_os(key)));
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
        }
        for key in unset {
            previous.push(((*key).to_owned(), env::var_os(key)));
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::remove_var(key) };
        }

        Self {
            previous,
            _guard: guard,
        }
    }

    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        Self::apply(pairs, &[]).await
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
