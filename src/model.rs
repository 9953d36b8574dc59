//! Reference models and their endpoints.
//!
//! A model offers endpoints that agent operations bind to when the model is
//! attached to an [`Env`](crate::env::Env):
//!
//! | Endpoint      | Keyed by      | Receives                              |
//! |---------------|---------------|---------------------------------------|
//! | agent hook    | agent name    | `(driver name, bound args)`           |
//! | agent port    | agent name    | `{"driver": name, "args": {...}}`     |
//! | driver hook   | `agent.op`    | bound args                            |
//! | driver port   | `agent.op`    | bare value (one parameter) or the map |
//! | monitor port  | `agent.op`    | nothing; the model puts expected data |
//!
//! Every endpoint carries a matched mark. Attaching sets the marks of the
//! endpoints it binds and then requires every endpoint to be marked.

use std::cell::Cell;
use std::fmt;
use std::future::Future;
use std::rc::Rc;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;

use crate::env::EnvId;
use crate::error::{BenchError, BenchResult};
use crate::scheduler::Scheduler;
use crate::sync::Queue;
use crate::types::{Args, LocalBoxFuture, Value};

/// Unique model identifier.
pub type ModelId = u64;

static NEXT_MODEL_ID: AtomicU64 = AtomicU64::new(1);

/// Hook bound to one driver operation.
pub type DriverHookFn = Rc<dyn Fn(Args) -> LocalBoxFuture<'static, Option<Value>>>;

/// Hook bound to every driver operation of one agent.
pub type AgentHookFn = Rc<dyn Fn(String, Args) -> LocalBoxFuture<'static, Option<Value>>>;

/// Fully qualified `agent.operation` path.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointPath {
    agent: String,
    operation: String,
}

impl EndpointPath {
    pub fn new(agent: impl Into<String>, operation: impl Into<String>) -> BenchResult<Self> {
        let agent = agent.into();
        let operation = operation.into();
        if !is_valid_segment(&agent) || !is_valid_segment(&operation) {
            return Err(BenchError::MalformedPath(format!("{agent}.{operation}")));
        }
        Ok(Self { agent, operation })
    }

    /// Parses the `agent__operation` symbol form.
    pub fn from_symbol(symbol: &str) -> BenchResult<Self> {
        let (agent, operation) = symbol
            .split_once("__")
            .ok_or_else(|| BenchError::MalformedPath(symbol.to_string()))?;
        Self::new(agent, operation)
    }

    pub fn agent(&self) -> &str {
        &self.agent
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }
}

fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty() && !segment.contains('.') && !segment.contains(char::is_whitespace)
}

impl FromStr for EndpointPath {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((agent, operation)) => Self::new(agent, operation),
            None => Err(BenchError::MalformedPath(s.to_string())),
        }
    }
}

impl fmt::Display for EndpointPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.agent, self.operation)
    }
}

/// Conversion into an [`EndpointPath`].
///
/// Strings containing a dot are parsed as `agent.op`, other strings as the
/// `agent__op` symbol form.
pub trait IntoEndpointPath {
    fn into_endpoint_path(self) -> BenchResult<EndpointPath>;
}

impl IntoEndpointPath for EndpointPath {
    fn into_endpoint_path(self) -> BenchResult<EndpointPath> {
        Ok(self)
    }
}

impl IntoEndpointPath for &str {
    fn into_endpoint_path(self) -> BenchResult<EndpointPath> {
        if self.contains('.') {
            self.parse()
        } else {
            EndpointPath::from_symbol(self)
        }
    }
}

impl IntoEndpointPath for String {
    fn into_endpoint_path(self) -> BenchResult<EndpointPath> {
        self.as_str().into_endpoint_path()
    }
}

impl IntoEndpointPath for (&str, &str) {
    fn into_endpoint_path(self) -> BenchResult<EndpointPath> {
        EndpointPath::new(self.0, self.1)
    }
}

pub(crate) struct Endpoint<T> {
    pub(crate) target: T,
    matched: Cell<bool>,
}

impl<T> Endpoint<T> {
    fn new(target: T) -> Self {
        Self {
            target,
            matched: Cell::new(false),
        }
    }

    pub(crate) fn mark_matched(&self) {
        self.matched.set(true);
    }

    pub(crate) fn is_matched(&self) -> bool {
        self.matched.get()
    }

    fn clear(&self) {
        self.matched.set(false);
    }
}

struct ModelInner {
    id: ModelId,
    name: String,
    agent_hooks: IndexMap<String, Endpoint<AgentHookFn>>,
    agent_ports: IndexMap<String, Endpoint<Queue<Value>>>,
    driver_hooks: IndexMap<EndpointPath, Endpoint<DriverHookFn>>,
    driver_ports: IndexMap<EndpointPath, Endpoint<Queue<Value>>>,
    monitor_ports: IndexMap<EndpointPath, Endpoint<Queue<Value>>>,
    attached_to: Cell<Option<EnvId>>,
}

/// A reference model. Cheap to clone; clones share endpoints.
#[derive(Clone)]
pub struct Model {
    inner: Rc<ModelInner>,
}

impl Model {
    /// Starts building a model whose ports report to `sched`.
    pub fn builder(sched: &Scheduler, name: impl Into<String>) -> ModelBuilder {
        ModelBuilder::new(sched, name)
    }

    pub fn id(&self) -> ModelId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The queue behind the agent port for `agent`.
    pub fn agent_port(&self, agent: &str) -> BenchResult<Queue<Value>> {
        self.inner
            .agent_ports
            .get(agent)
            .map(|endpoint| endpoint.target.clone())
            .ok_or_else(|| self.unknown(format!("agent port {agent}")))
    }

    /// The queue behind the driver port at `path`.
    pub fn driver_port(&self, path: impl IntoEndpointPath) -> BenchResult<Queue<Value>> {
        let path = path.into_endpoint_path()?;
        self.inner
            .driver_ports
            .get(&path)
            .map(|endpoint| endpoint.target.clone())
            .ok_or_else(|| self.unknown(format!("driver port {path}")))
    }

    /// The queue behind the monitor port at `path`. The model puts its
    /// expected values here.
    pub fn monitor_port(&self, path: impl IntoEndpointPath) -> BenchResult<Queue<Value>> {
        let path = path.into_endpoint_path()?;
        self.inner
            .monitor_ports
            .get(&path)
            .map(|endpoint| endpoint.target.clone())
            .ok_or_else(|| self.unknown(format!("monitor port {path}")))
    }

    fn unknown(&self, endpoint: String) -> BenchError {
        BenchError::UnknownEndpoint {
            model: self.inner.name.clone(),
            endpoint,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.inner.attached_to.get().is_some()
    }

    /// The env currently holding this model's bindings.
    pub fn attached_to(&self) -> Option<EnvId> {
        self.inner.attached_to.get()
    }

    pub(crate) fn set_attached_to(&self, env: Option<EnvId>) {
        self.inner.attached_to.set(env);
    }

    pub(crate) fn agent_hook_endpoint(&self, agent: &str) -> Option<&Endpoint<AgentHookFn>> {
        self.inner.agent_hooks.get(agent)
    }

    pub(crate) fn agent_port_endpoint(&self, agent: &str) -> Option<&Endpoint<Queue<Value>>> {
        self.inner.agent_ports.get(agent)
    }

    pub(crate) fn driver_hook_endpoint(&self, path: &EndpointPath) -> Option<&Endpoint<DriverHookFn>> {
        self.inner.driver_hooks.get(path)
    }

    pub(crate) fn driver_port_endpoint(&self, path: &EndpointPath) -> Option<&Endpoint<Queue<Value>>> {
        self.inner.driver_ports.get(path)
    }

    pub(crate) fn monitor_port_endpoint(&self, path: &EndpointPath) -> Option<&Endpoint<Queue<Value>>> {
        self.inner.monitor_ports.get(path)
    }

    /// Clears every matched mark.
    pub fn clear_matched(&self) {
        let inner = &self.inner;
        inner.agent_hooks.values().for_each(Endpoint::clear);
        inner.agent_ports.values().for_each(Endpoint::clear);
        inner.driver_hooks.values().for_each(Endpoint::clear);
        inner.driver_ports.values().for_each(Endpoint::clear);
        inner.monitor_ports.values().for_each(Endpoint::clear);
    }

    /// Fails on the first endpoint that is not marked matched.
    pub fn ensure_all_matched(&self) -> BenchResult<()> {
        match self.unmatched().into_iter().next() {
            Some(endpoint) => Err(BenchError::UnmatchedEndpoint {
                model: self.inner.name.clone(),
                endpoint,
            }),
            None => Ok(()),
        }
    }

    /// Descriptions of every endpoint not marked matched.
    pub fn unmatched(&self) -> Vec<String> {
        let inner = &self.inner;
        let mut out = Vec::new();
        for (path, endpoint) in &inner.driver_hooks {
            if !endpoint.is_matched() {
                out.push(format!("driver hook {path}"));
            }
        }
        for (agent, endpoint) in &inner.agent_hooks {
            if !endpoint.is_matched() {
                out.push(format!("agent hook {agent}"));
            }
        }
        for (path, endpoint) in &inner.driver_ports {
            if !endpoint.is_matched() {
                out.push(format!("driver port {path}"));
            }
        }
        for (agent, endpoint) in &inner.agent_ports {
            if !endpoint.is_matched() {
                out.push(format!("agent port {agent}"));
            }
        }
        for (path, endpoint) in &inner.monitor_ports {
            if !endpoint.is_matched() {
                out.push(format!("monitor port {path}"));
            }
        }
        out
    }
}

impl PartialEq for Model {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Model {}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = &self.inner;
        f.debug_struct("Model")
            .field("id", &inner.id)
            .field("name", &inner.name)
            .field("agent_hooks", &inner.agent_hooks.len())
            .field("agent_ports", &inner.agent_ports.len())
            .field("driver_hooks", &inner.driver_hooks.len())
            .field("driver_ports", &inner.driver_ports.len())
            .field("monitor_ports", &inner.monitor_ports.len())
            .field("attached_to", &inner.attached_to.get())
            .finish()
    }
}

/// Builder for [`Model`].
///
/// Path errors and duplicate endpoints are reported by [`ModelBuilder::build`].
pub struct ModelBuilder {
    sched: Scheduler,
    name: String,
    agent_hooks: IndexMap<String, Endpoint<AgentHookFn>>,
    agent_ports: IndexMap<String, Endpoint<Queue<Value>>>,
    driver_hooks: IndexMap<EndpointPath, Endpoint<DriverHookFn>>,
    driver_ports: IndexMap<EndpointPath, Endpoint<Queue<Value>>>,
    monitor_ports: IndexMap<EndpointPath, Endpoint<Queue<Value>>>,
    error: Option<BenchError>,
}

impl ModelBuilder {
    pub fn new(sched: &Scheduler, name: impl Into<String>) -> Self {
        Self {
            sched: sched.clone(),
            name: name.into(),
            agent_hooks: IndexMap::new(),
            agent_ports: IndexMap::new(),
            driver_hooks: IndexMap::new(),
            driver_ports: IndexMap::new(),
            monitor_ports: IndexMap::new(),
            error: None,
        }
    }

    fn fail(&mut self, error: BenchError) {
        self.error.get_or_insert(error);
    }

    fn path(&mut self, path: impl IntoEndpointPath) -> Option<EndpointPath> {
        match path.into_endpoint_path() {
            Ok(path) => Some(path),
            Err(e) => {
                self.fail(e);
                None
            }
        }
    }

    fn insert<K, T>(
        map: &mut IndexMap<K, Endpoint<T>>,
        key: K,
        target: T,
        kind: &'static str,
    ) -> Option<BenchError>
    where
        K: std::hash::Hash + Eq + fmt::Display,
    {
        if map.contains_key(&key) {
            return Some(BenchError::Duplicate {
                kind,
                name: key.to_string(),
            });
        }
        map.insert(key, Endpoint::new(target));
        None
    }

    /// Adds a synchronous agent hook.
    pub fn agent_hook<F>(self, agent: impl Into<String>, hook: F) -> Self
    where
        F: Fn(&str, Args) -> Option<Value> + 'static,
    {
        let hook = Rc::new(hook);
        self.agent_hook_async(agent, move |driver, args| {
            let out = hook(&driver, args);
            async move { out }
        })
    }

    /// Adds an agent hook that may suspend.
    pub fn agent_hook_async<F, Fut>(mut self, agent: impl Into<String>, hook: F) -> Self
    where
        F: Fn(String, Args) -> Fut + 'static,
        Fut: Future<Output = Option<Value>> + 'static,
    {
        let target: AgentHookFn = Rc::new(move |driver, args| Box::pin(hook(driver, args)));
        if let Some(e) = Self::insert(&mut self.agent_hooks, agent.into(), target, "agent hook") {
            self.fail(e);
        }
        self
    }

    /// Adds an agent port.
    pub fn agent_port(mut self, agent: impl Into<String>) -> Self {
        let queue = self.sched.queue();
        if let Some(e) = Self::insert(&mut self.agent_ports, agent.into(), queue, "agent port") {
            self.fail(e);
        }
        self
    }

    /// Adds a synchronous driver hook.
    pub fn driver_hook<F>(self, path: impl IntoEndpointPath, hook: F) -> Self
    where
        F: Fn(Args) -> Option<Value> + 'static,
    {
        let hook = Rc::new(hook);
        self.driver_hook_async(path, move |args| {
            let out = hook(args);
            async move { out }
        })
    }

    /// Adds a driver hook that may suspend.
    pub fn driver_hook_async<F, Fut>(mut self, path: impl IntoEndpointPath, hook: F) -> Self
    where
        F: Fn(Args) -> Fut + 'static,
        Fut: Future<Output = Option<Value>> + 'static,
    {
        let Some(path) = self.path(path) else {
            return self;
        };
        let target: DriverHookFn = Rc::new(move |args| Box::pin(hook(args)));
        if let Some(e) = Self::insert(&mut self.driver_hooks, path, target, "driver hook") {
            self.fail(e);
        }
        self
    }

    /// Adds a driver port.
    pub fn driver_port(mut self, path: impl IntoEndpointPath) -> Self {
        let Some(path) = self.path(path) else {
            return self;
        };
        let queue = self.sched.queue();
        if let Some(e) = Self::insert(&mut self.driver_ports, path, queue, "driver port") {
            self.fail(e);
        }
        self
    }

    /// Adds a monitor port.
    pub fn monitor_port(mut self, path: impl IntoEndpointPath) -> Self {
        let Some(path) = self.path(path) else {
            return self;
        };
        let queue = self.sched.queue();
        if let Some(e) = Self::insert(&mut self.monitor_ports, path, queue, "monitor port") {
            self.fail(e);
        }
        self
    }

    pub fn build(self) -> BenchResult<Model> {
        if let Some(e) = self.error {
            return Err(e);
        }
        Ok(Model {
            inner: Rc::new(ModelInner {
                id: NEXT_MODEL_ID.fetch_add(1, Ordering::Relaxed),
                name: self.name,
                agent_hooks: self.agent_hooks,
                agent_ports: self.agent_ports,
                driver_hooks: self.driver_hooks,
                driver_ports: self.driver_ports,
                monitor_ports: self.monitor_ports,
                attached_to: Cell::new(None),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BenchConfig;
    use crate::runtime::Runtime;

    fn sched() -> Scheduler {
        Scheduler::new(Runtime::new().spawner(), BenchConfig::default())
    }

    #[test]
    fn test_path_forms() {
        let dotted: EndpointPath = "adder.add".parse().unwrap();
        let symbol = EndpointPath::from_symbol("adder__add").unwrap();
        let pair = ("adder", "add").into_endpoint_path().unwrap();
        assert_eq!(dotted, symbol);
        assert_eq!(dotted, pair);
        assert_eq!(dotted.to_string(), "adder.add");
        assert_eq!(dotted.agent(), "adder");
        assert_eq!(dotted.operation(), "add");
    }

    #[test]
    fn test_malformed_paths() {
        for bad in ["adder", "adder.", ".add", "a.b.c", "__add", "adder__"] {
            assert!(
                bad.into_endpoint_path().is_err(),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_builder_collects_endpoints() {
        let sched = sched();
        let model = Model::builder(&sched, "ref")
            .driver_hook("adder.add", |args| Some(args["a"].clone()))
            .driver_port("adder__sub")
            .monitor_port(("adder", "sum"))
            .agent_port("logger")
            .build()
            .unwrap();

        assert!(model.driver_port("adder.sub").is_ok());
        assert!(model.monitor_port("adder.sum").is_ok());
        assert!(model.agent_port("logger").is_ok());
        assert!(matches!(
            model.driver_port("adder.add"),
            Err(BenchError::UnknownEndpoint { .. })
        ));
        assert_eq!(model.unmatched().len(), 4);
    }

    #[test]
    fn test_duplicate_endpoint() {
        let sched = sched();
        let result = Model::builder(&sched, "ref")
            .driver_port("adder.add")
            .driver_port("adder__add")
            .build();
        assert!(matches!(result, Err(BenchError::Duplicate { kind: "driver port", .. })));
    }

    #[test]
    fn test_builder_reports_bad_path() {
        let sched = sched();
        let result = Model::builder(&sched, "ref").monitor_port("nodots").build();
        assert!(matches!(result, Err(BenchError::MalformedPath(_))));
    }

    #[test]
    fn test_matched_marks() {
        let sched = sched();
        let model = Model::builder(&sched, "ref")
            .driver_port("a.op")
            .build()
            .unwrap();
        let path: EndpointPath = "a.op".parse().unwrap();

        assert!(model.ensure_all_matched().is_err());
        model.driver_port_endpoint(&path).unwrap().mark_matched();
        assert!(model.ensure_all_matched().is_ok());
        model.clear_matched();
        assert!(matches!(
            model.ensure_all_matched(),
            Err(BenchError::UnmatchedEndpoint { .. })
        ));
    }

    #[test]
    fn test_model_identity() {
        let sched = sched();
        let a = Model::builder(&sched, "same").build().unwrap();
        let b = Model::builder(&sched, "same").build().unwrap();
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }
}
