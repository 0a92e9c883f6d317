//! Config flows
//!
//! A config flow is a small wizard an integration implements to create its
//! config entries. The [`FlowManager`] keeps the flows in progress, feeds
//! them user input step by step and persists the entry a flow creates.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use ha_config_entries::{ConfigEntries, ConfigEntriesError, ConfigEntry};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::selector::Selector;

pub const STEP_USER: &str = "user";

/// User input submitted to a step
pub type FlowInput = HashMap<String, Value>;

#[derive(Debug, Error)]
pub enum FlowError {
    /// Ends the flow with an abort result carrying this reason
    #[error("Flow aborted: {0}")]
    Abort(String),

    #[error("Unknown flow: {0}")]
    UnknownFlow(String),

    #[error("No config flow for {0}")]
    UnknownHandler(String),

    #[error("Unknown step: {0}")]
    UnknownStep(String),

    #[error(transparent)]
    ConfigEntries(#[from] ConfigEntriesError),
}

pub type FlowResultT = Result<FlowResult, FlowError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowResultType {
    Form,
    CreateEntry,
    Abort,
}

/// One field of a form
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormField {
    pub name: String,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selector: Option<Selector>,
}

impl FormField {
    pub fn required(name: impl Into<String>, selector: Selector) -> Self {
        Self {
            name: name.into(),
            required: true,
            selector: Some(selector),
        }
    }
}

/// Result of a flow step
#[derive(Debug, Clone, Serialize)]
pub struct FlowResult {
    pub flow_id: String,
    pub handler: String,
    #[serde(rename = "type")]
    pub result_type: FlowResultType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    /// Always present, empty if the step has no form
    pub data_schema: Vec<FormField>,
    /// Errors from the previous submission, keyed by field or `base`;
    /// empty on a fresh form, None for other result types
    pub errors: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Entry data (for create_entry)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<HashMap<String, Value>>,
    /// Created entry id (for create_entry)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

impl FlowResult {
    fn empty(result_type: FlowResultType) -> Self {
        Self {
            flow_id: String::new(),
            handler: String::new(),
            result_type,
            step_id: None,
            data_schema: Vec::new(),
            errors: None,
            title: None,
            reason: None,
            data: None,
            result: None,
        }
    }

    pub fn form(
        step_id: impl Into<String>,
        data_schema: Vec<FormField>,
        errors: HashMap<String, String>,
    ) -> Self {
        Self {
            step_id: Some(step_id.into()),
            data_schema,
            errors: Some(errors),
            ..Self::empty(FlowResultType::Form)
        }
    }

    pub fn create_entry(title: impl Into<String>, data: HashMap<String, Value>) -> Self {
        Self {
            title: Some(title.into()),
            data: Some(data),
            ..Self::empty(FlowResultType::CreateEntry)
        }
    }

    pub fn abort(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::empty(FlowResultType::Abort)
        }
    }
}

/// State a flow keeps besides its own fields
pub struct FlowContext {
    handler: String,
    unique_id: Option<String>,
    config_entries: Arc<ConfigEntries>,
}

impl FlowContext {
    pub fn handler(&self) -> &str {
        &self.handler
    }

    pub fn unique_id(&self) -> Option<&str> {
        self.unique_id.as_deref()
    }

    /// Set the unique id the created entry will carry
    pub fn async_set_unique_id(&mut self, unique_id: impl Into<String>) {
        self.unique_id = Some(unique_id.into());
    }

    /// Abort with `already_configured` if an entry with the unique id exists
    pub fn abort_if_unique_id_configured(&self) -> Result<(), FlowError> {
        let Some(ref unique_id) = self.unique_id else {
            return Ok(());
        };
        if self
            .config_entries
            .get_by_unique_id(&self.handler, unique_id)
            .is_some()
        {
            return Err(FlowError::Abort("already_configured".to_string()));
        }
        Ok(())
    }

    /// Unique ids of this handler's existing entries
    pub fn async_current_ids(&self) -> HashSet<String> {
        self.config_entries
            .get_by_domain(&self.handler)
            .into_iter()
            .filter_map(|entry| entry.unique_id)
            .collect()
    }
}

/// A config flow implemented by an integration
#[async_trait]
pub trait ConfigFlow: Send + Sync {
    /// Schema version of the entries this flow creates
    fn version(&self) -> u32 {
        1
    }

    async fn async_step_user(
        &mut self,
        ctx: &mut FlowContext,
        user_input: Option<FlowInput>,
    ) -> FlowResultT;

    /// Dispatch to the step named `step_id`
    async fn async_step(
        &mut self,
        step_id: &str,
        ctx: &mut FlowContext,
        user_input: Option<FlowInput>,
    ) -> FlowResultT {
        match step_id {
            STEP_USER => self.async_step_user(ctx, user_input).await,
            other => Err(FlowError::UnknownStep(other.to_string())),
        }
    }
}

pub type FlowFactory = Arc<dyn Fn() -> Box<dyn ConfigFlow> + Send + Sync>;

struct ActiveFlow {
    handler: String,
    step_id: String,
    flow: Box<dyn ConfigFlow>,
    context: FlowContext,
}

/// Runs config flows and persists the entries they create
pub struct FlowManager {
    config_entries: Arc<ConfigEntries>,
    handlers: DashMap<String, FlowFactory>,
    flows: DashMap<String, ActiveFlow>,
}

impl FlowManager {
    pub fn new(config_entries: Arc<ConfigEntries>) -> Self {
        Self {
            config_entries,
            handlers: DashMap::new(),
            flows: DashMap::new(),
        }
    }

    pub fn register_handler(&self, domain: &str, factory: FlowFactory) {
        self.handlers.insert(domain.to_string(), factory);
        debug!("Registered config flow for domain: {}", domain);
    }

    /// Start a flow for `handler` at its user step
    pub async fn async_init(&self, handler: &str) -> FlowResultT {
        let factory = self
            .handlers
            .get(handler)
            .map(|f| f.clone())
            .ok_or_else(|| FlowError::UnknownHandler(handler.to_string()))?;

        let flow_id = ulid::Ulid::new().to_string().to_lowercase();
        info!("Starting config flow for {} with flow_id {}", handler, flow_id);

        let active = ActiveFlow {
            handler: handler.to_string(),
            step_id: STEP_USER.to_string(),
            flow: factory(),
            context: FlowContext {
                handler: handler.to_string(),
                unique_id: None,
                config_entries: self.config_entries.clone(),
            },
        };
        self.run_step(flow_id, active, None).await
    }

    /// Submit user input to the current step of a flow
    pub async fn async_configure(&self, flow_id: &str, user_input: FlowInput) -> FlowResultT {
        // The flow leaves the map while its step runs; a concurrent
        // submission for the same flow sees it as unknown
        let (flow_id, active) = self
            .flows
            .remove(flow_id)
            .ok_or_else(|| FlowError::UnknownFlow(flow_id.to_string()))?;
        self.run_step(flow_id, active, Some(user_input)).await
    }

    async fn run_step(
        &self,
        flow_id: String,
        mut active: ActiveFlow,
        user_input: Option<FlowInput>,
    ) -> FlowResultT {
        let step_id = active.step_id.clone();
        debug!("Running step {} of flow {} ({})", step_id, flow_id, active.handler);

        let result = active
            .flow
            .async_step(&step_id, &mut active.context, user_input)
            .await;

        let mut result = match result {
            Ok(result) => result,
            Err(FlowError::Abort(reason)) => FlowResult::abort(reason),
            Err(err) => {
                warn!("Config flow {} failed: {}", flow_id, err);
                return Err(err);
            }
        };
        result.flow_id = flow_id.clone();
        result.handler = active.handler.clone();

        match result.result_type {
            FlowResultType::Form => {
                if let Some(ref next) = result.step_id {
                    active.step_id = next.clone();
                }
                self.flows.insert(flow_id, active);
                Ok(result)
            }
            FlowResultType::Abort => {
                debug!("Flow {} aborted: {:?}", flow_id, result.reason);
                Ok(result)
            }
            FlowResultType::CreateEntry => self.create_entry(active, result).await,
        }
    }

    async fn create_entry(&self, active: ActiveFlow, mut result: FlowResult) -> FlowResultT {
        let mut entry = ConfigEntry::new(&active.handler, result.title.clone().unwrap_or_default())
            .with_data(result.data.clone().unwrap_or_default());
        entry.version = active.flow.version();
        if let Some(unique_id) = active.context.unique_id {
            entry = entry.with_unique_id(unique_id);
        }

        let entry = match self.config_entries.add(entry).await {
            Ok(entry) => entry,
            Err(ConfigEntriesError::AlreadyExists { .. }) => {
                let mut abort = FlowResult::abort("already_configured");
                abort.flow_id = result.flow_id;
                abort.handler = result.handler;
                return Ok(abort);
            }
            Err(err) => return Err(err.into()),
        };

        // A failed setup leaves the entry in place, in an error or retry state
        if let Err(err) = self.config_entries.setup(&entry.entry_id).await {
            warn!("Setup of new entry {} failed: {}", entry.entry_id, err);
        }

        result.result = Some(entry.entry_id);
        Ok(result)
    }

    /// Drop a flow that is waiting for input
    pub fn async_abort(&self, flow_id: &str) -> Result<(), FlowError> {
        let (_, flow) = self
            .flows
            .remove(flow_id)
            .ok_or_else(|| FlowError::UnknownFlow(flow_id.to_string()))?;
        debug!("Aborted flow {} ({})", flow_id, flow.handler);
        Ok(())
    }

    /// Flows in progress as `{flow_id, handler, step_id}`
    pub fn async_progress(&self) -> Vec<Value> {
        self.flows
            .iter()
            .map(|flow| {
                serde_json::json!({
                    "flow_id": flow.key(),
                    "handler": flow.handler,
                    "step_id": flow.step_id,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ha_registries::Storage;
    use serde_json::json;
    use tempfile::TempDir;

    /// Asks for a name, refuses "bad", creates an entry otherwise
    struct NameFlow;

    #[async_trait]
    impl ConfigFlow for NameFlow {
        async fn async_step_user(
            &mut self,
            ctx: &mut FlowContext,
            user_input: Option<FlowInput>,
        ) -> FlowResultT {
            let mut errors = HashMap::new();
            if let Some(input) = user_input {
                let name = input["name"].as_str().unwrap_or_default().to_string();
                ctx.async_set_unique_id(&name);
                ctx.abort_if_unique_id_configured()?;
                if name == "bad" {
                    errors.insert("base".to_string(), "invalid".to_string());
                } else {
                    return Ok(FlowResult::create_entry(
                        name.clone(),
                        HashMap::from([("name".to_string(), json!(name))]),
                    ));
                }
            }
            Ok(FlowResult::form(STEP_USER, Vec::new(), errors))
        }
    }

    fn manager() -> (TempDir, Arc<ConfigEntries>, FlowManager) {
        let dir = TempDir::new().unwrap();
        let entries = Arc::new(ConfigEntries::new(Arc::new(Storage::new(dir.path()))));
        let flows = FlowManager::new(entries.clone());
        flows.register_handler("test", Arc::new(|| Box::new(NameFlow) as Box<dyn ConfigFlow>));
        (dir, entries, flows)
    }

    fn input(name: &str) -> FlowInput {
        HashMap::from([("name".to_string(), json!(name))])
    }

    #[tokio::test]
    async fn test_form_then_create_entry() {
        let (_dir, entries, flows) = manager();

        let form = flows.async_init("test").await.unwrap();
        assert_eq!(form.result_type, FlowResultType::Form);
        assert_eq!(form.errors, Some(HashMap::new()));
        assert_eq!(flows.async_progress().len(), 1);

        let retry = flows.async_configure(&form.flow_id, input("bad")).await.unwrap();
        assert_eq!(retry.result_type, FlowResultType::Form);
        assert_eq!(retry.errors.unwrap()["base"], "invalid");

        let created = flows.async_configure(&form.flow_id, input("good")).await.unwrap();
        assert_eq!(created.result_type, FlowResultType::CreateEntry);
        assert_eq!(created.title.as_deref(), Some("good"));

        let entry = entries.get(created.result.as_deref().unwrap()).unwrap();
        assert_eq!(entry.unique_id.as_deref(), Some("good"));
        assert!(entry.is_loaded());
        assert!(flows.async_progress().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_aborts() {
        let (_dir, _entries, flows) = manager();

        let first = flows.async_init("test").await.unwrap();
        flows.async_configure(&first.flow_id, input("dup")).await.unwrap();

        let second = flows.async_init("test").await.unwrap();
        let result = flows.async_configure(&second.flow_id, input("dup")).await.unwrap();
        assert_eq!(result.result_type, FlowResultType::Abort);
        assert_eq!(result.reason.as_deref(), Some("already_configured"));
    }

    #[tokio::test]
    async fn test_abort_abandoned_flow() {
        let (_dir, _entries, flows) = manager();

        let form = flows.async_init("test").await.unwrap();
        assert!(flows.async_abort(&form.flow_id).is_ok());
        assert!(flows.async_progress().is_empty());

        assert!(matches!(
            flows.async_configure(&form.flow_id, input("good")).await,
            Err(FlowError::UnknownFlow(_))
        ));
        assert!(matches!(
            flows.async_abort(&form.flow_id),
            Err(FlowError::UnknownFlow(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_flow_and_handler() {
        let (_dir, _entries, flows) = manager();

        assert!(matches!(
            flows.async_init("nope").await,
            Err(FlowError::UnknownHandler(_))
        ));
        assert!(matches!(
            flows.async_configure("missing", input("x")).await,
            Err(FlowError::UnknownFlow(_))
        ));
    }

    #[test]
    fn test_flow_result_serialization() {
        let result = FlowResult::abort("no_station_list");
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["type"], "abort");
        assert_eq!(value["reason"], "no_station_list");
        assert_eq!(value["data_schema"], json!([]));
    }
}
