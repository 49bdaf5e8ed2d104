//! Operation table and call dispatch

use crate::error::{Result, ToolError};
use crate::executor::{ensure_ok, CommandRunner};
use crate::operations;
use crate::types::{ContentBlock, OperationDescriptor};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Fixed, read-only table of operations keyed by name
#[derive(Debug, Clone)]
pub struct OperationRegistry {
    operations: HashMap<&'static str, OperationDescriptor>,
    order: Vec<&'static str>,
}

impl OperationRegistry {
    /// Registry holding the five sessh operations
    pub fn sessh() -> Self {
        Self::with_operations(operations::all())
    }

    /// Create a registry with the given operations, listed in the given order.
    ///
    /// A later descriptor with a duplicate name replaces the earlier one.
    pub fn with_operations(descriptors: Vec<OperationDescriptor>) -> Self {
        let mut operations = HashMap::new();
        let mut order = Vec::new();
        for descriptor in descriptors {
            let name = descriptor.name;
            if operations.insert(name, descriptor).is_none() {
                order.push(name);
            }
        }
        Self { operations, order }
    }

    pub fn get(&self, name: &str) -> Option<&OperationDescriptor> {
        self.operations.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.operations.contains_key(name)
    }

    /// All operations in listing order
    pub fn list(&self) -> Vec<&OperationDescriptor> {
        self.order
            .iter()
            .filter_map(|name| self.operations.get(name))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

impl Default for OperationRegistry {
    fn default() -> Self {
        Self::sessh()
    }
}

/// Runs a named operation end to end: validate, build, invoke, check, shape.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<OperationRegistry>,
    runner: Arc<dyn CommandRunner>,
}

impl Dispatcher {
    pub fn new(registry: OperationRegistry, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            registry: Arc::new(registry),
            runner,
        }
    }

    pub fn registry(&self) -> &OperationRegistry {
        &self.registry
    }

    pub async fn call(
        &self,
        name: &str,
        arguments: Value,
        cancel: &CancellationToken,
    ) -> Result<Vec<ContentBlock>> {
        let op = self
            .registry
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;

        let args = op.validate(arguments)?;
        let request = (op.build_args)(&args)?;
        debug!(tool = op.name, args = ?request.args(), "Invoking sessh");

        let result = self.runner.invoke(&request, cancel).await;
        info!(
            tool = op.name,
            exit_code = result.exit_code,
            termination = ?result.termination,
            stdout_len = result.stdout.len(),
            "sessh finished"
        );

        if let Err(e) = ensure_ok(op.name, &result) {
            warn!(tool = op.name, error = %e, "sessh invocation failed");
            return Err(e);
        }

        (op.shape_output)(op.name, &result)
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{InvocationRequest, InvocationResult};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Returns a canned result and records every argument vector
    struct RecordingRunner {
        result: InvocationResult,
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl RecordingRunner {
        fn new(result: InvocationResult) -> Arc<Self> {
            Arc::new(Self {
                result,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<Vec<String>> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CommandRunner for RecordingRunner {
        async fn invoke(&self, request: &InvocationRequest, _cancel: &CancellationToken) -> InvocationResult {
            self.calls.lock().unwrap().push(request.args().to_vec());
            self.result.clone()
        }
    }

    fn dispatcher(runner: Arc<RecordingRunner>) -> Dispatcher {
        Dispatcher::new(OperationRegistry::sessh(), runner)
    }

    #[test]
    fn test_registry_lists_in_order() {
        let registry = OperationRegistry::sessh();
        let names: Vec<_> = registry.list().iter().map(|op| op.name).collect();
        assert_eq!(names, vec!["open", "run", "logs", "status", "close"]);
        assert_eq!(registry.len(), 5);
        assert!(registry.contains("logs"));
        assert!(!registry.contains("exec"));
    }

    #[test]
    fn test_duplicate_descriptor_replaces() {
        let registry = OperationRegistry::with_operations(vec![
            operations::open(),
            operations::open(),
        ]);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.list().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let runner = RecordingRunner::new(InvocationResult::exited(0, "{}", ""));
        let err = dispatcher(runner.clone())
            .call("exec", json!({}), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_schema_error_never_reaches_sessh() {
        let runner = RecordingRunner::new(InvocationResult::exited(0, "{}", ""));
        let err = dispatcher(runner.clone())
            .call("open", json!({"alias": "dev"}), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_client_error());
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_status_is_not_cached() {
        let runner = RecordingRunner::new(InvocationResult::exited(0, r#"{"alive":true}"#, ""));
        let dispatcher = dispatcher(runner.clone());
        let args = json!({"alias": "dev", "host": "me@box"});

        let first = dispatcher.call("status", args.clone(), &CancellationToken::new()).await.unwrap();
        let second = dispatcher.call("status", args, &CancellationToken::new()).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(
            runner.calls(),
            vec![
                vec!["status".to_string(), "dev".into(), "me@box".into()],
                vec!["status".to_string(), "dev".into(), "me@box".into()],
            ]
        );
    }

    #[tokio::test]
    async fn test_failure_message_from_stderr() {
        let runner = RecordingRunner::new(InvocationResult::exited(2, "", "tmux: no server running"));
        let err = dispatcher(runner)
            .call("status", json!({"alias": "a", "host": "h"}), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "tmux: no server running");
    }

    #[tokio::test]
    async fn test_failure_message_synthesized() {
        let runner = RecordingRunner::new(InvocationResult::exited(2, "", ""));
        let err = dispatcher(runner)
            .call("open", json!({"alias": "a", "host": "h"}), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "sessh open failed with 2");
    }

    #[tokio::test]
    async fn test_nonzero_exit_with_json_is_returned() {
        let runner = RecordingRunner::new(InvocationResult::exited(1, r#"{"ok":false,"partial":true}"#, "warn"));
        let blocks = dispatcher(runner)
            .call("run", json!({"alias": "a", "host": "h", "command": "ls"}), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(blocks, vec![ContentBlock::json(json!({"ok": false, "partial": true}))]);
    }

    #[tokio::test]
    async fn test_malformed_stdout_is_parse_error() {
        let runner = RecordingRunner::new(InvocationResult::exited(0, "not json", ""));
        let err = dispatcher(runner)
            .call("status", json!({"alias": "a", "host": "h"}), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Parse { .. }));
    }

    #[tokio::test]
    async fn test_close_with_empty_stdout() {
        let runner = RecordingRunner::new(InvocationResult::exited(0, "", ""));
        let blocks = dispatcher(runner)
            .call("close", json!({"alias": "a", "host": "h", "port": 2200}), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(blocks, vec![ContentBlock::json(json!({"ok": true}))]);
    }
}
