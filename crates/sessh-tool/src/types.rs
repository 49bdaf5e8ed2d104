//! Core types for operation schemas, invocations and replies

use crate::error::{Result, ToolError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Number, Value};

/// Definition of an argument for an operation
#[derive(Debug, Clone, PartialEq)]
pub struct ArgDef {
    pub name: String,
    pub arg_type: ArgType,
    pub required: bool,
    /// Advertised in the schema only; never sent to sessh on the caller's behalf
    pub default: Option<Value>,
    pub description: Option<String>,
}

impl ArgDef {
    pub fn required(name: &str, arg_type: ArgType, description: &str) -> Self {
        Self {
            name: name.to_string(),
            arg_type,
            required: true,
            default: None,
            description: Some(description.to_string()),
        }
    }

    pub fn optional(name: &str, arg_type: ArgType, default: Value, description: &str) -> Self {
        Self {
            name: name.to_string(),
            arg_type,
            required: false,
            default: Some(default),
            description: Some(description.to_string()),
        }
    }
}

/// Type of argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgType {
    String,
    Number,
}

impl std::fmt::Display for ArgType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArgType::String => write!(f, "string"),
            ArgType::Number => write!(f, "number"),
        }
    }
}

impl ArgType {
    /// Check if a JSON value matches this type
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ArgType::String => value.is_string(),
            ArgType::Number => value.is_number(),
        }
    }
}

/// Builds the sessh argument vector from validated arguments
pub type ArgBuilder = fn(&ToolArgs) -> Result<InvocationRequest>;

/// Turns a validated sessh result into reply content
pub type OutputShaper = fn(&str, &InvocationResult) -> Result<Vec<ContentBlock>>;

/// One callable tool: its schema plus how it talks to sessh.
#[derive(Clone)]
pub struct OperationDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub args: Vec<ArgDef>,
    pub build_args: ArgBuilder,
    pub shape_output: OutputShaper,
}

impl std::fmt::Debug for OperationDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationDescriptor")
            .field("name", &self.name)
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}

impl OperationDescriptor {
    /// JSON Schema advertised for this operation's input
    pub fn input_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();

        for arg in &self.args {
            let mut property = Map::new();
            property.insert("type".to_string(), json!(arg.arg_type.to_string()));
            if let Some(description) = &arg.description {
                property.insert("description".to_string(), json!(description));
            }
            if let Some(default) = &arg.default {
                property.insert("default".to_string(), default.clone());
            }
            properties.insert(arg.name.clone(), Value::Object(property));

            if arg.required {
                required.push(json!(arg.name));
            }
        }

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Check `arguments` against the declared schema.
    pub fn validate(&self, arguments: Value) -> Result<ToolArgs> {
        let values = match arguments {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(ToolError::InvalidArgument(format!(
                    "arguments for '{}' must be an object, got {}",
                    self.name, other
                )))
            }
        };

        for arg_def in &self.args {
            let value = values.get(&arg_def.name).filter(|v| !v.is_null());

            if arg_def.required && value.is_none() {
                return Err(ToolError::MissingArgument(arg_def.name.clone()));
            }

            if let Some(value) = value {
                if !arg_def.arg_type.matches(value) {
                    return Err(ToolError::TypeMismatch {
                        name: arg_def.name.clone(),
                        expected: arg_def.arg_type.to_string(),
                        actual: value.to_string(),
                    });
                }
            }
        }

        Ok(ToolArgs { values })
    }
}

/// Arguments that passed schema validation
#[derive(Debug, Clone, Default)]
pub struct ToolArgs {
    values: Map<String, Value>,
}

impl ToolArgs {
    pub fn string(&self, name: &str) -> Result<&str> {
        self.values
            .get(name)
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::MissingArgument(name.to_string()))
    }

    pub fn optional_number(&self, name: &str) -> OptionalArg {
        match self.values.get(name) {
            Some(Value::Number(n)) => OptionalArg::Present(n.clone()),
            _ => OptionalArg::Absent,
        }
    }
}

/// An optional numeric argument as the caller sent it.
///
/// An omitted value emits no token and sessh applies its own default.
#[derive(Debug, Clone, PartialEq)]
pub enum OptionalArg {
    Absent,
    Present(Number),
}

impl OptionalArg {
    /// Argument token for sessh, if one should be sent.
    ///
    /// Zero is treated like an absent value.
    pub fn token(&self) -> Option<String> {
        let OptionalArg::Present(n) = self else {
            return None;
        };

        if let Some(u) = n.as_u64() {
            return (u != 0).then(|| u.to_string());
        }
        if let Some(i) = n.as_i64() {
            return (i != 0).then(|| i.to_string());
        }

        let f = n.as_f64()?;
        if f == 0.0 || f.is_nan() {
            None
        } else if f.fract() == 0.0 && f.abs() < 1e15 {
            Some(format!("{}", f as i64))
        } else {
            Some(f.to_string())
        }
    }
}

/// One sessh invocation: argument vector plus optional stdin payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationRequest {
    args: Vec<String>,
    input: Option<String>,
}

impl InvocationRequest {
    pub fn new(args: Vec<String>) -> Self {
        Self { args, input: None }
    }

    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn input(&self) -> Option<&str> {
        self.input.as_deref()
    }
}

/// How the sessh child process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Exited(i32),
    /// Killed by a signal; reported as exit code `128 + signal`
    Signaled(i32),
    /// The executable could not be started at all
    SpawnFailed,
    Cancelled,
    TimedOut { after_ms: u64 },
}

/// Exit code used for children killed by us (128 + SIGKILL)
pub const KILLED_EXIT_CODE: i32 = 137;

/// Captured outcome of one sessh invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub termination: Termination,
}

impl InvocationResult {
    pub fn exited(code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: code,
            stdout: stdout.into().trim().to_string(),
            stderr: stderr.into().trim().to_string(),
            termination: Termination::Exited(code),
        }
    }

    pub fn signaled(signal: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: 128 + signal,
            stdout: stdout.into().trim().to_string(),
            stderr: stderr.into().trim().to_string(),
            termination: Termination::Signaled(signal),
        }
    }

    /// Spawn errors share the ordinary result shape so validation stays uniform.
    pub fn spawn_failed(program: &str, error: &std::io::Error) -> Self {
        let exit_code = match error.kind() {
            std::io::ErrorKind::NotFound => 127,
            std::io::ErrorKind::PermissionDenied => 126,
            _ => 1,
        };
        Self {
            exit_code,
            stdout: String::new(),
            stderr: format!("failed to spawn {}: {}", program, error),
            termination: Termination::SpawnFailed,
        }
    }

    pub fn cancelled() -> Self {
        Self {
            exit_code: KILLED_EXIT_CODE,
            stdout: String::new(),
            stderr: String::new(),
            termination: Termination::Cancelled,
        }
    }

    pub fn timed_out(after_ms: u64) -> Self {
        Self {
            exit_code: KILLED_EXIT_CODE,
            stdout: String::new(),
            stderr: String::new(),
            termination: Termination::TimedOut { after_ms },
        }
    }
}

/// Typed content block returned to the caller
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Json { data: Value },
    Text { text: String },
}

impl ContentBlock {
    pub fn json(data: Value) -> Self {
        Self::Json { data }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}
