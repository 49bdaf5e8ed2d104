//! The five sessh session operations
//!
//! Each operation is plain data: a schema, an argument builder and an
//! output shaper. Adding an operation means adding a descriptor here.

use crate::error::{Result, ToolError};
use crate::types::{
    ArgDef, ArgType, ContentBlock, InvocationRequest, InvocationResult, OperationDescriptor,
    ToolArgs,
};
use serde_json::{json, Value};

/// Maximum characters mirrored into the `logs` text block
pub const LOG_TEXT_LIMIT: usize = 8000;

/// Separator keeping the `run` command from being parsed as sessh flags
pub const COMMAND_SEPARATOR: &str = "--";

pub const OPEN: &str = "open";
pub const RUN: &str = "run";
pub const LOGS: &str = "logs";
pub const STATUS: &str = "status";
pub const CLOSE: &str = "close";

/// All operations, in the order they are listed to clients
pub fn all() -> Vec<OperationDescriptor> {
    vec![open(), run(), logs(), status(), close()]
}

pub fn open() -> OperationDescriptor {
    OperationDescriptor {
        name: OPEN,
        description: "Open or ensure a persistent remote tmux session via SSH controlmaster",
        args: session_args_with_port(),
        build_args: |args| with_optional(OPEN, args, "port"),
        shape_output: json_reply,
    }
}

pub fn run() -> OperationDescriptor {
    let mut args = session_args();
    args.push(ArgDef::required("command", ArgType::String, "Command to execute"));

    OperationDescriptor {
        name: RUN,
        description: "Send a command into the persistent tmux session on the remote host",
        args,
        build_args: build_run,
        shape_output: json_reply,
    }
}

pub fn logs() -> OperationDescriptor {
    let mut args = session_args();
    args.push(ArgDef::optional(
        "lines",
        ArgType::Number,
        json!(300),
        "Number of lines to capture (default: 300)",
    ));

    OperationDescriptor {
        name: LOGS,
        description: "Capture recent output from the tmux session",
        args,
        build_args: |args| with_optional(LOGS, args, "lines"),
        shape_output: logs_reply,
    }
}

pub fn status() -> OperationDescriptor {
    OperationDescriptor {
        name: STATUS,
        description: "Check whether the SSH controlmaster and tmux session exist",
        args: session_args_with_port(),
        build_args: |args| with_optional(STATUS, args, "port"),
        shape_output: json_reply,
    }
}

pub fn close() -> OperationDescriptor {
    OperationDescriptor {
        name: CLOSE,
        description: "Kill tmux session and close the controlmaster",
        args: session_args_with_port(),
        build_args: |args| with_optional(CLOSE, args, "port"),
        shape_output: close_reply,
    }
}

fn session_args() -> Vec<ArgDef> {
    vec![
        ArgDef::required("alias", ArgType::String, "Session alias name"),
        ArgDef::required("host", ArgType::String, "SSH host (user@host)"),
    ]
}

fn session_args_with_port() -> Vec<ArgDef> {
    let mut args = session_args();
    args.push(ArgDef::optional(
        "port",
        ArgType::Number,
        json!(22),
        "SSH port (default: 22)",
    ));
    args
}

/// `[verb, alias, host]`
fn session_argv(verb: &str, args: &ToolArgs) -> Result<Vec<String>> {
    Ok(vec![
        verb.to_string(),
        args.string("alias")?.to_string(),
        args.string("host")?.to_string(),
    ])
}

/// `[verb, alias, host, value?]`
fn with_optional(verb: &str, args: &ToolArgs, optional: &str) -> Result<InvocationRequest> {
    let mut argv = session_argv(verb, args)?;
    argv.extend(args.optional_number(optional).token());
    Ok(InvocationRequest::new(argv))
}

/// `[run, alias, host, --, command]`
fn build_run(args: &ToolArgs) -> Result<InvocationRequest> {
    let mut argv = session_argv(RUN, args)?;
    argv.push(COMMAND_SEPARATOR.to_string());
    argv.push(args.string("command")?.to_string());
    Ok(InvocationRequest::new(argv))
}

fn parse_stdout(op: &str, result: &InvocationResult) -> Result<Value> {
    serde_json::from_str(&result.stdout).map_err(|source| ToolError::Parse {
        op: op.to_string(),
        source,
    })
}

fn json_reply(op: &str, result: &InvocationResult) -> Result<Vec<ContentBlock>> {
    Ok(vec![ContentBlock::json(parse_stdout(op, result)?)])
}

fn logs_reply(op: &str, result: &InvocationResult) -> Result<Vec<ContentBlock>> {
    let data = parse_stdout(op, result)?;
    let text = match data.get("output") {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(output)) => tail_chars(output, LOG_TEXT_LIMIT),
        Some(other) => tail_chars(&other.to_string(), LOG_TEXT_LIMIT),
    };

    Ok(vec![ContentBlock::json(data), ContentBlock::text(text)])
}

fn close_reply(op: &str, result: &InvocationResult) -> Result<Vec<ContentBlock>> {
    if result.stdout.is_empty() {
        return Ok(vec![ContentBlock::json(json!({ "ok": true }))]);
    }
    json_reply(op, result)
}

/// Last `limit` characters of `s`
fn tail_chars(s: &str, limit: usize) -> String {
    let count = s.chars().count();
    if count <= limit {
        return s.to_string();
    }
    s.chars().skip(count - limit).collect()
}
