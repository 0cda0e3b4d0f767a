//! Control channel message types.

use std::fmt;

use osmon_core::ProcessSnapshot;
use serde::{Deserialize, Serialize};

/// Status string of a task with an attached process.
pub const STATUS_RUNNING: &str = "running";

/// Status string of a task without an attached process.
pub const STATUS_NOT_RUNNING: &str = "not running/initialized";

/// Actions understood by the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Report the daemon and all tasks
    Status,
    /// Stop supervising and exit
    Stop,
    /// Stop all tasks, reload configuration and start again
    Restart,
    /// Reload configuration without stopping running tasks
    Reload,
}

impl Action {
    /// All actions, in the order they are documented.
    pub const ALL: [Action; 4] = [Action::Status, Action::Stop, Action::Restart, Action::Reload];

    /// Returns the wire name of the action.
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Status => "status",
            Action::Stop => "stop",
            Action::Restart => "restart",
            Action::Reload => "reload",
        }
    }

    /// Parses a wire name.
    ///
    /// `shutdown` is accepted as an alias of `stop`. Returns `None` for
    /// anything else so the caller can answer with a failure response.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "status" => Some(Action::Status),
            "stop" | "shutdown" => Some(Action::Stop),
            "restart" => Some(Action::Restart),
            "reload" => Some(Action::Reload),
            _ => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request sent by a control client.
///
/// The action stays a plain string on the wire so an unknown action can
/// still be decoded and answered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlRequest {
    /// Requested action name
    pub action: String,

    /// Optional action parameters
    #[serde(default)]
    pub parameters: Option<serde_json::Map<String, serde_json::Value>>,
}

impl ControlRequest {
    /// Creates a request for a known action without parameters.
    pub fn new(action: Action) -> Self {
        Self {
            action: action.as_str().to_string(),
            parameters: None,
        }
    }

    /// Creates a request with an arbitrary action name.
    pub fn raw(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            parameters: None,
        }
    }

    /// Adds a parameter to the request.
    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters
            .get_or_insert_with(serde_json::Map::new)
            .insert(key.into(), value);
        self
    }

    /// Returns the parsed action, if known.
    pub fn action(&self) -> Option<Action> {
        Action::parse(&self.action)
    }
}

/// Status of one supervised task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskProcessInfo {
    /// Task name
    pub name: String,

    /// Configured pidfile (empty when none)
    #[serde(default, alias = "pid")]
    pub pidfile: String,

    /// `running` or `not running/initialized`
    #[serde(default)]
    pub status: String,

    /// Process sample, present while a process is attached
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process: Option<ProcessSnapshot>,
}

impl TaskProcessInfo {
    /// Returns true if the task reported an attached process.
    pub fn is_running(&self) -> bool {
        self.status == STATUS_RUNNING
    }
}

/// Response sent by the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlResponse {
    /// Whether the request succeeded
    pub status: bool,

    /// Human readable message
    #[serde(default)]
    pub message: String,

    /// Resource usage of the daemon itself
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub osmon: Option<ProcessSnapshot>,

    /// Per-task status, in configuration order
    #[serde(default)]
    pub parameters: Vec<TaskProcessInfo>,
}

impl ControlResponse {
    /// Creates a success response.
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status: true,
            message: message.into(),
            osmon: None,
            parameters: Vec::new(),
        }
    }

    /// Creates a failure response.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            status: false,
            message: message.into(),
            osmon: None,
            parameters: Vec::new(),
        }
    }

    /// Creates a status report.
    pub fn status_report(osmon: Option<ProcessSnapshot>, parameters: Vec<TaskProcessInfo>) -> Self {
        Self {
            status: true,
            message: String::new(),
            osmon,
            parameters,
        }
    }
}
