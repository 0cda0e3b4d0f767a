//! The set of task monitors built from one configuration.
//!
//! Fan-out operations visit monitors in configuration order and isolate
//! failures: an error from one task is logged and the next task is still
//! visited.

use std::sync::Arc;

use osmon_core::{Configuration, ProcessSnapshot};
use osmon_protocol::TaskProcessInfo;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::monitor::{create_monitor, RestartScheduler, StartupTiming, TaskMonitor};
use crate::process::{ProcessError, ProcessSampler};

/// Outcome of one fan-out over all monitors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOutResult {
    pub succeeded: u32,
    pub failed: u32,
}

/// Ordered collection of task monitors.
pub struct ProcessRegistry {
    monitors: Vec<Arc<dyn TaskMonitor>>,
    own_sampler: Mutex<ProcessSampler>,
}

impl ProcessRegistry {
    /// Builds one monitor per configured task.
    pub fn from_config(
        config: &Configuration,
        timing: StartupTiming,
        restarts: &RestartScheduler,
    ) -> Self {
        let monitors = config
            .processes
            .iter()
            .cloned()
            .map(|task| create_monitor(task, timing, restarts.clone()))
            .collect();
        Self::with_monitors(monitors)
    }

    /// Builds a registry from ready-made monitors.
    pub fn with_monitors(monitors: Vec<Arc<dyn TaskMonitor>>) -> Self {
        Self {
            monitors,
            own_sampler: Mutex::new(ProcessSampler::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.monitors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.monitors.is_empty()
    }

    pub fn monitors(&self) -> &[Arc<dyn TaskMonitor>] {
        &self.monitors
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn TaskMonitor>> {
        self.monitors.iter().find(|m| m.name() == name)
    }

    pub async fn start_all(&self) -> FanOutResult {
        let mut result = FanOutResult::default();
        for monitor in &self.monitors {
            match monitor.start().await {
                Ok(()) => result.succeeded += 1,
                Err(e) => {
                    error!(task = %monitor.name(), error = %e, "Failed to start task");
                    result.failed += 1;
                }
            }
        }
        info!(
            started = result.succeeded,
            failed = result.failed,
            "Started tasks"
        );
        result
    }

    pub async fn monitor_all(&self) -> FanOutResult {
        let mut result = FanOutResult::default();
        for monitor in &self.monitors {
            match monitor.monitor().await {
                Ok(()) => result.succeeded += 1,
                Err(e) => {
                    error!(task = %monitor.name(), error = %e, "Failed to monitor task");
                    result.failed += 1;
                }
            }
        }
        debug!(
            monitored = result.succeeded,
            failed = result.failed,
            "Monitor cycle complete"
        );
        result
    }

    pub async fn stop_all(&self) -> FanOutResult {
        let mut result = FanOutResult::default();
        for monitor in &self.monitors {
            match monitor.stop().await {
                Ok(()) => result.succeeded += 1,
                Err(e) => {
                    error!(task = %monitor.name(), error = %e, "Failed to stop task");
                    result.failed += 1;
                }
            }
        }
        info!(
            stopped = result.succeeded,
            failed = result.failed,
            "Stopped tasks"
        );
        result
    }

    /// Status of every task, in configuration order.
    pub fn describe_all(&self) -> Vec<TaskProcessInfo> {
        self.monitors.iter().map(|m| m.describe()).collect()
    }

    /// Samples the daemon's own process.
    pub async fn self_snapshot(&self) -> Result<ProcessSnapshot, ProcessError> {
        let pid = std::process::id();
        self.own_sampler
            .lock()
            .await
            .sample(pid)
            .ok_or(ProcessError::NoSuchProcess(pid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::{MonitorError, MonitorState};
    use async_trait::async_trait;
    use osmon_core::TaskDescriptor;
    use osmon_protocol::STATUS_NOT_RUNNING;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Monitor that records calls and optionally fails every operation.
    struct FakeMonitor {
        name: String,
        fail: bool,
        calls: AtomicU32,
    }

    impl FakeMonitor {
        fn new(name: &str, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                fail,
                calls: AtomicU32::new(0),
            })
        }

        fn outcome(&self) -> Result<(), MonitorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(MonitorError::Transient {
                    task: self.name.clone(),
                    reason: "boom".into(),
                })
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl TaskMonitor for FakeMonitor {
        fn name(&self) -> &str {
            &self.name
        }
        async fn start(&self) -> Result<(), MonitorError> {
            self.outcome()
        }
        async fn monitor(&self) -> Result<(), MonitorError> {
            self.outcome()
        }
        async fn stop(&self) -> Result<(), MonitorError> {
            self.outcome()
        }
        fn describe(&self) -> TaskProcessInfo {
            TaskProcessInfo {
                name: self.name.clone(),
                pidfile: String::new(),
                status: STATUS_NOT_RUNNING.to_string(),
                process: None,
            }
        }
        fn state(&self) -> MonitorState {
            MonitorState::Unstarted
        }
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let a = FakeMonitor::new("a", false);
        let b = FakeMonitor::new("b", true);
        let c = FakeMonitor::new("c", false);
        let monitors: Vec<Arc<dyn TaskMonitor>> = vec![
            a.clone() as Arc<dyn TaskMonitor>,
            b.clone() as Arc<dyn TaskMonitor>,
            c.clone() as Arc<dyn TaskMonitor>,
        ];
        let registry = ProcessRegistry::with_monitors(monitors);

        let result = registry.start_all().await;
        assert_eq!(result, FanOutResult { succeeded: 2, failed: 1 });

        registry.monitor_all().await;
        registry.stop_all().await;

        for monitor in [&a, &b, &c] {
            assert_eq!(monitor.calls.load(Ordering::SeqCst), 3);
        }
    }

    #[test]
    fn test_describe_all_in_config_order() {
        let registry = ProcessRegistry::with_monitors(
            ["zeta", "alpha", "mid"]
                .into_iter()
                .map(|name| FakeMonitor::new(name, false) as Arc<dyn TaskMonitor>)
                .collect(),
        );

        let names: Vec<_> = registry
            .describe_all()
            .into_iter()
            .map(|info| info.name)
            .collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_from_config() {
        let mut config = Configuration::default();
        config.processes = vec![
            TaskDescriptor::new("one", "/bin/sleep"),
            TaskDescriptor::new("two", "/bin/sleep"),
        ];

        let registry = ProcessRegistry::from_config(
            &config,
            StartupTiming::default(),
            &RestartScheduler::new(),
        );
        assert_eq!(registry.len(), 2);
        assert!(registry.get("two").is_some());
        assert!(registry.get("three").is_none());
    }

    #[tokio::test]
    async fn test_self_snapshot() {
        let registry = ProcessRegistry::with_monitors(Vec::new());
        let snapshot = registry.self_snapshot().await.unwrap();
        assert_eq!(snapshot.pid, std::process::id());
    }
}
