use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, tick, Receiver, Sender};
use log::{error, info};
use parking_lot::Mutex;

use crate::delivery::{Delivery, LiveEnd, LiveView};
use crate::error::{ExitError, LaunchError};
use crate::manager::task_registry::TaskRegistry;
use crate::models::message::{Button, Conversation, SendOptions};
use crate::models::task::TaskId;
use crate::worker::capture::{start_capture, ProcessControl};

pub const STOP_CALLBACK_PREFIX: &str = "stop:";

/// Runs commands on behalf of the operator and streams their output back.
pub struct Orchestrator {
    registry: Arc<TaskRegistry>,
    delivery: Arc<Delivery>,
    refresh_interval: Duration,
    shutdown_tx: Mutex<Option<Sender<()>>>,
    shutdown_rx: Receiver<()>,
}

/// A launched task. Dropping it detaches; `wait` blocks until its output was finalized.
pub struct TaskHandle {
    id: TaskId,
    finalizer: JoinHandle<()>,
}

impl TaskHandle {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn wait(self) {
        if self.finalizer.join().is_err() {
            error!("finalizer of task '{}' panicked", self.id);
        }
    }
}

impl Orchestrator {
    pub fn new(registry: Arc<TaskRegistry>, delivery: Arc<Delivery>, refresh_interval: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = bounded(0);
        Orchestrator {
            registry,
            delivery,
            refresh_interval,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            shutdown_rx,
        }
    }

    pub fn delivery(&self) -> &Arc<Delivery> {
        &self.delivery
    }

    /// Runs `command_text` through `shell -c`.
    pub fn launch_shell(&self, conversation: Conversation, shell: &str, command_text: &str) -> Result<TaskHandle, LaunchError> {
        let command_text = command_text.trim();
        if command_text.is_empty() {
            return Err(LaunchError::EmptyCommand);
        }
        self.launch(
            conversation,
            &format!("{} {}", shell, command_text),
            shell,
            &["-c", command_text],
        )
    }

    /// Registers a task, starts `program`, and keeps a live message of its output
    /// in `conversation` until it exits.
    pub fn launch(
        &self,
        conversation: Conversation,
        label: &str,
        program: &str,
        args: &[&str],
    ) -> Result<TaskHandle, LaunchError> {
        if label.trim().is_empty() || program.trim().is_empty() {
            return Err(LaunchError::EmptyCommand);
        }

        let control = ProcessControl::new();
        let key = self
            .registry
            .add(label.to_string(), Box::new(control.clone()))?;
        let id = key.id;

        let capture = start_capture(program, args, control.clone());

        // The registry entry goes away as soon as the process is done, before any
        // final message is sent.
        let (finished_tx, finished_rx) = bounded(1);
        let registry = Arc::clone(&self.registry);
        let done = capture.done;
        thread::spawn(move || {
            let outcome = done.recv().unwrap_or_else(|_| {
                Err(ExitError::Wait(std::io::Error::other("done signal lost")))
            });
            registry.release(key);
            let _ = finished_tx.send(outcome);
        });

        let view = task_view(conversation, id);
        let delivery = Arc::clone(&self.delivery);
        let registry = Arc::clone(&self.registry);
        let output = capture.output;
        let interval = self.refresh_interval;
        let shutdown = self.shutdown_rx.clone();
        let finalizer = thread::spawn(move || {
            let ticks = tick(interval);
            match delivery.live_update(&view, &output, &ticks, &finished_rx, &shutdown) {
                LiveEnd::Finished(Ok(())) => info!("Task '{}' finished.", id),
                LiveEnd::Finished(Err(e)) => info!("Task '{}' failed: {}", id, e),
                LiveEnd::Cancelled => {
                    control.kill();
                    registry.release(key);
                    info!("Task '{}' abandoned on shutdown.", id);
                }
            }
        });

        Ok(TaskHandle { id, finalizer })
    }

    /// Requests termination of a running task. False if no such task is live.
    pub fn cancel_task(&self, id: TaskId) -> bool {
        self.registry.cancel(id)
    }

    /// `[id]: label` lines of the running tasks, by id.
    pub fn list_tasks(&self) -> Vec<String> {
        let mut tasks = self.registry.list();
        tasks.sort_by_key(|task| task.id);
        tasks.iter().map(ToString::to_string).collect()
    }

    /// Ends every live update and kills every running task.
    pub fn shutdown(&self) {
        drop(self.shutdown_tx.lock().take());
        let cancelled = self.registry.cancel_all();
        info!("shutdown: cancelled {} running task(s)", cancelled);
    }
}

fn task_view(conversation: Conversation, id: TaskId) -> LiveView {
    let final_options = SendOptions::html()
        .reply_to(conversation.reply_to)
        .quiet();
    LiveView {
        chat: conversation.chat,
        prefix: "<pre>".to_string(),
        suffix: "</pre>".to_string(),
        live_options: final_options.clone().with_button(Button::new(
            "🚷Stop the task",
            format!("{}{}", STOP_CALLBACK_PREFIX, id),
        )),
        final_options,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::recording::{Call, RecordingChannel};
    use crate::config::DeliveryConfig;
    use pretty_assertions::assert_eq;

    fn orchestrator(max_task_id: usize) -> (Arc<RecordingChannel>, Arc<TaskRegistry>, Orchestrator) {
        let channel = Arc::new(RecordingChannel::new());
        let registry = Arc::new(TaskRegistry::with_max_task_id(max_task_id));
        let settings = DeliveryConfig {
            retry_delay_ms: 0,
            ..DeliveryConfig::default()
        };
        let delivery = Arc::new(Delivery::new(channel.clone(), settings));
        let orchestrator = Orchestrator::new(Arc::clone(&registry), delivery, Duration::from_millis(10));
        (channel, registry, orchestrator)
    }

    fn conversation() -> Conversation {
        Conversation::replying_to(1, 10)
    }

    #[test]
    fn echo_hi_end_to_end() {
        let (channel, registry, orchestrator) = orchestrator(100);
        let handle = orchestrator
            .launch(conversation(), "echo hi", "echo", &["hi"])
            .unwrap();
        assert_eq!(handle.id(), 0);
        handle.wait();

        assert!(registry.is_empty());
        let sent = channel.sent_texts();
        assert_eq!(sent.last().map(String::as_str), Some("<pre>hi\n</pre>"));
        assert!(sent.iter().all(|text| !text.contains("exit status")));
    }

    #[test]
    fn live_message_renders_output_before_completion() {
        let (channel, registry, orchestrator) = orchestrator(100);
        let handle = orchestrator
            .launch_shell(conversation(), "sh", "echo hi; sleep 0.5")
            .unwrap();
        assert_eq!(orchestrator.list_tasks(), vec!["[0]: sh echo hi; sleep 0.5".to_string()]);
        handle.wait();

        let calls = channel.calls();
        let rendered_live = calls.iter().any(|call| match call {
            Call::Send { text, .. } | Call::Edit { text, .. } => text == "<pre>hi\n</pre>",
            _ => false,
        });
        assert!(rendered_live, "{calls:?}");
        assert_eq!(
            calls.iter().filter(|c| matches!(c, Call::Delete { .. })).count(),
            1
        );
        assert_eq!(
            calls.last(),
            Some(&Call::Send {
                chat: 1,
                text: "<pre>hi\n</pre>".into()
            })
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn stop_kills_the_task_and_reports_the_signal() {
        let (channel, _registry, orchestrator) = orchestrator(100);
        let handle = orchestrator
            .launch(conversation(), "sleep 30", "sleep", &["30"])
            .unwrap();
        let id = handle.id();

        assert!(orchestrator.cancel_task(id));
        assert!(!orchestrator.cancel_task(id));
        handle.wait();

        assert_eq!(
            channel.sent_texts().last().map(String::as_str),
            Some("<pre>signal: 9 (killed)</pre>")
        );
        assert!(!orchestrator.cancel_task(id));
    }

    #[test]
    fn empty_command_is_rejected_without_a_task() {
        let (channel, registry, orchestrator) = orchestrator(100);
        assert!(matches!(
            orchestrator.launch_shell(conversation(), "bash", "   "),
            Err(LaunchError::EmptyCommand)
        ));
        assert!(registry.is_empty());
        assert!(channel.calls().is_empty());
    }

    #[test]
    fn full_registry_rejects_launch() {
        let (_channel, _registry, orchestrator) = orchestrator(1);
        let running = orchestrator
            .launch(conversation(), "sleep 30", "sleep", &["30"])
            .unwrap();

        let err = orchestrator
            .launch(conversation(), "echo", "echo", &["x"])
            .err()
            .unwrap();
        assert!(matches!(err, LaunchError::Registry(_)));

        assert!(orchestrator.cancel_task(running.id()));
        running.wait();
    }

    #[test]
    fn start_failure_is_reported_as_error_message() {
        let (channel, registry, orchestrator) = orchestrator(100);
        orchestrator
            .launch(conversation(), "missing", "/nonexistent/program", &[])
            .unwrap()
            .wait();

        assert!(registry.is_empty());
        let sent = channel.sent_texts();
        let last = sent.last().expect("an error message");
        assert!(last.starts_with("<pre>failed to start:"), "{sent:?}");
    }

    #[test]
    fn finishing_a_stopped_task_keeps_its_successor_registered() {
        let (_channel, registry, orchestrator) = orchestrator(1);
        let first = orchestrator
            .launch(conversation(), "sleep 30", "sleep", &["30"])
            .unwrap();
        assert!(orchestrator.cancel_task(first.id()));

        let second = orchestrator
            .launch(conversation(), "sleep 30", "sleep", &["30"])
            .unwrap();
        assert_eq!(second.id(), first.id());
        first.wait();

        assert_eq!(orchestrator.list_tasks(), vec!["[0]: sleep 30".to_string()]);
        assert_eq!(registry.len(), 1);
        assert!(orchestrator.cancel_task(second.id()));
        second.wait();
        assert!(registry.is_empty());
    }

    #[test]
    fn shutdown_cancels_running_tasks() {
        let (_channel, registry, orchestrator) = orchestrator(100);
        let handle = orchestrator
            .launch(conversation(), "sleep 30", "sleep", &["30"])
            .unwrap();

        orchestrator.shutdown();
        handle.wait();
        assert!(registry.is_empty());
    }

    #[test]
    fn live_message_carries_stop_button() {
        let view = task_view(conversation(), 7);
        assert_eq!(view.live_options.buttons[0].data, "stop:7");
        assert!(view.final_options.buttons.is_empty());
        assert_eq!(view.final_options.reply_to, Some(10));
    }
}
