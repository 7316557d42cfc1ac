//! Event handler execution: the per-invocation state machine and the
//! commit protocol that runs between statements.
//!
//! After every statement that changed state, the recorded changes are applied
//! to the container, a low-priority render is requested, and the handler
//! waits for the next frame (the host's acknowledgement) before it goes on.
//! If the container unmounts while the handler waits, it continues after a
//! single yield instead.

use std::cell::Cell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use crate::actions::{HandlerOptions, PreparedHandler};
use crate::container::{Container, HandlerLifecycle};
use crate::context::{EvalContext, StatementBoundary};
use crate::engine::Engine;
use crate::error::ScriptError;
use crate::frame_clock::NextFrame;
use crate::runtime::RuntimeHandle;
use crate::tracker::ChangeRecord;
use crate::value::{LocalFuture, Value};

/// Completes after being polled twice, waking itself in between.
#[derive(Default)]
pub(crate) struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

enum AckOutcome {
    Acknowledged(u64),
    Unmounted,
}

/// Next frame raced against the container unmounting.
struct AckWait<'c> {
    frame: NextFrame,
    container: &'c Container,
}

impl Future for AckWait<'_> {
    type Output = AckOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<AckOutcome> {
        if !self.container.is_mounted() {
            return Poll::Ready(AckOutcome::Unmounted);
        }
        if let Poll::Ready(time) = Pin::new(&mut self.frame).poll(cx) {
            return Poll::Ready(AckOutcome::Acknowledged(time));
        }
        self.container.register_unmount_waker(cx.waker());
        Poll::Pending
    }
}

pub(crate) struct CommitBoundary {
    container: Container,
    runtime: RuntimeHandle,
    idle: Cell<usize>,
    threshold: usize,
}

impl CommitBoundary {
    pub(crate) fn new(container: Container, runtime: RuntimeHandle, threshold: usize) -> Self {
        Self {
            container,
            runtime,
            idle: Cell::new(0),
            threshold,
        }
    }

    async fn commit(&self, cx: &mut EvalContext, changes: Vec<ChangeRecord>) {
        for change in &changes {
            log::debug!(
                "container {}: {:?} {} = {:?}",
                self.container.id(),
                change.action,
                change.path_string(),
                change.new_value
            );
            self.container.state_part_changed(change);
        }
        cx.engine.metrics().commit();
        self.runtime.schedule();

        if self.container.is_mounted() && self.runtime.is_alive() {
            cx.engine.metrics().ack_wait();
            let wait = AckWait {
                frame: self.runtime.frame_clock().next_frame(),
                container: &self.container,
            };
            match wait.await {
                AckOutcome::Acknowledged(time) => {
                    log::trace!("container {}: commit acknowledged at {time}", self.container.id());
                }
                AckOutcome::Unmounted => YieldNow::default().await,
            }
        } else {
            YieldNow::default().await;
        }

        cx.refresh_view(self.container.view().deep_clone());
    }

    /// Commits whatever is still pending when the handler finishes.
    pub(crate) async fn flush(&self, cx: &mut EvalContext) {
        let changes = cx.take_changes();
        if !changes.is_empty() {
            self.commit(cx, changes).await;
        }
    }
}

impl StatementBoundary for CommitBoundary {
    fn after_statement<'a>(
        &'a self,
        cx: &'a mut EvalContext,
    ) -> LocalFuture<'a, Result<(), ScriptError>> {
        Box::pin(async move {
            let changes = cx.take_changes();
            if !changes.is_empty() {
                self.idle.set(0);
                self.commit(cx, changes).await;
                return Ok(());
            }
            let idle = self.idle.get() + 1;
            if idle > self.threshold {
                self.idle.set(0);
                cx.engine.metrics().forced_yield();
                log::trace!(
                    "container {}: forcing a yield after {idle} idle statements",
                    self.container.id()
                );
                YieldNow::default().await;
            } else {
                self.idle.set(idle);
            }
            Ok(())
        })
    }
}

/// Logs the start and the end of one invocation. The end is logged on drop,
/// so a handler future dropped mid-flight is reported too.
struct HandlerTrace {
    label: String,
    outcome: &'static str,
}

impl HandlerTrace {
    fn open(container: &Container, options: &HandlerOptions) -> Self {
        let label = format!(
            "{}.{}@{}",
            options.owner.as_deref().unwrap_or("anonymous"),
            options.event_name.as_deref().unwrap_or("handler"),
            container.id()
        );
        log::debug!("handler {label} started");
        Self {
            label,
            outcome: "dropped",
        }
    }

    fn finish(&mut self, outcome: &'static str) {
        self.outcome = outcome;
    }
}

impl Drop for HandlerTrace {
    fn drop(&mut self) {
        log::debug!("handler {} closed: {}", self.label, self.outcome);
    }
}

/// Runs a prepared handler in `cx`, without any lifecycle bookkeeping.
pub(crate) async fn execute(
    cx: &mut EvalContext,
    handler: &PreparedHandler,
) -> Result<Value, ScriptError> {
    match handler {
        PreparedHandler::Statements(parsed) => cx.run_body(&parsed.statements).await,
        PreparedHandler::Closure(Value::Function(closure)) => {
            let args = cx.args.clone();
            let value = cx.call_closure(closure.clone(), args, true).await?;
            cx.thread.return_value = Some(value.clone());
            Ok(value)
        }
        PreparedHandler::Closure(function) => {
            let args = cx.args.clone();
            cx.call_value(function.clone(), Value::Undefined, args).await
        }
        PreparedHandler::Builtin(name) => {
            let call_cx = cx.call_context();
            let args = cx.args.clone();
            cx.engine.call_action(name, call_cx, args).await
        }
    }
}

/// One end-to-end handler invocation.
pub(crate) async fn run_handler(
    engine: Engine,
    handler: PreparedHandler,
    container: Container,
    options: HandlerOptions,
    args: Vec<Value>,
) -> Result<Value, ScriptError> {
    let mut trace = HandlerTrace::open(&container, &options);
    engine.metrics().handler_started();

    let lifecycle_key = match (&options.owner, &options.event_name) {
        (Some(owner), Some(event)) => Some((owner.clone(), event.clone())),
        _ => None,
    };
    if let Some((owner, event)) = &lifecycle_key {
        container.set_lifecycle(owner, event, HandlerLifecycle::Running);
    }

    let boundary = Rc::new(CommitBoundary::new(
        container.clone(),
        engine.runtime(),
        engine.config().idle_yield_threshold,
    ));
    let mut cx = EvalContext::new(engine.clone(), container.view().deep_clone())
        .with_container(Some(container.clone()))
        .with_services(options.services.clone())
        .with_args(args)
        .with_implicit(options.implicit())
        .with_tracker()
        .with_boundary(boundary.clone());

    let result = match execute(&mut cx, &handler).await {
        Ok(value) => {
            boundary.flush(&mut cx).await;
            Ok(value)
        }
        Err(error) => {
            // Only the failing statement's writes are still pending.
            let discarded = cx.take_changes();
            if !discarded.is_empty() {
                log::debug!(
                    "container {}: discarding {} changes of the failed statement",
                    container.id(),
                    discarded.len()
                );
            }
            Err(error)
        }
    };

    match result {
        Ok(value) => {
            if let Some((owner, event)) = &lifecycle_key {
                container.set_lifecycle(owner, event, HandlerLifecycle::Completed);
            }
            trace.finish("completed");
            Ok(value)
        }
        Err(error) => {
            if let Some((owner, event)) = &lifecycle_key {
                container.set_lifecycle(owner, event, HandlerLifecycle::Error(error.clone()));
            }
            if options
                .signal_error
                .unwrap_or(engine.config().signal_errors_by_default)
            {
                engine.signal_error(&error);
            }
            trace.finish("error");
            Err(error)
        }
    }
}
