//! A function node: a compiled function-gui plus dirtiness, policy, the last
//! exception and the async worker bookkeeping.
//!
//! Async invocations run on a `std::thread` worker that owns copies of the
//! arguments and the callable. Results come back over a channel and are merged
//! by [`FunctionNode::heartbeat`]. Every dispatch gets a request id; only the
//! result of the most recent request is published.

use fiatlight_api_core::{Envelope, EnvelopeState, FiatError, FiatResult, Value};
use fiatlight_togui::{CallArgs, Callable, FunctionGui, InvokePolicy, Readiness, RunConfig, StopFlag};
use hashbrown::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::types::{ExceptionRecord, NodeStats};

struct AsyncOutcome {
    request_id: u64,
    result: Result<Value, ExceptionRecord>,
    stopped: bool,
    elapsed: Duration,
}

/// What one call to [`FunctionNode::invoke`] did.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InvokeOutcome {
    /// Not dirty and not triggered.
    Skipped,
    /// Inputs not ready; outputs set to this state.
    Blocked(EnvelopeState),
    /// The callable ran and outputs were written.
    Completed,
    /// The callable failed, or returned a bad value; outputs are Error.
    Failed,
    /// Handed to a worker thread.
    Dispatched,
}

pub struct FunctionNode {
    id: Uuid,
    gui: FunctionGui,
    dirty: bool,
    trigger_requested: bool,
    last_exception: Option<ExceptionRecord>,
    stats: NodeStats,
    catch_exceptions: bool,
    outputs_changed: bool,
    latest_request: u64,
    in_flight: HashMap<u64, StopFlag>,
    sender: Sender<AsyncOutcome>,
    receiver: Receiver<AsyncOutcome>,
}

impl std::fmt::Debug for FunctionNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionNode")
            .field("id", &self.id)
            .field("name", &self.gui.name())
            .field("dirty", &self.dirty)
            .field("policy", &self.gui.policy())
            .field("last_exception", &self.last_exception)
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}

impl FunctionNode {
    pub fn new(gui: FunctionGui, config: &RunConfig) -> Self {
        let (sender, receiver) = mpsc::channel();
        FunctionNode {
            id: Uuid::new_v4(),
            gui,
            dirty: true,
            trigger_requested: false,
            last_exception: None,
            stats: NodeStats::default(),
            catch_exceptions: config.catch_function_exceptions,
            outputs_changed: false,
            latest_request: 0,
            in_flight: HashMap::new(),
            sender,
            receiver,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        self.gui.name()
    }

    pub fn label(&self) -> &str {
        self.gui.label()
    }

    pub fn gui(&self) -> &FunctionGui {
        &self.gui
    }

    pub fn gui_mut(&mut self) -> &mut FunctionGui {
        &mut self.gui
    }

    pub fn policy(&self) -> InvokePolicy {
        self.gui.policy()
    }

    pub fn set_policy(&mut self, policy: InvokePolicy) {
        self.gui.set_policy(policy);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn set_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn last_exception(&self) -> Option<&ExceptionRecord> {
        self.last_exception.as_ref()
    }

    pub fn clear_exception(&mut self) {
        self.last_exception = None;
    }

    pub fn stats(&self) -> &NodeStats {
        &self.stats
    }

    /// Request an invocation on the next invocation phase (manual policy).
    pub fn trigger(&mut self) {
        self.trigger_requested = true;
    }

    pub fn is_triggered(&self) -> bool {
        self.trigger_requested
    }

    /// Ask every in-flight invocation to stop.
    pub fn request_stop(&mut self) {
        for flag in self.in_flight.values() {
            flag.request_stop();
        }
    }

    pub fn is_running_async(&self) -> bool {
        !self.in_flight.is_empty()
    }

    /// Manual nodes whose inputs changed since their last run. Manual IO
    /// nodes are always dirty, so they never show it.
    pub fn shall_display_refresh_needed_label(&self) -> bool {
        self.policy() == InvokePolicy::Manual && self.dirty
    }

    /// Whether the invocation phase should call [`invoke`](Self::invoke).
    pub fn wants_invocation(&self) -> bool {
        if self.policy().is_manual() {
            self.trigger_requested
        } else {
            self.dirty || self.trigger_requested
        }
    }

    /// Returns and resets whether the outputs were rewritten since the last
    /// call.
    pub fn take_outputs_changed(&mut self) -> bool {
        std::mem::take(&mut self.outputs_changed)
    }

    /// Set input `name` as if the user typed it, running its validators.
    pub fn set_input(&mut self, name: &str, value: Value) -> FiatResult<()> {
        let input = self
            .gui
            .input_mut(name)
            .ok_or_else(|| FiatError::BadInput(format!("no input `{name}`")))?;
        let result = input.handle.set_value(value);
        self.mark_input_changed();
        result
    }

    /// Replace input `name`'s envelope (links, loading).
    pub fn set_input_envelope(&mut self, name: &str, envelope: Envelope<Value>) -> FiatResult<()> {
        let input = self
            .gui
            .input_mut(name)
            .ok_or_else(|| FiatError::BadInput(format!("no input `{name}`")))?;
        input.handle.set_envelope(envelope);
        self.mark_input_changed();
        Ok(())
    }

    pub fn input_envelope(&self, name: &str) -> Option<&Envelope<Value>> {
        self.gui.input(name).map(|p| p.handle.value())
    }

    pub fn output_envelope(&self, idx: usize) -> Option<&Envelope<Value>> {
        self.gui.output(idx).map(|o| o.handle.value())
    }

    /// Record that an input changed, e.g. after an editor wrote to it.
    pub fn mark_input_changed(&mut self) {
        self.dirty = true;
        self.stats.input_change_count += 1;
    }

    /// Run the function if it is dirty or triggered.
    ///
    /// When `catch_function_exceptions` is off, a failing callable is
    /// reported as `RuntimeFailure` (the outputs are still set to Error) and
    /// a panic propagates.
    pub fn invoke(&mut self) -> FiatResult<InvokeOutcome> {
        if !self.dirty && !self.trigger_requested {
            return Ok(InvokeOutcome::Skipped);
        }
        self.dirty = false;
        self.trigger_requested = false;

        let policy = self.policy();
        let stop = (policy == InvokePolicy::AsyncStoppable).then(StopFlag::new);
        let args = match self.gui.readiness(stop.clone()) {
            Readiness::Blocked(state) => {
                log::debug!("{}: inputs not ready ({state:?})", self.name());
                self.supersede_in_flight();
                self.gui.set_outputs_state(state);
                self.last_exception = None;
                self.outputs_changed = true;
                return Ok(InvokeOutcome::Blocked(state));
            }
            Readiness::Ready(args) => args,
        };

        if policy.is_async() {
            self.dispatch_async(args, stop)?;
            return Ok(InvokeOutcome::Dispatched);
        }

        let callable = self.gui.callable();
        let started = Instant::now();
        let result = if self.catch_exceptions {
            call_guarded(&callable, &args)
        } else {
            callable(&args).map_err(|e| ExceptionRecord::from_error(&e))
        };
        self.record_invocation(started.elapsed());
        self.finish(result, false)
    }

    fn record_invocation(&mut self, elapsed: Duration) {
        self.stats.invocation_count += 1;
        self.stats.last_duration = Some(elapsed);
    }

    fn finish(
        &mut self,
        result: Result<Value, ExceptionRecord>,
        stopped: bool,
    ) -> FiatResult<InvokeOutcome> {
        self.outputs_changed = true;
        if stopped {
            log::debug!("{}: stopped, outputs left Unspecified", self.name());
            self.gui.set_outputs_state(EnvelopeState::Unspecified);
            self.last_exception = None;
            return Ok(InvokeOutcome::Completed);
        }
        match result {
            Ok(value) => match self.gui.publish(value) {
                Ok(()) => {
                    self.last_exception = None;
                    Ok(InvokeOutcome::Completed)
                }
                Err(e) => {
                    log::warn!("{}: {e}", self.name());
                    self.gui.set_outputs_state(EnvelopeState::Error);
                    self.last_exception = Some(ExceptionRecord::from_fiat(&e));
                    Ok(InvokeOutcome::Failed)
                }
            },
            Err(record) => {
                log::warn!("{} failed: {}", self.name(), record.message);
                self.gui.set_outputs_state(EnvelopeState::Error);
                let message = record.message.clone();
                self.last_exception = Some(record);
                if self.catch_exceptions {
                    Ok(InvokeOutcome::Failed)
                } else {
                    Err(FiatError::RuntimeFailure(message))
                }
            }
        }
    }

    /// Stop every in-flight request and make its late result stale, so
    /// outputs written since the dispatch are not overwritten.
    fn supersede_in_flight(&mut self) {
        if self.in_flight.is_empty() {
            return;
        }
        self.request_stop();
        self.latest_request += 1;
        log::debug!(
            "{}: {} in-flight request(s) superseded",
            self.name(),
            self.in_flight.len()
        );
    }

    fn dispatch_async(&mut self, args: CallArgs, stop: Option<StopFlag>) -> FiatResult<()> {
        if stop.is_some() {
            self.request_stop();
        }
        self.latest_request += 1;
        let request_id = self.latest_request;
        let callable = self.gui.callable();
        let sender = self.sender.clone();
        let name = self.name().to_string();
        let worker_name = name.clone();
        std::thread::Builder::new()
            .name(format!("fiat-{name}"))
            .spawn(move || {
                let started = Instant::now();
                let result = call_guarded(&callable, &args);
                let outcome = AsyncOutcome {
                    request_id,
                    result,
                    stopped: args.shall_stop(),
                    elapsed: started.elapsed(),
                };
                if sender.send(outcome).is_err() {
                    log::debug!("{worker_name}: node dropped before request {request_id} finished");
                }
            })
            .map_err(|e| FiatError::RuntimeFailure(format!("cannot start a worker for `{name}`: {e}")))?;
        self.in_flight
            .insert(request_id, stop.unwrap_or_default());
        log::debug!("{name}: dispatched async request {request_id}");
        Ok(())
    }

    /// Merge finished async results, run handle heartbeats and re-dirty
    /// always-dirty nodes. Returns whether anything needs a redraw.
    pub fn heartbeat(&mut self) -> FiatResult<bool> {
        let mut refresh = false;
        let mut failure = None;
        while let Ok(outcome) = self.receiver.try_recv() {
            self.in_flight.remove(&outcome.request_id);
            if outcome.request_id != self.latest_request {
                log::debug!(
                    "{}: discarding stale result of request {} (latest {})",
                    self.name(),
                    outcome.request_id,
                    self.latest_request
                );
                continue;
            }
            self.record_invocation(outcome.elapsed);
            refresh = true;
            if let Err(e) = self.finish(outcome.result, outcome.stopped) {
                failure = Some(e);
            }
        }
        refresh |= self.gui.on_heartbeat();
        if self.policy().is_always_dirty() {
            self.dirty = true;
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(refresh),
        }
    }

    /// Wait until no async invocation is in flight, merging results.
    pub fn wait_async(&mut self, timeout: Duration) -> FiatResult<bool> {
        let deadline = Instant::now() + timeout;
        while self.is_running_async() {
            if Instant::now() >= deadline {
                return Ok(false);
            }
            std::thread::sleep(Duration::from_millis(1));
            self.heartbeat()?;
        }
        Ok(true)
    }

    /// Stop workers and release handle resources.
    pub fn on_exit(&mut self) {
        self.request_stop();
        self.gui.on_exit();
    }
}

/// Call `callable`, turning errors and panics into an exception record.
fn call_guarded(callable: &Callable, args: &CallArgs) -> Result<Value, ExceptionRecord> {
    match panic::catch_unwind(AssertUnwindSafe(|| callable(args))) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(ExceptionRecord::from_error(&e)),
        Err(payload) => Err(ExceptionRecord::from_panic(payload.as_ref())),
    }
}
