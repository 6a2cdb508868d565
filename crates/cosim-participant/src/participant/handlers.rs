//! Application callbacks.
//!
//! Callbacks receive the participant mutably, so they can send frames, stop
//! the simulation or register further handlers. A callback is taken out of
//! its slot while it runs and put back afterwards, unless it was removed or
//! replaced in the meantime. Panics inside a callback are caught and reported
//! as handler faults.

use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    time::Duration,
};

use cosim_core::{
    Environment, EventFilter, HandlerFault, HandlerId, HandlerRegistry, HandlerResult,
    LifecycleHook, LogRecord,
};
use cosim_proto::{
    ControllerHandle, NetworkEvent, ParticipantState, ParticipantStatus, SystemState,
};

use super::{Participant, Work};
use crate::error::ParticipantError;

/// Lifecycle callback without arguments.
pub type HookHandler<E> = Box<dyn FnMut(&mut Participant<E>) -> HandlerResult + Send>;

/// Abort callback; receives the state the participant was in.
pub type AbortHandler<E> =
    Box<dyn FnMut(&mut Participant<E>, ParticipantState) -> HandlerResult + Send>;

/// Simulation step callback; receives the step's start time and duration.
pub type StepHandler<E> =
    Box<dyn FnMut(&mut Participant<E>, Duration, Duration) -> HandlerResult + Send>;

/// Controller event callback.
pub type EventCallback<E> =
    Box<dyn FnMut(&mut Participant<E>, ControllerHandle, &NetworkEvent) -> HandlerResult + Send>;

/// Participant status callback.
pub type StatusHandler<E> =
    Box<dyn FnMut(&mut Participant<E>, &ParticipantStatus) -> HandlerResult + Send>;

/// System state callback.
pub type SystemStateHandler<E> =
    Box<dyn FnMut(&mut Participant<E>, SystemState) -> HandlerResult + Send>;

struct EventHandler<E: Environment> {
    controller: ControllerHandle,
    filter: EventFilter,
    callback: Option<EventCallback<E>>,
}

pub(super) struct Handlers<E: Environment> {
    communication_ready: Option<HookHandler<E>>,
    starting: Option<HookHandler<E>>,
    stop: Option<HookHandler<E>>,
    shutdown: Option<HookHandler<E>>,
    abort: Option<AbortHandler<E>>,
    step: Option<StepHandler<E>>,
    events: HandlerRegistry<EventHandler<E>>,
    status: HandlerRegistry<Option<StatusHandler<E>>>,
    system_state: HandlerRegistry<Option<SystemStateHandler<E>>>,
}

impl<E: Environment> Default for Handlers<E> {
    fn default() -> Self {
        Self {
            communication_ready: None,
            starting: None,
            stop: None,
            shutdown: None,
            abort: None,
            step: None,
            events: HandlerRegistry::new(),
            status: HandlerRegistry::new(),
            system_state: HandlerRegistry::new(),
        }
    }
}

impl<E: Environment> Handlers<E> {
    pub(super) fn remove_controller(&mut self, handle: ControllerHandle) {
        let stale: Vec<HandlerId> = self
            .events
            .iter_mut()
            .filter(|(_, handler)| handler.controller == handle)
            .map(|(id, _)| id)
            .collect();
        for id in stale {
            self.events.remove(id);
        }
    }
}

type HookSlot<E> = fn(&mut Handlers<E>) -> &mut Option<HookHandler<E>>;

/// Run `f`, turning a panic into a handler fault.
fn guarded(f: impl FnOnce() -> HandlerResult) -> HandlerResult {
    panic::catch_unwind(AssertUnwindSafe(f))
        .unwrap_or_else(|payload| Err(HandlerFault::new(panic_message(payload.as_ref()))))
}

/// Put a callback back unless it was replaced while running.
fn restore<T>(slot: &mut Option<T>, callback: T) {
    if slot.is_none() {
        *slot = Some(callback);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("handler panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("handler panicked: {message}")
    } else {
        "handler panicked".to_string()
    }
}

impl<E: Environment> Participant<E> {
    /// Called when the participant enters `Initializing`. Create controllers
    /// and register event handlers here.
    pub fn set_communication_ready_handler(
        &mut self,
        handler: impl FnMut(&mut Self) -> HandlerResult + Send + 'static,
    ) {
        self.handlers.communication_ready = Some(Box::new(handler));
        if let Some(lifecycle) = self.lifecycle.as_mut() {
            lifecycle.set_async_communication_ready(false);
        }
    }

    /// Like [`Self::set_communication_ready_handler`], but the participant
    /// stays in `Initializing` until
    /// [`Self::complete_communication_ready`] is called.
    pub fn set_communication_ready_handler_async(
        &mut self,
        handler: impl FnMut(&mut Self) -> HandlerResult + Send + 'static,
    ) {
        self.handlers.communication_ready = Some(Box::new(handler));
        if let Some(lifecycle) = self.lifecycle.as_mut() {
            lifecycle.set_async_communication_ready(true);
        }
    }

    /// Called in `Initialized` on `Run`, before the participant reports
    /// `Running`.
    pub fn set_starting_handler(
        &mut self,
        handler: impl FnMut(&mut Self) -> HandlerResult + Send + 'static,
    ) {
        self.handlers.starting = Some(Box::new(handler));
    }

    /// Called in `Stopping`.
    pub fn set_stop_handler(&mut self, handler: impl FnMut(&mut Self) -> HandlerResult + Send + 'static) {
        self.handlers.stop = Some(Box::new(handler));
    }

    /// Called in `ShuttingDown`.
    pub fn set_shutdown_handler(
        &mut self,
        handler: impl FnMut(&mut Self) -> HandlerResult + Send + 'static,
    ) {
        self.handlers.shutdown = Some(Box::new(handler));
    }

    /// Called in `Aborting` with the state the participant was in.
    pub fn set_abort_handler(
        &mut self,
        handler: impl FnMut(&mut Self, ParticipantState) -> HandlerResult + Send + 'static,
    ) {
        self.handlers.abort = Some(Box::new(handler));
    }

    /// Called once per granted simulation step with the step's start time
    /// and duration.
    ///
    /// # Errors
    ///
    /// - `ParticipantError::TimeSync` if the participant has no time
    ///   synchronization
    pub fn set_simulation_step_handler(
        &mut self,
        handler: impl FnMut(&mut Self, Duration, Duration) -> HandlerResult + Send + 'static,
    ) -> Result<(), ParticipantError> {
        if self.time_sync.is_none() {
            return Err(cosim_core::TimeSyncError::NotConfigured.into());
        }
        self.handlers.step = Some(Box::new(handler));
        Ok(())
    }

    /// Subscribe to events of one controller.
    ///
    /// # Errors
    ///
    /// - `ParticipantError::Registry` for a stale handle
    pub fn add_event_handler(
        &mut self,
        controller: ControllerHandle,
        filter: EventFilter,
        callback: impl FnMut(&mut Self, ControllerHandle, &NetworkEvent) -> HandlerResult
        + Send
        + 'static,
    ) -> Result<HandlerId, ParticipantError> {
        self.controllers.get(controller)?;
        Ok(self.handlers.events.add(EventHandler {
            controller,
            filter,
            callback: Some(Box::new(callback)),
        }))
    }

    /// Remove an event subscription. Returns whether it existed.
    pub fn remove_event_handler(&mut self, id: HandlerId) -> bool {
        self.handlers.events.remove(id)
    }

    /// Subscribe to participant status changes. The handler is first called
    /// with every status known so far.
    pub fn add_participant_status_handler(
        &mut self,
        handler: impl FnMut(&mut Self, &ParticipantStatus) -> HandlerResult + Send + 'static,
    ) -> HandlerId {
        let id = self.handlers.status.add(Some(Box::new(handler)));
        self.work.push_back(Work::ReplayStatuses(id));
        id
    }

    /// Remove a status subscription. Returns whether it existed.
    pub fn remove_participant_status_handler(&mut self, id: HandlerId) -> bool {
        self.handlers.status.remove(id)
    }

    /// Subscribe to system state changes. The handler is first called with
    /// the current system state, if one is known.
    pub fn add_system_state_handler(
        &mut self,
        handler: impl FnMut(&mut Self, SystemState) -> HandlerResult + Send + 'static,
    ) -> HandlerId {
        let id = self.handlers.system_state.add(Some(Box::new(handler)));
        self.work.push_back(Work::ReplaySystemState(id));
        id
    }

    /// Remove a system state subscription. Returns whether it existed.
    pub fn remove_system_state_handler(&mut self, id: HandlerId) -> bool {
        self.handlers.system_state.remove(id)
    }

    // Invocation

    pub(super) fn run_hook(&mut self, hook: LifecycleHook) {
        let result = match hook {
            LifecycleHook::CommunicationReady => self.call_hook(|h| &mut h.communication_ready),
            LifecycleHook::Starting => self.call_hook(|h| &mut h.starting),
            LifecycleHook::Stop => self.call_hook(|h| &mut h.stop),
            LifecycleHook::Shutdown => self.call_hook(|h| &mut h.shutdown),
            LifecycleHook::Abort { last_state } => match self.handlers.abort.take() {
                Some(mut handler) => {
                    let result = guarded(|| handler(self, last_state));
                    restore(&mut self.handlers.abort, handler);
                    result
                },
                None => Ok(()),
            },
        };

        let now = self.env.wall_clock();
        if let Some(lifecycle) = self.lifecycle.as_mut() {
            let actions = lifecycle.hook_completed(hook, result, now);
            self.apply_lifecycle(actions);
        }
    }

    fn call_hook(&mut self, slot: HookSlot<E>) -> HandlerResult {
        let Some(mut handler) = slot(&mut self.handlers).take() else {
            return Ok(());
        };
        let result = guarded(|| handler(self));
        restore(slot(&mut self.handlers), handler);
        result
    }

    pub(super) fn call_step_handler(&mut self, now: Duration, duration: Duration) -> HandlerResult {
        let Some(mut handler) = self.handlers.step.take() else {
            return Ok(());
        };
        let result = guarded(|| handler(self, now, duration));
        restore(&mut self.handlers.step, handler);
        result
    }

    pub(super) fn dispatch_event(&mut self, to: ControllerHandle, event: &NetworkEvent) {
        let mut faults = Vec::new();
        for id in self.handlers.events.ids() {
            let callback = match self.handlers.events.get_mut(id) {
                Some(handler) if handler.controller == to && handler.filter.matches(event) => {
                    handler.callback.take()
                },
                _ => None,
            };
            let Some(mut callback) = callback else {
                continue;
            };

            let result = guarded(|| callback(self, to, event));
            if let Some(handler) = self.handlers.events.get_mut(id) {
                restore(&mut handler.callback, callback);
            }
            if let Err(fault) = result {
                faults.push(fault);
            }
        }
        self.report_faults(faults);
    }

    pub(super) fn notify_status(&mut self, status: &ParticipantStatus, only: Option<HandlerId>) {
        let ids = only.map_or_else(|| self.handlers.status.ids(), |id| vec![id]);
        let mut faults = Vec::new();
        for id in ids {
            let Some(mut handler) = self.handlers.status.get_mut(id).and_then(Option::take) else {
                continue;
            };
            let result = guarded(|| handler(self, status));
            if let Some(slot) = self.handlers.status.get_mut(id) {
                restore(slot, handler);
            }
            if let Err(fault) = result {
                faults.push(fault);
            }
        }
        self.report_faults(faults);
    }

    pub(super) fn notify_system_state(&mut self, state: SystemState, only: Option<HandlerId>) {
        let ids = only.map_or_else(|| self.handlers.system_state.ids(), |id| vec![id]);
        let mut faults = Vec::new();
        for id in ids {
            let Some(mut handler) = self.handlers.system_state.get_mut(id).and_then(Option::take)
            else {
                continue;
            };
            let result = guarded(|| handler(self, state));
            if let Some(slot) = self.handlers.system_state.get_mut(id) {
                restore(slot, handler);
            }
            if let Err(fault) = result {
                faults.push(fault);
            }
        }
        self.report_faults(faults);
    }

    /// Every subscriber of one notification runs; the first fault is acted on.
    fn report_faults(&mut self, faults: Vec<HandlerFault>) {
        let mut faults = faults.into_iter();
        let Some(first) = faults.next() else {
            return;
        };
        for fault in faults {
            self.log(LogRecord::warn(format!("{}: {fault}", self.config.name)));
        }
        self.on_handler_fault(&first);
    }
}
