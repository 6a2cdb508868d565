//! Typed access to a participant's controllers.
//!
//! `participant.can(handle)?` checks the controller's protocol once and
//! returns a [`CanRef`] whose operations run with the network's current
//! [`NetworkContext`] and route the controller's actions through the
//! participant. The other protocols work the same way.

use cosim_core::{
    Controller, ControllerAction, ControllerError, Environment, NetworkContext,
    controller::{
        CanController, EthernetController, FlexrayController, LinController, PubSubController,
        RpcController,
    },
};
use cosim_proto::{
    ControllerHandle, NetworkKind, TransmitId,
    payloads::{
        can::CanFrame,
        ethernet::EthernetFrame,
        flexray::{FlexrayControllerConfig, FlexrayTxBufferConfig, FlexrayTxBufferUpdate},
        lin::{
            LinControllerConfig, LinControllerMode, LinFrame, LinFrameResponse,
            LinFrameResponseType, LinId,
        },
        rpc::RpcCallHandle,
    },
};

use super::Participant;
use crate::error::ParticipantError;

impl<E: Environment> Participant<E> {
    /// Run `op` on a controller with its network's context and route the
    /// actions it returns.
    ///
    /// # Errors
    ///
    /// - `ParticipantError::Registry` for a stale handle
    /// - whatever `op` returns
    pub fn operate<R>(
        &mut self,
        handle: ControllerHandle,
        op: impl FnOnce(&mut Controller, NetworkContext) -> Result<(R, Vec<ControllerAction>), ParticipantError>,
    ) -> Result<R, ParticipantError> {
        let now = self.now();
        let network = self.controllers.get(handle)?.network.clone();
        let ctx = self.router.context(&network, now);
        let entry = self.controllers.get_mut(handle)?;
        let (result, actions) = op(&mut entry.value, ctx)?;
        self.route_controller_actions(handle, &network, actions);
        Ok(result)
    }

    fn check_kind(
        &self,
        handle: ControllerHandle,
        expected: NetworkKind,
    ) -> Result<(), ParticipantError> {
        let actual = self.controllers.get(handle)?.kind;
        if actual != expected {
            return Err(ControllerError::WrongKind { handle, expected, actual }.into());
        }
        Ok(())
    }
}

macro_rules! typed_ref {
    ($(#[$meta:meta])* $name:ident, $accessor:ident, $kind:ident, $ty:ty, $as_mut:ident) => {
        $(#[$meta])*
        pub struct $name<'a, E: Environment> {
            participant: &'a mut Participant<E>,
            handle: ControllerHandle,
        }

        impl<E: Environment> Participant<E> {
            #[doc = concat!("Operate the ", stringify!($kind), " controller `handle`.")]
            ///
            /// # Errors
            ///
            /// - `ParticipantError::Registry` for a stale handle
            /// - `ParticipantError::Controller` if the controller has another protocol
            pub fn $accessor(
                &mut self,
                handle: ControllerHandle,
            ) -> Result<$name<'_, E>, ParticipantError> {
                self.check_kind(handle, NetworkKind::$kind)?;
                Ok($name { participant: self, handle })
            }
        }

        impl<E: Environment> $name<'_, E> {
            /// Handle of the controller.
            pub fn handle(&self) -> ControllerHandle {
                self.handle
            }

            /// Run `op` on the typed controller.
            ///
            /// # Errors
            ///
            /// - `ParticipantError::Registry` if the controller is gone
            /// - whatever `op` returns
            pub fn with<R>(
                &mut self,
                op: impl FnOnce(&mut $ty, NetworkContext) -> Result<(R, Vec<ControllerAction>), ParticipantError>,
            ) -> Result<R, ParticipantError> {
                let handle = self.handle;
                self.participant.operate(handle, |controller, ctx| {
                    let actual = controller.kind();
                    let Some(typed) = controller.$as_mut() else {
                        return Err(ControllerError::WrongKind {
                            handle,
                            expected: NetworkKind::$kind,
                            actual,
                        }
                        .into());
                    };
                    op(typed, ctx)
                })
            }

            fn run(
                &mut self,
                op: impl FnOnce(&mut $ty, NetworkContext) -> Vec<ControllerAction>,
            ) -> Result<(), ParticipantError> {
                self.with(|controller, ctx| Ok(((), op(controller, ctx))))
            }
        }
    };
}

typed_ref!(
    /// A CAN controller borrowed from its participant.
    CanRef, can, Can, CanController, as_can_mut
);
typed_ref!(
    /// A LIN controller borrowed from its participant.
    LinRef, lin, Lin, LinController, as_lin_mut
);
typed_ref!(
    /// A FlexRay controller borrowed from its participant.
    FlexrayRef, flexray, FlexRay, FlexrayController, as_flexray_mut
);
typed_ref!(
    /// An Ethernet controller borrowed from its participant.
    EthernetRef, ethernet, Ethernet, EthernetController, as_ethernet_mut
);
typed_ref!(
    /// A publisher or subscriber borrowed from its participant.
    PubSubRef, pubsub, PubSub, PubSubController, as_pubsub_mut
);
typed_ref!(
    /// An RPC client or server borrowed from its participant.
    RpcRef, rpc, Rpc, RpcController, as_rpc_mut
);

impl<E: Environment> CanRef<'_, E> {
    /// Start the controller.
    ///
    /// # Errors
    ///
    /// - `ParticipantError::Registry` if the controller is gone
    pub fn start(&mut self) -> Result<(), ParticipantError> {
        self.run(CanController::start)
    }

    /// Stop the controller.
    ///
    /// # Errors
    ///
    /// As for [`Self::start`].
    pub fn stop(&mut self) -> Result<(), ParticipantError> {
        self.run(CanController::stop)
    }

    /// Reset the controller and its error state.
    ///
    /// # Errors
    ///
    /// As for [`Self::start`].
    pub fn reset(&mut self) -> Result<(), ParticipantError> {
        self.run(CanController::reset)
    }

    /// Put the controller to sleep.
    ///
    /// # Errors
    ///
    /// As for [`Self::start`].
    pub fn sleep(&mut self) -> Result<(), ParticipantError> {
        self.run(CanController::sleep)
    }

    /// Configure the classic, FD and XL bit rates.
    ///
    /// # Errors
    ///
    /// As for [`Self::start`].
    pub fn set_baud_rate(
        &mut self,
        rate: u32,
        fd_rate: u32,
        xl_rate: u32,
    ) -> Result<(), ParticipantError> {
        self.run(|can, ctx| can.set_baud_rate(rate, fd_rate, xl_rate, ctx))
    }

    /// Send a frame. The returned id is echoed by the transmit acknowledgement.
    ///
    /// # Errors
    ///
    /// As for [`Self::start`].
    pub fn send_frame(
        &mut self,
        frame: CanFrame,
        user_context: Option<u64>,
    ) -> Result<TransmitId, ParticipantError> {
        self.with(|can, ctx| Ok(can.send_frame(frame, user_context, ctx)))
    }
}

impl<E: Environment> EthernetRef<'_, E> {
    /// Activate the link.
    ///
    /// # Errors
    ///
    /// - `ParticipantError::Registry` if the controller is gone
    pub fn activate(&mut self) -> Result<(), ParticipantError> {
        self.run(EthernetController::activate)
    }

    /// Deactivate the link.
    ///
    /// # Errors
    ///
    /// As for [`Self::activate`].
    pub fn deactivate(&mut self) -> Result<(), ParticipantError> {
        self.run(EthernetController::deactivate)
    }

    /// Send a raw frame.
    ///
    /// # Errors
    ///
    /// As for [`Self::activate`].
    pub fn send_frame(
        &mut self,
        frame: EthernetFrame,
        user_context: Option<u64>,
    ) -> Result<TransmitId, ParticipantError> {
        self.with(|eth, ctx| Ok(eth.send_frame(frame, user_context, ctx)))
    }
}

impl<E: Environment> LinRef<'_, E> {
    fn try_run(
        &mut self,
        op: impl FnOnce(&mut LinController, NetworkContext) -> Result<Vec<ControllerAction>, ControllerError>,
    ) -> Result<(), ParticipantError> {
        self.with(|lin, ctx| Ok(((), op(lin, ctx)?)))
    }

    /// Initialize in static mode.
    ///
    /// # Errors
    ///
    /// - `ParticipantError::Controller` for an inactive mode or a second init
    pub fn init(&mut self, config: LinControllerConfig) -> Result<(), ParticipantError> {
        self.try_run(|lin, ctx| lin.init(config, ctx))
    }

    /// Initialize in dynamic mode; responses are provided on demand.
    ///
    /// # Errors
    ///
    /// As for [`Self::init`].
    pub fn init_dynamic(
        &mut self,
        mode: LinControllerMode,
        baud_rate: u32,
    ) -> Result<(), ParticipantError> {
        self.try_run(|lin, ctx| lin.init_dynamic(mode, baud_rate, ctx))
    }

    /// Send a complete frame (master only).
    ///
    /// # Errors
    ///
    /// - `ParticipantError::Controller` if not an initialized static master
    pub fn send_frame(
        &mut self,
        frame: LinFrame,
        response_type: LinFrameResponseType,
    ) -> Result<(), ParticipantError> {
        self.try_run(|lin, ctx| lin.send_frame(frame, response_type, ctx))
    }

    /// Send a frame header (master only).
    ///
    /// # Errors
    ///
    /// - `ParticipantError::Controller` if not an initialized master
    pub fn send_frame_header(&mut self, id: LinId) -> Result<(), ParticipantError> {
        self.try_run(|lin, ctx| lin.send_frame_header(id, ctx))
    }

    /// Answer a header in dynamic mode.
    ///
    /// # Errors
    ///
    /// - `ParticipantError::Controller` unless initialized in dynamic mode
    pub fn send_dynamic_response(&mut self, frame: LinFrame) -> Result<(), ParticipantError> {
        self.try_run(|lin, ctx| lin.send_dynamic_response(frame, ctx))
    }

    /// Configure the response for one id.
    ///
    /// # Errors
    ///
    /// - `ParticipantError::Controller` unless initialized in static mode
    pub fn set_frame_response(&mut self, response: LinFrameResponse) -> Result<(), ParticipantError> {
        self.try_run(|lin, ctx| lin.set_frame_response(response, ctx))
    }

    /// Replace the payload of a configured transmit response.
    ///
    /// # Errors
    ///
    /// - `ParticipantError::Controller` unless initialized in static mode
    pub fn update_tx_buffer(&mut self, frame: LinFrame) -> Result<(), ParticipantError> {
        self.try_run(|lin, ctx| lin.update_tx_buffer(frame, ctx))
    }

    /// Send the go-to-sleep command (master only).
    ///
    /// # Errors
    ///
    /// - `ParticipantError::Controller` if not an initialized master
    pub fn go_to_sleep(&mut self) -> Result<(), ParticipantError> {
        self.try_run(LinController::go_to_sleep)
    }

    /// Enter sleep without sending anything.
    ///
    /// # Errors
    ///
    /// - `ParticipantError::Controller` if not initialized
    pub fn go_to_sleep_internal(&mut self) -> Result<(), ParticipantError> {
        self.try_run(LinController::go_to_sleep_internal)
    }

    /// Send a wakeup pulse and become operational.
    ///
    /// # Errors
    ///
    /// - `ParticipantError::Controller` if not initialized
    pub fn wakeup(&mut self) -> Result<(), ParticipantError> {
        self.try_run(LinController::wakeup)
    }

    /// Become operational without sending a pulse.
    ///
    /// # Errors
    ///
    /// - `ParticipantError::Controller` if not initialized
    pub fn wakeup_internal(&mut self) -> Result<(), ParticipantError> {
        self.try_run(LinController::wakeup_internal)
    }
}

impl<E: Environment> FlexrayRef<'_, E> {
    /// Apply the node configuration.
    ///
    /// # Errors
    ///
    /// - `ParticipantError::Registry` if the controller is gone
    pub fn configure(&mut self, config: FlexrayControllerConfig) -> Result<(), ParticipantError> {
        self.run(|fr, ctx| fr.configure(config, ctx))
    }

    /// Replace the configuration of one transmit buffer.
    ///
    /// # Errors
    ///
    /// - `ParticipantError::Controller` before configuration or for an
    ///   unknown buffer
    pub fn reconfigure_tx_buffer(
        &mut self,
        tx_buffer_index: u16,
        config: FlexrayTxBufferConfig,
    ) -> Result<(), ParticipantError> {
        self.with(|fr, ctx| Ok(((), fr.reconfigure_tx_buffer(tx_buffer_index, config, ctx)?)))
    }

    /// Provide a new payload for a transmit buffer.
    ///
    /// # Errors
    ///
    /// As for [`Self::reconfigure_tx_buffer`].
    pub fn update_tx_buffer(&mut self, update: FlexrayTxBufferUpdate) -> Result<(), ParticipantError> {
        self.with(|fr, ctx| Ok(((), fr.update_tx_buffer(update, ctx)?)))
    }

    /// Host command `Run`.
    ///
    /// # Errors
    ///
    /// As for [`Self::configure`].
    pub fn run_controller(&mut self) -> Result<(), ParticipantError> {
        self.run(FlexrayController::run)
    }

    /// Host command `DeferredHalt`.
    ///
    /// # Errors
    ///
    /// As for [`Self::configure`].
    pub fn deferred_halt(&mut self) -> Result<(), ParticipantError> {
        self.run(FlexrayController::deferred_halt)
    }

    /// Host command `Freeze`.
    ///
    /// # Errors
    ///
    /// As for [`Self::configure`].
    pub fn freeze(&mut self) -> Result<(), ParticipantError> {
        self.run(FlexrayController::freeze)
    }

    /// Host command `AllowColdstart`.
    ///
    /// # Errors
    ///
    /// As for [`Self::configure`].
    pub fn allow_coldstart(&mut self) -> Result<(), ParticipantError> {
        self.run(FlexrayController::allow_coldstart)
    }

    /// Host command `AllSlots`.
    ///
    /// # Errors
    ///
    /// As for [`Self::configure`].
    pub fn all_slots(&mut self) -> Result<(), ParticipantError> {
        self.run(FlexrayController::all_slots)
    }

    /// Host command `Wakeup`.
    ///
    /// # Errors
    ///
    /// As for [`Self::configure`].
    pub fn wakeup(&mut self) -> Result<(), ParticipantError> {
        self.run(FlexrayController::wakeup)
    }
}

impl<E: Environment> PubSubRef<'_, E> {
    /// Publish `data` on the topic. Subscribers publish nothing.
    ///
    /// # Errors
    ///
    /// - `ParticipantError::Registry` if the controller is gone
    pub fn publish(&mut self, data: Vec<u8>) -> Result<(), ParticipantError> {
        self.run(|pubsub, ctx| pubsub.publish(data, ctx))
    }
}

impl<E: Environment> RpcRef<'_, E> {
    /// Call every known server. The result arrives as an `RpcCallResult`
    /// event carrying `user_context`.
    ///
    /// # Errors
    ///
    /// - `ParticipantError::Registry` if the controller is gone
    pub fn call(
        &mut self,
        argument_data: Vec<u8>,
        user_context: Option<u64>,
    ) -> Result<(), ParticipantError> {
        self.run(|rpc, ctx| rpc.call(argument_data, user_context, ctx))
    }

    /// Answer a call received by this server.
    ///
    /// # Errors
    ///
    /// - `ParticipantError::Registry` if the controller is gone
    /// - `ParticipantError::Controller` if the call is not open
    pub fn submit_result(
        &mut self,
        call_handle: RpcCallHandle,
        result_data: Vec<u8>,
    ) -> Result<(), ParticipantError> {
        self.with(|rpc, ctx| Ok(((), rpc.submit_result(call_handle, result_data, ctx)?)))
    }

    /// Report that this server failed to handle a call.
    ///
    /// # Errors
    ///
    /// As for [`Self::submit_result`].
    pub fn submit_error(&mut self, call_handle: RpcCallHandle) -> Result<(), ParticipantError> {
        self.with(|rpc, ctx| Ok(((), rpc.submit_error(call_handle, ctx)?)))
    }
}
