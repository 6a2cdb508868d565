//! LIN master/slave exchanges on a trivial network.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use cosim_core::{ControlMode, EventFilter, EventKind, HandlerFault, ParticipantConfig};
use cosim_harness::{HarnessError, Scenario, SimEnv, Simulation};
use cosim_participant::{LinRef, ParticipantError};
use cosim_proto::{
    ControllerHandle, NetworkEvent,
    payloads::lin::{
        LinChecksumModel, LinControllerMode, LinEvent, LinFrame, LinFrameStatus,
        LinFrameStatusEvent,
    },
};

const STEP: Duration = Duration::from_millis(1);
const BAUD_RATE: u32 = 20_000;
const RESPONSE_ID: u8 = 34;

fn master_config() -> ParticipantConfig {
    ParticipantConfig { is_sync_master: true, ..ParticipantConfig::synchronized("LinMaster", STEP) }
}

fn fault(err: impl ToString) -> HandlerFault {
    HandlerFault::new(err.to_string())
}

fn response() -> LinFrame {
    LinFrame::new(RESPONSE_ID, LinChecksumModel::Enhanced, 6, [3, 4, 3, 4, 3, 4, 3, 4])
}

fn dynamic_controller(
    sim: &mut Simulation,
    index: usize,
    mode: LinControllerMode,
) -> Result<ControllerHandle, HarnessError> {
    sim.operate(index, |p| {
        let lin = p.create_lin_controller("LIN1", "LIN1")?;
        p.lin(lin)?.init_dynamic(mode, BAUD_RATE)?;
        Ok(lin)
    })
}

/// Slave that answers every header for `RESPONSE_ID` and counts go-to-sleep
/// commands.
fn slave(
    sim: &mut Simulation,
    index: usize,
    sleeps: Arc<Mutex<usize>>,
) -> Result<(), HarnessError> {
    let lin = dynamic_controller(sim, index, LinControllerMode::Slave)?;
    sim.operate(index, |p| {
        p.add_event_handler(lin, EventFilter::any(EventKind::LinFrameHeader), |p, handle, event| {
            if let NetworkEvent::Lin(LinEvent::FrameHeader(header)) = event
                && header.id == RESPONSE_ID
            {
                p.lin(handle)
                    .and_then(|mut lin| lin.send_dynamic_response(response()))
                    .map_err(fault)?;
            }
            Ok(())
        })?;
        p.add_event_handler(lin, EventFilter::any(EventKind::LinGoToSleep), move |_, _, _| {
            *sleeps.lock().unwrap() += 1;
            Ok(())
        })
    })?;
    Ok(())
}

/// Run master and slave; the master calls `act` in every step.
fn run(
    mut act: impl FnMut(&mut LinRef<'_, SimEnv>, Duration) -> Result<(), ParticipantError>
    + Send
    + 'static,
) -> (Vec<LinFrameStatusEvent>, usize) {
    let statuses: Arc<Mutex<Vec<LinFrameStatusEvent>>> = Arc::default();
    let sleeps = Arc::new(Mutex::new(0));

    let mut sim = Scenario::new()
        .system_controller(["LinMaster", "LinSlave"], Some("LinMaster"), ControlMode::Automatic)
        .participant_with(master_config(), {
            let statuses = Arc::clone(&statuses);
            move |sim, index| {
                let lin = dynamic_controller(sim, index, LinControllerMode::Master)?;
                sim.operate(index, |p| {
                    p.add_event_handler(
                        lin,
                        EventFilter::any(EventKind::LinFrameStatus),
                        move |_, _, event| {
                            if let NetworkEvent::Lin(LinEvent::FrameStatus(status)) = event {
                                statuses.lock().unwrap().push(*status);
                            }
                            Ok(())
                        },
                    )
                })?;
                sim.set_step_handler(index, move |p, now, _| {
                    p.lin(lin).and_then(|mut lin| act(&mut lin, now)).map_err(fault)
                })
            }
        })
        .participant_with(ParticipantConfig::synchronized("LinSlave", STEP), {
            let sleeps = Arc::clone(&sleeps);
            move |sim, index| slave(sim, index, sleeps)
        })
        .until(|sim| sim.step_times(1).len() >= 5 && sim.step_times(2).len() >= 5)
        .run()
        .unwrap();
    sim.control(|controller, p| controller.stop(p)).unwrap();
    sim.run_until(1_000, |sim| sim.completed_count() == 2).unwrap();

    let statuses = statuses.lock().unwrap().clone();
    let sleeps = *sleeps.lock().unwrap();
    (statuses, sleeps)
}

#[test]
fn dynamic_response_reaches_the_master() {
    let (statuses, _) = run(|lin, now| {
        if now.is_zero() {
            lin.send_frame_header(RESPONSE_ID)?;
        }
        Ok(())
    });

    let answered: Vec<_> = statuses.iter().filter(|s| s.frame.id == RESPONSE_ID).collect();
    assert_eq!(answered.len(), 1);
    assert_eq!(answered[0].status, LinFrameStatus::LIN_RX_OK);
    assert_eq!(answered[0].frame, response());
}

#[test]
fn go_to_sleep_is_delivered_once() {
    let (_, sleeps) = run(|lin, now| {
        if now == STEP * 2 {
            lin.go_to_sleep()?;
            lin.go_to_sleep()?;
        }
        Ok(())
    });

    assert_eq!(sleeps, 1);
}
