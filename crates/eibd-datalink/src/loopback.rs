use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use eibd_core::lpdu::{LData, Lpdu};
use eibd_core::{GroupAddress, IndividualAddress};

use crate::flagpole::{Flag, Flagpole};
use crate::mailbox::Mailbox;
use crate::mode::MonitorMode;
use crate::{DataLinkError, Layer2Interface};

const RECEIVED: Flag = Flag::new(1);
const SLICE: Duration = Duration::from_millis(50);

/// In-process medium: every sent frame is received back.
#[derive(Debug)]
pub struct Loopback {
    address: IndividualAddress,
    inbox: Mailbox<Lpdu>,
    modes: MonitorMode,
    lost: AtomicBool,
}

impl Loopback {
    pub fn new(address: IndividualAddress) -> Self {
        Self {
            address,
            inbox: Mailbox::new(Arc::new(Flagpole::new()), RECEIVED),
            modes: MonitorMode::default(),
            lost: AtomicBool::new(false),
        }
    }

    /// Injects a frame as if another device had sent it on the bus.
    pub fn inject(&self, frame: Lpdu) {
        if self.lost.load(Ordering::SeqCst) {
            return;
        }
        match frame {
            Lpdu::Data(data) => {
                for f in self.modes.frames_for(data, false) {
                    self.inbox.push(f);
                }
            }
            other => {
                self.inbox.push(other);
            }
        }
    }

    /// Simulates losing the medium: pending `receive` calls return `None`
    /// and [`connection_lost`](Layer2Interface::connection_lost) turns true.
    pub fn disconnect(&self) {
        self.lost.store(true, Ordering::SeqCst);
        self.inbox.pole().raise(Flag::STOP);
    }
}

impl Layer2Interface for Loopback {
    fn open(&self) -> Result<(), DataLinkError> {
        Ok(())
    }

    fn close(&self) -> Result<(), DataLinkError> {
        Ok(())
    }

    fn send(&self, frame: LData) -> Result<(), DataLinkError> {
        if self.lost.load(Ordering::SeqCst) {
            return Err(DataLinkError::ConnectionLost);
        }
        log::debug!("loopback send {frame}");
        self.inject(Lpdu::Data(frame));
        Ok(())
    }

    fn receive(&self, stop: &Flagpole) -> Option<Lpdu> {
        self.inbox.pop_until_stopped(stop, SLICE)
    }

    fn enter_busmonitor(&self) -> Result<(), DataLinkError> {
        self.modes.set_busmonitor(true);
        Ok(())
    }

    fn leave_busmonitor(&self) -> Result<(), DataLinkError> {
        self.modes.set_busmonitor(false);
        Ok(())
    }

    fn open_vbusmonitor(&self) -> Result<(), DataLinkError> {
        self.modes.set_vbusmonitor(true);
        Ok(())
    }

    fn close_vbusmonitor(&self) -> Result<(), DataLinkError> {
        self.modes.set_vbusmonitor(false);
        Ok(())
    }

    fn add_address(&self, _addr: IndividualAddress) -> Result<(), DataLinkError> {
        Ok(())
    }

    fn remove_address(&self, _addr: IndividualAddress) -> Result<(), DataLinkError> {
        Ok(())
    }

    fn add_group_address(&self, _addr: GroupAddress) -> Result<(), DataLinkError> {
        Ok(())
    }

    fn remove_group_address(&self, _addr: GroupAddress) -> Result<(), DataLinkError> {
        Ok(())
    }

    fn default_address(&self) -> IndividualAddress {
        self.address
    }

    fn connection_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }

    fn send_queue_empty(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::Loopback;
    use crate::flagpole::Flagpole;
    use crate::Layer2Interface;
    use eibd_core::lpdu::{LData, Lpdu};
    use eibd_core::{Destination, GroupAddress, IndividualAddress};

    fn write() -> LData {
        LData::new(Destination::Group(GroupAddress::new(1, 2, 3)), vec![0x00, 0x80])
    }

    #[test]
    fn sent_frames_come_back() {
        let medium = Loopback::new(IndividualAddress::new(0, 0, 1));
        medium.send(write()).unwrap();
        let stop = Flagpole::new();
        assert_eq!(medium.receive(&stop), Some(Lpdu::Data(write())));
    }

    #[test]
    fn busmonitor_mode_reports_captures() {
        let medium = Loopback::new(IndividualAddress::new(0, 0, 1));
        medium.enter_busmonitor().unwrap();
        medium.send(write()).unwrap();
        let stop = Flagpole::new();
        assert!(matches!(medium.receive(&stop), Some(Lpdu::Busmonitor(_))));
    }

    #[test]
    fn receive_honours_stop() {
        let medium = Loopback::new(IndividualAddress::UNSET);
        let stop = Flagpole::new();
        stop.raise(crate::flagpole::Flag::STOP);
        assert_eq!(medium.receive(&stop), None);
        assert!(!medium.connection_lost());
    }

    #[test]
    fn disconnect_reports_loss() {
        let medium = Loopback::new(IndividualAddress::UNSET);
        medium.disconnect();
        assert_eq!(medium.receive(&Flagpole::new()), None);
        assert!(medium.connection_lost());
        assert!(medium.send(write()).is_err());
    }
}
