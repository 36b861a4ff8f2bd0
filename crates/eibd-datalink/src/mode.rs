use std::sync::atomic::{AtomicBool, Ordering};

use eibd_core::lpdu::{Busmonitor, LData, Lpdu};
use eibd_core::{Destination, IndividualAddress};

/// Busmonitor / virtual-busmonitor switches of a medium.
#[derive(Debug, Default)]
pub struct MonitorMode {
    busmonitor: AtomicBool,
    vbusmonitor: AtomicBool,
}

impl MonitorMode {
    pub fn busmonitor(&self) -> bool {
        self.busmonitor.load(Ordering::SeqCst)
    }

    pub fn set_busmonitor(&self, on: bool) {
        self.busmonitor.store(on, Ordering::SeqCst);
    }

    pub fn vbusmonitor(&self) -> bool {
        self.vbusmonitor.load(Ordering::SeqCst)
    }

    pub fn set_vbusmonitor(&self, on: bool) {
        self.vbusmonitor.store(on, Ordering::SeqCst);
    }

    /// What the medium reports for one received frame: a busmonitor capture
    /// in busmonitor mode, otherwise the frame itself, preceded by a capture
    /// when a virtual busmonitor is open.
    ///
    /// `clear_individual` resets individual destinations to 0 on the
    /// delivered `L_Data` (not on the capture).
    pub fn frames_for(&self, mut frame: LData, clear_individual: bool) -> Vec<Lpdu> {
        let mut out = Vec::with_capacity(2);
        if self.busmonitor() || self.vbusmonitor() {
            match Busmonitor::capture(&frame) {
                Ok(capture) => out.push(Lpdu::Busmonitor(capture)),
                Err(e) => log::warn!("cannot capture {frame}: {e}"),
            }
            if self.busmonitor() {
                return out;
            }
        }
        if clear_individual && !frame.destination.is_group() {
            frame.destination = Destination::Individual(IndividualAddress::UNSET);
        }
        out.push(Lpdu::Data(frame));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::MonitorMode;
    use eibd_core::lpdu::{LData, Lpdu};
    use eibd_core::{Destination, GroupAddress, IndividualAddress};

    fn individual() -> LData {
        let mut l = LData::new(
            Destination::Individual(IndividualAddress::new(1, 1, 5)),
            vec![0x80],
        );
        l.source = IndividualAddress::new(1, 1, 1);
        l
    }

    #[test]
    fn normal_mode_delivers_data() {
        let mode = MonitorMode::default();
        let frames = mode.frames_for(individual(), true);
        assert_eq!(frames.len(), 1);
        let Lpdu::Data(l) = &frames[0] else {
            panic!("expected L_Data");
        };
        assert_eq!(l.destination.raw(), 0);
    }

    #[test]
    fn busmonitor_mode_captures_only() {
        let mode = MonitorMode::default();
        mode.set_busmonitor(true);
        let frames = mode.frames_for(individual(), true);
        assert_eq!(frames.len(), 1);
        assert!(matches!(frames[0], Lpdu::Busmonitor(_)));
    }

    #[test]
    fn vbusmonitor_delivers_both() {
        let mode = MonitorMode::default();
        mode.set_vbusmonitor(true);
        let group = LData::new(Destination::Group(GroupAddress::new(1, 2, 3)), vec![0x00, 0x80]);
        let frames = mode.frames_for(group.clone(), true);
        assert_eq!(frames.len(), 2);
        let Lpdu::Busmonitor(capture) = &frames[0] else {
            panic!("expected capture first");
        };
        assert_eq!(capture.decode(), Lpdu::Data(group.clone()));
        assert_eq!(frames[1], Lpdu::Data(group));
    }
}
