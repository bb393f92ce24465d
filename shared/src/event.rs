//! Events exchanged between device clients over the executor bus.

use std::fmt;

use crate::target::TargetRef;

/// A notification published on the bus.
///
/// The variant is the kind tag and carries exactly the payload that kind
/// needs, so subscribers cannot misread a payload meant for another kind.
#[derive(Debug, Clone, strum::EnumDiscriminants)]
#[strum_discriminants(name(EventKind), derive(Hash, strum::Display, strum::EnumIter))]
pub enum Event {
    /// Assign a target (or queue it behind the running one)
    SetTarget(TargetRef),
    /// Telescope is positioned; cameras may start their scripts
    Observe,
    /// Abort every script and observation immediately
    KillAll,
    /// Poll: does any client forbid a move right now?
    MoveQuestion,
    /// Answer to [`Event::MoveQuestion`]: a move is vetoed
    DontMove,
    /// A camera client started stepping a script
    ScriptStarted { device: String },
    /// A camera client destroyed its script
    ScriptEnded { device: String },
    /// The final exposure of a script has ended; the mount may move again
    LastReadout { device: String },
    /// A slew failed with the given device status code
    MoveFailed { status: i32 },
}

impl Event {
    /// Kind tag of this event.
    pub fn kind(&self) -> EventKind {
        EventKind::from(self)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Event::SetTarget(target) => {
                write!(f, "SetTarget(#{} {})", target.id(), target.name())
            }
            Event::ScriptStarted { device }
            | Event::ScriptEnded { device }
            | Event::LastReadout { device } => write!(f, "{}({device})", self.kind()),
            Event::MoveFailed { status } => write!(f, "MoveFailed({status})"),
            _ => write!(f, "{}", self.kind()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::Equatorial;
    use crate::target::FixedTarget;
    use std::rc::Rc;
    use strum::IntoEnumIterator;

    #[test]
    fn test_kind_and_display() {
        let target: TargetRef = Rc::new(FixedTarget::new(7, "M31", Equatorial::new(10.68, 41.27)));
        let event = Event::SetTarget(target);
        assert_eq!(event.kind(), EventKind::SetTarget);
        assert_eq!(event.to_string(), "SetTarget(#7 M31)");

        let ended = Event::ScriptEnded {
            device: "C0".to_string(),
        };
        assert_eq!(ended.to_string(), "ScriptEnded(C0)");
        assert_eq!(Event::MoveFailed { status: -3 }.to_string(), "MoveFailed(-3)");
        assert_eq!(Event::DontMove.to_string(), "DontMove");
    }

    #[test]
    fn test_all_kinds_enumerated() {
        assert_eq!(EventKind::iter().count(), 9);
    }
}
