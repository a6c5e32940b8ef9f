//! Top-level scheduling policies
//!
//! Every policy runs the same poll loop (launch or steal, then drain the
//! ready queue) and differs only in what it does with a popped codelet:
//!
//! | policy     | dispatch                                   | steals | local fire |
//! |------------|--------------------------------------------|--------|------------|
//! | RoundRobin | next sub-scheduler, retry next on reject   | yes    | never      |
//! | PushFull   | each sub once, then fire locally           | yes    | fallback   |
//! | Static     | fire locally; hinted codelets routed on push | yes  | always     |
//! | Dynamic    | fire locally; Fifos destroyed at loop exit | yes    | always     |
//! | WorkPush   | like RoundRobin                            | no     | never      |

use core::fmt;
use core::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TpPolicyKind {
    #[default]
    RoundRobin,
    PushFull,
    Static,
    Dynamic,
    WorkPush,
}

impl TpPolicyKind {
    pub const ALL: [TpPolicyKind; 5] = [
        TpPolicyKind::RoundRobin,
        TpPolicyKind::PushFull,
        TpPolicyKind::Static,
        TpPolicyKind::Dynamic,
        TpPolicyKind::WorkPush,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            TpPolicyKind::RoundRobin => "roundrobin",
            TpPolicyKind::PushFull => "pushfull",
            TpPolicyKind::Static => "static",
            TpPolicyKind::Dynamic => "dynamic",
            TpPolicyKind::WorkPush => "workpush",
        }
    }

    /// Takes launch closures from peer schedulers when its own queue is empty
    pub const fn steals(&self) -> bool {
        !matches!(self, TpPolicyKind::WorkPush)
    }

    /// Cannot make progress without micro schedulers
    pub const fn needs_sub_schedulers(&self) -> bool {
        matches!(
            self,
            TpPolicyKind::RoundRobin | TpPolicyKind::PushFull | TpPolicyKind::WorkPush
        )
    }

    /// Routes placement-hinted codelets to a micro scheduler at push time
    pub const fn routes_by_placement(&self) -> bool {
        matches!(self, TpPolicyKind::Static)
    }

    /// Destroys every Fifo it allocated when its loop exits
    pub const fn clears_fifos_on_exit(&self) -> bool {
        matches!(self, TpPolicyKind::Dynamic)
    }
}

impl fmt::Display for TpPolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TpPolicyKind {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "roundrobin" | "rr" | "tproundrobin" => Ok(TpPolicyKind::RoundRobin),
            "pushfull" | "tppushfull" => Ok(TpPolicyKind::PushFull),
            "static" | "tpstatic" => Ok(TpPolicyKind::Static),
            "dynamic" | "tpdynamic" => Ok(TpPolicyKind::Dynamic),
            "workpush" | "tpworkpush" => Ok(TpPolicyKind::WorkPush),
            _ => Err("unknown policy (expected roundrobin, pushfull, static, dynamic or workpush)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trip() {
        for kind in TpPolicyKind::ALL {
            assert_eq!(kind.as_str().parse::<TpPolicyKind>(), Ok(kind));
        }
        assert_eq!("round_robin".parse::<TpPolicyKind>(), Ok(TpPolicyKind::RoundRobin));
        assert_eq!("TP-PUSH-FULL".parse::<TpPolicyKind>(), Ok(TpPolicyKind::PushFull));
        assert!("lottery".parse::<TpPolicyKind>().is_err());
    }

    #[test]
    fn test_traits() {
        assert!(!TpPolicyKind::WorkPush.steals());
        assert!(TpPolicyKind::RoundRobin.steals());
        assert!(TpPolicyKind::Static.routes_by_placement());
        assert!(!TpPolicyKind::Dynamic.needs_sub_schedulers());
        assert!(TpPolicyKind::Dynamic.clears_fifos_on_exit());
    }
}
