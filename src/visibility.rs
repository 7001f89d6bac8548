//! The visibility/clearance lattice (C1).
//!
//! Four ordered levels gate every read and cap every write. Comparisons are
//! always integer order — never string order.

use rocket::request::FromParam;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Visibility {
    Public = 0,
    Team = 1,
    Confidential = 2,
    Restricted = 3,
}

impl Visibility {
    pub fn as_str(self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Team => "team",
            Visibility::Confidential => "confidential",
            Visibility::Restricted => "restricted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "public" => Some(Visibility::Public),
            "team" => Some(Visibility::Team),
            "confidential" => Some(Visibility::Confidential),
            "restricted" => Some(Visibility::Restricted),
            _ => None,
        }
    }
}

impl Visibility {
    pub fn as_i64(self) -> i64 {
        self as i64
    }

    pub fn from_i64(n: i64) -> Option<Self> {
        match n {
            0 => Some(Visibility::Public),
            1 => Some(Visibility::Team),
            2 => Some(Visibility::Confidential),
            3 => Some(Visibility::Restricted),
            _ => None,
        }
    }
}

impl<'r> FromParam<'r> for Visibility {
    type Error = &'r str;

    fn from_param(param: &'r str) -> Result<Self, Self::Error> {
        Visibility::parse(param).ok_or(param)
    }
}

impl std::fmt::Display for Visibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// `entityVisibility <= agentClearance`.
pub fn can_see(agent_clearance: Visibility, entity_visibility: Visibility) -> bool {
    entity_visibility <= agent_clearance
}

/// `min(requested, max)`.
pub fn cap(requested: Visibility, max: Visibility) -> Visibility {
    requested.min(max)
}

/// `max(current, candidate)` — the high-water mark only ever moves up.
pub fn raise(current: Visibility, candidate: Visibility) -> Visibility {
    current.max(candidate)
}
