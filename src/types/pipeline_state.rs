//! Pipeline lifecycle state.

use std::fmt;

use serde::Serialize;

/// Pipeline lifecycle: `Idle → Running → Exited`. `Exited` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum PipelineState {
  Idle = 0,
  Running = 1,
  Exited = 2,
}

impl PipelineState {
  pub fn from_u8(v: u8) -> Option<Self> {
    match v {
      0 => Some(Self::Idle),
      1 => Some(Self::Running),
      2 => Some(Self::Exited),
      _ => None,
    }
  }
}

impl fmt::Display for PipelineState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      PipelineState::Idle => write!(f, "idle"),
      PipelineState::Running => write!(f, "running"),
      PipelineState::Exited => write!(f, "exited"),
    }
  }
}
