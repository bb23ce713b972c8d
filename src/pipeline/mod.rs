pub mod coordinator;
pub mod slot;

use tracing::trace;

use crate::error::FrameError;

pub use coordinator::FramePipeline;
pub use slot::{ProcessedFrame, PublishedSlot, SlotStats};

/// Progress of a single frame through the pipeline
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RunState {
    #[default]
    Idle,
    Cropping,
    Distorting,
    Published,
}

impl RunState {
    /// Runs move forward one stage at a time and may fall back to idle from anywhere
    pub fn can_transition(self, next: RunState) -> bool {
        use RunState::*;

        matches!(
            (self, next),
            (Idle, Cropping) | (Cropping, Distorting) | (Distorting, Published) | (_, Idle)
        )
    }

    pub fn advance(&mut self, next: RunState) -> Result<(), FrameError> {
        if !self.can_transition(next) {
            return Err(FrameError::InvalidTransition {
                from: *self,
                to: next,
            });
        }
        trace!(from = ?*self, to = ?next, "Run state");
        *self = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_is_sequential() {
        let mut state = RunState::default();
        for next in [
            RunState::Cropping,
            RunState::Distorting,
            RunState::Published,
            RunState::Idle,
        ] {
            state.advance(next).unwrap();
        }
        assert_eq!(state, RunState::Idle);
    }

    #[test]
    fn stages_cannot_be_skipped_or_reversed() {
        assert!(!RunState::Idle.can_transition(RunState::Distorting));
        assert!(!RunState::Idle.can_transition(RunState::Published));
        assert!(!RunState::Cropping.can_transition(RunState::Published));
        assert!(!RunState::Distorting.can_transition(RunState::Cropping));
        assert!(!RunState::Published.can_transition(RunState::Cropping));

        let mut state = RunState::Cropping;
        assert!(matches!(
            state.advance(RunState::Published),
            Err(FrameError::InvalidTransition {
                from: RunState::Cropping,
                to: RunState::Published
            })
        ));
        assert_eq!(state, RunState::Cropping);
    }

    #[test]
    fn any_stage_can_abort_to_idle() {
        for state in [
            RunState::Idle,
            RunState::Cropping,
            RunState::Distorting,
            RunState::Published,
        ] {
            assert!(state.can_transition(RunState::Idle));
        }
    }
}
