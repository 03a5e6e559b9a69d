//! Sequence (C8): an ordered list of segments chained end to end, each
//! segment's final state feeding the next segment's initial state.
//! Grounded on the teacher's builder-returns-`Self` construction style
//! (§10.3) applied to `Segment` (§4.8).

use hifitime::Epoch;

use crate::errors::AstrodyneError;
use crate::event::EventCondition;
use crate::segment::{Segment, SegmentSolution, SatelliteSystem};
use crate::coord::State;

/// A named segment paired with the maximum duration its own `solve` call is
/// bounded by.
#[derive(Clone)]
struct ScheduledSegment {
    segment: Segment,
    max_duration_s: f64,
}

/// An ordered list of segments, solved against one shared satellite system
/// (§4.8).
#[derive(Clone)]
pub struct Sequence {
    segments: Vec<ScheduledSegment>,
    satellite: SatelliteSystem,
}

impl Sequence {
    pub fn new(satellite: SatelliteSystem) -> Self {
        Self { segments: Vec::new(), satellite }
    }

    /// `Sequence.addCoast/addManeuver(...)` (§6.2): appends a segment bound
    /// by its own maximum duration.
    pub fn add(mut self, segment: Segment, max_duration_s: f64) -> Self {
        self.segments.push(ScheduledSegment { segment, max_duration_s });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Iterates the segment list `repetitions` times, each segment receiving
    /// the previous segment's final state. Stops early, reporting
    /// incompleteness, the first time a segment's own max-duration bound is
    /// hit before its condition fires (§4.8).
    pub fn solve(&self, initial_state: &State, repetitions: usize) -> Result<SequenceSolution, AstrodyneError> {
        if self.segments.is_empty() {
            return Err(AstrodyneError::UndefinedInput("sequence has no segments".to_string()));
        }

        let mut state = initial_state.clone();
        let mut segment_solutions = Vec::with_capacity(self.segments.len() * repetitions.max(1));

        for _ in 0..repetitions {
            for scheduled in &self.segments {
                let solution = scheduled.segment.solve(&state, scheduled.max_duration_s, &self.satellite)?;
                state = solution.final_state.clone();
                let complete = solution.condition_satisfied;
                segment_solutions.push(solution);
                if !complete {
                    return Ok(SequenceSolution { segment_solutions, execution_is_complete: false });
                }
            }
        }

        Ok(SequenceSolution { segment_solutions, execution_is_complete: true })
    }

    /// A hybrid driver (§4.8): loops the segment list, restarting from the
    /// first after the last, checking `overall_condition` against the
    /// transition between each segment's final state and the one before it.
    /// Stops as soon as `overall_condition` is satisfied or `max_duration_s`
    /// (measured from `initial_state.instant`) is exhausted.
    pub fn solve_to_condition(
        &self,
        initial_state: &State,
        overall_condition: &dyn EventCondition,
        max_duration_s: f64,
    ) -> Result<SequenceSolution, AstrodyneError> {
        if self.segments.is_empty() {
            return Err(AstrodyneError::UndefinedInput("sequence has no segments".to_string()));
        }

        let start_epoch = initial_state.epoch;
        let mut previous_overall_state = initial_state.clone();
        let mut state = initial_state.clone();
        let mut segment_solutions = Vec::new();
        let mut index = 0usize;

        loop {
            let scheduled = &self.segments[index % self.segments.len()];
            let remaining = max_duration_s - (state.epoch - start_epoch).to_seconds();
            if remaining <= 0.0 {
                return Ok(SequenceSolution { segment_solutions, execution_is_complete: false });
            }
            let bound = scheduled.max_duration_s.min(remaining);
            let solution = scheduled.segment.solve(&state, bound, &self.satellite)?;
            state = solution.final_state.clone();
            segment_solutions.push(solution);

            if overall_condition.is_satisfied(&previous_overall_state, &state)? {
                return Ok(SequenceSolution { segment_solutions, execution_is_complete: true });
            }
            previous_overall_state = state.clone();

            if (state.epoch - start_epoch).to_seconds() >= max_duration_s {
                return Ok(SequenceSolution { segment_solutions, execution_is_complete: false });
            }
            index += 1;
        }
    }
}

/// The concatenated result of solving a sequence (§4.8). Segment solutions
/// appear in the order their segments ran; the handoff state between
/// consecutive segments is each segment's own initial/final state and is
/// not duplicated into a separate flat list.
#[derive(Clone)]
pub struct SequenceSolution {
    pub segment_solutions: Vec<SegmentSolution>,
    pub execution_is_complete: bool,
}

impl SequenceSolution {
    pub fn start_instant(&self) -> Option<Epoch> {
        self.segment_solutions.first().map(|s| s.initial_state.epoch)
    }

    pub fn end_instant(&self) -> Option<Epoch> {
        self.segment_solutions.last().map(|s| s.final_state.epoch)
    }
}
