//! Pre/post reference points and their deltas
//!
//! Four orientation samples are taken at fixed azimuths before the device
//! calibration runs and four more afterwards. Comparing the two sets shows how
//! the new calibration performs in the real world.

use pni_compass::OrientationSample;
use thiserror::Error;

/// Reference points per phase.
pub const POINT_COUNT: usize = 4;

/// Default target azimuths in degrees.
pub const DEFAULT_AZIMUTHS: [f32; POINT_COUNT] = [0.0, 90.0, 180.0, 270.0];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PointError {
    #[error("point index {0} outside 1..=4")]
    IndexOutOfRange(u8),

    #[error("no sample requested")]
    NothingRequested,
}

/// Which set of reference points is being collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Pre,
    Post,
}

/// Post-minus-pre differences for one point.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PointDelta {
    /// Post heading minus target azimuth
    pub heading: f32,
    /// Post pitch minus pre pitch
    pub pitch: f32,
    /// |post roll| minus |pre roll|
    pub roll: f32,
}

/// Samples, targets and deltas for one calibration session.
///
/// Arrays are stored zero-based; the accessors take the 1-based point
/// numbers used everywhere else.
#[derive(Debug, Clone, PartialEq)]
pub struct PointSet {
    pub target_azimuths: [f32; POINT_COUNT],
    pub pre: [OrientationSample; POINT_COUNT],
    pub post: [OrientationSample; POINT_COUNT],
    pub deltas: [PointDelta; POINT_COUNT],
}

impl Default for PointSet {
    fn default() -> Self {
        Self::new(DEFAULT_AZIMUTHS)
    }
}

impl PointSet {
    pub fn new(target_azimuths: [f32; POINT_COUNT]) -> Self {
        Self {
            target_azimuths,
            pre: [OrientationSample::default(); POINT_COUNT],
            post: [OrientationSample::default(); POINT_COUNT],
            deltas: [PointDelta::default(); POINT_COUNT],
        }
    }

    pub fn pre(&self, point: u8) -> Option<&OrientationSample> {
        slot_index(point).ok().map(|i| &self.pre[i])
    }

    pub fn post(&self, point: u8) -> Option<&OrientationSample> {
        slot_index(point).ok().map(|i| &self.post[i])
    }

    pub fn delta(&self, point: u8) -> Option<&PointDelta> {
        slot_index(point).ok().map(|i| &self.deltas[i])
    }

    /// Fill in the deltas from the stored samples.
    pub fn compute_deltas(&mut self) {
        for i in 0..POINT_COUNT {
            let pre = &self.pre[i];
            let post = &self.post[i];
            self.deltas[i] = PointDelta {
                heading: post.heading - self.target_azimuths[i],
                pitch: post.pitch - pre.pitch,
                roll: post.roll.abs() - pre.roll.abs(),
            };
        }
    }

    /// A point is bad when any stored angle is exactly zero, which is what a
    /// missing component decodes to.
    pub fn is_bad(&self, point: u8) -> bool {
        let Ok(i) = slot_index(point) else {
            return true;
        };
        [&self.pre[i], &self.post[i]]
            .iter()
            .any(|s| s.heading == 0.0 || s.pitch == 0.0 || s.roll == 0.0)
    }

    /// 1-based numbers of the bad points.
    pub fn bad_points(&self) -> Vec<u8> {
        (1..=POINT_COUNT as u8).filter(|&p| self.is_bad(p)).collect()
    }
}

fn slot_index(point: u8) -> Result<usize, PointError> {
    if (1..=POINT_COUNT as u8).contains(&point) {
        Ok(point as usize - 1)
    } else {
        Err(PointError::IndexOutOfRange(point))
    }
}

/// Files requested orientation samples into the point set.
///
/// The orchestrator registers which slot the next DataResp belongs to with
/// [`request`](Self::request), sends GetData, and hands every DataResp to
/// [`on_sample`](Self::on_sample). A response that arrives with no request
/// outstanding is refused.
#[derive(Debug, Clone, Default)]
pub struct PointCollector {
    points: PointSet,
    pending: Option<(Phase, u8)>,
}

impl PointCollector {
    pub fn new(target_azimuths: [f32; POINT_COUNT]) -> Self {
        Self {
            points: PointSet::new(target_azimuths),
            pending: None,
        }
    }

    pub fn points(&self) -> &PointSet {
        &self.points
    }

    pub fn pending(&self) -> Option<(Phase, u8)> {
        self.pending
    }

    /// Expect the next sample for `point` of `phase`.
    pub fn request(&mut self, phase: Phase, point: u8) -> Result<(), PointError> {
        slot_index(point)?;
        self.pending = Some((phase, point));
        Ok(())
    }

    pub fn cancel_request(&mut self) {
        self.pending = None;
    }

    /// File a sample into the outstanding slot.
    pub fn on_sample(&mut self, sample: OrientationSample) -> Result<(Phase, u8), PointError> {
        let (phase, point) = self.pending.take().ok_or(PointError::NothingRequested)?;
        self.collect(phase, point, sample)?;
        Ok((phase, point))
    }

    /// Store `sample` as `point` (1..=4) of `phase`.
    pub fn collect(
        &mut self,
        phase: Phase,
        point: u8,
        sample: OrientationSample,
    ) -> Result<(), PointError> {
        let i = slot_index(point)?;
        match phase {
            Phase::Pre => self.points.pre[i] = sample,
            Phase::Post => self.points.post[i] = sample,
        }
        Ok(())
    }

    /// Start of the pre phase: clear everything.
    pub fn reset(&mut self) {
        self.points = PointSet::new(self.points.target_azimuths);
        self.pending = None;
    }

    /// Start of the post phase: clear post samples and deltas, keep the pre
    /// samples the deltas are computed against.
    pub fn reset_post(&mut self) {
        self.points.post = [OrientationSample::default(); POINT_COUNT];
        self.points.deltas = [PointDelta::default(); POINT_COUNT];
        self.pending = None;
    }

    pub fn compute_deltas(&mut self) {
        self.points.compute_deltas();
    }
}
