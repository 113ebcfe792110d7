#![warn(clippy::pedantic)]

//! The straight as one instrument: layout, excitation model and knobs tied
//! together with the live supply settings, stepped once per display frame.

use std::fmt;
use std::str::Split;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::knobs::{join_values, Jog, Knobs, Move, Target};
use crate::lattice::{Layout, PhotonBeam, TrackingError, TrajectoryPoint};
use crate::ring_buffer::TraceBuffer;
use crate::strength::{StrengthModel, UnphysicalCurrent, CHICANE_POLARITY, MAGNETS};

/// Readback sentinel published while no (or malformed) live current data is
/// available. Display-only; it never enters the physics.
pub const NO_READBACK: [f64; MAGNETS] = [f64::NAN; MAGNETS];

/// Everything the plotting front-ends need for one display frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub trajectory: Vec<TrajectoryPoint>,
    pub photons: Vec<PhotonBeam>,
    pub currents: [f64; MAGNETS],
    pub kicks: [f64; MAGNETS],
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepError {
    Strength(UnphysicalCurrent),
    Tracking(TrackingError),
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepError::Strength(e) => e.fmt(f),
            StepError::Tracking(e) => e.fmt(f),
        }
    }
}

impl From<UnphysicalCurrent> for StepError {
    fn from(e: UnphysicalCurrent) -> Self {
        StepError::Strength(e)
    }
}

impl From<TrackingError> for StepError {
    fn from(e: TrackingError) -> Self {
        StepError::Tracking(e)
    }
}

/// Operator tuning state, serialized to TOML on request so a session can be
/// restored after a restart.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub scales: [f64; MAGNETS],
    pub offsets: [f64; MAGNETS],
    pub knobs: Knobs,
}

#[derive(Debug)]
pub struct Straight {
    pub lattice: Layout,
    pub model: StrengthModel,
    pub knobs: Knobs,
    scales: [f64; MAGNETS],
    offsets: [f64; MAGNETS],
    readback: [f64; MAGNETS],
    pub detector_logs: Vec<TraceBuffer<f64>>,
    pub cycle_counter: u64,
    pub start_time: Instant,
}

impl Straight {
    /// # Errors
    /// The layout must carry one kicker per modelled magnet, and the
    /// detector history buffers must be allocatable.
    pub fn new(
        lattice: Layout,
        model: StrengthModel,
        knobs: Knobs,
        log_exponent: usize,
    ) -> Result<Self, String> {
        if lattice.kicker_count() != MAGNETS {
            return Err(format!(
                "straight needs {MAGNETS} kickers, layout has {}",
                lattice.kicker_count()
            ));
        }
        let mut detector_logs = Vec::with_capacity(lattice.insertion_device_count());
        for _ in 0..lattice.insertion_device_count() {
            detector_logs.push(
                TraceBuffer::new(log_exponent)
                    .ok_or("failed to allocate a detector history buffer")?,
            );
        }
        Ok(Straight {
            lattice,
            model,
            knobs,
            scales: [0.0; MAGNETS],
            offsets: [0.0; MAGNETS],
            readback: NO_READBACK,
            detector_logs,
            cycle_counter: 0,
            start_time: Instant::now(),
        })
    }

    #[inline]
    #[must_use]
    pub fn scales(&self) -> &[f64; MAGNETS] {
        &self.scales
    }

    #[inline]
    #[must_use]
    pub fn offsets(&self) -> &[f64; MAGNETS] {
        &self.offsets
    }

    #[inline]
    #[must_use]
    pub fn readback(&self) -> &[f64; MAGNETS] {
        &self.readback
    }

    pub fn set_scales(&mut self, scales: [f64; MAGNETS]) {
        self.scales = scales;
    }

    pub fn set_offsets(&mut self, offsets: [f64; MAGNETS]) {
        self.offsets = offsets;
    }

    /// Take a live current readback for display. Anything malformed (wrong
    /// length, unparsed values upstream) is replaced by the all-NaN sentinel
    /// rather than treated as an error.
    pub fn set_readback(&mut self, values: &[f64]) {
        if values.len() == MAGNETS {
            self.readback.copy_from_slice(values);
        } else {
            self.readback = NO_READBACK;
        }
    }

    /// Pure frame computation for time `t`: identical inputs give
    /// bit-identical frames.
    ///
    /// # Errors
    /// Propagates an unphysical current setting.
    pub fn compute_frame(&self, t: f64) -> Result<Frame, StepError> {
        let currents = self.model.currents(t, &self.scales, &self.offsets);
        let kicks = self.model.amps_to_radians(&currents)?;
        let (trajectory, photons) = self.lattice.generate_beams(&kicks)?;
        Ok(Frame {
            trajectory,
            photons,
            currents,
            kicks,
        })
    }

    /// One display step: compute the frame for time `t` and append each
    /// photon beam's detector displacement to its history log.
    ///
    /// # Errors
    /// Propagates an unphysical current setting; the logs stay untouched in
    /// that case.
    pub fn step(&mut self, t: f64) -> Result<Frame, StepError> {
        let frame = self.compute_frame(t)?;
        for (log, photon) in self.detector_logs.iter_mut().zip(&frame.photons) {
            log.push(photon.at_detector.displacement);
        }
        Ok(frame)
    }

    /// Photon-beam envelope: the beams at the two extremes of the switching
    /// cycle (sine at plus and minus one), which bound the sweep at the
    /// detector. The two passes are independent and run in parallel.
    ///
    /// # Errors
    /// Propagates an unphysical current setting from either extreme.
    pub fn sweep_range(&self) -> Result<[Vec<PhotonBeam>; 2], StepError> {
        let quarter = self.model.period_steps() / 4.0;
        let (first, second) = rayon::join(
            || self.photons_at(quarter),
            || self.photons_at(3.0 * quarter),
        );
        Ok([first?, second?])
    }

    /// Photon beams with every magnet held at `currents`, signed through the
    /// chicane polarity pattern: the hard limit the sweep can never exceed.
    ///
    /// # Errors
    /// Propagates an unphysical current setting.
    pub fn beam_limits(&self, currents: &[f64; MAGNETS]) -> Result<Vec<PhotonBeam>, StepError> {
        let mut kicks = self.model.amps_to_radians(currents)?;
        for (kick, polarity) in kicks.iter_mut().zip(&CHICANE_POLARITY) {
            *kick *= polarity;
        }
        let (_, photons) = self.lattice.generate_beams(&kicks)?;
        Ok(photons)
    }

    fn photons_at(&self, t: f64) -> Result<Vec<PhotonBeam>, StepError> {
        Ok(self.compute_frame(t)?.photons)
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            scales: self.scales,
            offsets: self.offsets,
            knobs: self.knobs.clone(),
        }
    }

    pub fn restore(&mut self, snapshot: Snapshot) {
        self.scales = snapshot.scales;
        self.offsets = snapshot.offsets;
        self.knobs = snapshot.knobs;
    }

    fn apply_jog(&mut self, jog: Jog) {
        match jog.target {
            Target::Scales => self.scales = jog.values,
            Target::Offsets => self.offsets = jog.values,
        }
    }

    fn process_array_command(
        &mut self,
        target: Target,
        cmd: Split<'_, char>,
    ) -> Result<String, ()> {
        let values = match target {
            Target::Scales => &mut self.scales,
            Target::Offsets => &mut self.offsets,
        };
        match cmd.collect::<Vec<&str>>()[..] {
            ["GET"] => Ok(join_values(values)),
            ["SET", index, value] => {
                let n = index.parse::<usize>().map_err(|_| ())?;
                if n >= MAGNETS {
                    return Err(());
                }
                values[n] = value.parse::<f64>().map_err(|_| ())?;
                Ok(String::new())
            }
            _ => Err(()),
        }
    }

    fn process_jog_command(&mut self, cmd: Split<'_, char>) -> Result<String, ()> {
        match cmd.collect::<Vec<&str>>()[..] {
            [mv, factor] => {
                let mv = Move::from_keyword(mv).ok_or(())?;
                let factor = factor.parse::<f64>().map_err(|_| ())?;
                match self.knobs.jog(&self.scales, &self.offsets, mv, factor) {
                    Ok(jog) => {
                        self.apply_jog(jog);
                        Ok(String::new())
                    }
                    Err(e) => Ok(format!("rejected: {e}")),
                }
            }
            _ => Err(()),
        }
    }

    fn process_readback_command(&mut self, cmd: Split<'_, char>) -> Result<String, ()> {
        match cmd.collect::<Vec<&str>>()[..] {
            ["GET"] => Ok(join_values(&self.readback)),
            ["SET", ref raw @ ..] => {
                let mut values = Vec::with_capacity(raw.len());
                for word in raw {
                    match word.parse::<f64>() {
                        Ok(x) => values.push(x),
                        Err(_) => {
                            values.clear();
                            break;
                        }
                    }
                }
                self.set_readback(&values);
                Ok(String::new())
            }
            _ => Err(()),
        }
    }

    fn process_range_command(&mut self, cmd: Split<'_, char>) -> Result<String, ()> {
        match cmd.collect::<Vec<&str>>()[..] {
            ["GET"] => match self.sweep_range() {
                Ok([first, second]) => Ok(format!(
                    "{} / {}",
                    detector_ends(&first),
                    detector_ends(&second)
                )),
                Err(e) => Ok(format!("rejected: {e}")),
            },
            _ => Err(()),
        }
    }

    // photon beams with the supplies at their maximum settings: the hard
    // envelope the front-ends shade behind the live sweep
    fn process_limits_command(&mut self, cmd: Split<'_, char>) -> Result<String, ()> {
        match cmd.collect::<Vec<&str>>()[..] {
            ["GET"] => match self.beam_limits(&self.knobs.imax) {
                Ok(photons) => Ok(detector_ends(&photons)),
                Err(e) => Ok(format!("rejected: {e}")),
            },
            _ => Err(()),
        }
    }

    /// Handle an incoming operator command by routing it to the right
    /// sub-handler. Returns the response text for the sender.
    ///
    /// # Errors
    /// Returns `Err(())` when `cmd` is not a recognisable command.
    pub fn process_command(&mut self, mut cmd: Split<'_, char>) -> Result<String, ()> {
        match cmd.next() {
            Some("SCALE") => self.process_array_command(Target::Scales, cmd),
            Some("OFFSET") => self.process_array_command(Target::Offsets, cmd),
            Some("JOG") => self.process_jog_command(cmd),
            Some("KNOBS") => self.knobs.process_command(cmd),
            Some("READBACK") => self.process_readback_command(cmd),
            Some("RANGE") => self.process_range_command(cmd),
            Some("LIMITS") => self.process_limits_command(cmd),
            Some(_) | None => Err(()),
        }
    }
}

fn detector_ends(photons: &[PhotonBeam]) -> String {
    join_values(
        &photons
            .iter()
            .map(|p| p.at_detector.displacement)
            .collect::<Vec<_>>(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lattice::Layout;

    const STRAIGHT: &str = "\
kicker 2
kicker 4
insertiondevice 8
kicker 12
insertiondevice 16
kicker 20
kicker 22
detector 42
";

    fn straight() -> Straight {
        let layout = Layout::parse(STRAIGHT).unwrap();
        let model = StrengthModel::from_layout(&layout).unwrap();
        let mut out = Straight::new(layout, model, Knobs::new(), 6).unwrap();
        out.set_scales([11.6, 11.6, 5.0, 11.5, 11.5]);
        out.set_offsets([5.8, 5.8, 2.5, 5.8, 5.8]);
        out
    }

    #[test]
    fn frames_are_bit_identical_for_identical_inputs() {
        let s = straight();
        let a = s.compute_frame(123.4).unwrap();
        let b = s.compute_frame(123.4).unwrap();
        for (x, y) in a.trajectory.iter().zip(&b.trajectory) {
            assert_eq!(x.beam.displacement.to_bits(), y.beam.displacement.to_bits());
            assert_eq!(x.beam.angle.to_bits(), y.beam.angle.to_bits());
        }
        for n in 0..MAGNETS {
            assert_eq!(a.kicks[n].to_bits(), b.kicks[n].to_bits());
            assert_eq!(a.currents[n].to_bits(), b.currents[n].to_bits());
        }
    }

    #[test]
    fn step_logs_detector_displacements() {
        let mut s = straight();
        let frame = s.step(0.0).unwrap();
        assert_eq!(frame.photons.len(), 2);
        for (log, photon) in s.detector_logs.iter().zip(&frame.photons) {
            let last: Vec<f64> = log.last_n(1).collect();
            assert_eq!(last[0].to_bits(), photon.at_detector.displacement.to_bits());
        }
    }

    #[test]
    fn scale_commands_round_trip() {
        let mut s = straight();
        assert_eq!(
            s.process_command("SCALE:SET:2:7.5".split(':')),
            Ok(String::new())
        );
        let listed = s.process_command("SCALE:GET".split(':')).unwrap();
        assert!(listed.contains("7.5"), "{listed}");
        assert!((s.scales()[2] - 7.5).abs() < 1e-12);
        assert!(s.process_command("SCALE:SET:9:1.0".split(':')).is_err());
    }

    #[test]
    fn jog_command_applies_and_rejects() {
        let mut s = straight();
        let before_k3 = s.scales()[2];
        assert_eq!(
            s.process_command("JOG:STEP_K3:1".split(':')),
            Ok(String::new())
        );
        assert!((s.scales()[2] - (before_k3 + 0.01)).abs() < 1e-12);

        // an enormous bump runs over the current limits and changes nothing
        let offsets = *s.offsets();
        let response = s.process_command("JOG:BUMP_LEFT:1e6".split(':')).unwrap();
        assert!(response.starts_with("rejected"), "{response}");
        assert!(response.contains("magnet 0"), "{response}");
        assert_eq!(*s.offsets(), offsets);
    }

    #[test]
    fn malformed_readback_becomes_the_sentinel() {
        let mut s = straight();
        assert_eq!(
            s.process_command("READBACK:SET:1:2:3:4:5".split(':')),
            Ok(String::new())
        );
        assert!((s.readback()[4] - 5.0).abs() < 1e-12);

        assert_eq!(
            s.process_command("READBACK:SET:1:2:3".split(':')),
            Ok(String::new())
        );
        assert!(s.readback().iter().all(|x| x.is_nan()));

        s.set_readback(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(
            s.process_command("READBACK:SET:1:2:oops:4:5".split(':')),
            Ok(String::new())
        );
        assert!(s.readback().iter().all(|x| x.is_nan()));
    }

    #[test]
    fn sweep_range_bounds_the_live_beams() {
        let s = straight();
        let [high, low] = s.sweep_range().unwrap();
        assert_eq!(high.len(), 2);
        assert_eq!(low.len(), 2);
        // a frame mid-cycle lands between the two extremes at the detector
        let frame = s.compute_frame(17.0).unwrap();
        for (n, photon) in frame.photons.iter().enumerate() {
            let a = high[n].at_detector.displacement;
            let b = low[n].at_detector.displacement;
            let x = photon.at_detector.displacement;
            assert!(x >= a.min(b) - 1e-9 && x <= a.max(b) + 1e-9);
        }
    }

    #[test]
    fn beam_limits_contain_the_sweep() {
        let mut s = straight();
        let limits = s.beam_limits(&s.knobs.imax).unwrap();
        let [high, low] = s.sweep_range().unwrap();
        for n in 0..limits.len() {
            let edge = limits[n].at_detector.displacement.abs();
            assert!(high[n].at_detector.displacement.abs() <= edge + 1e-9);
            assert!(low[n].at_detector.displacement.abs() <= edge + 1e-9);
        }
        let listed = s
            .process_command("LIMITS:GET".split(':'))
            .unwrap();
        assert!(!listed.is_empty());
    }

    #[test]
    fn snapshot_round_trips_through_toml() {
        let mut s = straight();
        s.knobs.set_jog_scale(0.5);
        let text = toml::to_string(&s.snapshot()).unwrap();
        let restored: Snapshot = toml::from_str(&text).unwrap();

        let mut fresh = straight();
        fresh.set_scales([0.0; MAGNETS]);
        fresh.restore(restored);
        assert_eq!(fresh.scales(), s.scales());
        assert_eq!(fresh.offsets(), s.offsets());
        assert!((fresh.knobs.jog_scale() - 0.5).abs() < 1e-12);
    }
}
