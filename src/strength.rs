#![warn(clippy::pedantic)]

//! Kicker excitation model: the sinusoidal switching waves, the closed-orbit
//! geometry ratios, and the conversion from magnet current to deflection
//! angle.

use std::f64::consts::TAU;
use std::fmt;

use crate::lattice::Layout;

/// Number of kicker magnets in the fast chicane.
pub const MAGNETS: usize = 5;

pub const ELECTRON_ENERGY_EV: f64 = 3.0e9;
pub const SPEED_OF_LIGHT: f64 = 2.997_924_58e8;

/// Beam rigidity in T·m for the nominal beam energy.
pub const BEAM_RIGIDITY: f64 = ELECTRON_ENERGY_EV / SPEED_OF_LIGHT;

/// Per-magnet current-to-field calibration in T/A, signed with the wiring
/// polarity of each supply. Values from the machine magnet calibrations.
pub const AMP_TO_TESLA: [f64; MAGNETS] = [
    0.034796 / 23.0,
    -0.044809 / 23.0,
    0.011786 / 12.0,
    -0.045012 / 23.0,
    0.035174 / 23.0,
];

/// Alternating polarity pattern that points the magnets through the chicane.
pub const CHICANE_POLARITY: [f64; MAGNETS] = [1.0, -1.0, 1.0, -1.0, 1.0];

/// A magnet current that no physical field can realise: the arcsin argument
/// of the current-to-angle conversion left [-1, 1].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnphysicalCurrent {
    pub magnet: usize,
    pub argument: f64,
}

impl fmt::Display for UnphysicalCurrent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "magnet {} current is unphysical (arcsin argument {})",
            self.magnet, self.argument
        )
    }
}

#[derive(Debug, Clone)]
pub struct StrengthModel {
    amp_to_tesla: [f64; MAGNETS],
    max_kick: [f64; MAGNETS],
    period: f64,
}

impl StrengthModel {
    /// Derive the closed-orbit geometry ratios from the live kicker
    /// positions of `layout`. The peak-kick pattern keeps the beam on axis
    /// outside the kicker region for every phase of the switching cycle.
    ///
    /// # Errors
    /// The chicane model needs exactly [`MAGNETS`] kickers.
    pub fn from_layout(layout: &Layout) -> Result<Self, String> {
        let k = layout.kicker_positions();
        if k.len() != MAGNETS {
            return Err(format!(
                "the chicane model needs {MAGNETS} kickers, layout has {}",
                k.len()
            ));
        }
        let d12 = (k[1] - k[0]) / (k[2] - k[1]);
        let d34 = (k[3] - k[2]) / (k[4] - k[3]);
        Ok(StrengthModel {
            amp_to_tesla: AMP_TO_TESLA,
            max_kick: [
                1.0,
                1.0 + d12,
                2.0 * d12,
                d12 * (1.0 + d34),
                d12 * d34,
            ],
            period: 200.0,
        })
    }

    pub fn calibration(&mut self, amp_to_tesla: [f64; MAGNETS]) -> &mut Self {
        self.amp_to_tesla = amp_to_tesla;
        self
    }

    pub fn period(&mut self, period: f64) -> &mut Self {
        if period.is_finite() && period > 0.0 {
            self.period = period;
        }
        self
    }

    #[inline]
    #[must_use]
    pub fn period_steps(&self) -> f64 {
        self.period
    }

    #[inline]
    #[must_use]
    pub fn max_kick(&self) -> &[f64; MAGNETS] {
        &self.max_kick
    }

    /// Normalised excitation waveforms at time `t`, one per magnet. The
    /// outer pairs swing in antiphase between 0 and 1 while the central
    /// magnet holds its full setting.
    #[must_use]
    pub fn waves(&self, t: f64) -> [f64; MAGNETS] {
        let s = (TAU * t / self.period).sin();
        [
            0.5 * (s + 1.0),
            0.5 * (s + 1.0),
            1.0,
            0.5 * (1.0 - s),
            0.5 * (1.0 - s),
        ]
    }

    /// Time-driven kick pattern in geometry units: the peak-kick ratios with
    /// the alternating chicane polarity applied, so the orbit closes at the
    /// last kicker for every `t`.
    #[must_use]
    pub fn geometry_kicks(&self, t: f64) -> [f64; MAGNETS] {
        let w = (TAU * t / self.period).sin() + 1.0;
        let pattern = [w, -w, 1.0, w - 2.0, 2.0 - w];
        let mut kicks = [0.0; MAGNETS];
        for n in 0..MAGNETS {
            kicks[n] = 0.5 * self.max_kick[n] * pattern[n];
        }
        kicks
    }

    /// Resolve per-magnet currents at time `t` from the amplitude (`scales`)
    /// and midpoint (`offsets`) settings of the supplies.
    #[must_use]
    pub fn currents(
        &self,
        t: f64,
        scales: &[f64; MAGNETS],
        offsets: &[f64; MAGNETS],
    ) -> [f64; MAGNETS] {
        let waves = self.waves(t);
        let mut currents = [0.0; MAGNETS];
        for n in 0..MAGNETS {
            currents[n] = scales[n] * waves[n] + offsets[n];
        }
        currents
    }

    /// Convert currents (A) to fields (T) to deflection angles (rad).
    ///
    /// # Errors
    /// Fails on the first magnet whose current puts the arcsin argument
    /// outside [-1, 1] (including NaN) instead of letting NaN through.
    pub fn amps_to_radians(
        &self,
        currents: &[f64; MAGNETS],
    ) -> Result<[f64; MAGNETS], UnphysicalCurrent> {
        let mut kicks = [0.0; MAGNETS];
        for n in 0..MAGNETS {
            let field = currents[n] * self.amp_to_tesla[n];
            let argument = field / (2.0 * BEAM_RIGIDITY);
            if !(argument.abs() <= 1.0) {
                return Err(UnphysicalCurrent {
                    magnet: n,
                    argument,
                });
            }
            kicks[n] = 2.0 * argument.asin();
        }
        Ok(kicks)
    }

    /// Exact inverse of [`StrengthModel::amps_to_radians`] on the valid
    /// range.
    #[must_use]
    pub fn radians_to_amps(&self, kicks: &[f64; MAGNETS]) -> [f64; MAGNETS] {
        let mut currents = [0.0; MAGNETS];
        for n in 0..MAGNETS {
            currents[n] = 2.0 * BEAM_RIGIDITY * (kicks[n] / 2.0).sin() / self.amp_to_tesla[n];
        }
        currents
    }
}

#[cfg(test)]
mod tests {
    use rand::Rng;

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

    fn model() -> StrengthModel {
        let layout = Layout::parse(STRAIGHT).unwrap();
        StrengthModel::from_layout(&layout).unwrap()
    }

    #[test]
    fn geometry_ratios_come_from_the_kicker_spacing() {
        let m = model();
        // d12 = 2/8, d34 = 8/2 for the reference spacing
        let expected = [1.0, 1.25, 0.5, 1.25, 1.0];
        for (got, want) in m.max_kick().iter().zip(&expected) {
            assert!((got - want).abs() < 1e-12);
        }
    }

    #[test]
    fn needs_a_full_set_of_kickers() {
        let layout = Layout::parse("kicker 2\nkicker 4\nid 8\ndetector 10\n").unwrap();
        assert!(StrengthModel::from_layout(&layout).is_err());
    }

    #[test]
    fn waves_are_periodic() {
        let m = model();
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let t = rng.gen_range(-1000.0..1000.0);
            let now = m.waves(t);
            let later = m.waves(t + m.period_steps());
            for n in 0..MAGNETS {
                assert!((now[n] - later[n]).abs() < 1e-9, "t = {t}, magnet {n}");
            }
        }
    }

    #[test]
    fn geometry_kicks_close_the_orbit() {
        let layout = Layout::parse(STRAIGHT).unwrap();
        let m = StrengthModel::from_layout(&layout).unwrap();
        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            let t = rng.gen_range(0.0..400.0);
            let (trajectory, photons) = layout.generate_beams(&m.geometry_kicks(t)).unwrap();
            let exit = trajectory.last().unwrap();
            assert!(exit.beam.displacement.abs() < 1e-9, "t = {t}");
            assert!(exit.beam.angle.abs() < 1e-9, "t = {t}");
            assert_eq!(photons.len(), 2);
        }
    }

    #[test]
    fn current_conversion_round_trips_in_range() {
        let m = model();
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let mut currents = [0.0; MAGNETS];
            for c in &mut currents {
                *c = rng.gen_range(-23.0..23.0);
            }
            let kicks = m.amps_to_radians(&currents).unwrap();
            let back = m.radians_to_amps(&kicks);
            for n in 0..MAGNETS {
                assert!(
                    (back[n] - currents[n]).abs() < 1e-9 * currents[n].abs().max(1.0),
                    "magnet {n}: {} vs {}",
                    back[n],
                    currents[n]
                );
            }
        }
    }

    #[test]
    fn calibration_sign_carries_into_the_kick() {
        let m = model();
        let kicks = m.amps_to_radians(&[10.0; MAGNETS]).unwrap();
        assert!(kicks[0] > 0.0);
        assert!(kicks[1] < 0.0);
        assert!(kicks[3] < 0.0);
        assert!(kicks[4] > 0.0);
    }

    #[test]
    fn unphysical_current_is_an_error_not_a_nan() {
        let m = model();
        let err = m
            .amps_to_radians(&[1.0, 2.0e7, 1.0, 1.0, 1.0])
            .unwrap_err();
        assert_eq!(err.magnet, 1);
        assert!(err.argument.abs() > 1.0);

        let err = m
            .amps_to_radians(&[f64::NAN, 1.0, 1.0, 1.0, 1.0])
            .unwrap_err();
        assert_eq!(err.magnet, 0);
    }

    #[test]
    fn currents_follow_scales_and_offsets() {
        let m = model();
        let scales = [4.0; MAGNETS];
        let offsets = [1.0; MAGNETS];
        // a quarter period in: sin = 1, so the first pair is at full swing
        let currents = m.currents(m.period_steps() / 4.0, &scales, &offsets);
        assert!((currents[0] - 5.0).abs() < 1e-9);
        assert!((currents[2] - 5.0).abs() < 1e-9);
        assert!((currents[4] - 1.0).abs() < 1e-9);
    }
}
