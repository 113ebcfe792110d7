#![warn(clippy::pedantic)]

//! Coordinated magnet moves for manual steering: per-move delta vectors,
//! a global jog scale, and the current-limit check that rejects a move
//! before it reaches the supplies.

use std::fmt;
use std::str::Split;

use serde::{Deserialize, Serialize};

use crate::strength::MAGNETS;

/// The coordinated moves an operator can request. The scale moves act on
/// the waveform amplitudes, the bumps on the supply midpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Move {
    Scale,
    StepK3,
    BumpLeft,
    BumpRight,
}

impl Move {
    #[must_use]
    pub fn from_keyword(word: &str) -> Option<Self> {
        match word {
            "SCALE" => Some(Move::Scale),
            "STEP_K3" => Some(Move::StepK3),
            "BUMP_LEFT" => Some(Move::BumpLeft),
            "BUMP_RIGHT" => Some(Move::BumpRight),
            _ => None,
        }
    }

    /// Which settings array the move applies to.
    #[must_use]
    pub fn target(self) -> Target {
        match self {
            Move::Scale | Move::StepK3 => Target::Scales,
            Move::BumpLeft | Move::BumpRight => Target::Offsets,
        }
    }
}

impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Move::Scale => write!(f, "SCALE"),
            Move::StepK3 => write!(f, "STEP_K3"),
            Move::BumpLeft => write!(f, "BUMP_LEFT"),
            Move::BumpRight => write!(f, "BUMP_RIGHT"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Scales,
    Offsets,
}

/// A jog was rejected because it would push a magnet outside its current
/// limits; `magnet` is the first offending index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverCurrentError {
    pub magnet: usize,
}

impl fmt::Display for OverCurrentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "magnet {} would exceed its current limits", self.magnet)
    }
}

/// An accepted jog: the array it targets and the values to apply.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Jog {
    pub target: Target,
    pub values: [f64; MAGNETS],
}

#[derive(Debug, Clone, PartialEq)]
pub struct Knobs {
    pub dscale: [f64; MAGNETS],
    pub dk3: [f64; MAGNETS],
    pub bump_left: [f64; MAGNETS],
    pub bump_right: [f64; MAGNETS],
    pub imin: [f64; MAGNETS],
    pub imax: [f64; MAGNETS],
    jog_scale: f64,
}

impl Default for Knobs {
    fn default() -> Self {
        Knobs {
            dscale: [1.0e-2, 1.0e-2, 0.0, 1.0e-2, 1.0e-2],
            dk3: [0.0, 0.0, 1.0e-2, 0.0, 0.0],
            // 600 clicks move a bump through the full supply range
            bump_left: [23.2610 / 600.0, 23.2145 / 600.0, 10.1888 / 600.0, 0.0, 0.0],
            bump_right: [0.0, 0.0, 10.1888 / 600.0, 23.1068 / 600.0, 23.0378 / 600.0],
            imin: [-23.2610, -23.2145, -10.1888, -23.1068, -23.0378],
            imax: [23.2610, 23.2145, 10.1888, 23.1068, 23.0378],
            jog_scale: 1.0,
        }
    }
}

impl Knobs {
    #[must_use]
    pub fn new() -> Self {
        Knobs {
            ..Default::default()
        }
    }

    pub fn set_jog_scale(&mut self, scale: f64) {
        if scale.is_finite() && scale > 0.0 {
            self.jog_scale = scale;
        }
    }

    #[inline]
    #[must_use]
    pub fn jog_scale(&self) -> f64 {
        self.jog_scale
    }

    #[must_use]
    pub fn move_vector(&self, mv: Move) -> [f64; MAGNETS] {
        match mv {
            Move::Scale => self.dscale,
            Move::StepK3 => self.dk3,
            Move::BumpLeft => self.bump_left,
            Move::BumpRight => self.bump_right,
        }
    }

    /// Work out the jogged settings array for `mv` scaled by `factor`, then
    /// check every magnet's projected current excursion (midpoint plus and
    /// minus the waveform amplitude) against its limits.
    ///
    /// # Errors
    /// Rejects the whole jog on the first magnet whose excursion would leave
    /// `[imin, imax]`, identifying that magnet; no state is modified.
    pub fn jog(
        &self,
        scales: &[f64; MAGNETS],
        offsets: &[f64; MAGNETS],
        mv: Move,
        factor: f64,
    ) -> Result<Jog, OverCurrentError> {
        let vector = self.move_vector(mv);
        let target = mv.target();
        let mut values = match target {
            Target::Scales => *scales,
            Target::Offsets => *offsets,
        };
        for (value, delta) in values.iter_mut().zip(&vector) {
            *value += delta * factor * self.jog_scale;
        }
        for n in 0..MAGNETS {
            let (high, low) = match target {
                Target::Scales => (
                    offsets[n] + values[n].abs(),
                    offsets[n] - values[n].abs(),
                ),
                Target::Offsets => (
                    values[n] + scales[n].abs(),
                    values[n] - scales[n].abs(),
                ),
            };
            if high > self.imax[n] || low < self.imin[n] {
                return Err(OverCurrentError { magnet: n });
            }
        }
        Ok(Jog { target, values })
    }

    /// # Errors
    /// Returns `Err(())` when the command cannot be parsed.
    pub fn process_command(&mut self, cmd: Split<'_, char>) -> Result<String, ()> {
        match cmd.collect::<Vec<&str>>()[..] {
            ["JOG_SCALE", "SET", x] => {
                self.set_jog_scale(x.parse::<f64>().map_err(|_| ())?);
                Ok(String::new())
            }
            ["JOG_SCALE", "GET"] => Ok(self.jog_scale.to_string()),
            ["IMAX", "GET"] => Ok(join_values(&self.imax)),
            ["IMIN", "GET"] => Ok(join_values(&self.imin)),
            _ => Err(()),
        }
    }
}

pub(crate) fn join_values(values: &[f64]) -> String {
    values
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Serialize, Deserialize, Debug)]
struct KnobsRepr {
    dscale: [f64; MAGNETS],
    dk3: [f64; MAGNETS],
    bump_left: [f64; MAGNETS],
    bump_right: [f64; MAGNETS],
    imin: [f64; MAGNETS],
    imax: [f64; MAGNETS],
    jog_scale: f64,
}

impl KnobsRepr {
    fn into_knobs(self) -> Knobs {
        let mut out = Knobs::new();
        out.dscale = self.dscale;
        out.dk3 = self.dk3;
        out.bump_left = self.bump_left;
        out.bump_right = self.bump_right;
        out.imin = self.imin;
        out.imax = self.imax;
        out.set_jog_scale(self.jog_scale);
        out
    }

    fn from_knobs(knobs: &Knobs) -> Self {
        KnobsRepr {
            dscale: knobs.dscale,
            dk3: knobs.dk3,
            bump_left: knobs.bump_left,
            bump_right: knobs.bump_right,
            imin: knobs.imin,
            imax: knobs.imax,
            jog_scale: knobs.jog_scale(),
        }
    }
}

impl<'de> Deserialize<'de> for Knobs {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        Ok(KnobsRepr::deserialize(d)?.into_knobs())
    }
}

impl Serialize for Knobs {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        KnobsRepr::from_knobs(self).serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wide_open() -> Knobs {
        let mut knobs = Knobs::new();
        knobs.imin = [-1000.0; MAGNETS];
        knobs.imax = [1000.0; MAGNETS];
        knobs
    }

    #[test]
    fn moves_pick_their_target() {
        assert_eq!(Move::Scale.target(), Target::Scales);
        assert_eq!(Move::StepK3.target(), Target::Scales);
        assert_eq!(Move::BumpLeft.target(), Target::Offsets);
        assert_eq!(Move::BumpRight.target(), Target::Offsets);
    }

    #[test]
    fn keywords_round_trip() {
        for mv in [Move::Scale, Move::StepK3, Move::BumpLeft, Move::BumpRight] {
            assert_eq!(Move::from_keyword(&mv.to_string()), Some(mv));
        }
        assert_eq!(Move::from_keyword("SPIN"), None);
    }

    #[test]
    fn accepted_jog_applies_the_move_vector() {
        let knobs = wide_open();
        let scales = [10.0; MAGNETS];
        let offsets = [5.0; MAGNETS];
        let jog = knobs.jog(&scales, &offsets, Move::Scale, 2.0).unwrap();
        assert_eq!(jog.target, Target::Scales);
        for n in 0..MAGNETS {
            assert!((jog.values[n] - (10.0 + 2.0 * knobs.dscale[n])).abs() < 1e-12);
        }
    }

    #[test]
    fn jog_scale_multiplies_the_step() {
        let mut knobs = wide_open();
        let scales = [10.0; MAGNETS];
        let offsets = [0.0; MAGNETS];
        let single = knobs.jog(&scales, &offsets, Move::StepK3, 1.0).unwrap();
        knobs.set_jog_scale(3.0);
        let tripled = knobs.jog(&scales, &offsets, Move::StepK3, 1.0).unwrap();
        assert!(
            ((tripled.values[2] - scales[2]) - 3.0 * (single.values[2] - scales[2])).abs() < 1e-12
        );
    }

    #[test]
    fn over_limit_jog_names_the_first_offending_magnet() {
        let mut knobs = wide_open();
        knobs.imax = [1000.0, 1000.0, 1000.0, 5.0, 1000.0];
        let scales = [10.0; MAGNETS];
        let offsets = [0.0; MAGNETS];
        let err = knobs
            .jog(&scales, &offsets, Move::BumpRight, 1.0)
            .unwrap_err();
        assert_eq!(err, OverCurrentError { magnet: 3 });
    }

    #[test]
    fn rejected_jog_checks_both_excursions() {
        let mut knobs = wide_open();
        knobs.imin = [0.0; MAGNETS];
        // midpoint minus amplitude dips below zero on the first magnet
        let scales = [6.0; MAGNETS];
        let offsets = [5.0; MAGNETS];
        let err = knobs.jog(&scales, &offsets, Move::Scale, 1.0).unwrap_err();
        assert_eq!(err, OverCurrentError { magnet: 0 });
    }

    #[test]
    fn command_round_trip() {
        let mut knobs = wide_open();
        assert_eq!(
            knobs.process_command("JOG_SCALE:SET:2.5".split(':')),
            Ok(String::new())
        );
        assert_eq!(
            knobs.process_command("JOG_SCALE:GET".split(':')),
            Ok("2.5".to_string())
        );
        assert!(knobs.process_command("JOG_SCALE:SET:nope".split(':')).is_err());
        assert!(knobs.process_command("COLOUR:GET".split(':')).is_err());
    }

    #[test]
    fn serde_round_trips_through_toml() {
        let mut knobs = Knobs::new();
        knobs.set_jog_scale(0.25);
        knobs.imax = [20.0; MAGNETS];
        let text = toml::to_string(&knobs).unwrap();
        let back: Knobs = toml::from_str(&text).unwrap();
        assert_eq!(back, knobs);
    }
}
