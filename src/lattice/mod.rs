#![warn(clippy::pedantic)]

//! Optics of the straight: devices at fixed positions along the axis, and the
//! single pass that carries the electron beam through them.

use std::fmt;

/// Transverse state of the electron beam at one point along the straight:
/// displacement off the reference axis and angle against it.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BeamVector {
    pub displacement: f64,
    pub angle: f64,
}

impl BeamVector {
    pub const ON_AXIS: BeamVector = BeamVector {
        displacement: 0.0,
        angle: 0.0,
    };

    /// Free flight over `length`: the shear [[1, L], [0, 1]].
    #[inline]
    #[must_use]
    pub fn drift(self, length: f64) -> Self {
        BeamVector {
            displacement: self.displacement + length * self.angle,
            angle: self.angle,
        }
    }

    /// Angular deflection by a thin magnet; displacement is untouched.
    #[inline]
    #[must_use]
    pub fn kick(self, strength: f64) -> Self {
        BeamVector {
            displacement: self.displacement,
            angle: self.angle + strength,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Drift,
    Kicker,
    InsertionDevice,
    Detector,
}

impl Device {
    fn from_keyword(word: &str) -> Option<Self> {
        match word {
            "kicker" => Some(Device::Kicker),
            "insertiondevice" | "id" => Some(Device::InsertionDevice),
            "detector" => Some(Device::Detector),
            _ => None,
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Drift => write!(f, "drift"),
            Device::Kicker => write!(f, "kicker"),
            Device::InsertionDevice => write!(f, "insertiondevice"),
            Device::Detector => write!(f, "detector"),
        }
    }
}

/// One node of the straight. `length` is only meaningful for drifts, where it
/// is derived from the gap to the following device rather than configured.
#[derive(Debug, Clone, Copy)]
pub struct Element {
    pub device: Device,
    pub s: f64,
    length: f64,
}

impl Element {
    fn thin(device: Device, s: f64) -> Self {
        Element {
            device,
            s,
            length: 0.0,
        }
    }

    #[inline]
    #[must_use]
    pub fn length(&self) -> f64 {
        self.length
    }

    /// Axial position at which the beam leaves this element.
    #[inline]
    #[must_use]
    pub fn exit_s(&self) -> f64 {
        self.s + self.length
    }
}

/// Beam state recorded at the exit of one element.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrajectoryPoint {
    pub s: f64,
    pub beam: BeamVector,
}

/// A photon beam seeded at an insertion device and drifted to the detector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhotonBeam {
    pub source_s: f64,
    pub detector_s: f64,
    pub emitted: BeamVector,
    pub at_detector: BeamVector,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingError {
    KickCount { expected: usize, got: usize },
}

impl fmt::Display for TrackingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackingError::KickCount { expected, got } => {
                write!(f, "expected {expected} kicker strengths, got {got}")
            }
        }
    }
}

/// Ordered device chain of the straight, built once from a line-oriented
/// description (`kicker 2.0` per line) and immutable afterwards. Drift
/// sections are derived from the spacing between consecutive devices.
#[derive(Debug, Clone)]
pub struct Layout {
    path: Vec<Element>,
    kicker_count: usize,
    id_count: usize,
    detector_s: f64,
}

impl Layout {
    /// Parse a layout description: one `keyword position` pair per line, with
    /// blank lines and `#` comments ignored. Positions must be strictly
    /// increasing and the final device must be the detector.
    ///
    /// # Errors
    /// Returns a line-numbered message for an unknown keyword, a malformed
    /// position, or an ordering violation.
    pub fn parse(text: &str) -> Result<Self, String> {
        let mut devices = Vec::new();
        for (index, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut words = line.split_whitespace();
            let keyword = words.next().ok_or("empty layout line")?;
            if keyword == "drift" {
                return Err(format!(
                    "layout line {}: drift sections are derived from device spacing, not declared",
                    index + 1
                ));
            }
            let device = Device::from_keyword(keyword)
                .ok_or_else(|| format!("layout line {}: unknown device '{keyword}'", index + 1))?;
            let s = words
                .next()
                .and_then(|w| w.parse::<f64>().ok())
                .ok_or_else(|| format!("layout line {}: missing or bad position", index + 1))?;
            if words.next().is_some() {
                return Err(format!("layout line {}: trailing fields", index + 1));
            }
            devices.push((device, s));
        }
        Self::from_devices(&devices)
    }

    /// Build a layout from already-parsed `(device, position)` pairs.
    ///
    /// # Errors
    /// See [`Layout::parse`].
    pub fn from_devices(devices: &[(Device, f64)]) -> Result<Self, String> {
        let first_s = devices.first().map(|d| d.1).ok_or("layout describes no devices")?;
        if first_s < 0.0 {
            return Err("layout starts before the beginning of the straight".into());
        }
        let mut path = Vec::with_capacity(devices.len() * 2);
        let mut cursor = 0.0_f64;
        for (n, &(device, s)) in devices.iter().enumerate() {
            if n > 0 && s <= cursor {
                return Err(format!(
                    "device positions must be strictly increasing ({device} at {s} after {cursor})"
                ));
            }
            if device == Device::Drift {
                return Err("drift sections are derived from device spacing, not declared".into());
            }
            if s > cursor || n > 0 {
                path.push(Element {
                    device: Device::Drift,
                    s: cursor,
                    length: s - cursor,
                });
            }
            path.push(Element::thin(device, s));
            cursor = s;
        }
        let kicker_count = path.iter().filter(|e| e.device == Device::Kicker).count();
        let id_count = path
            .iter()
            .filter(|e| e.device == Device::InsertionDevice)
            .count();
        let last = path.last().ok_or("layout describes no devices")?;
        if last.device != Device::Detector {
            return Err("the final device of the layout must be the detector".into());
        }
        if kicker_count == 0 {
            return Err("layout has no kicker magnets".into());
        }
        if id_count == 0 {
            return Err("layout has no insertion devices".into());
        }
        let detector_s = last.s;
        Ok(Layout {
            path,
            kicker_count,
            id_count,
            detector_s,
        })
    }

    #[must_use]
    pub fn elements(&self) -> &[Element] {
        &self.path
    }

    pub fn devices(&self, which: Device) -> impl Iterator<Item = &Element> {
        self.path.iter().filter(move |e| e.device == which)
    }

    #[must_use]
    pub fn kicker_count(&self) -> usize {
        self.kicker_count
    }

    #[must_use]
    pub fn insertion_device_count(&self) -> usize {
        self.id_count
    }

    #[must_use]
    pub fn kicker_positions(&self) -> Vec<f64> {
        self.devices(Device::Kicker).map(|e| e.s).collect()
    }

    #[must_use]
    pub fn detector_s(&self) -> f64 {
        self.detector_s
    }

    /// Per insertion device: its position and the detector position its
    /// photon beam is drifted to.
    #[must_use]
    pub fn photon_coordinates(&self) -> Vec<(f64, f64)> {
        self.devices(Device::InsertionDevice)
            .map(|e| (e.s, self.detector_s))
            .collect()
    }

    /// Axial extent of the straight, start to detector.
    #[must_use]
    pub fn span(&self) -> (f64, f64) {
        (self.path[0].s, self.detector_s)
    }

    /// Carry the electron beam through the straight once.
    ///
    /// Kicker strengths are passed in, one per kicker in layout order; the
    /// layout itself holds no mutable state. The trajectory records the beam
    /// at the exit of every element, photon beams are seeded at each
    /// insertion device and drifted independently to the detector. Output is
    /// a pure function of `kicks` and the fixed geometry.
    ///
    /// # Errors
    /// Fails if `kicks` does not hold exactly one strength per kicker.
    pub fn generate_beams(
        &self,
        kicks: &[f64],
    ) -> Result<(Vec<TrajectoryPoint>, Vec<PhotonBeam>), TrackingError> {
        if kicks.len() != self.kicker_count {
            return Err(TrackingError::KickCount {
                expected: self.kicker_count,
                got: kicks.len(),
            });
        }
        let mut e = BeamVector::ON_AXIS;
        let mut next_kick = kicks.iter();
        let mut trajectory = Vec::with_capacity(self.path.len() + 1);
        let mut seeds = Vec::with_capacity(self.id_count);
        trajectory.push(TrajectoryPoint {
            s: self.path[0].s,
            beam: e,
        });
        for element in &self.path {
            e = match element.device {
                Device::Drift => e.drift(element.length),
                // count checked above, so the iterator cannot run dry
                Device::Kicker => e.kick(next_kick.next().copied().unwrap_or(0.0)),
                Device::InsertionDevice | Device::Detector => e,
            };
            if element.device == Device::InsertionDevice {
                seeds.push((element.s, e));
            }
            trajectory.push(TrajectoryPoint {
                s: element.exit_s(),
                beam: e,
            });
        }
        let photons = seeds
            .into_iter()
            .map(|(source_s, emitted)| PhotonBeam {
                source_s,
                detector_s: self.detector_s,
                emitted,
                at_detector: emitted.drift(self.detector_s - source_s),
            })
            .collect();
        Ok((trajectory, photons))
    }
}
