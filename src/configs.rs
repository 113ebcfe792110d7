#![allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]

//! Constructors that assemble the straight and its comms from a parsed
//! `config.toml` value tree.

use std::path::{Path, PathBuf};

use crate::communications::ChicComms;
use crate::knobs::Knobs;
use crate::lattice::Layout;
use crate::straight::Straight;
use crate::strength::{StrengthModel, MAGNETS};
use crate::util::{cfg_or, cfg_require, find_file, value_as_f64};

/// Read a five-element number array from the config. An absent key falls
/// back to `default` quietly; a malformed one warns first.
fn magnet_array_or(
    cfg: &toml::Value,
    sec: &str,
    key: &str,
    default: [f64; MAGNETS],
) -> [f64; MAGNETS] {
    let Some(raw) = cfg.get(sec).and_then(|s| s.get(key)) else {
        return default;
    };
    let values: Option<Vec<f64>> = raw
        .as_array()
        .map(|arr| arr.iter().filter_map(value_as_f64).collect());
    match values {
        Some(values) if values.len() == MAGNETS => {
            let mut out = [0.0; MAGNETS];
            out.copy_from_slice(&values);
            out
        }
        _ => {
            eprintln!(
                "config {sec}:{key} should be an array of {MAGNETS} numbers; using default {default:?}"
            );
            default
        }
    }
}

// History buffers are 2^n entries long; accept either an explicit exponent or
// a raw length rounded down to a power of two.
#[must_use]
fn log_size_exponent(cfg: &toml::Value) -> usize {
    if let Some(exponent) = cfg
        .get("general")
        .and_then(|x| x.get("detector_log_length_exponent"))
        .and_then(toml::Value::as_integer)
    {
        exponent as usize
    } else if let Some(length) = cfg
        .get("general")
        .and_then(|x| x.get("detector_log_length"))
        .and_then(toml::Value::as_integer)
    {
        let exponent = length.checked_ilog2().unwrap_or(0) as usize;
        if (1_i64 << exponent) != length {
            eprintln!(
                "config detector_log_length {} rounded down to 2^{} = {}",
                length,
                exponent,
                1_i64 << exponent,
            );
        }
        exponent
    } else {
        8
    }
}

/// Locate a configuration file: an absolute path as-is, otherwise searched
/// in the working directory and next to the executable.
#[must_use]
pub fn find_config_file(name: &Path) -> Option<PathBuf> {
    find_file(name)
}

/// # Errors
/// Fails when the layout file is missing, unreadable, or invalid.
pub fn layout_from_config(cfg: &toml::Value) -> Result<Layout, String> {
    let name = cfg_require!(cfg, "general", "layout_file", as_str);
    let path = find_file(Path::new(name))
        .ok_or_else(|| format!("could not find layout file '{name}'"))?;
    let text = std::fs::read_to_string(&path)
        .map_err(|e| format!("could not read layout file {}: {e}", path.display()))?;
    Layout::parse(&text)
}

/// # Errors
/// Fails when the layout does not fit the five-kicker chicane model.
pub fn strength_from_config(cfg: &toml::Value, layout: &Layout) -> Result<StrengthModel, String> {
    let mut out = StrengthModel::from_layout(layout)?;
    out.period(cfg_or!(
        cfg,
        "excitation",
        "period_steps",
        as_float,
        f64,
        200.0
    ));
    out.calibration(magnet_array_or(
        cfg,
        "excitation",
        "amp_to_tesla",
        crate::strength::AMP_TO_TESLA,
    ));
    Ok(out)
}

#[must_use]
pub fn knobs_from_config(cfg: &toml::Value) -> Knobs {
    let defaults = Knobs::new();
    let mut out = Knobs::new();
    out.dscale = magnet_array_or(cfg, "knobs", "dscale", defaults.dscale);
    out.dk3 = magnet_array_or(cfg, "knobs", "dk3", defaults.dk3);
    out.bump_left = magnet_array_or(cfg, "knobs", "bump_left", defaults.bump_left);
    out.bump_right = magnet_array_or(cfg, "knobs", "bump_right", defaults.bump_right);
    out.imin = magnet_array_or(cfg, "knobs", "imin", defaults.imin);
    out.imax = magnet_array_or(cfg, "knobs", "imax", defaults.imax);
    out.set_jog_scale(cfg_or!(cfg, "knobs", "jog_scale", as_float, f64, 1.0));
    out
}

/// # Errors
/// Propagates layout and strength-model failures.
pub fn straight_from_config(cfg: &toml::Value) -> Result<Straight, String> {
    let layout = layout_from_config(cfg)?;
    let model = strength_from_config(cfg, &layout)?;
    let knobs = knobs_from_config(cfg);
    let mut out = Straight::new(layout, model, knobs, log_size_exponent(cfg))?;
    out.set_scales(magnet_array_or(
        cfg,
        "excitation",
        "scales",
        [11.63, 11.61, 5.09, 11.55, 11.52],
    ));
    out.set_offsets(magnet_array_or(
        cfg,
        "excitation",
        "offsets",
        [0.0; MAGNETS],
    ));
    Ok(out)
}

/// # Errors
/// Fails when the sockets cannot be bound.
pub async fn comms_from_config(cfg: &toml::Value) -> Result<ChicComms, String> {
    let mut out = ChicComms::new().ok_or("failed to instantiate comms struct")?;
    out.bind_sockets(
        cfg_or!(cfg, "general", "data_port", as_integer, u16, 8090),
        cfg_or!(cfg, "general", "command_port", as_integer, u16, 8091),
    )
    .await
    .map_err(|e| format!("error [{e}] in binding sockets"))?;
    out.set_publish_frequency(cfg_or!(cfg, "general", "publish_freq_cycles", as_integer, u32, 1));
    Ok(out)
}

#[must_use]
pub fn snapshot_path(cfg: &toml::Value) -> PathBuf {
    PathBuf::from(cfg_or!(
        cfg,
        "general",
        "snapshot_file",
        as_str,
        "snapshot.toml"
    ))
}

#[must_use]
pub fn frame_interval_ms(cfg: &toml::Value) -> u64 {
    cfg_or!(cfg, "general", "frame_interval_ms", as_integer, u64, 20)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
[general]
data_port = 9001
command_port = 9002

[excitation]
period_steps = 100.0
scales = [1.0, 2.0, 3.0, 4.0, 5.0]

[knobs]
jog_scale = 0.5
imax = [20.0, 20.0, 9.0, 20.0, 20.0]
dscale = [1, 1, 0, 1, 1]
"#;

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

    #[test]
    fn strength_settings_are_read() {
        let cfg: toml::Value = toml::from_str(CONFIG).unwrap();
        let layout = Layout::parse(STRAIGHT).unwrap();
        let model = strength_from_config(&cfg, &layout).unwrap();
        assert!((model.period_steps() - 100.0).abs() < 1e-12);
    }

    #[test]
    fn knob_settings_override_the_defaults() {
        let cfg: toml::Value = toml::from_str(CONFIG).unwrap();
        let knobs = knobs_from_config(&cfg);
        assert!((knobs.jog_scale() - 0.5).abs() < 1e-12);
        assert!((knobs.imax[2] - 9.0).abs() < 1e-12);
        // integer literals are accepted in number arrays
        assert!((knobs.dscale[0] - 1.0).abs() < 1e-12);
        // untouched keys keep their defaults
        assert!((knobs.dk3[2] - 0.01).abs() < 1e-12);
    }

    #[test]
    fn malformed_magnet_arrays_fall_back() {
        let cfg: toml::Value =
            toml::from_str("[knobs]\nimax = [1.0, 2.0]\n").unwrap();
        let knobs = knobs_from_config(&cfg);
        assert_eq!(knobs.imax, Knobs::new().imax);
    }
}
