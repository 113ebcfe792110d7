use std::path::{Path, PathBuf};

macro_rules! cfg_or {
    ($cfg:ident, $sec:expr, $key:expr, $conv:ident, $as:ty, $or:expr) => {
        match $cfg.get($sec).and_then(|sec| sec.get($key)) {
            Some(val) => match val.$conv() {
                Some(x) => x as $as,
                None => {
                    eprintln!(
                        "config {}:{} could not be read as {}; using default {:?}",
                        $sec,
                        $key,
                        stringify!($as),
                        $or
                    );
                    $or
                }
            },
            None => {
                eprintln!(
                    "config {}:{} not set; using default {:?}",
                    $sec, $key, $or
                );
                $or
            }
        }
    };
    ($cfg:ident, $sec:expr, $key:expr, as_str, $or:expr) => {
        match $cfg.get($sec).and_then(|sec| sec.get($key)) {
            Some(val) => match val.as_str() {
                Some(x) => x,
                None => {
                    eprintln!(
                        "config {}:{} could not be read as a string; using default {:?}",
                        $sec, $key, $or
                    );
                    $or
                }
            },
            None => {
                eprintln!(
                    "config {}:{} not set; using default {:?}",
                    $sec, $key, $or
                );
                $or
            }
        }
    };
}

macro_rules! cfg_require {
    ($cfg:ident, $sec:expr, $key:expr, $conv:ident, $as:ty) => {
        $cfg.get($sec)
            .and_then(|sec| sec.get($key))
            .ok_or_else(|| format!("config is missing {}:{}", $sec, $key))?
            .$conv()
            .ok_or_else(|| {
                format!(
                    "config {}:{} could not be read as {}",
                    $sec,
                    $key,
                    stringify!($as)
                )
            })? as $as
    };
    ($cfg:ident, $sec:expr, $key:expr, as_str) => {
        $cfg.get($sec)
            .and_then(|sec| sec.get($key))
            .ok_or_else(|| format!("config is missing {}:{}", $sec, $key))?
            .as_str()
            .ok_or_else(|| format!("config {}:{} could not be read as a string", $sec, $key))?
    };
}

/// Read a toml number as f64, accepting both float and integer literals.
pub fn value_as_f64(val: &toml::Value) -> Option<f64> {
    val.as_float().or_else(|| val.as_integer().map(|x| x as f64))
}

/// Look for `file_name` in the current working directory, then next to the
/// running executable. Absolute paths are returned as-is if they exist.
pub fn find_file(file_name: &Path) -> Option<PathBuf> {
    if file_name.is_absolute() {
        return file_name.exists().then(|| file_name.into());
    }
    if let Ok(cwd) = std::env::current_dir() {
        if cwd.join(file_name).exists() {
            return Some(cwd.join(file_name));
        }
    }
    if let Ok(exe) = std::env::current_exe() {
        if exe.parent()?.join(file_name).exists() {
            return Some(exe.parent()?.join(file_name));
        }
    }
    None
}

pub(crate) use {cfg_or, cfg_require};
