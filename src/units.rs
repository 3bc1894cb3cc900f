use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// SI prefix applied to volts or amps in sweep outputs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum UnitPrefix {
    Pico,
    Nano,
    Micro,
    Milli,
    #[default]
    Base,
    Kilo,
    Mega,
    Giga,
}

impl UnitPrefix {
    pub fn factor(&self) -> f64 {
        match self {
            UnitPrefix::Pico => 1e-12,
            UnitPrefix::Nano => 1e-9,
            UnitPrefix::Micro => 1e-6,
            UnitPrefix::Milli => 1e-3,
            UnitPrefix::Base => 1.0,
            UnitPrefix::Kilo => 1e3,
            UnitPrefix::Mega => 1e6,
            UnitPrefix::Giga => 1e9,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            UnitPrefix::Pico => "p",
            UnitPrefix::Nano => "n",
            UnitPrefix::Micro => "u",
            UnitPrefix::Milli => "m",
            UnitPrefix::Base => "",
            UnitPrefix::Kilo => "k",
            UnitPrefix::Mega => "M",
            UnitPrefix::Giga => "G",
        }
    }

    /// Express a base-unit value in this prefix.
    pub fn scale(&self, base: f64) -> f64 {
        base / self.factor()
    }
}

impl FromStr for UnitPrefix {
    type Err = anyhow::Error;

    // case matters: "m" is milli, "M" is mega
    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "p" => Ok(UnitPrefix::Pico),
            "n" => Ok(UnitPrefix::Nano),
            "u" | "µ" => Ok(UnitPrefix::Micro),
            "m" => Ok(UnitPrefix::Milli),
            "" => Ok(UnitPrefix::Base),
            "k" => Ok(UnitPrefix::Kilo),
            "M" => Ok(UnitPrefix::Mega),
            "G" => Ok(UnitPrefix::Giga),
            other => Err(anyhow!(
                "unknown unit prefix '{}' (expected one of p, n, u, m, k, M, G or empty)",
                other
            )),
        }
    }
}

impl TryFrom<String> for UnitPrefix {
    type Error = anyhow::Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<UnitPrefix> for String {
    fn from(p: UnitPrefix) -> Self {
        p.symbol().to_string()
    }
}

impl fmt::Display for UnitPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_symbols() {
        assert_eq!("m".parse::<UnitPrefix>().unwrap(), UnitPrefix::Milli);
        assert_eq!("M".parse::<UnitPrefix>().unwrap(), UnitPrefix::Mega);
        assert_eq!("".parse::<UnitPrefix>().unwrap(), UnitPrefix::Base);
        assert!("x".parse::<UnitPrefix>().is_err());
    }

    #[test]
    fn test_scale_from_base() {
        assert!((UnitPrefix::Nano.scale(2.5e-9) - 2.5).abs() < 1e-12);
        assert!((UnitPrefix::Kilo.scale(4700.0) - 4.7).abs() < 1e-12);
        assert_eq!(UnitPrefix::Base.scale(0.25), 0.25);
    }

    #[test]
    fn test_yaml_roundtrip_uses_symbol() {
        let p: UnitPrefix = serde_yaml::from_str("\"u\"").unwrap();
        assert_eq!(p, UnitPrefix::Micro);
        assert_eq!(serde_yaml::to_string(&p).unwrap().trim(), "u");
    }
}
