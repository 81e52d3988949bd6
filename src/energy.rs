//! Monotone transforms from distance to energy.
//!
//! The optimiser minimises the sum over non-center items of `energy(distance to
//! assigned center)`. Every transform here is non-decreasing and maps `0` to `0`,
//! so a center contributes nothing and a strictly closer center never costs more.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{ClaransError, Result};

/// Distance-to-energy transform.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Energy {
    /// `d` (classic k-medoids).
    #[default]
    Identity,
    /// `d^2` (k-means-like objective over medoids).
    Quadratic,
    /// `d^3`.
    Cubic,
    /// `0` inside `critical_radius`, `1` at or beyond it.
    SquarePotential { critical_radius: f64 },
    /// `ln(1 + d)`.
    Log,
    /// `exp(coeff * d) - 1`.
    Exp { coeff: f64 },
    /// `sqrt(d)`.
    Sqrt,
}

impl Energy {
    /// Apply the transform to a distance.
    #[inline]
    pub fn apply(&self, distance: f64) -> f64 {
        match *self {
            Energy::Identity => distance,
            Energy::Quadratic => distance * distance,
            Energy::Cubic => distance * distance * distance,
            Energy::SquarePotential { critical_radius } => {
                if distance < critical_radius {
                    0.0
                } else {
                    1.0
                }
            }
            Energy::Log => distance.ln_1p(),
            Energy::Exp { coeff } => (coeff * distance).exp_m1(),
            Energy::Sqrt => distance.sqrt(),
        }
    }

    /// Check parameters carried by the parametric transforms.
    pub fn validate(&self) -> Result<()> {
        match *self {
            Energy::SquarePotential { critical_radius }
                if !(critical_radius.is_finite() && critical_radius > 0.0) =>
            {
                Err(ClaransError::InvalidConfig(
                    "squarepotential critical_radius must be finite and > 0".into(),
                ))
            }
            Energy::Exp { coeff } if !(coeff.is_finite() && coeff > 0.0) => Err(
                ClaransError::InvalidConfig("exp coeff must be finite and > 0".into()),
            ),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for Energy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Energy::Identity => write!(f, "identity"),
            Energy::Quadratic => write!(f, "quadratic"),
            Energy::Cubic => write!(f, "cubic"),
            Energy::SquarePotential { critical_radius } => {
                write!(f, "squarepotential({critical_radius})")
            }
            Energy::Log => write!(f, "log"),
            Energy::Exp { coeff } => write!(f, "exp({coeff})"),
            Energy::Sqrt => write!(f, "sqrt"),
        }
    }
}

impl std::str::FromStr for Energy {
    type Err = ClaransError;

    /// Parametric transforms start from unit parameters; the CLI overrides them.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "identity" => Ok(Self::Identity),
            "quadratic" => Ok(Self::Quadratic),
            "cubic" => Ok(Self::Cubic),
            "squarepotential" | "square-potential" => Ok(Self::SquarePotential {
                critical_radius: 1.0,
            }),
            "log" => Ok(Self::Log),
            "exp" => Ok(Self::Exp { coeff: 1.0 }),
            "sqrt" => Ok(Self::Sqrt),
            other => Err(ClaransError::InvalidConfig(format!(
                "unsupported energy '{other}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn energies_vanish_at_zero() {
        let all = [
            Energy::Identity,
            Energy::Quadratic,
            Energy::Cubic,
            Energy::SquarePotential {
                critical_radius: 0.5,
            },
            Energy::Log,
            Energy::Exp { coeff: 2.0 },
            Energy::Sqrt,
        ];
        for energy in all {
            assert_eq!(energy.apply(0.0), 0.0, "{energy}");
        }
    }

    #[test]
    fn energies_are_monotone() {
        let all = [
            Energy::Identity,
            Energy::Quadratic,
            Energy::Cubic,
            Energy::SquarePotential {
                critical_radius: 1.5,
            },
            Energy::Log,
            Energy::Exp { coeff: 0.3 },
            Energy::Sqrt,
        ];
        for energy in all {
            let mut previous = energy.apply(0.0);
            for step in 1..100 {
                let current = energy.apply(step as f64 * 0.05);
                assert!(current >= previous, "{energy} decreased at step {step}");
                previous = current;
            }
        }
    }

    #[test]
    fn parse_and_validate() {
        assert_eq!("Quadratic".parse::<Energy>().unwrap(), Energy::Quadratic);
        assert!("nope".parse::<Energy>().is_err());
        assert!(Energy::Exp { coeff: -1.0 }.validate().is_err());
        assert!(Energy::SquarePotential {
            critical_radius: 2.0
        }
        .validate()
        .is_ok());
    }
}
