//! Physical parameters of the dimensionless chameleon problem.
use crate::error::FormError;
use crate::mesh::RegionTag;
use crate::weak_form::CoordinateSystem;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub mod chameleon;

/// Scalar constants parameterizing the governing equation
/// <div>$$
///   \alpha \Delta \phi = \rho - \phi^{-(n+1)}.
/// $$</div>
///
/// The value is immutable once bound into a weak form; it is passed explicitly to every
/// constructor that needs it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysicalParameters {
    /// Coupling strength in front of the Laplacian.
    pub alpha: f64,
    /// Exponent $n$ of the inverse power-law potential.
    pub npot: u32,
    /// Density of the vacuum surrounding the bodies.
    pub rho_vac: f64,
    /// Densities per subdomain region of the interior mesh.
    #[serde(with = "density_pairs", default)]
    pub densities: BTreeMap<RegionTag, f64>,
    pub truncation_radius: f64,
    pub coordinates: CoordinateSystem,
}

impl PhysicalParameters {
    pub fn new(alpha: f64, npot: u32, rho_vac: f64) -> Self {
        Self {
            alpha,
            npot,
            rho_vac,
            densities: BTreeMap::new(),
            truncation_radius: 1.0,
            coordinates: CoordinateSystem::Cartesian,
        }
    }

    pub fn with_density(mut self, tag: RegionTag, rho: f64) -> Self {
        self.densities.insert(tag, rho);
        self
    }

    pub fn with_truncation_radius(mut self, radius: f64) -> Self {
        self.truncation_radius = radius;
        self
    }

    pub fn with_coordinates(mut self, coordinates: CoordinateSystem) -> Self {
        self.coordinates = coordinates;
        self
    }

    /// Field value at infinity, where the field sits at the minimum of the vacuum effective potential.
    pub fn phi_inf(&self) -> f64 {
        self.rho_vac.powf(-1.0 / (self.npot + 1) as f64)
    }

    /// Largest density of the problem, including the vacuum.
    pub fn rho_max(&self) -> f64 {
        self.densities
            .values()
            .copied()
            .fold(self.rho_vac, f64::max)
    }

    pub fn validate(&self) -> Result<(), FormError> {
        let positive = [
            ("alpha", self.alpha),
            ("rho_vac", self.rho_vac),
            ("truncation_radius", self.truncation_radius),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(FormError::InvalidParameter { name, value });
            }
        }
        if self.npot == 0 {
            return Err(FormError::InvalidParameter {
                name: "npot",
                value: 0.0,
            });
        }
        Ok(())
    }
}

/// Serializes a region map as a sequence of `(tag, value)` pairs, since JSON objects only
/// admit string keys.
mod density_pairs {
    use crate::mesh::RegionTag;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S>(map: &BTreeMap<RegionTag, f64>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let pairs: Vec<(RegionTag, f64)> = map.iter().map(|(&tag, &rho)| (tag, rho)).collect();
        pairs.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<BTreeMap<RegionTag, f64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let pairs = Vec::<(RegionTag, f64)>::deserialize(deserializer)?;
        Ok(pairs.into_iter().collect())
    }
}
