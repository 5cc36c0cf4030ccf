//! Coordinate Reference System identifiers.
//!
//! Georeferencing only *assigns* a CRS to the computed transform; no
//! coordinate conversion happens here. A CRS is carried around as its EPSG
//! code and written into the GeoTIFF GeoKeys.
//!
//! ## Coordinate order convention:
//!
//! - Geographic CRS (see [`GEOGRAPHIC_CODES`]): `(x, y)` = `(lon, lat)` in degrees.
//! - Any other code is treated as projected: `(x, y)` = `(easting, northing)`
//!   in CRS units.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Geographic 2D systems recognised as lon/lat.
///
/// WGS 84 and its realizations, NAD27, NAD83, ETRS89, ED50, GDA94, GDA2020,
/// SIRGAS 2000, China Geodetic 2000, NZGD2000, JGD2000 and Tokyo.
pub const GEOGRAPHIC_CODES: &[u16] = &[
    4326, 4267, 4269, 4258, 4230, 4283, 7844, 4674, 4490, 4167, 4612, 4301, 9053, 9054, 9055,
    9056, 9057,
];

/// An EPSG-registered coordinate reference system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Crs {
    epsg: u16,
}

impl Crs {
    /// WGS84 (EPSG:4326).
    pub const WGS84: Crs = Crs { epsg: 4326 };

    pub fn from_epsg(code: u16) -> Result<Self> {
        if code == 0 {
            bail!("EPSG code must be positive");
        }
        Ok(Self { epsg: code })
    }

    pub fn epsg_code(&self) -> u16 {
        self.epsg
    }

    /// Whether the code is one of [`GEOGRAPHIC_CODES`].
    pub fn is_geographic(&self) -> bool {
        GEOGRAPHIC_CODES.contains(&self.epsg)
    }

    /// Human readable citation stored alongside the GeoKeys.
    pub fn citation(&self) -> String {
        match self.epsg {
            4326 => "WGS 84".to_string(),
            3857 => "WGS 84 / Pseudo-Mercator".to_string(),
            code => format!("EPSG:{}", code),
        }
    }
}

impl Default for Crs {
    fn default() -> Self {
        Self::WGS84
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg)
    }
}

impl FromStr for Crs {
    type Err = anyhow::Error;

    /// Parse `EPSG:<code>` (case-insensitive) or a bare numeric code.
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let code = match trimmed.split_once(':') {
            Some((authority, code)) if authority.eq_ignore_ascii_case("epsg") => code,
            Some((authority, _)) => bail!("Unsupported CRS authority '{}' in '{}'", authority, s),
            None => trimmed,
        };
        let code: u16 = code
            .trim()
            .parse()
            .with_context(|| format!("Invalid EPSG code in CRS '{}'", s))?;
        Self::from_epsg(code)
    }
}

impl TryFrom<String> for Crs {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Crs> for String {
    fn from(crs: Crs) -> Self {
        crs.to_string()
    }
}
