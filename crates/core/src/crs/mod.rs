//! Coordinate Reference System handling

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Coordinate reference system, identified by EPSG code or WKT.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CRS {
    epsg: Option<u32>,
    wkt: Option<String>,
}

impl CRS {
    pub fn from_epsg(code: u32) -> Self {
        Self {
            epsg: Some(code),
            wkt: None,
        }
    }

    pub fn from_wkt(wkt: impl Into<String>) -> Self {
        Self {
            epsg: None,
            wkt: Some(wkt.into()),
        }
    }

    /// WGS84 geographic CRS (EPSG:4326)
    pub fn wgs84() -> Self {
        Self::from_epsg(4326)
    }

    /// Web Mercator (EPSG:3857)
    pub fn web_mercator() -> Self {
        Self::from_epsg(3857)
    }

    pub fn epsg(&self) -> Option<u32> {
        self.epsg
    }

    pub fn wkt(&self) -> Option<&str> {
        self.wkt.as_deref()
    }

    /// Geographic (lon/lat) rather than projected.
    ///
    /// EPSG codes in 4000..5000 are geographic 2D systems.
    pub fn is_geographic(&self) -> bool {
        matches!(self.epsg, Some(code) if (4000..5000).contains(&code))
    }

    /// UTM zone and hemisphere for WGS84 / UTM codes (326xx north, 327xx south)
    pub fn utm_zone(&self) -> Option<(u32, bool)> {
        match self.epsg? {
            code @ 32601..=32660 => Some((code - 32600, true)),
            code @ 32701..=32760 => Some((code - 32700, false)),
            _ => None,
        }
    }

    /// Check if two CRS are equivalent
    pub fn is_equivalent(&self, other: &CRS) -> bool {
        if let (Some(a), Some(b)) = (self.epsg, other.epsg) {
            return a == b;
        }
        if let (Some(a), Some(b)) = (&self.wkt, &other.wkt) {
            return a == b;
        }
        false
    }

    /// Short identifier, `EPSG:<code>` when known
    pub fn identifier(&self) -> String {
        if let Some(code) = self.epsg {
            return format!("EPSG:{}", code);
        }
        if let Some(wkt) = &self.wkt {
            let head: String = wkt.chars().take(50).collect();
            return format!("WKT:{}", head);
        }
        "Unknown".to_string()
    }
}

impl FromStr for CRS {
    type Err = Error;

    /// Parse `"EPSG:32753"`, `"epsg:4326"` or a bare code `"32753"`.
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let code = match trimmed.split_once(':') {
            Some((authority, code)) if authority.eq_ignore_ascii_case("epsg") => code,
            Some(_) => {
                return Err(Error::InvalidParameter {
                    name: "crs",
                    value: s.to_string(),
                    reason: "only EPSG authority codes are supported".into(),
                })
            }
            None => trimmed,
        };

        code.trim()
            .parse::<u32>()
            .map(CRS::from_epsg)
            .map_err(|_| Error::InvalidParameter {
                name: "crs",
                value: s.to_string(),
                reason: "expected an integer EPSG code".into(),
            })
    }
}

impl fmt::Display for CRS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identifier())
    }
}

impl Default for CRS {
    fn default() -> Self {
        Self::wgs84()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crs_epsg() {
        let crs = CRS::from_epsg(4326);
        assert_eq!(crs.epsg(), Some(4326));
        assert_eq!(crs.identifier(), "EPSG:4326");
        assert!(crs.is_geographic());
    }

    #[test]
    fn parse_proj_code_strings() {
        assert_eq!("EPSG:32753".parse::<CRS>().unwrap().epsg(), Some(32753));
        assert_eq!("epsg:4326".parse::<CRS>().unwrap().epsg(), Some(4326));
        assert_eq!(" 3857 ".parse::<CRS>().unwrap().epsg(), Some(3857));
        assert!("ESRI:102100".parse::<CRS>().is_err());
        assert!("EPSG:abc".parse::<CRS>().is_err());
    }

    #[test]
    fn utm_zone_detection() {
        assert_eq!(CRS::from_epsg(32753).utm_zone(), Some((53, false)));
        assert_eq!(CRS::from_epsg(32615).utm_zone(), Some((15, true)));
        assert_eq!(CRS::from_epsg(3857).utm_zone(), None);
        assert!(!CRS::from_epsg(32753).is_geographic());
    }

    #[test]
    fn test_crs_equivalence() {
        assert!(CRS::from_epsg(4326).is_equivalent(&CRS::wgs84()));
        assert!(!CRS::from_epsg(32753).is_equivalent(&CRS::from_epsg(32754)));
        assert!(!CRS::from_epsg(4326).is_equivalent(&CRS::from_wkt("GEOGCS[..]")));
    }
}
