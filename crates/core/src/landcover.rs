//! Class table for the Impact Observatory 9-class annual land-cover product.

use crate::raster::{Raster, RasterElement};
use std::collections::BTreeMap;
use std::fmt;

/// Pixel value used for "no data" in the annual product.
pub const NODATA: i32 = 0;

/// One of the nine land-cover classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LandCoverClass {
    Water,
    Trees,
    FloodedVegetation,
    Crops,
    BuiltArea,
    BareGround,
    SnowIce,
    Clouds,
    Rangeland,
}

impl LandCoverClass {
    pub const ALL: [LandCoverClass; 9] = [
        Self::Water,
        Self::Trees,
        Self::FloodedVegetation,
        Self::Crops,
        Self::BuiltArea,
        Self::BareGround,
        Self::SnowIce,
        Self::Clouds,
        Self::Rangeland,
    ];

    /// Decode a pixel value; codes 3 and 6 are unused by the 9-class scheme.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::Water),
            2 => Some(Self::Trees),
            4 => Some(Self::FloodedVegetation),
            5 => Some(Self::Crops),
            7 => Some(Self::BuiltArea),
            8 => Some(Self::BareGround),
            9 => Some(Self::SnowIce),
            10 => Some(Self::Clouds),
            11 => Some(Self::Rangeland),
            _ => None,
        }
    }

    pub fn code(self) -> i32 {
        match self {
            Self::Water => 1,
            Self::Trees => 2,
            Self::FloodedVegetation => 4,
            Self::Crops => 5,
            Self::BuiltArea => 7,
            Self::BareGround => 8,
            Self::SnowIce => 9,
            Self::Clouds => 10,
            Self::Rangeland => 11,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Water => "Water",
            Self::Trees => "Trees",
            Self::FloodedVegetation => "Flooded vegetation",
            Self::Crops => "Crops",
            Self::BuiltArea => "Built area",
            Self::BareGround => "Bare ground",
            Self::SnowIce => "Snow/ice",
            Self::Clouds => "Clouds",
            Self::Rangeland => "Rangeland",
        }
    }
}

impl fmt::Display for LandCoverClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}

/// Per-class pixel counts of a land-cover raster.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassHistogram {
    pub counts: BTreeMap<LandCoverClass, usize>,
    /// Cells equal to the raster's nodata value
    pub nodata: usize,
    /// Valid cells whose value is not a known class code
    pub unknown: usize,
}

impl ClassHistogram {
    /// Number of classified cells
    pub fn classified(&self) -> usize {
        self.counts.values().sum()
    }

    pub fn count(&self, class: LandCoverClass) -> usize {
        self.counts.get(&class).copied().unwrap_or(0)
    }
}

/// Count pixels per class, skipping the raster's nodata cells.
pub fn class_histogram<T: RasterElement>(raster: &Raster<T>) -> ClassHistogram {
    let mut hist = ClassHistogram::default();

    for &value in raster.data().iter() {
        if raster.is_nodata(value) {
            hist.nodata += 1;
            continue;
        }
        let class = value
            .to_f64()
            .filter(|v| v.fract() == 0.0)
            .and_then(|v| LandCoverClass::from_code(v as i64));
        match class {
            Some(c) => *hist.counts.entry(c).or_insert(0) += 1,
            None => hist.unknown += 1,
        }
    }

    hist
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_roundtrip_through_table() {
        for class in LandCoverClass::ALL {
            assert_eq!(LandCoverClass::from_code(class.code() as i64), Some(class));
        }
        assert_eq!(LandCoverClass::from_code(3), None);
        assert_eq!(LandCoverClass::from_code(6), None);
        assert_eq!(LandCoverClass::from_code(0), None);
    }

    #[test]
    fn histogram_counts_classes_and_nodata() {
        let raster = Raster::from_vec(vec![0, 1, 1, 2, 11, 3, 0, 7, 7], 3, 3)
            .unwrap()
            .with_nodata(Some(NODATA));
        let hist = class_histogram(&raster);

        assert_eq!(hist.nodata, 2);
        assert_eq!(hist.unknown, 1);
        assert_eq!(hist.count(LandCoverClass::Water), 2);
        assert_eq!(hist.count(LandCoverClass::BuiltArea), 2);
        assert_eq!(hist.count(LandCoverClass::Rangeland), 1);
        assert_eq!(hist.count(LandCoverClass::Crops), 0);
        assert_eq!(hist.classified(), 6);
    }

    #[test]
    fn display_includes_code() {
        assert_eq!(LandCoverClass::SnowIce.to_string(), "Snow/ice (9)");
    }
}
