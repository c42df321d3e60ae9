//! Official trap setting tables.
//!
//! Each scheme (I–IX) fixes, for all 15 machines, the throw azimuth and the
//! target height at 10 m downrange. Machines are numbered 1..15 left to
//! right, three per station group.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Identifier of one of the nine official setting schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TableId {
    I,
    II,
    III,
    IV,
    V,
    VI,
    VII,
    VIII,
    IX,
}

impl TableId {
    pub const ALL: [TableId; 9] = [
        TableId::I,
        TableId::II,
        TableId::III,
        TableId::IV,
        TableId::V,
        TableId::VI,
        TableId::VII,
        TableId::VIII,
        TableId::IX,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TableId::I => "I",
            TableId::II => "II",
            TableId::III => "III",
            TableId::IV => "IV",
            TableId::V => "V",
            TableId::VI => "VI",
            TableId::VII => "VII",
            TableId::VIII => "VIII",
            TableId::IX => "IX",
        }
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TableId {
    type Err = String;

    fn from_str(s: &str) -> Result<TableId, String> {
        TableId::ALL
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown setting table '{s}' (expected I..IX)"))
    }
}

/// One machine's fixed throw: azimuth (degrees, positive = right of straight
/// ahead) and target height at 10 m downrange (metres).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThrowSetting {
    pub az_deg: f64,
    pub h10_m: f64,
}

/// Downrange distance at which `h10_m` is measured.
pub const H10_DISTANCE_M: f64 = 10.0;

// (azimuth deg, h10 m) for machines 1..15.
const TABLE_I: [(f64, f64); 15] = [
    (25.0, 2.0),
    (-5.0, 3.0),
    (-35.0, 1.5),
    (45.0, 2.5),
    (10.0, 1.8),
    (-35.0, 3.0),
    (35.0, 3.0),
    (-5.0, 1.5),
    (-45.0, 1.6),
    (40.0, 1.5),
    (0.0, 3.0),
    (-25.0, 2.6),
    (20.0, 2.4),
    (5.0, 1.9),
    (-35.0, 3.0),
];

const TABLE_II: [(f64, f64); 15] = [
    (25.0, 3.0),
    (-5.0, 1.8),
    (-35.0, 2.0),
    (40.0, 2.0),
    (0.0, 3.0),
    (-45.0, 1.6),
    (45.0, 1.5),
    (0.0, 2.8),
    (-40.0, 2.0),
    (15.0, 1.5),
    (5.0, 2.0),
    (-35.0, 1.8),
    (35.0, 1.8),
    (-5.0, 1.5),
    (-40.0, 3.0),
];

const TABLE_III: [(f64, f64); 15] = [
    (30.0, 2.5),
    (0.0, 2.8),
    (-35.0, 3.0),
    (45.0, 1.5),
    (-5.0, 2.5),
    (-40.0, 1.7),
    (30.0, 2.8),
    (5.0, 3.0),
    (-45.0, 1.5),
    (45.0, 2.3),
    (0.0, 3.0),
    (-40.0, 1.6),
    (30.0, 2.0),
    (0.0, 1.5),
    (-35.0, 2.2),
];

const TABLE_IV: [(f64, f64); 15] = [
    (40.0, 3.0),
    (10.0, 1.5),
    (-30.0, 2.2),
    (30.0, 1.6),
    (-10.0, 3.0),
    (-35.0, 2.0),
    (45.0, 2.0),
    (0.0, 3.0),
    (-20.0, 1.5),
    (30.0, 1.5),
    (-5.0, 2.0),
    (-45.0, 2.8),
    (35.0, 2.5),
    (0.0, 1.6),
    (-30.0, 3.0),
];

const TABLE_V: [(f64, f64); 15] = [
    (45.0, 1.6),
    (0.0, 3.0),
    (-15.0, 2.0),
    (40.0, 2.8),
    (-10.0, 1.5),
    (-45.0, 2.0),
    (35.0, 3.0),
    (-5.0, 1.8),
    (-40.0, 1.5),
    (25.0, 1.8),
    (0.0, 1.6),
    (-30.0, 3.0),
    (30.0, 2.0),
    (10.0, 2.4),
    (-15.0, 1.8),
];

const TABLE_VI: [(f64, f64); 15] = [
    (40.0, 2.0),
    (0.0, 3.0),
    (-35.0, 1.5),
    (35.0, 2.5),
    (10.0, 1.5),
    (-35.0, 2.0),
    (35.0, 2.0),
    (-5.0, 1.5),
    (-40.0, 3.0),
    (45.0, 1.5),
    (-10.0, 3.0),
    (-25.0, 2.6),
    (25.0, 2.4),
    (5.0, 1.5),
    (-45.0, 2.0),
];

const TABLE_VII: [(f64, f64); 15] = [
    (35.0, 2.2),
    (-5.0, 3.0),
    (-20.0, 3.0),
    (40.0, 2.0),
    (0.0, 3.0),
    (-45.0, 2.8),
    (40.0, 3.0),
    (0.0, 2.0),
    (-40.0, 2.2),
    (45.0, 1.5),
    (5.0, 2.0),
    (-35.0, 1.8),
    (20.0, 1.8),
    (-5.0, 1.5),
    (-45.0, 2.0),
];

const TABLE_VIII: [(f64, f64); 15] = [
    (25.0, 3.0),
    (5.0, 1.5),
    (-20.0, 2.0),
    (40.0, 1.5),
    (0.0, 3.0),
    (-45.0, 2.8),
    (35.0, 3.0),
    (-5.0, 2.5),
    (-45.0, 2.0),
    (45.0, 1.8),
    (0.0, 1.5),
    (-30.0, 3.0),
    (30.0, 2.0),
    (10.0, 3.0),
    (-15.0, 2.2),
];

const TABLE_IX: [(f64, f64); 15] = [
    (40.0, 3.0),
    (0.0, 1.8),
    (-20.0, 3.0),
    (15.0, 3.0),
    (-10.0, 1.5),
    (-35.0, 2.0),
    (45.0, 1.6),
    (0.0, 2.8),
    (-30.0, 3.0),
    (30.0, 2.0),
    (-5.0, 2.0),
    (-15.0, 3.0),
    (35.0, 2.9),
    (0.0, 1.6),
    (-45.0, 2.2),
];

static TABLES: Lazy<HashMap<TableId, &'static [(f64, f64); 15]>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert(TableId::I, &TABLE_I);
    m.insert(TableId::II, &TABLE_II);
    m.insert(TableId::III, &TABLE_III);
    m.insert(TableId::IV, &TABLE_IV);
    m.insert(TableId::V, &TABLE_V);
    m.insert(TableId::VI, &TABLE_VI);
    m.insert(TableId::VII, &TABLE_VII);
    m.insert(TableId::VIII, &TABLE_VIII);
    m.insert(TableId::IX, &TABLE_IX);
    m
});

/// Throw setting of machine `machine` (1-based, 1..=15) in scheme `table`.
pub fn throw_setting(table: TableId, machine: u32) -> Option<ThrowSetting> {
    let idx = machine.checked_sub(1)? as usize;
    TABLES
        .get(&table)
        .and_then(|rows| rows.get(idx))
        .map(|&(az_deg, h10_m)| ThrowSetting { az_deg, h10_m })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_tables_complete_and_bounded() {
        for table in TableId::ALL {
            for machine in 1..=15 {
                let s = throw_setting(table, machine).unwrap();
                assert!(s.az_deg.abs() <= 45.0, "{table} m{machine}");
                assert!((1.5..=3.0).contains(&s.h10_m), "{table} m{machine}");
            }
            assert!(throw_setting(table, 0).is_none());
            assert!(throw_setting(table, 16).is_none());
        }
    }

    #[test]
    fn test_spot_values() {
        let s = throw_setting(TableId::I, 1).unwrap();
        assert_eq!(s.az_deg, 25.0);
        assert_eq!(s.h10_m, 2.0);
        let s = throw_setting(TableId::IX, 15).unwrap();
        assert_eq!(s.az_deg, -45.0);
        assert_eq!(s.h10_m, 2.2);
    }

    #[test]
    fn test_table_id_parsing() {
        assert_eq!("iv".parse::<TableId>().unwrap(), TableId::IV);
        assert_eq!("VIII".parse::<TableId>().unwrap(), TableId::VIII);
        assert!("X".parse::<TableId>().is_err());
        assert_eq!(TableId::VII.to_string(), "VII");
    }
}
