//! Replica placement policy
//!
//! Three digits, each 0..=2: copies in other data centers, copies on other
//! racks in the same data center, copies on other servers in the same rack.
//! Stored in the super block as the decimal number `xyz` in one byte.

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const MAX_COUNT_PER_LEVEL: u8 = 2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReplicaPlacement {
    pub diff_data_center_count: u8,
    pub diff_rack_count: u8,
    pub same_rack_count: u8,
}

impl ReplicaPlacement {
    /// Decode the super block byte; any digit above 2 is rejected.
    pub fn from_byte(b: u8) -> Result<Self> {
        format!("{:03}", b).parse()
    }

    pub fn byte(&self) -> u8 {
        self.diff_data_center_count * 100 + self.diff_rack_count * 10 + self.same_rack_count
    }

    pub fn copy_count(&self) -> usize {
        (self.diff_data_center_count + self.diff_rack_count + self.same_rack_count) as usize + 1
    }
}

impl FromStr for ReplicaPlacement {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut rp = ReplicaPlacement::default();
        for (i, c) in s.chars().enumerate() {
            let count = c
                .to_digit(10)
                .filter(|d| *d <= MAX_COUNT_PER_LEVEL as u32)
                .ok_or_else(|| Error::InvalidReplicaPlacement(s.to_string()))?
                as u8;
            match i {
                0 => rp.diff_data_center_count = count,
                1 => rp.diff_rack_count = count,
                2 => rp.same_rack_count = count,
                _ => return Err(Error::InvalidReplicaPlacement(s.to_string())),
            }
        }
        Ok(rp)
    }
}

impl fmt::Display for ReplicaPlacement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            self.diff_data_center_count, self.diff_rack_count, self.same_rack_count
        )
    }
}
