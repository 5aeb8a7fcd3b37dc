//! Volume time-to-live
//!
//! Two bytes on disk: a count and a unit. `[0, 0]` means no TTL.

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TtlUnit {
    #[default]
    Empty = 0,
    Minute = 1,
    Hour = 2,
    Day = 3,
    Week = 4,
    Month = 5,
    Year = 6,
}

impl TtlUnit {
    fn from_byte(b: u8) -> Self {
        match b {
            1 => TtlUnit::Minute,
            2 => TtlUnit::Hour,
            3 => TtlUnit::Day,
            4 => TtlUnit::Week,
            5 => TtlUnit::Month,
            6 => TtlUnit::Year,
            _ => TtlUnit::Empty,
        }
    }

    fn from_char(c: char) -> Option<Self> {
        match c {
            'm' => Some(TtlUnit::Minute),
            'h' => Some(TtlUnit::Hour),
            'd' => Some(TtlUnit::Day),
            'w' => Some(TtlUnit::Week),
            'M' => Some(TtlUnit::Month),
            'y' => Some(TtlUnit::Year),
            _ => None,
        }
    }

    fn as_char(&self) -> Option<char> {
        match self {
            TtlUnit::Empty => None,
            TtlUnit::Minute => Some('m'),
            TtlUnit::Hour => Some('h'),
            TtlUnit::Day => Some('d'),
            TtlUnit::Week => Some('w'),
            TtlUnit::Month => Some('M'),
            TtlUnit::Year => Some('y'),
        }
    }

    fn minutes(&self) -> u32 {
        match self {
            TtlUnit::Empty => 0,
            TtlUnit::Minute => 1,
            TtlUnit::Hour => 60,
            TtlUnit::Day => 60 * 24,
            TtlUnit::Week => 60 * 24 * 7,
            TtlUnit::Month => 60 * 24 * 31,
            TtlUnit::Year => 60 * 24 * 365,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ttl {
    pub count: u8,
    pub unit: TtlUnit,
}

impl Ttl {
    pub const EMPTY: Ttl = Ttl {
        count: 0,
        unit: TtlUnit::Empty,
    };

    pub fn new(count: u8, unit: TtlUnit) -> Self {
        Self { count, unit }
    }

    pub fn from_bytes(input: [u8; 2]) -> Self {
        if input == [0, 0] {
            return Self::EMPTY;
        }
        Self {
            count: input[0],
            unit: TtlUnit::from_byte(input[1]),
        }
    }

    pub fn to_bytes(&self) -> [u8; 2] {
        [self.count, self.unit as u8]
    }

    /// Packed form reported to the master; 0 when there is no TTL.
    pub fn to_u32(&self) -> u32 {
        if self.count == 0 {
            return 0;
        }
        ((self.count as u32) << 8) | self.unit as u32
    }

    pub fn minutes(&self) -> u32 {
        self.count as u32 * self.unit.minutes()
    }

    pub fn is_empty(&self) -> bool {
        self.minutes() == 0
    }
}

impl FromStr for Ttl {
    type Err = Error;

    /// Parses `"3m"`, `"4h"`, `"5d"`, `"6w"`, `"7M"`, `"8y"`; a bare number is minutes.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let Some(last) = s.chars().last() else {
            return Ok(Self::EMPTY);
        };

        let (count_str, unit) = if last.is_ascii_digit() {
            (s, TtlUnit::Minute)
        } else {
            let unit = TtlUnit::from_char(last).ok_or_else(|| Error::InvalidTtl(s.to_string()))?;
            (&s[..s.len() - last.len_utf8()], unit)
        };

        let count: u8 = count_str
            .parse()
            .map_err(|_| Error::InvalidTtl(s.to_string()))?;
        if count == 0 {
            return Ok(Self::EMPTY);
        }
        Ok(Self { count, unit })
    }
}

impl fmt::Display for Ttl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.unit.as_char() {
            Some(c) if self.count > 0 => write!(f, "{}{}", self.count, c),
            _ => Ok(()),
        }
    }
}
