//! Provides a means to validate port ranges and decide the order in which
//! ports are probed.
use crate::error::ScanError;
use crate::input::ScanOrder;
use rand::seq::SliceRandom;
use serde_derive::Deserialize;
use std::fmt;
use std::str::FromStr;

pub(crate) const LOWEST_PORT_NUMBER: u16 = 1;
pub(crate) const TOP_PORT_NUMBER: u16 = 65535;

/// An inclusive range of ports that has passed validation.
///
/// A `PortRange` can only be built through [`PortRange::new`], so holding one
/// means `1 <= start <= end <= 65535`.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(try_from = "(u16, u16)")]
pub struct PortRange {
    start: u16,
    end: u16,
}

impl PortRange {
    /// Validates a caller-supplied range before any scanning starts.
    ///
    /// ```rust
    /// # use netscanner::port_strategy::PortRange;
    /// assert!(PortRange::new(79, 81).is_ok());
    /// assert!(PortRange::new(100, 50).is_err());
    /// assert!(PortRange::new(0, 10).is_err());
    /// ```
    pub fn new(start: u16, end: u16) -> Result<Self, ScanError> {
        if start < LOWEST_PORT_NUMBER || start > end {
            return Err(ScanError::InvalidPortRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// First port of the range.
    pub const fn start(&self) -> u16 {
        self.start
    }

    /// Last port of the range.
    pub const fn end(&self) -> u16 {
        self.end
    }

    /// Number of ports covered by the range.
    pub fn len(&self) -> usize {
        usize::from(self.end - self.start) + 1
    }

    /// A validated range always holds at least one port.
    pub const fn is_empty(&self) -> bool {
        false
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            start: LOWEST_PORT_NUMBER,
            end: 1024,
        }
    }
}

impl TryFrom<(u16, u16)> for PortRange {
    type Error = ScanError;

    fn try_from((start, end): (u16, u16)) -> Result<Self, Self::Error> {
        Self::new(start, end)
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Parses `start-end` notation, e.g. `1-1000`, or a single port.
impl FromStr for PortRange {
    type Err = String;

    fn from_str(range_str: &str) -> Result<Self, Self::Err> {
        let range_str = range_str.trim();
        let (start, end) = match range_str.split_once('-') {
            Some((start, end)) => (start.trim(), end.trim()),
            None => (range_str, range_str),
        };

        let start: u16 = start
            .parse()
            .map_err(|_| format!("Invalid start port '{start}' in range '{range_str}'"))?;
        let end: u16 = end
            .parse()
            .map_err(|_| format!("Invalid end port '{end}' in range '{range_str}'"))?;

        Self::new(start, end).map_err(|_| {
            format!(
                "Ports in range '{range_str}' must be between {LOWEST_PORT_NUMBER} and {TOP_PORT_NUMBER}, with start <= end",
            )
        })
    }
}

/// Represents the order in which the ports of a range are probed.
#[derive(Debug)]
pub enum PortStrategy {
    /// Ascending order, `start` to `end`.
    Serial(PortRange),
    /// Every port of the range exactly once, shuffled.
    Random(PortRange),
}

impl PortStrategy {
    /// Picks the strategy matching the requested scan order.
    pub const fn pick(range: PortRange, order: ScanOrder) -> Self {
        match order {
            ScanOrder::Serial => Self::Serial(range),
            ScanOrder::Random => Self::Random(range),
        }
    }

    /// Materializes the ports in probing order.
    pub fn order(&self) -> Vec<u16> {
        match self {
            Self::Serial(range) => (range.start..=range.end).collect(),
            Self::Random(range) => {
                let mut ports = (range.start..=range.end).collect::<Vec<_>>();
                ports.shuffle(&mut rand::rng());
                ports
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{PortRange, PortStrategy};
    use crate::error::ScanError;
    use crate::input::ScanOrder;
    use parameterized::parameterized;

    #[parameterized(bounds = {
        (100, 50), (0, 10), (0, 0), (65535, 1),
    })]
    fn invalid_ranges_are_rejected(bounds: (u16, u16)) {
        let (start, end) = bounds;
        let err = PortRange::new(start, end).unwrap_err();
        assert!(matches!(err, ScanError::InvalidPortRange { .. }));
    }

    #[parameterized(bounds = {
        (1, 1), (79, 81), (1, 65535), (65535, 65535),
    })]
    fn valid_ranges_are_accepted(bounds: (u16, u16)) {
        let (start, end) = bounds;
        let range = PortRange::new(start, end).unwrap();
        assert_eq!(range.start(), start);
        assert_eq!(range.end(), end);
        assert_eq!(range.len(), usize::from(end - start) + 1);
    }

    #[test]
    fn parse_range_notation() {
        assert_eq!("1-1000".parse::<PortRange>(), PortRange::new(1, 1000).map_err(|e| e.to_string()));
        assert_eq!("443".parse::<PortRange>(), PortRange::new(443, 443).map_err(|e| e.to_string()));
        assert_eq!(" 20 - 25 ".parse::<PortRange>(), PortRange::new(20, 25).map_err(|e| e.to_string()));
    }

    #[test]
    fn parse_range_errors() {
        assert!("1-abc"
            .parse::<PortRange>()
            .unwrap_err()
            .contains("Invalid end port 'abc' in range '1-abc'"));
        assert!("1-70000"
            .parse::<PortRange>()
            .unwrap_err()
            .contains("Invalid end port '70000'"));
        assert!("5-1"
            .parse::<PortRange>()
            .unwrap_err()
            .contains("must be between 1 and 65535"));
    }

    #[test]
    fn serial_strategy_with_range() {
        let range = PortRange::new(1, 100).unwrap();
        let strategy = PortStrategy::pick(range, ScanOrder::Serial);
        let result = strategy.order();
        let expected_range = (1..=100).collect::<Vec<u16>>();
        assert_eq!(expected_range, result);
    }

    #[test]
    fn random_strategy_with_range() {
        let range = PortRange::new(1, 100).unwrap();
        let strategy = PortStrategy::pick(range, ScanOrder::Random);
        let mut result = strategy.order();
        let expected_range = (1..=100).collect::<Vec<u16>>();
        assert_ne!(expected_range, result);

        result.sort_unstable();
        assert_eq!(expected_range, result);
    }
}
