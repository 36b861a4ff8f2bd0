use core::fmt;
use core::str::FromStr;

/// Physical device address, `area.line.device` (4/4/8 bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct IndividualAddress(pub u16);

impl IndividualAddress {
    pub const UNSET: Self = Self(0);

    pub const fn new(area: u8, line: u8, device: u8) -> Self {
        Self(((area as u16 & 0x0f) << 12) | ((line as u16 & 0x0f) << 8) | device as u16)
    }

    pub const fn raw(self) -> u16 {
        self.0
    }

    pub const fn is_unset(self) -> bool {
        self.0 == 0
    }

    pub const fn area(self) -> u8 {
        ((self.0 >> 12) & 0x0f) as u8
    }

    pub const fn line(self) -> u8 {
        ((self.0 >> 8) & 0x0f) as u8
    }

    pub const fn device(self) -> u8 {
        (self.0 & 0xff) as u8
    }
}

impl fmt::Display for IndividualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.area(), self.line(), self.device())
    }
}

/// Logical multicast address, `main/middle/sub` (5/3/8 bits).
///
/// Group `0/0/0` is the broadcast destination and, in subscriptions, the
/// wildcard for "every group".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GroupAddress(pub u16);

impl GroupAddress {
    pub const BROADCAST: Self = Self(0);

    pub const fn new(main: u8, middle: u8, sub: u8) -> Self {
        Self(((main as u16 & 0x1f) << 11) | ((middle as u16 & 0x07) << 8) | sub as u16)
    }

    pub const fn raw(self) -> u16 {
        self.0
    }

    pub const fn is_broadcast(self) -> bool {
        self.0 == 0
    }

    pub const fn main(self) -> u8 {
        ((self.0 >> 11) & 0x1f) as u8
    }

    pub const fn middle(self) -> u8 {
        ((self.0 >> 8) & 0x07) as u8
    }

    pub const fn sub(self) -> u8 {
        (self.0 & 0xff) as u8
    }
}

impl fmt::Display for GroupAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.main(), self.middle(), self.sub())
    }
}

/// Destination of an `L_Data` frame; the variant is the frame's address-type bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Destination {
    Individual(IndividualAddress),
    Group(GroupAddress),
}

impl Destination {
    pub const fn raw(self) -> u16 {
        match self {
            Self::Individual(a) => a.0,
            Self::Group(g) => g.0,
        }
    }

    pub const fn is_group(self) -> bool {
        matches!(self, Self::Group(_))
    }

    pub(crate) const fn from_raw(raw: u16, group: bool) -> Self {
        if group {
            Self::Group(GroupAddress(raw))
        } else {
            Self::Individual(IndividualAddress(raw))
        }
    }
}

impl Default for Destination {
    fn default() -> Self {
        Self::Individual(IndividualAddress::UNSET)
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Individual(a) => write!(f, "{a}"),
            Self::Group(g) => write!(f, "{g}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressParseError;

impl fmt::Display for AddressParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("malformed EIB address")
    }
}

#[cfg(feature = "std")]
impl std::error::Error for AddressParseError {}

fn parse_triple(s: &str, sep: char, limits: [u32; 3]) -> Result<[u8; 3], AddressParseError> {
    let mut out = [0u8; 3];
    let mut parts = s.trim().split(sep);
    for (slot, limit) in out.iter_mut().zip(limits) {
        let value: u32 = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or(AddressParseError)?;
        if value > limit {
            return Err(AddressParseError);
        }
        *slot = value as u8;
    }
    if parts.next().is_some() {
        return Err(AddressParseError);
    }
    Ok(out)
}

impl FromStr for IndividualAddress {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let [a, l, d] = parse_triple(s, '.', [0x0f, 0x0f, 0xff])?;
        Ok(Self::new(a, l, d))
    }
}

impl FromStr for GroupAddress {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let [m, mid, sub] = parse_triple(s, '/', [0x1f, 0x07, 0xff])?;
        Ok(Self::new(m, mid, sub))
    }
}

#[cfg(test)]
mod tests {
    use super::{GroupAddress, IndividualAddress};
    use alloc::string::ToString;

    #[test]
    fn individual_layout() {
        let a = IndividualAddress::new(1, 1, 1);
        assert_eq!(a.raw(), 0x1101);
        assert_eq!(a.to_string(), "1.1.1");
        assert_eq!(IndividualAddress(0xFFFF).to_string(), "15.15.255");
    }

    #[test]
    fn group_layout() {
        let g = GroupAddress::new(1, 2, 3);
        assert_eq!(g.raw(), 0x0A03);
        assert_eq!(g.to_string(), "1/2/3");
        assert_eq!(GroupAddress(0xFFFF).to_string(), "31/7/255");
    }

    #[test]
    fn parse_round_trips_text() {
        assert_eq!("0.0.1".parse::<IndividualAddress>().unwrap().raw(), 0x0001);
        assert_eq!("1/2/4".parse::<GroupAddress>().unwrap(), GroupAddress::new(1, 2, 4));
    }

    #[test]
    fn parse_rejects_out_of_range() {
        assert!("16.0.1".parse::<IndividualAddress>().is_err());
        assert!("1/8/0".parse::<GroupAddress>().is_err());
        assert!("1/2".parse::<GroupAddress>().is_err());
        assert!("1.2.3.4".parse::<IndividualAddress>().is_err());
    }
}
