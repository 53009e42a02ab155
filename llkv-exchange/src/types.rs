use std::fmt;

/// 128-bit id of a query or fragment instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UniqueId {
    pub hi: i64,
    pub lo: i64,
}

impl UniqueId {
    pub const fn new(hi: i64, lo: i64) -> Self {
        Self { hi, lo }
    }
}

impl fmt::Display for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}-{:x}", self.hi, self.lo)
    }
}

/// Plan node id of an exchange.
pub type NodeId = i32;

/// Index of a sending fragment instance within an exchange.
pub type SenderId = i32;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_hex_pair() {
        assert_eq!(UniqueId::new(255, 16).to_string(), "ff-10");
    }
}
