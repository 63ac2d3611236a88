/// A block height in the chain, with genesis at height 0.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Height(pub u32);

impl Height {
    /// The height of the genesis block.
    pub const MIN: Height = Height(0);

    /// The highest representable height. No real chain approaches this.
    pub const MAX: Height = Height(u32::MAX);

    /// The next height up, saturating at the maximum.
    pub fn next(self) -> Height {
        Height(self.0.saturating_add(1))
    }

    /// Height `other` blocks back, or `None` below genesis.
    pub fn checked_sub(self, other: u32) -> Option<Height> {
        self.0.checked_sub(other).map(Height)
    }
}

impl std::fmt::Display for Height {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}
