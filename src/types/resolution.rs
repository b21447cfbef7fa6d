use std::fmt::Display;

/// Vertical video resolution, e.g. `1080p`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Resolution(u16);

impl Resolution {
    pub fn from_height(height: u16) -> Self {
        Self(height)
    }

    pub fn height(self) -> u16 {
        self.0
    }
}

impl Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}p", self.0)
    }
}
