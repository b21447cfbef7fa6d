use std::fmt::Display;

/// Audio bitrate, in kbit/s
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Bitrate(u16);

impl Bitrate {
    pub fn from_kbps(kbps: u16) -> Self {
        Self(kbps)
    }

    pub fn kbps(self) -> u16 {
        self.0
    }
}

impl Display for Bitrate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}kbps", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displayed_in_kbps() {
        assert_eq!(Bitrate::from_kbps(48).to_string(), "48kbps");
        assert!(Bitrate::from_kbps(160) > Bitrate::from_kbps(128));
    }
}
