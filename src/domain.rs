//! Single-byte domain-separation prefixes, one per protocol operation.
//!
//! The prefix is always the first byte hashed under the MAC key.

pub const PREFIX_HELLO: u8 = 0x01;
pub const PREFIX_STATUS: u8 = 0x02;
pub const PREFIX_REGISTER: u8 = 0x03;
pub const PREFIX_UNREGISTER: u8 = 0x04;

/// Protocol operations that carry a MAC.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    Hello,
    Status,
    Register,
    Unregister,
}

impl Operation {
    pub const ALL: [Self; 4] = [Self::Hello, Self::Status, Self::Register, Self::Unregister];

    #[must_use]
    pub const fn prefix(self) -> u8 {
        match self {
            Self::Hello => PREFIX_HELLO,
            Self::Status => PREFIX_STATUS,
            Self::Register => PREFIX_REGISTER,
            Self::Unregister => PREFIX_UNREGISTER,
        }
    }
}
