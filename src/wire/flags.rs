/// `Open` bitfield flags.
///
/// the expanded spec lists these as `Producer (0)`, `Notifier (1)`, `IncludeXattrs (4)`,
/// `NoValue (8)`, `NoValueWithUnderlyingDatatype (64)`. A flag that tests as
/// zero can never be detected with a bitwise AND, so `Producer` is assigned
/// bit `0x01` here (consistent with every other flag in the set being a
/// distinct power of two) — see DESIGN.md.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenFlags(pub u32);

impl OpenFlags {
    pub const PRODUCER: u32 = 0x01;
    pub const NOTIFIER: u32 = 0x02;
    pub const INCLUDE_XATTRS: u32 = 0x04;
    pub const NO_VALUE: u32 = 0x08;
    pub const NO_VALUE_WITH_UNDERLYING_DATATYPE: u32 = 0x40;

    pub fn has(self, bit: u32) -> bool {
        self.0 & bit != 0
    }

    pub fn is_producer(self) -> bool {
        self.has(Self::PRODUCER)
    }

    pub fn is_notifier(self) -> bool {
        self.has(Self::NOTIFIER)
    }

    pub fn include_xattrs(self) -> bool {
        self.has(Self::INCLUDE_XATTRS)
    }

    pub fn no_value(self) -> bool {
        self.has(Self::NO_VALUE)
    }
}

/// `StreamEnd` status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEndStatus {
    Ok,
    Closed,
    StateChanged,
    Disconnected,
    Slow,
}

impl StreamEndStatus {
    pub fn code(self) -> u32 {
        match self {
            StreamEndStatus::Ok => 0,
            StreamEndStatus::Closed => 1,
            StreamEndStatus::StateChanged => 2,
            StreamEndStatus::Disconnected => 3,
            StreamEndStatus::Slow => 4,
        }
    }
}

/// `SnapshotMarker` bitfield flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SnapshotMarkerFlags(pub u32);

impl SnapshotMarkerFlags {
    pub const MEMORY: u32 = 0x1;
    pub const DISK: u32 = 0x2;
    pub const CHECKPOINT: u32 = 0x4;
    pub const ACK: u32 = 0x8;

    pub fn has(self, bit: u32) -> bool {
        self.0 & bit != 0
    }

    pub fn is_disk(self) -> bool {
        self.has(Self::DISK)
    }

    pub fn is_memory(self) -> bool {
        self.has(Self::MEMORY)
    }

    pub fn is_checkpoint(self) -> bool {
        self.has(Self::CHECKPOINT)
    }
}
