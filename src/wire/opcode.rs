/// DCP opcodes, as listed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Open,
    AddStream,
    CloseStream,
    StreamReq,
    StreamEnd,
    SnapshotMarker,
    Mutation,
    Deletion,
    DeletionV2,
    Expiration,
    Flush,
    SetVBucketState,
    Noop,
    BufferAck,
    Control,
    SystemEvent,
    GetErrorMap,
    SeqnoAcknowledgement,
}

impl Opcode {
    /// The byte used on the wire, matching the upstream DCP opcode table.
    pub fn code(self) -> u8 {
        match self {
            Opcode::Open => 0x50,
            Opcode::AddStream => 0x51,
            Opcode::CloseStream => 0x52,
            Opcode::StreamReq => 0x53,
            Opcode::StreamEnd => 0x55,
            Opcode::SnapshotMarker => 0x56,
            Opcode::Mutation => 0x57,
            Opcode::Deletion => 0x58,
            Opcode::Expiration => 0x59,
            Opcode::Flush => 0x5a,
            Opcode::SetVBucketState => 0x5b,
            Opcode::Noop => 0x5c,
            Opcode::BufferAck => 0x5d,
            Opcode::Control => 0x5e,
            Opcode::SystemEvent => 0x5f,
            Opcode::GetErrorMap => 0xfe,
            Opcode::SeqnoAcknowledgement => 0x5f + 1,
            Opcode::DeletionV2 => 0x64,
        }
    }

    pub fn from_code(code: u8) -> Option<Opcode> {
        let all = [
            Opcode::Open,
            Opcode::AddStream,
            Opcode::CloseStream,
            Opcode::StreamReq,
            Opcode::StreamEnd,
            Opcode::SnapshotMarker,
            Opcode::Mutation,
            Opcode::Deletion,
            Opcode::DeletionV2,
            Opcode::Expiration,
            Opcode::Flush,
            Opcode::SetVBucketState,
            Opcode::Noop,
            Opcode::BufferAck,
            Opcode::Control,
            Opcode::SystemEvent,
            Opcode::GetErrorMap,
            Opcode::SeqnoAcknowledgement,
        ];
        all.iter().cloned().find(|op| op.code() == code)
    }
}
