//! Chip-level value types exchanged with the transceiver.
//!
//! These mirror the TDME (test/diagnostic), HWME (hardware management),
//! MLME/MCPS (MAC management and data service) primitives of the transceiver
//! command set. The engine only ever sees them through [`crate::traits::ChipTransport`].

use serde::{Deserialize, Serialize};

/// Maximum PSDU length of an IEEE 802.15.4 frame.
pub const MAX_PACKET_LENGTH: usize = 127;

/// Status returned by TDME primitives and carried by RX packet indications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TdmeStatus {
    Success,
    Unknown,
    Invalid,
    NoAccess,
    /// LO locking error
    LoError,
    /// Received packet frame check sequence (CRC) error
    FcsError,
    /// Received packet synchronisation header error
    ShrError,
    /// Received packet PHY header error
    PhrError,
}

/// Status returned in an MCPS-DATA confirm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacStatus {
    Success,
    ChannelAccessFailure,
    NoAck,
    Other(u8),
}

/// Test modes understood by the transceiver itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TdmeTestMode {
    Off,
    Tx,
    Rx,
    Ed,
    Lo1,
    Lo2,
    Lo3,
}

/// TDME configuration attributes, in the order they are written on arming
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TdmeAttribute {
    Channel,
    TxConfig,
    EdConfig,
    RxConfig,
    Lo1Config,
    Lo2Config,
    AtmConfig,
}

impl TdmeAttribute {
    pub const ARM_ORDER: [TdmeAttribute; 7] = [
        TdmeAttribute::Channel,
        TdmeAttribute::TxConfig,
        TdmeAttribute::EdConfig,
        TdmeAttribute::RxConfig,
        TdmeAttribute::Lo1Config,
        TdmeAttribute::Lo2Config,
        TdmeAttribute::AtmConfig,
    ];
}

/// HWME attributes used by the MAC-assisted test path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HwmeAttribute {
    CcaMode,
    EdThreshold,
    /// ED value of the last received packet
    EdValueLastPacket,
    /// Frequency offset of the last received packet
    FrequencyOffset,
}

/// MAC PIB attributes written by the MAC adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacAttribute {
    PanId,
    RxOnWhenIdle,
    ShortAddress,
    IeeeAddress,
}

/// CCA mode "ED or CS level exceeded"
pub const CCA_MODE_ED_OR_CS: u8 = 0;

/// Packet payload fill strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadType {
    /// Random bytes
    #[default]
    Random,
    /// Sequence number in the first byte, remainder random
    SequenceRandom,
    /// Incrementing bytes starting at 1
    Count,
    /// Supplied by the host (zero filled)
    Appended,
}

/// One test packet handed to (and possibly filled in by) the transceiver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestPacket {
    pub sequence_number: u8,
    pub data_type: PayloadType,
    pub data: Vec<u8>,
}

impl TestPacket {
    pub fn new(sequence_number: u8, data_type: PayloadType, length: u8) -> Self {
        let length = (length as usize).min(MAX_PACKET_LENGTH);
        TestPacket {
            sequence_number,
            data_type,
            data: vec![0; length],
        }
    }

    pub fn length(&self) -> u8 {
        self.data.len() as u8
    }
}

/// Fill `data` according to `data_type`. `random` is only called for the random strategies.
pub fn fill_payload(data_type: PayloadType, sequence_number: u8, data: &mut [u8], random: impl FnOnce(&mut [u8])) {
    match data_type {
        PayloadType::Appended => data.fill(0),
        PayloadType::Random => random(data),
        PayloadType::SequenceRandom => {
            if let Some((first, rest)) = data.split_first_mut() {
                *first = sequence_number;
                random(rest);
            }
        }
        PayloadType::Count => {
            for (i, byte) in data.iter_mut().enumerate() {
                *byte = (i + 1) as u8;
            }
        }
    }
}

/// TDME-RXPKT indication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RxPacketIndication {
    pub status: TdmeStatus,
    pub ed_value: u8,
    pub cs_value: u8,
    /// Raw frequency offset, two's complement
    pub fo_value: u8,
    pub data: Vec<u8>,
}

/// TDME-EDDET indication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdIndication {
    pub threshold: u8,
    pub ed_value: u8,
    pub cs_value: u8,
    pub time_above_threshold_us: u16,
}

/// MCPS-DATA indication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataIndication {
    pub dsn: u8,
    pub link_quality: u8,
    pub msdu: Vec<u8>,
}

/// MCPS-DATA confirm
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataConfirm {
    pub msdu_handle: u8,
    pub status: MacStatus,
}

/// TDME-LOTLK confirm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoLockConfirm {
    pub status: TdmeStatus,
    pub channel: u8,
    pub rx_txb: bool,
    pub fdac: u8,
    pub amp: u8,
    pub txcal: u8,
}

/// MCPS-DATA request towards a short destination address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRequest {
    pub dst_pan_id: [u8; 2],
    pub dst_short_address: [u8; 2],
    pub msdu: Vec<u8>,
    pub msdu_handle: u8,
    pub ack_requested: bool,
}

/// Asynchronous events raised by the transceiver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Indication {
    RxPacket(RxPacketIndication),
    EnergyDetected(EdIndication),
    Data(DataIndication),
    DataConfirm(DataConfirm),
}
