use anyhow::Result;

use crate::chip::{
    DataRequest, HwmeAttribute, Indication, LoLockConfirm, MacAttribute, TdmeAttribute, TdmeStatus,
    TdmeTestMode, TestPacket,
};

/// Synchronous command interface to the transceiver.
///
/// Configuration commands return `Err` when the chip answers with a non-success status.
/// Commands whose status is a measurement (`tdme_txpkt`, `tdme_lotlk`) return it as `Ok`.
#[cfg_attr(test, mockall::automock)]
pub trait ChipTransport {
    fn tdme_set(&mut self, attribute: TdmeAttribute, value: &[u8]) -> Result<()>;

    fn tdme_testmode(&mut self, mode: TdmeTestMode) -> Result<()>;

    /// Write a special function register.
    fn tdme_setsfr(&mut self, page: u8, address: u8, value: u8) -> Result<()>;

    /// Transmit one test packet. The chip fills in the payload for internally generated data types.
    fn tdme_txpkt(&mut self, packet: &mut TestPacket) -> Result<TdmeStatus>;

    fn tdme_lotlk(&mut self, channel: u8, rx_txb: bool) -> Result<LoLockConfirm>;

    fn mlme_reset(&mut self, set_default_pib: bool) -> Result<()>;

    fn mlme_set(&mut self, attribute: MacAttribute, value: &[u8]) -> Result<()>;

    fn hwme_set(&mut self, attribute: HwmeAttribute, value: &[u8]) -> Result<()>;

    fn hwme_get(&mut self, attribute: HwmeAttribute) -> Result<u8>;

    /// Queue a MAC data frame. The outcome arrives later as a data confirm indication.
    fn mcps_data_request(&mut self, request: &DataRequest) -> Result<()>;

    /// Fill `buf` from the hardware random number source.
    fn random_bytes(&mut self, buf: &mut [u8]) -> Result<()>;

    /// Fetch the next pending indication.
    /// Returns Ok(None) if nothing is pending.
    fn poll_indication(&mut self) -> Result<Option<Indication>>;
}
