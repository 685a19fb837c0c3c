use super::Channel;

/// Physical transmission parameters handed to the driver
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TxParams {
    /// Channel to transmit on
    pub channel: Channel,
    /// Short preamble (active session) or long wake-up preamble
    pub short_preamble: bool,
    /// Hardware repeat count (0 means a single transmission)
    pub repeat: u8,
    /// Milliseconds between hardware repeats
    pub repeat_time_ms: u32,
}

/// Opaque half-duplex packet transceiver
///
/// The driver owns modulation, preamble generation, and hardware repeats;
/// the gateway above it owns arbitration and framing. A transmission
/// accepted by [`Radio::transmit`] completes asynchronously;
/// [`Radio::is_transmitting`] reports completion.
pub trait Radio {
    /// Driver error type
    type Error;

    /// Initialize the transceiver
    fn init(&mut self) -> Result<(), Self::Error>;

    /// Start transmitting one on-air frame
    fn transmit(&mut self, bytes: &[u8], params: &TxParams) -> Result<(), Self::Error>;

    /// Whether a transmission (including repeats) is still in flight
    fn is_transmitting(&mut self) -> Result<bool, Self::Error>;

    /// Fetch one received frame, returning its length (0 when idle)
    fn receive(&mut self, buffer: &mut [u8]) -> Result<usize, Self::Error>;
}
