/// Half-duplex gateway over the packet driver
pub mod gateway;

/// Radio driver abstraction
pub mod traits;

pub use gateway::{GatewayError, RadioGateway, RadioState, SendOptions};
pub use traits::{Radio, TxParams};

/// Named radio channels
///
/// The closed set of channels the link is specified for; 2W pairing and
/// command traffic uses [`Channel::Channel2`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// First link channel
    Channel1,
    /// Second link channel, carries 2W session traffic
    Channel2,
    /// Third link channel
    Channel3,
}
