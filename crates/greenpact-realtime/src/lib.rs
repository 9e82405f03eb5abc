pub mod channel;
pub mod reconnect;

pub use channel::{
    ChannelConfig, ChannelError, ChannelEvent, ChannelHandle, ChannelState, ContractChannel,
    ContractSnapshot, RealtimeLink, ReplyTo,
};
pub use reconnect::ReconnectPolicy;
