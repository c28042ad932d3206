//! Device pairing and token persistence.

pub mod error;
pub mod pairing;
pub mod store;

pub use error::PairingError;
pub use pairing::{PairingClient, PairingOutcome, PairingPoll, PairingSession, PairingStart};
pub use store::{
    DeviceToken, DeviceTokenStore, FileDeviceTokenStore, MemoryDeviceTokenStore, DEVICE_TOKEN_KEY,
};
