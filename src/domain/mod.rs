pub mod device;
pub mod document;
pub mod item;
pub mod job;

pub use device::{DeviceRecord, DeviceRef, DeviceRegistration, Platform, PushEnvironment};
pub use document::{count_words, CoverBlob, ReaderDocument};
pub use item::{
    short_id, CoverState, DeliveryStatus, IosChannel, Item, JobState, JobStatus, KindleChannel,
    KindleState, PushChannels, ReadinessReason, ReadinessState, ReadinessStatus, DEFAULT_OWNER,
};
pub use job::{JobMessage, JobToken};
