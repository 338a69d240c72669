pub mod codec;
pub mod registry;
pub mod worker;

pub use codec::StateCodec;
pub use registry::{OverlayMap, Registry, RegistryListener, TargetMap};
pub use worker::PersistWorker;
