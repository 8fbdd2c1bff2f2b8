pub mod abi_store;
pub mod calls;
pub mod chain;
pub mod decode;

pub use abi_store::{AbiStore, InMemoryAbiStore};
pub use chain::{
    AlloyChainProvider, ChainProvider, ContractHandle, EventSink, ListenerHandle, RawEvent,
};
