//! External capabilities the saga steps depend on.

pub mod gateway;
pub mod publisher;
pub mod queue;

pub use gateway::{
    DECLINED_CODE, DECLINED_MESSAGE, GatewayMode, GatewayResponse, InMemoryGateway,
    PaymentGateway, SimulatedGateway,
};
pub use publisher::Publisher;
pub use queue::InMemoryQueue;
