//! Domain layer: the collection lifecycle, collectors, money and the ports
//! through which the saga reaches every other service.

pub mod category;
pub mod collection;
pub mod collector;
pub mod events;
pub mod money;
pub mod payment;
pub mod ports;
pub mod staged;
