pub mod rtu;
pub mod tcp;
