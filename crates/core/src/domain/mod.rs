pub mod award;
pub mod quote;
pub mod rfq;
pub mod terms;
