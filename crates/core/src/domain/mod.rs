pub mod company;
pub mod customer;
pub mod financials;
pub mod offer;
pub mod project;
