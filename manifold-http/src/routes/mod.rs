pub mod flows;
pub mod ingress;
pub mod reports;
pub mod runs;
pub mod vault;
